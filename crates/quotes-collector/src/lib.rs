//! 시세 수집/동기화 데몬.
//!
//! 프로바이더 → Redis 캐시 → PostgreSQL 영속 티어로 이어지는
//! 파이프라인의 실행 주체입니다. 분산 잠금으로 사이클 중복을 막고,
//! Prometheus 카운터로 수집 현황을 노출합니다.

pub mod config;
pub mod error;
pub mod metrics;
pub mod modules;
pub mod stats;

pub use config::CollectorConfig;
pub use error::{CollectorError, Result};
pub use stats::{FetchStats, MetricsStats, SyncStats};
