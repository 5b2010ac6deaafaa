//! 시세 파이프라인의 데이터 티어.
//!
//! 이 crate는 다음을 제공합니다:
//! - Redis 캐시 티어 (최신 시세, 분산 잠금, 배치 커서)
//! - PostgreSQL 영속 티어 (일별 종가 이력, 파생 지표)
//! - 데이터 계층 공통 오류 타입

pub mod cache;
pub mod error;
pub mod storage;

pub use error::{DataError, Result};

// 캐시 타입 재내보내기
pub use cache::{validate_quote, CachedQuote, QuoteCache, RedisConfig};

// 저장소 타입 재내보내기
pub use storage::postgres::{Database, DatabaseConfig, MetricsRow, PriceRow, PriceStore};
