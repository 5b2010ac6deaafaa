//! Prometheus 메트릭 설정 및 유틸리티.
//!
//! 수집/저장 카운터를 수집하고 독립 HTTP 리스너로 `/metrics`를 노출합니다.

use std::net::{Ipv4Addr, SocketAddr};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::error::{CollectorError, Result};

/// Prometheus 익스포터를 설치하고 HTTP 리스너를 시작합니다.
///
/// 데몬 프로세스당 한 번만 호출해야 합니다.
pub fn install_exporter(port: u16) -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| CollectorError::Config(format!("Prometheus 익스포터 설치 실패: {}", e)))?;

    describe_counter!("stocks_fetched_total", "Successfully fetched quotes");
    describe_counter!("stocks_failed_total", "Failed quote fetch attempts");
    describe_gauge!("stocks_stored_total", "Symbols currently stored in cache");

    info!(port = port, "Prometheus 익스포터 시작");
    Ok(())
}

/// 수집 성공 카운터 증가.
pub fn record_fetched(count: u64) {
    counter!("stocks_fetched_total").increment(count);
}

/// 수집 실패 카운터 증가.
pub fn record_failed(count: u64) {
    counter!("stocks_failed_total").increment(count);
}

/// 캐시 보관 심볼 수 게이지 갱신.
pub fn set_stored_total(count: f64) {
    gauge!("stocks_stored_total").set(count);
}
