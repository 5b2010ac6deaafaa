//! 시세 수집 사이클 코디네이터.
//!
//! 분산 잠금으로 사이클을 보호하고, 유니버스에서 배치를 고른 뒤
//! 수집 결과를 집계합니다. 데몬 모드에서는 주기에서 실행 시간을 뺀 만큼만
//! 대기하여 사이클 간격을 일정하게 유지합니다.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use quotes_data::QuoteCache;

use crate::config::FetchConfig;
use crate::error::Result;
use crate::metrics;
use crate::modules::fetcher::{fetch_batch, QuoteFetcher};
use crate::stats::FetchStats;

/// 수집 사이클 잠금 이름.
pub const FETCH_LOCK: &str = "stock_fetcher";

/// 캐시가 비어 있을 때 사용하는 시드 유니버스.
///
/// 첫 사이클이 이 심볼들을 수집해 캐시에 올리면, 이후 사이클부터
/// 캐시 키 공간이 유니버스가 됩니다.
const SEED_SYMBOLS: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "META", "TSLA", "BRK.B", "JPM", "V",
];

/// 단일 수집 사이클 실행.
///
/// 잠금을 획득하지 못하면 (다른 실행 주체가 진행 중) `Ok(None)`.
/// 잠금은 사이클 성패와 무관하게 항상 해제됩니다.
pub async fn run_fetch_cycle(
    cache: &QuoteCache,
    fetcher: &QuoteFetcher,
    config: &FetchConfig,
    max_calls: Option<usize>,
) -> Result<Option<FetchStats>> {
    if !cache.acquire_lock(FETCH_LOCK, config.lock_ttl_secs()).await? {
        warn!(lock = FETCH_LOCK, "잠금 획득 실패 — 사이클 건너뜀");
        return Ok(None);
    }

    let result = fetch_cycle_inner(cache, fetcher, config, max_calls).await;

    if let Err(e) = cache.release_lock(FETCH_LOCK).await {
        warn!(lock = FETCH_LOCK, error = %e, "잠금 해제 실패 (TTL로 만료 예정)");
    }

    result.map(Some)
}

async fn fetch_cycle_inner(
    cache: &QuoteCache,
    fetcher: &QuoteFetcher,
    config: &FetchConfig,
    max_calls: Option<usize>,
) -> Result<FetchStats> {
    let universe = cache.list_symbols().await?;

    let batch: Vec<String> = if universe.is_empty() {
        info!(seed = SEED_SYMBOLS.len(), "캐시 비어 있음 — 시드 유니버스 수집");
        SEED_SYMBOLS.iter().map(|s| s.to_string()).collect()
    } else if config.all_stocks {
        universe.clone()
    } else {
        cache.next_batch(config.batch_size).await?
    };

    // 기대 모수는 수집 전에 고정 — 시드 사이클에서는 시드 배치가 모수
    let expected = if universe.is_empty() {
        batch.len()
    } else {
        universe.len()
    };

    let stats = fetch_batch(fetcher, cache, &batch, config, max_calls).await;

    let stored = cache.total_stored().await?;
    metrics::set_stored_total(stored as f64);

    info!(
        stored = stored,
        coverage = format!("{:.1}%", cache_coverage(stored, expected)),
        "캐시 커버리지"
    );

    Ok(stats)
}

/// 캐시 커버리지 (%): 기대 모수 대비 실제 저장 심볼 비율.
///
/// 모수가 0이면 0을 반환합니다. 저장 수가 모수를 넘으면 100으로 한정.
pub fn cache_coverage(stored: usize, expected: usize) -> f64 {
    if expected == 0 {
        return 0.0;
    }
    (stored.min(expected) as f64 / expected as f64) * 100.0
}

/// 다음 사이클까지 남은 대기 시간.
///
/// 사이클 실행 시간이 주기를 초과하면 0 (즉시 다음 사이클).
pub fn remaining_sleep(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// 데몬 모드: 주기적으로 수집 사이클 실행.
pub async fn run_fetch_daemon(
    cache: &QuoteCache,
    fetcher: &QuoteFetcher,
    config: &FetchConfig,
) -> Result<()> {
    let interval = config.interval();
    info!(
        interval_minutes = config.interval_minutes,
        "수집 데몬 시작"
    );

    loop {
        let started = Instant::now();

        match run_fetch_cycle(cache, fetcher, config, None).await {
            Ok(Some(stats)) => stats.log_summary("시세 수집"),
            Ok(None) => {}
            Err(e) => tracing::error!("수집 사이클 실패: {}", e),
        }

        let elapsed = started.elapsed();
        let sleep = remaining_sleep(interval, elapsed);
        if sleep.is_zero() {
            warn!(
                elapsed_secs = elapsed.as_secs(),
                interval_secs = interval.as_secs(),
                "사이클 실행 시간이 주기 초과 — 즉시 다음 사이클"
            );
        }
        tokio::time::sleep(sleep).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coverage_partial() {
        assert!((cache_coverage(45, 50) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_coverage_seed_cycle_all_failed() {
        // 빈 캐시에서 시드 10개 전부 실패 → 0%, 100%가 아님
        assert_eq!(cache_coverage(0, 10), 0.0);
    }

    #[test]
    fn test_coverage_empty_expected() {
        assert_eq!(cache_coverage(0, 0), 0.0);
    }

    #[test]
    fn test_coverage_clamps_at_full() {
        assert_eq!(cache_coverage(12, 10), 100.0);
    }

    #[test]
    fn test_remaining_sleep_normal() {
        let interval = Duration::from_secs(600);
        let elapsed = Duration::from_secs(200);
        assert_eq!(remaining_sleep(interval, elapsed), Duration::from_secs(400));
    }

    #[test]
    fn test_remaining_sleep_overrun_is_zero() {
        let interval = Duration::from_secs(600);
        let elapsed = Duration::from_secs(700);
        assert_eq!(remaining_sleep(interval, elapsed), Duration::ZERO);
    }
}
