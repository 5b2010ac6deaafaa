//! 캐시 → 영속 티어 일일 동기화.
//!
//! 사이클 단계: 오늘 시세 전송 → 누락 날짜 점검/백필 → 지표 재계산 →
//! 보존 정리. 오래된 시세(이전 날짜)는 잘못된 날짜로 기록되지 않도록
//! 제외됩니다. 단계별 실패는 사이클을 중단시키지 않고 결과 등급
//! ([`CycleOutcome`])에만 반영됩니다.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Utc, Weekday};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use quotes_data::{CachedQuote, PriceRow, PriceStore, QuoteCache};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::modules::metrics_sync::{self, MarketSeriesSource};
use crate::stats::SyncStats;

/// 동기화 사이클 잠금 이름.
pub const SYNC_LOCK: &str = "daily_sync";

/// 누락 날짜 점검 창 (일).
const MISSING_WINDOW_DAYS: i64 = 7;

/// 동기화 사이클 결과 등급.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// 모든 단계 정상 완료
    Success,
    /// 일부 전송/단계 실패, 일부는 성공
    Partial,
    /// 전송 성과 없이 실패만 발생
    Failed,
}

impl CycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

/// 통계와 단계 오류 수로 사이클 결과 등급 결정.
pub fn determine_outcome(stats: &SyncStats, stage_errors: usize) -> CycleOutcome {
    let troubled = stats.failed > 0 || stage_errors > 0;
    if !troubled {
        CycleOutcome::Success
    } else if stats.synced > 0 {
        CycleOutcome::Partial
    } else {
        CycleOutcome::Failed
    }
}

/// 과거 종가 소스.
///
/// 누락 날짜 백필에 사용됩니다. 기본 구성에서는 소스가 없으며
/// ([`NoHistoricalSource`]), 갭은 집계만 되고 값이 만들어지지 않습니다.
#[async_trait]
pub trait HistoricalPriceSource: Send + Sync {
    /// 특정 날짜의 종가 조회. 제공 불가 시 `Ok(None)`.
    async fn price_on(&self, symbol: &str, date: NaiveDate) -> Result<Option<Decimal>>;
}

/// 과거 시세 소스 없음 — 모든 조회에 `None`.
pub struct NoHistoricalSource;

#[async_trait]
impl HistoricalPriceSource for NoHistoricalSource {
    async fn price_on(&self, _symbol: &str, _date: NaiveDate) -> Result<Option<Decimal>> {
        Ok(None)
    }
}

/// 시세를 오늘 관측분과 오래된 것으로 분리.
///
/// 오늘 날짜 시세만 `PriceRow`로 변환하고, 나머지는 심볼 목록으로 반환합니다.
pub fn partition_today(
    quotes: &[(String, CachedQuote)],
    today: NaiveDate,
) -> (Vec<PriceRow>, Vec<String>) {
    let mut rows = Vec::new();
    let mut stale = Vec::new();

    for (symbol, quote) in quotes {
        match quote.observed_date() {
            Some(date) if date == today => rows.push(PriceRow {
                symbol: symbol.clone(),
                date: today,
                closing_price: quote.price,
            }),
            _ => stale.push(symbol.clone()),
        }
    }

    (rows, stale)
}

/// 최근 `window_days`일 중 이력에 없는 거래일(월~금) 목록.
///
/// `end`를 포함한 과거 방향 창을 검사하며 주말은 제외합니다.
pub fn missing_dates(existing: &[NaiveDate], end: NaiveDate, window_days: i64) -> Vec<NaiveDate> {
    let start = end - ChronoDuration::days(window_days - 1);
    let mut missing = Vec::new();

    let mut date = start;
    while date <= end {
        let weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
        if !weekend && !existing.contains(&date) {
            missing.push(date);
        }
        date += ChronoDuration::days(1);
    }

    missing
}

/// 단일 동기화 사이클 실행.
///
/// 잠금을 획득하지 못하면 `Ok(None)`. 잠금은 사이클 성패와 무관하게
/// 항상 해제됩니다.
pub async fn run_daily_sync(
    cache: &QuoteCache,
    store: &PriceStore,
    historical: &dyn HistoricalPriceSource,
    market: &dyn MarketSeriesSource,
    risk_free_rate: f64,
    config: &SyncConfig,
) -> Result<Option<(CycleOutcome, SyncStats)>> {
    if !cache.acquire_lock(SYNC_LOCK, config.lock_ttl_secs()).await? {
        warn!(lock = SYNC_LOCK, "잠금 획득 실패 — 동기화 건너뜀");
        return Ok(None);
    }

    let result = sync_inner(cache, store, historical, market, risk_free_rate, config).await;

    if let Err(e) = cache.release_lock(SYNC_LOCK).await {
        warn!(lock = SYNC_LOCK, error = %e, "잠금 해제 실패 (TTL로 만료 예정)");
    }

    result.map(Some)
}

async fn sync_inner(
    cache: &QuoteCache,
    store: &PriceStore,
    historical: &dyn HistoricalPriceSource,
    market: &dyn MarketSeriesSource,
    risk_free_rate: f64,
    config: &SyncConfig,
) -> Result<(CycleOutcome, SyncStats)> {
    let started = Instant::now();
    let today = Utc::now().date_naive();
    let mut stage_errors = 0usize;

    let symbols = cache.list_symbols().await?;
    let mut stats = SyncStats {
        total: symbols.len(),
        ..Default::default()
    };

    // 1단계: 오늘 시세 배치 전송
    for chunk in symbols.chunks(config.batch_size.max(1)) {
        let mut quotes = Vec::with_capacity(chunk.len());
        for symbol in chunk {
            match cache.get_quote(symbol).await {
                Ok(Some(quote)) => quotes.push((symbol.clone(), quote)),
                Ok(None) => {}
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "캐시 조회 실패");
                    stats.failed += 1;
                }
            }
        }

        let (rows, stale) = partition_today(&quotes, today);
        stats.stale_skipped += stale.len();
        if !stale.is_empty() {
            debug!(count = stale.len(), "오래된 시세 제외");
        }

        if !rows.is_empty() {
            match store.save_prices(&rows).await {
                Ok(_) => stats.synced += rows.len(),
                Err(e) => {
                    warn!(error = %e, count = rows.len(), "배치 저장 실패");
                    stats.failed += rows.len();
                }
            }
        }
    }

    // 2단계: 최근 누락 날짜 점검 및 백필
    for symbol in &symbols {
        let window_start = today - ChronoDuration::days(MISSING_WINDOW_DAYS - 1);
        let existing = match store.get_dates_since(symbol, window_start).await {
            Ok(dates) => dates,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "이력 조회 실패 — 누락 점검 건너뜀");
                continue;
            }
        };

        for date in missing_dates(&existing, today, MISSING_WINDOW_DAYS) {
            match historical.price_on(symbol, date).await {
                Ok(Some(price)) => {
                    let row = PriceRow {
                        symbol: symbol.clone(),
                        date,
                        closing_price: price,
                    };
                    if let Err(e) = store.save_price(&row).await {
                        warn!(symbol = %symbol, date = %date, error = %e, "백필 저장 실패");
                        stats.failed += 1;
                    }
                }
                Ok(None) => {
                    debug!(symbol = %symbol, date = %date, "누락 날짜 백필 불가");
                    stats.unfilled += 1;
                }
                Err(e) => {
                    warn!(symbol = %symbol, date = %date, error = %e, "백필 조회 실패");
                    stats.failed += 1;
                }
            }
        }
    }

    // 3단계: 파생 지표 재계산 (전송된 이력 반영)
    match metrics_sync::update_all(store, market, risk_free_rate).await {
        Ok(metrics_stats) => {
            metrics_stats.log_summary("지표 갱신");
            stats.failed += metrics_stats.failed;
        }
        Err(e) => {
            warn!(error = %e, "지표 갱신 단계 실패");
            stage_errors += 1;
        }
    }

    // 4단계: 보존 기간 초과 이력 정리
    if let Err(e) = store.cleanup_old_prices(config.retention_days).await {
        warn!(error = %e, "보존 정리 실패");
        stage_errors += 1;
    }

    stats.elapsed = started.elapsed();
    let outcome = determine_outcome(&stats, stage_errors);
    info!(outcome = outcome.as_str(), "동기화 사이클 종료");
    Ok((outcome, stats))
}

/// 데몬 모드: 주기적으로 동기화 사이클 실행.
pub async fn run_sync_daemon(
    cache: &QuoteCache,
    store: &PriceStore,
    historical: &dyn HistoricalPriceSource,
    market: &dyn MarketSeriesSource,
    risk_free_rate: f64,
    config: &SyncConfig,
) -> Result<()> {
    let interval = config.interval();
    info!(
        interval_minutes = config.interval_minutes,
        "동기화 데몬 시작"
    );

    loop {
        let started = Instant::now();

        match run_daily_sync(cache, store, historical, market, risk_free_rate, config).await {
            Ok(Some((_, stats))) => stats.log_summary("일일 동기화"),
            Ok(None) => {}
            Err(e) => tracing::error!("동기화 사이클 실패: {}", e),
        }

        let sleep = crate::modules::fetch_cycle::remaining_sleep(interval, started.elapsed());
        tokio::time::sleep(sleep).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuoteProviderConfig;
    use crate::modules::fetcher::{QuoteFetcher, RetryPolicy};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn quote_at(price: Decimal, date: NaiveDate) -> CachedQuote {
        let timestamp = date
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp() as f64;
        CachedQuote { price, timestamp }
    }

    #[test]
    fn test_partition_today_excludes_stale() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let yesterday = NaiveDate::from_ymd_opt(2024, 1, 14).unwrap();

        let quotes = vec![
            ("AAPL".to_string(), quote_at(dec!(189.25), today)),
            ("MSFT".to_string(), quote_at(dec!(402.10), yesterday)),
            ("NVDA".to_string(), quote_at(dec!(550.00), today)),
        ];

        let (rows, stale) = partition_today(&quotes, today);

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.date == today));
        assert_eq!(stale, vec!["MSFT".to_string()]);
    }

    #[test]
    fn test_partition_today_all_stale() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let old = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();

        let quotes = vec![("AAPL".to_string(), quote_at(dec!(100), old))];
        let (rows, stale) = partition_today(&quotes, today);

        assert!(rows.is_empty());
        assert_eq!(stale.len(), 1);
    }

    #[test]
    fn test_missing_dates_finds_gaps() {
        // 2024-01-01(월) ~ 2024-01-05(금): 1, 2, 4일만 존재 → 3, 5일 누락
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let existing = vec![d(1), d(2), d(4)];

        let missing = missing_dates(&existing, d(5), 5);
        assert_eq!(missing, vec![d(3), d(5)]);
    }

    #[test]
    fn test_missing_dates_skips_weekends() {
        // 2024-01-08(월) 기준 7일 창: 1/6(토), 1/7(일)은 제외
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let existing = vec![d(2), d(3), d(4), d(5), d(8)];

        let missing = missing_dates(&existing, d(8), 7);
        assert!(missing.is_empty());
    }

    #[test]
    fn test_missing_dates_full_history_is_empty() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let existing = vec![d(1), d(2), d(3), d(4), d(5)];
        assert!(missing_dates(&existing, d(5), 5).is_empty());
    }

    #[test]
    fn test_determine_outcome_grades() {
        let clean = SyncStats {
            total: 10,
            synced: 10,
            ..Default::default()
        };
        assert_eq!(determine_outcome(&clean, 0), CycleOutcome::Success);

        // unfilled는 소스 부재일 뿐 실패가 아님
        let unfilled = SyncStats {
            total: 10,
            synced: 10,
            unfilled: 3,
            ..Default::default()
        };
        assert_eq!(determine_outcome(&unfilled, 0), CycleOutcome::Success);

        let mixed = SyncStats {
            total: 10,
            synced: 8,
            failed: 2,
            ..Default::default()
        };
        assert_eq!(determine_outcome(&mixed, 0), CycleOutcome::Partial);

        let stage_trouble = SyncStats {
            total: 10,
            synced: 10,
            ..Default::default()
        };
        assert_eq!(determine_outcome(&stage_trouble, 1), CycleOutcome::Partial);

        let broken = SyncStats {
            total: 10,
            failed: 10,
            ..Default::default()
        };
        assert_eq!(determine_outcome(&broken, 0), CycleOutcome::Failed);
    }

    #[tokio::test]
    async fn test_no_historical_source_returns_none() {
        let source = NoHistoricalSource;
        let date = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        assert!(source.price_on("AAPL", date).await.unwrap().is_none());
    }

    /// 수집 → 분리 파이프라인 연결: A는 50.0으로 성공, B는 현재가 필드
    /// 누락으로 실패하면 오늘자 전송 행은 (A, today, 50.0) 하나여야 합니다.
    #[tokio::test]
    async fn test_fetch_then_partition_flow() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("GET", "/quote")
            .match_query(mockito::Matcher::UrlEncoded("symbol".into(), "AAA".into()))
            .with_status(200)
            .with_body(r#"{"c": 50.0}"#)
            .create_async()
            .await;
        let missing = server
            .mock("GET", "/quote")
            .match_query(mockito::Matcher::UrlEncoded("symbol".into(), "BBB".into()))
            .with_status(200)
            .with_body(r#"{"h": 1.0}"#)
            .create_async()
            .await;

        let fetcher = QuoteFetcher::new(
            &QuoteProviderConfig {
                api_key: "test-key".to_string(),
                base_url: server.url(),
            },
            RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(10),
                backoff_multiplier: 2.0,
                transport_retry_delay: Duration::from_millis(10),
            },
        );

        let today = Utc::now().date_naive();
        let mut quotes = Vec::new();
        let (mut success, mut failed) = (0, 0);
        for symbol in ["AAA", "BBB"] {
            match fetcher.fetch_quote(symbol).await {
                Ok(price) => {
                    success += 1;
                    quotes.push((symbol.to_string(), quote_at(price, today)));
                }
                Err(_) => failed += 1,
            }
        }

        assert_eq!((success, failed), (1, 1));

        let (rows, stale) = partition_today(&quotes, today);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "AAA");
        assert_eq!(rows[0].date, today);
        assert_eq!(rows[0].closing_price, dec!(50.0));
        assert!(stale.is_empty());

        ok.assert_async().await;
        missing.assert_async().await;
    }
}
