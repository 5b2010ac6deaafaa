//! 수집/동기화 모듈.

pub mod daily_sync;
pub mod fetch_cycle;
pub mod fetcher;
pub mod metrics_sync;

pub use daily_sync::{
    determine_outcome, missing_dates, partition_today, run_daily_sync, run_sync_daemon,
    CycleOutcome, HistoricalPriceSource, NoHistoricalSource, SYNC_LOCK,
};
pub use fetch_cycle::{cache_coverage, run_fetch_cycle, run_fetch_daemon, FETCH_LOCK};
pub use fetcher::{fetch_batch, FetchBudget, FetchError, QuoteFetcher, RateWindow, RetryPolicy};
pub use metrics_sync::{recompute, update_all, MarketSeriesSource, NoMarketSource};
