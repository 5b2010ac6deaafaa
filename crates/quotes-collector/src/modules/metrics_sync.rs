//! 파생 지표 재계산 및 저장.
//!
//! 영속 티어의 종가 이력에서 지표를 계산해 `stock_metrics`에 upsert합니다.
//! CAGR은 1/3/5년(252·N 거래일) 창별로 계산하고, 변동성·RSI·베타·샤프·
//! 최대낙폭은 최근 1년 창을 사용합니다. 개별 지표는 이력이 부족하면
//! NULL로 남고, 한 심볼의 실패가 나머지 심볼 처리를 중단시키지 않습니다.

use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use quotes_analytics as indicators;
use quotes_data::{MetricsRow, PriceStore};

use crate::error::Result;
use crate::stats::MetricsStats;

/// 연 단위 창의 수익률 구간 수.
const RETURNS_1Y: usize = 252;
const RETURNS_3Y: usize = 252 * 3;
const RETURNS_5Y: usize = 252 * 5;

/// 지표 계산에 사용할 최대 이력 길이 (5년 수익률 + 기준 종가 1개).
const MAX_HISTORY: usize = RETURNS_5Y + 1;

/// 베타 계산용 시장 지수 시계열 소스.
///
/// 기본 구성에서는 소스가 없으며 ([`NoMarketSource`]) 베타는 NULL로
/// 저장됩니다. 지수를 임의로 추정하지 않습니다.
#[async_trait]
pub trait MarketSeriesSource: Send + Sync {
    /// 주어진 날짜들에 대응하는 시장 지수 종가. 제공 불가 시 `Ok(None)`.
    async fn closes_on(&self, dates: &[NaiveDate]) -> Result<Option<Vec<f64>>>;
}

/// 시장 시계열 소스 없음.
pub struct NoMarketSource;

#[async_trait]
impl MarketSeriesSource for NoMarketSource {
    async fn closes_on(&self, _dates: &[NaiveDate]) -> Result<Option<Vec<f64>>> {
        Ok(None)
    }
}

/// 창 전체가 차 있을 때만 계산하는 CAGR.
///
/// 이력이 `returns`개 수익률 구간을 채우지 못하면 `None` — 짧은 이력을
/// 연 단위 창으로 잘못 연환산하지 않습니다.
fn cagr_full_window(closes: &[f64], returns: usize) -> Option<f64> {
    if closes.len() <= returns {
        return None;
    }
    indicators::cagr(indicators::trailing(closes, returns))
}

/// 종가 시계열로부터 지표 레코드 구성 (순수 계산).
///
/// `closes`는 날짜 오름차순이어야 합니다. 이력이 2개 미만이면 `None`.
/// `cagr_5y`는 보존 한도가 5년이므로 전체 보유 이력으로 계산합니다.
pub fn compute_metrics_row(
    symbol: &str,
    dates: &[NaiveDate],
    closes: &[f64],
    market_closes: Option<&[f64]>,
    risk_free_rate: f64,
) -> Option<MetricsRow> {
    if closes.len() < 2 || dates.len() != closes.len() {
        return None;
    }
    let date = *dates.last()?;

    let one_year = indicators::trailing(closes, RETURNS_1Y);
    let beta_1y = market_closes.and_then(|market| {
        if market.len() != closes.len() {
            return None;
        }
        indicators::beta(one_year, indicators::trailing(market, RETURNS_1Y))
    });

    Some(MetricsRow {
        symbol: symbol.to_string(),
        date,
        cagr_1y: to_decimal(cagr_full_window(closes, RETURNS_1Y)),
        cagr_3y: to_decimal(cagr_full_window(closes, RETURNS_3Y)),
        cagr_5y: to_decimal(indicators::cagr(closes)),
        volatility_1y: to_decimal(indicators::annualized_volatility(one_year)),
        ma_50: to_decimal(indicators::sma(closes, 50)),
        ma_200: to_decimal(indicators::sma(closes, 200)),
        rsi_14: to_decimal(indicators::rsi(one_year, 14)),
        beta_1y: to_decimal(beta_1y),
        sharpe_ratio_1y: to_decimal(indicators::sharpe_ratio(one_year, risk_free_rate)),
        max_drawdown_1y: to_decimal(indicators::max_drawdown(one_year)),
    })
}

fn to_decimal(value: Option<f64>) -> Option<Decimal> {
    value.filter(|v| v.is_finite()).and_then(Decimal::from_f64_retain)
}

/// 단일 심볼 지표 재계산.
///
/// 이력 부족으로 계산할 수 없으면 `Ok(None)` (저장 없음).
pub async fn recompute(
    store: &PriceStore,
    symbol: &str,
    market: &dyn MarketSeriesSource,
    risk_free_rate: f64,
) -> Result<Option<MetricsRow>> {
    let rows = store.get_closes(symbol, MAX_HISTORY).await?;
    if rows.len() < 2 {
        debug!(symbol = symbol, count = rows.len(), "이력 부족 — 지표 건너뜀");
        return Ok(None);
    }

    let dates: Vec<NaiveDate> = rows.iter().map(|r| r.date).collect();
    let closes: Vec<f64> = rows
        .iter()
        .map(|r| r.closing_price.to_f64().unwrap_or(0.0))
        .collect();

    let market_closes = market.closes_on(&dates).await?;

    let row = compute_metrics_row(
        symbol,
        &dates,
        &closes,
        market_closes.as_deref(),
        risk_free_rate,
    );

    if let Some(ref row) = row {
        store.save_metrics(row).await?;
    }
    Ok(row)
}

/// 전체 심볼 지표 갱신.
pub async fn update_all(
    store: &PriceStore,
    market: &dyn MarketSeriesSource,
    risk_free_rate: f64,
) -> Result<MetricsStats> {
    let started = Instant::now();
    let symbols = store.list_symbols().await?;

    let mut stats = MetricsStats {
        total: symbols.len(),
        ..Default::default()
    };

    for symbol in &symbols {
        match recompute(store, symbol, market, risk_free_rate).await {
            Ok(Some(_)) => stats.updated += 1,
            Ok(None) => stats.skipped += 1,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "지표 갱신 실패");
                stats.failed += 1;
            }
        }
    }

    stats.elapsed = started.elapsed();
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trading_dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
        (0..n)
            .map(|i| start + chrono::Duration::days(i as i64))
            .collect()
    }

    #[test]
    fn test_cagr_windows_use_trailing_anchor() {
        // 2거래년치: 첫해는 100 유지, 둘째 해에 100 → 121 상승.
        // 전체 CAGR은 √1.21−1 = 10%지만 최근 1년 창은 21%여야 합니다.
        let n = RETURNS_1Y * 2 + 1;
        let mut closes = vec![100.0; RETURNS_1Y + 1];
        for i in 1..=RETURNS_1Y {
            closes.push(100.0 * (1.21f64).powf(i as f64 / RETURNS_1Y as f64));
        }
        assert_eq!(closes.len(), n);
        let dates = trading_dates(n);

        let row = compute_metrics_row("AAPL", &dates, &closes, None, 0.02).unwrap();

        let cagr_1y = row.cagr_1y.unwrap();
        assert!(
            (cagr_1y - dec!(0.21)).abs() < dec!(0.000001),
            "cagr_1y = {}",
            cagr_1y
        );
        let cagr_5y = row.cagr_5y.unwrap();
        assert!(
            (cagr_5y - dec!(0.1)).abs() < dec!(0.000001),
            "cagr_5y = {}",
            cagr_5y
        );
        // 3년 창은 이력이 모자라므로 NULL
        assert!(row.cagr_3y.is_none());
    }

    #[test]
    fn test_drawdown_window_excludes_old_crash() {
        // 2년 전 반토막 하락은 최근 1년 창의 최대낙폭에 잡히지 않아야 합니다.
        let n = RETURNS_1Y * 2 + 1;
        let mut closes = Vec::with_capacity(n);
        closes.push(200.0);
        closes.push(100.0); // 구창의 -50%
        while closes.len() < n {
            closes.push(100.0 + closes.len() as f64 * 0.01); // 이후 완만한 상승
        }
        let dates = trading_dates(n);

        let row = compute_metrics_row("AAPL", &dates, &closes, None, 0.02).unwrap();
        let mdd = row.max_drawdown_1y.unwrap();
        assert!(mdd < dec!(0.01), "max_drawdown_1y = {}", mdd);
    }

    #[test]
    fn test_compute_metrics_row_short_history_partial() {
        // 종가 10개: 5y CAGR/변동성/최대낙폭은 계산되지만 창 지표는 NULL
        let dates = trading_dates(10);
        let closes: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();

        let row = compute_metrics_row("AAPL", &dates, &closes, None, 0.02).unwrap();

        assert!(row.cagr_1y.is_none()); // 1년 창 미달
        assert!(row.cagr_3y.is_none());
        assert!(row.cagr_5y.is_some()); // 보유 이력 전체
        assert!(row.volatility_1y.is_some());
        assert!(row.max_drawdown_1y.is_some());
        assert!(row.ma_50.is_none());
        assert!(row.ma_200.is_none());
        assert!(row.rsi_14.is_none()); // 15개 미만
        assert!(row.beta_1y.is_none()); // 시장 시계열 없음
        assert_eq!(row.date, *dates.last().unwrap());
    }

    #[test]
    fn test_compute_metrics_row_with_market_series() {
        let dates = trading_dates(60);
        // 시장과 동일한 등락 방향, 2배 진폭
        let market: Vec<f64> = (0..60)
            .map(|i| 4000.0 * if i % 2 == 0 { 1.0 } else { 1.01 })
            .collect();
        let closes: Vec<f64> = market.iter().map(|m| (m / 4000.0).powi(2) * 100.0).collect();

        let row = compute_metrics_row("AAPL", &dates, &closes, Some(&market), 0.02).unwrap();

        assert!(row.ma_50.is_some());
        assert!(row.rsi_14.is_some());
        assert!(row.beta_1y.is_some());
    }

    #[test]
    fn test_compute_metrics_row_insufficient_history() {
        let dates = trading_dates(1);
        assert!(compute_metrics_row("AAPL", &dates, &[100.0], None, 0.02).is_none());
    }

    #[test]
    fn test_compute_metrics_row_length_mismatch() {
        let dates = trading_dates(3);
        assert!(compute_metrics_row("AAPL", &dates, &[100.0, 101.0], None, 0.02).is_none());
    }
}
