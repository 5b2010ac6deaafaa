//! 일별 종가 시계열 파생 지표.
//!
//! 모든 함수는 날짜 오름차순 종가 슬라이스를 입력으로 받는 순수 함수입니다.
//! 이력이 부족하거나 계산이 정의되지 않으면 `None`을 반환합니다 —
//! 하나의 지표가 실패해도 나머지 지표 계산에는 영향이 없습니다.
//!
//! 연환산 계수는 거래일 기준 252일을 사용합니다.

/// 연간 거래일 수.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// 최근 `max_returns`개 수익률 구간만 남긴 꼬리 슬라이스.
///
/// 종가 기준으로 최대 `max_returns + 1`개를 반환하며 (N개 수익률에는
/// N+1개 종가가 필요), 이력이 그보다 짧으면 전체를 그대로 반환합니다.
/// 연 단위 창(252·N 거래일) 지표 계산에 사용합니다.
pub fn trailing(closes: &[f64], max_returns: usize) -> &[f64] {
    if closes.len() > max_returns + 1 {
        &closes[closes.len() - (max_returns + 1)..]
    } else {
        closes
    }
}

/// 연평균 복리 성장률 (CAGR).
///
/// 기간을 달력이 아닌 거래일 수(252·N)로 환산합니다.
/// 첫 종가가 0 이하이거나 관측치가 2개 미만이면 `None`.
pub fn cagr(closes: &[f64]) -> Option<f64> {
    if closes.len() < 2 {
        return None;
    }
    let first = *closes.first()?;
    let last = *closes.last()?;
    if first <= 0.0 || last <= 0.0 {
        return None;
    }

    let years = (closes.len() - 1) as f64 / TRADING_DAYS_PER_YEAR;
    Some((last / first).powf(1.0 / years) - 1.0)
}

/// 일별 로그 수익률.
///
/// 0 이하 가격이 끼어 있으면 `None` (로그 정의 불가).
fn log_returns(closes: &[f64]) -> Option<Vec<f64>> {
    if closes.len() < 2 {
        return None;
    }
    closes
        .windows(2)
        .map(|w| {
            if w[0] > 0.0 && w[1] > 0.0 {
                Some((w[1] / w[0]).ln())
            } else {
                None
            }
        })
        .collect()
}

/// 표본 평균.
fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// 표본 표준편차 (n-1 분모).
fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// 연환산 변동성.
///
/// 일별 로그 수익률의 표본 표준편차 × √252.
pub fn annualized_volatility(closes: &[f64]) -> Option<f64> {
    let returns = log_returns(closes)?;
    let std = sample_std_dev(&returns)?;
    Some(std * TRADING_DAYS_PER_YEAR.sqrt())
}

/// 단순 이동평균 (최근 `period`일).
///
/// 이력이 `period`보다 짧으면 `None`.
pub fn sma(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    Some(mean(window))
}

/// Wilder 평활 RSI.
///
/// 초기 구간은 단순 평균, 이후는 Wilder 평활
/// (`avg = (avg·(n−1) + current) / n`)로 갱신합니다.
/// 하락이 전혀 없으면 100.0.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;

    for w in closes[..period + 1].windows(2) {
        let change = w[1] - w[0];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss += -change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    for w in closes[period..].windows(2) {
        let change = w[1] - w[0];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// 샤프 비율.
///
/// (연환산 평균 로그 수익률 − 무위험 수익률) / 연환산 변동성.
/// 변동성이 0이면 `None`.
pub fn sharpe_ratio(closes: &[f64], risk_free_rate: f64) -> Option<f64> {
    let returns = log_returns(closes)?;
    let std = sample_std_dev(&returns)?;
    if std == 0.0 {
        return None;
    }

    let annual_return = mean(&returns) * TRADING_DAYS_PER_YEAR;
    let annual_vol = std * TRADING_DAYS_PER_YEAR.sqrt();
    Some((annual_return - risk_free_rate) / annual_vol)
}

/// 최대 낙폭.
///
/// 단일 스캔으로 지금까지의 최고점 대비 하락률의 최대값을 추적합니다.
/// 양수 비율로 반환 (0.25 = 25% 하락).
pub fn max_drawdown(closes: &[f64]) -> Option<f64> {
    if closes.len() < 2 {
        return None;
    }

    let mut peak = closes[0];
    let mut worst: f64 = 0.0;

    for &price in &closes[1..] {
        if price > peak {
            peak = price;
        } else if peak > 0.0 {
            worst = worst.max((peak - price) / peak);
        }
    }

    Some(worst)
}

/// 시장 대비 베타.
///
/// 자산/시장 일별 로그 수익률의 공분산 / 시장 수익률 분산.
/// 두 시계열 길이가 다르거나 시장 분산이 0이면 `None`.
pub fn beta(asset_closes: &[f64], market_closes: &[f64]) -> Option<f64> {
    if asset_closes.len() != market_closes.len() {
        return None;
    }
    let asset = log_returns(asset_closes)?;
    let market = log_returns(market_closes)?;
    if asset.len() < 2 {
        return None;
    }

    let asset_mean = mean(&asset);
    let market_mean = mean(&market);

    let n = (asset.len() - 1) as f64;
    let covariance = asset
        .iter()
        .zip(&market)
        .map(|(a, m)| (a - asset_mean) * (m - market_mean))
        .sum::<f64>()
        / n;
    let variance = market
        .iter()
        .map(|m| (m - market_mean).powi(2))
        .sum::<f64>()
        / n;

    if variance == 0.0 {
        return None;
    }
    Some(covariance / variance)
}
