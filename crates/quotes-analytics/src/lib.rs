//! 파생 지표 계산.
//!
//! 일별 종가 시계열에서 CAGR, 변동성, 이동평균, RSI, 베타,
//! 샤프 비율, 최대 낙폭을 계산하는 순수 함수 모음입니다.
//! 데이터 접근이나 I/O는 포함하지 않습니다.

pub mod indicators;

pub use indicators::{
    annualized_volatility, beta, cagr, max_drawdown, rsi, sharpe_ratio, sma, trailing,
    TRADING_DAYS_PER_YEAR,
};
