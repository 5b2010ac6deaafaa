//! 시세 프로바이더 HTTP 클라이언트.
//!
//! Rate Limit(429)에 대한 지수 백오프 재시도, 일시적 네트워크 오류에 대한
//! 1회 고정 지연 재시도, 분당 호출 예산(rolling window)을 수행합니다.
//!
//! 응답에서 현재가 필드가 없거나 숫자가 아니면 재시도 없이 즉시 실패합니다 —
//! 잘못된 응답은 재시도로 고쳐지지 않습니다.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use quotes_data::QuoteCache;

use crate::config::{FetchConfig, QuoteProviderConfig};
use crate::metrics;
use crate::stats::FetchStats;

/// 단일 시세 요청 실패 사유.
#[derive(Debug)]
pub enum FetchError {
    /// 429 Too Many Requests
    RateLimited,
    /// 네트워크/전송 오류 (연결 실패, 타임아웃)
    Transport(String),
    /// HTTP 오류 상태 또는 본문 파싱 실패
    BadResponse(String),
    /// 응답에 현재가 필드 없음
    MissingPrice,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate limited (429)"),
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
            Self::BadResponse(msg) => write!(f, "bad response: {}", msg),
            Self::MissingPrice => write!(f, "price field missing in response"),
        }
    }
}

impl std::error::Error for FetchError {}

/// 재시도 정책.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 429 최대 재시도 횟수 (초기 시도 제외).
    pub max_retries: u32,
    /// 백오프 기본 대기 시간.
    pub base_delay: Duration,
    /// 백오프 배수.
    pub backoff_multiplier: f64,
    /// 전송 오류 1회 재시도 전 고정 대기 시간.
    pub transport_retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            transport_retry_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// n번째 재시도 전 대기 시간 (attempt는 0부터).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(self.base_delay.as_secs_f64() * multiplier)
    }
}

/// 분당 호출 예산 (rolling window).
///
/// 최근 `window` 내 호출 시각을 보관하고, 예산이 차면
/// 가장 오래된 호출이 창 밖으로 나갈 때까지 기다려야 할 시간을 계산합니다.
#[derive(Debug)]
pub struct RateWindow {
    max_calls: usize,
    window: Duration,
    calls: VecDeque<Instant>,
}

impl RateWindow {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            calls: VecDeque::new(),
        }
    }

    /// 분당 60회 기본 설정.
    pub fn per_minute(max_calls: usize) -> Self {
        Self::new(max_calls, Duration::from_secs(60))
    }

    /// 호출 가능 시점까지의 대기 시간.
    ///
    /// 만료된 호출 기록을 제거한 뒤, 예산이 차 있으면
    /// `Some(남은 대기 시간)`, 여유가 있으면 `None`.
    pub fn delay_until_slot(&mut self, now: Instant) -> Option<Duration> {
        while let Some(&oldest) = self.calls.front() {
            if now.duration_since(oldest) >= self.window {
                self.calls.pop_front();
            } else {
                break;
            }
        }

        if self.calls.len() < self.max_calls {
            None
        } else {
            let oldest = *self.calls.front()?;
            Some(self.window - now.duration_since(oldest))
        }
    }

    /// 호출 기록.
    pub fn record(&mut self, now: Instant) {
        self.calls.push_back(now);
    }

    /// 예산 슬롯을 확보할 때까지 대기 후 호출을 기록합니다.
    pub async fn throttle(window: &Mutex<Self>) {
        loop {
            let delay = {
                let mut guard = window.lock().await;
                match guard.delay_until_slot(Instant::now()) {
                    None => {
                        guard.record(Instant::now());
                        return;
                    }
                    Some(delay) => delay,
                }
            };
            debug!(delay_ms = delay.as_millis(), "분당 호출 예산 대기");
            tokio::time::sleep(delay).await;
        }
    }
}

/// 사이클당 API 호출 예산.
///
/// 예산이 소진되면 새 요청 발행을 중단합니다. 이미 진행 중인 요청은
/// 취소하지 않습니다. `None`은 무제한.
#[derive(Debug)]
pub struct FetchBudget {
    max_calls: Option<usize>,
    issued: AtomicUsize,
}

impl FetchBudget {
    pub fn new(max_calls: Option<usize>) -> Self {
        Self {
            max_calls,
            issued: AtomicUsize::new(0),
        }
    }

    /// 호출 슬롯 하나를 소비합니다. 예산이 남아 있으면 `true`.
    pub fn try_issue(&self) -> bool {
        match self.max_calls {
            None => true,
            Some(max) => {
                let prev = self.issued.fetch_add(1, Ordering::SeqCst);
                if prev < max {
                    true
                } else {
                    self.issued.fetch_sub(1, Ordering::SeqCst);
                    false
                }
            }
        }
    }
}

/// 시세 프로바이더 클라이언트.
#[derive(Clone)]
pub struct QuoteFetcher {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl QuoteFetcher {
    /// 새 클라이언트 생성.
    pub fn new(provider: &QuoteProviderConfig, retry: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: provider.base_url.trim_end_matches('/').to_string(),
            api_key: provider.api_key.clone(),
            retry,
        }
    }

    /// 단일 HTTP 호출 (재시도 없음).
    async fn fetch_once(&self, symbol: &str) -> Result<Decimal, FetchError> {
        let url = format!("{}/quote", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol), ("token", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if response.status().as_u16() == 429 {
            return Err(FetchError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(FetchError::BadResponse(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FetchError::BadResponse(e.to_string()))?;

        // 현재가 필드 "c" — 없거나 숫자가 아니면 즉시 실패
        let price = body
            .get("c")
            .and_then(|v| v.as_f64())
            .ok_or(FetchError::MissingPrice)?;

        Decimal::from_f64_retain(price)
            .ok_or_else(|| FetchError::BadResponse(format!("가격 변환 실패: {}", price)))
    }

    /// 재시도 정책이 적용된 시세 조회.
    ///
    /// - 429: 지수 백오프로 최대 `max_retries`회 재시도
    /// - 전송 오류: 고정 지연 후 1회만 재시도
    /// - 필드 누락/HTTP 오류: 즉시 실패
    pub async fn fetch_quote(&self, symbol: &str) -> Result<Decimal, FetchError> {
        let mut rate_limit_attempt = 0u32;
        let mut transport_retried = false;

        loop {
            match self.fetch_once(symbol).await {
                Ok(price) => return Ok(price),
                Err(FetchError::RateLimited) => {
                    if rate_limit_attempt >= self.retry.max_retries {
                        warn!(
                            symbol = symbol,
                            attempts = rate_limit_attempt + 1,
                            "Rate Limit 재시도 소진"
                        );
                        return Err(FetchError::RateLimited);
                    }
                    let delay = self.retry.backoff_delay(rate_limit_attempt);
                    warn!(
                        symbol = symbol,
                        attempt = rate_limit_attempt + 1,
                        delay_ms = delay.as_millis(),
                        "429 수신, 백오프 대기"
                    );
                    tokio::time::sleep(delay).await;
                    rate_limit_attempt += 1;
                }
                Err(FetchError::Transport(msg)) => {
                    if transport_retried {
                        return Err(FetchError::Transport(msg));
                    }
                    warn!(symbol = symbol, error = %msg, "전송 오류, 1회 재시도");
                    tokio::time::sleep(self.retry.transport_retry_delay).await;
                    transport_retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

enum TaskOutcome {
    Stored,
    Failed,
    Skipped,
}

/// 배치 수집: 세마포어로 동시성을 제한하고 분당 예산을 공유합니다.
///
/// 심볼별 실패는 흡수되어 통계에만 반영됩니다 — 한 심볼의 실패가
/// 배치의 나머지를 중단시키지 않습니다. `max_calls`가 주어지면 그만큼의
/// 요청만 발행하고 나머지 심볼은 건너뜁니다 (진행 중인 요청은 취소 안 함).
pub async fn fetch_batch(
    fetcher: &QuoteFetcher,
    cache: &QuoteCache,
    symbols: &[String],
    config: &FetchConfig,
    max_calls: Option<usize>,
) -> FetchStats {
    let started = Instant::now();
    let mut stats = FetchStats {
        total: symbols.len(),
        ..Default::default()
    };
    if symbols.is_empty() {
        return stats;
    }

    let semaphore = Arc::new(Semaphore::new(config.concurrent_limit));
    let rate_window = Arc::new(Mutex::new(RateWindow::per_minute(
        config.max_calls_per_minute,
    )));
    let budget = Arc::new(FetchBudget::new(max_calls));

    let mut handles = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let symbol = symbol.clone();
        let fetcher = fetcher.clone();
        let cache = cache.clone();
        let semaphore = semaphore.clone();
        let rate_window = rate_window.clone();
        let budget = budget.clone();

        handles.push(tokio::spawn(async move {
            let _permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(_) => return TaskOutcome::Skipped,
            };
            if !budget.try_issue() {
                debug!(symbol = %symbol, "호출 예산 소진 — 건너뜀");
                return TaskOutcome::Skipped;
            }
            RateWindow::throttle(&rate_window).await;

            match fetcher.fetch_quote(&symbol).await {
                Ok(price) => match cache.set_quote(&symbol, price, None).await {
                    Ok(true) => TaskOutcome::Stored,
                    Ok(false) => TaskOutcome::Failed,
                    Err(e) => {
                        warn!(symbol = %symbol, error = %e, "시세 캐시 저장 실패");
                        TaskOutcome::Failed
                    }
                },
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "시세 조회 실패");
                    TaskOutcome::Failed
                }
            }
        }));
    }

    for handle in handles {
        match handle.await {
            Ok(TaskOutcome::Stored) => stats.success += 1,
            Ok(TaskOutcome::Failed) => stats.failed += 1,
            Ok(TaskOutcome::Skipped) => stats.skipped += 1,
            Err(e) => {
                warn!(error = %e, "수집 태스크 패닉");
                stats.failed += 1;
            }
        }
    }

    metrics::record_fetched(stats.success as u64);
    metrics::record_failed(stats.failed as u64);

    stats.elapsed = started.elapsed();
    stats
}
