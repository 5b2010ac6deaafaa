//! 환경변수 기반 설정 모듈.

use crate::Result;
use std::time::Duration;

/// Collector 전체 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// 데이터베이스 URL
    pub database_url: String,
    /// Redis URL
    pub redis_url: String,
    /// 시세 프로바이더 설정
    pub provider: QuoteProviderConfig,
    /// 시세 수집 설정
    pub fetch: FetchConfig,
    /// 일일 동기화 설정
    pub sync: SyncConfig,
    /// 지표 계산 설정
    pub metrics: MetricsConfig,
}

/// 시세 프로바이더 설정
#[derive(Debug, Clone)]
pub struct QuoteProviderConfig {
    /// API 키
    pub api_key: String,
    /// API 기본 URL
    pub base_url: String,
}

/// 시세 수집 설정
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// 수집 주기 (분)
    pub interval_minutes: u64,
    /// 동시 요청 수 제한
    pub concurrent_limit: usize,
    /// Rate Limit(429) 최대 재시도 횟수
    pub max_retries: u32,
    /// 전체 유니버스 수집 여부 (false면 배치 커서 사용)
    pub all_stocks: bool,
    /// 배치당 심볼 수 (all_stocks=false일 때)
    pub batch_size: usize,
    /// 분당 최대 API 호출 수
    pub max_calls_per_minute: usize,
}

/// 일일 동기화 설정
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 전송 배치당 심볼 수
    pub batch_size: usize,
    /// 동기화 주기 (분)
    pub interval_minutes: u64,
    /// 가격 이력 보존 기간 (일)
    pub retention_days: i64,
}

/// 지표 계산 설정
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// 샤프 비율 무위험 수익률
    pub risk_free_rate: f64,
    /// Prometheus 익스포터 포트
    pub prometheus_port: u16,
}

impl CollectorConfig {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL").map_err(|_| {
            crate::error::CollectorError::Config(
                "DATABASE_URL 환경변수가 설정되지 않았습니다".to_string(),
            )
        })?;

        let redis_url = std::env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://localhost:6379/0".to_string());

        let api_key = std::env::var("QUOTE_API_KEY").map_err(|_| {
            crate::error::CollectorError::Config(
                "QUOTE_API_KEY 환경변수가 설정되지 않았습니다".to_string(),
            )
        })?;

        Ok(Self {
            database_url,
            redis_url,
            provider: QuoteProviderConfig {
                api_key,
                base_url: std::env::var("QUOTE_API_BASE_URL")
                    .unwrap_or_else(|_| "https://finnhub.io/api/v1".to_string()),
            },
            fetch: FetchConfig {
                interval_minutes: env_var_parse("FETCH_INTERVAL_MINUTES", 240),
                concurrent_limit: env_var_parse("FETCH_CONCURRENT_LIMIT", 30),
                max_retries: env_var_parse("FETCH_MAX_RETRIES", 5),
                all_stocks: env_var_bool("FETCH_ALL_STOCKS", false),
                batch_size: env_var_parse("FETCH_BATCH_SIZE", 50),
                max_calls_per_minute: env_var_parse("MAX_CALLS_PER_MINUTE", 60),
            },
            sync: SyncConfig {
                batch_size: env_var_parse("SYNC_BATCH_SIZE", 30),
                interval_minutes: env_var_parse("SYNC_INTERVAL_MINUTES", 1440),
                retention_days: env_var_parse("RETENTION_DAYS", 5 * 365),
            },
            metrics: MetricsConfig {
                risk_free_rate: env_var_parse("RISK_FREE_RATE", 0.02),
                prometheus_port: env_var_parse("METRICS_PORT", 8000),
            },
        })
    }
}

impl FetchConfig {
    /// 수집 주기를 Duration으로 반환
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    /// 수집 잠금 TTL: 주기 + 5분 여유.
    ///
    /// 정상 사이클이 주기를 약간 넘겨도 잠금이 먼저 풀리지 않도록 합니다.
    pub fn lock_ttl_secs(&self) -> u64 {
        self.interval_minutes * 60 + 300
    }
}

impl SyncConfig {
    /// 동기화 주기를 Duration으로 반환
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    /// 동기화 잠금 TTL: 주기 + 5분 여유.
    pub fn lock_ttl_secs(&self) -> u64 {
        self.interval_minutes * 60 + 300
    }
}

/// 환경변수에서 값을 파싱 (실패 시 기본값 사용)
fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// 환경변수에서 bool 값 파싱
fn env_var_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}
