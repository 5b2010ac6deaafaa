//! 수집/동기화 통계 구조체.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 시세 수집 사이클 통계
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchStats {
    /// 배치 심볼 수
    pub total: usize,
    /// 성공 횟수
    pub success: usize,
    /// 실패 횟수 (재시도 소진, 필드 누락 등)
    pub failed: usize,
    /// 호출 예산 소진으로 건너뛴 수
    pub skipped: usize,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl FetchStats {
    /// 새 통계 객체 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 성공률 계산 (%). 건너뛴 심볼은 모수에서 제외합니다.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.total.saturating_sub(self.skipped);
        if attempted == 0 {
            0.0
        } else {
            (self.success as f64 / attempted as f64) * 100.0
        }
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            total = self.total,
            success = self.success,
            failed = self.failed,
            skipped = self.skipped,
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "수집 완료"
        );
    }
}

/// 일일 동기화 통계
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStats {
    /// 캐시 심볼 수
    pub total: usize,
    /// 영속 티어로 전송된 수
    pub synced: usize,
    /// 오래된 시세로 제외된 수 (오늘 날짜 아님)
    pub stale_skipped: usize,
    /// 실패 횟수
    pub failed: usize,
    /// 백필 후에도 남은 누락 날짜 수
    pub unfilled: usize,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl SyncStats {
    /// 새 통계 객체 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            total = self.total,
            synced = self.synced,
            stale_skipped = self.stale_skipped,
            failed = self.failed,
            unfilled = self.unfilled,
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "동기화 완료"
        );
    }
}

/// 지표 갱신 통계
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsStats {
    /// 대상 심볼 수
    pub total: usize,
    /// 갱신 성공 수
    pub updated: usize,
    /// 이력 부족으로 건너뛴 수
    pub skipped: usize,
    /// 실패 횟수
    pub failed: usize,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl MetricsStats {
    /// 새 통계 객체 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            total = self.total,
            updated = self.updated,
            skipped = self.skipped,
            failed = self.failed,
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "지표 갱신 완료"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate() {
        let stats = FetchStats {
            total: 50,
            success: 45,
            failed: 5,
            ..Default::default()
        };
        assert!((stats.success_rate() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_success_rate_empty_batch() {
        assert_eq!(FetchStats::new().success_rate(), 0.0);
    }

    #[test]
    fn test_success_rate_ignores_skipped() {
        // 예산으로 20개를 건너뛰었으면 시도한 30개만 모수
        let stats = FetchStats {
            total: 50,
            success: 27,
            failed: 3,
            skipped: 20,
            ..Default::default()
        };
        assert!((stats.success_rate() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_success_rate_all_skipped() {
        let stats = FetchStats {
            total: 10,
            skipped: 10,
            ..Default::default()
        };
        assert_eq!(stats.success_rate(), 0.0);
    }
}
