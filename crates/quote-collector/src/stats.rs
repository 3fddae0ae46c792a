//! 수집 통계 구조체.

use serde::Serialize;
use std::time::Duration;

/// 백필 실행 통계
///
/// 누락 구간이 어디서 생겼는지 추적할 수 있도록 단계별 실패를 따로 셉니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    /// 검사한 (심볼, 연도) 수
    pub years_checked: usize,
    /// 수집 구간으로 결정된 수
    pub windows_resolved: usize,
    /// 이미 저장되어 건너뛴 (심볼, 연도) 수
    pub windows_skipped: usize,
    /// 저장소 조회 실패 (재수집으로 처리)
    pub resolution_errors: usize,
    /// 응답을 받은 요청 수
    pub fetched: usize,
    /// 수집 실패 (전송/상태 오류)
    pub fetch_failures: usize,
    /// 파싱 실패 (응답 형식 오류)
    pub parse_failures: usize,
    /// 시세가 없는 응답
    pub empty_batches: usize,
    /// 커밋된 배치 수
    pub batches_committed: usize,
    /// 저장에 실패한 배치 수
    pub batches_failed: usize,
    /// 새로 저장된 행 수
    pub rows_committed: u64,
    /// 적재를 거부당했거나 롤백으로 버려진 행 수
    pub rows_rejected: usize,
    /// 파서가 버린 행 수 (구간 밖/날짜 오류)
    pub rows_dropped: usize,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl CollectionStats {
    /// 새 통계 객체 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 데이터 누락이 생긴 구간 수 (수집/파싱/저장 실패)
    pub fn gap_count(&self) -> usize {
        self.fetch_failures + self.parse_failures + self.batches_failed
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            years_checked = self.years_checked,
            windows = self.windows_resolved,
            skipped = self.windows_skipped,
            resolution_errors = self.resolution_errors,
            fetched = self.fetched,
            fetch_failures = self.fetch_failures,
            parse_failures = self.parse_failures,
            empty = self.empty_batches,
            committed = self.batches_committed,
            failed = self.batches_failed,
            rows = self.rows_committed,
            rows_rejected = self.rows_rejected,
            rows_dropped = self.rows_dropped,
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "수집 완료"
        );

        if self.gap_count() > 0 {
            tracing::warn!(
                operation = operation,
                gaps = self.gap_count(),
                "저장되지 않은 구간이 있습니다"
            );
        }
    }
}
