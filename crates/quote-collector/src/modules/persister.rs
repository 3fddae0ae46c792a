//! 배치 저장 단계.
//!
//! 파싱된 배치마다 트랜잭션 하나를 열어 일괄 저장합니다.
//! 빈 배치는 트랜잭션을 열지 않습니다. 한 배치의 실패는 그 배치에만
//! 영향을 주며, 파이프라인은 다음 배치를 계속 처리합니다.

use std::sync::Arc;

use quote_data::{QuoteBatch, QuoteStore};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::parse_stage::{FailureStage, ParsedBatch};
use crate::stats::CollectionStats;

/// 배치 중간에 행 적재가 실패했을 때의 처리 방식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowFailurePolicy {
    /// 실패한 행부터 나머지는 버리고 앞서 적재된 행은 커밋
    #[default]
    BestEffortCommit,
    /// 배치 전체를 롤백
    FailBatch,
}

/// 배치 하나의 저장 결과.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// 빈 배치 (트랜잭션 없음)
    Empty,
    /// 커밋됨. `rejected`는 적재되지 못한 행 수
    Committed { inserted: u64, staged: usize, rejected: usize },
    /// 저장 실패. `lost`는 저장되지 않은 행 수
    Failed { lost: usize, reason: String },
}

/// 배치 저장기.
pub struct Persister {
    store: Arc<dyn QuoteStore>,
    policy: RowFailurePolicy,
}

impl Persister {
    pub fn new(store: Arc<dyn QuoteStore>, policy: RowFailurePolicy) -> Self {
        Self { store, policy }
    }

    /// 배치 하나를 트랜잭션으로 저장.
    pub async fn persist_batch(&self, batch: &QuoteBatch) -> BatchOutcome {
        if batch.is_empty() {
            debug!(window = %batch.window, "빈 배치, 저장 생략");
            return BatchOutcome::Empty;
        }

        let mut tx = match self.store.begin_bulk().await {
            Ok(tx) => tx,
            Err(e) => {
                error!(window = %batch.window, error = %e, "트랜잭션 시작 실패");
                return BatchOutcome::Failed {
                    lost: batch.len(),
                    reason: e.to_string(),
                };
            }
        };

        let mut row_failure = None;
        for (index, row) in batch.rows.iter().enumerate() {
            if let Err(e) = tx.stage(row).await {
                warn!(
                    window = %batch.window,
                    index,
                    trade_date = %row.trade_date,
                    error = %e,
                    "행 적재 실패, 나머지 행 중단"
                );
                row_failure = Some(e);
                break;
            }
        }

        let staged = tx.staged();
        let rejected = batch.len() - staged;

        if let (Some(e), RowFailurePolicy::FailBatch) = (&row_failure, self.policy) {
            if let Err(rollback_err) = tx.rollback().await {
                error!(window = %batch.window, error = %rollback_err, "롤백 실패");
            }
            return BatchOutcome::Failed {
                lost: batch.len(),
                reason: e.to_string(),
            };
        }

        match tx.commit().await {
            Ok(inserted) => BatchOutcome::Committed {
                inserted,
                staged,
                rejected,
            },
            Err(e) => {
                error!(window = %batch.window, error = %e, "커밋 실패");
                BatchOutcome::Failed {
                    lost: batch.len(),
                    reason: e.to_string(),
                }
            }
        }
    }

    /// 입력이 닫힐 때까지 배치를 저장하며 통계를 누적.
    ///
    /// 취소되면 진행 중인 배치까지만 처리하고 종료합니다.
    pub async fn run(
        &self,
        mut input: mpsc::Receiver<ParsedBatch>,
        token: &CancellationToken,
        stats: &mut CollectionStats,
    ) {
        loop {
            let parsed = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!("종료 신호 수신, 저장 단계 중단");
                    break;
                }
                parsed = input.recv() => parsed,
            };
            let Some(parsed) = parsed else {
                break;
            };

            match parsed {
                ParsedBatch::Failed {
                    stage: FailureStage::Fetch,
                    ..
                } => stats.fetch_failures += 1,
                ParsedBatch::Failed {
                    stage: FailureStage::Parse,
                    ..
                } => {
                    stats.fetched += 1;
                    stats.parse_failures += 1;
                }
                ParsedBatch::Quotes { batch, dropped } => {
                    stats.fetched += 1;
                    stats.rows_dropped += dropped;
                    self.record(&batch, self.persist_batch(&batch).await, stats);
                }
            }
        }
    }

    fn record(&self, batch: &QuoteBatch, outcome: BatchOutcome, stats: &mut CollectionStats) {
        match outcome {
            BatchOutcome::Empty => stats.empty_batches += 1,
            BatchOutcome::Committed {
                inserted,
                staged,
                rejected,
            } => {
                info!(
                    window = %batch.window,
                    staged,
                    inserted,
                    rejected,
                    "배치 저장 완료"
                );
                stats.batches_committed += 1;
                stats.rows_committed += inserted;
                stats.rows_rejected += rejected;
            }
            BatchOutcome::Failed { lost, reason } => {
                warn!(window = %batch.window, lost, reason = %reason, "배치 저장 실패");
                stats.batches_failed += 1;
                stats.rows_rejected += lost;
            }
        }
    }
}
