//! 응답 파싱 단계.
//!
//! 병합 스트림의 원시 결과를 시세 배치로 바꿉니다. 수집 실패는 그대로
//! 전달하고, 파싱 실패는 구간 단위로 기록한 뒤 다음 결과를 처리합니다.

use quote_data::{decode_batch, FetchWindow, QuoteBatch};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::fetch_pool::RawResult;

/// 실패 단계.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Fetch,
    Parse,
}

/// 파싱 단계 출력.
#[derive(Debug, Clone)]
pub enum ParsedBatch {
    /// 파싱된 배치 (빈 배치 포함)
    Quotes { batch: QuoteBatch, dropped: usize },
    /// 이번 실행에서 저장할 수 없는 구간
    Failed {
        window: FetchWindow,
        stage: FailureStage,
        reason: String,
    },
}

/// 원시 결과 하나를 파싱.
pub fn parse_raw(raw: RawResult) -> ParsedBatch {
    match raw {
        RawResult::Failed { window, error } => ParsedBatch::Failed {
            window,
            stage: FailureStage::Fetch,
            reason: error.to_string(),
        },
        RawResult::Payload { window, body } => match decode_batch(&window, &body) {
            Ok(decoded) => {
                debug!(window = %window, rows = decoded.batch.len(), dropped = decoded.dropped, "응답 파싱 완료");
                ParsedBatch::Quotes {
                    batch: decoded.batch,
                    dropped: decoded.dropped,
                }
            }
            Err(e) => {
                warn!(window = %window, error = %e, "응답 파싱 실패");
                ParsedBatch::Failed {
                    window,
                    stage: FailureStage::Parse,
                    reason: e.to_string(),
                }
            }
        },
    }
}

/// 파싱 태스크 시작.
///
/// 입력이 닫히거나 취소되면 출력 채널을 닫고 종료합니다.
pub fn spawn_parser(
    mut input: mpsc::Receiver<RawResult>,
    channel_capacity: usize,
    token: CancellationToken,
) -> (mpsc::Receiver<ParsedBatch>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(channel_capacity.max(1));

    let handle = tokio::spawn(async move {
        loop {
            let raw = tokio::select! {
                _ = token.cancelled() => break,
                raw = input.recv() => raw,
            };
            let Some(raw) = raw else {
                break;
            };

            let parsed = parse_raw(raw);
            tokio::select! {
                _ = token.cancelled() => break,
                sent = tx.send(parsed) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("파싱 단계 종료");
    });

    (rx, handle)
}
