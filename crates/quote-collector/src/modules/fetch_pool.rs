//! 동시 수집 워커 풀.
//!
//! 워커 N개가 하나의 요청 시퀀스를 나눠 꺼내 처리하고, 각자 자기 출력
//! 채널로 결과를 보냅니다. 한 요청은 정확히 한 워커만 처리합니다.
//!
//! 수집 실패는 로그를 남기고 `RawResult::Failed`로 흘려보내며 다른
//! 워커에는 영향을 주지 않습니다.

use std::sync::{Arc, Mutex};

use quote_data::{FetchError, FetchWindow, QuoteFetcher};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::request_gen::{FetchJob, RequestSequence};

/// 워커 하나의 수집 결과.
#[derive(Debug)]
pub enum RawResult {
    /// 응답 본문
    Payload { window: FetchWindow, body: Vec<u8> },
    /// 수집 실패 (해당 구간은 이번 실행에서 누락)
    Failed { window: FetchWindow, error: FetchError },
}

impl RawResult {
    pub fn window(&self) -> &FetchWindow {
        match self {
            Self::Payload { window, .. } | Self::Failed { window, .. } => window,
        }
    }
}

/// 실행 중인 워커 풀.
pub struct RunningPool {
    /// 워커별 출력 채널 (워커 순서)
    pub outputs: Vec<mpsc::Receiver<RawResult>>,
    /// 워커 태스크 (각 워커가 처리한 요청 수 반환)
    pub workers: JoinSet<usize>,
}

/// 워커 풀 설정.
#[derive(Debug, Clone, Copy)]
pub struct FetchPool {
    workers: usize,
    channel_capacity: usize,
}

impl FetchPool {
    pub fn new(workers: usize, channel_capacity: usize) -> Self {
        Self {
            workers: workers.max(1),
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// 워커를 띄우고 출력 채널을 반환.
    ///
    /// 요청 수보다 워커를 많이 띄우지 않습니다.
    pub fn spawn(
        &self,
        requests: RequestSequence,
        fetcher: Arc<dyn QuoteFetcher>,
        token: CancellationToken,
    ) -> RunningPool {
        let worker_count = self.workers.min(requests.len()).max(1);
        let queue = Arc::new(Mutex::new(requests));

        let mut outputs = Vec::with_capacity(worker_count);
        let mut workers = JoinSet::new();

        for worker_id in 0..worker_count {
            let (tx, rx) = mpsc::channel(self.channel_capacity);
            outputs.push(rx);
            workers.spawn(run_worker(
                worker_id,
                Arc::clone(&queue),
                Arc::clone(&fetcher),
                tx,
                token.clone(),
            ));
        }

        debug!(workers = worker_count, "수집 워커 시작");
        RunningPool { outputs, workers }
    }
}

/// 공유 시퀀스에서 다음 요청 꺼내기.
fn next_job(queue: &Mutex<RequestSequence>) -> Option<FetchJob> {
    // 다른 워커가 패닉으로 잠금을 오염시켜도 시퀀스 자체는 유효함
    let mut sequence = queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    sequence.next()
}

async fn run_worker(
    worker_id: usize,
    queue: Arc<Mutex<RequestSequence>>,
    fetcher: Arc<dyn QuoteFetcher>,
    output: mpsc::Sender<RawResult>,
    token: CancellationToken,
) -> usize {
    let mut processed = 0;

    loop {
        if token.is_cancelled() {
            debug!(worker_id, "종료 신호 수신");
            break;
        }
        let Some(job) = next_job(&queue) else {
            break;
        };

        let fetched = tokio::select! {
            _ = token.cancelled() => {
                debug!(worker_id, window = %job.window, "종료 신호 수신, 요청 중단");
                break;
            }
            fetched = fetcher.fetch(&job.request) => fetched,
        };
        processed += 1;

        let result = match fetched {
            Ok(body) => RawResult::Payload {
                window: job.window,
                body,
            },
            Err(error) => {
                warn!(worker_id, window = %job.window, error = %error, "시세 수집 실패");
                RawResult::Failed {
                    window: job.window,
                    error,
                }
            }
        };

        tokio::select! {
            _ = token.cancelled() => break,
            sent = output.send(result) => {
                if sent.is_err() {
                    // 하류 단계가 먼저 종료됨
                    break;
                }
            }
        }
    }

    debug!(worker_id, processed, "수집 워커 종료");
    processed
}
