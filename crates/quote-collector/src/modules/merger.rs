//! 워커 출력 병합.
//!
//! 워커별 채널을 하나의 스트림으로 합칩니다. 입력마다 전달 태스크를 하나씩
//! 둡니다. 결과 순서는 보장하지 않습니다.
//!
//! 병합 스트림의 유일한 송신자는 공유 슬롯에 있고, 전달 태스크는 약한
//! 참조(`WeakSender`)로만 보냅니다. 공유 완료 카운터를 0으로 만든 마지막
//! 전달 태스크가 슬롯의 송신자를 해제하며, 그때 병합 스트림이 닫힙니다.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 여러 입력 채널을 하나로 병합.
///
/// 입력이 없으면 즉시 닫힌 수신자를 반환합니다.
pub fn merge<T: Send + 'static>(
    inputs: Vec<mpsc::Receiver<T>>,
    channel_capacity: usize,
    token: CancellationToken,
) -> mpsc::Receiver<T> {
    let (tx, rx) = mpsc::channel(channel_capacity.max(1));
    if inputs.is_empty() {
        return rx;
    }

    let output = tx.downgrade();
    let completion = Arc::new(Completion {
        remaining: AtomicUsize::new(inputs.len()),
        sender: Mutex::new(Some(tx)),
    });

    for (index, input) in inputs.into_iter().enumerate() {
        tokio::spawn(forward(
            index,
            input,
            output.clone(),
            Arc::clone(&completion),
            token.clone(),
        ));
    }

    rx
}

/// 전달 태스크 간 공유 완료 상태.
struct Completion<T> {
    remaining: AtomicUsize,
    /// 병합 스트림의 유일한 송신자
    sender: Mutex<Option<mpsc::Sender<T>>>,
}

impl<T> Completion<T> {
    /// 입력 하나의 종료를 기록. 마지막 입력이면 송신자를 해제.
    fn finish(&self, index: usize, forwarded: usize) {
        let left = self.remaining.fetch_sub(1, Ordering::AcqRel) - 1;
        debug!(input = index, forwarded, remaining = left, "병합 입력 종료");
        if left == 0 {
            let sender = self
                .sender
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
            drop(sender);
            debug!("모든 입력 종료, 병합 스트림 닫힘");
        }
    }
}

async fn forward<T>(
    index: usize,
    mut input: mpsc::Receiver<T>,
    output: mpsc::WeakSender<T>,
    completion: Arc<Completion<T>>,
    token: CancellationToken,
) {
    let mut forwarded = 0usize;

    loop {
        let item = tokio::select! {
            _ = token.cancelled() => break,
            item = input.recv() => item,
        };
        let Some(item) = item else {
            break;
        };
        // 수신자가 먼저 해제되면 업그레이드 실패
        let Some(sender) = output.upgrade() else {
            break;
        };

        tokio::select! {
            _ = token.cancelled() => break,
            sent = sender.send(item) => {
                if sent.is_err() {
                    break;
                }
                forwarded += 1;
            }
        }
    }

    completion.finish(index, forwarded);
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect<T>(mut rx: mpsc::Receiver<T>) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn test_merged_count_equals_sum_of_inputs() {
        for workers in 1..=6usize {
            let mut inputs = Vec::new();
            let mut expected = 0;

            for worker in 0..workers {
                let (tx, rx) = mpsc::channel(2);
                inputs.push(rx);
                let count = worker * 3 + 1;
                expected += count;
                tokio::spawn(async move {
                    for i in 0..count {
                        tx.send((worker, i)).await.unwrap();
                    }
                });
            }

            let merged = collect(merge(inputs, 1, CancellationToken::new())).await;
            assert_eq!(merged.len(), expected, "workers = {}", workers);

            // 같은 입력 안에서는 순서 유지
            for worker in 0..workers {
                let from_worker: Vec<usize> = merged
                    .iter()
                    .filter(|(w, _)| *w == worker)
                    .map(|(_, i)| *i)
                    .collect();
                assert_eq!(from_worker, (0..worker * 3 + 1).collect::<Vec<_>>());
            }
        }
    }

    #[tokio::test]
    async fn test_stream_stays_open_until_last_input_finishes() {
        let (first_tx, first_rx) = mpsc::channel::<u32>(1);
        let (second_tx, second_rx) = mpsc::channel::<u32>(1);
        let mut merged = merge(vec![first_rx, second_rx], 4, CancellationToken::new());

        first_tx.send(1).await.unwrap();
        drop(first_tx);
        assert_eq!(merged.recv().await, Some(1));

        // 첫 입력의 전달 태스크가 끝날 시간을 줌
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(matches!(
            merged.try_recv(),
            Err(mpsc::error::TryRecvError::Empty)
        ));

        second_tx.send(2).await.unwrap();
        drop(second_tx);
        assert_eq!(merged.recv().await, Some(2));
        assert!(merged.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_no_inputs_closes_immediately() {
        let merged: Vec<u32> = collect(merge(Vec::new(), 4, CancellationToken::new())).await;
        assert!(merged.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_closes_merged_stream() {
        let token = CancellationToken::new();
        // 송신자를 살려 두어 입력이 스스로 닫히지 않도록 함
        let (_tx, rx) = mpsc::channel::<u32>(1);
        let mut merged = merge(vec![rx], 1, token.clone());

        token.cancel();
        assert!(merged.recv().await.is_none());
    }
}
