//! 수집 구간 → 요청 변환.
//!
//! 구간 목록을 받아 요청을 하나씩 만들어 내는 단일 패스 시퀀스입니다.
//! 요청은 워커가 꺼낼 때 생성됩니다.

use std::vec;

use quote_data::{FetchWindow, RequestBuilder, RequestDescriptor};

/// 워커가 처리할 작업 단위.
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub window: FetchWindow,
    pub request: RequestDescriptor,
}

/// 지연 생성 요청 시퀀스.
pub struct RequestSequence {
    builder: RequestBuilder,
    windows: vec::IntoIter<FetchWindow>,
}

impl RequestSequence {
    pub fn new(builder: RequestBuilder, windows: Vec<FetchWindow>) -> Self {
        Self {
            builder,
            windows: windows.into_iter(),
        }
    }
}

impl Iterator for RequestSequence {
    type Item = FetchJob;

    fn next(&mut self) -> Option<FetchJob> {
        let window = self.windows.next()?;
        let request = self.builder.build(&window);
        Some(FetchJob { window, request })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.windows.size_hint()
    }
}

impl ExactSizeIterator for RequestSequence {}
