//! 시세 API HTTP 수집기.
//!
//! `QuoteFetcher`는 요청 URL 하나를 받아 응답 본문 전체를 돌려줍니다.
//! 기본 구현은 재시도를 하지 않으며, 필요하면 `RetryingFetcher`로 감쌉니다.
//!
//! # 사용 예시
//!
//! ```rust,ignore
//! use quote_data::{HttpQuoteFetcher, RetryingFetcher, QuoteFetcher};
//!
//! let fetcher = RetryingFetcher::new(HttpQuoteFetcher::new(timeout)?, 2, delay);
//! let body = fetcher.fetch(&descriptor).await?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::provider::request::RequestDescriptor;

/// 수집 에러.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP 클라이언트 생성 실패: {0}")]
    ClientError(String),

    #[error("전송 실패: {0}")]
    Transport(String),

    #[error("HTTP 상태 오류 ({status})")]
    Status { status: u16 },

    #[error("응답 본문 읽기 실패: {0}")]
    Body(String),
}

/// 시세 수집기 트레잇.
#[async_trait]
pub trait QuoteFetcher: Send + Sync {
    /// 요청을 보내고 응답 본문 전체를 반환.
    async fn fetch(&self, request: &RequestDescriptor) -> Result<Vec<u8>, FetchError>;
}

/// `reqwest` 기반 수집기.
#[derive(Clone)]
pub struct HttpQuoteFetcher {
    client: reqwest::Client,
}

impl HttpQuoteFetcher {
    /// 요청 타임아웃을 지정하여 수집기 생성.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::ClientError(e.to_string()))?;
        Ok(Self { client })
    }

    /// 이미 만든 클라이언트를 사용.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QuoteFetcher for HttpQuoteFetcher {
    async fn fetch(&self, request: &RequestDescriptor) -> Result<Vec<u8>, FetchError> {
        debug!(url = %request, "시세 API 요청");

        let response = self
            .client
            .get(request.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?;

        Ok(body.to_vec())
    }
}

/// 실패 시 고정 간격으로 재시도하는 래퍼.
///
/// `max_retries`가 0이면 감싼 수집기와 동일하게 동작합니다.
pub struct RetryingFetcher<F> {
    inner: F,
    max_retries: u32,
    delay: Duration,
}

impl<F: QuoteFetcher> RetryingFetcher<F> {
    pub fn new(inner: F, max_retries: u32, delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            delay,
        }
    }
}

#[async_trait]
impl<F: QuoteFetcher> QuoteFetcher for RetryingFetcher<F> {
    async fn fetch(&self, request: &RequestDescriptor) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 0;
        loop {
            match self.inner.fetch(request).await {
                Ok(body) => return Ok(body),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        url = %request,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "수집 실패, 재시도"
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
