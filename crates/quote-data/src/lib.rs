//! 일봉 시세 저장소 및 원격 시세 제공자.
//!
//! 이 crate는 다음을 제공합니다:
//! - 시세 도메인 모델 (수집 구간, 시세 행, 배치)
//! - `QuoteStore` 저장소 인터페이스 (PostgreSQL, 인메모리 구현)
//! - 원격 시세 API 요청 생성, HTTP 수집, 응답 디코딩

pub mod error;
pub mod models;
pub mod provider;
pub mod storage;

pub use error::{DataError, Result};
pub use models::{FetchWindow, QuoteBatch, QuoteRow};

// 저장소 타입 재내보내기
pub use storage::memory::MemoryQuoteStore;
pub use storage::postgres::PgQuoteStore;
pub use storage::{QuoteStore, QuoteTransaction};

// 시세 Provider 재내보내기
pub use provider::fetcher::{FetchError, HttpQuoteFetcher, QuoteFetcher, RetryingFetcher};
pub use provider::request::{RequestBuilder, RequestDescriptor};
pub use provider::response::{decode_batch, DecodedBatch};
