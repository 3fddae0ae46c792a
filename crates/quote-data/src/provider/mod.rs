//! 원격 시세 API 제공자.
//!
//! - [`request`]: 수집 구간 → 요청 URL
//! - [`fetcher`]: HTTP 수집 및 재시도 래퍼
//! - [`response`]: JSON 응답 → 시세 배치

pub mod fetcher;
pub mod request;
pub mod response;
