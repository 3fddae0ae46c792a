//! Incremental daily quote backfill collector.
//!
//! 설정된 심볼의 일봉 시세를 원격 시세 API에서 받아 저장소에 채웁니다.
//! 이미 저장된 구간은 다시 받지 않습니다:
//! - 심볼/연도별 누락 구간 계산
//! - 고정 크기 워커 풀로 동시 수집
//! - 워커별 결과 스트림 병합, 파싱, 트랜잭션 단위 저장

pub mod config;
pub mod error;
pub mod modules;
pub mod stats;

pub use config::CollectorConfig;
pub use error::{CollectorError, Result};
pub use stats::CollectionStats;
