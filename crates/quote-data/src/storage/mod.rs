//! 시세 저장소.
//!
//! 수집 파이프라인은 저장소를 `QuoteStore` 트레잇으로만 다룹니다:
//! - 구간 내 시세 존재 여부 조회
//! - 재개 지점(resume watermark) 조회
//! - 트랜잭션 단위 일괄 저장 (`QuoteTransaction`)

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::models::QuoteRow;

/// 일봉 시세 저장소 인터페이스.
#[async_trait]
pub trait QuoteStore: Send + Sync {
    /// `[start, end]` 구간에 저장된 시세가 하나라도 있는지 확인.
    async fn has_quotes_between(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<bool>;

    /// `[from, until]` 구간에서 아직 저장되지 않은 가장 이른 날짜.
    ///
    /// 구간 안에서 마지막으로 저장된 시세의 다음 날을 반환하며,
    /// 저장된 시세가 없으면 `from`을 그대로 반환합니다.
    /// `until` 이후의 시세는 결과에 영향을 주지 않습니다.
    async fn resume_watermark(
        &self,
        symbol: &str,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<NaiveDate>;

    /// 일괄 저장용 트랜잭션 시작.
    async fn begin_bulk(&self) -> Result<Box<dyn QuoteTransaction>>;
}

/// 일괄 저장 트랜잭션.
///
/// `stage`로 행을 적재한 뒤 `commit`에서 한 번에 반영합니다.
/// `commit`이나 `rollback` 이후에는 더 이상 사용할 수 없습니다.
#[async_trait]
pub trait QuoteTransaction: Send {
    /// 행 하나를 적재. 검증에 실패한 행은 적재되지 않습니다.
    async fn stage(&mut self, row: &QuoteRow) -> Result<()>;

    /// 적재된 행 수.
    fn staged(&self) -> usize;

    /// 적재된 행을 반영하고 커밋. 새로 저장된 행 수를 반환합니다.
    async fn commit(&mut self) -> Result<u64>;

    /// 적재된 행을 버리고 롤백.
    async fn rollback(&mut self) -> Result<()>;
}
