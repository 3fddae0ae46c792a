//! PostgreSQL 일봉 시세 저장소.
//!
//! # 테이블
//!
//! 스키마 관리는 이 crate 밖에서 합니다. 다음 테이블을 전제로 합니다:
//!
//! ```sql
//! CREATE TABLE daily_quote (
//!     symbol      TEXT NOT NULL,
//!     trade_date  DATE NOT NULL,
//!     open        TEXT NOT NULL,
//!     high        TEXT NOT NULL,
//!     low         TEXT NOT NULL,
//!     close       TEXT NOT NULL,
//!     volume      TEXT NOT NULL,
//!     adj_close   TEXT NOT NULL,
//!     PRIMARY KEY (symbol, trade_date)
//! );
//! ```
//!
//! # 사용 예제
//!
//! ```rust,ignore
//! use quote_data::{PgQuoteStore, QuoteStore};
//!
//! let store = PgQuoteStore::connect(&database_url).await?;
//! let covered = store.has_quotes_between("AAPL", start, end).await?;
//! ```

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgPool, Postgres};
use sqlx::Transaction;
use tracing::{debug, info, instrument};

use crate::error::{DataError, Result};
use crate::models::QuoteRow;
use crate::storage::{QuoteStore, QuoteTransaction};

/// UNNEST 일괄 삽입 한 번에 보내는 최대 행 수.
const INSERT_CHUNK_SIZE: usize = 500;

/// PostgreSQL 기반 `QuoteStore`.
#[derive(Clone)]
pub struct PgQuoteStore {
    pool: PgPool,
}

impl PgQuoteStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 연결 문자열로 풀을 만들어 저장소 생성.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl QuoteStore for PgQuoteStore {
    #[instrument(skip(self))]
    async fn has_quotes_between(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM daily_quote
                WHERE symbol = $1 AND trade_date BETWEEN $2 AND $3
            )
            "#,
        )
        .bind(symbol)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    #[instrument(skip(self))]
    async fn resume_watermark(
        &self,
        symbol: &str,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<NaiveDate> {
        let last: Option<NaiveDate> = sqlx::query_scalar(
            r#"
            SELECT MAX(trade_date) FROM daily_quote
            WHERE symbol = $1 AND trade_date BETWEEN $2 AND $3
            "#,
        )
        .bind(symbol)
        .bind(from)
        .bind(until)
        .fetch_one(&self.pool)
        .await?;

        let watermark = last.and_then(|d| d.succ_opt()).unwrap_or(from);
        debug!(symbol, %from, %until, %watermark, "재개 지점 조회");
        Ok(watermark)
    }

    async fn begin_bulk(&self) -> Result<Box<dyn QuoteTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DataError::TransactionError(e.to_string()))?;

        Ok(Box::new(PgQuoteTransaction {
            tx: Some(tx),
            staged: Vec::new(),
        }))
    }
}

/// PostgreSQL 일괄 저장 트랜잭션.
///
/// 적재된 행은 커밋 시점에 UNNEST 일괄 삽입으로 반영됩니다.
pub struct PgQuoteTransaction {
    tx: Option<Transaction<'static, Postgres>>,
    staged: Vec<QuoteRow>,
}

impl PgQuoteTransaction {
    fn take_tx(&mut self) -> Result<Transaction<'static, Postgres>> {
        self.tx
            .take()
            .ok_or_else(|| DataError::TransactionError("이미 종료된 트랜잭션입니다".to_string()))
    }
}

#[async_trait]
impl QuoteTransaction for PgQuoteTransaction {
    async fn stage(&mut self, row: &QuoteRow) -> Result<()> {
        if self.tx.is_none() {
            return Err(DataError::TransactionError(
                "이미 종료된 트랜잭션입니다".to_string(),
            ));
        }
        row.validate()?;
        self.staged.push(row.clone());
        Ok(())
    }

    fn staged(&self) -> usize {
        self.staged.len()
    }

    async fn commit(&mut self) -> Result<u64> {
        let mut tx = self.take_tx()?;
        let rows = std::mem::take(&mut self.staged);
        let mut inserted = 0;

        // UNNEST 패턴으로 일괄 삽입, 이미 저장된 날짜는 건너뜀
        for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
            let symbols: Vec<&str> = chunk.iter().map(|r| r.symbol.as_str()).collect();
            let dates: Vec<NaiveDate> = chunk.iter().map(|r| r.trade_date).collect();
            let opens: Vec<&str> = chunk.iter().map(|r| r.open.as_str()).collect();
            let highs: Vec<&str> = chunk.iter().map(|r| r.high.as_str()).collect();
            let lows: Vec<&str> = chunk.iter().map(|r| r.low.as_str()).collect();
            let closes: Vec<&str> = chunk.iter().map(|r| r.close.as_str()).collect();
            let volumes: Vec<&str> = chunk.iter().map(|r| r.volume.as_str()).collect();
            let adj_closes: Vec<&str> = chunk.iter().map(|r| r.adj_close.as_str()).collect();

            let result = sqlx::query(
                r#"
                INSERT INTO daily_quote
                    (symbol, trade_date, open, high, low, close, volume, adj_close)
                SELECT * FROM UNNEST(
                    $1::text[], $2::date[],
                    $3::text[], $4::text[], $5::text[], $6::text[], $7::text[], $8::text[]
                )
                ON CONFLICT (symbol, trade_date) DO NOTHING
                "#,
            )
            .bind(&symbols)
            .bind(&dates)
            .bind(&opens)
            .bind(&highs)
            .bind(&lows)
            .bind(&closes)
            .bind(&volumes)
            .bind(&adj_closes)
            .execute(&mut *tx)
            .await
            .map_err(|e| DataError::InsertError(e.to_string()))?;

            inserted += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| DataError::TransactionError(e.to_string()))?;

        info!(staged = rows.len(), inserted, "일봉 시세 커밋");
        Ok(inserted)
    }

    async fn rollback(&mut self) -> Result<()> {
        let tx = self.take_tx()?;
        self.staged.clear();
        tx.rollback()
            .await
            .map_err(|e| DataError::TransactionError(e.to_string()))
    }
}
