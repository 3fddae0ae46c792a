//! 인메모리 시세 저장소.
//!
//! 파이프라인 테스트에서 `PgQuoteStore` 대신 사용합니다.
//! 조회/트랜잭션 실패를 주입할 수 있습니다.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::{DataError, Result};
use crate::models::QuoteRow;
use crate::storage::{QuoteStore, QuoteTransaction};

#[derive(Default)]
struct MemoryState {
    rows: BTreeMap<(String, NaiveDate), QuoteRow>,
    fail_reads: bool,
    failing_begins: usize,
    fail_commit_symbols: HashSet<String>,
    transactions_begun: usize,
    commits: usize,
    rollbacks: usize,
}

/// `BTreeMap` 기반 `QuoteStore`.
#[derive(Clone, Default)]
pub struct MemoryQuoteStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryQuoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // 잠금 중 패닉이 나도 테스트 상태는 계속 읽을 수 있게 함
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 이미 저장된 시세를 직접 넣음.
    pub fn insert_rows(&self, rows: impl IntoIterator<Item = QuoteRow>) {
        let mut state = self.lock();
        for row in rows {
            state
                .rows
                .insert((row.symbol.clone(), row.trade_date), row);
        }
    }

    /// 저장된 전체 행 수.
    pub fn row_count(&self) -> usize {
        self.lock().rows.len()
    }

    /// 심볼별 저장된 행.
    pub fn rows_for(&self, symbol: &str) -> Vec<QuoteRow> {
        self.lock()
            .rows
            .values()
            .filter(|r| r.symbol == symbol)
            .cloned()
            .collect()
    }

    /// 시작된 트랜잭션 수.
    pub fn transactions_begun(&self) -> usize {
        self.lock().transactions_begun
    }

    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.lock().rollbacks
    }

    /// 모든 조회 쿼리를 실패시킴.
    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// 이후 `count`번의 트랜잭션 시작을 실패시킴.
    pub fn fail_next_begins(&self, count: usize) {
        self.lock().failing_begins = count;
    }

    /// 해당 심볼 행이 포함된 트랜잭션의 커밋을 실패시킴.
    pub fn fail_commit_for(&self, symbol: &str) {
        self.lock().fail_commit_symbols.insert(symbol.to_string());
    }
}

#[async_trait]
impl QuoteStore for MemoryQuoteStore {
    async fn has_quotes_between(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<bool> {
        let state = self.lock();
        if state.fail_reads {
            return Err(DataError::ConnectionError("인메모리 조회 실패 주입".to_string()));
        }
        Ok(state
            .rows
            .range((symbol.to_string(), start)..=(symbol.to_string(), end))
            .next()
            .is_some())
    }

    async fn resume_watermark(
        &self,
        symbol: &str,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<NaiveDate> {
        let state = self.lock();
        if state.fail_reads {
            return Err(DataError::ConnectionError("인메모리 조회 실패 주입".to_string()));
        }
        if from > until {
            return Ok(from);
        }
        let last = state
            .rows
            .range((symbol.to_string(), from)..=(symbol.to_string(), until))
            .next_back()
            .map(|((_, date), _)| *date);

        Ok(last.and_then(|d| d.succ_opt()).unwrap_or(from))
    }

    async fn begin_bulk(&self) -> Result<Box<dyn QuoteTransaction>> {
        let mut state = self.lock();
        if state.failing_begins > 0 {
            state.failing_begins -= 1;
            return Err(DataError::TransactionError(
                "트랜잭션 시작 실패 주입".to_string(),
            ));
        }
        state.transactions_begun += 1;
        drop(state);

        Ok(Box::new(MemoryQuoteTransaction {
            store: self.clone(),
            staged: Vec::new(),
            finished: false,
        }))
    }
}

/// 인메모리 일괄 저장 트랜잭션.
pub struct MemoryQuoteTransaction {
    store: MemoryQuoteStore,
    staged: Vec<QuoteRow>,
    finished: bool,
}

impl MemoryQuoteTransaction {
    fn ensure_open(&self) -> Result<()> {
        if self.finished {
            return Err(DataError::TransactionError(
                "이미 종료된 트랜잭션입니다".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl QuoteTransaction for MemoryQuoteTransaction {
    async fn stage(&mut self, row: &QuoteRow) -> Result<()> {
        self.ensure_open()?;
        row.validate()?;
        self.staged.push(row.clone());
        Ok(())
    }

    fn staged(&self) -> usize {
        self.staged.len()
    }

    async fn commit(&mut self) -> Result<u64> {
        self.ensure_open()?;
        self.finished = true;

        let mut state = self.store.lock();
        if self
            .staged
            .iter()
            .any(|r| state.fail_commit_symbols.contains(&r.symbol))
        {
            state.rollbacks += 1;
            return Err(DataError::TransactionError("커밋 실패 주입".to_string()));
        }

        let mut inserted = 0;
        for row in self.staged.drain(..) {
            let key = (row.symbol.clone(), row.trade_date);
            if !state.rows.contains_key(&key) {
                state.rows.insert(key, row);
                inserted += 1;
            }
        }
        state.commits += 1;
        Ok(inserted)
    }

    async fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.finished = true;
        self.staged.clear();
        self.store.lock().rollbacks += 1;
        Ok(())
    }
}
