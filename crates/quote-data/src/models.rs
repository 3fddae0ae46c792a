//! 시세 도메인 모델.
//!
//! 수집 구간(`FetchWindow`), 일봉 시세 행(`QuoteRow`), 한 번의 응답에서
//! 나온 시세 묶음(`QuoteBatch`)을 정의합니다.

use std::fmt;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DataError, Result};

/// 저장소에 없거나 없다고 추정되는 심볼별 연속 날짜 구간.
///
/// `start <= end`가 항상 성립합니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchWindow {
    symbol: String,
    start: NaiveDate,
    end: NaiveDate,
}

impl FetchWindow {
    /// 새 수집 구간 생성.
    pub fn new(symbol: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Result<Self> {
        let symbol = symbol.into();
        if start > end {
            return Err(DataError::InvalidData(format!(
                "{}: 시작일({})이 종료일({})보다 늦습니다",
                symbol, start, end
            )));
        }
        Ok(Self { symbol, start, end })
    }

    /// 1월 1일부터 12월 31일까지의 연간 구간.
    pub fn full_year(symbol: impl Into<String>, year: i32) -> Result<Self> {
        Self::new(symbol, year_start(year)?, year_end(year)?)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// 구간 시작일의 연도.
    pub fn year(&self) -> i32 {
        self.start.year()
    }

    /// 날짜가 구간 안에 있는지 확인 (양 끝 포함).
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} ~ {}]", self.symbol, self.start, self.end)
    }
}

/// 해당 연도의 1월 1일.
pub fn year_start(year: i32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .ok_or_else(|| DataError::InvalidData(format!("지원하지 않는 연도: {}", year)))
}

/// 해당 연도의 12월 31일.
pub fn year_end(year: i32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 12, 31)
        .ok_or_else(|| DataError::InvalidData(format!("지원하지 않는 연도: {}", year)))
}

/// 일봉 시세 한 행.
///
/// 가격/거래량 필드는 API가 보낸 10진수 문자열 그대로 보관합니다.
/// 통화나 정밀도 변환은 하지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRow {
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
    pub adj_close: String,
}

impl QuoteRow {
    /// 저장 전 행 검증.
    ///
    /// 심볼이 비어 있거나 숫자 필드가 10진수로 해석되지 않으면 거부합니다.
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(DataError::InvalidData(format!(
                "{}: 심볼이 비어 있습니다",
                self.trade_date
            )));
        }

        let fields = [
            ("open", &self.open),
            ("high", &self.high),
            ("low", &self.low),
            ("close", &self.close),
            ("volume", &self.volume),
            ("adj_close", &self.adj_close),
        ];
        for (name, value) in fields {
            if value.trim().parse::<Decimal>().is_err() {
                return Err(DataError::InvalidData(format!(
                    "{} {}: {} 값이 10진수가 아닙니다 ({:?})",
                    self.symbol, self.trade_date, name, value
                )));
            }
        }

        Ok(())
    }
}

/// 하나의 응답에서 나온, 같은 심볼의 시세 행 묶음.
///
/// 빈 배치도 유효하며 저장 단계에서 건너뜁니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteBatch {
    pub window: FetchWindow,
    pub rows: Vec<QuoteRow>,
}

impl QuoteBatch {
    pub fn new(window: FetchWindow, rows: Vec<QuoteRow>) -> Self {
        Self { window, rows }
    }

    pub fn empty(window: FetchWindow) -> Self {
        Self::new(window, Vec::new())
    }

    pub fn symbol(&self) -> &str {
        self.window.symbol()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
