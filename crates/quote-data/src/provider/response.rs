//! 시세 API 응답 디코딩.
//!
//! 응답 형식:
//!
//! ```json
//! { "query": { "results": { "quote": [
//!     { "Symbol": "AAPL", "Date": "2014-01-02", "Open": "555.68", "High": "557.03",
//!       "Low": "552.02", "Close": "553.13", "Volume": "58671200", "Adj_Close": "76.21" }
//! ] } } }
//! ```
//!
//! 결과가 한 건이면 `quote`가 배열이 아닌 객체로 오고, 결과가 없으면
//! `quote` 또는 `results`가 `null`입니다. 모두 정상 응답으로 처리합니다.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

use crate::error::{DataError, Result};
use crate::models::{FetchWindow, QuoteBatch, QuoteRow};

#[derive(Debug, Deserialize)]
struct Envelope {
    query: QueryBody,
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    #[serde(default)]
    results: Option<Results>,
}

#[derive(Debug, Deserialize)]
struct Results {
    #[serde(default)]
    quote: Option<OneOrMany<RawQuote>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Many(items) => items,
            Self::One(item) => vec![item],
        }
    }
}

/// 응답의 일봉 시세 항목.
#[derive(Debug, Deserialize)]
struct RawQuote {
    #[serde(rename = "Symbol", default)]
    symbol: Option<String>,
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Open", deserialize_with = "text_field")]
    open: String,
    #[serde(rename = "High", deserialize_with = "text_field")]
    high: String,
    #[serde(rename = "Low", deserialize_with = "text_field")]
    low: String,
    #[serde(rename = "Close", deserialize_with = "text_field")]
    close: String,
    #[serde(rename = "Volume", deserialize_with = "text_field")]
    volume: String,
    #[serde(rename = "Adj_Close", deserialize_with = "text_field")]
    adj_close: String,
}

/// 문자열 또는 숫자로 온 값을 텍스트 그대로 보관.
fn text_field<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "숫자 필드 형식 오류: {}",
            other
        ))),
    }
}

/// 디코딩 결과.
#[derive(Debug, Clone)]
pub struct DecodedBatch {
    pub batch: QuoteBatch,
    /// 날짜를 해석할 수 없거나 구간 밖이라 버린 항목 수
    pub dropped: usize,
}

/// 응답 본문을 수집 구간의 시세 배치로 디코딩.
///
/// 구조가 맞지 않으면 `DataError::ParseError`를 반환합니다.
/// 날짜가 구간 밖이거나 해석할 수 없는 항목은 버리고 `dropped`에 셉니다.
/// 행의 심볼은 응답 값이 아니라 수집 구간의 심볼을 사용합니다.
pub fn decode_batch(window: &FetchWindow, payload: &[u8]) -> Result<DecodedBatch> {
    let envelope: Envelope = serde_json::from_slice(payload)
        .map_err(|e| DataError::ParseError(format!("{}: {}", window, e)))?;

    let quotes = envelope
        .query
        .results
        .and_then(|r| r.quote)
        .map(OneOrMany::into_vec)
        .unwrap_or_default();

    let mut rows = Vec::with_capacity(quotes.len());
    let mut dropped = 0;

    for quote in quotes {
        let trade_date = match NaiveDate::parse_from_str(quote.date.trim(), "%Y-%m-%d") {
            Ok(date) if window.contains(date) => date,
            Ok(date) => {
                warn!(window = %window, %date, "구간 밖 시세 제외");
                dropped += 1;
                continue;
            }
            Err(e) => {
                warn!(window = %window, date = %quote.date, error = %e, "날짜 파싱 실패");
                dropped += 1;
                continue;
            }
        };

        if let Some(symbol) = quote.symbol.as_deref() {
            if !symbol.eq_ignore_ascii_case(window.symbol()) {
                warn!(window = %window, symbol, "응답 심볼이 요청과 다름");
            }
        }

        rows.push(QuoteRow {
            symbol: window.symbol().to_string(),
            trade_date,
            open: quote.open,
            high: quote.high,
            low: quote.low,
            close: quote.close,
            volume: quote.volume,
            adj_close: quote.adj_close,
        });
    }

    // 응답은 최신순으로 오므로 날짜 오름차순으로 정렬
    rows.sort_by_key(|r| r.trade_date);

    Ok(DecodedBatch {
        batch: QuoteBatch::new(window.clone(), rows),
        dropped,
    })
}
