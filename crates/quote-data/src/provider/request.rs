//! 시세 API 요청 생성.
//!
//! 설정된 쿼리 템플릿에 심볼과 구간 날짜를 순서대로 채운 뒤,
//! JSON 응답 형식과 공개 데이터 테이블 환경 파라미터를 붙여 URL을 만듭니다.
//!
//! # 템플릿
//!
//! `{}` 자리표시자 세 개를 심볼, 시작일, 종료일 순서로 채웁니다.
//! 날짜는 `YYYY-MM-DD` 형식입니다.
//!
//! ```text
//! select * from yahoo.finance.historicaldata where symbol = "{}" and startDate = "{}" and endDate = "{}"
//! ```
//!
//! # 인코딩
//!
//! 모든 파라미터 값은 퍼센트 인코딩하며 공백은 `%20`이 됩니다.
//! API는 폼 인코딩 방식의 `+` 공백을 거부합니다.

use std::fmt;

use crate::error::{DataError, Result};
use crate::models::FetchWindow;

/// 공개 데이터 테이블 실행 환경.
pub const OPEN_DATA_ENV: &str = "store://datatables.org/alltableswithkeys";

/// 템플릿 자리표시자.
const PLACEHOLDER: &str = "{}";

/// 템플릿에 필요한 자리표시자 수 (심볼, 시작일, 종료일).
const PLACEHOLDER_COUNT: usize = 3;

/// 완성된 요청 URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestDescriptor {
    url: String,
}

impl RequestDescriptor {
    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn into_string(self) -> String {
        self.url
    }
}

impl fmt::Display for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// 수집 구간을 요청 URL로 바꾸는 변환기.
///
/// 상태가 없으며 같은 구간에 대해 항상 같은 URL을 만듭니다.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    api_url: String,
    query_template: String,
}

impl RequestBuilder {
    /// 새 요청 생성기.
    ///
    /// 템플릿의 `{}` 자리표시자가 정확히 세 개가 아니면 오류를 반환합니다.
    pub fn new(api_url: impl Into<String>, query_template: impl Into<String>) -> Result<Self> {
        let api_url = api_url.into();
        let query_template = query_template.into();

        if api_url.trim().is_empty() {
            return Err(DataError::ConfigError("API URL이 비어 있습니다".to_string()));
        }

        let placeholders = query_template.matches(PLACEHOLDER).count();
        if placeholders != PLACEHOLDER_COUNT {
            return Err(DataError::ConfigError(format!(
                "쿼리 템플릿에는 자리표시자 {{}}가 {}개 필요합니다 (현재 {}개)",
                PLACEHOLDER_COUNT, placeholders
            )));
        }

        Ok(Self {
            api_url,
            query_template,
        })
    }

    /// 템플릿에 구간 값을 채운 쿼리 문자열.
    pub fn render_query(&self, window: &FetchWindow) -> String {
        let start = window.start().format("%Y-%m-%d").to_string();
        let end = window.end().format("%Y-%m-%d").to_string();
        let values = [window.symbol(), start.as_str(), end.as_str()];

        let mut query = String::with_capacity(self.query_template.len() + 32);
        let mut parts = self.query_template.split(PLACEHOLDER);
        if let Some(head) = parts.next() {
            query.push_str(head);
        }
        for (value, part) in values.iter().zip(parts) {
            query.push_str(value);
            query.push_str(part);
        }
        query
    }

    /// 구간에 대한 요청 URL 생성.
    pub fn build(&self, window: &FetchWindow) -> RequestDescriptor {
        let params = encode_query_params(&self.render_query(window));
        RequestDescriptor {
            url: format!("{}{}{}", self.api_url, query_separator(&self.api_url), params),
        }
    }
}

/// 쿼리 파라미터 인코딩 (공백은 `%20`).
pub fn encode_query_params(query: &str) -> String {
    [
        ("q", query),
        ("format", "json"),
        ("env", OPEN_DATA_ENV),
        ("callback", ""),
    ]
    .iter()
    .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
    .collect::<Vec<_>>()
    .join("&")
}

/// 기본 URL 뒤에 붙일 구분자.
fn query_separator(api_url: &str) -> &'static str {
    if api_url.ends_with('?') || api_url.ends_with('&') {
        ""
    } else if api_url.contains('?') {
        "&"
    } else {
        "?"
    }
}
