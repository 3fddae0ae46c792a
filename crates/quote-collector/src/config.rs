//! 설정 파일 및 환경변수 기반 설정 모듈.
//!
//! JSON 설정 파일을 읽은 뒤 `.env`/환경변수로 일부 값을 덮어씁니다.
//!
//! ```json
//! {
//!   "api_url": "https://query.yahooapis.com/v1/public/yql",
//!   "yql": "select * from yahoo.finance.historicaldata where symbol = \"{}\" and startDate = \"{}\" and endDate = \"{}\"",
//!   "year_beginning": 2013,
//!   "year_ending": 2014,
//!   "symbols": [{ "symbol": "AAPL" }, { "symbol": "MSFT" }],
//!   "database": { "driver": "postgres", "url": "postgres://localhost/quotes" },
//!   "pipeline": { "fetch_workers": 28 }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use quote_data::RequestBuilder;
use serde::Deserialize;

use crate::error::CollectorError;
use crate::modules::persister::RowFailurePolicy;
use crate::modules::range_resolver::FreshnessCheck;
use crate::Result;

/// 지원하는 저장소 드라이버
const SUPPORTED_DRIVERS: [&str; 2] = ["postgres", "postgresql"];

/// Collector 전체 설정
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// 시세 API 기본 URL
    pub api_url: String,
    /// 쿼리 템플릿 (심볼, 시작일, 종료일 순서의 `{}` 자리표시자)
    #[serde(rename = "yql")]
    pub query_template: String,
    /// 수집 시작 연도
    pub year_beginning: i32,
    /// 수집 종료 연도 (포함)
    pub year_ending: i32,
    /// 수집 대상 심볼
    pub symbols: Vec<SymbolEntry>,
    /// 저장소 설정
    #[serde(default)]
    pub database: DatabaseConfig,
    /// 파이프라인 설정
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// 데몬 모드 설정
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// 심볼 항목
#[derive(Debug, Clone, Deserialize)]
pub struct SymbolEntry {
    pub symbol: String,
}

/// 저장소 설정
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// 드라이버 이름 (postgres)
    #[serde(default = "default_driver")]
    pub driver: String,
    /// 연결 문자열 (`DATABASE_URL` 환경변수가 우선)
    #[serde(default)]
    pub url: String,
}

/// 파이프라인 설정
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 동시 수집 워커 수
    pub fetch_workers: usize,
    /// 단계 간 채널 버퍼 크기
    pub channel_capacity: usize,
    /// 요청 타임아웃 (초)
    pub request_timeout_secs: u64,
    /// 수집 실패 시 재시도 횟수 (0이면 재시도 없음)
    pub max_retries: u32,
    /// 재시도 간 딜레이 (밀리초)
    pub retry_delay_ms: u64,
    /// 행 적재 실패 시 배치 처리 정책
    pub row_failure_policy: RowFailurePolicy,
    /// 올해 데이터 최신 여부 판단 방식
    pub freshness_check: FreshnessCheck,
    /// 일부만 저장된 과거 연도를 재개 지점부터 다시 수집
    pub repair_partial_years: bool,
}

/// 데몬 모드 설정
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// 실행 주기 (분 단위)
    pub interval_minutes: u64,
}

fn default_driver() -> String {
    "postgres".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            url: String::new(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_workers: 28,
            channel_capacity: 64,
            request_timeout_secs: 30,
            max_retries: 0,
            retry_delay_ms: 500,
            row_failure_policy: RowFailurePolicy::default(),
            freshness_check: FreshnessCheck::default(),
            repair_partial_years: false,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 24 * 60,
        }
    }
}

impl CollectorConfig {
    /// 설정 파일을 읽고 환경변수를 반영한 뒤 검증
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CollectorError::Config(format!("설정 파일을 읽을 수 없습니다 ({}): {}", path.display(), e))
        })?;

        let mut config: Self = serde_json::from_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// JSON 문자열에서 설정 생성 (환경변수 미반영)
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
        self.pipeline.fetch_workers =
            env_var_parse("QUOTE_FETCH_WORKERS", self.pipeline.fetch_workers);
    }

    /// 설정값 검증
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            return Err(CollectorError::Config("수집할 심볼이 없습니다".to_string()));
        }
        if let Some(blank) = self.symbols.iter().position(|s| s.symbol.trim().is_empty()) {
            return Err(CollectorError::Config(format!(
                "{}번째 심볼이 비어 있습니다",
                blank + 1
            )));
        }
        if self.year_beginning > self.year_ending {
            return Err(CollectorError::Config(format!(
                "year_beginning({})이 year_ending({})보다 큽니다",
                self.year_beginning, self.year_ending
            )));
        }
        if self.pipeline.fetch_workers == 0 {
            return Err(CollectorError::Config(
                "fetch_workers는 1 이상이어야 합니다".to_string(),
            ));
        }
        if self.pipeline.channel_capacity == 0 {
            return Err(CollectorError::Config(
                "channel_capacity는 1 이상이어야 합니다".to_string(),
            ));
        }
        if !SUPPORTED_DRIVERS.contains(&self.database.driver.to_ascii_lowercase().as_str()) {
            return Err(CollectorError::Config(format!(
                "지원하지 않는 저장소 드라이버: {}",
                self.database.driver
            )));
        }

        self.request_builder()?;
        Ok(())
    }

    /// 설정 순서 그대로의 심볼 목록
    pub fn symbols(&self) -> Vec<String> {
        self.symbols.iter().map(|s| s.symbol.trim().to_string()).collect()
    }

    /// 요청 생성기
    pub fn request_builder(&self) -> Result<RequestBuilder> {
        Ok(RequestBuilder::new(&self.api_url, &self.query_template)?)
    }

    /// DB 연결 문자열 (비어 있으면 설정 에러)
    pub fn database_url(&self) -> Result<&str> {
        if self.database.url.trim().is_empty() {
            return Err(CollectorError::Config(
                "DATABASE_URL 환경변수 또는 database.url이 설정되지 않았습니다".to_string(),
            ));
        }
        Ok(&self.database.url)
    }
}

impl PipelineConfig {
    /// 요청 타임아웃을 Duration으로 반환
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// 재시도 간 딜레이를 Duration으로 반환
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl DaemonConfig {
    /// 실행 주기를 Duration으로 반환
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

/// 환경변수에서 값을 파싱 (실패 시 기본값 사용)
fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
