//! 에러 타입 정의.

use std::fmt;

use quote_data::{DataError, FetchError};

/// Collector 에러 타입
#[derive(Debug)]
pub enum CollectorError {
    /// 저장소 에러
    Database(DataError),
    /// 설정 에러
    Config(String),
    /// 데이터 소스 에러 (시세 API)
    DataSource(String),
    /// 파일 입출력 에러
    Io(std::io::Error),
    /// 일반 에러
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for CollectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database(e) => write!(f, "Database error: {}", e),
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::DataSource(msg) => write!(f, "Data source error: {}", msg),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for CollectorError {}

impl From<DataError> for CollectorError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::ConfigError(msg) => Self::Config(msg),
            other => Self::Database(other),
        }
    }
}

impl From<FetchError> for CollectorError {
    fn from(err: FetchError) -> Self {
        Self::DataSource(err.to_string())
    }
}

impl From<std::io::Error> for CollectorError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for CollectorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for CollectorError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Other(err)
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, CollectorError>;
