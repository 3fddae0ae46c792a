//! 누락 구간 계산 모듈.
//!
//! 심볼/연도마다 저장소를 조회해 수집이 필요한 구간을 결정합니다.
//!
//! # 규칙
//!
//! - **올해**: 1월 1일 이후 재개 지점을 조회해 오늘까지 수집
//!   (최신 여부 판단은 [`FreshnessCheck`] 참고)
//! - **과거 연도**: 한 건이라도 저장되어 있으면 수집 완료로 간주,
//!   없으면 1월 1일 ~ 12월 31일 전체 수집
//! - **미래 연도**: 건너뜀
//!
//! 저장소 조회가 실패하면 데이터가 없는 것으로 보고 다시 수집합니다.

use chrono::{Datelike, NaiveDate};
use quote_data::models::{year_end, year_start};
use quote_data::{FetchWindow, QuoteStore};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;

/// 올해 데이터의 최신 여부 판단 방식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessCheck {
    /// 재개 지점과 오늘의 "일(day)"만 비교.
    ///
    /// 월이 바뀌는 시점에 수집을 건너뛰거나 불필요하게 다시 받을 수 있습니다.
    #[default]
    DayOfMonth,
    /// 날짜 전체 비교 (재개 지점이 오늘 이전이면 수집).
    FullDate,
}

impl FreshnessCheck {
    /// 재개 지점부터 오늘까지 수집이 필요한지 판단.
    pub fn needs_fetch(self, watermark: NaiveDate, today: NaiveDate) -> bool {
        if watermark > today {
            return false;
        }
        match self {
            Self::DayOfMonth => watermark.day() < today.day(),
            Self::FullDate => true,
        }
    }
}

/// (심볼, 연도) 하나에 대한 결정.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearDecision {
    pub window: Option<FetchWindow>,
    pub read_errors: usize,
}

impl YearDecision {
    fn fetch(window: FetchWindow) -> Self {
        Self {
            window: Some(window),
            read_errors: 0,
        }
    }

    fn covered() -> Self {
        Self {
            window: None,
            read_errors: 0,
        }
    }

    fn with_read_error(mut self) -> Self {
        self.read_errors += 1;
        self
    }
}

/// 전체 계산 결과.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// 수집할 구간 (설정의 심볼 순서, 연도 오름차순)
    pub windows: Vec<FetchWindow>,
    pub years_checked: usize,
    pub skipped: usize,
    pub read_errors: usize,
}

/// 누락 구간 계산기.
pub struct RangeResolver<'a> {
    store: &'a dyn QuoteStore,
    freshness: FreshnessCheck,
    repair_partial_years: bool,
}

impl<'a> RangeResolver<'a> {
    pub fn new(store: &'a dyn QuoteStore) -> Self {
        Self {
            store,
            freshness: FreshnessCheck::default(),
            repair_partial_years: false,
        }
    }

    pub fn with_freshness(mut self, freshness: FreshnessCheck) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn with_partial_year_repair(mut self, enabled: bool) -> Self {
        self.repair_partial_years = enabled;
        self
    }

    /// 모든 (심볼, 연도)에 대해 수집 구간 계산.
    ///
    /// 취소되면 그때까지 계산한 결과만 반환합니다.
    pub async fn resolve_all(
        &self,
        symbols: &[String],
        year_beginning: i32,
        year_ending: i32,
        today: NaiveDate,
        token: &CancellationToken,
    ) -> Result<Resolution> {
        let mut resolution = Resolution::default();

        for symbol in symbols {
            if token.is_cancelled() {
                warn!("종료 신호 수신, 구간 계산 중단");
                break;
            }

            let before = resolution.windows.len();
            for year in year_beginning..=year_ending {
                let decision = self.resolve_year(symbol, year, today).await?;
                resolution.years_checked += 1;
                resolution.read_errors += decision.read_errors;
                match decision.window {
                    Some(window) => resolution.windows.push(window),
                    None => resolution.skipped += 1,
                }
            }

            info!(
                symbol = symbol.as_str(),
                windows = resolution.windows.len() - before,
                "수집 구간 계산 완료"
            );
        }

        Ok(resolution)
    }

    /// (심볼, 연도) 하나에 대한 수집 구간 결정.
    pub async fn resolve_year(
        &self,
        symbol: &str,
        year: i32,
        today: NaiveDate,
    ) -> Result<YearDecision> {
        let current_year = today.year();

        let decision = if year > current_year {
            debug!(symbol, year, "미래 연도, 건너뜀");
            YearDecision::covered()
        } else if year == current_year {
            self.resolve_current_year(symbol, year, today).await?
        } else {
            self.resolve_past_year(symbol, year).await?
        };

        match &decision.window {
            Some(window) => info!(
                symbol,
                year,
                start = %window.start(),
                end = %window.end(),
                "수집 구간 결정"
            ),
            None => debug!(symbol, year, "이미 저장됨, 건너뜀"),
        }

        Ok(decision)
    }

    async fn resolve_current_year(
        &self,
        symbol: &str,
        year: i32,
        today: NaiveDate,
    ) -> Result<YearDecision> {
        let jan1 = year_start(year)?;
        let end = today.min(year_end(year)?);

        let watermark = match self.store.resume_watermark(symbol, jan1, end).await {
            Ok(watermark) => watermark,
            Err(e) => {
                warn!(symbol, year, error = %e, "재개 지점 조회 실패, 올해 전체 재수집");
                return Ok(YearDecision::fetch(FetchWindow::new(symbol, jan1, end)?).with_read_error());
            }
        };

        if self.freshness.needs_fetch(watermark, today) {
            Ok(YearDecision::fetch(FetchWindow::new(symbol, watermark, end)?))
        } else {
            Ok(YearDecision::covered())
        }
    }

    async fn resolve_past_year(&self, symbol: &str, year: i32) -> Result<YearDecision> {
        let full_year = FetchWindow::full_year(symbol, year)?;

        let exists = match self
            .store
            .has_quotes_between(symbol, full_year.start(), full_year.end())
            .await
        {
            Ok(exists) => exists,
            Err(e) => {
                warn!(symbol, year, error = %e, "저장 여부 조회 실패, 전체 연도 재수집");
                return Ok(YearDecision::fetch(full_year).with_read_error());
            }
        };

        if !exists {
            return Ok(YearDecision::fetch(full_year));
        }
        if !self.repair_partial_years {
            return Ok(YearDecision::covered());
        }

        // 이전 실행이 연도 중간에서 멈춘 경우 재개 지점부터 연말까지.
        // 이후 연도의 시세가 재개 지점을 밀어내지 않도록 연말까지만 조회
        match self
            .store
            .resume_watermark(symbol, full_year.start(), full_year.end())
            .await
        {
            Ok(watermark) if watermark < full_year.end() => Ok(YearDecision::fetch(
                FetchWindow::new(symbol, watermark, full_year.end())?,
            )),
            Ok(_) => Ok(YearDecision::covered()),
            Err(e) => {
                warn!(symbol, year, error = %e, "재개 지점 조회 실패, 전체 연도 재수집");
                Ok(YearDecision::fetch(full_year).with_read_error())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quote_data::{MemoryQuoteStore, QuoteRow};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(symbol: &str, trade_date: NaiveDate) -> QuoteRow {
        QuoteRow {
            symbol: symbol.to_string(),
            trade_date,
            open: "1".to_string(),
            high: "1".to_string(),
            low: "1".to_string(),
            close: "1".to_string(),
            volume: "1".to_string(),
            adj_close: "1".to_string(),
        }
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_past_year_with_any_row_is_covered() {
        let store = MemoryQuoteStore::new();
        store.insert_rows([row("AAPL", date(2013, 7, 1))]);
        let resolver = RangeResolver::new(&store);

        let decision = resolver.resolve_year("AAPL", 2013, date(2014, 6, 15)).await.unwrap();
        assert_eq!(decision, YearDecision::covered());
    }

    #[tokio::test]
    async fn test_empty_past_year_is_full_window() {
        let store = MemoryQuoteStore::new();
        let resolver = RangeResolver::new(&store);

        let decision = resolver.resolve_year("AAPL", 2012, date(2014, 6, 15)).await.unwrap();
        assert_eq!(
            decision.window,
            Some(FetchWindow::full_year("AAPL", 2012).unwrap())
        );
    }

    #[tokio::test]
    async fn test_partial_year_repair() {
        let store = MemoryQuoteStore::new();
        store.insert_rows([row("AAPL", date(2013, 1, 2)), row("AAPL", date(2013, 3, 28))]);

        let resolver = RangeResolver::new(&store).with_partial_year_repair(true);
        let decision = resolver.resolve_year("AAPL", 2013, date(2014, 6, 15)).await.unwrap();
        assert_eq!(
            decision.window,
            Some(FetchWindow::new("AAPL", date(2013, 3, 29), date(2013, 12, 31)).unwrap())
        );

        // 다음 해 시세가 있어도 재개 지점은 그 해 안에서 계산
        store.insert_rows([row("AAPL", date(2014, 5, 1))]);
        let decision = resolver.resolve_year("AAPL", 2013, date(2015, 6, 15)).await.unwrap();
        assert_eq!(
            decision.window,
            Some(FetchWindow::new("AAPL", date(2013, 3, 29), date(2013, 12, 31)).unwrap())
        );

        // 마지막 거래일이 12월 30일이면 더 받을 것이 없음
        store.insert_rows([row("AAPL", date(2013, 12, 30))]);
        let decision = resolver.resolve_year("AAPL", 2013, date(2014, 6, 15)).await.unwrap();
        assert!(decision.window.is_none());
    }

    #[tokio::test]
    async fn test_current_year_day_of_month_check() {
        let store = MemoryQuoteStore::new();
        let resolver = RangeResolver::new(&store);
        let today = date(2014, 6, 15);

        // 6월 13일까지 저장 → 재개 지점 14일 < 15일 → 수집
        store.insert_rows([row("AAPL", date(2014, 6, 13))]);
        let decision = resolver.resolve_year("AAPL", 2014, today).await.unwrap();
        assert_eq!(
            decision.window,
            Some(FetchWindow::new("AAPL", date(2014, 6, 14), today).unwrap())
        );

        // 6월 14일까지 저장 → 재개 지점 15일, 15 < 15 아님 → 건너뜀
        store.insert_rows([row("AAPL", date(2014, 6, 14))]);
        let decision = resolver.resolve_year("AAPL", 2014, today).await.unwrap();
        assert!(decision.window.is_none());
    }

    #[tokio::test]
    async fn test_current_year_empty_store() {
        let store = MemoryQuoteStore::new();
        let resolver = RangeResolver::new(&store);
        let today = date(2014, 6, 15);

        let decision = resolver.resolve_year("AAPL", 2014, today).await.unwrap();
        assert_eq!(
            decision.window,
            Some(FetchWindow::new("AAPL", date(2014, 1, 1), today).unwrap())
        );
    }

    #[tokio::test]
    async fn test_month_boundary_day_of_month_vs_full_date() {
        let store = MemoryQuoteStore::new();
        // 1월 27일까지 저장, 오늘은 2월 3일 → 재개 지점 1월 28일
        store.insert_rows([row("AAPL", date(2014, 1, 27))]);
        let today = date(2014, 2, 3);

        // 일(day)만 비교하면 28 < 3이 아니므로 잘못 건너뜀
        let coarse = RangeResolver::new(&store);
        assert!(coarse
            .resolve_year("AAPL", 2014, today)
            .await
            .unwrap()
            .window
            .is_none());

        // 날짜 전체 비교는 1월 28일 ~ 2월 3일을 수집
        let full = RangeResolver::new(&store).with_freshness(FreshnessCheck::FullDate);
        assert_eq!(
            full.resolve_year("AAPL", 2014, today).await.unwrap().window,
            Some(FetchWindow::new("AAPL", date(2014, 1, 28), today).unwrap())
        );
    }

    #[tokio::test]
    async fn test_watermark_after_today_never_inverts_window() {
        let store = MemoryQuoteStore::new();
        // 1월 31일까지 저장, 오늘도 1월 31일 → 재개 지점 2월 1일
        store.insert_rows([row("AAPL", date(2014, 1, 31))]);
        let today = date(2014, 1, 31);

        for freshness in [FreshnessCheck::DayOfMonth, FreshnessCheck::FullDate] {
            let resolver = RangeResolver::new(&store).with_freshness(freshness);
            let decision = resolver.resolve_year("AAPL", 2014, today).await.unwrap();
            assert!(decision.window.is_none());
        }
    }

    #[tokio::test]
    async fn test_future_year_skipped() {
        let store = MemoryQuoteStore::new();
        let resolver = RangeResolver::new(&store);
        let decision = resolver.resolve_year("AAPL", 2015, date(2014, 6, 15)).await.unwrap();
        assert!(decision.window.is_none());
    }

    #[tokio::test]
    async fn test_read_errors_fail_open() {
        let store = MemoryQuoteStore::new();
        store.fail_reads(true);
        let resolver = RangeResolver::new(&store);
        let today = date(2014, 6, 1);

        let past = resolver.resolve_year("AAPL", 2013, today).await.unwrap();
        assert_eq!(past.window, Some(FetchWindow::full_year("AAPL", 2013).unwrap()));
        assert_eq!(past.read_errors, 1);

        // 1일이라도 조회 실패 시에는 수집
        let current = resolver.resolve_year("AAPL", 2014, today).await.unwrap();
        assert_eq!(
            current.window,
            Some(FetchWindow::new("AAPL", date(2014, 1, 1), today).unwrap())
        );
        assert_eq!(current.read_errors, 1);
    }

    #[tokio::test]
    async fn test_resolve_all_orders_by_symbol_then_year() {
        let store = MemoryQuoteStore::new();
        store.insert_rows([row("MSFT", date(2012, 5, 1))]);
        let resolver = RangeResolver::new(&store);
        let token = CancellationToken::new();

        let resolution = resolver
            .resolve_all(&symbols(&["MSFT", "AAPL"]), 2012, 2013, date(2014, 6, 15), &token)
            .await
            .unwrap();

        let order: Vec<(String, i32)> = resolution
            .windows
            .iter()
            .map(|w| (w.symbol().to_string(), w.year()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("MSFT".to_string(), 2013),
                ("AAPL".to_string(), 2012),
                ("AAPL".to_string(), 2013),
            ]
        );
        assert_eq!(resolution.years_checked, 4);
        assert_eq!(resolution.skipped, 1);
        assert_eq!(resolution.read_errors, 0);
    }

    #[tokio::test]
    async fn test_resolve_all_stops_when_cancelled() {
        let store = MemoryQuoteStore::new();
        let resolver = RangeResolver::new(&store);
        let token = CancellationToken::new();
        token.cancel();

        let resolution = resolver
            .resolve_all(&symbols(&["AAPL"]), 2012, 2013, date(2014, 6, 15), &token)
            .await
            .unwrap();
        assert!(resolution.windows.is_empty());
        assert_eq!(resolution.years_checked, 0);
    }
}
