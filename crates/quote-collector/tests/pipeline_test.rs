//! 백필 파이프라인 통합 테스트.
//!
//! 인메모리 저장소와 스크립트 수집기로 전체 파이프라인을 실행합니다.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use quote_collector::modules::{plan_backfill, run_backfill, RowFailurePolicy};
use quote_collector::CollectorConfig;
use quote_data::{FetchError, MemoryQuoteStore, QuoteFetcher, QuoteRow, QuoteStore, RequestDescriptor};
use tokio_util::sync::CancellationToken;

const CONFIG: &str = r#"{
    "api_url": "https://query.yahooapis.com/v1/public/yql",
    "yql": "select * from yahoo.finance.historicaldata where symbol = \"{}\" and startDate = \"{}\" and endDate = \"{}\"",
    "year_beginning": 2013,
    "year_ending": 2014,
    "symbols": [__SYMBOLS__],
    "pipeline": { "fetch_workers": 3, "channel_capacity": 2 }
}"#;

fn config(symbols: &[&str]) -> CollectorConfig {
    let list: Vec<String> = symbols
        .iter()
        .map(|s| format!(r#"{{ "symbol": "{}" }}"#, s))
        .collect();
    CollectorConfig::from_json_str(&CONFIG.replace("__SYMBOLS__", &list.join(", "))).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// 요청에서 꺼낸 (심볼, 시작일, 종료일).
fn decode_request(request: &RequestDescriptor) -> (String, NaiveDate, NaiveDate) {
    let (_, query) = request.as_str().split_once('?').unwrap();
    let encoded = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("q="))
        .unwrap();
    let q = urlencoding::decode(encoded).unwrap().into_owned();

    let quoted: Vec<&str> = q.split('"').skip(1).step_by(2).collect();
    let parse = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
    (quoted[0].to_string(), parse(quoted[1]), parse(quoted[2]))
}

enum Scripted {
    Fail,
    Body(String),
}

/// 심볼별 거래일 목록으로 응답을 만들어 주는 수집기.
#[derive(Default)]
struct ScriptedFetcher {
    market: BTreeMap<String, Vec<NaiveDate>>,
    overrides: Mutex<HashMap<(String, i32), Scripted>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    fn with_market(symbols: &[&str], days: &[NaiveDate]) -> Self {
        Self {
            market: symbols
                .iter()
                .map(|s| (s.to_string(), days.to_vec()))
                .collect(),
            ..Self::default()
        }
    }

    fn script(&self, symbol: &str, year: i32, response: Scripted) {
        self.overrides
            .lock()
            .unwrap()
            .insert((symbol.to_string(), year), response);
    }

    fn clear_scripts(&self) {
        self.overrides.lock().unwrap().clear();
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn render(symbol: &str, days: &[NaiveDate]) -> String {
        // 최신순으로 응답
        let quotes: Vec<String> = days
            .iter()
            .rev()
            .map(|d| {
                format!(
                    r#"{{"Symbol":"{}","Date":"{}","Open":"10.0","High":"11.0","Low":"9.5","Close":"10.5","Volume":"1000","Adj_Close":"10.4"}}"#,
                    symbol, d
                )
            })
            .collect();
        format!(
            r#"{{"query":{{"count":{},"results":{{"quote":[{}]}}}}}}"#,
            quotes.len(),
            quotes.join(",")
        )
    }
}

#[async_trait]
impl QuoteFetcher for ScriptedFetcher {
    async fn fetch(&self, request: &RequestDescriptor) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (symbol, start, end) = decode_request(request);

        if let Some(scripted) = self.overrides.lock().unwrap().get(&(symbol.clone(), start.year())) {
            return match scripted {
                Scripted::Fail => Err(FetchError::Transport("connection reset".into())),
                Scripted::Body(body) => Ok(body.clone().into_bytes()),
            };
        }

        let days: Vec<NaiveDate> = self
            .market
            .get(&symbol)
            .map(|days| {
                days.iter()
                    .copied()
                    .filter(|d| *d >= start && *d <= end)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self::render(&symbol, &days).into_bytes())
    }
}

fn three_days_per_year() -> Vec<NaiveDate> {
    vec![
        date(2013, 1, 2),
        date(2013, 6, 3),
        date(2013, 12, 30),
        date(2014, 1, 2),
        date(2014, 6, 2),
        date(2014, 12, 31),
    ]
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

#[tokio::test]
async fn test_empty_store_backfills_full_years() {
    let store = Arc::new(MemoryQuoteStore::new());
    let fetcher = Arc::new(ScriptedFetcher::with_market(&["X"], &three_days_per_year()));

    let stats = run_backfill(
        store.clone(),
        fetcher.clone(),
        &config(&["X"]),
        date(2015, 3, 1),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(stats.windows_resolved, 2);
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(stats.batches_committed, 2);
    assert_eq!(stats.rows_committed, 6);
    assert_eq!(stats.gap_count(), 0);
    assert_eq!(store.rows_for("X").len(), 6);
    assert_eq!(store.transactions_begun(), 2);
}

#[tokio::test]
async fn test_stored_past_year_is_not_refetched() {
    let store = Arc::new(MemoryQuoteStore::new());
    store.insert_rows(three_days_per_year().into_iter().filter(|d| d.year() == 2013).map(|d| row("X", d)));
    let fetcher = Arc::new(ScriptedFetcher::with_market(&["X"], &three_days_per_year()));

    let plan = plan_backfill(
        store.as_ref(),
        &config(&["X"]),
        date(2015, 3, 1),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(plan.jobs.len(), 1);
    assert_eq!(plan.jobs[0].window.year(), 2014);
    assert_eq!(plan.stats.windows_skipped, 1);

    let stats = run_backfill(
        store.clone(),
        fetcher.clone(),
        &config(&["X"]),
        date(2015, 3, 1),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(stats.windows_resolved, 1);
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(stats.rows_committed, 3);
    assert_eq!(store.rows_for("X").len(), 6);
}

#[tokio::test]
async fn test_fetch_failure_leaves_other_windows_intact() {
    let store = Arc::new(MemoryQuoteStore::new());
    let fetcher = Arc::new(ScriptedFetcher::with_market(&["A", "B", "C"], &three_days_per_year()));
    fetcher.script("B", 2013, Scripted::Fail);

    let mut cfg = config(&["A", "B", "C"]);
    cfg.year_ending = 2013;

    let stats = run_backfill(store.clone(), fetcher.clone(), &cfg, date(2015, 3, 1), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.windows_resolved, 3);
    assert_eq!(stats.fetch_failures, 1);
    assert_eq!(stats.batches_committed, 2);
    assert_eq!(store.rows_for("A").len(), 3);
    assert_eq!(store.rows_for("B").len(), 0);
    assert_eq!(store.rows_for("C").len(), 3);

    // 다음 실행에서 누락 구간만 다시 수집
    fetcher.clear_scripts();
    let stats = run_backfill(store.clone(), fetcher.clone(), &cfg, date(2015, 3, 1), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.windows_resolved, 1);
    assert_eq!(stats.rows_committed, 3);
    assert_eq!(store.rows_for("B").len(), 3);
}

#[tokio::test]
async fn test_empty_and_malformed_responses() {
    let store = Arc::new(MemoryQuoteStore::new());
    let fetcher = Arc::new(ScriptedFetcher::with_market(&["X"], &three_days_per_year()));
    fetcher.script("X", 2013, Scripted::Body(r#"{"query":{"count":0,"results":null}}"#.into()));
    fetcher.script("X", 2014, Scripted::Body("<html>503</html>".into()));

    let stats = run_backfill(
        store.clone(),
        fetcher,
        &config(&["X"]),
        date(2015, 3, 1),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(stats.fetched, 2);
    assert_eq!(stats.empty_batches, 1);
    assert_eq!(stats.parse_failures, 1);
    assert_eq!(stats.batches_committed, 0);
    assert_eq!(store.transactions_begun(), 0);
    assert_eq!(store.row_count(), 0);
}

fn body_with_bad_third_row() -> String {
    let mut body = ScriptedFetcher::render("X", &[date(2013, 1, 2), date(2013, 1, 3), date(2013, 1, 4), date(2013, 1, 7)]);
    // 최신순 응답이므로 오름차순 정렬 후 세 번째 행은 1월 4일
    body = body.replacen(
        r#""Date":"2013-01-04","Open":"10.0""#,
        r#""Date":"2013-01-04","Open":"N/A""#,
        1,
    );
    body
}

#[tokio::test]
async fn test_row_failure_best_effort_commit() {
    let store = Arc::new(MemoryQuoteStore::new());
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.script("X", 2013, Scripted::Body(body_with_bad_third_row()));

    let mut cfg = config(&["X"]);
    cfg.year_ending = 2013;

    let stats = run_backfill(store.clone(), fetcher, &cfg, date(2015, 3, 1), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.batches_committed, 1);
    assert_eq!(stats.rows_committed, 2);
    assert_eq!(stats.rows_rejected, 2);
    let days: Vec<u32> = store.rows_for("X").iter().map(|r| r.trade_date.day()).collect();
    assert_eq!(days, vec![2, 3]);
}

#[tokio::test]
async fn test_row_failure_fail_batch() {
    let store = Arc::new(MemoryQuoteStore::new());
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.script("X", 2013, Scripted::Body(body_with_bad_third_row()));

    let mut cfg = config(&["X"]);
    cfg.year_ending = 2013;
    cfg.pipeline.row_failure_policy = RowFailurePolicy::FailBatch;

    let stats = run_backfill(store.clone(), fetcher, &cfg, date(2015, 3, 1), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.batches_failed, 1);
    assert_eq!(stats.rows_committed, 0);
    assert_eq!(store.row_count(), 0);
    assert_eq!(store.rollbacks(), 1);
}

#[tokio::test]
async fn test_commit_failure_is_isolated() {
    let store = Arc::new(MemoryQuoteStore::new());
    store.fail_commit_for("B");
    let fetcher = Arc::new(ScriptedFetcher::with_market(&["A", "B"], &three_days_per_year()));

    let stats = run_backfill(
        store.clone(),
        fetcher,
        &config(&["A", "B"]),
        date(2015, 3, 1),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(stats.batches_failed, 2);
    assert_eq!(stats.batches_committed, 2);
    assert_eq!(store.rows_for("A").len(), 6);
    assert_eq!(store.rows_for("B").len(), 0);
}

#[tokio::test]
async fn test_current_year_resumes_after_watermark() {
    let store = Arc::new(MemoryQuoteStore::new());
    let fetcher = Arc::new(ScriptedFetcher::with_market(
        &["X"],
        &[date(2014, 1, 2), date(2014, 6, 2), date(2014, 6, 10), date(2014, 6, 12)],
    ));
    store.insert_rows([row("X", date(2013, 3, 1)), row("X", date(2014, 1, 2)), row("X", date(2014, 6, 2))]);

    let stats = run_backfill(
        store.clone(),
        fetcher,
        &config(&["X"]),
        date(2014, 6, 15),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(stats.windows_resolved, 1);
    assert_eq!(stats.windows_skipped, 1);
    assert_eq!(stats.rows_committed, 2);
    assert_eq!(store.rows_for("X").len(), 5);
}

#[tokio::test]
async fn test_resolution_read_failures_fall_back_to_fetch() {
    let store = Arc::new(MemoryQuoteStore::new());
    store.fail_reads(true);
    let fetcher = Arc::new(ScriptedFetcher::with_market(&["X"], &three_days_per_year()));

    let stats = run_backfill(
        store.clone(),
        fetcher.clone(),
        &config(&["X"]),
        date(2015, 3, 1),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(stats.resolution_errors, 2);
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(store.row_count(), 6);
}

#[tokio::test]
async fn test_cancelled_run_stops_without_error() {
    let store = Arc::new(MemoryQuoteStore::new());
    let fetcher = Arc::new(ScriptedFetcher::with_market(&["X"], &three_days_per_year()));
    let token = CancellationToken::new();
    token.cancel();

    let stats = run_backfill(store.clone(), fetcher.clone(), &config(&["X"]), date(2015, 3, 1), token)
        .await
        .unwrap();

    assert_eq!(fetcher.calls(), 0);
    assert_eq!(stats.batches_committed, 0);
    assert_eq!(store.row_count(), 0);
}

#[tokio::test]
async fn test_many_windows_all_persisted_with_multiple_workers() {
    let symbols: Vec<String> = (0..20).map(|i| format!("S{:02}", i)).collect();
    let refs: Vec<&str> = symbols.iter().map(String::as_str).collect();

    let store = Arc::new(MemoryQuoteStore::new());
    let fetcher = Arc::new(ScriptedFetcher::with_market(&refs, &three_days_per_year()));

    let stats = run_backfill(
        store.clone(),
        fetcher.clone(),
        &config(&refs),
        date(2015, 3, 1),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(fetcher.calls(), 40);
    assert_eq!(stats.batches_committed, 40);
    assert_eq!(store.row_count(), 120);

    // 저장소 트레잇으로 확인
    assert!(store.has_quotes_between("S07", date(2014, 1, 1), date(2014, 12, 31)).await.unwrap());
}
