//! 증분 백필 실행.
//!
//! 구간 계산 → 요청 생성 → 워커 풀 수집 → 병합 → 파싱 → 저장 순서로
//! 파이프라인을 구성하고 실행합니다. 구간 단위 실패는 통계에만 남고
//! 실행 자체를 중단시키지 않습니다.

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use quote_data::{QuoteFetcher, QuoteStore};
use tokio_util::sync::CancellationToken;

use super::fetch_pool::FetchPool;
use super::merger::merge;
use super::parse_stage::spawn_parser;
use super::persister::Persister;
use super::range_resolver::{RangeResolver, Resolution};
use super::request_gen::{FetchJob, RequestSequence};
use crate::{CollectionStats, CollectorConfig, Result};

/// 드라이런 결과.
#[derive(Debug, Clone)]
pub struct BackfillPlan {
    pub jobs: Vec<FetchJob>,
    pub stats: CollectionStats,
}

async fn resolve(
    store: &dyn QuoteStore,
    config: &CollectorConfig,
    today: NaiveDate,
    token: &CancellationToken,
    stats: &mut CollectionStats,
) -> Result<Resolution> {
    let resolver = RangeResolver::new(store)
        .with_freshness(config.pipeline.freshness_check)
        .with_partial_year_repair(config.pipeline.repair_partial_years);

    let resolution = resolver
        .resolve_all(
            &config.symbols(),
            config.year_beginning,
            config.year_ending,
            today,
            token,
        )
        .await?;

    stats.years_checked = resolution.years_checked;
    stats.windows_resolved = resolution.windows.len();
    stats.windows_skipped = resolution.skipped;
    stats.resolution_errors = resolution.read_errors;
    Ok(resolution)
}

/// 누락 구간을 수집해 저장.
///
/// 구간별 실패는 `CollectionStats`에 집계되며, 설정 오류처럼 실행 전체를
/// 진행할 수 없는 경우에만 에러를 반환합니다.
pub async fn run_backfill(
    store: Arc<dyn QuoteStore>,
    fetcher: Arc<dyn QuoteFetcher>,
    config: &CollectorConfig,
    today: NaiveDate,
    token: CancellationToken,
) -> Result<CollectionStats> {
    let start = Instant::now();
    let mut stats = CollectionStats::new();

    tracing::info!(
        symbols = config.symbols.len(),
        year_beginning = config.year_beginning,
        year_ending = config.year_ending,
        %today,
        "백필 시작"
    );

    let builder = config.request_builder()?;
    let resolution = resolve(store.as_ref(), config, today, &token, &mut stats).await?;

    if resolution.windows.is_empty() {
        tracing::info!("수집할 구간이 없습니다");
        stats.elapsed = start.elapsed();
        return Ok(stats);
    }
    if token.is_cancelled() {
        stats.elapsed = start.elapsed();
        return Ok(stats);
    }

    let capacity = config.pipeline.channel_capacity;
    let requests = RequestSequence::new(builder, resolution.windows);

    let pool = FetchPool::new(config.pipeline.fetch_workers, capacity).spawn(
        requests,
        fetcher,
        token.clone(),
    );
    let mut workers = pool.workers;
    let merged = merge(pool.outputs, capacity, token.clone());
    let (parsed, parser) = spawn_parser(merged, capacity, token.clone());

    Persister::new(store, config.pipeline.row_failure_policy)
        .run(parsed, &token, &mut stats)
        .await;

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "수집 워커 비정상 종료");
        }
    }
    if let Err(e) = parser.await {
        tracing::error!(error = %e, "파싱 태스크 비정상 종료");
    }

    if token.is_cancelled() {
        tracing::warn!("종료 신호로 백필이 중간에 멈췄습니다");
    }

    stats.elapsed = start.elapsed();
    Ok(stats)
}

/// 수집 없이 요청 목록만 계산 (드라이런).
pub async fn plan_backfill(
    store: &dyn QuoteStore,
    config: &CollectorConfig,
    today: NaiveDate,
    token: &CancellationToken,
) -> Result<BackfillPlan> {
    let start = Instant::now();
    let mut stats = CollectionStats::new();

    let builder = config.request_builder()?;
    let resolution = resolve(store, config, today, token, &mut stats).await?;
    let jobs = RequestSequence::new(builder, resolution.windows).collect();

    stats.elapsed = start.elapsed();
    Ok(BackfillPlan { jobs, stats })
}
