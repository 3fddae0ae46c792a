//! Incremental daily quote backfill CLI.

use std::sync::Arc;

use chrono::Local;
use clap::{Parser, Subcommand};
use quote_data::{HttpQuoteFetcher, PgQuoteStore, QuoteFetcher, QuoteStore, RetryingFetcher};
use quote_collector::{modules, CollectorConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "quote-collector")]
#[command(about = "Incremental daily quote backfill", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 설정 파일 경로
    #[arg(long, default_value = "config.json")]
    config: String,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// 누락 구간을 한 번 수집
    Backfill {
        /// 동시 수집 워커 수 (설정값 덮어쓰기)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// 수집 없이 요청 목록만 출력 (드라이런)
    Plan,

    /// 데몬 모드: 주기적으로 백필 실행
    Daemon,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // 로깅 초기화
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("quote_collector={0},quote_data={0}", cli.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Quote Collector 시작");

    // 설정 로드
    let mut config = CollectorConfig::load(&cli.config)?;
    if let Commands::Backfill {
        workers: Some(workers),
    } = cli.command
    {
        config.pipeline.fetch_workers = workers;
        config.validate()?;
    }
    tracing::debug!(path = %cli.config, symbols = config.symbols.len(), "설정 로드 완료");

    let fetcher: Arc<dyn QuoteFetcher> = Arc::new(RetryingFetcher::new(
        HttpQuoteFetcher::new(config.pipeline.request_timeout())?,
        config.pipeline.max_retries,
        config.pipeline.retry_delay(),
    ));

    // DB 연결
    let pg = PgQuoteStore::connect(config.database_url()?).await?;
    tracing::info!("데이터베이스 연결 성공");
    let store: Arc<dyn QuoteStore> = Arc::new(pg.clone());

    // Ctrl+C → 모든 단계에 종료 신호 전파
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("종료 신호 수신, 진행 중인 작업 정리 중...");
                shutdown.cancel();
            }
        });
    }

    // 명령이 실패해도 커넥션 풀은 닫고 종료
    let outcome = run_command(cli.command, &config, store, fetcher, &shutdown).await;
    if let Err(e) = &outcome {
        tracing::error!("명령 실행 실패: {}", e);
    }

    pg.close().await;
    tracing::info!("Quote Collector 종료");

    Ok(outcome?)
}

/// 명령 실행.
async fn run_command(
    command: Commands,
    config: &CollectorConfig,
    store: Arc<dyn QuoteStore>,
    fetcher: Arc<dyn QuoteFetcher>,
    shutdown: &CancellationToken,
) -> quote_collector::Result<()> {
    match command {
        Commands::Backfill { .. } => {
            let today = Local::now().date_naive();
            let stats =
                modules::run_backfill(store, fetcher, config, today, shutdown.clone()).await?;
            stats.log_summary("백필");
        }
        Commands::Plan => {
            let today = Local::now().date_naive();
            let plan = modules::plan_backfill(store.as_ref(), config, today, shutdown).await?;
            for job in &plan.jobs {
                tracing::info!(window = %job.window, url = %job.request, "수집 예정");
            }
            plan.stats.log_summary("수집 계획");
        }
        Commands::Daemon => {
            tracing::info!(
                "=== 데몬 모드 시작 (주기: {}분) ===",
                config.daemon.interval_minutes
            );

            let mut interval = tokio::time::interval(config.daemon.interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("데몬 종료 중...");
                        break;
                    }
                    _ = interval.tick() => {
                        let today = Local::now().date_naive();
                        match modules::run_backfill(
                            Arc::clone(&store),
                            Arc::clone(&fetcher),
                            config,
                            today,
                            shutdown.child_token(),
                        )
                        .await
                        {
                            Ok(stats) => stats.log_summary("백필"),
                            Err(e) => tracing::error!("백필 실패: {}", e),
                        }

                        tracing::info!(
                            "=== 백필 완료, 다음 실행: {}분 후 ===",
                            config.daemon.interval_minutes
                        );
                    }
                }
            }
        }
    }

    Ok(())
}
