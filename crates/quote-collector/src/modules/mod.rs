//! 백필 파이프라인 단계 모듈.

pub mod backfill;
pub mod fetch_pool;
pub mod merger;
pub mod parse_stage;
pub mod persister;
pub mod range_resolver;
pub mod request_gen;

pub use backfill::{plan_backfill, run_backfill, BackfillPlan};
pub use fetch_pool::{FetchPool, RawResult};
pub use merger::merge;
pub use parse_stage::{FailureStage, ParsedBatch};
pub use persister::{BatchOutcome, Persister, RowFailurePolicy};
pub use range_resolver::{FreshnessCheck, RangeResolver};
pub use request_gen::{FetchJob, RequestSequence};
