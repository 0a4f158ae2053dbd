//! ieim_pipeline
//!
//! Wires the per-crate stages into two runnable jobs: `ingest` (mailbox
//! polling, dedupe, normalization, attachment processing) and
//! `orchestrator` (identity through HITL for one already-normalized
//! message). `reprocess` re-runs the orchestrator for a historical
//! message and compares its fresh stage hashes against what was
//! recorded the first time.

pub mod ingest;
pub mod orchestrator;
pub mod reprocess;

pub use ingest::{
    FetchedMessage, IngestError, IngestRunner, IngestedMessage, MailAdapter, MailRef, TickReport,
};
pub use orchestrator::{review_required, run_pipeline_for_message, PipelineDeps, PipelineError, PipelineResult};
pub use reprocess::{reprocess_message, ReprocessError, ReprocessReport, StageComparison};
