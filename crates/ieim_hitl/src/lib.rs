//! ieim_hitl
//!
//! Human-in-the-loop review: review items queued for a human actor,
//! JSON-Patch corrections submitted against a prior stage's output, and
//! the audit trail that binds a correction back to the review item it
//! resolves. Nothing here re-runs a stage; a correction is recorded as
//! data, and a separate reprocess step (in `ieim_pipeline`) decides what,
//! if anything, to redo.

pub mod correction;
pub mod json_patch;
pub mod review_store;
pub mod service;

pub use correction::{build_correction_record, BuildCorrectionInput, CorrectionError, FileCorrectionStore};
pub use json_patch::{apply_json_patch, JsonPatchError};
pub use review_store::{build_review_item, BuildReviewItemInput, FileReviewStore, ReviewStoreError};
pub use service::{HitlService, HitlServiceError};
