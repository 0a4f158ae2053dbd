//! The case stage: turns a routing decision's actions into idempotent
//! calls against a case-management backend. Every side effect is keyed
//! off `message_fingerprint`, `rule_id`, `rule_version`, and the
//! operation name, so replaying the same routing decision (a retried
//! run, a reprocess job) never creates a duplicate case, attachment, or
//! draft.

pub mod adapter;
pub mod idempotency;
pub mod stage;

pub use adapter::{CaseAdapter, CaseAdapterError, CaseArtifact, CaseRecord, InMemoryCaseAdapter};
pub use idempotency::build_idempotency_key;
pub use stage::{CaseStage, CaseStageError, CaseStageResult};
