//! ieim_schema
//!
//! Typed data-model structs for every artifact the decision pipeline
//! produces: `NormalizedMessage`, `AttachmentArtifact`, `IdentityResult`,
//! `ClassificationResult`, `ExtractionResult`, `RoutingDecision`,
//! `ReviewItem`, `CorrectionRecord`, and the `AuditEvent` that binds them.
//!
//! All entities are immutable once written: a producer builds the value,
//! serializes it through `ieim_common::canonical_json_bytes`, and the
//! resulting sha256 becomes that artifact's identity reference. Nothing in
//! this crate performs I/O; see `ieim_store` and `ieim_audit`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod urn;

/// A content-addressed reference to an artifact: the schema it conforms
/// to, where it lives, and the sha256 of its canonical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub schema_id: String,
    pub uri: String,
    pub sha256: String,
}

/// `{path, sha256}`, duplicated here (rather than re-exported from
/// `ieim_common::config`) so artifact structs don't need to depend on the
/// config crate's YAML machinery just to describe a reference shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRef {
    pub path: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesRef {
    pub rules_version: String,
    pub sha256: String,
}

/// `{source, start, end, snippet_redacted, snippet_sha256}`. The
/// invariant `canonical_text[start..end] == snippet_redacted` and
/// `sha256(snippet_redacted) == snippet_sha256` is enforced by callers
/// (`ieim_classify`, `ieim_identity`) at construction time, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceSpan {
    pub source: EvidenceSource,
    pub start: usize,
    pub end: usize,
    pub snippet_redacted: String,
    pub snippet_sha256: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceSource {
    SubjectC14n,
    BodyC14n,
    AttachmentText,
}

// ---------------------------------------------------------------------
// Normalized message
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadKeys {
    pub internet_message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub schema_id: String,
    pub schema_version: String,
    pub message_id: Uuid,
    pub run_id: String,
    pub ingested_at: String,
    pub received_at: String,
    pub ingestion_source: String,
    pub raw_mime_uri: String,
    pub raw_mime_sha256: String,
    pub from_email: String,
    pub from_display_name: Option<String>,
    pub reply_to_email: Option<String>,
    pub to_emails: Vec<String>,
    pub cc_emails: Vec<String>,
    pub subject: String,
    pub subject_c14n: String,
    pub body_text: String,
    pub body_text_c14n: String,
    pub language: String,
    pub thread_keys: ThreadKeys,
    pub attachment_ids: Vec<String>,
    pub message_fingerprint: String,
}

// ---------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AvStatus {
    Clean,
    Infected,
    Suspicious,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrInfo {
    pub applied: bool,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentArtifact {
    pub schema_id: String,
    pub schema_version: String,
    pub attachment_id: String,
    pub message_id: Uuid,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub sha256: String,
    pub av_status: AvStatus,
    pub extracted_text_uri: Option<String>,
    pub extracted_text_sha256: Option<String>,
    pub ocr: Option<OcrInfo>,
    #[serde(default)]
    pub doc_type_candidates: Vec<DocTypeCandidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocTypeCandidate {
    pub label: String,
    pub evidence: Vec<EvidenceSpan>,
}

// ---------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentityStatus {
    IdentityConfirmed,
    IdentityProbable,
    IdentityNeedsReview,
    IdentityNoCandidate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedCandidate {
    pub entity_type: String,
    pub entity_id: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub rank: u32,
    pub entity_type: String,
    pub entity_id: String,
    pub score: f64,
    pub signals: Vec<String>,
    /// Evidence with snippet text stripped: only the sha of the snippet
    /// is retained in the identity decision input.
    pub evidence: Vec<EvidenceRefOnly>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRefOnly {
    pub source: EvidenceSource,
    pub start: usize,
    pub end: usize,
    pub snippet_sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityThresholds {
    pub confirmed_min_score: f64,
    pub confirmed_min_margin: f64,
    pub probable_min_score: f64,
    pub probable_min_margin: f64,
    pub top_k: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityResult {
    pub schema_id: String,
    pub schema_version: String,
    pub message_id: Uuid,
    pub run_id: String,
    pub status: IdentityStatus,
    pub selected_candidate: Option<SelectedCandidate>,
    pub top_k: Vec<RankedCandidate>,
    pub thresholds: IdentityThresholds,
    pub request_info_draft_uri: Option<String>,
    pub decision_hash: String,
}

// ---------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledIntent {
    pub label: String,
    pub confidence: f64,
    pub evidence: Vec<EvidenceSpan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFlag {
    pub label: String,
    pub confidence: f64,
    pub evidence: Vec<EvidenceSpan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider: String,
    pub model_name: String,
    pub model_version: String,
    pub prompt_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub schema_id: String,
    pub schema_version: String,
    pub message_id: Uuid,
    pub run_id: String,
    pub intents: Vec<LabeledIntent>,
    pub primary_intent: String,
    pub primary_intent_confidence: f64,
    pub product_line: LabeledIntent,
    pub urgency: LabeledIntent,
    pub risk_flags: Vec<RiskFlag>,
    pub decision_hash: String,
    pub model_info: Option<ModelInfo>,
}

// ---------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoreMode {
    Full,
    HashOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub entity_type: String,
    pub value: Option<String>,
    pub value_redacted: String,
    pub value_sha256: String,
    pub store_mode: StoreMode,
    pub confidence: f64,
    pub provenance: Vec<EvidenceSpan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub schema_id: String,
    pub schema_version: String,
    pub message_id: Uuid,
    pub run_id: String,
    pub entities: Vec<ExtractedEntity>,
    pub decision_hash: String,
}

// ---------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub schema_id: String,
    pub schema_version: String,
    pub message_id: Uuid,
    pub run_id: String,
    pub queue_id: String,
    pub sla_id: String,
    pub priority: i64,
    pub actions: Vec<String>,
    pub rule_id: String,
    pub rule_version: String,
    pub fail_closed: bool,
    pub fail_closed_reason: Option<String>,
    pub decision_hash: String,
}

// ---------------------------------------------------------------------
// Audit events
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Ingest,
    Normalize,
    Attachments,
    Identity,
    Classify,
    Extract,
    Route,
    Case,
    Hitl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorType {
    System,
    Human,
    Job,
}

/// A single hash-chained entry in a pipeline stage's audit log, one JSON
/// line per event. `prev_event_hash` is the preceding line's `event_hash`
/// (or the genesis hash at line 1); `event_hash =
/// sha256(jcs(event without event_hash))`, so it always covers
/// `prev_event_hash` but never itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub schema_id: String,
    pub schema_version: String,
    pub audit_event_id: Uuid,
    pub message_id: Uuid,
    pub run_id: String,
    pub stage: Stage,
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    pub created_at: String,
    pub input_ref: ArtifactRef,
    pub output_ref: ArtifactRef,
    pub decision_hash: Option<String>,
    pub config_ref: Option<ConfigRef>,
    pub rules_ref: Option<RulesRef>,
    pub model_info: Option<ModelInfo>,
    #[serde(default)]
    pub evidence: Vec<EvidenceSpan>,
    pub prev_event_hash: String,
    pub event_hash: String,
}

impl AuditEvent {
    /// `uuid5("audit:{message_id}:{run_id}:{stage}:{output_sha256}")`
    pub fn derive_id(message_id: Uuid, run_id: &str, stage: Stage, output_sha256: &str) -> Uuid {
        let name = format!(
            "audit:{}:{}:{:?}:{}",
            message_id, run_id, stage, output_sha256
        );
        Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
    }
}

// ---------------------------------------------------------------------
// HITL review + corrections
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Open,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRoutingSummary {
    pub rule_id: String,
    pub rule_version: String,
    pub fail_closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub schema_id: String,
    pub schema_version: String,
    pub review_item_id: Uuid,
    pub message_id: Uuid,
    pub run_id: String,
    pub queue_id: String,
    pub created_at: String,
    pub status: ReviewStatus,
    pub routing: ReviewRoutingSummary,
    pub artifact_refs: Vec<ArtifactRef>,
    pub draft_refs: Vec<ArtifactRef>,
}

impl ReviewItem {
    /// `uuid5("review:{message_id}:{run_id}:{queue_id}:{routing_sha256}")`
    pub fn derive_id(message_id: Uuid, run_id: &str, queue_id: &str, routing_sha256: &str) -> Uuid {
        let name = format!("review:{}:{}:{}:{}", message_id, run_id, queue_id, routing_sha256);
        Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorKind {
    Human,
    System,
}

/// A single JSON-Patch operation restricted to `add`/`replace`/`remove`
/// (see `ieim_hitl::json_patch` for the interpreter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: serde_json::Value },
    Replace { path: String, value: serde_json::Value },
    Remove { path: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub target_stage: Stage,
    pub ops: Vec<PatchOp>,
    pub justification: String,
    #[serde(default)]
    pub evidence: Vec<EvidenceSpan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub schema_id: String,
    pub schema_version: String,
    pub correction_id: Uuid,
    pub review_item_id: Uuid,
    pub message_id: Uuid,
    pub run_id: String,
    pub actor_type: ActorKind,
    pub actor_id: Option<String>,
    pub created_at: String,
    pub note: Option<String>,
    pub artifact_refs: Vec<ArtifactRef>,
    pub corrections: Vec<Correction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_event_id_is_deterministic() {
        let mid = Uuid::nil();
        let a = AuditEvent::derive_id(mid, "run-1", Stage::Classify, "sha256:aa");
        let b = AuditEvent::derive_id(mid, "run-1", Stage::Classify, "sha256:aa");
        assert_eq!(a, b);
    }

    #[test]
    fn review_item_id_changes_with_routing_hash() {
        let mid = Uuid::nil();
        let a = ReviewItem::derive_id(mid, "run-1", "QUEUE_X", "sha256:aa");
        let b = ReviewItem::derive_id(mid, "run-1", "QUEUE_X", "sha256:bb");
        assert_ne!(a, b);
    }
}
