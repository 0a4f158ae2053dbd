//! Reprocess job: recompute and compare, the same idiom the audit log
//! uses to verify its own hash chain. A reprocess run never writes a new
//! artifact or audit event; it recomputes the IDENTITY, CLASSIFY, and
//! ROUTE stages for a message that already has a historical run on
//! record and reports whether each stage's `decision_hash` still
//! matches. LLM-assisted stages are skipped: a provider call is not
//! guaranteed to reproduce bit-for-bit, so EXTRACT is left out of the
//! comparison and CLASSIFY is recomputed deterministically only.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use ieim_audit::{audit_file_path, AuditLogError};
use ieim_classify::classify::{classify_message, ClassifyError};
use ieim_common::sha256_bytes;
use ieim_identity::{IdentityError, IdentityResolver, ResolveInput};
use ieim_routing::evaluator::{evaluate_routing, RoutingContext, RoutingError};
use ieim_schema::{AttachmentArtifact, AuditEvent, NormalizedMessage, Stage};

use crate::orchestrator::PipelineDeps;

#[derive(Debug, Error)]
pub enum ReprocessError {
    #[error("io error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("audit error: {0}")]
    Audit(#[from] AuditLogError),
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
    #[error("classify error: {0}")]
    Classify(#[from] ClassifyError),
    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageComparison {
    Ok,
    Mismatch { historical: String, current: String },
    NoHistoricalRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReprocessReport {
    pub status: String,
    pub run_id: String,
    pub decision_hash_comparison: BTreeMap<String, StageComparison>,
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Ingest => "INGEST",
        Stage::Normalize => "NORMALIZE",
        Stage::Attachments => "ATTACHMENTS",
        Stage::Identity => "IDENTITY",
        Stage::Classify => "CLASSIFY",
        Stage::Extract => "EXTRACT",
        Stage::Route => "ROUTE",
        Stage::Case => "CASE",
        Stage::Hitl => "HITL",
    }
}

/// Reads the historical run's audit log and returns the last recorded
/// `decision_hash` seen for each stage (later lines win, in case a stage
/// ever appends more than one event).
fn historical_decision_hashes(path: &Path) -> Result<BTreeMap<String, String>, ReprocessError> {
    let mut out = BTreeMap::new();
    if !path.exists() {
        return Ok(out);
    }
    let file = File::open(path).map_err(|source| ReprocessError::Io { path: path.to_path_buf(), source })?;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| ReprocessError::Io { path: path.to_path_buf(), source })?;
        if line.trim().is_empty() {
            continue;
        }
        let event: AuditEvent = serde_json::from_str(&line)?;
        if let Some(hash) = event.decision_hash {
            out.insert(stage_label(event.stage).to_string(), hash);
        }
    }
    Ok(out)
}

fn compare(historical: &BTreeMap<String, String>, stage: Stage, current: &str) -> StageComparison {
    match historical.get(stage_label(stage)) {
        None => StageComparison::NoHistoricalRecord,
        Some(h) if h == current => StageComparison::Ok,
        Some(h) => StageComparison::Mismatch { historical: h.clone(), current: current.to_string() },
    }
}

/// Verifies the raw MIME bytes and each attachment's extracted-text hash
/// still match what the historical normalized record and attachment
/// artifacts named, then recomputes IDENTITY, CLASSIFY, and ROUTE and
/// compares each against the historical run's audit log.
#[allow(clippy::too_many_arguments)]
pub async fn reprocess_message(
    deps: &PipelineDeps<'_>,
    historical_normalized: &NormalizedMessage,
    current_raw_mime: &[u8],
    attachments: &[AttachmentArtifact],
    historical_attachment_text_sha256: &BTreeMap<String, Option<String>>,
    historical_run_id: &str,
) -> Result<ReprocessReport, ReprocessError> {
    let message_id = historical_normalized.message_id;
    let run_id = Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("reprocess:{message_id}:{historical_run_id}").as_bytes()).to_string();

    let raw_mime_matches = sha256_bytes(current_raw_mime) == historical_normalized.raw_mime_sha256;
    let attachment_texts_match = attachments.iter().all(|a| {
        historical_attachment_text_sha256
            .get(&a.attachment_id)
            .map(|historical| historical == &a.extracted_text_sha256)
            .unwrap_or(false)
    });

    if !raw_mime_matches || !attachment_texts_match {
        return Ok(ReprocessReport {
            status: "REVIEW_REQUIRED".to_string(),
            run_id,
            decision_hash_comparison: BTreeMap::new(),
        });
    }

    let historical_path = audit_file_path(deps.audit_root, message_id, historical_run_id);
    let historical = historical_decision_hashes(&historical_path)?;

    let attachment_texts_c14n: Vec<String> = Vec::new();
    let resolver = IdentityResolver {
        config: deps.identity_config,
        claims_adapter: deps.claims_adapter,
        policy_adapter: deps.policy_adapter,
        crm_adapter: deps.crm_adapter,
    };
    let identity = resolver
        .resolve(ResolveInput {
            message_id,
            run_id: &run_id,
            message_fingerprint: &historical_normalized.message_fingerprint,
            raw_mime_sha256: &historical_normalized.raw_mime_sha256,
            subject_c14n: &historical_normalized.subject_c14n,
            body_c14n: &historical_normalized.body_text_c14n,
            from_email: &historical_normalized.from_email,
            attachment_texts_c14n: &attachment_texts_c14n,
        })
        .await?;

    let attachment_ids_present = !historical_normalized.attachment_ids.is_empty();
    let attachment_av_statuses: Vec<String> = attachments
        .iter()
        .map(|a| serde_json::to_value(a.av_status).ok().and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default())
        .collect();
    let classification = classify_message(
        deps.config,
        message_id,
        &run_id,
        &historical_normalized.message_fingerprint,
        &historical_normalized.raw_mime_sha256,
        &historical_normalized.subject_c14n,
        &historical_normalized.body_text_c14n,
        &historical_normalized.language,
        attachment_ids_present,
        &attachment_av_statuses,
    )?;

    let identity_status = serde_json::to_value(identity.status).ok().and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();
    let risk_flags = classification.risk_flags.iter().map(|r| r.label.clone()).collect();
    let routing = evaluate_routing(
        deps.pack_root,
        deps.config,
        message_id,
        &run_id,
        &historical_normalized.message_fingerprint,
        &historical_normalized.raw_mime_sha256,
        RoutingContext {
            identity_status,
            primary_intent: classification.primary_intent.clone(),
            product_line: classification.product_line.label.clone(),
            urgency: classification.urgency.label.clone(),
            risk_flags,
        },
    )?;

    let mut decision_hash_comparison = BTreeMap::new();
    decision_hash_comparison.insert(stage_label(Stage::Identity).to_string(), compare(&historical, Stage::Identity, &identity.decision_hash));
    decision_hash_comparison.insert(stage_label(Stage::Classify).to_string(), compare(&historical, Stage::Classify, &classification.decision_hash));
    decision_hash_comparison.insert(stage_label(Stage::Route).to_string(), compare(&historical, Stage::Route, &routing.decision_hash));

    let status = if decision_hash_comparison.values().all(|c| matches!(c, StageComparison::Ok)) {
        "OK"
    } else {
        "MISMATCH"
    };

    Ok(ReprocessReport { status: status.to_string(), run_id, decision_hash_comparison })
}
