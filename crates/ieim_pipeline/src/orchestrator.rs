//! Runs the per-message stage sequence over an already-normalized
//! message: identity, classify (with optional LLM fallback), extract
//! (with optional LLM fallback), route, case, and HITL review-item
//! creation when routing demands it. Each stage writes its artifact via
//! `write_json_artifact_once` and then appends the matching audit event
//! in the same order the stage ran, so the audit log's hash chain
//! reflects the actual sequence of work rather than a reconstructed one.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

use ieim_audit::{append_event, audit_file_path, AuditLogError};
use ieim_case::adapter::CaseAdapter;
use ieim_case::stage::{CaseStage, CaseStageError, CaseStageResult};
use ieim_classify::classify::{classify_message, ClassifyError};
use ieim_classify::extract::{extract_entities, AttachmentAvSummary, AttachmentDocTypeCandidate, ExtractError};
use ieim_common::config::Config;
use ieim_common::CanonError;
use ieim_hitl::review_store::{build_review_item, BuildReviewItemInput, FileReviewStore, ReviewStoreError};
use ieim_identity::{ClaimsAdapter, CrmAdapter, IdentityConfig, IdentityError, IdentityResolver, PolicyAdapter, ResolveInput};
use ieim_llm::provider::Provider;
use ieim_llm::service::{classify_with_llm, extract_with_llm, LlmClassifyInput, LlmExtractInput, LlmOutcome, LlmStageError};
use ieim_llm::{DailyCallCap, FileLlmCache};
use ieim_routing::evaluator::{evaluate_routing, RoutingContext, RoutingError};
use ieim_routing::ruleset::load_routing_ruleset;
use ieim_schema::{
    AttachmentArtifact, ClassificationResult, ExtractionResult, IdentityResult, NormalizedMessage, ReviewRoutingSummary,
    RoutingDecision, Stage,
};
use ieim_store::{write_json_artifact_once, StoreError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("canonicalization failed: {0}")]
    Canon(#[from] CanonError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("audit error: {0}")]
    Audit(#[from] AuditLogError),
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
    #[error("classify error: {0}")]
    Classify(#[from] ClassifyError),
    #[error("extract error: {0}")]
    Extract(#[from] ExtractError),
    #[error("llm error: {0}")]
    Llm(#[from] LlmStageError),
    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),
    #[error("case stage error: {0}")]
    Case(#[from] CaseStageError),
    #[error("review store error: {0}")]
    ReviewStore(#[from] ReviewStoreError),
}

pub struct PipelineResult {
    pub identity: IdentityResult,
    pub classification: ClassificationResult,
    pub extraction: ExtractionResult,
    pub routing: RoutingDecision,
    pub case: CaseStageResult,
    pub review_item_path: Option<PathBuf>,
}

pub struct PipelineDeps<'a> {
    pub pack_root: &'a Path,
    pub audit_root: &'a Path,
    pub config: &'a Config,
    pub identity_config: &'a IdentityConfig,
    pub claims_adapter: &'a dyn ClaimsAdapter,
    pub policy_adapter: &'a dyn PolicyAdapter,
    pub crm_adapter: &'a dyn CrmAdapter,
    pub llm_provider: &'a dyn Provider,
    pub llm_cache: &'a FileLlmCache,
    pub llm_cap: &'a DailyCallCap,
    pub case_adapter: &'a dyn CaseAdapter,
}

fn config_ref(config: &Config) -> ieim_schema::ConfigRef {
    let r = config.config_ref();
    ieim_schema::ConfigRef { path: r.path, sha256: r.sha256 }
}

fn identity_status_label(status: ieim_schema::IdentityStatus) -> String {
    serde_json::to_value(status).ok().and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default()
}

/// A routing decision calls for human review when its queue name
/// contains `REVIEW`, it is `fail_closed`, or its actions include
/// `BLOCK_CASE_CREATE`, `ADD_REQUEST_INFO_DRAFT`, or `ADD_REPLY_DRAFT`.
pub fn review_required(decision: &RoutingDecision) -> bool {
    decision.queue_id.contains("REVIEW")
        || decision.fail_closed
        || decision.actions.iter().any(|a| {
            a == "BLOCK_CASE_CREATE" || a == "ADD_REQUEST_INFO_DRAFT" || a == "ADD_REPLY_DRAFT"
        })
}

pub async fn run_pipeline_for_message(
    deps: &PipelineDeps<'_>,
    normalized: &NormalizedMessage,
    attachments: &[AttachmentArtifact],
    created_at: &str,
    call_date: &str,
    request_info_draft: Option<&str>,
    reply_draft: Option<&str>,
) -> Result<PipelineResult, PipelineError> {
    let message_id = normalized.message_id;
    let run_id = normalized.run_id.clone();
    let audit_path = audit_file_path(deps.audit_root, message_id, &run_id);
    let cref = config_ref(deps.config);

    let normalized_ref = ieim_schema::ArtifactRef {
        schema_id: ieim_schema::urn::NORMALIZED_MESSAGE.to_string(),
        uri: format!("normalized/{message_id}.json"),
        sha256: ieim_common::sha256_canonical_json(normalized)?,
    };

    // --- Identity ---------------------------------------------------
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
            message_fingerprint: &normalized.message_fingerprint,
            raw_mime_sha256: &normalized.raw_mime_sha256,
            subject_c14n: &normalized.subject_c14n,
            body_c14n: &normalized.body_text_c14n,
            from_email: &normalized.from_email,
            attachment_texts_c14n: &attachment_texts_c14n,
        })
        .await?;
    let identity_artifact_path = deps.pack_root.join("identity").join(format!("{message_id}.json"));
    let identity_sha = write_json_artifact_once(&identity_artifact_path, &identity)?;
    append_event(
        &audit_path,
        ieim_schema::AuditEvent {
            schema_id: ieim_schema::urn::AUDIT_EVENT.to_string(),
            schema_version: "1.0.0".to_string(),
            audit_event_id: ieim_schema::AuditEvent::derive_id(message_id, &run_id, Stage::Identity, &identity_sha),
            message_id,
            run_id: run_id.clone(),
            stage: Stage::Identity,
            actor_type: ieim_schema::ActorType::System,
            actor_id: None,
            created_at: created_at.to_string(),
            input_ref: normalized_ref.clone(),
            output_ref: ieim_schema::ArtifactRef {
                schema_id: ieim_schema::urn::IDENTITY_RESULT.to_string(),
                uri: identity_artifact_path.to_string_lossy().to_string(),
                sha256: identity_sha,
            },
            decision_hash: Some(identity.decision_hash.clone()),
            config_ref: Some(cref.clone()),
            rules_ref: None,
            model_info: None,
            evidence: vec![],
            prev_event_hash: String::new(),
            event_hash: String::new(),
        },
    )?;

    // --- Classification (+ LLM fallback) -----------------------------
    let attachment_ids_present = !normalized.attachment_ids.is_empty();
    let attachment_av_statuses: Vec<String> = attachments
        .iter()
        .map(|a| serde_json::to_value(a.av_status).ok().and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default())
        .collect();

    let mut classification = classify_message(
        deps.config,
        message_id,
        &run_id,
        &normalized.message_fingerprint,
        &normalized.raw_mime_sha256,
        &normalized.subject_c14n,
        &normalized.body_text_c14n,
        &normalized.language,
        attachment_ids_present,
        &attachment_av_statuses,
    )?;

    let mut classification_used_llm = false;
    let outcome = classify_with_llm(
        deps.llm_provider,
        deps.llm_cache,
        deps.llm_cap,
        LlmClassifyInput {
            classification: &deps.config.classification,
            incident: &deps.config.incident,
            determinism_mode: deps.config.runtime.determinism_mode,
            deterministic_risk_flags: &classification.risk_flags,
            deterministic_primary_intent_confidence: classification.primary_intent_confidence,
            message_id,
            run_id: &run_id,
            message_fingerprint: &normalized.message_fingerprint,
            subject_c14n: &normalized.subject_c14n,
            body_c14n: &normalized.body_text_c14n,
            call_date,
        },
    )
    .await?;
    if let LlmOutcome::Ran(llm_result) = outcome {
        classification_used_llm = true;
        classification = llm_result;
    }

    let classification_artifact_path = deps.pack_root.join("classification").join(format!("{message_id}.json"));
    let classification_sha = write_json_artifact_once(&classification_artifact_path, &classification)?;
    append_event(
        &audit_path,
        ieim_schema::AuditEvent {
            schema_id: ieim_schema::urn::AUDIT_EVENT.to_string(),
            schema_version: "1.0.0".to_string(),
            audit_event_id: ieim_schema::AuditEvent::derive_id(message_id, &run_id, Stage::Classify, &classification_sha),
            message_id,
            run_id: run_id.clone(),
            stage: Stage::Classify,
            actor_type: ieim_schema::ActorType::System,
            actor_id: None,
            created_at: created_at.to_string(),
            input_ref: normalized_ref.clone(),
            output_ref: ieim_schema::ArtifactRef {
                schema_id: ieim_schema::urn::CLASSIFICATION_RESULT.to_string(),
                uri: classification_artifact_path.to_string_lossy().to_string(),
                sha256: classification_sha,
            },
            decision_hash: Some(classification.decision_hash.clone()),
            config_ref: Some(cref.clone()),
            rules_ref: Some(ieim_schema::RulesRef {
                rules_version: deps.config.classification.rules_version.clone(),
                sha256: ieim_common::sha256_bytes(ieim_classify::classify::RULES_DESCRIPTION.as_bytes()),
            }),
            model_info: classification.model_info.clone(),
            evidence: vec![],
            prev_event_hash: String::new(),
            event_hash: String::new(),
        },
    )?;

    // --- Extraction (+ LLM fallback) ---------------------------------
    let av_summaries: Vec<AttachmentAvSummary> = attachment_av_statuses.iter().map(|s| AttachmentAvSummary { av_status: s.as_str() }).collect();
    let doc_candidates: Vec<AttachmentDocTypeCandidate> = Vec::new();

    let mut extraction = extract_entities(
        deps.config,
        message_id,
        &run_id,
        &normalized.message_fingerprint,
        &normalized.raw_mime_sha256,
        &normalized.subject_c14n,
        &normalized.body_text_c14n,
        &av_summaries,
        &doc_candidates,
    )?;

    let outcome = extract_with_llm(
        deps.llm_provider,
        deps.llm_cache,
        deps.llm_cap,
        LlmExtractInput {
            classification: &deps.config.classification,
            classification_used_llm,
            deterministic_entities_empty: extraction.entities.is_empty(),
            message_id,
            run_id: &run_id,
            message_fingerprint: &normalized.message_fingerprint,
            subject_c14n: &normalized.subject_c14n,
            body_c14n: &normalized.body_text_c14n,
            call_date,
        },
    )
    .await?;
    if let LlmOutcome::Ran(llm_result) = outcome {
        extraction = llm_result;
    }

    let extraction_artifact_path = deps.pack_root.join("extraction").join(format!("{message_id}.json"));
    let extraction_sha = write_json_artifact_once(&extraction_artifact_path, &extraction)?;
    append_event(
        &audit_path,
        ieim_schema::AuditEvent {
            schema_id: ieim_schema::urn::AUDIT_EVENT.to_string(),
            schema_version: "1.0.0".to_string(),
            audit_event_id: ieim_schema::AuditEvent::derive_id(message_id, &run_id, Stage::Extract, &extraction_sha),
            message_id,
            run_id: run_id.clone(),
            stage: Stage::Extract,
            actor_type: ieim_schema::ActorType::System,
            actor_id: None,
            created_at: created_at.to_string(),
            input_ref: normalized_ref.clone(),
            output_ref: ieim_schema::ArtifactRef {
                schema_id: ieim_schema::urn::EXTRACTION_RESULT.to_string(),
                uri: extraction_artifact_path.to_string_lossy().to_string(),
                sha256: extraction_sha,
            },
            decision_hash: Some(extraction.decision_hash.clone()),
            config_ref: Some(cref.clone()),
            rules_ref: None,
            model_info: None,
            evidence: vec![],
            prev_event_hash: String::new(),
            event_hash: String::new(),
        },
    )?;

    // --- Routing ------------------------------------------------------
    let risk_flags: BTreeSet<String> = classification.risk_flags.iter().map(|r| r.label.clone()).collect();
    let routing_ctx = RoutingContext {
        identity_status: identity_status_label(identity.status),
        primary_intent: classification.primary_intent.clone(),
        product_line: classification.product_line.label.clone(),
        urgency: classification.urgency.label.clone(),
        risk_flags,
    };
    let routing = evaluate_routing(
        deps.pack_root,
        deps.config,
        message_id,
        &run_id,
        &normalized.message_fingerprint,
        &normalized.raw_mime_sha256,
        routing_ctx,
    )?;

    let routing_artifact_path = deps.pack_root.join("routing").join(format!("{message_id}.json"));
    let routing_sha = write_json_artifact_once(&routing_artifact_path, &routing)?;
    append_event(
        &audit_path,
        ieim_schema::AuditEvent {
            schema_id: ieim_schema::urn::AUDIT_EVENT.to_string(),
            schema_version: "1.0.0".to_string(),
            audit_event_id: ieim_schema::AuditEvent::derive_id(message_id, &run_id, Stage::Route, &routing_sha),
            message_id,
            run_id: run_id.clone(),
            stage: Stage::Route,
            actor_type: ieim_schema::ActorType::System,
            actor_id: None,
            created_at: created_at.to_string(),
            input_ref: normalized_ref.clone(),
            output_ref: ieim_schema::ArtifactRef {
                schema_id: ieim_schema::urn::ROUTING_DECISION.to_string(),
                uri: routing_artifact_path.to_string_lossy().to_string(),
                sha256: routing_sha.clone(),
            },
            decision_hash: Some(routing.decision_hash.clone()),
            config_ref: Some(cref.clone()),
            rules_ref: Some({
                let ruleset = load_routing_ruleset(deps.pack_root, &deps.config.routing.ruleset_path)
                    .map_err(RoutingError::from)?;
                ieim_schema::RulesRef {
                    rules_version: ruleset.ruleset_version,
                    sha256: ruleset.ruleset_sha256,
                }
            }),
            model_info: None,
            evidence: vec![],
            prev_event_hash: String::new(),
            event_hash: String::new(),
        },
    )?;

    // --- Case -----------------------------------------------------------
    let case_stage = CaseStage { adapter: deps.case_adapter };
    let case_result = case_stage.apply(normalized, &routing, attachments, request_info_draft, reply_draft).await?;

    let case_output_sha = ieim_common::sha256_bytes(
        serde_json::to_vec(&serde_json::json!({"case_id": case_result.case_id, "blocked": case_result.blocked}))
            .unwrap_or_default()
            .as_slice(),
    );
    append_event(
        &audit_path,
        ieim_schema::AuditEvent {
            schema_id: ieim_schema::urn::AUDIT_EVENT.to_string(),
            schema_version: "1.0.0".to_string(),
            audit_event_id: ieim_schema::AuditEvent::derive_id(message_id, &run_id, Stage::Case, &case_output_sha),
            message_id,
            run_id: run_id.clone(),
            stage: Stage::Case,
            actor_type: ieim_schema::ActorType::System,
            actor_id: None,
            created_at: created_at.to_string(),
            input_ref: ieim_schema::ArtifactRef {
                schema_id: ieim_schema::urn::ROUTING_DECISION.to_string(),
                uri: routing_artifact_path.to_string_lossy().to_string(),
                sha256: routing_sha,
            },
            output_ref: ieim_schema::ArtifactRef {
                schema_id: "urn:ieim:case:case_stage_result:1.0.0".to_string(),
                uri: case_result.case_id.clone().unwrap_or_default(),
                sha256: case_output_sha,
            },
            decision_hash: None,
            config_ref: Some(cref.clone()),
            rules_ref: None,
            model_info: None,
            evidence: vec![],
            prev_event_hash: String::new(),
            event_hash: String::new(),
        },
    )?;

    // --- HITL -------------------------------------------------------
    let mut review_item_path = None;
    if review_required(&routing) {
        let review_store = FileReviewStore::new(deps.pack_root);
        let item = build_review_item(BuildReviewItemInput {
            message_id,
            run_id: &run_id,
            queue_id: &routing.queue_id,
            created_at,
            routing_sha256: &routing.decision_hash,
            routing: ReviewRoutingSummary {
                rule_id: routing.rule_id.clone(),
                rule_version: routing.rule_version.clone(),
                fail_closed: routing.fail_closed,
            },
            artifact_refs: vec![],
            draft_refs: vec![],
        });
        let path = review_store.write(&item)?;

        let item_bytes = std::fs::read(&path).unwrap_or_default();
        append_event(
            &audit_path,
            ieim_schema::AuditEvent {
                schema_id: ieim_schema::urn::AUDIT_EVENT.to_string(),
                schema_version: "1.0.0".to_string(),
                audit_event_id: ieim_schema::AuditEvent::derive_id(message_id, &run_id, Stage::Hitl, &ieim_common::sha256_bytes(&item_bytes)),
                message_id,
                run_id: run_id.clone(),
                stage: Stage::Hitl,
                actor_type: ieim_schema::ActorType::System,
                actor_id: None,
                created_at: created_at.to_string(),
                input_ref: ieim_schema::ArtifactRef {
                    schema_id: ieim_schema::urn::ROUTING_DECISION.to_string(),
                    uri: routing_artifact_path.to_string_lossy().to_string(),
                    sha256: routing.decision_hash.clone(),
                },
                output_ref: ieim_schema::ArtifactRef {
                    schema_id: ieim_schema::urn::REVIEW_ITEM.to_string(),
                    uri: path.to_string_lossy().to_string(),
                    sha256: ieim_common::sha256_bytes(&item_bytes),
                },
                decision_hash: None,
                config_ref: Some(cref),
                rules_ref: None,
                model_info: None,
                evidence: vec![],
            prev_event_hash: String::new(),
            event_hash: String::new(),
            },
        )?;
        review_item_path = Some(path);
    }

    Ok(PipelineResult { identity, classification, extraction, routing, case: case_result, review_item_path })
}
