//! Orchestrates a single LLM-backed classification or extraction call:
//! gate check, cache lookup, cap check, redact, dispatch, contract
//! validation, evidence re-grounding, cache write. Any failure along
//! this chain after the gate has opened falls back to the deterministic
//! result the caller already has; it is never surfaced as an error the
//! pipeline stage has to handle specially.

use thiserror::Error;
use uuid::Uuid;

use ieim_common::config::{ClassificationConfig, IncidentConfig};
use ieim_common::{decision_hash, sha256_bytes, CanonError};
use ieim_schema::{
    ClassificationResult, EvidenceSpan, ExtractedEntity, ExtractionResult, LabeledIntent, ModelInfo, RiskFlag,
    StoreMode,
};

use crate::cache::{cache_key, CacheKeyInput, FileLlmCache};
use crate::cap::DailyCallCap;
use crate::contract::{classification_schema, extraction_schema, Contract};
use crate::evidence::{reground, EvidenceSourceRef};
use crate::gate::{classification_should_use_llm, extraction_should_use_llm};
use crate::provider::{LlmRequest, Provider};
use crate::redact::redact_for_prompt;

#[derive(Debug, Error)]
pub enum LlmStageError {
    #[error("canonicalization failed: {0}")]
    Canon(#[from] CanonError),
}

/// Outcome of attempting the LLM fallback path: either it ran and
/// produced a result (which may still be the fail-closed default if the
/// response could not be grounded), or the gate never let it run at all
/// and the caller's deterministic result stands untouched.
pub enum LlmOutcome<T> {
    NotAttempted,
    Ran(T),
}

pub struct LlmClassifyInput<'a> {
    pub classification: &'a ClassificationConfig,
    pub incident: &'a IncidentConfig,
    pub determinism_mode: bool,
    pub deterministic_risk_flags: &'a [RiskFlag],
    pub deterministic_primary_intent_confidence: f64,
    pub message_id: Uuid,
    pub run_id: &'a str,
    pub message_fingerprint: &'a str,
    pub subject_c14n: &'a str,
    pub body_c14n: &'a str,
    pub call_date: &'a str,
}

const FALLBACK_INTENT: &str = "INTENT_GENERAL_INQUIRY";

/// Runs the gated LLM classification path. On any failure after the
/// gate opens (cap exhausted, provider error, contract violation,
/// ungroundable evidence) the result still comes back as `Ran(..)`, but
/// with `primary_intent` forced to the fail-closed default at zero
/// confidence and the original deterministic risk flags intact; callers
/// never need to distinguish "the model said general inquiry" from "the
/// model's answer could not be trusted".
pub async fn classify_with_llm<P: Provider + ?Sized>(
    provider: &P,
    cache: &FileLlmCache,
    cap: &DailyCallCap,
    input: LlmClassifyInput<'_>,
) -> Result<LlmOutcome<ClassificationResult>, LlmStageError> {
    if !classification_should_use_llm(
        input.classification,
        input.incident,
        input.determinism_mode,
        input.deterministic_risk_flags.is_empty(),
        input.deterministic_primary_intent_confidence,
    ) {
        return Ok(LlmOutcome::NotAttempted);
    }

    let llm = &input.classification.llm;
    let prompt_version = llm.prompt_versions.get("classify").cloned().unwrap_or_else(|| "v1".to_string());
    let redacted_subject = redact_for_prompt(input.subject_c14n);
    let redacted_body = redact_for_prompt(input.body_c14n);
    let user_prompt = format!("subject: {redacted_subject}\nbody: {redacted_body}");
    let prompt_sha256 = sha256_bytes(user_prompt.as_bytes());

    let key = cache_key(&CacheKeyInput {
        stage: "classify",
        provider: &llm.provider,
        model_name: &llm.model_name,
        model_version: &llm.model_version,
        prompt_version: &prompt_version,
        prompt_sha256: &prompt_sha256,
        message_fingerprint: input.message_fingerprint,
    })?;

    let raw_response = if let Some(cached) = cache.get(&key).unwrap_or(None) {
        Some(cached)
    } else {
        if !cap.try_consume(input.call_date, llm.max_calls_per_day).unwrap_or(false) {
            None
        } else {
            let request = LlmRequest {
                model_name: llm.model_name.clone(),
                model_version: llm.model_version.clone(),
                system_prompt: "Classify the insurance intake email. Respond with the required JSON shape only.".to_string(),
                user_prompt,
                temperature: 0.0,
                max_output_tokens: *llm.token_budgets.get("classify").unwrap_or(&512),
            };
            match provider.chat_json(&request).await {
                Ok(resp) => {
                    let _ = cache.put(&key, &resp.raw_json);
                    Some(resp.raw_json)
                }
                Err(_) => None,
            }
        }
    };

    let model_info = ModelInfo {
        provider: llm.provider.clone(),
        model_name: llm.model_name.clone(),
        model_version: llm.model_version.clone(),
        prompt_version,
    };

    let grounded = raw_response.and_then(|raw| ground_classification(&raw, input.subject_c14n, input.body_c14n));

    let (primary_intent, primary_intent_confidence, risk_flags, intents) = match grounded {
        Some(g) => g,
        None => (
            FALLBACK_INTENT.to_string(),
            0.0,
            input.deterministic_risk_flags.to_vec(),
            vec![LabeledIntent { label: FALLBACK_INTENT.to_string(), confidence: 0.0, evidence: vec![] }],
        ),
    };

    let empty_evidence = LabeledIntent { label: String::new(), confidence: 0.0, evidence: vec![] };
    let decision_input = serde_json::json!({
        "message_id": input.message_id,
        "run_id": input.run_id,
        "primary_intent": primary_intent,
        "primary_intent_confidence": primary_intent_confidence,
    });
    let hash = decision_hash(&decision_input)?;

    Ok(LlmOutcome::Ran(ClassificationResult {
        schema_id: ieim_schema::urn::CLASSIFICATION_RESULT.to_string(),
        schema_version: "1.0.0".to_string(),
        message_id: input.message_id,
        run_id: input.run_id.to_string(),
        intents,
        primary_intent,
        primary_intent_confidence,
        product_line: empty_evidence.clone(),
        urgency: empty_evidence,
        risk_flags,
        decision_hash: hash,
        model_info: Some(model_info),
    }))
}

fn ground_classification(
    raw: &serde_json::Value,
    subject_c14n: &str,
    body_c14n: &str,
) -> Option<(String, f64, Vec<RiskFlag>, Vec<LabeledIntent>)> {
    let contract = Contract::compile(&classification_schema()).ok()?;
    contract.validate(raw).ok()?;

    let primary_intent = raw.get("primary_intent")?.as_str()?.to_string();
    let primary_intent_confidence = raw.get("primary_intent_confidence")?.as_f64()?;
    let quotes = raw.get("evidence_quotes")?.as_array()?;

    let mut evidence_spans: Vec<EvidenceSpan> = Vec::new();
    for q in quotes {
        let source_label = q.get("source")?.as_str()?;
        let quote = q.get("quote")?.as_str()?;
        let source = EvidenceSourceRef::parse(source_label)?;
        let text = match source {
            EvidenceSourceRef::SubjectC14n => subject_c14n,
            EvidenceSourceRef::BodyC14n => body_c14n,
        };
        let span = reground(source, text, quote)?;
        evidence_spans.push(span);
    }
    if evidence_spans.is_empty() {
        return None;
    }

    let risk_flag_labels = raw.get("risk_flags")?.as_array()?;
    let mut risk_flags = Vec::new();
    for label in risk_flag_labels {
        let label = label.as_str()?.to_string();
        risk_flags.push(RiskFlag {
            label,
            confidence: primary_intent_confidence,
            evidence: evidence_spans.clone(),
        });
    }

    let intents = vec![LabeledIntent {
        label: primary_intent.clone(),
        confidence: primary_intent_confidence,
        evidence: evidence_spans,
    }];

    Some((primary_intent, primary_intent_confidence, risk_flags, intents))
}

pub struct LlmExtractInput<'a> {
    pub classification: &'a ClassificationConfig,
    pub classification_used_llm: bool,
    pub deterministic_entities_empty: bool,
    pub message_id: Uuid,
    pub run_id: &'a str,
    pub message_fingerprint: &'a str,
    pub subject_c14n: &'a str,
    pub body_c14n: &'a str,
    pub call_date: &'a str,
}

/// Runs the gated LLM extraction path. A failure after the gate opens
/// falls back to an empty entity list, never to a half-populated one:
/// extraction entities are used for routing, and a partially-trusted
/// entity is worse than none.
pub async fn extract_with_llm<P: Provider + ?Sized>(
    provider: &P,
    cache: &FileLlmCache,
    cap: &DailyCallCap,
    input: LlmExtractInput<'_>,
) -> Result<LlmOutcome<ExtractionResult>, LlmStageError> {
    if !extraction_should_use_llm(input.classification_used_llm, input.deterministic_entities_empty) {
        return Ok(LlmOutcome::NotAttempted);
    }

    let llm = &input.classification.llm;
    let prompt_version = llm.prompt_versions.get("extract").cloned().unwrap_or_else(|| "v1".to_string());
    let redacted_subject = redact_for_prompt(input.subject_c14n);
    let redacted_body = redact_for_prompt(input.body_c14n);
    let user_prompt = format!("subject: {redacted_subject}\nbody: {redacted_body}");
    let prompt_sha256 = sha256_bytes(user_prompt.as_bytes());

    let key = cache_key(&CacheKeyInput {
        stage: "extract",
        provider: &llm.provider,
        model_name: &llm.model_name,
        model_version: &llm.model_version,
        prompt_version: &prompt_version,
        prompt_sha256: &prompt_sha256,
        message_fingerprint: input.message_fingerprint,
    })?;

    let raw_response = if let Some(cached) = cache.get(&key).unwrap_or(None) {
        Some(cached)
    } else if !cap.try_consume(input.call_date, llm.max_calls_per_day).unwrap_or(false) {
        None
    } else {
        let request = LlmRequest {
            model_name: llm.model_name.clone(),
            model_version: llm.model_version.clone(),
            system_prompt: "Extract structured entities from the insurance intake email. Respond with the required JSON shape only.".to_string(),
            user_prompt,
            temperature: 0.0,
            max_output_tokens: *llm.token_budgets.get("extract").unwrap_or(&512),
        };
        match provider.chat_json(&request).await {
            Ok(resp) => {
                let _ = cache.put(&key, &resp.raw_json);
                Some(resp.raw_json)
            }
            Err(_) => None,
        }
    };

    let entities = raw_response
        .and_then(|raw| ground_extraction(&raw, &llm.thresholds.extraction, input.subject_c14n, input.body_c14n))
        .unwrap_or_default();

    let decision_input = serde_json::json!({
        "message_id": input.message_id,
        "run_id": input.run_id,
        "entity_count": entities.len(),
    });
    let hash = decision_hash(&decision_input)?;

    Ok(LlmOutcome::Ran(ExtractionResult {
        schema_id: ieim_schema::urn::EXTRACTION_RESULT.to_string(),
        schema_version: "1.0.0".to_string(),
        message_id: input.message_id,
        run_id: input.run_id.to_string(),
        entities,
        decision_hash: hash,
    }))
}

fn ground_extraction(
    raw: &serde_json::Value,
    thresholds: &ieim_common::config::LlmExtractionThresholds,
    subject_c14n: &str,
    body_c14n: &str,
) -> Option<Vec<ExtractedEntity>> {
    let contract = Contract::compile(&extraction_schema()).ok()?;
    contract.validate(raw).ok()?;

    let raw_entities = raw.get("entities")?.as_array()?;
    let mut entities = Vec::new();
    for e in raw_entities {
        let entity_type = e.get("entity_type")?.as_str()?.to_string();
        let value = e.get("value")?.as_str()?.to_string();
        let quote = e.get("quote")?.as_str()?;
        let source_label = e.get("source")?.as_str()?;
        let confidence = e.get("confidence")?.as_f64()?;
        let source = EvidenceSourceRef::parse(source_label)?;
        let text = match source {
            EvidenceSourceRef::SubjectC14n => subject_c14n,
            EvidenceSourceRef::BodyC14n => body_c14n,
        };
        let span = reground(source, text, quote)?;

        let min_confidence = if thresholds.high_value_entity_types.iter().any(|t| t == &entity_type) {
            thresholds.high_value_entity_min
        } else {
            thresholds.other_entity_min
        };
        if confidence < min_confidence {
            continue;
        }

        entities.push(ExtractedEntity {
            entity_type,
            value: Some(value.clone()),
            value_redacted: value.clone(),
            value_sha256: sha256_bytes(value.as_bytes()),
            store_mode: StoreMode::Full,
            confidence,
            provenance: vec![span],
        });
    }
    Some(entities)
}
