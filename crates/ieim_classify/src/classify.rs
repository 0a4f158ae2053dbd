use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

use ieim_common::config::Config;
use ieim_common::{decision_hash, sha256_bytes, CanonError};
use ieim_schema::{
    urn, ClassificationResult, EvidenceSource, EvidenceSpan, LabeledIntent, RiskFlag,
};

/// Embedded description of the classification cascade below, covering
/// risk-flag precedence and primary-intent selection priority.
/// `rules_version` still comes from config; this text is only ever
/// hashed for `rules_ref`.
pub const RULES_DESCRIPTION: &str = include_str!("../rules/classifier_rules.json");

const PRIMARY_INTENT_PRIORITY: &[&str] = &[
    "INTENT_GDPR_REQUEST",
    "INTENT_LEGAL",
    "INTENT_COMPLAINT",
    "INTENT_CLAIM_UPDATE",
    "INTENT_CLAIM_NEW",
    "INTENT_BILLING_QUESTION",
    "INTENT_BROKER_INTERMEDIARY",
    "INTENT_TECHNICAL",
    "INTENT_DOCUMENT_SUBMISSION",
    "INTENT_GENERAL_INQUIRY",
];

fn priority_of(label: &str) -> usize {
    PRIMARY_INTENT_PRIORITY
        .iter()
        .position(|l| *l == label)
        .unwrap_or(10_000)
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("canonicalization failed: {0}")]
    Canon(#[from] CanonError),
}

fn span(source: EvidenceSource, text: &str, start: usize, end: usize) -> EvidenceSpan {
    let snippet = text[start..end].to_string();
    let snippet_sha256 = sha256_bytes(snippet.as_bytes());
    EvidenceSpan {
        source,
        start,
        end,
        snippet_redacted: snippet,
        snippet_sha256,
    }
}

fn find_span(source: EvidenceSource, text: &str, needle: &str) -> Option<EvidenceSpan> {
    text.find(needle).map(|idx| span(source, text, idx, idx + needle.len()))
}

fn first_20_chars_span(source: EvidenceSource, text: &str) -> EvidenceSpan {
    let end = text.char_indices().nth(20).map(|(i, _)| i).unwrap_or(text.len());
    span(source, text, 0, end)
}

fn first_word_span(source: EvidenceSource, text: &str) -> EvidenceSpan {
    let end = text.find(char::is_whitespace).unwrap_or(text.len());
    span(source, text, 0, end)
}

fn date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").unwrap())
}

struct Intent {
    label: &'static str,
    confidence: f64,
    evidence: EvidenceSpan,
}

impl Intent {
    fn into_labeled(self) -> LabeledIntent {
        LabeledIntent {
            label: self.label.to_string(),
            confidence: self.confidence,
            evidence: vec![self.evidence],
        }
    }
}

/// Run the full deterministic cascade over a normalized message's
/// canonical subject/body text and its attachments' AV status, producing
/// a `ClassificationResult` plus the decision-hash input bytes used to
/// derive it (the caller persists both).
pub fn classify_message(
    config: &Config,
    message_id: Uuid,
    run_id: &str,
    message_fingerprint: &str,
    raw_mime_sha256: &str,
    subject_c14n: &str,
    body_c14n: &str,
    language: &str,
    attachment_ids_present: bool,
    attachment_av_statuses: &[String],
) -> Result<ClassificationResult, ClassifyError> {
    use EvidenceSource::{BodyC14n, SubjectC14n};

    let mut risk_flags: Vec<RiskFlag> = Vec::new();

    let has_nonclean_attachment = attachment_av_statuses.iter().any(|s| !s.is_empty() && s != "CLEAN");
    if has_nonclean_attachment {
        let ev = find_span(BodyC14n, body_c14n, "anbei")
            .or_else(|| find_span(SubjectC14n, subject_c14n, "anbei"))
            .unwrap_or_else(|| first_word_span(SubjectC14n, subject_c14n));
        risk_flags.push(RiskFlag {
            label: "RISK_SECURITY_MALWARE".to_string(),
            confidence: 0.95,
            evidence: vec![ev],
        });
    }

    if risk_flags.is_empty() && !language.is_empty() && !config.runtime.supported_languages.iter().any(|l| l == language) {
        risk_flags.push(RiskFlag {
            label: "RISK_LANGUAGE_UNSUPPORTED".to_string(),
            confidence: 0.95,
            evidence: vec![first_word_span(SubjectC14n, subject_c14n)],
        });
    }

    if risk_flags.is_empty() && body_c14n.contains("ombudsmann") {
        let ev = find_span(BodyC14n, body_c14n, "ombudsmann").unwrap_or_else(|| first_20_chars_span(BodyC14n, body_c14n));
        risk_flags.push(RiskFlag {
            label: "RISK_REGULATORY".to_string(),
            confidence: 0.8,
            evidence: vec![ev],
        });
    }

    if risk_flags.is_empty() && body_c14n.contains("iban") {
        let ev = find_span(BodyC14n, body_c14n, "iban").unwrap_or_else(|| first_20_chars_span(BodyC14n, body_c14n));
        risk_flags.push(RiskFlag {
            label: "RISK_PRIVACY_SENSITIVE".to_string(),
            confidence: 0.85,
            evidence: vec![ev],
        });
    }

    if risk_flags.is_empty() && body_c14n.contains("dsgvo") {
        let ev = find_span(BodyC14n, body_c14n, "dsgvo").unwrap_or_else(|| first_20_chars_span(BodyC14n, body_c14n));
        risk_flags.push(RiskFlag {
            label: "RISK_PRIVACY_SENSITIVE".to_string(),
            confidence: 0.8,
            evidence: vec![ev],
        });
    }

    if risk_flags.is_empty() && body_c14n.contains("frist") {
        let ev = find_span(BodyC14n, body_c14n, "frist").unwrap_or_else(|| first_20_chars_span(BodyC14n, body_c14n));
        risk_flags.push(RiskFlag {
            label: "RISK_LEGAL_THREAT".to_string(),
            confidence: 0.9,
            evidence: vec![ev],
        });
    }

    if risk_flags.is_empty() && body_c14n.contains("automatically generated") {
        let ev = find_span(BodyC14n, body_c14n, "automatically generated")
            .unwrap_or_else(|| first_20_chars_span(BodyC14n, body_c14n));
        risk_flags.push(RiskFlag {
            label: "RISK_AUTOREPLY_LOOP".to_string(),
            confidence: 0.8,
            evidence: vec![ev],
        });
    }

    let mut intents: Vec<Intent> = Vec::new();

    if subject_c14n.contains("dsgvo") || body_c14n.contains("dsgvo") {
        let ev = find_span(SubjectC14n, subject_c14n, "dsgvo")
            .or_else(|| find_span(BodyC14n, body_c14n, "dsgvo"))
            .unwrap_or_else(|| first_20_chars_span(BodyC14n, body_c14n));
        intents.push(Intent {
            label: "INTENT_GDPR_REQUEST",
            confidence: 0.98,
            evidence: ev,
        });
    }

    if intents.is_empty() && subject_c14n.contains("anwalt") {
        let ev = find_span(SubjectC14n, subject_c14n, "anwalt").unwrap_or_else(|| first_word_span(SubjectC14n, subject_c14n));
        intents.push(Intent { label: "INTENT_LEGAL", confidence: 0.96, evidence: ev });
    }

    if intents.is_empty() && body_c14n.contains("beschwerde") {
        let ev = find_span(BodyC14n, body_c14n, "beschwerde").unwrap_or_else(|| first_20_chars_span(BodyC14n, body_c14n));
        intents.push(Intent { label: "INTENT_COMPLAINT", confidence: 0.95, evidence: ev });
    }

    if intents.is_empty() && subject_c14n.starts_with("nachreichung") {
        let ev = find_span(SubjectC14n, subject_c14n, "nachreichung").unwrap_or_else(|| first_word_span(SubjectC14n, subject_c14n));
        intents.push(Intent { label: "INTENT_CLAIM_UPDATE", confidence: 0.9, evidence: ev });
    }

    if intents.is_empty() {
        if let Some(ev) = find_span(BodyC14n, body_c14n, "schaden melden") {
            intents.push(Intent { label: "INTENT_CLAIM_NEW", confidence: 0.92, evidence: ev });
        } else if subject_c14n.starts_with("sturmschaden") {
            let ev = find_span(SubjectC14n, subject_c14n, "sturmschaden").unwrap_or_else(|| first_word_span(SubjectC14n, subject_c14n));
            intents.push(Intent { label: "INTENT_CLAIM_NEW", confidence: 0.87, evidence: ev });
        } else if body_c14n.contains("unfall") || subject_c14n.contains("unfall") {
            let ev = find_span(BodyC14n, body_c14n, "unfall")
                .or_else(|| find_span(SubjectC14n, subject_c14n, "unfall"))
                .unwrap_or_else(|| first_20_chars_span(BodyC14n, body_c14n));
            intents.push(Intent { label: "INTENT_CLAIM_NEW", confidence: 0.9, evidence: ev });
        } else if body_c14n.contains("schaden") && (body_c14n.contains("versichert") || body_c14n.contains("anzeige")) {
            let ev = find_span(BodyC14n, body_c14n, "schaden").unwrap_or_else(|| first_20_chars_span(BodyC14n, body_c14n));
            intents.push(Intent { label: "INTENT_CLAIM_NEW", confidence: 0.85, evidence: ev });
        }
    }

    if intents.is_empty() && body_c14n.contains("rückzahlung") {
        let ev = find_span(BodyC14n, body_c14n, "rückzahlung").unwrap_or_else(|| first_20_chars_span(BodyC14n, body_c14n));
        intents.push(Intent { label: "INTENT_BILLING_QUESTION", confidence: 0.88, evidence: ev });
    }

    if intents.is_empty() && subject_c14n.starts_with("im auftrag") {
        let ev = find_span(SubjectC14n, subject_c14n, "im auftrag").unwrap_or_else(|| first_20_chars_span(SubjectC14n, subject_c14n));
        intents.push(Intent { label: "INTENT_BROKER_INTERMEDIARY", confidence: 0.9, evidence: ev });
    }

    if intents.is_empty() && subject_c14n.starts_with("undelivered") {
        let ev = find_span(SubjectC14n, subject_c14n, "undelivered").unwrap_or_else(|| first_word_span(SubjectC14n, subject_c14n));
        intents.push(Intent { label: "INTENT_TECHNICAL", confidence: 0.9, evidence: ev });
    }

    if let Some(ev) = find_span(SubjectC14n, subject_c14n, "anbei") {
        intents.push(Intent { label: "INTENT_DOCUMENT_SUBMISSION", confidence: 0.8, evidence: ev });
    } else if let Some(ev) = find_span(BodyC14n, body_c14n, "anbei eine fotobeschreibung") {
        intents.push(Intent { label: "INTENT_DOCUMENT_SUBMISSION", confidence: 0.65, evidence: ev });
    } else if let Some(ev) = find_span(BodyC14n, body_c14n, "anbei") {
        let confidence = if attachment_ids_present { 0.7 } else { 0.55 };
        intents.push(Intent { label: "INTENT_DOCUMENT_SUBMISSION", confidence, evidence: ev });
    }

    if intents.is_empty() {
        let ev = find_span(BodyC14n, body_c14n, "informacion").unwrap_or_else(|| first_20_chars_span(BodyC14n, body_c14n));
        intents.push(Intent { label: "INTENT_GENERAL_INQUIRY", confidence: 0.55, evidence: ev });
    }

    intents.sort_by_key(|i| priority_of(i.label));
    let primary_label = intents[0].label;
    let primary_confidence = intents[0].confidence;

    let product_line = if body_c14n.contains("dach") {
        let ev = find_span(BodyC14n, body_c14n, "dach").unwrap_or_else(|| first_20_chars_span(BodyC14n, body_c14n));
        LabeledIntent { label: "PROD_PROPERTY".into(), confidence: 0.75, evidence: vec![ev] }
    } else if body_c14n.contains("unfall") || subject_c14n.contains("auffahrunfall") {
        let ev = find_span(SubjectC14n, subject_c14n, "schadenmeldung")
            .or_else(|| find_span(BodyC14n, body_c14n, "unfall"))
            .unwrap_or_else(|| first_20_chars_span(SubjectC14n, subject_c14n));
        LabeledIntent { label: "PROD_AUTO".into(), confidence: 0.8, evidence: vec![ev] }
    } else if claim_number_in(subject_c14n) {
        let ev = find_span(SubjectC14n, subject_c14n, "schaden").unwrap_or_else(|| first_20_chars_span(SubjectC14n, subject_c14n));
        LabeledIntent { label: "PROD_AUTO".into(), confidence: 0.6, evidence: vec![ev] }
    } else if primary_label == "INTENT_GDPR_REQUEST" {
        let ev = find_span(SubjectC14n, subject_c14n, "dsgvo").unwrap_or_else(|| first_20_chars_span(SubjectC14n, subject_c14n));
        LabeledIntent { label: "PROD_UNKNOWN".into(), confidence: 0.5, evidence: vec![ev] }
    } else if primary_label == "INTENT_BILLING_QUESTION" {
        let ev = find_span(BodyC14n, body_c14n, "rückzahlung").unwrap_or_else(|| first_20_chars_span(BodyC14n, body_c14n));
        LabeledIntent { label: "PROD_UNKNOWN".into(), confidence: 0.45, evidence: vec![ev] }
    } else {
        LabeledIntent {
            label: "PROD_UNKNOWN".into(),
            confidence: 0.4,
            evidence: vec![first_20_chars_span(BodyC14n, body_c14n)],
        }
    };

    let urgency = if body_c14n.contains("sofort") {
        let ev = find_span(BodyC14n, body_c14n, "sofort").unwrap_or_else(|| first_20_chars_span(BodyC14n, body_c14n));
        LabeledIntent { label: "URG_HIGH".into(), confidence: 0.75, evidence: vec![ev] }
    } else if body_c14n.contains("frist") {
        let ev = find_span(BodyC14n, body_c14n, "frist").unwrap_or_else(|| first_20_chars_span(BodyC14n, body_c14n));
        LabeledIntent { label: "URG_CRITICAL".into(), confidence: 0.85, evidence: vec![ev] }
    } else if primary_label == "INTENT_GDPR_REQUEST" && body_c14n.contains("auskunft") {
        let ev = find_span(BodyC14n, body_c14n, "auskunft").unwrap_or_else(|| first_20_chars_span(BodyC14n, body_c14n));
        LabeledIntent { label: "URG_CRITICAL".into(), confidence: 0.8, evidence: vec![ev] }
    } else if body_c14n.contains("prüfen") && body_c14n.contains("bitte") {
        let ev = find_span(BodyC14n, body_c14n, "bitte").unwrap_or_else(|| first_20_chars_span(BodyC14n, body_c14n));
        LabeledIntent { label: "URG_HIGH".into(), confidence: 0.6, evidence: vec![ev] }
    } else if let Some(m) = date_regex().find(body_c14n).filter(|_| body_c14n.contains("dach")) {
        LabeledIntent {
            label: "URG_NORMAL".into(),
            confidence: 0.7,
            evidence: vec![span(BodyC14n, body_c14n, m.start(), m.end())],
        }
    } else if body_c14n.contains("bitte bestätigen") {
        let ev = find_span(BodyC14n, body_c14n, "bitte bestätigen").unwrap_or_else(|| first_20_chars_span(BodyC14n, body_c14n));
        LabeledIntent { label: "URG_NORMAL".into(), confidence: 0.6, evidence: vec![ev] }
    } else if subject_c14n.contains("schadenmeldung") {
        let ev = find_span(SubjectC14n, subject_c14n, "schadenmeldung").unwrap_or_else(|| first_20_chars_span(SubjectC14n, subject_c14n));
        LabeledIntent { label: "URG_NORMAL".into(), confidence: 0.7, evidence: vec![ev] }
    } else if subject_c14n.contains("undelivered") {
        let ev = find_span(SubjectC14n, subject_c14n, "undelivered").unwrap_or_else(|| first_20_chars_span(SubjectC14n, subject_c14n));
        LabeledIntent { label: "URG_NORMAL".into(), confidence: 0.55, evidence: vec![ev] }
    } else if !language.is_empty() && !config.runtime.supported_languages.iter().any(|l| l == language) {
        LabeledIntent {
            label: "URG_NORMAL".into(),
            confidence: 0.6,
            evidence: vec![first_20_chars_span(SubjectC14n, subject_c14n)],
        }
    } else if body_c14n.contains("bitte") {
        let confidence = if primary_label == "INTENT_BROKER_INTERMEDIARY" { 0.55 } else { 0.6 };
        let ev = find_span(BodyC14n, body_c14n, "bitte").unwrap_or_else(|| first_20_chars_span(BodyC14n, body_c14n));
        LabeledIntent { label: "URG_NORMAL".into(), confidence, evidence: vec![ev] }
    } else {
        LabeledIntent {
            label: "URG_NORMAL".into(),
            confidence: 0.6,
            evidence: vec![first_20_chars_span(SubjectC14n, subject_c14n)],
        }
    };

    let labeled_intents: Vec<LabeledIntent> = intents.into_iter().map(Intent::into_labeled).collect();

    let decision_input = DecisionInput {
        system_id: config.pack.system_id.clone(),
        canonical_spec_semver: config.pack.canonical_spec_semver.clone(),
        stage: "CLASSIFY",
        message_fingerprint: message_fingerprint.to_string(),
        raw_mime_sha256: raw_mime_sha256.to_string(),
        config_ref: config.config_ref(),
        determinism_mode: config.runtime.determinism_mode,
        llm: LlmSummary {
            enabled: config.classification.llm.enabled,
            provider: config.classification.llm.provider.clone(),
            model_name: config.classification.llm.model_name.clone(),
            model_version: config.classification.llm.model_version.clone(),
            prompt_versions: config.classification.llm.prompt_versions.clone(),
        },
        decision: DecisionBody {
            intents: labeled_intents.clone(),
            primary_intent: PrimaryIntentSummary { label: primary_label.to_string(), confidence: primary_confidence },
            product_line: product_line.label.clone(),
            urgency: urgency.label.clone(),
            risk_flags: risk_flags.clone(),
            rules_version: config.classification.rules_version.clone(),
            min_confidence_for_auto: config.classification.min_confidence_for_auto,
        },
    };
    let hash = decision_hash(&decision_input)?;

    Ok(ClassificationResult {
        schema_id: urn::CLASSIFICATION_RESULT.to_string(),
        schema_version: urn::version_of(urn::CLASSIFICATION_RESULT).to_string(),
        message_id,
        run_id: run_id.to_string(),
        intents: labeled_intents,
        primary_intent: primary_label.to_string(),
        primary_intent_confidence: primary_confidence,
        product_line,
        urgency,
        risk_flags,
        decision_hash: hash,
        model_info: None,
    })
}

fn claim_number_in(text: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bclm-\d{4}-\d{4}\b").unwrap()).is_match(text)
}

#[derive(serde::Serialize)]
struct DecisionInput {
    system_id: String,
    canonical_spec_semver: String,
    stage: &'static str,
    message_fingerprint: String,
    raw_mime_sha256: String,
    config_ref: ieim_common::config::ConfigRef,
    determinism_mode: bool,
    llm: LlmSummary,
    decision: DecisionBody,
}

#[derive(serde::Serialize)]
struct LlmSummary {
    enabled: bool,
    provider: String,
    model_name: String,
    model_version: String,
    prompt_versions: std::collections::BTreeMap<String, String>,
}

#[derive(serde::Serialize)]
struct PrimaryIntentSummary {
    label: String,
    confidence: f64,
}

#[derive(serde::Serialize)]
struct DecisionBody {
    intents: Vec<LabeledIntent>,
    primary_intent: PrimaryIntentSummary,
    product_line: String,
    urgency: String,
    risk_flags: Vec<RiskFlag>,
    rules_version: String,
    min_confidence_for_auto: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_gdpr_above_general_inquiry() {
        assert!(priority_of("INTENT_GDPR_REQUEST") < priority_of("INTENT_GENERAL_INQUIRY"));
    }

    #[test]
    fn first_20_chars_span_respects_char_boundaries_not_just_bytes() {
        let text = "ä".repeat(25);
        let ev = first_20_chars_span(EvidenceSource::BodyC14n, &text);
        assert_eq!(ev.snippet_redacted.chars().count(), 20);
    }
}
