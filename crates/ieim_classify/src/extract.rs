use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

use ieim_common::config::{Config, IbanStoreMode};
use ieim_common::{decision_hash, sha256_bytes, CanonError};
use ieim_schema::{urn, EvidenceSource, EvidenceSpan, ExtractedEntity, ExtractionResult, StoreMode};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("canonicalization failed: {0}")]
    Canon(#[from] CanonError),
}

fn policy_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{2}-\d{7})\b").unwrap())
}

fn claim_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(clm-\d{4}-\d{4})\b").unwrap())
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").unwrap())
}

fn loc_ort_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bort:\s+([a-zäöüß-]{2,})\b").unwrap())
}

fn loc_in_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bin\s+([a-zäöüß-]{2,})\b").unwrap())
}

fn iban_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b([A-Z]{2}\d{2}[A-Z0-9]{10,30})\b").unwrap())
}

fn iban_redact(value: &str) -> String {
    let v = value.trim();
    if v.chars().count() <= 8 {
        return v.to_string();
    }
    let chars: Vec<char> = v.chars().collect();
    let head: String = chars[..4].iter().collect::<String>().to_lowercase();
    let tail: String = chars[chars.len() - 4..].iter().collect::<String>().to_lowercase();
    format!("{head}…{tail}")
}

fn provenance(source: EvidenceSource, text: &str, start: usize, end: usize) -> EvidenceSpan {
    let snippet = text[start..end].to_string();
    EvidenceSpan {
        source,
        start,
        end,
        snippet_sha256: sha256_bytes(snippet.as_bytes()),
        snippet_redacted: snippet,
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

pub struct AttachmentAvSummary<'a> {
    pub av_status: &'a str,
}

pub struct AttachmentDocTypeCandidate<'a> {
    pub doc_type_label: &'a str,
    pub confidence: f64,
    pub evidence: Option<(usize, usize, &'a str)>,
}

/// Run the fixed six-regex extraction cascade over canonical subject/body
/// text and the attachments' document-type candidates.
pub fn extract_entities(
    config: &Config,
    message_id: Uuid,
    run_id: &str,
    message_fingerprint: &str,
    raw_mime_sha256: &str,
    subject_c14n: &str,
    body_c14n: &str,
    attachments_av: &[AttachmentAvSummary],
    attachment_doc_candidates: &[AttachmentDocTypeCandidate],
) -> Result<ExtractionResult, ExtractError> {
    use EvidenceSource::{AttachmentText, BodyC14n, SubjectC14n};

    let mut entities: Vec<ExtractedEntity> = Vec::new();

    let policy_hit = policy_number_re()
        .captures(body_c14n)
        .map(|m| (m, BodyC14n, body_c14n))
        .or_else(|| policy_number_re().captures(subject_c14n).map(|m| (m, SubjectC14n, subject_c14n)));
    if let Some((m, source, text)) = policy_hit {
        let g = m.get(1).unwrap();
        let number = g.as_str().to_string();
        let (start, end) = (g.start(), g.end());
        entities.push(ExtractedEntity {
            entity_type: "ENT_POLICY_NUMBER".to_string(),
            value: Some(number.clone()),
            value_redacted: number.clone(),
            value_sha256: sha256_bytes(number.as_bytes()),
            store_mode: StoreMode::Full,
            confidence: 0.95,
            provenance: vec![provenance(source, text, start, end)],
        });
    }

    if let Some(m) = claim_number_re()
        .captures(subject_c14n)
        .map(|m| (m, SubjectC14n, subject_c14n))
        .or_else(|| claim_number_re().captures(body_c14n).map(|m| (m, BodyC14n, body_c14n)))
    {
        let (caps, source, text) = m;
        let g = caps.get(1).unwrap();
        let value = g.as_str().to_uppercase();
        entities.push(ExtractedEntity {
            entity_type: "ENT_CLAIM_NUMBER".to_string(),
            value: Some(value.clone()),
            value_redacted: value.clone(),
            value_sha256: sha256_bytes(value.as_bytes()),
            store_mode: StoreMode::Full,
            confidence: 0.95,
            provenance: vec![provenance(source, text, g.start(), g.end())],
        });
    }

    if let Some(m) = date_re().captures(body_c14n) {
        let g = m.get(1).unwrap();
        let value = g.as_str().to_string();
        entities.push(ExtractedEntity {
            entity_type: "ENT_DATE".to_string(),
            value: Some(value.clone()),
            value_redacted: value.clone(),
            value_sha256: sha256_bytes(value.as_bytes()),
            store_mode: StoreMode::Full,
            confidence: 0.9,
            provenance: vec![provenance(BodyC14n, body_c14n, g.start(), g.end())],
        });
    }

    if let Some(m) = loc_ort_re().captures(body_c14n) {
        let loc = capitalize(m.get(1).unwrap().as_str());
        let whole = m.get(0).unwrap();
        let snippet_span = provenance(BodyC14n, body_c14n, whole.start(), whole.end());
        entities.push(ExtractedEntity {
            entity_type: "ENT_LOCATION".to_string(),
            value: Some(loc.clone()),
            value_redacted: loc.clone(),
            value_sha256: sha256_bytes(loc.as_bytes()),
            store_mode: StoreMode::Full,
            confidence: 0.8,
            provenance: vec![snippet_span],
        });
    } else if let Some(m) = loc_in_re().captures(body_c14n) {
        let g = m.get(1).unwrap();
        let loc = capitalize(g.as_str());
        entities.push(ExtractedEntity {
            entity_type: "ENT_LOCATION".to_string(),
            value: Some(loc.clone()),
            value_redacted: loc.clone(),
            value_sha256: sha256_bytes(loc.as_bytes()),
            store_mode: StoreMode::Full,
            confidence: 0.8,
            provenance: vec![provenance(BodyC14n, body_c14n, g.start(), g.end())],
        });
    }

    if config.extraction.iban_policy.enabled {
        if let Some(m) = iban_re().captures(body_c14n) {
            let g = m.get(1).unwrap();
            let raw = g.as_str();
            let normalized = raw.to_uppercase();
            let hash_only = config.extraction.iban_policy.store_mode == IbanStoreMode::HashOnly;
            entities.push(ExtractedEntity {
                entity_type: "ENT_IBAN".to_string(),
                value: if hash_only { None } else { Some(normalized.clone()) },
                value_redacted: iban_redact(&normalized),
                value_sha256: sha256_bytes(normalized.as_bytes()),
                store_mode: if hash_only { StoreMode::HashOnly } else { StoreMode::Full },
                confidence: 0.85,
                provenance: vec![provenance(BodyC14n, body_c14n, g.start(), g.end())],
            });
        }
    }

    if attachments_av.iter().all(|a| a.av_status == "CLEAN") {
        'attachments: for att in attachment_doc_candidates {
            if att.doc_type_label != "DOC_PHOTO_EVIDENCE" {
                continue;
            }
            let Some((start, end, snippet)) = att.evidence else { continue };
            entities.push(ExtractedEntity {
                entity_type: "ENT_DOCUMENT_TYPE".to_string(),
                value: Some(att.doc_type_label.to_string()),
                value_redacted: att.doc_type_label.to_string(),
                value_sha256: sha256_bytes(att.doc_type_label.as_bytes()),
                store_mode: StoreMode::Full,
                confidence: att.confidence,
                provenance: vec![EvidenceSpan {
                    source: AttachmentText,
                    start,
                    end,
                    snippet_redacted: snippet.to_string(),
                    snippet_sha256: sha256_bytes(snippet.as_bytes()),
                }],
            });
            break 'attachments;
        }
    }

    let decision_input = DecisionInput {
        system_id: config.pack.system_id.clone(),
        canonical_spec_semver: config.pack.canonical_spec_semver.clone(),
        stage: "EXTRACT",
        message_fingerprint: message_fingerprint.to_string(),
        raw_mime_sha256: raw_mime_sha256.to_string(),
        config_ref: config.config_ref(),
        determinism_mode: config.runtime.determinism_mode,
        entities: entities.clone(),
    };
    let hash = decision_hash(&decision_input)?;

    Ok(ExtractionResult {
        schema_id: urn::EXTRACTION_RESULT.to_string(),
        schema_version: urn::version_of(urn::EXTRACTION_RESULT).to_string(),
        message_id,
        run_id: run_id.to_string(),
        entities,
        decision_hash: hash,
    })
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
    entities: Vec<ExtractedEntity>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iban_redaction_keeps_head_and_tail_only() {
        assert_eq!(iban_redact("DE89370400440532013000"), "de89…3000");
    }

    #[test]
    fn iban_redaction_leaves_short_values_untouched() {
        assert_eq!(iban_redact("short"), "short");
    }

    #[test]
    fn capitalize_handles_umlauts() {
        assert_eq!(capitalize("münchen"), "München");
    }
}
