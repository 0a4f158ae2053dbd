//! ieim_identity
//!
//! Weighted-signal identity resolution. Ported in full from the original
//! implementation's `identity/resolver.py` and `identity/extract.py`:
//! deterministic claim/policy-number extraction, signal scoring with
//! half-up decimal rounding to two places, candidate ranking, and the
//! hard/medium-signal threshold-and-margin status ladder.

use async_trait::async_trait;
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use thiserror::Error;
use uuid::Uuid;

use ieim_common::{decision_hash, sha256_bytes, CanonError};
use ieim_schema::{
    urn, EvidenceRefOnly, EvidenceSource, IdentityResult, IdentityStatus, IdentityThresholds,
    RankedCandidate, SelectedCandidate,
};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("missing signal spec for {0}")]
    MissingSignalSpec(String),
    #[error("canonicalization failed: {0}")]
    Canon(#[from] CanonError),
}

// ---------------------------------------------------------------------
// Deterministic identifier extraction
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct IdentifierHit {
    pub value: String,
    pub source: EvidenceSource,
    pub start: usize,
    pub end: usize,
    pub snippet: String,
}

fn policy_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{2}-\d{7})\b").unwrap())
}

fn policy_with_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bpolizzennr\s+(\d{2}-\d{7})\b").unwrap())
}

fn claim_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(clm-\d{4}-\d{4})\b").unwrap())
}

pub fn find_claim_number(subject_c14n: &str, body_c14n: &str) -> Option<IdentifierHit> {
    if let Some(m) = claim_number_re().captures(subject_c14n) {
        let g = m.get(1).unwrap();
        return Some(IdentifierHit {
            value: g.as_str().to_uppercase(),
            source: EvidenceSource::SubjectC14n,
            start: g.start(),
            end: g.end(),
            snippet: g.as_str().to_string(),
        });
    }
    if let Some(m) = claim_number_re().captures(body_c14n) {
        let g = m.get(1).unwrap();
        return Some(IdentifierHit {
            value: g.as_str().to_uppercase(),
            source: EvidenceSource::BodyC14n,
            start: g.start(),
            end: g.end(),
            snippet: g.as_str().to_string(),
        });
    }
    None
}

pub fn find_policy_number(subject_c14n: &str, body_c14n: &str) -> Option<IdentifierHit> {
    if let Some(m) = policy_number_re().captures(subject_c14n) {
        let g = m.get(1).unwrap();
        let number = g.as_str().to_string();
        if let Some(body_idx) = body_c14n.find(&number) {
            return Some(IdentifierHit {
                value: number.clone(),
                source: EvidenceSource::BodyC14n,
                start: body_idx,
                end: body_idx + number.len(),
                snippet: number,
            });
        }
        return Some(IdentifierHit {
            value: number.clone(),
            source: EvidenceSource::SubjectC14n,
            start: g.start(),
            end: g.end(),
            snippet: number,
        });
    }
    if let Some(m) = policy_with_prefix_re().captures(body_c14n) {
        let g = m.get(1).unwrap();
        let whole = m.get(0).unwrap();
        return Some(IdentifierHit {
            value: g.as_str().to_string(),
            source: EvidenceSource::BodyC14n,
            start: whole.start(),
            end: whole.end(),
            snippet: whole.as_str().to_string(),
        });
    }
    if let Some(m) = policy_number_re().captures(body_c14n) {
        let g = m.get(1).unwrap();
        return Some(IdentifierHit {
            value: g.as_str().to_string(),
            source: EvidenceSource::BodyC14n,
            start: g.start(),
            end: g.end(),
            snippet: g.as_str().to_string(),
        });
    }
    None
}

// ---------------------------------------------------------------------
// Config surface (caller-supplied, typically sourced from ieim_common::config)
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SignalSpec {
    pub weight: Decimal,
    pub strength: Decimal,
}

#[derive(Debug, Clone)]
pub struct ScoreTransform {
    pub intercept: Decimal,
    pub slope: Decimal,
}

#[derive(Debug, Clone)]
pub struct Thresholds {
    pub confirmed_min_score: Decimal,
    pub confirmed_min_margin: Decimal,
    pub probable_min_score: Decimal,
    pub probable_min_margin: Decimal,
}

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub system_id: String,
    pub canonical_spec_semver: String,
    pub determinism_mode: bool,
    pub config_path: String,
    pub config_sha256: String,
    pub score_transform: ScoreTransform,
    pub thresholds: Thresholds,
    pub signal_specs: BTreeMap<String, SignalSpec>,
    pub top_k: usize,
}

pub struct ClaimRecord {
    pub claim_id: String,
}

pub struct PolicyRecord {
    pub policy_id: String,
}

#[async_trait]
pub trait ClaimsAdapter: Send + Sync {
    async fn lookup_by_claim_number(&self, claim_number: &str) -> Option<ClaimRecord>;
}

#[async_trait]
pub trait PolicyAdapter: Send + Sync {
    async fn lookup_by_policy_number(&self, policy_number: &str) -> Option<PolicyRecord>;
}

#[async_trait]
pub trait CrmAdapter: Send + Sync {
    async fn policy_numbers_for_sender_email(&self, email: &str) -> Vec<String>;
}

const HIGH_RISK_MARKERS: &[&str] = &["ombudsmann", "anwalt", "frist"];

fn is_high_risk_unresolved(subject_c14n: &str, body_c14n: &str) -> bool {
    let text = format!("{subject_c14n}\n{body_c14n}");
    HIGH_RISK_MARKERS.iter().any(|m| text.contains(m))
}

struct Signal {
    name: String,
    weight: Decimal,
    strength: Decimal,
    value: Option<String>,
}

fn score_from_signals(transform: &ScoreTransform, specs: &[(Decimal, Decimal)]) -> Decimal {
    let mut raw = Decimal::ZERO;
    for (weight, strength) in specs {
        raw += weight * strength;
    }
    let mut score = transform.intercept + transform.slope * raw;
    if score < Decimal::ZERO {
        score = Decimal::ZERO;
    }
    if score > Decimal::ONE {
        score = Decimal::ONE;
    }
    score.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

struct Candidate {
    entity_type: &'static str,
    entity_id: String,
    score: Decimal,
    signals: Vec<Signal>,
    evidence: EvidenceRefOnly,
    has_hard: bool,
    has_medium: bool,
}

/// `{source, start, end, snippet_sha256}`: evidence for the decision
/// input deliberately excludes snippet text.
fn evidence_ref(hit: &IdentifierHit) -> EvidenceRefOnly {
    EvidenceRefOnly {
        source: hit.source,
        start: hit.start,
        end: hit.end,
        snippet_sha256: sha256_bytes(hit.snippet.as_bytes()),
    }
}

fn add_signal(
    config: &IdentityConfig,
    name: &str,
    value: Option<String>,
) -> Result<(Decimal, Decimal, Signal), IdentityError> {
    let spec = config
        .signal_specs
        .get(name)
        .ok_or_else(|| IdentityError::MissingSignalSpec(name.to_string()))?;
    Ok((
        spec.weight,
        spec.strength,
        Signal {
            name: name.to_string(),
            weight: spec.weight,
            strength: spec.strength,
            value,
        },
    ))
}

pub struct ResolveInput<'a> {
    pub message_id: Uuid,
    pub run_id: &'a str,
    pub message_fingerprint: &'a str,
    pub raw_mime_sha256: &'a str,
    pub subject_c14n: &'a str,
    pub body_c14n: &'a str,
    pub from_email: &'a str,
    pub attachment_texts_c14n: &'a [String],
}

pub struct IdentityResolver<'a> {
    pub config: &'a IdentityConfig,
    pub claims_adapter: &'a dyn ClaimsAdapter,
    pub policy_adapter: &'a dyn PolicyAdapter,
    pub crm_adapter: &'a dyn CrmAdapter,
}

impl<'a> IdentityResolver<'a> {
    pub async fn resolve(&self, input: ResolveInput<'_>) -> Result<IdentityResult, IdentityError> {
        let mut claim_hit = find_claim_number(input.subject_c14n, input.body_c14n);
        let mut policy_hit = find_policy_number(input.subject_c14n, input.body_c14n);

        if claim_hit.is_none() && policy_hit.is_none() {
            for text in input.attachment_texts_c14n {
                claim_hit = find_claim_number("", text);
                policy_hit = find_policy_number("", text);
                if claim_hit.is_some() || policy_hit.is_some() {
                    break;
                }
            }
        }

        let mut candidates: Vec<Candidate> = Vec::new();

        if let Some(ref hit) = claim_hit {
            if let Some(record) = self.claims_adapter.lookup_by_claim_number(&hit.value).await {
                let (w, s, signal) =
                    add_signal(self.config, "SIG_CLAIM_NUMBER_LOOKUP_MATCH", Some(record.claim_id.clone()))?;
                let score = score_from_signals(&self.config.score_transform, &[(w, s)]);
                candidates.push(Candidate {
                    entity_type: "CLAIM",
                    entity_id: record.claim_id,
                    score,
                    signals: vec![signal],
                    evidence: evidence_ref(hit),
                    has_hard: true,
                    has_medium: false,
                });
            }
        }

        if let Some(ref hit) = policy_hit {
            if let Some(record) = self.policy_adapter.lookup_by_policy_number(&hit.value).await {
                let (w, s, signal) =
                    add_signal(self.config, "SIG_POLICY_NUMBER_LOOKUP_MATCH", Some(hit.value.clone()))?;
                let mut specs = vec![(w, s)];
                let mut signals = vec![signal];
                let mut has_medium = false;

                if !input.from_email.is_empty() {
                    let linked = self
                        .crm_adapter
                        .policy_numbers_for_sender_email(input.from_email)
                        .await;
                    if linked.iter().any(|p| p == &hit.value) {
                        let (w2, s2, signal2) =
                            add_signal(self.config, "SIG_SENDER_EMAIL_MATCH", Some(input.from_email.to_string()))?;
                        specs.push((w2, s2));
                        signals.push(signal2);
                        has_medium = true;
                    }
                }

                let score = score_from_signals(&self.config.score_transform, &specs);
                candidates.push(Candidate {
                    entity_type: "POLICY",
                    entity_id: record.policy_id,
                    score,
                    signals,
                    evidence: evidence_ref(hit),
                    has_hard: true,
                    has_medium,
                });
            }
        }

        candidates.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.entity_type.cmp(b.entity_type))
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });

        let thresholds = IdentityThresholds {
            confirmed_min_score: decimal_to_f64(self.config.thresholds.confirmed_min_score),
            confirmed_min_margin: decimal_to_f64(self.config.thresholds.confirmed_min_margin),
            probable_min_score: decimal_to_f64(self.config.thresholds.probable_min_score),
            probable_min_margin: decimal_to_f64(self.config.thresholds.probable_min_margin),
            top_k: self.config.top_k as u32,
        };

        let status;
        let mut selected_candidate = None;
        let mut top_k_out: Vec<RankedCandidate> = Vec::new();

        if candidates.is_empty() {
            status = if is_high_risk_unresolved(input.subject_c14n, input.body_c14n) {
                IdentityStatus::IdentityNeedsReview
            } else {
                IdentityStatus::IdentityNoCandidate
            };
        } else {
            let top_score = candidates[0].score;
            let second_score = candidates.get(1).map(|c| c.score).unwrap_or(Decimal::ZERO);
            let margin = top_score - second_score;
            let has_hard = candidates[0].has_hard;
            let has_medium = candidates[0].has_medium;

            if has_hard
                && top_score >= self.config.thresholds.confirmed_min_score
                && margin >= self.config.thresholds.confirmed_min_margin
            {
                status = IdentityStatus::IdentityConfirmed;
                selected_candidate = Some(SelectedCandidate {
                    entity_type: candidates[0].entity_type.to_string(),
                    entity_id: candidates[0].entity_id.clone(),
                    score: decimal_to_f64(top_score),
                });
            } else if has_medium
                && top_score >= self.config.thresholds.probable_min_score
                && margin >= self.config.thresholds.probable_min_margin
            {
                status = IdentityStatus::IdentityProbable;
                selected_candidate = Some(SelectedCandidate {
                    entity_type: candidates[0].entity_type.to_string(),
                    entity_id: candidates[0].entity_id.clone(),
                    score: decimal_to_f64(top_score),
                });
            } else {
                status = IdentityStatus::IdentityNeedsReview;
            }

            for (idx, cand) in candidates.iter().take(self.config.top_k).enumerate() {
                top_k_out.push(RankedCandidate {
                    rank: (idx + 1) as u32,
                    entity_type: cand.entity_type.to_string(),
                    entity_id: cand.entity_id.clone(),
                    score: decimal_to_f64(cand.score),
                    signals: cand.signals.iter().map(|s| s.name.clone()).collect(),
                    evidence: vec![cand.evidence.clone()],
                });
            }
        }

        let decision_input = build_decision_input(self.config, &input, &status, &selected_candidate, &top_k_out, &thresholds);
        let hash = decision_hash(&decision_input)?;

        let mut request_info_draft_uri = None;
        if matches!(
            status,
            IdentityStatus::IdentityNoCandidate | IdentityStatus::IdentityNeedsReview
        ) {
            // The request-for-info draft itself is produced by the case/
            // HITL layer from a language template; the identity stage
            // only records that one is required.
            request_info_draft_uri = Some(String::new());
        }

        Ok(IdentityResult {
            schema_id: urn::IDENTITY_RESULT.to_string(),
            schema_version: urn::version_of(urn::IDENTITY_RESULT).to_string(),
            message_id: input.message_id,
            run_id: input.run_id.to_string(),
            status,
            selected_candidate,
            top_k: top_k_out,
            thresholds,
            request_info_draft_uri,
            decision_hash: hash,
        })
    }
}

fn decimal_to_f64(d: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    d.to_f64().unwrap_or(0.0)
}

#[derive(serde::Serialize)]
struct DecisionInput {
    system_id: String,
    canonical_spec_semver: String,
    stage: &'static str,
    message_fingerprint: String,
    raw_mime_sha256: String,
    config_ref: DecisionConfigRef,
    determinism_mode: bool,
    decision: DecisionBody,
}

#[derive(serde::Serialize)]
struct DecisionConfigRef {
    config_path: String,
    config_sha256: String,
}

#[derive(serde::Serialize)]
struct DecisionBody {
    status: IdentityStatus,
    selected: Option<SelectedCandidate>,
    top_k: Vec<RankedCandidate>,
    thresholds: IdentityThresholds,
}

fn build_decision_input(
    config: &IdentityConfig,
    input: &ResolveInput,
    status: &IdentityStatus,
    selected: &Option<SelectedCandidate>,
    top_k: &[RankedCandidate],
    thresholds: &IdentityThresholds,
) -> DecisionInput {
    DecisionInput {
        system_id: config.system_id.clone(),
        canonical_spec_semver: config.canonical_spec_semver.clone(),
        stage: "IDENTITY",
        message_fingerprint: input.message_fingerprint.to_string(),
        raw_mime_sha256: input.raw_mime_sha256.to_string(),
        config_ref: DecisionConfigRef {
            config_path: config.config_path.clone(),
            config_sha256: config.config_sha256.clone(),
        },
        determinism_mode: config.determinism_mode,
        decision: DecisionBody {
            status: *status,
            selected: selected.clone(),
            top_k: top_k.to_vec(),
            thresholds: thresholds.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_number_found_in_subject_uppercased() {
        let hit = find_claim_number("re: clm-2024-0099 update", "").unwrap();
        assert_eq!(hit.value, "CLM-2024-0099");
        assert_eq!(hit.source, EvidenceSource::SubjectC14n);
    }

    #[test]
    fn policy_number_prefers_body_location_when_duplicated() {
        let hit = find_policy_number("re: 12-3456789", "policy 12-3456789 confirmed").unwrap();
        assert_eq!(hit.source, EvidenceSource::BodyC14n);
    }

    #[test]
    fn score_rounds_half_up_to_two_places() {
        let transform = ScoreTransform {
            intercept: Decimal::new(0, 0),
            slope: Decimal::ONE,
        };
        let score = score_from_signals(&transform, &[(Decimal::new(5, 1), Decimal::new(125, 2))]);
        // 0.5 * 1.25 = 0.625 -> half-up to 0.63
        assert_eq!(score, Decimal::new(63, 2));
    }

    #[test]
    fn high_risk_substrings_trigger_needs_review_without_candidates() {
        assert!(is_high_risk_unresolved("", "bitte ombudsmann einschalten"));
        assert!(!is_high_risk_unresolved("", "alles gut"));
    }
}
