//! Whether an LLM stage is allowed to run at all. A `false` here means
//! the caller keeps whatever the deterministic stage already produced;
//! it never means "retry later".

use ieim_common::config::{ClassificationConfig, IncidentConfig};

/// LLM classification may run only when every one of these holds:
/// determinism mode is off, LLM is enabled in config, the incident
/// `disable_llm` toggle is off, the deterministic classifier raised no
/// risk flags, and its primary-intent confidence is below the
/// auto-accept threshold.
pub fn classification_should_use_llm(
    classification: &ClassificationConfig,
    incident: &IncidentConfig,
    determinism_mode: bool,
    deterministic_risk_flags_empty: bool,
    deterministic_primary_intent_confidence: f64,
) -> bool {
    !determinism_mode
        && classification.llm.enabled
        && !incident.disable_llm
        && deterministic_risk_flags_empty
        && deterministic_primary_intent_confidence < classification.min_confidence_for_auto
}

/// LLM extraction may run only after LLM classification actually ran
/// and the deterministic extractor found nothing. A message that
/// cleared classification deterministically never reaches the LLM for
/// extraction either, even if extraction alone came back empty.
pub fn extraction_should_use_llm(classification_used_llm: bool, deterministic_entities_empty: bool) -> bool {
    classification_used_llm && deterministic_entities_empty
}

#[cfg(test)]
mod tests {
    use super::*;
    use ieim_common::config::{LlmClassificationThresholds, LlmConfig, LlmExtractionThresholds, LlmThresholds};
    use std::collections::BTreeMap;

    fn classification_config(enabled: bool, min_confidence_for_auto: f64) -> ClassificationConfig {
        ClassificationConfig {
            min_confidence_for_auto,
            rules_version: "1.0.0".into(),
            llm: LlmConfig {
                enabled,
                provider: "test".into(),
                model_name: "test-model".into(),
                model_version: "1".into(),
                prompt_versions: BTreeMap::new(),
                token_budgets: BTreeMap::new(),
                max_calls_per_day: 100,
                thresholds: LlmThresholds {
                    classification: LlmClassificationThresholds {
                        primary_intent_min: 0.5,
                        product_line_min: 0.5,
                        urgency_min: 0.5,
                        risk_flag_min: 0.5,
                    },
                    extraction: LlmExtractionThresholds {
                        high_value_entity_min: 0.8,
                        other_entity_min: 0.5,
                        high_value_entity_types: vec![],
                    },
                },
            },
        }
    }

    fn incident(disable_llm: bool) -> IncidentConfig {
        IncidentConfig {
            force_review: false,
            force_review_queue_id: None,
            disable_llm,
            block_case_create_risk_flags_any: vec![],
        }
    }

    #[test]
    fn runs_when_confidence_is_low_and_no_risk_flags() {
        assert!(classification_should_use_llm(&classification_config(true, 0.8), &incident(false), false, true, 0.4));
    }

    #[test]
    fn blocked_by_determinism_mode() {
        assert!(!classification_should_use_llm(&classification_config(true, 0.8), &incident(false), true, true, 0.4));
    }

    #[test]
    fn blocked_by_disabled_llm_config() {
        assert!(!classification_should_use_llm(&classification_config(false, 0.8), &incident(false), false, true, 0.4));
    }

    #[test]
    fn blocked_by_incident_disable_llm() {
        assert!(!classification_should_use_llm(&classification_config(true, 0.8), &incident(true), false, true, 0.4));
    }

    #[test]
    fn blocked_by_existing_risk_flags() {
        assert!(!classification_should_use_llm(&classification_config(true, 0.8), &incident(false), false, false, 0.4));
    }

    #[test]
    fn blocked_by_confidence_already_above_threshold() {
        assert!(!classification_should_use_llm(&classification_config(true, 0.8), &incident(false), false, true, 0.95));
    }

    #[test]
    fn extraction_requires_llm_classification_and_empty_entities() {
        assert!(extraction_should_use_llm(true, true));
        assert!(!extraction_should_use_llm(false, true));
        assert!(!extraction_should_use_llm(true, false));
    }
}
