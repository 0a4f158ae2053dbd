//! ieim_routing
//!
//! Loads a versioned routing ruleset and evaluates it against a message's
//! identity/classification outcome: closed operator set, priority-
//! descending first-match-wins, mandatory fallback, and two incident
//! overrides applied in a fixed order. Ported from the original
//! implementation's `route/ruleset.py` and `route/evaluator.py`.

pub mod evaluator;
pub mod ruleset;

pub use evaluator::{evaluate_routing, RoutingContext, RoutingError};
pub use ruleset::{load_routing_ruleset, RoutingRule, RoutingRuleset, RuleThen, RulesetError};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::io::Write;
    use uuid::Uuid;

    fn write_ruleset(dir: &std::path::Path, contents: &str) -> String {
        let path = dir.join("ruleset.json");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        "ruleset.json".to_string()
    }

    fn base_config(ruleset_path: String) -> ieim_common::config::Config {
        use ieim_common::config::*;
        Config {
            pack: PackConfig { system_id: "ieim".into(), canonical_spec_semver: "1.0.0".into() },
            runtime: RuntimeConfig { determinism_mode: true, supported_languages: vec!["en".into(), "de".into()] },
            pipeline: PipelineConfig { mode: PipelineMode::Baseline },
            classification: ClassificationConfig {
                min_confidence_for_auto: 0.8,
                rules_version: "1.0.0".into(),
                llm: LlmConfig {
                    enabled: false,
                    provider: "none".into(),
                    model_name: "none".into(),
                    model_version: "0".into(),
                    prompt_versions: Default::default(),
                    token_budgets: Default::default(),
                    max_calls_per_day: 1,
                    thresholds: LlmThresholds {
                        classification: LlmClassificationThresholds {
                            primary_intent_min: 0.0,
                            product_line_min: 0.0,
                            urgency_min: 0.0,
                            risk_flag_min: 0.0,
                        },
                        extraction: LlmExtractionThresholds {
                            high_value_entity_min: 0.0,
                            other_entity_min: 0.0,
                            high_value_entity_types: vec![],
                        },
                    },
                },
            },
            extraction: ExtractionConfig { iban_policy: IbanPolicy { enabled: false, store_mode: IbanStoreMode::Full } },
            routing: RoutingConfig { ruleset_path, ruleset_version: "1.0.0".into() },
            incident: IncidentConfig {
                force_review: false,
                force_review_queue_id: None,
                disable_llm: false,
                block_case_create_risk_flags_any: vec!["RISK_SECURITY_MALWARE".into()],
            },
            auth: AuthConfig {
                oidc: OidcConfig {
                    enabled: false,
                    issuer_url: None,
                    audience: None,
                    actor_id_claim: "sub".into(),
                    roles_claim: "roles".into(),
                    role_name_map: Default::default(),
                    accepted_algorithms: vec!["RS256".into()],
                    leeway_seconds: 30,
                    http_timeout_seconds: 5,
                    direct_grant: DirectGrantConfig { enabled: false },
                },
            },
            rbac: RbacConfig::default(),
            observability: ObservabilityConfig { metrics_enabled: false, tracing_enabled: false },
            retention: RetentionConfig { raw_days: 1, normalized_days: 1, audit_years: 1 },
            source_path: Default::default(),
            source_sha256: String::new(),
        }
    }

    const RULESET_JSON: &str = r#"{
        "ruleset_version": "1.0.0",
        "rules": [
            {
                "rule_id": "RULE_GDPR",
                "priority": 100,
                "when": {"primary_intent_in": ["INTENT_GDPR_REQUEST"]},
                "then": {"queue_id": "Q_PRIVACY", "sla_id": "SLA_24H", "priority": 5, "actions": ["CREATE_CASE"], "fail_closed": false}
            }
        ],
        "fallback": {"queue_id": "Q_GENERAL", "sla_id": "SLA_72H", "priority": 1, "actions": ["CREATE_CASE"], "fail_closed": false}
    }"#;

    #[test]
    fn matching_rule_wins_over_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let rel = write_ruleset(dir.path(), RULESET_JSON);
        let config = base_config(rel);
        let ctx = RoutingContext {
            identity_status: "IDENTITY_CONFIRMED".into(),
            primary_intent: "INTENT_GDPR_REQUEST".into(),
            product_line: "PROD_UNKNOWN".into(),
            urgency: "URG_NORMAL".into(),
            risk_flags: BTreeSet::new(),
        };
        let decision = evaluate_routing(dir.path(), &config, Uuid::nil(), "run-1", "fp", "sha256:aa", ctx).unwrap();
        assert_eq!(decision.queue_id, "Q_PRIVACY");
        assert_eq!(decision.rule_id, "RULE_GDPR");
    }

    #[test]
    fn block_case_create_risk_flag_overrides_after_match() {
        let dir = tempfile::tempdir().unwrap();
        let rel = write_ruleset(dir.path(), RULESET_JSON);
        let config = base_config(rel);
        let mut risk_flags = BTreeSet::new();
        risk_flags.insert("RISK_SECURITY_MALWARE".to_string());
        let ctx = RoutingContext {
            identity_status: "IDENTITY_NO_CANDIDATE".into(),
            primary_intent: "INTENT_GENERAL_INQUIRY".into(),
            product_line: "PROD_UNKNOWN".into(),
            urgency: "URG_NORMAL".into(),
            risk_flags,
        };
        let decision = evaluate_routing(dir.path(), &config, Uuid::nil(), "run-1", "fp", "sha256:aa", ctx).unwrap();
        assert_eq!(decision.queue_id, "Q_GENERAL");
        assert!(decision.actions.contains(&"BLOCK_CASE_CREATE".to_string()));
        assert!(!decision.actions.contains(&"CREATE_CASE".to_string()));
        assert!(decision.fail_closed);
        assert_eq!(decision.fail_closed_reason.as_deref(), Some("INCIDENT_BLOCK_CASE_CREATE"));
    }

    #[test]
    fn force_review_incident_overrides_matched_rule() {
        let dir = tempfile::tempdir().unwrap();
        let rel = write_ruleset(dir.path(), RULESET_JSON);
        let mut config = base_config(rel);
        config.incident.force_review = true;
        config.incident.force_review_queue_id = Some("Q_INCIDENT".into());
        let ctx = RoutingContext {
            identity_status: "IDENTITY_CONFIRMED".into(),
            primary_intent: "INTENT_GDPR_REQUEST".into(),
            product_line: "PROD_UNKNOWN".into(),
            urgency: "URG_NORMAL".into(),
            risk_flags: BTreeSet::new(),
        };
        let decision = evaluate_routing(dir.path(), &config, Uuid::nil(), "run-1", "fp", "sha256:aa", ctx).unwrap();
        assert_eq!(decision.queue_id, "Q_INCIDENT");
        assert_eq!(decision.rule_id, "INCIDENT_FORCE_REVIEW");
        assert_eq!(decision.actions, vec!["ATTACH_ORIGINAL_EMAIL".to_string()]);
    }
}
