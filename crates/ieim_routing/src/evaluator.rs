use std::collections::BTreeSet;
use std::path::Path;

use thiserror::Error;
use uuid::Uuid;

use ieim_common::config::Config;
use ieim_common::{decision_hash, CanonError};
use ieim_schema::{urn, RoutingDecision};

use crate::ruleset::{load_routing_ruleset, RoutingRuleset, RuleThen, RulesetError};

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("ruleset error: {0}")]
    Ruleset(#[from] RulesetError),
    #[error("canonicalization failed: {0}")]
    Canon(#[from] CanonError),
}

pub struct RoutingContext {
    pub identity_status: String,
    pub primary_intent: String,
    pub product_line: String,
    pub urgency: String,
    pub risk_flags: BTreeSet<String>,
}

fn match_condition(cond: &serde_json::Value, ctx: &RoutingContext) -> bool {
    let obj = match cond.as_object() {
        Some(o) => o,
        None => return false,
    };

    if let Some(values) = obj.get("risk_flags_any").and_then(|v| v.as_array()) {
        let any_hit = values
            .iter()
            .filter_map(|v| v.as_str())
            .any(|v| ctx.risk_flags.contains(v));
        if !any_hit {
            return false;
        }
    }

    if let Some(values) = obj.get("risk_flags_not_any").and_then(|v| v.as_array()) {
        let any_hit = values
            .iter()
            .filter_map(|v| v.as_str())
            .any(|v| ctx.risk_flags.contains(v));
        if any_hit {
            return false;
        }
    }

    if let Some(values) = obj.get("primary_intent_in").and_then(|v| v.as_array()) {
        if !values.iter().filter_map(|v| v.as_str()).any(|v| v == ctx.primary_intent) {
            return false;
        }
    }

    if let Some(values) = obj.get("primary_intent_not_in").and_then(|v| v.as_array()) {
        if values.iter().filter_map(|v| v.as_str()).any(|v| v == ctx.primary_intent) {
            return false;
        }
    }

    if let Some(values) = obj.get("identity_status_in").and_then(|v| v.as_array()) {
        if !values.iter().filter_map(|v| v.as_str()).any(|v| v == ctx.identity_status) {
            return false;
        }
    }

    if let Some(values) = obj.get("product_line_in").and_then(|v| v.as_array()) {
        if !values.iter().filter_map(|v| v.as_str()).any(|v| v == ctx.product_line) {
            return false;
        }
    }

    if let Some(branches) = obj.get("any").and_then(|v| v.as_array()) {
        if !branches.iter().any(|b| match_condition(b, ctx)) {
            return false;
        }
    }

    if let Some(branches) = obj.get("all").and_then(|v| v.as_array()) {
        if !branches.iter().all(|b| match_condition(b, ctx)) {
            return false;
        }
    }

    true
}

fn sorted_rules(ruleset: &RoutingRuleset) -> Vec<&crate::ruleset::RoutingRule> {
    let mut rules: Vec<&crate::ruleset::RoutingRule> = ruleset.rules.iter().collect();
    rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    rules
}

#[derive(serde::Serialize)]
struct InputSummary {
    identity_status: String,
    primary_intent: String,
    product_line: String,
    urgency: String,
    risk_flags: Vec<String>,
}

#[derive(serde::Serialize)]
struct DecisionSummary {
    queue_id: String,
    sla_id: String,
    priority: i64,
    actions: Vec<String>,
    rule_id: String,
    fail_closed: bool,
    fail_closed_reason: Option<String>,
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
    rules_ref: RulesRefSummary,
    input: InputSummary,
    decision: DecisionSummary,
}

#[derive(serde::Serialize)]
struct RulesRefSummary {
    ruleset_path: String,
    ruleset_sha256: String,
    ruleset_version: String,
}

/// Evaluate the routing ruleset for a message, applying incident overrides
/// in a fixed order: force-review first, then block-case-create.
pub fn evaluate_routing(
    repo_root: &Path,
    config: &Config,
    message_id: Uuid,
    run_id: &str,
    message_fingerprint: &str,
    raw_mime_sha256: &str,
    ctx: RoutingContext,
) -> Result<RoutingDecision, RoutingError> {
    let ruleset = load_routing_ruleset(repo_root, &config.routing.ruleset_path)?;

    let matched = sorted_rules(&ruleset).into_iter().find(|r| match_condition(&r.when, &ctx));

    let (mut then, mut rule_id): (RuleThen, String) = match matched {
        Some(rule) => (rule.then.clone(), rule.rule_id.clone()),
        None => (ruleset.fallback.clone(), "ROUTE_FALLBACK".to_string()),
    };

    if config.incident.force_review {
        then = ruleset.fallback.clone();
        then.queue_id = config.incident.force_review_queue_id.clone().unwrap_or_default();
        then.fail_closed = true;
        then.fail_closed_reason = Some("INCIDENT_FORCE_REVIEW".to_string());
        then.actions = vec!["ATTACH_ORIGINAL_EMAIL".to_string()];
        rule_id = "INCIDENT_FORCE_REVIEW".to_string();
    }

    let mut actions = then.actions.clone();
    let mut fail_closed = then.fail_closed;
    let mut fail_closed_reason = then.fail_closed_reason.clone();

    let block_flags = &config.incident.block_case_create_risk_flags_any;
    if !block_flags.is_empty() && block_flags.iter().any(|f| ctx.risk_flags.contains(f)) {
        actions.retain(|a| a != "CREATE_CASE");
        if !actions.iter().any(|a| a == "BLOCK_CASE_CREATE") {
            actions.insert(0, "BLOCK_CASE_CREATE".to_string());
        }
        fail_closed = true;
        if fail_closed_reason.is_none() {
            fail_closed_reason = Some("INCIDENT_BLOCK_CASE_CREATE".to_string());
        }
    }

    let risk_flags_sorted: Vec<String> = ctx.risk_flags.iter().cloned().collect();

    let decision_input = DecisionInput {
        system_id: config.pack.system_id.clone(),
        canonical_spec_semver: config.pack.canonical_spec_semver.clone(),
        stage: "ROUTE",
        message_fingerprint: message_fingerprint.to_string(),
        raw_mime_sha256: raw_mime_sha256.to_string(),
        config_ref: config.config_ref(),
        determinism_mode: config.runtime.determinism_mode,
        rules_ref: RulesRefSummary {
            ruleset_path: ruleset.ruleset_path.clone(),
            ruleset_sha256: ruleset.ruleset_sha256.clone(),
            ruleset_version: ruleset.ruleset_version.clone(),
        },
        input: InputSummary {
            identity_status: ctx.identity_status.clone(),
            primary_intent: ctx.primary_intent.clone(),
            product_line: ctx.product_line.clone(),
            urgency: ctx.urgency.clone(),
            risk_flags: risk_flags_sorted,
        },
        decision: DecisionSummary {
            queue_id: then.queue_id.clone(),
            sla_id: then.sla_id.clone(),
            priority: then.priority,
            actions: actions.clone(),
            rule_id: rule_id.clone(),
            fail_closed,
            fail_closed_reason: fail_closed_reason.clone(),
        },
    };
    let hash = decision_hash(&decision_input)?;

    Ok(RoutingDecision {
        schema_id: urn::ROUTING_DECISION.to_string(),
        schema_version: urn::version_of(urn::ROUTING_DECISION).to_string(),
        message_id,
        run_id: run_id.to_string(),
        queue_id: then.queue_id,
        sla_id: then.sla_id,
        priority: then.priority,
        actions,
        rule_id,
        rule_version: ruleset.ruleset_version,
        fail_closed,
        fail_closed_reason,
        decision_hash: hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_case_create_strips_create_case_and_prepends_block() {
        let mut actions = vec!["CREATE_CASE".to_string(), "NOTIFY_QUEUE".to_string()];
        actions.retain(|a| a != "CREATE_CASE");
        actions.insert(0, "BLOCK_CASE_CREATE".to_string());
        assert_eq!(actions, vec!["BLOCK_CASE_CREATE".to_string(), "NOTIFY_QUEUE".to_string()]);
    }
}
