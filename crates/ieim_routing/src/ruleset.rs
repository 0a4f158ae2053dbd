use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use ieim_common::sha256_bytes;

#[derive(Debug, Error)]
pub enum RulesetError {
    #[error("failed to read ruleset file {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse ruleset json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid ruleset: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleThen {
    #[serde(default)]
    pub queue_id: String,
    #[serde(default)]
    pub sla_id: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub fail_closed: bool,
    #[serde(default)]
    pub fail_closed_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingRule {
    pub rule_id: String,
    pub priority: i64,
    pub when: serde_json::Value,
    pub then: RuleThen,
}

#[derive(Debug, Clone, Deserialize)]
struct RulesetDoc {
    ruleset_version: String,
    rules: Vec<RoutingRule>,
    fallback: RuleThen,
}

#[derive(Debug, Clone)]
pub struct RoutingRuleset {
    pub ruleset_path: String,
    pub ruleset_sha256: String,
    pub ruleset_version: String,
    pub rules: Vec<RoutingRule>,
    pub fallback: RuleThen,
}

const SUPPORTED_CONDITION_KEYS: &[&str] = &[
    "risk_flags_any",
    "risk_flags_not_any",
    "primary_intent_in",
    "primary_intent_not_in",
    "identity_status_in",
    "product_line_in",
    "any",
    "all",
];

fn validate_condition(cond: &serde_json::Value) -> Result<(), RulesetError> {
    let Some(obj) = cond.as_object() else {
        return Err(RulesetError::Invalid("rule.when must be an object".into()));
    };
    let unknown: BTreeSet<&str> = obj
        .keys()
        .map(|k| k.as_str())
        .filter(|k| !SUPPORTED_CONDITION_KEYS.contains(k))
        .collect();
    if !unknown.is_empty() {
        return Err(RulesetError::Invalid(format!("unsupported condition keys: {unknown:?}")));
    }
    if let Some(branches) = obj.get("any") {
        for b in branches.as_array().ok_or_else(|| RulesetError::Invalid("when.any must be a list".into()))? {
            validate_condition(b)?;
        }
    }
    if let Some(branches) = obj.get("all") {
        for b in branches.as_array().ok_or_else(|| RulesetError::Invalid("when.all must be a list".into()))? {
            validate_condition(b)?;
        }
    }
    Ok(())
}

/// Load and validate a routing ruleset from `<repo_root>/<ruleset_path>`.
/// Unknown condition operator keys fail the load closed rather than being
/// silently ignored.
pub fn load_routing_ruleset(repo_root: &Path, ruleset_path: &str) -> Result<RoutingRuleset, RulesetError> {
    let path = repo_root.join(ruleset_path);
    let bytes = std::fs::read(&path).map_err(|source| RulesetError::Io { path: path.clone(), source })?;
    let doc: RulesetDoc = serde_json::from_slice(&bytes)?;

    if doc.ruleset_version.is_empty() {
        return Err(RulesetError::Invalid("ruleset missing ruleset_version".into()));
    }
    for rule in &doc.rules {
        validate_condition(&rule.when)?;
    }

    Ok(RoutingRuleset {
        ruleset_path: ruleset_path.to_string(),
        ruleset_sha256: sha256_bytes(&bytes),
        ruleset_version: doc.ruleset_version,
        rules: doc.rules,
        fallback: doc.fallback,
    })
}
