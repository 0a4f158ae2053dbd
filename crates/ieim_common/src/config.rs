//! Strongly-typed process configuration, loaded once and threaded
//! explicitly through constructors (never a global).
//!
//! Mirrors a YAML document under `pack.*`/`runtime.*`/`pipeline.*`/...
//! sections.
//! `.env` overrides are discovered the same way the control CLI does it
//! (`<repo_root>/.env`, falling back to `./.env`), via `dotenvy`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sha256_bytes;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("config invalid: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackConfig {
    pub system_id: String,
    pub canonical_spec_semver: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub determinism_mode: bool,
    #[serde(default)]
    pub supported_languages: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineMode {
    Baseline,
    LlmFirst,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub mode: PipelineMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmClassificationThresholds {
    pub primary_intent_min: f64,
    pub product_line_min: f64,
    pub urgency_min: f64,
    pub risk_flag_min: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmExtractionThresholds {
    pub high_value_entity_min: f64,
    pub other_entity_min: f64,
    #[serde(default)]
    pub high_value_entity_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmThresholds {
    pub classification: LlmClassificationThresholds,
    pub extraction: LlmExtractionThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub enabled: bool,
    pub provider: String,
    pub model_name: String,
    pub model_version: String,
    #[serde(default)]
    pub prompt_versions: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub token_budgets: std::collections::BTreeMap<String, u32>,
    pub max_calls_per_day: u32,
    pub thresholds: LlmThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    pub min_confidence_for_auto: f64,
    pub rules_version: String,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IbanStoreMode {
    Full,
    HashOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IbanPolicy {
    pub enabled: bool,
    pub store_mode: IbanStoreMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub iban_policy: IbanPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub ruleset_path: String,
    pub ruleset_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentConfig {
    #[serde(default)]
    pub force_review: bool,
    #[serde(default)]
    pub force_review_queue_id: Option<String>,
    #[serde(default)]
    pub disable_llm: bool,
    #[serde(default)]
    pub block_case_create_risk_flags_any: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectGrantConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    pub enabled: bool,
    #[serde(default)]
    pub issuer_url: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default = "default_actor_id_claim")]
    pub actor_id_claim: String,
    #[serde(default = "default_roles_claim")]
    pub roles_claim: String,
    #[serde(default)]
    pub role_name_map: std::collections::BTreeMap<String, String>,
    #[serde(default = "default_accepted_algorithms")]
    pub accepted_algorithms: Vec<String>,
    #[serde(default = "default_leeway_seconds")]
    pub leeway_seconds: u64,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default)]
    pub direct_grant: DirectGrantConfig,
}

fn default_actor_id_claim() -> String {
    "sub".to_string()
}
fn default_roles_claim() -> String {
    "roles".to_string()
}
fn default_accepted_algorithms() -> Vec<String> {
    vec!["RS256".to_string()]
}
fn default_leeway_seconds() -> u64 {
    30
}
fn default_http_timeout_seconds() -> u64 {
    5
}

impl Default for DirectGrantConfig {
    fn default() -> Self {
        Self { enabled: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub oidc: OidcConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleCapabilities {
    #[serde(default)]
    pub can_view_raw: bool,
    #[serde(default)]
    pub can_view_audit: bool,
    #[serde(default)]
    pub can_approve_drafts: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RbacConfig {
    #[serde(default)]
    pub role_mappings: std::collections::BTreeMap<String, RoleCapabilities>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub metrics_enabled: bool,
    #[serde(default)]
    pub tracing_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub raw_days: u32,
    pub normalized_days: u32,
    pub audit_years: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub pack: PackConfig,
    pub runtime: RuntimeConfig,
    pub pipeline: PipelineConfig,
    pub classification: ClassificationConfig,
    pub extraction: ExtractionConfig,
    pub routing: RoutingConfig,
    pub incident: IncidentConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub rbac: RbacConfig,
    pub observability: ObservabilityConfig,
    pub retention: RetentionConfig,

    /// Populated by `load`, not present in the YAML document itself.
    #[serde(skip)]
    pub source_path: PathBuf,
    #[serde(skip)]
    pub source_sha256: String,
}

/// `{path, sha256}` reference included in every stage's decision-hash input.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigRef {
    pub path: String,
    pub sha256: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = serde_yaml::from_slice(&bytes)?;
        config.validate()?;
        config.source_path = path.to_path_buf();
        config.source_sha256 = sha256_bytes(&bytes);
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.pack.system_id.is_empty() {
            return Err(ConfigError::Invalid("pack.system_id must not be empty".into()));
        }
        if self.pack.canonical_spec_semver.is_empty() {
            return Err(ConfigError::Invalid(
                "pack.canonical_spec_semver must not be empty".into(),
            ));
        }
        if self.classification.llm.enabled && self.classification.llm.max_calls_per_day == 0 {
            return Err(ConfigError::Invalid(
                "classification.llm.max_calls_per_day must be > 0 when llm is enabled".into(),
            ));
        }
        Ok(())
    }

    pub fn config_ref(&self) -> ConfigRef {
        ConfigRef {
            path: self.source_path.to_string_lossy().into_owned(),
            sha256: self.source_sha256.clone(),
        }
    }
}

/// Loads `.env` overrides the way the CLI bootstrap does: try
/// `<repo_root>/.env`, then the process's current directory.
pub fn load_dotenv(repo_root: &Path) {
    let candidate = repo_root.join(".env");
    if candidate.is_file() {
        if dotenvy::from_path(&candidate).is_ok() {
            eprintln!("loaded environment overrides from {}", candidate.display());
            return;
        }
    }
    if dotenvy::dotenv().is_ok() {
        eprintln!("loaded environment overrides from ./.env");
    }
}
