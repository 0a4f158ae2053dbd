//! Builds the `IdentityConfig` the resolver needs. There is no YAML
//! schema for it yet, so the weights, thresholds, and score transform
//! below are the CLI's own defaults rather than something loaded from
//! the pack config file.

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::Decimal;

use ieim_common::config::Config;
use ieim_identity::{IdentityConfig, ScoreTransform, SignalSpec, Thresholds};

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).expect("literal decimal constant")
}

pub fn build_identity_config(config: &Config) -> IdentityConfig {
    let config_ref = config.config_ref();

    let mut signal_specs = BTreeMap::new();
    signal_specs.insert(
        "SIG_CLAIM_NUMBER_LOOKUP_MATCH".to_string(),
        SignalSpec { weight: dec("1.0"), strength: dec("1.0") },
    );
    signal_specs.insert(
        "SIG_POLICY_NUMBER_LOOKUP_MATCH".to_string(),
        SignalSpec { weight: dec("0.7"), strength: dec("1.0") },
    );
    signal_specs.insert(
        "SIG_SENDER_EMAIL_MATCH".to_string(),
        SignalSpec { weight: dec("0.3"), strength: dec("1.0") },
    );

    IdentityConfig {
        system_id: config.pack.system_id.clone(),
        canonical_spec_semver: config.pack.canonical_spec_semver.clone(),
        determinism_mode: config.runtime.determinism_mode,
        config_path: config_ref.path,
        config_sha256: config_ref.sha256,
        score_transform: ScoreTransform { intercept: dec("0.0"), slope: dec("1.0") },
        thresholds: Thresholds {
            confirmed_min_score: dec("0.90"),
            confirmed_min_margin: dec("0.15"),
            probable_min_score: dec("0.60"),
            probable_min_margin: dec("0.10"),
        },
        signal_specs,
        top_k: 5,
    }
}
