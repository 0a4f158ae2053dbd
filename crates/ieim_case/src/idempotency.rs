use sha2::{Digest, Sha256};

/// Stable idempotency key derived from routing context, with no timestamp
/// component so retries of the same decision hit the same key.
pub fn build_idempotency_key(message_fingerprint: &str, rule_id: &str, rule_version: &str, operation: &str) -> String {
    let raw = format!("{message_fingerprint}|{rule_id}|{rule_version}|{operation}");
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("idem:{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_for_identical_inputs() {
        let a = build_idempotency_key("fp1", "RULE_X", "1.0.0", "CREATE_CASE");
        let b = build_idempotency_key("fp1", "RULE_X", "1.0.0", "CREATE_CASE");
        assert_eq!(a, b);
        assert!(a.starts_with("idem:"));
    }

    #[test]
    fn key_changes_with_operation() {
        let a = build_idempotency_key("fp1", "RULE_X", "1.0.0", "CREATE_CASE");
        let b = build_idempotency_key("fp1", "RULE_X", "1.0.0", "ATTACH_ORIGINAL_EMAIL");
        assert_ne!(a, b);
    }
}
