//! Schema URNs, stable across runs: `urn:ieim:schema:<name>:<semver>`.

pub const NORMALIZED_MESSAGE: &str = "urn:ieim:schema:normalized_message:1.0.0";
pub const ATTACHMENT_ARTIFACT: &str = "urn:ieim:schema:attachment_artifact:1.0.0";
pub const IDENTITY_RESULT: &str = "urn:ieim:schema:identity_result:1.0.0";
pub const CLASSIFICATION_RESULT: &str = "urn:ieim:schema:classification_result:1.0.0";
pub const EXTRACTION_RESULT: &str = "urn:ieim:schema:extraction_result:1.0.0";
pub const ROUTING_DECISION: &str = "urn:ieim:schema:routing_decision:1.0.0";
pub const AUDIT_EVENT: &str = "urn:ieim:schema:audit_event:1.0.0";
pub const REVIEW_ITEM: &str = "urn:ieim:schema:review_item:1.0.0";
pub const CORRECTION_RECORD: &str = "urn:ieim:schema:correction_record:1.0.0";

/// Splits the semver suffix off a schema URN, used when deriving
/// `schema_version` from `$id`.
pub fn version_of(schema_id: &str) -> &str {
    schema_id.rsplit(':').next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_of_splits_trailing_semver() {
        assert_eq!(version_of(NORMALIZED_MESSAGE), "1.0.0");
    }
}
