//! JSON-Schema contracts an LLM response must satisfy before any of its
//! fields are trusted. A response that fails validation is treated
//! exactly like a provider transport failure: the caller falls back to
//! the deterministic result.

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("schema did not compile: {0}")]
    SchemaCompile(String),
    #[error("response failed contract validation: {0}")]
    Invalid(String),
}

pub struct Contract {
    compiled: JSONSchema,
}

impl Contract {
    pub fn compile(schema: &Value) -> Result<Self, ContractError> {
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft202012)
            .compile(schema)
            .map_err(|e| ContractError::SchemaCompile(e.to_string()))?;
        Ok(Self { compiled })
    }

    pub fn validate(&self, instance: &Value) -> Result<(), ContractError> {
        if let Err(errors) = self.compiled.validate(instance) {
            let joined = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
            return Err(ContractError::Invalid(joined));
        }
        Ok(())
    }
}

/// Schema for the classification call: a primary intent label with a
/// confidence, an optional list of supporting risk-flag labels, and
/// evidence quotes the caller re-grounds against canonical text (see
/// `evidence::reground`). The model never supplies offsets directly.
pub fn classification_schema() -> Value {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "required": ["primary_intent", "primary_intent_confidence", "risk_flags", "evidence_quotes"],
        "additionalProperties": false,
        "properties": {
            "primary_intent": { "type": "string", "minLength": 1 },
            "primary_intent_confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
            "product_line": { "type": "string" },
            "urgency": { "type": "string" },
            "risk_flags": { "type": "array", "items": { "type": "string" } },
            "evidence_quotes": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["source", "quote"],
                    "additionalProperties": false,
                    "properties": {
                        "source": { "enum": ["SUBJECT_C14N", "BODY_C14N"] },
                        "quote": { "type": "string", "minLength": 1 }
                    }
                }
            }
        }
    })
}

/// Schema for the extraction call: a flat list of typed entities, each
/// carrying the literal substring of canonical text it was read from
/// rather than an offset, for the same re-grounding reason.
pub fn extraction_schema() -> Value {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "required": ["entities"],
        "additionalProperties": false,
        "properties": {
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["entity_type", "value", "quote", "source", "confidence"],
                    "additionalProperties": false,
                    "properties": {
                        "entity_type": { "type": "string", "minLength": 1 },
                        "value": { "type": "string", "minLength": 1 },
                        "quote": { "type": "string", "minLength": 1 },
                        "source": { "enum": ["SUBJECT_C14N", "BODY_C14N"] },
                        "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_schema_accepts_well_formed_response() {
        let contract = Contract::compile(&classification_schema()).unwrap();
        let instance = serde_json::json!({
            "primary_intent": "INTENT_BILLING_QUESTION",
            "primary_intent_confidence": 0.7,
            "risk_flags": [],
            "evidence_quotes": [{"source": "BODY_C14N", "quote": "rechnung"}]
        });
        assert!(contract.validate(&instance).is_ok());
    }

    #[test]
    fn classification_schema_rejects_missing_required_field() {
        let contract = Contract::compile(&classification_schema()).unwrap();
        let instance = serde_json::json!({
            "primary_intent_confidence": 0.7,
            "risk_flags": [],
            "evidence_quotes": []
        });
        assert!(contract.validate(&instance).is_err());
    }

    #[test]
    fn classification_schema_rejects_out_of_range_confidence() {
        let contract = Contract::compile(&classification_schema()).unwrap();
        let instance = serde_json::json!({
            "primary_intent": "INTENT_BILLING_QUESTION",
            "primary_intent_confidence": 1.4,
            "risk_flags": [],
            "evidence_quotes": []
        });
        assert!(contract.validate(&instance).is_err());
    }

    #[test]
    fn extraction_schema_rejects_unknown_property() {
        let contract = Contract::compile(&extraction_schema()).unwrap();
        let instance = serde_json::json!({
            "entities": [{
                "entity_type": "POLICY_NUMBER",
                "value": "12-3456789",
                "quote": "12-3456789",
                "source": "BODY_C14N",
                "confidence": 0.9,
                "unexpected": true
            }]
        });
        assert!(contract.validate(&instance).is_err());
    }
}
