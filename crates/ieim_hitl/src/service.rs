use std::path::PathBuf;

use thiserror::Error;

use ieim_audit::{append_event, audit_file_path, AuditLogError};
use ieim_common::sha256_bytes;
use ieim_schema::{ActorKind, ActorType, ArtifactRef, AuditEvent, CorrectionRecord, Stage};

use crate::correction::{CorrectionError, FileCorrectionStore};

#[derive(Debug, Error)]
pub enum HitlServiceError {
    #[error(transparent)]
    Correction(#[from] CorrectionError),
    #[error(transparent)]
    Audit(#[from] AuditLogError),
}

/// Writes a correction record and, if an audit root is configured,
/// appends the matching `HITL` audit event. Mirrors the two-step
/// write-then-append sequence every other stage follows: the record on
/// disk is authoritative, the audit entry is a record of the act of
/// writing it.
pub struct HitlService {
    hitl_dir: PathBuf,
    audit_root: Option<PathBuf>,
}

impl HitlService {
    pub fn new(hitl_dir: impl Into<PathBuf>, audit_root: Option<PathBuf>) -> Self {
        Self { hitl_dir: hitl_dir.into(), audit_root }
    }

    pub fn submit_correction(
        &self,
        record: &CorrectionRecord,
        input_ref: ArtifactRef,
        created_at: &str,
    ) -> Result<PathBuf, HitlServiceError> {
        let store = FileCorrectionStore::new(&self.hitl_dir);
        let path = store.write(record)?;

        if let Some(audit_root) = &self.audit_root {
            let out_bytes = std::fs::read(&path).map_err(|source| AuditLogError::Io { path: path.clone(), source })?;
            let output_ref = ArtifactRef {
                schema_id: record.schema_id.clone(),
                uri: path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string(),
                sha256: sha256_bytes(&out_bytes),
            };
            let actor_type = match record.actor_type {
                ActorKind::Human => ActorType::Human,
                ActorKind::System => ActorType::System,
            };
            let event = AuditEvent {
                schema_id: ieim_schema::urn::AUDIT_EVENT.to_string(),
                schema_version: "1.0.0".to_string(),
                audit_event_id: AuditEvent::derive_id(record.message_id, &record.run_id, Stage::Hitl, &output_ref.sha256),
                message_id: record.message_id,
                run_id: record.run_id.clone(),
                stage: Stage::Hitl,
                actor_type,
                actor_id: record.actor_id.clone(),
                created_at: created_at.to_string(),
                input_ref,
                output_ref,
                decision_hash: None,
                config_ref: None,
                rules_ref: None,
                model_info: None,
                evidence: vec![],
                prev_event_hash: String::new(),
                event_hash: String::new(),
            };
            let audit_path = audit_file_path(audit_root, record.message_id, &record.run_id);
            append_event(&audit_path, event)?;
        }

        Ok(path)
    }
}
