use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use ieim_common::{canonical_json_bytes, sha256_bytes, CanonError};
use ieim_schema::{ActorKind, ArtifactRef, Correction, CorrectionRecord};

#[derive(Debug, Error)]
pub enum CorrectionError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("canonicalization failed: {0}")]
    Canon(#[from] CanonError),
    #[error("correction record already exists at a different path than expected")]
    PathMismatch,
    #[error("immutability violation: correction record exists with different content")]
    ImmutabilityViolation,
}

pub struct BuildCorrectionInput<'a> {
    pub message_id: Uuid,
    pub run_id: &'a str,
    pub review_item_id: Option<Uuid>,
    pub actor_type: ActorKind,
    pub actor_id: Option<&'a str>,
    pub created_at: &'a str,
    pub note: Option<&'a str>,
    pub artifact_refs: Vec<ArtifactRef>,
    pub corrections: Vec<Correction>,
}

/// Derives `correction_id` from every field that distinguishes this
/// correction from any other submitted for the same review item,
/// including a hash of the correction ops themselves, so two distinct
/// submissions never collide and a byte-identical resubmission always
/// derives the same id.
fn derive_correction_id(input: &BuildCorrectionInput, created_at: &str, corrections_sha256: &str) -> Uuid {
    let name = format!(
        "correction:{}:{}:{}:{:?}:{}:{}:{}",
        input.message_id,
        input.run_id,
        input.review_item_id.map(|u| u.to_string()).unwrap_or_default(),
        input.actor_type,
        input.actor_id.unwrap_or_default(),
        created_at,
        corrections_sha256,
    );
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
}

pub fn build_correction_record(input: BuildCorrectionInput) -> Result<CorrectionRecord, CanonError> {
    let corrections_bytes = canonical_json_bytes(&input.corrections)?;
    let corrections_sha256 = sha256_bytes(&corrections_bytes);
    let correction_id = derive_correction_id(&input, input.created_at, &corrections_sha256);

    Ok(CorrectionRecord {
        schema_id: ieim_schema::urn::CORRECTION_RECORD.to_string(),
        schema_version: "1.0.0".to_string(),
        correction_id,
        review_item_id: input.review_item_id.unwrap_or(Uuid::nil()),
        message_id: input.message_id,
        run_id: input.run_id.to_string(),
        actor_type: input.actor_type,
        actor_id: input.actor_id.map(str::to_string),
        created_at: input.created_at.to_string(),
        note: input.note.map(str::to_string),
        artifact_refs: input.artifact_refs,
        corrections: input.corrections,
    })
}

/// Corrections on disk at `<base_dir>/corrections/<message_id>/<run_id>/<correction_id>.correction.json`.
/// Unlike review items, a correction write never silently accepts a
/// pre-existing file: a correction is a human decision, and two
/// submissions landing on the same id is either a client-side retry
/// (content matches, return the path) or a conflict that must fail
/// closed.
pub struct FileCorrectionStore {
    base_dir: PathBuf,
}

impl FileCorrectionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    pub fn path_for(&self, record: &CorrectionRecord) -> PathBuf {
        self.base_dir
            .join("corrections")
            .join(record.message_id.to_string())
            .join(&record.run_id)
            .join(format!("{}.correction.json", record.correction_id))
    }

    pub fn write(&self, record: &CorrectionRecord) -> Result<PathBuf, CorrectionError> {
        let path = self.path_for(record);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CorrectionError::Io { path: parent.to_path_buf(), source })?;
        }

        let mut out_bytes = serde_json::to_vec_pretty(record)?;
        out_bytes.push(b'\n');
        let incoming_sha = sha256_bytes(&out_bytes);

        if path.exists() {
            let existing = std::fs::read(&path).map_err(|source| CorrectionError::Io { path: path.clone(), source })?;
            if sha256_bytes(&existing) != incoming_sha {
                return Err(CorrectionError::ImmutabilityViolation);
            }
            return Ok(path);
        }

        let tmp = path.with_extension("correction.json.tmp");
        std::fs::write(&tmp, &out_bytes).map_err(|source| CorrectionError::Io { path: tmp.clone(), source })?;
        std::fs::rename(&tmp, &path).map_err(|source| CorrectionError::Io { path: path.clone(), source })?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ieim_schema::PatchOp;
    use tempfile::tempdir;

    fn sample_input() -> BuildCorrectionInput<'static> {
        BuildCorrectionInput {
            message_id: Uuid::nil(),
            run_id: "run-1",
            review_item_id: Some(Uuid::nil()),
            actor_type: ActorKind::Human,
            actor_id: Some("reviewer-1"),
            created_at: "2026-01-01T00:00:00Z",
            note: Some("wrong intent"),
            artifact_refs: vec![],
            corrections: vec![Correction {
                target_stage: ieim_schema::Stage::Classify,
                ops: vec![PatchOp::Replace { path: "/primary_intent/label".into(), value: serde_json::json!("INTENT_BILLING_QUESTION") }],
                justification: "customer asked about an invoice".into(),
                evidence: vec![],
            }],
        }
    }

    #[test]
    fn same_inputs_derive_the_same_correction_id() {
        let a = build_correction_record(sample_input()).unwrap();
        let b = build_correction_record(sample_input()).unwrap();
        assert_eq!(a.correction_id, b.correction_id);
    }

    #[test]
    fn write_is_replay_safe_on_identical_content() {
        let dir = tempdir().unwrap();
        let store = FileCorrectionStore::new(dir.path());
        let record = build_correction_record(sample_input()).unwrap();
        let p1 = store.write(&record).unwrap();
        let p2 = store.write(&record).unwrap();
        assert_eq!(p1, p2);
    }
}
