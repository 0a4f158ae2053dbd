//! ieim_audit
//!
//! Append-only, hash-chained audit log: one JSONL file per
//! `(message_id, run_id)` at `audit/<message_id>/<run_id>.jsonl`. Each line
//! is a single `AuditEvent`, self-describing and carrying its own
//! `prev_event_hash`/`event_hash`; `event_hash = sha256(jcs(event without
//! event_hash))`.
//!
//! A per-file exclusive lock is held across the read-last-line-then-append
//! sequence because multiple processes (ingest runner, stage workers, API
//! server) may append to different files concurrently, and a single file
//! must never be appended by two processes at once. `fs2::FileExt` provides
//! the advisory lock.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;
use thiserror::Error;

use ieim_common::{genesis_hash, sha256_canonical_json, CanonError};
use ieim_schema::AuditEvent;

#[derive(Debug, Error)]
pub enum AuditLogError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("canonical json error: {0}")]
    Canon(#[from] CanonError),
    #[error("audit chain broken at line {line}: expected prev_event_hash {expected}, got {got}")]
    ChainBroken {
        line: usize,
        expected: String,
        got: String,
    },
    #[error("audit chain broken at line {line}: event_hash mismatch (expected {expected}, got {got})")]
    HashMismatch {
        line: usize,
        expected: String,
        got: String,
    },
    #[error("message_id/run_id in event at line {line} does not match file path")]
    PathMismatch { line: usize },
}

/// `sha256(jcs(event without event_hash))`. `event.event_hash` may hold any
/// placeholder value; it is stripped from the payload before hashing.
pub fn compute_event_hash(event: &AuditEvent) -> Result<String, AuditLogError> {
    let mut value = serde_json::to_value(event)?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("event_hash");
    }
    Ok(sha256_canonical_json(&value)?)
}

/// `audit/<message_id>/<run_id>.jsonl` under a pack root.
pub fn audit_file_path(pack_root: &Path, message_id: uuid::Uuid, run_id: &str) -> PathBuf {
    pack_root
        .join("audit")
        .join(message_id.to_string())
        .join(format!("{run_id}.jsonl"))
}

/// Opens (creating if absent) the audit file for a `(message_id, run_id)`,
/// sets `event.prev_event_hash`/`event.event_hash`, and appends it as one
/// JSON line, holding an exclusive advisory lock across the
/// read-last-line-then-append sequence.
pub fn append_event(path: &Path, mut event: AuditEvent) -> Result<AuditEvent, AuditLogError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| AuditLogError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|source| AuditLogError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    file.lock_exclusive().map_err(|source| AuditLogError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let result = (|| {
        event.prev_event_hash = last_event_hash(&mut file, path)?;
        event.event_hash = compute_event_hash(&event)?;
        let line = serde_json::to_string(&event)?;
        file.write_all(line.as_bytes()).map_err(|source| AuditLogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        file.write_all(b"\n").map_err(|source| AuditLogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        file.flush().map_err(|source| AuditLogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(event)
    })();

    let _ = FileExt::unlock(&file);
    result
}

fn last_event_hash(file: &mut File, path: &Path) -> Result<String, AuditLogError> {
    file.seek(SeekFrom::Start(0)).map_err(|source| AuditLogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(&*file);
    let mut last = genesis_hash();
    for line in reader.lines() {
        let line = line.map_err(|source| AuditLogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let event: AuditEvent = serde_json::from_str(&line)?;
        last = event.event_hash;
    }
    Ok(last)
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub lines_checked: usize,
    pub final_hash: String,
}

/// Validates chain continuity and event_hash correctness for every line,
/// and that `message_id`/`run_id` in each event matches the file path.
/// Returns the precise offending line on the first mismatch.
pub fn verify_log(path: &Path) -> Result<VerifyReport, AuditLogError> {
    let message_id: Option<uuid::Uuid> = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .and_then(|s| uuid::Uuid::parse_str(s).ok());
    let run_id = path
        .file_stem()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string());

    let f = File::open(path).map_err(|source| AuditLogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(f);
    let mut expected_prev = genesis_hash();
    let mut lines_checked = 0usize;

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|source| AuditLogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let event: AuditEvent = serde_json::from_str(&line)?;

        if let Some(mid) = message_id {
            if event.message_id != mid {
                return Err(AuditLogError::PathMismatch { line: line_no });
            }
        }
        if let Some(ref rid) = run_id {
            if &event.run_id != rid {
                return Err(AuditLogError::PathMismatch { line: line_no });
            }
        }

        if event.prev_event_hash != expected_prev {
            return Err(AuditLogError::ChainBroken {
                line: line_no,
                expected: expected_prev,
                got: event.prev_event_hash,
            });
        }
        let computed = compute_event_hash(&event)?;
        if computed != event.event_hash {
            return Err(AuditLogError::HashMismatch {
                line: line_no,
                expected: computed,
                got: event.event_hash,
            });
        }
        expected_prev = event.event_hash;
        lines_checked += 1;
    }

    Ok(VerifyReport {
        lines_checked,
        final_hash: expected_prev,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ieim_schema::{ActorType, ArtifactRef, Stage};
    use tempfile::tempdir;

    fn sample_event(message_id: uuid::Uuid, run_id: &str, stage: Stage) -> AuditEvent {
        let output_ref = ArtifactRef {
            schema_id: "urn:ieim:schema:x:1.0.0".into(),
            uri: "x.json".into(),
            sha256: "sha256:aa".into(),
        };
        AuditEvent {
            schema_id: "urn:ieim:schema:audit_event:1.0.0".into(),
            schema_version: "1.0.0".into(),
            audit_event_id: AuditEvent::derive_id(message_id, run_id, stage, &output_ref.sha256),
            message_id,
            run_id: run_id.to_string(),
            stage,
            actor_type: ActorType::System,
            actor_id: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            input_ref: output_ref.clone(),
            output_ref,
            decision_hash: None,
            config_ref: None,
            rules_ref: None,
            model_info: None,
            evidence: vec![],
            prev_event_hash: String::new(),
            event_hash: String::new(),
        }
    }

    #[test]
    fn hash_chain_verifies_and_links() {
        let dir = tempdir().unwrap();
        let message_id = uuid::Uuid::new_v4();
        let path = audit_file_path(dir.path(), message_id, "run-1");

        let rec1 = append_event(&path, sample_event(message_id, "run-1", Stage::Ingest)).unwrap();
        assert_eq!(rec1.prev_event_hash, genesis_hash());

        let rec2 = append_event(&path, sample_event(message_id, "run-1", Stage::Normalize)).unwrap();
        assert_eq!(rec2.prev_event_hash, rec1.event_hash);

        let report = verify_log(&path).unwrap();
        assert_eq!(report.lines_checked, 2);
        assert_eq!(report.final_hash, rec2.event_hash);
    }

    #[test]
    fn tampering_with_a_line_breaks_verification() {
        let dir = tempdir().unwrap();
        let message_id = uuid::Uuid::new_v4();
        let path = audit_file_path(dir.path(), message_id, "run-1");
        append_event(&path, sample_event(message_id, "run-1", Stage::Ingest)).unwrap();

        let mut contents = std::fs::read_to_string(&path).unwrap();
        contents = contents.replace("INGEST", "NORMALIZE");
        std::fs::write(&path, contents).unwrap();

        let err = verify_log(&path).unwrap_err();
        assert!(matches!(err, AuditLogError::HashMismatch { .. }));
    }
}
