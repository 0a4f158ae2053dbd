//! Ingest runner: one tick reads the cursor, asks the mail adapter for
//! new message refs, fetches and dedupes each, normalizes it, processes
//! its attachments, and persists the result with an audit trail. Cursor
//! and dedupe-set files are plain JSON updated via the same
//! tmp-then-rename idiom `ieim_store` uses for content-addressed
//! artifacts, just at a fixed path rather than a hashed one.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use ieim_attachments::{AttachmentError, AttachmentStage, AvScanner, OcrProcessor, SourceAttachment};
use ieim_audit::{append_event, audit_file_path, AuditLogError};
use ieim_common::sha256_bytes;
use ieim_normalize::{build_normalized_message, BuildNormalizedMessageArgs, NormalizeError};
use ieim_schema::{ActorType, ArtifactRef, AttachmentArtifact, AuditEvent, NormalizedMessage, Stage};
use ieim_store::{write_json_artifact_once, RawStore, StoreError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("normalize error: {0}")]
    Normalize(#[from] NormalizeError),
    #[error("attachment error: {0}")]
    Attachment(#[from] AttachmentError),
    #[error("audit error: {0}")]
    Audit(#[from] AuditLogError),
    #[error("mail adapter error: {0}")]
    Adapter(String),
}

pub struct MailRef {
    pub ref_id: String,
}

pub struct FetchedMessage {
    pub raw_mime: Vec<u8>,
    pub received_at: String,
    pub attachments: Vec<SourceAttachment>,
}

/// External mailbox transport. No policy, no dedupe, no persistence:
/// the runner owns all of that.
#[async_trait]
pub trait MailAdapter: Send + Sync {
    async fn list_new(&self, limit: usize) -> Result<Vec<MailRef>, String>;
    async fn fetch(&self, mail_ref: &MailRef) -> Result<FetchedMessage, String>;
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
struct Cursor {
    last_ref_id: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
struct DedupeSet {
    seen_raw_mime_sha256: std::collections::BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct IngestedMessage {
    pub normalized: NormalizedMessage,
    pub attachments: Vec<AttachmentArtifact>,
}

#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub ingested: Vec<IngestedMessage>,
    pub skipped_duplicates: usize,
}

pub struct IngestRunner<'a> {
    pub pack_root: PathBuf,
    pub audit_root: PathBuf,
    pub store: &'a RawStore,
    pub av_scanner: &'a dyn AvScanner,
    pub ocr_processor: Option<&'a dyn OcrProcessor>,
    pub ingestion_source: &'a str,
}

impl<'a> IngestRunner<'a> {
    fn cursor_path(&self) -> PathBuf {
        self.pack_root.join("ingest_cursor.json")
    }

    fn dedupe_path(&self) -> PathBuf {
        self.pack_root.join("ingest_dedupe.json")
    }

    fn read_json_or_default<T: serde::de::DeserializeOwned + Default>(&self, path: &Path) -> Result<T, IngestError> {
        if !path.exists() {
            return Ok(T::default());
        }
        let bytes = std::fs::read(path).map_err(|source| IngestError::Io { path: path.to_path_buf(), source })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write_json_atomic<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<(), IngestError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| IngestError::Io { path: parent.to_path_buf(), source })?;
        }
        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &bytes).map_err(|source| IngestError::Io { path: tmp.clone(), source })?;
        std::fs::rename(&tmp, path).map_err(|source| IngestError::Io { path: path.to_path_buf(), source })?;
        Ok(())
    }

    /// Runs a single tick: up to `limit` new refs, each fully ingested
    /// or skipped as a duplicate, with the cursor persisted once at the
    /// end regardless of how many messages were processed.
    pub async fn tick(&self, adapter: &dyn MailAdapter, limit: usize, ingested_at: &str) -> Result<TickReport, IngestError> {
        let mut cursor: Cursor = self.read_json_or_default(&self.cursor_path())?;
        let mut dedupe: DedupeSet = self.read_json_or_default(&self.dedupe_path())?;

        let refs = adapter.list_new(limit).await.map_err(IngestError::Adapter)?;
        let mut report = TickReport::default();

        for mail_ref in &refs {
            let fetched = adapter.fetch(mail_ref).await.map_err(IngestError::Adapter)?;
            let raw_sha = sha256_bytes(&fetched.raw_mime);

            if dedupe.seen_raw_mime_sha256.contains(&raw_sha) {
                report.skipped_duplicates += 1;
                cursor.last_ref_id = Some(mail_ref.ref_id.clone());
                continue;
            }

            let ingested = self.ingest_one(&fetched, ingested_at).await?;
            dedupe.seen_raw_mime_sha256.insert(raw_sha);
            report.ingested.push(ingested);
            cursor.last_ref_id = Some(mail_ref.ref_id.clone());
        }

        self.write_json_atomic(&self.dedupe_path(), &dedupe)?;
        self.write_json_atomic(&self.cursor_path(), &cursor)?;
        Ok(report)
    }

    async fn ingest_one(&self, fetched: &FetchedMessage, ingested_at: &str) -> Result<IngestedMessage, IngestError> {
        let raw_ref = self.store.put("mime", &fetched.raw_mime, ".eml")?;
        let message_id = Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("message:{}", raw_ref.sha256).as_bytes());
        let run_id = Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("run:{}:{}", message_id, raw_ref.sha256).as_bytes()).to_string();

        let audit_path = audit_file_path(&self.audit_root, message_id, &run_id);
        let ingest_input_ref = ArtifactRef {
            schema_id: "urn:ieim:raw:mail_ref:1.0.0".to_string(),
            uri: raw_ref.uri.clone(),
            sha256: raw_ref.sha256.clone(),
        };
        let ingest_output_ref = ArtifactRef {
            schema_id: "urn:ieim:raw:mime:1.0.0".to_string(),
            uri: raw_ref.uri.clone(),
            sha256: raw_ref.sha256.clone(),
        };
        append_event(
            &audit_path,
            AuditEvent {
                schema_id: ieim_schema::urn::AUDIT_EVENT.to_string(),
                schema_version: "1.0.0".to_string(),
                audit_event_id: AuditEvent::derive_id(message_id, &run_id, Stage::Ingest, &raw_ref.sha256),
                message_id,
                run_id: run_id.clone(),
                stage: Stage::Ingest,
                actor_type: ActorType::Job,
                actor_id: None,
                created_at: ingested_at.to_string(),
                input_ref: ingest_input_ref,
                output_ref: ingest_output_ref,
                decision_hash: None,
                config_ref: None,
                rules_ref: None,
                model_info: None,
                evidence: vec![],
                prev_event_hash: String::new(),
                event_hash: String::new(),
            },
        )?;

        let mut attachment_ids = Vec::new();
        let mut attachment_artifacts = Vec::new();
        for source in &fetched.attachments {
            let source_attachment_id = source.source_attachment_id.clone();
            let stage = AttachmentStage { store: self.store, av_scanner: self.av_scanner, ocr_processor: self.ocr_processor };
            let processed = stage
                .process(
                    message_id,
                    SourceAttachment {
                        source_attachment_id: source.source_attachment_id.clone(),
                        filename: source.filename.clone(),
                        mime_type: source.mime_type.clone(),
                        bytes: source.bytes.clone(),
                    },
                )
                .await?;

            append_event(
                &audit_path,
                AuditEvent {
                    schema_id: ieim_schema::urn::AUDIT_EVENT.to_string(),
                    schema_version: "1.0.0".to_string(),
                    audit_event_id: AuditEvent::derive_id(message_id, &run_id, Stage::Attachments, &processed.artifact.sha256),
                    message_id,
                    run_id: run_id.clone(),
                    stage: Stage::Attachments,
                    actor_type: ActorType::Job,
                    actor_id: None,
                    created_at: ingested_at.to_string(),
                    input_ref: ArtifactRef {
                        schema_id: "urn:ieim:raw:source_attachment:1.0.0".to_string(),
                        uri: source_attachment_id,
                        sha256: processed.raw_ref.sha256.clone(),
                    },
                    output_ref: ArtifactRef {
                        schema_id: ieim_schema::urn::ATTACHMENT_ARTIFACT.to_string(),
                        uri: processed.attachment_id.clone(),
                        sha256: processed.artifact.sha256.clone(),
                    },
                    decision_hash: None,
                    config_ref: None,
                    rules_ref: None,
                    model_info: None,
                    evidence: vec![],
                    prev_event_hash: String::new(),
                    event_hash: String::new(),
                },
            )?;

            attachment_ids.push(processed.attachment_id);
            attachment_artifacts.push(processed.artifact);
        }

        let normalized = build_normalized_message(BuildNormalizedMessageArgs {
            raw_mime: &fetched.raw_mime,
            message_id,
            run_id: run_id.clone(),
            ingested_at: ingested_at.to_string(),
            received_at: fetched.received_at.clone(),
            ingestion_source: self.ingestion_source.to_string(),
            raw_mime_uri: raw_ref.uri.clone(),
            raw_mime_sha256: raw_ref.sha256.clone(),
            attachment_ids,
        })?;

        let normalized_path = self.pack_root.join("normalized").join(format!("{message_id}.json"));
        let normalized_sha = write_json_artifact_once(&normalized_path, &normalized)?;

        append_event(
            &audit_path,
            AuditEvent {
                schema_id: ieim_schema::urn::AUDIT_EVENT.to_string(),
                schema_version: "1.0.0".to_string(),
                audit_event_id: AuditEvent::derive_id(message_id, &run_id, Stage::Normalize, &normalized_sha),
                message_id,
                run_id: run_id.clone(),
                stage: Stage::Normalize,
                actor_type: ActorType::Job,
                actor_id: None,
                created_at: ingested_at.to_string(),
                input_ref: ArtifactRef {
                    schema_id: "urn:ieim:raw:mime:1.0.0".to_string(),
                    uri: raw_ref.uri,
                    sha256: raw_ref.sha256,
                },
                output_ref: ArtifactRef {
                    schema_id: ieim_schema::urn::NORMALIZED_MESSAGE.to_string(),
                    uri: normalized_path.to_string_lossy().to_string(),
                    sha256: normalized_sha,
                },
                decision_hash: None,
                config_ref: None,
                rules_ref: None,
                model_info: None,
                evidence: vec![],
                prev_event_hash: String::new(),
                event_hash: String::new(),
            },
        )?;

        Ok(IngestedMessage { normalized, attachments: attachment_artifacts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ieim_schema::AvStatus;
    use tempfile::tempdir;

    struct NullAvScanner;
    #[async_trait]
    impl AvScanner for NullAvScanner {
        async fn scan(&self, _bytes: &[u8], _filename: &str, _mime_type: &str) -> AvStatus {
            AvStatus::Clean
        }
    }

    struct SingleMessageAdapter {
        raw_mime: Vec<u8>,
    }

    #[async_trait]
    impl MailAdapter for SingleMessageAdapter {
        async fn list_new(&self, _limit: usize) -> Result<Vec<MailRef>, String> {
            Ok(vec![MailRef { ref_id: "ref-1".to_string() }])
        }

        async fn fetch(&self, _mail_ref: &MailRef) -> Result<FetchedMessage, String> {
            Ok(FetchedMessage {
                raw_mime: self.raw_mime.clone(),
                received_at: "2026-01-01T00:00:00Z".to_string(),
                attachments: vec![],
            })
        }
    }

    fn sample_eml() -> Vec<u8> {
        b"From: alice@example.com\r\nTo: intake@example.com\r\nSubject: schaden melden\r\n\r\nich bitte um eine schadenmeldung.\r\n".to_vec()
    }

    #[tokio::test]
    async fn second_tick_skips_the_same_message_as_a_duplicate() {
        let dir = tempdir().unwrap();
        let store = RawStore::new(dir.path());
        let av = NullAvScanner;
        let runner = IngestRunner {
            pack_root: dir.path().to_path_buf(),
            audit_root: dir.path().join("audit"),
            store: &store,
            av_scanner: &av,
            ocr_processor: None,
            ingestion_source: "test",
        };
        let adapter = SingleMessageAdapter { raw_mime: sample_eml() };

        let first = runner.tick(&adapter, 10, "2026-01-01T00:00:00Z").await.unwrap();
        assert_eq!(first.ingested.len(), 1);
        assert_eq!(first.skipped_duplicates, 0);

        let second = runner.tick(&adapter, 10, "2026-01-01T00:05:00Z").await.unwrap();
        assert_eq!(second.ingested.len(), 0);
        assert_eq!(second.skipped_duplicates, 1);
    }
}
