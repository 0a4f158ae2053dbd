//! ieim_attachments
//!
//! For each source attachment: persist raw bytes, run AV scan, extract
//! text (direct decode for `text/*`, OCR for `image/*` when configured),
//! derive a stable `attachment_id`, and emit an immutable
//! `AttachmentArtifact`. The AV scanner and OCR processor are pluggable
//! `async_trait` interfaces for external backends.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use ieim_schema::{urn, AttachmentArtifact, AvStatus, OcrInfo};
use ieim_store::{RawStore, StoreError};

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("av scan failed: {0}")]
    AvFailed(String),
    #[error("source attachment fetch failed: {0}")]
    FetchFailed(String),
}

/// `scan(bytes, filename, mime) -> {CLEAN|INFECTED|SUSPICIOUS|FAILED}`.
#[async_trait]
pub trait AvScanner: Send + Sync {
    async fn scan(&self, bytes: &[u8], filename: &str, mime_type: &str) -> AvStatus;
}

/// `ocr(bytes, filename, mime) -> {text, confidence}?`. When a processor
/// runs but has no per-word confidence data, it defaults `confidence` to
/// `0.5`.
#[async_trait]
pub trait OcrProcessor: Send + Sync {
    async fn ocr(&self, bytes: &[u8], filename: &str, mime_type: &str) -> Option<OcrResult>;
}

pub struct OcrResult {
    pub text: String,
    pub confidence: Option<f64>,
}

pub const DEFAULT_OCR_CONFIDENCE: f64 = 0.5;

pub struct SourceAttachment {
    pub source_attachment_id: String,
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

pub struct ProcessedAttachment {
    pub attachment_id: String,
    pub raw_ref: ieim_store::PutResult,
    pub artifact: AttachmentArtifact,
}

fn derive_attachment_id(message_id: Uuid, source_attachment_id: &str, sha256: &str) -> String {
    if let Ok(uuid) = Uuid::parse_str(source_attachment_id) {
        return uuid.to_string();
    }
    let name = format!("att:{message_id}:{source_attachment_id}:{sha256}");
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

pub struct AttachmentStage<'a> {
    pub store: &'a RawStore,
    pub av_scanner: &'a dyn AvScanner,
    pub ocr_processor: Option<&'a dyn OcrProcessor>,
}

impl<'a> AttachmentStage<'a> {
    pub async fn process(
        &self,
        message_id: Uuid,
        source: SourceAttachment,
    ) -> Result<ProcessedAttachment, AttachmentError> {
        let raw_ref = self.store.put("attachments", &source.bytes, "")?;
        let attachment_id = derive_attachment_id(message_id, &source.source_attachment_id, &raw_ref.sha256);

        let av_status = self.av_scanner.scan(&source.bytes, &source.filename, &source.mime_type).await;

        let mut extracted_text_uri = None;
        let mut extracted_text_sha256 = None;
        let mut ocr = None;

        if av_status == AvStatus::Clean {
            if source.mime_type.starts_with("text/") {
                let text = String::from_utf8_lossy(&source.bytes).into_owned();
                let put = self.store.put("attachment_text", text.as_bytes(), ".txt")?;
                extracted_text_uri = Some(put.uri);
                extracted_text_sha256 = Some(put.sha256);
            } else if source.mime_type.starts_with("image/") {
                if let Some(processor) = self.ocr_processor {
                    if let Some(result) = processor.ocr(&source.bytes, &source.filename, &source.mime_type).await {
                        let put = self.store.put("attachment_text", result.text.as_bytes(), ".txt")?;
                        extracted_text_uri = Some(put.uri);
                        extracted_text_sha256 = Some(put.sha256);
                        ocr = Some(OcrInfo {
                            applied: true,
                            confidence: result.confidence.unwrap_or(DEFAULT_OCR_CONFIDENCE),
                        });
                    }
                }
            }
        }

        let artifact = AttachmentArtifact {
            schema_id: urn::ATTACHMENT_ARTIFACT.to_string(),
            schema_version: urn::version_of(urn::ATTACHMENT_ARTIFACT).to_string(),
            attachment_id: attachment_id.clone(),
            message_id,
            filename: source.filename,
            mime_type: source.mime_type,
            size: source.bytes.len() as u64,
            sha256: raw_ref.sha256.clone(),
            av_status,
            extracted_text_uri,
            extracted_text_sha256,
            ocr,
            doc_type_candidates: Vec::new(),
        };

        Ok(ProcessedAttachment {
            attachment_id,
            raw_ref,
            artifact,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct AlwaysClean;
    #[async_trait]
    impl AvScanner for AlwaysClean {
        async fn scan(&self, _bytes: &[u8], _filename: &str, _mime_type: &str) -> AvStatus {
            AvStatus::Clean
        }
    }

    struct AlwaysInfected;
    #[async_trait]
    impl AvScanner for AlwaysInfected {
        async fn scan(&self, _bytes: &[u8], _filename: &str, _mime_type: &str) -> AvStatus {
            AvStatus::Infected
        }
    }

    #[tokio::test]
    async fn clean_text_attachment_gets_extracted_text() {
        let dir = tempdir().unwrap();
        let store = RawStore::new(dir.path());
        let scanner = AlwaysClean;
        let stage = AttachmentStage {
            store: &store,
            av_scanner: &scanner,
            ocr_processor: None,
        };
        let processed = stage
            .process(
                Uuid::nil(),
                SourceAttachment {
                    source_attachment_id: "src-1".into(),
                    filename: "note.txt".into(),
                    mime_type: "text/plain".into(),
                    bytes: b"hello world".to_vec(),
                },
            )
            .await
            .unwrap();
        assert_eq!(processed.artifact.av_status, AvStatus::Clean);
        assert!(processed.artifact.extracted_text_uri.is_some());
    }

    #[tokio::test]
    async fn infected_attachment_has_no_extracted_text() {
        let dir = tempdir().unwrap();
        let store = RawStore::new(dir.path());
        let scanner = AlwaysInfected;
        let stage = AttachmentStage {
            store: &store,
            av_scanner: &scanner,
            ocr_processor: None,
        };
        let processed = stage
            .process(
                Uuid::nil(),
                SourceAttachment {
                    source_attachment_id: "src-1".into(),
                    filename: "note.txt".into(),
                    mime_type: "text/plain".into(),
                    bytes: b"hello world".to_vec(),
                },
            )
            .await
            .unwrap();
        assert_eq!(processed.artifact.av_status, AvStatus::Infected);
        assert!(processed.artifact.extracted_text_uri.is_none());
    }
}
