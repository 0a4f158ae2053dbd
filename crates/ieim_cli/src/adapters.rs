//! Local stand-ins for the adapter traits a production deployment would
//! back with a real claims system, policy system, CRM, AV scanner, and
//! mailbox transport. None of these carry policy; they exist so the
//! pipeline crates can run end to end without a live integration.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use ieim_attachments::{AvScanner, SourceAttachment};
use ieim_identity::{ClaimsAdapter, ClaimRecord, CrmAdapter, PolicyAdapter, PolicyRecord};
use ieim_pipeline::{FetchedMessage, MailAdapter, MailRef};
use ieim_schema::AvStatus;

/// Never resolves a claim number. A deployment with no claims-system
/// integration wired up still needs identity resolution to run; every
/// hard signal it could contribute is simply absent.
pub struct NullClaimsAdapter;

#[async_trait]
impl ClaimsAdapter for NullClaimsAdapter {
    async fn lookup_by_claim_number(&self, _claim_number: &str) -> Option<ClaimRecord> {
        None
    }
}

/// Never resolves a policy number, for the same reason as
/// [`NullClaimsAdapter`].
pub struct NullPolicyAdapter;

#[async_trait]
impl PolicyAdapter for NullPolicyAdapter {
    async fn lookup_by_policy_number(&self, _policy_number: &str) -> Option<PolicyRecord> {
        None
    }
}

/// Never links a sender email to a policy number.
pub struct NullCrmAdapter;

#[async_trait]
impl CrmAdapter for NullCrmAdapter {
    async fn policy_numbers_for_sender_email(&self, _email: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Always reports clean. A deployment without a real AV binary wired in
/// still needs attachment processing to produce an `av_status`.
pub struct NullAvScanner;

#[async_trait]
impl AvScanner for NullAvScanner {
    async fn scan(&self, _bytes: &[u8], _filename: &str, _mime_type: &str) -> AvStatus {
        AvStatus::Clean
    }
}

/// Reads `.eml` files from a directory as if it were a mailbox: each
/// tick lists every file not already returned and fetches its bytes
/// whole. There is no IMAP/Graph/SES session here, just a directory a
/// local run can point at.
pub struct DirectoryMailAdapter {
    dir: PathBuf,
}

impl DirectoryMailAdapter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn entries(&self) -> Vec<PathBuf> {
        let Ok(read_dir) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut paths: Vec<PathBuf> = read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("eml"))
            .collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl MailAdapter for DirectoryMailAdapter {
    async fn list_new(&self, limit: usize) -> Result<Vec<MailRef>, String> {
        Ok(self
            .entries()
            .into_iter()
            .take(limit)
            .map(|path| MailRef { ref_id: path.to_string_lossy().into_owned() })
            .collect())
    }

    async fn fetch(&self, mail_ref: &MailRef) -> Result<FetchedMessage, String> {
        let path = Path::new(&mail_ref.ref_id);
        let raw_mime = std::fs::read(path).map_err(|e| format!("failed to read {}: {e}", path.display()))?;
        let received_at = std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .map(|modified| ieim_common::timestamp::format_utc(modified.into()))
            .unwrap_or_else(|| ieim_common::timestamp::format_utc(chrono::Utc::now()));
        Ok(FetchedMessage {
            raw_mime,
            received_at,
            attachments: Vec::<SourceAttachment>::new(),
        })
    }
}
