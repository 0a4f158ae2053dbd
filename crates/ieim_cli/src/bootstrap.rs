//! Wires the per-crate stand-ins into one `PipelineDeps` so every
//! subcommand builds it the same way. Also owns the one piece of local
//! bookkeeping none of the pipeline crates persist on their own: a
//! message's attachment artifacts, so a later `process`/`reprocess`
//! invocation in a separate process can find what an earlier `ingest`
//! tick already ran through AV and OCR.

use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

use ieim_case::{CaseAdapter, InMemoryCaseAdapter};
use ieim_common::config::Config;
use ieim_identity::{ClaimsAdapter, CrmAdapter, IdentityConfig, PolicyAdapter};
use ieim_llm::{DailyCallCap, FileLlmCache, FixtureProvider, Provider};
use ieim_pipeline::PipelineDeps;
use ieim_schema::{AttachmentArtifact, NormalizedMessage};

use crate::adapters::{NullClaimsAdapter, NullCrmAdapter, NullPolicyAdapter};
use crate::identity_config::build_identity_config;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no normalized message on record for {0}")]
    UnknownMessage(Uuid),
}

/// Everything a subcommand needs to construct `PipelineDeps` for the
/// lifetime of one invocation. Held as owned values so the deps struct
/// (all borrows) can reference them for the duration of one pipeline run.
pub struct Runtime {
    pub config: Config,
    pub identity_config: IdentityConfig,
    pub claims_adapter: NullClaimsAdapter,
    pub policy_adapter: NullPolicyAdapter,
    pub crm_adapter: NullCrmAdapter,
    pub llm_provider: FixtureProvider,
    pub llm_cache: FileLlmCache,
    pub llm_cap: DailyCallCap,
    pub case_adapter: InMemoryCaseAdapter,
}

impl Runtime {
    pub fn new(config: Config, pack_root: &Path) -> Self {
        let identity_config = build_identity_config(&config);
        Self {
            config,
            identity_config,
            claims_adapter: NullClaimsAdapter,
            policy_adapter: NullPolicyAdapter,
            crm_adapter: NullCrmAdapter,
            llm_provider: FixtureProvider::new(),
            llm_cache: FileLlmCache::new(pack_root),
            llm_cap: DailyCallCap::new(pack_root),
            case_adapter: InMemoryCaseAdapter::new(),
        }
    }

    pub fn deps<'a>(&'a self, pack_root: &'a Path, audit_root: &'a Path) -> PipelineDeps<'a> {
        PipelineDeps {
            pack_root,
            audit_root,
            config: &self.config,
            identity_config: &self.identity_config,
            claims_adapter: &self.claims_adapter as &dyn ClaimsAdapter,
            policy_adapter: &self.policy_adapter as &dyn PolicyAdapter,
            crm_adapter: &self.crm_adapter as &dyn CrmAdapter,
            llm_provider: &self.llm_provider as &dyn Provider,
            llm_cache: &self.llm_cache,
            llm_cap: &self.llm_cap,
            case_adapter: &self.case_adapter as &dyn CaseAdapter,
        }
    }
}

fn attachments_index_path(pack_root: &Path, message_id: Uuid) -> PathBuf {
    pack_root.join("attachments_index").join(format!("{message_id}.json"))
}

pub fn write_attachments_index(pack_root: &Path, message_id: Uuid, attachments: &[AttachmentArtifact]) -> Result<(), BootstrapError> {
    let path = attachments_index_path(pack_root, message_id);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| BootstrapError::Io { path: parent.to_path_buf(), source })?;
    }
    let bytes = serde_json::to_vec_pretty(attachments)?;
    std::fs::write(&path, bytes).map_err(|source| BootstrapError::Io { path, source })
}

pub fn read_attachments_index(pack_root: &Path, message_id: Uuid) -> Result<Vec<AttachmentArtifact>, BootstrapError> {
    let path = attachments_index_path(pack_root, message_id);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = std::fs::read(&path).map_err(|source| BootstrapError::Io { path, source })?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub fn read_normalized_message(pack_root: &Path, message_id: Uuid) -> Result<NormalizedMessage, BootstrapError> {
    let path = pack_root.join("normalized").join(format!("{message_id}.json"));
    if !path.exists() {
        return Err(BootstrapError::UnknownMessage(message_id));
    }
    let bytes = std::fs::read(&path).map_err(|source| BootstrapError::Io { path, source })?;
    Ok(serde_json::from_slice(&bytes)?)
}
