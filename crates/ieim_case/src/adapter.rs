use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CaseAdapterError {
    #[error("unknown case_id: {0}")]
    UnknownCase(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseArtifact {
    pub uri: String,
    pub sha256: String,
    pub kind: String,
    #[serde(default)]
    pub attachment_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaseRecord {
    pub case_id: String,
    pub queue_id: String,
    pub artifacts: Vec<CaseArtifact>,
    pub notes: Vec<String>,
    pub drafts: Vec<String>,
}

/// Interface a production backend implements against a real
/// case-management system; every call is idempotency-keyed so a retried
/// pipeline run never double-applies a side effect.
#[async_trait]
pub trait CaseAdapter: Send + Sync {
    async fn create_case(&self, idempotency_key: &str, queue_id: &str, title: &str) -> String;
    async fn update_case(&self, idempotency_key: &str, case_id: &str, title: Option<&str>);
    async fn attach_artifact(&self, idempotency_key: &str, case_id: &str, artifact: CaseArtifact);
    async fn add_note(&self, idempotency_key: &str, case_id: &str, note: &str);
    async fn add_draft_message(&self, idempotency_key: &str, case_id: &str, draft: &str);
}

#[derive(Default)]
struct InMemoryState {
    idempotency_index: HashMap<String, String>,
    cases: HashMap<String, CaseRecord>,
    applied_keys: BTreeSet<String>,
}

/// Idempotent in-memory adapter for tests and local demos.
#[derive(Default)]
pub struct InMemoryCaseAdapter {
    state: Mutex<InMemoryState>,
}

impl InMemoryCaseAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_case(&self, case_id: &str) -> Result<CaseRecord, CaseAdapterError> {
        self.state
            .lock()
            .unwrap()
            .cases
            .get(case_id)
            .cloned()
            .ok_or_else(|| CaseAdapterError::UnknownCase(case_id.to_string()))
    }
}

#[async_trait]
impl CaseAdapter for InMemoryCaseAdapter {
    async fn create_case(&self, idempotency_key: &str, queue_id: &str, title: &str) -> String {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.idempotency_index.get(idempotency_key) {
            return existing.clone();
        }
        let name = format!("case:{idempotency_key}");
        let case_id = Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string();
        let mut record = CaseRecord { case_id: case_id.clone(), queue_id: queue_id.to_string(), ..Default::default() };
        record.notes.push(format!("TITLE: {title}"));
        state.cases.insert(case_id.clone(), record);
        state.idempotency_index.insert(idempotency_key.to_string(), case_id.clone());
        case_id
    }

    async fn update_case(&self, idempotency_key: &str, case_id: &str, title: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        if !state.applied_keys.insert(idempotency_key.to_string()) {
            return;
        }
        if let Some(title) = title {
            if let Some(case) = state.cases.get_mut(case_id) {
                case.notes.push(format!("TITLE_UPDATE: {title}"));
            }
        }
    }

    async fn attach_artifact(&self, idempotency_key: &str, case_id: &str, artifact: CaseArtifact) {
        let mut state = self.state.lock().unwrap();
        if !state.applied_keys.insert(idempotency_key.to_string()) {
            return;
        }
        if let Some(case) = state.cases.get_mut(case_id) {
            case.artifacts.push(artifact);
        }
    }

    async fn add_note(&self, idempotency_key: &str, case_id: &str, note: &str) {
        let mut state = self.state.lock().unwrap();
        if !state.applied_keys.insert(idempotency_key.to_string()) {
            return;
        }
        if let Some(case) = state.cases.get_mut(case_id) {
            case.notes.push(note.to_string());
        }
    }

    async fn add_draft_message(&self, idempotency_key: &str, case_id: &str, draft: &str) {
        let mut state = self.state.lock().unwrap();
        if !state.applied_keys.insert(idempotency_key.to_string()) {
            return;
        }
        if let Some(case) = state.cases.get_mut(case_id) {
            case.drafts.push(draft.to_string());
        }
    }
}
