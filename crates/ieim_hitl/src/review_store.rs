use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

use ieim_schema::{ArtifactRef, ReviewItem, ReviewRoutingSummary, ReviewStatus};

#[derive(Debug, Error)]
pub enum ReviewStoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct BuildReviewItemInput<'a> {
    pub message_id: Uuid,
    pub run_id: &'a str,
    pub queue_id: &'a str,
    pub created_at: &'a str,
    pub routing_sha256: &'a str,
    pub routing: ReviewRoutingSummary,
    pub artifact_refs: Vec<ArtifactRef>,
    pub draft_refs: Vec<ArtifactRef>,
}

/// Builds a fresh, always-`OPEN` review item. `review_item_id` is derived
/// from `(message_id, run_id, queue_id, routing_sha256)`, so re-running a
/// stage whose routing output is unchanged produces the same id.
pub fn build_review_item(input: BuildReviewItemInput) -> ReviewItem {
    let review_item_id = ReviewItem::derive_id(input.message_id, input.run_id, input.queue_id, input.routing_sha256);
    ReviewItem {
        schema_id: ieim_schema::urn::REVIEW_ITEM.to_string(),
        schema_version: "1.0.0".to_string(),
        review_item_id,
        message_id: input.message_id,
        run_id: input.run_id.to_string(),
        queue_id: input.queue_id.to_string(),
        created_at: input.created_at.to_string(),
        status: ReviewStatus::Open,
        routing: input.routing,
        artifact_refs: input.artifact_refs,
        draft_refs: input.draft_refs,
    }
}

/// Review items on disk at `<base_dir>/review_items/<queue_id>/<review_item_id>.review.json`.
/// Writes are write-once: an existing file at the target path is left
/// untouched and its path is returned without re-checking content, since
/// `review_item_id` already binds the item to its queue and routing hash.
pub struct FileReviewStore {
    base_dir: PathBuf,
}

impl FileReviewStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    fn path_for(&self, queue_id: &str, review_item_id: Uuid) -> PathBuf {
        self.base_dir.join("review_items").join(queue_id).join(format!("{review_item_id}.review.json"))
    }

    pub fn write(&self, item: &ReviewItem) -> Result<PathBuf, ReviewStoreError> {
        let path = self.path_for(&item.queue_id, item.review_item_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ReviewStoreError::Io { path: parent.to_path_buf(), source })?;
        }
        if path.exists() {
            return Ok(path);
        }
        let mut bytes = serde_json::to_vec_pretty(item)?;
        bytes.push(b'\n');
        let tmp = path.with_extension("review.json.tmp");
        std::fs::write(&tmp, &bytes).map_err(|source| ReviewStoreError::Io { path: tmp.clone(), source })?;
        std::fs::rename(&tmp, &path).map_err(|source| ReviewStoreError::Io { path: path.clone(), source })?;
        Ok(path)
    }

    pub fn list_queue(&self, queue_id: &str) -> Result<Vec<ReviewItem>, ReviewStoreError> {
        let qdir = self.base_dir.join("review_items").join(queue_id);
        if !qdir.exists() {
            return Ok(vec![]);
        }
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&qdir)
            .map_err(|source| ReviewStoreError::Io { path: qdir.clone(), source })?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.to_string_lossy().ends_with(".review.json"))
            .collect();
        entries.sort();
        entries
            .into_iter()
            .map(|p| {
                let bytes = std::fs::read(&p).map_err(|source| ReviewStoreError::Io { path: p.clone(), source })?;
                Ok(serde_json::from_slice(&bytes)?)
            })
            .collect()
    }

    pub fn find(&self, review_item_id: Uuid) -> Result<Option<ReviewItem>, ReviewStoreError> {
        match self.find_path(review_item_id)? {
            Some(path) => {
                let bytes = std::fs::read(&path).map_err(|source| ReviewStoreError::Io { path: path.clone(), source })?;
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            None => Ok(None),
        }
    }

    pub fn find_path(&self, review_item_id: Uuid) -> Result<Option<PathBuf>, ReviewStoreError> {
        let root = self.base_dir.join("review_items");
        if !root.exists() {
            return Ok(None);
        }
        let target = format!("{review_item_id}.review.json");
        for queue_dir in std::fs::read_dir(&root).map_err(|source| ReviewStoreError::Io { path: root.clone(), source })? {
            let queue_dir = queue_dir.map_err(|source| ReviewStoreError::Io { path: root.clone(), source })?.path();
            let candidate = queue_dir.join(&target);
            if candidate.exists() {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}

fn path_has_suffix(p: &Path, suffix: &str) -> bool {
    p.to_string_lossy().ends_with(suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(queue_id: &str) -> ReviewItem {
        build_review_item(BuildReviewItemInput {
            message_id: Uuid::nil(),
            run_id: "run-1",
            queue_id,
            created_at: "2026-01-01T00:00:00Z",
            routing_sha256: "sha256:aa",
            routing: ReviewRoutingSummary { rule_id: "ROUTE_FALLBACK".into(), rule_version: "1.0.0".into(), fail_closed: false },
            artifact_refs: vec![],
            draft_refs: vec![],
        })
    }

    #[test]
    fn write_then_find_round_trips() {
        let dir = tempdir().unwrap();
        let store = FileReviewStore::new(dir.path());
        let item = sample("Q_GENERAL");
        store.write(&item).unwrap();
        let found = store.find(item.review_item_id).unwrap().unwrap();
        assert_eq!(found.review_item_id, item.review_item_id);
    }

    #[test]
    fn write_is_idempotent_on_repeat_calls() {
        let dir = tempdir().unwrap();
        let store = FileReviewStore::new(dir.path());
        let item = sample("Q_GENERAL");
        let p1 = store.write(&item).unwrap();
        let p2 = store.write(&item).unwrap();
        assert_eq!(p1, p2);
        assert!(path_has_suffix(&p1, ".review.json"));
    }

    #[test]
    fn list_queue_is_empty_for_unknown_queue() {
        let dir = tempdir().unwrap();
        let store = FileReviewStore::new(dir.path());
        assert!(store.list_queue("Q_NOPE").unwrap().is_empty());
    }
}
