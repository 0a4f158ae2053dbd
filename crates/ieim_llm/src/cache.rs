//! Per-key immutable cache for LLM calls. The key is derived from
//! everything that determines the call's outcome, so a hit means "this
//! exact call was already made and its result is still on disk",
//! never "something close enough was made before".

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use ieim_common::{canonical_json_bytes, sha256_bytes, CanonError};

#[derive(Debug, Error)]
pub enum CacheError {
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
    #[error("cache immutability violation: stored response for this key does not match the one being written")]
    ImmutabilityViolation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheKeyInput<'a> {
    pub stage: &'a str,
    pub provider: &'a str,
    pub model_name: &'a str,
    pub model_version: &'a str,
    pub prompt_version: &'a str,
    pub prompt_sha256: &'a str,
    pub message_fingerprint: &'a str,
}

pub fn cache_key(input: &CacheKeyInput) -> Result<String, CanonError> {
    let bytes = canonical_json_bytes(input)?;
    Ok(sha256_bytes(&bytes).trim_start_matches("sha256:").to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    response: Value,
}

/// Filesystem-backed cache rooted at `<base_dir>/llm_cache/<key>.json`.
pub struct FileLlmCache {
    base_dir: PathBuf,
}

impl FileLlmCache {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join("llm_cache").join(format!("{key}.json"))
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path).map_err(|source| CacheError::Io { path: path.clone(), source })?;
        let entry: CacheEntry = serde_json::from_slice(&bytes)?;
        Ok(Some(entry.response))
    }

    pub fn put(&self, key: &str, response: &Value) -> Result<(), CacheError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CacheError::Io { path: parent.to_path_buf(), source })?;
        }

        let entry = CacheEntry { response: response.clone() };
        let mut out_bytes = serde_json::to_vec_pretty(&entry)?;
        out_bytes.push(b'\n');

        if path.exists() {
            let existing = std::fs::read(&path).map_err(|source| CacheError::Io { path: path.clone(), source })?;
            let existing_entry: CacheEntry = serde_json::from_slice(&existing)?;
            if existing_entry.response != entry.response {
                return Err(CacheError::ImmutabilityViolation);
            }
            return Ok(());
        }

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &out_bytes).map_err(|source| CacheError::Io { path: tmp.clone(), source })?;
        std::fs::rename(&tmp, &path).map_err(|source| CacheError::Io { path: path.clone(), source })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_key_input() -> CacheKeyInput<'static> {
        CacheKeyInput {
            stage: "classify",
            provider: "test",
            model_name: "test-model",
            model_version: "1",
            prompt_version: "v1",
            prompt_sha256: "sha256:abc",
            message_fingerprint: "fp-1",
        }
    }

    #[test]
    fn same_input_derives_the_same_key() {
        assert_eq!(cache_key(&sample_key_input()).unwrap(), cache_key(&sample_key_input()).unwrap());
    }

    #[test]
    fn miss_then_hit_after_put() {
        let dir = tempdir().unwrap();
        let cache = FileLlmCache::new(dir.path());
        let key = cache_key(&sample_key_input()).unwrap();
        assert!(cache.get(&key).unwrap().is_none());
        cache.put(&key, &serde_json::json!({"primary_intent": "INTENT_GENERAL_INQUIRY"})).unwrap();
        assert_eq!(cache.get(&key).unwrap().unwrap()["primary_intent"], "INTENT_GENERAL_INQUIRY");
    }

    #[test]
    fn put_fails_closed_on_divergent_content_for_same_key() {
        let dir = tempdir().unwrap();
        let cache = FileLlmCache::new(dir.path());
        let key = cache_key(&sample_key_input()).unwrap();
        cache.put(&key, &serde_json::json!({"a": 1})).unwrap();
        assert!(cache.put(&key, &serde_json::json!({"a": 2})).is_err());
    }
}
