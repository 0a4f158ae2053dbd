use std::path::PathBuf;
use std::sync::Arc;

use ieim_common::config::Config;
use ieim_hitl::{FileReviewStore, HitlService};

use crate::auth::{shared_jwks_cache, JwksCache};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pack_root: PathBuf,
    pub audit_root: PathBuf,
    pub review_store: Arc<FileReviewStore>,
    pub hitl_service: Arc<HitlService>,
    pub jwks: Option<Arc<JwksCache>>,
}

impl AppState {
    pub fn new(config: Config, pack_root: PathBuf, audit_root: PathBuf) -> Self {
        let jwks = shared_jwks_cache(&config.auth.oidc);
        let review_store = Arc::new(FileReviewStore::new(&pack_root));
        let hitl_service = Arc::new(HitlService::new(&pack_root, Some(audit_root.clone())));
        Self { config: Arc::new(config), pack_root, audit_root, review_store, hitl_service, jwks }
    }
}
