//! ieim_api
//!
//! Minimal HTTP surface over the review queues: health and metrics
//! probes, the authenticated actor's own capabilities, and the
//! queue/item/correction/draft-decision endpoints a reviewer's UI needs.
//! Authentication is OIDC bearer JWT validated against the issuer's
//! JWKS; RBAC is a plain config-driven lookup, unioned across the
//! actor's roles.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod state;

use axum::routing::{get, post};
use axum::Router;

pub use error::ApiError;
pub use state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .route("/api/me", get(handlers::me))
        .route("/api/review/queues", get(handlers::list_queues))
        .route("/api/review/queues/:queue_id/items", get(handlers::list_items))
        .route("/api/review/items/:item_id", get(handlers::get_item))
        .route("/api/review/items/:item_id/corrections", post(handlers::submit_correction))
        .route("/api/review/items/:item_id/drafts/:draft_kind/:action", post(handlers::decide_draft))
        .with_state(state)
}
