use axum::extract::{Path as AxumPath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use ieim_common::sha256_bytes;
use ieim_hitl::{build_correction_record, BuildCorrectionInput};
use ieim_schema::{ActorKind, ArtifactRef, Correction, PatchOp, Stage};

use crate::auth::{authenticate, union_capabilities, Actor};
use crate::error::ApiError;
use crate::state::AppState;

const PRIVACY_QUEUE: &str = "QUEUE_PRIVACY_DSR";

async fn require_actor(state: &AppState, headers: &HeaderMap) -> Result<Actor, ApiError> {
    let header = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()).ok_or(ApiError::Unauthorized)?;
    let token = header.strip_prefix("Bearer ").ok_or(ApiError::Unauthorized)?;
    let jwks = state.jwks.as_ref().ok_or(ApiError::Unauthorized)?;
    authenticate(&state.config.auth.oidc, jwks, token).await
}

pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub async fn metrics(State(state): State<AppState>) -> String {
    if !state.config.observability.metrics_enabled {
        return String::new();
    }
    format!(
        "# HELP ieim_pack_system_id info\nieim_pack_system_id{{value=\"{}\"}} 1\n",
        state.config.pack.system_id
    )
}

#[derive(Serialize)]
pub struct MeResponse {
    actor_id: String,
    roles: Vec<String>,
    can_view_raw: bool,
    can_view_audit: bool,
    can_approve_drafts: bool,
}

pub async fn me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<MeResponse>, ApiError> {
    let actor = require_actor(&state, &headers).await?;
    let caps = union_capabilities(&state.config.rbac.role_mappings, &actor.roles);
    Ok(Json(MeResponse {
        actor_id: actor.actor_id,
        roles: actor.roles,
        can_view_raw: caps.can_view_raw,
        can_view_audit: caps.can_view_audit,
        can_approve_drafts: caps.can_approve_drafts,
    }))
}

pub async fn list_queues(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Vec<String>>, ApiError> {
    require_actor(&state, &headers).await?;
    let root = state.pack_root.join("review_items");
    if !root.exists() {
        return Ok(Json(vec![]));
    }
    let mut queues: Vec<String> = std::fs::read_dir(&root)
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    queues.sort();
    Ok(Json(queues))
}

pub async fn list_items(
    State(state): State<AppState>,
    AxumPath(queue_id): AxumPath<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<ieim_schema::ReviewItem>>, ApiError> {
    require_actor(&state, &headers).await?;
    let items = state.review_store.list_queue(&queue_id)?;
    Ok(Json(items))
}

pub async fn get_item(
    State(state): State<AppState>,
    AxumPath(item_id): AxumPath<Uuid>,
    headers: HeaderMap,
) -> Result<(HeaderMap, Json<ieim_schema::ReviewItem>), ApiError> {
    require_actor(&state, &headers).await?;
    let item = state.review_store.find(item_id)?.ok_or_else(|| ApiError::NotFound(item_id.to_string()))?;
    let bytes = serde_json::to_vec(&item).map_err(|e| ApiError::Internal(e.to_string()))?;
    let etag = sha256_bytes(&bytes);
    let mut response_headers = HeaderMap::new();
    response_headers.insert(axum::http::header::ETAG, etag.parse().map_err(|_| ApiError::Internal("bad etag".into()))?);
    Ok((response_headers, Json(item)))
}

#[derive(Deserialize)]
pub struct CorrectionRequest {
    pub target_stage: Stage,
    pub ops: Vec<PatchOp>,
    pub justification: String,
    #[serde(default)]
    pub note: Option<String>,
}

pub async fn submit_correction(
    State(state): State<AppState>,
    AxumPath(item_id): AxumPath<Uuid>,
    headers: HeaderMap,
    Json(body): Json<CorrectionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let actor = require_actor(&state, &headers).await?;
    headers.get("idempotency-key").ok_or_else(|| ApiError::InvalidInput("missing Idempotency-Key header".to_string()))?;
    let if_match = headers.get(axum::http::header::IF_MATCH).and_then(|v| v.to_str().ok()).ok_or(ApiError::EtagMismatch)?;

    let item = state.review_store.find(item_id)?.ok_or_else(|| ApiError::NotFound(item_id.to_string()))?;
    let item_bytes = serde_json::to_vec(&item).map_err(|e| ApiError::Internal(e.to_string()))?;
    let current_etag = sha256_bytes(&item_bytes);
    if if_match != current_etag {
        return Err(ApiError::EtagMismatch);
    }

    let created_at = ieim_common::timestamp::format_utc(chrono::Utc::now());
    let record = build_correction_record(BuildCorrectionInput {
        message_id: item.message_id,
        run_id: &item.run_id,
        review_item_id: Some(item.review_item_id),
        actor_type: ActorKind::Human,
        actor_id: Some(&actor.actor_id),
        created_at: &created_at,
        note: body.note.as_deref(),
        artifact_refs: vec![],
        corrections: vec![Correction { target_stage: body.target_stage, ops: body.ops, justification: body.justification, evidence: vec![] }],
    })?;

    let input_ref = ArtifactRef { schema_id: ieim_schema::urn::REVIEW_ITEM.to_string(), uri: item.review_item_id.to_string(), sha256: current_etag };
    let path = state.hitl_service.submit_correction(&record, input_ref, &created_at)?;

    Ok(Json(json!({"correction_id": record.correction_id, "path": path.to_string_lossy()})))
}

pub async fn decide_draft(
    State(state): State<AppState>,
    AxumPath((item_id, draft_kind, action)): AxumPath<(Uuid, String, String)>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let actor = require_actor(&state, &headers).await?;
    if !matches!(draft_kind.as_str(), "request_info" | "reply") {
        return Err(ApiError::InvalidInput(format!("unknown draft kind: {draft_kind}")));
    }
    if !matches!(action.as_str(), "approve" | "reject") {
        return Err(ApiError::InvalidInput(format!("unknown action: {action}")));
    }

    let item = state.review_store.find(item_id)?.ok_or_else(|| ApiError::NotFound(item_id.to_string()))?;

    let caps = union_capabilities(&state.config.rbac.role_mappings, &actor.roles);
    if !caps.can_approve_drafts {
        return Err(ApiError::Forbidden("can_approve_drafts".to_string()));
    }
    if item.queue_id == PRIVACY_QUEUE && !actor.roles.iter().any(|r| r == "privacy_officer" || r == "administrator") {
        return Err(ApiError::Forbidden("privacy_officer or administrator required for QUEUE_PRIVACY_DSR".to_string()));
    }

    let if_match = headers.get(axum::http::header::IF_MATCH).and_then(|v| v.to_str().ok()).ok_or(ApiError::EtagMismatch)?;
    let item_bytes = serde_json::to_vec(&item).map_err(|e| ApiError::Internal(e.to_string()))?;
    let current_etag = sha256_bytes(&item_bytes);
    if if_match != current_etag {
        return Err(ApiError::EtagMismatch);
    }

    let created_at = ieim_common::timestamp::format_utc(chrono::Utc::now());
    let justification = format!("{action} {draft_kind} draft");
    let record = build_correction_record(BuildCorrectionInput {
        message_id: item.message_id,
        run_id: &item.run_id,
        review_item_id: Some(item.review_item_id),
        actor_type: ActorKind::Human,
        actor_id: Some(&actor.actor_id),
        created_at: &created_at,
        note: None,
        artifact_refs: vec![],
        corrections: vec![Correction { target_stage: Stage::Hitl, ops: vec![], justification, evidence: vec![] }],
    })?;
    let input_ref = ArtifactRef { schema_id: ieim_schema::urn::REVIEW_ITEM.to_string(), uri: item.review_item_id.to_string(), sha256: current_etag };
    let path = state.hitl_service.submit_correction(&record, input_ref, &created_at)?;

    Ok(Json(json!({"correction_id": record.correction_id, "path": path.to_string_lossy(), "action": action, "draft": draft_kind})))
}
