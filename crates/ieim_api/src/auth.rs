//! OIDC bearer JWT authentication. Tokens are validated against the
//! issuer's JWKS; an unrecognized `kid` triggers one refetch before the
//! token is rejected, so a key rotation does not require a restart.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;

use ieim_common::config::OidcConfig;

use crate::error::ApiError;

const JWKS_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Deserialize)]
struct Claims {
    sub: String,
    #[serde(flatten)]
    other: serde_json::Map<String, serde_json::Value>,
}

/// An authenticated caller: the `sub` claim (or whatever claim the
/// config names as the actor id) plus the roles resolved from the
/// roles claim, after the issuer's role names have been mapped through
/// `role_name_map`.
#[derive(Debug, Clone)]
pub struct Actor {
    pub actor_id: String,
    pub roles: Vec<String>,
}

struct JwksState {
    set: JwkSet,
    fetched_at: Instant,
}

pub struct JwksCache {
    discovery_url: String,
    http: reqwest::Client,
    state: RwLock<Option<JwksState>>,
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: String,
}

impl JwksCache {
    pub fn new(issuer_url: &str, timeout: Duration) -> Self {
        Self {
            discovery_url: format!("{}/.well-known/openid-configuration", issuer_url.trim_end_matches('/')),
            http: reqwest::Client::builder().timeout(timeout).build().unwrap_or_default(),
            state: RwLock::new(None),
        }
    }

    async fn fetch(&self) -> Result<JwkSet, ApiError> {
        let discovery: DiscoveryDocument = self
            .http
            .get(&self.discovery_url)
            .send()
            .await
            .map_err(|e| ApiError::Internal(format!("oidc discovery fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| ApiError::Internal(format!("oidc discovery decode failed: {e}")))?;
        let set: JwkSet = self
            .http
            .get(&discovery.jwks_uri)
            .send()
            .await
            .map_err(|e| ApiError::Internal(format!("jwks fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| ApiError::Internal(format!("jwks decode failed: {e}")))?;
        Ok(set)
    }

    async fn refresh(&self) -> Result<(), ApiError> {
        let set = self.fetch().await?;
        let mut guard = self.state.write().await;
        *guard = Some(JwksState { set, fetched_at: Instant::now() });
        Ok(())
    }

    async fn key_for(&self, kid: &str) -> Result<jsonwebtoken::jwk::Jwk, ApiError> {
        {
            let guard = self.state.read().await;
            if let Some(state) = guard.as_ref() {
                if state.fetched_at.elapsed() < JWKS_CACHE_TTL {
                    if let Some(jwk) = state.set.find(kid) {
                        return Ok(jwk.clone());
                    }
                }
            }
        }
        self.refresh().await?;
        let guard = self.state.read().await;
        guard
            .as_ref()
            .and_then(|state| state.set.find(kid))
            .cloned()
            .ok_or(ApiError::Unauthorized)
    }
}

fn decoding_key_for(jwk: &jsonwebtoken::jwk::Jwk) -> Result<DecodingKey, ApiError> {
    DecodingKey::from_jwk(jwk).map_err(|_| ApiError::Unauthorized)
}

/// Resolves a `.`-separated claim path (e.g. `realm_access.roles`) against
/// a claims map, descending through nested objects. Returns `None` as soon
/// as a segment is missing or the current value isn't an object, rather
/// than erroring, since a missing roles claim means "no roles" here.
fn get_by_dotted_path<'a>(claims: &'a serde_json::Map<String, serde_json::Value>, path: &str) -> Option<&'a serde_json::Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut cur = claims.get(first)?;
    for seg in segments {
        cur = cur.as_object()?.get(seg)?;
    }
    Some(cur)
}

fn accepted_algorithms(oidc: &OidcConfig) -> Vec<Algorithm> {
    oidc.accepted_algorithms
        .iter()
        .filter_map(|name| match name.as_str() {
            "RS256" => Some(Algorithm::RS256),
            "RS384" => Some(Algorithm::RS384),
            "RS512" => Some(Algorithm::RS512),
            "ES256" => Some(Algorithm::ES256),
            "ES384" => Some(Algorithm::ES384),
            _ => None,
        })
        .collect()
}

/// Validates a bearer token against the configured issuer's JWKS and
/// resolves it into an `Actor`. Direct-grant session cookies reuse the
/// same access token and so flow through this same function.
pub async fn authenticate(oidc: &OidcConfig, jwks: &JwksCache, bearer_token: &str) -> Result<Actor, ApiError> {
    if !oidc.enabled {
        return Err(ApiError::Unauthorized);
    }
    let header = decode_header(bearer_token).map_err(|_| ApiError::Unauthorized)?;
    let kid = header.kid.ok_or(ApiError::Unauthorized)?;
    let jwk = jwks.key_for(&kid).await?;
    let key = decoding_key_for(&jwk)?;

    let algorithms = accepted_algorithms(oidc);
    let mut validation = Validation::new(*algorithms.first().ok_or(ApiError::Unauthorized)?);
    validation.algorithms = algorithms;
    validation.leeway = oidc.leeway_seconds;
    if let Some(audience) = &oidc.audience {
        validation.set_audience(&[audience]);
    }
    if let Some(issuer_url) = &oidc.issuer_url {
        validation.set_issuer(&[issuer_url.as_str()]);
    }

    let token = decode::<Claims>(bearer_token, &key, &validation).map_err(|_| ApiError::Unauthorized)?;
    let claims = token.claims;

    let actor_id = claims
        .other
        .get(&oidc.actor_id_claim)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or(claims.sub);

    let raw_roles: Vec<String> = get_by_dotted_path(&claims.other, &oidc.roles_claim)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|r| r.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let roles = raw_roles
        .into_iter()
        .map(|role| oidc.role_name_map.get(&role).cloned().unwrap_or(role))
        .collect();

    Ok(Actor { actor_id, roles })
}

/// Unions `can_view_raw`/`can_view_audit`/`can_approve_drafts` across
/// every role the actor holds, since the matrix accrues per-role rather
/// than taking the most or least permissive single role.
pub fn union_capabilities(
    role_mappings: &BTreeMap<String, ieim_common::config::RoleCapabilities>,
    roles: &[String],
) -> ieim_common::config::RoleCapabilities {
    let mut out = ieim_common::config::RoleCapabilities::default();
    for role in roles {
        if let Some(caps) = role_mappings.get(role) {
            out.can_view_raw |= caps.can_view_raw;
            out.can_view_audit |= caps.can_view_audit;
            out.can_approve_drafts |= caps.can_approve_drafts;
        }
    }
    out
}

pub fn shared_jwks_cache(oidc: &OidcConfig) -> Option<Arc<JwksCache>> {
    let issuer = oidc.issuer_url.as_ref()?;
    Some(Arc::new(JwksCache::new(issuer, Duration::from_secs(oidc.http_timeout_seconds))))
}
