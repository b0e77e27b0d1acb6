//! HTTP handlers

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap},
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::TryStreamExt;
use multiauth_core::{Capabilities, Credentials, Criteria, Group, IdentityInfo};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::response::{ok, ApiError, ApiResult};
use crate::server::AppState;

/// Query keys that are not search criteria
const RESERVED_KEYS: [&str; 2] = ["exact", "providers"];

#[derive(Debug, Serialize)]
struct AuthProviderView {
    name: String,
    title: String,
    external: bool,
}

#[derive(Debug, Serialize)]
struct IdentityProviderView {
    name: String,
    title: String,
    capabilities: Capabilities,
}

#[derive(Debug, Serialize)]
struct GroupView {
    provider: String,
    name: String,
    supports_member_list: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    members: Option<Vec<IdentityView>>,
}

impl GroupView {
    fn new(group: &dyn Group) -> Self {
        Self {
            provider: group.provider().to_string(),
            name: group.name().to_string(),
            supports_member_list: group.supports_member_list(),
            members: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct IdentityView {
    provider: String,
    identifier: String,
    data: BTreeMap<String, Value>,
    multiauth_data: Value,
}

impl From<&IdentityInfo> for IdentityView {
    fn from(identity: &IdentityInfo) -> Self {
        Self {
            provider: identity.provider().to_string(),
            identifier: identity.identifier().to_string(),
            data: identity.data().clone(),
            multiauth_data: identity.multiauth_data(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub identifier: String,
    pub multiauth_data: Value,
}

fn identities(found: &[IdentityInfo]) -> Vec<IdentityView> {
    found.iter().map(IdentityView::from).collect()
}

fn is_true(value: Option<&String>) -> bool {
    matches!(value.map(String::as_str), Some("true") | Some("1") | Some(""))
}

fn provider_list(value: Option<&String>) -> Option<Vec<String>> {
    value.map(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    })
}

/// Credentials from a JSON body, or from a Basic authorization header
fn credentials(headers: &HeaderMap, body: &[u8]) -> Result<Credentials, ApiError> {
    if !body.is_empty() {
        let request: LoginRequest =
            serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid login request: {}", e)))?;
        return Ok(Credentials::new(request.username, request.password));
    }

    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Basic "))
        .ok_or_else(|| ApiError::BadRequest("Missing credentials".to_string()))?;

    let decoded = BASE64
        .decode(header.trim())
        .map_err(|_| ApiError::BadRequest("Malformed authorization header".to_string()))?;
    let decoded =
        String::from_utf8(decoded).map_err(|_| ApiError::BadRequest("Malformed authorization header".to_string()))?;

    match decoded.split_once(':') {
        Some((username, password)) => Ok(Credentials::new(username, password)),
        None => Err(ApiError::BadRequest("Malformed authorization header".to_string())),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
pub async fn health() -> ApiResult {
    Ok(ok(json!({
        "status": "ok",
        "version": multiauth_core::VERSION,
        "time": chrono::Utc::now().to_rfc3339(),
    })))
}

/// GET /api/v1/providers
pub async fn list_providers(State(state): State<AppState>) -> ApiResult {
    let auth: Vec<AuthProviderView> = state
        .multiauth
        .auth_providers()
        .map(|provider| AuthProviderView {
            name: provider.name().to_string(),
            title: provider.title().to_string(),
            external: provider.is_external(),
        })
        .collect();

    let identity: Vec<IdentityProviderView> = state
        .multiauth
        .identity_providers()
        .map(|provider| IdentityProviderView {
            name: provider.name().to_string(),
            title: provider.title().to_string(),
            capabilities: provider.capabilities(),
        })
        .collect();

    Ok(ok(json!({ "auth": auth, "identity": identity })))
}

/// POST /api/v1/login/{provider}
pub async fn login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let credentials = credentials(&headers, &body)?;
    debug!(provider = %provider, username = %credentials.username, "POST /api/v1/login");

    match state.multiauth.login(&provider, &credentials).await {
        Ok(identity) => {
            state.metrics.record_login(&provider, true);
            Ok(ok(IdentityView::from(&identity)))
        }
        Err(err) => {
            state.metrics.record_login(&provider, false);
            if !err.is_authentication_failure() {
                state.metrics.record_provider_error(&err);
            }
            Err(err.into())
        }
    }
}

/// GET /api/v1/identities?exact=&providers=a,b&<key>=<value>
pub async fn search_identities(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult {
    let exact = is_true(params.get("exact"));
    let providers = provider_list(params.get("providers"));
    let criteria: Criteria = params
        .iter()
        .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let found = state
        .multiauth
        .search_identities(&criteria, exact, providers.as_deref())
        .await?;

    Ok(ok(identities(&found)))
}

/// GET /api/v1/identities/{provider}/{identifier}
pub async fn get_identity(
    State(state): State<AppState>,
    Path((provider, identifier)): Path<(String, String)>,
) -> ApiResult {
    match state.multiauth.get_identity(&provider, &identifier).await? {
        Some(identity) => Ok(ok(IdentityView::from(&identity))),
        None => Err(ApiError::NotFound(format!("No identity '{}' in '{}'", identifier, provider))),
    }
}

/// GET /api/v1/identities/{provider}/{identifier}/groups
pub async fn get_identity_groups(
    State(state): State<AppState>,
    Path((provider, identifier)): Path<(String, String)>,
) -> ApiResult {
    let groups = state.multiauth.get_identity_groups(&provider, &identifier).await?;
    let groups: Vec<GroupView> = groups.iter().map(|group| GroupView::new(group.as_ref())).collect();
    Ok(ok(groups))
}

/// POST /api/v1/identities/refresh
pub async fn refresh_identity(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let request: RefreshRequest =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("Invalid refresh request: {}", e)))?;

    match state
        .multiauth
        .refresh_identity(&request.identifier, &request.multiauth_data)
        .await?
    {
        Some(identity) => Ok(ok(IdentityView::from(&identity))),
        None => Err(ApiError::NotFound(format!("Identity '{}' no longer exists", request.identifier))),
    }
}

/// GET /api/v1/groups?name=&exact=&providers=a,b
pub async fn search_groups(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult {
    let name = params
        .get("name")
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing group name".to_string()))?;
    let exact = is_true(params.get("exact"));
    let providers = provider_list(params.get("providers"));

    let groups = state.multiauth.search_groups(name, exact, providers.as_deref()).await?;
    let groups: Vec<GroupView> = groups.iter().map(|group| GroupView::new(group.as_ref())).collect();
    Ok(ok(groups))
}

/// GET /api/v1/groups/{provider}/{name}
pub async fn get_group(State(state): State<AppState>, Path((provider, name)): Path<(String, String)>) -> ApiResult {
    let group = state
        .multiauth
        .get_group(&provider, &name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No group '{}' in '{}'", name, provider)))?;

    let mut view = GroupView::new(group.as_ref());
    if group.supports_member_list() {
        let members: Vec<IdentityInfo> = group.members().try_collect().await?;
        view.members = Some(identities(&members));
    }
    Ok(ok(view))
}

/// GET /api/v1/groups/{provider}/{name}/members/{identifier}
pub async fn has_member(
    State(state): State<AppState>,
    Path((provider, name, identifier)): Path<(String, String, String)>,
) -> ApiResult {
    let group: Arc<dyn Group> = state
        .multiauth
        .get_group(&provider, &name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No group '{}' in '{}'", name, provider)))?;

    let member = group.has_member(&identifier).await?;
    Ok(ok(json!({ "member": member })))
}
