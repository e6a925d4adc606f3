//! Route handler functions.
//!
//! Handlers run after their route group's admission pipeline, so they can
//! extract the `Session` and, behind a role gate, the `AuthContext`.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use folio_core::types::{RoleKind, SubscriptionDecision};

use crate::auth::{complete_login, persist, LoginOutcome};
use crate::error::ApiError;
use crate::invite::issue_invite;
use crate::roles::AuthContext;
use crate::session::Session;
use crate::state::AppState;
use crate::subscription::resolve_decision;

// =============================================================================
// Request and response types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginParams {
    pub invite: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SwitchOrgRequest {
    pub org_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: String,
    pub role: RoleKind,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub tracked_clients: usize,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user_id: String,
    pub org_id: String,
    pub role: RoleKind,
    pub organizations: HashMap<String, RoleKind>,
}

#[derive(Debug, Serialize)]
pub struct ActiveOrgResponse {
    pub org_id: String,
    pub role: RoleKind,
}

#[derive(Debug, Serialize)]
pub struct InviteResponse {
    pub org_id: String,
    pub token: String,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct MemberResponse {
    pub user_id: String,
    pub org_id: String,
    pub role: RoleKind,
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        tracked_clients: state.limiter.len(),
    })
}

/// GET /auth/login?invite=<token>
///
/// Records the invite for the callback and sends the browser to the
/// identity provider.
pub async fn login(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(params): Query<LoginParams>,
) -> Result<Redirect, ApiError> {
    if let Some(invite) = params.invite.filter(|t| !t.is_empty()) {
        tracing::debug!(session_id = %session.id(), "Pending invite recorded");
        session.update(|p| p.invite = Some(invite));
    }
    persist(&session)?;
    Ok(Redirect::to(&state.config.auth.login_redirect))
}

/// GET /auth/callback
pub async fn callback(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<LoginOutcome>, ApiError> {
    let user_id = state
        .identity
        .identify(&headers, &query)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Identity provider failed");
            ApiError::Internal(format!("identity provider failed: {}", e))
        })?;

    let Some(user_id) = user_id else {
        tracing::info!(session_id = %session.id(), "Login callback without an identity");
        return Err(ApiError::BadRequest("no authenticated user".to_string()));
    };

    let outcome = complete_login(&state, &session, &user_id).await?;
    Ok(Json(outcome))
}

/// POST /auth/logout
pub async fn logout(Extension(session): Extension<Session>) -> Result<StatusCode, ApiError> {
    let user = session.payload().user_id().map(str::to_string);
    session.clear();
    persist(&session)?;
    tracing::info!(user_id = ?user, "Logged out");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/me
pub async fn me(
    Extension(ctx): Extension<AuthContext>,
    Extension(session): Extension<Session>,
) -> Json<MeResponse> {
    let organizations = session
        .payload()
        .identity
        .map(|snapshot| snapshot.roles)
        .unwrap_or_default();
    Json(MeResponse {
        user_id: ctx.user_id,
        org_id: ctx.org_id,
        role: ctx.role,
        organizations,
    })
}

/// PUT /api/session/organization
pub async fn switch_org(
    Extension(session): Extension<Session>,
    Json(body): Json<SwitchOrgRequest>,
) -> Result<Json<ActiveOrgResponse>, ApiError> {
    let payload = session.payload();
    let Some(identity) = payload.identity.as_ref() else {
        tracing::info!(session_id = %payload.id, "Organization switch without an identity");
        return Err(ApiError::BadRequest("no user in session".to_string()));
    };

    let Some(role) = identity.role_in(&body.org_id) else {
        tracing::info!(user_id = %identity.user_id, org_id = %body.org_id, "Switch to organization without a role");
        return Err(ApiError::Unauthorized(format!(
            "no role in organization {}",
            body.org_id
        )));
    };

    session.update(|p| {
        p.tenant = Some(body.org_id.clone());
        p.subscription = None;
    });
    persist(&session)?;

    tracing::info!(user_id = %identity.user_id, org_id = %body.org_id, "Active organization switched");
    Ok(Json(ActiveOrgResponse {
        org_id: body.org_id,
        role,
    }))
}

/// GET /api/organization/subscription
pub async fn subscription_status(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Json<SubscriptionDecision> {
    let decision = resolve_decision(
        state.store.as_ref(),
        &ctx.org_id,
        &state.config.subscription,
        Utc::now(),
    )
    .await;
    Json(decision)
}

/// POST /api/organization/invites
pub async fn create_invite(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let invite = issue_invite(
        &state.keys,
        &ctx.org_id,
        state.config.auth.invite_ttl(),
        Utc::now(),
    )?;
    let url = format!(
        "{}/auth/login?invite={}",
        state.config.auth.public_url.trim_end_matches('/'),
        invite.token
    );

    tracing::info!(user_id = %ctx.user_id, org_id = %ctx.org_id, expires_at = %invite.expires_at, "Invite issued");
    Ok((
        StatusCode::CREATED,
        Json(InviteResponse {
            org_id: ctx.org_id,
            token: invite.token,
            url,
            expires_at: invite.expires_at,
        }),
    ))
}

/// POST /api/organization/members
pub async fn add_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = body.user_id.trim();
    if user_id.is_empty() {
        return Err(ApiError::BadRequest("user_id must not be empty".to_string()));
    }

    state
        .store
        .register_role(user_id, &ctx.org_id, body.role)
        .await?;

    tracing::info!(
        granted_by = %ctx.user_id,
        user_id,
        org_id = %ctx.org_id,
        role = %body.role,
        "Member role granted"
    );
    Ok((
        StatusCode::CREATED,
        Json(MemberResponse {
            user_id: user_id.to_string(),
            org_id: ctx.org_id,
            role: body.role,
        }),
    ))
}
