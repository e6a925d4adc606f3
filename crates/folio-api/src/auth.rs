//! Login callback: identify the user, consume a pending invite and build the
//! session's role snapshot.
//!
//! Who the user is comes from an `IdentityProvider`. Production deployments
//! put an authenticating proxy in front of `/auth/callback` and read the
//! user id from a header it sets; self-hosted and test setups can enable a
//! trusted `?user=` parameter instead.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::Utc;
use serde::Serialize;

use folio_core::config::AuthConfig;
use folio_core::error::FolioError;
use folio_core::types::{RoleKind, RoleSnapshot};

use crate::error::ApiError;
use crate::invite::process_invite;
use crate::session::Session;
use crate::state::AppState;

/// Resolves the authenticated user of a login callback.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `Ok(None)` when the request carries no identity.
    async fn identify(
        &self,
        headers: &HeaderMap,
        query: &HashMap<String, String>,
    ) -> Result<Option<String>, FolioError>;
}

/// Trusts the `user` query parameter.
#[derive(Debug, Default)]
pub struct QueryIdentity;

#[async_trait]
impl IdentityProvider for QueryIdentity {
    async fn identify(
        &self,
        _headers: &HeaderMap,
        query: &HashMap<String, String>,
    ) -> Result<Option<String>, FolioError> {
        Ok(query.get("user").filter(|u| !u.is_empty()).cloned())
    }
}

/// Trusts a header set by an authenticating proxy.
#[derive(Debug)]
pub struct HeaderIdentity {
    header: String,
}

impl HeaderIdentity {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

#[async_trait]
impl IdentityProvider for HeaderIdentity {
    async fn identify(
        &self,
        headers: &HeaderMap,
        _query: &HashMap<String, String>,
    ) -> Result<Option<String>, FolioError> {
        match headers.get(self.header.as_str()) {
            None => Ok(None),
            Some(value) => {
                let user = value.to_str().map_err(|_| {
                    FolioError::InvalidData(format!("{} header is not valid UTF-8", self.header))
                })?;
                let user = user.trim();
                Ok((!user.is_empty()).then(|| user.to_string()))
            }
        }
    }
}

/// Pick the provider the configuration asks for.
pub fn provider_from_config(config: &AuthConfig) -> Box<dyn IdentityProvider> {
    if config.dev_login {
        tracing::warn!("Development login enabled: /auth/callback trusts ?user=");
        Box::new(QueryIdentity)
    } else {
        Box::new(HeaderIdentity::new(config.identity_header.clone()))
    }
}

/// Result of a completed login.
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub user_id: String,
    pub org_id: Option<String>,
    pub joined_org: Option<String>,
}

/// Finish a login for `user_id` on `session`.
///
/// The session is saved on every path, so a consumed invite stays consumed
/// even when a later step fails. A failed save is a server error.
pub async fn complete_login(
    state: &AppState,
    session: &Session,
    user_id: &str,
) -> Result<LoginOutcome, ApiError> {
    let result = build_login(state, session, user_id).await;
    persist(session)?;
    result
}

async fn build_login(
    state: &AppState,
    session: &Session,
    user_id: &str,
) -> Result<LoginOutcome, ApiError> {
    let joined_org = process_invite(session, &state.keys, Utc::now())?;

    if let Some(org_id) = joined_org.as_deref() {
        state
            .store
            .register_role(user_id, org_id, RoleKind::Viewer)
            .await
            .map_err(|e| {
                tracing::warn!(user_id, org_id, error = %e, "Invite role grant failed");
                ApiError::Internal(format!("failed to grant invited role: {}", e))
            })?;
    }

    let roles = state.store.roles_for_user(user_id).await.map_err(|e| {
        tracing::warn!(user_id, error = %e, "Role lookup failed");
        ApiError::Internal(format!("failed to load roles: {}", e))
    })?;

    let current = session.payload().tenant;
    let org_id = select_active_org(&roles, joined_org.as_deref(), current.as_deref());

    session.update(|p| {
        p.identity = Some(roles);
        p.tenant = org_id.clone();
        p.subscription = None;
    });

    tracing::info!(user_id, org_id = ?org_id, joined_org = ?joined_org, "Login completed");
    Ok(LoginOutcome {
        user_id: user_id.to_string(),
        org_id,
        joined_org,
    })
}

/// Active organization after login: the organization just joined, else the
/// previous one if still held, else the one with the highest role.
pub fn select_active_org(
    roles: &RoleSnapshot,
    joined: Option<&str>,
    current: Option<&str>,
) -> Option<String> {
    joined
        .filter(|org| roles.role_in(org).is_some())
        .or_else(|| current.filter(|org| roles.role_in(org).is_some()))
        .or_else(|| roles.default_org())
        .map(str::to_string)
}

/// Save a session whose content decides authorization.
pub fn persist(session: &Session) -> Result<(), ApiError> {
    session.save().map_err(|e| {
        tracing::error!(session_id = %session.id(), error = %e, "Failed to save session");
        ApiError::from(e)
    })
}
