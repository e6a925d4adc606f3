//! Organization invitations.
//!
//! An invite is a compact HS256 token naming an organization and an expiry.
//! It reaches the server as the `invite` query parameter of `/auth/login`,
//! waits in the session while the user authenticates, and is consumed by
//! the login callback, which then grants the Viewer role in that
//! organization.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ApiError;
use crate::secret::SigningKeys;
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteClaims {
    pub org_id: String,
    /// Expiry as unix seconds.
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum InviteError {
    #[error("invite token is invalid: {0}")]
    Invalid(String),
    #[error("invite token expired at {0}")]
    Expired(i64),
    #[error("invite token could not be signed: {0}")]
    Encode(jsonwebtoken::errors::Error),
}

impl From<InviteError> for ApiError {
    fn from(err: InviteError) -> Self {
        match err {
            InviteError::Invalid(_) | InviteError::Expired(_) => {
                ApiError::BadRequest("invalid or expired invitation".to_string())
            }
            InviteError::Encode(e) => ApiError::Internal(e.to_string()),
        }
    }
}

/// A freshly signed invite.
#[derive(Debug, Clone)]
pub struct IssuedInvite {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Sign an invite to `org_id` valid for `ttl` from `now`.
pub fn issue_invite(
    keys: &SigningKeys,
    org_id: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<IssuedInvite, InviteError> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| InviteError::Invalid(format!("invite lifetime out of range: {}", e)))?;
    let expires_at = now + ttl;
    let claims = InviteClaims {
        org_id: org_id.to_string(),
        exp: expires_at.timestamp(),
    };
    let token = jsonwebtoken::encode(&SigningKeys::header(), &claims, keys.encoding())
        .map_err(InviteError::Encode)?;
    Ok(IssuedInvite { token, expires_at })
}

/// Verify signature and expiry against an explicit clock.
pub fn verify_invite_at(
    keys: &SigningKeys,
    token: &str,
    now: DateTime<Utc>,
) -> Result<InviteClaims, InviteError> {
    let mut validation = SigningKeys::validation();
    validation.validate_exp = false;
    let data = jsonwebtoken::decode::<InviteClaims>(token, keys.decoding(), &validation)
        .map_err(|e| InviteError::Invalid(e.to_string()))?;
    let claims = data.claims;

    if claims.exp <= now.timestamp() {
        return Err(InviteError::Expired(claims.exp));
    }
    if claims.org_id.is_empty() {
        return Err(InviteError::Invalid("empty organization".to_string()));
    }
    Ok(claims)
}

/// Consume the session's pending invite, if any.
///
/// The pending value is removed before verification, so a token is gone from
/// the session whatever the outcome. The session is not saved here; the
/// login callback saves once it has finished updating roles.
pub fn process_invite(
    session: &Session,
    keys: &SigningKeys,
    now: DateTime<Utc>,
) -> Result<Option<String>, InviteError> {
    let Some(token) = session.take_invite() else {
        return Ok(None);
    };

    match verify_invite_at(keys, &token, now) {
        Ok(claims) => {
            tracing::info!(session_id = %session.id(), org_id = %claims.org_id, "Invite accepted");
            Ok(Some(claims.org_id))
        }
        Err(e) => {
            tracing::info!(session_id = %session.id(), error = %e, "Invite rejected");
            Err(e)
        }
    }
}
