//! Signed cookie sessions.
//!
//! The whole session is one typed payload, serialized as an HS256-signed
//! token and carried in a single cookie. It is decoded once per request by
//! `SessionStage` and exposed to later stages and handlers as a `Session`
//! handle in the request extensions.
//!
//! Mutations are only persisted by an explicit `Session::save`, which
//! re-signs the payload into a pending `Set-Cookie` header; the pipeline
//! attaches that header to the outgoing response.
//!
//! A cookie that fails verification (bad signature after a secret rotation,
//! expired, garbled) is discarded and a fresh empty session is issued. The
//! request itself never fails on a bad cookie; gates that need session
//! content then reject because that content is absent.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use folio_core::config::SessionConfig;
use folio_core::types::RoleSnapshot;

use crate::error::ApiError;
use crate::pipeline::Stage;
use crate::secret::SigningKeys;

/// Browsers drop cookies larger than this.
pub const MAX_COOKIE_BYTES: usize = 4096;

// =============================================================================
// Payload
// =============================================================================

/// Cached outcome of the subscription gate for one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionCache {
    pub org_id: String,
    pub write_allowed: bool,
    /// Expiry of the subscription the decision was based on.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires: DateTime<Utc>,
}

impl SubscriptionCache {
    /// The cached decision, if it applies to `org_id` and the subscription
    /// it was computed from has not expired by `now`.
    pub fn decision_for(&self, org_id: &str, now: DateTime<Utc>) -> Option<bool> {
        (self.org_id == org_id && self.expires >= now).then_some(self.write_allowed)
    }
}

/// Everything a session carries, grouped by concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPayload {
    /// Stable id for log correlation; not a credential.
    pub id: Uuid,
    /// Authenticated user and their roles. `None` before login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<RoleSnapshot>,
    /// Active organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<SubscriptionCache>,
    /// Signed invite waiting for the login callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite: Option<String>,
}

impl SessionPayload {
    pub fn fresh() -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: None,
            tenant: None,
            subscription: None,
            invite: None,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|s| s.user_id.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    #[serde(flatten)]
    payload: SessionPayload,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session signing failed: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),
    #[error("session cookie is {size} bytes, limit is {MAX_COOKIE_BYTES}")]
    TooLarge { size: usize },
    #[error("session cookie is not a valid header value")]
    InvalidHeader,
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Encodes payloads into cookies and back.
#[derive(Debug)]
pub struct SessionCodec {
    cookie_name: String,
    path: String,
    secure: bool,
    http_only: bool,
    timeout: Duration,
    keys: SigningKeys,
}

impl SessionCodec {
    pub fn new(config: &SessionConfig, keys: SigningKeys) -> Self {
        Self {
            cookie_name: config.cookie_name.clone(),
            path: config.path.clone(),
            secure: config.secure,
            http_only: config.http_only,
            timeout: config.timeout(),
            keys,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Resolve the session for a request.
    pub fn resolve(self: &Arc<Self>, headers: &HeaderMap) -> Session {
        let payload = match self.find_cookie(headers) {
            None => {
                let payload = SessionPayload::fresh();
                tracing::debug!(session_id = %payload.id, "No session cookie, issuing a new session");
                payload
            }
            Some(token) => match self.decode(&token) {
                Ok(payload) => payload,
                Err(e) => {
                    let payload = SessionPayload::fresh();
                    tracing::warn!(
                        error = %e,
                        session_id = %payload.id,
                        "Session cookie rejected, issuing a new session"
                    );
                    payload
                }
            },
        };
        Session::new(payload, Arc::clone(self))
    }

    /// Verify a cookie value and return its payload.
    pub fn decode(&self, token: &str) -> Result<SessionPayload, jsonwebtoken::errors::Error> {
        let data = jsonwebtoken::decode::<SessionClaims>(
            token,
            self.keys.decoding(),
            &SigningKeys::validation(),
        )?;
        Ok(data.claims.payload)
    }

    /// Sign a payload into a cookie value valid for the session timeout.
    pub fn encode(&self, payload: &SessionPayload) -> Result<String, SessionError> {
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            payload: payload.clone(),
            iat: now,
            exp: now + self.timeout.as_secs() as i64,
        };
        Ok(jsonwebtoken::encode(
            &SigningKeys::header(),
            &claims,
            self.keys.encoding(),
        )?)
    }

    /// Build the full `Set-Cookie` header for a signed value.
    pub fn set_cookie(&self, value: &str) -> Result<HeaderValue, SessionError> {
        let mut cookie = format!(
            "{}={}; Path={}; Max-Age={}; SameSite=Lax",
            self.cookie_name,
            value,
            self.path,
            self.timeout.as_secs()
        );
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        if cookie.len() > MAX_COOKIE_BYTES {
            return Err(SessionError::TooLarge { size: cookie.len() });
        }
        HeaderValue::from_str(&cookie).map_err(|_| SessionError::InvalidHeader)
    }

    fn find_cookie(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value.trim_matches('"').to_string())
    }
}

// =============================================================================
// Per-request handle
// =============================================================================

#[derive(Debug)]
struct SessionState {
    payload: SessionPayload,
    modified: bool,
    pending_cookie: Option<HeaderValue>,
}

/// The session of the current request.
///
/// Cloning yields another handle to the same request-local state, which is
/// how stages and handlers share it through the request extensions.
#[derive(Debug, Clone)]
pub struct Session {
    state: Arc<Mutex<SessionState>>,
    codec: Arc<SessionCodec>,
}

impl Session {
    fn new(payload: SessionPayload, codec: Arc<SessionCodec>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState {
                payload,
                modified: false,
                pending_cookie: None,
            })),
            codec,
        }
    }

    pub fn id(&self) -> Uuid {
        self.lock().payload.id
    }

    /// Snapshot of the current payload.
    pub fn payload(&self) -> SessionPayload {
        self.lock().payload.clone()
    }

    /// Mutate the payload. The change is not persisted until `save`.
    pub fn update<T>(&self, f: impl FnOnce(&mut SessionPayload) -> T) -> T {
        let mut state = self.lock();
        let out = f(&mut state.payload);
        state.modified = true;
        out
    }

    /// Remove and return the pending invite.
    pub fn take_invite(&self) -> Option<String> {
        let mut state = self.lock();
        let invite = state.payload.invite.take();
        if invite.is_some() {
            state.modified = true;
        }
        invite
    }

    /// Replace the payload with an empty one under a new id.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.payload = SessionPayload::fresh();
        state.modified = true;
    }

    /// Re-sign the payload into the cookie that will be sent with the response.
    pub fn save(&self) -> Result<(), SessionError> {
        let mut state = self.lock();
        let value = self.codec.encode(&state.payload)?;
        let cookie = self.codec.set_cookie(&value)?;
        state.pending_cookie = Some(cookie);
        state.modified = false;
        Ok(())
    }

    pub fn is_modified(&self) -> bool {
        self.lock().modified
    }

    /// Append the saved cookie, if any, to response headers.
    pub fn write_cookie(&self, headers: &mut HeaderMap) {
        let mut state = self.lock();
        if state.modified {
            tracing::debug!(session_id = %state.payload.id, "Session modified but not saved");
        }
        if let Some(cookie) = state.pending_cookie.take() {
            headers.append(header::SET_COOKIE, cookie);
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Admission stage that resolves the session and stores it in the request.
pub struct SessionStage {
    codec: Arc<SessionCodec>,
}

impl SessionStage {
    pub fn new(codec: Arc<SessionCodec>) -> Self {
        Self { codec }
    }
}

#[async_trait]
impl Stage for SessionStage {
    fn name(&self) -> &'static str {
        "session"
    }

    async fn apply(&self, req: &mut Request) -> Result<(), ApiError> {
        let session = self.codec.resolve(req.headers());
        req.extensions_mut().insert(session);
        Ok(())
    }
}

/// Fetch the session a `SessionStage` put in the request.
pub fn session_of(req: &Request) -> Result<Session, ApiError> {
    req.extensions().get::<Session>().cloned().ok_or_else(|| {
        tracing::error!("Session stage missing from admission pipeline");
        ApiError::Internal("session unavailable".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::types::RoleKind;

    fn codec_with(secret: &[u8]) -> Arc<SessionCodec> {
        Arc::new(SessionCodec::new(
            &SessionConfig::default(),
            SigningKeys::from_secret(secret),
        ))
    }

    fn codec() -> Arc<SessionCodec> {
        codec_with(b"test-secret-0123456789")
    }

    fn cookie_headers(codec: &SessionCodec, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("theme=dark; {}={}", codec.cookie_name(), value))
                .unwrap(),
        );
        headers
    }

    /// Save a session and return the bare cookie value it would set.
    fn saved_value(session: &Session) -> String {
        session.save().unwrap();
        let mut headers = HeaderMap::new();
        session.write_cookie(&mut headers);
        let set_cookie = headers[header::SET_COOKIE].to_str().unwrap().to_string();
        let first = set_cookie.split(';').next().unwrap();
        first.split_once('=').unwrap().1.to_string()
    }

    #[test]
    fn test_missing_cookie_mints_fresh_session() {
        let codec = codec();
        let session = codec.resolve(&HeaderMap::new());
        let payload = session.payload();
        assert!(payload.identity.is_none());
        assert!(payload.tenant.is_none());
        assert!(!session.is_modified());
    }

    #[test]
    fn test_roundtrip_through_cookie() {
        let codec = codec();
        let session = codec.resolve(&HeaderMap::new());
        session.update(|p| {
            let mut roles = RoleSnapshot::new("u1");
            roles.grant("org1", RoleKind::Editor);
            p.identity = Some(roles);
            p.tenant = Some("org1".to_string());
        });
        let value = saved_value(&session);

        let restored = codec.resolve(&cookie_headers(&codec, &value));
        assert_eq!(restored.payload(), session.payload());
        assert_eq!(restored.id(), session.id());
    }

    #[test]
    fn test_rotated_secret_mints_fresh_session() {
        let old = codec_with(b"old-secret-0123456789");
        let session = old.resolve(&HeaderMap::new());
        session.update(|p| p.tenant = Some("org1".to_string()));
        let value = saved_value(&session);

        let new = codec_with(b"new-secret-9876543210");
        let resolved = new.resolve(&cookie_headers(&new, &value));
        assert!(resolved.payload().tenant.is_none());
        assert_ne!(resolved.id(), session.id());
    }

    #[test]
    fn test_tampered_cookie_is_rejected() {
        let codec = codec();
        let session = codec.resolve(&HeaderMap::new());
        session.update(|p| p.tenant = Some("org1".to_string()));
        let value = saved_value(&session);

        let mut parts: Vec<&str> = value.split('.').collect();
        let forged = {
            let mut p = session.payload();
            p.tenant = Some("org2".to_string());
            // Re-encode the body with a different key, keep the original signature.
            let other = codec_with(b"attacker-secret-000000");
            let token = other.encode(&p).unwrap();
            token.split('.').nth(1).unwrap().to_string()
        };
        parts[1] = &forged;
        let tampered = parts.join(".");

        assert!(codec.decode(&tampered).is_err());
        let resolved = codec.resolve(&cookie_headers(&codec, &tampered));
        assert!(resolved.payload().tenant.is_none());
    }

    #[test]
    fn test_garbage_cookie_mints_fresh_session() {
        let codec = codec();
        let resolved = codec.resolve(&cookie_headers(&codec, "not-a-token"));
        assert!(resolved.payload().identity.is_none());
    }

    #[test]
    fn test_unsaved_changes_emit_no_cookie() {
        let codec = codec();
        let session = codec.resolve(&HeaderMap::new());
        session.update(|p| p.tenant = Some("org1".to_string()));
        let mut headers = HeaderMap::new();
        session.write_cookie(&mut headers);
        assert!(headers.get(header::SET_COOKIE).is_none());
    }

    #[test]
    fn test_set_cookie_attributes() {
        let codec = codec();
        let session = codec.resolve(&HeaderMap::new());
        session.save().unwrap();
        let mut headers = HeaderMap::new();
        session.write_cookie(&mut headers);
        let cookie = headers[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("folio_session="));
        assert!(cookie.contains("Path=/"));
        assert!(cookie.contains("Max-Age=604800"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
    }

    #[test]
    fn test_oversized_session_fails_to_save() {
        let codec = codec();
        let session = codec.resolve(&HeaderMap::new());
        session.update(|p| {
            let mut roles = RoleSnapshot::new("u1");
            for i in 0..400 {
                roles.grant(&format!("organization-{:04}", i), RoleKind::Viewer);
            }
            p.identity = Some(roles);
        });
        assert!(matches!(session.save(), Err(SessionError::TooLarge { .. })));
        assert!(session.is_modified());
    }

    #[test]
    fn test_take_invite_is_single_use() {
        let codec = codec();
        let session = codec.resolve(&HeaderMap::new());
        session.update(|p| p.invite = Some("token".to_string()));
        assert_eq!(session.take_invite().as_deref(), Some("token"));
        assert_eq!(session.take_invite(), None);
    }

    #[test]
    fn test_clear_resets_payload_and_id() {
        let codec = codec();
        let session = codec.resolve(&HeaderMap::new());
        let id = session.id();
        session.update(|p| p.tenant = Some("org1".to_string()));
        session.clear();
        assert!(session.payload().tenant.is_none());
        assert_ne!(session.id(), id);
        assert!(session.is_modified());
    }

    #[test]
    fn test_clones_share_state() {
        let codec = codec();
        let a = codec.resolve(&HeaderMap::new());
        let b = a.clone();
        b.update(|p| p.tenant = Some("org9".to_string()));
        assert_eq!(a.payload().tenant.as_deref(), Some("org9"));
    }

    #[test]
    fn test_cached_decision_expires_with_subscription() {
        let now = Utc::now();
        let cache = SubscriptionCache {
            org_id: "org1".to_string(),
            write_allowed: true,
            expires: now - chrono::Duration::seconds(1),
        };
        assert_eq!(cache.decision_for("org1", now), None);

        let fresh = SubscriptionCache {
            expires: now + chrono::Duration::hours(1),
            ..cache
        };
        assert_eq!(fresh.decision_for("org1", now), Some(true));
        assert_eq!(fresh.decision_for("org2", now), None);
    }

    #[test]
    fn test_free_tier_cache_survives_cookie() {
        let codec = codec();
        let session = codec.resolve(&HeaderMap::new());
        session.update(|p| {
            p.subscription = Some(SubscriptionCache {
                org_id: "org1".to_string(),
                write_allowed: true,
                expires: DateTime::<Utc>::MAX_UTC,
            })
        });
        let value = saved_value(&session);

        let restored = codec.resolve(&cookie_headers(&codec, &value));
        let cache = restored.payload().subscription.unwrap();
        assert_eq!(cache.decision_for("org1", Utc::now()), Some(true));
    }
}
