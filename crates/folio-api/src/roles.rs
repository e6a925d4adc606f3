//! Tenant-scoped role gate.
//!
//! A route declares the minimum role it needs. The gate reads the user's
//! role in the session's active organization and compares ranks.

use async_trait::async_trait;
use axum::extract::Request;
use serde::Serialize;

use folio_core::types::RoleKind;

use crate::error::ApiError;
use crate::pipeline::Stage;
use crate::session::{session_of, SessionPayload};

/// Who is acting, in which organization, with what role.
///
/// Inserted into the request by `RoleStage` for handlers to extract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    pub user_id: String,
    pub org_id: String,
    pub role: RoleKind,
}

/// Decide whether a session may act with at least `required` in its active
/// organization.
///
/// Missing identity or active organization is malformed session data (400);
/// a missing or lower role is an authorization failure (401).
pub fn authorize(payload: &SessionPayload, required: RoleKind) -> Result<AuthContext, ApiError> {
    let identity = match payload.identity.as_ref() {
        Some(identity) if !identity.user_id.is_empty() => identity,
        _ => {
            tracing::info!(session_id = %payload.id, "Role check without an identity");
            return Err(ApiError::BadRequest("no user in session".to_string()));
        }
    };

    let org_id = match payload.tenant.as_deref() {
        Some(org_id) if !org_id.is_empty() => org_id,
        _ => {
            tracing::info!(user_id = %identity.user_id, "Role check without an active organization");
            return Err(ApiError::BadRequest("no active organization in session".to_string()));
        }
    };

    match identity.role_in(org_id) {
        Some(role) if role.satisfies(required) => Ok(AuthContext {
            user_id: identity.user_id.clone(),
            org_id: org_id.to_string(),
            role,
        }),
        held => {
            tracing::info!(
                user_id = %identity.user_id,
                org_id,
                required = %required,
                held = ?held,
                "Role insufficient"
            );
            Err(ApiError::Unauthorized(format!("{} role required", required)))
        }
    }
}

pub struct RoleStage {
    required: RoleKind,
}

impl RoleStage {
    pub fn new(required: RoleKind) -> Self {
        Self { required }
    }
}

#[async_trait]
impl Stage for RoleStage {
    fn name(&self) -> &'static str {
        "role"
    }

    async fn apply(&self, req: &mut Request) -> Result<(), ApiError> {
        let session = session_of(req)?;
        let context = authorize(&session.payload(), self.required)?;
        req.extensions_mut().insert(context);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use folio_core::types::RoleSnapshot;

    fn payload(roles: &[(&str, RoleKind)], tenant: Option<&str>) -> SessionPayload {
        let mut snapshot = RoleSnapshot::new("u1");
        for (org, role) in roles {
            snapshot.grant(org, *role);
        }
        let mut payload = SessionPayload::fresh();
        payload.identity = Some(snapshot);
        payload.tenant = tenant.map(str::to_string);
        payload
    }

    #[test]
    fn test_editor_satisfies_viewer_route() {
        let p = payload(&[("org1", RoleKind::Editor)], Some("org1"));
        let ctx = authorize(&p, RoleKind::Viewer).unwrap();
        assert_eq!(ctx.user_id, "u1");
        assert_eq!(ctx.org_id, "org1");
        assert_eq!(ctx.role, RoleKind::Editor);
    }

    #[test]
    fn test_exact_role_passes() {
        let p = payload(&[("org1", RoleKind::Admin)], Some("org1"));
        assert!(authorize(&p, RoleKind::Admin).is_ok());
    }

    #[test]
    fn test_lower_role_is_unauthorized() {
        let p = payload(&[("org1", RoleKind::Viewer)], Some("org1"));
        let err = authorize(&p, RoleKind::Editor).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_role_in_other_org_does_not_count() {
        let p = payload(&[("org2", RoleKind::Admin)], Some("org1"));
        let err = authorize(&p, RoleKind::Viewer).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_missing_identity_is_bad_request() {
        let p = SessionPayload::fresh();
        let err = authorize(&p, RoleKind::Viewer).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_empty_user_id_is_bad_request() {
        let mut p = SessionPayload::fresh();
        p.identity = Some(RoleSnapshot::new(""));
        p.tenant = Some("org1".to_string());
        let err = authorize(&p, RoleKind::Viewer).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_missing_tenant_is_bad_request() {
        let p = payload(&[("org1", RoleKind::Admin)], None);
        let err = authorize(&p, RoleKind::Viewer).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stage_without_session_is_internal_error() {
        let stage = RoleStage::new(RoleKind::Viewer);
        let mut req = axum::http::Request::get("/")
            .body(axum::body::Body::empty())
            .unwrap();
        let err = stage.apply(&mut req).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
