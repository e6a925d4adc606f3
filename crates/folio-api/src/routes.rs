//! Router setup.
//!
//! The rate limiter wraps the whole router, so every request is admitted or
//! rejected by it first, including ones that end at the 404 fallback. The
//! remaining stages are grouped by route: each group gets its pipeline as a
//! route layer, and unmatched paths never resolve a session.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use folio_core::error::FolioError;
use folio_core::types::RoleKind;

use crate::error::ApiError;
use crate::handlers;
use crate::pipeline::{admit, Pipeline};
use crate::state::AppState;

fn guarded(routes: Router<AppState>, pipeline: Pipeline) -> Router<AppState> {
    routes.route_layer(from_fn_with_state(Arc::new(pipeline), admit))
}

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let public_routes = Router::new().route("/health", get(handlers::health));

    let session_routes = guarded(
        Router::new()
            .route("/auth/login", get(handlers::login))
            .route("/auth/callback", get(handlers::callback))
            .route("/auth/logout", post(handlers::logout))
            .route("/api/session/organization", put(handlers::switch_org)),
        state.session_pipeline(),
    );

    let viewer_routes = guarded(
        Router::new()
            .route("/api/me", get(handlers::me))
            .route(
                "/api/organization/subscription",
                get(handlers::subscription_status),
            ),
        state.role_pipeline(RoleKind::Viewer),
    );

    let admin_write_routes = guarded(
        Router::new()
            .route("/api/organization/invites", post(handlers::create_invite))
            .route("/api/organization/members", post(handlers::add_member)),
        state.write_pipeline(RoleKind::Admin),
    );

    public_routes
        .merge(session_routes)
        .merge(viewer_routes)
        .merge(admin_write_routes)
        .fallback(|| async { ApiError::NotFound("no such route".to_string()) })
        .layer(from_fn_with_state(
            Arc::new(state.rate_limit_pipeline()),
            admit,
        ))
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
///
/// Peer addresses are recorded per connection so the rate limiter can key
/// on them.
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: F,
) -> Result<(), FolioError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    tracing::info!("API server stopped");
    Ok(())
}
