//! Ordered admission stages.
//!
//! A route group is guarded by one `Pipeline`: a list of stages applied in
//! order, each either letting the request continue or ending it with an
//! error response. When a session was resolved along the way, its saved
//! cookie is attached to whatever response goes out, rejections included.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;
use crate::session::Session;

/// One admission check.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Inspect (and possibly annotate) the request. `Err` ends the pipeline.
    async fn apply(&self, req: &mut Request) -> Result<(), ApiError>;
}

#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage; stages run in the order they were added.
    pub fn with(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Apply every stage, then the inner service.
    pub async fn run(&self, mut req: Request, next: Next) -> Response {
        for stage in &self.stages {
            if let Err(err) = stage.apply(&mut req).await {
                tracing::debug!(stage = stage.name(), status = %err.status(), "Request rejected");
                let session = req.extensions().get::<Session>().cloned();
                return finish(err.into_response(), session);
            }
        }

        let session = req.extensions().get::<Session>().cloned();
        let response = next.run(req).await;
        finish(response, session)
    }
}

/// Axum middleware entry point: `from_fn_with_state(Arc::new(pipeline), admit)`.
pub async fn admit(State(pipeline): State<Arc<Pipeline>>, req: Request, next: Next) -> Response {
    pipeline.run(req, next).await
}

fn finish(mut response: Response, session: Option<Session>) -> Response {
    if let Some(session) = session {
        session.write_cookie(response.headers_mut());
    }
    response
}
