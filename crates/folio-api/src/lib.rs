//! Folio API crate - request admission pipeline and HTTP routes.
//!
//! Every request passes an ordered list of admission stages before it reaches
//! a handler: the decay rate limiter, the signed session resolver, the
//! tenant-scoped role gate and the subscription write gate. The login callback
//! additionally consumes a pending organization invite.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod invite;
pub mod pipeline;
pub mod rate_limit;
pub mod roles;
pub mod routes;
pub mod secret;
pub mod session;
pub mod state;
pub mod subscription;

pub use error::ApiError;
pub use pipeline::{Pipeline, Stage};
pub use rate_limit::DecayLimiter;
pub use routes::create_router;
pub use session::{Session, SessionCodec};
pub use state::AppState;
