//! Application state shared across all route handlers and admission stages.

use std::sync::Arc;
use std::time::Instant;

use folio_core::config::FolioConfig;
use folio_core::store::OrgStore;
use folio_core::types::RoleKind;

use crate::auth::{provider_from_config, IdentityProvider};
use crate::pipeline::Pipeline;
use crate::rate_limit::{DecayLimiter, RateLimitStage};
use crate::roles::RoleStage;
use crate::secret::SigningKeys;
use crate::session::{SessionCodec, SessionStage};
use crate::subscription::SubscriptionStage;

/// Shared application state.
///
/// All fields are `Arc` (or cheap clones of one) so the state can be cloned
/// into every handler task.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<FolioConfig>,
    /// Organization, subscription and role records.
    pub store: Arc<dyn OrgStore>,
    /// Resolves the user on the login callback.
    pub identity: Arc<dyn IdentityProvider>,
    /// Per-client request rate; also swept by the background cleanup task.
    pub limiter: Arc<DecayLimiter>,
    pub sessions: Arc<SessionCodec>,
    /// Keys for invite tokens. Sessions hold their own copy.
    pub keys: SigningKeys,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: FolioConfig, store: Arc<dyn OrgStore>, signing_secret: &str) -> Self {
        let keys = SigningKeys::from_secret(signing_secret.as_bytes());
        let identity: Arc<dyn IdentityProvider> = Arc::from(provider_from_config(&config.auth));
        Self {
            limiter: Arc::new(DecayLimiter::from_config(&config.rate_limit)),
            sessions: Arc::new(SessionCodec::new(&config.session, keys.clone())),
            config: Arc::new(config),
            store,
            identity,
            keys,
            start_time: Instant::now(),
        }
    }

    /// Swap the identity provider.
    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = identity;
        self
    }

    /// Rate limiting only. Wraps the whole router, fallback included.
    pub fn rate_limit_pipeline(&self) -> Pipeline {
        Pipeline::new().with(RateLimitStage::new(Arc::clone(&self.limiter)))
    }

    /// Session resolution.
    pub fn session_pipeline(&self) -> Pipeline {
        Pipeline::new().with(SessionStage::new(Arc::clone(&self.sessions)))
    }

    /// Session plus a minimum role in the active organization.
    pub fn role_pipeline(&self, required: RoleKind) -> Pipeline {
        self.session_pipeline().with(RoleStage::new(required))
    }

    /// Role gate followed by the subscription write gate.
    pub fn write_pipeline(&self, required: RoleKind) -> Pipeline {
        self.role_pipeline(required).with(SubscriptionStage::new(
            Arc::clone(&self.store),
            self.config.subscription.clone(),
        ))
    }
}
