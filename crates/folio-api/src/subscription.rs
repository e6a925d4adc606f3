//! Subscription write gate.
//!
//! Write routes require the active organization to hold a subscription that
//! has not expired and whose score quota is not exceeded. The decision is
//! cached in the session so that repeated writes cost no store I/O.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use chrono::{DateTime, Utc};

use folio_core::config::SubscriptionConfig;
use folio_core::store::OrgStore;
use folio_core::types::{Organization, Subscription, SubscriptionDecision};

use crate::error::ApiError;
use crate::pipeline::Stage;
use crate::roles::AuthContext;
use crate::session::{session_of, SubscriptionCache};

/// Fetch subscription and organization concurrently and decide.
///
/// Both lookups run as one unit bounded by the configured timeout. Any
/// failure or a timeout falls back to the free tier.
pub async fn resolve_decision(
    store: &dyn OrgStore,
    org_id: &str,
    config: &SubscriptionConfig,
    now: DateTime<Utc>,
) -> SubscriptionDecision {
    let fetched = tokio::time::timeout(config.fetch_timeout(), async {
        tokio::join!(store.get_subscription(org_id), store.get_organization(org_id))
    })
    .await;

    let free_tier = || Subscription::free_tier(org_id, config.free_tier_max_scores);
    let empty_org = || Organization {
        id: org_id.to_string(),
        name: String::new(),
        score_count: 0,
    };

    let (subscription, organization) = match fetched {
        Ok((Ok(subscription), Ok(organization))) => (subscription, organization),
        Ok((subscription, organization)) => {
            if let Err(e) = &subscription {
                tracing::warn!(org_id, error = %e, "Subscription lookup failed, using free tier");
            }
            if let Err(e) = &organization {
                tracing::warn!(org_id, error = %e, "Organization lookup failed, using free tier");
            }
            (free_tier(), organization.unwrap_or_else(|_| empty_org()))
        }
        Err(_) => {
            tracing::warn!(
                org_id,
                timeout_ms = config.fetch_timeout_ms,
                "Subscription lookup timed out, using free tier"
            );
            (free_tier(), empty_org())
        }
    };

    let decision = SubscriptionDecision::evaluate(&subscription, &organization, now);
    tracing::debug!(
        org_id,
        state = ?decision.state,
        score_count = organization.score_count,
        max_scores = decision.max_scores,
        "Subscription decision computed"
    );
    decision
}

pub struct SubscriptionStage {
    store: Arc<dyn OrgStore>,
    config: SubscriptionConfig,
}

impl SubscriptionStage {
    pub fn new(store: Arc<dyn OrgStore>, config: SubscriptionConfig) -> Self {
        Self { store, config }
    }
}

#[async_trait]
impl Stage for SubscriptionStage {
    fn name(&self) -> &'static str {
        "subscription"
    }

    async fn apply(&self, req: &mut Request) -> Result<(), ApiError> {
        if !self.config.require_enforcement {
            return Ok(());
        }

        let session = session_of(req)?;
        let payload = session.payload();
        let org_id = match req.extensions().get::<AuthContext>() {
            Some(ctx) => ctx.org_id.clone(),
            None => match payload.tenant.clone() {
                Some(org_id) if !org_id.is_empty() => org_id,
                _ => {
                    tracing::info!(session_id = %payload.id, "Write without an active organization");
                    return Err(ApiError::BadRequest(
                        "no active organization in session".to_string(),
                    ));
                }
            },
        };

        let now = Utc::now();
        let cached = payload
            .subscription
            .as_ref()
            .and_then(|cache| cache.decision_for(&org_id, now));

        let write_allowed = match cached {
            Some(write_allowed) => write_allowed,
            None => {
                let decision =
                    resolve_decision(self.store.as_ref(), &org_id, &self.config, now).await;
                session.update(|p| {
                    p.subscription = Some(SubscriptionCache {
                        org_id: org_id.clone(),
                        write_allowed: decision.can_write,
                        expires: decision.expires,
                    })
                });
                if let Err(e) = session.save() {
                    tracing::warn!(org_id = %org_id, error = %e, "Failed to cache subscription decision");
                }
                decision.can_write
            }
        };

        if write_allowed {
            Ok(())
        } else {
            tracing::info!(org_id = %org_id, "Write rejected by subscription");
            Err(ApiError::Forbidden(
                "subscription does not allow writes".to_string(),
            ))
        }
    }
}
