//! Decay-based per-client rate limiter.
//!
//! Each client keeps an exponentially decaying estimate of its request rate
//! instead of a fixed-window counter. On every request the previous estimate
//! is scaled by how much of the decay window is left since the last update
//! and one is added for the current request. A request is admitted while the
//! estimate stays below `max_allowed`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{ConnectInfo, Request};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use folio_core::config::RateLimitConfig;

use crate::error::ApiError;
use crate::pipeline::Stage;

#[derive(Debug, Clone, Copy)]
struct ClientObservation {
    smoothed_count: f64,
    last_update: Instant,
}

/// Result of one sweep over the observation map.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupReport {
    pub removed: usize,
    pub remaining: usize,
    /// The surviving client with the highest smoothed count.
    pub busiest: Option<(String, f64)>,
}

/// Per-client smoothed request counter behind a single lock.
///
/// Constructed once at startup and shared by reference with the admission
/// stage and the sweep task.
#[derive(Debug)]
pub struct DecayLimiter {
    max_allowed: f64,
    window: Duration,
    observations: Mutex<HashMap<String, ClientObservation>>,
}

impl DecayLimiter {
    pub fn new(max_allowed: f64, window: Duration) -> Self {
        Self {
            max_allowed,
            window: window.max(Duration::from_millis(1)),
            observations: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests_per_window, config.window())
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_allowed(&self) -> f64 {
        self.max_allowed
    }

    /// Record a request from `identifier` and report whether it is admitted.
    pub fn allowed(&self, identifier: &str) -> bool {
        self.allowed_at(identifier, Instant::now())
    }

    pub fn allowed_at(&self, identifier: &str, now: Instant) -> bool {
        let mut observations = self.lock();

        let Some(observation) = observations.get_mut(identifier) else {
            observations.insert(
                identifier.to_string(),
                ClientObservation {
                    smoothed_count: 1.0,
                    last_update: now,
                },
            );
            return true;
        };

        let smoothing = (1.0 - self.elapsed_fraction(observation.last_update, now)).max(0.0);
        observation.smoothed_count = 1.0 + smoothing * observation.smoothed_count;
        observation.last_update = now;

        observation.smoothed_count < self.max_allowed
    }

    /// Drop fully decayed observations and log the busiest survivor.
    pub fn cleanup(&self) -> CleanupReport {
        self.cleanup_at(Instant::now())
    }

    pub fn cleanup_at(&self, now: Instant) -> CleanupReport {
        let mut observations = self.lock();
        let before = observations.len();

        observations.retain(|_, obs| self.elapsed_fraction(obs.last_update, now) < 1.0);

        let busiest = observations
            .iter()
            .max_by(|(_, a), (_, b)| a.smoothed_count.total_cmp(&b.smoothed_count))
            .map(|(id, obs)| (id.clone(), obs.smoothed_count));

        let report = CleanupReport {
            removed: before - observations.len(),
            remaining: observations.len(),
            busiest,
        };
        drop(observations);

        match &report.busiest {
            Some((client, count)) => tracing::info!(
                client = %client,
                smoothed_count = count,
                removed = report.removed,
                remaining = report.remaining,
                "Rate limiter sweep"
            ),
            None => tracing::debug!(removed = report.removed, "Rate limiter sweep, no active clients"),
        }

        report
    }

    /// Current smoothed count for `identifier`, without recording a request.
    pub fn smoothed_count(&self, identifier: &str) -> Option<f64> {
        self.lock().get(identifier).map(|obs| obs.smoothed_count)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn elapsed_fraction(&self, last_update: Instant, now: Instant) -> f64 {
        now.saturating_duration_since(last_update).as_secs_f64() / self.window.as_secs_f64()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ClientObservation>> {
        self.observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run `cleanup` every `interval` until `shutdown` is notified.
pub fn spawn_cleanup(
    limiter: Arc<DecayLimiter>,
    interval: Duration,
    shutdown: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        tracing::info!(interval_secs = interval.as_secs(), "Rate limiter sweep started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    limiter.cleanup();
                }
                _ = shutdown.notified() => {
                    tracing::info!("Rate limiter sweep stopped");
                    return;
                }
            }
        }
    })
}

/// Key used for a connection: the peer IP, or the raw address string when it
/// does not parse as a socket address.
pub fn client_identifier(raw: &str) -> String {
    match raw.parse::<SocketAddr>() {
        Ok(addr) => addr.ip().to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Admission stage that rejects clients over the limit before anything else runs.
pub struct RateLimitStage {
    limiter: Arc<DecayLimiter>,
}

impl RateLimitStage {
    pub fn new(limiter: Arc<DecayLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn apply(&self, req: &mut Request) -> Result<(), ApiError> {
        let client = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| client_identifier(&addr.to_string()))
            .unwrap_or_else(|| "unknown".to_string());

        if self.limiter.allowed(&client) {
            return Ok(());
        }

        tracing::warn!(client = %client, "Rate limit exceeded");
        Err(ApiError::TooManyRequests {
            retry_after_secs: self.limiter.window().as_secs(),
        })
    }
}
