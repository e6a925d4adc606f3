use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{FolioError, Result};

/// Top-level configuration for the Folio backend.
///
/// Loaded from `~/.folio/config.toml` by default. Each section configures one
/// stage of the request admission pipeline or the process around it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FolioConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl FolioConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FolioConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values the admission pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let max = self.rate_limit.max_requests_per_window;
        if max.is_nan() || max <= 0.0 {
            return Err(FolioError::Config(format!(
                "rate_limit.max_requests_per_window must be positive, got {}",
                self.rate_limit.max_requests_per_window
            )));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(FolioError::Config(
                "rate_limit.window_secs must be at least 1".to_string(),
            ));
        }
        if self.session.cookie_name.is_empty() {
            return Err(FolioError::Config(
                "session.cookie_name must not be empty".to_string(),
            ));
        }
        if let Some(secret) = &self.session.signing_secret {
            if secret.len() < 16 {
                return Err(FolioError::Config(
                    "session.signing_secret must be at least 16 bytes".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// General process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Address the HTTP server binds to.
    pub bind: String,
    /// Port the HTTP server listens on.
    pub port: u16,
    /// Data directory for the SQLite database and the generated signing secret.
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            bind: "127.0.0.1".to_string(),
            port: 3030,
            data_dir: "~/.folio/data".to_string(),
        }
    }
}

/// Decay rate limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Smoothed request count at which a client starts being rejected.
    pub max_requests_per_window: f64,
    /// Decay window in seconds.
    pub window_secs: u64,
    /// Seconds between sweeps of fully decayed observations.
    pub cleanup_interval_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests_per_window: 120.0,
            window_secs: 60,
            cleanup_interval_secs: 300,
        }
    }
}

/// Signed session cookie settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    /// Session lifetime in seconds; also the cookie Max-Age.
    pub timeout_secs: u64,
    /// HMAC secret for cookies and invite tokens. Generated on first start when unset.
    pub signing_secret: Option<String>,
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "folio_session".to_string(),
            path: "/".to_string(),
            secure: true,
            http_only: true,
            timeout_secs: 7 * 24 * 60 * 60,
            signing_secret: None,
        }
    }
}

/// Subscription enforcement settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// When false the write gate passes every request (self-hosted and trial deployments).
    pub require_enforcement: bool,
    /// Upper bound for the concurrent subscription + organization lookup.
    pub fetch_timeout_ms: u64,
    /// Score quota of the synthesized free-tier subscription.
    pub free_tier_max_scores: i64,
}

impl SubscriptionConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            require_enforcement: false,
            fetch_timeout_ms: 2000,
            free_tier_max_scores: 5,
        }
    }
}

/// Login and invitation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Where `/auth/login` sends the browser after recording a pending invite.
    pub login_redirect: String,
    /// Public base URL used when building invite links.
    pub public_url: String,
    /// Invite token lifetime in seconds.
    pub invite_ttl_secs: u64,
    /// Accept `?user=<id>` on the login callback. Only for self-hosted and test setups.
    pub dev_login: bool,
    /// Request header set by a trusted authenticating proxy in front of the
    /// callback route. Ignored when `dev_login` is on.
    pub identity_header: String,
}

impl AuthConfig {
    pub fn invite_ttl(&self) -> Duration {
        Duration::from_secs(self.invite_ttl_secs)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_redirect: "/auth/callback".to_string(),
            public_url: "http://127.0.0.1:3030".to_string(),
            invite_ttl_secs: 7 * 24 * 60 * 60,
            dev_login: false,
            identity_header: "x-forwarded-user".to_string(),
        }
    }
}
