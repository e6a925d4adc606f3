use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FolioError, Result};

// =============================================================================
// Roles
// =============================================================================

/// A user's role inside one organization.
///
/// Ordered by privilege: `Viewer < Editor < Admin`. A requirement is met by
/// any role greater than or equal to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Viewer = 0,
    Editor = 1,
    Admin = 2,
}

impl RoleKind {
    /// Numeric rank used for storage and comparison.
    pub fn rank(self) -> i64 {
        self as i64
    }

    pub fn from_rank(rank: i64) -> Result<Self> {
        match rank {
            0 => Ok(RoleKind::Viewer),
            1 => Ok(RoleKind::Editor),
            2 => Ok(RoleKind::Admin),
            other => Err(FolioError::InvalidData(format!("unknown role rank {}", other))),
        }
    }

    /// Whether this role meets a `required` minimum.
    pub fn satisfies(self, required: RoleKind) -> bool {
        self >= required
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoleKind::Viewer => "viewer",
            RoleKind::Editor => "editor",
            RoleKind::Admin => "admin",
        };
        f.write_str(s)
    }
}

/// Per-user mapping of organization id to role, embedded in the session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSnapshot {
    pub user_id: String,
    #[serde(default)]
    pub roles: HashMap<String, RoleKind>,
}

impl RoleSnapshot {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            roles: HashMap::new(),
        }
    }

    pub fn role_in(&self, org_id: &str) -> Option<RoleKind> {
        self.roles.get(org_id).copied()
    }

    /// Grant `role` in `org_id` without ever lowering an existing role.
    ///
    /// Returns `true` when the stored role changed.
    pub fn grant(&mut self, org_id: &str, role: RoleKind) -> bool {
        match self.roles.get(org_id) {
            Some(existing) if *existing >= role => false,
            _ => {
                self.roles.insert(org_id.to_string(), role);
                true
            }
        }
    }

    /// Organization to activate when the session has none: the one with the
    /// highest role, ties broken by id so the choice is stable.
    pub fn default_org(&self) -> Option<&str> {
        self.roles
            .iter()
            .max_by(|(a_id, a_role), (b_id, b_role)| a_role.cmp(b_role).then(b_id.cmp(a_id)))
            .map(|(id, _)| id.as_str())
    }
}

// =============================================================================
// Organizations and subscriptions
// =============================================================================

/// A tenant. `score_count` is the number of scores it currently stores.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub score_count: i64,
}

/// A paid (or synthesized free) plan for one organization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub org_id: String,
    pub expires: DateTime<Utc>,
    pub max_scores: i64,
}

impl Subscription {
    /// The conservative plan applied when the real one cannot be fetched.
    /// It never expires but only admits a small number of scores.
    pub fn free_tier(org_id: impl Into<String>, max_scores: i64) -> Self {
        Self {
            org_id: org_id.into(),
            expires: DateTime::<Utc>::MAX_UTC,
            max_scores,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Expired,
    TooManyScores,
    Valid,
}

/// Whether an organization may currently perform writes, and why.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionDecision {
    pub can_write: bool,
    pub state: SubscriptionState,
    pub expires: DateTime<Utc>,
    pub max_scores: i64,
}

impl SubscriptionDecision {
    /// Decide from the subscription, the organization's usage and the current time.
    ///
    /// Expiry is checked before the quota, so an expired plan reports
    /// `Expired` even when the organization is also over quota.
    pub fn evaluate(
        subscription: &Subscription,
        organization: &Organization,
        now: DateTime<Utc>,
    ) -> Self {
        let state = if subscription.expires < now {
            SubscriptionState::Expired
        } else if organization.score_count > subscription.max_scores {
            SubscriptionState::TooManyScores
        } else {
            SubscriptionState::Valid
        };

        Self {
            can_write: state == SubscriptionState::Valid,
            state,
            expires: subscription.expires,
            max_scores: subscription.max_scores,
        }
    }
}
