//! Organization and subscription records consumed by the admission layer.
//!
//! `OrgStore` is the seam between request admission and whatever holds the
//! authoritative records. `MemoryStore` backs tests and trial deployments;
//! the SQLite implementation lives in `folio-storage`.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{FolioError, Result};
use crate::types::{Organization, RoleKind, RoleSnapshot, Subscription};

/// Read and grant operations the admission pipeline needs from the record store.
#[async_trait]
pub trait OrgStore: Send + Sync {
    /// Current subscription of an organization.
    async fn get_subscription(&self, org_id: &str) -> Result<Subscription>;

    /// Organization record including its current score count.
    async fn get_organization(&self, org_id: &str) -> Result<Organization>;

    /// Grant `role` to `user_id` in `org_id`.
    ///
    /// Idempotent, and never lowers a role the user already holds there.
    async fn register_role(&self, user_id: &str, org_id: &str, role: RoleKind) -> Result<()>;

    /// Every role the user holds, across all organizations.
    async fn roles_for_user(&self, user_id: &str) -> Result<RoleSnapshot>;
}

/// In-process `OrgStore`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    organizations: RwLock<HashMap<String, Organization>>,
    subscriptions: RwLock<HashMap<String, Subscription>>,
    roles: RwLock<HashMap<String, RoleSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_organization(&self, organization: Organization) -> Result<()> {
        let mut map = self
            .organizations
            .write()
            .map_err(|e| FolioError::Storage(format!("organization lock poisoned: {}", e)))?;
        map.insert(organization.id.clone(), organization);
        Ok(())
    }

    pub fn put_subscription(&self, subscription: Subscription) -> Result<()> {
        let mut map = self
            .subscriptions
            .write()
            .map_err(|e| FolioError::Storage(format!("subscription lock poisoned: {}", e)))?;
        map.insert(subscription.org_id.clone(), subscription);
        Ok(())
    }
}

#[async_trait]
impl OrgStore for MemoryStore {
    async fn get_subscription(&self, org_id: &str) -> Result<Subscription> {
        let map = self
            .subscriptions
            .read()
            .map_err(|e| FolioError::Storage(format!("subscription lock poisoned: {}", e)))?;
        map.get(org_id)
            .cloned()
            .ok_or_else(|| FolioError::NotFound(format!("subscription for {}", org_id)))
    }

    async fn get_organization(&self, org_id: &str) -> Result<Organization> {
        let map = self
            .organizations
            .read()
            .map_err(|e| FolioError::Storage(format!("organization lock poisoned: {}", e)))?;
        map.get(org_id)
            .cloned()
            .ok_or_else(|| FolioError::NotFound(format!("organization {}", org_id)))
    }

    async fn register_role(&self, user_id: &str, org_id: &str, role: RoleKind) -> Result<()> {
        let mut map = self
            .roles
            .write()
            .map_err(|e| FolioError::Storage(format!("role lock poisoned: {}", e)))?;
        let snapshot = map
            .entry(user_id.to_string())
            .or_insert_with(|| RoleSnapshot::new(user_id));
        if snapshot.grant(org_id, role) {
            tracing::info!(user_id, org_id, role = %role, "Role granted");
        }
        Ok(())
    }

    async fn roles_for_user(&self, user_id: &str) -> Result<RoleSnapshot> {
        let map = self
            .roles
            .read()
            .map_err(|e| FolioError::Storage(format!("role lock poisoned: {}", e)))?;
        Ok(map
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| RoleSnapshot::new(user_id)))
    }
}
