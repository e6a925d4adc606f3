//! SQLite-backed `OrgStore`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use folio_core::error::{FolioError, Result};
use folio_core::store::OrgStore;
use folio_core::types::{Organization, RoleKind, RoleSnapshot, Subscription};

use crate::db::Database;

/// Organization, subscription and role records kept in SQLite.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or rename an organization and set its score count.
    pub fn upsert_organization(&self, organization: &Organization) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO organizations (id, name, score_count) VALUES (?1, ?2, ?3)
                 ON CONFLICT (id) DO UPDATE SET name = excluded.name, score_count = excluded.score_count",
                rusqlite::params![organization.id, organization.name, organization.score_count],
            )
            .map_err(|e| FolioError::Storage(format!("Failed to save organization: {}", e)))?;
            Ok(())
        })
    }

    pub fn upsert_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO subscriptions (org_id, expires_at, max_scores) VALUES (?1, ?2, ?3)
                 ON CONFLICT (org_id) DO UPDATE SET
                     expires_at = excluded.expires_at,
                     max_scores = excluded.max_scores",
                rusqlite::params![
                    subscription.org_id,
                    subscription.expires.timestamp(),
                    subscription.max_scores
                ],
            )
            .map_err(|e| FolioError::Storage(format!("Failed to save subscription: {}", e)))?;
            Ok(())
        })
    }

    /// Run `f` against the database on the blocking pool. The connection
    /// mutex is never taken on an async worker.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| FolioError::Storage(format!("Database task failed: {}", e)))?
    }
}

#[async_trait]
impl OrgStore for SqliteStore {
    async fn get_subscription(&self, org_id: &str) -> Result<Subscription> {
        let id = org_id.to_string();
        let row: Option<(i64, i64)> = self
            .blocking(move |db| {
                db.with_conn(|conn| {
                    conn.query_row(
                        "SELECT expires_at, max_scores FROM subscriptions WHERE org_id = ?1",
                        rusqlite::params![id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()
                    .map_err(|e| FolioError::Storage(e.to_string()))
                })
            })
            .await?;

        let (expires_at, max_scores) =
            row.ok_or_else(|| FolioError::NotFound(format!("subscription for {}", org_id)))?;
        let expires = DateTime::<Utc>::from_timestamp(expires_at, 0).ok_or_else(|| {
            FolioError::InvalidData(format!("subscription expiry {} out of range", expires_at))
        })?;

        Ok(Subscription {
            org_id: org_id.to_string(),
            expires,
            max_scores,
        })
    }

    async fn get_organization(&self, org_id: &str) -> Result<Organization> {
        let id = org_id.to_string();
        self.blocking(move |db| {
            db.with_conn(|conn| {
                conn.query_row(
                    "SELECT id, name, score_count FROM organizations WHERE id = ?1",
                    rusqlite::params![id],
                    |row| {
                        Ok(Organization {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            score_count: row.get(2)?,
                        })
                    },
                )
                .optional()
                .map_err(|e| FolioError::Storage(e.to_string()))
            })
        })
        .await?
        .ok_or_else(|| FolioError::NotFound(format!("organization {}", org_id)))
    }

    async fn register_role(&self, user_id: &str, org_id: &str, role: RoleKind) -> Result<()> {
        let (user, org) = (user_id.to_string(), org_id.to_string());
        // MAX keeps an existing higher role in place.
        self.blocking(move |db| {
            db.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO roles (user_id, org_id, role) VALUES (?1, ?2, ?3)
                     ON CONFLICT (user_id, org_id) DO UPDATE SET role = MAX(role, excluded.role)",
                    rusqlite::params![user, org, role.rank()],
                )
                .map_err(|e| FolioError::Storage(format!("Failed to register role: {}", e)))?;
                Ok(())
            })
        })
        .await?;
        tracing::debug!(user_id, org_id, role = %role, "Role registered");
        Ok(())
    }

    async fn roles_for_user(&self, user_id: &str) -> Result<RoleSnapshot> {
        let user = user_id.to_string();
        let rows: Vec<(String, i64)> = self
            .blocking(move |db| {
                db.with_conn(|conn| {
                    let mut stmt = conn
                        .prepare("SELECT org_id, role FROM roles WHERE user_id = ?1")
                        .map_err(|e| FolioError::Storage(e.to_string()))?;
                    let rows = stmt
                        .query_map(rusqlite::params![user], |row| Ok((row.get(0)?, row.get(1)?)))
                        .map_err(|e| FolioError::Storage(e.to_string()))?
                        .collect::<std::result::Result<Vec<_>, _>>()
                        .map_err(|e| FolioError::Storage(e.to_string()))?;
                    Ok(rows)
                })
            })
            .await?;

        let mut snapshot = RoleSnapshot::new(user_id);
        for (org_id, rank) in rows {
            snapshot.roles.insert(org_id, RoleKind::from_rank(rank)?);
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::mpsc;
    use std::time::Instant;

    fn store() -> SqliteStore {
        let store = SqliteStore::new(Arc::new(Database::in_memory().unwrap()));
        store
            .upsert_organization(&Organization {
                id: "band-1".to_string(),
                name: "Town Band".to_string(),
                score_count: 4,
            })
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_get_organization() {
        let store = store();
        let org = store.get_organization("band-1").await.unwrap();
        assert_eq!(org.name, "Town Band");
        assert_eq!(org.score_count, 4);

        assert!(matches!(
            store.get_organization("missing").await,
            Err(FolioError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_subscription_roundtrip_at_second_precision() {
        let store = store();
        let expires = DateTime::<Utc>::from_timestamp(Utc::now().timestamp(), 0).unwrap()
            + Duration::days(30);
        store
            .upsert_subscription(&Subscription {
                org_id: "band-1".to_string(),
                expires,
                max_scores: 100,
            })
            .unwrap();

        let sub = store.get_subscription("band-1").await.unwrap();
        assert_eq!(sub.expires, expires);
        assert_eq!(sub.max_scores, 100);
    }

    #[tokio::test]
    async fn test_missing_subscription_is_not_found() {
        let store = store();
        assert!(matches!(
            store.get_subscription("band-1").await,
            Err(FolioError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_register_role_keeps_higher_role() {
        let store = store();
        store.register_role("u1", "band-1", RoleKind::Editor).await.unwrap();
        store.register_role("u1", "band-1", RoleKind::Viewer).await.unwrap();
        let snapshot = store.roles_for_user("u1").await.unwrap();
        assert_eq!(snapshot.role_in("band-1"), Some(RoleKind::Editor));

        store.register_role("u1", "band-1", RoleKind::Admin).await.unwrap();
        let snapshot = store.roles_for_user("u1").await.unwrap();
        assert_eq!(snapshot.role_in("band-1"), Some(RoleKind::Admin));
    }

    #[tokio::test]
    async fn test_register_role_unknown_org_fails() {
        let store = store();
        let err = store
            .register_role("u1", "nowhere", RoleKind::Viewer)
            .await
            .unwrap_err();
        assert!(matches!(err, FolioError::Storage(_)));
    }

    #[tokio::test]
    async fn test_roles_for_user_without_grants() {
        let store = store();
        let snapshot = store.roles_for_user("nobody").await.unwrap();
        assert!(snapshot.roles.is_empty());
    }

    #[tokio::test]
    async fn test_busy_connection_does_not_block_timeout() {
        let store = store();
        let db = Arc::clone(&store.db);
        let (held_tx, held_rx) = mpsc::channel();
        let holder = std::thread::spawn(move || {
            db.with_conn(|_| {
                held_tx.send(()).unwrap();
                std::thread::sleep(std::time::Duration::from_millis(500));
                Ok(())
            })
            .unwrap();
        });
        held_rx.recv().unwrap();

        let started = Instant::now();
        let fetched = tokio::time::timeout(std::time::Duration::from_millis(50), async {
            tokio::join!(
                store.get_subscription("band-1"),
                store.get_organization("band-1")
            )
        })
        .await;
        let elapsed = started.elapsed();

        assert!(fetched.is_err(), "lookups should time out while the connection is held");
        assert!(elapsed < std::time::Duration::from_millis(400), "elapsed {:?}", elapsed);
        holder.join().unwrap();

        // Once the connection is free again the store answers normally.
        assert_eq!(store.get_organization("band-1").await.unwrap().score_count, 4);
    }
}
