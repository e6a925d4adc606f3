//! Database schema migrations.

use rusqlite::Connection;
use tracing::info;

use folio_core::error::FolioError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), FolioError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| FolioError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| FolioError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: tenancy");
    }

    Ok(())
}

/// Version 1: organizations, subscriptions and role grants.
fn apply_v1(conn: &Connection) -> Result<(), FolioError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS organizations (
            id              TEXT PRIMARY KEY NOT NULL,
            name            TEXT NOT NULL,
            score_count     INTEGER NOT NULL DEFAULT 0 CHECK (score_count >= 0),
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE TABLE IF NOT EXISTS subscriptions (
            org_id          TEXT PRIMARY KEY NOT NULL
                            REFERENCES organizations (id) ON DELETE CASCADE,
            expires_at      INTEGER NOT NULL,
            max_scores      INTEGER NOT NULL CHECK (max_scores >= 0)
        );

        -- role: 0 = viewer, 1 = editor, 2 = admin
        CREATE TABLE IF NOT EXISTS roles (
            user_id         TEXT NOT NULL,
            org_id          TEXT NOT NULL
                            REFERENCES organizations (id) ON DELETE CASCADE,
            role            INTEGER NOT NULL CHECK (role BETWEEN 0 AND 2),
            granted_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            PRIMARY KEY (user_id, org_id)
        );

        CREATE INDEX IF NOT EXISTS idx_roles_user ON roles (user_id);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'tenancy');
        ",
    )
    .map_err(|e| FolioError::Storage(format!("Migration v1 failed: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, 1);
    }

    #[test]
    fn test_role_check_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO organizations (id, name) VALUES ('org1', 'Orchestra')",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO roles (user_id, org_id, role) VALUES ('u1', 'org1', 5)",
            [],
        );
        assert!(result.is_err());
    }
}
