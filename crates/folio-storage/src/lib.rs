//! Folio Storage crate - SQLite persistence for organizations, subscriptions
//! and role grants.
//!
//! Provides a WAL-mode SQLite database with migrations and `SqliteStore`, the
//! production implementation of `folio_core::OrgStore`.

pub mod db;
pub mod migrations;
pub mod org_store;

pub use db::Database;
pub use org_store::SqliteStore;
