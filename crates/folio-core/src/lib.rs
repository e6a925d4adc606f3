pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::FolioConfig;
pub use error::{FolioError, Result};
pub use store::{MemoryStore, OrgStore};
pub use types::*;
