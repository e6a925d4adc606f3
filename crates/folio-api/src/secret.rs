//! Server signing secret.
//!
//! One HMAC secret signs both session cookies and invite tokens. It comes from
//! configuration, or is generated once and persisted next to the database.

use std::path::Path;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;

/// Generate a random 64-character hex secret.
pub fn generate_secret() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Load the secret from file, or generate and save a new one.
pub fn load_or_generate_secret(secret_path: &Path) -> String {
    if let Ok(contents) = std::fs::read_to_string(secret_path) {
        let secret = contents.trim().to_string();
        if !secret.is_empty() {
            tracing::info!("Signing secret loaded from {}", secret_path.display());
            return secret;
        }
    }

    let secret = generate_secret();

    if let Some(parent) = secret_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = std::fs::write(secret_path, &secret) {
        // Sessions and invites will not survive a restart.
        tracing::warn!(error = %e, "Failed to save signing secret to {}", secret_path.display());
    } else {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(secret_path, std::fs::Permissions::from_mode(0o600));
        }
        tracing::info!("Signing secret saved to {}", secret_path.display());
    }

    secret
}

/// HS256 keys derived from the signing secret.
#[derive(Clone)]
pub struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    pub fn from_secret(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    pub fn encoding(&self) -> &EncodingKey {
        &self.encoding
    }

    pub fn decoding(&self) -> &DecodingKey {
        &self.decoding
    }

    pub fn header() -> Header {
        Header::new(Algorithm::HS256)
    }

    /// Validation that only accepts HS256 and requires an `exp` claim.
    pub fn validation() -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        validation
    }
}

impl std::fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeys").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secret_is_hex_and_random() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_load_or_generate_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("signing.key");

        let first = load_or_generate_secret(&path);
        assert!(path.exists());
        let second = load_or_generate_secret(&path);
        assert_eq!(first, second);
    }

    #[test]
    fn test_load_existing_trims_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signing.key");
        std::fs::write(&path, "abcdef0123456789\n").unwrap();
        assert_eq!(load_or_generate_secret(&path), "abcdef0123456789");
    }

    #[cfg(unix)]
    #[test]
    fn test_secret_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signing.key");
        load_or_generate_secret(&path);
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
