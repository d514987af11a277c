//! Client-secret file management.
//!
//! The shared secret lives at `<config_dir>/secret` as 64 hex characters
//! (256 bits). The file is `0600`, its directory `0700`. A missing or
//! empty file triggers generation.

use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rand::RngCore;

use herald_types::HeraldError;

use crate::token::hex_encode;

const SECRET_FILE: &str = "secret";

/// Read the secret from `config_dir/secret`, generating and persisting a
/// new one when the file is missing or empty.
pub fn load_or_create_secret(config_dir: &Path) -> Result<String, HeraldError> {
    let path = secret_path(config_dir);

    if let Ok(data) = std::fs::read_to_string(&path) {
        let trimmed = data.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    let secret = generate_secret();
    write_secret(config_dir, &path, &secret)?;
    Ok(secret)
}

/// Generate a new secret, replacing any existing one. Every session signed
/// with the old secret is invalidated.
pub fn rotate_secret(config_dir: &Path) -> Result<String, HeraldError> {
    let path = secret_path(config_dir);
    let secret = generate_secret();
    write_secret(config_dir, &path, &secret)?;
    Ok(secret)
}

fn secret_path(config_dir: &Path) -> PathBuf {
    config_dir.join(SECRET_FILE)
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

fn write_secret(config_dir: &Path, path: &Path, secret: &str) -> Result<(), HeraldError> {
    std::fs::create_dir_all(config_dir)
        .map_err(|e| HeraldError::Config(format!("creating config dir: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(config_dir, std::fs::Permissions::from_mode(0o700))
            .map_err(|e| HeraldError::Config(format!("restricting config dir: {e}")))?;
    }

    std::fs::write(path, secret)
        .map_err(|e| HeraldError::Config(format!("writing secret: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| HeraldError::Config(format!("restricting secret file: {e}")))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn generates_64_hex_chars_when_missing() {
        let dir = TempDir::new().unwrap();
        let secret = load_or_create_secret(dir.path()).unwrap();
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));

        // Second load returns the same secret.
        let again = load_or_create_secret(dir.path()).unwrap();
        assert_eq!(secret, again);
    }

    #[test]
    fn empty_file_triggers_generation() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("secret"), "").unwrap();
        let secret = load_or_create_secret(dir.path()).unwrap();
        assert_eq!(secret.len(), 64);
    }

    #[test]
    fn rotation_replaces_secret() {
        let dir = TempDir::new().unwrap();
        let first = load_or_create_secret(dir.path()).unwrap();
        let second = rotate_secret(dir.path()).unwrap();
        assert_ne!(first, second);
        assert_eq!(load_or_create_secret(dir.path()).unwrap(), second);
    }

    #[cfg(unix)]
    #[test]
    fn secret_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("herald");
        load_or_create_secret(&nested).unwrap();

        let file_mode = std::fs::metadata(nested.join("secret"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(file_mode, 0o600);

        let dir_mode = std::fs::metadata(&nested).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }
}
