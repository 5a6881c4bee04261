//! Shared secret handling.
//!
//! The secret is read at request time through a [`SecretProvider`], so a
//! rotated secret file takes effect without restarting the gate. A provider
//! that has no secret makes every protected request fail with a configuration
//! error, never an authentication bypass.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use tracing::{error, info};

use crate::error::{ConfigReason, GateError};

/// Secret bytes used as the HMAC key.
///
/// `Debug` output is redacted so the secret cannot leak through logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    /// Wrap secret bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw secret bytes, for keying the MAC.
    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret([REDACTED])")
    }
}

/// Source of the current shared secret.
pub trait SecretProvider: Send + Sync {
    /// The current secret.
    ///
    /// # Errors
    /// Returns [`GateError::Config`] when no secret is configured or it cannot be read.
    fn secret(&self) -> Result<SharedSecret, GateError>;
}

/// Secret fixed at construction time (possibly absent).
#[derive(Debug, Clone)]
pub struct StaticSecret(Option<SharedSecret>);

impl StaticSecret {
    /// A provider holding `secret`.
    pub fn new(secret: SharedSecret) -> Self {
        Self(Some(secret))
    }

    /// A provider with no secret configured.
    pub fn missing() -> Self {
        Self(None)
    }

    /// Read the secret from environment variable `var`; an unset or empty
    /// variable yields a provider with no secret.
    pub fn from_env(var: &str) -> Self {
        match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => {
                Self::new(SharedSecret::new(value.trim().as_bytes().to_vec()))
            }
            _ => Self::missing(),
        }
    }
}

impl SecretProvider for StaticSecret {
    fn secret(&self) -> Result<SharedSecret, GateError> {
        self.0.clone().ok_or_else(|| {
            GateError::config(ConfigReason::SecretMissing, "shared secret is not configured")
        })
    }
}

/// Secret read from a file, reloaded whenever the file's modification time changes.
pub struct FileSecret {
    path: PathBuf,
    cached: RwLock<Option<(SystemTime, SharedSecret)>>,
}

impl FileSecret {
    /// A provider reading from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: RwLock::new(None),
        }
    }

    /// Path of the secret file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the secret from a file.
    ///
    /// Security: verifies the file has restrictive permissions (0600 or 0400)
    /// so the secret is not readable by other users. Trailing whitespace is
    /// stripped; an empty file counts as a missing secret.
    pub fn load(path: &Path) -> Result<SharedSecret, GateError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            GateError::config(
                ConfigReason::SecretUnreadable,
                format!("Failed to read secret metadata from {}: {}", path.display(), e),
            )
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = metadata.permissions().mode();
            if mode & 0o077 != 0 {
                return Err(GateError::config(
                    ConfigReason::InsecurePermissions,
                    format!(
                        "Secret file {} has insecure permissions {:04o}, expected 0600 or 0400",
                        path.display(),
                        mode & 0o777
                    ),
                ));
            }
        }
        #[cfg(not(unix))]
        let _ = metadata;

        let mut bytes = std::fs::read(path).map_err(|e| {
            GateError::config(
                ConfigReason::SecretUnreadable,
                format!("Failed to read secret from {}: {}", path.display(), e),
            )
        })?;
        while bytes.last().is_some_and(|b| b.is_ascii_whitespace()) {
            bytes.pop();
        }
        if bytes.is_empty() {
            return Err(GateError::config(
                ConfigReason::SecretMissing,
                format!("Secret file {} is empty", path.display()),
            ));
        }

        Ok(SharedSecret::new(bytes))
    }
}

impl fmt::Debug for FileSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSecret")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SecretProvider for FileSecret {
    fn secret(&self) -> Result<SharedSecret, GateError> {
        let modified = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map_err(|e| {
                error!(
                    path = %self.path.display(),
                    reason = ConfigReason::SecretUnreadable.as_str(),
                    error = %e,
                    "Secret file unavailable"
                );
                GateError::config(
                    ConfigReason::SecretUnreadable,
                    format!("Secret file {} unavailable: {}", self.path.display(), e),
                )
            })?;

        if let Some((stamp, secret)) = self
            .cached
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            if *stamp == modified {
                return Ok(secret.clone());
            }
        }

        let secret = Self::load(&self.path).inspect_err(|e| {
            error!(
                reason = e.config_reason().map(|r| r.as_str()),
                error = %e,
                "Failed to load shared secret"
            );
        })?;
        info!(path = %self.path.display(), "Shared secret loaded");

        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = Some((modified, secret.clone()));
        Ok(secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_secret(dir: &TempDir, contents: &str, mode: u32) -> PathBuf {
        let path = dir.path().join("hmac.key");
        std::fs::write(&path, contents).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        }
        #[cfg(not(unix))]
        let _ = mode;
        path
    }

    #[test]
    fn test_debug_is_redacted() {
        let secret = SharedSecret::new(b"super-secret".to_vec());
        let rendered = format!("{:?}", secret);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn test_missing_static_secret_is_config_error() {
        let result = StaticSecret::missing().secret();
        assert!(matches!(result, Err(GateError::Config { .. })));
    }

    #[test]
    fn test_file_secret_strips_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let path = write_secret(&dir, "s3cret\n", 0o600);
        let provider = FileSecret::new(&path);
        assert_eq!(provider.secret().unwrap().expose(), b"s3cret");
    }

    #[cfg(unix)]
    #[test]
    fn test_insecure_permissions_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_secret(&dir, "s3cret", 0o644);
        let err = FileSecret::load(&path).unwrap_err();
        assert_eq!(err.config_reason(), Some(ConfigReason::InsecurePermissions));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let provider = FileSecret::new("/nonexistent/helssa/hmac.key");
        let err = provider.secret().unwrap_err();
        assert_eq!(err.config_reason(), Some(ConfigReason::SecretUnreadable));
    }

    #[test]
    fn test_empty_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = write_secret(&dir, "\n", 0o600);
        assert!(matches!(
            FileSecret::new(&path).secret(),
            Err(GateError::Config { .. })
        ));
    }
}
