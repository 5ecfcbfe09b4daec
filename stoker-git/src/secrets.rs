//! Namespaced secret lookup.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use stoker_core::SecretRef;

use crate::error::{auth_io_err, AuthError};

/// Read one key of a named secret in a namespace.
pub trait SecretStore: Send + Sync {
    fn get(&self, namespace: &str, secret: &SecretRef) -> Result<SecretString, AuthError>;
}

/// Secrets mounted as files: `<root>/<namespace>/<secretName>/<key>`.
///
/// Values are trimmed; mounted files usually end in a newline.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    root: PathBuf,
}

impl FileSecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, namespace: &str, secret: &SecretRef) -> Option<PathBuf> {
        let parts = [namespace, secret.secret_name.as_str(), secret.key.as_str()];
        // Each part must be a single path component.
        if parts
            .iter()
            .any(|p| p.is_empty() || *p == "." || *p == ".." || p.contains('/'))
        {
            return None;
        }
        Some(self.root.join(namespace).join(&secret.secret_name).join(&secret.key))
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, namespace: &str, secret: &SecretRef) -> Result<SecretString, AuthError> {
        let not_found = || AuthError::SecretNotFound {
            namespace: namespace.to_string(),
            secret_name: secret.secret_name.clone(),
            key: secret.key.clone(),
        };
        let path = self.path_for(namespace, secret).ok_or_else(not_found)?;
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(SecretString::from(value.trim().to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(not_found()),
            Err(err) => Err(auth_io_err(&path, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    #[test]
    fn reads_mounted_key() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("plant").join("git-token");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("token"), "ghp_abc\n").unwrap();

        let store = FileSecretStore::new(root.path());
        let value = store
            .get("plant", &SecretRef::new("git-token", "token"))
            .unwrap();
        assert_eq!(value.expose_secret(), "ghp_abc");
    }

    #[test]
    fn missing_key_names_secret() {
        let root = TempDir::new().unwrap();
        let store = FileSecretStore::new(root.path());
        let err = store
            .get("plant", &SecretRef::new("git-token", "token"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "key \"token\" not found in secret plant/git-token"
        );
    }

    #[test]
    fn traversal_in_reference_is_not_found() {
        let root = TempDir::new().unwrap();
        let store = FileSecretStore::new(root.path());
        let err = store
            .get("plant", &SecretRef::new("..", "passwd"))
            .unwrap_err();
        assert!(matches!(err, AuthError::SecretNotFound { .. }));
    }
}
