//! On-disk store for tokens and signing credentials.
//!
//! The store is loaded once at the program entry point and written back
//! only when a value actually changed. Components never touch the store;
//! they receive the resolved values through [`crate::PublisherConfig`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// A small persisted key/value store for authentication secrets.
#[derive(Debug)]
pub struct SecretStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
    dirty: bool,
}

impl SecretStore {
    /// Load the store from `path`, or start empty if the file is absent.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            values,
            dirty: false,
        })
    }

    /// Look up a stored secret.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Store a secret, marking the store dirty if the value changed.
    pub fn set(&mut self, key: &str, value: &str) {
        let changed = self.values.get(key).map(String::as_str) != Some(value);
        if changed {
            self.values.insert(key.to_string(), value.to_string());
            self.dirty = true;
        }
    }

    /// Resolve a secret: prefer `supplied` (persisting it when it differs
    /// from the stored value), fall back to the store otherwise.
    pub fn resolve(&mut self, key: &str, supplied: Option<&str>) -> Option<String> {
        match supplied {
            Some(value) if !value.is_empty() => {
                self.set(key, value);
                Some(value.to_string())
            }
            _ => self.get(key).map(str::to_string),
        }
    }

    /// Write the store back to disk if anything changed.
    ///
    /// The file is created with owner-only permissions on first write.
    pub fn persist(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let existed = self.path.exists();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let body = serde_json::to_vec_pretty(&self.values)?;
        fs::write(&self.path, body)?;
        if !existed {
            restrict_permissions(&self.path)?;
        }
        self.dirty = false;
        Ok(())
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
