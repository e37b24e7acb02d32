use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::ProjectDirs;
use serde_json::Value;

use crate::error::GatewayError;

/// Key under which the shell application stores the session token.
pub const TOKEN_KEY: &str = "scigateway:token";

/// Supplies the bearer/session token; issuance happens elsewhere.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// File-backed key/value store playing the role of browser local storage.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    path: Utf8PathBuf,
}

impl LocalStorage {
    pub fn new() -> Result<Self, GatewayError> {
        let dirs = ProjectDirs::from("uk.ac", "stfc", "datagateway").ok_or_else(|| {
            GatewayError::Filesystem("unable to resolve config directory".to_string())
        })?;
        let path = Utf8PathBuf::from_path_buf(dirs.config_dir().join("local-storage.json"))
            .map_err(|_| GatewayError::Filesystem("invalid config path".to_string()))?;
        Ok(Self { path })
    }

    pub fn new_with_path(path: Utf8PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, GatewayError> {
        let entries = self.read_all()?;
        Ok(entries.get(key).cloned())
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), GatewayError> {
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    pub fn remove(&self, key: &str) -> Result<(), GatewayError> {
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, GatewayError> {
        if !self.path.as_std_path().exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(self.path.as_std_path())
            .map_err(|err| GatewayError::Filesystem(err.to_string()))?;
        let value: Value = serde_json::from_str(&content)
            .map_err(|err| GatewayError::Filesystem(format!("{}: {err}", self.path)))?;
        let entries = value
            .as_object()
            .map(|object| {
                object
                    .iter()
                    .filter_map(|(key, value)| {
                        value.as_str().map(|value| (key.clone(), value.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(entries)
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), GatewayError> {
        let content = serde_json::to_vec_pretty(entries)
            .map_err(|err| GatewayError::Filesystem(err.to_string()))?;
        write_bytes_atomic(&self.path, &content)
    }
}

impl TokenSource for LocalStorage {
    fn token(&self) -> Option<String> {
        match self.get(TOKEN_KEY) {
            Ok(token) => token.filter(|token| !token.is_empty()),
            Err(err) => {
                tracing::warn!(error = %err, "unable to read token from local storage");
                None
            }
        }
    }
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), GatewayError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| GatewayError::Filesystem(err.to_string()))?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(tmp_path.as_std_path(), content)
        .map_err(|err| GatewayError::Filesystem(err.to_string()))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| GatewayError::Filesystem(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("storage.json")).unwrap();
        let storage = LocalStorage::new_with_path(path);

        assert_eq!(storage.token(), None);
        storage.set(TOKEN_KEY, "abc").unwrap();
        assert_eq!(storage.token(), Some("abc".to_string()));
        storage.remove(TOKEN_KEY).unwrap();
        assert_eq!(storage.token(), None);
    }
}
