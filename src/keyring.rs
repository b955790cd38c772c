//! The keyring: identity plus circle bindings.
//!
//! A local JSON document that answers "which membranes can I cross?".
//! Local-only is the safe default everywhere: an unknown circle, a missing
//! binding, or a missing keyring all mean no sync.
//!
//! Encryption keys are stored as opaque base64; a human reading the file
//! cannot extract raw key material without a decode step.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::error::ChoraError;

pub const KEYRING_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPolicy {
    #[serde(rename = "local-only")]
    LocalOnly,
    #[serde(rename = "cloud")]
    Cloud,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircleBinding {
    pub sync_policy: SyncPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key_b64: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyring {
    pub version: u32,
    pub identity: Identity,
    #[serde(default)]
    pub bindings: BTreeMap<String, CircleBinding>,
}

impl Keyring {
    pub fn new(user_id: impl Into<String>) -> Self {
        Keyring {
            version: KEYRING_VERSION,
            identity: Identity {
                user_id: user_id.into(),
                signing_key_path: None,
            },
            bindings: BTreeMap::new(),
        }
    }

    /// Default location: `~/.chora/keyring.json`.
    pub fn default_path() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".chora")
            .join("keyring.json")
    }

    /// Load from disk. A missing file yields an anonymous keyring with no
    /// bindings (everything local-only).
    pub fn load(path: &Path) -> Result<Keyring, ChoraError> {
        if !path.exists() {
            return Ok(Keyring::new("anonymous"));
        }
        let raw = std::fs::read_to_string(path)?;
        let keyring: Keyring = serde_json::from_str(&raw)?;
        if keyring.version != KEYRING_VERSION {
            return Err(ChoraError::InvalidData(format!(
                "unsupported keyring version {}",
                keyring.version
            )));
        }
        Ok(keyring)
    }

    pub fn save(&self, path: &Path) -> Result<(), ChoraError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn binding(&self, circle_id: &str) -> Option<&CircleBinding> {
        self.bindings.get(circle_id)
    }

    /// Does this circle stay on this machine? True for unknown circles.
    pub fn is_local_only(&self, circle_id: &str) -> bool {
        match self.binding(circle_id) {
            Some(binding) => binding.sync_policy == SyncPolicy::LocalOnly,
            None => true,
        }
    }

    pub fn bind(
        &mut self,
        circle_id: impl Into<String>,
        sync_policy: SyncPolicy,
        encryption_key: Option<&[u8]>,
    ) {
        self.bindings.insert(
            circle_id.into(),
            CircleBinding {
                sync_policy,
                encryption_key_b64: encryption_key
                    .map(|k| base64::engine::general_purpose::STANDARD.encode(k)),
                default: false,
            },
        );
    }

    pub fn default_circle(&self) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(_, b)| b.default)
            .map(|(id, _)| id.as_str())
    }

    pub fn cloud_circles(&self) -> Vec<&str> {
        self.bindings
            .iter()
            .filter(|(_, b)| b.sync_policy == SyncPolicy::Cloud)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Decode a circle's encryption key.
    pub fn encryption_key(&self, circle_id: &str) -> Result<Option<Vec<u8>>, ChoraError> {
        let Some(binding) = self.binding(circle_id) else {
            return Ok(None);
        };
        let Some(encoded) = &binding.encryption_key_b64 else {
            return Ok(None);
        };
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map(Some)
            .map_err(|e| ChoraError::InvalidData(format!("bad encryption key encoding: {}", e)))
    }
}
