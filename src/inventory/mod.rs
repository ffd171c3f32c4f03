//! Target device inventory.
//!
//! Parses and validates `~/.config/uenv-sync/targets.toml`. Each target
//! entry describes one remote device worth deploying to, so the usual
//! boards can be addressed as `--target bbb1` instead of exporting
//! `REMOTE_HOST`/`REMOTE_USER` every time.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Where the device's boot configuration lives unless overridden.
pub const DEFAULT_REMOTE_PATH: &str = "/boot/uEnv.txt";

/// Target inventory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetInventory {
    /// Schema version for forward compatibility.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// List of targets.
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetEntry>,
}

fn default_schema_version() -> u32 {
    1
}

/// A single target device entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetEntry {
    /// Unique identifier for this target (must be unique across inventory).
    pub name: String,

    /// SSH hostname or IP address.
    pub host: String,

    /// SSH port (default: 22).
    #[serde(default = "default_port")]
    pub port: u16,

    /// SSH user (default: "debian", the stock BeagleBone account).
    #[serde(default = "default_user")]
    pub user: String,

    /// Path to SSH private key.
    #[serde(alias = "identity_file")]
    pub ssh_key_path: Option<String>,

    /// Boot configuration path on the device (default: /boot/uEnv.txt).
    #[serde(default = "default_remote_path")]
    pub remote_path: String,
}

fn default_port() -> u16 {
    22
}

fn default_user() -> String {
    "debian".to_string()
}

fn default_remote_path() -> String {
    DEFAULT_REMOTE_PATH.to_string()
}

/// Errors that can occur when loading or validating the target inventory.
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Failed to read inventory file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Duplicate target name: '{0}'")]
    DuplicateName(String),

    #[error("Target '{name}': missing required field '{field}'")]
    MissingField { name: String, field: String },

    #[error("Target '{name}': invalid value for '{field}': {reason}")]
    InvalidValue {
        name: String,
        field: String,
        reason: String,
    },

    #[error("Inventory file not found: {0}")]
    NotFound(PathBuf),
}

impl TargetInventory {
    /// Load the inventory from the default location
    /// (~/.config/uenv-sync/targets.toml).
    pub fn load_default() -> Result<Self, InventoryError> {
        let path = Self::default_path()?;
        Self::load(&path)
    }

    /// Get the default inventory file path.
    pub fn default_path() -> Result<PathBuf, InventoryError> {
        let home = std::env::var("HOME").map_err(|_| {
            InventoryError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "HOME environment variable not set",
            ))
        })?;
        Ok(PathBuf::from(home).join(".config/uenv-sync/targets.toml"))
    }

    /// Load the inventory from a specific path.
    pub fn load(path: &Path) -> Result<Self, InventoryError> {
        if !path.exists() {
            return Err(InventoryError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse the inventory from a TOML string.
    pub fn parse(content: &str) -> Result<Self, InventoryError> {
        let inventory: TargetInventory = toml::from_str(content)?;
        inventory.validate()?;
        Ok(inventory)
    }

    /// Validate the inventory.
    fn validate(&self) -> Result<(), InventoryError> {
        // Names are the lookup keys for --target; duplicates would make
        // resolution ambiguous.
        let mut seen_names = HashSet::new();
        for target in &self.targets {
            if !seen_names.insert(&target.name) {
                return Err(InventoryError::DuplicateName(target.name.clone()));
            }
        }

        for target in &self.targets {
            target.validate()?;
        }

        Ok(())
    }

    /// Get a target by name.
    pub fn get(&self, name: &str) -> Option<&TargetEntry> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// Check if the inventory is empty.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Get the number of targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }
}

impl TargetEntry {
    /// Validate the target entry.
    fn validate(&self) -> Result<(), InventoryError> {
        if self.name.is_empty() {
            return Err(InventoryError::MissingField {
                name: "(unnamed)".to_string(),
                field: "name".to_string(),
            });
        }

        if self.host.is_empty() {
            return Err(InventoryError::MissingField {
                name: self.name.clone(),
                field: "host".to_string(),
            });
        }

        if self.port == 0 {
            return Err(InventoryError::InvalidValue {
                name: self.name.clone(),
                field: "port".to_string(),
                reason: "port cannot be 0".to_string(),
            });
        }

        if self.user.is_empty() {
            return Err(InventoryError::InvalidValue {
                name: self.name.clone(),
                field: "user".to_string(),
                reason: "user cannot be empty".to_string(),
            });
        }

        if self.remote_path.is_empty() {
            return Err(InventoryError::InvalidValue {
                name: self.name.clone(),
                field: "remote_path".to_string(),
                reason: "remote_path cannot be empty".to_string(),
            });
        }

        // Keep names shell-friendly: they end up in command lines and logs.
        if !self
            .name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(InventoryError::InvalidValue {
                name: self.name.clone(),
                field: "name".to_string(),
                reason: "name must contain only alphanumeric characters, dashes, and underscores"
                    .to_string(),
            });
        }

        Ok(())
    }

    /// Get the expanded SSH key path (resolves ~ to home directory).
    pub fn expanded_ssh_key_path(&self) -> Option<PathBuf> {
        self.ssh_key_path.as_ref().map(|p| {
            if let Some(rest) = p.strip_prefix("~/") {
                if let Ok(home) = std::env::var("HOME") {
                    return PathBuf::from(home).join(rest);
                }
            }
            PathBuf::from(p)
        })
    }
}

impl Default for TargetInventory {
    fn default() -> Self {
        Self {
            schema_version: 1,
            targets: Vec::new(),
        }
    }
}
