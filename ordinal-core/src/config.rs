//! `~/.ordinal/config.yaml`: access tokens, rate limit, maintenance cadence.
//!
//! Every section is optional; a missing file yields [`OrdinalConfig::default`].
//!
//! ```yaml
//! tokens:
//!   - token: s3cret
//!     caller: editor
//!     capabilities: [edit_records, administer]
//! rate_limit:
//!   max_saves: 30
//!   window_secs: 60
//! maintenance:
//!   interval_secs: 300
//!   sync_ttl_secs: 3600
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, StoreError};
use crate::store::{home, ordinal_root};

/// Something a caller is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// List records and save a new order.
    EditRecords,
    /// Run migrations and stop the daemon.
    Administer,
}

/// One accepted bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub token: String,
    /// Name used for logging and rate-limit accounting.
    pub caller: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Save-order calls allowed per caller per window.
    pub max_saves: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_saves: 30,
            window_secs: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// How often the daemon checks whether maintenance is due.
    pub interval_secs: u64,
    /// How long a completed maintenance sync stays fresh.
    pub sync_ttl_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            sync_ttl_secs: 3600,
        }
    }
}

impl MaintenanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn sync_ttl(&self) -> Duration {
        Duration::from_secs(self.sync_ttl_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrdinalConfig {
    pub tokens: Vec<TokenGrant>,
    pub rate_limit: RateLimitConfig,
    pub maintenance: MaintenanceConfig,
}

impl OrdinalConfig {
    /// Look up the grant for a presented token.
    pub fn grant(&self, token: &str) -> Option<&TokenGrant> {
        self.tokens.iter().find(|g| g.token == token)
    }
}

/// `<home>/.ordinal/config.yaml`
pub fn config_path_at(home: &Path) -> PathBuf {
    ordinal_root(home).join("config.yaml")
}

/// Load the config, falling back to defaults when the file is absent.
pub fn load_at(home: &Path) -> Result<OrdinalConfig, StoreError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(OrdinalConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if contents.trim().is_empty() {
        return Ok(OrdinalConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<OrdinalConfig, StoreError> {
    load_at(&home()?)
}
