//! Configuration for the tessera binary.
//!
//! TOML file with per-field defaults; a missing file yields the defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tessera_core::AuthorityId;

use crate::error::{CliError, CliResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TesseraConfig {
    /// Directory holding the ledger journal, content store, and per-role
    /// private stores.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// How many authorities participate in this deployment.
    #[serde(default = "default_authority_count")]
    pub authority_count: u32,

    /// Bind address for key-issuance servers.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Authority `n` listens on `base_port + n - 1`.
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Ledger poll interval during parameter agreement, in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Commit-reveal rounds to attempt before giving up.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Bounded-retry knobs for ledger publication.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("tessera-data")
}

fn default_authority_count() -> u32 {
    3
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_base_port() -> u16 {
    5060
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_rounds() -> u32 {
    3
}

fn default_retry_max_attempts() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

impl Default for TesseraConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            authority_count: default_authority_count(),
            bind_address: default_bind_address(),
            base_port: default_base_port(),
            poll_interval_secs: default_poll_interval_secs(),
            max_rounds: default_max_rounds(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl TesseraConfig {
    /// Load from a file, or fall back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CliError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| CliError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    pub fn authorities(&self) -> Vec<AuthorityId> {
        (1..=self.authority_count).map(AuthorityId).collect()
    }

    pub fn port_for(&self, authority_id: AuthorityId) -> u16 {
        self.base_port + (authority_id.0 as u16) - 1
    }

    pub fn address_for(&self, authority_id: AuthorityId) -> String {
        format!("{}:{}", self.bind_address, self.port_for(authority_id))
    }

    pub fn authority_addresses(&self) -> BTreeMap<AuthorityId, String> {
        self.authorities()
            .into_iter()
            .map(|a| (a, self.address_for(a)))
            .collect()
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger.db")
    }

    pub fn content_store_path(&self) -> PathBuf {
        self.data_dir.join("content.db")
    }

    pub fn certifier_store_path(&self) -> PathBuf {
        self.data_dir.join("certifier.db")
    }

    pub fn authority_store_path(&self, authority_id: AuthorityId) -> PathBuf {
        self.data_dir.join(format!("authority{}.db", authority_id.0))
    }
}
