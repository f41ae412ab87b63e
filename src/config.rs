//! Client configuration, loadable from TOML.
//!
//! ```toml
//! dialects = ["2.1", "3.0", "3.0.2"]
//! require_signing = true
//! workstation = "BUILD01"
//! request_timeout_secs = 10
//! ```

use crate::error::{Error, Result};
use crate::protocol::smb2_constants::Smb2Dialect;
use crate::transport::{TransportConfig, DEFAULT_MAX_FRAME_SIZE};
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Settings shared by every connection a client opens
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Client GUID sent in NEGOTIATE
    pub client_guid: Uuid,
    /// Dialects offered, any order
    #[serde(deserialize_with = "deserialize_dialects")]
    pub dialects: Vec<Smb2Dialect>,
    /// Sign every message even if the server does not require it
    pub require_signing: bool,
    /// Workstation name sent during NTLM authentication
    pub workstation: String,
    /// TCP port for direct-hosted SMB
    pub port: u16,
    pub connect_timeout_secs: u64,
    /// Default deadline for a single request
    pub request_timeout_secs: u64,
    pub max_frame_size: usize,
    /// Preferred READ/WRITE size, capped by what the server negotiates
    pub io_chunk_size: u32,
    /// Credits asked for on every request
    pub credit_request: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_guid: Uuid::new_v4(),
            dialects: Smb2Dialect::ALL.to_vec(),
            require_signing: false,
            workstation: String::from("RUST-SMB-CLIENT"),
            port: 445,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            io_chunk_size: 64 * 1024,
            credit_request: 64,
        }
    }
}

fn deserialize_dialects<'de, D>(deserializer: D) -> std::result::Result<Vec<Smb2Dialect>, D::Error>
where
    D: Deserializer<'de>,
{
    let names = Vec::<String>::deserialize(deserializer)?;
    names
        .iter()
        .map(|name| name.parse::<Smb2Dialect>().map_err(serde::de::Error::custom))
        .collect()
}

impl ClientConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ClientConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and parse a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dialects.is_empty() {
            return Err(Error::Config("no dialects configured".into()));
        }
        if self.io_chunk_size == 0 {
            return Err(Error::Config("io_chunk_size must be positive".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("request_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            max_frame_size: self.max_frame_size,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}
