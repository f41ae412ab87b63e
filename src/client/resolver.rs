//! Host name resolution

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;
use tracing::debug;

/// Turns a server name into an address
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Fails with `NameNotFound` when the name is unknown
    async fn resolve(&self, name: &str) -> Result<IpAddr>;
}

/// Fixed name table, for tests and pinned hosts
#[derive(Debug, Default)]
pub struct StaticResolver {
    table: RwLock<HashMap<String, IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, name: impl Into<String>, address: IpAddr) -> Self {
        self.insert(name, address);
        self
    }

    /// Names are matched case-insensitively
    pub fn insert(&self, name: impl Into<String>, address: IpAddr) {
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        table.insert(name.into().to_ascii_lowercase(), address);
    }
}

#[async_trait]
impl NameResolver for StaticResolver {
    async fn resolve(&self, name: &str) -> Result<IpAddr> {
        if let Ok(address) = name.parse() {
            return Ok(address);
        }
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table
            .get(&name.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| Error::NameNotFound(name.to_string()))
    }
}

/// System resolver
#[derive(Debug, Default, Clone, Copy)]
pub struct DnsResolver;

#[async_trait]
impl NameResolver for DnsResolver {
    async fn resolve(&self, name: &str) -> Result<IpAddr> {
        if let Ok(address) = name.parse() {
            return Ok(address);
        }
        let mut addresses = tokio::net::lookup_host((name, 0))
            .await
            .map_err(|e| Error::NameNotFound(format!("{}: {}", name, e)))?;
        let address = addresses
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| Error::NameNotFound(name.to_string()))?;
        debug!("resolved {} to {}", name, address);
        Ok(address)
    }
}
