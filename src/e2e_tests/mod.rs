//! End-to-end tests against an in-process SMB2 server

pub mod mock_server;

mod file_operations;
mod lifecycle;
mod negotiation;
mod requests;
mod shares;
mod transfers;

pub use mock_server::{MockControl, MockOptions};

use crate::auth::Credentials;
use crate::client::{Session, SmbClient, Tree};
use crate::config::ClientConfig;
use crate::Result;
use std::sync::Arc;

const DUPLEX_BUFFER: usize = 1 << 20;

/// Client and server wired together over an in-memory duplex stream
pub struct TestHarness {
    pub control: Arc<MockControl>,
    pub options: MockOptions,
    pub config: ClientConfig,
}

impl TestHarness {
    pub fn new() -> Self {
        Self {
            control: MockControl::new(),
            options: MockOptions::default(),
            config: ClientConfig::default(),
        }
    }

    pub fn with_options(mut self, options: MockOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::user(self.options.username.clone(), self.options.password.clone())
            .with_domain(self.options.domain.clone())
    }

    /// Connect with `credentials`, starting a fresh server connection
    pub async fn connect_as(&self, credentials: Credentials) -> Result<Session> {
        let (client_io, server_io) = tokio::io::duplex(DUPLEX_BUFFER);
        mock_server::spawn(server_io, self.options.clone(), Arc::clone(&self.control));
        SmbClient::new(self.config.clone())
            .connect_stream(client_io, "mockserver", credentials)
            .await
    }

    pub async fn connect(&self) -> Result<Session> {
        self.connect_as(self.credentials()).await
    }

    /// Authenticated session with the first share open
    pub async fn open_share(&self) -> Result<Tree> {
        let session = self.connect().await?;
        session.open_tree(&self.options.shares[0]).await
    }
}
