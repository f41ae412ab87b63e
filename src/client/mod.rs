//! SMB client
//!
//! [`SmbClient`] opens connections and authenticates them. Each connection
//! carries one [`Session`], from which shares are opened as [`Tree`]s and
//! files as [`FileHandle`]s.
//!
//! ```no_run
//! use rust_smb_client::auth::Credentials;
//! use rust_smb_client::client::{OpenMode, SmbClient};
//!
//! # async fn example() -> rust_smb_client::Result<()> {
//! let client = SmbClient::default();
//! let session = client
//!     .connect_host("fileserver", Credentials::user("alice", "secret"))
//!     .await?;
//! let tree = session.open_tree("Public").await?;
//! let file = tree.open_file("docs\\readme.txt", OpenMode::Read).await?;
//! let data = file.read(0, 4096).await?;
//! file.close().await?;
//! session.logoff().await?;
//! # let _ = data;
//! # Ok(())
//! # }
//! ```

pub mod directory;
pub mod dispatch;
pub mod file;
pub mod negotiate;
pub mod path;
pub mod pipe;
pub mod resolver;
pub mod session;
pub mod transfer;
pub mod tree;

pub use directory::{DirectoryEntry, DirectoryListing};
pub use dispatch::{Dispatcher, PendingResponse, Response, Scope};
pub use file::{FileHandle, Metadata, OpenMode};
pub use negotiate::{Established, NegotiationState, Negotiator, ServerInfo};
pub use path::{Share, SmbPath, SmbServer};
pub use pipe::NamedPipe;
pub use resolver::{DnsResolver, NameResolver, StaticResolver};
pub use session::Session;
pub use transfer::{TransferControl, TransferProgress, TransferState};
pub use tree::Tree;

use crate::auth::Credentials;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::transport::{self, Connection};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

/// Lock a std mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Entry point for opening authenticated sessions
pub struct SmbClient {
    config: Arc<ClientConfig>,
    resolver: Arc<dyn NameResolver>,
}

impl Default for SmbClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl SmbClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config: Arc::new(config),
            resolver: Arc::new(DnsResolver),
        }
    }

    pub fn with_resolver(mut self, resolver: impl NameResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect to `addr` over TCP and authenticate
    pub async fn connect(
        &self,
        addr: SocketAddr,
        server_name: &str,
        credentials: Credentials,
    ) -> Result<Session> {
        let connection = transport::connect(addr, &self.config.transport()).await?;
        info!("connected to {} ({})", server_name, addr);
        self.connect_framed(connection, server_name, credentials).await
    }

    /// Resolve `host`, then connect on the configured port
    pub async fn connect_host(&self, host: &str, credentials: Credentials) -> Result<Session> {
        let address = self.resolver.resolve(host).await?;
        let addr = SocketAddr::new(address, self.config.port);
        self.connect(addr, host, credentials).await
    }

    /// Connect to the server named in `path` and open its share
    pub async fn connect_share(&self, path: &SmbPath, credentials: Credentials) -> Result<Tree> {
        let server = path.server();
        let session = match server.socket_addr(self.config.port) {
            Some(addr) => self.connect(addr, &server.hostname, credentials).await?,
            None => self.connect_host(&server.hostname, credentials).await?,
        };
        match session.open_tree(&path.share().unc()).await {
            Ok(tree) => Ok(tree),
            Err(e) => {
                if let Err(close) = session.close().await {
                    warn!("closing session after failed tree connect: {}", close);
                }
                Err(e)
            }
        }
    }

    /// Run the handshake over an already established byte stream
    pub async fn connect_stream<S>(
        &self,
        stream: S,
        server_name: &str,
        credentials: Credentials,
    ) -> Result<Session>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.connect_framed(
            Connection::from_stream(stream, self.config.max_frame_size),
            server_name,
            credentials,
        )
        .await
    }

    async fn connect_framed<S>(
        &self,
        connection: Connection<S>,
        server_name: &str,
        credentials: Credentials,
    ) -> Result<Session>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.config.validate()?;
        check_credentials(&credentials)?;
        let (reader, writer) = connection.into_split();
        let dispatcher = Dispatcher::start(reader, writer, &self.config);

        let negotiator = Negotiator::new(Arc::clone(&dispatcher), Arc::clone(&self.config));
        match negotiator.negotiate(&credentials).await {
            Ok(established) => Ok(Session::new(
                dispatcher,
                Arc::clone(&self.config),
                established,
                server_name,
            )),
            Err(e) => {
                if let Err(close) = dispatcher.shutdown().await {
                    warn!("closing connection after failed handshake: {}", close);
                }
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for SmbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmbClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A named user needs a name; guests do not
fn check_credentials(credentials: &Credentials) -> Result<()> {
    if !credentials.is_guest() && credentials.username().is_empty() {
        return Err(Error::InvalidParameter("empty user name".into()));
    }
    Ok(())
}
