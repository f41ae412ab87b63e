//! Authentication for SMB session setup

pub mod ntlm;
pub mod ntlm_crypto;
pub mod spnego;

use crate::error::Result;
use std::fmt;

/// Account used for a session, supplied per connect and never persisted
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Guest,
    User {
        username: String,
        password: String,
        domain: String,
    },
}

impl Credentials {
    pub fn user(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::User {
            username: username.into(),
            password: password.into(),
            domain: String::new(),
        }
    }

    pub fn with_domain(self, domain: impl Into<String>) -> Self {
        match self {
            Credentials::User {
                username, password, ..
            } => Credentials::User {
                username,
                password,
                domain: domain.into(),
            },
            Credentials::Guest => Credentials::Guest,
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Credentials::Guest => "Guest",
            Credentials::User { username, .. } => username,
        }
    }

    pub fn password(&self) -> &str {
        match self {
            Credentials::Guest => "",
            Credentials::User { password, .. } => password,
        }
    }

    pub fn domain(&self) -> &str {
        match self {
            Credentials::Guest => "",
            Credentials::User { domain, .. } => domain,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Credentials::Guest)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Guest => f.write_str("Guest"),
            Credentials::User {
                username, domain, ..
            } => f
                .debug_struct("User")
                .field("username", username)
                .field("password", &"<redacted>")
                .field("domain", domain)
                .finish(),
        }
    }
}

/// One side of a token-exchange authentication protocol
pub trait AuthMechanism: Send + Sync {
    /// First token sent to the server
    fn initial_token(&mut self) -> Result<Vec<u8>>;

    /// Answer a server token
    fn respond(&mut self, server_token: &[u8]) -> Result<Vec<u8>>;

    /// Key shared with the server once the exchange succeeded
    fn session_key(&self) -> Option<&[u8]>;
}
