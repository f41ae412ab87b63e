//! Dialect negotiation and session authentication.
//!
//! The handshake runs `Disconnected -> DialectNegotiated -> AuthInProgress ->
//! Authenticated`, ending in `Failed` on any error. One handshake may run per
//! connection; a concurrent attempt is refused immediately.

use super::dispatch::{Dispatcher, Response, Scope};
use crate::auth::ntlm::NtlmClient;
use crate::auth::spnego::{self, NegResult};
use crate::auth::{AuthMechanism, Credentials};
use crate::config::ClientConfig;
use crate::error::{Error, ErrorKind, NtStatus, Result};
use crate::protocol::messages::common::filetime_to_datetime;
use crate::protocol::messages::{Body, Smb2NegotiateRequest, Smb2SessionSetupRequest};
use crate::protocol::smb2_constants::{
    SecurityMode, SessionFlags, Smb2Capabilities, Smb2Command, Smb2Dialect,
};
use crate::protocol::{Message, Signer};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// NTLM needs two round trips; anything beyond this is a misbehaving server
const MAX_AUTH_ROUNDS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Disconnected,
    DialectNegotiated,
    AuthInProgress,
    Authenticated,
    Failed,
}

/// What the server announced in its NEGOTIATE response
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub server_guid: Uuid,
    pub dialect: Smb2Dialect,
    pub security_mode: SecurityMode,
    pub capabilities: Smb2Capabilities,
    pub max_transact_size: u32,
    pub max_read_size: u32,
    pub max_write_size: u32,
    pub system_time: Option<DateTime<Utc>>,
}

impl ServerInfo {
    pub fn signing_required(&self) -> bool {
        self.security_mode.contains(SecurityMode::SIGNING_REQUIRED)
    }
}

/// Outcome of a successful handshake
#[derive(Debug, Clone)]
pub struct Established {
    pub session_id: u64,
    pub server: ServerInfo,
    pub username: String,
    pub is_guest: bool,
    pub signing: bool,
}

/// Highest dialect present in both lists
pub fn select_dialect(offered: &[Smb2Dialect], supported: &[Smb2Dialect]) -> Option<Smb2Dialect> {
    offered
        .iter()
        .filter(|dialect| supported.contains(dialect))
        .max()
        .copied()
}

/// Handshake driver for one connection
///
/// Progress lives on the [`Dispatcher`], so every negotiator sharing a
/// connection sees the same state.
pub struct Negotiator {
    dispatcher: Arc<Dispatcher>,
    config: Arc<ClientConfig>,
}

impl Negotiator {
    pub fn new(dispatcher: Arc<Dispatcher>, config: Arc<ClientConfig>) -> Self {
        Self { dispatcher, config }
    }

    pub fn state(&self) -> NegotiationState {
        self.dispatcher.handshake_state()
    }

    fn set_state(&self, state: NegotiationState) {
        self.dispatcher.set_handshake_state(state);
    }

    fn security_mode(&self) -> SecurityMode {
        if self.config.require_signing {
            SecurityMode::SIGNING_ENABLED | SecurityMode::SIGNING_REQUIRED
        } else {
            SecurityMode::SIGNING_ENABLED
        }
    }

    /// Negotiate a dialect and authenticate `credentials`
    pub async fn negotiate(&self, credentials: &Credentials) -> Result<Established> {
        let _guard = self.dispatcher.begin_handshake()?;

        match self.handshake(credentials).await {
            Ok(established) => {
                self.set_state(NegotiationState::Authenticated);
                Ok(established)
            }
            Err(e) => {
                warn!("handshake failed: {}", e);
                self.set_state(NegotiationState::Failed);
                Err(match e.kind() {
                    ErrorKind::Transport => Error::ConnectionLost(e.to_string()),
                    _ => e,
                })
            }
        }
    }

    async fn handshake(&self, credentials: &Credentials) -> Result<Established> {
        let server = self.negotiate_dialect().await?;
        self.set_state(NegotiationState::DialectNegotiated);
        self.dispatcher
            .set_credit_charge(server.dialect.uses_credit_charge());

        self.set_state(NegotiationState::AuthInProgress);
        self.authenticate(credentials, server).await
    }

    async fn negotiate_dialect(&self) -> Result<ServerInfo> {
        let mut body = Smb2NegotiateRequest::new(self.config.dialects.clone());
        body.security_mode = self.security_mode();
        body.client_guid = self.config.client_guid;
        let request = Message::request(Smb2Command::Negotiate, Body::NegotiateRequest(body));

        let response = self
            .dispatcher
            .call(request, Scope::connection(), None)
            .await?;
        let status = response.message.status();
        if status == NtStatus::NotSupported {
            return Err(Error::NoCompatibleDialect);
        }
        let Body::NegotiateResponse(body) = response.message.body else {
            return Err(Error::from_status(Smb2Command::Negotiate, status, "negotiate"));
        };

        let dialect = body
            .dialect()
            .filter(|dialect| self.config.dialects.contains(dialect))
            .ok_or(Error::NoCompatibleDialect)?;
        info!("negotiated SMB {}", dialect);

        Ok(ServerInfo {
            server_guid: body.server_guid,
            dialect,
            security_mode: body.security_mode,
            capabilities: body.capabilities,
            max_transact_size: body.max_transact_size,
            max_read_size: body.max_read_size,
            max_write_size: body.max_write_size,
            system_time: filetime_to_datetime(body.system_time),
        })
    }

    async fn authenticate(&self, credentials: &Credentials, server: ServerInfo) -> Result<Established> {
        let signing_required = self.config.require_signing || server.signing_required();
        let mut ntlm = NtlmClient::new(credentials, self.config.workstation.clone());
        let mut blob = spnego::wrap_neg_token_init(&ntlm.initial_token()?);
        let mut session_id = 0;

        for _ in 0..MAX_AUTH_ROUNDS {
            let mut body = Smb2SessionSetupRequest::new().with_security_blob(blob);
            body.security_mode = self.security_mode();
            let mut request = Message::request(Smb2Command::SessionSetup, Body::SessionSetupRequest(body));
            request.header.session_id = session_id;

            let response = self
                .dispatcher
                .call(request, Scope::session(session_id), None)
                .await
                .map_err(|e| match e {
                    Error::ProtocolViolation(s) => Error::AuthenticationRejected(s),
                    other => other,
                })?;

            let status = response.message.status();
            match status {
                NtStatus::MoreProcessingRequired => {
                    session_id = response.header().session_id;
                    let Body::SessionSetupResponse(body) = &response.message.body else {
                        return Err(Error::AuthenticationRejected("missing challenge".into()));
                    };
                    let challenge = spnego::unwrap_ntlm(&body.security_blob)?;
                    blob = spnego::wrap_neg_token_resp(&ntlm.respond(challenge)?);
                }
                NtStatus::Success => {
                    return self.complete(credentials, server, &ntlm, &response, signing_required);
                }
                other => {
                    return Err(Error::AuthenticationRejected(format!(
                        "session setup failed: {}",
                        other
                    )));
                }
            }
        }

        Err(Error::AuthenticationRejected(
            "too many session setup rounds".into(),
        ))
    }

    fn complete(
        &self,
        credentials: &Credentials,
        server: ServerInfo,
        ntlm: &NtlmClient,
        response: &Response,
        signing_required: bool,
    ) -> Result<Established> {
        let Body::SessionSetupResponse(body) = &response.message.body else {
            return Err(Error::AuthenticationRejected("missing session setup body".into()));
        };
        if spnego::neg_result(&body.security_blob) == Some(NegResult::Reject) {
            return Err(Error::AuthenticationRejected("server rejected the mechanism".into()));
        }
        let session_id = response.header().session_id;
        if session_id == 0 {
            return Err(Error::AuthenticationRejected("server assigned no session id".into()));
        }

        let is_guest = body
            .session_flags
            .intersects(SessionFlags::IS_GUEST | SessionFlags::IS_NULL);
        let signer = if signing_required && !is_guest {
            let key = ntlm
                .session_key()
                .ok_or_else(|| Error::AuthenticationRejected("no session key".into()))?;
            let signer = Signer::new(server.dialect, key)?;
            if response.header().is_signed() {
                signer.verify(&response.raw)?;
            }
            Some(signer)
        } else {
            None
        };
        let signing = signer.is_some();
        self.dispatcher.set_signer(signer, signing);

        info!(
            "session {:#x} established for {} (guest: {}, signing: {})",
            session_id,
            credentials.username(),
            is_guest,
            signing
        );
        Ok(Established {
            session_id,
            server,
            username: credentials.username().to_string(),
            is_guest,
            signing,
        })
    }
}
