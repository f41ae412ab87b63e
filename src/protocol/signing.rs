//! SMB2 message signing.
//!
//! Dialects 2.0.2 and 2.1 sign with HMAC-SHA256 keyed by the session key and
//! keep the first 16 bytes. Dialects 3.0 and 3.0.2 sign with AES-128-CMAC
//! under a key derived from the session key by the SP800-108 counter-mode KDF.
//! The signature occupies bytes 48..64 of the header and is zero while the
//! MAC is computed.

use super::header::{SIGNATURE_LEN, SIGNATURE_OFFSET};
use super::smb2_constants::{Smb2Dialect, Smb2HeaderFlags, SMB2_HEADER_SIZE};
use crate::error::{Error, Result};
use aes::Aes128;
use cmac::Cmac;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const FLAGS_OFFSET: usize = 16;

const SIGNING_LABEL: &[u8] = b"SMB2AESCMAC\0";
const SIGNING_CONTEXT: &[u8] = b"SmbSign\0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningAlgorithm {
    HmacSha256,
    AesCmac,
}

impl SigningAlgorithm {
    pub fn for_dialect(dialect: Smb2Dialect) -> Self {
        if dialect.is_smb3() {
            SigningAlgorithm::AesCmac
        } else {
            SigningAlgorithm::HmacSha256
        }
    }
}

/// Signs outgoing and verifies incoming messages for one session
#[derive(Clone)]
pub struct Signer {
    algorithm: SigningAlgorithm,
    key: Vec<u8>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl Signer {
    /// Build the signer for a session established under `dialect`
    pub fn new(dialect: Smb2Dialect, session_key: &[u8]) -> Result<Self> {
        if session_key.is_empty() {
            return Err(Error::SigningError("empty session key".into()));
        }
        let algorithm = SigningAlgorithm::for_dialect(dialect);
        let key = match algorithm {
            SigningAlgorithm::HmacSha256 => session_key.to_vec(),
            SigningAlgorithm::AesCmac => {
                derive_key(session_key, SIGNING_LABEL, SIGNING_CONTEXT)?.to_vec()
            }
        };
        Ok(Self { algorithm, key })
    }

    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// Set the SIGNED flag and write the signature into `message`
    pub fn sign(&self, message: &mut [u8]) -> Result<()> {
        if message.len() < SMB2_HEADER_SIZE {
            return Err(Error::SigningError("message shorter than a header".into()));
        }

        let flags = u32::from_le_bytes(read4(message, FLAGS_OFFSET));
        let flags = flags | Smb2HeaderFlags::SIGNED.bits();
        message[FLAGS_OFFSET..FLAGS_OFFSET + 4].copy_from_slice(&flags.to_le_bytes());

        message[SIGNATURE_OFFSET..SIGNATURE_OFFSET + SIGNATURE_LEN].fill(0);
        let signature = self.mac(message)?;
        message[SIGNATURE_OFFSET..SIGNATURE_OFFSET + SIGNATURE_LEN].copy_from_slice(&signature);
        Ok(())
    }

    /// Check the signature carried by a received message
    pub fn verify(&self, message: &[u8]) -> Result<()> {
        if message.len() < SMB2_HEADER_SIZE {
            return Err(Error::SigningError("message shorter than a header".into()));
        }

        let mut received = [0u8; SIGNATURE_LEN];
        received.copy_from_slice(&message[SIGNATURE_OFFSET..SIGNATURE_OFFSET + SIGNATURE_LEN]);

        let mut copy = message.to_vec();
        copy[SIGNATURE_OFFSET..SIGNATURE_OFFSET + SIGNATURE_LEN].fill(0);
        let expected = self.mac(&copy)?;

        if expected != received {
            return Err(Error::SigningError("signature mismatch".into()));
        }
        Ok(())
    }

    fn mac(&self, data: &[u8]) -> Result<[u8; SIGNATURE_LEN]> {
        let mut out = [0u8; SIGNATURE_LEN];
        match self.algorithm {
            SigningAlgorithm::HmacSha256 => {
                let mut mac = HmacSha256::new_from_slice(&self.key)
                    .map_err(|e| Error::SigningError(e.to_string()))?;
                mac.update(data);
                out.copy_from_slice(&mac.finalize().into_bytes()[..SIGNATURE_LEN]);
            }
            SigningAlgorithm::AesCmac => {
                let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(&self.key)
                    .map_err(|e| Error::SigningError(e.to_string()))?;
                mac.update(data);
                out.copy_from_slice(&mac.finalize().into_bytes()[..SIGNATURE_LEN]);
            }
        }
        Ok(out)
    }
}

fn read4(buf: &[u8], at: usize) -> [u8; 4] {
    [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]
}

/// SP800-108 counter mode KDF with HMAC-SHA256, one iteration, 128-bit output
pub fn derive_key(key: &[u8], label: &[u8], context: &[u8]) -> Result<[u8; 16]> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| Error::CryptoError(e.to_string()))?;
    mac.update(&1u32.to_be_bytes());
    mac.update(label);
    mac.update(&[0u8]);
    mac.update(context);
    mac.update(&128u32.to_be_bytes());

    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes()[..16]);
    Ok(out)
}
