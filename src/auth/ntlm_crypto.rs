//! NTLMv2 cryptographic functions

use crate::error::{Error, Result};
use crate::protocol::messages::common::{filetime_now, utf16le_encode};
use byteorder::{LittleEndian, WriteBytesExt};
use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;
use rand::RngCore;

type HmacMd5 = Hmac<Md5>;

fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 16]> {
    let mut mac = HmacMd5::new_from_slice(key)
        .map_err(|e| Error::CryptoError(format!("HMAC error: {}", e)))?;
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// NT hash: MD4 of the UTF-16LE password
pub fn ntlm_hash(password: &str) -> [u8; 16] {
    let mut hasher = Md4::new();
    hasher.update(utf16le_encode(password));
    let mut hash = [0u8; 16];
    hash.copy_from_slice(&hasher.finalize());
    hash
}

/// NTOWFv2: HMAC-MD5 over the uppercased user name followed by the domain
pub fn ntlmv2_hash(username: &str, domain: &str, password: &str) -> Result<[u8; 16]> {
    let identity = format!("{}{}", username.to_uppercase(), domain);
    hmac_md5(&ntlm_hash(password), &[&utf16le_encode(&identity)])
}

/// LMv2 response: HMAC-MD5(hash, server || client challenge) followed by the client challenge
pub fn lmv2_response(
    ntlmv2_hash: &[u8],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
) -> Result<Vec<u8>> {
    let mut response = hmac_md5(ntlmv2_hash, &[server_challenge, client_challenge])?.to_vec();
    response.extend_from_slice(client_challenge);
    Ok(response)
}

/// Client blob that follows NTProofStr in an NTLMv2 response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmV2Blob {
    pub timestamp: u64,
    pub client_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

impl NtlmV2Blob {
    pub fn new(timestamp: u64, client_challenge: [u8; 8], target_info: Vec<u8>) -> Self {
        Self {
            timestamp,
            client_challenge,
            target_info,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut blob = Vec::with_capacity(32 + self.target_info.len());
        blob.extend_from_slice(&[0x01, 0x01, 0x00, 0x00]);
        blob.extend_from_slice(&[0x00; 4]);
        blob.write_u64::<LittleEndian>(self.timestamp)?;
        blob.extend_from_slice(&self.client_challenge);
        blob.extend_from_slice(&[0x00; 4]);
        blob.extend_from_slice(&self.target_info);
        blob.extend_from_slice(&[0x00; 4]);
        Ok(blob)
    }
}

/// NTProofStr: HMAC-MD5(hash, server challenge || blob)
pub fn ntlmv2_proof(ntlmv2_hash: &[u8], server_challenge: &[u8; 8], blob: &[u8]) -> Result<[u8; 16]> {
    hmac_md5(ntlmv2_hash, &[server_challenge, blob])
}

/// Full NTLMv2 response: NTProofStr followed by the blob
pub fn ntlmv2_response(
    ntlmv2_hash: &[u8],
    server_challenge: &[u8; 8],
    blob: &NtlmV2Blob,
) -> Result<Vec<u8>> {
    let blob_bytes = blob.to_bytes()?;
    let mut response = ntlmv2_proof(ntlmv2_hash, server_challenge, &blob_bytes)?.to_vec();
    response.extend_from_slice(&blob_bytes);
    Ok(response)
}

/// Session base key: HMAC-MD5(hash, NTProofStr)
pub fn ntlmv2_session_key(ntlmv2_hash: &[u8], nt_response: &[u8]) -> Result<[u8; 16]> {
    if nt_response.len() < 16 {
        return Err(Error::CryptoError("NTLMv2 response shorter than its proof".into()));
    }
    hmac_md5(ntlmv2_hash, &[&nt_response[..16]])
}

pub fn generate_client_challenge() -> [u8; 8] {
    let mut challenge = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut challenge);
    challenge
}

/// Current time as a Windows FILETIME
pub fn get_windows_timestamp() -> u64 {
    filetime_now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ntlm_hash_known_value() {
        // MD4(UTF-16LE("password"))
        assert_eq!(
            ntlm_hash("password"),
            [
                0x88, 0x46, 0xf7, 0xea, 0xee, 0x8f, 0xb1, 0x17, 0xad, 0x06, 0xbd, 0xd8, 0x30,
                0xb7, 0x58, 0x6c
            ]
        );
    }

    #[test]
    fn test_ntlmv2_hash_user_case_insensitive() {
        let a = ntlmv2_hash("User", "Domain", "password").unwrap();
        let b = ntlmv2_hash("USER", "Domain", "password").unwrap();
        let c = ntlmv2_hash("User", "Domain", "Password").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_ntlmv2_blob() {
        let blob = NtlmV2Blob::new(
            0x0123456789ABCDEF,
            [1, 2, 3, 4, 5, 6, 7, 8],
            vec![0xAA, 0xBB, 0xCC],
        );

        let bytes = blob.to_bytes().unwrap();
        assert_eq!(&bytes[0..4], &[0x01, 0x01, 0x00, 0x00]);
        assert_eq!(&bytes[16..24], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(bytes.len(), 28 + 3 + 4);
    }

    #[test]
    fn test_response_verifies_with_proof() {
        let hash = ntlmv2_hash("alice", "WORKGROUP", "secret").unwrap();
        let challenge = [9u8; 8];
        let blob = NtlmV2Blob::new(1, [2; 8], Vec::new());
        let response = ntlmv2_response(&hash, &challenge, &blob).unwrap();

        let proof = ntlmv2_proof(&hash, &challenge, &response[16..]).unwrap();
        assert_eq!(&response[..16], &proof);
        assert_eq!(ntlmv2_session_key(&hash, &response).unwrap().len(), 16);
    }

    #[test]
    fn test_generate_client_challenge() {
        assert_ne!(generate_client_challenge(), generate_client_challenge());
    }
}
