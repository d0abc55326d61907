//! Token envelope: AES-128-CBC + PKCS#7 decryption of the opaque session
//! descriptor, keyed by SHA-256(password).
//!
//! Wire layout: `base64(IV) || ':' || base64(ciphertext)`.

use std::collections::HashMap;

use aes::Aes128;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::GatewayError;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// The decrypted, validated connection descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub conn_type: String,
    pub arguments: HashMap<String, String>,
}

#[derive(Deserialize)]
struct RawDescriptor {
    #[serde(alias = "type", alias = "Type", alias = "TYPE")]
    conn_type: Option<String>,
    #[serde(alias = "Arguments", alias = "ARGUMENTS")]
    arguments: Option<HashMap<String, String>>,
}

/// Derive the AES-128 key from the configured password: SHA-256(password),
/// truncated to the first 16 bytes.
///
/// This is a deliberate narrowing, not a literal SHA-256-as-key-material
/// reading: SHA-256 produces 32 bytes, which would key AES-256, but this
/// gateway only ever decrypts, never issues, tokens — whatever external
/// service signs them must derive its key the same way (AES-128, first 16
/// bytes of the digest) or every real token will fail `decrypt_padded_mut`
/// with a bad-padding error indistinguishable from a wrong password. See
/// DESIGN.md's Open Question resolutions for the full rationale.
fn derive_key(password: &str) -> [u8; 16] {
    let digest = Sha256::digest(password.as_bytes());
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    key
}

/// Decrypt and parse a session token into a `ConnectionDescriptor`.
pub fn decrypt(password: &str, token: &str) -> Result<ConnectionDescriptor, GatewayError> {
    let (iv_b64, ct_b64) = token
        .split_once(':')
        .ok_or_else(|| GatewayError::BadToken("token missing ':' separator".to_owned()))?;

    let iv = STANDARD
        .decode(iv_b64)
        .map_err(|e| GatewayError::BadToken(format!("invalid IV base64: {e}")))?;
    let mut buf = STANDARD
        .decode(ct_b64)
        .map_err(|e| GatewayError::BadToken(format!("invalid ciphertext base64: {e}")))?;

    let key = derive_key(password);
    let iv: [u8; 16] = iv
        .try_into()
        .map_err(|_| GatewayError::BadToken("IV must be 16 bytes".to_owned()))?;
    let plaintext = Aes128CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|e| GatewayError::BadToken(format!("decryption failed: {e}")))?;

    let raw: RawDescriptor = serde_json::from_slice(plaintext)
        .map_err(|e| GatewayError::BadToken(format!("malformed descriptor JSON: {e}")))?;

    let conn_type = raw
        .conn_type
        .ok_or_else(|| GatewayError::BadToken("descriptor missing 'type'".to_owned()))?
        .to_lowercase();
    let arguments = raw.arguments.unwrap_or_default();

    Ok(ConnectionDescriptor { conn_type, arguments })
}
