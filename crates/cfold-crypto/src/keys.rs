//! Key generation: AES-128 metadata/filedrop keys and RSA-2048 account key pairs

use cfold_core::{CfoldError, CfoldResult};
use rand::RngCore;
use rsa::RsaPrivateKey;
use zeroize::Zeroize;

use crate::encoding::{b64_decode, b64_encode};
use crate::{KEY_SIZE, RSA_KEY_BITS};

/// A 128-bit AES key. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey {
    bytes: [u8; KEY_SIZE],
}

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> CfoldResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CfoldError::Format(format!(
                "symmetric key has wrong size: {} bytes (expected {KEY_SIZE})",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self::from_bytes(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    pub fn to_base64(&self) -> String {
        b64_encode(&self.bytes)
    }

    pub fn from_base64(s: &str) -> CfoldResult<Self> {
        let mut decoded = b64_decode(s)?;
        let key = Self::from_slice(&decoded);
        decoded.zeroize();
        key
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 128-bit key for folder metadata or a filedrop entry.
pub fn generate_key() -> SymmetricKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    SymmetricKey::from_bytes(bytes)
}

/// Generate an RSA-2048 account key pair.
pub fn generate_key_pair() -> CfoldResult<RsaPrivateKey> {
    RsaPrivateKey::new(&mut rand::thread_rng(), RSA_KEY_BITS)
        .map_err(|e| CfoldError::CryptoUnavailable(format!("RSA key generation failed: {e}")))
}

pub(crate) fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
