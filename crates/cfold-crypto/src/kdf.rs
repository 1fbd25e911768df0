//! Key derivation: recovery passphrase → private-key envelope
//!
//! Envelope layout: `base64(ciphertext‖tag) | base64(iv) | base64(salt)`.
//! The wrapping key is PBKDF2-HMAC-SHA1 (1024 rounds, 256-bit output). The
//! parameters are not recorded in the envelope, so they are fixed.

use cfold_core::{CfoldError, CfoldResult};
use hmac::Hmac;
use secrecy::{ExposeSecret, SecretString};
use sha1::Sha1;
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

use crate::delimiter::WireFormat;
use crate::encoding::{b64_bytes_to_string, b64_decode, b64_encode, string_to_b64_bytes};
use crate::keys::random_bytes;
use crate::symmetric::{aes_gcm_open, aes_gcm_seal};

/// PBKDF2 iteration count
pub const ITERATIONS: u32 = 1024;

/// Salt length for new envelopes
pub const SALT_SIZE: usize = 40;

/// Derived wrapping key length (AES-256)
pub const WRAPPING_KEY_SIZE: usize = 32;

/// GCM IV length for new envelopes. Readers also accept 16-byte IVs.
pub const ENVELOPE_IV_SIZE: usize = 12;

/// A 256-bit key derived from the recovery passphrase.
///
/// Zeroized on drop.
pub struct WrappingKey {
    bytes: [u8; WRAPPING_KEY_SIZE],
}

impl WrappingKey {
    pub fn as_bytes(&self) -> &[u8; WRAPPING_KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for WrappingKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for WrappingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappingKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// PBKDF2-HMAC-SHA1 over the passphrase bytes.
pub fn derive_wrapping_key(passphrase: &SecretString, salt: &[u8]) -> CfoldResult<WrappingKey> {
    let mut bytes = [0u8; WRAPPING_KEY_SIZE];
    pbkdf2::pbkdf2::<Hmac<Sha1>>(
        passphrase.expose_secret().as_bytes(),
        salt,
        ITERATIONS,
        &mut bytes,
    )
    .map_err(|e| CfoldError::CryptoUnavailable(format!("PBKDF2 failed: {e}")))?;
    Ok(WrappingKey { bytes })
}

/// Encrypt a PEM private key under `passphrase` with a fresh random salt.
pub fn wrap_private_key(pem: &str, passphrase: &SecretString) -> CfoldResult<String> {
    let salt: [u8; SALT_SIZE] = random_bytes();
    wrap_private_key_with_salt(pem, passphrase, &salt)
}

/// [`wrap_private_key`] with a caller-chosen salt.
pub fn wrap_private_key_with_salt(
    pem: &str,
    passphrase: &SecretString,
    salt: &[u8],
) -> CfoldResult<String> {
    let key = derive_wrapping_key(passphrase, salt)?;
    let iv: [u8; ENVELOPE_IV_SIZE] = random_bytes();
    let plaintext = Zeroizing::new(string_to_b64_bytes(pem));
    let sealed = aes_gcm_seal(key.as_bytes(), &iv, &plaintext)?;

    let delim = WireFormat::Current.delimiter();
    Ok(format!(
        "{}{delim}{}{delim}{}",
        b64_encode(&sealed),
        b64_encode(&iv),
        b64_encode(salt)
    ))
}

/// Decrypt an envelope produced by [`wrap_private_key`] (either separator).
///
/// A wrong passphrase surfaces as [`CfoldError::Authentication`].
pub fn unwrap_private_key(
    wrapped: &str,
    passphrase: &SecretString,
) -> CfoldResult<Zeroizing<String>> {
    let (format, parts) = WireFormat::split_all(wrapped)?;
    let [cipher_b64, iv_b64, salt_b64] = parts.as_slice() else {
        return Err(CfoldError::Format(format!(
            "wrapped private key has {} fields (expected 3)",
            parts.len()
        )));
    };
    debug!(?format, "unwrapping private key");

    let sealed = b64_decode(cipher_b64)?;
    let iv = b64_decode(iv_b64)?;
    let salt = b64_decode(salt_b64)?;

    let key = derive_wrapping_key(passphrase, &salt)?;
    let plaintext = Zeroizing::new(aes_gcm_open(key.as_bytes(), &iv, &sealed)?);
    b64_bytes_to_string(&plaintext).map(Zeroizing::new)
}
