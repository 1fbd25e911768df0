//! AES-GCM over byte buffers and base64 text
//!
//! Composite format written by [`encrypt_string`]:
//! ```text
//! base64(ciphertext ‖ 16-byte tag) | base64(16-byte IV)
//! ```
//! The plaintext is base64-encoded *before* encryption. Existing metadata was
//! written that way, so the double encoding is part of the format.

use aes_gcm::aead::consts::{U12, U16};
use aes_gcm::aead::{Aead, KeyInit, Nonce};
use aes_gcm::aes::{Aes128, Aes256};
use aes_gcm::AesGcm;
use cfold_core::{CfoldError, CfoldResult};

use crate::delimiter::WireFormat;
use crate::encoding::{b64_bytes_to_string, b64_decode, b64_encode, string_to_b64_bytes};
use crate::keys::{random_bytes, SymmetricKey};
use crate::{IV_SIZE, TAG_SIZE};

type Aes128Gcm12 = AesGcm<Aes128, U12>;
type Aes128Gcm16 = AesGcm<Aes128, U16>;
type Aes256Gcm12 = AesGcm<Aes256, U12>;
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Output of a symmetric encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedText {
    /// `base64(ciphertext‖tag)` + delimiter + `base64(iv)`
    pub ciphertext: String,
    /// base64 IV
    pub iv: String,
    /// base64 of the trailing 16-byte tag
    pub tag: String,
}

impl SealedText {
    /// The ciphertext part without the appended IV.
    pub fn ciphertext_only(&self) -> &str {
        match WireFormat::split_last(&self.ciphertext) {
            Ok((_, head, _)) => head,
            Err(_) => &self.ciphertext,
        }
    }
}

/// AES-GCM encrypt with a 128-bit tag. Key: 16 or 32 bytes; IV: 12 or 16 bytes.
///
/// Returns `ciphertext ‖ tag`.
pub fn aes_gcm_seal(key: &[u8], iv: &[u8], plaintext: &[u8]) -> CfoldResult<Vec<u8>> {
    match (key.len(), iv.len()) {
        (16, 16) => seal_with::<Aes128Gcm16>(key, iv, plaintext),
        (16, 12) => seal_with::<Aes128Gcm12>(key, iv, plaintext),
        (32, 16) => seal_with::<Aes256Gcm16>(key, iv, plaintext),
        (32, 12) => seal_with::<Aes256Gcm12>(key, iv, plaintext),
        (k, n) => Err(unsupported(k, n)),
    }
}

/// AES-GCM decrypt of `ciphertext ‖ tag`.
pub fn aes_gcm_open(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> CfoldResult<Vec<u8>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(CfoldError::Format(format!(
            "ciphertext too short: {} bytes (minimum {TAG_SIZE})",
            ciphertext.len()
        )));
    }
    match (key.len(), iv.len()) {
        (16, 16) => open_with::<Aes128Gcm16>(key, iv, ciphertext),
        (16, 12) => open_with::<Aes128Gcm12>(key, iv, ciphertext),
        (32, 16) => open_with::<Aes256Gcm16>(key, iv, ciphertext),
        (32, 12) => open_with::<Aes256Gcm12>(key, iv, ciphertext),
        (k, n) => Err(unsupported(k, n)),
    }
}

fn seal_with<C: Aead + KeyInit>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> CfoldResult<Vec<u8>> {
    let cipher = C::new_from_slice(key)
        .map_err(|e| CfoldError::CryptoUnavailable(format!("AES-GCM key setup: {e}")))?;
    cipher
        .encrypt(Nonce::<C>::from_slice(iv), plaintext)
        .map_err(|e| CfoldError::CryptoUnavailable(format!("AES-GCM encryption failed: {e}")))
}

fn open_with<C: Aead + KeyInit>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> CfoldResult<Vec<u8>> {
    let cipher = C::new_from_slice(key)
        .map_err(|e| CfoldError::CryptoUnavailable(format!("AES-GCM key setup: {e}")))?;
    cipher
        .decrypt(Nonce::<C>::from_slice(iv), ciphertext)
        .map_err(|_| {
            CfoldError::Authentication("AES-GCM decryption failed: wrong key or corrupted data".into())
        })
}

fn unsupported(key_len: usize, iv_len: usize) -> CfoldError {
    CfoldError::CryptoUnavailable(format!(
        "AES-GCM with a {key_len}-byte key and {iv_len}-byte IV is not supported"
    ))
}

/// Tag slice of `ciphertext ‖ tag`.
pub(crate) fn trailing_tag(ciphertext: &[u8]) -> CfoldResult<&[u8]> {
    if ciphertext.len() < TAG_SIZE {
        return Err(CfoldError::Format(format!(
            "ciphertext too short for a tag: {} bytes",
            ciphertext.len()
        )));
    }
    Ok(&ciphertext[ciphertext.len() - TAG_SIZE..])
}

/// Byte-for-byte comparison that does not short-circuit.
pub(crate) fn tags_equal(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Encrypt already base64-encoded bytes with a fresh 16-byte IV.
pub fn encrypt_base64_bytes(b64_plaintext: &[u8], key: &SymmetricKey) -> CfoldResult<SealedText> {
    seal_with_format(b64_plaintext, key, WireFormat::Current)
}

pub(crate) fn seal_with_format(
    b64_plaintext: &[u8],
    key: &SymmetricKey,
    format: WireFormat,
) -> CfoldResult<SealedText> {
    let iv: [u8; IV_SIZE] = random_bytes();
    let sealed = aes_gcm_seal(key.as_bytes(), &iv, b64_plaintext)?;

    let encoded_iv = b64_encode(&iv);
    let tag = b64_encode(trailing_tag(&sealed)?);
    Ok(SealedText {
        ciphertext: format!("{}{}{}", b64_encode(&sealed), format.delimiter(), encoded_iv),
        iv: encoded_iv,
        tag,
    })
}

/// Encrypt a UTF-8 string (base64-encoded first) under `key`.
pub fn encrypt_string(plaintext: &str, key: &SymmetricKey) -> CfoldResult<SealedText> {
    encrypt_base64_bytes(&string_to_b64_bytes(plaintext), key)
}

/// Decrypt a self-contained `ciphertext|iv` string produced by [`encrypt_string`].
pub fn decrypt_string(text: &str, key: &SymmetricKey) -> CfoldResult<String> {
    let (_, cipher_b64, iv_b64) = WireFormat::split_last(text)?;
    let iv = b64_decode(iv_b64)?;
    let sealed = b64_decode(cipher_b64)?;
    let plaintext = aes_gcm_open(key.as_bytes(), &iv, &sealed)?;
    b64_bytes_to_string(&plaintext)
}

/// Decrypt with an externally stored IV and tag.
///
/// The tag carried at the end of the ciphertext must equal `expected_tag`;
/// this is checked before the AEAD runs. A trailing `|iv` on `text` is ignored.
pub fn decrypt_with_tag(
    text: &str,
    key: &SymmetricKey,
    iv: &[u8],
    expected_tag: &[u8],
) -> CfoldResult<String> {
    let plaintext = open_with_tag(text, key.as_bytes(), iv, expected_tag)?;
    b64_bytes_to_string(&plaintext)
}

pub(crate) fn open_with_tag(
    text: &str,
    key: &[u8],
    iv: &[u8],
    expected_tag: &[u8],
) -> CfoldResult<Vec<u8>> {
    let cipher_b64 = match text.rfind(WireFormat::Current.delimiter()) {
        Some(pos) => &text[..pos],
        None => text,
    };
    let sealed = b64_decode(cipher_b64)?;
    check_tag(&sealed, expected_tag)?;
    aes_gcm_open(key, iv, &sealed)
}

pub(crate) fn check_tag(sealed: &[u8], expected_tag: &[u8]) -> CfoldResult<()> {
    if !tags_equal(trailing_tag(sealed)?, expected_tag) {
        return Err(CfoldError::Authentication("tag not correct".into()));
    }
    Ok(())
}
