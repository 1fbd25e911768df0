//! File content encryption: AES-GCM over raw bytes
//!
//! Unlike metadata payloads, content is not base64-encoded before
//! encryption. The IV and tag travel in the file's metadata entry.

use std::path::Path;

use cfold_core::CfoldResult;
use tracing::debug;

use crate::keys::{random_bytes, SymmetricKey};
use crate::symmetric::{aes_gcm_open, aes_gcm_seal, check_tag, trailing_tag};
use crate::{IV_SIZE, TAG_SIZE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedContent {
    /// ciphertext ‖ tag
    pub data: Vec<u8>,
    pub iv: [u8; IV_SIZE],
    pub tag: [u8; TAG_SIZE],
}

pub fn encrypt_content(plaintext: &[u8], key: &SymmetricKey) -> CfoldResult<EncryptedContent> {
    let iv: [u8; IV_SIZE] = random_bytes();
    let data = aes_gcm_seal(key.as_bytes(), &iv, plaintext)?;
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(trailing_tag(&data)?);
    Ok(EncryptedContent { data, iv, tag })
}

/// Decrypt `ciphertext ‖ tag`, checking the trailing tag against `expected_tag` first.
pub fn decrypt_content(
    data: &[u8],
    key: &SymmetricKey,
    iv: &[u8],
    expected_tag: &[u8],
) -> CfoldResult<Vec<u8>> {
    check_tag(data, expected_tag)?;
    aes_gcm_open(key.as_bytes(), iv, data)
}

/// Encrypt `src` into `dst`; returns the IV and tag to record in metadata.
pub fn encrypt_file(
    src: &Path,
    dst: &Path,
    key: &SymmetricKey,
) -> CfoldResult<([u8; IV_SIZE], [u8; TAG_SIZE])> {
    let plaintext = std::fs::read(src)?;
    let sealed = encrypt_content(&plaintext, key)?;
    std::fs::write(dst, &sealed.data)?;
    debug!(src = %src.display(), bytes = plaintext.len(), "encrypted file");
    Ok((sealed.iv, sealed.tag))
}

pub fn decrypt_file(
    src: &Path,
    dst: &Path,
    key: &SymmetricKey,
    iv: &[u8],
    expected_tag: &[u8],
) -> CfoldResult<()> {
    let data = std::fs::read(src)?;
    let plaintext = decrypt_content(&data, key, iv, expected_tag)?;
    std::fs::write(dst, plaintext)?;
    debug!(dst = %dst.display(), "decrypted file");
    Ok(())
}
