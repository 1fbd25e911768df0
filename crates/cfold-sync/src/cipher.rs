//! Metadata encryption as pure transitions:
//!
//! ```text
//! EncryptedMetadata --decrypt_metadata--> DecryptedMetadata (filedrop pending)
//!                   --merge_filedrop----> DecryptedMetadata (filedrop folded into files)
//!                   --encrypt_metadata--> EncryptedMetadata
//! ```
//! None of these touch the remote store or the key/value store; the caller
//! supplies key material, mnemonic and migration state.

use std::collections::BTreeMap;

use cfold_core::{CfoldError, CfoldResult, FolderId};
use cfold_crypto::{
    compute_checksum, decrypt_string, decrypt_string_asymmetric, decrypt_with_tag,
    encoding::b64_decode, encrypt_string, encrypt_string_asymmetric, generate_key,
    verify_checksum, Recipient, RsaPrivateKey, SymmetricKey,
};
use secrecy::SecretString;
use tracing::debug;

use crate::codec::{KeyLayout, MetadataVersion};
use crate::model::{
    DecryptedFileEntry, DecryptedMetadata, EncryptedFileEntry, EncryptedFiledropEntry,
    EncryptedMetadata, FilePayload,
};

/// Metadata for a folder that has never been encrypted: no files, new key.
pub fn fresh_metadata() -> DecryptedMetadata {
    DecryptedMetadata::builder().metadata_key(generate_key()).build()
}

fn unwrap_key(wrapped: &str, private_key: &RsaPrivateKey) -> CfoldResult<SymmetricKey> {
    SymmetricKey::from_base64(&decrypt_string_asymmetric(wrapped, private_key)?)
}

/// Unwrap the metadata key, decrypt every entry and verify the checksum.
///
/// Filedrop entries are carried over still sealed. Nothing is returned unless
/// every step succeeds.
pub fn decrypt_metadata(
    encrypted: &EncryptedMetadata,
    private_key: &RsaPrivateKey,
    mnemonic: &SecretString,
    folder_id: FolderId,
    migrated: bool,
) -> CfoldResult<DecryptedMetadata> {
    let mut builder = DecryptedMetadata::builder().checksum(encrypted.checksum.clone());

    let (current_key, legacy_keys) = match &encrypted.key_layout {
        KeyLayout::Current { wrapped_key } => (Some(unwrap_key(wrapped_key, private_key)?), BTreeMap::new()),
        KeyLayout::Legacy { wrapped_keys } => {
            let keys = wrapped_keys
                .iter()
                .map(|(id, wrapped)| Ok((*id, unwrap_key(wrapped, private_key)?)))
                .collect::<CfoldResult<BTreeMap<u32, SymmetricKey>>>()?;
            (None, keys)
        }
    };

    for (file_id, entry) in &encrypted.files {
        let key = match (&current_key, entry.metadata_key) {
            (Some(key), _) => key,
            (None, Some(id)) => legacy_keys.get(&id).ok_or_else(|| {
                CfoldError::Format(format!("file {file_id} references unknown metadata key {id}"))
            })?,
            (None, None) => {
                return Err(CfoldError::Format(format!(
                    "file {file_id} has no metadata key reference"
                )))
            }
        };
        let payload = FilePayload::from_json(&decrypt_string(&entry.encrypted, key)?)?;
        builder = builder.file(
            file_id.clone(),
            DecryptedFileEntry {
                initialization_vector: entry.initialization_vector.clone(),
                authentication_tag: entry.authentication_tag.clone(),
                legacy_metadata_key_id: entry.metadata_key,
                payload,
            },
        );
    }

    let computed = compute_checksum(
        mnemonic,
        encrypted.files.keys().map(String::as_str),
        encrypted.wrapped_metadata_key(),
    );
    verify_checksum(&encrypted.checksum, &computed, folder_id, migrated)?;

    for (drop_id, entry) in &encrypted.filedrop {
        builder = builder.pending_filedrop(drop_id.clone(), entry.clone());
    }

    // Legacy metadata has no single key; keep the newest one until re-keyed.
    let metadata_key = match current_key {
        Some(key) => key,
        None => legacy_keys
            .values()
            .next_back()
            .cloned()
            .unwrap_or_else(generate_key),
    };
    for (id, key) in legacy_keys {
        builder = builder.legacy_metadata_key(id, key);
    }

    let decrypted = builder.metadata_key(metadata_key).build();
    debug!(
        folder_id,
        files = decrypted.files().len(),
        filedrop = decrypted.pending_filedrop().len(),
        "decrypted metadata"
    );
    Ok(decrypted)
}

/// Open every pending filedrop entry and add it to `files`.
///
/// All-or-nothing: one bad entry fails the merge and nothing is moved.
/// A drop id that already names a file is rejected.
pub fn merge_filedrop(
    metadata: &DecryptedMetadata,
    private_key: &RsaPrivateKey,
) -> CfoldResult<DecryptedMetadata> {
    if metadata.pending_filedrop().is_empty() {
        return Ok(metadata.clone());
    }

    let mut merged = BTreeMap::new();
    for (drop_id, entry) in metadata.pending_filedrop() {
        if metadata.file(drop_id).is_some() {
            return Err(CfoldError::Format(format!(
                "filedrop entry {drop_id} collides with an existing file"
            )));
        }
        let key = unwrap_key(&entry.encrypted_key, private_key)?;
        let iv = b64_decode(&entry.encrypted_initialization_vector)?;
        let tag = b64_decode(&entry.encrypted_tag)?;
        let payload = FilePayload::from_json(&decrypt_with_tag(&entry.encrypted, &key, &iv, &tag)?)?;

        merged.insert(
            drop_id.clone(),
            DecryptedFileEntry {
                initialization_vector: entry.initialization_vector.clone(),
                authentication_tag: entry.authentication_tag.clone(),
                legacy_metadata_key_id: None,
                payload,
            },
        );
    }

    debug!(merged = merged.len(), "merged filedrop entries");
    Ok(metadata.with_filedrop_merged(merged))
}

/// Encrypt under the metadata key held by `metadata`, wrap that key for
/// `recipient` and compute the checksum over the wrapped key.
///
/// Callers wanting a fresh key per revision call [`DecryptedMetadata::rekeyed`] first.
pub fn encrypt_metadata(
    metadata: &DecryptedMetadata,
    recipient: Recipient<'_>,
    mnemonic: &SecretString,
) -> CfoldResult<EncryptedMetadata> {
    let key = metadata.metadata_key();
    let wrapped_key = encrypt_string_asymmetric(&key.to_base64(), recipient)?;

    let files = metadata
        .files()
        .iter()
        .map(|(file_id, entry)| {
            let sealed = encrypt_string(&entry.payload.to_json()?, key)?;
            Ok((
                file_id.clone(),
                EncryptedFileEntry {
                    initialization_vector: entry.initialization_vector.clone(),
                    authentication_tag: entry.authentication_tag.clone(),
                    metadata_key: None,
                    encrypted: sealed.ciphertext,
                },
            ))
        })
        .collect::<CfoldResult<BTreeMap<_, _>>>()?;

    let checksum = compute_checksum(
        mnemonic,
        files.keys().map(String::as_str),
        Some(&wrapped_key),
    );

    Ok(EncryptedMetadata {
        version: MetadataVersion::CURRENT,
        key_layout: KeyLayout::Current { wrapped_key },
        checksum,
        files,
        filedrop: metadata.pending_filedrop().clone(),
    })
}

/// Seal a payload as a filedrop entry for `recipient`, as a write-only
/// contributor does. Each entry gets its own AES key.
pub fn seal_filedrop_entry(
    entry: &DecryptedFileEntry,
    recipient: Recipient<'_>,
) -> CfoldResult<EncryptedFiledropEntry> {
    let key = generate_key();
    let encrypted_key = encrypt_string_asymmetric(&key.to_base64(), recipient)?;
    let sealed = encrypt_string(&entry.payload.to_json()?, &key)?;

    Ok(EncryptedFiledropEntry {
        encrypted: sealed.ciphertext_only().to_string(),
        initialization_vector: entry.initialization_vector.clone(),
        authentication_tag: entry.authentication_tag.clone(),
        encrypted_key,
        encrypted_tag: sealed.tag,
        encrypted_initialization_vector: sealed.iv,
    })
}
