//! Folder metadata values.
//!
//! [`DecryptedMetadata`] is never mutated: every transform (add/remove a file,
//! re-key, merge filedrop) returns a new value, so the coordinator's stages are
//! a chain of pure steps.

use std::collections::BTreeMap;

use cfold_core::{CfoldError, CfoldResult};
use cfold_crypto::{generate_key, SymmetricKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec::{KeyLayout, MetadataVersion};

/// Decrypted per-file payload (filename, mimetype, content key, ...).
///
/// Opaque to this crate apart from a few convenience accessors; any JSON
/// object round-trips unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilePayload(Map<String, Value>);

impl FilePayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn filename(&self) -> Option<&str> {
        self.get("filename").and_then(Value::as_str)
    }

    pub fn mimetype(&self) -> Option<&str> {
        self.get("mimetype").and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_json(&self) -> CfoldResult<String> {
        serde_json::to_string(&self.0)
            .map_err(|e| CfoldError::Format(format!("serializing file payload: {e}")))
    }

    pub fn from_json(json: &str) -> CfoldResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| CfoldError::Format(format!("file payload is not a JSON object: {e}")))
    }
}

impl From<Map<String, Value>> for FilePayload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A file entry with its payload in the clear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecryptedFileEntry {
    /// base64 IV of the file *content* (not of this entry)
    pub initialization_vector: String,
    /// base64 GCM tag of the file content
    pub authentication_tag: String,
    /// Index into the legacy `metadataKeys` map this entry was encrypted under
    pub legacy_metadata_key_id: Option<u32>,
    pub payload: FilePayload,
}

impl DecryptedFileEntry {
    pub fn new(payload: FilePayload) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    pub fn with_content_iv_and_tag(
        mut self,
        initialization_vector: impl Into<String>,
        authentication_tag: impl Into<String>,
    ) -> Self {
        self.initialization_vector = initialization_vector.into();
        self.authentication_tag = authentication_tag.into();
        self
    }
}

/// Plaintext view of a folder's metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptedMetadata {
    metadata_key: SymmetricKey,
    legacy_metadata_keys: BTreeMap<u32, SymmetricKey>,
    checksum: String,
    files: BTreeMap<String, DecryptedFileEntry>,
    /// Filedrop entries still sealed for the private key; see `cipher::merge_filedrop`.
    filedrop: BTreeMap<String, EncryptedFiledropEntry>,
}

impl DecryptedMetadata {
    pub fn builder() -> DecryptedMetadataBuilder {
        DecryptedMetadataBuilder::default()
    }

    pub fn metadata_key(&self) -> &SymmetricKey {
        &self.metadata_key
    }

    pub fn legacy_metadata_keys(&self) -> &BTreeMap<u32, SymmetricKey> {
        &self.legacy_metadata_keys
    }

    /// Checksum the metadata was read with (empty for fresh or old metadata).
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn files(&self) -> &BTreeMap<String, DecryptedFileEntry> {
        &self.files
    }

    pub fn file(&self, file_id: &str) -> Option<&DecryptedFileEntry> {
        self.files.get(file_id)
    }

    pub fn pending_filedrop(&self) -> &BTreeMap<String, EncryptedFiledropEntry> {
        &self.filedrop
    }

    pub fn with_file(&self, file_id: impl Into<String>, entry: DecryptedFileEntry) -> Self {
        let mut next = self.clone();
        next.files.insert(file_id.into(), entry);
        next
    }

    pub fn without_file(&self, file_id: &str) -> Self {
        let mut next = self.clone();
        next.files.remove(file_id);
        next
    }

    /// Same files under a new metadata key. Legacy key references are dropped
    /// since every entry will be re-encrypted under `key`.
    pub fn rekeyed(&self, key: SymmetricKey) -> Self {
        let mut next = self.clone();
        next.metadata_key = key;
        next.legacy_metadata_keys.clear();
        for entry in next.files.values_mut() {
            entry.legacy_metadata_key_id = None;
        }
        next
    }

    /// Add decrypted filedrop entries and clear the pending set.
    pub(crate) fn with_filedrop_merged(&self, merged: BTreeMap<String, DecryptedFileEntry>) -> Self {
        let mut next = self.clone();
        next.files.extend(merged);
        next.filedrop.clear();
        next
    }
}

#[derive(Debug, Default)]
pub struct DecryptedMetadataBuilder {
    metadata_key: Option<SymmetricKey>,
    legacy_metadata_keys: BTreeMap<u32, SymmetricKey>,
    checksum: String,
    files: BTreeMap<String, DecryptedFileEntry>,
    filedrop: BTreeMap<String, EncryptedFiledropEntry>,
}

impl DecryptedMetadataBuilder {
    pub fn metadata_key(mut self, key: SymmetricKey) -> Self {
        self.metadata_key = Some(key);
        self
    }

    pub fn legacy_metadata_key(mut self, id: u32, key: SymmetricKey) -> Self {
        self.legacy_metadata_keys.insert(id, key);
        self
    }

    pub fn checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = checksum.into();
        self
    }

    pub fn file(mut self, file_id: impl Into<String>, entry: DecryptedFileEntry) -> Self {
        self.files.insert(file_id.into(), entry);
        self
    }

    pub fn pending_filedrop(mut self, drop_id: impl Into<String>, entry: EncryptedFiledropEntry) -> Self {
        self.filedrop.insert(drop_id.into(), entry);
        self
    }

    /// A fresh random metadata key is generated when none was set.
    pub fn build(self) -> DecryptedMetadata {
        DecryptedMetadata {
            metadata_key: self.metadata_key.unwrap_or_else(generate_key),
            legacy_metadata_keys: self.legacy_metadata_keys,
            checksum: self.checksum,
            files: self.files,
            filedrop: self.filedrop,
        }
    }
}

/// A file entry as stored remotely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptedFileEntry {
    pub initialization_vector: String,
    pub authentication_tag: String,
    /// Legacy key index; absent in current metadata
    pub metadata_key: Option<u32>,
    /// `base64(ciphertext‖tag)|base64(iv)` of the payload JSON
    pub encrypted: String,
}

/// A write-only contribution, sealed for the folder owner's public key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptedFiledropEntry {
    /// base64(ciphertext‖tag) of the payload JSON, without IV
    pub encrypted: String,
    /// content IV
    pub initialization_vector: String,
    /// content tag
    pub authentication_tag: String,
    /// RSA-OAEP wrapped one-off AES key
    pub encrypted_key: String,
    /// base64 tag of `encrypted`
    pub encrypted_tag: String,
    /// base64 IV of `encrypted`
    pub encrypted_initialization_vector: String,
}

/// Folder metadata as stored remotely.
#[derive(Debug, Clone, PartialEq)]
pub struct EncryptedMetadata {
    pub version: MetadataVersion,
    pub key_layout: KeyLayout,
    pub checksum: String,
    pub files: BTreeMap<String, EncryptedFileEntry>,
    pub filedrop: BTreeMap<String, EncryptedFiledropEntry>,
}

impl EncryptedMetadata {
    /// The wrapped key string the checksum is computed over.
    pub fn wrapped_metadata_key(&self) -> Option<&str> {
        match &self.key_layout {
            KeyLayout::Current { wrapped_key } => Some(wrapped_key),
            KeyLayout::Legacy { .. } => None,
        }
    }

    pub fn with_filedrop_entry(&self, drop_id: impl Into<String>, entry: EncryptedFiledropEntry) -> Self {
        let mut next = self.clone();
        next.filedrop.insert(drop_id.into(), entry);
        next
    }
}
