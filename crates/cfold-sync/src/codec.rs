//! JSON wire format for encrypted folder metadata (versions 1.0 to 1.2).
//!
//! ```text
//! {
//!   "metadata": { "metadataKey": "..." | "metadataKeys": {"0": "..."}, "checksum": "...", "version": 1.2 },
//!   "files":    { "<id>": { "initializationVector", "authenticationTag", "metadataKey"?, "encrypted" } },
//!   "filedrop": { "<id>": { "encrypted", "initializationVector", "authenticationTag",
//!                           "encryptedKey", "encryptedTag", "encryptedInitializationVector" } }
//! }
//! ```
//! No cryptography happens here. Which key representation a document uses is
//! decided once, at parse time, as a [`KeyLayout`].

use std::collections::BTreeMap;

use cfold_core::{CfoldError, CfoldResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{EncryptedFileEntry, EncryptedFiledropEntry, EncryptedMetadata};

/// How the metadata key is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyLayout {
    /// One wrapped key under `metadataKey`
    Current { wrapped_key: String },
    /// Wrapped keys under `metadataKeys`, selected per file by index
    Legacy { wrapped_keys: BTreeMap<u32, String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataVersion {
    V1_0,
    V1_1,
    V1_2,
}

impl MetadataVersion {
    /// Version written by this crate.
    pub const CURRENT: MetadataVersion = MetadataVersion::V1_2;

    pub fn as_f64(self) -> f64 {
        match self {
            MetadataVersion::V1_0 => 1.0,
            MetadataVersion::V1_1 => 1.1,
            MetadataVersion::V1_2 => 1.2,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireDocument {
    metadata: WireHeader,
    #[serde(default)]
    files: Option<BTreeMap<String, WireFile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filedrop: Option<BTreeMap<String, WireFiledrop>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata_keys: Option<BTreeMap<u32, String>>,
    #[serde(default)]
    checksum: Option<String>,
    #[serde(default)]
    version: Value,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFile {
    #[serde(default)]
    initialization_vector: String,
    #[serde(default)]
    authentication_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata_key: Option<u32>,
    encrypted: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFiledrop {
    encrypted: String,
    #[serde(default)]
    initialization_vector: String,
    #[serde(default)]
    authentication_tag: String,
    encrypted_key: String,
    encrypted_tag: String,
    encrypted_initialization_vector: String,
}

/// Identify the metadata version. 2.x documents are recognised and rejected.
pub fn determine_version(text: &str) -> CfoldResult<MetadataVersion> {
    let doc: Value = serde_json::from_str(text)
        .map_err(|e| CfoldError::Format(format!("metadata is not JSON: {e}")))?;

    if let Some(v) = doc.pointer("/metadata/version").and_then(Value::as_f64) {
        return match (v * 10.0).round() as i64 {
            10 => Ok(MetadataVersion::V1_0),
            11 => Ok(MetadataVersion::V1_1),
            12 => Ok(MetadataVersion::V1_2),
            _ => Err(CfoldError::Format(format!("unknown metadata version {v}"))),
        };
    }

    match doc.get("version").and_then(Value::as_str) {
        Some(v @ ("2" | "2.0")) => Err(CfoldError::Format(format!(
            "metadata version {v} is not supported"
        ))),
        _ => Err(CfoldError::Format("metadata has no recognisable version".into())),
    }
}

pub fn parse_encrypted(text: &str) -> CfoldResult<EncryptedMetadata> {
    let version = determine_version(text)?;
    let doc: WireDocument = serde_json::from_str(text)
        .map_err(|e| CfoldError::Format(format!("parsing encrypted metadata: {e}")))?;

    let key_layout = match (doc.metadata.metadata_key, doc.metadata.metadata_keys) {
        (Some(wrapped_key), _) if !wrapped_key.is_empty() => KeyLayout::Current { wrapped_key },
        (_, Some(wrapped_keys)) if !wrapped_keys.is_empty() => KeyLayout::Legacy { wrapped_keys },
        _ => return Err(CfoldError::Format("metadata carries no metadata key".into())),
    };

    let files = doc
        .files
        .unwrap_or_default()
        .into_iter()
        .map(|(id, f)| {
            (
                id,
                EncryptedFileEntry {
                    initialization_vector: f.initialization_vector,
                    authentication_tag: f.authentication_tag,
                    metadata_key: f.metadata_key,
                    encrypted: f.encrypted,
                },
            )
        })
        .collect();

    let filedrop = doc
        .filedrop
        .unwrap_or_default()
        .into_iter()
        .map(|(id, d)| {
            (
                id,
                EncryptedFiledropEntry {
                    encrypted: d.encrypted,
                    initialization_vector: d.initialization_vector,
                    authentication_tag: d.authentication_tag,
                    encrypted_key: d.encrypted_key,
                    encrypted_tag: d.encrypted_tag,
                    encrypted_initialization_vector: d.encrypted_initialization_vector,
                },
            )
        })
        .collect();

    Ok(EncryptedMetadata {
        version,
        key_layout,
        checksum: doc.metadata.checksum.unwrap_or_default(),
        files,
        filedrop,
    })
}

pub fn serialize_encrypted(metadata: &EncryptedMetadata) -> CfoldResult<String> {
    let (metadata_key, metadata_keys) = match &metadata.key_layout {
        KeyLayout::Current { wrapped_key } => (Some(wrapped_key.clone()), None),
        KeyLayout::Legacy { wrapped_keys } => (None, Some(wrapped_keys.clone())),
    };

    let files = metadata
        .files
        .iter()
        .map(|(id, f)| {
            (
                id.clone(),
                WireFile {
                    initialization_vector: f.initialization_vector.clone(),
                    authentication_tag: f.authentication_tag.clone(),
                    metadata_key: f.metadata_key,
                    encrypted: f.encrypted.clone(),
                },
            )
        })
        .collect();

    let filedrop = (!metadata.filedrop.is_empty()).then(|| {
        metadata
            .filedrop
            .iter()
            .map(|(id, d)| {
                (
                    id.clone(),
                    WireFiledrop {
                        encrypted: d.encrypted.clone(),
                        initialization_vector: d.initialization_vector.clone(),
                        authentication_tag: d.authentication_tag.clone(),
                        encrypted_key: d.encrypted_key.clone(),
                        encrypted_tag: d.encrypted_tag.clone(),
                        encrypted_initialization_vector: d.encrypted_initialization_vector.clone(),
                    },
                )
            })
            .collect()
    });

    let doc = WireDocument {
        metadata: WireHeader {
            metadata_key,
            metadata_keys,
            checksum: Some(metadata.checksum.clone()),
            version: Value::from(metadata.version.as_f64()),
        },
        files: Some(files),
        filedrop,
    };
    serde_json::to_string(&doc)
        .map_err(|e| CfoldError::Format(format!("serializing encrypted metadata: {e}")))
}
