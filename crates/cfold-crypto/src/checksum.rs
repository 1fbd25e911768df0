//! Metadata integrity checksum
//!
//! `sha256_hex(trimmed mnemonic without spaces ‖ sorted file ids ‖ wrapped metadata key)`.
//! The wrapped key is hashed exactly as stored (base64 RSA ciphertext); old
//! metadata without a single key hashes the literal `null`.

use cfold_core::{CfoldError, CfoldResult, FolderId};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use tracing::{error, warn};

const ABSENT_KEY: &str = "null";

pub fn compute_checksum<'a, I>(
    mnemonic: &SecretString,
    file_ids: I,
    wrapped_metadata_key: Option<&str>,
) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut ids: Vec<&str> = file_ids.into_iter().collect();
    ids.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(mnemonic.expose_secret().trim().replace(' ', "").as_bytes());
    for id in ids {
        hasher.update(id.as_bytes());
    }
    hasher.update(wrapped_metadata_key.unwrap_or(ABSENT_KEY).as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a stored checksum against a recomputed one.
///
/// An empty stored checksum is accepted only for folders that were never
/// migrated to authenticated metadata.
pub fn verify_checksum(
    stored: &str,
    computed: &str,
    folder_id: FolderId,
    migrated: bool,
) -> CfoldResult<()> {
    if stored.is_empty() {
        if migrated {
            error!(folder_id, "metadata has no checksum but folder was migrated");
            return Err(CfoldError::DowngradeDetected { folder_id });
        }
        warn!(folder_id, "metadata has no checksum, accepting unmigrated folder");
        return Ok(());
    }

    if stored != computed {
        error!(folder_id, "metadata checksum mismatch");
        return Err(CfoldError::Integrity(format!(
            "checksum mismatch for folder {folder_id}"
        )));
    }
    Ok(())
}
