//! Folder metadata coordinator.
//!
//! ```text
//! Locked ─> NoMetadata ─┐
//!           Fetched ────┴─> Decrypted ─> [FiledropMerging] ─> ReEncrypted ─> Uploading ─> Done
//! ```
//! Every write holds the server-side folder lock from before the fetch until
//! after the upload. [`FolderMetadataCoordinator::commit`] of a folder opened
//! without the lock re-reads it under the lock and refuses if it changed.
//! Crypto and integrity failures abort the operation and are returned as-is.
//! Remote failures are not retried here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cfold_core::{CfoldError, CfoldResult, FolderId, RemoteError};
use cfold_crypto::{generate_key, Recipient};
use cfold_secrets::{AccountIdentity, AccountStore};
use secrecy::SecretString;
use tracing::{debug, error, info, warn};

use crate::cipher::{decrypt_metadata, encrypt_metadata, fresh_metadata, merge_filedrop};
use crate::codec::{parse_encrypted, serialize_encrypted};
use crate::lock::FolderLock;
use crate::model::{DecryptedFileEntry, DecryptedMetadata};
use crate::remote::RemoteMetadataStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Locked,
    NoMetadata,
    Fetched,
    Decrypted,
    FiledropMerging,
    ReEncrypted,
    Uploading,
    Done,
}

fn enter(folder_id: FolderId, stage: Stage) {
    debug!(folder_id, ?stage, "metadata stage");
}

/// A folder's metadata held for editing between [`FolderMetadataCoordinator::open`]
/// and [`FolderMetadataCoordinator::commit`].
#[derive(Debug, Clone)]
pub struct OpenFolder {
    folder_id: FolderId,
    metadata: DecryptedMetadata,
    /// Document as read from the remote; `None` when there was none.
    fetched: Option<String>,
}

impl OpenFolder {
    pub fn folder_id(&self) -> FolderId {
        self.folder_id
    }

    pub fn metadata(&self) -> &DecryptedMetadata {
        &self.metadata
    }

    /// False when the remote had no metadata and a fresh one was synthesized.
    pub fn existed(&self) -> bool {
        self.fetched.is_some()
    }

    pub fn with_metadata(self, metadata: DecryptedMetadata) -> Self {
        Self { metadata, ..self }
    }
}

pub struct FolderMetadataCoordinator {
    remote: Arc<dyn RemoteMetadataStore>,
    account: AccountStore,
    identity: AccountIdentity,
    in_flight: Mutex<HashMap<FolderId, Arc<Mutex<()>>>>,
}

impl FolderMetadataCoordinator {
    pub fn new(
        remote: Arc<dyn RemoteMetadataStore>,
        account: AccountStore,
        identity: AccountIdentity,
    ) -> Self {
        Self {
            remote,
            account,
            identity,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Unlock the account identity with the recovery phrase and build a coordinator.
    pub fn unlock(
        remote: Arc<dyn RemoteMetadataStore>,
        account: AccountStore,
        phrase: &SecretString,
    ) -> CfoldResult<Self> {
        let identity = account.unlock_identity(phrase)?;
        Ok(Self::new(remote, account, identity))
    }

    pub fn account(&self) -> &AccountStore {
        &self.account
    }

    /// Run `f` with no other caller of this coordinator working on `folder_id`.
    fn serialized<T>(&self, folder_id: FolderId, f: impl FnOnce() -> CfoldResult<T>) -> CfoldResult<T> {
        let guard = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
            in_flight.entry(folder_id).or_default().clone()
        };
        let result = {
            let _held = guard.lock().unwrap_or_else(|p| p.into_inner());
            f()
        };

        // map + ours: nobody else is waiting on this folder
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if Arc::strong_count(&guard) == 2 {
            in_flight.remove(&folder_id);
        }
        result
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.in_flight.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Hold the server-side lock on `folder_id` for the duration of `f`.
    ///
    /// The lock is released whatever `f` returns; an unlock failure is logged
    /// and `f`'s result wins.
    fn locked<T>(
        &self,
        folder_id: FolderId,
        f: impl FnOnce(&FolderLock<'_>) -> CfoldResult<T>,
    ) -> CfoldResult<T> {
        let lock = FolderLock::acquire(self.remote.as_ref(), folder_id)?;
        enter(folder_id, Stage::Locked);
        let result = f(&lock);
        let _ = lock.release();
        result
    }

    fn note_failure(&self, folder_id: FolderId, err: &CfoldError) {
        if err.is_security_failure() {
            error!(folder_id, error = %err, "E2E verification failed");
            if let Err(e) = self.account.report_e2e_error() {
                warn!(folder_id, error = %e, "could not record E2E error");
            }
        }
    }

    fn fetch(&self, folder_id: FolderId) -> CfoldResult<Option<String>> {
        match self.remote.get_metadata(folder_id) {
            Ok(text) => Ok(Some(text)),
            Err(RemoteError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch and decrypt, or synthesize fresh metadata when the folder has none.
    ///
    /// Takes no lock and uploads nothing; pending filedrop entries stay
    /// sealed until [`Self::commit`].
    pub fn open(&self, folder_id: FolderId) -> CfoldResult<OpenFolder> {
        let Some(text) = self.fetch(folder_id)? else {
            enter(folder_id, Stage::NoMetadata);
            let metadata = fresh_metadata();
            enter(folder_id, Stage::Decrypted);
            return Ok(OpenFolder {
                folder_id,
                metadata,
                fetched: None,
            });
        };
        enter(folder_id, Stage::Fetched);

        let decrypted = parse_encrypted(&text).and_then(|encrypted| {
            let migrated = self.account.is_migrated(folder_id)?;
            decrypt_metadata(
                &encrypted,
                &self.identity.private_key,
                &self.identity.mnemonic,
                folder_id,
                migrated,
            )
        });
        let metadata = decrypted.inspect_err(|e| self.note_failure(folder_id, e))?;
        enter(folder_id, Stage::Decrypted);

        Ok(OpenFolder {
            folder_id,
            metadata,
            fetched: Some(text),
        })
    }

    /// Merge filedrop, re-key, re-encrypt and upload under the folder lock.
    ///
    /// The remote document is re-read once the lock is held; if it is no
    /// longer the one `folder` was opened from, nothing is uploaded and
    /// `RemoteError::Conflict` is returned. Returns the metadata as uploaded.
    pub fn commit(&self, folder: OpenFolder) -> CfoldResult<DecryptedMetadata> {
        let folder_id = folder.folder_id;
        self.serialized(folder_id, || {
            self.locked(folder_id, |lock| {
                if self.fetch(folder_id)? != folder.fetched {
                    warn!(folder_id, "metadata changed since it was opened");
                    return Err(RemoteError::Conflict(format!(
                        "metadata of folder {folder_id} changed since it was opened"
                    ))
                    .into());
                }
                self.upload(lock, folder)
            })
        })
    }

    /// Upload `folder` with `lock` held.
    fn upload(&self, lock: &FolderLock<'_>, folder: OpenFolder) -> CfoldResult<DecryptedMetadata> {
        let OpenFolder {
            folder_id,
            mut metadata,
            fetched,
        } = folder;

        if !metadata.pending_filedrop().is_empty() {
            enter(folder_id, Stage::FiledropMerging);
            metadata = merge_filedrop(&metadata, &self.identity.private_key)
                .inspect_err(|e| self.note_failure(folder_id, e))?;
        }

        let metadata = metadata.rekeyed(generate_key());
        let encrypted = encrypt_metadata(
            &metadata,
            Recipient::Key(&self.identity.public_key),
            &self.identity.mnemonic,
        )?;
        let text = serialize_encrypted(&encrypted)?;
        enter(folder_id, Stage::ReEncrypted);

        enter(folder_id, Stage::Uploading);
        if fetched.is_some() {
            self.remote.update_metadata(folder_id, &text, lock.token())?;
        } else {
            self.remote.store_metadata(folder_id, &text)?;
        }

        self.account.mark_migrated(folder_id)?;
        enter(folder_id, Stage::Done);
        info!(folder_id, files = metadata.files().len(), "uploaded folder metadata");
        Ok(metadata)
    }

    /// Lock, fetch, apply `edit`, upload, unlock.
    ///
    /// The folder stays locked on the server for the whole sequence, so no
    /// other client can write in between.
    pub fn update<F>(&self, folder_id: FolderId, edit: F) -> CfoldResult<DecryptedMetadata>
    where
        F: FnOnce(&DecryptedMetadata) -> CfoldResult<DecryptedMetadata>,
    {
        self.serialized(folder_id, || {
            self.locked(folder_id, |lock| {
                let folder = self.open(folder_id)?;
                let edited = edit(folder.metadata())?;
                self.upload(lock, folder.with_metadata(edited))
            })
        })
    }

    pub fn add_file(
        &self,
        folder_id: FolderId,
        file_id: &str,
        entry: DecryptedFileEntry,
    ) -> CfoldResult<DecryptedMetadata> {
        self.update(folder_id, |m| Ok(m.with_file(file_id, entry)))
    }

    /// Removing an unknown file id is a no-op edit.
    pub fn remove_file(&self, folder_id: FolderId, file_id: &str) -> CfoldResult<DecryptedMetadata> {
        self.update(folder_id, |m| {
            if m.file(file_id).is_none() {
                debug!(folder_id, file_id, "file not in metadata");
            }
            Ok(m.without_file(file_id))
        })
    }

    /// Fold pending filedrop entries into `files` and upload.
    ///
    /// Returns how many entries moved; with none pending nothing is uploaded.
    pub fn migrate_filedrop(&self, folder_id: FolderId) -> CfoldResult<usize> {
        self.serialized(folder_id, || {
            self.locked(folder_id, |lock| {
                let folder = self.open(folder_id)?;
                let pending = folder.metadata().pending_filedrop().len();
                if pending == 0 {
                    debug!(folder_id, "no filedrop entries to migrate");
                    return Ok(0);
                }
                self.upload(lock, folder)?;
                info!(folder_id, merged = pending, "migrated filedrop entries");
                Ok(pending)
            })
        })
    }

    /// Delete the folder's metadata under the folder lock.
    pub fn delete(&self, folder_id: FolderId) -> CfoldResult<()> {
        self.serialized(folder_id, || {
            self.locked(folder_id, |lock| {
                self.remote.delete_metadata(folder_id, lock.token())?;
                info!(folder_id, "deleted folder metadata");
                Ok(())
            })
        })
    }
}
