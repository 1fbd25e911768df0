//! Remote metadata store: the server side of the lock/update/unlock protocol.
//!
//! Retries and timeouts belong to implementations of [`RemoteMetadataStore`];
//! the coordinator calls each operation once and surfaces the failure.

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use cfold_core::{FolderId, LockToken, RemoteError};
use rand::RngCore;
use tracing::debug;

pub trait RemoteMetadataStore: Send + Sync {
    /// `RemoteError::NotFound` when the folder has no metadata yet.
    fn get_metadata(&self, folder_id: FolderId) -> Result<String, RemoteError>;

    /// Create metadata for a folder that has none.
    fn store_metadata(&self, folder_id: FolderId, metadata: &str) -> Result<(), RemoteError>;

    fn update_metadata(
        &self,
        folder_id: FolderId,
        metadata: &str,
        token: &LockToken,
    ) -> Result<(), RemoteError>;

    fn delete_metadata(&self, folder_id: FolderId, token: &LockToken) -> Result<(), RemoteError>;

    /// `RemoteError::Locked` if another client holds the lock.
    fn lock_folder(&self, folder_id: FolderId) -> Result<LockToken, RemoteError>;

    fn unlock_folder(&self, folder_id: FolderId, token: &LockToken) -> Result<(), RemoteError>;
}

fn new_token() -> LockToken {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    LockToken::new(hex::encode(bytes))
}

/// Remote operations, for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Get,
    Store,
    Update,
    Delete,
    Lock,
    Unlock,
}

#[derive(Debug, Default)]
struct MemoryState {
    metadata: HashMap<FolderId, String>,
    locks: HashMap<FolderId, LockToken>,
    forbidden: HashSet<FolderId>,
    failures: HashMap<RemoteOp, RemoteError>,
    calls: HashMap<RemoteOp, usize>,
}

impl MemoryState {
    fn enter(&mut self, op: RemoteOp) -> Result<(), RemoteError> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.remove(&op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_token(&self, folder_id: FolderId, token: &LockToken) -> Result<(), RemoteError> {
        match self.locks.get(&folder_id) {
            Some(held) if held == token => Ok(()),
            Some(_) => Err(RemoteError::Locked(format!(
                "folder {folder_id} is locked with a different token"
            ))),
            None => Err(RemoteError::Forbidden(format!("folder {folder_id} is not locked"))),
        }
    }
}

/// In-memory store with lock semantics and one-shot failure injection.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, RemoteError> {
        self.state
            .lock()
            .map_err(|_| RemoteError::Transport("memory remote poisoned".into()))
    }

    /// Make the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: RemoteOp, error: RemoteError) {
        if let Ok(mut state) = self.state() {
            state.failures.insert(op, error);
        }
    }

    /// Deny locking `folder_id`.
    pub fn forbid(&self, folder_id: FolderId) {
        if let Ok(mut state) = self.state() {
            state.forbidden.insert(folder_id);
        }
    }

    /// Raw stored document, bypassing locks.
    pub fn metadata(&self, folder_id: FolderId) -> Option<String> {
        self.state().ok()?.metadata.get(&folder_id).cloned()
    }

    /// Replace the stored document directly, as a malicious server could.
    pub fn set_metadata(&self, folder_id: FolderId, metadata: impl Into<String>) {
        if let Ok(mut state) = self.state() {
            state.metadata.insert(folder_id, metadata.into());
        }
    }

    pub fn is_locked(&self, folder_id: FolderId) -> bool {
        self.state()
            .map(|s| s.locks.contains_key(&folder_id))
            .unwrap_or(false)
    }

    pub fn calls(&self, op: RemoteOp) -> usize {
        self.state()
            .map(|s| s.calls.get(&op).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

impl RemoteMetadataStore for MemoryRemote {
    fn get_metadata(&self, folder_id: FolderId) -> Result<String, RemoteError> {
        let mut state = self.state()?;
        state.enter(RemoteOp::Get)?;
        state
            .metadata
            .get(&folder_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("no metadata for folder {folder_id}")))
    }

    fn store_metadata(&self, folder_id: FolderId, metadata: &str) -> Result<(), RemoteError> {
        let mut state = self.state()?;
        state.enter(RemoteOp::Store)?;
        if state.metadata.contains_key(&folder_id) {
            return Err(RemoteError::Forbidden(format!(
                "metadata for folder {folder_id} already exists"
            )));
        }
        state.metadata.insert(folder_id, metadata.to_string());
        Ok(())
    }

    fn update_metadata(
        &self,
        folder_id: FolderId,
        metadata: &str,
        token: &LockToken,
    ) -> Result<(), RemoteError> {
        let mut state = self.state()?;
        state.enter(RemoteOp::Update)?;
        state.check_token(folder_id, token)?;
        if !state.metadata.contains_key(&folder_id) {
            return Err(RemoteError::NotFound(format!("no metadata for folder {folder_id}")));
        }
        state.metadata.insert(folder_id, metadata.to_string());
        Ok(())
    }

    fn delete_metadata(&self, folder_id: FolderId, token: &LockToken) -> Result<(), RemoteError> {
        let mut state = self.state()?;
        state.enter(RemoteOp::Delete)?;
        state.check_token(folder_id, token)?;
        state
            .metadata
            .remove(&folder_id)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(format!("no metadata for folder {folder_id}")))
    }

    fn lock_folder(&self, folder_id: FolderId) -> Result<LockToken, RemoteError> {
        let mut state = self.state()?;
        state.enter(RemoteOp::Lock)?;
        if state.forbidden.contains(&folder_id) {
            return Err(RemoteError::Forbidden(format!("not allowed to lock folder {folder_id}")));
        }
        if state.locks.contains_key(&folder_id) {
            return Err(RemoteError::Locked(format!("folder {folder_id} is already locked")));
        }
        let token = new_token();
        state.locks.insert(folder_id, token.clone());
        Ok(token)
    }

    fn unlock_folder(&self, folder_id: FolderId, token: &LockToken) -> Result<(), RemoteError> {
        let mut state = self.state()?;
        state.enter(RemoteOp::Unlock)?;
        state.check_token(folder_id, token)?;
        state.locks.remove(&folder_id);
        Ok(())
    }
}

/// Directory-backed store: `<root>/<id>.json` holds metadata, `<root>/<id>.lock`
/// holds the current lock token. Lock files are hard-linked into place, so the
/// root must be on a filesystem with hard links.
#[derive(Debug, Clone)]
pub struct DirRemote {
    root: PathBuf,
}

impl DirRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn metadata_path(&self, folder_id: FolderId) -> PathBuf {
        self.root.join(format!("{folder_id}.json"))
    }

    fn lock_path(&self, folder_id: FolderId) -> PathBuf {
        self.root.join(format!("{folder_id}.lock"))
    }

    fn check_token(&self, folder_id: FolderId, token: &LockToken) -> Result<(), RemoteError> {
        match std::fs::read_to_string(self.lock_path(folder_id)) {
            Ok(held) if held == token.as_str() => Ok(()),
            Ok(_) => Err(RemoteError::Locked(format!(
                "folder {folder_id} is locked with a different token"
            ))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(RemoteError::Forbidden(format!("folder {folder_id} is not locked")))
            }
            Err(e) => Err(transport(&self.lock_path(folder_id), e)),
        }
    }

    fn write_metadata(&self, folder_id: FolderId, metadata: &str) -> Result<(), RemoteError> {
        let path = self.metadata_path(folder_id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, metadata).map_err(|e| transport(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| transport(&path, e))?;
        debug!(folder_id, path = %path.display(), "wrote metadata");
        Ok(())
    }
}

fn transport(path: &Path, e: std::io::Error) -> RemoteError {
    RemoteError::Transport(format!("{}: {e}", path.display()))
}

impl RemoteMetadataStore for DirRemote {
    fn get_metadata(&self, folder_id: FolderId) -> Result<String, RemoteError> {
        let path = self.metadata_path(folder_id);
        std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => RemoteError::NotFound(format!("no metadata for folder {folder_id}")),
            _ => transport(&path, e),
        })
    }

    fn store_metadata(&self, folder_id: FolderId, metadata: &str) -> Result<(), RemoteError> {
        std::fs::create_dir_all(&self.root).map_err(|e| transport(&self.root, e))?;
        if self.metadata_path(folder_id).exists() {
            return Err(RemoteError::Forbidden(format!(
                "metadata for folder {folder_id} already exists"
            )));
        }
        self.write_metadata(folder_id, metadata)
    }

    fn update_metadata(
        &self,
        folder_id: FolderId,
        metadata: &str,
        token: &LockToken,
    ) -> Result<(), RemoteError> {
        self.check_token(folder_id, token)?;
        if !self.metadata_path(folder_id).exists() {
            return Err(RemoteError::NotFound(format!("no metadata for folder {folder_id}")));
        }
        self.write_metadata(folder_id, metadata)
    }

    fn delete_metadata(&self, folder_id: FolderId, token: &LockToken) -> Result<(), RemoteError> {
        self.check_token(folder_id, token)?;
        let path = self.metadata_path(folder_id);
        std::fs::remove_file(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => RemoteError::NotFound(format!("no metadata for folder {folder_id}")),
            _ => transport(&path, e),
        })
    }

    fn lock_folder(&self, folder_id: FolderId) -> Result<LockToken, RemoteError> {
        std::fs::create_dir_all(&self.root).map_err(|e| transport(&self.root, e))?;
        let path = self.lock_path(folder_id);
        let token = new_token();

        // Written aside and linked into place: a lock file always holds a token.
        let staged = self.root.join(format!("{folder_id}.lock.{}", token.as_str()));
        if let Err(e) = std::fs::write(&staged, token.as_str()) {
            let _ = std::fs::remove_file(&staged);
            return Err(transport(&staged, e));
        }
        let linked = std::fs::hard_link(&staged, &path);
        let _ = std::fs::remove_file(&staged);
        linked.map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => {
                RemoteError::Locked(format!("folder {folder_id} is already locked"))
            }
            ErrorKind::PermissionDenied => {
                RemoteError::Forbidden(format!("not allowed to lock folder {folder_id}"))
            }
            _ => transport(&path, e),
        })?;
        Ok(token)
    }

    fn unlock_folder(&self, folder_id: FolderId, token: &LockToken) -> Result<(), RemoteError> {
        self.check_token(folder_id, token)?;
        let path = self.lock_path(folder_id);
        std::fs::remove_file(&path).map_err(|e| transport(&path, e))
    }
}
