//! Scoped server-side folder lock.
//!
//! A [`FolderLock`] is released exactly once: by [`FolderLock::release`] on
//! the normal paths, or from `Drop` when an early return or panic skips it.
//! A failed unlock is logged and never replaces the caller's own result.

use cfold_core::{CfoldResult, FolderId, LockToken, RemoteError};
use tracing::{debug, warn};

use crate::remote::RemoteMetadataStore;

pub struct FolderLock<'a> {
    remote: &'a dyn RemoteMetadataStore,
    folder_id: FolderId,
    token: LockToken,
    released: bool,
}

impl<'a> FolderLock<'a> {
    /// Fails fast when the folder is forbidden or already locked.
    pub fn acquire(remote: &'a dyn RemoteMetadataStore, folder_id: FolderId) -> CfoldResult<Self> {
        let token = remote.lock_folder(folder_id).map_err(|e| {
            warn!(folder_id, error = %e, "could not lock folder");
            e
        })?;
        debug!(folder_id, "locked folder");
        Ok(Self {
            remote,
            folder_id,
            token,
            released: false,
        })
    }

    pub fn folder_id(&self) -> FolderId {
        self.folder_id
    }

    pub fn token(&self) -> &LockToken {
        &self.token
    }

    /// Unlock now. The error is returned for callers that care; most only log it.
    pub fn release(mut self) -> Result<(), RemoteError> {
        self.released = true;
        self.unlock()
    }

    fn unlock(&self) -> Result<(), RemoteError> {
        match self.remote.unlock_folder(self.folder_id, &self.token) {
            Ok(()) => {
                debug!(folder_id = self.folder_id, "unlocked folder");
                Ok(())
            }
            Err(e) => {
                warn!(folder_id = self.folder_id, error = %e, "failed to unlock folder");
                Err(e)
            }
        }
    }
}

impl Drop for FolderLock<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            let _ = self.unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemote, RemoteOp};
    use cfold_core::CfoldError;

    #[test]
    fn test_release_unlocks() {
        let remote = MemoryRemote::new();
        let lock = FolderLock::acquire(&remote, 3).unwrap();
        assert!(remote.is_locked(3));
        lock.release().unwrap();
        assert!(!remote.is_locked(3));
        assert_eq!(remote.calls(RemoteOp::Unlock), 1);
    }

    #[test]
    fn test_drop_unlocks() {
        let remote = MemoryRemote::new();
        {
            let _lock = FolderLock::acquire(&remote, 3).unwrap();
            assert!(remote.is_locked(3));
        }
        assert!(!remote.is_locked(3));
        assert_eq!(remote.calls(RemoteOp::Unlock), 1);
    }

    #[test]
    fn test_release_failure_not_retried_on_drop() {
        let remote = MemoryRemote::new();
        let lock = FolderLock::acquire(&remote, 3).unwrap();
        remote.fail_next(RemoteOp::Unlock, RemoteError::Transport("reset".into()));
        assert!(lock.release().is_err());
        assert_eq!(remote.calls(RemoteOp::Unlock), 1);
    }

    #[test]
    fn test_already_locked_fails_fast() {
        let remote = MemoryRemote::new();
        let _held = FolderLock::acquire(&remote, 3).unwrap();
        let result = FolderLock::acquire(&remote, 3);
        assert!(matches!(
            result,
            Err(CfoldError::Remote(RemoteError::Locked(_)))
        ));
    }
}
