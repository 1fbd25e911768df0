use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-side id of an encrypted folder.
pub type FolderId = u64;

/// Token returned by the remote store when a folder is locked for writing.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockToken(String);

impl LockToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens authorize writes; keep them out of logs.
impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LockToken").field(&"[REDACTED]").finish()
    }
}
