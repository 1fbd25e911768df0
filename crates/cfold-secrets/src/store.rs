//! Per-account key/value persistence
//!
//! Everything the E2E layer keeps between runs (certificate, wrapped private
//! key, mnemonic, migrated folders, error counters) is a string value under
//! an `(account, key)` pair.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use cfold_core::{CfoldError, CfoldResult};
use tracing::debug;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, account: &str, key: &str) -> CfoldResult<Option<String>>;
    fn set(&self, account: &str, key: &str, value: &str) -> CfoldResult<()>;
    /// Deleting an absent key is not an error.
    fn delete(&self, account: &str, key: &str) -> CfoldResult<()>;
}

type Accounts = BTreeMap<String, BTreeMap<String, String>>;

fn poisoned() -> CfoldError {
    CfoldError::Other(anyhow::anyhow!("key/value store lock poisoned"))
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: Mutex<Accounts>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, account: &str, key: &str) -> CfoldResult<Option<String>> {
        let accounts = self.accounts.lock().map_err(|_| poisoned())?;
        Ok(accounts.get(account).and_then(|a| a.get(key)).cloned())
    }

    fn set(&self, account: &str, key: &str, value: &str) -> CfoldResult<()> {
        let mut accounts = self.accounts.lock().map_err(|_| poisoned())?;
        accounts
            .entry(account.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, account: &str, key: &str) -> CfoldResult<()> {
        let mut accounts = self.accounts.lock().map_err(|_| poisoned())?;
        if let Some(a) = accounts.get_mut(account) {
            a.remove(key);
        }
        Ok(())
    }
}

/// JSON file store: `{ "<account>": { "<key>": "<value>" } }`.
///
/// Every write rewrites the whole file through a temp file and rename.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> CfoldResult<Accounts> {
        if !self.path.exists() {
            return Ok(Accounts::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading key/value store: {}", self.path.display()))?;
        serde_json::from_str(&content).map_err(|e| {
            CfoldError::Format(format!("parsing key/value store {}: {e}", self.path.display()))
        })
    }

    fn save(&self, accounts: &Accounts) -> CfoldResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating dir: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(accounts).context("serializing key/value store")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("writing key/value store: {}", tmp.display()))?;
        restrict_permissions(&tmp)?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing key/value store: {}", self.path.display()))?;
        debug!(path = %self.path.display(), "saved key/value store");
        Ok(())
    }

    fn modify(&self, f: impl FnOnce(&mut Accounts)) -> CfoldResult<()> {
        let _guard = self.write_lock.lock().map_err(|_| poisoned())?;
        let mut accounts = self.load()?;
        f(&mut accounts);
        self.save(&accounts)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> CfoldResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> CfoldResult<()> {
    Ok(())
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, account: &str, key: &str) -> CfoldResult<Option<String>> {
        let accounts = self.load()?;
        Ok(accounts.get(account).and_then(|a| a.get(key)).cloned())
    }

    fn set(&self, account: &str, key: &str, value: &str) -> CfoldResult<()> {
        self.modify(|accounts| {
            accounts
                .entry(account.to_string())
                .or_default()
                .insert(key.to_string(), value.to_string());
        })
    }

    fn delete(&self, account: &str, key: &str) -> CfoldResult<()> {
        self.modify(|accounts| {
            if let Some(a) = accounts.get_mut(account) {
                a.remove(key);
            }
        })
    }
}
