use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CfoldError, CfoldResult};

/// Top-level configuration (loaded from cfold.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CfoldConfig {
    pub logging: LoggingConfig,
    pub crypto: CryptoConfig,
    pub store: StoreConfig,
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info); RUST_LOG takes precedence
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

/// Key material settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Number of words in a newly generated recovery phrase (default: 12)
    pub recovery_words: usize,
    /// Newline-separated wordlist; the BIP-39 English list is used when unset
    pub wordlist: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file holding per-account keys, mnemonic and migrated folder ids
    pub path: PathBuf,
    /// Account name the CLI operates on
    pub account: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Directory used as the metadata store by the CLI
    pub root: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            recovery_words: 12,
            wordlist: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.local/share/cfold/accounts.json"),
            account: "default".into(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("~/.local/share/cfold/remote"),
        }
    }
}

impl CfoldConfig {
    /// Load from a TOML file, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> CfoldResult<Self> {
        if !path.exists() {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CfoldError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CfoldResult<()> {
        if self.crypto.recovery_words == 0 {
            return Err(CfoldError::Config(
                "crypto.recovery_words must be at least 1".into(),
            ));
        }
        match self.logging.log_format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(CfoldError::Config(format!(
                "logging.log_format must be \"json\" or \"text\", got {other:?}"
            ))),
        }
    }
}

/// Expand a leading `~/` against $HOME.
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"));
        return home.join(rest);
    }
    path.to_path_buf()
}
