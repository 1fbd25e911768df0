//! Unlocked account identity and recovery phrase discovery

use std::path::PathBuf;

use anyhow::Context;
use cfold_core::CfoldResult;
use cfold_crypto::{RsaPrivateKey, RsaPublicKey};
use secrecy::SecretString;

/// Private key, certificate and mnemonic of an account, after a successful unlock.
pub struct AccountIdentity {
    pub private_key: RsaPrivateKey,
    pub public_key: RsaPublicKey,
    /// PEM X.509 certificate the server advertises for this account
    pub certificate: String,
    pub mnemonic: SecretString,
}

impl std::fmt::Debug for AccountIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountIdentity")
            .field("private_key", &"[REDACTED]")
            .field("certificate", &self.certificate)
            .field("mnemonic", &"[REDACTED]")
            .finish()
    }
}

/// A recovery phrase and where it was found.
pub struct PhraseProvider {
    pub phrase: SecretString,
    pub source: String,
}

/// Look for the recovery phrase without prompting:
///   1. $CREDENTIALS_DIRECTORY/cfold-recovery-phrase  (systemd credential injection)
///   2. $CFOLD_RECOVERY_PHRASE_FILE  (explicit path)
///   3. $CFOLD_RECOVERY_PHRASE  (literal phrase)
///
/// `None` means the caller has to ask the user.
pub fn find_recovery_phrase() -> CfoldResult<Option<PhraseProvider>> {
    find_recovery_phrase_with(|name| std::env::var(name).ok())
}

fn find_recovery_phrase_with(
    env: impl Fn(&str) -> Option<String>,
) -> CfoldResult<Option<PhraseProvider>> {
    if let Some(cred_dir) = env("CREDENTIALS_DIRECTORY") {
        let path = PathBuf::from(cred_dir).join("cfold-recovery-phrase");
        if path.exists() {
            return read_phrase_file(path, "systemd");
        }
    }

    if let Some(file) = env("CFOLD_RECOVERY_PHRASE_FILE") {
        let path = PathBuf::from(file);
        if path.exists() {
            return read_phrase_file(path, "CFOLD_RECOVERY_PHRASE_FILE");
        }
    }

    if let Some(phrase) = env("CFOLD_RECOVERY_PHRASE") {
        if !phrase.trim().is_empty() {
            return Ok(Some(PhraseProvider {
                phrase: SecretString::from(phrase.trim().to_string()),
                source: "CFOLD_RECOVERY_PHRASE (env)".into(),
            }));
        }
    }

    Ok(None)
}

fn read_phrase_file(path: PathBuf, label: &str) -> CfoldResult<Option<PhraseProvider>> {
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("reading recovery phrase: {}", path.display()))?;
    Ok(Some(PhraseProvider {
        phrase: SecretString::from(content.trim().to_string()),
        source: format!("{label}:{}", path.display()),
    }))
}
