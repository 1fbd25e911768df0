//! Recovery phrase generation
//!
//! A recovery phrase is N words sampled with replacement from a wordlist. It
//! is shown to the user once, wraps the private key (see [`crate::kdf`]) and
//! feeds the metadata checksum (see [`crate::checksum`]).

use std::path::Path;

use cfold_core::{CfoldError, CfoldResult};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};

/// Source of recovery words.
#[derive(Debug, Clone, Default)]
pub enum Wordlist {
    /// The 2048-word BIP-39 English list
    #[default]
    Bip39English,
    Custom(Vec<String>),
}

impl Wordlist {
    /// One word per line; blank lines ignored.
    pub fn from_file(path: &Path) -> CfoldResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let words: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        if words.is_empty() {
            return Err(CfoldError::Config(format!(
                "wordlist {} contains no words",
                path.display()
            )));
        }
        Ok(Wordlist::Custom(words))
    }

    pub fn len(&self) -> usize {
        match self {
            Wordlist::Bip39English => bip39::Language::English.word_list().len(),
            Wordlist::Custom(words) => words.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn word(&self, index: usize) -> &str {
        match self {
            Wordlist::Bip39English => bip39::Language::English.word_list()[index],
            Wordlist::Custom(words) => &words[index],
        }
    }
}

/// Sample `count` words, space-separated.
pub fn generate_recovery_phrase(wordlist: &Wordlist, count: usize) -> CfoldResult<SecretString> {
    if count == 0 {
        return Err(CfoldError::Config("recovery phrase needs at least one word".into()));
    }
    if wordlist.is_empty() {
        return Err(CfoldError::Config("wordlist is empty".into()));
    }

    let mut rng = rand::thread_rng();
    let words: Vec<&str> = (0..count)
        .map(|_| wordlist.word(rng.gen_range(0..wordlist.len())))
        .collect();
    Ok(SecretString::from(words.join(" ")))
}

/// Passphrase form of a phrase: whitespace removed, lower-cased.
pub fn passphrase_from_phrase(phrase: &SecretString) -> SecretString {
    let compact: String = phrase
        .expose_secret()
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    SecretString::from(compact)
}
