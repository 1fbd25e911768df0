//! cfold-secrets: per-account E2E key material
//!
//! Keys kept per account (see [`account`]):
//!   - `PUBLIC_KEY`            PEM certificate advertised by the server
//!   - `PRIVATE_KEY`           PKCS#8 key wrapped with the recovery phrase
//!   - `MNEMONIC`              recovery phrase
//!   - `MIGRATED_FOLDER_IDS`   JSON array of folders with authenticated metadata
//!   - `PUBLIC_KEY<user>`      collaborator certificates
//!   - `E2E_ERRORS[_TIMESTAMP]` failure counters, cleared when read

pub mod account;
pub mod identity;
pub mod migrated;
pub mod store;

pub use account::{AccountStore, E2eErrorReport};
pub use identity::{find_recovery_phrase, AccountIdentity, PhraseProvider};
pub use migrated::MigratedFolderSet;
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
