//! cfold-sync: encrypted folder metadata and the lock/update/unlock cycle
//!
//! Layers, leaf-first:
//!   - [`model`]       immutable decrypted/encrypted metadata values
//!   - [`codec`]       JSON wire format, legacy key layout resolved at parse time
//!   - [`cipher`]      decrypt / merge filedrop / encrypt as pure transitions
//!   - [`remote`]      remote metadata store trait, in-memory and directory stores
//!   - [`lock`]        scoped server-side folder lock
//!   - [`coordinator`] open → edit → commit against a remote and an account

pub mod cipher;
pub mod codec;
pub mod coordinator;
pub mod lock;
pub mod model;
pub mod remote;

pub use cipher::{decrypt_metadata, encrypt_metadata, fresh_metadata, merge_filedrop, seal_filedrop_entry};
pub use codec::{determine_version, parse_encrypted, serialize_encrypted, KeyLayout, MetadataVersion};
pub use coordinator::{FolderMetadataCoordinator, OpenFolder, Stage};
pub use lock::FolderLock;
pub use model::{
    DecryptedFileEntry, DecryptedMetadata, DecryptedMetadataBuilder, EncryptedFileEntry,
    EncryptedFiledropEntry, EncryptedMetadata, FilePayload,
};
pub use remote::{DirRemote, MemoryRemote, RemoteMetadataStore, RemoteOp};
