//! cfold-crypto: primitives for end-to-end encrypted folder metadata
//!
//! Key hierarchy:
//! ```text
//! Recovery phrase (N words, sampled from a wordlist)
//!   ├── Private-key envelope: PBKDF2-HMAC-SHA1 → AES-256-GCM (RSA PKCS#8 PEM)
//!   └── Metadata checksum input (SHA-256 over phrase ‖ sorted file ids ‖ wrapped key)
//! RSA-2048 key pair (certificate advertised by the server)
//!   └── Metadata key (AES-128, per folder revision, RSA-OAEP wrapped)
//!       └── File entry payloads: AES-128-GCM, 16-byte IV, 128-bit tag
//! Filedrop key (AES-128, one per dropped entry, RSA-OAEP wrapped)
//! ```
//!
//! Composite strings join base64 fields with `|`; readers also accept the
//! legacy `fA==` separator (see [`delimiter::WireFormat`]).

pub mod asymmetric;
pub mod checksum;
pub mod content;
pub mod delimiter;
pub mod encoding;
pub mod kdf;
pub mod keys;
pub mod recovery;
pub mod symmetric;

pub use asymmetric::{
    decrypt_bytes_asymmetric, decrypt_string_asymmetric, encrypt_bytes_asymmetric,
    encrypt_string_asymmetric, keys_match, private_key_from_pem, private_key_to_pem,
    public_key_from_certificate, Recipient,
};
pub use checksum::{compute_checksum, verify_checksum};
pub use content::{decrypt_content, decrypt_file, encrypt_content, encrypt_file, EncryptedContent};
pub use delimiter::WireFormat;
pub use kdf::{derive_wrapping_key, unwrap_private_key, wrap_private_key, wrap_private_key_with_salt};
pub use keys::{generate_key, generate_key_pair, SymmetricKey};
pub use recovery::{generate_recovery_phrase, passphrase_from_phrase, Wordlist};
pub use symmetric::{
    decrypt_string, decrypt_with_tag, encrypt_base64_bytes, encrypt_string, SealedText,
};

/// Re-exported so callers can hold key pairs without depending on `rsa` directly.
pub use rsa::{RsaPrivateKey, RsaPublicKey};

/// Size of a symmetric metadata/file key in bytes (AES-128)
pub const KEY_SIZE: usize = 16;

/// Size of the IV generated for AES-GCM payloads
pub const IV_SIZE: usize = 16;

/// Size of a GCM authentication tag (128-bit)
pub const TAG_SIZE: usize = 16;

/// RSA modulus size for account key pairs
pub const RSA_KEY_BITS: usize = 2048;
