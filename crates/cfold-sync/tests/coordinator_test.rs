//! End-to-end folder metadata cycles against an in-memory remote.

use std::collections::BTreeMap;
use std::sync::Arc;

use cfold_core::{CfoldError, RemoteError};
use cfold_crypto::{
    encrypt_string, encrypt_string_asymmetric, generate_key, generate_key_pair,
    private_key_from_pem, Recipient, RsaPublicKey,
};
use cfold_secrets::{AccountIdentity, AccountStore, MemoryStore};
use cfold_sync::{
    parse_encrypted, seal_filedrop_entry, serialize_encrypted, DecryptedFileEntry,
    EncryptedFileEntry, EncryptedMetadata, FilePayload, FolderMetadataCoordinator, KeyLayout,
    MemoryRemote, MetadataVersion, RemoteMetadataStore, RemoteOp,
};
use secrecy::SecretString;

const ALICE_CERT: &str = include_str!("../../cfold-crypto/testdata/alice.crt");
const ALICE_KEY: &str = include_str!("../../cfold-crypto/testdata/alice.key");
const PHRASE: &str = "abandon ability able about above absent";

fn phrase() -> SecretString {
    SecretString::from(PHRASE)
}

fn account() -> AccountStore {
    let account = AccountStore::new(Arc::new(MemoryStore::new()), "alice@cloud.example");
    let key = private_key_from_pem(ALICE_KEY).unwrap();
    account.store_identity(ALICE_CERT, &key, &phrase()).unwrap();
    account
}

fn setup() -> (Arc<MemoryRemote>, FolderMetadataCoordinator) {
    let remote = Arc::new(MemoryRemote::new());
    let coordinator =
        FolderMetadataCoordinator::unlock(remote.clone(), account(), &phrase()).unwrap();
    (remote, coordinator)
}

fn file(name: &str) -> DecryptedFileEntry {
    DecryptedFileEntry::new(
        FilePayload::new()
            .with("filename", name)
            .with("mimetype", "text/plain"),
    )
}

fn alice_public() -> RsaPublicKey {
    RsaPublicKey::from(&private_key_from_pem(ALICE_KEY).unwrap())
}

#[test]
fn test_add_then_reopen() {
    let (remote, coordinator) = setup();

    coordinator.add_file(7, "f1", file("a.txt")).unwrap();
    coordinator.add_file(7, "f2", file("b.txt")).unwrap();
    assert_eq!(remote.calls(RemoteOp::Store), 1);
    assert_eq!(remote.calls(RemoteOp::Update), 1);
    assert!(!remote.is_locked(7));

    let folder = coordinator.open(7).unwrap();
    assert!(folder.existed());
    let files = folder.metadata().files();
    assert_eq!(files.len(), 2);
    assert_eq!(files["f1"].payload.filename(), Some("a.txt"));
    assert_eq!(files["f2"].payload.mimetype(), Some("text/plain"));
    assert!(!folder.metadata().checksum().is_empty());

    assert!(coordinator.account().is_migrated(7).unwrap());
}

#[test]
fn test_remote_never_sees_plaintext() {
    let (remote, coordinator) = setup();
    coordinator.add_file(1, "f1", file("secret-plans.txt")).unwrap();

    let text = remote.metadata(1).unwrap();
    assert!(!text.contains("secret-plans"));
    assert_eq!(parse_encrypted(&text).unwrap().version, MetadataVersion::CURRENT);
}

#[test]
fn test_each_commit_rekeys() {
    let (remote, coordinator) = setup();
    let first = coordinator.add_file(1, "f1", file("a.txt")).unwrap();
    let wrapped_first = parse_encrypted(&remote.metadata(1).unwrap())
        .unwrap()
        .wrapped_metadata_key()
        .map(str::to_string);

    let second = coordinator.add_file(1, "f2", file("b.txt")).unwrap();
    let wrapped_second = parse_encrypted(&remote.metadata(1).unwrap())
        .unwrap()
        .wrapped_metadata_key()
        .map(str::to_string);

    assert_ne!(first.metadata_key(), second.metadata_key());
    assert_ne!(wrapped_first, wrapped_second);
}

#[test]
fn test_generated_key_pair_roundtrip() {
    let private_key = generate_key_pair().unwrap();
    let identity = AccountIdentity {
        public_key: RsaPublicKey::from(&private_key),
        private_key,
        certificate: String::new(),
        mnemonic: phrase(),
    };
    let account = AccountStore::new(Arc::new(MemoryStore::new()), "fresh");
    let coordinator =
        FolderMetadataCoordinator::new(Arc::new(MemoryRemote::new()), account, identity);

    coordinator
        .add_file(3, "f", DecryptedFileEntry::new(FilePayload::new().with("name", "a.txt")))
        .unwrap();
    let reopened = coordinator.open(3).unwrap();
    let payload = &reopened.metadata().file("f").unwrap().payload;
    assert_eq!(payload.get("name").and_then(|v| v.as_str()), Some("a.txt"));
}

#[test]
fn test_tampered_entry_is_reported() {
    let (remote, coordinator) = setup();
    coordinator.add_file(2, "f1", file("a.txt")).unwrap();

    let mut doc: serde_json::Value = serde_json::from_str(&remote.metadata(2).unwrap()).unwrap();
    let forged = encrypt_string("{\"filename\":\"evil\"}", &generate_key())
        .unwrap()
        .ciphertext;
    doc["files"]["f1"]["encrypted"] = serde_json::Value::String(forged);
    remote.set_metadata(2, doc.to_string());

    let result = coordinator.open(2);
    assert!(matches!(result, Err(CfoldError::Authentication(_))));

    let report = coordinator.account().take_e2e_error_report().unwrap().unwrap();
    assert_eq!(report.count, 1);
}

#[test]
fn test_swapped_checksum_is_integrity_error() {
    let (remote, coordinator) = setup();
    coordinator.add_file(2, "f1", file("a.txt")).unwrap();

    let mut doc: serde_json::Value = serde_json::from_str(&remote.metadata(2).unwrap()).unwrap();
    doc["metadata"]["checksum"] = serde_json::Value::String("00".repeat(32));
    remote.set_metadata(2, doc.to_string());

    assert!(matches!(coordinator.open(2), Err(CfoldError::Integrity(_))));
    assert!(matches!(
        coordinator.add_file(2, "f2", file("b.txt")),
        Err(CfoldError::Integrity(_))
    ));
    assert_eq!(remote.calls(RemoteOp::Update), 0);
    assert!(!remote.is_locked(2));
}

#[test]
fn test_stripped_checksum_after_migration_is_downgrade() {
    let (remote, coordinator) = setup();
    coordinator.add_file(4, "f1", file("a.txt")).unwrap();

    let mut doc: serde_json::Value = serde_json::from_str(&remote.metadata(4).unwrap()).unwrap();
    doc["metadata"]["checksum"] = serde_json::Value::String(String::new());
    remote.set_metadata(4, doc.to_string());

    assert!(matches!(
        coordinator.open(4),
        Err(CfoldError::DowngradeDetected { folder_id: 4 })
    ));
    assert!(coordinator.account().take_e2e_error_report().unwrap().is_some());
}

#[test]
fn test_filedrop_merged_exactly_once() {
    let (remote, coordinator) = setup();
    coordinator.add_file(5, "f1", file("a.txt")).unwrap();

    let public_key = alice_public();
    let mut encrypted = parse_encrypted(&remote.metadata(5).unwrap()).unwrap();
    for (id, name) in [("d1", "drop-1.txt"), ("d2", "drop-2.txt")] {
        let sealed = seal_filedrop_entry(&file(name), Recipient::Key(&public_key)).unwrap();
        encrypted = encrypted.with_filedrop_entry(id, sealed);
    }
    remote.set_metadata(5, serialize_encrypted(&encrypted).unwrap());

    let pending = coordinator.open(5).unwrap();
    assert_eq!(pending.metadata().pending_filedrop().len(), 2);
    assert_eq!(pending.metadata().files().len(), 1);

    assert_eq!(coordinator.migrate_filedrop(5).unwrap(), 2);
    let updates = remote.calls(RemoteOp::Update);
    assert_eq!(coordinator.migrate_filedrop(5).unwrap(), 0);
    assert_eq!(remote.calls(RemoteOp::Update), updates);

    let merged = coordinator.open(5).unwrap();
    let files = merged.metadata().files();
    assert_eq!(files.len(), 3);
    assert_eq!(files["d2"].payload.filename(), Some("drop-2.txt"));
    assert!(merged.metadata().pending_filedrop().is_empty());
    assert!(!remote.metadata(5).unwrap().contains("filedrop"));
}

#[test]
fn test_forbidden_lock_uploads_nothing() {
    let (remote, coordinator) = setup();
    remote.forbid(6);

    let result = coordinator.add_file(6, "f1", file("a.txt"));
    assert!(matches!(
        result,
        Err(CfoldError::Remote(RemoteError::Forbidden(_)))
    ));
    assert_eq!(remote.calls(RemoteOp::Store), 0);
    assert!(remote.metadata(6).is_none());
    assert!(!coordinator.account().is_migrated(6).unwrap());
}

#[test]
fn test_locked_folder_fails_fast() {
    let (remote, coordinator) = setup();
    coordinator.add_file(6, "f1", file("a.txt")).unwrap();
    let _other_client = remote.lock_folder(6).unwrap();

    let result = coordinator.add_file(6, "f2", file("b.txt"));
    assert!(matches!(result, Err(CfoldError::Remote(RemoteError::Locked(_)))));
    assert_eq!(remote.calls(RemoteOp::Update), 0);
}

#[test]
fn test_failed_upload_still_unlocks() {
    let (remote, coordinator) = setup();
    coordinator.add_file(8, "f1", file("a.txt")).unwrap();
    let before = remote.metadata(8).unwrap();

    remote.fail_next(RemoteOp::Update, RemoteError::Transport("connection reset".into()));
    let result = coordinator.add_file(8, "f2", file("b.txt"));
    assert!(matches!(
        result,
        Err(CfoldError::Remote(RemoteError::Transport(_)))
    ));
    assert!(!remote.is_locked(8));
    assert_eq!(remote.metadata(8).unwrap(), before);

    // Not a security failure.
    assert!(coordinator.account().take_e2e_error_report().unwrap().is_none());
}

#[test]
fn test_unlock_failure_does_not_mask_upload() {
    let (remote, coordinator) = setup();
    coordinator.add_file(9, "f1", file("a.txt")).unwrap();

    remote.fail_next(RemoteOp::Unlock, RemoteError::Transport("timeout".into()));
    let updated = coordinator.add_file(9, "f2", file("b.txt")).unwrap();
    assert_eq!(updated.files().len(), 2);
    assert_eq!(remote.calls(RemoteOp::Unlock), 2);

    let stored = parse_encrypted(&remote.metadata(9).unwrap()).unwrap();
    assert_eq!(stored.files.len(), 2);
}

#[test]
fn test_concurrent_updates_all_land() {
    let (_remote, coordinator) = setup();
    let coordinator = Arc::new(coordinator);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let coordinator = Arc::clone(&coordinator);
            std::thread::spawn(move || {
                coordinator
                    .add_file(11, &format!("f{i}"), file(&format!("{i}.txt")))
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let folder = coordinator.open(11).unwrap();
    assert_eq!(folder.metadata().files().len(), 4);
}

#[test]
fn test_legacy_folder_upgraded_then_protected() {
    let (remote, coordinator) = setup();
    let public_key = alice_public();
    let k0 = generate_key();
    let legacy = EncryptedMetadata {
        version: MetadataVersion::V1_0,
        key_layout: KeyLayout::Legacy {
            wrapped_keys: BTreeMap::from([(
                0,
                encrypt_string_asymmetric(&k0.to_base64(), Recipient::Key(&public_key)).unwrap(),
            )]),
        },
        checksum: String::new(),
        files: BTreeMap::from([(
            "old".to_string(),
            EncryptedFileEntry {
                metadata_key: Some(0),
                encrypted: encrypt_string(
                    &FilePayload::new().with("filename", "old.txt").to_json().unwrap(),
                    &k0,
                )
                .unwrap()
                .ciphertext,
                ..Default::default()
            },
        )]),
        filedrop: BTreeMap::new(),
    };
    let legacy_text = serialize_encrypted(&legacy).unwrap();
    remote.set_metadata(12, legacy_text.clone());

    let opened = coordinator.open(12).unwrap();
    assert_eq!(opened.metadata().file("old").unwrap().payload.filename(), Some("old.txt"));
    assert!(!coordinator.account().is_migrated(12).unwrap());

    coordinator.add_file(12, "new", file("new.txt")).unwrap();
    assert!(coordinator.account().is_migrated(12).unwrap());

    let upgraded = parse_encrypted(&remote.metadata(12).unwrap()).unwrap();
    assert!(matches!(upgraded.key_layout, KeyLayout::Current { .. }));
    assert!(upgraded.files.values().all(|f| f.metadata_key.is_none()));

    // A server replaying the unauthenticated document is now refused.
    remote.set_metadata(12, legacy_text);
    assert!(matches!(
        coordinator.open(12),
        Err(CfoldError::DowngradeDetected { folder_id: 12 })
    ));
}

#[test]
fn test_remove_file_and_delete() {
    let (remote, coordinator) = setup();
    coordinator.add_file(13, "f1", file("a.txt")).unwrap();
    coordinator.add_file(13, "f2", file("b.txt")).unwrap();

    let after = coordinator.remove_file(13, "f1").unwrap();
    assert!(after.file("f1").is_none());
    assert!(after.file("f2").is_some());

    let unchanged = coordinator.remove_file(13, "missing").unwrap();
    assert_eq!(unchanged.files().len(), 1);

    coordinator.delete(13).unwrap();
    assert!(remote.metadata(13).is_none());
    assert!(!remote.is_locked(13));
    assert!(!coordinator.open(13).unwrap().existed());
}

#[test]
fn test_wrong_phrase_cannot_unlock() {
    let remote = Arc::new(MemoryRemote::new());
    let result = FolderMetadataCoordinator::unlock(
        remote,
        account(),
        &SecretString::from("wrong words entirely"),
    );
    assert!(matches!(result, Err(CfoldError::KeyMismatch(_))));
}

#[test]
fn test_commit_refuses_metadata_changed_since_open() {
    let remote = Arc::new(MemoryRemote::new());
    let account = account();
    let a = FolderMetadataCoordinator::unlock(remote.clone(), account.clone(), &phrase()).unwrap();
    let b = FolderMetadataCoordinator::unlock(remote.clone(), account, &phrase()).unwrap();
    a.add_file(7, "f0", file("base.txt")).unwrap();

    let stale = a.open(7).unwrap();
    b.add_file(7, "fB", file("from-b.txt")).unwrap();

    let edited = stale.metadata().with_file("fA", file("from-a.txt"));
    let result = a.commit(stale.with_metadata(edited));
    assert!(matches!(
        result,
        Err(CfoldError::Remote(RemoteError::Conflict(_)))
    ));
    assert!(!remote.is_locked(7));

    // Retrying through update sees b's write.
    a.add_file(7, "fA", file("from-a.txt")).unwrap();
    let files: Vec<String> = a.open(7).unwrap().metadata().files().keys().cloned().collect();
    assert_eq!(files, ["f0", "fA", "fB"]);
}

#[test]
fn test_commit_of_unchanged_open_folder() {
    let (remote, coordinator) = setup();
    coordinator.add_file(7, "f0", file("base.txt")).unwrap();

    let folder = coordinator.open(7).unwrap();
    let edited = folder.metadata().without_file("f0");
    let committed = coordinator.commit(folder.with_metadata(edited)).unwrap();
    assert!(committed.files().is_empty());
    assert!(!remote.is_locked(7));
}

#[test]
fn test_other_client_cannot_write_during_update() {
    let remote = Arc::new(MemoryRemote::new());
    let account = account();
    let a = FolderMetadataCoordinator::unlock(remote.clone(), account.clone(), &phrase()).unwrap();
    let b = FolderMetadataCoordinator::unlock(remote.clone(), account, &phrase()).unwrap();
    a.add_file(7, "f0", file("base.txt")).unwrap();

    a.update(7, |m| {
        let blocked = b.add_file(7, "fB", file("from-b.txt"));
        assert!(matches!(blocked, Err(CfoldError::Remote(RemoteError::Locked(_)))));
        Ok(m.with_file("fA", file("from-a.txt")))
    })
    .unwrap();

    let files: Vec<String> = a.open(7).unwrap().metadata().files().keys().cloned().collect();
    assert_eq!(files, ["f0", "fA"]);
}

#[test]
fn test_retyped_phrase_verifies_existing_folders() {
    let remote = Arc::new(MemoryRemote::new());
    let account = AccountStore::new(Arc::new(MemoryStore::new()), "alice@cloud.example");
    let key = private_key_from_pem(ALICE_KEY).unwrap();
    account
        .store_identity(ALICE_CERT, &key, &SecretString::from("Ocean tiger piano"))
        .unwrap();

    let first = FolderMetadataCoordinator::unlock(
        remote.clone(),
        account.clone(),
        &SecretString::from("Ocean tiger piano"),
    )
    .unwrap();
    first.add_file(1, "f", file("a.txt")).unwrap();

    let retyped = FolderMetadataCoordinator::unlock(
        remote.clone(),
        account.clone(),
        &SecretString::from("ocean  tiger piano"),
    )
    .unwrap();
    let folder = retyped.open(1).unwrap();
    assert!(folder.metadata().file("f").is_some());
    retyped.add_file(1, "g", file("b.txt")).unwrap();

    // Both sessions keep agreeing on the checksum.
    assert_eq!(first.open(1).unwrap().metadata().files().len(), 2);
    assert!(account.take_e2e_error_report().unwrap().is_none());
}
