//! Per-account E2E state on top of a [`KeyValueStore`]

use std::sync::Arc;

use cfold_core::{CfoldError, CfoldResult, FolderId};
use cfold_crypto::{
    keys_match, passphrase_from_phrase, private_key_from_pem, private_key_to_pem,
    public_key_from_certificate, unwrap_private_key, wrap_private_key, RsaPrivateKey,
};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::identity::AccountIdentity;
use crate::migrated::MigratedFolderSet;
use crate::store::KeyValueStore;

pub const PUBLIC_KEY: &str = "PUBLIC_KEY";
pub const PRIVATE_KEY: &str = "PRIVATE_KEY";
pub const MNEMONIC: &str = "MNEMONIC";
pub const MIGRATED_FOLDER_IDS: &str = "MIGRATED_FOLDER_IDS";
pub const E2E_ERRORS: &str = "E2E_ERRORS";
pub const E2E_ERRORS_TIMESTAMP: &str = "E2E_ERRORS_TIMESTAMP";

/// Accumulated E2E failures since the last report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct E2eErrorReport {
    pub count: u32,
    /// Unix seconds of the first failure in this batch
    pub first_seen: u64,
}

/// E2E secrets of one account.
#[derive(Clone)]
pub struct AccountStore {
    store: Arc<dyn KeyValueStore>,
    account: String,
}

impl AccountStore {
    pub fn new(store: Arc<dyn KeyValueStore>, account: impl Into<String>) -> Self {
        Self {
            store,
            account: account.into(),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    fn get(&self, key: &str) -> CfoldResult<Option<String>> {
        self.store.get(&self.account, key)
    }

    fn set(&self, key: &str, value: &str) -> CfoldResult<()> {
        self.store.set(&self.account, key, value)
    }

    pub fn certificate(&self) -> CfoldResult<Option<String>> {
        self.get(PUBLIC_KEY)
    }

    pub fn wrapped_private_key(&self) -> CfoldResult<Option<String>> {
        self.get(PRIVATE_KEY)
    }

    pub fn mnemonic(&self) -> CfoldResult<Option<SecretString>> {
        Ok(self.get(MNEMONIC)?.map(SecretString::from))
    }

    pub fn has_identity(&self) -> CfoldResult<bool> {
        Ok(self.certificate()?.is_some() && self.wrapped_private_key()?.is_some())
    }

    /// Wrap `private_key` with the recovery phrase and persist it with the
    /// certificate and phrase. Refuses a key that does not match the certificate.
    pub fn store_identity(
        &self,
        certificate: &str,
        private_key: &RsaPrivateKey,
        phrase: &SecretString,
    ) -> CfoldResult<()> {
        let public_key = public_key_from_certificate(certificate)?;
        if !keys_match(private_key, &public_key) {
            return Err(CfoldError::KeyMismatch(
                "private key does not belong to the certificate".into(),
            ));
        }

        let pem = private_key_to_pem(private_key)?;
        let wrapped = wrap_private_key(&pem, &passphrase_from_phrase(phrase))?;

        self.set(PUBLIC_KEY, certificate)?;
        self.set(PRIVATE_KEY, &wrapped)?;
        self.set(MNEMONIC, phrase.expose_secret())?;
        info!(account = %self.account, "stored E2E identity");
        Ok(())
    }

    /// Unwrap the stored private key and check it against the stored certificate.
    ///
    /// A wrong phrase and a mismatched pair both report [`CfoldError::KeyMismatch`].
    pub fn unlock_identity(&self, phrase: &SecretString) -> CfoldResult<AccountIdentity> {
        let certificate = self.certificate()?.ok_or_else(|| {
            CfoldError::Config(format!("no certificate stored for account {}", self.account))
        })?;
        let wrapped = self.wrapped_private_key()?.ok_or_else(|| {
            CfoldError::Config(format!("no private key stored for account {}", self.account))
        })?;

        let pem = unwrap_private_key(&wrapped, &passphrase_from_phrase(phrase)).map_err(|e| {
            match e {
                CfoldError::Authentication(_) => {
                    CfoldError::KeyMismatch("recovery phrase does not unlock the private key".into())
                }
                other => other,
            }
        })?;
        let private_key = private_key_from_pem(&pem)?;
        let public_key = public_key_from_certificate(&certificate)?;
        if !keys_match(&private_key, &public_key) {
            warn!(account = %self.account, "stored private key does not match certificate");
            return Err(CfoldError::KeyMismatch(
                "stored private key does not match the certificate".into(),
            ));
        }

        // Checksums are keyed on the stored phrase, not on how it was retyped.
        let mnemonic = self.mnemonic()?.ok_or_else(|| {
            CfoldError::Config(format!("no mnemonic stored for account {}", self.account))
        })?;
        let mnemonic = SecretString::from(mnemonic.expose_secret().trim().to_string());

        debug!(account = %self.account, "unlocked E2E identity");
        Ok(AccountIdentity {
            private_key,
            public_key,
            certificate,
            mnemonic,
        })
    }

    /// Certificate of a collaborator, cached under `PUBLIC_KEY<user>`.
    pub fn collaborator_certificate(&self, user: &str) -> CfoldResult<Option<String>> {
        self.get(&format!("{PUBLIC_KEY}{user}"))
    }

    pub fn set_collaborator_certificate(&self, user: &str, certificate: &str) -> CfoldResult<()> {
        public_key_from_certificate(certificate)?;
        self.set(&format!("{PUBLIC_KEY}{user}"), certificate)
    }

    /// Forget the account's E2E keys and mnemonic.
    pub fn remove_e2e(&self) -> CfoldResult<()> {
        for key in [PUBLIC_KEY, PRIVATE_KEY, MNEMONIC] {
            self.store.delete(&self.account, key)?;
        }
        info!(account = %self.account, "removed E2E identity");
        Ok(())
    }

    pub fn migrated_folders(&self) -> CfoldResult<MigratedFolderSet> {
        match self.get(MIGRATED_FOLDER_IDS)? {
            Some(json) => MigratedFolderSet::from_json(&json),
            None => Ok(MigratedFolderSet::default()),
        }
    }

    pub fn is_migrated(&self, folder_id: FolderId) -> CfoldResult<bool> {
        Ok(self.migrated_folders()?.contains(folder_id))
    }

    pub fn mark_migrated(&self, folder_id: FolderId) -> CfoldResult<()> {
        let mut set = self.migrated_folders()?;
        if set.insert(folder_id) {
            self.set(MIGRATED_FOLDER_IDS, &set.to_json())?;
            debug!(folder_id, "marked folder as migrated");
        }
        Ok(())
    }

    /// Count one E2E failure, remembering when the first one happened.
    pub fn report_e2e_error(&self) -> CfoldResult<()> {
        let count = match self.get(E2E_ERRORS)? {
            Some(v) => v.parse::<u32>().unwrap_or(0),
            None => 0,
        };
        self.set(E2E_ERRORS, &count.saturating_add(1).to_string())?;
        if self.get(E2E_ERRORS_TIMESTAMP)?.is_none() {
            self.set(E2E_ERRORS_TIMESTAMP, &unix_now().to_string())?;
        }
        Ok(())
    }

    /// Read and clear the failure counters.
    pub fn take_e2e_error_report(&self) -> CfoldResult<Option<E2eErrorReport>> {
        let count = self
            .get(E2E_ERRORS)?
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);
        let first_seen = self
            .get(E2E_ERRORS_TIMESTAMP)?
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        self.store.delete(&self.account, E2E_ERRORS)?;
        self.store.delete(&self.account, E2E_ERRORS_TIMESTAMP)?;

        if count == 0 {
            return Ok(None);
        }
        Ok(Some(E2eErrorReport { count, first_seen }))
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const ALICE_KEY: &str = include_str!("../../cfold-crypto/testdata/alice.key");
    const ALICE_CERT: &str = include_str!("../../cfold-crypto/testdata/alice.crt");
    const BOB_CERT: &str = include_str!("../../cfold-crypto/testdata/bob.crt");

    fn account() -> AccountStore {
        AccountStore::new(Arc::new(MemoryStore::new()), "alice")
    }

    fn phrase() -> SecretString {
        SecretString::from("Abandon ability able about")
    }

    #[test]
    fn test_store_and_unlock() {
        let acct = account();
        let key = private_key_from_pem(ALICE_KEY).unwrap();
        acct.store_identity(ALICE_CERT, &key, &phrase()).unwrap();

        assert!(acct.has_identity().unwrap());
        assert_eq!(
            acct.mnemonic().unwrap().unwrap().expose_secret(),
            "Abandon ability able about"
        );

        let identity = acct.unlock_identity(&phrase()).unwrap();
        assert_eq!(identity.private_key, key);
        assert_eq!(identity.certificate, ALICE_CERT);
    }

    #[test]
    fn test_unlock_tolerates_spacing_and_case() {
        let acct = account();
        let key = private_key_from_pem(ALICE_KEY).unwrap();
        acct.store_identity(ALICE_CERT, &key, &phrase()).unwrap();

        let retyped = SecretString::from("abandon  ability able ABOUT");
        let identity = acct.unlock_identity(&retyped).unwrap();
        assert_eq!(
            identity.mnemonic.expose_secret(),
            "Abandon ability able about"
        );
    }

    #[test]
    fn test_unlocked_mnemonic_is_trimmed() {
        let store = Arc::new(MemoryStore::new());
        let acct = AccountStore::new(store.clone(), "alice");
        let key = private_key_from_pem(ALICE_KEY).unwrap();
        acct.store_identity(ALICE_CERT, &key, &phrase()).unwrap();
        store
            .set("alice", MNEMONIC, "Abandon ability able about\n")
            .unwrap();

        let identity = acct.unlock_identity(&phrase()).unwrap();
        assert_eq!(
            identity.mnemonic.expose_secret(),
            "Abandon ability able about"
        );
    }

    #[test]
    fn test_wrong_phrase_is_key_mismatch() {
        let acct = account();
        let key = private_key_from_pem(ALICE_KEY).unwrap();
        acct.store_identity(ALICE_CERT, &key, &phrase()).unwrap();

        let err = acct
            .unlock_identity(&SecretString::from("wrong words"))
            .unwrap_err();
        assert!(matches!(err, CfoldError::KeyMismatch(_)));
    }

    #[test]
    fn test_store_rejects_mismatched_pair() {
        let key = private_key_from_pem(ALICE_KEY).unwrap();
        let err = account().store_identity(BOB_CERT, &key, &phrase()).unwrap_err();
        assert!(matches!(err, CfoldError::KeyMismatch(_)));
    }

    #[test]
    fn test_certificate_swapped_after_store() {
        let acct = account();
        let key = private_key_from_pem(ALICE_KEY).unwrap();
        acct.store_identity(ALICE_CERT, &key, &phrase()).unwrap();
        acct.set(PUBLIC_KEY, BOB_CERT).unwrap();

        let err = acct.unlock_identity(&phrase()).unwrap_err();
        assert!(matches!(err, CfoldError::KeyMismatch(_)));
    }

    #[test]
    fn test_unlock_without_identity() {
        assert!(matches!(
            account().unlock_identity(&phrase()),
            Err(CfoldError::Config(_))
        ));
    }

    #[test]
    fn test_remove_e2e() {
        let acct = account();
        let key = private_key_from_pem(ALICE_KEY).unwrap();
        acct.store_identity(ALICE_CERT, &key, &phrase()).unwrap();
        acct.mark_migrated(3).unwrap();

        acct.remove_e2e().unwrap();
        assert!(!acct.has_identity().unwrap());
        assert!(acct.mnemonic().unwrap().is_none());
        assert!(acct.is_migrated(3).unwrap(), "migration record survives key removal");
    }

    #[test]
    fn test_migrated_folders() {
        let acct = account();
        assert!(!acct.is_migrated(9).unwrap());
        acct.mark_migrated(9).unwrap();
        acct.mark_migrated(9).unwrap();
        acct.mark_migrated(2).unwrap();
        assert!(acct.is_migrated(9).unwrap());
        assert_eq!(acct.get(MIGRATED_FOLDER_IDS).unwrap().as_deref(), Some("[2,9]"));
    }

    #[test]
    fn test_collaborator_certificate() {
        let acct = account();
        acct.set_collaborator_certificate("bob", BOB_CERT).unwrap();
        assert_eq!(
            acct.collaborator_certificate("bob").unwrap().as_deref(),
            Some(BOB_CERT)
        );
        assert!(acct.collaborator_certificate("carol").unwrap().is_none());
        assert!(matches!(
            acct.set_collaborator_certificate("carol", "garbage"),
            Err(CfoldError::Format(_))
        ));
    }

    #[test]
    fn test_error_report_counts_and_clears() {
        let acct = account();
        assert!(acct.take_e2e_error_report().unwrap().is_none());

        acct.report_e2e_error().unwrap();
        acct.report_e2e_error().unwrap();
        let report = acct.take_e2e_error_report().unwrap().unwrap();
        assert_eq!(report.count, 2);
        assert!(report.first_seen > 0);

        assert!(acct.take_e2e_error_report().unwrap().is_none());
    }
}
