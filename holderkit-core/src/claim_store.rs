//! Content-addressed store of received credentials.

#![allow(clippy::significant_drop_tightening)]

use std::sync::{Arc, Mutex};

use holderkit_db::{Db, Partition};
use tracing::{debug, info};

use crate::credential::CredentialExistence;
use crate::error::{HolderError, HolderResult};

const CREDENTIALS_PREFIX: &[u8] = b"credentials/";

/// Persistent map from content-derived key to credential.
///
/// Records are never mutated or deleted: inserting a credential whose key
/// is already present fails with [`HolderError::AlreadyExists`].
#[derive(Debug, Clone)]
pub struct ClaimStore {
    partition: Partition,
    lock: Arc<Mutex<()>>,
}

impl ClaimStore {
    /// Opens the credentials namespace of `db`.
    #[must_use]
    pub fn new(db: &Db) -> Self {
        Self {
            partition: db.partition(CREDENTIALS_PREFIX),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Stores `credential` and returns its key.
    ///
    /// # Errors
    ///
    /// Returns [`HolderError::AlreadyExists`] if a credential with the same
    /// key is stored, or a storage error if the commit fails.
    pub fn add_credential_existence(&self, credential: &CredentialExistence) -> HolderResult<String> {
        let key = credential.key();
        let value = serde_json::to_vec(credential)?;

        let _guard = self.lock.lock()?;
        let mut tx = self.partition.begin();
        if self.partition.get_in(&tx, key.as_bytes())?.is_some() {
            debug!(key = %key, "credential already stored");
            return Err(HolderError::AlreadyExists { key });
        }
        self.partition.put(&mut tx, key.as_bytes(), value);
        tx.commit()?;

        info!(key = %key, issuer = %credential.id, "credential stored");
        Ok(key)
    }

    /// Loads the credential stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`HolderError::NotFound`] if nothing is stored under `key`.
    pub fn get_by_id(&self, key: &str) -> HolderResult<CredentialExistence> {
        let raw = self.get_raw(key)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Returns the stored credential as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`HolderError::NotFound`] if nothing is stored under `key`.
    pub fn get_credential_json(&self, key: &str) -> HolderResult<String> {
        let raw = self.get_raw(key)?;
        String::from_utf8(raw)
            .map_err(|e| HolderError::Integrity(format!("credential {key} is not utf-8: {e}")))
    }

    /// Returns only the claim of the stored credential, as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`HolderError::NotFound`] if nothing is stored under `key`.
    pub fn get_claim_json(&self, key: &str) -> HolderResult<String> {
        let credential = self.get_by_id(key)?;
        Ok(serde_json::to_string(&credential.claim)?)
    }

    /// Visits every stored credential in key order. The visitor returns
    /// `Ok(false)` to stop.
    ///
    /// # Errors
    ///
    /// Returns the first visitor error, or a decoding or storage error.
    pub fn iterate<F>(&self, mut visit: F) -> HolderResult<()>
    where
        F: FnMut(&str, CredentialExistence) -> HolderResult<bool>,
    {
        self.partition.iterate(|key, value| {
            let key = decode_key(key)?;
            visit(key, serde_json::from_slice(value)?)
        })
    }

    /// Like [`iterate`](Self::iterate), handing out the raw JSON records.
    ///
    /// # Errors
    ///
    /// Returns the first visitor error, or a decoding or storage error.
    pub fn iterate_json<F>(&self, mut visit: F) -> HolderResult<()>
    where
        F: FnMut(&str, &str) -> HolderResult<bool>,
    {
        self.partition.iterate(|key, value| {
            let key = decode_key(key)?;
            let json = std::str::from_utf8(value).map_err(|e| {
                HolderError::Integrity(format!("credential {key} is not utf-8: {e}"))
            })?;
            visit(key, json)
        })
    }

    /// Like [`iterate`](Self::iterate), handing out only each credential's
    /// claim as JSON, as [`get_claim_json`](Self::get_claim_json) returns it.
    ///
    /// # Errors
    ///
    /// Returns the first visitor error, or a decoding or storage error.
    pub fn iterate_claims_json<F>(&self, mut visit: F) -> HolderResult<()>
    where
        F: FnMut(&str, &str) -> HolderResult<bool>,
    {
        self.iterate(|key, credential| {
            let claim = serde_json::to_string(&credential.claim)?;
            visit(key, &claim)
        })
    }

    fn get_raw(&self, key: &str) -> HolderResult<Vec<u8>> {
        self.partition
            .get(key.as_bytes())?
            .ok_or_else(|| HolderError::not_found("credential", key))
    }
}

fn decode_key(key: &[u8]) -> HolderResult<&str> {
    std::str::from_utf8(key)
        .map_err(|e| HolderError::Integrity(format!("invalid credential key: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::tests::sample_credential;

    #[test]
    fn test_add_twice_is_rejected_and_keeps_first() {
        let store = ClaimStore::new(&Db::in_memory().unwrap());
        let credential = sample_credential(&[7; 32]);

        let key = store.add_credential_existence(&credential).unwrap();
        assert_eq!(key, credential.key());

        let mut replay = credential.clone();
        replay.mtp_claim = "0xdifferent".to_string();
        match store.add_credential_existence(&replay) {
            Err(HolderError::AlreadyExists { key: existing }) => assert_eq!(existing, key),
            other => panic!("expected AlreadyExists, got {other:?}"),
        }

        assert_eq!(store.get_by_id(&key).unwrap(), credential);
        let mut count = 0;
        store
            .iterate(|_, _| {
                count += 1;
                Ok(true)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_get_unknown_key() {
        let store = ClaimStore::new(&Db::in_memory().unwrap());
        assert!(matches!(
            store.get_by_id("deadbeef"),
            Err(HolderError::NotFound { kind: "credential", .. })
        ));
        assert!(matches!(
            store.get_claim_json("deadbeef"),
            Err(HolderError::NotFound { .. })
        ));
    }

    #[test]
    fn test_json_accessors() {
        let store = ClaimStore::new(&Db::in_memory().unwrap());
        let credential = sample_credential(&[0xab, 0xcd]);
        let key = store.add_credential_existence(&credential).unwrap();

        assert_eq!(store.get_claim_json(&key).unwrap(), "\"0xabcd\"");
        let json = store.get_credential_json(&key).unwrap();
        let parsed: CredentialExistence = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, credential);
    }

    #[test]
    fn test_iterate_stops_early() {
        let store = ClaimStore::new(&Db::in_memory().unwrap());
        for i in 0..5u8 {
            store
                .add_credential_existence(&sample_credential(&[i]))
                .unwrap();
        }

        let mut seen = Vec::new();
        store
            .iterate_json(|key, json| {
                assert!(json.contains("\"claim\""));
                seen.push(key.to_string());
                Ok(seen.len() < 2)
            })
            .unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0] < seen[1]);
    }

    #[test]
    fn test_iterate_claims_json() {
        let store = ClaimStore::new(&Db::in_memory().unwrap());
        let first = store
            .add_credential_existence(&sample_credential(&[0x01, 0x02]))
            .unwrap();
        let second = store
            .add_credential_existence(&sample_credential(&[0xff]))
            .unwrap();

        let mut seen = Vec::new();
        store
            .iterate_claims_json(|key, claim| {
                assert_eq!(claim, store.get_claim_json(key).unwrap());
                seen.push((key.to_string(), claim.to_string()));
                Ok(true)
            })
            .unwrap();

        let mut expected = vec![
            (first, "\"0x0102\"".to_string()),
            (second, "\"0xff\"".to_string()),
        ];
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_other_namespaces_are_ignored() {
        let db = Db::in_memory().unwrap();
        let store = ClaimStore::new(&db);
        let mut tx = db.begin();
        tx.put(b"tickets/abc".to_vec(), b"{}".to_vec());
        tx.commit().unwrap();

        let mut count = 0;
        store
            .iterate(|_, _| {
                count += 1;
                Ok(true)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
