//! Certificate persistence.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::certificate::Certificate;

/// Errors returned by a certificate store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store does not support this operation. Callers may treat it as
    /// "persistence disabled".
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    #[error("certificate {0} already stored")]
    Duplicate(String),

    #[error("certificate {0} already revoked")]
    AlreadyRevoked(String),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::NotImplemented(_))
    }
}

/// Revocation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedCertificateInfo {
    pub serial: String,
    pub provisioner_id: String,
    pub reason: String,
    pub reason_code: i32,
    pub revoked_at: DateTime<Utc>,
}

/// Backend storing issued certificates, revocations and used tokens.
///
/// Implementations must be safe to call from concurrent sign calls.
pub trait CertificateStore: Send + Sync {
    fn store_certificate(&self, cert: &Certificate) -> Result<(), StoreError>;

    /// Look up an issued certificate by hex serial.
    fn get_certificate(&self, serial: &str) -> Result<Option<Certificate>, StoreError>;

    fn revoke(&self, info: RevokedCertificateInfo) -> Result<(), StoreError>;

    fn is_revoked(&self, serial: &str) -> Result<bool, StoreError>;

    /// Record a one-time token id. Returns `false` if it was already used.
    fn use_token(&self, token_id: &str) -> Result<bool, StoreError>;

    fn shutdown(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    certificates: RwLock<HashMap<String, Certificate>>,
    revoked: RwLock<HashMap<String, RevokedCertificateInfo>>,
    used_tokens: RwLock<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored certificates.
    pub fn len(&self) -> usize {
        self.certificates.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CertificateStore for MemoryStore {
    fn store_certificate(&self, cert: &Certificate) -> Result<(), StoreError> {
        let mut certificates = self.certificates.write().map_err(|_| StoreError::Poisoned)?;
        if certificates.contains_key(cert.serial()) {
            return Err(StoreError::Duplicate(cert.serial().to_string()));
        }
        certificates.insert(cert.serial().to_string(), cert.clone());
        Ok(())
    }

    fn get_certificate(&self, serial: &str) -> Result<Option<Certificate>, StoreError> {
        let certificates = self.certificates.read().map_err(|_| StoreError::Poisoned)?;
        Ok(certificates.get(serial).cloned())
    }

    fn revoke(&self, info: RevokedCertificateInfo) -> Result<(), StoreError> {
        let mut revoked = self.revoked.write().map_err(|_| StoreError::Poisoned)?;
        if revoked.contains_key(&info.serial) {
            return Err(StoreError::AlreadyRevoked(info.serial));
        }
        revoked.insert(info.serial.clone(), info);
        Ok(())
    }

    fn is_revoked(&self, serial: &str) -> Result<bool, StoreError> {
        let revoked = self.revoked.read().map_err(|_| StoreError::Poisoned)?;
        Ok(revoked.contains_key(serial))
    }

    fn use_token(&self, token_id: &str) -> Result<bool, StoreError> {
        let mut used = self.used_tokens.write().map_err(|_| StoreError::Poisoned)?;
        Ok(used.insert(token_id.to_string()))
    }
}

/// Store that persists nothing.
///
/// Certificate operations report [`StoreError::NotImplemented`]; tokens are
/// always accepted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStore;

impl CertificateStore for NoStore {
    fn store_certificate(&self, _: &Certificate) -> Result<(), StoreError> {
        Err(StoreError::NotImplemented("store certificate"))
    }

    fn get_certificate(&self, _: &str) -> Result<Option<Certificate>, StoreError> {
        Err(StoreError::NotImplemented("get certificate"))
    }

    fn revoke(&self, _: RevokedCertificateInfo) -> Result<(), StoreError> {
        Err(StoreError::NotImplemented("revoke"))
    }

    fn is_revoked(&self, _: &str) -> Result<bool, StoreError> {
        Ok(false)
    }

    fn use_token(&self, _: &str) -> Result<bool, StoreError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    fn revocation(serial: &str) -> RevokedCertificateInfo {
        RevokedCertificateInfo {
            serial: serial.to_string(),
            provisioner_id: "ocf-devices:kid".to_string(),
            reason: "key compromise".to_string(),
            reason_code: 1,
            revoked_at: Utc::now(),
        }
    }

    #[test]
    fn test_memory_store_certificates() {
        let ca = testutil::TestCa::new();
        let store = MemoryStore::new();
        let cert = ca.identity.certificate();

        assert!(store.is_empty());
        store.store_certificate(cert).unwrap();
        assert_eq!(store.len(), 1);
        assert!(matches!(
            store.store_certificate(cert),
            Err(StoreError::Duplicate(_))
        ));

        let fetched = store.get_certificate(cert.serial()).unwrap().unwrap();
        assert_eq!(fetched.der(), cert.der());
        assert!(store.get_certificate("00").unwrap().is_none());
    }

    #[test]
    fn test_memory_store_revocation() {
        let store = MemoryStore::new();
        assert!(!store.is_revoked("01").unwrap());
        store.revoke(revocation("01")).unwrap();
        assert!(store.is_revoked("01").unwrap());
        assert!(matches!(
            store.revoke(revocation("01")),
            Err(StoreError::AlreadyRevoked(_))
        ));
    }

    #[test]
    fn test_memory_store_tokens_single_use() {
        let store = MemoryStore::new();
        assert!(store.use_token("abc").unwrap());
        assert!(!store.use_token("abc").unwrap());
        assert!(store.use_token("def").unwrap());
    }

    #[test]
    fn test_no_store() {
        let ca = testutil::TestCa::new();
        let err = NoStore
            .store_certificate(ca.identity.certificate())
            .unwrap_err();
        assert!(err.is_not_implemented());
        assert!(NoStore.use_token("abc").unwrap());
        assert!(NoStore.use_token("abc").unwrap());
    }
}
