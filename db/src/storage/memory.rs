//! In-process record store backend.
//!
//! All tables live behind one mutex, so uniqueness and reference checks are
//! trivially atomic with the insert that follows them. Serial assignment,
//! constraint checks, and the current-CRL pointer update all happen inside
//! the same critical section.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::models::{
    DbCa, DbCertificate, DbCrl, DbCsr, DbPublicKey, NewCa, NewCertificate, NewCrl, NewCsr,
    NewPublicKey,
};
use crate::storage::{
    CaFilter, CaStore, CertificateFilter, CertificateStore, CrlFilter, CrlStore, CsrFilter,
    CsrStore, PublicKeyFilter, PublicKeyStore, RevokeContext, Storage, StoreError,
};

#[derive(Debug, Default)]
struct Tables {
    last_serial: i64,
    public_keys: Vec<DbPublicKey>,
    csrs: Vec<DbCsr>,
    cas: Vec<DbCa>,
    certificates: Vec<DbCertificate>,
    crls: Vec<DbCrl>,

    /// Issuer CA serial -> serial of that issuer's current CRL row.
    /// Updated in the same critical section as the CRL insert.
    current_crl: HashMap<i64, i64>,
}

impl Tables {
    fn next_serial(&mut self) -> i64 {
        self.last_serial += 1;
        self.last_serial
    }

    fn public_key_exists(&self, serial: i64) -> bool {
        self.public_keys.iter().any(|r| r.serial == serial)
    }

    fn csr_exists(&self, serial: i64) -> bool {
        self.csrs.iter().any(|r| r.serial == serial)
    }

    fn ca_exists(&self, serial: i64) -> bool {
        self.cas.iter().any(|r| r.serial == serial)
    }
}

/// Memory-backed [`Storage`] implementation.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
    crl_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // A poisoned lock means a panic mid-insert; the tables themselves
        // are only ever mutated by a completed push, so recovery is safe.
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PublicKeyStore for MemoryStorage {
    async fn create(&self, new: NewPublicKey) -> Result<DbPublicKey, StoreError> {
        let mut t = self.lock();

        if t.public_keys.iter().any(|r| r.pem == new.pem) {
            return Err(StoreError::duplicate("public_key", "pem"));
        }

        let row = DbPublicKey {
            serial: t.next_serial(),
            pem: new.pem,
            fingerprint: new.fingerprint,
            admin: new.admin,
            created: Utc::now(),
        };
        t.public_keys.push(row.clone());

        debug!(serial = row.serial, "stored public key");
        Ok(row)
    }

    async fn list(&self, filter: PublicKeyFilter) -> Result<Vec<DbPublicKey>, StoreError> {
        let t = self.lock();
        Ok(t.public_keys
            .iter()
            .filter(|r| filter.serial.is_none_or(|v| r.serial == v))
            .filter(|r| filter.pem.as_ref().is_none_or(|v| &r.pem == v))
            .filter(|r| filter.fingerprint.as_ref().is_none_or(|v| &r.fingerprint == v))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CsrStore for MemoryStorage {
    async fn create(&self, new: NewCsr) -> Result<DbCsr, StoreError> {
        let mut t = self.lock();

        if t.csrs.iter().any(|r| r.pem == new.pem) {
            return Err(StoreError::duplicate("csr", "pem"));
        }
        if !t.public_key_exists(new.public_key) {
            return Err(StoreError::dangling("csr", "public_key", "public_key"));
        }

        let row = DbCsr {
            serial: t.next_serial(),
            pem: new.pem,
            public_key: new.public_key,
            created: Utc::now(),
        };
        t.csrs.push(row.clone());

        debug!(serial = row.serial, "stored csr");
        Ok(row)
    }

    async fn list(&self, filter: CsrFilter) -> Result<Vec<DbCsr>, StoreError> {
        let t = self.lock();
        Ok(t.csrs
            .iter()
            .filter(|r| filter.serial.is_none_or(|v| r.serial == v))
            .filter(|r| filter.pem.as_ref().is_none_or(|v| &r.pem == v))
            .filter(|r| filter.public_key.is_none_or(|v| r.public_key == v))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CaStore for MemoryStorage {
    async fn create(&self, new: NewCa) -> Result<DbCa, StoreError> {
        let mut t = self.lock();

        if t.cas.iter().any(|r| r.pem == new.pem) {
            return Err(StoreError::duplicate("ca", "pem"));
        }
        if t.cas.iter().any(|r| r.key_label == new.key_label) {
            return Err(StoreError::duplicate("ca", "key_label"));
        }
        if !t.public_key_exists(new.public_key) {
            return Err(StoreError::dangling("ca", "public_key", "public_key"));
        }

        let row = DbCa {
            serial: t.next_serial(),
            pem: new.pem,
            key_label: new.key_label,
            public_key: new.public_key,
            created: Utc::now(),
        };
        t.cas.push(row.clone());

        debug!(serial = row.serial, key_label = %row.key_label, "stored ca");
        Ok(row)
    }

    async fn list(&self, filter: CaFilter) -> Result<Vec<DbCa>, StoreError> {
        let t = self.lock();
        Ok(t.cas
            .iter()
            .filter(|r| filter.serial.is_none_or(|v| r.serial == v))
            .filter(|r| filter.pem.as_ref().is_none_or(|v| &r.pem == v))
            .filter(|r| filter.key_label.as_ref().is_none_or(|v| &r.key_label == v))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CertificateStore for MemoryStorage {
    async fn create(&self, new: NewCertificate) -> Result<DbCertificate, StoreError> {
        let mut t = self.lock();

        if t.certificates.iter().any(|r| r.pem == new.pem) {
            return Err(StoreError::duplicate("certificate", "pem"));
        }
        if t.certificates.iter().any(|r| r.fingerprint == new.fingerprint) {
            return Err(StoreError::duplicate("certificate", "fingerprint"));
        }
        if !t.public_key_exists(new.public_key) {
            return Err(StoreError::dangling(
                "certificate",
                "public_key",
                "public_key",
            ));
        }
        if !t.csr_exists(new.csr) {
            return Err(StoreError::dangling("certificate", "csr", "csr"));
        }
        if !t.ca_exists(new.issuer) {
            return Err(StoreError::dangling("certificate", "issuer", "ca"));
        }
        if !t.public_key_exists(new.authorized_by) {
            return Err(StoreError::dangling(
                "certificate",
                "authorized_by",
                "public_key",
            ));
        }

        let row = DbCertificate {
            serial: t.next_serial(),
            pem: new.pem,
            fingerprint: new.fingerprint,
            public_key: new.public_key,
            csr: new.csr,
            issuer: new.issuer,
            authorized_by: new.authorized_by,
            not_before: new.not_before,
            not_after: new.not_after,
            created: Utc::now(),
        };
        t.certificates.push(row.clone());

        debug!(serial = row.serial, issuer = row.issuer, "stored certificate");
        Ok(row)
    }

    async fn list(&self, filter: CertificateFilter) -> Result<Vec<DbCertificate>, StoreError> {
        let t = self.lock();
        Ok(t.certificates
            .iter()
            .filter(|r| filter.serial.is_none_or(|v| r.serial == v))
            .filter(|r| filter.pem.as_ref().is_none_or(|v| &r.pem == v))
            .filter(|r| filter.fingerprint.as_ref().is_none_or(|v| &r.fingerprint == v))
            .filter(|r| filter.issuer.is_none_or(|v| r.issuer == v))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CrlStore for MemoryStorage {
    async fn create(&self, new: NewCrl) -> Result<DbCrl, StoreError> {
        let mut t = self.lock();

        if !t.ca_exists(new.issuer) {
            return Err(StoreError::dangling("crl", "issuer", "ca"));
        }
        if !t.public_key_exists(new.authorized_by) {
            return Err(StoreError::dangling("crl", "authorized_by", "public_key"));
        }

        let row = DbCrl {
            serial: t.next_serial(),
            pem: new.pem,
            issuer: new.issuer,
            authorized_by: new.authorized_by,
            created: Utc::now(),
        };
        t.crls.push(row.clone());

        // The new row becomes the issuer's current CRL, atomically with the
        // insert.
        t.current_crl.insert(row.issuer, row.serial);

        debug!(serial = row.serial, issuer = row.issuer, "stored crl");
        Ok(row)
    }

    async fn list(&self, filter: CrlFilter) -> Result<Vec<DbCrl>, StoreError> {
        let t = self.lock();
        Ok(t.crls
            .iter()
            .filter(|r| filter.serial.is_none_or(|v| r.serial == v))
            .filter(|r| filter.issuer.is_none_or(|v| r.issuer == v))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn revoke_context(&self, ca_serial: i64) -> Result<RevokeContext, StoreError> {
        let t = self.lock();

        let ca = t
            .cas
            .iter()
            .find(|r| r.serial == ca_serial)
            .ok_or(StoreError::UnknownIssuer(ca_serial))?;

        let crl_pem = t
            .current_crl
            .get(&ca_serial)
            .and_then(|crl_serial| t.crls.iter().find(|r| r.serial == *crl_serial))
            .map(|r| r.pem.clone());

        Ok(RevokeContext {
            key_label: ca.key_label.clone(),
            ca_pem: ca.pem.clone(),
            crl_pem,
        })
    }

    async fn crl_lock(&self, ca_serial: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.crl_locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(ca_serial)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CERT_PEM: &str = "-----BEGIN CERTIFICATE-----
MIIBJDCByqADAgECAgRhfDUqMAoGCCqGSM49BAMCMBoxGDAWBgNVBAMMD1Rlc3Qg
Q01DIENsaWVudDAeFw0yMTEwMjkxNzUzNDZaFw0yNjEwMjkxNzUzNDZaMBoxGDAW
BgNVBAMMD1Rlc3QgQ01DIENsaWVudDBZMBMGByqGSM49AgEGCCqGSM49AwEHA0IA
BJuWGZFY9U8KD8RsIALCJYElSH4GgI6/nY6L5RTPGdYl5xzF2yYKRlFQBNVbB359
HBmaVuhuKbTkLiKsTTy0qRMwCgYIKoZIzj0EAwIDSQAwRgIhAIitbkx60TsqHZbH
k9ko+ojFQ3XWJ0zTaKGQcfglrTU/AiEAjJs3LuO1F6GxDjgpLVVp+u750rVCwsUJ
zIqw8k4ytIY=
-----END CERTIFICATE-----
";

    const CA_CERT_PEM: &str = "-----BEGIN CERTIFICATE-----
MIIBiTCCAS+gAwIBAgIUDPVzia4FW+Vpw2D3ZhH0vaPovtgwCgYIKoZIzj0EAwIw
GjEYMBYGA1UEAwwPU2lnaWwgVGVzdCBSb290MB4XDTI2MDgyNjE3NTA1OFoXDTM2
MDgyMzE3NTA1OFowGjEYMBYGA1UEAwwPU2lnaWwgVGVzdCBSb290MFkwEwYHKoZI
zj0CAQYIKoZIzj0DAQcDQgAEtNBSXqJMa/qr44KvA38jIQR5dXJP6sMF4ZJF7sMM
jQegkzbgQTtsAw8rzdEO2vAa7YVQ4/K1Gmcl4gvv3xT64qNTMFEwHQYDVR0OBBYE
FJLz28WkPnwSlwg+4yB49wCGyVmFMB8GA1UdIwQYMBaAFJLz28WkPnwSlwg+4yB4
9wCGyVmFMA8GA1UdEwEB/wQFMAMBAf8wCgYIKoZIzj0EAwIDSAAwRQIgV6xXb6E1
3zAjNJtxs1bT5sHyRPbN+YXCDR6LkLWW3j4CIQCQEBe5ZLhTtugae8p5zWz1KG8Q
iGzERursc6773mWnog==
-----END CERTIFICATE-----
";

    const PUBKEY_PEM: &str = "-----BEGIN PUBLIC KEY-----
MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEm5YZkVj1TwoPxGwgAsIlgSVIfgaA
jr+djovlFM8Z1iXnHMXbJgpGUVAE1VsHfn0cGZpW6G4ptOQuIqxNPLSpEw==
-----END PUBLIC KEY-----
";

    const CRL_PEM: &str = "-----BEGIN X509 CRL-----
MIGxMFkCAQEwCgYIKoZIzj0EAwIwGjEYMBYGA1UEAwwPU2lnaWwgVGVzdCBSb290
Fw0yNjA4MjYxNzUxMDNaFw0yNzA4MjYxNzUxMDNaoA4wDDAKBgNVHRQEAwIBATAK
BggqhkjOPQQDAgNIADBFAiAv9bU5QXnCoIa87nslQFccu07gOvYe7OEZ9aXA6FcY
+gIhALuUPqnCzSMqoOc9P7CEREm5Mf+yf9Vh4k6+nrpEH0uK
-----END X509 CRL-----
";

    fn csr_pem() -> String {
        // Any well-formed request document will do; the store treats the
        // blob as opaque beyond PEM validation.
        let der = pem_rfc7468::decode_vec(PUBKEY_PEM.as_bytes()).unwrap().1;
        pem_rfc7468::encode_string("CERTIFICATE REQUEST", pem_rfc7468::LineEnding::LF, &der)
            .unwrap()
    }

    async fn seed_issuer(store: &MemoryStorage) -> (i64, i64) {
        let pk = PublicKeyStore::create(store, NewPublicKey::from_pem(PUBKEY_PEM, true).unwrap())
            .await
            .unwrap();
        let ca = CaStore::create(
            store,
            NewCa::from_pem(CA_CERT_PEM, "test-root", pk.serial).unwrap(),
        )
        .await
        .unwrap();
        (pk.serial, ca.serial)
    }

    #[tokio::test]
    async fn save_assigns_serials_and_reads_back() {
        let store = MemoryStorage::new();
        let pk = PublicKeyStore::create(&store, NewPublicKey::from_pem(PUBKEY_PEM, false).unwrap())
            .await
            .unwrap();
        assert_eq!(pk.serial, 1);

        // Read-your-writes: immediately visible.
        let rows = PublicKeyStore::list(
            &store,
            PublicKeyFilter {
                pem: Some(PUBKEY_PEM.into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].serial, 1);
    }

    #[tokio::test]
    async fn duplicate_pem_is_rejected_once() {
        let store = MemoryStorage::new();
        let new = NewPublicKey::from_pem(PUBKEY_PEM, false).unwrap();
        PublicKeyStore::create(&store, new.clone()).await.unwrap();

        let err = PublicKeyStore::create(&store, new).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateValue { field: "pem", .. }));
    }

    #[tokio::test]
    async fn duplicate_certificate_fingerprint_is_rejected() {
        let store = MemoryStorage::new();
        let (pk, ca) = seed_issuer(&store).await;
        let csr = CsrStore::create(&store, NewCsr::from_pem(csr_pem(), pk).unwrap())
            .await
            .unwrap();

        let new = NewCertificate::from_pem(CERT_PEM, pk, csr.serial, ca, pk).unwrap();
        CertificateStore::create(&store, new.clone()).await.unwrap();

        let err = CertificateStore::create(&store, new).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateValue { .. }));
    }

    #[tokio::test]
    async fn dangling_reference_is_rejected_and_invisible() {
        let store = MemoryStorage::new();
        let (pk, _ca) = seed_issuer(&store).await;
        let csr = CsrStore::create(&store, NewCsr::from_pem(csr_pem(), pk).unwrap())
            .await
            .unwrap();

        // Issuer serial 999 does not exist.
        let new = NewCertificate::from_pem(CERT_PEM, pk, csr.serial, 999, pk).unwrap();
        let err = CertificateStore::create(&store, new).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::DanglingReference {
                field: "issuer",
                ..
            }
        ));

        let rows = CertificateStore::list(&store, CertificateFilter::default())
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn revoke_context_requires_known_issuer() {
        let store = MemoryStorage::new();
        let err = store.revoke_context(42).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownIssuer(42)));
    }

    #[tokio::test]
    async fn current_crl_advances_per_issuer() {
        let store = MemoryStorage::new();
        let (pk, ca) = seed_issuer(&store).await;

        let ctx = store.revoke_context(ca).await.unwrap();
        assert_eq!(ctx.key_label, "test-root");
        assert!(ctx.crl_pem.is_none());

        CrlStore::create(&store, NewCrl::from_pem(CRL_PEM, ca, pk).unwrap())
            .await
            .unwrap();

        let ctx = store.revoke_context(ca).await.unwrap();
        assert_eq!(ctx.crl_pem.as_deref(), Some(CRL_PEM));

        // Prior rows stay retrievable even after the pointer advances.
        let rows = CrlStore::list(
            &store,
            CrlFilter {
                issuer: Some(ca),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn fingerprint_search_is_repeatable() {
        let store = MemoryStorage::new();
        let (pk, ca) = seed_issuer(&store).await;
        let csr = CsrStore::create(&store, NewCsr::from_pem(csr_pem(), pk).unwrap())
            .await
            .unwrap();
        let cert = CertificateStore::create(
            &store,
            NewCertificate::from_pem(CERT_PEM, pk, csr.serial, ca, pk).unwrap(),
        )
        .await
        .unwrap();

        let filter = CertificateFilter {
            fingerprint: Some(cert.fingerprint.clone()),
            ..Default::default()
        };
        let first = CertificateStore::list(&store, filter.clone()).await.unwrap();
        let second = CertificateStore::list(&store, filter).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].serial, second[0].serial);
    }

    #[tokio::test]
    async fn crl_lock_serializes_same_issuer() {
        let store = Arc::new(MemoryStorage::new());

        let first = store.crl_lock(1).await;
        // A second lock on the same issuer must not be grantable while the
        // first is held.
        let second = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            store.crl_lock(1),
        )
        .await;
        assert!(second.is_err());

        // A different issuer is independent.
        let _other = store.crl_lock(2).await;

        drop(first);
        let _reacquired = store.crl_lock(1).await;
    }

    #[tokio::test]
    async fn malformed_input_never_reaches_the_store() {
        assert!(NewPublicKey::from_pem("garbage", false).is_err());
        assert!(NewCertificate::from_pem("garbage", 1, 1, 1, 1).is_err());
        assert!(NewCrl::from_pem("garbage", 1, 1).is_err());
        assert!(NewCa::from_pem(PUBKEY_PEM, "label", 1).is_err());
    }
}
