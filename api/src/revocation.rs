//! Certificate revocation.
//!
//! Revocation never mutates the certificate row. It extends the issuer's
//! current CRL by one entry and appends the result as a new CRL row; the
//! newest row per issuer is the current CRL. The read-extend-write cycle
//! holds the issuer's CRL lock so concurrent revocations cannot extend a
//! stale list, and a signer failure writes nothing.

use std::time::Duration;

use sigil_common::x509::{self, InvalidEncoding};
use sigil_db::models::{DbCertificate, DbCrl, NewCrl};
use sigil_db::storage::{CrlStore, Storage, StoreError};
use thiserror::Error;
use tracing::info;
use x509_cert::ext::pkix::CrlReason;

use crate::signer::{with_timeout, Signer, SignerError};

/// Every revocation is recorded with reason cessationOfOperation.
pub const REVOCATION_REASON: CrlReason = CrlReason::CessationOfOperation;

#[derive(Debug, Error)]
pub enum RevokeError {
    /// The certificate is not an issued row of the named authority.
    #[error("certificate was not issued by this authority")]
    NotIssued,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Encoding(#[from] InvalidEncoding),
}

/// Revoke one issued certificate, returning the new current CRL row.
pub async fn revoke_certificate(
    storage: &dyn Storage,
    signer: &dyn Signer,
    signer_timeout: Duration,
    cert: &DbCertificate,
    authorized_by: i64,
) -> Result<DbCrl, RevokeError> {
    let issuer = cert.issuer;

    // Held until the new CRL row is saved (or the signer fails).
    let _guard = storage.crl_lock(issuer).await;

    let ctx = storage.revoke_context(issuer).await?;
    let revoked_serial = x509::cert_serial(&cert.pem)?;

    let crl_pem = with_timeout(
        signer_timeout,
        signer.extend_crl(
            &ctx.key_label,
            &ctx.ca_pem,
            &revoked_serial,
            REVOCATION_REASON,
            ctx.crl_pem.as_deref(),
        ),
    )
    .await?;

    let row = CrlStore::create(storage, NewCrl::from_pem(crl_pem, issuer, authorized_by)?).await?;

    info!(
        certificate = cert.serial,
        issuer,
        crl = row.serial,
        "certificate revoked"
    );
    Ok(row)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::Arc;

    use der::Decode;
    use p256::ecdsa::{SigningKey, VerifyingKey};
    use p256::pkcs8::EncodePublicKey;
    use sigil_db::models::{NewCa, NewCertificate, NewCsr, NewPublicKey};
    use sigil_db::storage::{CaStore, CertificateStore, CrlFilter, CsrStore, PublicKeyStore};
    use sigil_db::storage::memory::MemoryStorage;
    use x509_cert::crl::CertificateList;
    use x509_cert::name::Name;

    use crate::signer::soft::SoftSigner;
    use crate::signer::CertTemplate;

    use super::*;

    const ROOT_KEY: [u8; 32] = [
        0x11, 0x8a, 0x2f, 0x64, 0xd0, 0x3b, 0x51, 0x97, 0x0e, 0xc4, 0x76, 0x2d, 0x88, 0x1b,
        0xa9, 0x33, 0x5c, 0xe0, 0x47, 0x6a, 0x90, 0x12, 0xfd, 0x28, 0x73, 0xb5, 0x4e, 0x81,
        0x1f, 0xc2, 0x9a, 0x06,
    ];
    const LEAF_KEY: [u8; 32] = [
        0x22, 0x75, 0x0c, 0x5e, 0xa1, 0x40, 0x93, 0x7f, 0x18, 0xd6, 0x6b, 0x02, 0xe4, 0x39,
        0x8d, 0x57, 0x60, 0xff, 0x2c, 0x15, 0xb8, 0x09, 0xde, 0x41, 0x86, 0x97, 0x50, 0x2a,
        0x3d, 0xe1, 0x74, 0x0b,
    ];

    fn spki_pem(key: &SigningKey) -> String {
        VerifyingKey::from(key)
            .to_public_key_pem(p256::pkcs8::LineEnding::LF)
            .unwrap()
    }

    fn spki_der(key: &SigningKey) -> Vec<u8> {
        VerifyingKey::from(key)
            .to_public_key_der()
            .unwrap()
            .as_bytes()
            .to_vec()
    }

    fn csr_pem(key: &SigningKey) -> String {
        pem_rfc7468::encode_string("CERTIFICATE REQUEST", pem_rfc7468::LineEnding::LF, &spki_der(key))
            .unwrap()
    }

    struct Fixture {
        storage: Arc<MemoryStorage>,
        signer: SoftSigner,
        ca_serial: i64,
        admin_serial: i64,
        cert: DbCertificate,
    }

    /// A CA row, an issued leaf, and a signer holding the CA key.
    async fn fixture() -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        let signer = SoftSigner::new();
        let root = SigningKey::from_slice(&ROOT_KEY).unwrap();
        let leaf = SigningKey::from_slice(&LEAF_KEY).unwrap();
        signer.insert_key("root", root.clone());

        let root_name = Name::from_str("CN=Revocation Test Root").unwrap();
        let ca_pem = signer
            .sign_certificate(
                "root",
                &CertTemplate {
                    subject: root_name.clone(),
                    issuer: root_name.clone(),
                    spki_der: spki_der(&root),
                    validity_days: 30,
                },
            )
            .await
            .unwrap();

        let admin = PublicKeyStore::create(
            &*storage,
            NewPublicKey::from_pem(spki_pem(&root), true).unwrap(),
        )
        .await
        .unwrap();
        let ca = CaStore::create(
            &*storage,
            NewCa::from_pem(&ca_pem, "root", admin.serial).unwrap(),
        )
        .await
        .unwrap();

        let leaf_pk = PublicKeyStore::create(
            &*storage,
            NewPublicKey::from_pem(spki_pem(&leaf), false).unwrap(),
        )
        .await
        .unwrap();
        let csr = CsrStore::create(
            &*storage,
            NewCsr::from_pem(csr_pem(&leaf), leaf_pk.serial).unwrap(),
        )
        .await
        .unwrap();

        let leaf_pem = signer
            .sign_certificate(
                "root",
                &CertTemplate {
                    subject: Name::from_str("CN=revoke-me").unwrap(),
                    issuer: root_name,
                    spki_der: spki_der(&leaf),
                    validity_days: 7,
                },
            )
            .await
            .unwrap();
        let cert = CertificateStore::create(
            &*storage,
            NewCertificate::from_pem(&leaf_pem, leaf_pk.serial, csr.serial, ca.serial, admin.serial)
                .unwrap(),
        )
        .await
        .unwrap();

        Fixture {
            storage,
            signer,
            ca_serial: ca.serial,
            admin_serial: admin.serial,
            cert,
        }
    }

    #[tokio::test]
    async fn revocation_appends_a_crl_row() {
        let fx = fixture().await;

        let row = revoke_certificate(
            &*fx.storage,
            &fx.signer,
            Duration::from_secs(5),
            &fx.cert,
            fx.admin_serial,
        )
        .await
        .unwrap();
        assert_eq!(row.issuer, fx.ca_serial);

        // The new row is the issuer's current CRL and carries the entry.
        let ctx = fx.storage.revoke_context(fx.ca_serial).await.unwrap();
        assert_eq!(ctx.crl_pem.as_deref(), Some(row.pem.as_str()));

        let der = x509::decode_pem(&row.pem, "X509 CRL").unwrap();
        let crl = CertificateList::from_der(&der).unwrap();
        let revoked = crl.tbs_cert_list.revoked_certificates.unwrap();
        assert_eq!(revoked.len(), 1);
        assert_eq!(
            revoked[0].serial_number.as_bytes(),
            x509::cert_serial(&fx.cert.pem).unwrap()
        );
    }

    #[tokio::test]
    async fn second_revocation_extends_not_replaces() {
        let fx = fixture().await;

        revoke_certificate(
            &*fx.storage,
            &fx.signer,
            Duration::from_secs(5),
            &fx.cert,
            fx.admin_serial,
        )
        .await
        .unwrap();
        let second = revoke_certificate(
            &*fx.storage,
            &fx.signer,
            Duration::from_secs(5),
            &fx.cert,
            fx.admin_serial,
        )
        .await
        .unwrap();

        let der = x509::decode_pem(&second.pem, "X509 CRL").unwrap();
        let crl = CertificateList::from_der(&der).unwrap();
        assert_eq!(crl.tbs_cert_list.revoked_certificates.unwrap().len(), 2);

        // Both rows remain; history is append-only.
        let rows = CrlStore::list(
            &*fx.storage,
            CrlFilter {
                issuer: Some(fx.ca_serial),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn signer_failure_writes_nothing() {
        let fx = fixture().await;

        // A signer without the CA's key rejects the operation.
        let empty = SoftSigner::new();
        let err = revoke_certificate(
            &*fx.storage,
            &empty,
            Duration::from_secs(5),
            &fx.cert,
            fx.admin_serial,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RevokeError::Signer(_)));

        let rows = CrlStore::list(&*fx.storage, CrlFilter::default()).await.unwrap();
        assert!(rows.is_empty());
        let ctx = fx.storage.revoke_context(fx.ca_serial).await.unwrap();
        assert!(ctx.crl_pem.is_none());
    }
}
