//! Software P-256 signer.
//!
//! Holds signing keys by label, the shape a PKCS#11 session presents, and
//! assembles certificates and CRLs itself so that only the raw signature
//! step depends on the key backend.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use der::asn1::{BitString, OctetString, UtcTime};
use der::{Decode, Encode};
use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey;
use tracing::debug;
use x509_cert::certificate::{Certificate, TbsCertificate, Version};
use x509_cert::crl::{CertificateList, RevokedCert, TbsCertList};
use x509_cert::ext::pkix::CrlReason;
use x509_cert::ext::Extension;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::time::{Time, Validity};

use sigil_common::x509::decode_pem;

use super::{CertTemplate, Signer, SignerError};
use crate::oids;

const CRL_NEXT_UPDATE_SECS: u64 = 24 * 60 * 60;

/// In-process [`Signer`] backed by P-256 keys held in memory.
#[derive(Debug, Default)]
pub struct SoftSigner {
    keys: RwLock<HashMap<String, SigningKey>>,
}

impl SoftSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a PKCS#8 PEM private key under the given label.
    pub fn load_key_pem(&self, label: &str, pem: &str) -> Result<(), SignerError> {
        let key = SigningKey::from_pkcs8_pem(pem)
            .map_err(|_| SignerError::Rejected("invalid pkcs8 private key".into()))?;
        self.insert_key(label, key);
        Ok(())
    }

    /// Register an already-parsed signing key under the given label.
    pub fn insert_key(&self, label: &str, key: SigningKey) {
        self.keys
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(label.to_string(), key);
    }

    fn sign_der(&self, label: &str, data: &[u8]) -> Result<Vec<u8>, SignerError> {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        let key = keys
            .get(label)
            .ok_or_else(|| SignerError::Rejected(format!("unknown key label {label}")))?;

        let sig: Signature = key.sign(data);
        Ok(sig.to_der().as_bytes().to_vec())
    }
}

#[async_trait]
impl Signer for SoftSigner {
    async fn sign_certificate(
        &self,
        key_label: &str,
        template: &CertTemplate,
    ) -> Result<String, SignerError> {
        let spki = SubjectPublicKeyInfoOwned::from_der(&template.spki_der)
            .map_err(|_| SignerError::Rejected("malformed subject public key".into()))?;

        let algorithm = ecdsa_sha256();
        let tbs = TbsCertificate {
            version: Version::V3,
            serial_number: random_serial()?,
            signature: algorithm.clone(),
            issuer: template.issuer.clone(),
            validity: Validity {
                not_before: time_from_now(0)?,
                not_after: time_from_now(template.validity_days * 24 * 60 * 60)?,
            },
            subject: template.subject.clone(),
            subject_public_key_info: spki,
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: None,
        };

        let tbs_der = tbs.to_der().map_err(encoding)?;
        let sig = self.sign_der(key_label, &tbs_der)?;

        let cert = Certificate {
            tbs_certificate: tbs,
            signature_algorithm: algorithm,
            signature: BitString::from_bytes(&sig).map_err(encoding)?,
        };

        debug!(key_label, "issued certificate");
        to_pem("CERTIFICATE", &cert.to_der().map_err(encoding)?)
    }

    async fn extend_crl(
        &self,
        key_label: &str,
        ca_pem: &str,
        revoked_serial: &[u8],
        reason: CrlReason,
        previous_crl_pem: Option<&str>,
    ) -> Result<String, SignerError> {
        let ca_der = decode_pem(ca_pem, "CERTIFICATE")
            .map_err(|_| SignerError::Rejected("malformed ca certificate".into()))?;
        let ca_cert = Certificate::from_der(&ca_der)
            .map_err(|_| SignerError::Rejected("malformed ca certificate".into()))?;

        let mut revoked = match previous_crl_pem {
            Some(pem) => {
                let der = decode_pem(pem, "X509 CRL")
                    .map_err(|_| SignerError::Rejected("malformed previous crl".into()))?;
                CertificateList::from_der(&der)
                    .map_err(|_| SignerError::Rejected("malformed previous crl".into()))?
                    .tbs_cert_list
                    .revoked_certificates
                    .unwrap_or_default()
            }
            None => Vec::new(),
        };

        let reason_ext = Extension {
            extn_id: oids::CRL_REASON,
            critical: false,
            extn_value: OctetString::new(reason.to_der().map_err(encoding)?).map_err(encoding)?,
        };
        revoked.push(RevokedCert {
            serial_number: SerialNumber::new(revoked_serial)
                .map_err(|_| SignerError::Rejected("bad revoked serial".into()))?,
            revocation_date: time_from_now(0)?,
            crl_entry_extensions: Some(vec![reason_ext]),
        });

        let algorithm = ecdsa_sha256();
        let tbs = TbsCertList {
            version: Version::V2,
            signature: algorithm.clone(),
            issuer: ca_cert.tbs_certificate.subject.clone(),
            this_update: time_from_now(0)?,
            next_update: Some(time_from_now(CRL_NEXT_UPDATE_SECS)?),
            revoked_certificates: Some(revoked),
            crl_extensions: None,
        };

        let tbs_der = tbs.to_der().map_err(encoding)?;
        let sig = self.sign_der(key_label, &tbs_der)?;

        let crl = CertificateList {
            tbs_cert_list: tbs,
            signature_algorithm: algorithm,
            signature: BitString::from_bytes(&sig).map_err(encoding)?,
        };

        debug!(key_label, entries = crl.tbs_cert_list.revoked_certificates.as_ref().map(Vec::len), "extended crl");
        to_pem("X509 CRL", &crl.to_der().map_err(encoding)?)
    }

    async fn sign_data(&self, key_label: &str, data: &[u8]) -> Result<Vec<u8>, SignerError> {
        self.sign_der(key_label, data)
    }
}

pub(crate) fn ecdsa_sha256() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: oids::ECDSA_WITH_SHA_256,
        parameters: None,
    }
}

fn random_serial() -> Result<SerialNumber, SignerError> {
    let mut bytes = [0u8; 16];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| SignerError::Unavailable(format!("no entropy source: {e}")))?;
    // Positive and nonzero.
    bytes[0] &= 0x7f;
    bytes[0] |= 0x01;
    SerialNumber::new(&bytes).map_err(encoding)
}

fn time_from_now(offset_secs: u64) -> Result<Time, SignerError> {
    let at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| SignerError::Rejected("system clock before epoch".into()))?
        + Duration::from_secs(offset_secs);
    Ok(Time::UtcTime(UtcTime::from_unix_duration(at).map_err(encoding)?))
}

fn to_pem(label: &'static str, der: &[u8]) -> Result<String, SignerError> {
    pem_rfc7468::encode_string(label, pem_rfc7468::LineEnding::LF, der).map_err(encoding)
}

fn encoding<E: std::fmt::Display>(e: E) -> SignerError {
    SignerError::Rejected(format!("encoding failure: {e}"))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use p256::ecdsa::signature::Verifier;
    use p256::ecdsa::VerifyingKey;
    use x509_cert::name::Name;

    use super::*;

    // Deterministic test key; never used outside tests.
    pub(crate) const TEST_KEY_BYTES: [u8; 32] = [
        0x3f, 0x1c, 0x47, 0x2e, 0x9d, 0x5a, 0x68, 0x11, 0x2b, 0x90, 0xcc, 0x04, 0x7d, 0xe2,
        0x55, 0xa1, 0x13, 0x86, 0x42, 0x78, 0x9e, 0x0b, 0xd7, 0x31, 0x64, 0x58, 0xaa, 0x05,
        0x29, 0xf3, 0xc6, 0x12,
    ];

    fn signer_with_key(label: &str) -> (SoftSigner, SigningKey) {
        let key = SigningKey::from_slice(&TEST_KEY_BYTES).unwrap();
        let signer = SoftSigner::new();
        signer.insert_key(label, key.clone());
        (signer, key)
    }

    fn self_spki(key: &SigningKey) -> Vec<u8> {
        use p256::pkcs8::EncodePublicKey;
        VerifyingKey::from(key)
            .to_public_key_der()
            .unwrap()
            .as_bytes()
            .to_vec()
    }

    #[tokio::test]
    async fn issues_a_parseable_signed_certificate() {
        let (signer, key) = signer_with_key("root");
        let template = CertTemplate {
            subject: Name::from_str("CN=leaf").unwrap(),
            issuer: Name::from_str("CN=root").unwrap(),
            spki_der: self_spki(&key),
            validity_days: 365,
        };

        let pem = signer.sign_certificate("root", &template).await.unwrap();
        let der = decode_pem(&pem, "CERTIFICATE").unwrap();
        let cert = Certificate::from_der(&der).unwrap();

        let tbs_der = cert.tbs_certificate.to_der().unwrap();
        let sig = Signature::from_der(cert.signature.as_bytes().unwrap()).unwrap();
        VerifyingKey::from(&key).verify(&tbs_der, &sig).unwrap();
    }

    #[tokio::test]
    async fn crl_extension_appends_entry_with_reason() {
        let (signer, key) = signer_with_key("root");
        let template = CertTemplate {
            subject: Name::from_str("CN=root").unwrap(),
            issuer: Name::from_str("CN=root").unwrap(),
            spki_der: self_spki(&key),
            validity_days: 30,
        };
        let ca_pem = signer.sign_certificate("root", &template).await.unwrap();

        let first = signer
            .extend_crl("root", &ca_pem, &[0x01, 0x02], CrlReason::CessationOfOperation, None)
            .await
            .unwrap();
        let second = signer
            .extend_crl(
                "root",
                &ca_pem,
                &[0x03, 0x04],
                CrlReason::CessationOfOperation,
                Some(&first),
            )
            .await
            .unwrap();
        assert_ne!(first, second);

        let der = decode_pem(&second, "X509 CRL").unwrap();
        let crl = CertificateList::from_der(&der).unwrap();
        let revoked = crl.tbs_cert_list.revoked_certificates.unwrap();
        assert_eq!(revoked.len(), 2);
        assert_eq!(revoked[1].serial_number.as_bytes(), &[0x03, 0x04]);

        let exts = revoked[1].crl_entry_extensions.as_ref().unwrap();
        assert_eq!(exts[0].extn_id, oids::CRL_REASON);
        let reason = CrlReason::from_der(exts[0].extn_value.as_bytes()).unwrap();
        assert_eq!(reason, CrlReason::CessationOfOperation);
    }

    #[tokio::test]
    async fn unknown_label_is_rejected() {
        let (signer, key) = signer_with_key("root");
        let template = CertTemplate {
            subject: Name::from_str("CN=leaf").unwrap(),
            issuer: Name::from_str("CN=root").unwrap(),
            spki_der: self_spki(&key),
            validity_days: 1,
        };
        let err = signer.sign_certificate("nope", &template).await.unwrap_err();
        assert!(matches!(err, SignerError::Rejected(_)));
    }
}
