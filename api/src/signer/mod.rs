//! The CA private-key capability.
//!
//! All private-key operations go through the [`Signer`] trait; the service
//! itself never holds CA key material. [`soft::SoftSigner`] is the
//! in-process reference implementation; a PKCS#11-backed deployment swaps
//! in its own implementation of the same trait.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use x509_cert::ext::pkix::CrlReason;
use x509_cert::name::Name;

pub mod soft;

#[derive(Debug, Error)]
pub enum SignerError {
    /// The signing backend could not be reached or did not answer in time.
    #[error("signer unavailable: {0}")]
    Unavailable(String),

    /// The signing backend refused the operation.
    #[error("signer rejected the operation: {0}")]
    Rejected(String),
}

/// Everything the signer needs to issue one certificate.
#[derive(Debug, Clone)]
pub struct CertTemplate {
    pub subject: Name,
    pub issuer: Name,

    /// DER SubjectPublicKeyInfo of the key being certified.
    pub spki_der: Vec<u8>,

    pub validity_days: u64,
}

#[async_trait]
pub trait Signer: Send + Sync + 'static {
    /// Issue a certificate over `template`, signed by the key behind
    /// `key_label`. Returns the certificate PEM.
    async fn sign_certificate(
        &self,
        key_label: &str,
        template: &CertTemplate,
    ) -> Result<String, SignerError>;

    /// Produce a new CRL extending `previous_crl_pem` (or starting fresh)
    /// with one more entry. The returned PEM is complete and signed; it is
    /// never produced incrementally.
    async fn extend_crl(
        &self,
        key_label: &str,
        ca_pem: &str,
        revoked_serial: &[u8],
        reason: CrlReason,
        previous_crl_pem: Option<&str>,
    ) -> Result<String, SignerError>;

    /// Raw signature primitive: DER ECDSA signature over `data` with the
    /// key behind `key_label`. Used to sign CMS response envelopes.
    async fn sign_data(&self, key_label: &str, data: &[u8]) -> Result<Vec<u8>, SignerError>;
}

/// Bound a signer call with a timeout. Hardware-backed signers can stall;
/// a stalled call must not wedge the request task forever.
pub async fn with_timeout<T>(
    limit: Duration,
    fut: impl std::future::Future<Output = Result<T, SignerError>>,
) -> Result<T, SignerError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(SignerError::Unavailable("signer call timed out".into())),
    }
}
