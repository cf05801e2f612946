use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sigil_common::x509::{self, InvalidEncoding};

/// A stored certificate row. Immutable once created; revocation appends a
/// CRL row referencing the same issuer instead of touching this row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbCertificate {
    pub serial: i64,

    /// The certificate in PEM form.
    pub pem: String,

    /// SHA-256 hex fingerprint of the certificate DER.
    pub fingerprint: String,

    /// Reference to the certified public key row.
    pub public_key: i64,

    /// Reference to the CSR row the certificate was issued from.
    pub csr: i64,

    /// Reference to the issuing CA row.
    pub issuer: i64,

    /// Reference to the public key row that authorized issuance.
    pub authorized_by: i64,

    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,

    pub created: DateTime<Utc>,
}

/// Validated input for a new certificate row. Fingerprint and validity
/// window are derived from the PEM, never caller-supplied.
#[derive(Debug, Clone)]
pub struct NewCertificate {
    pub pem: String,
    pub fingerprint: String,
    pub public_key: i64,
    pub csr: i64,
    pub issuer: i64,
    pub authorized_by: i64,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl NewCertificate {
    pub fn from_pem(
        pem: impl Into<String>,
        public_key: i64,
        csr: i64,
        issuer: i64,
        authorized_by: i64,
    ) -> Result<Self, InvalidEncoding> {
        let pem = pem.into();
        let fingerprint = x509::cert_fingerprint(&pem)?;
        let (not_before, not_after) = x509::cert_validity(&pem)?;

        Ok(Self {
            pem,
            fingerprint,
            public_key,
            csr,
            issuer,
            authorized_by,
            not_before,
            not_after,
        })
    }
}
