use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sigil_common::x509::{self, InvalidEncoding};

/// A stored public key row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbPublicKey {
    pub serial: i64,

    /// SubjectPublicKeyInfo in PEM form.
    pub pem: String,

    /// SHA-256 hex fingerprint of the key DER.
    pub fingerprint: String,

    /// Admin keys are allowed elevated operations on the REST surface.
    pub admin: bool,

    pub created: DateTime<Utc>,
}

/// Validated input for a new public key row.
#[derive(Debug, Clone)]
pub struct NewPublicKey {
    pub pem: String,
    pub fingerprint: String,
    pub admin: bool,
}

impl NewPublicKey {
    pub fn from_pem(pem: impl Into<String>, admin: bool) -> Result<Self, InvalidEncoding> {
        let pem = pem.into();
        x509::validate_public_key_pem(&pem)?;
        let fingerprint = x509::fingerprint(&pem, "PUBLIC KEY")?;

        Ok(Self {
            pem,
            fingerprint,
            admin,
        })
    }
}
