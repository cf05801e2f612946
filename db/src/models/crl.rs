use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sigil_common::x509::{self, InvalidEncoding};

/// A stored CRL row. Every revocation appends a new row; the most recently
/// saved row per issuer is that issuer's current CRL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbCrl {
    pub serial: i64,

    /// The CRL in PEM form.
    pub pem: String,

    /// Reference to the issuing CA row.
    pub issuer: i64,

    /// Reference to the public key row that authorized the revocation.
    pub authorized_by: i64,

    pub created: DateTime<Utc>,
}

/// Validated input for a new CRL row.
#[derive(Debug, Clone)]
pub struct NewCrl {
    pub pem: String,
    pub issuer: i64,
    pub authorized_by: i64,
}

impl NewCrl {
    pub fn from_pem(
        pem: impl Into<String>,
        issuer: i64,
        authorized_by: i64,
    ) -> Result<Self, InvalidEncoding> {
        let pem = pem.into();
        x509::validate_crl_pem(&pem)?;

        Ok(Self {
            pem,
            issuer,
            authorized_by,
        })
    }
}
