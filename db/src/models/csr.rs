use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sigil_common::x509::{self, InvalidEncoding};

/// A stored certification request row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbCsr {
    pub serial: i64,

    /// The request document in PEM form (PKCS#10 or CRMF body).
    pub pem: String,

    /// Reference to the public key row being certified.
    pub public_key: i64,

    pub created: DateTime<Utc>,
}

/// Validated input for a new CSR row.
#[derive(Debug, Clone)]
pub struct NewCsr {
    pub pem: String,
    pub public_key: i64,
}

impl NewCsr {
    pub fn from_pem(pem: impl Into<String>, public_key: i64) -> Result<Self, InvalidEncoding> {
        let pem = pem.into();
        x509::validate_csr_pem(&pem)?;

        Ok(Self { pem, public_key })
    }
}
