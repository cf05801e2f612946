use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sigil_common::x509::{self, InvalidEncoding};

/// A stored certificate authority row. One row per issuing key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbCa {
    pub serial: i64,

    /// The CA certificate in PEM form.
    pub pem: String,

    /// Identifies the signing key handle inside the Signer backend.
    pub key_label: String,

    /// Reference to the CA's own public key row.
    pub public_key: i64,

    pub created: DateTime<Utc>,
}

/// Validated input for a new CA row.
#[derive(Debug, Clone)]
pub struct NewCa {
    pub pem: String,
    pub key_label: String,
    pub public_key: i64,
}

impl NewCa {
    pub fn from_pem(
        pem: impl Into<String>,
        key_label: impl Into<String>,
        public_key: i64,
    ) -> Result<Self, InvalidEncoding> {
        let pem = pem.into();
        let key_label = key_label.into();

        // Must parse as a certificate.
        x509::cert_fingerprint(&pem)?;
        if key_label.is_empty() {
            return Err(InvalidEncoding("empty key label"));
        }

        Ok(Self {
            pem,
            key_label,
            public_key,
        })
    }
}
