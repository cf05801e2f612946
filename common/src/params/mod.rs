//! Input parameters for the sigil API.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Search pattern for certificate rows. Provided fields are matched exactly;
/// omitted fields are wildcards.
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
pub struct CertificateSearchParams {
    /// Canonical PEM of the certificate.
    pub pem: Option<String>,

    /// SHA-256 hex fingerprint of the certificate DER.
    pub fingerprint: Option<String>,
}
