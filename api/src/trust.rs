//! The CMC outer-signer allow-list.
//!
//! Trust is decided by byte equality against an operator-provisioned
//! certificate bundle. No chain building, no path validation: a signer
//! certificate is trusted iff its exact DER is in the bundle.

use sigil_common::x509::InvalidEncoding;
use x509_parser::pem::Pem;
use x509_parser::prelude::FromDer;
use x509_parser::certificate::X509Certificate;

#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    allowed: Vec<Vec<u8>>,
}

impl TrustStore {
    /// Parse a PEM bundle of trusted CMC client certificates.
    pub fn from_pem_bundle(bundle: &str) -> Result<Self, InvalidEncoding> {
        let mut allowed = Vec::new();
        for pem in Pem::iter_from_buffer(bundle.as_bytes()) {
            let pem = pem.map_err(|_| InvalidEncoding("bad pem in trust bundle"))?;
            if pem.label != "CERTIFICATE" {
                return Err(InvalidEncoding("unexpected pem label in trust bundle"));
            }
            // Each entry must at least parse as a certificate.
            X509Certificate::from_der(&pem.contents)
                .map_err(|_| InvalidEncoding("bad certificate in trust bundle"))?;
            allowed.push(pem.contents);
        }
        Ok(Self { allowed })
    }

    pub fn is_trusted(&self, cert_der: &[u8]) -> bool {
        self.allowed.iter().any(|der| der == cert_der)
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT_PEM: &str = "-----BEGIN CERTIFICATE-----
MIIBJDCByqADAgECAgRhfDUqMAoGCCqGSM49BAMCMBoxGDAWBgNVBAMMD1Rlc3Qg
Q01DIENsaWVudDAeFw0yMTEwMjkxNzUzNDZaFw0yNjEwMjkxNzUzNDZaMBoxGDAW
BgNVBAMMD1Rlc3QgQ01DIENsaWVudDBZMBMGByqGSM49AgEGCCqGSM49AwEHA0IA
BJuWGZFY9U8KD8RsIALCJYElSH4GgI6/nY6L5RTPGdYl5xzF2yYKRlFQBNVbB359
HBmaVuhuKbTkLiKsTTy0qRMwCgYIKoZIzj0EAwIDSQAwRgIhAIitbkx60TsqHZbH
k9ko+ojFQ3XWJ0zTaKGQcfglrTU/AiEAjJs3LuO1F6GxDjgpLVVp+u750rVCwsUJ
zIqw8k4ytIY=
-----END CERTIFICATE-----
";

    #[test]
    fn exact_der_match_is_trusted() {
        let store = TrustStore::from_pem_bundle(CLIENT_PEM).unwrap();
        assert_eq!(store.len(), 1);

        let der = sigil_common::x509::decode_pem(CLIENT_PEM, "CERTIFICATE").unwrap();
        assert!(store.is_trusted(&der));

        let mut altered = der.clone();
        altered[10] ^= 0x01;
        assert!(!store.is_trusted(&altered));
    }

    #[test]
    fn empty_bundle_trusts_nothing() {
        let store = TrustStore::from_pem_bundle("").unwrap();
        assert!(store.is_empty());
        assert!(!store.is_trusted(&[0x30, 0x00]));
    }

    #[test]
    fn garbage_bundle_is_rejected() {
        assert!(TrustStore::from_pem_bundle("-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n").is_err());
    }
}
