//! Pure X.509 helpers.
//!
//! Everything here is derived deterministically from an entity's PEM blob.
//! Fingerprints and validity windows are never accepted from callers; they
//! are recomputed from the encoded form so metadata cannot be forged.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_parser::prelude::*;

/// The supplied blob was not a well-formed PEM document or did not decode
/// as the expected ASN.1 structure. The inner context is for logs only and
/// is never echoed back to callers.
#[derive(Debug, Error)]
#[error("invalid encoding: {0}")]
pub struct InvalidEncoding(pub &'static str);

/// Decode a single PEM document, checking the expected label.
pub fn decode_pem(pem: &str, label: &'static str) -> Result<Vec<u8>, InvalidEncoding> {
    let (found, der) =
        pem_rfc7468::decode_vec(pem.as_bytes()).map_err(|_| InvalidEncoding("bad pem"))?;
    if found != label {
        return Err(InvalidEncoding("unexpected pem label"));
    }
    Ok(der)
}

/// SHA-256 hex digest of the DER inside a PEM document.
///
/// Hashing the DER rather than the PEM text makes the fingerprint stable
/// across line-wrapping and whitespace differences.
pub fn fingerprint(pem: &str, label: &'static str) -> Result<String, InvalidEncoding> {
    let der = decode_pem(pem, label)?;
    let mut hasher = Sha256::new();
    hasher.update(&der);
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 fingerprint of a certificate PEM.
pub fn cert_fingerprint(pem: &str) -> Result<String, InvalidEncoding> {
    // Checks that the DER actually parses as a certificate first.
    let der = decode_pem(pem, "CERTIFICATE")?;
    parse_cert(&der)?;
    fingerprint(pem, "CERTIFICATE")
}

/// notBefore/notAfter of a certificate PEM as UTC timestamps.
pub fn cert_validity(pem: &str) -> Result<(DateTime<Utc>, DateTime<Utc>), InvalidEncoding> {
    let der = decode_pem(pem, "CERTIFICATE")?;
    let cert = parse_cert(&der)?;

    let not_before = DateTime::from_timestamp(cert.validity().not_before.timestamp(), 0)
        .ok_or(InvalidEncoding("notBefore out of range"))?;
    let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
        .ok_or(InvalidEncoding("notAfter out of range"))?;

    Ok((not_before, not_after))
}

/// The certificate's own encoded serial number, big-endian bytes.
///
/// This is the serial inside the PEM, not a store-assigned row serial.
pub fn cert_serial(pem: &str) -> Result<Vec<u8>, InvalidEncoding> {
    let der = decode_pem(pem, "CERTIFICATE")?;
    let cert = parse_cert(&der)?;
    Ok(cert.raw_serial().to_vec())
}

/// RFC 2253-style subject name of a certificate PEM, for logging.
pub fn cert_subject(pem: &str) -> Result<String, InvalidEncoding> {
    let der = decode_pem(pem, "CERTIFICATE")?;
    let cert = parse_cert(&der)?;
    Ok(cert.subject().to_string())
}

/// Validate that a PEM blob is a well-formed SubjectPublicKeyInfo.
pub fn validate_public_key_pem(pem: &str) -> Result<(), InvalidEncoding> {
    let der = decode_pem(pem, "PUBLIC KEY")?;
    SubjectPublicKeyInfo::from_der(&der).map_err(|_| InvalidEncoding("bad spki"))?;
    Ok(())
}

/// Validate that a PEM blob is a well-formed certification request document.
///
/// CMC issuance can carry either PKCS#10 or CRMF request bodies; both are
/// archived under the same PEM label, so only the envelope is checked here.
/// The protocol handler fully decodes the inner structure before it ever
/// reaches the store.
pub fn validate_csr_pem(pem: &str) -> Result<(), InvalidEncoding> {
    let der = decode_pem(pem, "CERTIFICATE REQUEST")?;
    if der.is_empty() {
        return Err(InvalidEncoding("empty request"));
    }
    Ok(())
}

/// Validate that a PEM blob is a well-formed CRL.
pub fn validate_crl_pem(pem: &str) -> Result<(), InvalidEncoding> {
    let der = decode_pem(pem, "X509 CRL")?;
    CertificateRevocationList::from_der(&der).map_err(|_| InvalidEncoding("bad crl"))?;
    Ok(())
}

fn parse_cert(der: &[u8]) -> Result<X509Certificate<'_>, InvalidEncoding> {
    let (rest, cert) =
        X509Certificate::from_der(der).map_err(|_| InvalidEncoding("bad certificate"))?;
    if !rest.is_empty() {
        return Err(InvalidEncoding("trailing bytes after certificate"));
    }
    Ok(cert)
}
