//! CMS SignedData envelope construction for PKIResponse bodies.
//!
//! The envelope always carries signed attributes (content type and
//! message digest over the encapsulated octets) and identifies the
//! signer by issuer and serial. The raw signature comes from the
//! [`Signer`] backend; everything else is assembled here.

use std::time::Duration;

use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerInfo, SignerInfos,
};
use der::asn1::{Any, ObjectIdentifier, OctetString, SetOfVec};
use der::{Encode, Tag};
use sha2::{Digest, Sha256};
use x509_cert::attr::Attribute;
use x509_cert::spki::AlgorithmIdentifierOwned;
use x509_cert::Certificate;

use crate::oids;
use crate::signer::{with_timeout, Signer};
use crate::signer::soft::ecdsa_sha256;

use super::asn1::{CmcStatusInfo, PkiResponse, TaggedAttribute};
use super::CmcError;

/// DER of a PKIResponse carrying one status control.
pub fn pki_response_der(status: CmcStatusInfo) -> Result<Vec<u8>, CmcError> {
    let mut values = SetOfVec::new();
    values.insert(Any::encode_from(&status)?)?;

    let response = PkiResponse {
        control_sequence: vec![TaggedAttribute {
            body_part_id: 1,
            attr_type: oids::CMC_STATUS_INFO,
            attr_values: values,
        }],
        cms_sequence: vec![],
        other_msg_sequence: vec![],
    };
    Ok(response.to_der()?)
}

/// Wrap `payload` in a signed CMS envelope.
///
/// `signer_cert` both identifies the signer and rides along in the certs
/// bag, followed by `extra_certs` (issued certificates on success).
pub async fn sign_envelope(
    signer: &dyn Signer,
    signer_timeout: Duration,
    key_label: &str,
    signer_cert: &Certificate,
    econtent_type: ObjectIdentifier,
    payload: &[u8],
    extra_certs: &[Certificate],
) -> Result<Vec<u8>, CmcError> {
    let digest = Sha256::digest(payload);

    let mut signed_attrs = SetOfVec::new();
    signed_attrs.insert(attribute(oids::CONTENT_TYPE, Any::encode_from(&econtent_type)?)?)?;
    signed_attrs.insert(attribute(
        oids::MESSAGE_DIGEST,
        Any::encode_from(&OctetString::new(digest.as_slice())?)?,
    )?)?;

    // The signature covers the SET OF encoding of the signed attributes.
    let attrs_der = signed_attrs.to_der()?;
    let signature = with_timeout(signer_timeout, signer.sign_data(key_label, &attrs_der)).await?;

    let signer_info = SignerInfo {
        version: CmsVersion::V1,
        sid: cms::signed_data::SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: signer_cert.tbs_certificate.issuer.clone(),
            serial_number: signer_cert.tbs_certificate.serial_number.clone(),
        }),
        digest_alg: sha256_alg(),
        signed_attrs: Some(signed_attrs),
        signature_algorithm: ecdsa_sha256(),
        signature: OctetString::new(signature)?,
        unsigned_attrs: None,
    };

    let mut digest_algorithms = SetOfVec::new();
    digest_algorithms.insert(sha256_alg())?;

    let mut certs = SetOfVec::new();
    certs.insert(CertificateChoices::Certificate(signer_cert.clone()))?;
    for cert in extra_certs {
        certs.insert(CertificateChoices::Certificate(cert.clone()))?;
    }

    let mut signer_infos = SetOfVec::new();
    signer_infos.insert(signer_info)?;

    let signed_data = SignedData {
        version: CmsVersion::V3,
        digest_algorithms,
        encap_content_info: EncapsulatedContentInfo {
            econtent_type,
            econtent: Some(Any::new(Tag::OctetString, payload)?),
        },
        certificates: Some(CertificateSet(certs)),
        crls: None,
        signer_infos: SignerInfos(signer_infos),
    };

    let content_info = ContentInfo {
        content_type: oids::SIGNED_DATA,
        content: Any::encode_from(&signed_data)?,
    };
    Ok(content_info.to_der()?)
}

fn attribute(oid: ObjectIdentifier, value: Any) -> Result<Attribute, CmcError> {
    let mut values = SetOfVec::new();
    values.insert(value)?;
    Ok(Attribute { oid, values })
}

fn sha256_alg() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: oids::SHA_256,
        parameters: None,
    }
}
