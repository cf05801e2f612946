//! Parsing and verification of incoming CMC requests.
//!
//! A request is a CMS SignedData envelope around a PKIData body. Before
//! anything is dispatched the handler checks, in order: the envelope and
//! body decode; the signed attributes bind the body (content type and
//! message digest); the outer signer certificate is on the trust
//! allow-list and inside its validity window; the outer signature
//! verifies; and every enclosed certification request proves possession
//! of its subject key.

use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::signed_data::{SignedData, SignerIdentifier};
use crmf::request::CertReqMsg;
use der::asn1::{ObjectIdentifier, OctetString};
use der::{Decode, Encode};
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use sha2::{Digest, Sha256};
use x509_cert::name::Name;
use x509_cert::Certificate;
use x509_parser::prelude::FromDer;
use x509_parser::certificate::X509Certificate;

use crate::oids;
use crate::trust::TrustStore;

use super::asn1::{PkiData, TaggedRequest};
use super::CmcError;

/// A decoded request, with everything needed to check the outer signature.
pub struct ParsedRequest {
    pub pki_data: PkiData,

    /// The raw PKIData octets the digest attribute must match.
    pub econtent: Vec<u8>,

    /// The certificate named by the signerInfo, found in the certs bag.
    pub signer_cert: Certificate,
    pub signer_cert_der: Vec<u8>,

    /// DER of the signed attributes as covered by the signature
    /// (SET OF encoding, per RFC 5652 section 5.4).
    pub signed_attrs_der: Vec<u8>,

    /// DER ECDSA signature from the signerInfo.
    pub signature: Vec<u8>,

    pub content_type_attr: ObjectIdentifier,
    pub message_digest_attr: Vec<u8>,
}

/// Decode the CMS envelope down to the PKIData body.
pub fn parse(raw: &[u8]) -> Result<ParsedRequest, CmcError> {
    let ci = ContentInfo::from_der(raw).map_err(|_| CmcError::Malformed("not a cms document"))?;
    if ci.content_type != oids::SIGNED_DATA {
        return Err(CmcError::Malformed("outer content is not signed-data"));
    }
    let signed: SignedData = ci
        .content
        .decode_as()
        .map_err(|_| CmcError::Malformed("bad signed-data"))?;

    if signed.encap_content_info.econtent_type != oids::CCT_PKI_DATA {
        return Err(CmcError::Malformed("encapsulated content is not pki-data"));
    }
    let econtent = signed
        .encap_content_info
        .econtent
        .ok_or(CmcError::Malformed("detached content not supported"))?
        .decode_as::<OctetString>()
        .map_err(|_| CmcError::Malformed("bad encapsulated content"))?
        .as_bytes()
        .to_vec();
    let pki_data =
        PkiData::from_der(&econtent).map_err(|_| CmcError::Malformed("bad pki-data body"))?;

    let signer_info = signed
        .signer_infos
        .0
        .iter()
        .next()
        .ok_or(CmcError::Malformed("no signer info"))?;

    let signed_attrs = signer_info
        .signed_attrs
        .as_ref()
        .ok_or(CmcError::Malformed("no signed attributes"))?;
    let signed_attrs_der = signed_attrs
        .to_der()
        .map_err(|_| CmcError::Malformed("bad signed attributes"))?;

    let mut content_type_attr = None;
    let mut message_digest_attr = None;
    for attr in signed_attrs.iter() {
        let value = attr
            .values
            .iter()
            .next()
            .ok_or(CmcError::Malformed("empty signed attribute"))?;
        if attr.oid == oids::CONTENT_TYPE {
            content_type_attr = Some(
                value
                    .decode_as::<ObjectIdentifier>()
                    .map_err(|_| CmcError::Malformed("bad content-type attribute"))?,
            );
        } else if attr.oid == oids::MESSAGE_DIGEST {
            message_digest_attr = Some(
                value
                    .decode_as::<OctetString>()
                    .map_err(|_| CmcError::Malformed("bad message-digest attribute"))?
                    .as_bytes()
                    .to_vec(),
            );
        }
    }
    let content_type_attr =
        content_type_attr.ok_or(CmcError::Malformed("missing content-type attribute"))?;
    let message_digest_attr =
        message_digest_attr.ok_or(CmcError::Malformed("missing message-digest attribute"))?;

    let SignerIdentifier::IssuerAndSerialNumber(sid) = &signer_info.sid else {
        return Err(CmcError::Malformed("unsupported signer identifier"));
    };

    let signer_cert = signed
        .certificates
        .as_ref()
        .and_then(|certs| {
            certs.0.iter().find_map(|choice| match choice {
                CertificateChoices::Certificate(cert)
                    if cert.tbs_certificate.issuer == sid.issuer
                        && cert.tbs_certificate.serial_number == sid.serial_number =>
                {
                    Some(cert.clone())
                }
                _ => None,
            })
        })
        .ok_or(CmcError::Malformed("signer certificate not in certs bag"))?;
    let signer_cert_der = signer_cert
        .to_der()
        .map_err(|_| CmcError::Malformed("bad signer certificate"))?;

    Ok(ParsedRequest {
        pki_data,
        econtent,
        signer_cert,
        signer_cert_der,
        signed_attrs_der,
        signature: signer_info.signature.as_bytes().to_vec(),
        content_type_attr,
        message_digest_attr,
    })
}

/// Authenticate the outer envelope against the trust allow-list.
pub fn verify_outer(parsed: &ParsedRequest, trust: &TrustStore) -> Result<(), CmcError> {
    if parsed.content_type_attr != oids::CCT_PKI_DATA {
        return Err(CmcError::Unauthenticated("content-type attribute mismatch"));
    }

    let digest = Sha256::digest(&parsed.econtent);
    if digest.as_slice() != parsed.message_digest_attr {
        return Err(CmcError::Unauthenticated("message digest mismatch"));
    }

    if !trust.is_trusted(&parsed.signer_cert_der) {
        return Err(CmcError::Unauthenticated("signer certificate not trusted"));
    }

    let (_, cert) = X509Certificate::from_der(&parsed.signer_cert_der)
        .map_err(|_| CmcError::Malformed("bad signer certificate"))?;
    if !cert.validity().is_valid() {
        return Err(CmcError::Unauthenticated(
            "signer certificate outside validity window",
        ));
    }

    verify_p256(
        spki_key_bytes(&parsed.signer_cert)?,
        &parsed.signed_attrs_der,
        &parsed.signature,
    )
    .map_err(|_| CmcError::Unauthenticated("outer signature does not verify"))
}

/// Check that a certification request proves possession of its subject key.
pub fn verify_pop(request: &TaggedRequest) -> Result<(), CmcError> {
    match request {
        TaggedRequest::Tcr(tcr) => {
            let req = &tcr.certification_request;
            let info_der = req
                .info
                .to_der()
                .map_err(|_| CmcError::Malformed("bad certification request"))?;
            let key = req
                .info
                .public_key
                .subject_public_key
                .as_bytes()
                .ok_or(CmcError::Malformed("bad subject public key"))?;
            let sig = req
                .signature
                .as_bytes()
                .ok_or(CmcError::Malformed("bad request signature"))?;
            verify_p256(key, &info_der, sig)
                .map_err(|_| CmcError::ProofOfPossession("pkcs#10 self-signature does not verify"))
        }
        TaggedRequest::Crm(msg) => verify_crmf_pop(msg),
    }
}

fn verify_crmf_pop(msg: &CertReqMsg) -> Result<(), CmcError> {
    use crmf::pop::ProofOfPossession;

    let popo = msg
        .popo
        .as_ref()
        .ok_or(CmcError::ProofOfPossession("missing proof of possession"))?;
    let ProofOfPossession::Signature(psk) = popo else {
        return Err(CmcError::ProofOfPossession(
            "unsupported proof of possession method",
        ));
    };
    if psk.poposk_input.is_some() {
        return Err(CmcError::ProofOfPossession(
            "poposk input not supported",
        ));
    }

    let spki = msg
        .cert_req
        .cert_template
        .subject_public_key_info
        .as_ref()
        .ok_or(CmcError::Malformed("crmf template without public key"))?;
    let key = spki
        .subject_public_key
        .as_bytes()
        .ok_or(CmcError::Malformed("bad subject public key"))?;

    let req_der = msg
        .cert_req
        .to_der()
        .map_err(|_| CmcError::Malformed("bad crmf request"))?;
    let sig = psk
        .signature
        .as_bytes()
        .ok_or(CmcError::Malformed("bad crmf signature"))?;

    verify_p256(key, &req_der, sig)
        .map_err(|_| CmcError::ProofOfPossession("crmf signature does not verify"))
}

/// Subject name and SPKI DER being certified by a request.
pub fn request_subject_spki(request: &TaggedRequest) -> Result<(Name, Vec<u8>), CmcError> {
    match request {
        TaggedRequest::Tcr(tcr) => {
            let info = &tcr.certification_request.info;
            let spki = info
                .public_key
                .to_der()
                .map_err(|_| CmcError::Malformed("bad subject public key"))?;
            Ok((info.subject.clone(), spki))
        }
        TaggedRequest::Crm(msg) => {
            let template = &msg.cert_req.cert_template;
            let subject = template
                .subject
                .clone()
                .ok_or(CmcError::Malformed("crmf template without subject"))?;
            let spki = template
                .subject_public_key_info
                .as_ref()
                .ok_or(CmcError::Malformed("crmf template without public key"))?
                .to_der()
                .map_err(|_| CmcError::Malformed("bad subject public key"))?;
            Ok((subject, spki))
        }
    }
}

pub(crate) fn spki_key_bytes(cert: &Certificate) -> Result<&[u8], CmcError> {
    cert.tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .as_bytes()
        .ok_or(CmcError::Malformed("bad subject public key"))
}

fn verify_p256(key_bytes: &[u8], data: &[u8], sig_der: &[u8]) -> Result<(), p256::ecdsa::Error> {
    let key = VerifyingKey::from_sec1_bytes(key_bytes)?;
    let sig = Signature::from_der(sig_der)?;
    key.verify(data, &sig)
}
