//! CMC message structures (RFC 5272), as much of the schema as the
//! handler needs: `PKIData` requests in, `PKIResponse` answers out.

use cms::content_info::ContentInfo;
use crmf::request::CertReqMsg;
use der::asn1::{Any, GeneralizedTime, OctetString, SetOfVec};
use der::{Choice, Sequence};
use x509_cert::ext::pkix::CrlReason;
use x509_cert::name::Name;
use x509_cert::request::CertReq;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::ObjectIdentifier;

/// CMCStatus success.
pub const STATUS_SUCCESS: u32 = 0;
/// CMCStatus failed.
pub const STATUS_FAILED: u32 = 2;

/// CMCFailInfo badRequest.
pub const FAIL_BAD_REQUEST: u32 = 2;
/// CMCFailInfo internalCAError.
pub const FAIL_INTERNAL_CA_ERROR: u32 = 11;

/// ```text
/// PKIData ::= SEQUENCE {
///     controlSequence   SEQUENCE SIZE(0..MAX) OF TaggedAttribute,
///     reqSequence       SEQUENCE SIZE(0..MAX) OF TaggedRequest,
///     cmsSequence       SEQUENCE SIZE(0..MAX) OF TaggedContentInfo,
///     otherMsgSequence  SEQUENCE SIZE(0..MAX) OF OtherMsg }
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct PkiData {
    pub control_sequence: Vec<TaggedAttribute>,
    pub req_sequence: Vec<TaggedRequest>,
    pub cms_sequence: Vec<TaggedContentInfo>,
    pub other_msg_sequence: Vec<OtherMsg>,
}

/// ```text
/// PKIResponse ::= SEQUENCE {
///     controlSequence   SEQUENCE SIZE(0..MAX) OF TaggedAttribute,
///     cmsSequence       SEQUENCE SIZE(0..MAX) OF TaggedContentInfo,
///     otherMsgSequence  SEQUENCE SIZE(0..MAX) OF OtherMsg }
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct PkiResponse {
    pub control_sequence: Vec<TaggedAttribute>,
    pub cms_sequence: Vec<TaggedContentInfo>,
    pub other_msg_sequence: Vec<OtherMsg>,
}

/// A CMC control and its values, tagged with a body part id.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TaggedAttribute {
    pub body_part_id: u32,
    pub attr_type: ObjectIdentifier,
    pub attr_values: SetOfVec<Any>,
}

/// The two request encodings the service accepts: PKCS#10 and CRMF.
#[derive(Clone, Debug, Eq, PartialEq, Choice)]
pub enum TaggedRequest {
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", constructed = "true")]
    Tcr(TaggedCertificationRequest),

    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", constructed = "true")]
    Crm(CertReqMsg),
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TaggedCertificationRequest {
    pub body_part_id: u32,
    pub certification_request: CertReq,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TaggedContentInfo {
    pub body_part_id: u32,
    pub content_info: ContentInfo,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct OtherMsg {
    pub body_part_id: u32,
    pub other_msg_type: ObjectIdentifier,
    pub other_msg_value: Any,
}

/// ```text
/// CMCStatusInfo ::= SEQUENCE {
///     cMCStatus     CMCStatus,
///     bodyList      SEQUENCE SIZE(1..MAX) OF BodyPartID,
///     statusString  UTF8String OPTIONAL,
///     otherInfo     CHOICE { failInfo CMCFailInfo, pendInfo PendInfo } OPTIONAL }
/// ```
///
/// Only the `failInfo` arm of `otherInfo` is modelled; the service never
/// issues or accepts pending responses.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct CmcStatusInfo {
    pub status: u32,
    pub body_list: Vec<u32>,

    #[asn1(optional = "true")]
    pub status_string: Option<String>,

    #[asn1(optional = "true")]
    pub other_info: Option<StatusOtherInfo>,
}

#[derive(Clone, Debug, Eq, PartialEq, Choice)]
pub enum StatusOtherInfo {
    FailInfo(u32),
}

impl CmcStatusInfo {
    pub fn success(body_list: Vec<u32>) -> Self {
        Self {
            status: STATUS_SUCCESS,
            body_list,
            status_string: None,
            other_info: None,
        }
    }

    pub fn failed(body_list: Vec<u32>, fail_info: u32, message: &str) -> Self {
        Self {
            status: STATUS_FAILED,
            body_list,
            status_string: Some(message.to_string()),
            other_info: Some(StatusOtherInfo::FailInfo(fail_info)),
        }
    }
}

/// ```text
/// RevokeRequest ::= SEQUENCE {
///     issuerName      Name,
///     serialNumber    INTEGER,
///     reason          CRLReason,
///     invalidityDate  GeneralizedTime OPTIONAL,
///     passphrase      OCTET STRING OPTIONAL,
///     comment         UTF8String OPTIONAL }
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct RevokeRequest {
    pub issuer_name: Name,
    pub serial_number: SerialNumber,
    pub reason: CrlReason,

    #[asn1(optional = "true")]
    pub invalidity_date: Option<GeneralizedTime>,

    #[asn1(optional = "true")]
    pub passphrase: Option<OctetString>,

    #[asn1(optional = "true")]
    pub comment: Option<String>,
}
