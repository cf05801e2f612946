//! The CMC protocol handler (RFC 5272 profile).
//!
//! One request maps to one response. Issuance requests carry PKCS#10 or
//! CRMF bodies in the reqSequence; revocation requests carry a
//! RevokeRequest control. Parse, authentication, and proof-of-possession
//! failures reject the request outright; failures during dispatch still
//! produce a signed response with a failed status so the client gets a
//! protocol-level answer.

use std::sync::Arc;
use std::time::Duration;

use der::{Decode, Encode};
use sigil_common::x509::{self, InvalidEncoding};
use sigil_db::models::{DbPublicKey, NewCertificate, NewCsr, NewPublicKey};
use sigil_db::storage::{
    CertificateFilter, CertificateStore, CsrFilter, CsrStore, PublicKeyFilter, PublicKeyStore,
    Storage, StoreError,
};
use thiserror::Error;
use tracing::{info, warn};
use x509_cert::Certificate;

use crate::oids;
use crate::revocation::{self, RevokeError};
use crate::signer::{with_timeout, CertTemplate, Signer, SignerError};
use crate::trust::TrustStore;

pub mod asn1;
pub mod respond;
pub mod verify;

use asn1::{
    CmcStatusInfo, RevokeRequest, TaggedRequest, FAIL_BAD_REQUEST, FAIL_INTERNAL_CA_ERROR,
};
use verify::ParsedRequest;

#[derive(Debug, Error)]
pub enum CmcError {
    /// The request did not decode as a CMS-wrapped PKIData document.
    #[error("malformed cmc request: {0}")]
    Malformed(&'static str),

    /// The outer envelope failed authentication.
    #[error("cmc request not authenticated: {0}")]
    Unauthenticated(&'static str),

    /// A certification request did not prove possession of its key.
    #[error("proof of possession failed: {0}")]
    ProofOfPossession(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Revoke(#[from] RevokeError),

    #[error(transparent)]
    Encoding(#[from] InvalidEncoding),

    #[error("cmc encoding failed: {0}")]
    Encode(#[from] der::Error),
}

pub struct CmcHandler {
    storage: Arc<dyn Storage>,
    signer: Arc<dyn Signer>,
    trust: TrustStore,

    /// The issuing CA's certificate; issuer name and response signer
    /// identity come from here.
    ca_cert: Certificate,
    ca_serial: i64,
    ca_key_label: String,

    signer_timeout: Duration,
    cert_validity_days: u64,
}

impl CmcHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<dyn Storage>,
        signer: Arc<dyn Signer>,
        trust: TrustStore,
        ca_cert: Certificate,
        ca_serial: i64,
        ca_key_label: String,
        signer_timeout: Duration,
        cert_validity_days: u64,
    ) -> Self {
        Self {
            storage,
            signer,
            trust,
            ca_cert,
            ca_serial,
            ca_key_label,
            signer_timeout,
            cert_validity_days,
        }
    }

    /// Process one CMC request and produce the signed response bytes.
    ///
    /// Errors from this function map to transport-level rejections;
    /// dispatch failures are reported inside the signed response instead.
    #[tracing::instrument(skip_all, fields(len = raw.len()))]
    pub async fn handle(&self, raw: &[u8]) -> Result<Vec<u8>, CmcError> {
        let parsed = verify::parse(raw)?;
        verify::verify_outer(&parsed, &self.trust)?;
        for request in &parsed.pki_data.req_sequence {
            verify::verify_pop(request)?;
        }

        let (status, issued) = match self.dispatch(&parsed).await {
            Ok((body_ids, issued)) => (CmcStatusInfo::success(body_ids), issued),
            Err(err) => {
                warn!("cmc dispatch failed: {err}");
                (
                    CmcStatusInfo::failed(
                        request_body_ids(&parsed),
                        fail_info(&err),
                        client_message(&err),
                    ),
                    vec![],
                )
            }
        };

        let payload = respond::pki_response_der(status)?;
        respond::sign_envelope(
            &*self.signer,
            self.signer_timeout,
            &self.ca_key_label,
            &self.ca_cert,
            oids::CCT_PKI_RESPONSE,
            &payload,
            &issued,
        )
        .await
    }

    async fn dispatch(
        &self,
        parsed: &ParsedRequest,
    ) -> Result<(Vec<u32>, Vec<Certificate>), CmcError> {
        // The authenticated outer signer is the actor every saved row is
        // attributed to.
        let requester = self.ensure_requester(parsed).await?;

        let revocations: Vec<(u32, RevokeRequest)> = parsed
            .pki_data
            .control_sequence
            .iter()
            .filter(|ctrl| ctrl.attr_type == oids::CMC_REVOKE_REQUEST)
            .map(|ctrl| {
                let revoke = ctrl
                    .attr_values
                    .iter()
                    .next()
                    .ok_or(CmcError::Malformed("empty revoke control"))?
                    .decode_as::<RevokeRequest>()
                    .map_err(|_| CmcError::Malformed("bad revoke control"))?;
                Ok((ctrl.body_part_id, revoke))
            })
            .collect::<Result<_, CmcError>>()?;

        if !revocations.is_empty() {
            let mut body_ids = Vec::new();
            for (body_id, revoke) in &revocations {
                self.revoke_one(revoke, &requester).await?;
                body_ids.push(*body_id);
            }
            return Ok((body_ids, vec![]));
        }

        if parsed.pki_data.req_sequence.is_empty() {
            return Err(CmcError::Malformed("request carries nothing to do"));
        }

        let mut body_ids = Vec::new();
        let mut issued = Vec::new();
        for request in &parsed.pki_data.req_sequence {
            let (body_id, cert) = self.issue_one(request, &requester).await?;
            body_ids.push(body_id);
            issued.push(cert);
        }
        Ok((body_ids, issued))
    }

    /// Save (or find) the public key row of the authenticated outer signer.
    async fn ensure_requester(&self, parsed: &ParsedRequest) -> Result<DbPublicKey, CmcError> {
        let spki_der = parsed
            .signer_cert
            .tbs_certificate
            .subject_public_key_info
            .to_der()?;
        let pem = spki_to_pem(&spki_der)?;
        self.ensure_public_key(pem, true).await
    }

    async fn ensure_public_key(&self, pem: String, admin: bool) -> Result<DbPublicKey, CmcError> {
        let new = NewPublicKey::from_pem(&pem, admin)?;
        match PublicKeyStore::create(&*self.storage, new).await {
            Ok(row) => Ok(row),
            Err(StoreError::DuplicateValue { .. }) => {
                let rows = PublicKeyStore::list(
                    &*self.storage,
                    PublicKeyFilter {
                        pem: Some(pem),
                        ..Default::default()
                    },
                )
                .await?;
                rows.into_iter()
                    .next()
                    .ok_or(CmcError::Malformed("public key row vanished"))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn issue_one(
        &self,
        request: &TaggedRequest,
        requester: &DbPublicKey,
    ) -> Result<(u32, Certificate), CmcError> {
        let (subject, spki_der) = verify::request_subject_spki(request)?;

        let subject_key = self
            .ensure_public_key(spki_to_pem(&spki_der)?, false)
            .await?;
        let csr = self.ensure_csr(request, subject_key.serial).await?;

        let template = CertTemplate {
            subject,
            issuer: self.ca_cert.tbs_certificate.subject.clone(),
            spki_der,
            validity_days: self.cert_validity_days,
        };
        let cert_pem = with_timeout(
            self.signer_timeout,
            self.signer.sign_certificate(&self.ca_key_label, &template),
        )
        .await?;

        let row = CertificateStore::create(
            &*self.storage,
            NewCertificate::from_pem(
                &cert_pem,
                subject_key.serial,
                csr,
                self.ca_serial,
                requester.serial,
            )?,
        )
        .await?;
        info!(
            certificate = row.serial,
            requester = requester.serial,
            "certificate issued over cmc"
        );

        let der = x509::decode_pem(&cert_pem, "CERTIFICATE")?;
        let cert = Certificate::from_der(&der)?;
        Ok((body_id(request), cert))
    }

    /// Archive the request body (or find the row from an identical
    /// earlier request).
    async fn ensure_csr(&self, request: &TaggedRequest, public_key: i64) -> Result<i64, CmcError> {
        let der = match request {
            TaggedRequest::Tcr(tcr) => tcr.certification_request.to_der()?,
            TaggedRequest::Crm(msg) => msg.to_der()?,
        };
        let pem = pem_rfc7468::encode_string("CERTIFICATE REQUEST", pem_rfc7468::LineEnding::LF, &der)
            .map_err(|_| CmcError::Malformed("request body too large"))?;

        match CsrStore::create(&*self.storage, NewCsr::from_pem(&pem, public_key)?).await {
            Ok(row) => Ok(row.serial),
            Err(StoreError::DuplicateValue { .. }) => {
                let rows = CsrStore::list(
                    &*self.storage,
                    CsrFilter {
                        pem: Some(pem),
                        ..Default::default()
                    },
                )
                .await?;
                rows.into_iter()
                    .next()
                    .map(|row| row.serial)
                    .ok_or(CmcError::Malformed("csr row vanished"))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn revoke_one(
        &self,
        revoke: &RevokeRequest,
        requester: &DbPublicKey,
    ) -> Result<(), CmcError> {
        if revoke.issuer_name != self.ca_cert.tbs_certificate.subject {
            return Err(RevokeError::NotIssued.into());
        }

        let issued = CertificateStore::list(
            &*self.storage,
            CertificateFilter {
                issuer: Some(self.ca_serial),
                ..Default::default()
            },
        )
        .await?;

        let target_serial = revoke.serial_number.as_bytes();
        let matches: Vec<_> = issued
            .into_iter()
            .filter(|row| {
                x509::cert_serial(&row.pem)
                    .map(|s| s == target_serial)
                    .unwrap_or(false)
            })
            .collect();
        if matches.is_empty() {
            return Err(RevokeError::NotIssued.into());
        }

        for row in &matches {
            revocation::revoke_certificate(
                &*self.storage,
                &*self.signer,
                self.signer_timeout,
                row,
                requester.serial,
            )
            .await?;
        }
        Ok(())
    }
}

fn spki_to_pem(der: &[u8]) -> Result<String, CmcError> {
    pem_rfc7468::encode_string("PUBLIC KEY", pem_rfc7468::LineEnding::LF, der)
        .map_err(|_| CmcError::Malformed("bad subject public key"))
}

/// Body part ids named by the request, echoed back in a failed status.
fn request_body_ids(parsed: &ParsedRequest) -> Vec<u32> {
    let mut ids: Vec<u32> = parsed
        .pki_data
        .control_sequence
        .iter()
        .filter(|ctrl| ctrl.attr_type == oids::CMC_REVOKE_REQUEST)
        .map(|ctrl| ctrl.body_part_id)
        .chain(parsed.pki_data.req_sequence.iter().map(body_id))
        .collect();
    if ids.is_empty() {
        // bodyList must not be empty; a request naming no parts gets
        // a placeholder.
        ids.push(1);
    }
    ids
}

fn body_id(request: &TaggedRequest) -> u32 {
    match request {
        TaggedRequest::Tcr(tcr) => tcr.body_part_id,
        // CRMF carries its own request id; clamp it into body part range.
        TaggedRequest::Crm(msg) => {
            let bytes = msg.cert_req.cert_req_id.as_bytes();
            bytes
                .iter()
                .fold(0u32, |acc, b| acc.wrapping_shl(8) | u32::from(*b))
        }
    }
}

/// CMCFailInfo for a dispatch failure.
fn fail_info(err: &CmcError) -> u32 {
    match err {
        CmcError::Signer(_) | CmcError::Revoke(RevokeError::Signer(_)) => FAIL_INTERNAL_CA_ERROR,
        CmcError::Store(StoreError::Internal(_))
        | CmcError::Revoke(RevokeError::Store(StoreError::Internal(_))) => FAIL_INTERNAL_CA_ERROR,
        _ => FAIL_BAD_REQUEST,
    }
}

/// Status string safe to echo back to the client.
fn client_message(err: &CmcError) -> &'static str {
    match err {
        CmcError::Revoke(RevokeError::NotIssued) => "certificate not issued by this authority",
        CmcError::Malformed(_) => "request could not be processed",
        CmcError::Signer(_) | CmcError::Revoke(RevokeError::Signer(_)) => "signing backend failure",
        _ => "request could not be completed",
    }
}
