use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

use crate::models::{
    DbCa, DbCertificate, DbCrl, DbCsr, DbPublicKey, NewCa, NewCertificate, NewCrl, NewCsr,
    NewPublicKey,
};

pub mod memory;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A field declared unique already holds this value in the same table.
    #[error("duplicate value for unique field {table}.{field}")]
    DuplicateValue {
        table: &'static str,
        field: &'static str,
    },

    /// A reference field does not resolve to an existing row of its target
    /// table.
    #[error("reference {table}.{field} does not resolve to a {target} row")]
    DanglingReference {
        table: &'static str,
        field: &'static str,
        target: &'static str,
    },

    /// No CA row with the given serial exists.
    #[error("unknown issuer: no ca row with serial {0}")]
    UnknownIssuer(i64),

    #[error(transparent)]
    Internal(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    fn duplicate(table: &'static str, field: &'static str) -> Self {
        Self::DuplicateValue { table, field }
    }

    fn dangling(table: &'static str, field: &'static str, target: &'static str) -> Self {
        Self::DanglingReference {
            table,
            field,
            target,
        }
    }
}

/// Operational data the Signer needs to extend a CA's CRL.
#[derive(Debug, Clone)]
pub struct RevokeContext {
    /// The CA's key handle inside the Signer backend.
    pub key_label: String,

    /// The CA certificate PEM; the issuer name is derived from it.
    pub ca_pem: String,

    /// The issuer's current CRL PEM, or `None` if no CRL has ever been
    /// issued for this CA.
    pub crl_pem: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct PublicKeyFilter {
    pub serial: Option<i64>,
    pub pem: Option<String>,
    pub fingerprint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct CsrFilter {
    pub serial: Option<i64>,
    pub pem: Option<String>,
    pub public_key: Option<i64>,
}

#[derive(Debug, Default, Clone)]
pub struct CaFilter {
    pub serial: Option<i64>,
    pub pem: Option<String>,
    pub key_label: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct CertificateFilter {
    pub serial: Option<i64>,
    pub pem: Option<String>,
    pub fingerprint: Option<String>,
    pub issuer: Option<i64>,
}

#[derive(Debug, Default, Clone)]
pub struct CrlFilter {
    pub serial: Option<i64>,
    pub issuer: Option<i64>,
}

#[async_trait]
pub trait PublicKeyStore {
    async fn create(&self, new: NewPublicKey) -> Result<DbPublicKey, StoreError>;
    async fn list(&self, filter: PublicKeyFilter) -> Result<Vec<DbPublicKey>, StoreError>;
}

#[async_trait]
pub trait CsrStore {
    async fn create(&self, new: NewCsr) -> Result<DbCsr, StoreError>;
    async fn list(&self, filter: CsrFilter) -> Result<Vec<DbCsr>, StoreError>;
}

#[async_trait]
pub trait CaStore {
    async fn create(&self, new: NewCa) -> Result<DbCa, StoreError>;
    async fn list(&self, filter: CaFilter) -> Result<Vec<DbCa>, StoreError>;
}

#[async_trait]
pub trait CertificateStore {
    async fn create(&self, new: NewCertificate) -> Result<DbCertificate, StoreError>;
    async fn list(&self, filter: CertificateFilter) -> Result<Vec<DbCertificate>, StoreError>;
}

#[async_trait]
pub trait CrlStore {
    async fn create(&self, new: NewCrl) -> Result<DbCrl, StoreError>;
    async fn list(&self, filter: CrlFilter) -> Result<Vec<DbCrl>, StoreError>;
}

/// The record store contract.
///
/// Constraint checks happen atomically with each insert: of two concurrent
/// saves racing on the same unique value, exactly one succeeds and the other
/// observes `DuplicateValue`. Saved rows are immediately visible to
/// subsequent reads.
#[async_trait]
pub trait Storage:
    PublicKeyStore + CsrStore + CaStore + CertificateStore + CrlStore + Send + Sync + 'static
{
    /// Resolve a CA serial to the data the Signer needs to extend its CRL.
    async fn revoke_context(&self, ca_serial: i64) -> Result<RevokeContext, StoreError>;

    /// Per-issuer mutual exclusion for the CRL read-extend-write cycle.
    ///
    /// Two concurrent revocations against the same CA serialize on this
    /// guard so neither can extend a stale current CRL.
    async fn crl_lock(&self, ca_serial: i64) -> OwnedMutexGuard<()>;
}
