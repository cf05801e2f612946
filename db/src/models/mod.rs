//! Row models for the record store.
//!
//! Each entity has a stored form (`Db*`, with the store-assigned `serial` and
//! `created` timestamp) and a validated input form (`New*`). Input forms are
//! only constructible from well-formed PEM, and derive their fingerprint and
//! validity metadata from the blob so callers cannot forge them.

mod ca;
mod certificate;
mod crl;
mod csr;
mod public_key;

pub use ca::{DbCa, NewCa};
pub use certificate::{DbCertificate, NewCertificate};
pub use crl::{DbCrl, NewCrl};
pub use csr::{DbCsr, NewCsr};
pub use public_key::{DbPublicKey, NewPublicKey};
