//! Record store for the sigil CA service.
//!
//! A typed store over a closed set of entity tables (public keys, CSRs, CAs,
//! certificates, CRLs) that enforces uniqueness and reference constraints
//! itself rather than delegating to a relational engine. Rows are immutable
//! once created; revocation appends CRL rows instead of mutating anything.

pub mod models;
pub mod storage;
