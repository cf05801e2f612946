//! Sigil CA API service.
//!
//! A small issuance and revocation core fronted by a CMC (RFC 5272)
//! endpoint. Certificates, CRLs, keys, and requests live in the typed
//! record store from `sigil-db`; all private-key operations go through
//! the [`signer::Signer`] trait so a PKCS#11-backed deployment can swap
//! in its own backend.
//!
//! # Configuration
//!
//! The service needs the issuing CA's certificate and key plus the CMC
//! client trust bundle. See [`config::SigilApiConfig`] for all options.

pub mod cmc;
pub mod config;
pub mod revocation;
pub mod server;
pub mod signer;
pub mod trust;

pub(crate) mod context;
pub(crate) mod error;
pub(crate) mod handlers;
pub(crate) mod oids;
