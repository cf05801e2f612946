//! Shared types for the sigil CA service.
//!
//! Contains the API view/param types exchanged with clients and the pure
//! X.509 helpers (fingerprints, validity windows, serial numbers) that both
//! the record store and the API service build on.

pub mod params;
pub mod views;
pub mod x509;
