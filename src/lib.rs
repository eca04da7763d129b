//! Ad-Spend Reconciliation Backend Library
//!
//! Exposes the reconciliation engine for use by binaries and tests.

pub mod recon;
