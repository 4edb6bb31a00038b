//! envault - export/import tooling for envizon deployments
//!
//! Bundles the relational database dump and the blob storage tree into a
//! single portable zip archive, and restores such an archive into a fresh
//! deployment.

pub mod cli;
pub mod core;
pub mod error;
pub mod utils;
