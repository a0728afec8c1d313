//! WIS2 Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the WIS2 ingest workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the common error type and result alias
//! - **Checksums**: digest computation and verification for downloaded files
//! - **Types**: the file-availability notification and its integrity descriptor
//! - **Logging**: tracing subscriber initialisation
//!
//! # Example
//!
//! ```no_run
//! use wis2_common::checksum::verify_file_checksum;
//! use wis2_common::types::IntegrityMethod;
//!
//! fn check(path: &str, expected: &[u8]) -> wis2_common::Result<()> {
//!     verify_file_checksum(path, IntegrityMethod::Sha512, expected)
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, Wis2Error};
