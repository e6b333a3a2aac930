//! Trust core for SII-style electronic tax documents: taxpayer
//! certificates, exclusive XML canonicalization with the legacy
//! ISO-8859-1 wire encoding, enveloped XMLDSIG generation/validation,
//! and folio authorization tokens (CAF).
//!
//! # Examples
//! ```rust
//! use dte_core::caf::{CafFaker, CafValidator, DirectoryCertStore};
//! use dte_core::config::Config;
//!
//! let caf = CafFaker::new("76192083-9", "ACME LTDA")
//!     .document_type(33)
//!     .folio_range(1, 100)
//!     .build()?;
//!
//! let store = DirectoryCertStore::new(Config::default().authority_store_dir());
//! CafValidator::new(store).validate(&caf)?;
//! assert!(caf.in_range(42));
//! # Ok::<(), dte_core::Error>(())
//! ```
pub mod caf;
pub mod certificate;
pub mod config;
pub mod signature;
pub mod xml;

use thiserror::Error;

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Certificate(#[from] certificate::CertificateError),
    #[error(transparent)]
    Xml(#[from] xml::XmlError),
    #[error(transparent)]
    Signature(#[from] signature::SignatureError),
    #[error(transparent)]
    Caf(#[from] caf::CafError),
    #[error(transparent)]
    Environment(#[from] config::EnvironmentParseError),
}
