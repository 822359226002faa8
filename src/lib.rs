//! Sigsleuth Library
//!
//! File format identification engine for digital preservation triage:
//! matches file content against a catalogue of byte-pattern signatures,
//! container signatures, and known extensions, and reports ranked,
//! priority-filtered format identifications.
//!
//! # Features
//!
//! - **Signature mini-language**: hex runs, wildcards, gaps, byte sets,
//!   alternatives, and quoted strings, compiled once at startup
//! - **Anchored matching**: BOF, EOF, and variable-offset signatures
//!   scanned over bounded windows of arbitrarily large files
//! - **Container awareness**: trigger-gated container identification for
//!   formats a shell signature cannot tell apart
//! - **Priority resolution**: lower-priority hits removed, extension
//!   mismatches flagged
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use sigsleuth::catalogue::FormatCatalogue;
//! use sigsleuth::identify::{FormatIdentifier, IdentificationRequest};
//!
//! fn main() -> anyhow::Result<()> {
//!     let catalogue = Arc::new(FormatCatalogue::load(Path::new("signatures.json"))?);
//!     let identifier = FormatIdentifier::new(catalogue, 65_536);
//!
//!     let request = IdentificationRequest::open(Path::new("mystery.bin"))?;
//!     let results = identifier.identify(&request, false)?;
//!
//!     for result in &results.results {
//!         println!("{} {}", result.puid, result.name);
//!     }
//!     Ok(())
//! }
//! ```

pub mod catalogue;
pub mod config;
pub mod identify;
pub mod syntax;

// Re-export commonly used types
pub use catalogue::{CatalogueError, FileFormat, FormatCatalogue};
pub use config::Config;
pub use identify::{
    FormatIdentifier, IdentificationMethod, IdentificationRequest, IdentificationResult,
    IdentificationResultCollection, IdentifyError, MatchStrategy, RequestMetadata,
};
pub use syntax::{Anchor, CompileError, CompileMode, CompiledSignature, SyntaxError};
