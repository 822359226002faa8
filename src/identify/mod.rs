//! Identification requests, results, and the matching engine.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod container;
pub mod engine;
pub mod source;
pub mod strategy;

pub use container::{ContainerIdentifier, ContainerTrigger};
pub use engine::{FormatIdentifier, IdentifyError};
pub use source::{ByteSource, FileSource, SliceSource, SourceError};
pub use strategy::MatchStrategy;

/// How an identification was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentificationMethod {
    BinarySignature,
    ContainerSignature,
    Extension,
}

impl std::fmt::Display for IdentificationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            IdentificationMethod::BinarySignature => "signature",
            IdentificationMethod::ContainerSignature => "container",
            IdentificationMethod::Extension => "extension",
        };
        f.write_str(label)
    }
}

/// One format identification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentificationResult {
    pub puid: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub method: IdentificationMethod,
}

/// What we know about a request before looking at its bytes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// File name without any directory part.
    pub file_name: String,
    /// Extension without the dot, empty when the name has none.
    pub extension: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl RequestMetadata {
    /// Builds metadata from a path, reading the modification time if the
    /// file is stat-able.
    pub fn for_path(path: &Path) -> Self {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
            .unwrap_or_default();
        let last_modified = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        Self {
            file_name,
            extension,
            last_modified,
        }
    }
}

/// One resource to identify: its metadata plus a byte source.
pub struct IdentificationRequest {
    pub metadata: RequestMetadata,
    pub source: Box<dyn ByteSource>,
}

impl IdentificationRequest {
    pub fn new(metadata: RequestMetadata, source: Box<dyn ByteSource>) -> Self {
        Self { metadata, source }
    }

    /// Opens a file as a request, deriving metadata from its path.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let metadata = RequestMetadata::for_path(path);
        let source = FileSource::open(path)?;
        Ok(Self::new(metadata, Box::new(source)))
    }

    pub fn size(&self) -> u64 {
        self.source.size()
    }

    pub fn extension(&self) -> &str {
        &self.metadata.extension
    }
}

/// The ordered results of one identification call.
///
/// Deduplication is not automatic; the engine's priority filter is what
/// keeps superseded formats out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentificationResultCollection {
    pub results: Vec<IdentificationResult>,
    pub file_size: u64,
    pub metadata: RequestMetadata,
    pub extension_mismatch: bool,
}

impl IdentificationResultCollection {
    pub fn for_request(request: &IdentificationRequest) -> Self {
        Self {
            results: Vec::new(),
            file_size: request.size(),
            metadata: request.metadata.clone(),
            extension_mismatch: false,
        }
    }

    pub fn add_result(&mut self, result: IdentificationResult) {
        self.results.push(result);
    }

    pub fn remove_result(&mut self, result: &IdentificationResult) {
        self.results.retain(|r| r != result);
    }

    pub fn set_extension_mismatch(&mut self, mismatch: bool) {
        self.extension_mismatch = mismatch;
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Copies request bookkeeping from another collection, used when a
    /// container identifier produced the results.
    pub fn adopt_metadata(&mut self, other: &IdentificationResultCollection) {
        self.file_size = other.file_size;
        self.metadata = other.metadata.clone();
    }
}
