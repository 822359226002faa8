//! Random-access byte sources for identification requests.
//!
//! Matching only ever needs two bounded windows of a file (one at each
//! end), so the file source memory-maps and hands out slices without
//! copying the whole file.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use thiserror::Error;

/// A byte-source failure, propagated out of the matching call.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open {path}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to map {path}")]
    Map {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Random-access read contract for request bytes.
pub trait ByteSource: Send + Sync {
    /// Total length in bytes.
    fn size(&self) -> u64;

    /// A window of up to `len` bytes starting at `offset`, clamped to
    /// the end of the source. Empty if `offset` is past the end.
    fn window(&self, offset: u64, len: usize) -> &[u8];
}

/// An in-memory byte source, used by tests and for small payloads.
#[derive(Debug, Clone)]
pub struct SliceSource {
    data: Vec<u8>,
}

impl SliceSource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }
}

impl ByteSource for SliceSource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn window(&self, offset: u64, len: usize) -> &[u8] {
        window_of(&self.data, offset, len)
    }
}

/// A memory-mapped file source.
///
/// Empty files cannot be mapped on Linux, so the map is optional and an
/// empty file presents as a zero-length source.
#[derive(Debug)]
pub struct FileSource {
    map: Option<Mmap>,
    size: u64,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|source| SourceError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let size = file
            .metadata()
            .map_err(|source| SourceError::Open {
                path: path.display().to_string(),
                source,
            })?
            .len();
        let map = if size == 0 {
            None
        } else {
            // Safety: the map is read-only and dropped with this source;
            // concurrent truncation of the underlying file is undefined
            // behaviour we accept for scan tooling, as with any mmap reader.
            Some(unsafe {
                Mmap::map(&file).map_err(|source| SourceError::Map {
                    path: path.display().to_string(),
                    source,
                })?
            })
        };
        Ok(Self { map, size })
    }
}

impl ByteSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn window(&self, offset: u64, len: usize) -> &[u8] {
        match &self.map {
            Some(map) => window_of(map, offset, len),
            None => &[],
        }
    }
}

fn window_of(data: &[u8], offset: u64, len: usize) -> &[u8] {
    if offset >= data.len() as u64 {
        return &[];
    }
    let start = offset as usize;
    let end = start.saturating_add(len).min(data.len());
    &data[start..end]
}
