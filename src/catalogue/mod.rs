//! Format catalogue - signature definitions compiled once at startup.
//!
//! The catalogue is loaded from a JSON signature file listing file formats
//! (PUID, extensions, priority relationships) and internal signatures (one
//! or more anchored byte-pattern expressions each). Loading compiles every
//! expression; the resulting [`FormatCatalogue`] is immutable and shared
//! read-only across all identification work.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::syntax::{
    compile_expression, Anchor, CompileError, CompileMode, CompiledSignature,
};

/// A byte-pattern expression with its anchor, as written in the
/// signature file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ByteSequenceDef {
    /// The pattern expression, e.g. `"504B0304"` or `"41 {2-4} * 'END'"`.
    pub expression: String,
    /// Where offsets are measured from: bof, variable, or eof.
    #[serde(default)]
    pub anchor: Anchor,
}

/// One internal signature: every byte sequence it lists must match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalSignatureDef {
    pub id: u32,
    #[serde(default)]
    pub sequences: Vec<ByteSequenceDef>,
}

/// A file format entry from the signature file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatDef {
    /// PRONOM unique identifier, e.g. "fmt/189".
    pub puid: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Extensions this format is known by, without the dot.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Extensions that are an outright mismatch for this format.
    #[serde(default)]
    pub extension_mismatches: Vec<String>,
    /// Internal signature ids that identify this format.
    #[serde(default)]
    pub signature_ids: Vec<u32>,
    /// PUIDs of formats this one supersedes when both match.
    #[serde(default)]
    pub priority_over: Vec<String>,
}

/// Top-level signature file layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureFileDef {
    #[serde(default)]
    pub formats: Vec<FormatDef>,
    #[serde(default)]
    pub signatures: Vec<InternalSignatureDef>,
}

/// A catalogue load failure.
#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("failed to read signature file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed signature file {path}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("signature {signature_id} failed to compile: {source}")]
    Compile {
        signature_id: u32,
        #[source]
        source: CompileError,
    },

    #[error("format {puid} references unknown signature id {signature_id}")]
    UnknownSignature { puid: String, signature_id: u32 },
}

/// A file format with its compiled metadata, owned by the catalogue.
#[derive(Debug, Clone)]
pub struct FileFormat {
    pub puid: String,
    pub name: String,
    pub version: Option<String>,
    pub mime_type: Option<String>,
    /// Lowercased at load so extension lookups are case-insensitive.
    pub extensions: Vec<String>,
    pub extension_mismatches: Vec<String>,
    pub signature_ids: Vec<u32>,
    pub priority_over: Vec<String>,
}

impl FileFormat {
    /// True if this format supersedes the given PUID when both match.
    pub fn has_priority_over(&self, puid: &str) -> bool {
        self.priority_over.iter().any(|p| p == puid)
    }

    /// True if the format is known by the given extension (compared
    /// lowercased).
    pub fn has_extension(&self, extension: &str) -> bool {
        let lowered = extension.to_lowercase();
        self.extensions.iter().any(|e| *e == lowered)
    }

    /// True if the format declares the given extension as a mismatch.
    pub fn is_extension_mismatch(&self, extension: &str) -> bool {
        let lowered = extension.to_lowercase();
        self.extension_mismatches.iter().any(|e| *e == lowered)
    }

    /// True if any binary signature identifies this format.
    pub fn has_signatures(&self) -> bool {
        !self.signature_ids.is_empty()
    }
}

/// An internal signature with all its sequences compiled. The signature
/// matches only when every sequence matches.
#[derive(Debug, Clone)]
pub struct CompiledInternalSignature {
    pub id: u32,
    pub sequences: Vec<CompiledSignature>,
}

/// The loaded, compiled catalogue. Built once, then only read.
#[derive(Debug)]
pub struct FormatCatalogue {
    formats: Vec<FileFormat>,
    signatures: Vec<CompiledInternalSignature>,
    by_puid: HashMap<String, usize>,
    signature_index: HashMap<u32, usize>,
    /// Lowercased extension -> formats known by it.
    extension_index: HashMap<String, Vec<usize>>,
}

impl FormatCatalogue {
    /// Loads and compiles a JSON signature file.
    pub fn load(path: &Path) -> Result<Self, CatalogueError> {
        let text = fs::read_to_string(path).map_err(|source| CatalogueError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let def: SignatureFileDef =
            serde_json::from_str(&text).map_err(|source| CatalogueError::Malformed {
                path: path.display().to_string(),
                source,
            })?;
        let catalogue = Self::from_def(def, CompileMode::Extended)?;
        info!(
            formats = catalogue.formats.len(),
            signatures = catalogue.signatures.len(),
            "signature catalogue loaded"
        );
        Ok(catalogue)
    }

    /// Builds a catalogue from an in-memory definition, compiling every
    /// expression. The first signature that fails to compile aborts the
    /// load, naming the signature.
    pub fn from_def(def: SignatureFileDef, mode: CompileMode) -> Result<Self, CatalogueError> {
        let mut signatures = Vec::with_capacity(def.signatures.len());
        let mut signature_index = HashMap::new();
        for sig_def in def.signatures {
            let mut sequences = Vec::with_capacity(sig_def.sequences.len());
            for sequence in &sig_def.sequences {
                debug!(id = sig_def.id, expression = %sequence.expression, "compiling");
                let compiled = compile_expression(&sequence.expression, sequence.anchor, mode)
                    .map_err(|source| CatalogueError::Compile {
                        signature_id: sig_def.id,
                        source,
                    })?;
                sequences.push(compiled);
            }
            signature_index.insert(sig_def.id, signatures.len());
            signatures.push(CompiledInternalSignature {
                id: sig_def.id,
                sequences,
            });
        }

        let mut formats = Vec::with_capacity(def.formats.len());
        let mut by_puid = HashMap::new();
        let mut extension_index: HashMap<String, Vec<usize>> = HashMap::new();
        for format_def in def.formats {
            for signature_id in &format_def.signature_ids {
                if !signature_index.contains_key(signature_id) {
                    return Err(CatalogueError::UnknownSignature {
                        puid: format_def.puid.clone(),
                        signature_id: *signature_id,
                    });
                }
            }
            let format = FileFormat {
                puid: format_def.puid,
                name: format_def.name,
                version: format_def.version,
                mime_type: format_def.mime_type,
                extensions: format_def
                    .extensions
                    .iter()
                    .map(|e| e.to_lowercase())
                    .collect(),
                extension_mismatches: format_def
                    .extension_mismatches
                    .iter()
                    .map(|e| e.to_lowercase())
                    .collect(),
                signature_ids: format_def.signature_ids,
                priority_over: format_def.priority_over,
            };
            let index = formats.len();
            by_puid.insert(format.puid.clone(), index);
            for extension in &format.extensions {
                extension_index
                    .entry(extension.clone())
                    .or_default()
                    .push(index);
            }
            formats.push(format);
        }

        Ok(Self {
            formats,
            signatures,
            by_puid,
            signature_index,
            extension_index,
        })
    }

    pub fn formats(&self) -> &[FileFormat] {
        &self.formats
    }

    pub fn signatures(&self) -> &[CompiledInternalSignature] {
        &self.signatures
    }

    pub fn format_for_puid(&self, puid: &str) -> Option<&FileFormat> {
        self.by_puid.get(puid).map(|&index| &self.formats[index])
    }

    pub fn signature(&self, id: u32) -> Option<&CompiledInternalSignature> {
        self.signature_index
            .get(&id)
            .map(|&index| &self.signatures[index])
    }

    /// Formats registered for an extension, case-insensitively.
    pub fn formats_for_extension(&self, extension: &str) -> impl Iterator<Item = &FileFormat> {
        let lowered = extension.to_lowercase();
        self.extension_index
            .get(&lowered)
            .map(|indices| indices.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(|&index| &self.formats[index])
    }

    /// Formats whose signature ids all match on the given request data,
    /// paired with the matched format. A format matches if ANY of its
    /// internal signatures matches; a signature matches if ALL of its
    /// sequences match.
    pub fn formats_matching<F>(&self, mut signature_matches: F) -> Vec<&FileFormat>
    where
        F: FnMut(&CompiledInternalSignature) -> bool,
    {
        let mut matched_signatures: HashMap<u32, bool> = HashMap::new();
        let mut hits = Vec::new();
        for format in &self.formats {
            let matched = format.signature_ids.iter().any(|id| {
                *matched_signatures.entry(*id).or_insert_with(|| {
                    self.signature(*id)
                        .map(&mut signature_matches)
                        .unwrap_or(false)
                })
            });
            if matched {
                hits.push(format);
            }
        }
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_def() -> SignatureFileDef {
        serde_json::from_str(
            r#"{
                "formats": [
                    {
                        "puid": "x-fmt/263",
                        "name": "ZIP Format",
                        "extensions": ["zip"],
                        "signature_ids": [1]
                    },
                    {
                        "puid": "fmt/11",
                        "name": "PNG",
                        "version": "1.0",
                        "mime_type": "image/png",
                        "extensions": ["png"],
                        "extension_mismatches": ["jpg", "jpeg"],
                        "signature_ids": [2]
                    },
                    {
                        "puid": "fmt/899",
                        "name": "Extension Only Format",
                        "extensions": ["xyz"]
                    }
                ],
                "signatures": [
                    {"id": 1, "sequences": [{"expression": "504B0304", "anchor": "bof"}]},
                    {"id": 2, "sequences": [{"expression": "89504E470D0A1A0A", "anchor": "bof"}]}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn load_compiles_all_signatures() {
        let catalogue = FormatCatalogue::from_def(sample_def(), CompileMode::Extended).unwrap();
        assert_eq!(catalogue.formats().len(), 3);
        assert_eq!(catalogue.signatures().len(), 2);
        assert!(catalogue.signature(1).is_some());
        assert!(catalogue.signature(99).is_none());
    }

    #[test]
    fn extension_lookup_is_case_insensitive() {
        let catalogue = FormatCatalogue::from_def(sample_def(), CompileMode::Extended).unwrap();
        let hits: Vec<_> = catalogue.formats_for_extension("ZIP").collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].puid, "x-fmt/263");
    }

    #[test]
    fn mismatch_denylist_is_case_insensitive() {
        let catalogue = FormatCatalogue::from_def(sample_def(), CompileMode::Extended).unwrap();
        let png = catalogue.format_for_puid("fmt/11").unwrap();
        assert!(png.is_extension_mismatch("JPG"));
        assert!(png.is_extension_mismatch("jpeg"));
        assert!(!png.is_extension_mismatch("png"));
    }

    #[test]
    fn bad_expression_aborts_load_naming_the_signature() {
        let mut def = sample_def();
        def.signatures.push(InternalSignatureDef {
            id: 3,
            sequences: vec![ByteSequenceDef {
                expression: "ZZ".to_string(),
                anchor: Anchor::BofOffset,
            }],
        });
        let err = FormatCatalogue::from_def(def, CompileMode::Extended).unwrap_err();
        match err {
            CatalogueError::Compile { signature_id, .. } => assert_eq!(signature_id, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn dangling_signature_id_is_rejected() {
        let mut def = sample_def();
        def.formats[0].signature_ids.push(42);
        let err = FormatCatalogue::from_def(def, CompileMode::Extended).unwrap_err();
        assert!(matches!(err, CatalogueError::UnknownSignature { .. }));
    }

    #[test]
    fn formats_matching_requires_any_signature() {
        let catalogue = FormatCatalogue::from_def(sample_def(), CompileMode::Extended).unwrap();
        let hits = catalogue.formats_matching(|signature| signature.id == 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].puid, "x-fmt/263");
    }
}
