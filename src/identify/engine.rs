//! The identification engine: binary, container, and extension matching
//! with priority and mismatch resolution.
//!
//! One [`FormatIdentifier`] is built per loaded catalogue and shared
//! read-only across every request; nothing here mutates after
//! construction.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::catalogue::{CompiledInternalSignature, FormatCatalogue};
use crate::identify::container::{
    marker_signature, ContainerFileDef, ContainerTrigger, MarkerIdentifier,
};
use crate::identify::{
    IdentificationMethod, IdentificationRequest, IdentificationResult,
    IdentificationResultCollection,
};
use crate::syntax::CompiledSignature;

/// An identification failure. Catalogue inconsistency means a matched
/// result's PUID is missing from the format collection, which cannot
/// happen with a well-formed signature file.
#[derive(Debug, Error)]
pub enum IdentifyError {
    #[error("result PUID {puid} not present in the catalogue")]
    CatalogueInconsistency { puid: String },

    #[error("container trigger references unknown PUID {puid}")]
    UnknownTriggerPuid { puid: String },

    #[error("container signature references unknown PUID {puid}")]
    UnknownContainerPuid { puid: String },
}

/// The matching engine. Holds the compiled catalogue, the registered
/// container triggers, and the scan byte limit.
pub struct FormatIdentifier {
    catalogue: Arc<FormatCatalogue>,
    triggers: Vec<ContainerTrigger>,
    /// Bytes scanned from each end of the file; negative means
    /// unlimited.
    max_bytes_to_scan: i64,
}

impl FormatIdentifier {
    pub fn new(catalogue: Arc<FormatCatalogue>, max_bytes_to_scan: i64) -> Self {
        Self {
            catalogue,
            triggers: Vec::new(),
            max_bytes_to_scan,
        }
    }

    pub fn catalogue(&self) -> &FormatCatalogue {
        &self.catalogue
    }

    /// Registers container triggers from a container signature file.
    /// Trigger order is registration order; the first trigger whose
    /// shell signature hits wins.
    pub fn register_containers(&mut self, def: &ContainerFileDef) -> Result<(), IdentifyError> {
        for trigger in &def.triggers {
            let shell = self.catalogue.format_for_puid(&trigger.puid).ok_or_else(|| {
                IdentifyError::UnknownTriggerPuid {
                    puid: trigger.puid.clone(),
                }
            })?;
            let mut signatures = Vec::new();
            for signature in &def.signatures {
                if signature.container_type != trigger.container_type {
                    continue;
                }
                let format = self.catalogue.format_for_puid(&signature.puid).ok_or_else(
                    || IdentifyError::UnknownContainerPuid {
                        puid: signature.puid.clone(),
                    },
                )?;
                signatures.push(marker_signature(
                    &format.puid,
                    &format.name,
                    format.version.as_deref(),
                    format.mime_type.as_deref(),
                    &signature.markers,
                ));
            }
            debug!(
                puid = %trigger.puid,
                container_type = %trigger.container_type,
                signatures = signatures.len(),
                "container trigger registered"
            );
            self.triggers.push(ContainerTrigger {
                puid: trigger.puid.clone(),
                signature_ids: shell.signature_ids.clone(),
                identifier: Box::new(MarkerIdentifier::new(signatures)),
            });
        }
        Ok(())
    }

    /// The scan window for one compiled sequence, taken from whichever
    /// end of the file its anchor needs.
    fn scan_window<'a>(
        &self,
        request: &'a IdentificationRequest,
        signature: &CompiledSignature,
    ) -> &'a [u8] {
        let size = request.source.size();
        let limit = if self.max_bytes_to_scan < 0 {
            size
        } else {
            size.min(self.max_bytes_to_scan as u64)
        };
        let len = usize::try_from(limit).unwrap_or(usize::MAX);
        match signature.anchor {
            crate::syntax::Anchor::EofOffset => request.source.window(size - limit, len),
            _ => request.source.window(0, len),
        }
    }

    /// True if every sequence of the internal signature matches.
    fn signature_matches(
        &self,
        request: &IdentificationRequest,
        signature: &CompiledInternalSignature,
    ) -> bool {
        !signature.sequences.is_empty()
            && signature.sequences.iter().all(|sequence| {
                let window = self.scan_window(request, sequence);
                sequence.matches_window(window)
            })
    }

    /// Scans every internal signature against the request, one result
    /// per matched format, tagged BINARY_SIGNATURE.
    pub fn match_binary_signatures(
        &self,
        request: &IdentificationRequest,
    ) -> IdentificationResultCollection {
        let mut collection = IdentificationResultCollection::for_request(request);
        for format in self
            .catalogue
            .formats_matching(|signature| self.signature_matches(request, signature))
        {
            trace!(puid = %format.puid, "binary signature hit");
            collection.add_result(IdentificationResult {
                puid: format.puid.clone(),
                name: format.name.clone(),
                version: format.version.clone(),
                mime_type: format.mime_type.clone(),
                method: IdentificationMethod::BinarySignature,
            });
        }
        collection
    }

    /// Runs container triggers in registration order. The first trigger
    /// whose shell signature hits delegates entirely to its container
    /// identifier and returns, even if it found nothing. `None` means no
    /// trigger hit at all: the file is not a container type.
    pub fn match_container_signatures(
        &self,
        request: &IdentificationRequest,
    ) -> Option<IdentificationResultCollection> {
        for trigger in &self.triggers {
            let shell_hit = trigger.signature_ids.iter().any(|id| {
                self.catalogue
                    .signature(*id)
                    .map(|signature| self.signature_matches(request, signature))
                    .unwrap_or(false)
            });
            if shell_hit {
                trace!(puid = %trigger.puid, "container trigger hit");
                let mut results = trigger.identifier.identify(request);
                results.file_size = request.size();
                results.metadata = request.metadata.clone();
                return Some(results);
            }
        }
        None
    }

    /// Matches formats by the request's extension. With `all_extensions`
    /// false, only formats that have no binary signatures are eligible;
    /// the extension is a weak fallback, never an override.
    pub fn match_extensions(
        &self,
        request: &IdentificationRequest,
        all_extensions: bool,
    ) -> IdentificationResultCollection {
        let mut collection = IdentificationResultCollection::for_request(request);
        let extension = request.extension();
        if extension.is_empty() {
            return collection;
        }
        for format in self.catalogue.formats_for_extension(extension) {
            if !all_extensions && format.has_signatures() {
                continue;
            }
            collection.add_result(IdentificationResult {
                puid: format.puid.clone(),
                name: format.name.clone(),
                version: format.version.clone(),
                mime_type: format.mime_type.clone(),
                method: IdentificationMethod::Extension,
            });
        }
        collection
    }

    /// Removes every result superseded by another present result. Two
    /// linear passes: collect the union of superseded PUIDs, then drop
    /// results whose PUID is in it.
    pub fn remove_lower_priority_hits(
        &self,
        results: &mut IdentificationResultCollection,
    ) -> Result<(), IdentifyError> {
        let mut superseded: HashSet<&str> = HashSet::new();
        let mut formats = HashMap::new();
        for result in &results.results {
            let format = self.catalogue.format_for_puid(&result.puid).ok_or_else(|| {
                IdentifyError::CatalogueInconsistency {
                    puid: result.puid.clone(),
                }
            })?;
            formats.insert(format.puid.as_str(), format);
        }
        for format in formats.values() {
            for puid in &format.priority_over {
                superseded.insert(puid.as_str());
            }
        }
        results
            .results
            .retain(|result| !superseded.contains(result.puid.as_str()));
        Ok(())
    }

    /// Sets the mismatch flag per the formats' declared mismatch rules.
    /// An empty result set never flags, whatever the extension.
    pub fn check_for_extension_mismatches(
        &self,
        results: &mut IdentificationResultCollection,
        extension: &str,
    ) -> Result<(), IdentifyError> {
        if results.is_empty() {
            return Ok(());
        }
        let mut mismatch = false;
        for result in &results.results {
            let format = self.catalogue.format_for_puid(&result.puid).ok_or_else(|| {
                IdentifyError::CatalogueInconsistency {
                    puid: result.puid.clone(),
                }
            })?;
            if extension.is_empty() {
                // Matched a format that normally carries an extension,
                // but the file has none.
                if !format.extensions.is_empty() {
                    mismatch = true;
                    break;
                }
            } else if format.is_extension_mismatch(extension) {
                mismatch = true;
                break;
            }
        }
        if mismatch {
            results.set_extension_mismatch(true);
        }
        Ok(())
    }

    /// Extension augmentation: extension-only results when nothing else
    /// matched, otherwise a mismatch check in place. Extension results
    /// are never stacked on top of signature hits.
    pub fn process_extensions(
        &self,
        request: &IdentificationRequest,
        results: &mut IdentificationResultCollection,
        all_extensions: bool,
    ) -> Result<(), IdentifyError> {
        if results.is_empty() {
            *results = self.match_extensions(request, all_extensions);
        } else {
            self.check_for_extension_mismatches(results, request.extension())?;
        }
        Ok(())
    }

    /// Top-level single-call identification: container first, binary as
    /// fallback, then priority filtering and extension augmentation.
    pub fn identify(
        &self,
        request: &IdentificationRequest,
        all_extensions: bool,
    ) -> Result<IdentificationResultCollection, IdentifyError> {
        let mut results = match self.match_container_signatures(request) {
            Some(container_results) if !container_results.is_empty() => container_results,
            _ => self.match_binary_signatures(request),
        };
        self.remove_lower_priority_hits(&mut results)?;
        self.process_extensions(request, &mut results, all_extensions)?;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::SignatureFileDef;
    use crate::identify::{RequestMetadata, SliceSource};
    use crate::syntax::CompileMode;

    fn catalogue() -> Arc<FormatCatalogue> {
        let def: SignatureFileDef = serde_json::from_str(
            r#"{
                "formats": [
                    {
                        "puid": "x-fmt/263",
                        "name": "ZIP Format",
                        "extensions": ["zip"],
                        "signature_ids": [1]
                    },
                    {
                        "puid": "fmt/189",
                        "name": "Microsoft Office Open XML",
                        "extensions": ["docx"],
                        "priority_over": ["x-fmt/263"]
                    },
                    {
                        "puid": "fmt/11",
                        "name": "PNG",
                        "mime_type": "image/png",
                        "extensions": ["png"],
                        "extension_mismatches": ["jpg"],
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
        .unwrap();
        Arc::new(FormatCatalogue::from_def(def, CompileMode::Extended).unwrap())
    }

    fn containers() -> ContainerFileDef {
        serde_json::from_str(
            r#"{
                "triggers": [{"puid": "x-fmt/263", "container_type": "ZIP"}],
                "signatures": [
                    {
                        "container_type": "ZIP",
                        "puid": "fmt/189",
                        "markers": ["[Content_Types].xml"]
                    }
                ]
            }"#,
        )
        .unwrap()
    }

    fn identifier() -> FormatIdentifier {
        let mut identifier = FormatIdentifier::new(catalogue(), 65536);
        identifier.register_containers(&containers()).unwrap();
        identifier
    }

    fn request(name: &str, content: &[u8]) -> IdentificationRequest {
        let path = std::path::Path::new(name);
        IdentificationRequest::new(
            RequestMetadata {
                file_name: name.to_string(),
                extension: path
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                last_modified: None,
            },
            Box::new(SliceSource::new(content.to_vec())),
        )
    }

    #[test]
    fn binary_match_tags_method_and_metadata() {
        let identifier = identifier();
        let request = request("image.png", b"\x89PNG\r\n\x1a\n....");
        let results = identifier.match_binary_signatures(&request);
        assert_eq!(results.len(), 1);
        assert_eq!(results.results[0].puid, "fmt/11");
        assert_eq!(results.results[0].mime_type.as_deref(), Some("image/png"));
        assert_eq!(
            results.results[0].method,
            IdentificationMethod::BinarySignature
        );
    }

    #[test]
    fn container_trigger_hit_delegates_and_returns() {
        let identifier = identifier();
        let ooxml = request("doc.docx", b"PK\x03\x04....[Content_Types].xml....");
        let results = identifier.match_container_signatures(&ooxml).unwrap();
        assert!(!results.is_empty());
        assert!(results.results.iter().any(|r| r.puid == "fmt/189"));
        assert_eq!(results.metadata.file_name, "doc.docx");
    }

    #[test]
    fn no_trigger_hit_is_none_not_empty() {
        let identifier = identifier();
        let plain = request("notes.txt", b"just some text");
        assert!(identifier.match_container_signatures(&plain).is_none());

        // A ZIP shell without the inner marker is Some(empty): it is a
        // container, its content just identified nothing.
        let bare_zip = request("data.zip", b"PK\x03\x04 nothing inside");
        let results = identifier.match_container_signatures(&bare_zip).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn extension_match_skips_signature_backed_formats_by_default() {
        let identifier = identifier();
        let request = request("file.zip", b"not actually a zip");
        let weak = identifier.match_extensions(&request, false);
        assert!(weak.is_empty());
        let all = identifier.match_extensions(&request, true);
        assert_eq!(all.len(), 1);
        assert_eq!(all.results[0].method, IdentificationMethod::Extension);
    }

    #[test]
    fn lower_priority_hits_are_removed() {
        let identifier = identifier();
        let request = request("doc.docx", b"PK\x03\x04[Content_Types].xml");
        let mut results = identifier.match_binary_signatures(&request);
        results.add_result(IdentificationResult {
            puid: "fmt/189".to_string(),
            name: "Microsoft Office Open XML".to_string(),
            version: None,
            mime_type: None,
            method: IdentificationMethod::ContainerSignature,
        });
        identifier.remove_lower_priority_hits(&mut results).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results.results[0].puid, "fmt/189");
    }

    #[test]
    fn priority_removal_is_idempotent() {
        let identifier = identifier();
        let request = request("doc.docx", b"PK\x03\x04[Content_Types].xml");
        let mut results = identifier.match_binary_signatures(&request);
        results.add_result(IdentificationResult {
            puid: "fmt/189".to_string(),
            name: "Microsoft Office Open XML".to_string(),
            version: None,
            mime_type: None,
            method: IdentificationMethod::ContainerSignature,
        });
        identifier.remove_lower_priority_hits(&mut results).unwrap();
        let once = results.results.clone();
        identifier.remove_lower_priority_hits(&mut results).unwrap();
        assert_eq!(once, results.results);
    }

    #[test]
    fn mismatch_never_flags_on_empty_results() {
        let identifier = identifier();
        let request = request("anything.jpg", b"");
        let mut empty = IdentificationResultCollection::for_request(&request);
        identifier
            .check_for_extension_mismatches(&mut empty, "jpg")
            .unwrap();
        assert!(!empty.extension_mismatch);
        identifier
            .check_for_extension_mismatches(&mut empty, "")
            .unwrap();
        assert!(!empty.extension_mismatch);
    }

    #[test]
    fn declared_mismatch_extension_flags() {
        let identifier = identifier();
        let request = request("picture.jpg", b"\x89PNG\r\n\x1a\n....");
        let mut results = identifier.match_binary_signatures(&request);
        identifier
            .check_for_extension_mismatches(&mut results, "jpg")
            .unwrap();
        assert!(results.extension_mismatch);
    }

    #[test]
    fn unlisted_extension_is_not_a_mismatch() {
        let identifier = identifier();
        let request = request("picture.dat", b"\x89PNG\r\n\x1a\n....");
        let mut results = identifier.match_binary_signatures(&request);
        identifier
            .check_for_extension_mismatches(&mut results, "dat")
            .unwrap();
        assert!(!results.extension_mismatch);
    }

    #[test]
    fn missing_extension_flags_when_format_has_one() {
        let identifier = identifier();
        let request = request("noext", b"\x89PNG\r\n\x1a\n....");
        let mut results = identifier.match_binary_signatures(&request);
        identifier
            .check_for_extension_mismatches(&mut results, "")
            .unwrap();
        assert!(results.extension_mismatch);
    }

    #[test]
    fn unknown_puid_is_a_fatal_inconsistency() {
        let identifier = identifier();
        let request = request("x.bin", b"");
        let mut results = IdentificationResultCollection::for_request(&request);
        results.add_result(IdentificationResult {
            puid: "fmt/0".to_string(),
            name: "ghost".to_string(),
            version: None,
            mime_type: None,
            method: IdentificationMethod::BinarySignature,
        });
        assert!(matches!(
            identifier.remove_lower_priority_hits(&mut results),
            Err(IdentifyError::CatalogueInconsistency { .. })
        ));
    }

    #[test]
    fn identify_prefers_container_results() {
        let identifier = identifier();
        let request = request("doc.docx", b"PK\x03\x04....[Content_Types].xml");
        let results = identifier.identify(&request, false).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results.results[0].puid, "fmt/189");
        assert_eq!(
            results.results[0].method,
            IdentificationMethod::ContainerSignature
        );
    }

    #[test]
    fn identify_falls_back_to_binary_then_extension() {
        let identifier = identifier();
        let zip = request("data.zip", b"PK\x03\x04 no inner markers");
        let results = identifier.identify(&zip, false).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results.results[0].puid, "x-fmt/263");

        let unknown = request("data.xyz", b"nothing recognizable");
        let results = identifier.identify(&unknown, false).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results.results[0].puid, "fmt/899");
        assert_eq!(results.results[0].method, IdentificationMethod::Extension);
    }

    #[test]
    fn eof_window_respects_scan_limit() {
        let def: SignatureFileDef = serde_json::from_str(
            r#"{
                "formats": [
                    {"puid": "fmt/t1", "name": "Trailer Format", "signature_ids": [1]}
                ],
                "signatures": [
                    {"id": 1, "sequences": [{"expression": "'TRAILER'", "anchor": "eof"}]}
                ]
            }"#,
        )
        .unwrap();
        let catalogue = Arc::new(FormatCatalogue::from_def(def, CompileMode::Extended).unwrap());
        let identifier = FormatIdentifier::new(catalogue, 16);

        let mut content = vec![b'.'; 100];
        content.extend_from_slice(b"TRAILER");
        let hit = request("t.bin", &content);
        assert_eq!(identifier.match_binary_signatures(&hit).len(), 1);

        // Trailer buried deeper than the scan limit from EOF.
        let mut buried = vec![b'.'; 50];
        buried.extend_from_slice(b"TRAILER");
        buried.extend(vec![b'.'; 50]);
        let miss = request("t.bin", &buried);
        assert!(identifier.match_binary_signatures(&miss).is_empty());
    }
}
