//! Container-format identification behind binary triggers.
//!
//! Container formats (OOXML inside ZIP, legacy Office inside OLE2)
//! cannot be told apart by their outer shell bytes alone. The container
//! signature file links a trigger PUID - the shell format a cheap binary
//! signature can spot - to a container identifier that inspects the
//! content and reports the real format.

use memchr::memmem;
use serde::{Deserialize, Serialize};

use crate::identify::{
    IdentificationMethod, IdentificationRequest, IdentificationResult,
    IdentificationResultCollection,
};

/// Links a shell format to a container identifier type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerPuidDef {
    /// PUID of the shell format whose binary signature gates this
    /// identifier, e.g. "x-fmt/263" for ZIP.
    pub puid: String,
    pub container_type: String,
}

/// One container signature: entry-name markers that must all be present
/// in the container's content for the format to match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSignatureDef {
    pub container_type: String,
    /// PUID of the format this signature identifies.
    pub puid: String,
    /// Byte strings to find in the content, e.g. "word/document.xml".
    pub markers: Vec<String>,
}

/// Container signature file layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerFileDef {
    #[serde(default)]
    pub triggers: Vec<TriggerPuidDef>,
    #[serde(default)]
    pub signatures: Vec<ContainerSignatureDef>,
}

/// Identifies formats inside a container once its shell has triggered.
pub trait ContainerIdentifier: Send + Sync {
    /// Inspects the request content and returns any format hits, tagged
    /// CONTAINER_SIGNATURE. An empty collection means "the shell
    /// matched but the content identified nothing".
    fn identify(&self, request: &IdentificationRequest) -> IdentificationResultCollection;
}

/// A compiled container signature with resolved format metadata.
#[derive(Debug, Clone)]
pub struct MarkerSignature {
    pub result: IdentificationResult,
    pub markers: Vec<Vec<u8>>,
}

/// Container identifier that searches the raw container bytes for entry
/// name markers. All markers of a signature must be present.
#[derive(Debug, Default)]
pub struct MarkerIdentifier {
    signatures: Vec<MarkerSignature>,
}

impl MarkerIdentifier {
    pub fn new(signatures: Vec<MarkerSignature>) -> Self {
        Self { signatures }
    }
}

impl ContainerIdentifier for MarkerIdentifier {
    fn identify(&self, request: &IdentificationRequest) -> IdentificationResultCollection {
        let mut collection = IdentificationResultCollection::for_request(request);
        let size = request.source.size();
        let content = request.source.window(0, usize::try_from(size).unwrap_or(usize::MAX));
        for signature in &self.signatures {
            let all_present = signature
                .markers
                .iter()
                .all(|marker| memmem::find(content, marker).is_some());
            if all_present {
                collection.add_result(signature.result.clone());
            }
        }
        collection
    }
}

/// A registered trigger: the shell PUID, its binary signature ids, and
/// the identifier to delegate to once the shell matches.
pub struct ContainerTrigger {
    pub puid: String,
    pub signature_ids: Vec<u32>,
    pub identifier: Box<dyn ContainerIdentifier>,
}

/// Builds a marker signature with CONTAINER_SIGNATURE tagging.
pub fn marker_signature(
    puid: &str,
    name: &str,
    version: Option<&str>,
    mime_type: Option<&str>,
    markers: &[String],
) -> MarkerSignature {
    MarkerSignature {
        result: IdentificationResult {
            puid: puid.to_string(),
            name: name.to_string(),
            version: version.map(str::to_string),
            mime_type: mime_type.map(str::to_string),
            method: IdentificationMethod::ContainerSignature,
        },
        markers: markers.iter().map(|m| m.as_bytes().to_vec()).collect(),
    }
}
