//! Selectable orchestration policies, composed from the engine's
//! matching primitives.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::identify::engine::{FormatIdentifier, IdentifyError};
use crate::identify::{IdentificationRequest, IdentificationResultCollection};

/// Which matching passes to run for each request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MatchStrategy {
    /// No matching at all; a benchmark baseline.
    None,
    /// Extension lookup only.
    Extension,
    /// Binary signatures, then priority and extension augmentation.
    Binary,
    /// Container signatures only, then priority and augmentation.
    Container,
    /// Binary first; a container hit on top of a binary hit wins.
    BinaryAndContainer,
    /// Container first, binary as fallback.
    #[default]
    ContainerOrBinary,
}

impl MatchStrategy {
    /// Runs this strategy for one request.
    pub fn run(
        self,
        identifier: &FormatIdentifier,
        request: &IdentificationRequest,
        all_extensions: bool,
    ) -> Result<IdentificationResultCollection, IdentifyError> {
        match self {
            MatchStrategy::None => Ok(IdentificationResultCollection::for_request(request)),
            MatchStrategy::Extension => Ok(identifier.match_extensions(request, all_extensions)),
            MatchStrategy::Binary => {
                let mut results = identifier.match_binary_signatures(request);
                finish(identifier, request, &mut results, all_extensions)?;
                Ok(results)
            }
            MatchStrategy::Container => {
                let mut results = identifier
                    .match_container_signatures(request)
                    .unwrap_or_else(|| IdentificationResultCollection::for_request(request));
                finish(identifier, request, &mut results, all_extensions)?;
                Ok(results)
            }
            MatchStrategy::BinaryAndContainer => {
                let mut results = identifier.match_binary_signatures(request);
                if !results.is_empty() {
                    // A container identification refines a binary hit,
                    // but an empty container pass never discards one.
                    if let Some(container) = identifier.match_container_signatures(request) {
                        if !container.is_empty() {
                            results = container;
                        }
                    }
                }
                finish(identifier, request, &mut results, all_extensions)?;
                Ok(results)
            }
            MatchStrategy::ContainerOrBinary => identifier.identify(request, all_extensions),
        }
    }
}

fn finish(
    identifier: &FormatIdentifier,
    request: &IdentificationRequest,
    results: &mut IdentificationResultCollection,
    all_extensions: bool,
) -> Result<(), IdentifyError> {
    identifier.remove_lower_priority_hits(results)?;
    identifier.process_extensions(request, results, all_extensions)
}
