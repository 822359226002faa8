//! Integration tests for Sigsleuth: load a signature catalogue from
//! disk and identify real files end to end.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::tempdir;

use sigsleuth::catalogue::FormatCatalogue;
use sigsleuth::identify::container::ContainerFileDef;
use sigsleuth::identify::{
    FormatIdentifier, IdentificationMethod, IdentificationRequest, MatchStrategy,
};

const SIGNATURE_FILE: &str = r#"{
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
            "extensions": ["docx", "xlsx", "pptx"],
            "priority_over": ["x-fmt/263"]
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
            "puid": "fmt/281",
            "name": "Trailer Signed Format",
            "extensions": ["tsf"],
            "signature_ids": [3]
        },
        {
            "puid": "x-fmt/111",
            "name": "Plain Text File",
            "extensions": ["txt"]
        }
    ],
    "signatures": [
        {"id": 1, "sequences": [{"expression": "504B0304", "anchor": "bof"}]},
        {"id": 2, "sequences": [{"expression": "89504E470D0A1A0A", "anchor": "bof"}]},
        {"id": 3, "sequences": [
            {"expression": "'HDR!'", "anchor": "bof"},
            {"expression": "'!END'", "anchor": "eof"}
        ]}
    ]
}"#;

const CONTAINER_FILE: &str = r#"{
    "triggers": [{"puid": "x-fmt/263", "container_type": "ZIP"}],
    "signatures": [
        {
            "container_type": "ZIP",
            "puid": "fmt/189",
            "markers": ["[Content_Types].xml"]
        }
    ]
}"#;

fn build_identifier(dir: &Path, max_bytes: i64) -> FormatIdentifier {
    let signature_path = dir.join("signatures.json");
    fs::write(&signature_path, SIGNATURE_FILE).unwrap();
    let catalogue = Arc::new(FormatCatalogue::load(&signature_path).unwrap());
    let mut identifier = FormatIdentifier::new(catalogue, max_bytes);
    let containers: ContainerFileDef = serde_json::from_str(CONTAINER_FILE).unwrap();
    identifier.register_containers(&containers).unwrap();
    identifier
}

fn identify(identifier: &FormatIdentifier, path: &Path) -> sigsleuth::IdentificationResultCollection {
    let request = IdentificationRequest::open(path).unwrap();
    identifier.identify(&request, false).unwrap()
}

#[test]
fn png_file_identified_by_binary_signature() {
    let dir = tempdir().unwrap();
    let identifier = build_identifier(dir.path(), 65_536);

    let path = dir.path().join("image.png");
    fs::write(&path, b"\x89PNG\r\n\x1a\n...chunk data...").unwrap();

    let results = identify(&identifier, &path);
    assert_eq!(results.len(), 1);
    assert_eq!(results.results[0].puid, "fmt/11");
    assert_eq!(results.results[0].version.as_deref(), Some("1.0"));
    assert_eq!(
        results.results[0].method,
        IdentificationMethod::BinarySignature
    );
    assert!(!results.extension_mismatch);
    assert_eq!(results.file_size, 24);
}

#[test]
fn ooxml_identified_through_its_container() {
    let dir = tempdir().unwrap();
    let identifier = build_identifier(dir.path(), 65_536);

    let path = dir.path().join("report.docx");
    fs::write(&path, b"PK\x03\x04....[Content_Types].xml....").unwrap();

    let results = identify(&identifier, &path);
    assert_eq!(results.len(), 1);
    assert_eq!(results.results[0].puid, "fmt/189");
    assert_eq!(
        results.results[0].method,
        IdentificationMethod::ContainerSignature
    );
}

#[test]
fn plain_zip_stays_zip() {
    let dir = tempdir().unwrap();
    let identifier = build_identifier(dir.path(), 65_536);

    let path = dir.path().join("archive.zip");
    fs::write(&path, b"PK\x03\x04 ordinary archive content").unwrap();

    let results = identify(&identifier, &path);
    assert_eq!(results.len(), 1);
    assert_eq!(results.results[0].puid, "x-fmt/263");
}

#[test]
fn both_ends_of_a_large_file_are_scanned() {
    let dir = tempdir().unwrap();
    let identifier = build_identifier(dir.path(), 4_096);

    // Signature 3 needs a BOF header and an EOF trailer with a megabyte
    // between them, far beyond one scan window.
    let path = dir.path().join("signed.tsf");
    let mut content = Vec::with_capacity(1_048_576 + 8);
    content.extend_from_slice(b"HDR!");
    content.resize(1_048_576 + 4, 0);
    content.extend_from_slice(b"!END");
    fs::write(&path, &content).unwrap();

    let results = identify(&identifier, &path);
    assert_eq!(results.len(), 1);
    assert_eq!(results.results[0].puid, "fmt/281");

    // Without the trailer the signature must not match, because every
    // sequence of an internal signature has to hit.
    let truncated = dir.path().join("broken.tsf");
    let mut broken = content.clone();
    broken.truncate(broken.len() - 4);
    fs::write(&truncated, &broken).unwrap();
    let results = identify(&identifier, &truncated);
    assert!(results
        .results
        .iter()
        .all(|r| r.method == IdentificationMethod::Extension));
}

#[test]
fn extension_fallback_for_unsigned_formats() {
    let dir = tempdir().unwrap();
    let identifier = build_identifier(dir.path(), 65_536);

    let path = dir.path().join("notes.txt");
    fs::write(&path, b"nothing signature-shaped here").unwrap();

    let results = identify(&identifier, &path);
    assert_eq!(results.len(), 1);
    assert_eq!(results.results[0].puid, "x-fmt/111");
    assert_eq!(results.results[0].method, IdentificationMethod::Extension);
}

#[test]
fn renamed_png_flags_extension_mismatch() {
    let dir = tempdir().unwrap();
    let identifier = build_identifier(dir.path(), 65_536);

    let path = dir.path().join("holiday.jpg");
    fs::write(&path, b"\x89PNG\r\n\x1a\n...").unwrap();

    let results = identify(&identifier, &path);
    assert_eq!(results.results[0].puid, "fmt/11");
    assert!(results.extension_mismatch);
}

#[test]
fn empty_file_yields_no_identification() {
    let dir = tempdir().unwrap();
    let identifier = build_identifier(dir.path(), 65_536);

    let path = dir.path().join("empty.bin");
    fs::write(&path, b"").unwrap();

    let results = identify(&identifier, &path);
    assert!(results.is_empty());
    assert_eq!(results.file_size, 0);
}

#[test]
fn strategy_choice_changes_the_work_done() {
    let dir = tempdir().unwrap();
    let identifier = build_identifier(dir.path(), 65_536);

    let path = dir.path().join("report.docx");
    fs::write(&path, b"PK\x03\x04....[Content_Types].xml....").unwrap();

    let request = IdentificationRequest::open(&path).unwrap();
    let none = MatchStrategy::None.run(&identifier, &request, false).unwrap();
    assert!(none.is_empty());

    let request = IdentificationRequest::open(&path).unwrap();
    let binary = MatchStrategy::Binary.run(&identifier, &request, false).unwrap();
    assert_eq!(binary.results[0].puid, "x-fmt/263");

    let request = IdentificationRequest::open(&path).unwrap();
    let full = MatchStrategy::ContainerOrBinary
        .run(&identifier, &request, false)
        .unwrap();
    assert_eq!(full.results[0].puid, "fmt/189");
}
