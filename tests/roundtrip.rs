//! Fixture-driven round-trip tests.
//!
//! Every file in `tests/roundtrip-cases/` is extracted and reinjected
//! without touching the stream; the result must be byte-identical to the
//! source (namespace declarations already lead in the fixtures, matching
//! the serializer's xmlns-first rule).

use std::io::BufReader;
use std::path::Path;

use transfuse::{extract, inject, ApertiumStream, Dialect, Format};

fn roundtrip_file(path: &Path) {
    let source = std::fs::read_to_string(path).unwrap();
    let dir = tempfile::tempdir().unwrap();

    let stream = extract(&source, dir.path(), Format::Xml, &ApertiumStream)
        .unwrap_or_else(|e| panic!("extract failed for {}: {e}", path.display()));

    let mut input = BufReader::new(stream.as_bytes());
    let (tmpdir, fname) = inject(None, &mut input, Dialect::Detect)
        .unwrap_or_else(|e| panic!("inject failed for {}: {e}", path.display()));

    let result = std::fs::read_to_string(tmpdir.join(fname)).unwrap();
    assert_eq!(result, source, "round-trip mismatch for {}", path.display());
}

#[test]
fn test_roundtrip_cases() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/roundtrip-cases");
    let mut ran = 0;
    let mut entries: Vec<_> = std::fs::read_dir(&dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    entries.sort();
    for path in entries {
        if path.extension().is_some_and(|e| e == "xml") {
            roundtrip_file(&path);
            ran += 1;
        }
    }
    assert!(ran >= 4, "expected the fixture set to run, got {ran}");
}
