use citecheck::inventory::{
    build_citation_metadata, build_inventory, format_inventory, parse_inventory, CitationMetadata, InventoryEntry,
    InventoryStatus, MetadataMap,
};
use citecheck::latex::{scan_citations, Bibliography};
use citecheck::sources::{normalize_doi, ScanResult};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn with_file(name: &str) -> CitationMetadata {
    CitationMetadata {
        doi: None,
        filename: Some(name.to_string()),
        filepath: Some(Path::new("papers").join(name)),
    }
}

#[test]
fn test_ready_requires_every_key() {
    let index = scan_citations("x \\cite{a,b}\ny \\cite{a}\n");
    let mut metadata = MetadataMap::new();
    metadata.insert("a".to_string(), with_file("a.pdf"));

    let entries = build_inventory(&index, &metadata);
    let ab = entries.iter().find(|e| e.citation_keys == ["a", "b"]).unwrap();
    let a = entries.iter().find(|e| e.citation_keys == ["a"]).unwrap();
    assert_eq!(ab.status, InventoryStatus::MissingFile);
    assert_eq!(ab.filenames, vec!["a.pdf".to_string()]);
    assert!(a.is_ready());
}

#[test]
fn test_sorted_by_count_then_keys_descending() {
    let index = scan_citations("\\cite{b}\n\\cite{a}\n\\cite{c}\n\\cite{c}\n\\cite{a}\n");
    let entries = build_inventory(&index, &MetadataMap::new());
    let order: Vec<String> = entries.iter().map(|e| e.keys_label()).collect();
    assert_eq!(order, vec!["c", "a", "b"]);
}

#[test]
fn test_round_trip_preserves_entries() {
    let index = scan_citations("one \\cite{a,b}\ntwo \\cite{c}\nthree \\cite{a,b}\n");
    let mut metadata = MetadataMap::new();
    metadata.insert(
        "a".to_string(),
        CitationMetadata {
            doi: Some("10.1/A".to_string()),
            ..with_file("a.pdf")
        },
    );
    metadata.insert("b".to_string(), with_file("sub/b.pdf"));

    let entries = build_inventory(&index, &metadata);
    let text = format_inventory(&entries);
    assert_eq!(
        text,
        "READY (a,b), (10.1/A), (a.pdf,sub/b.pdf) - 1,3\nMISSING_FILE (c), (), () - 2"
    );

    let parsed = parse_inventory(&text);
    assert_eq!(parsed, entries);
    // Formatting the parsed entries again gives the same text
    assert_eq!(format_inventory(&parsed), text);
}

#[test]
fn test_keys_without_doi_leave_no_empty_slot() {
    let index = scan_citations("x \\cite{a,b}\n");
    let mut metadata = MetadataMap::new();
    metadata.insert(
        "a".to_string(),
        CitationMetadata {
            doi: Some("10.1/A".to_string()),
            ..with_file("a.pdf")
        },
    );
    metadata.insert(
        "b".to_string(),
        CitationMetadata {
            doi: Some(String::new()),
            ..with_file("b.pdf")
        },
    );

    let entries = build_inventory(&index, &metadata);
    assert_eq!(format_inventory(&entries), "READY (a,b), (10.1/A), (a.pdf,b.pdf) - 1");

    let with_trailing = parse_inventory("READY (a,b), (10.1/A,), (a.pdf,b.pdf) - 1");
    assert_eq!(with_trailing[0].dois, vec!["10.1/A".to_string()]);
    assert_eq!(with_trailing[0].filenames.len(), 2);
}

#[test]
fn test_short_format_is_accepted() {
    let parsed = parse_inventory("READY (foo2020) - 10\n\nnot an inventory line\nMISSING_FILE (a,b) - 1,2\n");
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0].citation_keys, vec!["foo2020".to_string()]);
    assert_eq!(parsed[0].line_numbers, vec![10]);
    assert!(parsed[0].filenames.is_empty());
    assert_eq!(parsed[1].status, InventoryStatus::MissingFile);
    assert_eq!(parsed[1].line_numbers, vec![1, 2]);
}

#[test]
fn test_entry_display_matches_line() {
    let entry = InventoryEntry::parse_line("READY (k), (10.5/z), (k.pdf) - 4,8").unwrap();
    assert_eq!(entry.to_string(), "READY (k), (10.5/z), (k.pdf) - 4,8");
}

#[test]
fn test_metadata_matches_normalized_doi() {
    let bib = Bibliography::parse(
        "@article{doi_key,\n doi = {https://doi.org/10.1/ABC}\n}\n@article{name_key,\n title = {T}\n}\n",
    );
    let scan = ScanResult {
        file_to_doi: BTreeMap::from([("paper.pdf".to_string(), "10.1/abc".to_string())]),
        file_to_key: BTreeMap::from([("name_key.txt".to_string(), "name_key".to_string())]),
        unmatched: Vec::new(),
        files_processed: 2,
    };
    let metadata = build_citation_metadata(&bib, &scan, Path::new("papers"));

    let doi_meta = &metadata["doi_key"];
    assert_eq!(doi_meta.filename.as_deref(), Some("paper.pdf"));
    assert_eq!(normalize_doi(doi_meta.doi.as_deref().unwrap()), "10.1/abc");
    assert_eq!(metadata["name_key"].filename.as_deref(), Some("name_key.txt"));
    assert_eq!(metadata["name_key"].filepath, Some(Path::new("papers").join("name_key.txt")));
}

#[test]
fn test_metadata_uses_existing_file_field() {
    let dir = tempdir().unwrap();
    let papers = dir.path().join("papers");
    fs::create_dir(&papers).unwrap();
    fs::write(papers.join("linked.pdf"), b"%PDF").unwrap();

    let bib = Bibliography::parse(
        "@article{linked,\n file = {:linked.pdf:PDF}\n}\n@article{dangling,\n file = {:gone.pdf:}\n}\n",
    );
    let metadata = build_citation_metadata(&bib, &ScanResult::default(), &papers);

    assert_eq!(metadata["linked"].filename.as_deref(), Some("linked.pdf"));
    assert_eq!(metadata["linked"].filepath, Some(papers.join("linked.pdf")));
    assert!(metadata.get("dangling").is_none());
}
