use citecheck::latex::bibliography::{compare_bibliographies, link_bibliography_files, link_file, FieldDifference};
use citecheck::latex::{BibEntry, Bibliography};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::{tempdir, NamedTempFile};

const SAMPLE_BIB: &str = r#"@comment{exported by a reference manager, do not edit}

@Article{smith2020,
  Title = {A {Nested} Title with {Deep {Braces}}},
  author = {Smith, Alice and Jones, Bob},
  DOI = {10.1234/ABC.5},
  year = 2020
}

@misc{blog2021,
  title = "Quoted {value}",
  url = {https://example.org/post}
}

@book{ book2019 ,
  title = {Book},
  file = {:papers/book2019.pdf:PDF}
}
"#;

#[test]
fn test_parse_entries_and_nested_braces() {
    let bib = Bibliography::parse(SAMPLE_BIB);
    assert_eq!(bib.len(), 3);

    let smith = bib.get("smith2020").unwrap();
    assert_eq!(smith.entry_type, "article");
    assert_eq!(smith.get("title").unwrap(), "A {Nested} Title with {Deep {Braces}}");
    assert_eq!(smith.doi(), Some("10.1234/ABC.5"));
    assert_eq!(smith.get("year").unwrap(), "2020");

    let blog = bib.get("blog2021").unwrap();
    assert_eq!(blog.get("title").unwrap(), "Quoted {value}");
    assert!(blog.doi().is_none());

    let book = bib.get("book2019").unwrap();
    assert_eq!(book.file_paths(), vec![PathBuf::from("papers/book2019.pdf")]);
}

#[test]
fn test_parse_is_deterministic() {
    let first = Bibliography::parse(SAMPLE_BIB);
    let second = Bibliography::parse(SAMPLE_BIB);
    assert_eq!(first.citation_keys(), second.citation_keys());
    for entry in first.iter() {
        assert_eq!(Some(entry), second.get(&entry.key));
    }
}

#[test]
fn test_duplicate_key_keeps_last_entry() {
    let content = "@article{dup,\n title = {First}\n}\n@article{dup,\n title = {Second}\n}\n";
    let bib = Bibliography::parse(content);
    assert_eq!(bib.len(), 1);
    assert_eq!(bib.get("dup").unwrap().get("title").unwrap(), "Second");
}

#[test]
fn test_doi_map_only_has_entries_with_doi() {
    let bib = Bibliography::parse(SAMPLE_BIB);
    let dois = bib.doi_map();
    assert_eq!(dois.len(), 1);
    assert_eq!(dois.get("smith2020").map(String::as_str), Some("10.1234/ABC.5"));
}

#[test]
fn test_missing_file_is_empty_bibliography() {
    let dir = tempdir().unwrap();
    let bib = Bibliography::load(&dir.path().join("absent.bib")).unwrap();
    assert!(bib.is_empty());
}

#[test]
fn test_file_field_variants() {
    let entry = BibEntry::builder("k", "misc")
        .field("file", "Full Text:/abs/a.pdf:application/pdf; :b.pdf:; c.txt")
        .build();
    assert_eq!(
        entry.file_paths(),
        vec![PathBuf::from("/abs/a.pdf"), PathBuf::from("b.pdf"), PathBuf::from("c.txt")]
    );
}

#[test]
fn test_link_file_appends_field() {
    let content = "@article{a,\n  title = {T}\n}\n\n@article{b,\n  title = {U},\n}\n";

    let linked = link_file(content, "a", ":/papers/a.pdf:").unwrap();
    assert!(linked.contains("title = {T},\n  file = {:/papers/a.pdf:}\n}"));
    assert!(linked.contains("@article{b,"));

    // Trailing comma is not doubled
    let linked = link_file(content, "b", ":b.pdf:").unwrap();
    assert!(linked.contains("title = {U},\n  file = {:b.pdf:}\n}"));

    assert!(link_file(content, "missing", ":x:").is_none());
    let already = link_file(&linked, "b", ":other.pdf:");
    assert!(already.is_none());
}

#[test]
fn test_link_bibliography_files_rewrites_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "@article{{a,\n  title = {{T}}\n}}\n@article{{b,\n  title = {{U}}\n}}\n").unwrap();

    let links = vec![
        ("a".to_string(), ":/p/a.pdf:".to_string()),
        ("b".to_string(), ":/p/b.pdf:".to_string()),
    ];
    let linked = link_bibliography_files(file.path(), &links).unwrap();
    assert_eq!(linked, 2);

    let bib = Bibliography::parse(&fs::read_to_string(file.path()).unwrap());
    assert_eq!(bib.get("a").unwrap().file_paths(), vec![PathBuf::from("/p/a.pdf")]);
    assert_eq!(bib.get("b").unwrap().file_paths(), vec![PathBuf::from("/p/b.pdf")]);
}

#[test]
fn test_compare_ignores_file_field() {
    let first = Bibliography::parse("@article{a,\n title = {Same   title},\n file = {:x.pdf:}\n}\n");
    let second = Bibliography::parse("@article{a,\n title = {Same title}\n}\n");
    let comparison = compare_bibliographies(&first, &second, &["file"]);
    assert!(!comparison.has_differences());
    assert_eq!(comparison.first_with_file, 1);
    assert_eq!(comparison.second_with_file, 0);
}

#[test]
fn test_compare_reports_differences() {
    let first = Bibliography::parse("@article{a,\n title = {One},\n year = {2020}\n}\n@book{only,\n title = {X}\n}\n");
    let second = Bibliography::parse("@article{a,\n title = {Two},\n note = {n}\n}\n");
    let comparison = compare_bibliographies(&first, &second, &["file"]);

    assert!(comparison.has_differences());
    assert_eq!(comparison.only_in_first, vec!["only".to_string()]);
    assert!(comparison.only_in_second.is_empty());
    assert!(comparison.differences.contains(&FieldDifference::OnlyInFirst {
        key: "a".to_string(),
        field: "year".to_string()
    }));
    assert!(comparison.differences.contains(&FieldDifference::OnlyInSecond {
        key: "a".to_string(),
        field: "note".to_string()
    }));
    assert!(comparison.differences.contains(&FieldDifference::Changed {
        key: "a".to_string(),
        field: "title".to_string(),
        first: "One".to_string(),
        second: "Two".to_string(),
    }));
    assert!(comparison.to_string().ends_with("Bibliographies differ"));
}
