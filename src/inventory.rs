use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::CiteError;
use crate::latex::{Bibliography, CitationIndex, CitationOccurrence};
use crate::sources::{normalize_doi, ScanResult};

static DETAILED_LINE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\w+) \(([^)]+)\), \(([^)]*)\), \(([^)]*)\) - (.+)$")
        .expect("Invalid inventory line regex pattern")
});
static SHORT_LINE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\w+) \(([^)]+)\) - (.+)$").expect("Invalid short inventory line regex pattern")
});

/// Readiness of a citation group for verification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InventoryStatus {
    Ready,
    MissingFile,
    /// Any other word found in an inventory file, kept as written.
    Other(String),
}

impl InventoryStatus {
    pub fn as_str(&self) -> &str {
        match self {
            InventoryStatus::Ready => "READY",
            InventoryStatus::MissingFile => "MISSING_FILE",
            InventoryStatus::Other(word) => word,
        }
    }

    pub fn parse(word: &str) -> Self {
        match word {
            "READY" => InventoryStatus::Ready,
            "MISSING_FILE" => InventoryStatus::MissingFile,
            other => InventoryStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for InventoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What is known about one citation key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CitationMetadata {
    /// DOI as written in the bibliography.
    pub doi: Option<String>,
    /// Source file, relative to the papers directory or absolute.
    pub filename: Option<String>,
    pub filepath: Option<PathBuf>,
}

pub type MetadataMap = BTreeMap<String, CitationMetadata>;

/// Merge bibliography DOIs, scanned files and bib `file` fields into per-key metadata.
///
/// DOIs are compared in normalized form, so `https://doi.org/10.1/ABC` in a
/// PDF matches `10.1/abc` in the bibliography.
pub fn build_citation_metadata(bibliography: &Bibliography, scan: &ScanResult, papers_dir: &Path) -> MetadataMap {
    let mut metadata = MetadataMap::new();

    let doi_to_file: HashMap<String, &String> = scan
        .file_to_doi
        .iter()
        .map(|(file, doi)| (normalize_doi(doi), file))
        .collect();

    // DOI matches
    for (key, doi) in bibliography.doi_map() {
        let filename = doi_to_file.get(&normalize_doi(&doi)).map(|f| f.to_string());
        metadata.insert(
            key,
            CitationMetadata {
                filepath: filename.as_ref().map(|f| papers_dir.join(f)),
                filename,
                doi: Some(doi),
            },
        );
    }

    // Filename matches
    for (file, key) in &scan.file_to_key {
        let entry = metadata.entry(key.clone()).or_default();
        if entry.filename.is_none() {
            entry.filename = Some(file.clone());
            entry.filepath = Some(papers_dir.join(file));
        }
    }

    // Files already linked in the bibliography
    for entry in bibliography.iter() {
        let known = metadata
            .get(&entry.key)
            .map(|m| m.filename.is_some())
            .unwrap_or(false);
        if known {
            continue;
        }
        let linked = entry.file_paths().into_iter().find_map(|path| {
            let resolved = if path.is_absolute() {
                path.clone()
            } else {
                papers_dir.join(&path)
            };
            resolved.is_file().then_some((path, resolved))
        });
        if let Some((path, resolved)) = linked {
            debug!("{} -> linked file {}", entry.key, path.display());
            let slot = metadata.entry(entry.key.clone()).or_default();
            slot.filename = Some(path.to_string_lossy().into_owned());
            slot.filepath = Some(resolved);
            if slot.doi.is_none() {
                slot.doi = entry.doi().map(str::to_string);
            }
        }
    }

    metadata
}

/// One line of the citation inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryEntry {
    pub status: InventoryStatus,
    pub citation_keys: Vec<String>,
    pub dois: Vec<String>,
    pub filenames: Vec<String>,
    pub line_numbers: Vec<usize>,
}

impl InventoryEntry {
    /// Classify an occurrence group. It is READY only when every key has a file.
    pub fn from_occurrence(occurrence: &CitationOccurrence, metadata: &MetadataMap) -> Self {
        let mut dois = Vec::new();
        let mut filenames = Vec::new();
        for key in &occurrence.keys {
            if let Some(meta) = metadata.get(key) {
                if let Some(doi) = meta.doi.as_ref().filter(|d| !d.is_empty()) {
                    dois.push(doi.clone());
                }
                if let Some(file) = &meta.filename {
                    filenames.push(file.clone());
                }
            }
        }
        let status = if !occurrence.keys.is_empty() && filenames.len() == occurrence.keys.len() {
            InventoryStatus::Ready
        } else {
            InventoryStatus::MissingFile
        };
        let mut line_numbers = occurrence.line_numbers.clone();
        line_numbers.sort_unstable();
        Self {
            status,
            citation_keys: occurrence.keys.clone(),
            dois,
            filenames,
            line_numbers,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == InventoryStatus::Ready
    }

    pub fn keys_label(&self) -> String {
        self.citation_keys.join(",")
    }

    /// Serialize as `STATUS (keys), (dois), (files) - lines`.
    pub fn to_line(&self) -> String {
        let lines: Vec<String> = self.line_numbers.iter().map(|n| n.to_string()).collect();
        format!(
            "{} ({}), ({}), ({}) - {}",
            self.status,
            self.citation_keys.join(","),
            self.dois.join(","),
            self.filenames.join(","),
            lines.join(",")
        )
    }

    /// Parse either the detailed or the short inventory line shape.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if let Some(caps) = DETAILED_LINE_REGEX.captures(line) {
            return Some(Self {
                status: InventoryStatus::parse(&caps[1]),
                citation_keys: split_list(&caps[2]),
                dois: split_list(&caps[3]),
                filenames: split_list(&caps[4]),
                line_numbers: parse_line_numbers(&caps[5]),
            });
        }
        SHORT_LINE_REGEX.captures(line).map(|caps| Self {
            status: InventoryStatus::parse(&caps[1]),
            citation_keys: split_list(&caps[2]),
            dois: Vec::new(),
            filenames: Vec::new(),
            line_numbers: parse_line_numbers(&caps[3]),
        })
    }
}

impl fmt::Display for InventoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_line_numbers(text: &str) -> Vec<usize> {
    text.split(',')
        .filter_map(|n| n.trim().parse::<usize>().ok())
        .collect()
}

/// Build inventory entries, most frequently cited groups first.
///
/// Ties are broken by the key tuple, descending, so the output is stable.
pub fn build_inventory(index: &CitationIndex, metadata: &MetadataMap) -> Vec<InventoryEntry> {
    let mut entries: Vec<InventoryEntry> = index
        .occurrences()
        .iter()
        .map(|occurrence| InventoryEntry::from_occurrence(occurrence, metadata))
        .collect();
    entries.sort_by(|a, b| {
        (b.line_numbers.len(), &b.citation_keys).cmp(&(a.line_numbers.len(), &a.citation_keys))
    });
    entries
}

pub fn format_inventory(entries: &[InventoryEntry]) -> String {
    entries
        .iter()
        .map(InventoryEntry::to_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse inventory text. Blank and malformed lines are skipped.
pub fn parse_inventory(content: &str) -> Vec<InventoryEntry> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let parsed = InventoryEntry::parse_line(line);
            if parsed.is_none() {
                debug!("Skipping malformed inventory line: {}", line);
            }
            parsed
        })
        .collect()
}

pub fn write_inventory(path: &Path, entries: &[InventoryEntry]) -> Result<(), CiteError> {
    fs::write(path, format_inventory(entries)).map_err(|e| CiteError::io(path, e))?;
    info!("Citation inventory written to {}", path.display());
    Ok(())
}

pub fn load_inventory(path: &Path) -> Result<Vec<InventoryEntry>, CiteError> {
    let content = fs::read_to_string(path).map_err(|e| CiteError::io(path, e))?;
    Ok(parse_inventory(&content))
}

/// Counts printed after inventory generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventorySummary {
    pub files_processed: usize,
    pub files_with_doi: usize,
    pub files_matched_by_name: usize,
    pub unmatched_files: Vec<String>,
    pub keys_with_doi: usize,
    pub keys_with_file: usize,
    pub unique_combinations: usize,
    pub total_instances: usize,
    pub ready: usize,
    pub missing_file: usize,
}

impl InventorySummary {
    pub fn new(
        scan: &ScanResult,
        bibliography: &Bibliography,
        metadata: &MetadataMap,
        index: &CitationIndex,
        entries: &[InventoryEntry],
    ) -> Self {
        let ready = entries.iter().filter(|e| e.is_ready()).count();
        Self {
            files_processed: scan.files_processed,
            files_with_doi: scan.dois_found(),
            files_matched_by_name: scan.filename_matches(),
            unmatched_files: scan.unmatched.clone(),
            keys_with_doi: bibliography.doi_map().len(),
            keys_with_file: metadata.values().filter(|m| m.filename.is_some()).count(),
            unique_combinations: index.len(),
            total_instances: index.total_instances(),
            ready,
            missing_file: entries.len() - ready,
        }
    }
}

impl fmt::Display for InventorySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.unmatched_files.is_empty() {
            writeln!(
                f,
                "No DOI or citation key match for the following files. Rename them to their citation keys so they can be indexed:"
            )?;
            for file in &self.unmatched_files {
                writeln!(f, "  {}", file)?;
            }
            writeln!(f)?;
        }
        writeln!(f, "=== Summary ===")?;
        writeln!(f, "Files processed: {}", self.files_processed)?;
        writeln!(f, "Files with extractable DOIs: {}", self.files_with_doi)?;
        writeln!(f, "Files matched by filename: {}", self.files_matched_by_name)?;
        writeln!(f, "Citation keys with DOIs: {}", self.keys_with_doi)?;
        writeln!(f, "Citation keys matched to files: {}", self.keys_with_file)?;
        writeln!(f, "Unique citation combinations: {}", self.unique_combinations)?;
        writeln!(f, "Total citation instances: {}", self.total_instances)?;
        write!(f, "READY: {}, MISSING_FILE: {}", self.ready, self.missing_file)
    }
}
