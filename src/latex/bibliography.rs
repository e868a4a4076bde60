use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::CiteError;
use crate::latex::{find_matching_brace, normalize_whitespace};

static BIBTEX_HEADER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"@(\w+)\s*\{\s*([^,\s]+)\s*,").expect("Invalid BibTeX header regex pattern")
});

/// Block types that carry no citable entry.
const NON_ENTRY_TYPES: [&str; 3] = ["comment", "preamble", "string"];

/// Custom bibliography entry structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BibEntry {
    pub key: String,
    pub entry_type: String,
    pub fields: HashMap<String, String>,
}

/// Builder for BibEntry to allow for cleaner creation
pub struct BibEntryBuilder {
    key: String,
    entry_type: String,
    fields: HashMap<String, String>,
}

impl BibEntryBuilder {
    /// Create a new BibEntryBuilder with the required key and entry type
    pub fn new(key: impl Into<String>, entry_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            entry_type: entry_type.into().to_lowercase(),
            fields: HashMap::new(),
        }
    }

    /// Add a field to the BibEntry. Field names are stored lower-cased.
    pub fn field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(field.into().to_lowercase(), value.into());
        self
    }

    /// Add multiple fields from an iterator of (field, value) pairs
    pub fn fields<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (field, value) in fields {
            self.fields.insert(field.into().to_lowercase(), value.into());
        }
        self
    }

    pub fn build(self) -> BibEntry {
        BibEntry {
            key: self.key,
            entry_type: self.entry_type,
            fields: self.fields,
        }
    }
}

impl BibEntry {
    /// Create a new BibEntry using the builder pattern
    pub fn builder(key: impl Into<String>, entry_type: impl Into<String>) -> BibEntryBuilder {
        BibEntryBuilder::new(key, entry_type)
    }

    pub fn get(&self, field: &str) -> Option<&String> {
        self.fields.get(field)
    }

    pub fn doi(&self) -> Option<&str> {
        self.get("doi").map(String::as_str).filter(|d| !d.is_empty())
    }

    /// Paths listed in the `file` field.
    ///
    /// Understands the reference-manager forms `:path:`, `:path:pdf`,
    /// `desc:path:type` and a plain path. Several files are separated by `;`.
    pub fn file_paths(&self) -> Vec<PathBuf> {
        let Some(value) = self.get("file") else {
            return Vec::new();
        };
        value
            .split(';')
            .filter_map(|item| {
                let item = item.trim();
                let parts: Vec<&str> = item.split(':').collect();
                let path = if parts.len() >= 3 {
                    parts[1..parts.len() - 1].join(":")
                } else {
                    item.trim_matches(':').to_string()
                };
                let path = path.trim();
                if path.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(path))
                }
            })
            .collect()
    }
}

/// Location of one entry inside the source text.
#[derive(Debug, Clone)]
struct EntrySpan {
    entry_type: String,
    key: String,
    /// Offset just past the header's trailing comma.
    body_start: usize,
    /// Offset where the body stops (the closing brace when `closed`).
    body_end: usize,
    closed: bool,
}

/// Bibliography collection
#[derive(Default, Clone)]
pub struct Bibliography {
    pub entries: HashMap<String, BibEntry>,
}

impl fmt::Debug for Bibliography {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bibliography")
            .field("entries_count", &self.entries.len())
            .field("entries", &self.entries)
            .finish()
    }
}

impl Bibliography {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, entry: BibEntry) {
        if let Some(previous) = self.entries.insert(entry.key.clone(), entry) {
            debug!("Duplicate bibliography key '{}' overwritten", previous.key);
        }
    }

    pub fn get(&self, key: &str) -> Option<&BibEntry> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BibEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse BibTeX source text.
    ///
    /// Entry bodies are delimited by brace counting from the header, so
    /// nested braces inside field values never end an entry early. An entry
    /// whose closing brace is missing runs to the next header (or the end of
    /// the text). Parsing is deterministic; duplicate keys keep the last entry.
    pub fn parse(content: &str) -> Self {
        let mut bibliography = Self::new();
        for span in locate_entries(content) {
            let mut builder = BibEntryBuilder::new(span.key.clone(), span.entry_type.clone());
            builder = builder.fields(parse_fields(&content[span.body_start..span.body_end]));
            bibliography.insert(builder.build());
        }
        bibliography
    }

    /// Load and parse a `.bib` file. A missing file yields an empty bibliography.
    pub fn load(path: &Path) -> Result<Self, CiteError> {
        if !path.exists() {
            warn!("Bibliography file {} not found", path.display());
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path).map_err(|e| CiteError::io(path, e))?;
        let bibliography = Self::parse(&content);
        info!(
            "Loaded {} bibliography entries from {}",
            bibliography.len(),
            path.display()
        );
        Ok(bibliography)
    }

    /// All citation keys, sorted.
    pub fn citation_keys(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    /// `key -> DOI` for every entry that declares a DOI.
    pub fn doi_map(&self) -> HashMap<String, String> {
        self.entries
            .values()
            .filter_map(|entry| entry.doi().map(|doi| (entry.key.clone(), doi.to_string())))
            .collect()
    }
}

/// Convenience wrapper around [`Bibliography::parse`].
pub fn parse_bibtex(content: &str) -> Bibliography {
    Bibliography::parse(content)
}

fn locate_entries(content: &str) -> Vec<EntrySpan> {
    let headers: Vec<(String, String, usize, usize)> = BIBTEX_HEADER_REGEX
        .captures_iter(content)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((
                caps[1].to_lowercase(),
                caps[2].to_string(),
                whole.start(),
                whole.end(),
            ))
        })
        .collect();

    let mut spans = Vec::new();
    let mut resume_at = 0;
    for (idx, (entry_type, key, start, body_start)) in headers.iter().enumerate() {
        // Header text that sits inside a previous entry's body is not a header
        if *start < resume_at {
            continue;
        }
        if NON_ENTRY_TYPES.contains(&entry_type.as_str()) {
            continue;
        }
        let open = content[*start..]
            .find('{')
            .map(|offset| start + offset + 1)
            .unwrap_or(*body_start);
        let next_header = headers
            .get(idx + 1..)
            .and_then(|rest| rest.iter().map(|h| h.2).find(|s| *s > *start))
            .unwrap_or(content.len());

        let (body_end, closed) = match find_matching_brace(content, open) {
            Some(close) => (close, true),
            None => {
                warn!("Entry '{}' has no closing brace; truncating", key);
                (next_header.max(*body_start), false)
            }
        };
        resume_at = if closed { body_end + 1 } else { body_end };
        spans.push(EntrySpan {
            entry_type: entry_type.clone(),
            key: key.clone(),
            body_start: *body_start,
            body_end,
            closed,
        });
    }
    spans
}

/// Parse `name = {value}`, `name = "value"` and `name = bare` assignments.
fn parse_fields(body: &str) -> Vec<(String, String)> {
    let bytes = body.as_bytes();
    let mut fields = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        // Skip separators
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b',') {
            i += 1;
        }
        let name_start = i;
        while i < bytes.len()
            && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'_' | b'-' | b':' | b'.'))
        {
            i += 1;
        }
        if i == name_start {
            // Not a field name; skip to the next separator
            i += 1;
            continue;
        }
        let name = body[name_start..i].to_lowercase();
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b'=' {
            continue;
        }
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }

        let value = match bytes[i] {
            b'{' => {
                let close = find_matching_brace(body, i + 1).unwrap_or(body.len());
                let value = &body[i + 1..close];
                i = close + 1;
                value
            }
            b'"' => {
                let start = i + 1;
                let mut j = start;
                let mut depth = 0usize;
                while j < bytes.len() {
                    match bytes[j] {
                        b'{' => depth += 1,
                        b'}' => depth = depth.saturating_sub(1),
                        b'\\' => j += 1,
                        b'"' if depth == 0 => break,
                        _ => {}
                    }
                    j += 1;
                }
                let end = j.min(bytes.len());
                i = end + 1;
                &body[start..end]
            }
            _ => {
                let start = i;
                while i < bytes.len() && bytes[i] != b',' && bytes[i] != b'\n' {
                    i += 1;
                }
                &body[start..i]
            }
        };
        fields.push((name, normalize_whitespace(value)));
    }
    fields
}

/// Add a `file` field to the entry with the given key.
///
/// Returns `None` when the entry is missing, already has a `file` field, or
/// has no closing brace to anchor the insertion.
pub fn link_file(content: &str, key: &str, file_value: &str) -> Option<String> {
    let span = locate_entries(content).into_iter().find(|s| s.key == key)?;
    if !span.closed {
        return None;
    }
    let body = &content[span.body_start..span.body_end];
    if parse_fields(body).iter().any(|(name, _)| name == "file") {
        debug!("Entry '{}' already links a file", key);
        return None;
    }

    let before = content[..span.body_end].trim_end();
    let separator = if before.ends_with(',') { "" } else { "," };
    let mut updated = String::with_capacity(content.len() + file_value.len() + 16);
    updated.push_str(before);
    updated.push_str(separator);
    updated.push_str(&format!("\n  file = {{{}}}\n}}", file_value));
    updated.push_str(&content[span.body_end + 1..]);
    Some(updated)
}

/// Apply several `(key, file value)` links to a `.bib` file, rewriting it atomically.
/// Returns how many entries were linked.
pub fn link_bibliography_files(path: &Path, links: &[(String, String)]) -> Result<usize, CiteError> {
    let mut content = fs::read_to_string(path).map_err(|e| CiteError::io(path, e))?;
    let mut linked = 0;
    for (key, value) in links {
        if let Some(updated) = link_file(&content, key, value) {
            info!("Linked {} -> {}", key, value);
            content = updated;
            linked += 1;
        }
    }
    if linked > 0 {
        write_atomically(path, &content)?;
    }
    Ok(linked)
}

/// Replace a file's contents through a temporary file in the same directory.
pub fn write_atomically(path: &Path, content: &str) -> Result<(), CiteError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| CiteError::io(dir, e))?;
    tmp.write_all(content.as_bytes())
        .map_err(|e| CiteError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| CiteError::io(path, e.error))?;
    Ok(())
}

/// One mismatch between two bibliographies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldDifference {
    OnlyInFirst { key: String, field: String },
    OnlyInSecond { key: String, field: String },
    Changed {
        key: String,
        field: String,
        first: String,
        second: String,
    },
}

/// Result of comparing two bibliographies.
#[derive(Debug, Clone, Default)]
pub struct BibComparison {
    pub first_count: usize,
    pub second_count: usize,
    pub only_in_first: Vec<String>,
    pub only_in_second: Vec<String>,
    pub differences: Vec<FieldDifference>,
    pub first_with_file: usize,
    pub second_with_file: usize,
}

impl BibComparison {
    pub fn has_differences(&self) -> bool {
        !self.only_in_first.is_empty() || !self.only_in_second.is_empty() || !self.differences.is_empty()
    }
}

fn truncate(value: &str) -> String {
    if value.chars().count() > 100 {
        format!("{}...", value.chars().take(100).collect::<String>())
    } else {
        value.to_string()
    }
}

impl fmt::Display for BibComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Entries: {} vs {}", self.first_count, self.second_count)?;
        for key in &self.only_in_first {
            writeln!(f, "Only in first: {}", key)?;
        }
        for key in &self.only_in_second {
            writeln!(f, "Only in second: {}", key)?;
        }
        for difference in &self.differences {
            match difference {
                FieldDifference::OnlyInFirst { key, field } => {
                    writeln!(f, "{}: field '{}' only in first", key, field)?
                }
                FieldDifference::OnlyInSecond { key, field } => {
                    writeln!(f, "{}: field '{}' only in second", key, field)?
                }
                FieldDifference::Changed {
                    key,
                    field,
                    first,
                    second,
                } => writeln!(
                    f,
                    "{}: field '{}' differs\n  first:  {}\n  second: {}",
                    key,
                    field,
                    truncate(first),
                    truncate(second)
                )?,
            }
        }
        writeln!(
            f,
            "Entries with file field: {} vs {}",
            self.first_with_file, self.second_with_file
        )?;
        if self.has_differences() {
            write!(f, "Bibliographies differ")
        } else {
            write!(f, "Bibliographies are identical apart from ignored fields")
        }
    }
}

/// Compare two bibliographies, skipping the named fields (e.g. `file`).
pub fn compare_bibliographies(first: &Bibliography, second: &Bibliography, ignore: &[&str]) -> BibComparison {
    let first_keys = first.citation_keys();
    let second_keys = second.citation_keys();
    let mut comparison = BibComparison {
        first_count: first.len(),
        second_count: second.len(),
        only_in_first: first_keys.difference(&second_keys).cloned().collect(),
        only_in_second: second_keys.difference(&first_keys).cloned().collect(),
        first_with_file: first.iter().filter(|e| e.get("file").is_some()).count(),
        second_with_file: second.iter().filter(|e| e.get("file").is_some()).count(),
        ..Default::default()
    };

    for key in first_keys.intersection(&second_keys) {
        let (Some(a), Some(b)) = (first.get(key), second.get(key)) else {
            continue;
        };
        let relevant = |entry: &BibEntry| -> BTreeSet<String> {
            entry
                .fields
                .keys()
                .filter(|name| !ignore.contains(&name.as_str()))
                .cloned()
                .collect()
        };
        let a_fields = relevant(a);
        let b_fields = relevant(b);
        for field in a_fields.difference(&b_fields) {
            comparison.differences.push(FieldDifference::OnlyInFirst {
                key: key.clone(),
                field: field.clone(),
            });
        }
        for field in b_fields.difference(&a_fields) {
            comparison.differences.push(FieldDifference::OnlyInSecond {
                key: key.clone(),
                field: field.clone(),
            });
        }
        for field in a_fields.intersection(&b_fields) {
            let left = normalize_whitespace(&a.fields[field]);
            let right = normalize_whitespace(&b.fields[field]);
            if left != right {
                comparison.differences.push(FieldDifference::Changed {
                    key: key.clone(),
                    field: field.clone(),
                    first: left,
                    second: right,
                });
            }
        }
    }
    comparison
}
