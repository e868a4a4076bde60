use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::CiteError;

/// `\cite{...}` and `\textcite{...}`; other variants are not inventoried.
static CITE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(?:text)?cite\{([^}]+)\}").expect("Invalid citation regex pattern"));

/// One citation group and every line it appears on.
///
/// The key order is the literal argument order, so `\cite{a,b}` and
/// `\cite{b,a}` are different groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationOccurrence {
    pub keys: Vec<String>,
    pub line_numbers: Vec<usize>,
}

impl CitationOccurrence {
    pub fn keys_label(&self) -> String {
        self.keys.join(",")
    }
}

/// Citation groups of a manuscript in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct CitationIndex {
    occurrences: Vec<CitationOccurrence>,
    positions: HashMap<Vec<String>, usize>,
}

impl CitationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a group on a line. Repeats on the same line count once.
    pub fn record(&mut self, keys: Vec<String>, line_number: usize) {
        match self.positions.get(&keys) {
            Some(&idx) => {
                let lines = &mut self.occurrences[idx].line_numbers;
                if let Err(pos) = lines.binary_search(&line_number) {
                    lines.insert(pos, line_number);
                }
            }
            None => {
                self.positions.insert(keys.clone(), self.occurrences.len());
                self.occurrences.push(CitationOccurrence {
                    keys,
                    line_numbers: vec![line_number],
                });
            }
        }
    }

    pub fn occurrences(&self) -> &[CitationOccurrence] {
        &self.occurrences
    }

    pub fn get(&self, keys: &[String]) -> Option<&CitationOccurrence> {
        self.positions.get(keys).map(|&idx| &self.occurrences[idx])
    }

    pub fn len(&self) -> usize {
        self.occurrences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occurrences.is_empty()
    }

    /// Total number of `(group, line)` pairs.
    pub fn total_instances(&self) -> usize {
        self.occurrences.iter().map(|o| o.line_numbers.len()).sum()
    }

    /// Scan a manuscript file. A missing file yields an empty index.
    pub fn load(path: &Path) -> Result<Self, CiteError> {
        if !path.exists() {
            warn!("Manuscript {} not found", path.display());
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path).map_err(|e| CiteError::io(path, e))?;
        let index = scan_citations(&content);
        info!(
            "Found {} citation groups ({} instances) in {}",
            index.len(),
            index.total_instances(),
            path.display()
        );
        Ok(index)
    }
}

/// Scan manuscript text line by line for citation macros.
///
/// Keys are trimmed; empty keys and `#`-prefixed placeholders are dropped,
/// and an invocation left with no keys contributes nothing. Line numbers are
/// 1-based.
pub fn scan_citations(content: &str) -> CitationIndex {
    let mut index = CitationIndex::new();
    for (idx, line) in content.lines().enumerate() {
        for caps in CITE_REGEX.captures_iter(line) {
            let keys: Vec<String> = caps[1]
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty() && !k.starts_with('#'))
                .map(str::to_string)
                .collect();
            if !keys.is_empty() {
                index.record(keys, idx + 1);
            }
        }
    }
    index
}

/// Manuscript text addressable by 1-based line number.
#[derive(Debug, Clone, Default)]
pub struct ManuscriptLines {
    lines: Vec<String>,
}

impl ManuscriptLines {
    pub fn new(content: &str) -> Self {
        Self {
            lines: content.lines().map(str::to_string).collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, CiteError> {
        let content = fs::read_to_string(path).map_err(|e| CiteError::io(path, e))?;
        Ok(Self::new(&content))
    }

    pub fn get(&self, line_number: usize) -> Option<&str> {
        line_number
            .checked_sub(1)
            .and_then(|idx| self.lines.get(idx))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Trimmed text of the requested lines; out-of-range numbers are skipped.
    pub fn line_contents(&self, line_numbers: &[usize]) -> Vec<(usize, String)> {
        line_numbers
            .iter()
            .filter_map(|&n| self.get(n).map(|text| (n, text.trim().to_string())))
            .collect()
    }
}
