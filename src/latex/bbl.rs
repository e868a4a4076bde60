use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::CiteError;
use crate::latex::{braced_argument, find_matching_brace, strip_latex};

static ENTRY_HEADER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\entry\{([^}]+)\}\{[^}]+\}\{[^}]*\}\{[^}]*\}").expect("Invalid bbl entry regex pattern")
});
static AUTHOR_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\name\{author\}\{(\d+)\}\{[^}]*\}").expect("Invalid bbl author regex pattern")
});
static AUTHOR_SPLIT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[^}]*hash=").expect("Invalid bbl author split regex pattern"));

const UNKNOWN_AUTHOR: &str = "Unknown Author";

/// One biblatex entry from a `.bbl` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BblEntry {
    pub key: String,
    pub title: String,
    /// `A`, `A and B`, or `A et al.`
    pub authors: String,
    /// Position in the bibliography, starting at 1.
    pub number: usize,
    pub first_author_family: Option<String>,
}

/// Entries of a biblatex-generated `.bbl` file.
#[derive(Debug, Clone, Default)]
pub struct BblBibliography {
    pub entries: HashMap<String, BblEntry>,
}

/// Value of `\field{name}{...}` with nested braces intact.
fn extract_field<'a>(name: &str, content: &'a str) -> Option<&'a str> {
    let marker = format!("\\field{{{}}}", name);
    let start = content.find(&marker)? + marker.len();
    braced_argument(content, start).map(|(value, _)| value)
}

/// Value of `family={...}` or `given={...}` inside one author block.
fn extract_name_part(part: &str, block: &str) -> Option<String> {
    let marker = format!("{}={{", part);
    let start = block.find(&marker)? + marker.len();
    let close = find_matching_brace(block, start)?;
    let mut value = &block[start..close];
    // Institutional names are double-braced
    if value.starts_with('{') && value.ends_with('}') && value.len() >= 2 {
        value = &value[1..value.len() - 1];
    }
    Some(value.to_string())
}

/// Author display string and first author family name.
fn extract_authors(content: &str) -> (String, Option<String>) {
    let Some(header) = AUTHOR_NAME_REGEX.find(content) else {
        return (UNKNOWN_AUTHOR.to_string(), None);
    };
    let Some((block, _)) = braced_argument(content, header.end()) else {
        return (UNKNOWN_AUTHOR.to_string(), None);
    };

    let mut starts: Vec<usize> = AUTHOR_SPLIT_REGEX.find_iter(block).map(|m| m.start()).collect();
    starts.push(block.len());

    let mut authors = Vec::new();
    let mut first_family = None;
    for window in starts.windows(2) {
        let chunk = &block[window[0]..window[1]];
        let Some(family) = extract_name_part("family", chunk) else {
            continue;
        };
        if first_family.is_none() {
            first_family = Some(family.clone());
        }
        match extract_name_part("given", chunk) {
            Some(given) => authors.push(format!("{} {}", given, family)),
            None => authors.push(family),
        }
    }

    let formatted = match authors.len() {
        0 => return (UNKNOWN_AUTHOR.to_string(), None),
        1 => authors[0].clone(),
        2 => format!("{} and {}", authors[0], authors[1]),
        _ => format!("{} et al.", authors[0]),
    };
    (formatted, first_family)
}

impl BblBibliography {
    /// Parse `\entry{key}{type}{}{}` blocks in order, numbering them from 1.
    pub fn parse(content: &str) -> Self {
        let headers: Vec<(String, usize, usize)> = ENTRY_HEADER_REGEX
            .captures_iter(content)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some((caps[1].to_string(), whole.start(), whole.end()))
            })
            .collect();

        let mut bibliography = Self::default();
        for (idx, (key, _, body_start)) in headers.iter().enumerate() {
            let mut body_end = headers.get(idx + 1).map(|h| h.1).unwrap_or(content.len());
            if let Some(offset) = content[*body_start..body_end].find("\\enddatalist") {
                body_end = body_start + offset;
            }
            let body = &content[*body_start..body_end];

            let title = extract_field("title", body)
                .map(strip_latex)
                .unwrap_or_else(|| key.clone());
            let (authors, first_author_family) = extract_authors(body);
            bibliography.entries.insert(
                key.clone(),
                BblEntry {
                    key: key.clone(),
                    title,
                    authors,
                    number: idx + 1,
                    first_author_family,
                },
            );
        }
        bibliography
    }

    /// Load a `.bbl` file. A missing file yields an empty bibliography.
    pub fn load(path: &Path) -> Result<Self, CiteError> {
        if !path.exists() {
            warn!(".bbl file not found at {}", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| CiteError::io(path, e))?;
        let bibliography = Self::parse(&content);
        info!(
            "Parsed {} bibliography entries from {}",
            bibliography.entries.len(),
            path.display()
        );
        Ok(bibliography)
    }

    pub fn get(&self, key: &str) -> Option<&BblEntry> {
        self.entries.get(key)
    }

    pub fn first_author_lastname(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .and_then(|entry| entry.first_author_family.as_deref())
    }
}
