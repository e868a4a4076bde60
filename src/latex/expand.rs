use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::fmt;

use crate::latex::bbl::BblBibliography;
use crate::latex::labels::LabelTable;

static CREF_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\cref\{([^}]+)\}").expect("Invalid cref regex pattern"));
static COMBINEDREF_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\combinedref\{([^}]+)\}").expect("Invalid combinedref regex pattern"));
static COMBINEDCREF_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\combinedcref\{([^}]+)\}").expect("Invalid combinedcref regex pattern"));
static PROSECITE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\prosecite\{([^}]+)\}").expect("Invalid prosecite regex pattern"));
static TEXTCITE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\textcite\{([^}]+)\}").expect("Invalid textcite regex pattern"));
static TIED_CITE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"~\\(cite|parencite|textcite)\{").expect("Invalid tied citation regex pattern"));

/// Replacement counts per command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpansionStats {
    pub cref: usize,
    pub combinedref: usize,
    pub combinedcref: usize,
    pub prosecite: usize,
    pub textcite: usize,
}

impl fmt::Display for ExpansionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Expansion Statistics:")?;
        writeln!(f, "  \\cref: {} replacements", self.cref)?;
        writeln!(f, "  \\combinedref: {} replacements", self.combinedref)?;
        writeln!(f, "  \\combinedcref: {} replacements", self.combinedcref)?;
        writeln!(f, "  \\prosecite: {} replacements", self.prosecite)?;
        write!(f, "  \\textcite: {} conversions", self.textcite)
    }
}

/// Rewrites custom reference macros into plain LaTeX for EPUB conversion.
pub struct RefExpander<'a> {
    labels: &'a LabelTable,
    bibliography: &'a BblBibliography,
}

impl<'a> RefExpander<'a> {
    pub fn new(labels: &'a LabelTable, bibliography: &'a BblBibliography) -> Self {
        Self { labels, bibliography }
    }

    fn hyperref(&self, label: &str) -> Option<String> {
        self.labels
            .reference_text(label)
            .map(|text| format!("\\hyperref[{}]{{{}}}", label, text))
    }

    pub fn expand_cref(&self, labels_arg: &str) -> String {
        let labels: Vec<&str> = labels_arg.split(',').map(str::trim).collect();
        if let [label] = labels.as_slice() {
            return self
                .hyperref(label)
                .unwrap_or_else(|| format!("\\cref{{{}}}", label));
        }

        let expanded: Vec<String> = labels
            .iter()
            .map(|label| {
                self.hyperref(label)
                    .unwrap_or_else(|| format!("[REF:{}]", label))
            })
            .collect();
        match expanded.as_slice() {
            [first, second] => format!("{} and {}", first, second),
            [head @ .., last] => format!("{}, and {}", head.join(", "), last),
            [] => String::new(),
        }
    }

    pub fn expand_combinedref(&self, label: &str) -> String {
        match self.labels.labels.get(label) {
            Some(info) => format!("\\hyperref[{}]{{{} ({})}}", label, info.number, info.title),
            None => format!("\\combinedref{{{}}}", label),
        }
    }

    pub fn expand_combinedcref(&self, label: &str) -> String {
        let title = self
            .labels
            .labels
            .get(label)
            .map(|info| info.title.as_str())
            .unwrap_or("");
        if title.is_empty() {
            return format!("\\combinedcref{{{}}}", label);
        }
        let formatted = self.labels.reference_text(label).unwrap_or(label);
        format!("\\hyperref[{}]{{{} ({})}}", label, formatted, title)
    }

    pub fn expand_prosecite(&self, key: &str) -> String {
        match self.bibliography.get(key) {
            Some(entry) => format!("{} by {} \\cite{{{}}}", entry.title, entry.authors, key),
            None => format!("[UNKNOWN: {}]", key),
        }
    }

    /// One key becomes `Surname \cite{key}`; several become `\parencite{...}`.
    pub fn expand_textcite(&self, keys_arg: &str) -> String {
        let keys: Vec<&str> = keys_arg.split(',').map(str::trim).collect();
        if let [key] = keys.as_slice() {
            return match self.bibliography.first_author_lastname(key) {
                Some(lastname) => format!("{} \\cite{{{}}}", lastname, key),
                None => format!("\\cite{{{}}}", key),
            };
        }
        format!("\\parencite{{{}}}", keys_arg)
    }

    /// Apply every expansion pass in order and count the replacements.
    pub fn expand(&self, content: &str) -> (String, ExpansionStats) {
        let mut stats = ExpansionStats::default();

        let content = CREF_REGEX.replace_all(content, |caps: &Captures| {
            stats.cref += 1;
            self.expand_cref(&caps[1])
        });
        let content = COMBINEDREF_REGEX.replace_all(&content, |caps: &Captures| {
            stats.combinedref += 1;
            self.expand_combinedref(&caps[1])
        });
        let content = COMBINEDCREF_REGEX.replace_all(&content, |caps: &Captures| {
            stats.combinedcref += 1;
            self.expand_combinedcref(&caps[1])
        });
        let content = PROSECITE_REGEX.replace_all(&content, |caps: &Captures| {
            stats.prosecite += 1;
            self.expand_prosecite(&caps[1])
        });
        let content = TEXTCITE_REGEX.replace_all(&content, |caps: &Captures| {
            stats.textcite += 1;
            self.expand_textcite(&caps[1])
        });
        // Non-breaking spaces before citations render badly in EPUB
        let content = TIED_CITE_REGEX.replace_all(&content, r" \${1}{");

        (content.into_owned(), stats)
    }
}
