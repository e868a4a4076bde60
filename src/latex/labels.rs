use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::CiteError;

static NEWLABEL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\newlabel\{([^}]+)\}\{\{([^}]*)\}\{([^}]*)\}\{([^}]*)\}")
        .expect("Invalid newlabel regex pattern")
});
static CREF_LABEL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\newlabel\{([^@}]+)@cref\}\{\{(\[([^\]]+)\][^}]*?)([A-Z0-9]+(?:\.[0-9]+)*)\}")
        .expect("Invalid cleveref label regex pattern")
});

/// Number, page and title recorded for a label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelInfo {
    pub number: String,
    pub page: String,
    pub title: String,
}

/// Cross-reference labels read from a LaTeX `.aux` file.
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    pub labels: HashMap<String, LabelInfo>,
    /// Cleveref-formatted references such as `Section 2.1`.
    pub cref_labels: HashMap<String, String>,
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

impl LabelTable {
    pub fn parse(content: &str) -> Self {
        let mut table = Self::default();
        for caps in NEWLABEL_REGEX.captures_iter(content) {
            let name = &caps[1];
            if name.ends_with("@cref") {
                continue;
            }
            table.labels.insert(
                name.to_string(),
                LabelInfo {
                    number: caps[2].to_string(),
                    page: caps[3].to_string(),
                    title: caps[4].to_string(),
                },
            );
        }
        for caps in CREF_LABEL_REGEX.captures_iter(content) {
            table
                .cref_labels
                .insert(caps[1].to_string(), format!("{} {}", capitalize(&caps[3]), &caps[4]));
        }
        table
    }

    /// Load an `.aux` file. A missing file yields an empty table.
    pub fn load(path: &Path) -> Result<Self, CiteError> {
        if !path.exists() {
            warn!(".aux file not found at {}", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| CiteError::io(path, e))?;
        let table = Self::parse(&content);
        info!(
            "Parsed {} labels and {} cref labels from {}",
            table.labels.len(),
            table.cref_labels.len(),
            path.display()
        );
        Ok(table)
    }

    /// Display text for a label: the cleveref form when known, else the bare number.
    pub fn reference_text(&self, label: &str) -> Option<&str> {
        self.cref_labels
            .get(label)
            .map(String::as_str)
            .or_else(|| self.labels.get(label).map(|info| info.number.as_str()))
    }
}
