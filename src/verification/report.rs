use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::CiteError;
use crate::inventory::InventoryEntry;

static JUDGMENT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Line (\d+): (.+)").expect("Invalid judgment regex pattern"));
static LINE_PREFIX_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Line (\d+):").expect("Invalid line prefix regex pattern"));
static MARKER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"->(.*?)<-").expect("Invalid attribution marker regex pattern"));

/// Per-line judgments from a validation response, keyed by line number.
pub fn parse_judgments(analysis: &str) -> HashMap<usize, String> {
    analysis
        .lines()
        .filter_map(|line| {
            let caps = JUDGMENT_REGEX.captures(line.trim())?;
            let number = caps[1].parse::<usize>().ok()?;
            Some((number, caps[2].to_string()))
        })
        .collect()
}

/// Markdown section for one verified citation group.
pub fn render_analysis(entry: &InventoryEntry, marked_paragraphs: &[String], analysis: &str) -> String {
    let judgments = parse_judgments(analysis);
    let lines: Vec<String> = entry.line_numbers.iter().map(|n| n.to_string()).collect();

    let mut out = String::new();
    out.push_str(&format!("## {}\n\n", entry.citation_keys.join(", ")));
    out.push_str(&format!("**Files:** {}\n", entry.filenames.join(", ")));
    out.push_str(&format!("**Lines:** {}\n\n", lines.join(", ")));

    for paragraph in marked_paragraphs {
        for line in paragraph.lines().filter(|l| !l.trim().is_empty()) {
            let emphasised = MARKER_REGEX.replace_all(line, "**$1**");
            out.push_str(&format!("*{}*\n", emphasised));
            let judgment = LINE_PREFIX_REGEX
                .captures(line)
                .and_then(|caps| caps[1].parse::<usize>().ok())
                .and_then(|n| judgments.get(&n));
            if let Some(judgment) = judgment {
                out.push_str(&format!("  {}\n", judgment));
            }
            out.push('\n');
        }
        out.push('\n');
    }
    out.push_str("---\n\n");
    out
}

/// Appends verification results to the analysis report.
#[derive(Debug, Clone)]
pub struct AnalysisWriter {
    path: PathBuf,
}

impl AnalysisWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one section and flush, so completed work survives an interrupted run.
    pub fn append(&self, entry: &InventoryEntry, marked_paragraphs: &[String], analysis: &str) -> Result<(), CiteError> {
        let section = render_analysis(entry, marked_paragraphs, analysis);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CiteError::io(&self.path, e))?;
        file.write_all(section.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| CiteError::io(&self.path, e))
    }
}
