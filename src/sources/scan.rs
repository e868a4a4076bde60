use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::{DirEntry, WalkDir};

use crate::error::CiteError;
use crate::sources::doi::find_doi_in_text;

/// Extracts the text of a PDF's first page.
pub trait FirstPageText: Send + Sync {
    fn first_page_text(&self, path: &Path) -> Result<String, CiteError>;
}

/// Runs poppler's `pdftotext` on page one.
#[derive(Debug, Clone)]
pub struct Pdftotext {
    pub command: String,
}

impl Pdftotext {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Default for Pdftotext {
    fn default() -> Self {
        Self::new("pdftotext")
    }
}

impl FirstPageText for Pdftotext {
    fn first_page_text(&self, path: &Path) -> Result<String, CiteError> {
        let output = Command::new(&self.command)
            .args(["-f", "1", "-l", "1"])
            .arg(path.as_os_str())
            .arg("-")
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => CiteError::ToolNotFound(self.command.clone()),
                _ => CiteError::io(path, e),
            })?;

        if !output.status.success() {
            return Err(CiteError::ToolFailed {
                tool: self.command.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// What a directory scan found. Paths are relative to the scanned directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub file_to_doi: BTreeMap<String, String>,
    pub file_to_key: BTreeMap<String, String>,
    pub unmatched: Vec<String>,
    pub files_processed: usize,
}

impl ScanResult {
    pub fn dois_found(&self) -> usize {
        self.file_to_doi.len()
    }

    pub fn filename_matches(&self) -> usize {
        self.file_to_key.len()
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

fn relative_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Walk `dir` and match every file either by DOI or by filename.
///
/// PDFs are searched for a DOI on their first page. Files without a DOI
/// match a citation key when their name without extension equals the key.
/// Everything else is reported as unmatched. Hidden files and directories
/// are skipped. PDFs larger than `max_pdf_bytes` are not read and can only
/// match by filename.
pub fn scan_papers_directory(
    dir: &Path,
    known_keys: &BTreeSet<String>,
    extractor: &dyn FirstPageText,
    max_pdf_bytes: u64,
) -> ScanResult {
    let mut result = ScanResult::default();
    if !dir.is_dir() {
        warn!("Papers directory {} not found", dir.display());
        return result;
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();

    for path in files {
        let name = relative_name(dir, &path);
        result.files_processed += 1;

        if has_extension(&path, "pdf") {
            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            if size > max_pdf_bytes {
                warn!(
                    "Not reading {}: {} MB exceeds the PDF size limit",
                    name,
                    size / (1024 * 1024)
                );
            } else {
                match extractor.first_page_text(&path) {
                    Ok(text) => {
                        if let Some(doi) = find_doi_in_text(&text) {
                            debug!("{} -> DOI {}", name, doi);
                            result.file_to_doi.insert(name, doi);
                            continue;
                        }
                    }
                    Err(e) => warn!("Could not read {}: {}", name, e),
                }
            }
        }

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        if known_keys.contains(stem) {
            debug!("{} -> key {}", name, stem);
            result.file_to_key.insert(name, stem.to_string());
        } else {
            result.unmatched.push(name);
        }
    }

    info!(
        "Scanned {} files: {} DOIs, {} filename matches, {} unmatched",
        result.files_processed,
        result.dois_found(),
        result.filename_matches(),
        result.unmatched.len()
    );
    result
}
