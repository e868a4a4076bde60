//! Two-stage checking of cited claims against their source documents.
//!
//! Stage one asks the language model to mark the attribution units of each
//! paragraph that rely on a citation group. Stage two hands the marked
//! paragraphs and the source files back to the model for a judgment per line.
//! Citation groups are processed one at a time; results are appended to the
//! analysis report as each group completes.

pub mod llm;
pub mod report;
pub mod segment;

use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::CiteError;
use crate::inventory::InventoryEntry;
use crate::latex::ManuscriptLines;

pub use llm::{ClaudeCli, LlmRequest, LlmService};
pub use report::AnalysisWriter;
pub use segment::{group_into_paragraphs, mark_attribution_units};

/// Output of both stages for one citation group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub marked_paragraphs: Vec<String>,
    pub analysis: String,
}

/// What happened to one inventory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Analyzed,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerificationSummary {
    pub analyzed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl VerificationSummary {
    fn record(&mut self, outcome: &EntryOutcome) {
        match outcome {
            EntryOutcome::Analyzed => self.analyzed += 1,
            EntryOutcome::Skipped(_) => self.skipped += 1,
            EntryOutcome::Failed(_) => self.failed += 1,
        }
    }
}

pub fn validation_prompt(keys: &[String], filenames: &[String], marked_paragraphs: &[String]) -> String {
    format!(
        "You are assessing whether attribution units (a section of a paragraph that relies on a particular set of citations) \
from an academic paper are reasonably justified by their citations.\n\n\
Citation keys: {}\n\
Corresponding files: {}\n\n\
First, read and understand the content of the cited papers. Then evaluate each attribution unit below.\n\n\
Here are the attribution units to evaluate. They are the sections of text between the -> and <- marks. \
There may be multiple units within a paragraph. The whole paragraph is provided for context.\n\n\
{}\n\n\
For each attribution unit, provide your assessment in this format exactly:\n\
Line <line_number>: <✅ or ❌ or ⚠️> <analysis of one or more attribution units in that paragraph>\n\n\
Use ✅ if the cited papers support the claims or if they represent reasonable extrapolations. \
Use ❌ if the papers don't support the claims, explaining why in your own words for the analysis. \
Use ⚠️ for an in-between option.\n\n\
DO NOT ADD ANYTHING ELSE OR EXPLAIN WHAT YOU'RE DOING, unless you run into an error, which you can explain.",
        keys.join(", "),
        filenames.join(", "),
        marked_paragraphs.join("\n\n")
    )
}

/// Resolve an inventory filename against the papers directory.
pub fn resolve_source_file(filename: &str, papers_dir: &Path) -> PathBuf {
    let path = Path::new(filename);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        papers_dir.join(path)
    }
}

/// Drives the two verification stages over inventory entries.
pub struct Verifier {
    llm: Arc<dyn LlmService>,
    manuscript: ManuscriptLines,
    papers_dir: PathBuf,
    writer: AnalysisWriter,
    paragraph_timeout: Duration,
    validation_timeout: Duration,
}

impl Verifier {
    pub fn new(llm: Arc<dyn LlmService>, manuscript: ManuscriptLines, config: &Config) -> Self {
        Self {
            llm,
            manuscript,
            papers_dir: config.papers_dir.clone(),
            writer: AnalysisWriter::new(config.analysis_path.clone()),
            paragraph_timeout: config.paragraph_timeout,
            validation_timeout: config.validation_timeout,
        }
    }

    /// Source files of an entry that exist on disk. Missing ones are logged.
    pub fn existing_sources(&self, entry: &InventoryEntry) -> Vec<PathBuf> {
        entry
            .filenames
            .iter()
            .filter_map(|name| {
                let path = resolve_source_file(name, &self.papers_dir);
                if path.is_file() {
                    Some(path)
                } else {
                    warn!(
                        "Source file {} not found at {}. Check the path or move it to the papers directory",
                        name,
                        path.display()
                    );
                    None
                }
            })
            .collect()
    }

    /// Run both stages for one entry without writing anything.
    pub async fn verify_entry(&self, entry: &InventoryEntry) -> Result<VerificationResult, CiteError> {
        let sources = self.existing_sources(entry);
        if sources.is_empty() {
            return Err(CiteError::NoValidFiles(entry.keys_label()));
        }

        let line_info = self.manuscript.line_contents(&entry.line_numbers);
        let paragraphs = group_into_paragraphs(&line_info);
        let marked = mark_attribution_units(
            Arc::clone(&self.llm),
            &paragraphs,
            &entry.citation_keys,
            self.paragraph_timeout,
        )
        .await?;

        info!("Validating attribution units for {}", entry.keys_label());
        let request = LlmRequest::new(
            validation_prompt(&entry.citation_keys, &entry.filenames, &marked),
            self.validation_timeout,
        )
        .with_attachments(sources);
        let analysis = self.llm.complete(request).await?;
        if analysis.trim().is_empty() {
            return Err(CiteError::EmptyOutput(self.llm.name().to_string()));
        }

        Ok(VerificationResult {
            marked_paragraphs: marked,
            analysis,
        })
    }

    /// Verify one entry and append its analysis.
    ///
    /// Only a missing LLM tool is returned as an error; every other failure
    /// is reported in the outcome so the run can continue.
    pub async fn process_entry(&self, entry: &InventoryEntry) -> Result<EntryOutcome, CiteError> {
        if !entry.is_ready() || entry.filenames.is_empty() {
            return Ok(EntryOutcome::Skipped(format!("status: {}", entry.status)));
        }
        if self.manuscript.line_contents(&entry.line_numbers).is_empty() {
            return Ok(EntryOutcome::Failed("no line contents found".to_string()));
        }

        let result = match self.verify_entry(entry).await {
            Ok(result) => result,
            Err(e @ CiteError::ToolNotFound(_)) => return Err(e),
            Err(e) => return Ok(EntryOutcome::Failed(e.to_string())),
        };

        match self
            .writer
            .append(entry, &result.marked_paragraphs, &result.analysis)
        {
            Ok(()) => Ok(EntryOutcome::Analyzed),
            Err(e) => Ok(EntryOutcome::Failed(format!("error writing analysis: {}", e))),
        }
    }

    /// Process entries strictly in order, one at a time.
    pub async fn run(&self, entries: &[InventoryEntry]) -> Result<VerificationSummary, CiteError> {
        let mut summary = VerificationSummary::default();
        for (i, entry) in entries.iter().enumerate() {
            info!("[{}/{}] Processing entry: {}", i + 1, entries.len(), entry.keys_label());
            let outcome = self.process_entry(entry).await?;
            match &outcome {
                EntryOutcome::Analyzed => info!("Analysis written to {}", self.writer.path().display()),
                EntryOutcome::Skipped(reason) => info!("Skipping verification ({})", reason),
                EntryOutcome::Failed(reason) => warn!("Verification failed for {}: {}", entry.keys_label(), reason),
            }
            summary.record(&outcome);
        }
        Ok(summary)
    }
}
