//! Per-chunk language-model review of manuscript lines.
//!
//! Two modes exist: `citations` flags factual claims that appear to lack a
//! citation, `copyedit` flags awkward wording. Chunks that obviously need no
//! review (comments, bare commands, already cited text) are answered locally.

use log::{debug, info};
use owo_colors::OwoColorize;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::error::CiteError;
use crate::latex::sections::Chunk;
use crate::verification::{LlmRequest, LlmService};

const CITATIONS_PROMPT: &str = "Analyze this text chunk from an academic paper. If it contains a factual claim that:
1. Is NOT common knowledge
2. Is NOT clearly an opinion/interpretation
3. Appears to lack a citation (no \\cite, or \\textcite, or \\ref)

Respond with ONLY:
- \"NEEDS CITATION: [brief explanation]\" if it needs a citation
- \"OK\" if it's fine

Text: ";

const COPYEDIT_PROMPT: &str = "Review this text chunk from an academic paper written in LaTeX and identify any overly complicated or awkward wording.

Respond with ONLY:
- \"OK\" if the text is fine

Otherwise:
- A brief description of each issue

Don't introduce your list, just return the list.

Text: ";

/// Commands that carry no prose for the copyedit mode.
const PURE_COMMANDS: [&str; 11] = [
    "\\begin{",
    "\\end{",
    "\\label{",
    "\\ref{",
    "\\chapter{",
    "\\section{",
    "\\subsection{",
    "\\subsubsection{",
    "\\includegraphics",
    "\\input{",
    "\\include{",
];

const RULE_WIDTH: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AnalysisMode {
    /// Check for missing citations
    Citations,
    /// Wording and style suggestions
    Copyedit,
}

impl AnalysisMode {
    pub fn prompt(&self) -> &'static str {
        match self {
            AnalysisMode::Citations => CITATIONS_PROMPT,
            AnalysisMode::Copyedit => COPYEDIT_PROMPT,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            AnalysisMode::Citations => "CITATION ISSUES FOUND",
            AnalysisMode::Copyedit => "COPYEDIT SUGGESTIONS",
        }
    }

    pub fn success_message(&self) -> &'static str {
        match self {
            AnalysisMode::Citations => "No citation issues found!",
            AnalysisMode::Copyedit => "No copyedit issues found!",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AnalysisMode::Citations => "citations",
            AnalysisMode::Copyedit => "copyedit",
        }
    }

    /// True when a chunk can be answered `OK` without asking the model.
    pub fn skips(&self, text: &str) -> bool {
        if text.trim().is_empty() || text.split('\n').all(|l| l.trim().starts_with('%')) {
            return true;
        }
        let lines: Vec<&str> = text.split('\n').map(str::trim).filter(|l| !l.is_empty()).collect();
        match self {
            AnalysisMode::Citations => {
                lines.iter().all(|l| l.starts_with('\\'))
                    || text.contains("\\cite")
                    || text.contains("\\parencite")
                    || text.contains("\\textcite")
                    || lines.iter().all(|l| l.starts_with("\\label") || l.starts_with("\\ref"))
            }
            AnalysisMode::Copyedit => lines
                .iter()
                .all(|l| PURE_COMMANDS.iter().any(|cmd| l.starts_with(cmd))),
        }
    }
}

/// The model's answer for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkResult {
    pub chunk: Chunk,
    pub response: String,
}

impl ChunkResult {
    pub fn is_issue(&self) -> bool {
        !self.response.starts_with("OK")
    }
}

/// Runs chunks through the model in concurrent batches.
pub struct LineAnalyzer {
    llm: Arc<dyn LlmService>,
    mode: AnalysisMode,
    model: Option<String>,
    timeout: Duration,
    batch_size: usize,
}

impl LineAnalyzer {
    pub fn new(llm: Arc<dyn LlmService>, mode: AnalysisMode, config: &Config) -> Self {
        Self {
            llm,
            mode,
            model: Some(config.llm_model.clone()),
            timeout: config.line_timeout,
            batch_size: config.batch_size.max(1),
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        if model.is_some() {
            self.model = model;
        }
        self
    }

    fn request(&self, text: &str) -> LlmRequest {
        let request = LlmRequest::new(format!("{}{}", self.mode.prompt(), text), self.timeout);
        match &self.model {
            Some(model) => request.with_model(model.clone()),
            None => request,
        }
    }

    async fn analyze_batch(&self, batch: &[Chunk]) -> Vec<String> {
        let mut responses: Vec<Option<String>> = vec![None; batch.len()];
        let mut tasks = JoinSet::new();

        for (idx, chunk) in batch.iter().enumerate() {
            if self.mode.skips(&chunk.text) {
                responses[idx] = Some("OK".to_string());
                continue;
            }
            let llm = Arc::clone(&self.llm);
            let request = self.request(&chunk.text);
            tasks.spawn(async move {
                let response = match llm.complete(request).await {
                    Ok(text) => text,
                    Err(CiteError::Timeout { .. }) => "TIMEOUT".to_string(),
                    Err(e) => format!("ERROR: {}", e),
                };
                (idx, response)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, response)) => responses[idx] = Some(response),
                Err(e) => debug!("Line analysis task failed: {}", e),
            }
        }

        responses
            .into_iter()
            .map(|r| r.unwrap_or_else(|| "ERROR: analysis task did not complete".to_string()))
            .collect()
    }

    /// Analyze every chunk, `batch_size` model calls at a time.
    pub async fn analyze(&self, chunks: Vec<Chunk>) -> Vec<ChunkResult> {
        let mut results = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            if let (Some(first), Some(last)) = (batch.first(), batch.last()) {
                let last_line = last.line_numbers.last().copied().unwrap_or(0);
                info!("Processing chunks covering lines {}-{}", first.first_line(), last_line);
            }
            let responses = self.analyze_batch(batch).await;
            results.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(responses)
                    .map(|(chunk, response)| ChunkResult { chunk, response }),
            );
        }
        results
    }
}

/// Analysis results prepared for display.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub mode: AnalysisMode,
    /// Chunks whose response does not start with `OK`, by first line.
    pub issues: Vec<ChunkResult>,
    pub chunks_analyzed: usize,
    pub lines_analyzed: usize,
}

impl AnalysisReport {
    pub fn new(mode: AnalysisMode, results: Vec<ChunkResult>, lines_analyzed: usize) -> Self {
        let chunks_analyzed = results.len();
        let mut issues: Vec<ChunkResult> = results.into_iter().filter(ChunkResult::is_issue).collect();
        issues.sort_by_key(|r| r.chunk.first_line());
        Self {
            mode,
            issues,
            chunks_analyzed,
            lines_analyzed,
        }
    }

    pub fn write(&self, w: &mut dyn Write, color: bool) -> std::io::Result<()> {
        let rule = "=".repeat(RULE_WIDTH);
        let heading = format!("{}: {}", self.mode.title(), self.issues.len());
        writeln!(w)?;
        if color {
            writeln!(w, "{}", rule.bold())?;
            writeln!(w, "{}", heading.bold())?;
            writeln!(w, "{}", rule.bold())?;
        } else {
            writeln!(w, "{}", rule)?;
            writeln!(w, "{}", heading)?;
            writeln!(w, "{}", rule)?;
        }
        writeln!(w)?;

        for issue in &self.issues {
            let label = format!("{}:", issue.chunk.line_label());
            if color {
                writeln!(w, "{}", label.bold().blue())?;
                writeln!(w, "  {} {}", "Text:".dimmed(), issue.chunk.text.trim())?;
                writeln!(w, "  {}", issue.response.truecolor(255, 135, 0))?;
            } else {
                writeln!(w, "{}", label)?;
                writeln!(w, "  Text: {}", issue.chunk.text.trim())?;
                writeln!(w, "  {}", issue.response)?;
            }
            writeln!(w)?;
        }

        if self.issues.is_empty() {
            if color {
                writeln!(w, "{}", self.mode.success_message().green())?;
            } else {
                writeln!(w, "{}", self.mode.success_message())?;
            }
            return Ok(());
        }

        if color {
            writeln!(w, "{}", rule.bold())?;
        } else {
            writeln!(w, "{}", rule)?;
        }
        writeln!(
            w,
            "Total issues: {} chunks with issues out of {} chunks analyzed ({} total lines)",
            self.issues.len(),
            self.chunks_analyzed,
            self.lines_analyzed
        )
    }
}
