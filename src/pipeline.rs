//! Entry points that tie the library pieces together for one `Config`.

use anyhow::{Context, Result};
use log::{info, warn};
use std::fs;
use std::sync::Arc;

use crate::analysis::{AnalysisMode, AnalysisReport, LineAnalyzer};
use crate::config::Config;
use crate::inventory::{build_citation_metadata, build_inventory, load_inventory, write_inventory, InventorySummary};
use crate::latex::bibliography::link_bibliography_files;
use crate::latex::sections::{chunk_lines, extract_section, filter_content_lines};
use crate::latex::{Bibliography, CitationIndex, ManuscriptLines};
use crate::sources::fetch::{misc_url_sources, FetchSummary, UrlFetcher};
use crate::sources::{scan_papers_directory, FirstPageText};
use crate::verification::{LlmService, VerificationSummary, Verifier};

/// Scan the bibliography, papers directory and manuscript and write the inventory.
pub fn generate_inventory(config: &Config, extractor: &dyn FirstPageText) -> Result<InventorySummary> {
    info!("Parsing bibliography {}", config.bib_path.display());
    let bibliography = Bibliography::load(&config.bib_path)
        .with_context(|| format!("Failed to read bibliography {}", config.bib_path.display()))?;

    info!("Scanning papers directory {}", config.papers_dir.display());
    let scan = scan_papers_directory(
        &config.papers_dir,
        &bibliography.citation_keys(),
        extractor,
        config.max_pdf_bytes,
    );
    let metadata = build_citation_metadata(&bibliography, &scan, &config.papers_dir);

    info!("Extracting citations from {}", config.paper_path.display());
    let index = CitationIndex::load(&config.paper_path)
        .with_context(|| format!("Failed to read manuscript {}", config.paper_path.display()))?;

    let entries = build_inventory(&index, &metadata);
    write_inventory(&config.inventory_path, &entries)
        .with_context(|| format!("Failed to write inventory {}", config.inventory_path.display()))?;

    Ok(InventorySummary::new(&scan, &bibliography, &metadata, &index, &entries))
}

/// Add `file = {:<path>:}` to every bib entry that matched a source file but links none.
/// Returns the number of entries updated.
pub fn link_source_files(config: &Config, extractor: &dyn FirstPageText) -> Result<usize> {
    let bibliography = Bibliography::load(&config.bib_path)
        .with_context(|| format!("Failed to read bibliography {}", config.bib_path.display()))?;
    let scan = scan_papers_directory(
        &config.papers_dir,
        &bibliography.citation_keys(),
        extractor,
        config.max_pdf_bytes,
    );
    let metadata = build_citation_metadata(&bibliography, &scan, &config.papers_dir);

    let links: Vec<(String, String)> = metadata
        .iter()
        .filter(|(key, _)| bibliography.get(key).map(|e| e.get("file").is_none()).unwrap_or(false))
        .filter_map(|(key, meta)| {
            let path = meta.filepath.as_ref()?;
            let absolute = fs::canonicalize(path).unwrap_or_else(|_| path.clone());
            Some((key.clone(), format!(":{}:", absolute.display())))
        })
        .collect();
    info!("{} bibliography entries can be linked to files", links.len());
    if links.is_empty() {
        return Ok(0);
    }

    let linked = link_bibliography_files(&config.bib_path, &links)
        .with_context(|| format!("Failed to update {}", config.bib_path.display()))?;
    Ok(linked)
}

/// Verify every READY inventory entry, appending to the analysis report.
pub async fn run_verification(config: &Config, llm: Arc<dyn LlmService>) -> Result<VerificationSummary> {
    let entries = load_inventory(&config.inventory_path).with_context(|| {
        format!(
            "Failed to read inventory {}. Run the inventory step first",
            config.inventory_path.display()
        )
    })?;
    let manuscript = ManuscriptLines::load(&config.paper_path)
        .with_context(|| format!("Failed to read manuscript {}", config.paper_path.display()))?;

    info!("Processing {} inventory entries", entries.len());
    let verifier = Verifier::new(llm, manuscript, config);
    let summary = verifier.run(&entries).await?;
    info!(
        "Verification finished: {} analyzed, {} skipped, {} failed",
        summary.analyzed, summary.skipped, summary.failed
    );
    Ok(summary)
}

/// Review manuscript chunks with the line analyzer.
///
/// With a section name only that section is analyzed; otherwise the whole
/// document body outside tables.
pub async fn run_analysis(
    config: &Config,
    llm: Arc<dyn LlmService>,
    mode: AnalysisMode,
    section: Option<&str>,
    model: Option<String>,
) -> Result<AnalysisReport> {
    let content = fs::read_to_string(&config.paper_path)
        .with_context(|| format!("Could not find {}", config.paper_path.display()))?;

    let lines = match section {
        Some(name) => {
            let lines = extract_section(&content, name);
            if lines.is_empty() {
                anyhow::bail!("Section '{}' not found", name);
            }
            lines
        }
        None => filter_content_lines(&content),
    };
    let line_count = lines.len();
    let chunks = chunk_lines(&lines);
    info!(
        "Analyzing {} lines in {} chunks (batches of {}), mode {}",
        line_count,
        chunks.len(),
        config.batch_size,
        mode.name()
    );

    let analyzer = LineAnalyzer::new(llm, mode, config).with_model(model);
    let results = analyzer.analyze(chunks).await;
    Ok(AnalysisReport::new(mode, results, line_count))
}

/// Download `@misc` URL sources into the papers directory.
pub async fn fetch_url_sources(config: &Config) -> Result<FetchSummary> {
    if !config.bib_path.exists() {
        anyhow::bail!("BibTeX file not found: {}", config.bib_path.display());
    }
    let bibliography = Bibliography::load(&config.bib_path)
        .with_context(|| format!("Failed to read bibliography {}", config.bib_path.display()))?;

    let sources = misc_url_sources(&bibliography);
    info!("Found {} @misc entries with URLs but no DOIs", sources.len());
    if sources.is_empty() {
        warn!("No entries to fetch");
        return Ok(FetchSummary::default());
    }

    let fetcher = UrlFetcher::new(config);
    let summary = fetcher
        .fetch_all(&sources, &config.papers_dir)
        .await
        .with_context(|| format!("Failed to prepare {}", config.papers_dir.display()))?;
    Ok(summary)
}
