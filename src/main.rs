use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use citecheck::analysis::AnalysisMode;
use citecheck::latex::bbl::BblBibliography;
use citecheck::latex::bibliography::compare_bibliographies;
use citecheck::latex::expand::RefExpander;
use citecheck::latex::glossary::{count_glsdisp, link_glossary_terms, Glossary};
use citecheck::latex::labels::LabelTable;
use citecheck::latex::wiki::{convert_placeholders, to_placeholders};
use citecheck::latex::Bibliography;
use citecheck::pipeline;
use citecheck::sources::Pdftotext;
use citecheck::verification::{ClaudeCli, LlmService};
use citecheck::Config;

/// Citation inventory, verification and publishing helpers for LaTeX manuscripts
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
    /// TOML config file (defaults to ./citecheck.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the citation inventory (default)
    Inventory,
    /// Check READY citations against their source documents
    Verify,
    /// Review manuscript lines for missing citations or wording issues
    Analyze {
        mode: AnalysisMode,
        /// Process only this section
        #[arg(short, long)]
        section: Option<String>,
        /// Model passed to the LLM tool
        #[arg(long)]
        model: Option<String>,
        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },
    /// Expand custom reference macros for EPUB conversion
    Expand {
        input: Option<PathBuf>,
        output: Option<PathBuf>,
        /// LaTeX .aux file (defaults to temp/<paper>.aux)
        #[arg(long)]
        aux: Option<PathBuf>,
        /// biblatex .bbl file (defaults to temp/<paper>.bbl)
        #[arg(long)]
        bbl: Option<PathBuf>,
    },
    /// Replace citation commands with placeholders before wiki conversion
    WikiPre { input: PathBuf, output: PathBuf },
    /// Turn citation placeholders in a MediaWiki file into references
    WikiRefs {
        file: PathBuf,
        #[arg(long)]
        bib: Option<PathBuf>,
    },
    /// Add file fields for matched source documents to the bibliography
    LinkFiles,
    /// Compare two bibliographies, ignoring file fields
    CheckBib { first: PathBuf, second: PathBuf },
    /// Link first mentions of glossary terms in each section
    Glossary {
        #[arg(long, default_value = "glossary.tex")]
        glossary: PathBuf,
        #[arg(long)]
        paper: Option<PathBuf>,
        /// Output file (the paper is rewritten when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Count \glsdisp uses per glossary term
    GlsCount { file: PathBuf },
    /// Download @misc URL sources into the papers directory
    FetchUrls,
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to start async runtime")
}

fn llm_service(config: &Config) -> Arc<dyn LlmService> {
    Arc::new(ClaudeCli::new(config.llm_command.clone()))
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write output to {:?}", path))
}

fn build_artifact(paper: &Path, extension: &str) -> PathBuf {
    let stem = paper.file_stem().map(|s| s.to_os_string()).unwrap_or_else(|| "paper".into());
    Path::new("temp").join(stem).with_extension(extension)
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Configure logging
    if args.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;

    match args.command.unwrap_or(Commands::Inventory) {
        Commands::Inventory => {
            let extractor = Pdftotext::new(config.pdftotext_command.clone());
            let summary = pipeline::generate_inventory(&config, &extractor)?;
            println!("{}", summary);
        }
        Commands::Verify => {
            let summary = runtime()?.block_on(pipeline::run_verification(&config, llm_service(&config)))?;
            println!(
                "Verification complete: {} analyzed, {} skipped, {} failed",
                summary.analyzed, summary.skipped, summary.failed
            );
            println!("Results written to {}", config.analysis_path.display());
        }
        Commands::Analyze {
            mode,
            section,
            model,
            no_color,
        } => {
            let report = runtime()?.block_on(pipeline::run_analysis(
                &config,
                llm_service(&config),
                mode,
                section.as_deref(),
                model,
            ))?;
            let stdout = std::io::stdout();
            report
                .write(&mut stdout.lock(), !no_color)
                .context("Failed to print analysis report")?;
        }
        Commands::Expand {
            input,
            output,
            aux,
            bbl,
        } => {
            let input = input.unwrap_or_else(|| config.paper_path.clone());
            let output = output.unwrap_or_else(|| PathBuf::from("temp/paper_expanded.tex"));
            let aux = aux.unwrap_or_else(|| build_artifact(&config.paper_path, "aux"));
            let bbl = bbl.unwrap_or_else(|| build_artifact(&config.paper_path, "bbl"));

            let labels = LabelTable::load(&aux)?;
            let bibliography = BblBibliography::load(&bbl)?;
            let content = read_file(&input)?;
            let (expanded, stats) = RefExpander::new(&labels, &bibliography).expand(&content);
            write_file(&output, &expanded)?;
            println!("{}", stats);
            println!("Output written to: {}", output.display());
        }
        Commands::WikiPre { input, output } => {
            let content = read_file(&input)?;
            let (converted, count) = to_placeholders(&content);
            write_file(&output, &converted)?;
            println!("Converted {} citations to placeholders: {}", count, output.display());
        }
        Commands::WikiRefs { file, bib } => {
            let bib = bib.unwrap_or_else(|| config.bib_path.clone());
            if !bib.exists() {
                anyhow::bail!("Bibliography {:?} not found", bib);
            }
            let bibliography = Bibliography::load(&bib)?;
            let content = read_file(&file)?;
            let conversion = convert_placeholders(&content, &bibliography);
            write_file(&file, &conversion.content)?;
            println!(
                "Converted {} unique citations ({} unknown) in {}",
                conversion.cited.len(),
                conversion.unknown.len(),
                file.display()
            );
        }
        Commands::LinkFiles => {
            let extractor = Pdftotext::new(config.pdftotext_command.clone());
            let linked = pipeline::link_source_files(&config, &extractor)?;
            println!("Linked {} entries in {}", linked, config.bib_path.display());
        }
        Commands::CheckBib { first, second } => {
            let a = Bibliography::parse(&read_file(&first)?);
            let b = Bibliography::parse(&read_file(&second)?);
            let comparison = compare_bibliographies(&a, &b, &["file"]);
            println!("{}", comparison);
            if comparison.has_differences() {
                std::process::exit(1);
            }
        }
        Commands::Glossary {
            glossary,
            paper,
            output,
        } => {
            let paper = paper.unwrap_or_else(|| config.paper_path.clone());
            let output = output.unwrap_or_else(|| paper.clone());
            let glossary = Glossary::load(&glossary)?;
            let content = read_file(&paper)?;
            let (linked, stats) = link_glossary_terms(&content, &glossary);
            write_file(&output, &linked)?;
            info!("Linked glossary terms written to {}", output.display());
            println!("{}", stats);
        }
        Commands::GlsCount { file } => {
            let content = read_file(&file)?;
            let counts = count_glsdisp(&content);
            for (id, count) in &counts {
                println!("{}: {}", id, count);
            }
            println!("Total: {}", counts.iter().map(|(_, c)| c).sum::<usize>());
        }
        Commands::FetchUrls => {
            let summary = runtime()?.block_on(pipeline::fetch_url_sources(&config))?;
            println!(
                "Completed: {} successful, {} failed, {} skipped",
                summary.successful, summary.failed, summary.skipped
            );
        }
    }

    Ok(())
}
