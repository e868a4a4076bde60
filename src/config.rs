use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::CiteError;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "citecheck.toml";

/// Runtime configuration shared by every tool.
#[derive(Debug, Clone)]
pub struct Config {
    pub paper_path: PathBuf,
    pub bib_path: PathBuf,
    pub papers_dir: PathBuf,
    pub inventory_path: PathBuf,
    pub analysis_path: PathBuf,
    /// Executable of the LLM command-line tool.
    pub llm_command: String,
    /// Model passed to the line analyzer (`--model`).
    pub llm_model: String,
    pub pdftotext_command: String,
    pub paragraph_timeout: Duration,
    pub validation_timeout: Duration,
    pub line_timeout: Duration,
    pub max_pdf_bytes: u64,
    pub batch_size: usize,
    pub fetch_timeout: Duration,
    pub fetch_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paper_path: PathBuf::from("paper.tex"),
            bib_path: PathBuf::from("references.bib"),
            papers_dir: PathBuf::from("papers"),
            inventory_path: PathBuf::from("citation_inventory.md"),
            analysis_path: PathBuf::from("citation_analysis.md"),
            llm_command: "claude".to_string(),
            llm_model: "haiku".to_string(),
            pdftotext_command: "pdftotext".to_string(),
            paragraph_timeout: Duration::from_secs(240),
            validation_timeout: Duration::from_secs(600),
            line_timeout: Duration::from_secs(30),
            max_pdf_bytes: 50 * 1024 * 1024,
            batch_size: 10,
            fetch_timeout: Duration::from_secs(30),
            fetch_delay: Duration::from_secs(1),
        }
    }
}

/// On-disk TOML configuration.
/// All fields are optional so partial configs merge over the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub paths: Option<PathsConfig>,
    pub llm: Option<LlmConfig>,
    pub limits: Option<LimitsConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    pub paper: Option<String>,
    pub bibliography: Option<String>,
    pub papers_dir: Option<String>,
    pub inventory: Option<String>,
    pub analysis: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub command: Option<String>,
    pub model: Option<String>,
    pub paragraph_timeout_secs: Option<u64>,
    pub validation_timeout_secs: Option<u64>,
    pub line_timeout_secs: Option<u64>,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_pdf_size_mb: Option<u64>,
    pub pdftotext_command: Option<String>,
    pub fetch_timeout_secs: Option<u64>,
    pub fetch_delay_millis: Option<u64>,
}

impl Config {
    /// Build the configuration from defaults, an optional TOML file and the environment.
    ///
    /// An explicitly requested file must exist and parse. The implicit
    /// `citecheck.toml` in the working directory is only used when present.
    pub fn load(explicit: Option<&Path>) -> Result<Self, CiteError> {
        let mut config = Config::default();

        let file = match explicit {
            Some(path) => Some(load_from_path(path)?),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Some(load_from_path(default_path)?)
                } else {
                    None
                }
            }
        };
        if let Some(file) = file {
            config.apply_file(file);
        }
        config.apply_env();
        Ok(config)
    }

    /// Overlay values from a parsed config file.
    pub fn apply_file(&mut self, file: ConfigFile) {
        if let Some(paths) = file.paths {
            if let Some(v) = paths.paper {
                self.paper_path = PathBuf::from(v);
            }
            if let Some(v) = paths.bibliography {
                self.bib_path = PathBuf::from(v);
            }
            if let Some(v) = paths.papers_dir {
                self.papers_dir = PathBuf::from(v);
            }
            if let Some(v) = paths.inventory {
                self.inventory_path = PathBuf::from(v);
            }
            if let Some(v) = paths.analysis {
                self.analysis_path = PathBuf::from(v);
            }
        }
        if let Some(llm) = file.llm {
            if let Some(v) = llm.command {
                self.llm_command = v;
            }
            if let Some(v) = llm.model {
                self.llm_model = v;
            }
            if let Some(v) = llm.paragraph_timeout_secs {
                self.paragraph_timeout = Duration::from_secs(v);
            }
            if let Some(v) = llm.validation_timeout_secs {
                self.validation_timeout = Duration::from_secs(v);
            }
            if let Some(v) = llm.line_timeout_secs {
                self.line_timeout = Duration::from_secs(v);
            }
            if let Some(v) = llm.batch_size {
                self.batch_size = v.max(1);
            }
        }
        if let Some(limits) = file.limits {
            if let Some(v) = limits.max_pdf_size_mb {
                self.max_pdf_bytes = v.saturating_mul(1024 * 1024);
            }
            if let Some(v) = limits.pdftotext_command {
                self.pdftotext_command = v;
            }
            if let Some(v) = limits.fetch_timeout_secs {
                self.fetch_timeout = Duration::from_secs(v);
            }
            if let Some(v) = limits.fetch_delay_millis {
                self.fetch_delay = Duration::from_millis(v);
            }
        }
    }

    /// Environment overrides, mostly useful for tests and CI.
    pub fn apply_env(&mut self) {
        if let Ok(command) = std::env::var("CITECHECK_LLM_COMMAND") {
            debug!("LLM command overridden from environment: {}", command);
            self.llm_command = command;
        }
        if let Some(secs) = std::env::var("CITECHECK_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            debug!("LLM timeouts overridden from environment: {}s", secs);
            self.paragraph_timeout = Duration::from_secs(secs);
            self.validation_timeout = Duration::from_secs(secs);
            self.line_timeout = Duration::from_secs(secs);
        }
    }
}

/// Read and parse a TOML config file.
pub fn load_from_path(path: &Path) -> Result<ConfigFile, CiteError> {
    let content = std::fs::read_to_string(path).map_err(|e| CiteError::io(path, e))?;
    let parsed: ConfigFile = toml::from_str(&content)
        .map_err(|e| CiteError::ConfigError(format!("{}: {}", path.display(), e)))?;
    info!("Loaded configuration from {}", path.display());
    Ok(parsed)
}
