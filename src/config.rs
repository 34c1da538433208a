use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::Criteria;

/// Search and pipeline settings, loaded from a JSON config file. Every
/// field has a default so a missing or partial file still yields a
/// runnable config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub keywords: Vec<String>,
    pub locations: Vec<String>,
    pub exclude_companies: Vec<String>,
    pub min_salary: Option<i64>,

    /// Model name handed to the tailoring provider ("gpt-4o", "sonnet", ...).
    pub model: String,
    /// Cap on applications created per run.
    pub max_applications: usize,
    /// Minimum delay between requests to the same host, in seconds.
    pub request_interval_secs: u64,
    /// Per-request timeout, in seconds.
    pub request_timeout_secs: u64,

    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub remoteok: bool,
    /// Mirror endpoints for the HTML job board, tried in order.
    pub board_mirrors: Vec<String>,
    /// Adzuna is only queried when credentials are present.
    pub adzuna: Option<AdzunaConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdzunaConfig {
    pub app_id: String,
    pub app_key: String,
    #[serde(default = "default_adzuna_country")]
    pub country: String,
}

fn default_adzuna_country() -> String {
    "us".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            locations: vec!["Remote".to_string()],
            exclude_companies: Vec::new(),
            min_salary: None,
            model: "gpt-4o".to_string(),
            max_applications: 10,
            request_interval_secs: 2,
            request_timeout_secs: 20,
            sources: SourcesConfig::default(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            remoteok: true,
            board_mirrors: Vec::new(),
            adzuna: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// The filter criteria slice of the config.
    pub fn criteria(&self) -> Criteria {
        Criteria {
            keywords: self.keywords.clone(),
            exclude_companies: self.exclude_companies.iter().cloned().collect(),
            min_salary: self.min_salary,
            locations: self.locations.clone(),
        }
    }
}

/// On-disk layout: config file plus a data directory holding the
/// application database, the applied ledger, the base resume, and the
/// per-run output directories.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Workspace {
    /// Resolve against XDG directories, falling back to ./prospect-data
    /// when no home directory is available.
    pub fn resolve() -> Self {
        if let Some(dirs) = directories::ProjectDirs::from("", "", "prospect") {
            Self {
                config_path: dirs.config_dir().join("config.json"),
                data_dir: dirs.data_dir().to_path_buf(),
            }
        } else {
            Self {
                config_path: PathBuf::from("prospect-data/config.json"),
                data_dir: PathBuf::from("prospect-data"),
            }
        }
    }

    /// Workspace rooted at an explicit directory (used by tests and the
    /// --data-dir flag).
    pub fn at(dir: &Path) -> Self {
        Self {
            config_path: dir.join("config.json"),
            data_dir: dir.to_path_buf(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("applications.db")
    }

    pub fn applied_ledger_path(&self) -> PathBuf {
        self.data_dir.join("applied_jobs.json")
    }

    pub fn base_resume_path(&self) -> PathBuf {
        self.data_dir.join("base_resume.txt")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.data_dir.join("runs")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    /// Create every directory the pipeline writes into.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.data_dir,
            &self.artifacts_dir(),
            &self.runs_dir(),
            &self.snapshots_dir(),
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}
