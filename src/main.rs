mod config;
mod criteria;
mod db;
mod dedupe;
mod error;
mod models;
mod normalize;
mod output;
mod pipeline;
mod sources;
mod tailor;

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::{Config, Workspace};
use db::Database;
use dedupe::DedupeLedger;
use output::OutputWriter;
use pipeline::{Pipeline, RunReport};
use sources::{PoliteClient, SearchQuery, build_sources};
use tailor::{TailoringEngine, TextGenerator, create_provider, resolve_model};

#[derive(Parser)]
#[command(name = "prospect")]
#[command(about = "Job application pipeline - discover postings, tailor applications, track outcomes")]
struct Cli {
    /// Override the data directory (default: XDG data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database, config, and data directories
    Init,

    /// Discover postings without applying
    Search {
        /// Keywords to search for (default: config keywords)
        keywords: Vec<String>,

        /// Location to search in (default: first config location)
        #[arg(short, long)]
        location: Option<String>,
    },

    /// Full pipeline: discover, filter, tailor, and log applications
    Run {
        /// Keywords to search for (default: config keywords)
        keywords: Vec<String>,

        /// Location to search in (default: first config location)
        #[arg(short, long)]
        location: Option<String>,

        /// Cap on applications this run (default: config max_applications)
        #[arg(short, long)]
        max: Option<usize>,

        /// Show what would be applied to without generating anything
        #[arg(long)]
        dry_run: bool,
    },

    /// List tracked applications
    List {
        /// Filter by status (pending, applied, interview, rejected, offer, accepted)
        #[arg(short, long)]
        status: Option<String>,

        /// Number of applications to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show application details
    Show {
        /// Application ID
        id: i64,
    },

    /// Update an application's status
    Status {
        /// Application ID
        id: i64,

        /// New status (pending, applied, interview, rejected, offer, accepted)
        status: String,
    },

    /// Show application statistics
    Stats,

    /// Show the applied-posting history
    History {
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Manage the base resume
    Resume {
        #[command(subcommand)]
        command: ResumeCommands,
    },
}

#[derive(Subcommand)]
enum ResumeCommands {
    /// Set the base resume from a plain-text file
    Set {
        /// Path to the resume file
        file: PathBuf,
    },

    /// Show the current base resume
    Show,
}

// Starter template written on init so `run` works before a real resume
// is loaded.
const STARTER_RESUME: &str = "\
[Your Name]
[Email] | [Phone] | [LinkedIn] | [GitHub]

PROFESSIONAL SUMMARY
Experienced professional seeking new opportunities to contribute my skills and grow.

SKILLS
- Programming: Python, JavaScript, SQL
- Tools: Git, VS Code, Linux

EXPERIENCE
[Add your work experience here]

EDUCATION
[Add your education here]
";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("prospect=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let workspace = match &cli.data_dir {
        Some(dir) => Workspace::at(dir),
        None => Workspace::resolve(),
    };

    match cli.command {
        Commands::Init => {
            workspace.ensure_dirs()?;

            let db = Database::open(&workspace.db_path())?;
            db.init()?;
            println!("Database initialized at {}", db.path().display());

            if !workspace.config_path.exists() {
                Config::default().save(&workspace.config_path)?;
                println!("Wrote starter config to {}", workspace.config_path.display());
            }
            if !workspace.base_resume_path().exists() {
                fs::write(workspace.base_resume_path(), STARTER_RESUME)?;
                println!(
                    "Wrote starter resume to {} - replace it with 'prospect resume set <file>'",
                    workspace.base_resume_path().display()
                );
            }
        }

        Commands::Search { keywords, location } => {
            let cfg = Config::load(&workspace.config_path)?;
            let db = open_db(&workspace)?;
            let query = build_query(&cfg, keywords, location);
            let mut dedupe = DedupeLedger::open(&workspace.applied_ledger_path())?;
            let engine = TailoringEngine::new(None, String::new());
            let writer = OutputWriter::new(&workspace.artifacts_dir());
            let criteria = cfg.criteria();

            let mut pipeline = Pipeline {
                sources: build_sources(&cfg.sources, &workspace.snapshots_dir()),
                client: polite_client(&cfg)?,
                dedupe: &mut dedupe,
                db: &db,
                engine: &engine,
                writer: &writer,
                criteria: &criteria,
                runs_dir: workspace.runs_dir(),
                max_applications: cfg.max_applications,
            };

            let mut report = RunReport::default();
            let postings = pipeline.discover(&query, &mut report);

            if postings.is_empty() {
                println!("No postings found.");
            } else {
                println!(
                    "{:<30} {:<20} {:<18} {:<12} {:<10}",
                    "TITLE", "COMPANY", "LOCATION", "SALARY", "SOURCE"
                );
                println!("{}", "-".repeat(94));
                for p in &postings {
                    println!(
                        "{:<30} {:<20} {:<18} {:<12} {:<10}",
                        truncate(&p.title, 28),
                        truncate(&p.company, 18),
                        truncate(p.location.as_deref().unwrap_or("-"), 16),
                        truncate(p.salary.as_deref().unwrap_or("-"), 10),
                        p.source
                    );
                }
            }
            print_report(&report);
        }

        Commands::Run {
            keywords,
            location,
            max,
            dry_run,
        } => {
            let cfg = Config::load(&workspace.config_path)?;
            let db = open_db(&workspace)?;
            let query = build_query(&cfg, keywords, location);

            let base_resume = fs::read_to_string(workspace.base_resume_path()).with_context(|| {
                format!(
                    "Failed to read base resume at {} - run 'prospect init' or 'prospect resume set <file>'",
                    workspace.base_resume_path().display()
                )
            })?;

            let provider = if dry_run { None } else { build_provider(&cfg.model) };
            let engine = TailoringEngine::new(provider, base_resume);
            let writer = OutputWriter::new(&workspace.artifacts_dir());
            let mut dedupe = DedupeLedger::open(&workspace.applied_ledger_path())?;
            let criteria = cfg.criteria();

            let mut pipeline = Pipeline {
                sources: build_sources(&cfg.sources, &workspace.snapshots_dir()),
                client: polite_client(&cfg)?,
                dedupe: &mut dedupe,
                db: &db,
                engine: &engine,
                writer: &writer,
                criteria: &criteria,
                runs_dir: workspace.runs_dir(),
                max_applications: max.unwrap_or(cfg.max_applications),
            };

            let report = pipeline.run(&query, dry_run);

            if dry_run {
                if report.would_apply.is_empty() {
                    println!("Nothing new to apply to.");
                } else {
                    println!("Would apply to:");
                    for line in &report.would_apply {
                        println!("  {}", line);
                    }
                }
            }
            print_report(&report);
        }

        Commands::List { status, limit } => {
            let db = open_db(&workspace)?;
            let apps = db.list(status.as_deref(), limit)?;
            if apps.is_empty() {
                println!("No applications found.");
            } else {
                println!(
                    "{:<6} {:<10} {:<24} {:<28} {:<12}",
                    "ID", "STATUS", "COMPANY", "POSITION", "APPLIED"
                );
                println!("{}", "-".repeat(84));
                for app in apps {
                    println!(
                        "{:<6} {:<10} {:<24} {:<28} {:<12}",
                        app.id,
                        app.status.as_str(),
                        truncate(&app.company, 22),
                        truncate(&app.position, 26),
                        app.date_applied.format("%Y-%m-%d")
                    );
                }
            }
        }

        Commands::Show { id } => {
            let db = open_db(&workspace)?;
            match db.get(id)? {
                Some(app) => {
                    println!("Application #{}", app.id);
                    println!("Company: {}", app.company);
                    println!("Position: {}", app.position);
                    println!("Status: {}", app.status);
                    println!("Applied: {}", app.date_applied.format("%Y-%m-%d %H:%M"));
                    if let Some(url) = &app.job_url {
                        println!("URL: {}", url);
                    }
                    if let Some(salary) = &app.salary_range {
                        println!("Salary: {}", salary);
                    }
                    if let Some(location) = &app.location {
                        println!("Location: {}", location);
                    }
                    if let Some(response) = &app.response {
                        println!("Last response: {}", response.format("%Y-%m-%d %H:%M"));
                    }
                    if let Some(resume) = &app.resume_path {
                        println!("Resume: {}", resume);
                    }
                    if let Some(cover) = &app.cover_letter_path {
                        println!("Cover letter: {}", cover);
                    }
                    if let Some(notes) = &app.notes {
                        println!("Notes: {}", notes);
                    }
                }
                None => println!("Application #{} not found.", id),
            }
        }

        Commands::Status { id, status } => {
            let db = open_db(&workspace)?;
            db.update_status(id, &status)?;
            println!("Updated application #{} to {}", id, status.trim().to_lowercase());
        }

        Commands::Stats => {
            let db = open_db(&workspace)?;
            let stats = db.stats()?;

            println!("Total applications: {}", stats.total);
            println!("This week: {}", stats.this_week);
            if !stats.by_status.is_empty() {
                println!("\nBy status:");
                for (status, count) in &stats.by_status {
                    println!("  {:<10} {}", status.as_str(), count);
                }
            }
            println!("\nResponse rate: {:.1}%", stats.response_rate());
            println!("Interview rate: {:.1}%", stats.interview_rate());
        }

        Commands::History { limit } => {
            let ledger = DedupeLedger::open(&workspace.applied_ledger_path())?;
            if ledger.is_empty() {
                println!("No applied postings recorded.");
            } else {
                println!(
                    "{:<24} {:<28} {:<10} {:<12}",
                    "COMPANY", "POSITION", "PLATFORM", "APPLIED"
                );
                println!("{}", "-".repeat(78));
                for record in ledger.iter().rev().take(limit) {
                    println!(
                        "{:<24} {:<28} {:<10} {:<12}",
                        truncate(&record.company, 22),
                        truncate(&record.position, 26),
                        record.platform,
                        record.applied_date.format("%Y-%m-%d")
                    );
                }
            }
        }

        Commands::Resume { command } => match command {
            ResumeCommands::Set { file } => {
                let content = fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read resume file: {}", file.display()))?;
                if content.trim().is_empty() {
                    return Err(anyhow!("Resume file is empty: {}", file.display()));
                }
                workspace.ensure_dirs()?;
                fs::write(workspace.base_resume_path(), &content)?;
                println!(
                    "Base resume set from {} ({} bytes)",
                    file.display(),
                    content.len()
                );
            }
            ResumeCommands::Show => {
                let path = workspace.base_resume_path();
                let content = fs::read_to_string(&path).with_context(|| {
                    format!("No base resume at {} - run 'prospect init' first", path.display())
                })?;
                println!("{}", content);
            }
        },
    }

    Ok(())
}

fn open_db(workspace: &Workspace) -> Result<Database> {
    let db = Database::open(&workspace.db_path())?;
    db.ensure_initialized()?;
    Ok(db)
}

fn polite_client(cfg: &Config) -> Result<PoliteClient> {
    Ok(PoliteClient::new(
        Duration::from_secs(cfg.request_interval_secs),
        Duration::from_secs(cfg.request_timeout_secs),
    )?)
}

fn build_query(cfg: &Config, keywords: Vec<String>, location: Option<String>) -> SearchQuery {
    SearchQuery {
        keywords: if keywords.is_empty() {
            cfg.keywords.clone()
        } else {
            keywords
        },
        location: location
            .or_else(|| cfg.locations.first().cloned())
            .unwrap_or_else(|| "Remote".to_string()),
    }
}

// Provider construction failure (missing key, unknown model) downgrades
// to template-only tailoring rather than aborting the run.
fn build_provider(model: &str) -> Option<Box<dyn TextGenerator>> {
    let spec = match resolve_model(model) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("Warning: {}. Falling back to template tailoring.", e);
            return None;
        }
    };
    match create_provider(&spec) {
        Ok(provider) => Some(provider),
        Err(e) => {
            eprintln!("Warning: {}. Falling back to template tailoring.", e);
            None
        }
    }
}

fn print_report(report: &RunReport) {
    println!("\nRun report:");
    println!("  Postings found:       {}", report.postings_found);
    if report.extraction_dropped > 0 {
        println!("  Unusable items:       {}", report.extraction_dropped);
    }
    if report.duplicates_skipped > 0 {
        println!("  Already applied:      {}", report.duplicates_skipped);
    }
    if report.filtered_out > 0 {
        println!("  Filtered by criteria: {}", report.filtered_out);
    }
    if report.template_fallbacks > 0 {
        println!("  Template fallbacks:   {}", report.template_fallbacks);
    }
    println!("  Applications created: {}", report.applications_created);

    for (source, strategy) in &report.strategies_used {
        println!("  {} extracted via '{}'", source, strategy);
    }
    for (source, reason) in &report.sources_skipped {
        println!("  Skipped {}: {}", source, reason);
    }
    for note in &report.near_duplicates {
        println!("  Possible duplicate: {}", note);
    }
    for error in &report.errors {
        println!("  Error: {}", error);
    }
    if let Some(path) = &report.postings_file {
        println!("  Postings saved to {}", path.display());
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let clipped: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", clipped)
    }
}
