use chrono::Utc;
use std::fs;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::criteria;
use crate::db::Database;
use crate::dedupe::DedupeLedger;
use crate::error::Result;
use crate::models::{AppliedRecord, Criteria, JobPosting, NewApplication, TailoringStrategy};
use crate::normalize;
use crate::output::OutputWriter;
use crate::sources::{PoliteClient, SearchQuery, SourceAdapter};
use crate::tailor::TailoringEngine;

/// Per-run degradation report. Every run produces a result set plus these
/// counts; a shortfall is always explained, never silent.
#[derive(Debug, Default)]
pub struct RunReport {
    pub postings_found: usize,
    pub extraction_dropped: usize,
    pub duplicates_skipped: usize,
    pub filtered_out: usize,
    pub template_fallbacks: usize,
    pub applications_created: usize,
    /// (source, reason) for sources skipped entirely this run.
    pub sources_skipped: Vec<(String, String)>,
    /// (source, strategy) that produced each source's batch.
    pub strategies_used: Vec<(String, String)>,
    /// Advisory near-duplicate notes (applied before under a drifted title).
    pub near_duplicates: Vec<String>,
    /// Contained per-application failures (artifact or ledger writes).
    pub errors: Vec<String>,
    /// Postings that would have been applied to in a dry run.
    pub would_apply: Vec<String>,
    pub postings_file: Option<PathBuf>,
}

/// One search session. Sequential by design: sources and postings are
/// processed one at a time with polite pacing toward the external hosts.
pub struct Pipeline<'a> {
    pub sources: Vec<Box<dyn SourceAdapter>>,
    pub client: PoliteClient,
    pub dedupe: &'a mut DedupeLedger,
    pub db: &'a Database,
    pub engine: &'a TailoringEngine,
    pub writer: &'a OutputWriter,
    pub criteria: &'a Criteria,
    pub runs_dir: PathBuf,
    pub max_applications: usize,
}

impl Pipeline<'_> {
    /// Fetch and normalize postings from every configured source.
    /// Unavailable sources and unusable items are absorbed into the
    /// report; discovery itself never fails.
    pub fn discover(&mut self, query: &SearchQuery, report: &mut RunReport) -> Vec<JobPosting> {
        let mut postings = Vec::new();

        for source in &self.sources {
            match source.fetch(query, &mut self.client) {
                Ok(batch) => {
                    report
                        .strategies_used
                        .push((source.name().to_string(), batch.strategy.to_string()));
                    for raw in batch.postings {
                        match normalize::normalize(raw) {
                            Ok(posting) => postings.push(posting),
                            Err(e) => {
                                warn!(source = source.name(), error = %e, "dropping item");
                                report.extraction_dropped += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(source = source.name(), error = %e, "skipping source");
                    report
                        .sources_skipped
                        .push((source.name().to_string(), e.to_string()));
                }
            }
        }

        report.postings_found = postings.len();
        if !postings.is_empty() {
            match self.save_postings(&postings) {
                Ok(path) => report.postings_file = Some(path),
                Err(e) => report
                    .errors
                    .push(format!("failed to save postings file: {}", e)),
            }
        }
        postings
    }

    // One postings file per run, ordered, human-diffable.
    fn save_postings(&self, postings: &[JobPosting]) -> std::io::Result<PathBuf> {
        let path = self
            .runs_dir
            .join(format!("found_jobs_{}.json", Utc::now().format("%Y%m%d_%H%M%S")));
        fs::create_dir_all(&self.runs_dir)?;
        let text = serde_json::to_string_pretty(postings)?;
        fs::write(&path, text)?;
        Ok(path)
    }

    /// Full session: discover, filter, tailor, persist. Applications are
    /// capped at `max_applications`; with `dry_run` the pipeline stops
    /// short of tailoring and records what it would have applied to.
    pub fn run(&mut self, query: &SearchQuery, dry_run: bool) -> RunReport {
        let mut report = RunReport::default();
        let postings = self.discover(query, &mut report);

        for posting in postings {
            let applied = if dry_run {
                report.would_apply.len()
            } else {
                report.applications_created
            };
            if applied >= self.max_applications {
                break;
            }

            // Cheap checks first: never spend generation budget on a
            // posting we already acted on or do not want.
            if self.dedupe.has(&posting.canonical_id) {
                report.duplicates_skipped += 1;
                continue;
            }
            if !criteria::matches(&posting, self.criteria) {
                report.filtered_out += 1;
                continue;
            }
            if let Some(previous) = self.dedupe.similar_to(&posting.company, &posting.title) {
                report.near_duplicates.push(format!(
                    "\"{}\" at {} resembles already-applied \"{}\"",
                    posting.title, posting.company, previous.position
                ));
            }

            if dry_run {
                report
                    .would_apply
                    .push(format!("{} at {}", posting.title, posting.company));
                continue;
            }

            match self.apply(&posting) {
                Ok(strategy) => {
                    if strategy == TailoringStrategy::Template {
                        report.template_fallbacks += 1;
                    }
                    report.applications_created += 1;
                }
                Err(e) => {
                    // Fatal to this application only; the ledger stays in
                    // its last consistent state and the run continues.
                    warn!(company = %posting.company, title = %posting.title, error = %e,
                          "application aborted");
                    report.errors.push(format!(
                        "{} at {}: {}",
                        posting.title, posting.company, e
                    ));
                }
            }
        }

        report
    }

    fn apply(&mut self, posting: &JobPosting) -> Result<TailoringStrategy> {
        let result = self.engine.tailor(posting);
        let artifacts = self.writer.write(&posting.company, &posting.title, &result)?;

        let id = self.db.create(NewApplication {
            company: posting.company.clone(),
            position: posting.title.clone(),
            job_url: posting.url.clone(),
            status: None,
            resume_path: Some(artifacts.resume.clone()),
            cover_letter_path: Some(artifacts.cover_letter.clone()),
            notes: Some(format!(
                "Prepared from {} ({} tailoring)",
                posting.source, result.strategy
            )),
            salary_range: posting.salary.clone(),
            location: posting.location.clone(),
            job_type: posting.job_type.clone(),
        })?;

        let inserted = self.dedupe.record(AppliedRecord {
            canonical_id: posting.canonical_id.clone(),
            platform: posting.source.clone(),
            company: posting.company.clone(),
            position: posting.title.clone(),
            applied_date: Utc::now(),
        })?;
        if !inserted {
            // has() ran before tailoring; hitting this means another
            // writer got here first.
            warn!(id, canonical_id = %posting.canonical_id, "posting was recorded concurrently");
        }

        info!(
            id,
            company = %posting.company,
            title = %posting.title,
            strategy = %result.strategy,
            "application logged"
        );
        Ok(result.strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::sources::{RawPosting, SourceBatch};
    use std::time::Duration;

    struct StaticSource {
        postings: Vec<RawPosting>,
    }

    impl SourceAdapter for StaticSource {
        fn name(&self) -> &'static str {
            "static"
        }
        fn fetch(&self, _query: &SearchQuery, _client: &mut PoliteClient) -> crate::error::Result<SourceBatch> {
            Ok(SourceBatch {
                postings: self.postings.clone(),
                strategy: "fixture",
            })
        }
    }

    struct DownSource;

    impl SourceAdapter for DownSource {
        fn name(&self) -> &'static str {
            "down"
        }
        fn fetch(&self, _query: &SearchQuery, _client: &mut PoliteClient) -> crate::error::Result<SourceBatch> {
            Err(PipelineError::SourceUnavailable {
                src: "down".to_string(),
                reason: "all mirrors exhausted".to_string(),
            })
        }
    }

    fn raw(title: &str, company: &str) -> RawPosting {
        RawPosting {
            title: Some(title.to_string()),
            company: Some(company.to_string()),
            location: Some("Remote".to_string()),
            url: Some("https://example.com/job".to_string()),
            description: format!("{} role", title),
            salary: None,
            job_type: None,
            source: "static".to_string(),
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        db: Database,
        dedupe_path: std::path::PathBuf,
        artifacts: std::path::PathBuf,
        runs: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("applications.db")).unwrap();
        db.init().unwrap();
        Fixture {
            dedupe_path: dir.path().join("applied_jobs.json"),
            artifacts: dir.path().join("artifacts"),
            runs: dir.path().join("runs"),
            _dir: dir,
            db,
        }
    }

    fn run_pipeline(
        fx: &Fixture,
        sources: Vec<Box<dyn SourceAdapter>>,
        criteria: &Criteria,
        dry_run: bool,
    ) -> RunReport {
        let mut dedupe = DedupeLedger::open(&fx.dedupe_path).unwrap();
        let engine = TailoringEngine::new(None, "BASE RESUME".to_string());
        let writer = OutputWriter::new(&fx.artifacts);
        let mut pipeline = Pipeline {
            sources,
            client: PoliteClient::new(Duration::from_millis(0), Duration::from_secs(5)).unwrap(),
            dedupe: &mut dedupe,
            db: &fx.db,
            engine: &engine,
            writer: &writer,
            criteria,
            runs_dir: fx.runs.clone(),
            max_applications: 10,
        };
        let query = SearchQuery {
            keywords: vec![],
            location: "Remote".to_string(),
        };
        pipeline.run(&query, dry_run)
    }

    #[test]
    fn test_duplicate_postings_yield_one_application() {
        let fx = fixture();
        let source = StaticSource {
            postings: vec![
                raw("Python Developer", "Acme Corp"),
                raw("Python Developer", "Acme Corp"),
            ],
        };
        let report = run_pipeline(&fx, vec![Box::new(source)], &Criteria::default(), false);

        assert_eq!(report.postings_found, 2);
        assert_eq!(report.applications_created, 1);
        assert_eq!(report.duplicates_skipped, 1);

        let ledger = DedupeLedger::open(&fx.dedupe_path).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(fx.db.stats().unwrap().total, 1);
    }

    #[test]
    fn test_rerun_skips_already_applied() {
        let fx = fixture();
        let criteria = Criteria::default();

        let report = run_pipeline(
            &fx,
            vec![Box::new(StaticSource {
                postings: vec![raw("Python Developer", "Acme Corp")],
            })],
            &criteria,
            false,
        );
        assert_eq!(report.applications_created, 1);

        let report = run_pipeline(
            &fx,
            vec![Box::new(StaticSource {
                postings: vec![raw("Python Developer", "Acme Corp")],
            })],
            &criteria,
            false,
        );
        assert_eq!(report.applications_created, 0);
        assert_eq!(report.duplicates_skipped, 1);
        assert_eq!(fx.db.stats().unwrap().total, 1);
    }

    #[test]
    fn test_unavailable_source_is_reported_not_fatal() {
        let fx = fixture();
        let report = run_pipeline(
            &fx,
            vec![
                Box::new(DownSource),
                Box::new(StaticSource {
                    postings: vec![raw("Rust Engineer", "Ferrous")],
                }),
            ],
            &Criteria::default(),
            false,
        );

        assert_eq!(report.sources_skipped.len(), 1);
        assert_eq!(report.sources_skipped[0].0, "down");
        assert_eq!(report.applications_created, 1);
    }

    #[test]
    fn test_items_without_company_are_dropped_and_counted() {
        let fx = fixture();
        let mut broken = raw("Mystery Role", "Acme");
        broken.company = None;

        let report = run_pipeline(
            &fx,
            vec![Box::new(StaticSource {
                postings: vec![broken, raw("Rust Engineer", "Ferrous")],
            })],
            &Criteria::default(),
            false,
        );

        assert_eq!(report.extraction_dropped, 1);
        assert_eq!(report.postings_found, 1);
        assert_eq!(report.applications_created, 1);
    }

    #[test]
    fn test_criteria_rejections_counted() {
        let fx = fixture();
        let criteria = Criteria {
            keywords: vec!["rust".to_string()],
            ..Default::default()
        };
        let report = run_pipeline(
            &fx,
            vec![Box::new(StaticSource {
                postings: vec![raw("Rust Engineer", "Ferrous"), raw("Accountant", "Ledger LLC")],
            })],
            &criteria,
            false,
        );

        assert_eq!(report.filtered_out, 1);
        assert_eq!(report.applications_created, 1);
    }

    #[test]
    fn test_template_fallbacks_are_counted() {
        // Engine has no provider, so every application uses the template.
        let fx = fixture();
        let report = run_pipeline(
            &fx,
            vec![Box::new(StaticSource {
                postings: vec![raw("Rust Engineer", "Ferrous")],
            })],
            &Criteria::default(),
            false,
        );
        assert_eq!(report.template_fallbacks, 1);
    }

    #[test]
    fn test_dry_run_creates_nothing() {
        let fx = fixture();
        let report = run_pipeline(
            &fx,
            vec![Box::new(StaticSource {
                postings: vec![raw("Rust Engineer", "Ferrous")],
            })],
            &Criteria::default(),
            true,
        );

        assert_eq!(report.would_apply, vec!["Rust Engineer at Ferrous"]);
        assert_eq!(report.applications_created, 0);
        assert_eq!(fx.db.stats().unwrap().total, 0);
        assert!(DedupeLedger::open(&fx.dedupe_path).unwrap().is_empty());
    }

    #[test]
    fn test_applications_capped_at_max() {
        let fx = fixture();
        let postings = (0..5)
            .map(|i| raw(&format!("Role {}", i), "Acme"))
            .collect();

        let mut dedupe = DedupeLedger::open(&fx.dedupe_path).unwrap();
        let engine = TailoringEngine::new(None, "BASE".to_string());
        let writer = OutputWriter::new(&fx.artifacts);
        let criteria = Criteria::default();
        let mut pipeline = Pipeline {
            sources: vec![Box::new(StaticSource { postings })],
            client: PoliteClient::new(Duration::from_millis(0), Duration::from_secs(5)).unwrap(),
            dedupe: &mut dedupe,
            db: &fx.db,
            engine: &engine,
            writer: &writer,
            criteria: &criteria,
            runs_dir: fx.runs.clone(),
            max_applications: 2,
        };
        let query = SearchQuery {
            keywords: vec![],
            location: "Remote".to_string(),
        };
        let report = pipeline.run(&query, false);
        assert_eq!(report.applications_created, 2);
    }

    #[test]
    fn test_postings_file_saved_per_run() {
        let fx = fixture();
        let report = run_pipeline(
            &fx,
            vec![Box::new(StaticSource {
                postings: vec![raw("Rust Engineer", "Ferrous")],
            })],
            &Criteria::default(),
            true,
        );

        let path = report.postings_file.expect("postings file should exist");
        let text = std::fs::read_to_string(path).unwrap();
        let postings: Vec<JobPosting> = serde_json::from_str(&text).unwrap();
        assert_eq!(postings.len(), 1);
        assert_eq!(postings[0].company, "Ferrous");
    }

    #[test]
    fn test_near_duplicate_advisory_is_reported() {
        let fx = fixture();
        let criteria = Criteria::default();

        run_pipeline(
            &fx,
            vec![Box::new(StaticSource {
                postings: vec![raw("Senior Python Developer", "Acme Corp")],
            })],
            &criteria,
            false,
        );

        // Slightly renamed repost: different fingerprint, similar title.
        let report = run_pipeline(
            &fx,
            vec![Box::new(StaticSource {
                postings: vec![raw("Senior Python Developer (Remote)", "Acme Corp")],
            })],
            &criteria,
            false,
        );

        assert_eq!(report.near_duplicates.len(), 1);
        // Advisory only: the application still goes through.
        assert_eq!(report.applications_created, 1);
    }
}
