use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::models::AppliedRecord;
use crate::normalize::collapse_whitespace;

/// Titles this similar (Jaro-Winkler) for the same company are flagged as
/// probable duplicates that slipped past the exact fingerprint.
const NEAR_DUPLICATE_THRESHOLD: f64 = 0.92;

/// Durable set of postings already acted upon. Backed by an ordered JSON
/// array on disk, one record per applied posting, human-diffable.
/// Enforces at-most-once application across runs.
pub struct DedupeLedger {
    path: PathBuf,
    records: Vec<AppliedRecord>,
    index: HashSet<String>,
}

impl DedupeLedger {
    /// Open the ledger at `path`, loading any existing records. A missing
    /// file is an empty ledger, not an error.
    pub fn open(path: &Path) -> Result<Self> {
        let records: Vec<AppliedRecord> = if path.exists() {
            let text = fs::read_to_string(path)?;
            serde_json::from_str(&text)?
        } else {
            Vec::new()
        };
        let index = records.iter().map(|r| r.canonical_id.clone()).collect();
        Ok(Self {
            path: path.to_path_buf(),
            records,
            index,
        })
    }

    pub fn has(&self, canonical_id: &str) -> bool {
        self.index.contains(canonical_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AppliedRecord> {
        self.records.iter()
    }

    /// Insert-if-absent. Returns false (and writes nothing) when the
    /// canonical id is already present; otherwise appends the record and
    /// persists the whole ledger atomically.
    pub fn record(&mut self, record: AppliedRecord) -> Result<bool> {
        if !self.index.insert(record.canonical_id.clone()) {
            debug!(id = %record.canonical_id, "already in applied ledger, skipping");
            return Ok(false);
        }
        self.records.push(record);
        self.persist()?;
        Ok(true)
    }

    /// Advisory lookup: an already-applied record for the same company
    /// whose title is nearly identical. Markup drift can rename a posting
    /// slightly and defeat the exact fingerprint; this surfaces those in
    /// the run report without blocking anything.
    pub fn similar_to(&self, company: &str, title: &str) -> Option<&AppliedRecord> {
        let company = collapse_whitespace(company).to_lowercase();
        let title = collapse_whitespace(title).to_lowercase();

        self.records.iter().find(|r| {
            collapse_whitespace(&r.company).to_lowercase() == company
                && strsim::jaro_winkler(
                    &collapse_whitespace(&r.position).to_lowercase(),
                    &title,
                ) >= NEAR_DUPLICATE_THRESHOLD
        })
    }

    // Write via temp file + rename so a crash mid-write cannot corrupt
    // the ledger.
    fn persist(&self) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.records)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &text)?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            PipelineError::Persistence(format!(
                "failed to replace applied ledger {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: &str, company: &str, position: &str) -> AppliedRecord {
        AppliedRecord {
            canonical_id: id.to_string(),
            platform: "board".to_string(),
            company: company.to_string(),
            position: position.to_string(),
            applied_date: Utc::now(),
        }
    }

    #[test]
    fn test_missing_file_is_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = DedupeLedger::open(&dir.path().join("applied_jobs.json")).unwrap();
        assert!(ledger.is_empty());
        assert!(!ledger.has("anything"));
    }

    #[test]
    fn test_record_then_has() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = DedupeLedger::open(&dir.path().join("applied_jobs.json")).unwrap();

        assert!(ledger.record(record("abc", "Acme", "Dev")).unwrap());
        assert!(ledger.has("abc"));
        assert!(!ledger.has("def"));
    }

    #[test]
    fn test_record_is_insert_if_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = DedupeLedger::open(&dir.path().join("applied_jobs.json")).unwrap();

        assert!(ledger.record(record("abc", "Acme", "Dev")).unwrap());
        assert!(!ledger.record(record("abc", "Acme", "Dev")).unwrap());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_ledger_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("applied_jobs.json");

        {
            let mut ledger = DedupeLedger::open(&path).unwrap();
            ledger.record(record("abc", "Acme", "Dev")).unwrap();
            ledger.record(record("def", "Globex", "Eng")).unwrap();
        }

        let reopened = DedupeLedger::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.has("abc"));
        assert!(reopened.has("def"));
    }

    #[test]
    fn test_ledger_file_is_ordered_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("applied_jobs.json");

        let mut ledger = DedupeLedger::open(&path).unwrap();
        ledger.record(record("first", "A", "Dev")).unwrap();
        ledger.record(record("second", "B", "Dev")).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<AppliedRecord> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[0].canonical_id, "first");
        assert_eq!(parsed[1].canonical_id, "second");
    }

    #[test]
    fn test_similar_to_flags_drifted_titles() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = DedupeLedger::open(&dir.path().join("applied_jobs.json")).unwrap();
        ledger
            .record(record("abc", "Acme Corp", "Senior Python Developer"))
            .unwrap();

        assert!(
            ledger
                .similar_to("Acme Corp", "Senior Python Developer (Remote)")
                .is_some()
        );
        assert!(ledger.similar_to("Acme Corp", "Accountant").is_none());
        // Same title at a different company is not a duplicate.
        assert!(
            ledger
                .similar_to("Globex", "Senior Python Developer")
                .is_none()
        );
    }
}
