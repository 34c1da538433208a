use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

/// A canonical job posting, produced by the normalizer. Immutable once
/// created; `canonical_id` identifies the same real-world posting across
/// sources and runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPosting {
    pub canonical_id: String,
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub url: Option<String>,
    pub description: String,
    /// Raw salary text as the source published it ("$80k-100k", "70000").
    /// Parsed only at filter time; garbled values are not an error.
    pub salary: Option<String>,
    pub job_type: Option<String>, // "remote", "hybrid", "onsite"
    pub source: String,           // "remoteok", "board", "adzuna", "manual"
    pub date_found: DateTime<Utc>,
}

/// Caller-supplied search criteria. The pipeline reads these; it never
/// mutates or persists them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Criteria {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub exclude_companies: HashSet<String>,
    #[serde(default)]
    pub min_salary: Option<i64>,
    #[serde(default)]
    pub locations: Vec<String>,
}

/// Which tailoring strategy produced the artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TailoringStrategy {
    Ai,
    Template,
}

impl fmt::Display for TailoringStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TailoringStrategy::Ai => write!(f, "ai"),
            TailoringStrategy::Template => write!(f, "template"),
        }
    }
}

/// Output of one tailoring attempt. Not persisted itself; only the files
/// derived from it are.
#[derive(Debug, Clone)]
pub struct TailoringResult {
    pub resume_text: String,
    pub cover_letter_text: String,
    pub strategy: TailoringStrategy,
}

/// Append-only member of the applied ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedRecord {
    pub canonical_id: String,
    pub platform: String,
    pub company: String,
    pub position: String,
    pub applied_date: DateTime<Utc>,
}

/// Lifecycle states for an application. Updates with anything outside
/// this set are rejected and leave the row unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Applied,
    Interview,
    Rejected,
    Offer,
    Accepted,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 6] = [
        ApplicationStatus::Pending,
        ApplicationStatus::Applied,
        ApplicationStatus::Interview,
        ApplicationStatus::Rejected,
        ApplicationStatus::Offer,
        ApplicationStatus::Accepted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Applied => "applied",
            ApplicationStatus::Interview => "interview",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Offer => "offer",
            ApplicationStatus::Accepted => "accepted",
        }
    }

    pub fn parse(s: &str) -> Option<ApplicationStatus> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(ApplicationStatus::Pending),
            "applied" => Some(ApplicationStatus::Applied),
            "interview" => Some(ApplicationStatus::Interview),
            "rejected" => Some(ApplicationStatus::Rejected),
            "offer" => Some(ApplicationStatus::Offer),
            "accepted" => Some(ApplicationStatus::Accepted),
            _ => None,
        }
    }

    /// Statuses that count as the employer having responded.
    pub fn is_response(&self) -> bool {
        !matches!(
            self,
            ApplicationStatus::Pending | ApplicationStatus::Applied
        )
    }

    /// Statuses that count as reaching the interview stage or beyond.
    pub fn is_interview_or_beyond(&self) -> bool {
        matches!(
            self,
            ApplicationStatus::Interview | ApplicationStatus::Offer | ApplicationStatus::Accepted
        )
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked application, owned by the application ledger. Rows are never
/// physically deleted; the table is the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub company: String,
    pub position: String,
    pub job_url: Option<String>,
    pub date_applied: DateTime<Utc>,
    pub status: ApplicationStatus,
    pub resume_path: Option<String>,
    pub cover_letter_path: Option<String>,
    pub notes: Option<String>,
    /// Timestamp of the most recent status change, stamped on update.
    pub response: Option<DateTime<Utc>>,
    pub salary_range: Option<String>,
    pub location: Option<String>,
    pub job_type: Option<String>,
}

/// Fields supplied when logging a new application. The ledger assigns the
/// id and the applied timestamp.
#[derive(Debug, Clone, Default)]
pub struct NewApplication {
    pub company: String,
    pub position: String,
    pub job_url: Option<String>,
    pub status: Option<ApplicationStatus>,
    pub resume_path: Option<PathBuf>,
    pub cover_letter_path: Option<PathBuf>,
    pub notes: Option<String>,
    pub salary_range: Option<String>,
    pub location: Option<String>,
    pub job_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in ApplicationStatus::ALL {
            assert_eq!(ApplicationStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_status_parse_rejects_unknown() {
        assert_eq!(ApplicationStatus::parse("bogus"), None);
        assert_eq!(ApplicationStatus::parse(""), None);
        assert_eq!(ApplicationStatus::parse("ghosted"), None);
    }

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!(
            ApplicationStatus::parse("  Interview "),
            Some(ApplicationStatus::Interview)
        );
        assert_eq!(
            ApplicationStatus::parse("OFFER"),
            Some(ApplicationStatus::Offer)
        );
    }

    #[test]
    fn test_response_classification() {
        assert!(!ApplicationStatus::Pending.is_response());
        assert!(!ApplicationStatus::Applied.is_response());
        assert!(ApplicationStatus::Interview.is_response());
        assert!(ApplicationStatus::Rejected.is_response());
        assert!(ApplicationStatus::Offer.is_response());
        assert!(ApplicationStatus::Accepted.is_response());
    }

    #[test]
    fn test_strategy_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TailoringStrategy::Ai).unwrap(),
            "\"ai\""
        );
        assert_eq!(
            serde_json::to_string(&TailoringStrategy::Template).unwrap(),
            "\"template\""
        );
    }
}
