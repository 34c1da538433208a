use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::models::JobPosting;
use crate::sources::RawPosting;

/// Trim and collapse internal whitespace runs to single spaces.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deterministic fingerprint of a posting: SHA-256 over the lowercased,
/// whitespace-collapsed `(source, company, title)` triple. Two
/// extractions of the same real posting hash identically no matter which
/// strategy or mirror produced them.
pub fn canonical_id(source: &str, company: &str, title: &str) -> String {
    let key = format!(
        "{}|{}|{}",
        collapse_whitespace(source).to_lowercase(),
        collapse_whitespace(company).to_lowercase(),
        collapse_whitespace(title).to_lowercase(),
    );
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn clean_optional(field: Option<String>) -> Option<String> {
    field
        .map(|s| collapse_whitespace(&s))
        .filter(|s| !s.is_empty())
}

/// Map a raw, source-specific record into a canonical `JobPosting`.
///
/// Title and company are the only mandatory fields; a posting missing
/// either is dropped with `ExtractionMismatch`. Everything else is
/// best-effort and carried as-is after whitespace cleanup.
pub fn normalize(raw: RawPosting) -> Result<JobPosting> {
    let title = clean_optional(raw.title).ok_or_else(|| {
        PipelineError::ExtractionMismatch(format!("{}: item has no usable title", raw.source))
    })?;
    let company = clean_optional(raw.company).ok_or_else(|| {
        PipelineError::ExtractionMismatch(format!(
            "{}: \"{}\" has no usable company",
            raw.source, title
        ))
    })?;

    let posting = JobPosting {
        canonical_id: canonical_id(&raw.source, &company, &title),
        title,
        company,
        location: clean_optional(raw.location),
        url: clean_optional(raw.url),
        description: collapse_whitespace(&raw.description),
        salary: clean_optional(raw.salary),
        job_type: clean_optional(raw.job_type),
        source: raw.source,
        date_found: Utc::now(),
    };
    debug!(
        id = %posting.canonical_id,
        title = %posting.title,
        company = %posting.company,
        "normalized posting"
    );
    Ok(posting)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(title: Option<&str>, company: Option<&str>) -> RawPosting {
        RawPosting {
            title: title.map(String::from),
            company: company.map(String::from),
            location: None,
            url: None,
            description: "A role".to_string(),
            salary: None,
            job_type: None,
            source: "board".to_string(),
        }
    }

    #[test]
    fn test_canonical_id_is_deterministic() {
        let a = canonical_id("board", "Acme Corp", "Python Developer");
        let b = canonical_id("board", "Acme Corp", "Python Developer");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_canonical_id_ignores_case_and_spacing() {
        let a = canonical_id("board", "Acme Corp", "Python Developer");
        let b = canonical_id("Board", "  acme   corp ", "PYTHON  DEVELOPER");
        assert_eq!(a, b);
    }

    #[test]
    fn test_canonical_id_differs_across_sources() {
        let a = canonical_id("board", "Acme Corp", "Python Developer");
        let b = canonical_id("remoteok", "Acme Corp", "Python Developer");
        assert_ne!(a, b);
    }

    #[test]
    fn test_missing_title_is_extraction_mismatch() {
        let err = normalize(raw(None, Some("Acme Corp"))).unwrap_err();
        assert!(matches!(err, PipelineError::ExtractionMismatch(_)));
    }

    #[test]
    fn test_whitespace_only_company_is_extraction_mismatch() {
        let err = normalize(raw(Some("Python Developer"), Some("   "))).unwrap_err();
        assert!(matches!(err, PipelineError::ExtractionMismatch(_)));
    }

    #[test]
    fn test_text_fields_are_collapsed() {
        let mut input = raw(Some("  Senior\n\tRust   Engineer "), Some(" Acme  Corp "));
        input.description = "Build\n\nthings   fast".to_string();
        input.location = Some("  Athens,   Greece ".to_string());

        let posting = normalize(input).unwrap();
        assert_eq!(posting.title, "Senior Rust Engineer");
        assert_eq!(posting.company, "Acme Corp");
        assert_eq!(posting.description, "Build things fast");
        assert_eq!(posting.location.as_deref(), Some("Athens, Greece"));
    }

    #[test]
    fn test_empty_optional_fields_become_none() {
        let mut input = raw(Some("Developer"), Some("Acme"));
        input.salary = Some("   ".to_string());
        input.url = Some(String::new());

        let posting = normalize(input).unwrap();
        assert_eq!(posting.salary, None);
        assert_eq!(posting.url, None);
    }
}
