use regex::Regex;

use crate::models::{Criteria, JobPosting};

/// Pull the lowest dollar figure out of a free-form salary string.
/// Handles "$80k-100k", "$70,000 - $90,000", "85000". Returns None when
/// nothing parseable is present; a garbled salary is never an error.
pub fn parse_salary(text: &str) -> Option<i64> {
    let re = Regex::new(r"(?i)(\$)?\s*(\d{1,3}(?:,\d{3})+|\d+(?:\.\d+)?)\s*(k)?").ok()?;

    let mut lowest: Option<i64> = None;
    for cap in re.captures_iter(text) {
        let has_dollar = cap.get(1).is_some();
        let has_k = cap.get(3).is_some();
        let digits = cap.get(2)?.as_str().replace(',', "");
        let Ok(mut value) = digits.parse::<f64>() else {
            continue;
        };

        if has_k {
            value *= 1000.0;
        } else if has_dollar && value < 1000.0 {
            // "$150" in a salary field almost always means $150k.
            value *= 1000.0;
        }

        let value = value as i64;
        if value <= 0 {
            continue;
        }
        lowest = Some(match lowest {
            Some(current) => current.min(value),
            None => value,
        });
    }
    lowest
}

/// Pure predicate: does a posting match the caller's criteria?
///
/// Evaluation order: excluded company rejects unconditionally; then at
/// least one keyword must appear in title or description (when any
/// keywords are configured); then the salary floor applies only when both
/// sides are present and the posting's salary parses. A missing or
/// garbled salary skips the check rather than failing it.
pub fn matches(posting: &JobPosting, criteria: &Criteria) -> bool {
    if criteria.exclude_companies.contains(&posting.company) {
        return false;
    }

    if !criteria.keywords.is_empty() {
        let haystack = format!("{} {}", posting.title, posting.description).to_lowercase();
        let hit = criteria
            .keywords
            .iter()
            .any(|kw| haystack.contains(&kw.to_lowercase()));
        if !hit {
            return false;
        }
    }

    if let (Some(min_salary), Some(salary_text)) = (criteria.min_salary, posting.salary.as_deref())
    {
        if let Some(salary) = parse_salary(salary_text) {
            if salary < min_salary {
                return false;
            }
        }
    }

    true
}
