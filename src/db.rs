use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::models::{Application, ApplicationStatus, NewApplication};

/// SQLite-backed application ledger. Single writer; every mutation is one
/// statement, committed immediately (write-ahead, not buffered). Rows are
/// never deleted; the table doubles as the audit trail.
pub struct Database {
    conn: Connection,
    path: PathBuf,
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn to_db_time(t: DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

fn from_db_time(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    #[cfg(test)]
    fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS applications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company TEXT NOT NULL,
                position TEXT NOT NULL,
                job_url TEXT,
                date_applied TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'applied', 'interview', 'rejected', 'offer', 'accepted')),
                resume_used TEXT,
                cover_letter TEXT,
                notes TEXT,
                response TEXT,
                salary_range TEXT,
                location TEXT,
                job_type TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_applications_status ON applications(status);
            CREATE INDEX IF NOT EXISTS idx_applications_date ON applications(date_applied);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='applications'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(PipelineError::Persistence(
                "database not initialized; run 'prospect init' first".to_string(),
            ));
        }
        Ok(())
    }

    /// Log a new application. Always succeeds on well-formed input;
    /// assigns a fresh id and stamps the applied date. Initial status is
    /// `pending` unless the caller supplies another valid one.
    pub fn create(&self, app: NewApplication) -> Result<i64> {
        let status = app.status.unwrap_or(ApplicationStatus::Pending);
        self.conn.execute(
            "INSERT INTO applications
             (company, position, job_url, date_applied, status, resume_used,
              cover_letter, notes, salary_range, location, job_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                app.company,
                app.position,
                app.job_url,
                to_db_time(Utc::now()),
                status.as_str(),
                app.resume_path.as_ref().map(|p| p.display().to_string()),
                app.cover_letter_path
                    .as_ref()
                    .map(|p| p.display().to_string()),
                app.notes,
                app.salary_range,
                app.location,
                app.job_type,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Overwrite the status of an existing application and stamp the
    /// response timestamp. An unknown status or a missing id is a
    /// `ValidationError` and mutates nothing.
    pub fn update_status(&self, id: i64, status: &str) -> Result<()> {
        let status = ApplicationStatus::parse(status).ok_or_else(|| {
            PipelineError::Validation(format!(
                "invalid status '{}'; expected one of: {}",
                status,
                ApplicationStatus::ALL.map(|s| s.as_str()).join(", ")
            ))
        })?;

        let changed = self.conn.execute(
            "UPDATE applications SET status = ?1, response = ?2 WHERE id = ?3",
            params![status.as_str(), to_db_time(Utc::now()), id],
        )?;
        if changed == 0 {
            return Err(PipelineError::Validation(format!(
                "no application with id {}",
                id
            )));
        }
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<Option<Application>> {
        let result = self.conn.query_row(
            &format!("{} WHERE id = ?1", SELECT_APPLICATION),
            [id],
            Self::row_to_application,
        );
        match result {
            Ok(app) => Ok(Some(app)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list(&self, status: Option<&str>, limit: usize) -> Result<Vec<Application>> {
        let mut sql = String::from(SELECT_APPLICATION);
        if status.is_some() {
            sql.push_str(" WHERE status = ?1");
        }
        sql.push_str(" ORDER BY date_applied DESC, id DESC LIMIT ");
        sql.push_str(&limit.to_string());

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = if let Some(s) = status {
            stmt.query_map([s], Self::row_to_application)?
        } else {
            stmt.query_map([], Self::row_to_application)?
        };

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn stats(&self) -> Result<LedgerStats> {
        let total: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM applications", [], |row| row.get(0))?;

        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM applications GROUP BY status")?;
        let by_status = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .filter_map(|r| {
                let (status, count) = r.ok()?;
                Some((ApplicationStatus::parse(&status)?, count))
            })
            .collect();

        let this_week: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM applications WHERE date_applied > datetime('now', '-7 days')",
            [],
            |row| row.get(0),
        )?;

        Ok(LedgerStats {
            total,
            by_status,
            this_week,
        })
    }

    fn row_to_application(row: &rusqlite::Row) -> rusqlite::Result<Application> {
        let status_text: String = row.get(5)?;
        let status = ApplicationStatus::parse(&status_text).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                format!("unknown status '{}'", status_text).into(),
            )
        })?;
        let date_applied: String = row.get(4)?;
        let response: Option<String> = row.get(9)?;

        Ok(Application {
            id: row.get(0)?,
            company: row.get(1)?,
            position: row.get(2)?,
            job_url: row.get(3)?,
            date_applied: from_db_time(&date_applied).unwrap_or_else(Utc::now),
            status,
            resume_path: row.get(6)?,
            cover_letter_path: row.get(7)?,
            notes: row.get(8)?,
            response: response.as_deref().and_then(from_db_time),
            salary_range: row.get(10)?,
            location: row.get(11)?,
            job_type: row.get(12)?,
        })
    }
}

const SELECT_APPLICATION: &str = "SELECT id, company, position, job_url, date_applied, status,
        resume_used, cover_letter, notes, response, salary_range, location, job_type
 FROM applications";

/// Derived read over the ledger. Rates are computed over `total` with the
/// convention that an empty ledger yields 0, never a division fault.
#[derive(Debug, Clone)]
pub struct LedgerStats {
    pub total: i64,
    pub by_status: Vec<(ApplicationStatus, i64)>,
    pub this_week: i64,
}

impl LedgerStats {
    pub fn count(&self, status: ApplicationStatus) -> i64 {
        self.by_status
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    /// Percentage of applications with any employer response
    /// (interview, rejected, offer, accepted).
    pub fn response_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let responses: i64 = self
            .by_status
            .iter()
            .filter(|(s, _)| s.is_response())
            .map(|(_, n)| n)
            .sum();
        responses as f64 / self.total as f64 * 100.0
    }

    /// Percentage of applications that reached interview or beyond.
    pub fn interview_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let interviews: i64 = self
            .by_status
            .iter()
            .filter(|(s, _)| s.is_interview_or_beyond())
            .map(|(_, n)| n)
            .sum();
        interviews as f64 / self.total as f64 * 100.0
    }
}
