use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{PipelineError, Result};
use crate::models::TailoringResult;

/// Each file-name component is clipped to this many characters to keep
/// paths portable.
const COMPONENT_MAX: usize = 30;

/// Persists generated application artifacts to durable storage. A write
/// failure here is fatal to the current application attempt: generated
/// content must never be silently discarded.
pub struct OutputWriter {
    dir: PathBuf,
}

/// References to the two stored artifacts, for linkage into the
/// application row.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub resume: PathBuf,
    pub cover_letter: PathBuf,
}

/// Strip everything but alphanumerics, spaces, hyphens and underscores,
/// then clip. Spaces collapse to underscores so the key stays one token.
pub fn sanitize_component(s: &str) -> String {
    let kept: String = s
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-' || *c == '_')
        .collect();
    let clipped: String = kept.trim().chars().take(COMPONENT_MAX).collect();
    clipped.trim().replace(' ', "_")
}

impl OutputWriter {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// Write the resume and cover letter under a sanitized
    /// `{company}_{position}_{timestamp}` key and return both paths.
    pub fn write(
        &self,
        company: &str,
        position: &str,
        result: &TailoringResult,
    ) -> Result<ArtifactPaths> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            PipelineError::Persistence(format!(
                "failed to create artifacts dir {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let key = format!(
            "{}_{}_{}",
            sanitize_component(company),
            sanitize_component(position),
            stamp
        );

        let resume = self.dir.join(format!("{}_resume.txt", key));
        let cover_letter = self.dir.join(format!("{}_cover.txt", key));

        fs::write(&resume, &result.resume_text).map_err(|e| {
            PipelineError::Persistence(format!("failed to write {}: {}", resume.display(), e))
        })?;
        fs::write(&cover_letter, &result.cover_letter_text).map_err(|e| {
            PipelineError::Persistence(format!(
                "failed to write {}: {}",
                cover_letter.display(),
                e
            ))
        })?;

        info!(
            resume = %resume.display(),
            cover_letter = %cover_letter.display(),
            strategy = %result.strategy,
            "stored application artifacts"
        );
        Ok(ArtifactPaths {
            resume,
            cover_letter,
        })
    }
}
