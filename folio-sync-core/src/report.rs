//! Run summary and the failure log.

use std::fmt;
use std::path::Path;

use tracing::info;

use crate::error::SyncError;

/// A source item that could not be published this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub path: String,
    pub reason: String,
}

/// Counts and lists gathered over one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub skipped: usize,
    pub created: usize,
    pub replaced: usize,
    pub ignored: usize,
    pub pruned: usize,
    pub stale_deleted: usize,
    pub thumbnails_uploaded: usize,
    pub thumbnails_failed: usize,
    pub manifest_entries: usize,
    pub failures: Vec<ItemFailure>,
    pub warnings: Vec<String>,
}

impl SyncReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn uploads(&self) -> usize {
        self.created + self.replaced + self.thumbnails_uploaded
    }

    pub fn trace_summary(&self) {
        info!(
            skipped = self.skipped,
            created = self.created,
            replaced = self.replaced,
            failed = self.failed(),
            ignored = self.ignored,
            pruned = self.pruned,
            thumbnails = self.thumbnails_uploaded,
            thumbnails_failed = self.thumbnails_failed,
            warnings = self.warnings.len(),
            manifest_entries = self.manifest_entries,
            "[SYNC] Run summary"
        );
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sync summary")?;
        writeln!(f, "  skipped:    {}", self.skipped)?;
        writeln!(f, "  created:    {}", self.created)?;
        writeln!(f, "  replaced:   {}", self.replaced)?;
        writeln!(f, "  failed:     {}", self.failed())?;
        writeln!(f, "  ignored:    {}", self.ignored)?;
        writeln!(f, "  pruned:     {}", self.pruned)?;
        writeln!(
            f,
            "  thumbnails: {} uploaded, {} failed",
            self.thumbnails_uploaded, self.thumbnails_failed
        )?;
        writeln!(f, "  manifest:   {} entries", self.manifest_entries)?;
        if !self.failures.is_empty() {
            writeln!(f, "Failures:")?;
            for failure in &self.failures {
                writeln!(f, "  {}: {}", failure.path, failure.reason)?;
            }
        }
        if !self.warnings.is_empty() {
            writeln!(f, "Warnings:")?;
            for warning in &self.warnings {
                writeln!(f, "  {warning}")?;
            }
        }
        Ok(())
    }
}

/// Write one failed source path per line. The file is written even when there
/// are no failures, so an empty file means "ran, nothing failed".
pub fn write_failure_log(path: &Path, failures: &[ItemFailure]) -> Result<(), SyncError> {
    let mut body = String::new();
    for failure in failures {
        body.push_str(&failure.path);
        body.push('\n');
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| SyncError::Write {
            what: "failure log",
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    std::fs::write(path, body).map_err(|e| SyncError::Write {
        what: "failure log",
        path: path.to_path_buf(),
        source: e,
    })?;
    info!(path = %path.display(), failures = failures.len(), "[SYNC] Failure log written");
    Ok(())
}
