/// Error taxonomy for the export/import pipeline
///
/// External-tool failures (`ProcessError`) and malformed-archive failures
/// (`ArchiveError`) are reported, never retried. The orchestrators wrap
/// whatever went wrong in `BackupError`/`RestoreError` together with the
/// step that failed, so operators can see where a job died without losing
/// the underlying cause.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with status {code}: {stderr}")]
    Exit {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("{program} did not finish within {timeout:?} and was killed")]
    Timeout { program: String, timeout: Duration },
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive is corrupt or truncated: {reason}")]
    Corrupt { reason: String },

    #[error("archive entry {name:?} would escape the extraction root")]
    UnsafeEntry { name: String },

    #[error("duplicate archive entry {name:?}")]
    DuplicateEntry { name: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("zip container error: {0}")]
    Zip(String),
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io) => ArchiveError::Io(io),
            other => ArchiveError::Zip(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStep {
    Scratch,
    DataDump,
    RelationalDump,
    WriteArchive,
    Publish,
}

impl fmt::Display for BackupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackupStep::Scratch => "scratch directory setup",
            BackupStep::DataDump => "structured data dump",
            BackupStep::RelationalDump => "relational database dump",
            BackupStep::WriteArchive => "archive writing",
            BackupStep::Publish => "archive publishing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("backup failed during {step}: {cause:#}")]
pub struct BackupError {
    pub step: BackupStep,
    pub cause: anyhow::Error,
}

impl BackupError {
    pub fn new(step: BackupStep, cause: impl Into<anyhow::Error>) -> Self {
        Self {
            step,
            cause: cause.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStep {
    Validate,
    Extract,
    SwapStorage,
    PlaceDumps,
}

impl fmt::Display for RestoreStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestoreStep::Validate => "archive validation",
            RestoreStep::Extract => "archive extraction",
            RestoreStep::SwapStorage => "storage tree swap",
            RestoreStep::PlaceDumps => "dump placement",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("restore failed during {step}: {cause:#}")]
pub struct RestoreError {
    pub step: RestoreStep,
    pub cause: anyhow::Error,
}

impl RestoreError {
    pub fn new(step: RestoreStep, cause: impl Into<anyhow::Error>) -> Self {
        Self {
            step,
            cause: cause.into(),
        }
    }
}
