/// Fixed names and defaults for the export/import pipeline
///
/// The filenames inside the archive are constants shared by export and
/// import so a restore can locate the dump artifacts unambiguously.

/// Structured row-level data dump, produced by the data dump task.
pub const DATA_DUMP_NAME: &str = "data.yml";

/// Binary pg_dump output (tar format).
pub const PG_DUMP_NAME: &str = "envizon.db.tar";

/// Archive-relative prefix for the blob storage tree.
pub const STORAGE_PREFIX: &str = "storage";

/// Tables excluded from the structured dump unless overridden.
pub const DEFAULT_EXCLUSIONS: &[&str] = &["users", "ar_internal_metadata"];

/// Suffix for the not-yet-published archive; renamed away on success.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Prefix for scratch directories, used both for creation and for the
/// startup sweep of directories orphaned by a crashed run.
pub const SCRATCH_PREFIX: &str = "envault-scratch-";

/// Subprocess timeout when PROCESS_TIMEOUT_SECS is not configured.
pub const DEFAULT_PROCESS_TIMEOUT_SECS: u64 = 600;

/// Default pg_dump binary name.
pub const DEFAULT_PG_DUMP_BIN: &str = "pg_dump";

/// Default directory where dump artifacts are staged for the loader.
pub const DEFAULT_DB_DIR: &str = "db";

/// Default PostgreSQL port used when building the connection URI.
pub const DEFAULT_DATABASE_PORT: &str = "5432";
