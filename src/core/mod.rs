pub mod archive;
pub mod backup;
pub mod config;
pub mod process;
pub mod restore;
pub mod walker;

pub use archive::{ArchiveReader, ArchiveWriter};
pub use backup::{sweep_orphaned_scratch, BackupJob, BackupManager, RelationalDumpSpec};
pub use config::DeploymentConfig;
pub use process::{CommandOutput, ProcessRunner};
pub use restore::{RestoreJob, RestoreManager, RestoreReport};
pub use walker::{walk_tree, EntryKind, WalkedEntry};
