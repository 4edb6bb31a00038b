/// Restore orchestration
///
/// Import runs fully against a scratch directory before any live state is
/// touched: a corrupt or hostile archive is rejected with the live storage
/// tree byte-for-byte intact. The storage swap moves the current tree aside
/// first and rolls it back if the new tree cannot be moved in, instead of
/// deleting the live tree up front.
///
/// The scratch directory lives next to the target storage root so the final
/// rename stays on one filesystem.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tempfile::{Builder, TempDir};
use tracing::{info, warn};

use crate::core::archive::ArchiveReader;
use crate::core::backup::sweep_orphaned_scratch;
use crate::error::{RestoreError, RestoreStep};
use crate::utils::{timestamp_suffix, DATA_DUMP_NAME, PG_DUMP_NAME, SCRATCH_PREFIX, STORAGE_PREFIX};

/// One import job. Created per invocation and discarded afterwards.
pub struct RestoreJob {
    pub archive_path: PathBuf,
    pub target_storage_root: PathBuf,
    /// Directory where the dump artifacts are staged for the external
    /// loader (the data import task run by the operator afterwards).
    pub dump_target_dir: PathBuf,
}

/// What a finished restore left on disk. Activation still requires the
/// operator to run the data loader and restart dependent services; this
/// tool restarts nothing itself.
#[derive(Debug)]
pub struct RestoreReport {
    pub storage_root: PathBuf,
    pub relational_dump: PathBuf,
    pub data_dump: PathBuf,
    pub entries_extracted: usize,
}

pub struct RestoreManager;

impl RestoreManager {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&self, job: &RestoreJob) -> Result<RestoreReport, RestoreError> {
        if !job.archive_path.is_file() {
            return Err(RestoreError::new(
                RestoreStep::Validate,
                anyhow!("{} is not a regular file", job.archive_path.display()),
            ));
        }

        // a restore killed mid-extract leaves its scratch tree next to the
        // live storage root; clear those out before starting a new one
        let scratch_parent = scratch_parent(&job.target_storage_root);
        match sweep_orphaned_scratch(&scratch_parent) {
            Ok(swept) if swept > 0 => {
                info!(swept, parent = %scratch_parent.display(), "removed orphaned scratch directories");
            }
            Ok(_) => {}
            Err(err) => {
                warn!(parent = %scratch_parent.display(), %err, "scratch sweep failed");
            }
        }

        let scratch = self
            .create_scratch(&job.target_storage_root)
            .map_err(|e| RestoreError::new(RestoreStep::Extract, e))?;

        let entries_extracted = self
            .extract(&job.archive_path, scratch.path())
            .map_err(|e| RestoreError::new(RestoreStep::Extract, e))?;

        let extracted_storage = scratch.path().join(STORAGE_PREFIX);
        let extracted_data = scratch.path().join(DATA_DUMP_NAME);
        let extracted_pg = scratch.path().join(PG_DUMP_NAME);
        for (path, what) in [
            (&extracted_storage, "storage tree"),
            (&extracted_data, DATA_DUMP_NAME),
            (&extracted_pg, PG_DUMP_NAME),
        ] {
            if !path.exists() {
                return Err(RestoreError::new(
                    RestoreStep::Extract,
                    anyhow!("archive does not contain the expected {}", what),
                ));
            }
        }

        let aside = self
            .swap_storage(&extracted_storage, &job.target_storage_root)
            .map_err(|e| RestoreError::new(RestoreStep::SwapStorage, e))?;

        let (relational_dump, data_dump) = self
            .place_dumps(&extracted_pg, &extracted_data, &job.dump_target_dir)
            .map_err(|e| {
                if let Some(aside) = &aside {
                    warn!(
                        aside = %aside.display(),
                        "dump placement failed; previous storage tree kept aside for manual recovery"
                    );
                }
                RestoreError::new(RestoreStep::PlaceDumps, e)
            })?;

        // previous tree only disappears once everything else succeeded
        if let Some(aside) = aside {
            if let Err(err) = fs::remove_dir_all(&aside) {
                warn!(aside = %aside.display(), %err, "failed to remove aside storage tree");
            }
        }

        info!(storage = %job.target_storage_root.display(), "restore complete");
        Ok(RestoreReport {
            storage_root: job.target_storage_root.clone(),
            relational_dump,
            data_dump,
            entries_extracted,
        })
    }

    fn create_scratch(&self, target: &Path) -> Result<TempDir> {
        let parent = scratch_parent(target);
        fs::create_dir_all(&parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
        Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&parent)
            .context("failed to create restore scratch directory")
    }

    fn extract(&self, archive: &Path, dest: &Path) -> Result<usize> {
        let mut reader = ArchiveReader::open(archive)
            .with_context(|| format!("failed to open {}", archive.display()))?;
        let count = reader
            .extract_all(dest)
            .with_context(|| format!("failed to extract {}", archive.display()))?;
        info!(entries = count, "archive extracted to scratch");
        Ok(count)
    }

    /// Move the live tree aside, then the extracted tree into place.
    /// Returns the aside path when a live tree existed. A failed move-in
    /// rolls the aside tree back before reporting.
    fn swap_storage(&self, extracted: &Path, target: &Path) -> Result<Option<PathBuf>> {
        let aside = if target.exists() {
            let aside = aside_path(target);
            fs::rename(target, &aside).with_context(|| {
                format!(
                    "failed to move live storage tree {} aside",
                    target.display()
                )
            })?;
            Some(aside)
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            None
        };

        if let Err(err) = fs::rename(extracted, target) {
            if let Some(aside) = &aside {
                if let Err(rollback_err) = fs::rename(aside, target) {
                    warn!(
                        aside = %aside.display(),
                        %rollback_err,
                        "rollback of aside storage tree failed"
                    );
                }
            }
            return Err(anyhow!(err).context(format!(
                "failed to move restored storage tree into {}",
                target.display()
            )));
        }
        Ok(aside)
    }

    fn place_dumps(
        &self,
        pg_dump: &Path,
        data_dump: &Path,
        target_dir: &Path,
    ) -> Result<(PathBuf, PathBuf)> {
        fs::create_dir_all(target_dir)
            .with_context(|| format!("failed to create {}", target_dir.display()))?;

        let pg_target = target_dir.join(PG_DUMP_NAME);
        fs::copy(pg_dump, &pg_target)
            .with_context(|| format!("failed to place {}", pg_target.display()))?;

        let data_target = target_dir.join(DATA_DUMP_NAME);
        fs::copy(data_dump, &data_target)
            .with_context(|| format!("failed to place {}", data_target.display()))?;

        Ok((pg_target, data_target))
    }
}

impl Default for RestoreManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Scratch dirs live next to the target storage root so the final rename
/// stays on one filesystem.
fn scratch_parent(target: &Path) -> PathBuf {
    target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn aside_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(format!(".pre-restore-{}", timestamp_suffix()));
    PathBuf::from(name)
}
