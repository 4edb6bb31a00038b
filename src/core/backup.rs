/// Backup orchestration
///
/// One export run: dump structured row data, run pg_dump, then stream the
/// blob storage tree plus both dump artifacts into a single zip archive.
/// The archive is written to a `.partial` sibling and renamed into place
/// only after the central directory is finalized, so the output path never
/// holds a half-written container. Dump artifacts live in a scratch
/// directory that is removed on every exit path.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tempfile::{Builder, TempDir};
use tracing::{info, warn};

use crate::core::archive::{entry_name, ArchiveWriter};
use crate::core::process::ProcessRunner;
use crate::core::walker::{walk_tree, EntryKind};
use crate::error::{BackupError, BackupStep};
use crate::utils::{DATA_DUMP_NAME, PARTIAL_SUFFIX, PG_DUMP_NAME, SCRATCH_PREFIX, STORAGE_PREFIX};

/// Connection parameters for the binary database dump.
pub struct RelationalDumpSpec {
    pub pg_dump_bin: String,
    /// Full URI with embedded credentials. Never logged; `redacted_uri`
    /// is the displayable form.
    pub connection_uri: String,
    pub redacted_uri: String,
}

/// One export job. Created per invocation and discarded afterwards.
pub struct BackupJob {
    pub output_path: PathBuf,
    pub storage_root: PathBuf,
    pub data_dump_command: Vec<String>,
    pub dump: RelationalDumpSpec,
    pub exclusions: Vec<String>,
}

pub struct BackupManager {
    runner: ProcessRunner,
    scratch_parent: PathBuf,
}

impl BackupManager {
    pub fn new(timeout: Duration, scratch_parent: PathBuf) -> Self {
        Self {
            runner: ProcessRunner::new(timeout),
            scratch_parent,
        }
    }

    /// Run the whole export, returning the published archive path.
    pub async fn run(&self, job: &BackupJob) -> Result<PathBuf, BackupError> {
        let scratch = self
            .create_scratch()
            .map_err(|e| BackupError::new(BackupStep::Scratch, e))?;

        let data_dump = scratch.path().join(DATA_DUMP_NAME);
        self.dump_structured_data(job, &data_dump)
            .await
            .map_err(|e| BackupError::new(BackupStep::DataDump, e))?;

        let pg_dump = scratch.path().join(PG_DUMP_NAME);
        self.dump_relational(job, &pg_dump)
            .await
            .map_err(|e| BackupError::new(BackupStep::RelationalDump, e))?;

        let partial = partial_path(&job.output_path);
        self.write_archive(job, &partial, &data_dump, &pg_dump)
            .map_err(|e| BackupError::new(BackupStep::WriteArchive, e))?;

        // atomic publish: readers only ever see a finished archive
        fs::rename(&partial, &job.output_path)
            .with_context(|| {
                format!(
                    "failed to publish {} as {}",
                    partial.display(),
                    job.output_path.display()
                )
            })
            .map_err(|e| {
                remove_if_present(&partial);
                BackupError::new(BackupStep::Publish, e)
            })?;

        info!(output = %job.output_path.display(), "export complete");
        Ok(job.output_path.clone())
    }

    fn create_scratch(&self) -> Result<TempDir> {
        fs::create_dir_all(&self.scratch_parent).with_context(|| {
            format!(
                "failed to create scratch parent {}",
                self.scratch_parent.display()
            )
        })?;
        Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&self.scratch_parent)
            .context("failed to create scratch directory")
    }

    /// Run the configured structured-data dump task. The task gets the
    /// exclusion list via the EXCLUDE environment variable and the output
    /// path as its final argument.
    async fn dump_structured_data(&self, job: &BackupJob, output: &Path) -> Result<()> {
        let (program, args) = job
            .data_dump_command
            .split_first()
            .ok_or_else(|| anyhow!("data dump command is empty"))?;

        let mut args: Vec<String> = args.to_vec();
        args.push(output.display().to_string());
        let envs = vec![("EXCLUDE".to_string(), job.exclusions.join(","))];

        info!(program, exclusions = %job.exclusions.join(","), "running structured data dump");
        self.runner.run(program, &args, &envs).await?;

        if !output.is_file() {
            return Err(anyhow!(
                "data dump task succeeded but produced no file at {}",
                output.display()
            ));
        }
        Ok(())
    }

    /// Invoke pg_dump in tar format against the configured database.
    async fn dump_relational(&self, job: &BackupJob, output: &Path) -> Result<()> {
        let args = vec![
            "-c".to_string(),
            "-b".to_string(),
            "-F".to_string(),
            "tar".to_string(),
            "-f".to_string(),
            output.display().to_string(),
            job.dump.connection_uri.clone(),
        ];

        info!(target = %job.dump.redacted_uri, "running pg_dump");
        self.runner.run(&job.dump.pg_dump_bin, &args, &[]).await?;

        if !output.is_file() {
            return Err(anyhow!(
                "pg_dump succeeded but produced no file at {}",
                output.display()
            ));
        }
        Ok(())
    }

    /// Stream the storage tree and both dump artifacts into the container.
    /// On any failure the writer's drop removes the partial file.
    fn write_archive(
        &self,
        job: &BackupJob,
        partial: &Path,
        data_dump: &Path,
        pg_dump: &Path,
    ) -> Result<()> {
        let mut writer = ArchiveWriter::create(partial)
            .with_context(|| format!("failed to open archive at {}", partial.display()))?;

        writer.add_directory(STORAGE_PREFIX)?;
        let mut files = 0usize;
        for entry in walk_tree(&job.storage_root) {
            let entry = entry?;
            let name = format!("{}/{}", STORAGE_PREFIX, entry_name(&entry.relative));
            match entry.kind {
                EntryKind::Directory => writer.add_directory(&name)?,
                EntryKind::File => {
                    let source = job.storage_root.join(&entry.relative);
                    let mut reader = File::open(&source)
                        .with_context(|| format!("failed to read {}", source.display()))?;
                    match source_mode(&reader)? {
                        Some(mode) => writer.add_file_with_mode(&name, &mut reader, mode)?,
                        None => writer.add_file(&name, &mut reader)?,
                    };
                    files += 1;
                }
            }
        }

        add_artifact(&mut writer, DATA_DUMP_NAME, data_dump)?;
        add_artifact(&mut writer, PG_DUMP_NAME, pg_dump)?;

        writer.finish().context("failed to finalize archive")?;
        info!(files, "archive written");
        Ok(())
    }
}

/// Mode of the open source file, recorded in the archive so a restored
/// blob tree keeps execute bits and other non-default modes.
#[cfg(unix)]
fn source_mode(file: &File) -> Result<Option<u32>> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = file.metadata().context("failed to stat source file")?;
    Ok(Some(metadata.permissions().mode()))
}

#[cfg(not(unix))]
fn source_mode(_file: &File) -> Result<Option<u32>> {
    Ok(None)
}

fn add_artifact(writer: &mut ArchiveWriter, name: &str, path: &Path) -> Result<()> {
    let mut reader =
        File::open(path).with_context(|| format!("missing dump artifact {}", path.display()))?;
    writer.add_file(name, &mut reader)?;
    Ok(())
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

fn remove_if_present(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), %err, "failed to remove partial archive");
        }
    }
}

/// Remove scratch directories left behind by a crashed run.
///
/// Safe to call at startup: live jobs create their scratch dirs after the
/// sweep. Returns the number of directories removed.
pub fn sweep_orphaned_scratch(parent: &Path) -> Result<usize> {
    if !parent.is_dir() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(parent)
        .with_context(|| format!("failed to list scratch parent {}", parent.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        let is_scratch = name
            .to_str()
            .map(|n| n.starts_with(SCRATCH_PREFIX))
            .unwrap_or(false);
        if is_scratch && entry.path().is_dir() {
            match fs::remove_dir_all(entry.path()) {
                Ok(()) => {
                    info!(path = %entry.path().display(), "removed orphaned scratch directory");
                    removed += 1;
                }
                Err(err) => {
                    warn!(path = %entry.path().display(), %err, "failed to remove orphaned scratch directory")
                }
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::archive::ArchiveReader;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Stub data dump: writes "rows: []" to the path passed as $1.
    fn stub_data_dump(dir: &Path) -> PathBuf {
        write_script(dir, "fake-data-dump", "#!/bin/sh\nprintf 'rows: []' > \"$1\"\n")
    }

    /// Stub pg_dump: scans for -f and writes "DUMP" to the path after it.
    fn stub_pg_dump(dir: &Path) -> PathBuf {
        write_script(
            dir,
            "fake-pg-dump",
            "#!/bin/sh\nwhile [ \"$1\" != \"-f\" ]; do shift; done\nprintf 'DUMP' > \"$2\"\n",
        )
    }

    fn job(tmp: &TempDir, storage_root: PathBuf, pg_dump_bin: PathBuf) -> BackupJob {
        BackupJob {
            output_path: tmp.path().join("out.zip"),
            storage_root,
            data_dump_command: vec![stub_data_dump(tmp.path()).display().to_string()],
            dump: RelationalDumpSpec {
                pg_dump_bin: pg_dump_bin.display().to_string(),
                connection_uri: "postgresql://u:p@:5432/db?host=h".to_string(),
                redacted_uri: "postgresql://u:****@:5432/db?host=h".to_string(),
            },
            exclusions: vec!["users".to_string(), "ar_internal_metadata".to_string()],
        }
    }

    fn manager(tmp: &TempDir) -> BackupManager {
        BackupManager::new(Duration::from_secs(10), tmp.path().join("scratch"))
    }

    #[tokio::test]
    async fn exports_storage_tree_and_dump_artifacts() {
        let tmp = TempDir::new().unwrap();
        let storage = tmp.path().join("storage");
        fs::create_dir_all(storage.join("a")).unwrap();
        fs::write(storage.join("a/b.txt"), "hi").unwrap();
        fs::write(storage.join("c.txt"), "bye").unwrap();

        let job = job(&tmp, storage, stub_pg_dump(tmp.path()));
        let output = manager(&tmp).run(&job).await.unwrap();

        let dest = tmp.path().join("extracted");
        let mut reader = ArchiveReader::open(&output).unwrap();
        let mut names = reader.entry_names().unwrap();
        names.sort();
        assert_eq!(
            names,
            vec![
                "data.yml",
                "envizon.db.tar",
                "storage/",
                "storage/a/",
                "storage/a/b.txt",
                "storage/c.txt",
            ]
        );

        reader.extract_all(&dest).unwrap();
        assert_eq!(fs::read_to_string(dest.join("storage/a/b.txt")).unwrap(), "hi");
        assert_eq!(fs::read_to_string(dest.join("storage/c.txt")).unwrap(), "bye");
        assert_eq!(fs::read_to_string(dest.join("data.yml")).unwrap(), "rows: []");
        assert_eq!(fs::read_to_string(dest.join("envizon.db.tar")).unwrap(), "DUMP");

        // no partial left behind, scratch cleaned up
        assert!(!partial_path(&job.output_path).exists());
        let scratch_entries: Vec<_> = fs::read_dir(tmp.path().join("scratch"))
            .unwrap()
            .collect();
        assert!(scratch_entries.is_empty());
    }

    #[tokio::test]
    async fn exported_files_keep_their_unix_modes() {
        let tmp = TempDir::new().unwrap();
        let storage = tmp.path().join("storage");
        fs::create_dir_all(&storage).unwrap();
        fs::write(storage.join("hook.sh"), "#!/bin/sh\n").unwrap();
        fs::set_permissions(storage.join("hook.sh"), fs::Permissions::from_mode(0o755)).unwrap();

        let job = job(&tmp, storage, stub_pg_dump(tmp.path()));
        let output = manager(&tmp).run(&job).await.unwrap();

        let dest = tmp.path().join("extracted");
        ArchiveReader::open(&output)
            .unwrap()
            .extract_all(&dest)
            .unwrap();

        let mode = fs::metadata(dest.join("storage/hook.sh"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o755);
    }

    #[tokio::test]
    async fn failed_relational_dump_aborts_without_partial_archive() {
        let tmp = TempDir::new().unwrap();
        let storage = tmp.path().join("storage");
        fs::create_dir_all(&storage).unwrap();

        let failing = write_script(
            tmp.path(),
            "fake-pg-dump",
            "#!/bin/sh\necho 'connection refused' >&2\nexit 1\n",
        );
        let job = job(&tmp, storage, failing);

        let err = manager(&tmp).run(&job).await.unwrap_err();
        assert_eq!(err.step, BackupStep::RelationalDump);
        assert!(err.to_string().contains("connection refused"));
        assert!(!job.output_path.exists());
        assert!(!partial_path(&job.output_path).exists());
    }

    #[tokio::test]
    async fn failed_data_dump_reports_step() {
        let tmp = TempDir::new().unwrap();
        let storage = tmp.path().join("storage");
        fs::create_dir_all(&storage).unwrap();

        let mut job = job(&tmp, storage, stub_pg_dump(tmp.path()));
        job.data_dump_command = vec!["envault-no-such-dump-task".to_string()];

        let err = manager(&tmp).run(&job).await.unwrap_err();
        assert_eq!(err.step, BackupStep::DataDump);
        assert!(!job.output_path.exists());
    }

    #[tokio::test]
    async fn missing_storage_root_fails_during_archive_write() {
        let tmp = TempDir::new().unwrap();
        let job = job(
            &tmp,
            tmp.path().join("does-not-exist"),
            stub_pg_dump(tmp.path()),
        );

        let err = manager(&tmp).run(&job).await.unwrap_err();
        assert_eq!(err.step, BackupStep::WriteArchive);
        assert!(!job.output_path.exists());
        assert!(!partial_path(&job.output_path).exists());
    }

    #[test]
    fn sweep_removes_only_prefixed_directories() {
        let tmp = TempDir::new().unwrap();
        let orphan = tmp.path().join(format!("{}abc123", SCRATCH_PREFIX));
        let keeper = tmp.path().join("unrelated");
        fs::create_dir_all(&orphan).unwrap();
        fs::create_dir_all(&keeper).unwrap();

        let removed = sweep_orphaned_scratch(tmp.path()).unwrap();
        assert_eq!(removed, 1);
        assert!(!orphan.exists());
        assert!(keeper.exists());
    }

    #[test]
    fn sweep_on_missing_parent_is_a_noop() {
        let tmp = TempDir::new().unwrap();
        let removed = sweep_orphaned_scratch(&tmp.path().join("nope")).unwrap();
        assert_eq!(removed, 0);
    }
}
