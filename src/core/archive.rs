/// Zip container reading and writing
///
/// The archive is a single zip file: directory markers and file entries in
/// walk order, with the central directory written once at `finish`. A reader
/// can therefore tell a fully written archive from a truncated one. File
/// content streams through `io::copy`, so arbitrarily large blobs never sit
/// whole in memory.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::warn;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::ArchiveError;

fn file_options() -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644)
}

fn dir_options() -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .unix_permissions(0o755)
}

/// Convert a relative filesystem path to a forward-slash archive name.
pub fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Streaming writer for a single archive.
///
/// The destination file is removed if the writer is dropped or aborted
/// before `finish`, so a half-written container is never left behind
/// looking like a valid archive.
pub struct ArchiveWriter {
    dest: PathBuf,
    zip: Option<ZipWriter<File>>,
    names: HashSet<String>,
    finished: bool,
}

impl ArchiveWriter {
    pub fn create(dest: &Path) -> Result<Self, ArchiveError> {
        let file = File::create(dest)?;
        Ok(Self {
            dest: dest.to_path_buf(),
            zip: Some(ZipWriter::new(file)),
            names: HashSet::new(),
            finished: false,
        })
    }

    pub fn destination(&self) -> &Path {
        &self.dest
    }

    fn register(&mut self, name: &str) -> Result<(), ArchiveError> {
        if !self.names.insert(name.to_string()) {
            return Err(ArchiveError::DuplicateEntry {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn zip_mut(&mut self) -> &mut ZipWriter<File> {
        // invariant: Some until finish(), which consumes self
        self.zip.as_mut().expect("archive writer used after finish")
    }

    pub fn add_directory(&mut self, name: &str) -> Result<(), ArchiveError> {
        self.register(name)?;
        self.zip_mut().add_directory(name, dir_options())?;
        Ok(())
    }

    /// Add one file entry, streaming `reader` into the container.
    /// Returns the number of content bytes written.
    pub fn add_file(&mut self, name: &str, reader: &mut impl Read) -> Result<u64, ArchiveError> {
        self.register(name)?;
        self.zip_mut().start_file(name, file_options())?;
        let written = io::copy(reader, self.zip_mut())?;
        Ok(written)
    }

    /// Like `add_file`, recording the source file's unix mode so the
    /// extractor can restore execute bits and other non-default modes.
    pub fn add_file_with_mode(
        &mut self,
        name: &str,
        reader: &mut impl Read,
        mode: u32,
    ) -> Result<u64, ArchiveError> {
        self.register(name)?;
        self.zip_mut()
            .start_file(name, file_options().unix_permissions(mode))?;
        let written = io::copy(reader, self.zip_mut())?;
        Ok(written)
    }

    /// Write the central directory and keep the destination file.
    pub fn finish(mut self) -> Result<(), ArchiveError> {
        if let Some(mut zip) = self.zip.take() {
            zip.finish()?;
        }
        self.finished = true;
        Ok(())
    }

    /// Discard the archive, removing the destination file.
    pub fn abort(self) {
        // Drop does the cleanup
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        if !self.finished {
            // close the file handle before unlinking
            self.zip.take();
            if let Err(err) = fs::remove_file(&self.dest) {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(
                        dest = %self.dest.display(),
                        %err,
                        "failed to remove incomplete archive"
                    );
                }
            }
        }
    }
}

/// Random-access reader over a finished archive.
#[derive(Debug)]
pub struct ArchiveReader {
    zip: ZipArchive<File>,
}

impl ArchiveReader {
    /// Open an archive, validating its central directory.
    ///
    /// A missing or inconsistent trailing directory (truncated upload,
    /// interrupted write) surfaces as `ArchiveError::Corrupt`.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::open(path)?;
        let zip = ZipArchive::new(file).map_err(|err| ArchiveError::Corrupt {
            reason: err.to_string(),
        })?;
        Ok(Self { zip })
    }

    pub fn len(&self) -> usize {
        self.zip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zip.len() == 0
    }

    /// Entry names in archive order.
    pub fn entry_names(&mut self) -> Result<Vec<String>, ArchiveError> {
        let mut names = Vec::with_capacity(self.zip.len());
        for i in 0..self.zip.len() {
            names.push(self.zip.by_index(i)?.name().to_string());
        }
        Ok(names)
    }

    /// Materialize every entry under `dest`.
    ///
    /// Directory entries are recreated; file entries get their parent
    /// directories created implicitly, so archives produced by tools that
    /// omit explicit directory markers still extract correctly. Any entry
    /// whose name resolves outside `dest` aborts the whole extraction with
    /// `ArchiveError::UnsafeEntry` before a single byte is written.
    pub fn extract_all(&mut self, dest: &Path) -> Result<usize, ArchiveError> {
        // validate every name first so a hostile entry cannot touch dest
        for i in 0..self.zip.len() {
            let entry = self.zip.by_index(i)?;
            if entry.enclosed_name().is_none() {
                return Err(ArchiveError::UnsafeEntry {
                    name: entry.name().to_string(),
                });
            }
        }

        let mut extracted = 0;
        for i in 0..self.zip.len() {
            let mut entry = self.zip.by_index(i)?;
            let relative = match entry.enclosed_name() {
                Some(p) => p.to_path_buf(),
                None => {
                    return Err(ArchiveError::UnsafeEntry {
                        name: entry.name().to_string(),
                    })
                }
            };
            let out_path = dest.join(relative);

            if entry.is_dir() {
                fs::create_dir_all(&out_path)?;
            } else {
                if let Some(parent) = out_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut out_file = File::create(&out_path)?;
                io::copy(&mut entry, &mut out_file)?;
            }

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = entry.unix_mode() {
                    fs::set_permissions(&out_path, fs::Permissions::from_mode(mode))?;
                }
            }

            extracted += 1;
        }
        Ok(extracted)
    }
}
