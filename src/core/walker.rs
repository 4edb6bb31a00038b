/// Blob storage tree traversal
///
/// Produces a lazy sequence of (relative path, kind) pairs for everything
/// under a root directory. Entries come out in a stable pre-order: each
/// directory is yielded strictly before its descendants, siblings sorted by
/// file name, so an archive built from the sequence can always create parent
/// directories before the files inside them.
///
/// Symlinks are skipped rather than followed. Following them could loop
/// forever on a cyclic link and would silently pull content from outside the
/// storage tree into a backup.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone)]
pub struct WalkedEntry {
    pub relative: PathBuf,
    pub kind: EntryKind,
}

/// Walk `root`, yielding every file and directory below it.
///
/// The root itself is not yielded. Re-invoking on the same root produces an
/// equivalent sequence as long as the tree is not mutated concurrently.
pub fn walk_tree(root: &Path) -> impl Iterator<Item = Result<WalkedEntry>> + '_ {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    return Some(
                        Err(err).with_context(|| format!("failed to walk {}", root.display())),
                    )
                }
            };

            if entry.depth() == 0 {
                return None;
            }

            let file_type = entry.file_type();
            if file_type.is_symlink() {
                warn!(path = %entry.path().display(), "skipping symlink in storage tree");
                return None;
            }
            if !file_type.is_dir() && !file_type.is_file() {
                warn!(path = %entry.path().display(), "skipping special file in storage tree");
                return None;
            }

            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };

            match entry.path().strip_prefix(root) {
                Ok(relative) => Some(Ok(WalkedEntry {
                    relative: relative.to_path_buf(),
                    kind,
                })),
                Err(err) => Some(Err(err).with_context(|| {
                    format!(
                        "walked path {} is not under {}",
                        entry.path().display(),
                        root.display()
                    )
                })),
            }
        })
}
