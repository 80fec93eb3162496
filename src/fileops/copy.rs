use super::RateMeter;
use crate::config::{CHUNK_SIZE, DEBUG_LOG_FILES, PROGRESS_CHUNK_INTERVAL};
use crate::error::FileOpError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub enum CopyProgress {
    Counting,
    Started { total_bytes: u64, total_files: u64 },
    Progress {
        copied_bytes: u64,
        total_bytes: u64,
        copied_files: u64,
        total_files: u64,
        bytes_per_sec: u64,
        current_file: String,
    },
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: u64,
    pub bytes: u64,
}

struct CopyEntry {
    path: PathBuf,
    relative: PathBuf,
    is_dir: bool,
    size: u64,
}

/// Absolute paths of the debug logs under `root` that are never carried over.
pub fn debug_log_skip_set(root: &Path) -> HashSet<PathBuf> {
    DEBUG_LOG_FILES.iter().map(|rel| root.join(rel)).collect()
}

/// Walk `dir` depth-first, directories before their contents.
fn collect_entries(
    root: &Path,
    dir: &Path,
    skip: &HashSet<PathBuf>,
    entries: &mut Vec<CopyEntry>,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if skip.contains(&path) {
            crate::debug::log(&format!("Skipping {:?}", path));
            continue;
        }

        let metadata = if entry.file_type()?.is_symlink() {
            // Links to files are copied as files; others are left behind
            match std::fs::metadata(&path) {
                Ok(target) if target.is_file() => target,
                Ok(_) => {
                    crate::debug::log(&format!("Not following directory link {:?}", path));
                    continue;
                }
                Err(e) => {
                    crate::debug::log(&format!("Skipping broken link {:?}: {}", path, e));
                    continue;
                }
            }
        } else {
            entry.metadata()?
        };
        let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        if metadata.is_dir() {
            entries.push(CopyEntry {
                path: path.clone(),
                relative,
                is_dir: true,
                size: 0,
            });
            collect_entries(root, &path, skip, entries)?;
        } else {
            entries.push(CopyEntry {
                path,
                relative,
                is_dir: false,
                size: metadata.len(),
            });
        }
    }
    Ok(())
}

/// Running totals for one copy operation.
struct Tally<'a> {
    progress_tx: &'a mpsc::UnboundedSender<CopyProgress>,
    meter: RateMeter,
    chunks: u64,
    copied_bytes: u64,
    copied_files: u64,
    total_bytes: u64,
    total_files: u64,
}

impl Tally<'_> {
    fn report(&mut self, current_file: &str) {
        let bytes_per_sec = self.meter.sample(self.copied_bytes);
        let _ = self.progress_tx.send(CopyProgress::Progress {
            copied_bytes: self.copied_bytes,
            total_bytes: self.total_bytes,
            copied_files: self.copied_files,
            total_files: self.total_files,
            bytes_per_sec,
            current_file: current_file.to_string(),
        });
    }
}

/// Stream one file in fixed-size chunks, then carry over its timestamps and
/// permissions.
async fn copy_file_chunked(
    source: &Path,
    dest: &Path,
    label: &str,
    tally: &mut Tally<'_>,
    cancel_token: &CancellationToken,
) -> Result<(), FileOpError> {
    let mut reader = File::open(source)
        .await
        .map_err(|e| FileOpError::entry("open", source, e))?;
    let mut writer = File::create(dest)
        .await
        .map_err(|e| FileOpError::entry("create", dest, e))?;

    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        if cancel_token.is_cancelled() {
            return Err(FileOpError::Aborted);
        }

        let read = reader
            .read(&mut buffer)
            .await
            .map_err(|e| FileOpError::entry("read", source, e))?;
        if read == 0 {
            break;
        }
        writer
            .write_all(&buffer[..read])
            .await
            .map_err(|e| FileOpError::entry("write", dest, e))?;

        tally.copied_bytes += read as u64;
        tally.chunks += 1;
        if tally.chunks % PROGRESS_CHUNK_INTERVAL == 0 {
            tally.report(label);
        }
    }

    writer
        .flush()
        .await
        .map_err(|e| FileOpError::entry("write", dest, e))?;
    drop(writer);

    preserve_metadata(source, dest).map_err(|e| FileOpError::entry("set metadata on", dest, e))?;
    tally.copied_files += 1;
    Ok(())
}

fn preserve_metadata(source: &Path, dest: &Path) -> std::io::Result<()> {
    let metadata = std::fs::metadata(source)?;
    if let Ok(modified) = metadata.modified() {
        let file = std::fs::OpenOptions::new().write(true).open(dest)?;
        file.set_modified(modified)?;
    }
    // Permissions last: a read-only source would make the file unwritable
    std::fs::set_permissions(dest, metadata.permissions())
}

/// Copy a directory tree into a destination that must not exist yet.
///
/// `skip` holds absolute source paths to leave out (debug logs and the like).
/// On cancellation the partial destination is left in place and the caller
/// decides what to do with it.
pub async fn copy_directory_with_progress(
    source_dir: &Path,
    dest_dir: &Path,
    skip: &HashSet<PathBuf>,
    progress_tx: mpsc::UnboundedSender<CopyProgress>,
    cancel_token: CancellationToken,
) -> Result<CopyStats, FileOpError> {
    crate::debug::log_section("Copy Files");
    crate::debug::log(&format!("Source: {:?}", source_dir));
    crate::debug::log(&format!("Destination: {:?}", dest_dir));

    if !source_dir.is_dir() {
        return Err(FileOpError::SourceNotDirectory(source_dir.to_path_buf()));
    }
    if std::fs::symlink_metadata(dest_dir).is_ok() {
        return Err(FileOpError::DestinationExists(dest_dir.to_path_buf()));
    }

    if cancel_token.is_cancelled() {
        let _ = progress_tx.send(CopyProgress::Aborted);
        return Err(FileOpError::Aborted);
    }

    let _ = progress_tx.send(CopyProgress::Counting);

    // Phase 1: analyse
    let mut entries = Vec::new();
    collect_entries(source_dir, source_dir, skip, &mut entries)
        .map_err(|e| FileOpError::entry("scan", source_dir, e))?;

    let total_files = entries.iter().filter(|e| !e.is_dir).count() as u64;
    let total_bytes: u64 = entries.iter().map(|e| e.size).sum();

    crate::debug::log(&format!("Found {} files, {} bytes total", total_files, total_bytes));
    let _ = progress_tx.send(CopyProgress::Started { total_bytes, total_files });

    // Phase 2: copy
    std::fs::create_dir_all(dest_dir).map_err(|e| FileOpError::entry("create", dest_dir, e))?;

    let mut tally = Tally {
        progress_tx: &progress_tx,
        meter: RateMeter::new(),
        chunks: 0,
        copied_bytes: 0,
        copied_files: 0,
        total_bytes,
        total_files,
    };

    for entry in &entries {
        if cancel_token.is_cancelled() {
            crate::debug::log("Copy cancelled by user");
            let _ = progress_tx.send(CopyProgress::Aborted);
            return Err(FileOpError::Aborted);
        }

        let dest_path = dest_dir.join(&entry.relative);

        if entry.is_dir {
            std::fs::create_dir_all(&dest_path)
                .map_err(|e| FileOpError::entry("create", &dest_path, e))?;
        } else {
            let label = entry.relative.to_string_lossy().to_string();
            match copy_file_chunked(&entry.path, &dest_path, &label, &mut tally, &cancel_token).await {
                Ok(()) => {}
                Err(FileOpError::Aborted) => {
                    crate::debug::log("Copy cancelled by user");
                    let _ = progress_tx.send(CopyProgress::Aborted);
                    return Err(FileOpError::Aborted);
                }
                Err(e) => return Err(e),
            }
        }

        tokio::task::yield_now().await;
    }

    // Final progress update
    tally.report("");

    crate::debug::log("Copy completed successfully");
    let _ = progress_tx.send(CopyProgress::Completed);

    Ok(CopyStats {
        files: tally.copied_files,
        bytes: tally.copied_bytes,
    })
}

/// Copy a single file (e.g. a custom font) to a destination that must not exist.
pub async fn copy_file_with_progress(
    source: &Path,
    dest: &Path,
    progress_tx: mpsc::UnboundedSender<CopyProgress>,
    cancel_token: CancellationToken,
) -> Result<CopyStats, FileOpError> {
    if std::fs::symlink_metadata(dest).is_ok() {
        return Err(FileOpError::DestinationExists(dest.to_path_buf()));
    }

    let total_bytes = std::fs::metadata(source)
        .map_err(|e| FileOpError::entry("read metadata of", source, e))?
        .len();
    let _ = progress_tx.send(CopyProgress::Started { total_bytes, total_files: 1 });

    let mut tally = Tally {
        progress_tx: &progress_tx,
        meter: RateMeter::new(),
        chunks: 0,
        copied_bytes: 0,
        copied_files: 0,
        total_bytes,
        total_files: 1,
    };

    let label = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    if let Err(e) = copy_file_chunked(source, dest, &label, &mut tally, &cancel_token).await {
        if matches!(e, FileOpError::Aborted) {
            let _ = progress_tx.send(CopyProgress::Aborted);
        }
        return Err(e);
    }

    tally.report("");
    let _ = progress_tx.send(CopyProgress::Completed);

    Ok(CopyStats {
        files: tally.copied_files,
        bytes: tally.copied_bytes,
    })
}
