use crate::error::FileOpError;
use crate::locks::LockRecovery;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub enum DeleteProgress {
    Analysing,
    Started { total_files: u64, total_entries: u64 },
    Progress {
        deleted_files: u64,
        total_files: u64,
        current: String,
    },
    Completed,
    Aborted,
}

struct DeleteEntry {
    path: PathBuf,
    is_dir: bool,
}

/// Breadth-first listing of everything under `root`, root first.
/// Links are recorded as leaves and never followed.
async fn analyse(root: &Path, cancel_token: &CancellationToken) -> Result<Vec<DeleteEntry>, FileOpError> {
    let mut entries = vec![DeleteEntry {
        path: root.to_path_buf(),
        is_dir: true,
    }];
    let mut queue = VecDeque::from([root.to_path_buf()]);

    while let Some(dir) = queue.pop_front() {
        if cancel_token.is_cancelled() {
            return Err(FileOpError::Aborted);
        }

        let read_dir = std::fs::read_dir(&dir).map_err(|e| FileOpError::entry("scan", &dir, e))?;
        for entry in read_dir {
            let entry = entry.map_err(|e| FileOpError::entry("scan", &dir, e))?;
            let path = entry.path();
            let is_dir = entry
                .file_type()
                .map(|t| t.is_dir())
                .map_err(|e| FileOpError::entry("scan", &path, e))?;
            if is_dir {
                queue.push_back(path.clone());
            }
            entries.push(DeleteEntry { path, is_dir });
        }

        tokio::task::yield_now().await;
    }

    Ok(entries)
}

fn remove_entry(entry: &DeleteEntry) -> std::io::Result<()> {
    if entry.is_dir {
        std::fs::remove_dir(&entry.path)
    } else {
        std::fs::remove_file(&entry.path)
    }
}

/// Make the entry and the directory holding it writable.
fn clear_read_only(path: &Path) {
    for target in [Some(path), path.parent()].into_iter().flatten() {
        if let Ok(metadata) = std::fs::symlink_metadata(target) {
            let mut permissions = metadata.permissions();
            if permissions.readonly() {
                #[allow(clippy::permissions_set_readonly_false)]
                permissions.set_readonly(false);
                if std::fs::set_permissions(target, permissions).is_ok() {
                    crate::debug::log(&format!("Cleared read-only flag on {:?}", target));
                }
            }
        }
    }
}

/// Delete a directory tree, children before parents.
///
/// A failing entry gets one retry after its read-only flag is cleared, then
/// the user is asked through `recovery` as many times as they want to retry.
/// `Ok` means the root no longer exists. Any other outcome is
/// `Err(FileOpError::Aborted)` or an I/O error, and the tree may be partially
/// deleted.
pub async fn delete_directory_with_progress(
    root: &Path,
    recovery: &LockRecovery,
    progress_tx: mpsc::UnboundedSender<DeleteProgress>,
    cancel_token: CancellationToken,
) -> Result<(), FileOpError> {
    crate::debug::log_section("Delete Directory");
    crate::debug::log(&format!("Path: {:?}", root));

    if std::fs::symlink_metadata(root).is_err() {
        crate::debug::log("Nothing to delete");
        let _ = progress_tx.send(DeleteProgress::Completed);
        return Ok(());
    }

    let _ = progress_tx.send(DeleteProgress::Analysing);

    // Phase 1: analyse (no mutation)
    let entries = match analyse(root, &cancel_token).await {
        Ok(entries) => entries,
        Err(e) => {
            if matches!(e, FileOpError::Aborted) {
                crate::debug::log("Delete cancelled during analysis");
                let _ = progress_tx.send(DeleteProgress::Aborted);
            }
            return Err(e);
        }
    };

    let total_files = entries.iter().filter(|e| !e.is_dir).count() as u64;
    let total_entries = entries.len() as u64;
    crate::debug::log(&format!("Found {} files in {} entries", total_files, total_entries));
    let _ = progress_tx.send(DeleteProgress::Started {
        total_files,
        total_entries,
    });

    // Phase 2: delete in reverse discovery order
    let mut deleted_files = 0u64;
    for entry in entries.iter().rev() {
        if cancel_token.is_cancelled() {
            crate::debug::log("Delete cancelled by user");
            let _ = progress_tx.send(DeleteProgress::Aborted);
            return Err(FileOpError::Aborted);
        }

        let mut cleared = false;
        loop {
            match remove_entry(entry) {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
                Err(e) => {
                    if !cleared {
                        cleared = true;
                        clear_read_only(&entry.path);
                        continue;
                    }
                    if !recovery.should_retry("delete", &entry.path, &e).await {
                        let _ = progress_tx.send(DeleteProgress::Aborted);
                        return Err(FileOpError::Aborted);
                    }
                }
            }
        }

        if !entry.is_dir {
            deleted_files += 1;
            let _ = progress_tx.send(DeleteProgress::Progress {
                deleted_files,
                total_files,
                current: entry.path.to_string_lossy().to_string(),
            });
        }

        tokio::task::yield_now().await;
    }

    if std::fs::symlink_metadata(root).is_ok() {
        crate::debug::log("ERROR: root still exists after delete");
        let _ = progress_tx.send(DeleteProgress::Aborted);
        return Err(FileOpError::Aborted);
    }

    crate::debug::log("Delete completed");
    let _ = progress_tx.send(DeleteProgress::Completed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(mut rx: mpsc::UnboundedReceiver<DeleteProgress>) -> Vec<DeleteProgress> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn populate(root: &Path) {
        std::fs::create_dir_all(root.join("a/b/c")).unwrap();
        std::fs::write(root.join("top.txt"), b"1").unwrap();
        std::fs::write(root.join("a/one.txt"), b"1").unwrap();
        std::fs::write(root.join("a/b/two.txt"), b"2").unwrap();
        std::fs::write(root.join("a/b/c/three.txt"), b"3").unwrap();
    }

    #[tokio::test]
    async fn deletes_whole_tree_and_reports_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("previous_version");
        populate(&root);

        let (tx, rx) = mpsc::unbounded_channel();
        delete_directory_with_progress(&root, &LockRecovery::give_up(), tx, CancellationToken::new())
            .await
            .unwrap();

        assert!(!root.exists());
        let events = drain(rx);
        let mut last = 0;
        for event in &events {
            if let DeleteProgress::Progress { deleted_files, .. } = event {
                assert!(*deleted_files >= last);
                last = *deleted_files;
            }
        }
        assert_eq!(last, 4);
        assert!(matches!(events.last(), Some(DeleteProgress::Completed)));
    }

    #[tokio::test]
    async fn cancel_before_start_leaves_tree_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("doomed");
        populate(&root);

        let token = CancellationToken::new();
        token.cancel();
        let (tx, rx) = mpsc::unbounded_channel();

        let result = delete_directory_with_progress(&root, &LockRecovery::give_up(), tx, token).await;

        assert!(matches!(result, Err(FileOpError::Aborted)));
        assert!(root.join("a/b/c/three.txt").exists());
        assert!(matches!(drain(rx).last(), Some(DeleteProgress::Aborted)));
    }

    #[tokio::test]
    async fn missing_root_is_already_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        delete_directory_with_progress(
            &dir.path().join("nope"),
            &LockRecovery::give_up(),
            tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn read_only_directory_is_cleared_and_retried() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("locked");
        std::fs::create_dir_all(root.join("inner")).unwrap();
        std::fs::write(root.join("inner/file.txt"), b"x").unwrap();
        std::fs::set_permissions(root.join("inner"), std::fs::Permissions::from_mode(0o555)).unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        delete_directory_with_progress(&root, &LockRecovery::give_up(), tx, CancellationToken::new())
            .await
            .unwrap();

        assert!(!root.exists());
    }
}
