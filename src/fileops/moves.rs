use crate::error::FileOpError;
use crate::locks::LockRecovery;
use std::collections::HashSet;
use std::path::Path;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveSummary {
    pub moved: Vec<String>,
    /// Names left behind because the destination already held them.
    pub skipped: Vec<String>,
}

fn is_cross_device(error: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        error.raw_os_error() == Some(libc::EXDEV)
    }
    #[cfg(windows)]
    {
        // ERROR_NOT_SAME_DEVICE
        error.raw_os_error() == Some(17)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = error;
        false
    }
}

/// Rename one entry. Locked files go through `recovery`; a rename across
/// volumes cannot succeed by retrying and fails immediately.
pub async fn move_entry(src: &Path, dst: &Path, recovery: &LockRecovery) -> Result<(), FileOpError> {
    loop {
        match tokio::fs::rename(src, dst).await {
            Ok(()) => return Ok(()),
            Err(e) if is_cross_device(&e) || e.kind() == std::io::ErrorKind::NotFound => {
                crate::debug::log(&format!("ERROR: cannot move {:?} to {:?}: {}", src, dst, e));
                return Err(FileOpError::entry("move", src, e));
            }
            Err(e) => {
                if !recovery.should_retry("move", src, &e).await {
                    return Err(FileOpError::entry("move", src, e));
                }
            }
        }
    }
}

/// Move every top-level entry of `from` into `to`, one rename per step.
///
/// Names in `exclude` stay where they are. An entry whose name already exists
/// in `to` is skipped and reported, never overwritten. `on_moved` receives
/// the name, the number of entries handled so far and the total. A missing
/// `from` moves nothing.
pub async fn move_entries<F>(
    from: &Path,
    to: &Path,
    exclude: &HashSet<String>,
    recovery: &LockRecovery,
    cancel_token: Option<&CancellationToken>,
    mut on_moved: F,
) -> Result<MoveSummary, FileOpError>
where
    F: FnMut(&str, u64, u64),
{
    let mut summary = MoveSummary::default();
    if !from.is_dir() {
        crate::debug::log(&format!("Nothing to move from {:?}", from));
        return Ok(summary);
    }

    let mut names = Vec::new();
    for entry in std::fs::read_dir(from).map_err(|e| FileOpError::entry("scan", from, e))? {
        let entry = entry.map_err(|e| FileOpError::entry("scan", from, e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !exclude.contains(&name) {
            names.push(name);
        }
    }
    names.sort();

    tokio::fs::create_dir_all(to)
        .await
        .map_err(|e| FileOpError::entry("create", to, e))?;

    let total = names.len() as u64;
    for (index, name) in names.iter().enumerate() {
        if cancel_token.is_some_and(|t| t.is_cancelled()) {
            crate::debug::log("Move cancelled");
            return Err(FileOpError::Aborted);
        }

        let src = from.join(name);
        let dst = to.join(name);
        if std::fs::symlink_metadata(&dst).is_ok() {
            crate::debug::log(&format!("Skipping {}: already present in {:?}", name, to));
            summary.skipped.push(name.clone());
        } else {
            move_entry(&src, &dst, recovery).await?;
            summary.moved.push(name.clone());
        }

        on_moved(name, index as u64 + 1, total);
        tokio::task::yield_now().await;
    }

    crate::debug::log(&format!(
        "Moved {} entries from {:?} to {:?} ({} skipped)",
        summary.moved.len(),
        from,
        to,
        summary.skipped.len()
    ));
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn moves_all_but_excluded_entries() {
        let dir = tempfile::tempdir().unwrap();
        let game = dir.path().join("game");
        std::fs::create_dir_all(game.join("data")).unwrap();
        std::fs::create_dir_all(game.join("save")).unwrap();
        std::fs::write(game.join("cataclysm-tiles.exe"), b"exe").unwrap();

        let exclude: HashSet<String> = ["save".to_string()].into_iter().collect();
        let mut seen = Vec::new();
        let summary = move_entries(
            &game,
            &game.join("previous_version"),
            &exclude,
            &LockRecovery::give_up(),
            None,
            |name, done, total| seen.push((name.to_string(), done, total)),
        )
        .await
        .unwrap();

        // the destination directory itself is not in the listing taken before creation
        assert_eq!(summary.moved, vec!["cataclysm-tiles.exe".to_string(), "data".to_string()]);
        assert!(game.join("save").is_dir());
        assert!(game.join("previous_version/data").is_dir());
        assert_eq!(seen.last(), Some(&("data".to_string(), 2, 2)));
    }

    #[tokio::test]
    async fn collisions_are_skipped_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("from");
        let to = dir.path().join("to");
        std::fs::create_dir_all(&from).unwrap();
        std::fs::create_dir_all(&to).unwrap();
        std::fs::write(from.join("a.txt"), b"new").unwrap();
        std::fs::write(to.join("a.txt"), b"old").unwrap();

        let summary = move_entries(&from, &to, &HashSet::new(), &LockRecovery::give_up(), None, |_, _, _| {})
            .await
            .unwrap();

        assert_eq!(summary.skipped, vec!["a.txt".to_string()]);
        assert_eq!(std::fs::read(to.join("a.txt")).unwrap(), b"old");
        assert!(from.join("a.txt").exists());
    }

    #[tokio::test]
    async fn cancelled_move_stops_before_next_entry() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("from");
        std::fs::create_dir_all(&from).unwrap();
        std::fs::write(from.join("a"), b"").unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let result = move_entries(
            &from,
            &dir.path().join("to"),
            &HashSet::new(),
            &LockRecovery::give_up(),
            Some(&token),
            |_, _, _| {},
        )
        .await;

        assert!(matches!(result, Err(FileOpError::Aborted)));
        assert!(from.join("a").exists());
    }

    #[tokio::test]
    async fn missing_source_moves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let summary = move_entries(
            &dir.path().join("absent"),
            &dir.path().join("to"),
            &HashSet::new(),
            &LockRecovery::give_up(),
            None,
            |_, _, _| {},
        )
        .await
        .unwrap();
        assert_eq!(summary, MoveSummary::default());
    }
}
