use super::journal::{Journal, JournalPhase};
use crate::config::{ASIDE_DIR, JOURNAL_FILE, PREVIOUS_VERSION_DIR};
use crate::error::UpdateError;
use crate::fileops::move_entries;
use crate::locks::LockRecovery;
use std::collections::HashSet;
use std::path::Path;

const ROLLBACK_STEPS: [JournalPhase; 3] = [
    JournalPhase::SettingAside,
    JournalPhase::Restoring,
    JournalPhase::Discarding,
];

/// Names the engine owns inside the game directory. Backup and rollback
/// never move them.
pub(crate) fn reserved_names() -> HashSet<String> {
    [
        PREVIOUS_VERSION_DIR.to_string(),
        JOURNAL_FILE.to_string(),
        format!("{}.tmp", JOURNAL_FILE),
        ASIDE_DIR.to_string(),
    ]
    .into_iter()
    .collect()
}

/// Reserved names plus the entries a session keeps in place.
pub(crate) fn exclusions(kept: &[String]) -> HashSet<String> {
    let mut names = reserved_names();
    names.extend(kept.iter().cloned());
    names
}

/// First rollback step for a journal found in `phase`. Nothing new has
/// been written while backing up, so that case skips straight to restoring.
pub(crate) fn rollback_start(phase: JournalPhase) -> JournalPhase {
    match phase {
        JournalPhase::BackingUp => JournalPhase::Restoring,
        JournalPhase::Installing => JournalPhase::SettingAside,
        other => other,
    }
}

fn failed(step: &str, e: impl std::fmt::Display) -> UpdateError {
    UpdateError::Rollback(format!("{}: {}", step, e))
}

/// Put `previous_version/` back in place of whatever the game directory
/// holds now.
///
/// 1. move the current entries into the aside directory,
/// 2. move `previous_version/` back into the game directory,
/// 3. move the set-aside entries into `previous_version/`.
///
/// The journal is advanced before each step and removed at the end, so a
/// run interrupted at any point can be repeated from its last phase.
pub(crate) async fn run_rollback<F>(
    game_dir: &Path,
    journal: &mut Journal,
    start: JournalPhase,
    recovery: &LockRecovery,
    mut on_moved: F,
) -> Result<(), UpdateError>
where
    F: FnMut(&str, u64, u64),
{
    crate::debug::log_section("Rollback");
    crate::debug::log(&format!("Game directory: {:?}, starting at {:?}", game_dir, start));

    let previous = game_dir.join(PREVIOUS_VERSION_DIR);
    let aside = game_dir.join(ASIDE_DIR);
    let exclude = exclusions(&journal.kept);
    let first = ROLLBACK_STEPS.iter().position(|s| *s == start).unwrap_or(0);

    for step in &ROLLBACK_STEPS[first..] {
        journal
            .advance(*step, game_dir)
            .map_err(|e| failed("could not update journal", e))?;

        match step {
            JournalPhase::SettingAside => {
                move_entries(game_dir, &aside, &exclude, recovery, None, &mut on_moved)
                    .await
                    .map_err(|e| failed("setting new files aside", e))?;
            }
            JournalPhase::Restoring => {
                let summary = move_entries(&previous, game_dir, &HashSet::new(), recovery, None, &mut on_moved)
                    .await
                    .map_err(|e| failed("restoring previous version", e))?;
                if !summary.skipped.is_empty() {
                    crate::debug::log(&format!(
                        "WARNING: left in previous_version because the name was taken: {:?}",
                        summary.skipped
                    ));
                }
            }
            _ => {
                move_entries(&aside, &previous, &HashSet::new(), recovery, None, &mut on_moved)
                    .await
                    .map_err(|e| failed("discarding new files", e))?;
                // Only removed when empty
                let _ = std::fs::remove_dir(&aside);
                let _ = std::fs::remove_dir(&previous);
            }
        }
    }

    Journal::remove(game_dir).map_err(|e| failed("could not remove journal", e))?;
    crate::debug::log("Rollback completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn swaps_new_files_with_previous_version() {
        let dir = tempfile::tempdir().unwrap();
        let game = dir.path();
        std::fs::create_dir_all(game.join("previous_version/data")).unwrap();
        std::fs::write(game.join("previous_version/cataclysm-tiles.exe"), b"old").unwrap();
        std::fs::write(game.join("cataclysm-tiles.exe"), b"new").unwrap();
        std::fs::create_dir_all(game.join("gfx")).unwrap();
        std::fs::create_dir_all(game.join("save")).unwrap();

        let mut journal = Journal::new(JournalPhase::Installing, vec!["save".into()], None);
        journal.save(game).unwrap();

        run_rollback(game, &mut journal, JournalPhase::SettingAside, &LockRecovery::give_up(), |_, _, _| {})
            .await
            .unwrap();

        assert_eq!(names(game), vec!["cataclysm-tiles.exe", "data", "previous_version", "save"]);
        assert_eq!(std::fs::read(game.join("cataclysm-tiles.exe")).unwrap(), b"old");
        assert_eq!(names(&game.join("previous_version")), vec!["cataclysm-tiles.exe", "gfx"]);
        assert_eq!(std::fs::read(game.join("previous_version/cataclysm-tiles.exe")).unwrap(), b"new");
        assert!(Journal::load(game).unwrap().is_none());
    }

    #[tokio::test]
    async fn resuming_from_restoring_finishes_a_half_done_backup() {
        let dir = tempfile::tempdir().unwrap();
        let game = dir.path();
        // Backup moved one entry before the process died
        std::fs::create_dir_all(game.join("previous_version")).unwrap();
        std::fs::write(game.join("previous_version/cataclysm-tiles.exe"), b"old").unwrap();
        std::fs::create_dir_all(game.join("data")).unwrap();

        let mut journal = Journal::new(JournalPhase::BackingUp, Vec::new(), None);
        journal.save(game).unwrap();

        run_rollback(
            game,
            &mut journal,
            rollback_start(JournalPhase::BackingUp),
            &LockRecovery::give_up(),
            |_, _, _| {},
        )
        .await
        .unwrap();

        assert_eq!(names(game), vec!["cataclysm-tiles.exe", "data"]);
    }

    #[test]
    fn exclusions_cover_engine_files_and_kept_entries() {
        let names = exclusions(&["save".to_string()]);
        assert!(names.contains(PREVIOUS_VERSION_DIR));
        assert!(names.contains(JOURNAL_FILE));
        assert!(names.contains(ASIDE_DIR));
        assert!(names.contains("save"));
    }
}
