// Update journal
// A small JSON marker in the game directory saying which part of an update
// or rollback is under way, so an interrupted one can be finished on the
// next start. Every phase is safe to re-run.

use crate::config::JOURNAL_FILE;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalPhase {
    /// Live entries are being moved into `previous_version/`.
    BackingUp,
    /// The new build is being extracted, analysed and reconciled.
    Installing,
    /// Rollback: new entries are being moved into the aside directory.
    SettingAside,
    /// Rollback: `previous_version/` is being moved back into place.
    Restoring,
    /// Rollback: set-aside entries are being moved into `previous_version/`.
    Discarding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    pub phase: JournalPhase,
    /// Top-level names that never leave the game directory.
    pub kept: Vec<String>,
    pub build: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl Journal {
    pub fn new(phase: JournalPhase, kept: Vec<String>, build: Option<String>) -> Self {
        Self {
            phase,
            kept,
            build,
            started_at: Utc::now(),
        }
    }

    pub fn path(game_dir: &Path) -> PathBuf {
        game_dir.join(JOURNAL_FILE)
    }

    pub fn load(game_dir: &Path) -> Result<Option<Self>, StoreError> {
        let path = Self::path(game_dir);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Write through a temporary file and rename, so a crash never leaves a
    /// half-written journal.
    pub fn save(&self, game_dir: &Path) -> Result<(), StoreError> {
        let path = Self::path(game_dir);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, &path)?;
        crate::debug::log(&format!("Journal phase: {:?}", self.phase));
        Ok(())
    }

    pub fn advance(&mut self, phase: JournalPhase, game_dir: &Path) -> Result<(), StoreError> {
        self.phase = phase;
        self.save(game_dir)
    }

    pub fn remove(game_dir: &Path) -> Result<(), StoreError> {
        match std::fs::remove_file(Self::path(game_dir)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Journal::load(dir.path()).unwrap(), None);

        let mut journal = Journal::new(JournalPhase::BackingUp, vec!["save".into()], Some("11000".into()));
        journal.save(dir.path()).unwrap();
        journal.advance(JournalPhase::Restoring, dir.path()).unwrap();

        let loaded = Journal::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.phase, JournalPhase::Restoring);
        assert_eq!(loaded.kept, vec!["save".to_string()]);
        assert!(!dir.path().join(".update-journal.json.tmp").exists());

        Journal::remove(dir.path()).unwrap();
        Journal::remove(dir.path()).unwrap();
        assert_eq!(Journal::load(dir.path()).unwrap(), None);
    }
}
