use super::journal::Journal;
use crate::builds::BuildDescriptor;
use std::fmt;
use std::path::{Path, PathBuf};

/// Sub-steps of content reconciliation, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStep {
    CarryOver(&'static str),
    Tilesets,
    Soundpacks,
    Mods,
    UserMods,
    Fonts,
}

/// The one thing an update session is doing right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Downloading { url: String },
    Validating { archive: PathBuf },
    ClearingPreviousBackup,
    BackingUpCurrent,
    Extracting { archive: PathBuf },
    AnalysingNewExecutable,
    ReconcilingContent { step: ReconcileStep },
    RemovingPreviousVersion,
    RollingBack,
    Done,
}

impl Stage {
    /// Whether an interruption in this stage has to be undone by a rollback.
    pub fn needs_rollback(&self) -> bool {
        matches!(
            self,
            Stage::BackingUpCurrent
                | Stage::Extracting { .. }
                | Stage::AnalysingNewExecutable
                | Stage::ReconcilingContent { .. }
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Idle => write!(f, "Idle"),
            Stage::Downloading { .. } => write!(f, "Downloading build"),
            Stage::Validating { .. } => write!(f, "Checking archive"),
            Stage::ClearingPreviousBackup => write!(f, "Removing old previous version"),
            Stage::BackingUpCurrent => write!(f, "Backing up current version"),
            Stage::Extracting { .. } => write!(f, "Extracting build"),
            Stage::AnalysingNewExecutable => write!(f, "Analysing new executable"),
            Stage::ReconcilingContent { step } => match step {
                ReconcileStep::CarryOver(dir) => write!(f, "Copying {} from previous version", dir),
                ReconcileStep::Tilesets => write!(f, "Copying custom tilesets"),
                ReconcileStep::Soundpacks => write!(f, "Copying custom soundpacks"),
                ReconcileStep::Mods => write!(f, "Copying custom mods"),
                ReconcileStep::UserMods => write!(f, "Copying custom user mods"),
                ReconcileStep::Fonts => write!(f, "Copying custom fonts"),
            },
            Stage::RemovingPreviousVersion => write!(f, "Removing previous version"),
            Stage::RollingBack => write!(f, "Restoring previous version"),
            Stage::Done => write!(f, "Done"),
        }
    }
}

/// State of one `update_game` call.
pub struct UpdateSession {
    pub game_dir: PathBuf,
    pub build: BuildDescriptor,
    /// An executable was present before the session started.
    pub had_executable: bool,
    /// Top-level names left in the game directory during backup.
    pub kept: Vec<String>,
    pub download_dir: Option<tempfile::TempDir>,
    pub archive_path: Option<PathBuf>,
    /// Durable marker, present from the start of the backup.
    pub journal: Option<Journal>,
    pub stage: Stage,
}

impl UpdateSession {
    pub fn new(game_dir: &Path, build: BuildDescriptor, had_executable: bool) -> Self {
        Self {
            game_dir: game_dir.to_path_buf(),
            build,
            had_executable,
            kept: Vec::new(),
            download_dir: None,
            archive_path: None,
            journal: None,
            stage: Stage::Idle,
        }
    }

    pub fn previous_dir(&self) -> PathBuf {
        self.game_dir.join(crate::config::PREVIOUS_VERSION_DIR)
    }

    /// Drop the temporary download directory and everything in it.
    pub fn discard_download(&mut self) {
        self.archive_path = None;
        if let Some(dir) = self.download_dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                crate::debug::log(&format!("WARNING: could not remove {:?}: {}", path, e));
            } else {
                crate::debug::log(&format!("Removed download directory {:?}", path));
            }
        }
    }
}
