//! The game directory update engine.
//!
//! One [`Updater::update_game`] call runs a session through its stages in
//! order: download, validate, clear the old rollback slot, back up the
//! current build into `previous_version/`, extract, analyse the new
//! executable, carry user content over and optionally drop the rollback
//! slot. From the backup onwards any cancellation or failure is undone by a
//! rollback, and a journal file makes that rollback resumable after a crash.

mod events;
mod journal;
mod rollback;
mod session;


pub use events::UpdateEvent;
pub use journal::{Journal, JournalPhase};
pub use session::{ReconcileStep, Stage, UpdateSession};

use crate::archive::{extract_archive, validate_archive, ExtractProgress, Validation};
use crate::builds::BuildDescriptor;
use crate::config::{
    CARRY_OVER_DIRS, DATA_MODS_DIR, FONT_DIR, GFX_DIR, PREVIOUS_VERSION_DIR, SAVE_DIR, SOUND_DIR, TEMP_PREFIX,
    USER_MODS_DIR,
};
use crate::content::{
    reconcile_directory, FontIdentity, IdentityExtractor, ModIdentity, ReconcileReport, SoundpackIdentity,
    TilesetIdentity,
};
use crate::download::{download_build, DownloadProgress};
use crate::error::{ArchiveError, DownloadError, FileOpError, UpdateError};
use crate::fileops::{
    copy_directory_with_progress, debug_log_skip_set, delete_directory_with_progress, move_entries, CopyProgress,
    DeleteProgress,
};
use crate::locks::LockRecovery;
use crate::probe::{find_executable, hash_and_extract_version, ExecutableInfo, HashProgress};
use crate::prompt::{Decision, Prompt};
use crate::registry::BuildRegistry;
use crate::settings::UpdateOptions;
use events::forward;
use rollback::{exclusions, reserved_names, rollback_start, run_rollback};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What to install and where.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub game_dir: PathBuf,
    /// Known builds, newest first. The first one is "latest".
    pub builds: Vec<BuildDescriptor>,
    pub selected: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct InstallReport {
    pub build_number: String,
    pub executable: ExecutableInfo,
    /// The installed build is the newest one known.
    pub is_latest: bool,
    pub carried: Vec<ReconcileReport>,
    /// Problems that did not stop the update (archive copy, conflicts, ...).
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// The game directory held no game before.
    Installed(InstallReport),
    Updated(InstallReport),
    /// Stopped by the user; the directory is back to its previous state.
    Cancelled,
    /// The user chose not to download the installed build again.
    Declined,
}

/// Why a session stopped early.
enum Interrupt {
    Cancelled,
    Failed(UpdateError),
}

impl From<UpdateError> for Interrupt {
    fn from(error: UpdateError) -> Self {
        Interrupt::Failed(error)
    }
}

/// A primitive stopped by the token is a cancellation, anything else
/// (including a declined retry prompt) is a failure of the stage.
fn file_interrupt(
    cancel_token: &CancellationToken,
    error: FileOpError,
    wrap: impl FnOnce(String) -> UpdateError,
) -> Interrupt {
    if matches!(error, FileOpError::Aborted) && cancel_token.is_cancelled() {
        Interrupt::Cancelled
    } else {
        Interrupt::Failed(wrap(error.to_string()))
    }
}

/// Top-level entries that stay in the game directory while it is backed up.
fn kept_entries(options: &UpdateOptions, game_dir: &Path) -> Vec<String> {
    let mut kept = Vec::new();
    if options.prevent_save_move && game_dir.join(SAVE_DIR).exists() {
        kept.push(SAVE_DIR.to_string());
    }

    if let Some(launcher) = &options.launcher_path {
        let launcher = std::fs::canonicalize(launcher).unwrap_or_else(|_| launcher.clone());
        let root = std::fs::canonicalize(game_dir).unwrap_or_else(|_| game_dir.to_path_buf());
        if let Some(first) = launcher.strip_prefix(&root).ok().and_then(|rel| rel.components().next()) {
            let name = first.as_os_str().to_string_lossy().to_string();
            crate::debug::log(&format!("Launcher lives in the game directory, keeping {:?}", name));
            kept.push(name);
        }
    }
    kept
}

/// Finish a rollback left behind by a crashed session. Returns whether there
/// was anything to recover.
pub async fn recover_interrupted_update(game_dir: &Path, recovery: &LockRecovery) -> Result<bool, UpdateError> {
    let Some(mut journal) = Journal::load(game_dir)? else {
        return Ok(false);
    };

    crate::debug::log_section("Recover Interrupted Update");
    crate::debug::log(&format!(
        "Found journal in phase {:?} from {}",
        journal.phase, journal.started_at
    ));

    let start = rollback_start(journal.phase);
    run_rollback(game_dir, &mut journal, start, recovery, |_, _, _| {}).await?;
    Ok(true)
}

pub struct Updater {
    options: UpdateOptions,
    registry: Arc<dyn BuildRegistry>,
    recovery: LockRecovery,
    client: reqwest::Client,
    events: mpsc::UnboundedSender<UpdateEvent>,
}

impl Updater {
    pub fn new(
        options: UpdateOptions,
        registry: Arc<dyn BuildRegistry>,
        recovery: LockRecovery,
        client: reqwest::Client,
        events: mpsc::UnboundedSender<UpdateEvent>,
    ) -> Self {
        Self {
            options,
            registry,
            recovery,
            client,
            events,
        }
    }

    fn status(&self, message: &str) {
        crate::debug::log(message);
        let _ = self.events.send(UpdateEvent::Status(message.to_string()));
    }

    fn enter(&self, session: &mut UpdateSession, stage: Stage) {
        crate::debug::log_section(&stage.to_string());
        session.stage = stage.clone();
        let _ = self.events.send(UpdateEvent::StageChanged(stage.clone()));
        let _ = self.events.send(UpdateEvent::Status(format!("{}...", stage)));
    }

    /// Progress callback for the entry-by-entry moves of backup and rollback.
    fn move_progress(&self) -> impl FnMut(&str, u64, u64) + Send + 'static {
        let events = self.events.clone();
        move |name, done, total| {
            let _ = events.send(UpdateEvent::Progress {
                current: done,
                total,
                bytes_per_sec: None,
                detail: name.to_string(),
            });
        }
    }

    /// Install or update the selected build into `request.game_dir`.
    pub async fn update_game(
        &self,
        request: UpdateRequest,
        cancel_token: CancellationToken,
    ) -> Result<UpdateOutcome, UpdateError> {
        crate::debug::log_section("Update Game");
        crate::debug::log(&format!("Game directory: {:?}", request.game_dir));

        if recover_interrupted_update(&request.game_dir, &self.recovery).await? {
            self.status("Recovered the game directory from an interrupted update");
        }

        let (build, had_executable) = match self.check_preconditions(&request) {
            Ok(checked) => checked,
            Err(e) => {
                self.status(&format!("Cannot update: {}", e));
                return Err(e);
            }
        };
        let latest = request.builds[0].clone();

        if had_executable {
            match self.confirm_redownload(&request.game_dir, &latest, &cancel_token).await {
                Ok(true) => {}
                Ok(false) => {
                    self.status("Update declined");
                    return Ok(UpdateOutcome::Declined);
                }
                Err(Interrupt::Cancelled) => {
                    self.status("Update cancelled");
                    return Ok(UpdateOutcome::Cancelled);
                }
                Err(Interrupt::Failed(e)) => return Err(e),
            }
        }

        let mut session = UpdateSession::new(&request.game_dir, build, had_executable);
        session.kept = kept_entries(&self.options, &request.game_dir);

        let result = self.run_session(&mut session, &latest, &cancel_token).await;
        session.discard_download();

        let interrupt = match result {
            Ok(report) => {
                let completed = if session.had_executable {
                    "Update completed"
                } else {
                    "Installation completed"
                };
                let latest_note = if report.is_latest {
                    "you are running the latest build".to_string()
                } else {
                    format!("build {} is newer", latest.number)
                };
                self.enter(&mut session, Stage::Done);
                self.status(&format!("{} (build {}, {})", completed, report.build_number, latest_note));

                return Ok(if session.had_executable {
                    UpdateOutcome::Updated(report)
                } else {
                    UpdateOutcome::Installed(report)
                });
            }
            Err(interrupt) => interrupt,
        };

        if session.stage.needs_rollback() {
            let start = if session.stage == Stage::BackingUpCurrent {
                JournalPhase::Restoring
            } else {
                JournalPhase::SettingAside
            };
            if let Err(rollback_error) = self.roll_back(&mut session, start).await {
                let message = match &interrupt {
                    Interrupt::Cancelled => format!("{} (after cancellation)", rollback_error),
                    Interrupt::Failed(e) => format!("{} (after: {})", rollback_error, e),
                };
                self.status(&format!("Rollback failed: {}", message));
                return Err(UpdateError::Rollback(message));
            }
            self.status("Previous version restored");
        }

        match interrupt {
            Interrupt::Cancelled => {
                self.status("Update cancelled");
                Ok(UpdateOutcome::Cancelled)
            }
            Interrupt::Failed(e) => {
                self.status(&format!("Update failed: {}", e));
                Err(e)
            }
        }
    }

    /// Swap the live installation with `previous_version/`.
    pub async fn restore_previous_version(&self, game_dir: &Path) -> Result<(), UpdateError> {
        crate::debug::log_section("Restore Previous Version");
        recover_interrupted_update(game_dir, &self.recovery).await?;

        let previous = game_dir.join(PREVIOUS_VERSION_DIR);
        let has_content = std::fs::read_dir(&previous)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if !has_content {
            return Err(UpdateError::NoPreviousVersion(game_dir.to_path_buf()));
        }

        self.status("Restoring previous version...");
        let mut journal = Journal::new(JournalPhase::SettingAside, kept_entries(&self.options, game_dir), None);
        journal.save(game_dir)?;
        run_rollback(
            game_dir,
            &mut journal,
            JournalPhase::SettingAside,
            &self.recovery,
            self.move_progress(),
        )
        .await?;
        self.status("Previous version restored");
        Ok(())
    }

    fn check_preconditions(&self, request: &UpdateRequest) -> Result<(BuildDescriptor, bool), UpdateError> {
        if request.builds.is_empty() {
            return Err(UpdateError::NoBuilds);
        }
        let build = request
            .selected
            .and_then(|index| request.builds.get(index))
            .cloned()
            .ok_or(UpdateError::NoBuildSelected)?;
        if !build.is_installable() {
            return Err(UpdateError::BuildNotInstallable(build.number));
        }

        let game_dir = &request.game_dir;
        let had_executable = match std::fs::metadata(game_dir) {
            Ok(metadata) if !metadata.is_dir() => return Err(UpdateError::TargetIsFile(game_dir.clone())),
            Ok(_) => {
                let had_executable = find_executable(game_dir).is_some();
                let reserved = reserved_names();
                let has_foreign_entries = std::fs::read_dir(game_dir)?
                    .flatten()
                    .any(|e| !reserved.contains(e.file_name().to_string_lossy().as_ref()));
                if !had_executable && has_foreign_entries {
                    return Err(UpdateError::TargetNotEmpty(game_dir.clone()));
                }
                had_executable
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                crate::debug::log(&format!("Creating game directory {:?}", game_dir));
                std::fs::create_dir_all(game_dir)?;
                false
            }
            Err(e) => return Err(e.into()),
        };

        crate::debug::log(&format!(
            "Selected build {} (existing executable: {})",
            build.number, had_executable
        ));
        Ok((build, had_executable))
    }

    /// Ask before downloading the build that is already installed.
    async fn confirm_redownload(
        &self,
        game_dir: &Path,
        latest: &BuildDescriptor,
        cancel_token: &CancellationToken,
    ) -> Result<bool, Interrupt> {
        let Some(executable) = find_executable(game_dir) else {
            return Ok(true);
        };

        let (tx, handle) = forward::<HashProgress>(&self.events);
        let result = hash_and_extract_version(&executable, tx, cancel_token.clone()).await;
        let _ = handle.await;
        let info = result.map_err(|e| file_interrupt(cancel_token, e, UpdateError::Analysis))?;

        let installed = self
            .registry
            .lookup_build_by_sha256(&info.sha256)
            .and_then(|record| record.build_number);
        match installed {
            Some(installed) if installed == latest.number => {
                let decision = self
                    .recovery
                    .prompter()
                    .ask(Prompt::ConfirmRedownload {
                        installed,
                        latest: latest.number.clone(),
                    })
                    .await;
                Ok(decision == Decision::Accept)
            }
            _ => Ok(true),
        }
    }

    async fn run_session(
        &self,
        session: &mut UpdateSession,
        latest: &BuildDescriptor,
        cancel_token: &CancellationToken,
    ) -> Result<InstallReport, Interrupt> {
        let mut warnings = Vec::new();

        let archive = self.download(session, cancel_token).await?;
        self.validate(session, &archive, cancel_token).await?;
        self.keep_archive_copy(&archive, &mut warnings).await;
        self.clear_previous_version(session, cancel_token).await?;
        self.back_up_current(session, cancel_token).await?;
        self.extract(session, &archive, cancel_token).await?;
        let executable = self.analyse(session, cancel_token, &mut warnings).await?;
        let carried = self.reconcile(session, cancel_token, &mut warnings).await?;

        // The new build is complete; nothing to roll back from here on
        Journal::remove(&session.game_dir).map_err(UpdateError::from)?;
        session.journal = None;

        self.remove_previous_version(session, &mut warnings).await;

        Ok(InstallReport {
            build_number: session.build.number.clone(),
            executable,
            is_latest: session.build.number == latest.number,
            carried,
            warnings,
        })
    }

    async fn download(
        &self,
        session: &mut UpdateSession,
        cancel_token: &CancellationToken,
    ) -> Result<PathBuf, Interrupt> {
        let url = session
            .build
            .url
            .clone()
            .ok_or_else(|| UpdateError::BuildNotInstallable(session.build.number.clone()))?;
        self.enter(session, Stage::Downloading { url: url.clone() });

        let root = self
            .options
            .download_root
            .clone()
            .or_else(dirs::cache_dir)
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&root).map_err(|e| UpdateError::Download(e.to_string()))?;
        let dir = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir_in(&root)
            .map_err(|e| UpdateError::Download(e.to_string()))?;
        let dest = dir.path().to_path_buf();
        session.download_dir = Some(dir);

        let (tx, handle) = forward::<DownloadProgress>(&self.events);
        let result = download_build(&self.client, &url, &dest, tx, cancel_token.clone()).await;
        let _ = handle.await;

        match result {
            Ok(path) => {
                session.archive_path = Some(path.clone());
                Ok(path)
            }
            Err(DownloadError::Cancelled) => Err(Interrupt::Cancelled),
            Err(e) => Err(UpdateError::Download(e.to_string()).into()),
        }
    }

    async fn validate(
        &self,
        session: &mut UpdateSession,
        archive: &Path,
        cancel_token: &CancellationToken,
    ) -> Result<(), Interrupt> {
        self.enter(
            session,
            Stage::Validating {
                archive: archive.to_path_buf(),
            },
        );

        if let Validation::Invalid(reason) = validate_archive(archive).await {
            session.discard_download();
            return Err(UpdateError::InvalidArchive(reason).into());
        }
        if cancel_token.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        Ok(())
    }

    async fn keep_archive_copy(&self, archive: &Path, warnings: &mut Vec<String>) {
        if !self.options.keep_archive_copy {
            return;
        }
        let Some(dir) = &self.options.archive_directory else {
            warnings.push("Keeping the archive is enabled but no archive directory is set".to_string());
            return;
        };
        let Some(name) = archive.file_name() else {
            return;
        };

        let dest = dir.join(name);
        let result = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::copy(archive, &dest).await
        }
        .await;

        match result {
            Ok(_) => self.status(&format!("Archive kept at {}", dest.display())),
            Err(e) => {
                crate::debug::log(&format!("WARNING: could not keep archive: {}", e));
                warnings.push(format!("Could not keep a copy of the archive: {}", e));
            }
        }
    }

    async fn clear_previous_version(
        &self,
        session: &mut UpdateSession,
        cancel_token: &CancellationToken,
    ) -> Result<(), Interrupt> {
        let previous = session.previous_dir();
        if std::fs::symlink_metadata(&previous).is_err() {
            return Ok(());
        }
        self.enter(session, Stage::ClearingPreviousBackup);

        let (tx, handle) = forward::<DeleteProgress>(&self.events);
        let result = delete_directory_with_progress(&previous, &self.recovery, tx, cancel_token.clone()).await;
        let _ = handle.await;
        result.map_err(|e| file_interrupt(cancel_token, e, UpdateError::ClearPreviousVersion))
    }

    async fn back_up_current(
        &self,
        session: &mut UpdateSession,
        cancel_token: &CancellationToken,
    ) -> Result<(), Interrupt> {
        let journal = Journal::new(
            JournalPhase::BackingUp,
            session.kept.clone(),
            Some(session.build.number.clone()),
        );
        journal
            .save(&session.game_dir)
            .map_err(|e| UpdateError::Backup(e.to_string()))?;
        session.journal = Some(journal);

        self.enter(session, Stage::BackingUpCurrent);
        let exclude = exclusions(&session.kept);
        let summary = move_entries(
            &session.game_dir,
            &session.previous_dir(),
            &exclude,
            &self.recovery,
            Some(cancel_token),
            self.move_progress(),
        )
        .await
        .map_err(|e| file_interrupt(cancel_token, e, UpdateError::Backup))?;

        if !summary.skipped.is_empty() {
            return Err(UpdateError::Backup(format!("could not move {:?}", summary.skipped)).into());
        }
        Ok(())
    }

    async fn extract(
        &self,
        session: &mut UpdateSession,
        archive: &Path,
        cancel_token: &CancellationToken,
    ) -> Result<(), Interrupt> {
        if let Some(journal) = session.journal.as_mut() {
            journal
                .advance(JournalPhase::Installing, &session.game_dir)
                .map_err(|e| UpdateError::Extraction(e.to_string()))?;
        }
        self.enter(
            session,
            Stage::Extracting {
                archive: archive.to_path_buf(),
            },
        );

        let (tx, handle) = forward::<ExtractProgress>(&self.events);
        let result = extract_archive(archive, &session.game_dir, tx, cancel_token.clone()).await;
        let _ = handle.await;

        // The archive is not needed past this point, whatever happened
        session.discard_download();

        match result {
            Ok(_) => Ok(()),
            Err(ArchiveError::Cancelled) => Err(Interrupt::Cancelled),
            Err(e) => Err(UpdateError::Extraction(e.to_string()).into()),
        }
    }

    async fn analyse(
        &self,
        session: &mut UpdateSession,
        cancel_token: &CancellationToken,
        warnings: &mut Vec<String>,
    ) -> Result<ExecutableInfo, Interrupt> {
        self.enter(session, Stage::AnalysingNewExecutable);
        if cancel_token.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }

        let executable = find_executable(&session.game_dir).ok_or(UpdateError::NoExecutable)?;
        let (tx, handle) = forward::<HashProgress>(&self.events);
        let result = hash_and_extract_version(&executable, tx, cancel_token.clone()).await;
        let _ = handle.await;
        let info = result.map_err(|e| file_interrupt(cancel_token, e, UpdateError::Analysis))?;

        if let Some(version) = &info.version {
            if let Err(e) = self.registry.record_version(version, &info.sha256, info.stable) {
                crate::debug::log(&format!("WARNING: could not record version: {}", e));
                warnings.push(format!("Could not record the game version: {}", e));
            }
        }
        if let Err(e) = self.registry.record_build(
            info.version.as_deref(),
            &info.sha256,
            &session.build.number,
            session.build.date,
        ) {
            crate::debug::log(&format!("WARNING: could not record build: {}", e));
            warnings.push(format!("Could not record the build number: {}", e));
        }

        Ok(info)
    }

    async fn reconcile(
        &self,
        session: &mut UpdateSession,
        cancel_token: &CancellationToken,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<ReconcileReport>, Interrupt> {
        let game_dir = session.game_dir.clone();
        let previous = session.previous_dir();
        let skip = debug_log_skip_set(&previous);
        let save_kept = session.kept.iter().any(|name| name == SAVE_DIR);

        for &dir in CARRY_OVER_DIRS {
            if dir == SAVE_DIR && save_kept {
                continue;
            }
            let source = previous.join(dir);
            if !source.is_dir() {
                continue;
            }

            self.enter(
                session,
                Stage::ReconcilingContent {
                    step: ReconcileStep::CarryOver(dir),
                },
            );
            let dest = game_dir.join(dir);
            if std::fs::symlink_metadata(&dest).is_ok() {
                crate::debug::log(&format!("{:?} already exists in the new build, not copied", dest));
                warnings.push(format!("{} already exists in the new build and was not copied", dir));
                continue;
            }

            let (tx, handle) = forward::<CopyProgress>(&self.events);
            let result = copy_directory_with_progress(&source, &dest, &skip, tx, cancel_token.clone()).await;
            let _ = handle.await;
            result.map_err(|e| {
                file_interrupt(cancel_token, e, |message| UpdateError::Reconcile {
                    what: dir.to_string(),
                    message,
                })
            })?;
        }

        let steps: [(ReconcileStep, &str, &dyn IdentityExtractor); 5] = [
            (ReconcileStep::Tilesets, GFX_DIR, &TilesetIdentity),
            (ReconcileStep::Soundpacks, SOUND_DIR, &SoundpackIdentity),
            (ReconcileStep::Mods, DATA_MODS_DIR, &ModIdentity),
            (ReconcileStep::UserMods, USER_MODS_DIR, &ModIdentity),
            (ReconcileStep::Fonts, FONT_DIR, &FontIdentity),
        ];

        let mut carried = Vec::new();
        for (step, relative, extractor) in steps {
            self.enter(session, Stage::ReconcilingContent { step });
            let target = game_dir.join(relative);

            let (tx, handle) = forward::<CopyProgress>(&self.events);
            let result = reconcile_directory(
                extractor,
                &target,
                &previous.join(relative),
                &target,
                tx,
                cancel_token.clone(),
            )
            .await;
            let _ = handle.await;
            let report = result.map_err(|e| {
                file_interrupt(cancel_token, e, |message| UpdateError::Reconcile {
                    what: extractor.kind().to_string(),
                    message,
                })
            })?;

            if !report.copied.is_empty() {
                self.status(&format!("Kept custom {}: {}", report.kind, report.copied.join(", ")));
            }
            if !report.skipped_conflicts.is_empty() {
                warnings.push(format!(
                    "Custom {} not copied because the name is taken: {}",
                    report.kind,
                    report.skipped_conflicts.join(", ")
                ));
            }
            let _ = self.events.send(UpdateEvent::ContentCarried(report.clone()));
            carried.push(report);
        }

        Ok(carried)
    }

    /// Runs after the update succeeded: a failure is only reported.
    async fn remove_previous_version(&self, session: &mut UpdateSession, warnings: &mut Vec<String>) {
        if !self.options.remove_previous_version {
            return;
        }
        self.enter(session, Stage::RemovingPreviousVersion);

        let (tx, handle) = forward::<DeleteProgress>(&self.events);
        let result =
            delete_directory_with_progress(&session.previous_dir(), &self.recovery, tx, CancellationToken::new())
                .await;
        let _ = handle.await;

        if let Err(e) = result {
            crate::debug::log(&format!("WARNING: could not remove previous version: {}", e));
            warnings.push(format!("Could not remove the previous version: {}", e));
        }
    }

    async fn roll_back(&self, session: &mut UpdateSession, start: JournalPhase) -> Result<(), UpdateError> {
        self.enter(session, Stage::RollingBack);
        let mut journal = session.journal.take().unwrap_or_else(|| {
            Journal::new(start, session.kept.clone(), Some(session.build.number.clone()))
        });
        run_rollback(
            &session.game_dir,
            &mut journal,
            start,
            &self.recovery,
            self.move_progress(),
        )
        .await
    }
}
