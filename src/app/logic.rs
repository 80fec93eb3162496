use super::{AppState, LauncherApp, TaskResult};
use cdda_launcher::builds::fetch_builds;
use cdda_launcher::config::BUILDS_REPOSITORY;
use cdda_launcher::fileops::format_bytes;
use cdda_launcher::locks::{LockRecovery, SystemLockInspector};
use cdda_launcher::prompt::Decision;
use cdda_launcher::registry::BuildRegistry;
use cdda_launcher::settings::{keys, UpdateOptions};
use cdda_launcher::update::{
    recover_interrupted_update, InstallReport, UpdateEvent, UpdateOutcome, UpdateRequest, Updater,
};
use eframe::egui;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

impl LauncherApp {
    pub(super) fn log(&self, msg: &str) {
        cdda_launcher::debug::log(msg);
        if let Ok(mut logs) = self.log_messages.lock() {
            logs.push(msg.to_string());
            // Keep only last 100 messages
            if logs.len() > 100 {
                logs.remove(0);
            }
        }
    }

    pub(super) fn game_dir_path(&self) -> Option<PathBuf> {
        let trimmed = self.game_dir.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        }
    }

    fn lock_recovery(&self) -> LockRecovery {
        LockRecovery::new(self.prompter.clone(), Arc::new(SystemLockInspector))
    }

    fn update_options(&self) -> UpdateOptions {
        let archive_dir = self.archive_dir.trim();
        UpdateOptions {
            prevent_save_move: self.prevent_save_move,
            remove_previous_version: self.remove_previous_version,
            keep_archive_copy: self.keep_archive_copy,
            archive_directory: (!archive_dir.is_empty()).then(|| PathBuf::from(archive_dir)),
            platform: self.platform,
            graphics: self.graphics,
            launcher_path: std::env::current_exe().ok(),
            download_root: None,
        }
    }

    fn updater(&self) -> Updater {
        let registry: Arc<dyn BuildRegistry> = self.registry.clone();
        Updater::new(
            self.update_options(),
            registry,
            self.lock_recovery(),
            self.client.clone(),
            self.events_tx.clone(),
        )
    }

    /// Persist every preference shown in the form.
    pub(super) fn save_settings(&self) {
        self.save_setting(keys::GAME_DIRECTORY, self.game_dir.trim());
        self.save_setting(keys::PREVENT_SAVE_MOVE, &self.prevent_save_move.to_string());
        self.save_setting(keys::REMOVE_PREVIOUS_VERSION, &self.remove_previous_version.to_string());
        self.save_setting(keys::KEEP_ARCHIVE_COPY, &self.keep_archive_copy.to_string());
        self.save_setting(keys::ARCHIVE_DIRECTORY, self.archive_dir.trim());
        self.save_setting(keys::PLATFORM, self.platform.as_str());
        self.save_setting(keys::GRAPHICS, self.graphics.as_str());
    }

    /// Mirror engine events into the shared progress state.
    pub(super) fn spawn_event_relay(&self, mut events_rx: mpsc::UnboundedReceiver<UpdateEvent>, ctx: egui::Context) {
        let progress = self.progress.clone();
        let log_messages = self.log_messages.clone();

        self.runtime.spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    UpdateEvent::StageChanged(stage) => {
                        if let Ok(mut p) = progress.lock() {
                            p.stage = stage.to_string();
                            p.current = 0;
                            p.total = 0;
                            p.bytes_per_sec = None;
                            p.message.clear();
                        }
                    }
                    UpdateEvent::Status(line) => {
                        if let Ok(mut logs) = log_messages.lock() {
                            logs.push(line);
                            if logs.len() > 100 {
                                logs.remove(0);
                            }
                        }
                    }
                    UpdateEvent::Progress {
                        current,
                        total,
                        bytes_per_sec,
                        detail,
                    } => {
                        if let Ok(mut p) = progress.lock() {
                            p.current = current;
                            p.total = total;
                            p.bytes_per_sec = bytes_per_sec;
                            p.message = match bytes_per_sec {
                                Some(speed) => format!(
                                    "{} / {} ({}/s)",
                                    format_bytes(current),
                                    format_bytes(total),
                                    format_bytes(speed)
                                ),
                                None if detail.is_empty() => format!("{} / {}", current, total),
                                None => detail,
                            };
                        }
                    }
                    UpdateEvent::ContentCarried(report) => {
                        if !report.copied.is_empty() {
                            if let Ok(mut logs) = log_messages.lock() {
                                logs.push(format!("Custom {} kept: {}", report.kind, report.copied.len()));
                            }
                        }
                    }
                }
                ctx.request_repaint();
            }
        });
    }

    /// Finish a rollback a previous run left behind, before anything else.
    pub(super) fn recover_on_startup(&mut self, ctx: egui::Context) {
        let tx = self.task_tx.clone();
        let Some(game_dir) = self.game_dir_path() else {
            let _ = tx.send(TaskResult::Recovered(Ok(false)));
            return;
        };

        self.state = AppState::Recovering;
        let recovery = self.lock_recovery();
        self.runtime.spawn(async move {
            let result = recover_interrupted_update(&game_dir, &recovery).await;
            let _ = tx.send(TaskResult::Recovered(result));
            ctx.request_repaint();
        });
    }

    pub(super) fn fetch_builds(&mut self, ctx: egui::Context) {
        self.state = AppState::FetchingBuilds;
        self.log(&format!("Fetching builds for {} {}...", self.platform.as_str(), self.graphics.as_str()));

        let client = self.client.clone();
        let platform = self.platform;
        let graphics = self.graphics;
        let tx = self.task_tx.clone();
        self.runtime.spawn(async move {
            let result = fetch_builds(&client, BUILDS_REPOSITORY, platform, graphics).await;
            let _ = tx.send(TaskResult::Builds(result));
            ctx.request_repaint();
        });
    }

    pub(super) fn start_update(&mut self, ctx: egui::Context) {
        let Some(game_dir) = self.game_dir_path() else {
            self.log("Choose a game directory first");
            return;
        };
        self.save_settings();
        self.reset_progress();

        let request = UpdateRequest {
            game_dir,
            builds: self.builds.clone(),
            selected: self.selected_build_idx,
        };
        let updater = self.updater();
        let cancel_token = CancellationToken::new();
        self.cancel_token = Some(cancel_token.clone());
        self.state = AppState::Updating;
        self.offer_retry = false;

        let tx = self.task_tx.clone();
        self.runtime.spawn(async move {
            let result = updater.update_game(request, cancel_token).await;
            let _ = tx.send(TaskResult::Update(result));
            ctx.request_repaint();
        });
    }

    pub(super) fn start_restore(&mut self, ctx: egui::Context) {
        let Some(game_dir) = self.game_dir_path() else {
            self.log("Choose a game directory first");
            return;
        };
        self.reset_progress();
        self.state = AppState::Restoring;

        let updater = self.updater();
        let tx = self.task_tx.clone();
        self.runtime.spawn(async move {
            let result = updater.restore_previous_version(&game_dir).await;
            let _ = tx.send(TaskResult::Restore(result));
            ctx.request_repaint();
        });
    }

    pub(super) fn cancel_update(&mut self) {
        if let Some(token) = &self.cancel_token {
            self.log("Cancelling update...");
            token.cancel();
            self.state = AppState::Cancelling;
            // Clear the cancel token so we don't try to cancel again
            self.cancel_token = None;
        }
    }

    fn reset_progress(&self) {
        if let Ok(mut p) = self.progress.lock() {
            p.current = 0;
            p.total = 0;
            p.bytes_per_sec = None;
            p.stage.clear();
            p.message.clear();
        }
    }

    /// Drain background results and pending questions. Called every frame.
    pub(super) fn poll_tasks(&mut self, ctx: &egui::Context) {
        while let Ok(result) = self.task_rx.try_recv() {
            match result {
                TaskResult::Recovered(Ok(recovered)) => {
                    if recovered {
                        self.log("Restored the game directory after an interrupted update");
                    }
                    self.fetch_builds(ctx.clone());
                }
                TaskResult::Recovered(Err(e)) => {
                    self.log(&format!("Recovery of an interrupted update failed: {}", e));
                    self.result_message = format!("Could not finish an interrupted update.\n{}", e);
                    self.state = AppState::Error;
                }
                TaskResult::Builds(Ok(builds)) => {
                    self.log(&format!("{} builds available", builds.len()));
                    self.selected_build_idx = builds.iter().position(|b| b.is_installable());
                    self.builds = builds;
                    if self.state == AppState::FetchingBuilds {
                        self.state = AppState::Idle;
                    }
                }
                TaskResult::Builds(Err(e)) => {
                    self.log(&format!("Could not fetch builds: {}", e));
                    if self.state == AppState::FetchingBuilds {
                        self.state = AppState::Idle;
                    }
                }
                TaskResult::Update(result) => {
                    self.cancel_token = None;
                    match result {
                        Ok(UpdateOutcome::Installed(report)) => self.finish_with(&report, "Installation completed"),
                        Ok(UpdateOutcome::Updated(report)) => self.finish_with(&report, "Update completed"),
                        Ok(UpdateOutcome::Cancelled) => {
                            self.log("Update cancelled");
                            self.state = AppState::Idle;
                        }
                        Ok(UpdateOutcome::Declined) => {
                            self.state = AppState::Idle;
                        }
                        Err(e) => {
                            self.log(&format!("Update failed: {}", e));
                            self.offer_retry = e.offers_retry();
                            self.result_message = e.to_string();
                            self.state = AppState::Error;
                        }
                    }
                }
                TaskResult::Restore(Ok(())) => {
                    self.result_message = "The previous version is back in place.".to_string();
                    self.state = AppState::Complete;
                }
                TaskResult::Restore(Err(e)) => {
                    self.log(&format!("Restore failed: {}", e));
                    self.offer_retry = false;
                    self.result_message = e.to_string();
                    self.state = AppState::Error;
                }
            }
        }

        if self.pending_prompt.is_none() {
            if let Ok(request) = self.prompt_rx.try_recv() {
                self.pending_prompt = Some(request);
            }
        }
    }

    fn finish_with(&mut self, report: &InstallReport, headline: &str) {
        let mut message = format!("{}: build {}", headline, report.build_number);
        if let Some(version) = &report.executable.version {
            message.push_str(&format!(" ({})", version));
        }
        if !report.is_latest {
            message.push_str("\nA newer build is available.");
        }
        for warning in &report.warnings {
            message.push_str(&format!("\n{}", warning));
        }
        self.log(&message);
        self.result_message = message;
        self.state = AppState::Complete;
    }

    pub(super) fn answer_prompt(&mut self, decision: Decision) {
        if let Some(request) = self.pending_prompt.take() {
            self.log(&format!("{} -> {:?}", request.prompt.message(), decision));
            request.answer(decision);
        }
    }
}
