use super::{AppState, LauncherApp};
use cdda_launcher::config::{APP_NAME, PREVIOUS_VERSION_DIR};
use cdda_launcher::prompt::{Decision, Prompt};
use cdda_launcher::settings::{keys, Graphics, Platform};
use eframe::egui;
use egui_thematic::render_theme_panel;

impl LauncherApp {
    fn show_modal(&mut self, ctx: &egui::Context) {
        let window_frame = egui::Frame::window(&ctx.style()).inner_margin(egui::Margin::same(16));

        egui::Window::new("launcher_modal")
            .order(egui::Order::Foreground)
            .collapsible(false)
            .resizable(false)
            .title_bar(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .frame(window_frame)
            .show(ctx, |ui| {
                ui.set_max_width(420.0);
                ui.vertical_centered(|ui| {
                    let question = self
                        .pending_prompt
                        .as_ref()
                        .map(|request| (request.prompt.clone(), request.prompt.message()));
                    if let Some((prompt, message)) = question {
                        let (heading, accept, reject) = match prompt {
                            Prompt::ConfirmRedownload { .. } => ("Already up to date", "Download again", "Keep current"),
                            Prompt::FileLocked { .. } => ("File in use", "Retry", "Cancel"),
                        };

                        ui.heading(heading);
                        ui.add_space(12.0);
                        ui.label(message);
                        ui.add_space(15.0);
                        ui.horizontal(|ui| {
                            if ui.button(accept).clicked() {
                                self.answer_prompt(Decision::Accept);
                            }
                            if ui.button(reject).clicked() {
                                self.answer_prompt(Decision::Reject);
                            }
                        });
                        return;
                    }

                    match self.state {
                        AppState::Complete => {
                            ui.colored_label(egui::Color32::from_rgb(184, 187, 38), "DONE");
                            ui.add_space(12.0);
                            ui.label(&self.result_message);
                            ui.add_space(15.0);
                            if ui.button("OK").clicked() {
                                self.state = AppState::Idle;
                            }
                        }
                        AppState::Error => {
                            ui.colored_label(ui.visuals().error_fg_color, "FAILED");
                            ui.add_space(12.0);
                            ui.label(&self.result_message);
                            ui.add_space(8.0);
                            ui.label("Check the log for details.");
                            ui.add_space(15.0);
                            ui.horizontal(|ui| {
                                if self.offer_retry && ui.button("Retry").clicked() {
                                    self.start_update(ui.ctx().clone());
                                }
                                if let Some(game_dir) = self.game_dir_path() {
                                    if ui.button("Save log to game folder").clicked() {
                                        match cdda_launcher::debug::copy_log_to(&game_dir) {
                                            Ok(path) => self.log(&format!("Log saved to {}", path.display())),
                                            Err(e) => self.log(&e),
                                        }
                                    }
                                }
                                if ui.button("OK").clicked() {
                                    self.state = AppState::Idle;
                                }
                            });
                        }
                        _ => {}
                    }
                });
            });
    }

    fn show_log_panel(&mut self, ctx: &egui::Context, show_modal: bool) {
        egui::SidePanel::right("log_panel")
            .resizable(true)
            .default_width(320.0)
            .min_width(200.0)
            .show(ctx, |ui| {
                ui.add_enabled_ui(!show_modal, |ui| {
                    ui.add_space(8.0);
                    ui.horizontal(|ui| {
                        ui.heading("Debug Log");
                        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                            if ui.button("X").on_hover_text("Close Log").clicked() {
                                self.show_log = false;
                            }
                        });
                    });

                    ui.horizontal(|ui| {
                        if ui.button("📋 Copy to Clipboard").clicked() {
                            let log_path = cdda_launcher::debug::get_log_path();
                            match std::fs::read_to_string(&log_path) {
                                Ok(contents) => {
                                    match arboard::Clipboard::new().and_then(|mut clipboard| clipboard.set_text(contents)) {
                                        Ok(_) => self.log("Log copied to clipboard"),
                                        Err(e) => self.log(&format!("Failed to copy to clipboard: {}", e)),
                                    }
                                }
                                Err(e) => self.log(&format!("Failed to read log file: {}", e)),
                            }
                        }
                    });

                    ui.separator();

                    egui::ScrollArea::vertical()
                        .stick_to_bottom(true)
                        .auto_shrink([false, false])
                        .show(ui, |ui| {
                            ui.set_width(ui.available_width());
                            let lines = self.log_messages.lock().map(|l| l.join("\n")).unwrap_or_default();
                            ui.add(
                                egui::TextEdit::multiline(&mut lines.as_str())
                                    .font(egui::TextStyle::Monospace)
                                    .desired_width(f32::INFINITY)
                                    .interactive(false),
                            );
                        });
                });
            });
    }

    fn show_settings(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        egui::Grid::new("settings_grid")
            .num_columns(2)
            .spacing([12.0, 8.0])
            .show(ui, |ui| {
                ui.label("Game directory");
                ui.horizontal(|ui| {
                    let response = ui.add(egui::TextEdit::singleline(&mut self.game_dir).desired_width(280.0));
                    if response.lost_focus() {
                        self.save_setting(keys::GAME_DIRECTORY, self.game_dir.trim());
                    }
                });
                ui.end_row();

                ui.label("Build");
                ui.horizontal(|ui| {
                    let selected_text = self
                        .selected_build_idx
                        .and_then(|idx| self.builds.get(idx))
                        .map(|b| b.number.clone())
                        .unwrap_or_else(|| "No build".to_string());
                    egui::ComboBox::from_id_salt("build_select")
                        .selected_text(selected_text)
                        .width(200.0)
                        .show_ui(ui, |ui| {
                            for (idx, build) in self.builds.iter().enumerate() {
                                let mut label = build.number.clone();
                                if idx == 0 {
                                    label.push_str(" (latest)");
                                }
                                if let Some(date) = build.date {
                                    label.push_str(&format!("  {}", date.format("%Y-%m-%d")));
                                }
                                let enabled = build.is_installable();
                                ui.add_enabled_ui(enabled, |ui| {
                                    ui.selectable_value(&mut self.selected_build_idx, Some(idx), label)
                                        .on_disabled_hover_text("No download for this platform");
                                });
                            }
                        });
                    if ui.button("🔄").on_hover_text("Refresh build list").clicked() {
                        self.fetch_builds(ctx.clone());
                    }
                });
                ui.end_row();

                ui.label("Platform");
                ui.horizontal(|ui| {
                    let before = (self.platform, self.graphics);
                    ui.selectable_value(&mut self.platform, Platform::X64, "64-bit");
                    ui.selectable_value(&mut self.platform, Platform::X86, "32-bit");
                    ui.separator();
                    ui.selectable_value(&mut self.graphics, Graphics::Tiles, "Tiles");
                    ui.selectable_value(&mut self.graphics, Graphics::Curses, "Curses");
                    if before != (self.platform, self.graphics) {
                        self.save_setting(keys::PLATFORM, self.platform.as_str());
                        self.save_setting(keys::GRAPHICS, self.graphics.as_str());
                        self.fetch_builds(ctx.clone());
                    }
                });
                ui.end_row();
            });

        ui.add_space(8.0);

        if ui.checkbox(&mut self.prevent_save_move, "Do not copy or move the save directory").changed() {
            self.save_setting(keys::PREVENT_SAVE_MOVE, &self.prevent_save_move.to_string());
        }
        if ui
            .checkbox(&mut self.remove_previous_version, "Remove previous version after update")
            .changed()
        {
            self.save_setting(keys::REMOVE_PREVIOUS_VERSION, &self.remove_previous_version.to_string());
        }
        ui.horizontal(|ui| {
            if ui.checkbox(&mut self.keep_archive_copy, "Keep a copy of the downloaded archive in").changed() {
                self.save_setting(keys::KEEP_ARCHIVE_COPY, &self.keep_archive_copy.to_string());
            }
            ui.add_enabled_ui(self.keep_archive_copy, |ui| {
                let response = ui.add(egui::TextEdit::singleline(&mut self.archive_dir).desired_width(180.0));
                if response.lost_focus() {
                    self.save_setting(keys::ARCHIVE_DIRECTORY, self.archive_dir.trim());
                }
            });
        });
    }

    fn show_progress(&self, ui: &mut egui::Ui, ctx: &egui::Context) {
        let (stage, message, current, total) = match self.progress.lock() {
            Ok(p) => (p.stage.clone(), p.message.clone(), p.current, p.total),
            Err(_) => return,
        };

        ui.vertical_centered(|ui| {
            let heading = match self.state {
                AppState::Recovering => "Finishing an interrupted update...".to_string(),
                AppState::FetchingBuilds => "Fetching builds...".to_string(),
                AppState::Cancelling => "Cancelling...".to_string(),
                _ if stage.is_empty() => "Starting...".to_string(),
                _ => stage,
            };
            ui.label(heading);
            ui.add_space(4.0);

            if total == 0 {
                // Animated indeterminate progress bar
                let time = ctx.input(|i| i.time);
                let desired_size = egui::vec2(ui.available_width() / 2.0, 16.0);
                let (outer_rect, _response) = ui.allocate_exact_size(desired_size, egui::Sense::hover());

                if ui.is_rect_visible(outer_rect) {
                    let visuals = ui.style().visuals.clone();
                    let corner_radius = outer_rect.height() / 2.0;
                    ui.painter().rect_filled(outer_rect, corner_radius, visuals.extreme_bg_color);

                    let cycle = (time * 0.8).sin() * 0.5 + 0.5;
                    let bar_width = outer_rect.width() * 0.3;
                    let bar_x = outer_rect.left() + (outer_rect.width() - bar_width) * cycle as f32;
                    let highlight_rect = egui::Rect::from_min_size(
                        egui::pos2(bar_x, outer_rect.top()),
                        egui::vec2(bar_width, outer_rect.height()),
                    );
                    ui.painter().rect_filled(highlight_rect, corner_radius, visuals.selection.bg_fill);
                }
                ctx.request_repaint();
            } else {
                ui.add(
                    egui::ProgressBar::new(current as f32 / total as f32)
                        .fill(ui.visuals().selection.bg_fill)
                        .desired_height(16.0)
                        .desired_width(ui.available_width() / 2.0),
                );
            }

            if !message.is_empty() {
                ui.add_space(4.0);
                ui.label(egui::RichText::new(message).small().color(ui.visuals().weak_text_color()));
            }
        });
    }
}

impl eframe::App for LauncherApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_tasks(ctx);

        let show_modal =
            self.pending_prompt.is_some() || matches!(self.state, AppState::Complete | AppState::Error);

        // Sync with system theme if it changes
        let is_dark = ctx.style().visuals.dark_mode;
        if is_dark != self.last_system_dark_mode {
            self.last_system_dark_mode = is_dark;
            self.theme_state.current_config = self.get_theme_config();
        }

        if !show_modal {
            render_theme_panel(ctx, &mut self.theme_state, &mut self.show_theme_editor);

            // Keyboard shortcut to toggle theme editor (Ctrl+T)
            if ctx.input_mut(|i| i.consume_shortcut(&egui::KeyboardShortcut::new(egui::Modifiers::CTRL, egui::Key::T))) {
                self.show_theme_editor = !self.show_theme_editor;
            }
        }

        if show_modal {
            self.show_modal(ctx);
        }

        if self.show_log {
            self.show_log_panel(ctx, show_modal);
        }

        // Prompts arrive on a channel; keep polling while work is running
        if self.is_busy() || self.state == AppState::FetchingBuilds {
            ctx.request_repaint_after(std::time::Duration::from_millis(200));
        }

        let panel_frame = egui::Frame::central_panel(&ctx.style()).fill(ctx.style().visuals.panel_fill);

        egui::CentralPanel::default().frame(panel_frame).show(ctx, |ui| {
            ui.add_enabled_ui(!show_modal, |ui| {
                ui.horizontal(|ui| {
                    ui.heading(APP_NAME);
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::TOP), |ui| {
                        if ui.button("🎨").on_hover_text("Toggle Theme Editor (Ctrl+T)").clicked() {
                            self.show_theme_editor = !self.show_theme_editor;
                        }
                        if ui.button("📜").on_hover_text("Toggle Log Area").clicked() {
                            self.show_log = !self.show_log;
                        }
                    });
                });

                ui.add_space(8.0);
                ui.separator();
                ui.add_space(8.0);

                let busy = self.is_busy();
                ui.add_enabled_ui(!busy, |ui| {
                    self.show_settings(ui, ctx);
                });

                ui.add_space(16.0);

                if busy || self.state == AppState::FetchingBuilds {
                    self.show_progress(ui, ctx);
                    ui.add_space(12.0);
                }

                ui.vertical_centered(|ui| {
                    if busy {
                        let can_cancel = self.state == AppState::Updating && self.cancel_token.is_some();
                        if can_cancel {
                            let button = egui::Button::new("Cancel")
                                .min_size(egui::vec2(96.0, 48.0))
                                .fill(egui::Color32::from_rgb(251, 73, 52)); // Red
                            if ui.add(button).clicked() {
                                self.cancel_update();
                            }
                        }
                        return;
                    }

                    ui.horizontal(|ui| {
                        let can_update = self.game_dir_path().is_some()
                            && self.selected_build_idx.is_some()
                            && self.state != AppState::FetchingBuilds;
                        ui.add_enabled_ui(can_update, |ui| {
                            let button = egui::Button::new("Update game")
                                .min_size(egui::vec2(120.0, 48.0))
                                .fill(egui::Color32::from_rgb(104, 157, 106)); // Green
                            if ui.add(button).clicked() {
                                self.start_update(ctx.clone());
                            }
                        });

                        let has_previous = self
                            .game_dir_path()
                            .is_some_and(|dir| dir.join(PREVIOUS_VERSION_DIR).is_dir());
                        ui.add_enabled_ui(has_previous, |ui| {
                            let button = egui::Button::new("Restore previous version").min_size(egui::vec2(120.0, 48.0));
                            if ui.add(button).clicked() {
                                self.start_restore(ctx.clone());
                            }
                        });
                    });
                });

                ui.add_space(10.0);
            });
        });
    }
}
