use super::LauncherApp;
use egui_thematic::ThemeConfig;

impl LauncherApp {
    /// Gruvbox dark with the amber-on-charcoal accents of the game's title screen.
    pub(super) fn get_theme_config(&self) -> ThemeConfig {
        ThemeConfig {
            name: "Cataclysm".to_string(),
            dark_mode: true,
            override_text_color: Some([235, 219, 178, 255]),
            override_weak_text_color: Some([146, 131, 116, 255]),
            override_warn_fg_color: Some([250, 189, 47, 255]),
            override_error_fg_color: Some([251, 73, 52, 255]),
            override_window_fill: Some([29, 32, 33, 255]),
            override_panel_fill: Some([29, 32, 33, 255]),
            override_selection_bg: Some([215, 153, 33, 255]),
            // Checkbox outline when unchecked, amber fill when checked
            override_widget_inactive_bg_stroke_color: Some([146, 131, 116, 200]),
            override_widget_inactive_bg_stroke_width: Some(1.5),
            override_widget_active_bg_fill: Some([215, 153, 33, 110]),
            override_widget_active_fg_stroke_width: Some(2.0),
            ..ThemeConfig::gruvbox_dark_preset()
        }
    }
}
