// Module structure for the launcher window
//
// - state.rs: Core types (AppState, ProgressInfo, LauncherApp struct) and initialization
// - theme.rs: Theme configuration
// - logic.rs: Background tasks driving the update engine
// - ui.rs: UI rendering (eframe::App implementation)

mod state;
mod theme;
mod logic;
mod ui;

pub use state::{LauncherApp, AppState, ProgressInfo, TaskResult};
