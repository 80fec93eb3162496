use cdda_launcher::builds::BuildDescriptor;
use cdda_launcher::error::UpdateError;
use cdda_launcher::prompt::{PromptRequest, Prompter};
use cdda_launcher::registry::JsonBuildRegistry;
use cdda_launcher::settings::{get_path, keys, ConfigStore, Graphics, JsonConfigStore, Platform, UpdateOptions};
use cdda_launcher::update::{UpdateEvent, UpdateOutcome};
use egui_thematic::ThemeEditorState;
use std::sync::{Arc, Mutex};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub enum AppState {
    Idle,
    Recovering,
    FetchingBuilds,
    Updating,
    Restoring,
    Cancelling,
    Complete,
    Error,
}

#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub current: u64,
    pub total: u64,
    pub bytes_per_sec: Option<u64>,
    pub stage: String,
    pub message: String,
}

/// Results sent back by background tasks.
pub enum TaskResult {
    Recovered(Result<bool, UpdateError>),
    Builds(Result<Vec<BuildDescriptor>, String>),
    Update(Result<UpdateOutcome, UpdateError>),
    Restore(Result<(), UpdateError>),
}

pub struct LauncherApp {
    // Runtime for async operations
    pub(super) runtime: Runtime,
    pub(super) client: reqwest::Client,

    // Persistence
    pub(super) store: Arc<JsonConfigStore>,
    pub(super) registry: Arc<JsonBuildRegistry>,

    // Form state
    pub(super) game_dir: String,
    pub(super) builds: Vec<BuildDescriptor>,
    pub(super) selected_build_idx: Option<usize>,
    pub(super) prevent_save_move: bool,
    pub(super) remove_previous_version: bool,
    pub(super) keep_archive_copy: bool,
    pub(super) archive_dir: String,
    pub(super) platform: Platform,
    pub(super) graphics: Graphics,

    // Progress tracking
    pub(super) state: AppState,
    pub(super) progress: Arc<Mutex<ProgressInfo>>,
    pub(super) log_messages: Arc<Mutex<Vec<String>>>,
    pub(super) result_message: String,
    /// The failed update can be tried again (download or extraction problems).
    pub(super) offer_retry: bool,

    // Cancellation token for aborting the running update
    pub(super) cancel_token: Option<CancellationToken>,

    // Channels to and from background tasks
    pub(super) events_tx: mpsc::UnboundedSender<UpdateEvent>,
    pub(super) task_tx: mpsc::UnboundedSender<TaskResult>,
    pub(super) task_rx: mpsc::UnboundedReceiver<TaskResult>,
    pub(super) prompter: Prompter,
    pub(super) prompt_rx: mpsc::UnboundedReceiver<PromptRequest>,
    pub(super) pending_prompt: Option<PromptRequest>,

    // Theme editor
    pub(super) theme_state: ThemeEditorState,
    pub(super) show_theme_editor: bool,
    pub(super) show_log: bool,
    pub(super) last_system_dark_mode: bool,
}

impl LauncherApp {
    pub fn new(cc: &eframe::CreationContext<'_>) -> Self {
        let runtime = Runtime::new().expect("Failed to create Tokio runtime");
        let client = cdda_launcher::download::build_client().expect("Failed to create HTTP client");

        let store = match JsonConfigStore::open_default() {
            Ok(store) => store,
            Err(e) => {
                cdda_launcher::debug::log(&format!("WARNING: settings unavailable, using defaults: {}", e));
                JsonConfigStore::in_memory()
            }
        };
        let registry = match JsonBuildRegistry::open_default() {
            Ok(registry) => registry,
            Err(e) => {
                cdda_launcher::debug::log(&format!("WARNING: build registry unavailable: {}", e));
                JsonBuildRegistry::in_memory()
            }
        };
        let options = UpdateOptions::from_store(&store);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (prompter, prompt_rx) = Prompter::channel();

        let is_dark = cc.egui_ctx.style().visuals.dark_mode;

        let mut app = Self {
            runtime,
            client,
            game_dir: get_path(&store, keys::GAME_DIRECTORY)
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            builds: Vec::new(),
            selected_build_idx: None,
            prevent_save_move: options.prevent_save_move,
            remove_previous_version: options.remove_previous_version,
            keep_archive_copy: options.keep_archive_copy,
            archive_dir: options
                .archive_directory
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            platform: options.platform,
            graphics: options.graphics,
            store: Arc::new(store),
            registry: Arc::new(registry),
            state: AppState::Idle,
            progress: Arc::new(Mutex::new(ProgressInfo {
                current: 0,
                total: 100,
                bytes_per_sec: None,
                stage: String::new(),
                message: String::new(),
            })),
            log_messages: Arc::new(Mutex::new(Vec::new())),
            result_message: String::new(),
            offer_retry: false,
            cancel_token: None,
            events_tx,
            task_tx,
            task_rx,
            prompter,
            prompt_rx,
            pending_prompt: None,
            theme_state: ThemeEditorState::default(),
            show_theme_editor: false,
            show_log: false,
            last_system_dark_mode: is_dark,
        };

        app.theme_state.current_config = app.get_theme_config();
        cc.egui_ctx.set_visuals(app.theme_state.current_config.to_visuals());

        app.spawn_event_relay(events_rx, cc.egui_ctx.clone());
        // Builds are fetched once recovery has finished
        app.recover_on_startup(cc.egui_ctx.clone());

        app
    }

    /// Persist a preference; a failure is only logged.
    pub(super) fn save_setting(&self, key: &str, value: &str) {
        if let Err(e) = self.store.set(key, value) {
            self.log(&format!("Could not save setting {}: {}", key, e));
        }
    }

    pub(super) fn is_busy(&self) -> bool {
        matches!(
            self.state,
            AppState::Recovering | AppState::Updating | AppState::Restoring | AppState::Cancelling
        )
    }
}
