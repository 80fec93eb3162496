// ============================================================================
// LAUNCHER CONFIGURATION
// ============================================================================
// Compile-time constants shared by the update engine and the front-end.
// Runtime preferences (game directory, save handling, ...) live in
// settings.rs and are read through a ConfigStore.
// ============================================================================

// ----------------------------------------------------------------------------
// BRANDING
// ----------------------------------------------------------------------------

/// Name of the game this launcher manages (displayed in the UI)
pub const APP_NAME: &str = "Cataclysm: Dark Days Ahead";

/// Window title (displayed in title bar)
pub const WINDOW_TITLE: &str = "CDDA Game Launcher";

/// User-Agent string for HTTP requests
pub const USER_AGENT: &str = env!("CARGO_PKG_NAME");

/// Prefix for temporary folders and files
pub const TEMP_PREFIX: &str = env!("CARGO_PKG_NAME");

/// Directory name used for application settings under the user config dir
pub const SETTINGS_DIR_NAME: &str = "cdda-game-launcher";

// ----------------------------------------------------------------------------
// BUILD SOURCE
// ----------------------------------------------------------------------------

/// GitHub repository publishing experimental builds, in "owner/repo" format
pub const BUILDS_REPOSITORY: &str = "CleverRaven/Cataclysm-DDA";

/// Number of releases requested per page when listing builds
pub const BUILDS_PER_PAGE: u32 = 30;

/// Archive extensions the engine knows how to validate and extract
pub const ARCHIVE_EXTENSIONS: &[&str] = &[".zip", ".7z", ".rar"];

// ----------------------------------------------------------------------------
// GAME DIRECTORY LAYOUT
// ----------------------------------------------------------------------------

/// Rollback slot holding the prior installation during/after an update
pub const PREVIOUS_VERSION_DIR: &str = "previous_version";

/// Durable marker describing an update or rollback in progress
pub const JOURNAL_FILE: &str = ".update-journal.json";

/// Holding area for new content while a rollback restores the old build
pub const ASIDE_DIR: &str = ".update-aside";

/// Directory holding save games
pub const SAVE_DIR: &str = "save";

/// Directories copied wholesale from the previous installation, in order.
/// `save` is skipped when the user asked not to move saves.
pub const CARRY_OVER_DIRS: &[&str] = &[
    "config",
    "save",
    "templates",
    "memorial",
    "graveyard",
    "save_backups",
];

/// Files never carried over (relative to the previous installation root)
pub const DEBUG_LOG_FILES: &[&str] = &[
    "config/debug.log",
    "config/debug.log.prev",
];

/// Bundled mods inside the game data tree
pub const DATA_MODS_DIR: &str = "data/mods";

/// User-level mods outside the data tree
pub const USER_MODS_DIR: &str = "mods";

/// Soundpacks
pub const SOUND_DIR: &str = "data/sound";

/// Fonts
pub const FONT_DIR: &str = "data/font";

/// Tilesets
pub const GFX_DIR: &str = "gfx";

/// Suffix marking a disabled manifest (e.g. `modinfo.json.disabled`)
pub const DISABLED_SUFFIX: &str = ".disabled";

/// Executable names searched in a game directory, most specific first
#[cfg(target_os = "windows")]
pub const EXECUTABLE_NAMES: &[&str] = &["cataclysm-tiles.exe", "cataclysm.exe"];

#[cfg(not(target_os = "windows"))]
pub const EXECUTABLE_NAMES: &[&str] = &[
    "cataclysm-tiles",
    "cataclysm",
    "cataclysm-tiles.exe",
    "cataclysm.exe",
];

// ----------------------------------------------------------------------------
// I/O TUNING
// ----------------------------------------------------------------------------

/// Chunk size for file copies, downloads written to disk and hashing
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Progress is recomputed once every this many copy chunks
pub const PROGRESS_CHUNK_INTERVAL: u64 = 10;

// ----------------------------------------------------------------------------
// WINDOW SETTINGS
// ----------------------------------------------------------------------------

/// Default window size (width, height)
pub const WINDOW_SIZE: (f32, f32) = (720.0, 480.0);

/// Minimum window size (width, height)
pub const WINDOW_MIN_SIZE: (f32, f32) = (560.0, 380.0);
