// Centralized debug logging for the launcher
// Logs are written to a temp file and can be copied into the game directory
// when reporting a failed update.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const LOG_FILE_NAME: &str = "cdda_launcher_debug.txt";

lazy_static::lazy_static! {
    static ref DEBUG_LOG: Mutex<DebugLog> = Mutex::new(DebugLog::new());
}

pub struct DebugLog {
    path: PathBuf,
}

impl DebugLog {
    fn new() -> Self {
        let path = std::env::temp_dir().join(LOG_FILE_NAME);

        // Clear existing log and write header
        if let Ok(mut f) = std::fs::File::create(&path) {
            let _ = writeln!(f, "=== CDDA Game Launcher Debug Log ===");
            let _ = writeln!(f, "Log file: {:?}", path);
            let _ = writeln!(f, "Version: {}", env!("CARGO_PKG_VERSION"));
            let _ = writeln!(f, "Started: {}", chrono::Utc::now().to_rfc3339());
            let _ = writeln!(f, "Platform: {}", std::env::consts::OS);
            let _ = writeln!(f, "Arch: {}", std::env::consts::ARCH);
            let _ = writeln!(f);
        }

        Self { path }
    }
}

/// Log a debug message
pub fn log(message: &str) {
    if let Ok(debug_log) = DEBUG_LOG.lock() {
        if let Ok(mut f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&debug_log.path)
        {
            let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
            let _ = writeln!(f, "[{}] {}", timestamp, message);
        }
    }
}

/// Log a section header
pub fn log_section(section: &str) {
    log(&format!("\n=== {} ===", section));
}

/// Get the path to the debug log file
pub fn get_log_path() -> PathBuf {
    if let Ok(debug_log) = DEBUG_LOG.lock() {
        debug_log.path.clone()
    } else {
        std::env::temp_dir().join(LOG_FILE_NAME)
    }
}

/// Copy the debug log to a destination directory (e.g., the game directory)
pub fn copy_log_to(dest_dir: &Path) -> Result<PathBuf, String> {
    let log_path = get_log_path();
    let dest_path = dest_dir.join("launcher_debug.txt");

    log("Copying debug log...");
    log(&format!("Destination: {:?}", dest_path));

    std::fs::copy(&log_path, &dest_path)
        .map_err(|e| format!("Failed to copy debug log: {}", e))?;

    Ok(dest_path)
}
