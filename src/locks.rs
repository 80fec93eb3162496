// Locked-file handling
// A failed rename/delete inside the game directory is usually another
// process (the game itself, an editor, an antivirus scan) holding a handle.
// We try to name that process and let the user retry or give up.

use crate::prompt::{Decision, Prompt, Prompter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

/// Capability to find which process holds a file open.
pub trait LockInspector: Send + Sync {
    fn find_process_locking_file(&self, path: &Path) -> Option<ProcessInfo>;
}

/// Inspector that never knows. Used where the OS offers no equivalent.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLockInspector;

impl LockInspector for NoLockInspector {
    fn find_process_locking_file(&self, _path: &Path) -> Option<ProcessInfo> {
        None
    }
}

/// Inspector backed by the host OS: `/proc` on Linux, the Restart Manager
/// on Windows, nothing elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLockInspector;

impl LockInspector for SystemLockInspector {
    fn find_process_locking_file(&self, path: &Path) -> Option<ProcessInfo> {
        find_locking_process(path)
    }
}

#[cfg(target_os = "linux")]
fn find_locking_process(path: &Path) -> Option<ProcessInfo> {
    let target = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let own_pid = std::process::id();

    for entry in std::fs::read_dir("/proc").ok()?.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        if pid == own_pid {
            continue;
        }

        let proc_dir = entry.path();
        let holds_target = |link: PathBuf| link.starts_with(&target);

        // Working directory inside the tree blocks removal on some filesystems
        let cwd_match = std::fs::read_link(proc_dir.join("cwd"))
            .map(holds_target)
            .unwrap_or(false);

        let fd_match = cwd_match
            || std::fs::read_dir(proc_dir.join("fd"))
                .map(|fds| {
                    fds.flatten()
                        .filter_map(|fd| std::fs::read_link(fd.path()).ok())
                        .any(holds_target)
                })
                .unwrap_or(false);

        if fd_match {
            let name = std::fs::read_to_string(proc_dir.join("comm"))
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            return Some(ProcessInfo { pid, name });
        }
    }

    None
}

#[cfg(target_os = "windows")]
fn find_locking_process(path: &Path) -> Option<ProcessInfo> {
    use std::os::windows::ffi::OsStrExt;
    use windows::core::{PCWSTR, PWSTR};
    use windows::Win32::Foundation::{ERROR_MORE_DATA, ERROR_SUCCESS};
    use windows::Win32::System::RestartManager::{
        RmEndSession, RmGetList, RmRegisterResources, RmStartSession, CCH_RM_SESSION_KEY,
        RM_PROCESS_INFO,
    };

    let path_wide: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();
    let mut session = 0u32;
    let mut key = [0u16; CCH_RM_SESSION_KEY as usize + 1];

    unsafe {
        if RmStartSession(&mut session, 0, PWSTR(key.as_mut_ptr())) != ERROR_SUCCESS {
            crate::debug::log("WARNING: RmStartSession failed, cannot identify locking process");
            return None;
        }

        let mut result = None;
        let files = [PCWSTR(path_wide.as_ptr())];

        if RmRegisterResources(session, Some(&files), None, None) == ERROR_SUCCESS {
            let mut needed = 0u32;
            let mut count = 0u32;
            let mut reasons = 0u32;
            let status = RmGetList(session, &mut needed, &mut count, None, &mut reasons);

            if (status == ERROR_MORE_DATA || status == ERROR_SUCCESS) && needed > 0 {
                let mut infos = vec![RM_PROCESS_INFO::default(); needed as usize];
                count = needed;
                let status = RmGetList(
                    session,
                    &mut needed,
                    &mut count,
                    Some(infos.as_mut_ptr()),
                    &mut reasons,
                );
                if status == ERROR_SUCCESS && count > 0 {
                    let info = &infos[0];
                    let len = info
                        .strAppName
                        .iter()
                        .position(|&c| c == 0)
                        .unwrap_or(info.strAppName.len());
                    result = Some(ProcessInfo {
                        pid: info.Process.dwProcessId,
                        name: String::from_utf16_lossy(&info.strAppName[..len]),
                    });
                }
            }
        }

        let _ = RmEndSession(session);
        result
    }
}

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
fn find_locking_process(_path: &Path) -> Option<ProcessInfo> {
    None
}

/// Retry-or-cancel policy shared by every destructive file operation.
#[derive(Clone)]
pub struct LockRecovery {
    prompter: Prompter,
    inspector: Arc<dyn LockInspector>,
}

impl LockRecovery {
    pub fn new(prompter: Prompter, inspector: Arc<dyn LockInspector>) -> Self {
        Self { prompter, inspector }
    }

    /// Never retries; for callers without a user to ask.
    pub fn give_up() -> Self {
        Self::new(Prompter::fixed(Decision::Reject), Arc::new(NoLockInspector))
    }

    pub fn prompter(&self) -> &Prompter {
        &self.prompter
    }

    /// Identify the offending process and ask whether to try `action` again.
    pub async fn should_retry(&self, action: &'static str, path: &Path, error: &std::io::Error) -> bool {
        crate::debug::log(&format!("ERROR: failed to {} {:?}: {}", action, path, error));

        let inspector = self.inspector.clone();
        let lookup_path = path.to_path_buf();
        // /proc scans and Restart Manager sessions block; keep them off the scheduler
        let process = tokio::task::spawn_blocking(move || inspector.find_process_locking_file(&lookup_path))
            .await
            .unwrap_or(None);

        if let Some(p) = &process {
            crate::debug::log(&format!("File held by {} (pid {})", p.name, p.pid));
        }

        let decision = self
            .prompter
            .ask(Prompt::FileLocked {
                action,
                path: path.to_path_buf(),
                error: error.to_string(),
                process,
            })
            .await;

        decision == Decision::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(ProcessInfo);

    impl LockInspector for Fixed {
        fn find_process_locking_file(&self, _path: &Path) -> Option<ProcessInfo> {
            Some(self.0.clone())
        }
    }

    #[tokio::test]
    async fn recovery_reports_inspected_process_in_prompt() {
        let (prompter, mut rx) = Prompter::channel();
        let recovery = LockRecovery::new(
            prompter,
            Arc::new(Fixed(ProcessInfo {
                pid: 7,
                name: "cataclysm-tiles".into(),
            })),
        );

        let responder = tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            match &request.prompt {
                Prompt::FileLocked { process, action, .. } => {
                    assert_eq!(*action, "delete");
                    assert_eq!(process.as_ref().map(|p| p.pid), Some(7));
                }
                other => panic!("unexpected prompt {:?}", other),
            }
            request.answer(Decision::Accept);
        });

        let error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "in use");
        assert!(recovery.should_retry("delete", Path::new("save"), &error).await);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn give_up_never_retries() {
        let error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "in use");
        assert!(!LockRecovery::give_up().should_retry("move", Path::new("x"), &error).await);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn system_inspector_ignores_unheld_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("free.txt");
        std::fs::write(&file, b"nobody holds me").unwrap();
        assert_eq!(SystemLockInspector.find_process_locking_file(&file), None);
    }
}
