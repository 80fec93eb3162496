// Game directory probe
// Finds the game executable, hashes it and pulls the embedded version
// string out of the binary in the same pass.

use crate::config::{CHUNK_SIZE, EXECUTABLE_NAMES};
use crate::error::FileOpError;
use regex::bytes::Regex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Bytes kept from the previous chunk so a version string split across
/// two reads is still found.
const VERSION_TAIL: usize = 64;

lazy_static::lazy_static! {
    static ref VERSION_PATTERN: Regex = Regex::new(
        r"(?-u)(?:^|[^0-9A-Za-z.])(?P<version>0\.[A-Z](?:-[0-9]+)?(?:-[0-9]+-g[0-9a-f]{6,})?(?:-dirty)?)\x00"
    )
    .expect("version pattern is valid");
}

#[derive(Debug, Clone)]
pub enum HashProgress {
    Started { total_bytes: u64 },
    Progress { hashed: u64, total: u64 },
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableInfo {
    pub path: PathBuf,
    pub sha256: String,
    pub version: Option<String>,
    /// Release builds carry no `-g<commit>` suffix.
    pub stable: bool,
}

/// First known executable name present in `dir`.
pub fn find_executable(dir: &Path) -> Option<PathBuf> {
    EXECUTABLE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

fn find_version(window: &[u8]) -> Option<String> {
    VERSION_PATTERN
        .captures(window)
        .and_then(|caps| caps.name("version"))
        .map(|m| String::from_utf8_lossy(m.as_bytes()).to_string())
}

/// Hash `path` in fixed-size chunks, scanning each chunk for the version
/// string. Cancellation is checked between chunks.
pub async fn hash_and_extract_version(
    path: &Path,
    progress_tx: mpsc::UnboundedSender<HashProgress>,
    cancel_token: CancellationToken,
) -> Result<ExecutableInfo, FileOpError> {
    crate::debug::log_section("Analyse Executable");
    crate::debug::log(&format!("Executable: {:?}", path));

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| FileOpError::entry("open", path, e))?;
    let total = file
        .metadata()
        .await
        .map_err(|e| FileOpError::entry("read metadata of", path, e))?
        .len();
    let _ = progress_tx.send(HashProgress::Started { total_bytes: total });

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut window: Vec<u8> = Vec::with_capacity(CHUNK_SIZE + VERSION_TAIL);
    let mut version = None;
    let mut hashed = 0u64;

    loop {
        if cancel_token.is_cancelled() {
            crate::debug::log("Hashing cancelled by user");
            let _ = progress_tx.send(HashProgress::Cancelled);
            return Err(FileOpError::Aborted);
        }

        let read = file
            .read(&mut buffer)
            .await
            .map_err(|e| FileOpError::entry("read", path, e))?;
        if read == 0 {
            break;
        }

        hasher.update(&buffer[..read]);
        hashed += read as u64;

        if version.is_none() {
            window.extend_from_slice(&buffer[..read]);
            version = find_version(&window);
            let keep_from = window.len().saturating_sub(VERSION_TAIL);
            window.drain(..keep_from);
        }

        let _ = progress_tx.send(HashProgress::Progress { hashed, total });
        tokio::task::yield_now().await;
    }

    let sha256 = format!("{:x}", hasher.finalize());
    let stable = version.as_deref().is_some_and(|v| !v.contains("-g"));

    crate::debug::log(&format!("SHA-256: {}", sha256));
    crate::debug::log(&format!("Version: {:?} (stable: {})", version, stable));
    let _ = progress_tx.send(HashProgress::Completed);

    Ok(ExecutableInfo {
        path: path.to_path_buf(),
        sha256,
        version,
        stable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn analyse(bytes: &[u8]) -> ExecutableInfo {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("cataclysm-tiles.exe");
        std::fs::write(&exe, bytes).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        hash_and_extract_version(&exe, tx, CancellationToken::new()).await.unwrap()
    }

    #[tokio::test]
    async fn finds_stable_version_and_hash() {
        let info = analyse(b"\x7fELF\x00junk\x000.G\x00more junk").await;
        assert_eq!(info.version.as_deref(), Some("0.G"));
        assert!(info.stable);
        let expected = format!("{:x}", Sha256::digest(b"\x7fELF\x00junk\x000.G\x00more junk"));
        assert_eq!(info.sha256, expected);
    }

    #[tokio::test]
    async fn experimental_version_is_not_stable() {
        let info = analyse(b"\x00\x000.F-12345-g1a2b3c4d\x00").await;
        assert_eq!(info.version.as_deref(), Some("0.F-12345-g1a2b3c4d"));
        assert!(!info.stable);
    }

    #[tokio::test]
    async fn version_split_across_chunks_is_found() {
        let mut bytes = vec![b'x'; CHUNK_SIZE - 3];
        bytes.push(0);
        bytes.extend_from_slice(b"0.H-1-gabcdef0\x00");
        bytes.extend_from_slice(&[b'y'; 100]);

        let info = analyse(&bytes).await;
        assert_eq!(info.version.as_deref(), Some("0.H-1-gabcdef0"));
    }

    #[tokio::test]
    async fn binary_without_version_still_hashes() {
        let info = analyse(b"no version in here").await;
        assert_eq!(info.version, None);
        assert!(!info.stable);
        assert_eq!(info.sha256.len(), 64);
    }

    #[test]
    fn finds_first_known_executable() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_executable(dir.path()), None);

        std::fs::write(dir.path().join("cataclysm.exe"), b"").unwrap();
        assert_eq!(find_executable(dir.path()), Some(dir.path().join("cataclysm.exe")));
    }
}
