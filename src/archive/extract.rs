use super::{ArchiveKind, InvalidReason};
use crate::error::ArchiveError;
use std::fs::File;
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use zip::ZipArchive;

#[derive(Debug, Clone)]
pub enum ExtractProgress {
    Started { total_entries: u64 },
    Progress {
        extracted: u64,
        total: u64,
        current_file: String,
    },
    Completed,
    Cancelled,
}

/// Extract `archive_path` into `dest_dir`, one entry at a time.
///
/// Cancellation is observed between entries; entries already written stay on
/// disk. Returns the number of entries extracted.
pub async fn extract_archive(
    archive_path: &Path,
    dest_dir: &Path,
    progress_tx: mpsc::UnboundedSender<ExtractProgress>,
    cancel_token: CancellationToken,
) -> Result<u64, ArchiveError> {
    crate::debug::log_section("Extract Archive");
    crate::debug::log(&format!("Archive: {:?}", archive_path));
    crate::debug::log(&format!("Destination: {:?}", dest_dir));

    if !archive_path.is_file() {
        return Err(ArchiveError::Invalid(InvalidReason::NotFound));
    }
    std::fs::create_dir_all(dest_dir)?;

    let result = match ArchiveKind::from_path(archive_path) {
        Some(ArchiveKind::Zip) => extract_zip(archive_path, dest_dir, &progress_tx, &cancel_token).await,
        Some(ArchiveKind::SevenZ) => extract_7z(archive_path, dest_dir, &progress_tx, &cancel_token).await,
        Some(ArchiveKind::Rar) => extract_rar(archive_path, dest_dir, &progress_tx, &cancel_token).await,
        None => Err(ArchiveError::Invalid(InvalidReason::UnknownFormat)),
    };

    match &result {
        Ok(count) => {
            crate::debug::log(&format!("Extracted {} entries", count));
            let _ = progress_tx.send(ExtractProgress::Completed);
        }
        Err(ArchiveError::Cancelled) => {
            crate::debug::log("Extraction cancelled by user");
            let _ = progress_tx.send(ExtractProgress::Cancelled);
        }
        Err(e) => crate::debug::log(&format!("ERROR: extraction failed: {}", e)),
    }
    result
}

/// Entry path made relative to the destination. Absolute paths and `..`
/// components are refused.
fn sanitize_entry_path(name: &str) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    let mut path = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if path.as_os_str().is_empty() {
        None
    } else {
        Some(path)
    }
}

async fn extract_zip(
    archive_path: &Path,
    dest_dir: &Path,
    progress_tx: &mpsc::UnboundedSender<ExtractProgress>,
    cancel_token: &CancellationToken,
) -> Result<u64, ArchiveError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;
    let total = archive.len() as u64;
    let _ = progress_tx.send(ExtractProgress::Started { total_entries: total });

    let mut extracted = 0u64;
    for index in 0..archive.len() {
        if cancel_token.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }

        // One blocking call per entry; the archive handle travels with it
        let dest = dest_dir.to_path_buf();
        let (returned, entry_result) = tokio::task::spawn_blocking(move || {
            let result = extract_zip_entry(&mut archive, index, &dest);
            (archive, result)
        })
        .await
        .map_err(|e| ArchiveError::Join(e.to_string()))?;
        archive = returned;

        let name = entry_result?;
        extracted += 1;
        let _ = progress_tx.send(ExtractProgress::Progress {
            extracted,
            total,
            current_file: name,
        });

        tokio::task::yield_now().await;
    }

    Ok(extracted)
}

fn extract_zip_entry(
    archive: &mut ZipArchive<BufReader<File>>,
    index: usize,
    dest_dir: &Path,
) -> Result<String, ArchiveError> {
    let mut entry = archive.by_index(index)?;
    let name = entry.name().to_string();

    let Some(relative) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
        crate::debug::log(&format!("Skipping unsafe entry path: {}", name));
        return Ok(name);
    };
    let out_path = dest_dir.join(relative);

    if entry.is_dir() {
        std::fs::create_dir_all(&out_path)?;
        return Ok(name);
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out_file = File::create(&out_path)?;
    std::io::copy(&mut entry, &mut out_file)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Some(mode) = entry.unix_mode() {
            std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode))?;
        }
    }

    Ok(name)
}

async fn extract_7z(
    archive_path: &Path,
    dest_dir: &Path,
    progress_tx: &mpsc::UnboundedSender<ExtractProgress>,
    cancel_token: &CancellationToken,
) -> Result<u64, ArchiveError> {
    let archive_path = archive_path.to_path_buf();
    let dest_dir = dest_dir.to_path_buf();
    let progress_tx = progress_tx.clone();
    let cancel_token = cancel_token.clone();

    // sevenz-rust decodes solid blocks sequentially, so the whole walk runs on
    // one worker and checks the token between entries
    tokio::task::spawn_blocking(move || extract_7z_sync(&archive_path, &dest_dir, &progress_tx, &cancel_token))
        .await
        .map_err(|e| ArchiveError::Join(e.to_string()))?
}

fn extract_7z_sync(
    archive_path: &Path,
    dest_dir: &Path,
    progress_tx: &mpsc::UnboundedSender<ExtractProgress>,
    cancel_token: &CancellationToken,
) -> Result<u64, ArchiveError> {
    let mut reader = sevenz_rust::SevenZReader::open(archive_path, sevenz_rust::Password::empty())
        .map_err(|e| ArchiveError::SevenZ(e.to_string()))?;
    let total = reader.archive().files.len() as u64;
    let _ = progress_tx.send(ExtractProgress::Started { total_entries: total });

    let mut extracted = 0u64;
    let mut cancelled = false;

    reader
        .for_each_entries(|entry, entry_reader| {
            if cancel_token.is_cancelled() {
                cancelled = true;
                return Ok(false);
            }

            let name = entry.name().to_string();
            match sanitize_entry_path(&name) {
                Some(relative) => {
                    let out_path = dest_dir.join(relative);
                    if entry.is_directory() {
                        std::fs::create_dir_all(&out_path)?;
                    } else {
                        if let Some(parent) = out_path.parent() {
                            std::fs::create_dir_all(parent)?;
                        }
                        let mut out_file = File::create(&out_path)?;
                        std::io::copy(entry_reader, &mut out_file)?;
                    }
                }
                None => crate::debug::log(&format!("Skipping unsafe entry path: {}", name)),
            }

            extracted += 1;
            let _ = progress_tx.send(ExtractProgress::Progress {
                extracted,
                total,
                current_file: name,
            });
            Ok(true)
        })
        .map_err(|e| ArchiveError::SevenZ(e.to_string()))?;

    if cancelled {
        return Err(ArchiveError::Cancelled);
    }
    Ok(extracted)
}

/// Count entries with `unrar lb`, then extract with `unrar x`, counting the
/// per-file lines it prints.
async fn extract_rar(
    archive_path: &Path,
    dest_dir: &Path,
    progress_tx: &mpsc::UnboundedSender<ExtractProgress>,
    cancel_token: &CancellationToken,
) -> Result<u64, ArchiveError> {
    use std::process::Stdio;
    use tokio::io::{AsyncBufReadExt, BufReader as AsyncBufReader};

    let listing = tokio::process::Command::new("unrar")
        .args(["lb", "-p-"])
        .arg(archive_path)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ArchiveError::Rar(format!("could not run unrar: {}", e)))?;
    if !listing.status.success() {
        return Err(ArchiveError::Rar(String::from_utf8_lossy(&listing.stderr).trim().to_string()));
    }
    let total = String::from_utf8_lossy(&listing.stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .count() as u64;
    let _ = progress_tx.send(ExtractProgress::Started { total_entries: total });

    // unrar wants the destination with a trailing separator
    let mut dest_arg = dest_dir.as_os_str().to_owned();
    dest_arg.push(std::path::MAIN_SEPARATOR_STR);

    let mut child = tokio::process::Command::new("unrar")
        .args(["x", "-o+", "-p-", "-y"])
        .arg(archive_path)
        .arg(dest_arg)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ArchiveError::Rar(format!("could not run unrar: {}", e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ArchiveError::Rar("unrar produced no output stream".to_string()))?;
    let mut lines = AsyncBufReader::new(stdout).lines();
    let mut extracted = 0u64;

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                let _ = child.kill().await;
                return Err(ArchiveError::Cancelled);
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        let line = line.trim();
                        if let Some(rest) = line.strip_prefix("Extracting ") {
                            if rest.starts_with("from ") {
                                continue;
                            }
                            extracted += 1;
                            let current_file = rest.trim_end_matches("OK").trim().to_string();
                            let _ = progress_tx.send(ExtractProgress::Progress {
                                extracted,
                                total,
                                current_file,
                            });
                        }
                    }
                    None => break,
                }
            }
        }
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(ArchiveError::Rar(String::from_utf8_lossy(&output.stderr).trim().to_string()));
    }
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, contents) in files {
            writer
                .start_file(*name, zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(contents).unwrap();
        }
        writer.finish().unwrap();
    }

    fn drain(mut rx: mpsc::UnboundedReceiver<ExtractProgress>) -> Vec<ExtractProgress> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn extracts_zip_entries_with_progress() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("build.zip");
        write_zip(
            &archive,
            &[
                ("cataclysm-tiles.exe", b"exe"),
                ("data/mods/dda/modinfo.json", b"[]"),
                ("gfx/tileset/tileset.txt", b"NAME: x"),
            ],
        );
        let dest = dir.path().join("game");

        let (tx, rx) = mpsc::unbounded_channel();
        let count = extract_archive(&archive, &dest, tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(count, 3);
        assert_eq!(std::fs::read(dest.join("cataclysm-tiles.exe")).unwrap(), b"exe");
        assert!(dest.join("data/mods/dda/modinfo.json").is_file());

        let events = drain(rx);
        assert!(matches!(events.first(), Some(ExtractProgress::Started { total_entries: 3 })));
        let mut last = 0;
        for event in &events {
            if let ExtractProgress::Progress { extracted, .. } = event {
                assert!(*extracted > last);
                last = *extracted;
            }
        }
        assert_eq!(last, 3);
        assert!(matches!(events.last(), Some(ExtractProgress::Completed)));
    }

    #[tokio::test]
    async fn cancelled_extraction_stops_between_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("build.zip");
        write_zip(&archive, &[("a", b"1"), ("b", b"2")]);

        let token = CancellationToken::new();
        token.cancel();
        let (tx, rx) = mpsc::unbounded_channel();
        let result = extract_archive(&archive, &dir.path().join("out"), tx, token).await;

        assert!(matches!(result, Err(ArchiveError::Cancelled)));
        assert!(!dir.path().join("out/a").exists());
        assert!(matches!(drain(rx).last(), Some(ExtractProgress::Cancelled)));
    }

    #[test]
    fn entry_paths_cannot_escape_destination() {
        assert_eq!(sanitize_entry_path("data\\font\\a.ttf"), Some(PathBuf::from("data/font/a.ttf")));
        assert_eq!(sanitize_entry_path("./gfx/x"), Some(PathBuf::from("gfx/x")));
        assert_eq!(sanitize_entry_path("../evil"), None);
        assert_eq!(sanitize_entry_path("/etc/passwd"), None);
    }
}
