use super::{ArchiveKind, InvalidReason, Validation};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use zip::result::ZipError;

/// Test an archive without extracting it. Never modifies the file.
pub async fn validate_archive(path: &Path) -> Validation {
    crate::debug::log_section("Validate Archive");
    crate::debug::log(&format!("Archive: {:?}", path));

    if !path.is_file() {
        crate::debug::log("Archive not found");
        return Validation::Invalid(InvalidReason::NotFound);
    }

    let result = match ArchiveKind::from_path(path) {
        None => Validation::Invalid(InvalidReason::UnknownFormat),
        Some(ArchiveKind::Rar) => test_rar(path).await,
        Some(kind) => {
            let archive_path = path.to_path_buf();
            tokio::task::spawn_blocking(move || match kind {
                ArchiveKind::Zip => test_zip(&archive_path),
                _ => test_7z(&archive_path),
            })
            .await
            .unwrap_or_else(|e| {
                crate::debug::log(&format!("ERROR: validation worker failed: {}", e));
                Validation::Invalid(InvalidReason::BadArchive)
            })
        }
    };

    crate::debug::log(&format!("Validation result: {:?}", result));
    result
}

fn classify_zip_error(error: &ZipError) -> InvalidReason {
    match error {
        ZipError::UnsupportedArchive(message) if message.contains("Password") => InvalidReason::PasswordProtected,
        _ => InvalidReason::BadArchive,
    }
}

/// Walk the central directory and read every entry so its CRC is checked.
fn test_zip(path: &Path) -> Validation {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(_) => return Validation::Invalid(InvalidReason::NotFound),
    };
    let mut archive = match zip::ZipArchive::new(BufReader::new(file)) {
        Ok(archive) => archive,
        Err(e) => {
            crate::debug::log(&format!("Zip open failed: {}", e));
            return Validation::Invalid(classify_zip_error(&e));
        }
    };

    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                crate::debug::log(&format!("Zip entry {} unreadable: {}", index, e));
                return Validation::Invalid(classify_zip_error(&e));
            }
        };
        if let Err(e) = std::io::copy(&mut entry, &mut std::io::sink()) {
            crate::debug::log(&format!("Zip entry {} failed its test: {}", entry.name(), e));
            return Validation::Invalid(InvalidReason::BadArchive);
        }
    }

    Validation::Valid
}

fn test_7z(path: &Path) -> Validation {
    let mut reader = match sevenz_rust::SevenZReader::open(path, sevenz_rust::Password::empty()) {
        Ok(reader) => reader,
        Err(e) => {
            crate::debug::log(&format!("7z open failed: {}", e));
            return Validation::Invalid(classify_7z_error(&e));
        }
    };

    let result = reader.for_each_entries(|_entry, entry_reader| {
        std::io::copy(entry_reader, &mut std::io::sink())?;
        Ok(true)
    });

    match result {
        Ok(()) => Validation::Valid,
        Err(e) => {
            crate::debug::log(&format!("7z test failed: {}", e));
            Validation::Invalid(classify_7z_error(&e))
        }
    }
}

fn classify_7z_error(error: &sevenz_rust::Error) -> InvalidReason {
    match error {
        sevenz_rust::Error::PasswordRequired | sevenz_rust::Error::MaybeBadPassword(_) => {
            InvalidReason::PasswordProtected
        }
        _ => InvalidReason::BadArchive,
    }
}

async fn test_rar(path: &Path) -> Validation {
    // -p- never prompts for a password, an encrypted archive fails instead
    let output = tokio::process::Command::new("unrar")
        .arg("t")
        .arg("-p-")
        .arg("-idq")
        .arg(path)
        .kill_on_drop(true)
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => Validation::Valid,
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
            crate::debug::log(&format!("unrar test failed: {}", stderr.trim()));
            if stderr.contains("password") || stderr.contains("encrypted") {
                Validation::Invalid(InvalidReason::PasswordProtected)
            } else {
                Validation::Invalid(InvalidReason::BadArchive)
            }
        }
        Err(e) => {
            crate::debug::log(&format!("ERROR: could not run unrar: {}", e));
            Validation::Invalid(InvalidReason::UnknownFormat)
        }
    }
}
