//! Build archives: integrity testing and entry-by-entry extraction.
//!
//! Zip and 7z are handled in-process. Rar goes through the `unrar` tool,
//! which has to be on the PATH.

mod extract;
mod validate;

pub use extract::{extract_archive, ExtractProgress};
pub use validate::validate_archive;

use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    SevenZ,
    Rar,
}

impl ArchiveKind {
    /// Pick a handler from the file extension, case-insensitively.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_string_lossy().to_ascii_lowercase();
        match extension.as_str() {
            "zip" => Some(ArchiveKind::Zip),
            "7z" => Some(ArchiveKind::SevenZ),
            "rar" => Some(ArchiveKind::Rar),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    BadArchive,
    PasswordProtected,
    UnknownFormat,
    NotFound,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InvalidReason::BadArchive => "the archive is corrupt or incomplete",
            InvalidReason::PasswordProtected => "the archive is password protected",
            InvalidReason::UnknownFormat => "the archive format is not supported",
            InvalidReason::NotFound => "the archive file does not exist",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Invalid(InvalidReason),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_sniffed_from_extension() {
        assert_eq!(ArchiveKind::from_path(Path::new("cdda-windows-tiles-x64.zip")), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::from_path(Path::new("build.7Z")), Some(ArchiveKind::SevenZ));
        assert_eq!(ArchiveKind::from_path(Path::new("build.rar")), Some(ArchiveKind::Rar));
        assert_eq!(ArchiveKind::from_path(Path::new("build.tar.gz")), None);
        assert_eq!(ArchiveKind::from_path(Path::new("build")), None);
    }
}
