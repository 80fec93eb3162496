use super::identity::{ContentKind, IdentityExtractor};
use crate::error::FileOpError;
use crate::fileops::{copy_directory_with_progress, copy_file_with_progress, CopyProgress};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub kind: ContentKind,
    pub copied: Vec<String>,
    pub skipped_conflicts: Vec<String>,
}

fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(read_dir) => read_dir.flatten().map(|e| e.path()).collect(),
        Err(_) => return Vec::new(),
    };
    paths.sort();
    paths
}

fn scan_into(extractor: &dyn IdentityExtractor, dir: &Path, found: &mut BTreeMap<String, PathBuf>) {
    for path in sorted_entries(dir) {
        let is_dir = path.is_dir();
        if !is_dir && !extractor.accepts_files() {
            continue;
        }

        match extractor.identify(&path) {
            Some(identity) => {
                // A duplicate identity keeps the first item seen
                if let Some(existing) = found.get(&identity.key) {
                    crate::debug::log(&format!(
                        "Duplicate {} identity {:?}: keeping {:?}, ignoring {:?}",
                        extractor.kind(),
                        identity.key,
                        existing,
                        path
                    ));
                } else {
                    found.insert(identity.key, path);
                }
            }
            // Only directories that are not items themselves are searched,
            // so a submod is never counted next to its parent
            None if is_dir && extractor.recursive() => scan_into(extractor, &path, found),
            None => {}
        }
    }
}

/// Identity → path for every item under `dir`. A missing directory is empty.
pub fn scan(extractor: &dyn IdentityExtractor, dir: &Path) -> BTreeMap<String, PathBuf> {
    let mut found = BTreeMap::new();
    scan_into(extractor, dir, &mut found);
    found
}

/// Carry the custom items of `previous_dir` into `target_dir`.
///
/// An item is custom when its identity does not appear in `official_dir`.
/// Items are copied, so `previous_dir` stays whole for a rollback. A name
/// already present in `target_dir` is reported in `skipped_conflicts` and
/// left alone.
pub async fn reconcile_directory(
    extractor: &dyn IdentityExtractor,
    official_dir: &Path,
    previous_dir: &Path,
    target_dir: &Path,
    progress_tx: mpsc::UnboundedSender<CopyProgress>,
    cancel_token: CancellationToken,
) -> Result<ReconcileReport, FileOpError> {
    let kind = extractor.kind();
    crate::debug::log_section(&format!("Reconcile {}", kind));

    let official = scan(extractor, official_dir);
    let previous = scan(extractor, previous_dir);
    crate::debug::log(&format!(
        "{} official, {} previous {}",
        official.len(),
        previous.len(),
        kind
    ));

    let mut report = ReconcileReport {
        kind,
        copied: Vec::new(),
        skipped_conflicts: Vec::new(),
    };

    let custom: Vec<&PathBuf> = previous
        .iter()
        .filter(|(key, _)| !official.contains_key(*key))
        .map(|(_, path)| path)
        .collect();
    if custom.is_empty() {
        return Ok(report);
    }

    std::fs::create_dir_all(target_dir).map_err(|e| FileOpError::entry("create", target_dir, e))?;

    for source in custom {
        if cancel_token.is_cancelled() {
            return Err(FileOpError::Aborted);
        }

        let Some(name) = source.file_name() else {
            continue;
        };
        let display_name = name.to_string_lossy().to_string();
        let dest = target_dir.join(name);

        if std::fs::symlink_metadata(&dest).is_ok() {
            crate::debug::log(&format!("Conflict: {:?} already exists, not copying", dest));
            report.skipped_conflicts.push(display_name);
            continue;
        }

        crate::debug::log(&format!("Carrying custom {} item {:?}", kind, source));
        if source.is_dir() {
            copy_directory_with_progress(source, &dest, &HashSet::new(), progress_tx.clone(), cancel_token.clone())
                .await?;
        } else {
            copy_file_with_progress(source, &dest, progress_tx.clone(), cancel_token.clone()).await?;
        }
        report.copied.push(display_name);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::identity::{FontIdentity, ModIdentity, SoundpackIdentity};

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn write_mod(dir: &Path, ident: &str) {
        write(
            &dir.join("modinfo.json"),
            &format!(r#"[{{"type":"MOD_INFO","ident":"{}"}}]"#, ident),
        );
    }

    #[test]
    fn mod_scan_skips_submods_of_recorded_roots() {
        let dir = tempfile::tempdir().unwrap();
        write_mod(&dir.path().join("parent"), "parent");
        write_mod(&dir.path().join("parent/sub"), "sub");
        write_mod(&dir.path().join("collection/inner"), "inner");

        let found = scan(&ModIdentity, dir.path());
        let keys: Vec<&str> = found.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["inner", "parent"]);
    }

    #[test]
    fn duplicate_identity_keeps_first() {
        let dir = tempfile::tempdir().unwrap();
        write_mod(&dir.path().join("a_first"), "same");
        write_mod(&dir.path().join("b_second"), "same");

        let found = scan(&ModIdentity, dir.path());
        assert_eq!(found.get("same"), Some(&dir.path().join("a_first")));
    }

    #[tokio::test]
    async fn custom_mod_is_classified_by_ident_not_directory() {
        let dir = tempfile::tempdir().unwrap();
        let official = dir.path().join("new/data/mods");
        let previous = dir.path().join("old/data/mods");
        write_mod(&official.join("dda"), "dda");
        write_mod(&previous.join("dda_renamed"), "dda");
        write_mod(&previous.join("mycustommod"), "custom1");
        write(&previous.join("mycustommod/items.json"), "[1,2,3]");

        let (tx, _rx) = mpsc::unbounded_channel();
        let report = reconcile_directory(&ModIdentity, &official, &previous, &official, tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.copied, vec!["mycustommod".to_string()]);
        assert!(!official.join("dda_renamed").exists());
        assert_eq!(
            std::fs::read_to_string(official.join("mycustommod/items.json")).unwrap(),
            "[1,2,3]"
        );
        // previous install stays intact
        assert!(previous.join("mycustommod/items.json").exists());
    }

    #[tokio::test]
    async fn conflicting_name_is_skipped_not_clobbered() {
        let dir = tempfile::tempdir().unwrap();
        let official = dir.path().join("new/data/sound");
        let previous = dir.path().join("old/data/sound");
        write(&official.join("basic/soundpack.txt"), "NAME: basic\n");
        write(&official.join("mypack/readme.txt"), "official file");
        write(&previous.join("mypack/soundpack.txt"), "NAME: mine\n");

        let (tx, _rx) = mpsc::unbounded_channel();
        let report =
            reconcile_directory(&SoundpackIdentity, &official, &previous, &official, tx, CancellationToken::new())
                .await
                .unwrap();

        assert!(report.copied.is_empty());
        assert_eq!(report.skipped_conflicts, vec!["mypack".to_string()]);
        assert_eq!(
            std::fs::read_to_string(official.join("mypack/readme.txt")).unwrap(),
            "official file"
        );
        assert!(!official.join("mypack/soundpack.txt").exists());
    }

    #[tokio::test]
    async fn custom_fonts_may_be_files_or_directories() {
        let dir = tempfile::tempdir().unwrap();
        let official = dir.path().join("new/data/font");
        let previous = dir.path().join("old/data/font");
        write(&official.join("unifont.ttf"), "bundled");
        write(&previous.join("unifont.ttf"), "bundled");
        write(&previous.join("Terminus.ttf"), "mine");
        write(&previous.join("extra/a.ttf"), "mine too");

        let (tx, _rx) = mpsc::unbounded_channel();
        let report = reconcile_directory(&FontIdentity, &official, &previous, &official, tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.copied, vec!["Terminus.ttf".to_string(), "extra".to_string()]);
        assert_eq!(std::fs::read_to_string(official.join("Terminus.ttf")).unwrap(), "mine");
        assert!(official.join("extra/a.ttf").is_file());
    }

    #[tokio::test]
    async fn missing_previous_directory_carries_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let report = reconcile_directory(
            &ModIdentity,
            &dir.path().join("official"),
            &dir.path().join("previous"),
            &dir.path().join("target"),
            tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(report.copied.is_empty());
        assert!(!dir.path().join("target").exists());
    }
}
