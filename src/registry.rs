use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const REGISTRY_FILE: &str = "builds.json";

/// What is known about one game executable, keyed by its SHA-256.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub sha256: String,
    pub version: Option<String>,
    pub stable: Option<bool>,
    pub build_number: Option<String>,
    pub released_on: Option<DateTime<Utc>>,
}

/// Storage for (version, build) facts discovered while analysing executables.
/// Every write is an upsert keyed by SHA-256.
pub trait BuildRegistry: Send + Sync {
    fn record_version(&self, version: &str, sha256: &str, stable: bool) -> Result<(), StoreError>;

    fn record_build(
        &self,
        version: Option<&str>,
        sha256: &str,
        build_number: &str,
        released_on: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    fn lookup_build_by_sha256(&self, sha256: &str) -> Option<BuildInfo>;
}

/// Registry kept in memory and, unless created with `in_memory`, mirrored
/// to a pretty-printed JSON file after every write.
pub struct JsonBuildRegistry {
    path: Option<PathBuf>,
    records: Mutex<BTreeMap<String, BuildInfo>>,
}

impl JsonBuildRegistry {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: Mutex::new(BTreeMap::new()),
        }
    }

    /// Load `path` if it exists; a missing file starts empty.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let records = if path.exists() {
            let json = std::fs::read_to_string(path)?;
            let records: BTreeMap<String, BuildInfo> = serde_json::from_str(&json)?;
            crate::debug::log(&format!("Loaded {} build records from {:?}", records.len(), path));
            records
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            records: Mutex::new(records),
        })
    }

    /// Registry file in the per-user configuration directory.
    pub fn open_default() -> Result<Self, StoreError> {
        let dir = dirs::config_dir()
            .ok_or(StoreError::NoConfigDir)?
            .join(crate::config::SETTINGS_DIR_NAME);
        std::fs::create_dir_all(&dir)?;
        Self::open(&dir.join(REGISTRY_FILE))
    }

    fn upsert(&self, sha256: &str, update: impl FnOnce(&mut BuildInfo)) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let record = records.entry(sha256.to_string()).or_insert_with(|| BuildInfo {
            sha256: sha256.to_string(),
            ..Default::default()
        });
        update(record);

        if let Some(path) = &self.path {
            let json = serde_json::to_string_pretty(&*records)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }
}

impl BuildRegistry for JsonBuildRegistry {
    fn record_version(&self, version: &str, sha256: &str, stable: bool) -> Result<(), StoreError> {
        crate::debug::log(&format!("Recording version {} for {}", version, sha256));
        self.upsert(sha256, |record| {
            record.version = Some(version.to_string());
            record.stable = Some(stable);
        })
    }

    fn record_build(
        &self,
        version: Option<&str>,
        sha256: &str,
        build_number: &str,
        released_on: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        crate::debug::log(&format!("Recording build {} for {}", build_number, sha256));
        self.upsert(sha256, |record| {
            if let Some(version) = version {
                record.version = Some(version.to_string());
            }
            record.build_number = Some(build_number.to_string());
            record.released_on = released_on;
        })
    }

    fn lookup_build_by_sha256(&self, sha256: &str) -> Option<BuildInfo> {
        let records = self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        records.get(sha256).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn records_merge_by_sha256() {
        let registry = JsonBuildRegistry::in_memory();
        registry.record_version("0.G", "abc", true).unwrap();
        registry
            .record_build(None, "abc", "11000", Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()))
            .unwrap();

        let info = registry.lookup_build_by_sha256("abc").unwrap();
        assert_eq!(info.version.as_deref(), Some("0.G"));
        assert_eq!(info.stable, Some(true));
        assert_eq!(info.build_number.as_deref(), Some("11000"));
        assert!(registry.lookup_build_by_sha256("def").is_none());
    }

    #[test]
    fn upsert_is_idempotent_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("builds.json");

        {
            let registry = JsonBuildRegistry::open(&path).unwrap();
            registry.record_build(Some("0.H"), "ff00", "12000", None).unwrap();
            registry.record_build(Some("0.H"), "ff00", "12000", None).unwrap();
        }

        let reopened = JsonBuildRegistry::open(&path).unwrap();
        let info = reopened.lookup_build_by_sha256("ff00").unwrap();
        assert_eq!(info.build_number.as_deref(), Some("12000"));
        assert_eq!(reopened.records.lock().unwrap().len(), 1);
    }
}
