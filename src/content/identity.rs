use crate::config::DISABLED_SUFFIX;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Tileset,
    Soundpack,
    Mod,
    Font,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ContentKind::Tileset => "tilesets",
            ContentKind::Soundpack => "soundpacks",
            ContentKind::Mod => "mods",
            ContentKind::Font => "fonts",
        };
        f.write_str(label)
    }
}

/// What an item is called for comparison purposes, plus a display label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentIdentity {
    pub key: String,
    pub label: String,
}

impl ContentIdentity {
    fn named(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            label: key.clone(),
            key,
        }
    }
}

/// Reads the identity of one content item from disk.
pub trait IdentityExtractor: Send + Sync {
    fn kind(&self) -> ContentKind;

    /// Identity of the item at `path`, or `None` when it is not one.
    fn identify(&self, path: &Path) -> Option<ContentIdentity>;

    /// Whether unidentified directories are searched for nested items.
    fn recursive(&self) -> bool {
        false
    }

    /// Whether plain files can be items, not just directories.
    fn accepts_files(&self) -> bool {
        false
    }
}

/// `dir/name`, or `dir/name.disabled` when only the disabled form exists.
fn find_manifest(dir: &Path, name: &str) -> Option<PathBuf> {
    let enabled = dir.join(name);
    if enabled.is_file() {
        return Some(enabled);
    }
    let disabled = dir.join(format!("{}{}", name, DISABLED_SUFFIX));
    disabled.is_file().then_some(disabled)
}

fn read_text(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    let text = String::from_utf8_lossy(&bytes);
    Some(text.trim_start_matches('\u{feff}').to_string())
}

/// `KEY: value` lines as used by soundpack.txt and tileset.txt. Comments
/// start with `#`.
fn read_key_value(path: &Path, wanted: &str) -> Option<String> {
    let text = read_text(path)?;
    text.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case(wanted))
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ModIdentity;

impl ModIdentity {
    fn ident_from(value: &Value) -> Option<String> {
        let is_mod_info = value
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| t.eq_ignore_ascii_case("MOD_INFO"));
        if !is_mod_info {
            return None;
        }
        value
            .get("ident")
            .or_else(|| value.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

impl IdentityExtractor for ModIdentity {
    fn kind(&self) -> ContentKind {
        ContentKind::Mod
    }

    fn identify(&self, path: &Path) -> Option<ContentIdentity> {
        let manifest = find_manifest(path, "modinfo.json")?;
        let json: Value = serde_json::from_str(&read_text(&manifest)?).ok()?;

        let ident = match &json {
            Value::Array(items) => items.iter().find_map(Self::ident_from),
            other => Self::ident_from(other),
        }?;

        let label = match &json {
            Value::Array(items) => items.iter().find_map(|item| item.get("name").and_then(Value::as_str)),
            other => other.get("name").and_then(Value::as_str),
        }
        .unwrap_or(&ident)
        .to_string();

        Some(ContentIdentity { key: ident, label })
    }

    fn recursive(&self) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SoundpackIdentity;

impl IdentityExtractor for SoundpackIdentity {
    fn kind(&self) -> ContentKind {
        ContentKind::Soundpack
    }

    fn identify(&self, path: &Path) -> Option<ContentIdentity> {
        let manifest = find_manifest(path, "soundpack.txt")?;
        let name = read_key_value(&manifest, "NAME")?;
        let label = read_key_value(&manifest, "VIEW").unwrap_or_else(|| name.clone());
        Some(ContentIdentity { key: name, label })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TilesetIdentity;

impl TilesetIdentity {
    /// Pixel size of the first `tile_info` block in the tileset's JSON.
    fn tile_size(dir: &Path, manifest: &Path) -> Option<(u64, u64)> {
        let json_name = read_key_value(manifest, "JSON").unwrap_or_else(|| "tile_config.json".to_string());
        let config: Value = serde_json::from_str(&read_text(&dir.join(json_name))?).ok()?;
        let info = config.get("tile_info")?.as_array()?.first()?;
        Some((info.get("width")?.as_u64()?, info.get("height")?.as_u64()?))
    }
}

impl IdentityExtractor for TilesetIdentity {
    fn kind(&self) -> ContentKind {
        ContentKind::Tileset
    }

    fn identify(&self, path: &Path) -> Option<ContentIdentity> {
        let manifest = find_manifest(path, "tileset.txt")?;
        let name = read_key_value(&manifest, "NAME")?;
        let view = read_key_value(&manifest, "VIEW").unwrap_or_else(|| name.clone());
        let label = match Self::tile_size(path, &manifest) {
            Some((width, height)) => format!("{} ({}x{})", view, width, height),
            None => view,
        };
        Some(ContentIdentity { key: name, label })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FontIdentity;

impl IdentityExtractor for FontIdentity {
    fn kind(&self) -> ContentKind {
        ContentKind::Font
    }

    fn identify(&self, path: &Path) -> Option<ContentIdentity> {
        let name = path.file_name()?.to_string_lossy().to_string();
        Some(ContentIdentity::named(name))
    }

    fn accepts_files(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn mod_ident_from_array_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("modinfo.json"),
            r#"[{"type":"MOD_INFO","ident":"custom1","name":"My Custom Mod"}]"#,
        );
        let identity = ModIdentity.identify(dir.path()).unwrap();
        assert_eq!(identity.key, "custom1");
        assert_eq!(identity.label, "My Custom Mod");
    }

    #[test]
    fn mod_ident_falls_back_to_id_and_disabled_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("modinfo.json.disabled"),
            "\u{feff}{\"type\":\"MOD_INFO\",\"id\":\"magiclysm\"}",
        );
        assert_eq!(ModIdentity.identify(dir.path()).unwrap().key, "magiclysm");
    }

    #[test]
    fn mod_without_mod_info_entry_is_not_a_mod() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("modinfo.json"), r#"[{"type":"ITEM","id":"thing"}]"#);
        assert_eq!(ModIdentity.identify(dir.path()), None);
    }

    #[test]
    fn soundpack_uses_name_field() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("soundpack.txt"),
            "#Basic provided soundpack\nNAME: basic\nVIEW: Basic\n",
        );
        let identity = SoundpackIdentity.identify(dir.path()).unwrap();
        assert_eq!(identity.key, "basic");
        assert_eq!(identity.label, "Basic");
    }

    #[test]
    fn tileset_reads_tile_size_from_config() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("tileset.txt"),
            "NAME: retrodays\nVIEW: RetroDays\nJSON: tile_config.json\n",
        );
        write(
            &dir.path().join("tile_config.json"),
            r#"{"tile_info":[{"width":10,"height":12}],"tiles-new":[]}"#,
        );
        let identity = TilesetIdentity.identify(dir.path()).unwrap();
        assert_eq!(identity.key, "retrodays");
        assert_eq!(identity.label, "RetroDays (10x12)");
    }

    #[test]
    fn font_identity_is_file_name() {
        let identity = FontIdentity.identify(Path::new("data/font/Terminus.ttf")).unwrap();
        assert_eq!(identity.key, "Terminus.ttf");
    }
}
