// Build discovery
// Lists game builds from GitHub releases and reduces each release to the one
// asset matching the selected platform and graphics mode.

use crate::config::{ARCHIVE_EXTENSIONS, BUILDS_PER_PAGE, USER_AGENT};
use crate::settings::{Graphics, Platform};
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Release {
    pub tag_name: String,
    pub name: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub assets: Vec<Asset>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Asset {
    pub name: String,
    pub size: u64,
    pub browser_download_url: String,
}

/// One build as offered to the user. `url` is `None` when the release has
/// nothing for the selected platform; such builds are listed but cannot be
/// installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDescriptor {
    pub url: Option<String>,
    pub name: Option<String>,
    pub number: String,
    pub date: Option<DateTime<Utc>>,
}

impl BuildDescriptor {
    pub fn is_installable(&self) -> bool {
        self.url.is_some()
    }

    /// Digit groups of the build number, compared numerically.
    pub fn number_key(&self) -> Vec<u64> {
        self.number
            .split(|c: char| !c.is_ascii_digit())
            .filter(|group| !group.is_empty())
            .filter_map(|group| group.parse().ok())
            .collect()
    }
}

/// Newest first, by build number then release date.
pub fn sort_builds(builds: &mut [BuildDescriptor]) {
    builds.sort_by(|a, b| {
        b.number_key()
            .cmp(&a.number_key())
            .then_with(|| b.date.cmp(&a.date))
    });
}

/// Build counter embedded in a release tag: everything from the first digit,
/// as long as that tail is only digits and dashes.
pub fn build_number_from_tag(tag: &str) -> Option<String> {
    let start = tag.find(|c: char| c.is_ascii_digit())?;
    let tail = &tag[start..];
    tail.chars()
        .all(|c| c.is_ascii_digit() || c == '-')
        .then(|| tail.trim_end_matches('-').to_string())
}

fn os_token() -> &'static str {
    if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "osx"
    } else {
        "linux"
    }
}

/// Asset for this OS, platform and graphics mode in a format the launcher
/// can extract. The shortest matching name wins (avoids debug-symbol and
/// similar companion archives).
pub fn select_asset(assets: &[Asset], platform: Platform, graphics: Graphics) -> Option<&Asset> {
    let platform_tokens: &[&str] = match platform {
        Platform::X64 => &["x64"],
        Platform::X86 => &["x32", "x86"],
    };
    let graphics_tokens: &[&str] = match graphics {
        Graphics::Tiles => &["tiles", "with-graphics"],
        Graphics::Curses => &["curses", "terminal-only"],
    };

    assets
        .iter()
        .filter(|asset| {
            let name = asset.name.to_ascii_lowercase();
            ARCHIVE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
                && name.contains(os_token())
                && platform_tokens.iter().any(|t| name.contains(t))
                && graphics_tokens.iter().any(|t| name.contains(t))
        })
        .min_by_key(|asset| asset.name.len())
}

fn describe(release: &Release, platform: Platform, graphics: Graphics) -> BuildDescriptor {
    let asset = select_asset(&release.assets, platform, graphics);
    BuildDescriptor {
        url: asset.map(|a| a.browser_download_url.clone()),
        name: release.name.clone().or_else(|| asset.map(|a| a.name.clone())),
        number: build_number_from_tag(&release.tag_name).unwrap_or_else(|| release.tag_name.clone()),
        date: release.published_at,
    }
}

/// Fetch the most recent releases of `repository` ("owner/repo") and
/// describe them as builds, newest first.
pub async fn fetch_builds(
    client: &reqwest::Client,
    repository: &str,
    platform: Platform,
    graphics: Graphics,
) -> Result<Vec<BuildDescriptor>, String> {
    let api_url = releases_api_url(repository)?;

    crate::debug::log_section("Fetch Builds");
    crate::debug::log(&format!("URL: {}", api_url));

    let response = client
        .get(&api_url)
        .header("User-Agent", USER_AGENT)
        .header("Accept", "application/vnd.github.v3+json")
        .send()
        .await
        .map_err(|e| format!("Failed to fetch releases: {}", e))?;

    if !response.status().is_success() {
        return Err(format!("GitHub API error: {}", response.status()));
    }

    let releases = response
        .json::<Vec<Release>>()
        .await
        .map_err(|e| format!("Failed to parse releases: {}", e))?;

    let mut builds: Vec<BuildDescriptor> = releases
        .iter()
        .map(|release| describe(release, platform, graphics))
        .collect();
    sort_builds(&mut builds);

    crate::debug::log(&format!(
        "{} builds, {} installable on {} {}",
        builds.len(),
        builds.iter().filter(|b| b.is_installable()).count(),
        platform.as_str(),
        graphics.as_str()
    ));
    Ok(builds)
}

/// Releases endpoint for an "owner/repo" repository name.
fn releases_api_url(repository: &str) -> Result<String, String> {
    match repository.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => Ok(format!(
            "https://api.github.com/repos/{}/{}/releases?per_page={}",
            owner, repo, BUILDS_PER_PAGE
        )),
        _ => Err(format!("Invalid repository name {:?}, expected owner/repo", repository)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn asset(name: &str) -> Asset {
        Asset {
            name: name.to_string(),
            size: 1,
            browser_download_url: format!("https://example.invalid/{}", name),
        }
    }

    fn build(number: &str, day: Option<u32>) -> BuildDescriptor {
        BuildDescriptor {
            url: None,
            name: None,
            number: number.to_string(),
            date: day.map(|d| Utc.with_ymd_and_hms(2024, 5, d, 0, 0, 0).unwrap()),
        }
    }

    #[test]
    fn releases_url_from_repository_name() {
        assert_eq!(
            releases_api_url("CleverRaven/Cataclysm-DDA").unwrap(),
            format!(
                "https://api.github.com/repos/CleverRaven/Cataclysm-DDA/releases?per_page={}",
                BUILDS_PER_PAGE
            )
        );
        assert!(releases_api_url("Cataclysm-DDA").is_err());
        assert!(releases_api_url("/repo").is_err());
        assert!(releases_api_url("a/b/c").is_err());
    }

    #[test]
    fn build_numbers_from_tags() {
        assert_eq!(
            build_number_from_tag("cdda-experimental-2024-05-01-1234").as_deref(),
            Some("2024-05-01-1234")
        );
        assert_eq!(build_number_from_tag("cdda-jenkins-b11000").as_deref(), Some("11000"));
        assert_eq!(build_number_from_tag("0.G"), None);
        assert_eq!(build_number_from_tag("nightly"), None);
    }

    #[test]
    fn builds_sort_numerically_then_by_date() {
        let mut builds = vec![build("9999", Some(1)), build("10000", Some(1)), build("10000", Some(3))];
        sort_builds(&mut builds);

        assert_eq!(builds[0].number, "10000");
        assert_eq!(builds[0].date, Some(Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap()));
        assert_eq!(builds[2].number, "9999");

        let mut dated = vec![build("2024-05-01-0900", None), build("2024-05-02-0100", None)];
        sort_builds(&mut dated);
        assert_eq!(dated[0].number, "2024-05-02-0100");
    }

    #[test]
    fn selects_matching_asset() {
        let os = os_token();
        let assets = vec![
            asset(&format!("cdda-{}-terminal-only-x64-2024.zip", os)),
            asset(&format!("cdda-{}-with-graphics-x64-2024.zip", os)),
            asset(&format!("cdda-{}-with-graphics-and-sounds-x64-2024.zip", os)),
            asset(&format!("cdda-{}-with-graphics-x32-2024.zip", os)),
            asset(&format!("cdda-{}-with-graphics-x64-2024.tar.gz", os)),
        ];

        let tiles = select_asset(&assets, Platform::X64, Graphics::Tiles).unwrap();
        assert_eq!(tiles.name, format!("cdda-{}-with-graphics-x64-2024.zip", os));

        let curses = select_asset(&assets, Platform::X64, Graphics::Curses).unwrap();
        assert!(curses.name.contains("terminal-only"));

        let x86 = select_asset(&assets, Platform::X86, Graphics::Tiles).unwrap();
        assert!(x86.name.contains("x32"));

        assert!(select_asset(&assets[..1], Platform::X86, Graphics::Tiles).is_none());
    }

    #[test]
    fn release_without_asset_is_not_installable() {
        let release = Release {
            tag_name: "cdda-experimental-2024-05-01-1234".to_string(),
            name: Some("Experimental".to_string()),
            published_at: None,
            assets: vec![asset("source.tar.gz")],
        };
        let described = describe(&release, Platform::X64, Graphics::Tiles);
        assert!(!described.is_installable());
        assert_eq!(described.number, "2024-05-01-1234");
    }
}
