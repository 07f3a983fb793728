use std::cmp::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use wareflow_db::APP_VERSION;

pub const LATEST_RELEASE_URL: &str =
    "https://api.github.com/repos/wareflowx/wareflow-ems/releases/latest";

const TIMEOUT: Duration = Duration::from_secs(10);

/// The fields of a GitHub release that matter here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub published_at: Option<String>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct UpdateCheck {
    pub current_version: String,
    pub latest_version: Option<String>,
    pub update_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<Release>,
}

impl UpdateCheck {
    /// Compare `release` against `current`. Prereleases and drafts never
    /// count as an update.
    pub fn evaluate(current: &str, release: Release) -> Self {
        if release.prerelease || release.draft {
            info!("latest release {} is a prerelease, skipping", release.tag_name);
            return Self {
                current_version: current.to_string(),
                latest_version: None,
                update_available: false,
                release: None,
            };
        }
        let latest = release.tag_name.trim_start_matches(['v', 'V']).to_string();
        Self {
            current_version: current.to_string(),
            update_available: is_newer(&latest, current),
            latest_version: Some(latest),
            release: Some(release),
        }
    }
}

/// Split `1.3.0`, `v1.3.0-rc.1` or `1.3.0rc1` into numeric parts and an
/// optional prerelease tag. Build metadata after `+` is ignored.
fn parse_version(raw: &str) -> Option<(Vec<u64>, Option<&str>)> {
    let raw = raw.trim();
    let raw = raw.strip_prefix(['v', 'V']).unwrap_or(raw);
    let raw = raw.split('+').next().unwrap_or(raw);

    let end = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (numbers, rest) = raw.split_at(end);
    let numbers = numbers.trim_end_matches('.');
    if numbers.is_empty() {
        return None;
    }
    let parts = numbers
        .split('.')
        .map(|p| p.parse().ok())
        .collect::<Option<Vec<u64>>>()?;
    let pre = rest.trim_start_matches(['-', '.']);
    Some((parts, (!pre.is_empty()).then_some(pre)))
}

/// Whether `latest` is a strictly newer version than `current`.
/// Unparseable versions never are.
pub fn is_newer(latest: &str, current: &str) -> bool {
    let (Some((latest, latest_pre)), Some((current, current_pre))) =
        (parse_version(latest), parse_version(current))
    else {
        return false;
    };

    let part = |v: &[u64], i: usize| v.get(i).copied().unwrap_or(0);
    for i in 0..latest.len().max(current.len()) {
        match part(&latest, i).cmp(&part(&current, i)) {
            Ordering::Equal => continue,
            ordering => return ordering == Ordering::Greater,
        }
    }

    // 1.3.0 is newer than 1.3.0-rc.1
    match (latest_pre, current_pre) {
        (None, Some(_)) => true,
        (Some(a), Some(b)) => a > b,
        _ => false,
    }
}

async fn fetch_latest(url: &str) -> Result<Release> {
    let client = reqwest::Client::builder()
        .user_agent(format!("wems/{APP_VERSION}"))
        .timeout(TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;

    debug!("fetching {url}");
    let release = client
        .get(url)
        .header("Accept", "application/vnd.github+json")
        .send()
        .await
        .with_context(|| format!("failed to reach {url}"))?
        .error_for_status()
        .context("release lookup failed")?
        .json::<Release>()
        .await
        .context("unexpected release payload")?;
    Ok(release)
}

pub async fn check(url: &str, json: bool) -> Result<()> {
    info!("checking for updates (current: {APP_VERSION})");
    let result = UpdateCheck::evaluate(APP_VERSION, fetch_latest(url).await?);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    match (&result.latest_version, &result.release) {
        (Some(latest), Some(release)) if result.update_available => {
            println!("Update available: v{APP_VERSION} -> v{latest}");
            if !release.html_url.is_empty() {
                println!("  {}", release.html_url);
            }
            println!("Back up first with `wems backup create`, then run `wems migrate` after installing.");
        }
        (Some(latest), _) => {
            println!("Wareflow EMS v{APP_VERSION} is up to date (latest release: v{latest}).")
        }
        _ => println!("Wareflow EMS v{APP_VERSION}: no stable release newer than this one."),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(tag: &str, prerelease: bool) -> Release {
        Release {
            tag_name: tag.to_string(),
            html_url: format!("https://github.com/wareflowx/wareflow-ems/releases/tag/{tag}"),
            prerelease,
            draft: false,
            published_at: None,
        }
    }

    #[test]
    fn compares_numeric_parts() {
        assert!(is_newer("1.3.0", "1.2.9"));
        assert!(is_newer("v1.10.0", "1.9.0"));
        assert!(is_newer("2.0", "1.99.99"));
        assert!(is_newer("1.2.0.1", "1.2"));
        assert!(!is_newer("1.2.0", "1.2.0"));
        assert!(!is_newer("1.2", "1.2.0"));
        assert!(!is_newer("0.9.0", "1.0.0"));
    }

    #[test]
    fn prerelease_tags_sort_before_the_release() {
        assert!(is_newer("1.3.0", "1.3.0-rc.1"));
        assert!(!is_newer("1.3.0-rc.1", "1.3.0"));
        assert!(is_newer("1.3.0rc2", "1.3.0rc1"));
        assert!(is_newer("1.3.0-beta", "1.2.0"));
        assert!(!is_newer("1.3.0+build.5", "1.3.0"));
    }

    #[test]
    fn garbage_is_never_newer() {
        assert!(!is_newer("latest", "0.1.0"));
        assert!(!is_newer("", "0.1.0"));
        assert!(!is_newer("1..2", "0.1.0"));
        assert!(!is_newer("1.0.0", "unknown"));
    }

    #[test]
    fn prereleases_are_skipped() {
        let check = UpdateCheck::evaluate("0.1.0", release("v9.0.0-beta.1", true));
        assert!(!check.update_available);
        assert_eq!(check.latest_version, None);
        assert!(check.release.is_none());

        let mut draft = release("v9.0.0", false);
        draft.draft = true;
        assert!(!UpdateCheck::evaluate("0.1.0", draft).update_available);
    }

    #[test]
    fn newer_stable_release_is_offered() {
        let check = UpdateCheck::evaluate("0.1.0", release("v0.2.0", false));
        assert!(check.update_available);
        assert_eq!(check.latest_version.as_deref(), Some("0.2.0"));

        let same = UpdateCheck::evaluate("0.2.0", release("v0.2.0", false));
        assert!(!same.update_available);
        assert_eq!(same.latest_version.as_deref(), Some("0.2.0"));
    }

    #[test]
    fn release_payload_ignores_unknown_fields() {
        let body = r#"{
            "tag_name": "v1.4.0",
            "html_url": "https://github.com/wareflowx/wareflow-ems/releases/tag/v1.4.0",
            "prerelease": false,
            "body": "notes",
            "author": { "login": "octocat" }
        }"#;
        let release: Release = serde_json::from_str(body).unwrap();
        assert_eq!(release.tag_name, "v1.4.0");
        assert!(!release.draft);
        assert_eq!(release.published_at, None);
    }
}
