use std::cmp::Ordering;
use std::fs;
use std::path::Path;

use log::debug;
use url::Url;

use crate::errors::UpdateError;
use crate::model::VersionDescriptor;

pub fn current_app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Key used to pick an entry from a manifest's `downloads` map.
pub fn platform_key() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

/// Dotted-numeric comparison. Missing components count as 0 and
/// non-numeric components as 0, so "1.2" == "1.2.0" and "1.9.0" < "1.10.0".
pub fn compare_versions(lhs: &str, rhs: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.trim()
            .trim_start_matches(['v', 'V'])
            .split('.')
            .map(|part| part.trim().parse().unwrap_or(0))
            .collect()
    };
    let (l, r) = (parse(lhs), parse(rhs));
    let len = l.len().max(r.len());
    for i in 0..len {
        let a = l.get(i).copied().unwrap_or(0);
        let b = r.get(i).copied().unwrap_or(0);
        match a.cmp(&b) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Manifest address for a published artifact: `.../App.dmg` becomes
/// `.../App.json`; any other URL is used as-is.
pub fn manifest_url_for(artifact_url: &str) -> Result<Url, UpdateError> {
    let mut url = Url::parse(artifact_url.trim())
        .map_err(|e| UpdateError::InvalidManifestUrl(format!("{}: {}", artifact_url, e)))?;

    let last = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(str::to_string);
    if let Some(stem) = last.as_deref().and_then(|name| name.strip_suffix(".dmg"))
        && let Ok(mut segments) = url.path_segments_mut()
    {
        segments.pop().push(&format!("{}.json", stem));
    }
    Ok(url)
}

/// Reads the version descriptor shipped alongside the application.
pub fn load_local_version(path: Option<&Path>) -> Result<VersionDescriptor, UpdateError> {
    let Some(path) = path else {
        return Err(UpdateError::MissingLocalVersion);
    };
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            debug!("cannot read {}: {}", path.display(), err);
            return Err(UpdateError::MissingLocalVersion);
        }
    };
    Ok(serde_json::from_str(&raw)?)
}
