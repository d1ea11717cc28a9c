//! Heuristic name matching used to find launchers, processes and containers
//! that belong to a project. All functions here are pure.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::model::Project;

/// A project type with special process handling.
struct KnownType {
    kind: &'static str,
    /// Extra process-search keywords, tried after id/name/type.
    extra_keywords: &'static [&'static str],
    /// Keyword used to kill the service when no stop script exists.
    stop_keyword: Option<&'static str>,
}

const KNOWN_TYPES: &[KnownType] = &[KnownType {
    kind: "nexus",
    extra_keywords: &[
        "nexus-network",
        ".nexus/bin/nexus-network",
        "nexus-network start",
        "nexus.command",
        "nexus.sh",
    ],
    stop_keyword: Some("nexus"),
}];

fn known_type(project: &Project) -> Option<&'static KnownType> {
    let kind = project.normalized_kind();
    KNOWN_TYPES.iter().find(|k| k.kind == kind)
}

/// Keyword for the kill-by-keyword stop fallback, if the project type has one.
pub fn stop_keyword(project: &Project) -> Option<&'static str> {
    known_type(project).and_then(|k| k.stop_keyword)
}

/// Lowercased name, type and id, in that order, skipping blanks.
pub fn launcher_keywords(project: &Project) -> Vec<String> {
    [&project.name, &project.kind, &project.id]
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Ordered process-search keywords: id, name, type, then type-specific extras.
pub fn process_keywords(project: &Project) -> Vec<String> {
    let mut keywords: Vec<String> = [&project.id, &project.name, &project.kind]
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if let Some(known) = known_type(project) {
        keywords.extend(known.extra_keywords.iter().map(|k| k.to_string()));
    }
    keywords
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LauncherCandidate {
    pub path: PathBuf,
    pub modified: SystemTime,
}

fn file_stem_lower(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().trim().to_lowercase())
        .unwrap_or_default()
}

/// Candidates whose file stem contains any keyword, newest first.
pub fn rank_launchers(keywords: &[String], corpus: &[LauncherCandidate]) -> Vec<LauncherCandidate> {
    let mut matched: Vec<LauncherCandidate> = corpus
        .iter()
        .filter(|c| {
            let stem = file_stem_lower(&c.path);
            !stem.is_empty() && keywords.iter().any(|k| stem.contains(k.as_str()))
        })
        .cloned()
        .collect();
    matched.sort_by(|a, b| b.modified.cmp(&a.modified));
    matched
}

/// Container names to try, in priority order: id, name, and the name with
/// whitespace runs joined by `-` and `_`.
pub fn container_candidates(project: &Project) -> Vec<String> {
    let raw = project.name.trim();
    let words: Vec<&str> = raw.split_whitespace().collect();
    let mut out: Vec<String> = Vec::new();
    for candidate in [
        project.id.trim().to_string(),
        raw.to_string(),
        words.join("-"),
        words.join("_"),
    ] {
        if !candidate.is_empty() && !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContainerMatch {
    pub name: String,
    /// Other live containers that also matched a (lower-priority) candidate.
    pub also_matched: Vec<String>,
}

impl ContainerMatch {
    pub fn is_ambiguous(&self) -> bool {
        !self.also_matched.is_empty()
    }
}

/// Exact-match resolution against the live container list. The first
/// candidate that matches wins; other matches are reported so callers can
/// flag ambiguity.
pub fn resolve_container(candidates: &[String], live: &[String]) -> Option<ContainerMatch> {
    let mut hits = candidates
        .iter()
        .filter(|c| live.iter().any(|name| name == *c))
        .cloned();
    let name = hits.next()?;
    let also_matched = hits.filter(|h| *h != name).collect();
    Some(ContainerMatch { name, also_matched })
}
