//! Launcher artifact discovery and opening.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::debug;

use crate::exec::{CommandExecutor, shell_quote};
use crate::matching::{LauncherCandidate, launcher_keywords, rank_launchers};
use crate::model::Project;

/// Non-hidden entries of `dir` with their modification time. Unreadable
/// directories yield nothing.
pub fn scan_dir(dir: &Path) -> Vec<LauncherCandidate> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("cannot read launcher dir {:?}: {}", dir, err);
            return Vec::new();
        }
    };
    entries
        .flatten()
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| {
            let modified = e
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            LauncherCandidate {
                path: e.path(),
                modified,
            }
        })
        .collect()
}

/// Most recently modified launcher across `dirs` matching the project.
pub fn discover(project: &Project, dirs: &[PathBuf]) -> Option<PathBuf> {
    let corpus: Vec<LauncherCandidate> = dirs.iter().flat_map(|d| scan_dir(d)).collect();
    rank_launchers(&launcher_keywords(project), &corpus)
        .into_iter()
        .next()
        .map(|c| c.path)
}

pub fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

fn opener() -> &'static str {
    if cfg!(target_os = "macos") {
        "/usr/bin/open"
    } else {
        "xdg-open"
    }
}

pub fn open_command(path: &Path) -> String {
    format!("{} {}", opener(), shell_quote(&path.to_string_lossy()))
}

/// Opens the launcher with the platform opener. Returns whether it succeeded.
pub fn open(executor: &dyn CommandExecutor, path: &Path, log: &dyn Fn(&str)) -> bool {
    if !path.exists() {
        log(&format!("Launcher not found: {}", path.display()));
        return false;
    }
    let code = executor.execute(&open_command(path), None, &mut |line| {
        let text = line.trim();
        if !text.is_empty() {
            log(text);
        }
    });
    if code == 0 {
        log(&format!("Started via launcher: {}", file_label(path)));
        true
    } else {
        log(&format!("Launcher failed to start: {}", file_label(path)));
        false
    }
}
