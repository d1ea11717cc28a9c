use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LOG_PATH: &str = "app.log";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Running,
    #[default]
    Stopped,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Running => "running",
            ProjectStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A locally managed service. `status` and `pid` are caches re-derived from
/// live inspection; `id` is the only stable key.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<u16>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripts: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_urls: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_sudo: Option<BTreeMap<String, bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launcher_path: Option<PathBuf>,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    #[serde(default = "default_log_path")]
    pub log_path: String,
}

fn default_log_path() -> String {
    DEFAULT_LOG_PATH.to_string()
}

impl Project {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
            path: None,
            ports: None,
            scripts: None,
            script_urls: None,
            needs_sudo: None,
            launcher_path: None,
            status: ProjectStatus::Stopped,
            pid: None,
            log_path: default_log_path(),
        }
    }

    /// Lowercased, trimmed project type.
    pub fn normalized_kind(&self) -> String {
        self.kind.trim().to_lowercase()
    }

    pub fn is_container(&self) -> bool {
        self.normalized_kind() == "docker"
    }

    pub fn script_url(&self, action: &Action) -> Option<&str> {
        self.script_urls
            .as_ref()
            .and_then(|m| m.get(action.key()))
            .map(String::as_str)
            .filter(|u| !u.trim().is_empty())
    }

    pub fn inline_script(&self, action: &Action) -> Option<&str> {
        self.scripts
            .as_ref()
            .and_then(|m| m.get(action.key()))
            .map(String::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn needs_privileges(&self, action: &Action) -> bool {
        self.needs_sudo
            .as_ref()
            .and_then(|m| m.get(action.key()).copied())
            .unwrap_or(false)
    }

    /// Stored launcher path, ignoring blank values.
    pub fn stored_launcher(&self) -> Option<&PathBuf> {
        self.launcher_path
            .as_ref()
            .filter(|p| !p.as_os_str().to_string_lossy().trim().is_empty())
    }

    pub fn primary_port(&self) -> Option<u16> {
        self.ports.as_ref().and_then(|p| p.first().copied())
    }

    /// `path / log_path`, or the bare log path when no project path is set.
    pub fn log_file(&self) -> PathBuf {
        match &self.path {
            Some(base) => base.join(&self.log_path),
            None => PathBuf::from(&self.log_path),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Action {
    Deploy,
    Start,
    Stop,
    Install,
    Update,
    Other(String),
}

impl Action {
    pub fn key(&self) -> &str {
        match self {
            Action::Deploy => "deploy",
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Install => "install",
            Action::Update => "update",
            Action::Other(name) => name,
        }
    }

    /// Status a successful run of this action implies.
    pub fn resulting_status(&self) -> ProjectStatus {
        match self {
            Action::Stop => ProjectStatus::Stopped,
            _ => ProjectStatus::Running,
        }
    }
}

impl FromStr for Action {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "deploy" => Action::Deploy,
            "start" => Action::Start,
            "stop" => Action::Stop,
            "install" => Action::Install,
            "update" => Action::Update,
            other => Action::Other(other.to_string()),
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Result of a single orchestrated action.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ActionOutcome {
    /// Command ran and exited 0; cached status was updated.
    Completed,
    /// Command ran and exited nonzero; cached status untouched.
    Failed(i32),
    /// Nothing was executed (launcher already present, no script configured, ...).
    Skipped(String),
    /// Another action is already in flight for this project.
    Busy,
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionOutcome::Completed)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StatusReport {
    pub status: ProjectStatus,
    pub pid: Option<i32>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KillOutcome {
    Success,
    AlreadyExited,
    PermissionDenied,
    TimedOut,
    Failed(i32),
}

/// Platform-specific download entry inside a remote manifest.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DownloadDescriptor {
    pub url: String,
    #[serde(default, alias = "sha256", skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Used both for the bundled version file and the remote manifest.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersionDescriptor {
    pub version: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, alias = "sha256", skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub downloads: BTreeMap<String, DownloadDescriptor>,
}

impl VersionDescriptor {
    /// Folds the entry for `platform` (if any) into the top-level
    /// url/checksum/size.
    pub fn for_platform(mut self, platform: &str) -> Self {
        if let Some(d) = self.downloads.get(platform).cloned() {
            self.url = d.url;
            if d.checksum.is_some() {
                self.checksum = d.checksum;
            }
            if d.size.is_some() {
                self.size = d.size;
            }
        }
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum MonitorKind {
    Log,
    Port,
    Process,
    Comprehensive,
    Directory,
    Network,
}

impl FromStr for MonitorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "log" => Ok(MonitorKind::Log),
            "port" => Ok(MonitorKind::Port),
            "process" => Ok(MonitorKind::Process),
            "comprehensive" => Ok(MonitorKind::Comprehensive),
            "directory" => Ok(MonitorKind::Directory),
            "network" => Ok(MonitorKind::Network),
            other => Err(format!("unknown monitor kind: {}", other)),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    pub project_id: String,
    #[serde(rename = "type")]
    pub kind: MonitorKind,
    /// Log path, port number, PID or directory depending on `kind`.
    #[serde(default)]
    pub target: String,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_title: Option<String>,
}

fn default_refresh_interval() -> u64 {
    1
}
