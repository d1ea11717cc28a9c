use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

const APP_DIR: &str = "devdeck";
const CONFIG_ENV: &str = "DEVDECK_CONFIG";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub integrations: IntegrationsConfig,
    #[serde(default)]
    pub update: UpdateConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrchestrationConfig {
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_status_poll_interval_secs")]
    pub status_poll_interval_secs: u64,
    #[serde(default = "default_launcher_dirs")]
    pub launcher_dirs: Vec<PathBuf>,
    #[serde(default = "default_ensure_homebrew")]
    pub ensure_homebrew: bool,
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct IntegrationsConfig {
    #[serde(default = "default_docker_enabled")]
    pub docker_enabled: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UpdateConfig {
    #[serde(default)]
    pub version_file: Option<PathBuf>,
    #[serde(default = "default_update_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub install_path: Option<PathBuf>,
    #[serde(default)]
    pub helper_path: Option<PathBuf>,
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

// Defaults for StoreConfig
fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(home_dir)
        .join(APP_DIR)
        .join("projects.json")
}

// Defaults for OrchestrationConfig
fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_status_poll_interval_secs() -> u64 {
    2
}

fn default_launcher_dirs() -> Vec<PathBuf> {
    vec![dirs::desktop_dir().unwrap_or_else(|| home_dir().join("Desktop"))]
}

fn default_ensure_homebrew() -> bool {
    true
}

fn default_stop_grace_secs() -> u64 {
    2
}

// Defaults for IntegrationsConfig
fn default_docker_enabled() -> bool {
    true
}

// Defaults for UpdateConfig
fn default_update_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join("updates")
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            status_poll_interval_secs: default_status_poll_interval_secs(),
            launcher_dirs: default_launcher_dirs(),
            ensure_homebrew: default_ensure_homebrew(),
            stop_grace_secs: default_stop_grace_secs(),
        }
    }
}

impl OrchestrationConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.status_poll_interval_secs)
    }
}

impl Default for IntegrationsConfig {
    fn default() -> Self {
        Self {
            docker_enabled: default_docker_enabled(),
        }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            version_file: None,
            cache_dir: default_update_cache_dir(),
            request_timeout_secs: default_request_timeout_secs(),
            install_path: None,
            helper_path: None,
        }
    }
}

pub fn get_config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(home_dir)
        .join(APP_DIR)
        .join("config.json")
}

pub fn load_or_create_config() -> Result<Config> {
    let path = get_config_path();

    if path.exists() {
        load_and_validate_config()
    } else {
        let config = Config::default();
        save_config(&config)?;
        Ok(config)
    }
}

pub fn load_and_validate_config() -> Result<Config> {
    let path = get_config_path();
    let content = fs::read_to_string(&path).context("failed to read config file")?;
    let config = serde_json::from_str::<Config>(&content).context("failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.orchestration.status_poll_interval_secs == 0 {
        bail!("orchestration.status_poll_interval_secs must be greater than 0");
    }
    if config.orchestration.launcher_dirs.is_empty() {
        bail!("orchestration.launcher_dirs must list at least one directory");
    }
    if config.update.request_timeout_secs == 0 {
        bail!("update.request_timeout_secs must be greater than 0");
    }
    Ok(())
}

pub fn save_config(config: &Config) -> Result<()> {
    let path = get_config_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("failed to create config directory")?;
    }
    let content = serde_json::to_string_pretty(config).context("failed to serialize config")?;
    fs::write(&path, content).context("failed to write config file")?;
    Ok(())
}
