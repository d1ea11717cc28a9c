use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{info, warn};

use super::source::UpdateSource;
use super::stage::{ReplacementPlan, Stager, current_bundle_path};
use super::verify::verify_artifact;
use super::version::{
    compare_versions, current_app_version, load_local_version, manifest_url_for, platform_key,
};
use crate::config::UpdateConfig;
use crate::errors::UpdateError;
use crate::model::VersionDescriptor;

#[derive(Clone, Debug, PartialEq)]
pub enum UpdateState {
    Idle,
    Checking,
    NoUpdate,
    UpdateAvailable(VersionDescriptor),
    CheckFailed(String),
    Installing,
    InstalledPendingRestart,
    InstallFailed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum UpdateCheck {
    NoUpdate {
        current: String,
    },
    UpdateAvailable {
        current: String,
        remote: VersionDescriptor,
    },
    Failed(String),
}

pub struct UpdateManager {
    source: Box<dyn UpdateSource>,
    stager: Box<dyn Stager>,
    settings: UpdateConfig,
    current_version: String,
    state: Mutex<UpdateState>,
}

impl UpdateManager {
    pub fn new(
        settings: UpdateConfig,
        source: Box<dyn UpdateSource>,
        stager: Box<dyn Stager>,
    ) -> Self {
        Self {
            source,
            stager,
            settings,
            current_version: current_app_version().to_string(),
            state: Mutex::new(UpdateState::Idle),
        }
    }

    pub fn with_current_version(mut self, version: impl Into<String>) -> Self {
        self.current_version = version.into();
        self
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    pub fn state(&self) -> UpdateState {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn set_state(&self, next: UpdateState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = next;
    }

    pub fn check_for_update(&self) -> UpdateCheck {
        self.set_state(UpdateState::Checking);
        let current = self.current_version.clone();
        match self.fetch_remote() {
            Ok(remote) => {
                if compare_versions(&current, &remote.version) == Ordering::Less {
                    info!("update available: {} -> {}", current, remote.version);
                    self.set_state(UpdateState::UpdateAvailable(remote.clone()));
                    UpdateCheck::UpdateAvailable { current, remote }
                } else {
                    self.set_state(UpdateState::NoUpdate);
                    UpdateCheck::NoUpdate { current }
                }
            }
            Err(err) => {
                warn!("update check failed: {}", err);
                self.set_state(UpdateState::CheckFailed(err.to_string()));
                UpdateCheck::Failed(err.to_string())
            }
        }
    }

    fn fetch_remote(&self) -> Result<VersionDescriptor, UpdateError> {
        let local = load_local_version(self.settings.version_file.as_deref())?;
        let manifest = manifest_url_for(&local.url)?;
        info!("checking for updates at {}", manifest);
        let body = self.source.fetch_manifest(&manifest)?;
        let remote: VersionDescriptor = serde_json::from_slice(&body)?;
        Ok(remote.for_platform(&platform_key()))
    }

    /// Downloads, verifies and stages `remote`, returning the swap to run.
    /// The installed bundle is never touched here.
    pub fn stage_update(&self, remote: &VersionDescriptor) -> Result<ReplacementPlan, UpdateError> {
        self.set_state(UpdateState::Installing);
        match self.try_stage(remote) {
            Ok(plan) => Ok(plan),
            Err(err) => {
                warn!("update to {} failed: {}", remote.version, err);
                self.set_state(UpdateState::InstallFailed(err.to_string()));
                Err(err)
            }
        }
    }

    /// Stages `remote` and schedules the detached replacement. The caller
    /// should exit afterwards so the swap can proceed.
    pub fn download_and_install(
        &self,
        remote: &VersionDescriptor,
    ) -> Result<ReplacementPlan, UpdateError> {
        let plan = self.stage_update(remote)?;
        if let Err(err) = plan.spawn_detached() {
            self.set_state(UpdateState::InstallFailed(err.to_string()));
            return Err(err);
        }
        self.set_state(UpdateState::InstalledPendingRestart);
        Ok(plan)
    }

    fn try_stage(&self, remote: &VersionDescriptor) -> Result<ReplacementPlan, UpdateError> {
        if remote.url.trim().is_empty() {
            return Err(UpdateError::Network(
                "manifest does not name a download".to_string(),
            ));
        }
        let cache = &self.settings.cache_dir;
        fs::create_dir_all(cache)?;

        let artifact = cache.join(artifact_name(&remote.url));
        self.download_to(&remote.url, &artifact)?;

        if let Err(err) = verify_artifact(&artifact, remote.checksum.as_deref(), remote.size) {
            remove_quietly(&artifact);
            return Err(err);
        }
        info!("verified {}", artifact.display());

        let staging = cache.join("staged");
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;
        let staged = match self.stager.stage(&artifact, &staging) {
            Ok(staged) => staged,
            Err(err) => {
                if let Err(e) = fs::remove_dir_all(&staging) {
                    warn!("could not clean {}: {}", staging.display(), e);
                }
                return Err(err);
            }
        };

        let current = match &self.settings.install_path {
            Some(path) => path.clone(),
            None => current_bundle_path()?,
        };
        Ok(ReplacementPlan::new(std::process::id(), current, staged))
    }

    /// Downloads into a `.part` file and renames it on success.
    fn download_to(&self, url: &str, artifact: &Path) -> Result<(), UpdateError> {
        let mut partial = artifact.as_os_str().to_owned();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        let result = File::create(&partial)
            .map_err(UpdateError::from)
            .and_then(|file| {
                let mut writer = BufWriter::new(file);
                self.source.download(url, &mut writer)
            });
        match result {
            Ok(bytes) => {
                info!("downloaded {} bytes from {}", bytes, url);
                fs::rename(&partial, artifact)?;
                Ok(())
            }
            Err(err) => {
                remove_quietly(&partial);
                Err(err)
            }
        }
    }
}

fn artifact_name(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("update.bin")
        .to_string()
}

fn remove_quietly(path: &Path) {
    if let Err(err) = fs::remove_file(path)
        && path.exists()
    {
        warn!("could not remove {}: {}", path.display(), err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_name_from_url() {
        assert_eq!(artifact_name("https://x/rel/DevDeck.dmg?sig=1"), "DevDeck.dmg");
        assert_eq!(artifact_name("https://x/"), "update.bin");
    }
}
