//! Turning a verified artifact into a bundle ready to swap in, and the
//! detached script that performs the swap once this process has exited.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use log::{info, warn};

use crate::errors::UpdateError;
use crate::exec::{CommandExecutor, capture, shell_quote};
use crate::launcher;

pub trait Stager: Send + Sync {
    /// Produces the new bundle inside `staging_dir` and returns its path.
    fn stage(&self, artifact: &Path, staging_dir: &Path) -> Result<PathBuf, UpdateError>;
}

/// First `*.app` entry in `dir`.
fn find_bundle(dir: &Path) -> Option<PathBuf> {
    let mut bundles: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "app"))
        .collect();
    bundles.sort();
    bundles.into_iter().next()
}

fn quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

/// Mounts a disk image, copies the bundle out and detaches again.
pub struct DiskImageStager {
    executor: Arc<dyn CommandExecutor>,
}

impl DiskImageStager {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

impl Stager for DiskImageStager {
    fn stage(&self, artifact: &Path, staging_dir: &Path) -> Result<PathBuf, UpdateError> {
        let mount = staging_dir.join("mnt");
        fs::create_dir_all(&mount)?;

        let attach = capture(
            self.executor.as_ref(),
            &format!(
                "hdiutil attach -nobrowse -readonly -mountpoint {} {}",
                quote_path(&mount),
                quote_path(artifact)
            ),
            None,
        );
        if !attach.success() {
            return Err(UpdateError::Staging(format!(
                "hdiutil attach failed ({}): {}",
                attach.code,
                attach.text()
            )));
        }

        let result = match find_bundle(&mount) {
            Some(bundle) => {
                let target = staging_dir.join(bundle.file_name().unwrap_or_default());
                let copy = capture(
                    self.executor.as_ref(),
                    &format!("ditto {} {}", quote_path(&bundle), quote_path(&target)),
                    None,
                );
                if copy.success() {
                    Ok(target)
                } else {
                    Err(UpdateError::Staging(format!(
                        "copying {} failed: {}",
                        bundle.display(),
                        copy.text()
                    )))
                }
            }
            None => Err(UpdateError::Staging(
                "disk image contains no application bundle".to_string(),
            )),
        };

        let detach = capture(
            self.executor.as_ref(),
            &format!("hdiutil detach {} -quiet", quote_path(&mount)),
            None,
        );
        if !detach.success() {
            warn!("hdiutil detach {} failed: {}", mount.display(), detach.text());
        }
        result
    }
}

/// Delegates unpacking to an external updater binary invoked as
/// `<helper> <artifact> <staging_dir>`.
pub struct HelperStager {
    executor: Arc<dyn CommandExecutor>,
    helper: PathBuf,
}

impl HelperStager {
    pub fn new(executor: Arc<dyn CommandExecutor>, helper: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            helper: helper.into(),
        }
    }
}

impl Stager for HelperStager {
    fn stage(&self, artifact: &Path, staging_dir: &Path) -> Result<PathBuf, UpdateError> {
        let out = capture(
            self.executor.as_ref(),
            &format!(
                "{} {} {}",
                quote_path(&self.helper),
                quote_path(artifact),
                quote_path(staging_dir)
            ),
            None,
        );
        if !out.success() {
            return Err(UpdateError::Staging(format!(
                "updater helper exited with {}: {}",
                out.code,
                out.text()
            )));
        }
        find_bundle(staging_dir).ok_or_else(|| {
            UpdateError::Staging("updater helper produced no application bundle".to_string())
        })
    }
}

/// Swap of the running bundle for a staged one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplacementPlan {
    pub pid: u32,
    pub current: PathBuf,
    pub staged: PathBuf,
    pub backup: PathBuf,
}

impl ReplacementPlan {
    pub fn new(pid: u32, current: PathBuf, staged: PathBuf) -> Self {
        let mut backup = OsString::from(current.as_os_str());
        backup.push(".backup");
        Self {
            pid,
            current,
            staged,
            backup: PathBuf::from(backup),
        }
    }

    /// Waits for `pid` to exit, backs up the current bundle, moves the staged
    /// one into place (restoring the backup if that fails), clears the
    /// quarantine attribute and relaunches.
    pub fn render_script(&self) -> String {
        let current = quote_path(&self.current);
        let staged = quote_path(&self.staged);
        let backup = quote_path(&self.backup);
        format!(
            r#"pid={pid}
while kill -0 "$pid" 2>/dev/null; do sleep 0.5; done
rm -rf {backup}
if [ -e {current} ]; then
  mv {current} {backup} || exit 1
fi
if ! mv {staged} {current}; then
  [ -e {backup} ] && mv {backup} {current}
  exit 1
fi
xattr -dr com.apple.quarantine {current} 2>/dev/null || true
{relaunch} >/dev/null 2>&1"#,
            pid = self.pid,
            current = current,
            staged = staged,
            backup = backup,
            relaunch = launcher::open_command(&self.current),
        )
    }

    /// Starts the swap script in its own process group so it outlives us.
    pub fn spawn_detached(&self) -> Result<(), UpdateError> {
        let mut command = Command::new("/bin/bash");
        command
            .arg("-c")
            .arg(self.render_script())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let child = command
            .spawn()
            .map_err(|e| UpdateError::Staging(format!("failed to schedule replacement: {}", e)))?;
        info!(
            "replacement of {} scheduled (helper PID {})",
            self.current.display(),
            child.id()
        );
        Ok(())
    }
}

/// Bundle containing the running executable, or the executable itself.
pub fn current_bundle_path() -> Result<PathBuf, UpdateError> {
    let exe = std::env::current_exe()?;
    Ok(exe
        .ancestors()
        .find(|p| p.extension().is_some_and(|ext| ext == "app"))
        .map(Path::to_path_buf)
        .unwrap_or(exe))
}
