use std::path::Path;
use std::process::Command;

use log::{debug, info};

use super::quote::{escape_for_elevation, shell_quote};
use super::{CommandExecutor, stream_command};

/// How an elevated command is requested from the OS.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Elevation {
    /// `osascript -e 'do shell script "..." with administrator privileges'`
    AppleScript,
    /// `pkexec /bin/bash -c ...` (polkit consent dialog)
    Pkexec,
    /// `sudo /bin/bash -c ...`
    Sudo,
}

impl Elevation {
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            Elevation::AppleScript
        } else {
            Elevation::Pkexec
        }
    }
}

/// Same contract as [`super::ShellExecutor`], but the command runs with
/// administrative rights after a consent prompt.
#[derive(Clone, Debug)]
pub struct PrivilegedExecutor {
    elevation: Elevation,
}

impl PrivilegedExecutor {
    pub fn new(elevation: Elevation) -> Self {
        Self { elevation }
    }

    /// Program and argv for the elevated invocation. A working directory is
    /// folded into the script since the elevation helpers reset it.
    pub fn build_invocation(&self, command: &str, working_dir: Option<&Path>) -> (String, Vec<String>) {
        let script = match working_dir {
            Some(dir) => format!(
                "cd {} && {}",
                shell_quote(&dir.to_string_lossy()),
                command
            ),
            None => command.to_string(),
        };
        match self.elevation {
            Elevation::AppleScript => (
                "osascript".to_string(),
                vec![
                    "-e".to_string(),
                    format!(
                        "do shell script \"{}\" with administrator privileges",
                        escape_for_elevation(&script)
                    ),
                ],
            ),
            Elevation::Pkexec => (
                "pkexec".to_string(),
                vec!["/bin/bash".to_string(), "-c".to_string(), script],
            ),
            Elevation::Sudo => (
                "sudo".to_string(),
                vec!["/bin/bash".to_string(), "-c".to_string(), script],
            ),
        }
    }
}

impl Default for PrivilegedExecutor {
    fn default() -> Self {
        Self::new(Elevation::platform_default())
    }
}

impl CommandExecutor for PrivilegedExecutor {
    fn execute(
        &self,
        command: &str,
        working_dir: Option<&Path>,
        on_output: &mut dyn FnMut(&str),
    ) -> i32 {
        let (program, args) = self.build_invocation(command, working_dir);
        info!("requesting elevated privileges via {}", program);
        debug!("elevated exec: {}", command);
        let mut cmd = Command::new(&program);
        cmd.args(&args);
        stream_command(cmd, on_output)
    }
}
