use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;

use super::{CommandExecutor, stream_command};

const DEFAULT_SHELL: &str = "/bin/bash";

/// Runs command lines under `bash -c`.
#[derive(Clone, Debug)]
pub struct ShellExecutor {
    shell: PathBuf,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self::with_shell(DEFAULT_SHELL)
    }

    pub fn with_shell(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor for ShellExecutor {
    fn execute(
        &self,
        command: &str,
        working_dir: Option<&Path>,
        on_output: &mut dyn FnMut(&str),
    ) -> i32 {
        debug!("exec: {}", command);
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(command);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        stream_command(cmd, on_output)
    }
}
