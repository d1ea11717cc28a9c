//! Command execution
//!
//! Every shell-out in the crate goes through [`CommandExecutor`], so the
//! orchestrator and probes can be driven by a scripted fake in tests.

mod privileged;
mod quote;
mod shell;

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use log::debug;

use crate::errors::ExecError;

pub use privileged::{Elevation, PrivilegedExecutor};
pub use quote::{escape_for_elevation, normalize_script_newlines, shell_quote};
pub use shell::ShellExecutor;

/// Exit code reported when a command could not be started at all.
pub const SPAWN_FAILURE_EXIT: i32 = 127;

const OUTPUT_DRAIN: Duration = Duration::from_millis(200);

pub trait CommandExecutor: Send + Sync {
    /// Runs `command` to completion, handing each line of combined
    /// stdout/stderr to `on_output` as it arrives. Returns the exit code.
    fn execute(
        &self,
        command: &str,
        working_dir: Option<&Path>,
        on_output: &mut dyn FnMut(&str),
    ) -> i32;
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    pub code: i32,
    pub lines: Vec<String>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Non-blank, trimmed output lines.
    pub fn non_empty_lines(&self) -> Vec<String> {
        self.lines
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn text(&self) -> String {
        self.lines.join("\n").trim().to_string()
    }
}

/// Runs a command and collects its output instead of streaming it.
pub fn capture(
    executor: &dyn CommandExecutor,
    command: &str,
    working_dir: Option<&Path>,
) -> CommandOutput {
    let mut lines = Vec::new();
    let code = executor.execute(command, working_dir, &mut |line| lines.push(line.to_string()));
    CommandOutput { code, lines }
}

/// Spawns `cmd` with both pipes captured and forwards lines until the
/// process exits. Background children that inherited the pipes may keep
/// them open; their readers are detached once the shell is gone.
pub(crate) fn stream_command(mut cmd: Command, on_output: &mut dyn FnMut(&str)) -> i32 {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let program = cmd.get_program().to_string_lossy().to_string();
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(source) => {
            let err = ExecError::Spawn { program, source };
            on_output(&format!("Error: {}", err));
            return SPAWN_FAILURE_EXIT;
        }
    };

    let (tx, rx) = crossbeam_channel::unbounded::<String>();
    if let Some(stdout) = child.stdout.take() {
        spawn_reader(stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(stderr, tx.clone());
    }
    drop(tx);

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let _ = done_tx.send(child.wait());
    });

    let status = loop {
        crossbeam_channel::select! {
            recv(rx) -> line => match line {
                Ok(line) => on_output(&line),
                Err(_) => break done_rx.recv().ok(),
            },
            recv(done_rx) -> status => break status.ok(),
        }
    };

    // Lines written just before exit may still be in flight.
    while let Ok(line) = rx.recv_timeout(OUTPUT_DRAIN) {
        on_output(&line);
    }

    match status {
        Some(Ok(status)) => exit_code(status),
        Some(Err(err)) => {
            on_output(&format!("Error: failed to wait for {}: {}", program, err));
            SPAWN_FAILURE_EXIT
        }
        None => {
            on_output(&format!("Error: lost track of {}", program));
            SPAWN_FAILURE_EXIT
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(stream: R, tx: crossbeam_channel::Sender<String>) {
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    debug!("output stream closed: {}", err);
                    break;
                }
            }
        }
    });
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}
