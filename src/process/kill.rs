//! Process termination using SIGTERM, a grace period, then SIGKILL.

use crate::model::KillOutcome;

#[cfg(unix)]
mod imp {
    use std::thread;
    use std::time::{Duration, Instant};

    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    use crate::model::KillOutcome;

    const SIGKILL_GRACE: Duration = Duration::from_secs(1);
    const POLL_STEP: Duration = Duration::from_millis(200);

    pub fn pid_alive(pid_raw: i32) -> bool {
        if pid_raw <= 0 {
            return false;
        }
        // EPERM means the process exists but belongs to someone else.
        matches!(kill(Pid::from_raw(pid_raw), None), Ok(()) | Err(Errno::EPERM))
    }

    pub fn terminate_pid(pid_raw: i32, grace: Duration) -> KillOutcome {
        if pid_raw <= 0 {
            return KillOutcome::Failed(Errno::EINVAL as i32);
        }
        let pid = Pid::from_raw(pid_raw);

        match kill(pid, None) {
            Err(Errno::ESRCH) => return KillOutcome::AlreadyExited,
            Err(err) => return KillOutcome::Failed(err as i32),
            Ok(()) => {}
        }

        let mut last_perm_denied = false;

        match kill(pid, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => return KillOutcome::AlreadyExited,
            Err(Errno::EPERM) => last_perm_denied = true,
            Err(err) => return KillOutcome::Failed(err as i32),
        }

        match wait_for_exit(pid, grace) {
            Ok(true) => return KillOutcome::Success,
            Ok(false) => {}
            Err(err) => return KillOutcome::Failed(err as i32),
        }

        log::info!("PID {} survived SIGTERM, sending SIGKILL", pid_raw);
        match kill(pid, Signal::SIGKILL) {
            Ok(()) => {}
            Err(Errno::ESRCH) => return KillOutcome::Success,
            Err(Errno::EPERM) => last_perm_denied = true,
            Err(err) => return KillOutcome::Failed(err as i32),
        }

        match wait_for_exit(pid, SIGKILL_GRACE) {
            Ok(true) => KillOutcome::Success,
            Ok(false) => {
                if last_perm_denied {
                    KillOutcome::PermissionDenied
                } else {
                    KillOutcome::TimedOut
                }
            }
            Err(err) => KillOutcome::Failed(err as i32),
        }
    }

    fn wait_for_exit(pid: Pid, timeout: Duration) -> Result<bool, Errno> {
        let deadline = Instant::now() + timeout;
        loop {
            match kill(pid, None) {
                Err(Errno::ESRCH) => return Ok(true),
                Err(Errno::EPERM) => {}
                Err(err) => return Err(err),
                Ok(()) => {}
            }

            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(POLL_STEP);
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use std::time::Duration;

    use crate::model::KillOutcome;

    pub fn pid_alive(_pid_raw: i32) -> bool {
        false
    }

    pub fn terminate_pid(_pid_raw: i32, _grace: Duration) -> KillOutcome {
        KillOutcome::Failed(-1)
    }
}

pub use imp::{pid_alive, terminate_pid};

pub fn describe_outcome(label: &str, pid: i32, outcome: KillOutcome) -> String {
    match outcome {
        KillOutcome::Success => format!("Terminated {} (PID {}).", label, pid),
        KillOutcome::AlreadyExited => format!("{} (PID {}) was already stopped.", label, pid),
        KillOutcome::PermissionDenied => {
            format!("Permission denied terminating {} (PID {}).", label, pid)
        }
        KillOutcome::TimedOut => format!("Timed out terminating {} (PID {}).", label, pid),
        KillOutcome::Failed(err) => {
            format!("Failed to terminate {} (PID {}): {}.", label, pid, err)
        }
    }
}
