//! Lifecycle actions for single projects and sequential batches.
//!
//! Cached status only moves when the underlying command exits 0. Every
//! failure is reported through the log sink; nothing here panics or aborts
//! the host.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::config::OrchestrationConfig;
use crate::exec::{CommandExecutor, capture, shell_quote};
use crate::integrations::brew;
use crate::launcher;
use crate::matching::stop_keyword;
use crate::model::{Action, ActionOutcome, KillOutcome, Project, ProjectStatus, StatusReport};
use crate::probe::{ProcessStatusProbe, self_excluding_pattern};
use crate::process::kill;
use crate::store::ProjectRepository;

pub type LogSink<'a> = &'a dyn Fn(&str);

type Killer = fn(i32, Duration) -> KillOutcome;

pub struct ProjectOrchestrator {
    store: Arc<ProjectRepository>,
    shell: Arc<dyn CommandExecutor>,
    privileged: Arc<dyn CommandExecutor>,
    probe: ProcessStatusProbe,
    settings: OrchestrationConfig,
    killer: Killer,
    in_flight: Mutex<HashSet<String>>,
}

/// Marks a project busy for the lifetime of the guard.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|p| p.into_inner());
        set.remove(&self.id);
    }
}

/// Download-and-pipe form used for every remote script.
pub fn remote_script_command(url: &str) -> String {
    format!("bash <(curl -fsSL {})", shell_quote(url))
}

impl ProjectOrchestrator {
    pub fn new(
        store: Arc<ProjectRepository>,
        shell: Arc<dyn CommandExecutor>,
        privileged: Arc<dyn CommandExecutor>,
        settings: OrchestrationConfig,
    ) -> Self {
        let probe = ProcessStatusProbe::new(shell.clone());
        Self {
            store,
            shell,
            privileged,
            probe,
            settings,
            killer: kill::terminate_pid,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_probe(mut self, probe: ProcessStatusProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_killer(mut self, killer: Killer) -> Self {
        self.killer = killer;
        self
    }

    pub fn store(&self) -> &Arc<ProjectRepository> {
        &self.store
    }

    pub fn probe(&self) -> &ProcessStatusProbe {
        &self.probe
    }

    pub fn settings(&self) -> &OrchestrationConfig {
        &self.settings
    }

    pub fn deploy(&self, id: &str, log: LogSink) -> ActionOutcome {
        self.run(id, &Action::Deploy, log)
    }

    pub fn start(&self, id: &str, log: LogSink) -> ActionOutcome {
        self.run(id, &Action::Start, log)
    }

    pub fn stop(&self, id: &str, log: LogSink) -> ActionOutcome {
        self.run(id, &Action::Stop, log)
    }

    pub fn install(&self, id: &str, log: LogSink) -> ActionOutcome {
        self.run(id, &Action::Install, log)
    }

    pub fn update(&self, id: &str, log: LogSink) -> ActionOutcome {
        self.run(id, &Action::Update, log)
    }

    /// Runs one action against one project and blocks until it finishes.
    pub fn run(&self, id: &str, action: &Action, log: LogSink) -> ActionOutcome {
        self.run_inner(id, action, log, false)
    }

    fn run_inner(
        &self,
        id: &str,
        action: &Action,
        log: LogSink,
        prerequisites_checked: bool,
    ) -> ActionOutcome {
        let Some(project) = self.store.get(id) else {
            log(&format!("Error: project {} not found", id));
            return ActionOutcome::Skipped(format!("unknown project {}", id));
        };
        let Some(_guard) = self.acquire(&project.id) else {
            log(&format!(
                "'{}' ignored: another action is already running for {}",
                action, project.name
            ));
            return ActionOutcome::Busy;
        };

        match action {
            Action::Start => self.start_with_launcher(&project, log),
            Action::Stop if project.script_url(action).is_none() && project.inline_script(action).is_none() => {
                match stop_keyword(&project) {
                    Some(keyword) => self.stop_by_keyword(&project, keyword, log),
                    None => self.run_script(&project, action, log, prerequisites_checked),
                }
            }
            Action::Deploy => {
                if let Some(existing) = self.existing_launcher(&project, log) {
                    let message = format!(
                        "Launcher already present, skipping deploy: {}",
                        launcher::file_label(&existing)
                    );
                    log(&message);
                    return ActionOutcome::Skipped(message);
                }
                self.run_script(&project, action, log, prerequisites_checked)
            }
            _ => self.run_script(&project, action, log, prerequisites_checked),
        }
    }

    fn acquire(&self, id: &str) -> Option<InFlightGuard<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if !set.insert(id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.in_flight,
            id: id.to_string(),
        })
    }

    fn existing_launcher(&self, project: &Project, log: LogSink) -> Option<PathBuf> {
        if let Some(stored) = project.stored_launcher().filter(|p| p.exists()) {
            return Some(stored.clone());
        }
        self.capture_launcher(project, log, false)
    }

    fn run_script(
        &self,
        project: &Project,
        action: &Action,
        log: LogSink,
        prerequisites_checked: bool,
    ) -> ActionOutcome {
        let mut command = match (project.script_url(action), project.inline_script(action)) {
            (Some(url), _) => remote_script_command(url),
            (None, Some(inline)) => inline.to_string(),
            (None, None) => {
                let message = format!("Error: no script URL configured (action={})", action);
                log(&message);
                return ActionOutcome::Skipped(message);
            }
        };

        let privileged = project.needs_privileges(action);
        let wants_brew =
            *action == Action::Deploy && self.settings.ensure_homebrew && !prerequisites_checked;
        if wants_brew {
            if privileged {
                log("Checking Homebrew before deploy...");
                if !brew::ensure_installed(self.shell.as_ref(), log) {
                    let message = "Homebrew is not ready, deploy cancelled.".to_string();
                    log(&message);
                    return ActionOutcome::Skipped(message);
                }
            } else {
                command = brew::wrap_with_ensure(&command);
            }
        }

        let working_dir = project.path.as_deref().filter(|p| p.is_dir());
        let code = if privileged {
            log(&format!("Running with administrator privileges: {}", command));
            self.execute_logged(self.privileged.as_ref(), &command, working_dir, log)
        } else {
            log(&format!("Running: {}", command));
            self.execute_logged(self.shell.as_ref(), &command, working_dir, log)
        };
        log(&format!("'{}' finished with exit code {}", action, code));

        if code != 0 {
            return ActionOutcome::Failed(code);
        }

        if *action == Action::Deploy {
            self.capture_launcher(project, log, false);
        } else {
            self.persist_status(&project.id, action.resulting_status(), None);
        }
        ActionOutcome::Completed
    }

    fn execute_logged(
        &self,
        executor: &dyn CommandExecutor,
        command: &str,
        working_dir: Option<&Path>,
        log: LogSink,
    ) -> i32 {
        executor.execute(command, working_dir, &mut |line| log(line))
    }

    fn start_with_launcher(&self, project: &Project, log: LogSink) -> ActionOutcome {
        let stored = project.stored_launcher().cloned();
        let captured = self.capture_launcher(project, log, stored.is_none());
        let Some(launcher_path) = captured.or(stored) else {
            let message = "No launcher found; refusing to start from the script URL.".to_string();
            log(&message);
            return ActionOutcome::Skipped(message);
        };

        if launcher::open(self.shell.as_ref(), &launcher_path, log) {
            self.persist_status(&project.id, ProjectStatus::Running, None);
            return ActionOutcome::Completed;
        }

        let refreshed = self.store.get(&project.id).unwrap_or_else(|| project.clone());
        if let Some(retry) = self.capture_launcher(&refreshed, log, true)
            && launcher::open(self.shell.as_ref(), &retry, log)
        {
            self.persist_status(&project.id, ProjectStatus::Running, None);
            return ActionOutcome::Completed;
        }
        ActionOutcome::Failed(1)
    }

    /// Scans the launcher directories and records a newly found launcher on
    /// the project.
    fn capture_launcher(
        &self,
        project: &Project,
        log: LogSink,
        log_not_found: bool,
    ) -> Option<PathBuf> {
        let Some(found) = launcher::discover(project, &self.settings.launcher_dirs) else {
            if log_not_found {
                log(&format!("No launcher found for {}", project.name));
            }
            return None;
        };
        if project.stored_launcher() != Some(&found) {
            match self.store.set_launcher(&project.id, &found) {
                Ok(_) => log(&format!("Captured launcher: {}", launcher::file_label(&found))),
                Err(err) => warn!("failed to persist launcher for {}: {}", project.id, err),
            }
        }
        Some(found)
    }

    fn stop_by_keyword(&self, project: &Project, keyword: &str, log: LogSink) -> ActionOutcome {
        let search = format!(
            "pgrep -if -- {} || true",
            shell_quote(&self_excluding_pattern(keyword))
        );
        let pids: Vec<i32> = capture(self.shell.as_ref(), &search, None)
            .non_empty_lines()
            .iter()
            .filter_map(|l| l.parse().ok())
            .collect();

        if pids.is_empty() {
            log(&format!("No process matching {} found", keyword));
            self.persist_status(&project.id, ProjectStatus::Stopped, None);
            return ActionOutcome::Completed;
        }

        let listed: Vec<String> = pids.iter().map(|p| p.to_string()).collect();
        log(&format!("Terminating processes: {}", listed.join(" ")));

        let grace = Duration::from_secs(self.settings.stop_grace_secs);
        let mut all_gone = true;
        for pid in pids {
            let outcome = (self.killer)(pid, grace);
            log(&kill::describe_outcome(keyword, pid, outcome));
            if !matches!(outcome, KillOutcome::Success | KillOutcome::AlreadyExited) {
                all_gone = false;
            }
        }

        if all_gone {
            self.persist_status(&project.id, ProjectStatus::Stopped, None);
            ActionOutcome::Completed
        } else {
            ActionOutcome::Failed(1)
        }
    }

    fn persist_status(&self, id: &str, status: ProjectStatus, pid: Option<i32>) {
        if let Err(err) = self.store.set_status(id, status, pid) {
            warn!("failed to persist status for {}: {}", id, err);
        }
    }

    /// Runs `action` for each project in order. Each run, including the
    /// settle delay, completes before the next begins.
    pub fn run_all(
        &self,
        ids: &[String],
        action: &Action,
        log: LogSink,
    ) -> Vec<(String, ActionOutcome)> {
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let name = self.display_name(id);
            log(&format!("Running '{}' for project: {}", action, name));
            let outcome = self.run(id, action, log);
            outcomes.push((id.clone(), outcome));
            self.settle();
        }
        log(&format!("All projects completed '{}'", action));
        outcomes
    }

    /// Deploys each project in order after a single Homebrew check.
    pub fn deploy_all(&self, ids: &[String], log: LogSink) -> Vec<(String, ActionOutcome)> {
        if self.settings.ensure_homebrew {
            log("Checking Homebrew before deploy...");
            if !brew::ensure_installed(self.shell.as_ref(), log) {
                log("Homebrew is not ready, all deploys cancelled.");
                return Vec::new();
            }
        }

        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            log(&format!("Starting deployment for project: {}", self.display_name(id)));
            let outcome = self.run_inner(id, &Action::Deploy, log, true);
            outcomes.push((id.clone(), outcome));
            self.settle();
        }
        let failed = outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ActionOutcome::Failed(_)))
            .count();
        if failed == 0 {
            log("All projects deployed.");
        } else {
            log(&format!("Deploy finished with {} failure(s).", failed));
        }
        outcomes
    }

    fn settle(&self) {
        let delay = self.settings.settle_delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }

    fn display_name(&self, id: &str) -> String {
        self.store
            .get(id)
            .map(|p| p.name)
            .unwrap_or_else(|| id.to_string())
    }

    /// Re-probes a project and persists any change in status or PID.
    pub fn refresh_status(&self, id: &str) -> Option<StatusReport> {
        let project = self.store.get(id)?;
        let report = self.probe.check_status(&project);
        if report.status != project.status || report.pid != project.pid {
            debug!(
                "status of {} changed: {} -> {}",
                project.id, project.status, report.status
            );
            if let Err(err) = self
                .store
                .update(&project.id, |p| {
                    p.status = report.status;
                    p.pid = report.pid;
                })
            {
                warn!("failed to persist status for {}: {}", project.id, err);
            }
        }
        Some(report)
    }

    pub fn refresh_all(&self) -> Vec<(String, StatusReport)> {
        self.store
            .list()
            .into_iter()
            .filter_map(|p| self.refresh_status(&p.id).map(|r| (p.id, r)))
            .collect()
    }
}
