//! Live status inspection for projects: containers, processes, ports, logs.
//!
//! Everything here is best-effort. Keyword matching can pick up unrelated
//! processes with generic names; the cached status on a [`Project`] is only
//! ever a hint.

use std::fs;
use std::sync::Arc;

use log::debug;

use crate::exec::{CommandExecutor, capture, shell_quote};
use crate::integrations::docker;
use crate::matching::process_keywords;
use crate::model::{Project, ProjectStatus, StatusReport};
use crate::process::{kill, ports};

pub const DEFAULT_LOG_TAIL: usize = 200;

pub struct ProcessStatusProbe {
    executor: Arc<dyn CommandExecutor>,
    docker_enabled: bool,
    pid_alive: fn(i32) -> bool,
}

impl ProcessStatusProbe {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            docker_enabled: true,
            pid_alive: kill::pid_alive,
        }
    }

    pub fn with_docker(mut self, enabled: bool) -> Self {
        self.docker_enabled = enabled;
        self
    }

    /// Overrides the liveness check used for cached PIDs.
    pub fn with_pid_check(mut self, pid_alive: fn(i32) -> bool) -> Self {
        self.pid_alive = pid_alive;
        self
    }

    fn uses_container(&self, project: &Project) -> bool {
        self.docker_enabled && project.is_container()
    }

    pub fn is_running(&self, project: &Project) -> bool {
        self.check_status(project).status == ProjectStatus::Running
    }

    /// Re-derives status and PID from the live system.
    pub fn check_status(&self, project: &Project) -> StatusReport {
        if self.uses_container(project) {
            let running = docker::resolve_project_container(self.executor.as_ref(), project)
                .map(|m| docker::is_container_running(self.executor.as_ref(), &m.name))
                .unwrap_or(false);
            return StatusReport {
                status: if running {
                    ProjectStatus::Running
                } else {
                    ProjectStatus::Stopped
                },
                pid: None,
            };
        }

        let lines = self.find_processes(project);
        match lines.first() {
            Some(first) => StatusReport {
                status: ProjectStatus::Running,
                pid: parse_pid_column(first),
            },
            None => StatusReport {
                status: ProjectStatus::Stopped,
                pid: None,
            },
        }
    }

    /// Human-readable process rows (`pid ppid command`) for the project, or a
    /// placeholder line for container projects with nothing to show.
    pub fn list_processes(&self, project: &Project) -> Vec<String> {
        if self.uses_container(project) {
            let Some(found) = docker::resolve_project_container(self.executor.as_ref(), project)
            else {
                return vec![docker::NO_CONTAINER_MESSAGE.to_string()];
            };
            let rows = docker::container_processes(self.executor.as_ref(), &found.name);
            return match rows.len() {
                0 => vec!["Container not running or no process information".to_string()],
                1 => vec!["Container is running but returned no process list".to_string()],
                _ => rows,
            };
        }
        self.find_processes(project)
    }

    fn find_processes(&self, project: &Project) -> Vec<String> {
        if let Some(pid) = project.pid.filter(|pid| (self.pid_alive)(*pid)) {
            let rows = self.ps_rows(&format!(
                "ps -p {} -o pid=,ppid=,command= 2>/dev/null",
                pid
            ));
            if !rows.is_empty() {
                return rows;
            }
        }

        for keyword in process_keywords(project) {
            let rows = self.ps_rows(&keyword_search_script(&keyword));
            if !rows.is_empty() {
                debug!("project {} matched processes by keyword {:?}", project.id, keyword);
                return rows;
            }
        }
        Vec::new()
    }

    fn ps_rows(&self, script: &str) -> Vec<String> {
        capture(self.executor.as_ref(), script, None).non_empty_lines()
    }

    pub fn port_in_use(&self, port: u16) -> bool {
        ports::port_in_use(self.executor.as_ref(), port)
    }

    pub fn port_status_text(&self, project: &Project) -> String {
        let Some(port) = project.primary_port() else {
            return "No port configured".to_string();
        };
        let host = if self.port_in_use(port) {
            format!("Port {} is in use", port)
        } else {
            format!("Port {} is not listening", port)
        };
        if !self.uses_container(project) {
            return host;
        }
        let Some(found) = docker::resolve_project_container(self.executor.as_ref(), project) else {
            return docker::NO_CONTAINER_MESSAGE.to_string();
        };
        let mapping = docker::container_ports(self.executor.as_ref(), &found.name)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Container not running or missing".to_string());
        format!("docker port:\n{}\n\nhost: {}", mapping, host)
    }

    /// Last `n` log lines, or a placeholder describing why there are none.
    pub fn recent_log_lines(&self, project: &Project, n: usize) -> String {
        if self.uses_container(project) {
            let Some(found) = docker::resolve_project_container(self.executor.as_ref(), project)
            else {
                return docker::NO_CONTAINER_MESSAGE.to_string();
            };
            let text = docker::container_logs(self.executor.as_ref(), &found.name, n);
            return if text.is_empty() {
                "No logs or container not running".to_string()
            } else {
                text
            };
        }

        if project.path.as_ref().is_none_or(|p| p.as_os_str().is_empty()) {
            return "No project path configured".to_string();
        }
        match fs::read_to_string(project.log_file()) {
            Ok(content) => tail_lines(&content, n),
            Err(_) => "Log file not found".to_string(),
        }
    }
}

/// Case-insensitive ERE for `keyword` whose first alphanumeric character is
/// wrapped in a bracket class, so the search never matches its own shell.
pub fn self_excluding_pattern(keyword: &str) -> String {
    let mut out = String::new();
    let mut bracketed = false;
    for ch in keyword.chars() {
        if !bracketed && ch.is_alphanumeric() {
            out.push('[');
            out.push(ch);
            out.push(']');
            bracketed = true;
        } else if r"\.^$|?*+()[]{}".contains(ch) {
            out.push('\\');
            out.push(ch);
        } else {
            out.push(ch);
        }
    }
    out
}

/// `pgrep -if` for the keyword, falling back to a `ps | grep` sweep when pgrep
/// is unavailable. Prints `pid ppid command` rows.
pub fn keyword_search_script(keyword: &str) -> String {
    format!(
        r#"key={key}
if command -v pgrep >/dev/null 2>&1; then
  pids=$(pgrep -if -- "$key" || true)
else
  pids=""
fi
if [ -n "$pids" ]; then
  ps -p $(echo $pids | tr ' ' ',') -o pid=,ppid=,command= 2>/dev/null
else
  ps -axo pid=,ppid=,command= 2>/dev/null | grep -iE -- "$key" || true
fi"#,
        key = shell_quote(&self_excluding_pattern(keyword))
    )
}

pub fn parse_pid_column(row: &str) -> Option<i32> {
    row.split_whitespace().next()?.parse().ok()
}

pub fn tail_lines(content: &str, n: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use super::*;

    /// Replies to commands containing a needle; everything else prints nothing.
    struct Replies(Vec<(String, String)>, Mutex<Vec<String>>);

    impl Replies {
        fn new(pairs: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self(
                pairs
                    .iter()
                    .map(|(a, b)| (a.to_string(), b.to_string()))
                    .collect(),
                Mutex::new(Vec::new()),
            ))
        }
    }

    impl CommandExecutor for Replies {
        fn execute(&self, command: &str, _: Option<&Path>, on_output: &mut dyn FnMut(&str)) -> i32 {
            self.1.lock().unwrap().push(command.to_string());
            if let Some((_, text)) = self.0.iter().find(|(needle, _)| command.contains(needle)) {
                text.lines().for_each(|l| on_output(l));
            }
            0
        }
    }

    #[test]
    fn keyword_probe_stops_at_first_hit() {
        let exec = Replies::new(&[("key='[M]y Api'", "  311     1 node server.js\n")]);
        let probe = ProcessStatusProbe::new(exec.clone()).with_pid_check(|_| false);
        let project = Project::new("api-1", "My Api", "node");

        let report = probe.check_status(&project);
        assert_eq!(report.status, ProjectStatus::Running);
        assert_eq!(report.pid, Some(311));

        let seen = exec.1.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].starts_with("key='[a]pi-1'"));
    }

    #[test]
    fn live_cached_pid_is_used_directly() {
        let exec = Replies::new(&[("ps -p 77 ", "77 1 python app.py")]);
        let probe = ProcessStatusProbe::new(exec.clone()).with_pid_check(|pid| pid == 77);
        let mut project = Project::new("py", "Py", "python");
        project.pid = Some(77);
        assert!(probe.is_running(&project));
        assert_eq!(exec.1.lock().unwrap().len(), 1);
    }

    #[test]
    fn nothing_found_is_stopped() {
        let exec = Replies::new(&[]);
        let probe = ProcessStatusProbe::new(exec).with_pid_check(|_| false);
        let project = Project::new("ghost", "Ghost", "python");
        assert_eq!(
            probe.check_status(&project),
            StatusReport {
                status: ProjectStatus::Stopped,
                pid: None
            }
        );
    }

    #[test]
    fn container_status_follows_running_flag() {
        let exec = Replies::new(&[("docker ps -a", "My-App"), ("docker inspect", "false")]);
        let probe = ProcessStatusProbe::new(exec);
        let project = Project::new("proj1", "My App", "docker");
        assert!(!probe.is_running(&project));
    }

    #[test]
    fn search_pattern_escapes_and_brackets() {
        assert_eq!(self_excluding_pattern("nexus"), "[n]exus");
        assert_eq!(
            self_excluding_pattern(".nexus/bin/nexus-network"),
            r"\.[n]exus/bin/nexus-network"
        );
        assert_eq!(self_excluding_pattern("nexus.sh"), r"[n]exus\.sh");
    }

    #[test]
    fn log_tail_placeholders_and_content() {
        let exec = Replies::new(&[]);
        let probe = ProcessStatusProbe::new(exec);
        let mut project = Project::new("p", "P", "node");
        assert_eq!(probe.recent_log_lines(&project, 5), "No project path configured");

        let dir = tempfile::tempdir().unwrap();
        project.path = Some(dir.path().to_path_buf());
        assert_eq!(probe.recent_log_lines(&project, 5), "Log file not found");

        fs::write(dir.path().join("app.log"), "1\n2\n3\n4\n").unwrap();
        assert_eq!(probe.recent_log_lines(&project, 2), "3\n4");
    }

    #[test]
    fn missing_container_log_placeholder() {
        let exec = Replies::new(&[("docker ps -a", "other")]);
        let probe = ProcessStatusProbe::new(exec);
        let project = Project::new("proj1", "My App", "docker");
        assert_eq!(probe.recent_log_lines(&project, 10), docker::NO_CONTAINER_MESSAGE);
    }

    #[test]
    fn port_check_parses_lsof_fields() {
        let exec = Replies::new(&[("-iTCP:5432", "p900\ncpostgres\nn*:5432")]);
        let probe = ProcessStatusProbe::new(exec);
        assert!(probe.port_in_use(5432));
    }
}
