//! Live monitoring sessions: a looping shell pipeline per monitor kind, run in
//! the foreground with its output streamed to the caller.

use std::path::PathBuf;

use anyhow::{Result, bail};
use log::info;

use crate::exec::{CommandExecutor, shell_quote};
use crate::integrations::docker;
use crate::model::{MonitorConfig, MonitorKind, Project};
use crate::probe::DEFAULT_LOG_TAIL;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorSession {
    pub title: String,
    pub script: String,
    pub working_dir: Option<PathBuf>,
}

fn banner(title: &str, project: &Project) -> String {
    format!("echo {}", shell_quote(&format!("=== {} - {} ===", title, project.name)))
}

/// Wraps `body` in an endless loop with a timestamp separator per pass.
fn looped(body: &str, interval: u64) -> String {
    format!(
        "while true; do echo \"--- $(date +%H:%M:%S) ---\"; {} sleep {}; done",
        body,
        interval.max(1)
    )
}

fn port_or_default(config: &MonitorConfig, project: &Project) -> u16 {
    config
        .target
        .trim()
        .parse()
        .ok()
        .or_else(|| project.primary_port())
        .unwrap_or(0)
}

fn lsof_port(port: u16) -> String {
    format!("lsof -nP -i :{} 2>/dev/null || echo 'Not listening';", port)
}

/// Builds the session for `config`. `container` is the resolved container
/// name when the project is container-backed.
pub fn plan(
    config: &MonitorConfig,
    project: &Project,
    container: Option<&str>,
) -> Result<MonitorSession> {
    let interval = config.refresh_interval;
    let working_dir = project.path.clone().filter(|p| !p.as_os_str().is_empty());

    if let Some(custom) = config.command.as_deref().filter(|c| !c.trim().is_empty()) {
        let title = config
            .terminal_title
            .clone()
            .unwrap_or_else(|| "Custom Monitor".to_string());
        return Ok(MonitorSession {
            script: format!("{}; {}", banner(&title, project), custom),
            title,
            working_dir,
        });
    }

    let (title, body) = match (config.kind, container) {
        (MonitorKind::Log, Some(c)) => (
            "Docker Logs",
            format!("docker logs -f --tail {} {}", DEFAULT_LOG_TAIL, shell_quote(c)),
        ),
        (MonitorKind::Log, None) => {
            let target = config.target.trim();
            let path = if target.is_empty() {
                project.log_file()
            } else {
                working_dir
                    .as_ref()
                    .map(|base| base.join(target))
                    .unwrap_or_else(|| PathBuf::from(target))
            };
            (
                "Log Monitoring",
                format!(
                    "tail -n {} -F {}",
                    DEFAULT_LOG_TAIL,
                    shell_quote(&path.to_string_lossy())
                ),
            )
        }
        (MonitorKind::Port, Some(c)) => {
            let port = port_or_default(config, project);
            (
                "Docker Port",
                looped(
                    &format!(
                        "docker port {} 2>/dev/null || echo 'Container not running or missing'; echo \"Host :{}\"; {}",
                        shell_quote(c),
                        port,
                        lsof_port(port)
                    ),
                    interval,
                ),
            )
        }
        (MonitorKind::Port, None) => {
            let port = port_or_default(config, project);
            ("Port Monitoring", looped(&lsof_port(port), interval))
        }
        (MonitorKind::Process, Some(c)) => (
            "Docker Processes",
            looped(
                &format!(
                    "docker stats --no-stream --format 'table {{{{.Name}}}}\\t{{{{.CPUPerc}}}}\\t{{{{.MemUsage}}}}' {c} 2>/dev/null || echo 'Container not running or missing'; docker top {c} -eo pid,ppid,cmd 2>/dev/null || true;",
                    c = shell_quote(c)
                ),
                interval,
            ),
        ),
        (MonitorKind::Process, None) => {
            let Some(pid) = config.target.trim().parse::<i32>().ok().or(project.pid) else {
                bail!("no PID to monitor for {}", project.name);
            };
            (
                "Process Monitoring",
                looped(
                    &format!("ps -p {} -o pid=,%cpu=,%mem=,command= || echo 'Not running';", pid),
                    interval,
                ),
            )
        }
        (MonitorKind::Comprehensive, Some(c)) => {
            let port = project.primary_port().unwrap_or(0);
            (
                "Docker Comprehensive",
                looped(
                    &format!(
                        "docker inspect -f 'Status: {{{{.State.Status}}}}  Running: {{{{.State.Running}}}}  StartedAt: {{{{.State.StartedAt}}}}' {c} 2>/dev/null || echo 'Container missing'; \
                         docker port {c} 2>/dev/null || true; echo \"Host :{port}\"; {lsof} \
                         docker top {c} -eo pid,ppid,cmd 2>/dev/null || true; \
                         echo 'Logs (tail 50):'; docker logs --tail 50 {c} 2>&1 || true;",
                        c = shell_quote(c),
                        port = port,
                        lsof = lsof_port(port)
                    ),
                    interval,
                ),
            )
        }
        (MonitorKind::Comprehensive, None) => {
            let port = project.primary_port().unwrap_or(0);
            let process = match project.pid {
                Some(pid) => format!("ps -p {} -o pid=,%cpu=,%mem=,command= || echo 'Not running';", pid),
                None => "echo 'Process: not tracked';".to_string(),
            };
            (
                "Comprehensive Monitoring",
                looped(
                    &format!(
                        "{} echo \"Port {}:\"; {} echo 'Recent logs:'; tail -n 5 {} 2>/dev/null || echo 'Log file not found';",
                        process,
                        port,
                        lsof_port(port),
                        shell_quote(&project.log_file().to_string_lossy())
                    ),
                    interval,
                ),
            )
        }
        (MonitorKind::Directory, _) => {
            let dir = match config.target.trim() {
                "" => ".",
                other => other,
            };
            (
                "Directory Monitoring",
                looped(&format!("ls -la {};", shell_quote(dir)), interval),
            )
        }
        (MonitorKind::Network, _) => (
            "Network Monitoring",
            looped(
                "netstat -an 2>/dev/null | grep -i listen || echo 'No listeners';",
                interval,
            ),
        ),
    };

    let title = config.terminal_title.clone().unwrap_or_else(|| title.to_string());
    Ok(MonitorSession {
        script: format!("{}; {}", banner(&title, project), body),
        title,
        working_dir,
    })
}

/// Resolves the container (when applicable) and builds the session.
pub fn prepare(
    executor: &dyn CommandExecutor,
    docker_enabled: bool,
    config: &MonitorConfig,
    project: &Project,
) -> Result<MonitorSession> {
    let container = if docker_enabled && project.is_container() {
        docker::resolve_project_container(executor, project).map(|m| m.name)
    } else {
        None
    };
    plan(config, project, container.as_deref())
}

/// Runs the session until the pipeline exits (or the process is interrupted).
pub fn run(executor: &dyn CommandExecutor, session: &MonitorSession, log: &dyn Fn(&str)) -> i32 {
    info!("starting monitor session: {}", session.title);
    let dir = session.working_dir.as_deref().filter(|p| p.is_dir());
    executor.execute(&session.script, dir, &mut |line| log(line))
}
