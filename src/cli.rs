//! Command-line front end.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;

use crate::app::{App, AppEvent, Runtime, WorkerCommand};
use crate::config::{get_config_path, load_or_create_config};
use crate::model::{Action, ActionOutcome, MonitorConfig, MonitorKind, Project};
use crate::monitor;
use crate::probe::DEFAULT_LOG_TAIL;
use crate::update::UpdateCheck;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "devdeck",
    version,
    about = "Deploy, start, stop and watch local development projects.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level. Defaults to `RUST_LOG`, or `info`.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List registered projects with their cached status.
    List,
    /// Register projects from a JSON file (one object or an array).
    Add { file: PathBuf },
    /// Unregister a project.
    Remove { id: String },
    /// Re-probe live status, for one project or all of them.
    Status { id: Option<String> },
    /// Run an action (deploy, start, stop, install, update, ...) for a project.
    Run { id: String, action: String },
    /// Run an action for every project, one after another.
    RunAll { action: String },
    /// Deploy every project, one after another.
    DeployAll,
    /// Print the tail of a project's log.
    Logs {
        id: String,
        #[arg(short = 'n', long, default_value_t = DEFAULT_LOG_TAIL)]
        lines: usize,
    },
    /// Follow a live monitoring pipeline in the foreground.
    Monitor {
        id: String,
        /// log, port, process, comprehensive, directory or network.
        kind: String,
        /// Log path, port, PID or directory, depending on the kind.
        target: Option<String>,
        #[arg(long, default_value_t = 1)]
        interval: u64,
        /// Custom command to run instead of the built-in pipeline.
        #[arg(long)]
        command: Option<String>,
        #[arg(long)]
        title: Option<String>,
    },
    /// Compare the running version against the published manifest.
    CheckUpdate,
    /// Download, verify and install the latest version.
    Update,
    /// Poll status and reload the store on change until interrupted.
    Watch,
    /// Print the configuration file location.
    ConfigPath,
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}

fn print_line(line: &str) {
    println!("{}", line);
}

fn all_ids(app: &App) -> Vec<String> {
    app.store().list().into_iter().map(|p| p.id).collect()
}

/// Parses a file holding one project or a list of them.
pub fn read_projects_file(path: &PathBuf) -> Result<Vec<Project>> {
    let raw = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {:?}", path))?;
    let projects = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(projects)
}

pub fn run(args: CliArgs) -> Result<()> {
    let config = load_or_create_config().context("failed to load configuration")?;
    let app = App::new(config)?;

    match args.command {
        Command::List => {
            for p in app.store().list() {
                println!(
                    "{:<20} {:<24} {:<10} {:<8} {}",
                    p.id,
                    p.name,
                    p.kind,
                    p.status,
                    p.pid.map(|pid| pid.to_string()).unwrap_or_else(|| "-".into())
                );
            }
        }
        Command::Add { file } => {
            for project in read_projects_file(&file)? {
                let id = project.id.clone();
                app.store().add(project)?;
                println!("Added {}", id);
            }
        }
        Command::Remove { id } => {
            let removed = app.store().remove(&id)?;
            println!("Removed {} ({})", removed.id, removed.name);
        }
        Command::Status { id: Some(id) } => {
            let report = app
                .orchestrator()
                .refresh_status(&id)
                .with_context(|| format!("unknown project {}", id))?;
            let project = app.store().get(&id).context("project vanished")?;
            let probe = app.orchestrator().probe();
            println!("{}: {}", project.name, report.status);
            println!("{}", probe.port_status_text(&project));
            for row in probe.list_processes(&project) {
                println!("  {}", row);
            }
        }
        Command::Status { id: None } => {
            for (id, report) in app.orchestrator().refresh_all() {
                let pid = report.pid.map(|p| p.to_string()).unwrap_or_default();
                println!("{:<20} {:<8} {}", id, report.status, pid);
            }
        }
        Command::Run { id, action } => {
            let action: Action = action.parse().unwrap_or_else(|e| match e {});
            let runtime = app.start();
            runtime.submit(WorkerCommand::Run {
                project: id,
                action,
            })?;
            let outcomes = drain_until_finished(&runtime);
            runtime.finish();
            report_outcomes(&outcomes)?;
        }
        Command::RunAll { action } => {
            let action: Action = action.parse().unwrap_or_else(|e| match e {});
            let runtime = app.start();
            runtime.submit(WorkerCommand::RunAll {
                ids: all_ids(&app),
                action,
            })?;
            let outcomes = drain_until_finished(&runtime);
            runtime.finish();
            report_outcomes(&outcomes)?;
        }
        Command::DeployAll => {
            let runtime = app.start();
            runtime.submit(WorkerCommand::DeployAll { ids: all_ids(&app) })?;
            let outcomes = drain_until_finished(&runtime);
            runtime.finish();
            report_outcomes(&outcomes)?;
        }
        Command::Logs { id, lines } => {
            let project = app
                .store()
                .get(&id)
                .with_context(|| format!("unknown project {}", id))?;
            println!("{}", app.orchestrator().probe().recent_log_lines(&project, lines));
        }
        Command::Monitor {
            id,
            kind,
            target,
            interval,
            command,
            title,
        } => {
            let project = app
                .store()
                .get(&id)
                .with_context(|| format!("unknown project {}", id))?;
            let kind: MonitorKind = kind.parse().map_err(anyhow::Error::msg)?;
            let config = MonitorConfig {
                project_id: id,
                kind,
                target: target.unwrap_or_default(),
                refresh_interval: interval,
                command,
                terminal_title: title,
            };
            let session = monitor::prepare(
                app.shell().as_ref(),
                app.config().integrations.docker_enabled,
                &config,
                &project,
            )?;
            let code = monitor::run(app.shell().as_ref(), &session, &print_line);
            if code != 0 {
                bail!("monitor exited with code {}", code);
            }
        }
        Command::CheckUpdate => {
            let manager = app.update_manager()?;
            match manager.check_for_update() {
                UpdateCheck::NoUpdate { current } => println!("Up to date ({})", current),
                UpdateCheck::UpdateAvailable { current, remote } => {
                    println!("Update available: {} -> {}", current, remote.version);
                    if let Some(notes) = remote.release_notes {
                        println!("{}", notes);
                    }
                }
                UpdateCheck::Failed(message) => bail!("update check failed: {}", message),
            }
        }
        Command::Update => {
            let manager = app.update_manager()?;
            match manager.check_for_update() {
                UpdateCheck::NoUpdate { current } => println!("Up to date ({})", current),
                UpdateCheck::UpdateAvailable { remote, .. } => {
                    println!("Installing {}...", remote.version);
                    let plan = manager.download_and_install(&remote)?;
                    println!(
                        "Update staged; {} will be replaced and relaunched after exit.",
                        plan.current.display()
                    );
                }
                UpdateCheck::Failed(message) => bail!("update check failed: {}", message),
            }
        }
        Command::Watch => {
            let mut runtime = app.start();
            app.start_monitoring(&mut runtime);
            for event in runtime.events().iter() {
                print_event(&event);
            }
        }
        Command::ConfigPath => println!("{}", get_config_path().display()),
    }
    Ok(())
}

/// Prints events until the submitted command reports back.
fn drain_until_finished(runtime: &Runtime) -> Vec<(String, ActionOutcome)> {
    for event in runtime.events().iter() {
        match event {
            AppEvent::ActionFinished {
                project, outcome, ..
            } => return vec![(project, outcome)],
            AppEvent::BatchFinished { outcomes, .. } => return outcomes,
            other => print_event(&other),
        }
    }
    Vec::new()
}

fn print_event(event: &AppEvent) {
    match event {
        AppEvent::Log {
            project: Some(id),
            line,
        } => println!("[{}] {}", id, line),
        AppEvent::Log { project: None, line } => println!("{}", line),
        AppEvent::ActionFinished {
            project,
            action,
            outcome,
        } => println!("[{}] {} -> {:?}", project, action, outcome),
        AppEvent::BatchFinished { action, outcomes } => {
            println!("{} finished for {} project(s)", action, outcomes.len())
        }
        AppEvent::StatusUpdated(reports) => {
            for (id, report) in reports {
                println!("status {}: {}", id, report.status);
            }
        }
        AppEvent::StoreReloaded(count) => println!("project store reloaded ({} projects)", count),
        AppEvent::StoreReloadFailed(message) => eprintln!("{}", message),
    }
}

fn report_outcomes(outcomes: &[(String, ActionOutcome)]) -> Result<()> {
    let failed: Vec<String> = outcomes
        .iter()
        .filter_map(|(id, outcome)| match outcome {
            ActionOutcome::Failed(code) => Some(format!("{} (exit {})", id, code)),
            ActionOutcome::Busy => Some(format!("{} (busy)", id)),
            _ => None,
        })
        .collect();
    if !failed.is_empty() {
        bail!("failed: {}", failed.join(", "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_and_logs() {
        let args = CliArgs::try_parse_from(["devdeck", "run", "api", "deploy"]).unwrap();
        assert!(matches!(args.command, Command::Run { ref id, ref action } if id == "api" && action == "deploy"));

        let args = CliArgs::try_parse_from(["devdeck", "logs", "api", "-n", "5"]).unwrap();
        assert!(matches!(args.command, Command::Logs { lines: 5, .. }));
    }

    #[test]
    fn reads_single_or_many_projects() {
        let dir = tempfile::tempdir().unwrap();
        let one = dir.path().join("one.json");
        fs::write(&one, r#"{"id":"a","name":"A","type":"node"}"#).unwrap();
        assert_eq!(read_projects_file(&one).unwrap().len(), 1);

        let many = dir.path().join("many.json");
        fs::write(
            &many,
            r#"[{"id":"a","name":"A","type":"node"},{"id":"b","name":"B","type":"docker"}]"#,
        )
        .unwrap();
        let projects = read_projects_file(&many).unwrap();
        assert_eq!(projects[1].kind, "docker");
    }
}
