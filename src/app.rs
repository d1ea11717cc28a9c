use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, error, info, warn};
use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::Config;
use crate::exec::{CommandExecutor, Elevation, PrivilegedExecutor, ShellExecutor};
use crate::model::{Action, ActionOutcome, StatusReport};
use crate::orchestrator::ProjectOrchestrator;
use crate::probe::ProcessStatusProbe;
use crate::store::ProjectRepository;
use crate::update::{
    DiskImageStager, HelperStager, HttpSource, Stager, UpdateManager,
};

const STORE_DEBOUNCE_DURATION: Duration = Duration::from_millis(500);

#[derive(Clone, Debug)]
pub enum WorkerCommand {
    Run { project: String, action: Action },
    RunAll { ids: Vec<String>, action: Action },
    DeployAll { ids: Vec<String> },
}

#[derive(Clone, Debug)]
pub enum AppEvent {
    /// One line of action output. `project` is unset for batch runs.
    Log {
        project: Option<String>,
        line: String,
    },
    ActionFinished {
        project: String,
        action: Action,
        outcome: ActionOutcome,
    },
    BatchFinished {
        action: Action,
        outcomes: Vec<(String, ActionOutcome)>,
    },
    StatusUpdated(Vec<(String, StatusReport)>),
    StoreReloaded(usize),
    StoreReloadFailed(String),
}

/// Wires the store, executors and orchestrator together from a [`Config`].
pub struct App {
    config: Config,
    store: Arc<ProjectRepository>,
    shell: Arc<dyn CommandExecutor>,
    orchestrator: Arc<ProjectOrchestrator>,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let shell: Arc<dyn CommandExecutor> = Arc::new(ShellExecutor::new());
        let privileged: Arc<dyn CommandExecutor> =
            Arc::new(PrivilegedExecutor::new(Elevation::platform_default()));
        Self::with_executors(config, shell, privileged)
    }

    pub fn with_executors(
        config: Config,
        shell: Arc<dyn CommandExecutor>,
        privileged: Arc<dyn CommandExecutor>,
    ) -> Result<Self> {
        let store = Arc::new(
            ProjectRepository::open(&config.store.path).with_context(|| {
                format!("Failed to open project store {:?}", config.store.path)
            })?,
        );
        let probe = ProcessStatusProbe::new(shell.clone())
            .with_docker(config.integrations.docker_enabled);
        let orchestrator = Arc::new(
            ProjectOrchestrator::new(
                store.clone(),
                shell.clone(),
                privileged,
                config.orchestration.clone(),
            )
            .with_probe(probe),
        );
        Ok(Self {
            config,
            store,
            shell,
            orchestrator,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<ProjectRepository> {
        &self.store
    }

    pub fn shell(&self) -> &Arc<dyn CommandExecutor> {
        &self.shell
    }

    pub fn orchestrator(&self) -> &Arc<ProjectOrchestrator> {
        &self.orchestrator
    }

    pub fn update_manager(&self) -> Result<UpdateManager> {
        let settings = self.config.update.clone();
        let source = HttpSource::new(Duration::from_secs(settings.request_timeout_secs))
            .context("Failed to build HTTP client")?;
        let stager: Box<dyn Stager> = match &settings.helper_path {
            Some(helper) => Box::new(HelperStager::new(self.shell.clone(), helper.clone())),
            None => Box::new(DiskImageStager::new(self.shell.clone())),
        };
        Ok(UpdateManager::new(settings, Box::new(source), stager))
    }

    /// Starts the action worker.
    pub fn start(&self) -> Runtime {
        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let worker = spawn_worker(self.orchestrator.clone(), command_rx, event_tx.clone());
        Runtime {
            commands: Some(command_tx),
            events: event_rx,
            event_tx,
            shutdown: None,
            worker: Some(worker),
        }
    }

    /// Adds the periodic status poll and the store file watcher to `runtime`.
    pub fn start_monitoring(&self, runtime: &mut Runtime) {
        let (shutdown_tx, shutdown_rx) = unbounded::<()>();
        spawn_monitor_thread(
            self.orchestrator.clone(),
            runtime.event_tx.clone(),
            shutdown_rx,
            self.config.orchestration.poll_interval(),
        );
        spawn_store_watcher(self.store.clone(), runtime.event_tx.clone());
        runtime.shutdown = Some(shutdown_tx);
    }
}

/// Handles to the background threads. Dropping the command sender ends the
/// worker; dropping the shutdown sender ends the status poll.
pub struct Runtime {
    commands: Option<Sender<WorkerCommand>>,
    events: Receiver<AppEvent>,
    event_tx: Sender<AppEvent>,
    shutdown: Option<Sender<()>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Runtime {
    pub fn submit(&self, command: WorkerCommand) -> Result<()> {
        let sender = self
            .commands
            .as_ref()
            .context("worker has already been stopped")?;
        sender
            .send(command)
            .map_err(|_| anyhow::anyhow!("worker thread is not running"))
    }

    pub fn events(&self) -> &Receiver<AppEvent> {
        &self.events
    }

    /// Stops accepting commands and waits for queued ones to finish.
    pub fn finish(mut self) {
        self.shutdown.take();
        self.commands.take();
        if let Some(handle) = self.worker.take()
            && handle.join().is_err()
        {
            error!("worker thread panicked");
        }
    }
}

fn spawn_worker(
    orchestrator: Arc<ProjectOrchestrator>,
    rx: Receiver<WorkerCommand>,
    events: Sender<AppEvent>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for command in rx.iter() {
            let event = match command {
                WorkerCommand::Run { project, action } => {
                    let tag = Some(project.clone());
                    let log = |line: &str| {
                        let _ = events.send(AppEvent::Log {
                            project: tag.clone(),
                            line: line.to_string(),
                        });
                    };
                    let outcome = orchestrator.run(&project, &action, &log);
                    AppEvent::ActionFinished {
                        project,
                        action,
                        outcome,
                    }
                }
                WorkerCommand::RunAll { ids, action } => {
                    let outcomes = orchestrator.run_all(&ids, &action, &batch_log(&events));
                    AppEvent::BatchFinished { action, outcomes }
                }
                WorkerCommand::DeployAll { ids } => {
                    let outcomes = orchestrator.deploy_all(&ids, &batch_log(&events));
                    AppEvent::BatchFinished {
                        action: Action::Deploy,
                        outcomes,
                    }
                }
            };
            if events.send(event).is_err() {
                break;
            }
        }
        debug!("worker thread exiting");
    })
}

fn batch_log(events: &Sender<AppEvent>) -> impl Fn(&str) + '_ {
    move |line: &str| {
        let _ = events.send(AppEvent::Log {
            project: None,
            line: line.to_string(),
        });
    }
}

fn spawn_monitor_thread(
    orchestrator: Arc<ProjectOrchestrator>,
    events: Sender<AppEvent>,
    shutdown: Receiver<()>,
    interval: Duration,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut previous: Vec<(String, StatusReport)> = Vec::new();
        loop {
            let scan_start = Instant::now();
            let current = orchestrator.refresh_all();
            if current != previous {
                debug!("status change detected (scan took {:?})", scan_start.elapsed());
                previous = current.clone();
                if events.send(AppEvent::StatusUpdated(current)).is_err() {
                    break;
                }
            } else {
                log::trace!("no status change (scan took {:?})", scan_start.elapsed());
            }
            match shutdown.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                _ => break,
            }
        }
        debug!("status monitor exiting");
    })
}

fn spawn_store_watcher(
    store: Arc<ProjectRepository>,
    events: Sender<AppEvent>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        // Saves replace the file by rename, so watch the directory.
        let (Some(parent), Some(file_name)) = (store.path().parent(), store.path().file_name())
        else {
            error!("store path {:?} has no parent directory", store.path());
            return;
        };
        let parent = if parent.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            parent.to_path_buf()
        };
        if let Err(e) = std::fs::create_dir_all(&parent) {
            error!("Failed to create {:?}: {}", parent, e);
            return;
        }
        let watch_dir = std::fs::canonicalize(&parent).unwrap_or(parent);
        let store_path = watch_dir.join(file_name);
        let (tx, rx) = std::sync::mpsc::channel();

        let mut watcher: RecommendedWatcher = match Watcher::new(
            move |res: Result<NotifyEvent, notify::Error>| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        ) {
            Ok(w) => w,
            Err(e) => {
                error!("Failed to create store watcher: {}", e);
                return;
            }
        };

        if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
            error!("Failed to watch {:?}: {}", watch_dir, e);
            return;
        }
        info!("watching project store {:?}", store_path);

        let mut last_reload = Instant::now() - STORE_DEBOUNCE_DURATION;
        for result in rx {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    error!("Store watch error: {}", e);
                    continue;
                }
            };
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                || !event.paths.iter().any(|p| p == &store_path)
            {
                continue;
            }
            if last_reload.elapsed() < STORE_DEBOUNCE_DURATION {
                continue;
            }
            last_reload = Instant::now();

            let message = match store.reload() {
                Ok(count) => AppEvent::StoreReloaded(count),
                Err(e) => {
                    warn!("Store reload failed: {}", e);
                    AppEvent::StoreReloadFailed(e.to_string())
                }
            };
            if events.send(message).is_err() {
                break;
            }
        }
    })
}
