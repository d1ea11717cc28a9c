#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use devdeck::config::OrchestrationConfig;
use devdeck::exec::CommandExecutor;
use devdeck::model::Project;
use devdeck::orchestrator::ProjectOrchestrator;
use devdeck::store::ProjectRepository;

/// Answers commands by substring match and records every call in order.
/// Unmatched commands succeed silently.
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<(String, i32, String)>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(self: &Arc<Self>, needle: &str, code: i32, output: &str) -> Arc<Self> {
        self.rules
            .lock()
            .unwrap()
            .push((needle.to_string(), code, output.to_string()));
        self.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(needle)).count()
    }
}

impl CommandExecutor for ScriptedExecutor {
    fn execute(&self, command: &str, _dir: Option<&Path>, on_output: &mut dyn FnMut(&str)) -> i32 {
        self.calls.lock().unwrap().push(command.to_string());
        let rules = self.rules.lock().unwrap().clone();
        for (needle, code, output) in rules {
            if command.contains(&needle) {
                for line in output.lines() {
                    on_output(line);
                }
                return code;
            }
        }
        0
    }
}

/// Collects log lines from an orchestrator run.
#[derive(Default)]
pub struct LogCollector(Mutex<Vec<String>>);

impl LogCollector {
    pub fn sink(&self) -> impl Fn(&str) + '_ {
        move |line: &str| self.0.lock().unwrap().push(line.to_string())
    }

    pub fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }
}

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub store: Arc<ProjectRepository>,
    pub launcher_dir: PathBuf,
}

impl Fixture {
    pub fn new(projects: Vec<Project>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let launcher_dir = dir.path().join("launchers");
        std::fs::create_dir_all(&launcher_dir).unwrap();
        let store = Arc::new(ProjectRepository::open(dir.path().join("projects.json")).unwrap());
        for p in projects {
            store.add(p).unwrap();
        }
        Self {
            dir,
            store,
            launcher_dir,
        }
    }

    pub fn settings(&self) -> OrchestrationConfig {
        OrchestrationConfig {
            settle_delay_ms: 0,
            status_poll_interval_secs: 1,
            launcher_dirs: vec![self.launcher_dir.clone()],
            ensure_homebrew: false,
            stop_grace_secs: 0,
        }
    }

    pub fn orchestrator(
        &self,
        shell: Arc<dyn CommandExecutor>,
        privileged: Arc<dyn CommandExecutor>,
        settings: OrchestrationConfig,
    ) -> ProjectOrchestrator {
        ProjectOrchestrator::new(self.store.clone(), shell, privileged, settings)
    }
}

pub fn scripted_project(id: &str, name: &str, kind: &str, actions: &[&str]) -> Project {
    let mut p = Project::new(id, name, kind);
    for action in actions {
        p.script_urls
            .get_or_insert_with(Default::default)
            .insert(action.to_string(), format!("https://scripts.test/{}/{}.sh", id, action));
    }
    p
}
