mod common;

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded};
use devdeck::exec::CommandExecutor;
use devdeck::model::{Action, ActionOutcome, KillOutcome, ProjectStatus};

use common::{Fixture, LogCollector, ScriptedExecutor, scripted_project};

#[test]
fn failed_script_leaves_status_untouched() {
    let mut running = scripted_project("web", "Web", "node", &["stop"]);
    running.status = ProjectStatus::Running;
    let fx = Fixture::new(vec![
        scripted_project("api", "Api", "python", &["install"]),
        running,
    ]);
    let shell = ScriptedExecutor::new()
        .on("api/install.sh", 3, "pip failed")
        .on("web/stop.sh", 1, "no such process");
    let orch = fx.orchestrator(shell.clone(), shell.clone(), fx.settings());
    let log = LogCollector::default();

    assert_eq!(orch.install("api", &log.sink()), ActionOutcome::Failed(3));
    assert_eq!(fx.store.get("api").unwrap().status, ProjectStatus::Stopped);

    assert_eq!(orch.stop("web", &log.sink()), ActionOutcome::Failed(1));
    assert_eq!(fx.store.get("web").unwrap().status, ProjectStatus::Running);

    assert!(log.contains("pip failed"));
    assert!(log.contains("finished with exit code 3"));
}

#[test]
fn successful_script_updates_and_persists_status() {
    let fx = Fixture::new(vec![scripted_project("api", "Api", "python", &["install"])]);
    let shell = ScriptedExecutor::new();
    let orch = fx.orchestrator(shell.clone(), shell.clone(), fx.settings());
    let log = LogCollector::default();

    assert_eq!(orch.install("api", &log.sink()), ActionOutcome::Completed);
    assert_eq!(
        shell.calls(),
        vec!["bash <(curl -fsSL 'https://scripts.test/api/install.sh')".to_string()]
    );

    fx.store.reload().unwrap();
    assert_eq!(fx.store.get("api").unwrap().status, ProjectStatus::Running);
}

#[test]
fn custom_actions_and_inline_scripts() {
    let mut p = scripted_project("api", "Api", "python", &["migrate"]);
    p.scripts = Some([("seed".to_string(), "echo seeding".to_string())].into());
    let fx = Fixture::new(vec![p]);
    let shell = ScriptedExecutor::new();
    let orch = fx.orchestrator(shell.clone(), shell.clone(), fx.settings());
    let log = LogCollector::default();

    let migrate: Action = "migrate".parse().unwrap();
    assert_eq!(orch.run("api", &migrate, &log.sink()), ActionOutcome::Completed);
    assert_eq!(
        orch.run("api", &Action::Other("seed".into()), &log.sink()),
        ActionOutcome::Completed
    );
    assert_eq!(shell.calls()[1], "echo seeding");

    let outcome = orch.run("api", &Action::Update, &log.sink());
    assert!(matches!(outcome, ActionOutcome::Skipped(_)));
    assert!(log.contains("no script URL configured (action=update)"));
}

#[test]
fn unknown_project_is_skipped() {
    let fx = Fixture::new(vec![]);
    let shell = ScriptedExecutor::new();
    let orch = fx.orchestrator(shell.clone(), shell.clone(), fx.settings());
    let log = LogCollector::default();
    assert!(matches!(
        orch.deploy("ghost", &log.sink()),
        ActionOutcome::Skipped(_)
    ));
    assert!(shell.calls().is_empty());
}

#[test]
fn deploy_skips_network_when_launcher_exists() {
    let fx = Fixture::new(vec![scripted_project("a1", "Alpha", "svc", &["deploy"])]);
    let launcher = fx.launcher_dir.join("alpha.command");
    fs::write(&launcher, "#!/bin/bash\n").unwrap();

    let shell = ScriptedExecutor::new();
    let orch = fx.orchestrator(shell.clone(), shell.clone(), fx.settings());
    let log = LogCollector::default();

    let outcome = orch.deploy("a1", &log.sink());
    assert!(matches!(outcome, ActionOutcome::Skipped(_)));
    assert_eq!(shell.count_containing("curl"), 0);
    assert!(log.contains("skipping deploy: alpha.command"));
    assert!(log.contains("Captured launcher: alpha.command"));
    assert_eq!(fx.store.get("a1").unwrap().launcher_path, Some(launcher));
}

#[test]
fn deploy_captures_launcher_created_by_script() {
    let fx = Fixture::new(vec![scripted_project("a1", "Alpha", "svc", &["deploy"])]);
    let launcher = fx.launcher_dir.join("alpha.command");

    struct Creates(std::path::PathBuf);
    impl CommandExecutor for Creates {
        fn execute(&self, _: &str, _: Option<&std::path::Path>, _: &mut dyn FnMut(&str)) -> i32 {
            fs::write(&self.0, "").unwrap();
            0
        }
    }

    let shell = Arc::new(Creates(launcher.clone()));
    let orch = fx.orchestrator(shell.clone(), shell, fx.settings());
    let log = LogCollector::default();

    assert_eq!(orch.deploy("a1", &log.sink()), ActionOutcome::Completed);
    let stored = fx.store.get("a1").unwrap();
    assert_eq!(stored.launcher_path, Some(launcher));
    assert_eq!(stored.status, ProjectStatus::Stopped);
}

#[test]
fn non_privileged_deploy_is_wrapped_with_brew_bootstrap() {
    let fx = Fixture::new(vec![scripted_project("a1", "Alpha", "svc", &["deploy"])]);
    let shell = ScriptedExecutor::new();
    let privileged = ScriptedExecutor::new();
    let mut settings = fx.settings();
    settings.ensure_homebrew = true;
    let orch = fx.orchestrator(shell.clone(), privileged.clone(), settings);
    let log = LogCollector::default();

    assert_eq!(orch.deploy("a1", &log.sink()), ActionOutcome::Completed);
    let calls = shell.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].contains("command -v brew"));
    assert!(calls[0].ends_with("bash <(curl -fsSL 'https://scripts.test/a1/deploy.sh')"));
    assert!(privileged.calls().is_empty());
}

#[test]
fn privileged_deploy_aborts_when_brew_is_unavailable() {
    let mut p = scripted_project("a1", "Alpha", "svc", &["deploy"]);
    p.needs_sudo = Some([("deploy".to_string(), true)].into());
    let fx = Fixture::new(vec![p]);
    let shell = ScriptedExecutor::new().on("Homebrew not found", 1, "Homebrew installation failed");
    let privileged = ScriptedExecutor::new();
    let mut settings = fx.settings();
    settings.ensure_homebrew = true;
    let orch = fx.orchestrator(shell.clone(), privileged.clone(), settings);
    let log = LogCollector::default();

    assert!(matches!(orch.deploy("a1", &log.sink()), ActionOutcome::Skipped(_)));
    assert!(privileged.calls().is_empty());
    assert!(log.contains("deploy cancelled"));
}

#[test]
fn privileged_actions_use_the_privileged_executor() {
    let mut p = scripted_project("a1", "Alpha", "svc", &["install"]);
    p.needs_sudo = Some([("install".to_string(), true)].into());
    let fx = Fixture::new(vec![p]);
    let shell = ScriptedExecutor::new();
    let privileged = ScriptedExecutor::new();
    let orch = fx.orchestrator(shell.clone(), privileged.clone(), fx.settings());
    let log = LogCollector::default();

    assert_eq!(orch.install("a1", &log.sink()), ActionOutcome::Completed);
    assert!(shell.calls().is_empty());
    assert_eq!(privileged.calls().len(), 1);
    assert!(log.contains("administrator privileges"));
}

#[test]
fn start_opens_discovered_launcher_and_refuses_without_one() {
    let fx = Fixture::new(vec![
        scripted_project("a1", "Alpha", "svc", &["start"]),
        scripted_project("b2", "Beta", "svc2", &["start"]),
    ]);
    fs::write(fx.launcher_dir.join("alpha.command"), "").unwrap();
    let shell = ScriptedExecutor::new();
    let orch = fx.orchestrator(shell.clone(), shell.clone(), fx.settings());
    let log = LogCollector::default();

    assert_eq!(orch.start("a1", &log.sink()), ActionOutcome::Completed);
    assert!(shell.calls()[0].ends_with("alpha.command'"));
    assert_eq!(fx.store.get("a1").unwrap().status, ProjectStatus::Running);

    let outcome = orch.start("b2", &log.sink());
    assert!(matches!(outcome, ActionOutcome::Skipped(_)));
    assert_eq!(shell.count_containing("curl"), 0);
    assert_eq!(fx.store.get("b2").unwrap().status, ProjectStatus::Stopped);
}

static KILLED: AtomicUsize = AtomicUsize::new(0);

fn counting_killer(_pid: i32, _grace: Duration) -> KillOutcome {
    KILLED.fetch_add(1, Ordering::SeqCst);
    KillOutcome::Success
}

#[test]
fn nexus_stop_without_script_kills_by_keyword() {
    let mut p = scripted_project("n1", "Nexus Node", "nexus", &[]);
    p.status = ProjectStatus::Running;
    p.pid = Some(101);
    let fx = Fixture::new(vec![p]);
    let shell = ScriptedExecutor::new().on("pgrep -if -- '[n]exus'", 0, "101\n202\n");
    let orch = fx
        .orchestrator(shell.clone(), shell.clone(), fx.settings())
        .with_killer(counting_killer);
    let log = LogCollector::default();

    assert_eq!(orch.stop("n1", &log.sink()), ActionOutcome::Completed);
    assert_eq!(KILLED.load(Ordering::SeqCst), 2);
    assert!(log.contains("Terminating processes: 101 202"));
    let stored = fx.store.get("n1").unwrap();
    assert_eq!(stored.status, ProjectStatus::Stopped);
    assert_eq!(stored.pid, None);
}

#[test]
fn run_all_finishes_each_project_before_the_next() {
    let fx = Fixture::new(vec![
        scripted_project("p1", "P1", "t", &["install"]),
        scripted_project("p2", "P2", "t", &["install"]),
        scripted_project("p3", "P3", "t", &["install"]),
    ]);
    let shell = ScriptedExecutor::new()
        .on("p1/install.sh", 0, "out-p1-a\nout-p1-b")
        .on("p2/install.sh", 0, "out-p2-a\nout-p2-b")
        .on("p3/install.sh", 0, "out-p3-a\nout-p3-b");
    let mut settings = fx.settings();
    settings.settle_delay_ms = 30;
    let orch = fx.orchestrator(shell.clone(), shell.clone(), settings);
    let log = LogCollector::default();

    let ids: Vec<String> = ["p1", "p2", "p3"].iter().map(|s| s.to_string()).collect();
    let started = Instant::now();
    let outcomes = orch.run_all(&ids, &Action::Install, &log.sink());
    assert!(started.elapsed() >= Duration::from_millis(90));
    assert!(outcomes.iter().all(|(_, o)| o.is_success()));

    let lines = log.lines();
    let pos = |needle: &str| lines.iter().position(|l| l == needle).unwrap();
    for (current, next) in [("P1", "P2"), ("P2", "P3")] {
        let cur = current.to_lowercase();
        assert!(pos(&format!("Running 'install' for project: {}", current)) < pos(&format!("out-{}-a", cur)));
        assert!(pos(&format!("out-{}-b", cur)) < pos(&format!("Running 'install' for project: {}", next)));
    }
    assert_eq!(lines.last().unwrap(), "All projects completed 'install'");
}

#[test]
fn deploy_all_checks_brew_once() {
    let fx = Fixture::new(vec![
        scripted_project("p1", "P1", "t1", &["deploy"]),
        scripted_project("p2", "P2", "t2", &["deploy"]),
    ]);
    let shell = ScriptedExecutor::new();
    let mut settings = fx.settings();
    settings.ensure_homebrew = true;
    let orch = fx.orchestrator(shell.clone(), shell.clone(), settings);
    let log = LogCollector::default();

    let ids = vec!["p1".to_string(), "p2".to_string()];
    let outcomes = orch.deploy_all(&ids, &log.sink());
    assert_eq!(outcomes.len(), 2);
    assert_eq!(shell.count_containing("Homebrew not found"), 1);
    assert_eq!(shell.count_containing("curl -fsSL 'https://scripts.test"), 2);
    assert!(log.contains("All projects deployed."));
}

/// Blocks inside `execute` until released.
struct Gate {
    entered: Sender<()>,
    release: Receiver<()>,
}

impl CommandExecutor for Gate {
    fn execute(&self, _: &str, _: Option<&std::path::Path>, _: &mut dyn FnMut(&str)) -> i32 {
        let _ = self.entered.send(());
        let _ = self.release.recv();
        0
    }
}

#[test]
fn concurrent_action_on_same_project_is_busy() {
    let fx = Fixture::new(vec![scripted_project("api", "Api", "t", &["install", "update"])]);
    let (entered_tx, entered_rx) = bounded(1);
    let (release_tx, release_rx) = bounded(1);
    let gate = Arc::new(Gate {
        entered: entered_tx,
        release: release_rx,
    });
    let orch = Arc::new(fx.orchestrator(gate.clone(), gate, fx.settings()));

    let first = {
        let orch = orch.clone();
        thread::spawn(move || orch.install("api", &|_: &str| {}))
    };
    entered_rx.recv().unwrap();

    let seen = Mutex::new(Vec::new());
    let outcome = orch.update("api", &|l: &str| seen.lock().unwrap().push(l.to_string()));
    assert_eq!(outcome, ActionOutcome::Busy);

    release_tx.send(()).unwrap();
    assert_eq!(first.join().unwrap(), ActionOutcome::Completed);
}

#[test]
fn refresh_status_persists_probe_result() {
    let mut p = scripted_project("api", "Api", "t", &[]);
    p.status = ProjectStatus::Running;
    p.pid = Some(999_999);
    let fx = Fixture::new(vec![p]);
    let shell = ScriptedExecutor::new();
    let orch = fx.orchestrator(shell.clone(), shell.clone(), fx.settings());

    let report = orch.refresh_status("api").unwrap();
    assert_eq!(report.status, ProjectStatus::Stopped);
    let stored = fx.store.get("api").unwrap();
    assert_eq!(stored.status, ProjectStatus::Stopped);
    assert_eq!(stored.pid, None);
    assert!(orch.refresh_status("missing").is_none());
}
