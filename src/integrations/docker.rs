use log::warn;

use crate::exec::{CommandExecutor, capture, shell_quote};
use crate::matching::{ContainerMatch, container_candidates, resolve_container};
use crate::model::Project;

pub const NO_CONTAINER_MESSAGE: &str = "No docker container matched project id / name";

/// Names of all containers, running or not. Empty when docker is missing.
pub fn list_container_names(executor: &dyn CommandExecutor) -> Vec<String> {
    let out = capture(
        executor,
        "command -v docker >/dev/null 2>&1 || exit 0; docker ps -a --format '{{.Names}}'",
        None,
    );
    if !out.success() {
        warn!("docker ps failed: {}", out.text());
        return Vec::new();
    }
    out.non_empty_lines()
}

/// Resolves the container for a project, warning when the match is ambiguous.
pub fn resolve_project_container(
    executor: &dyn CommandExecutor,
    project: &Project,
) -> Option<ContainerMatch> {
    let live = list_container_names(executor);
    let found = resolve_container(&container_candidates(project), &live)?;
    if found.is_ambiguous() {
        warn!(
            "project {} matched container {} but also {:?}; using {}",
            project.id, found.name, found.also_matched, found.name
        );
    }
    Some(found)
}

pub fn is_container_running(executor: &dyn CommandExecutor, container: &str) -> bool {
    let out = capture(
        executor,
        &format!(
            "docker inspect -f '{{{{.State.Running}}}}' {} 2>/dev/null",
            shell_quote(container)
        ),
        None,
    );
    out.text() == "true"
}

/// `docker top` rows (header included).
pub fn container_processes(executor: &dyn CommandExecutor, container: &str) -> Vec<String> {
    capture(
        executor,
        &format!(
            "docker top {} -eo pid,ppid,cmd 2>/dev/null",
            shell_quote(container)
        ),
        None,
    )
    .non_empty_lines()
}

pub fn container_logs(executor: &dyn CommandExecutor, container: &str, tail: usize) -> String {
    capture(
        executor,
        &format!(
            "docker logs --tail {} {} 2>&1",
            tail,
            shell_quote(container)
        ),
        None,
    )
    .text()
}

pub fn container_ports(executor: &dyn CommandExecutor, container: &str) -> Option<String> {
    let out = capture(
        executor,
        &format!("docker port {} 2>/dev/null", shell_quote(container)),
        None,
    );
    out.success().then(|| out.text())
}
