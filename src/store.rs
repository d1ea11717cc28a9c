//! JSON-backed project repository.
//!
//! The whole collection is rewritten on every mutation, via a sibling temp
//! file and a rename, so readers never observe a half-written store. Writers
//! are serialized and memory only changes once the file is on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};

use log::{debug, warn};

use crate::errors::StoreError;
use crate::model::{Project, ProjectStatus};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub struct ProjectRepository {
    path: PathBuf,
    projects: RwLock<Vec<Project>>,
    writer: Mutex<()>,
}

impl ProjectRepository {
    /// Loads the store at `path`; a missing file is an empty collection.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let projects = read_projects(&path)?;
        Ok(Self {
            path,
            projects: RwLock::new(projects),
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the in-memory collection with the file contents.
    pub fn reload(&self) -> StoreResult<usize> {
        let _writer = self.writer_guard();
        let loaded = read_projects(&self.path)?;
        let count = loaded.len();
        *self.write_guard() = loaded;
        debug!("reloaded {} projects from {:?}", count, self.path);
        Ok(count)
    }

    pub fn save(&self) -> StoreResult<()> {
        let _writer = self.writer_guard();
        let projects = self.read_guard().clone();
        write_projects(&self.path, &projects)
    }

    pub fn list(&self) -> Vec<Project> {
        self.read_guard().clone()
    }

    pub fn get(&self, id: &str) -> Option<Project> {
        self.read_guard().iter().find(|p| p.id == id).cloned()
    }

    pub fn add(&self, project: Project) -> StoreResult<()> {
        self.commit(|projects| {
            if projects.iter().any(|p| p.id == project.id) {
                return Err(StoreError::Duplicate(project.id));
            }
            projects.push(project);
            Ok(())
        })
    }

    pub fn remove(&self, id: &str) -> StoreResult<Project> {
        self.commit(|projects| {
            let index = projects
                .iter()
                .position(|p| p.id == id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            Ok(projects.remove(index))
        })
    }

    /// Applies `f` to the project with `id` and persists the collection.
    pub fn update<F>(&self, id: &str, f: F) -> StoreResult<Project>
    where
        F: FnOnce(&mut Project),
    {
        self.commit(|projects| {
            let project = projects
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            f(project);
            Ok(project.clone())
        })
    }

    /// Edits a copy of the collection, writes it, then publishes it.
    fn commit<T, F>(&self, edit: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Vec<Project>) -> StoreResult<T>,
    {
        let _writer = self.writer_guard();
        let mut next = self.read_guard().clone();
        let value = edit(&mut next)?;
        write_projects(&self.path, &next)?;
        *self.write_guard() = next;
        Ok(value)
    }

    pub fn set_status(
        &self,
        id: &str,
        status: ProjectStatus,
        pid: Option<i32>,
    ) -> StoreResult<Project> {
        self.update(id, |p| {
            p.status = status;
            if pid.is_some() || status == ProjectStatus::Stopped {
                p.pid = pid;
            }
        })
    }

    pub fn set_launcher(&self, id: &str, launcher: &Path) -> StoreResult<Project> {
        self.update(id, |p| p.launcher_path = Some(launcher.to_path_buf()))
    }

    fn writer_guard(&self) -> MutexGuard<'_, ()> {
        self.writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn read_guard(&self) -> std::sync::RwLockReadGuard<'_, Vec<Project>> {
        self.projects.read().unwrap_or_else(|poisoned| {
            warn!("project store lock poisoned; continuing with last state");
            poisoned.into_inner()
        })
    }

    fn write_guard(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Project>> {
        self.projects.write().unwrap_or_else(|poisoned| {
            warn!("project store lock poisoned; continuing with last state");
            poisoned.into_inner()
        })
    }
}

fn read_projects(path: &Path) -> StoreResult<Vec<Project>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path).map_err(|source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&content).map_err(|source| StoreError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

fn write_projects(path: &Path, projects: &[Project]) -> StoreResult<()> {
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    let content = serde_json::to_string_pretty(projects)
        .map_err(|e| write_err(std::io::Error::other(e)))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).map_err(write_err)?;
    fs::rename(&tmp, path).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn sample(id: &str, name: &str, kind: &str) -> Project {
        let mut p = Project::new(id, name, kind);
        p.ports = Some(vec![8080]);
        p.script_urls = Some(BTreeMap::from([(
            "deploy".to_string(),
            format!("https://example.com/{}.sh", id),
        )]));
        p
    }

    #[test]
    fn save_and_reload_round_trips_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.json");
        let repo = ProjectRepository::open(&path).unwrap();
        let projects = vec![
            sample("3", "Node.js API", "node"),
            sample("1", "Docker Demo", "docker"),
            sample("2", "Python Service", "python"),
        ];
        for p in &projects {
            repo.add(p.clone()).unwrap();
        }

        let reopened = ProjectRepository::open(&path).unwrap();
        assert_eq!(reopened.list(), projects);
    }

    #[test]
    fn missing_file_is_empty_and_duplicates_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let repo = ProjectRepository::open(dir.path().join("none.json")).unwrap();
        assert!(repo.list().is_empty());
        repo.add(sample("a", "A", "node")).unwrap();
        assert!(matches!(
            repo.add(sample("a", "Again", "node")),
            Err(StoreError::Duplicate(id)) if id == "a"
        ));
    }

    #[test]
    fn status_updates_persist_and_remove_works() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.json");
        let repo = ProjectRepository::open(&path).unwrap();
        repo.add(sample("a", "A", "node")).unwrap();
        repo.add(sample("b", "B", "node")).unwrap();

        repo.set_status("a", ProjectStatus::Running, Some(4242)).unwrap();
        let reopened = ProjectRepository::open(&path).unwrap();
        let a = reopened.get("a").unwrap();
        assert_eq!(a.status, ProjectStatus::Running);
        assert_eq!(a.pid, Some(4242));

        repo.set_status("a", ProjectStatus::Stopped, None).unwrap();
        assert_eq!(repo.get("a").unwrap().pid, None);

        repo.remove("b").unwrap();
        assert!(matches!(repo.remove("b"), Err(StoreError::NotFound(_))));
        assert_eq!(ProjectRepository::open(&path).unwrap().list().len(), 1);
    }

    #[test]
    fn concurrent_writers_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.json");
        let repo = std::sync::Arc::new(ProjectRepository::open(&path).unwrap());
        for id in ["a", "b", "c", "d"] {
            repo.add(sample(id, id, "node")).unwrap();
        }

        let handles: Vec<_> = ["a", "b", "c", "d"]
            .into_iter()
            .map(|id| {
                let repo = repo.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .filter(|i| {
                            let status = if i % 2 == 0 {
                                ProjectStatus::Running
                            } else {
                                ProjectStatus::Stopped
                            };
                            repo.set_status(id, status, Some(1000 + i)).is_err()
                        })
                        .count()
                })
            })
            .collect();
        let failures: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(failures, 0);

        let on_disk = ProjectRepository::open(&path).unwrap().list();
        assert_eq!(on_disk, repo.list());
        assert!(on_disk.iter().all(|p| p.pid == Some(1099)));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn failed_write_leaves_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();
        let repo = ProjectRepository::open(blocker.join("projects.json")).unwrap();

        assert!(matches!(
            repo.add(sample("a", "A", "node")),
            Err(StoreError::Write { .. })
        ));
        assert!(repo.list().is_empty());
        assert!(matches!(repo.remove("a"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn reload_picks_up_external_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.json");
        let repo = ProjectRepository::open(&path).unwrap();
        fs::write(&path, r#"[{"id": "x", "name": "X", "type": "python"}]"#).unwrap();
        assert_eq!(repo.reload().unwrap(), 1);
        assert_eq!(repo.get("x").unwrap().log_path, "app.log");

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(repo.reload(), Err(StoreError::Decode { .. })));
        assert_eq!(repo.list().len(), 1);
    }
}
