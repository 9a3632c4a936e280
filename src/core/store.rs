use crate::core::project::{Character, Project, Sequence};
use parking_lot::Mutex;
use std::collections::HashMap;

/// In-memory collection of projects; the single source of truth for
/// everything derived from them. All mutation goes through closures applied
/// under the lock, so concurrently completing work items never clobber each
/// other's partial updates. The lock is never held across an await point.
#[derive(Default)]
pub struct ProjectStore {
    inner: Mutex<HashMap<String, Project>>,
}

impl ProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, project: Project) {
        self.inner.lock().insert(project.id.clone(), project);
    }

    pub fn remove(&self, project_id: &str) -> Option<Project> {
        self.inner.lock().remove(project_id)
    }

    pub fn get(&self, project_id: &str) -> Option<Project> {
        self.inner.lock().get(project_id).cloned()
    }

    pub fn with<R>(&self, project_id: &str, f: impl FnOnce(&Project) -> R) -> Option<R> {
        self.inner.lock().get(project_id).map(f)
    }

    pub fn update<R>(&self, project_id: &str, f: impl FnOnce(&mut Project) -> R) -> Option<R> {
        self.inner.lock().get_mut(project_id).map(f)
    }

    pub fn update_character(
        &self,
        project_id: &str,
        name: &str,
        f: impl FnOnce(&mut Character),
    ) -> bool {
        let mut projects = self.inner.lock();
        if let Some(project) = projects.get_mut(project_id) {
            if let Some(character) = project.characters.iter_mut().find(|c| c.name == name) {
                f(character);
                return true;
            }
        }
        false
    }

    pub fn update_sequence(
        &self,
        project_id: &str,
        sequence_id: &str,
        f: impl FnOnce(&mut Sequence),
    ) -> bool {
        let mut projects = self.inner.lock();
        if let Some(project) = projects.get_mut(project_id) {
            if let Some(sequence) = project.sequences.iter_mut().find(|s| s.id == sequence_id) {
                f(sequence);
                return true;
            }
        }
        false
    }

    /// Full project list, newest first. Serialized wholesale by whoever
    /// persists state.
    pub fn snapshot(&self) -> Vec<Project> {
        let mut projects: Vec<Project> = self.inner.lock().values().cloned().collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        projects
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
