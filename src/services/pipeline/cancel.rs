use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

/// One live run of a project's pipeline: its cancellation token plus a
/// generation counter that tags every fold produced by the run.
#[derive(Clone)]
pub struct RunHandle {
    pub generation: u64,
    pub token: CancellationToken,
}

/// Maps project id to its current run. Beginning a new run cancels and
/// replaces the previous one under a single lock acquisition, so a
/// superseded handler can never observe a half-swapped state. Folds from an
/// old run check `is_current` and are dropped once their generation is
/// stale.
#[derive(Default)]
pub struct CancellationRegistry {
    runs: Mutex<HashMap<String, RunHandle>>,
    counter: AtomicU64,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel whatever run is in flight for this project and install a
    /// fresh token with the next generation.
    pub fn begin(&self, project_id: &str) -> RunHandle {
        let generation = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = RunHandle {
            generation,
            token: CancellationToken::new(),
        };
        let mut runs = self.runs.lock();
        if let Some(previous) = runs.insert(project_id.to_string(), handle.clone()) {
            previous.token.cancel();
        }
        handle
    }

    /// Signal the current run's token, if any. The entry stays so late
    /// folds still resolve their generation against it.
    pub fn cancel(&self, project_id: &str) {
        if let Some(handle) = self.runs.lock().get(project_id) {
            handle.token.cancel();
        }
    }

    pub fn is_current(&self, project_id: &str, generation: u64) -> bool {
        self.runs
            .lock()
            .get(project_id)
            .map(|handle| handle.generation == generation)
            .unwrap_or(false)
    }

    /// Drop a project's run entirely (project deletion).
    pub fn remove(&self, project_id: &str) {
        if let Some(handle) = self.runs.lock().remove(project_id) {
            handle.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_supersedes_previous_run() {
        let registry = CancellationRegistry::new();
        let first = registry.begin("p1");
        assert!(registry.is_current("p1", first.generation));
        assert!(!first.token.is_cancelled());

        let second = registry.begin("p1");
        assert!(first.token.is_cancelled());
        assert!(!second.token.is_cancelled());
        assert!(second.generation > first.generation);
        assert!(!registry.is_current("p1", first.generation));
        assert!(registry.is_current("p1", second.generation));
    }

    #[test]
    fn test_cancel_keeps_generation_current() {
        let registry = CancellationRegistry::new();
        let run = registry.begin("p1");
        registry.cancel("p1");
        assert!(run.token.is_cancelled());
        // The cancelled run is still the latest; its folds may still land.
        assert!(registry.is_current("p1", run.generation));
    }

    #[test]
    fn test_projects_are_independent() {
        let registry = CancellationRegistry::new();
        let a = registry.begin("a");
        let b = registry.begin("b");
        registry.cancel("a");
        assert!(a.token.is_cancelled());
        assert!(!b.token.is_cancelled());
    }

    #[test]
    fn test_remove_cancels_and_forgets() {
        let registry = CancellationRegistry::new();
        let run = registry.begin("p1");
        registry.remove("p1");
        assert!(run.token.is_cancelled());
        assert!(!registry.is_current("p1", run.generation));
    }
}
