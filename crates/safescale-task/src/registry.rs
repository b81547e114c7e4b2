//! The process-wide job registry.
//!
//! Every request entering the service registers its root task under the
//! request UUID, so in-flight work can be listed and cancelled
//! (`job list` / `job stop <uuid>`). Deregistration happens at request
//! exit.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::task::Task;

/// A registry of in-flight jobs keyed by request UUID.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<Uuid, Task>>,
}

impl JobRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    #[must_use]
    pub fn global() -> &'static JobRegistry {
        static GLOBAL: OnceLock<JobRegistry> = OnceLock::new();
        GLOBAL.get_or_init(JobRegistry::new)
    }

    /// Register the root task of a request.
    pub fn register(&self, request_id: Uuid, task: Task) {
        self.jobs.lock().insert(request_id, task);
    }

    /// Deregister a request on exit. Unknown IDs are ignored.
    pub fn deregister(&self, request_id: &Uuid) {
        self.jobs.lock().remove(request_id);
    }

    /// The UUIDs of the jobs currently in flight.
    #[must_use]
    pub fn list(&self) -> Vec<Uuid> {
        self.jobs.lock().keys().copied().collect()
    }

    /// Signal cancellation to the job registered under `request_id`.
    ///
    /// Returns whether a job was found.
    pub fn stop(&self, request_id: &Uuid) -> bool {
        match self.jobs.lock().get(request_id) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_aborts_the_registered_task() {
        let registry = JobRegistry::new();
        let task = Task::root();
        let id = Uuid::new_v4();
        registry.register(id, task.clone());
        assert!(registry.stop(&id));
        assert!(task.aborted());
        registry.deregister(&id);
        assert!(!registry.stop(&id));
        assert!(registry.list().is_empty());
    }
}
