//! Tasks and task groups.
//!
//! A [`Task`] carries a UUID signature (used to key [`crate::TaskedLock`]
//! acquisitions), a cooperative cancellation flag and a parent pointer.
//! Cancellation is cooperative: [`Task::abort`] flips a flag, and the work
//! body is expected to check [`Task::aborted`] at suspension points.
//! Aborting a parent aborts every descendant.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use safescale_core::{Error, Result};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// The identity of a task, used to key lock acquisitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct TaskInner {
    id: TaskId,
    parent: Option<Task>,
    aborted: AtomicBool,
}

/// A unit of cooperative work.
///
/// `Task` is cheap to clone; clones share identity and cancellation state.
#[derive(Debug, Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    /// Create a new root task.
    #[must_use]
    pub fn root() -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id: TaskId::new(),
                parent: None,
                aborted: AtomicBool::new(false),
            }),
        }
    }

    fn child_of(parent: &Task) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id: TaskId::new(),
                parent: Some(parent.clone()),
                aborted: AtomicBool::new(false),
            }),
        }
    }

    /// The signature of this task.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Signal cancellation. The work body must cooperate by checking
    /// [`Task::aborted`].
    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
    }

    /// Whether this task or any of its ancestors has been aborted.
    #[must_use]
    pub fn aborted(&self) -> bool {
        if self.inner.aborted.load(Ordering::SeqCst) {
            return true;
        }
        self.inner.parent.as_ref().is_some_and(Task::aborted)
    }

    /// Fail with `Aborted` if this task has been cancelled.
    ///
    /// # Errors
    ///
    /// Returns `Aborted` when [`Task::aborted`] is true.
    pub fn check_aborted(&self) -> Result<()> {
        if self.aborted() {
            Err(Error::aborted(None))
        } else {
            Ok(())
        }
    }

    /// Start `work` in a sub-task and return a handle to await it.
    ///
    /// The sub-task has its own identity: it does not inherit the parent's
    /// lock acquisitions, only its cancellation.
    pub fn spawn<T, F, Fut>(&self, work: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(Task) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let child = Task::child_of(self);
        let body_task = child.clone();
        let join = tokio::spawn(async move { work(body_task).await });
        TaskHandle { task: child, join }
    }
}

/// A handle to a spawned sub-task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    task: Task,
    join: JoinHandle<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// The sub-task this handle awaits.
    #[must_use]
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Signal cancellation to the sub-task. Cooperative: the body keeps
    /// running until its next abort check.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Block until the sub-task completes and return its result.
    ///
    /// # Errors
    ///
    /// Returns `Aborted` (wrapping the body's error, if any) when the task
    /// was cancelled, `Execution` if the body panicked, or the body's own
    /// error.
    pub async fn wait(self) -> Result<T> {
        let outcome = self.join.await;
        if self.task.aborted() {
            return Err(Error::aborted(match outcome {
                Ok(Err(err)) => Some(err),
                _ => None,
            }));
        }
        match outcome {
            Ok(result) => result,
            Err(join_err) => Err(Error::execution(format!("task body panicked: {join_err}"))),
        }
    }
}

/// A set of sub-tasks started from a common parent, awaited together.
///
/// Results come back in start order; each sub-task's failure is explicit so
/// partial success is visible to the caller.
#[derive(Debug)]
pub struct TaskGroup<T> {
    parent: Task,
    handles: Vec<TaskHandle<T>>,
}

impl<T: Send + 'static> TaskGroup<T> {
    /// Create an empty group fanning out from `parent`.
    #[must_use]
    pub fn new(parent: &Task) -> Self {
        Self {
            parent: parent.clone(),
            handles: Vec::new(),
        }
    }

    /// Start `work` as a new sub-task of the group.
    pub fn start<F, Fut>(&mut self, work: F)
    where
        F: FnOnce(Task) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.handles.push(self.parent.spawn(work));
    }

    /// The number of sub-tasks started so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no sub-task has been started.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal cancellation to every sub-task of the group.
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }

    /// Wait for every sub-task; results are in start order.
    pub async fn wait(self) -> Vec<Result<T>> {
        let mut results = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            results.push(handle.wait().await);
        }
        results
    }

    /// Wait for every sub-task and fold failures into a single list error
    /// preserving start order.
    ///
    /// # Errors
    ///
    /// Returns the ordered list error when at least one sub-task failed;
    /// successful results are dropped in that case.
    pub async fn wait_collect(self) -> Result<Vec<T>> {
        let mut values = Vec::new();
        let mut errors = Vec::new();
        for result in self.wait().await {
            match result {
                Ok(value) => values.push(value),
                Err(err) => errors.push(err),
            }
        }
        match Error::list(errors) {
            Some(err) => Err(err),
            None => Ok(values),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safescale_core::ErrorKind;

    #[tokio::test]
    async fn subtask_result_round_trip() {
        let root = Task::root();
        let handle = root.spawn(|_| async { Ok(21 * 2) });
        assert_eq!(handle.wait().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn aborted_task_yields_cancellation_error() {
        let root = Task::root();
        let handle: TaskHandle<()> = root.spawn(|task| async move {
            loop {
                task.check_aborted()?;
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        });
        handle.abort();
        let err = handle.wait().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Aborted);
    }

    #[tokio::test]
    async fn abort_propagates_to_children() {
        let root = Task::root();
        let child = Task::child_of(&root);
        root.abort();
        assert!(child.aborted());
    }

    #[tokio::test]
    async fn group_wait_preserves_start_order() {
        let root = Task::root();
        let mut group = TaskGroup::new(&root);
        for i in 0..4u32 {
            group.start(move |_| async move {
                // Finish out of start order.
                tokio::time::sleep(std::time::Duration::from_millis(u64::from(10 - i))).await;
                if i == 2 {
                    Err(Error::overload(format!("subtask {i}")))
                } else {
                    Ok(i)
                }
            });
        }
        let results = group.wait().await;
        assert_eq!(results.len(), 4);
        assert_eq!(*results[0].as_ref().unwrap(), 0);
        assert_eq!(results[2].as_ref().unwrap_err().message(), "subtask 2");
    }

    #[tokio::test]
    async fn wait_collect_folds_failures() {
        let root = Task::root();
        let mut group = TaskGroup::new(&root);
        group.start(|_| async { Err::<(), _>(Error::overload("a")) });
        group.start(|_| async { Err::<(), _>(Error::overload("b")) });
        let err = group.wait_collect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overload);
        let messages: Vec<_> = err.consequences().iter().map(Error::message).collect();
        assert_eq!(messages, vec!["a", "b"]);
    }
}
