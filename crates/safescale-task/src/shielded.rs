//! Copy-on-write values guarded by a [`TaskedLock`].
//!
//! A [`Shielded`] value is the only sanctioned form of shared mutable state
//! in the orchestrator. Readers get a clone under the read lock; writers
//! mutate a clone under the write lock, and the clone replaces the live
//! value only if the closure succeeds. A failed alteration leaves the live
//! value untouched, and observers never see partially-mutated state.

use parking_lot::Mutex;
use safescale_core::Result;

use crate::lock::TaskedLock;
use crate::task::Task;

/// A clonable value behind a task-keyed reader/writer lock.
#[derive(Debug, Default)]
pub struct Shielded<T: Clone + Send> {
    lock: TaskedLock,
    witness: Mutex<T>,
}

impl<T: Clone + Send> Shielded<T> {
    /// Shield `witness` behind a fresh lock.
    #[must_use]
    pub fn new(witness: T) -> Self {
        Self {
            lock: TaskedLock::new(),
            witness: Mutex::new(witness),
        }
    }

    /// Run `inspector` over a clone of the value, under the read lock.
    ///
    /// # Errors
    ///
    /// Returns `Aborted` if `task` was cancelled, or the inspector's error.
    pub async fn inspect<R>(
        &self,
        task: &Task,
        inspector: impl FnOnce(&T) -> Result<R>,
    ) -> Result<R> {
        task.check_aborted()?;
        self.lock.rlock(task).await;
        let clone = self.witness.lock().clone();
        let result = inspector(&clone);
        self.lock.runlock(task)?;
        result
    }

    /// Run `alterer` over a clone of the value, under the write lock.
    ///
    /// On success the mutated clone replaces the live value; on error the
    /// live value is untouched.
    ///
    /// # Errors
    ///
    /// Returns `Aborted` if `task` was cancelled, or the alterer's error.
    pub async fn alter<R>(
        &self,
        task: &Task,
        alterer: impl FnOnce(&mut T) -> Result<R>,
    ) -> Result<R> {
        task.check_aborted()?;
        self.lock.lock(task).await;
        let mut clone = self.witness.lock().clone();
        let result = alterer(&mut clone);
        if result.is_ok() {
            *self.witness.lock() = clone;
        }
        self.lock.unlock(task)?;
        result
    }

    /// Acquire the underlying write lock for a multi-step sequence
    /// (reload, modify, write). Must be balanced with [`Shielded::release`].
    pub async fn acquire(&self, task: &Task) {
        self.lock.lock(task).await;
    }

    /// Release the write lock taken with [`Shielded::acquire`].
    ///
    /// # Errors
    ///
    /// Returns `Inconsistent` if `task` does not hold the write lock.
    pub fn release(&self, task: &Task) -> Result<()> {
        self.lock.unlock(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use safescale_core::Error;

    #[tokio::test]
    async fn failed_alter_leaves_value_untouched() {
        let task = Task::root();
        let shielded = Shielded::new(vec![1, 2, 3]);
        let err = shielded
            .alter(&task, |v: &mut Vec<i32>| {
                v.clear();
                Err::<(), _>(Error::execution("changed my mind"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.message(), "changed my mind");
        let observed = shielded.inspect(&task, |v| Ok(v.clone())).await.unwrap();
        assert_eq!(observed, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn alter_may_reenter_through_acquire() {
        // A task already holding the write lock re-enters without deadlock.
        let task = Task::root();
        let shielded = Shielded::new(1u32);
        shielded.acquire(&task).await;
        shielded.alter(&task, |v| {
            *v += 1;
            Ok(())
        })
        .await
        .unwrap();
        let value = shielded.inspect(&task, |v| Ok(*v)).await.unwrap();
        shielded.release(&task).unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inspect_waits_for_alter() {
        let shielded = Arc::new(Shielded::new(0u32));
        let t1 = Task::root();
        let t2 = Task::root();

        let s1 = Arc::clone(&shielded);
        let altering = tokio::spawn(async move {
            s1.alter(&t1, |v| {
                // Hold the write lock long enough for the observer to queue.
                std::thread::sleep(Duration::from_millis(100));
                *v = 42;
                Ok(())
            })
            .await
            .unwrap();
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let started = Instant::now();
        let observed = shielded.inspect(&t2, |v| Ok(*v)).await.unwrap();
        assert_eq!(observed, 42, "observer must see the post-alter value");
        assert!(
            started.elapsed() >= Duration::from_millis(50),
            "observer must have waited for the alteration"
        );
        altering.await.unwrap();
    }

    #[tokio::test]
    async fn aborted_task_cannot_inspect() {
        let task = Task::root();
        task.abort();
        let shielded = Shielded::new(0u32);
        assert!(shielded.inspect(&task, |v| Ok(*v)).await.is_err());
    }
}
