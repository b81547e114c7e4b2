//! A reentrant reader/writer lock keyed by task identity.
//!
//! Unlike a plain RW lock, a [`TaskedLock`] knows *which task* holds it:
//!
//! - a task may re-acquire a lock it already holds (nested acquisitions
//!   increment a counter, releases decrement it)
//! - a task holding the write lock may also take read locks (write implies
//!   read)
//! - `lock` upgrades a task that is the *only* reader; with other readers
//!   present it waits
//!
//! A sub-task does **not** inherit its parent's acquisitions: it has its
//! own identity and must acquire locks itself.

use std::collections::HashMap;

use parking_lot::Mutex;
use safescale_core::{Error, Result};
use tokio::sync::Notify;

use crate::task::{Task, TaskId};

#[derive(Debug, Default)]
struct LockState {
    /// Task holding the write lock, with its reentrance count.
    writer: Option<(TaskId, u32)>,
    /// Read locks taken by the writer while holding the write lock.
    writer_reads: u32,
    /// Read locks per task.
    readers: HashMap<TaskId, u32>,
}

/// A reentrant reader/writer lock keyed by the acquiring [`Task`].
#[derive(Debug, Default)]
pub struct TaskedLock {
    state: Mutex<LockState>,
    notify: Notify,
}

impl TaskedLock {
    /// Create a new unlocked lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a read lock for `task`, waiting while another task holds the
    /// write lock.
    pub async fn rlock(&self, task: &Task) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut guard = self.state.lock();
                let st = &mut *guard;
                match st.writer {
                    Some((owner, _)) if owner == task.id() => {
                        st.writer_reads += 1;
                        return;
                    }
                    Some(_) => {}
                    None => {
                        *st.readers.entry(task.id()).or_insert(0) += 1;
                        return;
                    }
                }
            }
            notified.await;
        }
    }

    /// Release a read lock held by `task`.
    ///
    /// # Errors
    ///
    /// Returns `Inconsistent` if `task` holds no read lock.
    pub fn runlock(&self, task: &Task) -> Result<()> {
        {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            if matches!(st.writer, Some((owner, _)) if owner == task.id()) {
                if st.writer_reads == 0 {
                    return Err(Error::inconsistent(
                        "read unlock without a matching read lock",
                    ));
                }
                st.writer_reads -= 1;
            } else if let Some(count) = st.readers.get_mut(&task.id()) {
                *count -= 1;
                if *count == 0 {
                    st.readers.remove(&task.id());
                }
            } else {
                return Err(Error::inconsistent(
                    "read unlock by a task not holding a read lock",
                ));
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Acquire the write lock for `task`.
    ///
    /// If `task` already holds the write lock, the reentrance count goes up.
    /// If `task` is the only reader, its read locks are upgraded. Otherwise
    /// the call waits for every other holder to release.
    pub async fn lock(&self, task: &Task) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut guard = self.state.lock();
                let st = &mut *guard;
                match st.writer {
                    Some((owner, ref mut count)) if owner == task.id() => {
                        *count += 1;
                        return;
                    }
                    Some(_) => {}
                    None => {
                        let own_reads = st.readers.get(&task.id()).copied().unwrap_or(0);
                        let other_readers = st.readers.len() - usize::from(own_reads > 0);
                        if other_readers == 0 {
                            st.readers.remove(&task.id());
                            st.writer = Some((task.id(), 1));
                            st.writer_reads = own_reads;
                            return;
                        }
                    }
                }
            }
            notified.await;
        }
    }

    /// Release the write lock held by `task`.
    ///
    /// The final release downgrades any read locks the task took while
    /// writing back into plain read locks.
    ///
    /// # Errors
    ///
    /// Returns `Inconsistent` if `task` does not hold the write lock.
    pub fn unlock(&self, task: &Task) -> Result<()> {
        {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            match st.writer {
                Some((owner, ref mut count)) if owner == task.id() => {
                    *count -= 1;
                    if *count == 0 {
                        let leftover_reads = st.writer_reads;
                        st.writer = None;
                        st.writer_reads = 0;
                        if leftover_reads > 0 {
                            st.readers.insert(task.id(), leftover_reads);
                        }
                    }
                }
                _ => {
                    return Err(Error::inconsistent(
                        "unlock by a task not holding the write lock",
                    ))
                }
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn write_implies_read() {
        let lock = TaskedLock::new();
        let task = Task::root();
        lock.lock(&task).await;
        // A task holding the write lock may also take read locks.
        lock.rlock(&task).await;
        lock.runlock(&task).unwrap();
        lock.unlock(&task).unwrap();
    }

    #[tokio::test]
    async fn nested_write_locks_count() {
        let lock = TaskedLock::new();
        let task = Task::root();
        lock.lock(&task).await;
        lock.lock(&task).await;
        lock.unlock(&task).unwrap();
        // Still held: another task must not get in yet.
        {
            let other = Task::root();
            let try_lock = tokio::time::timeout(Duration::from_millis(20), lock.lock(&other));
            assert!(try_lock.await.is_err(), "lock should still be held");
        }
        lock.unlock(&task).unwrap();
    }

    #[tokio::test]
    async fn sole_reader_upgrades() {
        let lock = TaskedLock::new();
        let task = Task::root();
        lock.rlock(&task).await;
        lock.lock(&task).await;
        lock.unlock(&task).unwrap();
        lock.runlock(&task).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn other_readers_block_upgrade() {
        let lock = Arc::new(TaskedLock::new());
        let reader = Task::root();
        let writer = Task::root();
        lock.rlock(&reader).await;

        let lock2 = Arc::clone(&lock);
        let writer2 = writer.clone();
        let upgrade = tokio::spawn(async move {
            lock2.lock(&writer2).await;
            lock2.unlock(&writer2).unwrap();
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!upgrade.is_finished(), "writer should wait for the reader");
        lock.runlock(&reader).unwrap();
        upgrade.await.unwrap();
    }

    #[tokio::test]
    async fn subtask_does_not_inherit_locks() {
        let lock = Arc::new(TaskedLock::new());
        let root = Task::root();
        lock.lock(&root).await;

        let child = root.spawn({
            let lock = Arc::clone(&lock);
            move |task| async move {
                // The child has its own identity; releasing the parent's
                // lock must fail.
                assert!(lock.unlock(&task).is_err());
                Ok(())
            }
        });
        child.wait().await.unwrap();
        lock.unlock(&root).unwrap();
    }

    #[tokio::test]
    async fn unbalanced_release_is_rejected() {
        let lock = TaskedLock::new();
        let task = Task::root();
        assert!(lock.runlock(&task).is_err());
        assert!(lock.unlock(&task).is_err());
    }
}
