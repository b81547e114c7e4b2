//! Cooperative concurrency primitives for SafeScale.
//!
//! The unit of concurrency in the orchestrator is the [`Task`]: a unit of
//! work with an identity, a cancellation flag and a result. Tasks fan out
//! through [`TaskGroup`]s and coordinate access to shared state through
//! [`TaskedLock`] (a reentrant reader/writer lock keyed by task identity)
//! and [`Shielded`] (a copy-on-write value guarded by a `TaskedLock`).
//!
//! # Example
//!
//! ```
//! use safescale_task::{Shielded, Task};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> safescale_core::Result<()> {
//! let task = Task::root();
//! let shielded = Shielded::new(vec![1, 2, 3]);
//!
//! shielded.alter(&task, |v| {
//!     v.push(4);
//!     Ok(())
//! }).await?;
//!
//! let len = shielded.inspect(&task, |v| Ok(v.len())).await?;
//! assert_eq!(len, 4);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod lock;
pub mod registry;
pub mod shielded;
pub mod task;

pub use lock::TaskedLock;
pub use registry::JobRegistry;
pub use shielded::Shielded;
pub use task::{Task, TaskGroup, TaskHandle, TaskId};
