//! Feature installer for SafeScale.
//!
//! A *feature* is a piece of software or configuration installed on the
//! hosts of a cluster (or a standalone host). Its specification is a YAML
//! document declaring, per action (`check`, `add`, `remove`), an ordered
//! pace of steps; each step names its target kinds (hosts, gateways,
//! masters, nodes), a script template and a wall time.
//!
//! The installer renders the script per host, uploads it over the SSH
//! contract, runs it with `sudo bash`, and aggregates per-host results,
//! serially or with one sub-task per host.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod feature;
pub mod render;
pub mod ssh;
pub mod step;
pub mod worker;

pub use feature::Feature;
pub use ssh::{CommandOutput, MockSshClient, SshClient};
pub use step::{Action, Settings, Step, StepResult, StepResults, StepTargets, Variables};
pub use worker::{FeatureResults, InstallTarget, StaticTarget, Worker};
