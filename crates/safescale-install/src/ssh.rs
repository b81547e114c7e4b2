//! The SSH contract the installer runs over.
//!
//! The actual transport is an external collaborator; the installer only
//! needs readiness probing, file upload and command execution. Tests use
//! [`MockSshClient`], which records every upload and command and lets
//! scenarios script per-host readiness and return codes.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use safescale_core::{Error, Result};
use safescale_store::types::Host;

/// The outcome of a remote command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Process return code.
    pub retcode: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Narrow SSH contract: probe, upload, run.
#[async_trait]
pub trait SshClient: Send + Sync {
    /// Wait until the host accepts sessions.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the host is not ready within `timeout`;
    /// other kinds for unrecoverable transport failures.
    async fn wait_ready(&self, host: &Host, timeout: Duration) -> Result<()>;

    /// Upload `content` to `remote_path` with the given owner and mode
    /// (both optional as empty strings).
    async fn upload(
        &self,
        host: &Host,
        remote_path: &str,
        content: &str,
        owner: &str,
        mode: &str,
    ) -> Result<()>;

    /// Run a command, bounded by `wall_time`.
    async fn run(
        &self,
        host: &Host,
        command: &str,
        connect_timeout: Duration,
        wall_time: Duration,
    ) -> Result<CommandOutput>;
}

/// An upload recorded by the mock.
#[derive(Debug, Clone)]
pub struct RecordedUpload {
    /// Host name the file went to.
    pub host: String,
    /// Remote path of the file.
    pub path: String,
    /// File content.
    pub content: String,
    /// Requested owner, empty when unset.
    pub owner: String,
    /// Requested mode, empty when unset.
    pub mode: String,
}

/// A command recorded by the mock.
#[derive(Debug, Clone)]
pub struct RecordedCommand {
    /// Host name the command ran on.
    pub host: String,
    /// The command line.
    pub command: String,
}

/// An in-memory SSH client for tests.
#[derive(Debug, Default)]
pub struct MockSshClient {
    uploads: Mutex<Vec<RecordedUpload>>,
    commands: Mutex<Vec<RecordedCommand>>,
    retcodes: Mutex<HashMap<String, i32>>,
    never_ready: Mutex<HashSet<String>>,
    broken: Mutex<HashSet<String>>,
}

impl MockSshClient {
    /// Create a mock where every host is ready and commands return 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every command on `host` return `retcode`.
    pub fn script_retcode(&self, host: &str, retcode: i32) {
        self.retcodes.lock().insert(host.to_string(), retcode);
    }

    /// Make `host` time out on readiness probes.
    pub fn mark_never_ready(&self, host: &str) {
        self.never_ready.lock().insert(host.to_string());
    }

    /// Make `host` fail probes with a hard transport error.
    pub fn mark_broken(&self, host: &str) {
        self.broken.lock().insert(host.to_string());
    }

    /// Everything uploaded so far.
    #[must_use]
    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().clone()
    }

    /// Everything executed so far.
    #[must_use]
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.commands.lock().clone()
    }
}

#[async_trait]
impl SshClient for MockSshClient {
    async fn wait_ready(&self, host: &Host, _timeout: Duration) -> Result<()> {
        if self.broken.lock().contains(&host.core.name) {
            return Err(Error::execution(format!(
                "no route to host '{}'",
                host.core.name
            )));
        }
        if self.never_ready.lock().contains(&host.core.name) {
            return Err(Error::timeout(format!(
                "host '{}' not ready",
                host.core.name
            )));
        }
        Ok(())
    }

    async fn upload(
        &self,
        host: &Host,
        remote_path: &str,
        content: &str,
        owner: &str,
        mode: &str,
    ) -> Result<()> {
        self.uploads.lock().push(RecordedUpload {
            host: host.core.name.clone(),
            path: remote_path.to_string(),
            content: content.to_string(),
            owner: owner.to_string(),
            mode: mode.to_string(),
        });
        Ok(())
    }

    async fn run(
        &self,
        host: &Host,
        command: &str,
        _connect_timeout: Duration,
        _wall_time: Duration,
    ) -> Result<CommandOutput> {
        self.commands.lock().push(RecordedCommand {
            host: host.core.name.clone(),
            command: command.to_string(),
        });
        let retcode = self
            .retcodes
            .lock()
            .get(&host.core.name)
            .copied()
            .unwrap_or(0);
        Ok(CommandOutput {
            retcode,
            ..CommandOutput::default()
        })
    }
}
