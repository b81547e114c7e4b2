//! Installation steps: target parsing, execution, result aggregation.
//!
//! A step declaration enumerates which kinds of hosts it applies to. The
//! declared values normalize to `"0"` (disabled), `"1"` (at least one) or
//! `"*"` (all); hosts only know `0/1`, masters, nodes and gateways know
//! all three. A step runs over its selected hosts either serially or with
//! one sub-task per host, and yields a per-host result map.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use safescale_core::{Error, Result};
use safescale_store::types::Host;
use safescale_task::{Task, TaskGroup};
use tracing::debug;

use crate::render::render;
use crate::ssh::SshClient;

/// Remote folder step payloads are uploaded to.
pub const TEMP_FOLDER: &str = "/opt/safescale/var/tmp";

const TARGET_HOSTS: &str = "hosts";
const TARGET_MASTERS: &str = "masters";
const TARGET_NODES: &str = "nodes";
const TARGET_GATEWAYS: &str = "gateways";

/// The action a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Action {
    Check,
    Add,
    Remove,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Check => "check",
            Self::Add => "add",
            Self::Remove => "remove",
        })
    }
}

/// Variables available to script templates.
pub type Variables = HashMap<String, String>;

/// Installer-wide execution settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Settings {
    /// Force serial execution of every step.
    pub serialize: bool,
}

/// The declared targets of a step, as written in the feature file.
#[derive(Debug, Clone, Default)]
pub struct StepTargets(pub HashMap<String, String>);

fn normalize_bool_target(value: &str, key: &str) -> Result<String> {
    match value.to_lowercase().as_str() {
        "" | "false" | "no" | "none" | "0" => Ok("0".into()),
        "yes" | "true" | "1" => Ok("1".into()),
        other => Err(Error::syntax(format!(
            "invalid value '{other}' for target '{key}'"
        ))),
    }
}

fn normalize_scalable_target(value: &str, key: &str) -> Result<String> {
    match value.to_lowercase().as_str() {
        "" | "false" | "no" | "none" | "0" => Ok("0".into()),
        "any" | "one" | "yes" | "true" | "1" => Ok("1".into()),
        "all" | "*" => Ok("*".into()),
        other => Err(Error::syntax(format!(
            "invalid value '{other}' for target '{key}'"
        ))),
    }
}

impl StepTargets {
    /// Normalize the declared targets to `(hosts, masters, nodes, gateways)`
    /// selectors, each one of `"0"`, `"1"` or `"*"`.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` on an unknown value, or when every selector is
    /// disabled.
    pub fn parse(&self) -> Result<(String, String, String, String)> {
        let get = |key: &str| self.0.get(key).map(String::as_str).unwrap_or("");
        let hosts = normalize_bool_target(get(TARGET_HOSTS), TARGET_HOSTS)?;
        let masters = normalize_scalable_target(get(TARGET_MASTERS), TARGET_MASTERS)?;
        let nodes = normalize_scalable_target(get(TARGET_NODES), TARGET_NODES)?;
        let gateways = normalize_scalable_target(get(TARGET_GATEWAYS), TARGET_GATEWAYS)?;

        if hosts == "0" && masters == "0" && nodes == "0" && gateways == "0" {
            return Err(Error::syntax("no targets identified"));
        }
        Ok((hosts, masters, nodes, gateways))
    }
}

/// The outcome of a step on one host.
#[derive(Debug, Clone)]
pub struct StepResult {
    success: bool,
    error: Option<Error>,
}

impl StepResult {
    /// A successful outcome.
    #[must_use]
    pub const fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// A failed outcome.
    #[must_use]
    pub const fn failure(error: Error) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }

    /// Whether the step succeeded on this host.
    #[must_use]
    pub const fn successful(&self) -> bool {
        self.success
    }

    /// The failure, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }
}

/// Per-host results of one step, keyed by host name.
#[derive(Debug, Clone, Default)]
pub struct StepResults(pub HashMap<String, StepResult>);

impl StepResults {
    /// True iff the map is non-empty and every host succeeded.
    #[must_use]
    pub fn successful(&self) -> bool {
        !self.0.is_empty() && self.0.values().all(StepResult::successful)
    }

    /// One line per failed host.
    #[must_use]
    pub fn error_messages(&self) -> String {
        let mut output = String::new();
        for (host, result) in &self.0 {
            if let Some(err) = result.error() {
                output.push_str(host);
                output.push_str(": ");
                output.push_str(&err.to_string());
                output.push('\n');
            }
        }
        output
    }
}

/// One installation step, ready to run over selected hosts.
#[derive(Debug, Clone)]
pub struct Step {
    /// Step name, from the feature file.
    pub name: String,
    /// The action the step belongs to.
    pub action: Action,
    /// Declared target kinds.
    pub targets: StepTargets,
    /// Script template with `{{Name}}` placeholders.
    pub script: String,
    /// Maximum run time per host.
    pub wall_time: Duration,
    /// Content of the optional `options.json` pushed next to the script.
    pub options_file_content: String,
    /// Whether the step must not run on several hosts at once.
    pub serial: bool,
}

impl Step {
    /// Run the step on `hosts` and collect per-host results.
    ///
    /// Serial mode (step-declared or settings-forced) runs hosts one by
    /// one on the caller's task; otherwise each host gets a sub-task.
    ///
    /// # Errors
    ///
    /// Returns `Aborted` when `task` is cancelled. Per-host failures land
    /// in the result map, not in the error channel.
    pub async fn run(
        &self,
        task: &Task,
        ssh: Arc<dyn SshClient>,
        feature_name: &str,
        hosts: &[Host],
        variables: &Variables,
        settings: Settings,
    ) -> Result<StepResults> {
        task.check_aborted()?;
        debug!(step = %self.name, hosts = hosts.len(), "running step");
        let mut results = StepResults::default();

        if self.serial || settings.serialize {
            for host in hosts {
                let result = self
                    .run_on_host(Arc::clone(&ssh), feature_name, host, variables)
                    .await;
                results.0.insert(host.core.name.clone(), result);
            }
        } else {
            let mut group: TaskGroup<(String, StepResult)> = TaskGroup::new(task);
            for host in hosts {
                let step = self.clone();
                let ssh = Arc::clone(&ssh);
                let feature = feature_name.to_string();
                let host = host.clone();
                let variables = variables.clone();
                group.start(move |subtask| async move {
                    subtask.check_aborted()?;
                    let result = step
                        .run_on_host(ssh, &feature, &host, &variables)
                        .await;
                    Ok((host.core.name.clone(), result))
                });
            }
            for outcome in group.wait().await {
                let (host_name, result) = outcome?;
                results.0.insert(host_name, result);
            }
        }
        Ok(results)
    }

    async fn run_on_host(
        &self,
        ssh: Arc<dyn SshClient>,
        feature_name: &str,
        host: &Host,
        variables: &Variables,
    ) -> StepResult {
        let mut variables = variables.clone();
        variables.insert(
            "HostIP".to_string(),
            host.private_ip().unwrap_or_default().to_string(),
        );
        variables.insert("Hostname".to_string(), host.core.name.clone());

        let command = match render(&self.script, &variables) {
            Ok(command) => command,
            Err(err) => {
                return StepResult::failure(Error::syntax(format!(
                    "failed to finalize installer script for step '{}': {err}",
                    self.name
                )))
            }
        };

        if !self.options_file_content.is_empty() {
            let options_path = format!("{TEMP_FOLDER}/options.json");
            if let Err(err) = ssh
                .upload(
                    host,
                    &options_path,
                    &self.options_file_content,
                    "cladm:safescale",
                    "ug+rw-x,o-rwx",
                )
                .await
            {
                return StepResult::failure(err);
            }
        }

        let filename = format!(
            "{TEMP_FOLDER}/feature.{feature_name}.{}_{}.sh",
            self.action, self.name
        );
        if let Err(err) = ssh.upload(host, &filename, &command, "", "").await {
            return StepResult::failure(err);
        }

        let command = format!("sudo bash {filename}; rc=$?; exit $rc");
        match ssh
            .run(host, &command, Duration::from_secs(60), self.wall_time)
            .await
        {
            Err(err) => StepResult::failure(err),
            Ok(output) if output.retcode == 0 => StepResult::success(),
            Ok(output) => StepResult::failure(Error::execution(format!(
                "step '{}' failed (retcode={})",
                self.name, output.retcode
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(pairs: &[(&str, &str)]) -> StepTargets {
        StepTargets(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        )
    }

    #[test]
    fn hosts_yes_selects_hosts_only() {
        let parsed = targets(&[("hosts", "yes")]).parse().unwrap();
        assert_eq!(parsed, ("1".into(), "0".into(), "0".into(), "0".into()));
    }

    #[test]
    fn masters_any_nodes_star() {
        let parsed = targets(&[("masters", "any"), ("nodes", "*")]).parse().unwrap();
        assert_eq!(parsed, ("0".into(), "1".into(), "*".into(), "0".into()));
    }

    #[test]
    fn all_empty_is_an_error() {
        assert!(targets(&[]).parse().is_err());
        assert!(targets(&[("hosts", ""), ("masters", "none")]).parse().is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(targets(&[("hosts", "any")]).parse().is_err());
        assert!(targets(&[("masters", "maybe")]).parse().is_err());
    }

    #[test]
    fn gateway_selectors_scale() {
        let parsed = targets(&[("gateways", "all")]).parse().unwrap();
        assert_eq!(parsed.3, "*");
        let parsed = targets(&[("gateways", "one")]).parse().unwrap();
        assert_eq!(parsed.3, "1");
    }

    #[test]
    fn empty_results_are_not_successful() {
        let results = StepResults::default();
        assert!(!results.successful());

        let mut results = StepResults::default();
        results.0.insert("h1".into(), StepResult::success());
        assert!(results.successful());
        results
            .0
            .insert("h2".into(), StepResult::failure(Error::execution("boom")));
        assert!(!results.successful());
        assert!(results.error_messages().contains("h2"));
    }
}
