//! The worker: host selection and step dispatch for one feature action.
//!
//! The worker resolves each step's target selectors against the cluster
//! (gateways, masters, nodes) or a standalone host, runs the steps in
//! pace order and aggregates results per step.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use safescale_core::{Error, Result};
use safescale_store::types::Host;
use safescale_task::Task;
use tracing::{debug, info};

use crate::feature::Feature;
use crate::ssh::SshClient;
use crate::step::{Action, Settings, StepResults, Variables};

/// What a cluster must expose for features to be installed on it.
#[async_trait]
pub trait InstallTarget: Send + Sync {
    /// The gateway hosts of the cluster network.
    async fn gateways(&self, task: &Task) -> Result<Vec<Host>>;
    /// The master hosts.
    async fn masters(&self, task: &Task) -> Result<Vec<Host>>;
    /// The worker (private node) hosts.
    async fn nodes(&self, task: &Task) -> Result<Vec<Host>>;
}

/// Results of one feature action, per step in pace order.
#[derive(Debug, Default)]
pub struct FeatureResults {
    per_step: Vec<(String, StepResults)>,
}

impl FeatureResults {
    /// True iff every step ran successfully on every selected host.
    #[must_use]
    pub fn successful(&self) -> bool {
        !self.per_step.is_empty() && self.per_step.iter().all(|(_, r)| r.successful())
    }

    /// The steps and their per-host results, in execution order.
    #[must_use]
    pub fn steps(&self) -> &[(String, StepResults)] {
        &self.per_step
    }

    /// One line per failed host, over all steps.
    #[must_use]
    pub fn error_messages(&self) -> String {
        self.per_step
            .iter()
            .map(|(_, results)| results.error_messages())
            .collect()
    }
}

/// Dispatches the steps of one feature action over selected hosts.
pub struct Worker {
    feature: Feature,
    action: Action,
    ssh: Arc<dyn SshClient>,
    settings: Settings,
    /// Budget for picking "any one" ready host.
    probe_timeout: Duration,
}

impl Worker {
    /// Create a worker for one feature action.
    #[must_use]
    pub fn new(feature: Feature, action: Action, ssh: Arc<dyn SshClient>, settings: Settings) -> Self {
        Self {
            feature,
            action,
            ssh,
            settings,
            probe_timeout: Duration::from_secs(60),
        }
    }

    /// The feature this worker dispatches.
    #[must_use]
    pub fn feature(&self) -> &Feature {
        &self.feature
    }

    /// Run the action's steps over the cluster `target`.
    ///
    /// # Errors
    ///
    /// Surfaces selection failures (no ready host for an `any` selector)
    /// and abort; per-host script failures land in the results.
    pub async fn run_on_cluster(
        &self,
        task: &Task,
        target: &dyn InstallTarget,
        variables: &Variables,
    ) -> Result<FeatureResults> {
        let mut outcome = FeatureResults::default();
        for step in self.feature.steps_for(self.action)? {
            let (_, masters_sel, nodes_sel, gateways_sel) = step.targets.parse()?;

            let mut hosts: Vec<Host> = Vec::new();
            self.select(task, &gateways_sel, target.gateways(task).await?, &mut hosts)
                .await?;
            self.select(task, &masters_sel, target.masters(task).await?, &mut hosts)
                .await?;
            self.select(task, &nodes_sel, target.nodes(task).await?, &mut hosts)
                .await?;
            dedup_by_id(&mut hosts);

            debug!(
                feature = %self.feature.name(),
                step = %step.name,
                hosts = hosts.len(),
                "step hosts selected"
            );
            let results = step
                .run(
                    task,
                    Arc::clone(&self.ssh),
                    self.feature.name(),
                    &hosts,
                    variables,
                    self.settings,
                )
                .await?;
            outcome.per_step.push((step.name.clone(), results));
        }
        info!(
            feature = %self.feature.name(),
            action = %self.action,
            success = outcome.successful(),
            "feature action finished"
        );
        Ok(outcome)
    }

    /// Run the action's steps on one standalone host.
    ///
    /// Only the `hosts` selector applies; steps with it disabled are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Surfaces parsing failures and abort; script failures land in the
    /// results.
    pub async fn run_on_host(
        &self,
        task: &Task,
        host: &Host,
        variables: &Variables,
    ) -> Result<FeatureResults> {
        let mut outcome = FeatureResults::default();
        for step in self.feature.steps_for(self.action)? {
            let (hosts_sel, _, _, _) = step.targets.parse()?;
            if hosts_sel == "0" {
                continue;
            }
            let results = step
                .run(
                    task,
                    Arc::clone(&self.ssh),
                    self.feature.name(),
                    std::slice::from_ref(host),
                    variables,
                    self.settings,
                )
                .await?;
            outcome.per_step.push((step.name.clone(), results));
        }
        Ok(outcome)
    }

    async fn select(
        &self,
        task: &Task,
        selector: &str,
        candidates: Vec<Host>,
        into: &mut Vec<Host>,
    ) -> Result<()> {
        match selector {
            "0" => Ok(()),
            "*" => {
                into.extend(candidates);
                Ok(())
            }
            _ => {
                let chosen = self.first_ready(task, candidates).await?;
                into.push(chosen);
                Ok(())
            }
        }
    }

    /// The first candidate accepting SSH sessions.
    ///
    /// Transient probe timeouts move on to the next candidate; hard
    /// transport failures abort.
    async fn first_ready(&self, task: &Task, candidates: Vec<Host>) -> Result<Host> {
        task.check_aborted()?;
        let mut last_error: Option<Error> = None;
        for host in candidates {
            match self.ssh.wait_ready(&host, self.probe_timeout).await {
                Ok(()) => return Ok(host),
                Err(err) if err.kind() == safescale_core::ErrorKind::Timeout => {
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(match last_error {
            Some(err) => Error::not_available("no host ready for installation").with_cause(err),
            None => Error::not_available("no candidate host for installation"),
        })
    }
}

fn dedup_by_id(hosts: &mut Vec<Host>) {
    let mut seen = std::collections::HashSet::new();
    hosts.retain(|h| seen.insert(h.core.id.clone()));
}

/// A fixed in-memory [`InstallTarget`] for tests and simple callers.
#[derive(Debug, Default)]
pub struct StaticTarget {
    /// Gateway hosts.
    pub gateways: Vec<Host>,
    /// Master hosts.
    pub masters: Vec<Host>,
    /// Worker hosts.
    pub nodes: Vec<Host>,
}

#[async_trait]
impl InstallTarget for StaticTarget {
    async fn gateways(&self, _task: &Task) -> Result<Vec<Host>> {
        Ok(self.gateways.clone())
    }

    async fn masters(&self, _task: &Task) -> Result<Vec<Host>> {
        Ok(self.masters.clone())
    }

    async fn nodes(&self, _task: &Task) -> Result<Vec<Host>> {
        Ok(self.nodes.clone())
    }
}

