//! Feature specification files.
//!
//! A feature is declared in YAML: per action, an ordered *pace* of steps.
//! The pace is a comma-separated list of step names; every name must
//! exist in the step map.
//!
//! ```yaml
//! feature:
//!   name: docker
//!   install:
//!     bash:
//!       check:
//!         pace: present
//!         steps:
//!           present:
//!             targets: { masters: all, nodes: all }
//!             run: |
//!               docker ps >/dev/null
//!       add:
//!         pace: install,verify
//!         steps:
//!           install:
//!             targets: { masters: all, nodes: all }
//!             run: |
//!               curl -fsSL https://get.docker.com | bash
//!             timeout: 600
//!           verify:
//!             targets: { masters: all, nodes: all }
//!             run: |
//!               docker ps >/dev/null
//! ```

use std::collections::HashMap;
use std::time::Duration;

use safescale_core::{Error, Result};
use serde::Deserialize;

use crate::step::{Action, Step, StepTargets};

/// Default wall time of a step when the file declares none.
const DEFAULT_STEP_WALL_TIME: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct FeatureFile {
    feature: FeatureSpec,
}

#[derive(Debug, Deserialize)]
struct FeatureSpec {
    name: String,
    #[serde(default)]
    install: Option<InstallSpec>,
}

#[derive(Debug, Deserialize)]
struct InstallSpec {
    bash: BashInstaller,
}

#[derive(Debug, Default, Deserialize)]
struct BashInstaller {
    #[serde(default)]
    check: Option<PhaseSpec>,
    #[serde(default)]
    add: Option<PhaseSpec>,
    #[serde(default)]
    remove: Option<PhaseSpec>,
}

#[derive(Debug, Deserialize)]
struct PhaseSpec {
    pace: String,
    steps: HashMap<String, StepSpec>,
}

#[derive(Debug, Deserialize)]
struct StepSpec {
    #[serde(default)]
    targets: HashMap<String, String>,
    run: String,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    serial: bool,
    #[serde(default)]
    options: Option<String>,
}

/// A parsed feature specification.
#[derive(Debug)]
pub struct Feature {
    name: String,
    installer: BashInstaller,
}

impl Feature {
    /// Parse a feature from its YAML specification.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` on malformed YAML or an empty feature name.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let file: FeatureFile = serde_yaml::from_str(raw)
            .map_err(|e| Error::syntax(format!("malformed feature specification: {e}")))?;
        if file.feature.name.is_empty() {
            return Err(Error::syntax("feature specification misses 'name'"));
        }
        Ok(Self {
            name: file.feature.name,
            installer: file
                .feature
                .install
                .map(|i| i.bash)
                .unwrap_or_default(),
        })
    }

    /// The feature name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The ordered steps of `action`, following the declared pace.
    ///
    /// # Errors
    ///
    /// Returns `NotImplemented` when the feature declares no such action,
    /// `Syntax` when the pace names an unknown step or a step's targets
    /// do not parse.
    pub fn steps_for(&self, action: Action) -> Result<Vec<Step>> {
        let phase = match action {
            Action::Check => self.installer.check.as_ref(),
            Action::Add => self.installer.add.as_ref(),
            Action::Remove => self.installer.remove.as_ref(),
        }
        .ok_or_else(|| {
            Error::not_implemented(format!(
                "feature '{}' declares no '{action}' action",
                self.name
            ))
        })?;

        let mut steps = Vec::new();
        for step_name in phase.pace.split(',').map(str::trim) {
            let spec = phase.steps.get(step_name).ok_or_else(|| {
                Error::syntax(format!(
                    "pace of feature '{}' names unknown step '{step_name}'",
                    self.name
                ))
            })?;
            let targets = StepTargets(spec.targets.clone());
            // Fail early on bad target declarations.
            targets.parse()?;
            steps.push(Step {
                name: step_name.to_string(),
                action,
                targets,
                script: spec.run.clone(),
                wall_time: spec
                    .timeout
                    .map_or(DEFAULT_STEP_WALL_TIME, Duration::from_secs),
                options_file_content: spec.options.clone().unwrap_or_default(),
                serial: spec.serial,
            });
        }
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCKER: &str = r"
feature:
  name: docker
  install:
    bash:
      check:
        pace: present
        steps:
          present:
            targets: { masters: all, nodes: all }
            run: |
              docker ps >/dev/null
      add:
        pace: install,verify
        steps:
          verify:
            targets: { masters: all, nodes: all }
            run: docker ps >/dev/null
          install:
            targets: { masters: all, nodes: all }
            run: curl -fsSL https://get.docker.com | bash
            timeout: 600
            serial: true
";

    #[test]
    fn steps_follow_the_pace_order() {
        let feature = Feature::from_yaml_str(DOCKER).unwrap();
        assert_eq!(feature.name(), "docker");
        let steps = feature.steps_for(Action::Add).unwrap();
        let names: Vec<_> = steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["install", "verify"]);
        assert!(steps[0].serial);
        assert_eq!(steps[0].wall_time, Duration::from_secs(600));
        assert_eq!(steps[1].wall_time, DEFAULT_STEP_WALL_TIME);
    }

    #[test]
    fn missing_action_is_not_implemented() {
        let feature = Feature::from_yaml_str(DOCKER).unwrap();
        let err = feature.steps_for(Action::Remove).unwrap_err();
        assert_eq!(err.kind(), safescale_core::ErrorKind::NotImplemented);
    }

    #[test]
    fn unknown_pace_step_is_rejected() {
        let raw = r"
feature:
  name: broken
  install:
    bash:
      check:
        pace: nope
        steps:
          present:
            targets: { hosts: yes }
            run: true
";
        let feature = Feature::from_yaml_str(raw).unwrap();
        assert!(feature.steps_for(Action::Check).is_err());
    }

    #[test]
    fn malformed_yaml_is_a_syntax_error() {
        assert!(Feature::from_yaml_str("feature: [").is_err());
    }
}
