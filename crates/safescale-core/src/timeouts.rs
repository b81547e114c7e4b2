//! The catalog of named operation timeouts.
//!
//! Long operations pick their envelope from a small catalog instead of
//! inventing ad-hoc durations. The catalog can be deserialized from tenant
//! configuration; every field has a default.

use std::time::Duration;

use serde::Deserialize;

const fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// Named timeouts used across the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Default envelope for provider calls with no better match.
    #[serde(with = "humantime_secs")]
    pub default_op: Duration,
    /// Budget for a whole request context.
    #[serde(with = "humantime_secs")]
    pub context: Duration,
    /// Budget for host creation and state convergence.
    #[serde(with = "humantime_secs")]
    pub host: Duration,
    /// Budget for long multi-host operations (cluster create, delete).
    #[serde(with = "humantime_secs")]
    pub long_operation: Duration,
    /// Budget for cleaning up a half-created host.
    #[serde(with = "humantime_secs")]
    pub host_cleanup: Duration,
    /// Budget for establishing an SSH session to a host.
    #[serde(with = "humantime_secs")]
    pub connect_ssh: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            default_op: secs(60),
            context: secs(120),
            host: secs(300),
            long_operation: secs(900),
            host_cleanup: secs(300),
            connect_ssh: secs(60),
        }
    }
}

mod humantime_secs {
    //! Durations are written as whole seconds in configuration files.

    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_ordered_sensibly() {
        let t = Timeouts::default();
        assert!(t.default_op <= t.context);
        assert!(t.host <= t.long_operation);
    }

    #[test]
    fn deserializes_partial_overrides() {
        let t: Timeouts = serde_json::from_str(r#"{"host": 600}"#).unwrap();
        assert_eq!(t.host, Duration::from_secs(600));
        assert_eq!(t.connect_ssh, Duration::from_secs(60));
    }
}
