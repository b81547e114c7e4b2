//! The cluster state machine.
//!
//! ```text
//! Creating ──▶ Created ──▶ Initializing ──▶ Nominal ◀──▶ Degraded
//!                                             │  ▲          │
//!                                     (stop)  │  │ (started) │ (stop)
//!                                             ▼  │          ▼
//!                                          Stopping ◀───────┘
//!                                             │
//!                                             ▼
//!                                  Stopped ──▶ Starting ──▶ Nominal
//!
//!                        any state ──▶ Removed (terminal)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle states of a cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum ClusterState {
    #[default]
    Creating,
    Created,
    Initializing,
    Nominal,
    Degraded,
    Stopping,
    Stopped,
    Starting,
    Removed,
    Unknown,
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Nominal => "nominal",
            Self::Degraded => "degraded",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Removed => "removed",
            Self::Unknown => "unknown",
        })
    }
}

impl ClusterState {
    /// Whether moving from `self` to `to` follows the state machine.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        use ClusterState::{
            Created, Creating, Degraded, Initializing, Nominal, Removed, Starting, Stopped,
            Stopping,
        };
        matches!(
            (self, to),
            (Creating, Created)
                | (Created, Initializing)
                | (Initializing, Nominal)
                | (Nominal, Degraded)
                | (Degraded, Nominal)
                | (Nominal | Degraded, Stopping)
                | (Stopping, Stopped)
                | (Stopped, Starting)
                | (Starting, Nominal)
                | (_, Removed)
        )
    }

    /// Whether the cluster can serve `stop` from this state.
    #[must_use]
    pub const fn stoppable(self) -> bool {
        matches!(self, Self::Nominal | Self::Degraded)
    }

    /// Whether this state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nominal_path() {
        use ClusterState::{Created, Creating, Initializing, Nominal};
        assert!(Creating.can_transition_to(Created));
        assert!(Created.can_transition_to(Initializing));
        assert!(Initializing.can_transition_to(Nominal));
    }

    #[test]
    fn stop_start_cycle() {
        use ClusterState::{Degraded, Nominal, Starting, Stopped, Stopping};
        assert!(Nominal.can_transition_to(Stopping));
        assert!(Degraded.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
        assert!(Stopped.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Nominal));
    }

    #[test]
    fn removal_is_always_allowed_and_terminal() {
        for state in [
            ClusterState::Creating,
            ClusterState::Nominal,
            ClusterState::Stopped,
        ] {
            assert!(state.can_transition_to(ClusterState::Removed));
        }
        assert!(ClusterState::Removed.is_terminal());
        assert!(!ClusterState::Removed.can_transition_to(ClusterState::Nominal));
    }

    #[test]
    fn illegal_shortcuts_are_rejected() {
        use ClusterState::{Creating, Nominal, Stopped};
        assert!(!Creating.can_transition_to(Nominal));
        assert!(!Stopped.can_transition_to(Nominal));
        assert!(!Creating.stoppable());
        assert!(Nominal.stoppable());
    }

    #[test]
    fn states_render_lowercase() {
        assert_eq!(ClusterState::Creating.to_string(), "creating");
        assert_eq!(ClusterState::Nominal.to_string(), "nominal");
    }
}
