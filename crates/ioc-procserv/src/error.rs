use ioc_core::Placement;
use std::time::Duration;

use crate::state::{AutoRestartMode, SupervisorState};

#[derive(Debug, thiserror::Error)]
pub enum ProcServError {
    #[error("cannot resolve {endpoint}: {source}")]
    Resolve {
        endpoint: Placement,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot connect to {endpoint} after {attempts} attempts: {source}")]
    Connect {
        endpoint: Placement,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error on connection to {endpoint}: {source}")]
    Io {
        endpoint: Placement,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out after {waited:?} waiting for {waiting_for} from {endpoint}")]
    Timeout {
        endpoint: Placement,
        waiting_for: &'static str,
        waited: Duration,
    },
    #[error("procServ at {endpoint} is {actual}, expected {expected}")]
    UnexpectedState {
        endpoint: Placement,
        expected: SupervisorState,
        actual: SupervisorState,
    },
    #[error(
        "procServ at {endpoint} stayed in autorestart {actual}, never reached {}",
        mode_list(.accepted)
    )]
    ModeNotReached {
        endpoint: Placement,
        accepted: Vec<AutoRestartMode>,
        actual: AutoRestartMode,
    },
    #[error("no procmgrd port for platform {platform} above {endpoint}")]
    ControlPortOutOfRange { endpoint: Placement, platform: u16 },
    #[error("procServ at {endpoint} has exited")]
    SupervisorExited { endpoint: Placement },
    #[error("no prompt from procmgrd at {endpoint}")]
    NoPrompt { endpoint: Placement },
}

impl ProcServError {
    pub fn endpoint(&self) -> &Placement {
        match self {
            Self::Resolve { endpoint, .. }
            | Self::Connect { endpoint, .. }
            | Self::Io { endpoint, .. }
            | Self::Timeout { endpoint, .. }
            | Self::UnexpectedState { endpoint, .. }
            | Self::ModeNotReached { endpoint, .. }
            | Self::ControlPortOutOfRange { endpoint, .. }
            | Self::SupervisorExited { endpoint }
            | Self::NoPrompt { endpoint } => endpoint,
        }
    }

    /// The session never reached procServ.
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, Self::Resolve { .. } | Self::Connect { .. })
    }
}

fn mode_list(modes: &[AutoRestartMode]) -> String {
    if modes.is_empty() {
        return "any accepted mode".to_string();
    }
    modes
        .iter()
        .map(|mode| mode.label())
        .collect::<Vec<_>>()
        .join(" or ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AutoRestartMode, RunState};
    use std::error::Error;

    fn endpoint() -> Placement {
        Placement {
            host: "ioc-host".to_string(),
            port: 30001,
        }
    }

    #[test]
    fn connect_error_names_endpoint_and_keeps_source() {
        let err = ProcServError::Connect {
            endpoint: endpoint(),
            attempts: 4,
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(err.to_string().contains("ioc-host:30001"));
        assert!(err.to_string().contains("4 attempts"));
        assert!(err.source().is_some());
        assert!(err.is_connect_failure());
    }

    #[test]
    fn mode_not_reached_names_accepted_modes() {
        let err = ProcServError::ModeNotReached {
            endpoint: endpoint(),
            accepted: vec![AutoRestartMode::On, AutoRestartMode::OneShot],
            actual: AutoRestartMode::Off,
        };
        assert_eq!(
            err.to_string(),
            "procServ at ioc-host:30001 stayed in autorestart OFF, never reached ON or ONESHOT"
        );
    }

    #[test]
    fn unexpected_state_renders_both_states() {
        let err = ProcServError::UnexpectedState {
            endpoint: endpoint(),
            expected: SupervisorState::INITIAL,
            actual: SupervisorState::new(RunState::Running, AutoRestartMode::On),
        };
        assert_eq!(
            err.to_string(),
            "procServ at ioc-host:30001 is (RUNNING, ON), expected (NOT_RUNNING, OFF)"
        );
        assert_eq!(err.endpoint(), &endpoint());
        assert!(!err.is_connect_failure());
    }
}
