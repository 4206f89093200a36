//! Supervisor operations the orchestrator drives.

use ioc_core::{IocProc, Paths, Placement, ProcServSettings};
use ioc_procserv::{
    check_status, kill_proc, restart_proc, start_proc, ChannelSettings, ProcServError,
    ProcStatus, StartRequest,
};

/// Side-effecting supervisor calls, one session per call.
///
/// Implementations are shared between worker threads.
pub trait SupervisorOps: Sync {
    /// Ask `proc.host`'s procmgrd to launch a supervisor for `proc`.
    fn start(&self, hutch: &str, proc: &IocProc) -> Result<(), ProcServError>;

    /// Stop the child and the supervisor at `endpoint`.
    fn stop(&self, endpoint: &Placement) -> Result<(), ProcServError>;

    /// Restart the child at `endpoint` in place.
    fn restart(&self, endpoint: &Placement) -> Result<(), ProcServError>;

    /// Whether a supervisor at `endpoint` reports a running child.
    fn is_running(&self, endpoint: &Placement) -> bool;
}

/// [`SupervisorOps`] backed by real procServ and procmgrd sessions.
#[derive(Debug, Clone)]
pub struct ProcServOps {
    paths: Paths,
    settings: ProcServSettings,
    channel: ChannelSettings,
}

impl ProcServOps {
    pub fn new(paths: Paths, settings: ProcServSettings) -> Self {
        let channel = ChannelSettings::from(&settings);
        Self {
            paths,
            settings,
            channel,
        }
    }

    pub fn channel_settings(&self) -> &ChannelSettings {
        &self.channel
    }
}

impl SupervisorOps for ProcServOps {
    fn start(&self, hutch: &str, proc: &IocProc) -> Result<(), ProcServError> {
        let request = StartRequest::new(&self.paths, hutch, proc, &self.settings)?;
        start_proc(&request, &self.channel)
    }

    fn stop(&self, endpoint: &Placement) -> Result<(), ProcServError> {
        kill_proc(endpoint, &self.channel)
    }

    fn restart(&self, endpoint: &Placement) -> Result<(), ProcServError> {
        restart_proc(endpoint, &self.channel)
    }

    fn is_running(&self, endpoint: &Placement) -> bool {
        check_status(endpoint, self.channel.ack_timeout).status == ProcStatus::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ioc_procserv::sim::{SimConfig, SimulatedProcServ};
    use ioc_procserv::AutoRestartMode;

    fn quick_settings() -> ProcServSettings {
        ProcServSettings {
            connect_timeout_ms: 1000,
            ack_timeout_ms: 1000,
            settle_timeout_ms: 2000,
            close_timeout_ms: 2000,
            backoff_initial_ms: 5,
            backoff_max_ms: 50,
            ..ProcServSettings::default()
        }
    }

    #[test]
    fn procserv_ops_probe_restart_and_stop_a_supervisor() {
        let sim = SimulatedProcServ::spawn(SimConfig {
            running: true,
            mode: AutoRestartMode::On,
            ..SimConfig::default()
        })
        .expect("spawn sim");
        let ops = ProcServOps::new(Paths::with_root("/pyps"), quick_settings());
        let endpoint = sim.endpoint();

        assert!(ops.is_running(&endpoint));
        ops.restart(&endpoint).expect("restart");
        assert_eq!(sim.starts(), 2);
        assert_eq!(sim.state().mode, AutoRestartMode::On);

        ops.stop(&endpoint).expect("stop");
        assert!(sim.has_exited());
        assert!(!ops.is_running(&endpoint));
    }

    #[test]
    fn channel_settings_follow_manager_settings() {
        let ops = ProcServOps::new(Paths::with_root("/pyps"), quick_settings());
        assert_eq!(
            ops.channel_settings().ack_timeout,
            std::time::Duration::from_millis(1000)
        );
        assert_eq!(
            ops.channel_settings().backoff.max(),
            std::time::Duration::from_millis(50)
        );
    }
}
