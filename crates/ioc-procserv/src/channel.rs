//! A stateful session on one procServ control port.

use ioc_core::{Placement, ProcServSettings};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::backoff::{wait_until, Backoff};
use crate::banner::BannerInfo;
use crate::error::ProcServError;
use crate::protocol::{ack_markers, ControlCode, MSG_BANNER_END};
use crate::state::{AutoRestartMode, RunState, SupervisorState};
use crate::transport::{accepts_connections, connect_once, connect_with_retry, resolve, Transport, Wait, Wire};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    pub connect_timeout: Duration,
    pub ack_timeout: Duration,
    pub settle_timeout: Duration,
    pub close_timeout: Duration,
    pub backoff: Backoff,
}

impl From<&ProcServSettings> for ChannelSettings {
    fn from(settings: &ProcServSettings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout(),
            ack_timeout: settings.ack_timeout(),
            settle_timeout: settings.settle_timeout(),
            close_timeout: settings.close_timeout(),
            backoff: Backoff::new(settings.backoff_initial(), settings.backoff_max()),
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self::from(&ProcServSettings::default())
    }
}

/// Read the banner on a fresh connection. Returns `None` if it never completes.
pub(crate) fn read_banner<T: Transport>(wire: &mut Wire<T>, timeout: Duration) -> Option<BannerInfo> {
    match wire.read_until(&[MSG_BANNER_END], timeout) {
        Ok(Wait::Found(text)) => Some(BannerInfo::parse(&text)),
        Ok(Wait::TimedOut | Wait::Closed) => None,
        Err(err) => {
            debug!(error = %err, "banner read failed");
            None
        }
    }
}

/// Connect once, read the banner and hang up.
pub fn observe<T: Transport>(endpoint: &Placement, timeout: Duration) -> BannerInfo {
    let Ok(addrs) = resolve(endpoint) else {
        return BannerInfo::no_connect();
    };
    let Ok(transport) = connect_once::<T>(&addrs, timeout) else {
        return BannerInfo::no_connect();
    };
    let mut wire = Wire::new(transport);
    read_banner(&mut wire, timeout).unwrap_or_else(BannerInfo::error)
}

/// Session on a procServ control port.
///
/// Every control byte is sent only after the previous one was acknowledged,
/// and the modeled state only advances on acknowledgement. Dropping the
/// channel closes the connection but leaves procServ running; use
/// [`SupervisorChannel::shutdown`] to stop it.
pub struct SupervisorChannel<T: Transport = TcpStream> {
    endpoint: Placement,
    addrs: Vec<SocketAddr>,
    settings: ChannelSettings,
    wire: Wire<T>,
    banner: BannerInfo,
    state: SupervisorState,
    exited: bool,
}

pub type TcpChannel = SupervisorChannel<TcpStream>;

impl<T: Transport> SupervisorChannel<T> {
    pub fn connect(endpoint: &Placement, settings: &ChannelSettings) -> Result<Self, ProcServError> {
        let addrs = resolve(endpoint)?;
        let transport =
            connect_with_retry::<T>(endpoint, settings.connect_timeout, settings.backoff)?;
        let mut wire = Wire::new(transport);

        let banner = read_banner(&mut wire, settings.ack_timeout);
        let Some((banner, state)) = banner.and_then(|banner| banner.state().map(|state| (banner, state)))
        else {
            return Err(ProcServError::Timeout {
                endpoint: endpoint.clone(),
                waiting_for: "connection banner",
                waited: settings.ack_timeout,
            });
        };
        debug!(%endpoint, %state, child = ?banner.child, "connected to procServ");

        Ok(Self {
            endpoint: endpoint.clone(),
            addrs,
            settings: settings.clone(),
            wire,
            banner,
            state,
            exited: false,
        })
    }

    pub fn endpoint(&self) -> &Placement {
        &self.endpoint
    }

    /// Banner seen when the session opened.
    pub fn banner(&self) -> &BannerInfo {
        &self.banner
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn has_exited(&self) -> bool {
        self.exited
    }

    fn io_error(&self, source: std::io::Error) -> ProcServError {
        ProcServError::Io {
            endpoint: self.endpoint.clone(),
            source,
        }
    }

    fn transition(&mut self, code: ControlCode) -> Result<SupervisorState, ProcServError> {
        if self.exited || self.wire.is_terminated() {
            return Err(ProcServError::SupervisorExited {
                endpoint: self.endpoint.clone(),
            });
        }

        let transition = self.state.apply(code);
        let markers = ack_markers(code, self.state.run);
        self.wire
            .send(&[code.byte()])
            .map_err(|source| self.io_error(source))?;

        // Closing is confirmed by the peer hanging up, not by text.
        let expect: &[&str] = match (transition.exits, markers.is_empty()) {
            (true, _) => &[],
            (false, true) => {
                self.state = transition.next;
                return Ok(self.state);
            }
            (false, false) => markers,
        };
        let ack_timeout = self.settings.ack_timeout;
        let waited = self
            .wire
            .read_until(expect, ack_timeout)
            .map_err(|source| self.io_error(source))?;

        match (waited, transition.exits) {
            (Wait::Closed, true) => {
                self.exited = true;
            }
            (Wait::Found(_), false) => {}
            (Wait::Closed, false) => {
                self.exited = true;
                return Err(ProcServError::SupervisorExited {
                    endpoint: self.endpoint.clone(),
                });
            }
            (Wait::TimedOut | Wait::Found(_), _) => {
                warn!(endpoint = %self.endpoint, ?code, "procServ did not acknowledge");
                return Err(ProcServError::Timeout {
                    endpoint: self.endpoint.clone(),
                    waiting_for: if transition.exits {
                        "procServ to exit"
                    } else {
                        "control acknowledgement"
                    },
                    waited: ack_timeout,
                });
            }
        }

        debug!(endpoint = %self.endpoint, ?code, from = %self.state, to = %transition.next, "transition");
        self.state = transition.next;
        Ok(self.state)
    }

    pub fn toggle_running(&mut self) -> Result<SupervisorState, ProcServError> {
        self.transition(ControlCode::ToggleRunning)
    }

    pub fn toggle_autorestart(&mut self) -> Result<SupervisorState, ProcServError> {
        self.transition(ControlCode::ToggleAutorestart)
    }

    /// Ask procServ to exit. Has no effect while the child runs.
    pub fn close(&mut self) -> Result<SupervisorState, ProcServError> {
        self.transition(ControlCode::Close)
    }

    pub fn set_autorestart_mode(&mut self, mode: AutoRestartMode) -> Result<(), ProcServError> {
        for _ in 0..self.state.mode.toggles_to(mode) {
            self.toggle_autorestart()?;
        }
        Ok(())
    }

    /// Drive a freshly started procServ to `(running, mode)` and wait until a
    /// new connection reports that state.
    pub fn set_state_from_start(
        &mut self,
        running: bool,
        mode: AutoRestartMode,
    ) -> Result<(), ProcServError> {
        if self.state != SupervisorState::INITIAL {
            return Err(ProcServError::UnexpectedState {
                endpoint: self.endpoint.clone(),
                expected: SupervisorState::INITIAL,
                actual: self.state,
            });
        }

        let run = if running {
            RunState::Running
        } else {
            RunState::NotRunning
        };
        let target = SupervisorState::new(run, mode);
        for code in SupervisorState::sequence_from_start(target) {
            self.transition(code)?;
        }
        self.wait_for_state(target)
    }

    /// Poll fresh banners until procServ reports `target`.
    pub fn wait_for_state(&self, target: SupervisorState) -> Result<(), ProcServError> {
        let probe_timeout = self.settings.ack_timeout;
        wait_until(self.settings.settle_timeout, self.settings.backoff, || {
            observe::<T>(&self.endpoint, probe_timeout).state() == Some(target)
        })
        .map_err(|timed_out| ProcServError::Timeout {
            endpoint: self.endpoint.clone(),
            waiting_for: "state to settle",
            waited: timed_out.waited,
        })
    }

    /// Stop procServ and its child, then release the connection.
    ///
    /// The connection is released even when the graceful path fails.
    pub fn shutdown(mut self) -> Result<(), ProcServError> {
        let result = self.close_gracefully();
        self.wire.terminate();
        match &result {
            Ok(()) => info!(endpoint = %self.endpoint, "procServ shut down"),
            Err(err) => warn!(endpoint = %self.endpoint, error = %err, "procServ shutdown incomplete"),
        }
        result
    }

    fn close_gracefully(&mut self) -> Result<(), ProcServError> {
        if !self.exited {
            self.set_autorestart_mode(AutoRestartMode::Off)?;
            if self.state.is_running() {
                self.toggle_running()?;
            }
            self.close()?;
        }

        let started = Instant::now();
        let probe_timeout = self.settings.ack_timeout;
        wait_until(self.settings.close_timeout, self.settings.backoff, || {
            !accepts_connections::<T>(&self.addrs, probe_timeout)
        })
        .map_err(|_| ProcServError::Timeout {
            endpoint: self.endpoint.clone(),
            waiting_for: "port to close",
            waited: started.elapsed(),
        })
    }
}

impl<T: Transport> std::fmt::Debug for SupervisorChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorChannel")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("exited", &self.exited)
            .finish()
    }
}
