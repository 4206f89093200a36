//! One-shot procServ operations used when applying a config.

use ioc_core::{IocProc, Paths, Placement, ProcServSettings};
use std::net::TcpStream;
use std::time::Duration;
use tracing::{info, warn};

use crate::banner::BannerInfo;
use crate::channel::{observe, ChannelSettings, TcpChannel};
use crate::error::ProcServError;
use crate::protocol::{ControlCode, MSG_PROMPT};
use crate::state::AutoRestartMode;
use crate::transport::{connect_with_retry, Wait, Wire};

/// Connect, read the banner and hang up.
pub fn check_status(endpoint: &Placement, timeout: Duration) -> BannerInfo {
    observe::<TcpStream>(endpoint, timeout)
}

/// Toggle autorestart until procServ reports one of `accepted`.
pub fn set_autorestart(
    endpoint: &Placement,
    settings: &ChannelSettings,
    accepted: &[AutoRestartMode],
) -> Result<AutoRestartMode, ProcServError> {
    let mut channel = TcpChannel::connect(endpoint, settings)?;
    for _ in 0..AutoRestartMode::ALL.len() {
        if accepted.contains(&channel.state().mode) {
            return Ok(channel.state().mode);
        }
        channel.toggle_autorestart()?;
    }
    Err(ProcServError::ModeNotReached {
        endpoint: endpoint.clone(),
        accepted: accepted.to_vec(),
        actual: channel.state().mode,
    })
}

/// Stop the child and procServ itself.
pub fn kill_proc(endpoint: &Placement, settings: &ChannelSettings) -> Result<(), ProcServError> {
    info!(%endpoint, "killing ioc");
    TcpChannel::connect(endpoint, settings)?.shutdown()
}

/// Restart the child in place and put autorestart back how it was.
///
/// Autorestart is forced OFF first so the start below is not raced by
/// procServ restarting the child itself.
pub fn restart_proc(endpoint: &Placement, settings: &ChannelSettings) -> Result<(), ProcServError> {
    info!(%endpoint, "restarting ioc");
    let mut channel = TcpChannel::connect(endpoint, settings)?;
    let original = channel.state().mode;

    channel.set_autorestart_mode(AutoRestartMode::Off)?;
    if channel.state().is_running() {
        channel.toggle_running()?;
    }
    channel.toggle_running()?;
    channel.set_autorestart_mode(original)
}

/// procmgrd platform number for a hutch.
pub fn platform_for_hutch(hutch: &str) -> u16 {
    match hutch {
        "xrt" => 2,
        "las" => 3,
        _ => 1,
    }
}

/// Everything needed to ask a host's procmgrd to launch one IOC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub name: String,
    /// procmgrd control endpoint on the IOC host.
    pub control: Placement,
    pub command_line: String,
}

impl StartRequest {
    pub fn new(
        paths: &Paths,
        hutch: &str,
        proc: &IocProc,
        settings: &ProcServSettings,
    ) -> Result<Self, ProcServError> {
        let platform = platform_for_hutch(hutch);
        let control_port =
            settings
                .procmgrd_port(platform)
                .ok_or_else(|| ProcServError::ControlPortOutOfRange {
                    endpoint: Placement {
                        host: proc.host.clone(),
                        port: settings.procmgrd_base_port,
                    },
                    platform,
                })?;
        let script = paths.startup_dir(hutch).join("startProc");
        let command_line = format!(
            "{exe} --logfile {log} --name {name} --allow --coresize 0 --savelog {port} {script} {name} {port} {hutch} {cmd}",
            exe = settings.exe,
            log = settings.log_file(&proc.name),
            name = proc.name,
            port = proc.port,
            script = script.display(),
            cmd = proc.start_command(),
        );
        Ok(Self {
            name: proc.name.clone(),
            control: Placement {
                host: proc.host.clone(),
                port: control_port,
            },
            command_line,
        })
    }
}

/// Launch a new procServ through the host's procmgrd shell.
pub fn start_proc(request: &StartRequest, settings: &ChannelSettings) -> Result<(), ProcServError> {
    let endpoint = &request.control;
    info!(ioc = %request.name, %endpoint, "starting ioc");
    let transport =
        connect_with_retry::<TcpStream>(endpoint, settings.connect_timeout, settings.backoff)?;
    let mut wire = Wire::new(transport);
    let io_error = |source| ProcServError::Io {
        endpoint: endpoint.clone(),
        source,
    };

    wire.send(&[ControlCode::ClearLine.byte(), b'\r'])
        .map_err(io_error)?;
    expect_prompt(&mut wire, endpoint, settings.ack_timeout)?;

    wire.send(format!("{}\n", request.command_line).as_bytes())
        .map_err(io_error)?;
    expect_prompt(&mut wire, endpoint, settings.ack_timeout)
}

fn expect_prompt(
    wire: &mut Wire<TcpStream>,
    endpoint: &Placement,
    timeout: Duration,
) -> Result<(), ProcServError> {
    match wire.read_until(&[MSG_PROMPT], timeout) {
        Ok(Wait::Found(_)) => Ok(()),
        Ok(Wait::TimedOut | Wait::Closed) => {
            warn!(%endpoint, "no procmgrd prompt");
            Err(ProcServError::NoPrompt {
                endpoint: endpoint.clone(),
            })
        }
        Err(source) => Err(ProcServError::Io {
            endpoint: endpoint.clone(),
            source,
        }),
    }
}
