//! In-process stand-ins for procServ and procmgrd, bound to loopback.
//!
//! Behavior follows a procServ started with `--noautorestart --wait`: the
//! child is a fake that never exits on its own.

use ioc_core::Placement;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::protocol::ControlCode;
use crate::state::{AutoRestartMode, RunState, SupervisorState};

const ACCEPT_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub name: String,
    pub startup_dir: String,
    pub running: bool,
    pub mode: AutoRestartMode,
    /// Use the procServ 2.8 "auto restart mode" wording.
    pub mode_wording: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            name: "counter".to_string(),
            startup_dir: "/tmp/ioc/counter".to_string(),
            running: false,
            mode: AutoRestartMode::Off,
            mode_wording: true,
        }
    }
}

struct SimState {
    config: SimConfig,
    state: SupervisorState,
    pid: Option<u32>,
    next_pid: u32,
    starts: u32,
    clients: Vec<TcpStream>,
}

impl SimState {
    fn start_child(&mut self) -> String {
        let pid = self.next_pid;
        self.next_pid += 1;
        self.pid = Some(pid);
        self.starts += 1;
        self.state.run = RunState::Running;
        format!(
            "@@@ Restarting child \"{name}\"\r\n@@@    (as ./st.cmd)\r\n@@@ The PID of new child \"{name}\" is: {pid}\r\n",
            name = self.config.name
        )
    }

    fn banner(&self) -> String {
        let wording = if self.config.mode_wording {
            "auto restart mode"
        } else {
            "auto restart"
        };
        let name = &self.config.name;
        let dir = &self.config.startup_dir;
        let child = match self.pid {
            Some(pid) if self.state.is_running() => format!("@@@ Child \"{name}\" PID: {pid}\r\n"),
            _ => format!("@@@ Child \"{name}\" is SHUT DOWN\r\n"),
        };
        format!(
            "\r\n@@@ Welcome to procServ (procServ Process Server 2.8.0)\r\n\
             @@@ Use ^X to kill the child, {wording} is {mode}, use ^T to toggle auto restart\r\n\
             @@@ procServ server PID: 4242\r\n\
             @@@ Server startup directory: {dir}\r\n\
             @@@ Child startup directory: {dir}\r\n\
             @@@ Child \"{name}\" started as: ./st.cmd\r\n\
             {child}\
             @@@ procServ server started at: Thu Jan  1 00:00:00 1970\r\n\
             @@@ {users} user(s) and 0 logger(s) connected (plus you)\r\n",
            mode = self.state.mode.label(),
            users = self.clients.len(),
        )
    }

    /// Apply one byte. Returns the text to broadcast and whether procServ exits.
    fn handle(&mut self, byte: u8) -> (String, bool) {
        match (ControlCode::from_byte(byte), self.state.run) {
            (Some(ControlCode::ToggleAutorestart), _) => {
                self.state.mode = self.state.mode.next();
                let wording = if self.config.mode_wording {
                    "auto restart mode"
                } else {
                    "auto restart"
                };
                (
                    format!("@@@ Toggled {wording} to {}\r\n", self.state.mode.label()),
                    false,
                )
            }
            (Some(ControlCode::ToggleRunning), RunState::NotRunning) => (self.start_child(), false),
            (Some(ControlCode::ToggleRunning), RunState::Running) => {
                let mut text = format!(
                    "@@@ Got a sigChild for PID {}: the process was killed by signal 9\r\n",
                    self.pid.unwrap_or_default()
                );
                self.state.run = RunState::NotRunning;
                self.pid = None;
                match self.state.mode {
                    AutoRestartMode::Off => (text, false),
                    AutoRestartMode::On => {
                        text.push_str(&self.start_child());
                        (text, false)
                    }
                    AutoRestartMode::OneShot => {
                        text.push_str("@@@ Child process is shutting down, procServ exits\r\n");
                        (text, true)
                    }
                }
            }
            (Some(ControlCode::Close), RunState::NotRunning) => {
                ("@@@ procServ is shutting down\r\n".to_string(), true)
            }
            _ => (String::new(), false),
        }
    }
}

struct Shared {
    inner: Mutex<SimState>,
    exited: AtomicBool,
    live_clients: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn broadcast(state: &mut SimState, text: &str) {
        if text.is_empty() {
            return;
        }
        state
            .clients
            .retain_mut(|client| client.write_all(text.as_bytes()).is_ok());
    }

    fn exit(&self, state: &mut SimState) {
        self.exited.store(true, Ordering::SeqCst);
        for client in state.clients.drain(..) {
            let _ = client.shutdown(Shutdown::Both);
        }
    }
}

/// Simulated procServ on `127.0.0.1`, shut down on drop.
pub struct SimulatedProcServ {
    addr: SocketAddr,
    shared: Arc<Shared>,
    acceptor: Option<JoinHandle<()>>,
}

impl SimulatedProcServ {
    pub fn spawn(config: SimConfig) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let mut state = SimState {
            state: SupervisorState::new(RunState::NotRunning, config.mode),
            pid: None,
            next_pid: 1000,
            starts: 0,
            clients: Vec::new(),
            config,
        };
        if state.config.running {
            state.start_child();
        }

        let shared = Arc::new(Shared {
            inner: Mutex::new(state),
            exited: AtomicBool::new(false),
            live_clients: AtomicUsize::new(0),
        });
        let acceptor = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || accept_loop(listener, shared))
        };

        Ok(Self {
            addr,
            shared,
            acceptor: Some(acceptor),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn endpoint(&self) -> Placement {
        Placement {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.shared.lock().state
    }

    pub fn child_pid(&self) -> Option<u32> {
        self.shared.lock().pid
    }

    /// Number of times a child was started.
    pub fn starts(&self) -> u32 {
        self.shared.lock().starts
    }

    pub fn has_exited(&self) -> bool {
        self.shared.exited.load(Ordering::SeqCst)
    }

    pub fn connected_clients(&self) -> usize {
        self.shared.live_clients.load(Ordering::SeqCst)
    }
}

impl Drop for SimulatedProcServ {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            self.shared.exit(&mut state);
        }
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    while !shared.exited.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = register_client(stream, &shared) {
                    tracing::debug!(error = %err, "sim client setup failed");
                }
            }
            // WouldBlock while idle; anything else is retried the same way.
            Err(_) => thread::sleep(ACCEPT_POLL),
        }
    }
}

fn register_client(stream: TcpStream, shared: &Arc<Shared>) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    let mut writer = stream.try_clone()?;
    {
        let mut state = shared.lock();
        if shared.exited.load(Ordering::SeqCst) {
            let _ = stream.shutdown(Shutdown::Both);
            return Ok(());
        }
        writer.write_all(state.banner().as_bytes())?;
        state.clients.push(writer);
    }

    shared.live_clients.fetch_add(1, Ordering::SeqCst);
    let shared = Arc::clone(shared);
    thread::spawn(move || {
        client_loop(stream, &shared);
        shared.live_clients.fetch_sub(1, Ordering::SeqCst);
    });
    Ok(())
}

fn client_loop(mut stream: TcpStream, shared: &Shared) {
    let mut buf = [0u8; 256];
    loop {
        let read = match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(read) => read,
        };
        let mut state = shared.lock();
        for &byte in &buf[..read] {
            let (text, exits) = state.handle(byte);
            Shared::broadcast(&mut state, &text);
            if exits {
                shared.exit(&mut state);
                return;
            }
        }
    }
}

/// Simulated procmgrd shell that records launch command lines.
pub struct SimulatedProcMgr {
    addr: SocketAddr,
    commands: Arc<Mutex<Vec<String>>>,
    stop: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl SimulatedProcMgr {
    pub fn spawn() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let commands = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let acceptor = {
            let commands = Arc::clone(&commands);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            let commands = Arc::clone(&commands);
                            thread::spawn(move || shell_loop(stream, &commands));
                        }
                        Err(_) => thread::sleep(ACCEPT_POLL),
                    }
                }
            })
        };

        Ok(Self {
            addr,
            commands,
            stop,
            acceptor: Some(acceptor),
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for SimulatedProcMgr {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
    }
}

fn shell_loop(mut stream: TcpStream, commands: &Mutex<Vec<String>>) {
    if stream.set_nonblocking(false).is_err() {
        return;
    }
    let mut line = String::new();
    let mut buf = [0u8; 256];
    loop {
        let read = match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(read) => read,
        };
        for &byte in &buf[..read] {
            match byte {
                byte if byte == ControlCode::ClearLine.byte() => line.clear(),
                b'\r' | b'\n' => {
                    if !line.is_empty() {
                        commands
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(std::mem::take(&mut line));
                    }
                    if stream.write_all(b"\r\n> ").is_err() {
                        return;
                    }
                }
                byte => line.push(char::from(byte)),
            }
        }
    }
}
