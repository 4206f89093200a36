//! Model of what a procServ instance does with each control byte.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::ControlCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    NotRunning,
    Running,
}

/// What procServ does when its child exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoRestartMode {
    /// Leave the child stopped.
    Off,
    /// Shut procServ itself down.
    OneShot,
    /// Start the child again.
    On,
}

impl AutoRestartMode {
    pub const ALL: [Self; 3] = [Self::Off, Self::OneShot, Self::On];

    /// Mode after one `^T`.
    pub const fn next(self) -> Self {
        match self {
            Self::Off => Self::OneShot,
            Self::OneShot => Self::On,
            Self::On => Self::Off,
        }
    }

    /// `^T` presses needed to get from `self` to `target`.
    pub fn toggles_to(self, target: Self) -> usize {
        let mut mode = self;
        let mut presses = 0;
        while mode != target {
            mode = mode.next();
            presses += 1;
        }
        presses
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::OneShot => "ONESHOT",
            Self::On => "ON",
        }
    }
}

impl fmt::Display for AutoRestartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SupervisorState {
    pub run: RunState,
    pub mode: AutoRestartMode,
}

/// Result of applying one control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: SupervisorState,
    /// procServ shuts down and the connection is gone.
    pub exits: bool,
}

impl SupervisorState {
    /// A procServ started with `--noautorestart --wait`.
    pub const INITIAL: Self = Self {
        run: RunState::NotRunning,
        mode: AutoRestartMode::Off,
    };

    pub const fn new(run: RunState, mode: AutoRestartMode) -> Self {
        Self { run, mode }
    }

    pub fn is_running(self) -> bool {
        self.run == RunState::Running
    }

    pub fn apply(self, code: ControlCode) -> Transition {
        let stay = Transition {
            next: self,
            exits: false,
        };
        match (code, self.run) {
            (ControlCode::ToggleAutorestart, _) => Transition {
                next: Self::new(self.run, self.mode.next()),
                exits: false,
            },
            (ControlCode::ToggleRunning, RunState::NotRunning) => Transition {
                next: Self::new(RunState::Running, self.mode),
                exits: false,
            },
            (ControlCode::ToggleRunning, RunState::Running) => match self.mode {
                AutoRestartMode::Off => Transition {
                    next: Self::new(RunState::NotRunning, self.mode),
                    exits: false,
                },
                // Observed as a brief stop followed by a fresh child.
                AutoRestartMode::On => stay,
                AutoRestartMode::OneShot => Transition {
                    next: Self::new(RunState::NotRunning, self.mode),
                    exits: true,
                },
            },
            (ControlCode::Close, RunState::NotRunning) => Transition {
                next: self,
                exits: true,
            },
            (ControlCode::Close, RunState::Running) | (ControlCode::ClearLine, _) => stay,
        }
    }

    /// Shortest control sequence taking [`SupervisorState::INITIAL`] to `target`.
    ///
    /// The child is started before the mode changes so a ONESHOT target never
    /// sees a stop.
    pub fn sequence_from_start(target: Self) -> Vec<ControlCode> {
        let mut codes = Vec::new();
        if target.is_running() {
            codes.push(ControlCode::ToggleRunning);
        }
        let presses = Self::INITIAL.mode.toggles_to(target.mode);
        codes.extend(std::iter::repeat(ControlCode::ToggleAutorestart).take(presses));
        codes
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let run = match self.run {
            RunState::NotRunning => "NOT_RUNNING",
            RunState::Running => "RUNNING",
        };
        write!(f, "({run}, {})", self.mode)
    }
}
