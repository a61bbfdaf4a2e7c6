//! Process states and the transition table.

use std::fmt;

/// Lifecycle state of the collectd child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProcessState {
    /// No child has been started yet.
    #[default]
    Uninitialized,
    /// Rendering config and launching the child.
    Starting,
    Running,
    /// The child was killed to pick up new config and will be relaunched.
    Restarting,
    /// The child was killed and will not be relaunched.
    ShuttingDown,
    /// Terminal. The write server is closed.
    Stopped,
    /// The write server could not be started.
    Errored,
}

impl ProcessState {
    /// Where `signal` leads from this state, or `None` if it is ignored here.
    ///
    /// | from | signal | to |
    /// |---|---|---|
    /// | Uninitialized | Restart | Starting |
    /// | Uninitialized | Stop | Stopped |
    /// | Running | Restart | Restarting |
    /// | Running | Stop | ShuttingDown |
    /// | Running | ProcessExited | Starting |
    /// | Restarting | ProcessExited | Starting |
    /// | Restarting | Stop | ShuttingDown |
    /// | ShuttingDown | ProcessExited | Stopped |
    pub fn on_signal(self, signal: &Signal) -> Option<ProcessState> {
        use ProcessState::*;

        match (self, signal) {
            (Uninitialized, Signal::Restart) => Some(Starting),
            (Uninitialized, Signal::Stop) => Some(Stopped),
            (Running, Signal::Restart) => Some(Restarting),
            (Running, Signal::Stop) => Some(ShuttingDown),
            (Running, Signal::ProcessExited { .. }) => Some(Starting),
            (Restarting, Signal::ProcessExited { .. }) => Some(Starting),
            (Restarting, Signal::Stop) => Some(ShuttingDown),
            (ShuttingDown, Signal::ProcessExited { .. }) => Some(Stopped),
            _ => None,
        }
    }

    /// No further transitions happen from a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessState::Stopped | ProcessState::Errored)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::Uninitialized => "uninitialized",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Restarting => "restarting",
            ProcessState::ShuttingDown => "shutting-down",
            ProcessState::Stopped => "stopped",
            ProcessState::Errored => "errored",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the state machine, all delivered over one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Relaunch the child with freshly rendered config.
    Restart,
    /// Kill the child and tear everything down.
    Stop,
    /// A child exited. Stale generations are ignored by the machine.
    ProcessExited { generation: u64 },
}

/// A state change, as published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ProcessState,
    pub to: ProcessState,
}
