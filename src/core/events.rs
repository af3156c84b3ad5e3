use super::diagnostics::Diagnostic;
use super::status::BootMode;

/// Structured event emitted while VM operations run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Warning or note that does not stop the operation.
    Diagnostic(Diagnostic),
    /// `start` found the VM already running and did nothing.
    AlreadyRunning {
        vm: String,
        port: u16,
        /// Boot mode recorded by the running instance, if the marker is readable.
        mode: Option<BootMode>,
    },
    /// The hypervisor launched and daemonized.
    VmStarted {
        vm: String,
        port: u16,
        mode: BootMode,
    },
    /// The pid marker pointed at a process that no longer exists; markers were cleared.
    StaleStateCleared { vm: String, pid: i32 },
    /// Graceful termination did not finish in time and SIGKILL was sent.
    ShutdownEscalated {
        vm: String,
        pid: i32,
        /// Milliseconds spent waiting on the graceful phase.
        waited_ms: u64,
    },
    /// The hypervisor exited and all runtime markers were cleared.
    VmStopped {
        vm: String,
        outcome: ShutdownOutcome,
    },
    DiskCreated {
        vm: String,
        kind: DiskKind,
        size: String,
    },
    DisksDeleted { vm: String },
    /// Readiness polling began.
    ReadinessWaiting { vm: String },
    /// One probe failed; another follows after the poll interval.
    ReadinessAttemptFailed { vm: String },
    ReadinessReached { vm: String, elapsed_ms: u64 },
    ReadinessTimedOut { vm: String, elapsed_ms: u64 },
    /// The terminal is about to be handed to an interactive session.
    SessionAttaching { vm: String, title: String },
    /// The interactive session returned control.
    SessionEnded { vm: String, interrupted: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Exited after the graceful termination request.
    Graceful,
    /// Needed SIGKILL.
    Forced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskKind {
    System,
    Data,
}

impl DiskKind {
    pub fn describe(self) -> &'static str {
        match self {
            DiskKind::System => "system",
            DiskKind::Data => "data",
        }
    }
}
