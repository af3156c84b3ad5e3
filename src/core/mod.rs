//! VM lifecycle library: platform probing, process supervision and per-VM state.

pub mod diagnostics;
pub mod dispatch;
pub mod disks;
pub mod events;
pub mod host;
pub mod layout;
pub mod markers;
pub mod platform;
pub mod process;
pub mod remote;
pub mod reporter;
pub mod status;
pub mod vm;

#[cfg(test)]
pub(crate) mod testing;

pub use diagnostics::{Diagnostic, Severity};
pub use dispatch::{Dispatcher, Operation, StatusRow, Target};
pub use disks::DiskImages;
pub use events::{DiskKind, Event, ShutdownOutcome};
pub use layout::{Layout, VmPaths};
pub use platform::{Accelerator, Arch, HostOs, Platform};
pub use process::{CapturedOutput, CommandLine, HostProcesses, Pid, ProcessControl, SessionEnd};
pub use remote::RemoteShell;
pub use reporter::Reporter;
pub use status::{BootMode, VmStatus};
pub use vm::{ShutdownPolicy, StartOutcome, StopOutcome, VmController};
