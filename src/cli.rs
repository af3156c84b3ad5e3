use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

const VERSION: &str = env!("TESTVM_VERSION");

/// Top-level CLI definition for the `testvm` tool.
#[derive(Debug, Parser)]
#[command(
    name = "testvm",
    version = VERSION,
    about = "Manage disposable QEMU virtual machines for CoreOS integration tests.",
    after_help = "VM is one of the configured names (min and full by default) or `all`."
)]
pub struct Cli {
    /// Path to an explicit configuration file. Defaults to `testvm.toml` in the working directory.
    #[arg(
        global = true,
        short,
        long = "config",
        value_name = "PATH",
        help = "Load configuration from PATH instead of ./testvm.toml"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        global = true,
        long,
        value_name = "DIR",
        help = "State directory holding disks/, logs/, keys/ and live.iso (default: .testenv)"
    )]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the state of every configured VM.
    Status(StatusArgs),
    /// Boot VMs from the live medium or the installed disk.
    Start(StartArgs),
    /// Stop VMs. Waits up to 10s for a graceful exit before SIGKILL.
    Stop(TargetArgs),
    /// Stop if running, then boot from the installed disk.
    Restart(TargetArgs),
    /// Block until SSH answers or the timeout passes.
    Wait(WaitArgs),
    /// Open an interactive SSH session.
    Ssh(SingleTargetArgs),
    /// Attach to the serial console.
    Console(SingleTargetArgs),
    /// Follow the serial console log.
    Log(SingleTargetArgs),
    /// Recreate disk images, discarding existing ones.
    Create(TargetArgs),
    /// Delete disk images and runtime state.
    Delete(TargetArgs),
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[arg(long, help = "Emit machine-readable JSON instead of a table")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct TargetArgs {
    #[arg(value_name = "VM", default_value = "all")]
    pub vm: String,
}

#[derive(Debug, Args)]
pub struct SingleTargetArgs {
    #[arg(value_name = "VM")]
    pub vm: String,
}

#[derive(Debug, Args)]
pub struct StartArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(long, conflicts_with = "live", help = "Boot from the installed system disk")]
    pub disk: bool,

    #[arg(long, help = "Boot from the live medium (default)")]
    pub live: bool,
}

#[derive(Debug, Args)]
pub struct WaitArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(
        long,
        value_name = "SECONDS",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Give up after SECONDS (default from configuration, 120)"
    )]
    pub timeout: Option<u64>,
}
