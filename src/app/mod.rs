pub mod console;
pub mod display;
pub mod project;
pub mod status;

use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Commands;
use crate::core::{BootMode, Dispatcher, HostProcesses, Operation, Platform, Target};
use crate::error::{Error, Result};

use console::Console;
use display::{RED, colorize, supports_color};

/// Execute one subcommand against the host.
pub fn run(command: Commands, config: Option<PathBuf>, root: Option<PathBuf>) -> Result<()> {
    let testbed = project::load_testbed(config.as_deref(), root)?;
    project::emit_config_warnings(&testbed.warnings);

    let platform = Platform::detect(testbed.host.clone())?;
    platform.check_dependencies()?;

    let processes = HostProcesses::new();
    let dispatcher = Dispatcher::new(&testbed, &platform, &processes);
    let color = supports_color();

    let (operation, target) = match command {
        Commands::Status(args) => return status::handle_status(&dispatcher, &args, color),
        Commands::Start(args) => {
            let mode = if args.disk {
                BootMode::InstalledDisk
            } else {
                BootMode::LiveMedia
            };
            (Operation::Start(mode), args.target.vm)
        }
        Commands::Stop(args) => (Operation::Stop, args.vm),
        Commands::Restart(args) => (Operation::Restart, args.vm),
        Commands::Wait(args) => (
            Operation::Wait {
                timeout: args.timeout.map(Duration::from_secs),
            },
            args.target.vm,
        ),
        Commands::Ssh(args) => (Operation::Ssh, args.vm),
        Commands::Console(args) => (Operation::Console, args.vm),
        Commands::Log(args) => (Operation::Log, args.vm),
        Commands::Create(args) => (Operation::Create, args.vm),
        Commands::Delete(args) => (Operation::Delete, args.vm),
    };

    let mut console = Console::stdout(color);
    dispatcher.dispatch(operation, &Target::parse(&target), &mut console)
}

pub fn report_error(err: &Error) {
    let label = colorize("Error:", RED, supports_color());
    eprintln!("{label} {err}");
}
