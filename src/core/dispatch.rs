use std::fmt;
use std::time::{Duration, SystemTime};

use crate::config::{ALL_TARGET, TestbedConfig, VmConfig};
use crate::error::{Error, Result};

use super::layout::Layout;
use super::platform::Platform;
use super::process::{Pid, ProcessControl};
use super::reporter::Reporter;
use super::status::{BootMode, VmStatus};
use super::vm::{ShutdownPolicy, VmController};

/// Per-VM action selected by a subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Start(BootMode),
    Stop,
    Restart,
    /// `None` uses the configured readiness timeout.
    Wait { timeout: Option<Duration> },
    Ssh,
    Console,
    Log,
    Create,
    Delete,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Start(_) => "start",
            Operation::Stop => "stop",
            Operation::Restart => "restart",
            Operation::Wait { .. } => "wait",
            Operation::Ssh => "ssh",
            Operation::Console => "console",
            Operation::Log => "log",
            Operation::Create => "create",
            Operation::Delete => "delete",
        }
    }

    /// Interactive operations take over the terminal and cannot fan out.
    pub fn single_target(&self) -> bool {
        matches!(self, Operation::Ssh | Operation::Console | Operation::Log)
    }

    fn execute(
        &self,
        vm: &VmController<'_>,
        config: &TestbedConfig,
        reporter: &mut dyn Reporter,
    ) -> Result<()> {
        match *self {
            Operation::Start(mode) => vm.start(mode, reporter).map(drop),
            Operation::Stop => vm.stop(reporter).map(drop),
            Operation::Restart => vm.restart(reporter).map(drop),
            Operation::Wait { timeout } => vm
                .wait_ssh(timeout.unwrap_or(config.ssh.wait_timeout), reporter)
                .map(drop),
            Operation::Ssh => vm.ssh_session(reporter),
            Operation::Console => vm.console_session(reporter),
            Operation::Log => vm.follow_log(reporter),
            Operation::Create => vm.create_disks(reporter),
            Operation::Delete => {
                vm.delete_disks(reporter);
                Ok(())
            }
        }
    }
}

/// Symbolic target from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    Vm(String),
}

impl Target {
    pub fn parse(value: &str) -> Self {
        if value == ALL_TARGET {
            Target::All
        } else {
            Target::Vm(value.to_string())
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::All => f.write_str(ALL_TARGET),
            Target::Vm(name) => f.write_str(name),
        }
    }
}

/// One line of the status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub name: String,
    pub status: VmStatus,
    pub port: u16,
    /// Present only while running.
    pub mode: Option<BootMode>,
    pub pid: Option<Pid>,
    pub started_at: Option<SystemTime>,
}

impl StatusRow {
    pub fn uptime(&self) -> Option<Duration> {
        SystemTime::now().duration_since(self.started_at?).ok()
    }
}

/// Routes operations to the VMs a target names.
pub struct Dispatcher<'a> {
    config: &'a TestbedConfig,
    platform: &'a Platform,
    layout: Layout,
    processes: &'a dyn ProcessControl,
    shutdown: ShutdownPolicy,
    readiness_interval: Option<Duration>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        config: &'a TestbedConfig,
        platform: &'a Platform,
        processes: &'a dyn ProcessControl,
    ) -> Self {
        Self {
            config,
            platform,
            layout: Layout::from_config(config),
            processes,
            shutdown: ShutdownPolicy::default(),
            readiness_interval: None,
        }
    }

    pub fn with_shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown = policy;
        self
    }

    pub fn with_readiness_interval(mut self, interval: Duration) -> Self {
        self.readiness_interval = Some(interval);
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn controller<'s>(&'s self, vm: &'s VmConfig) -> VmController<'s> {
        let controller = VmController::new(
            vm,
            self.platform,
            &self.layout,
            &self.config.ssh,
            self.processes,
        )
        .with_shutdown_policy(self.shutdown);
        match self.readiness_interval {
            Some(interval) => controller.with_readiness_interval(interval),
            None => controller,
        }
    }

    /// Expand a target to VM definitions in registry order.
    pub fn resolve(&self, target: &Target) -> Result<Vec<&'a VmConfig>> {
        let registry = &self.config.registry;
        match target {
            Target::All => Ok(registry.iter().collect()),
            Target::Vm(name) => registry
                .get(name)
                .map(|vm| vec![vm])
                .ok_or_else(|| Error::UnknownVm {
                    name: name.clone(),
                    available: registry.names(),
                }),
        }
    }

    /// Run `operation` on every VM the target names, stopping at the first failure.
    pub fn dispatch(
        &self,
        operation: Operation,
        target: &Target,
        reporter: &mut dyn Reporter,
    ) -> Result<()> {
        if operation.single_target() && *target == Target::All {
            return Err(Error::RequiresSingleTarget {
                command: operation.name(),
                available: self.config.registry.names(),
            });
        }

        for vm in self.resolve(target)? {
            let controller = self.controller(vm);
            operation.execute(&controller, self.config, reporter)?;
        }
        Ok(())
    }

    pub fn status(&self) -> Vec<StatusRow> {
        self.config
            .registry
            .iter()
            .map(|vm| {
                let controller = self.controller(vm);
                let status = controller.status();
                let running = status == VmStatus::Running;
                StatusRow {
                    name: vm.name.clone(),
                    status,
                    port: vm.port,
                    mode: running.then(|| controller.boot_mode()).flatten(),
                    pid: running.then(|| controller.pid()).flatten(),
                    started_at: controller.started_at(),
                }
            })
            .collect()
    }
}
