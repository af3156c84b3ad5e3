use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, warn};

use crate::config::{LIVE_SSH_PORT, SshSettings, VmConfig};
use crate::error::{Error, Result};

use super::diagnostics::Diagnostic;
use super::disks::DiskImages;
use super::events::{Event, ShutdownOutcome};
use super::host;
use super::layout::{Layout, VmPaths};
use super::markers;
use super::platform::Platform;
use super::process::{CapturedOutput, CommandLine, Pid, ProcessControl};
use super::remote::RemoteShell;
use super::reporter::Reporter;
use super::status::{BootMode, VmStatus};

/// Stderr fragment QEMU prints when a host forward cannot bind.
const HOSTFWD_FAILURE: &str = "Could not set up host forwarding rule";

pub const PIDFILE_WAIT: Duration = Duration::from_secs(5);

const PIDFILE_POLL: Duration = Duration::from_millis(100);

/// Bounds on the graceful phase of `stop` before escalating to SIGKILL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownPolicy {
    pub poll_interval: Duration,
    pub attempts: u32,
    /// Pause after SIGKILL before markers are cleared.
    pub kill_grace: Duration,
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            attempts: 20,
            kill_grace: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownPhase {
    Graceful { remaining: u32 },
    Forced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning { mode: Option<BootMode> },
    Launched { mode: BootMode, internal_port: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    /// The pid marker named a dead process; markers were cleared.
    StaleCleared { pid: Pid },
    Stopped { pid: Pid, outcome: ShutdownOutcome },
}

/// Lifecycle of one VM. All state lives in marker files, so every call re-reads it.
pub struct VmController<'a> {
    config: &'a VmConfig,
    platform: &'a Platform,
    layout: &'a Layout,
    processes: &'a dyn ProcessControl,
    paths: VmPaths,
    disks: DiskImages<'a>,
    shell: RemoteShell<'a>,
    shutdown: ShutdownPolicy,
    pidfile_wait: Duration,
}

impl<'a> VmController<'a> {
    pub fn new(
        config: &'a VmConfig,
        platform: &'a Platform,
        layout: &'a Layout,
        ssh: &SshSettings,
        processes: &'a dyn ProcessControl,
    ) -> Self {
        Self {
            config,
            platform,
            layout,
            processes,
            paths: layout.vm_paths(config),
            disks: DiskImages::new(config, layout, processes),
            shell: RemoteShell::new(config, ssh, layout.ssh_key(), processes),
            shutdown: ShutdownPolicy::default(),
            pidfile_wait: PIDFILE_WAIT,
        }
    }

    pub fn with_shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown = policy;
        self
    }

    pub fn with_readiness_interval(mut self, interval: Duration) -> Self {
        self.shell = self.shell.with_interval(interval);
        self
    }

    pub fn with_pidfile_wait(mut self, wait: Duration) -> Self {
        self.pidfile_wait = wait;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &VmConfig {
        self.config
    }

    pub fn paths(&self) -> &VmPaths {
        &self.paths
    }

    /// Pid from the marker, whether or not the process is alive.
    pub fn pid(&self) -> Option<Pid> {
        markers::read_pid(&self.paths.pid_file)
    }

    pub fn is_running(&self) -> bool {
        self.pid().is_some_and(|pid| self.processes.is_running(pid))
    }

    pub fn disk_exists(&self) -> bool {
        self.disks.exists()
    }

    pub fn status(&self) -> VmStatus {
        VmStatus::derive(self.is_running(), self.disk_exists())
    }

    pub fn boot_mode(&self) -> Option<BootMode> {
        markers::read_mode(&self.paths.state_file)
    }

    /// Launch time of a running instance, taken from the pid marker.
    pub fn started_at(&self) -> Option<SystemTime> {
        if !self.is_running() {
            return None;
        }
        fs::metadata(&self.paths.pid_file).ok()?.modified().ok()
    }

    /// Full hypervisor argument vector and the guest port the host port forwards to.
    pub fn build_command(&self, mode: BootMode) -> Result<(CommandLine, u16)> {
        let qemu = self.platform.qemu_binary()?;
        let firmware = self.platform.firmware_path()?;
        let vm = self.config;
        let paths = &self.paths;

        let internal_port = match mode {
            BootMode::LiveMedia => LIVE_SSH_PORT,
            BootMode::InstalledDisk => vm.ssh_port,
        };

        let mut command = CommandLine::for_path(&qemu)
            .arg("-name")
            .arg(&vm.name)
            .arg("-machine")
            .arg(format!(
                "{},accel={}",
                self.platform.arch().machine_type(),
                self.platform.accelerator().as_str()
            ))
            .args(["-cpu", "host"])
            .arg("-m")
            .arg(vm.memory_mib.to_string())
            .arg("-smp")
            .arg(vm.cpus.to_string())
            .arg("-drive")
            .arg(format!(
                "if=pflash,format=raw,readonly=on,file={}",
                firmware.display()
            ))
            .arg("-drive")
            .arg(virtio_drive(&paths.system_disk));

        command = match mode {
            BootMode::LiveMedia => command
                .arg("-cdrom")
                .arg(self.layout.live_medium().display().to_string())
                .args(["-boot", "d"]),
            BootMode::InstalledDisk => command.args(["-boot", "c"]),
        };

        command = command
            .arg("-netdev")
            .arg(format!("user,id=net0,hostfwd=tcp::{}-:{internal_port}", vm.port))
            .arg("-device")
            .arg(format!("virtio-net-pci,netdev=net0,mac={}", vm.mac))
            .args(["-display", "none"])
            .arg("-serial")
            .arg(format!("file:{}", paths.log_file.display()))
            .arg("-serial")
            .arg(format!(
                "unix:{},server=on,wait=off",
                paths.console_socket.display()
            ))
            .arg("-daemonize")
            .arg("-pidfile")
            .arg(paths.pid_file.display().to_string());

        if let Some(data) = paths.data_disk.as_deref().filter(|path| path.exists()) {
            command = command.arg("-drive").arg(virtio_drive(data));
        }

        if let Some(mac) = &vm.second_nic_mac {
            command = command
                .args(["-netdev", "user,id=net1"])
                .arg("-device")
                .arg(format!("virtio-net-pci,netdev=net1,mac={mac}"));
        }

        Ok((command, internal_port))
    }

    pub fn start(&self, mode: BootMode, reporter: &mut dyn Reporter) -> Result<StartOutcome> {
        if self.is_running() {
            let current = self.boot_mode();
            reporter.report(Event::AlreadyRunning {
                vm: self.config.name.clone(),
                port: self.config.port,
                mode: current,
            });
            return Ok(StartOutcome::AlreadyRunning { mode: current });
        }

        if !self.disk_exists() {
            return Err(Error::DiskNotFound {
                vm: self.config.name.clone(),
            });
        }

        if mode == BootMode::LiveMedia && !self.layout.live_medium().is_file() {
            return Err(Error::MediaNotFound {
                path: self.layout.live_medium().to_path_buf(),
            });
        }

        ensure_dir(&self.layout.logs_dir())?;
        ensure_dir(&self.layout.disks_dir())?;

        if let Some(warning) = host::memory_headroom(self.config) {
            reporter.report(Event::Diagnostic(warning));
        }

        let (command, internal_port) = self.build_command(mode)?;

        // Markers left by a crashed instance: QEMU refuses to bind a stale socket,
        // and a stale pid file would pass for a fresh one.
        markers::clear(&self.paths.console_socket);
        if let Some(stale) = self.pid() {
            reporter.report(Event::Diagnostic(Diagnostic::info(format!(
                "{}: discarding pid marker {stale} left by a previous run",
                self.config.name
            ))));
            markers::clear(&self.paths.pid_file);
        }

        let output = self
            .processes
            .launch(&command)
            .map_err(|source| Error::Spawn {
                program: command.program().to_string(),
                source,
            })?;

        if !output.success() {
            markers::clear(&self.paths.pid_file);
            return Err(self.launch_error(&output));
        }

        if !self.wait_for_pid_marker() {
            return Err(Error::LaunchFailed {
                vm: self.config.name.clone(),
                message: format!(
                    "pid file {} was not created within {}s",
                    self.paths.pid_file.display(),
                    self.pidfile_wait.as_secs()
                ),
            });
        }

        markers::write_mode(&self.paths.state_file, mode)?;
        info!(vm = %self.config.name, pid = ?self.pid(), mode = %mode, "vm launched");
        reporter.report(Event::VmStarted {
            vm: self.config.name.clone(),
            port: self.config.port,
            mode,
        });

        Ok(StartOutcome::Launched {
            mode,
            internal_port,
        })
    }

    fn launch_error(&self, output: &CapturedOutput) -> Error {
        let stderr = output.stderr.trim();
        if stderr.contains(HOSTFWD_FAILURE) {
            return Error::PortInUse {
                vm: self.config.name.clone(),
                port: self.config.port,
            };
        }
        Error::LaunchFailed {
            vm: self.config.name.clone(),
            message: if stderr.is_empty() {
                match output.code {
                    Some(code) => format!("exited with status {code}"),
                    None => "terminated by signal".to_string(),
                }
            } else {
                stderr.to_string()
            },
        }
    }

    fn wait_for_pid_marker(&self) -> bool {
        let start = Instant::now();
        while start.elapsed() < self.pidfile_wait {
            if self.pid().is_some() {
                return true;
            }
            thread::sleep(PIDFILE_POLL);
        }
        self.pid().is_some()
    }

    pub fn stop(&self, reporter: &mut dyn Reporter) -> Result<StopOutcome> {
        let Some(pid) = self.pid() else {
            return Ok(StopOutcome::NotRunning);
        };

        if !self.processes.is_running(pid) {
            debug!(vm = %self.config.name, pid, "clearing stale pid marker");
            self.clear_runtime_markers();
            reporter.report(Event::StaleStateCleared {
                vm: self.config.name.clone(),
                pid,
            });
            return Ok(StopOutcome::StaleCleared { pid });
        }

        self.processes.terminate(pid);
        let outcome = self.await_exit(pid, reporter);
        self.clear_runtime_markers();

        reporter.report(Event::VmStopped {
            vm: self.config.name.clone(),
            outcome,
        });
        Ok(StopOutcome::Stopped { pid, outcome })
    }

    fn await_exit(&self, pid: Pid, reporter: &mut dyn Reporter) -> ShutdownOutcome {
        let started = Instant::now();
        let mut phase = ShutdownPhase::Graceful {
            remaining: self.shutdown.attempts,
        };

        loop {
            match phase {
                ShutdownPhase::Graceful { remaining } => {
                    if !self.processes.is_running(pid) {
                        return ShutdownOutcome::Graceful;
                    }
                    phase = if remaining == 0 {
                        ShutdownPhase::Forced
                    } else {
                        thread::sleep(self.shutdown.poll_interval);
                        ShutdownPhase::Graceful {
                            remaining: remaining - 1,
                        }
                    };
                }
                ShutdownPhase::Forced => {
                    reporter.report(Event::ShutdownEscalated {
                        vm: self.config.name.clone(),
                        pid,
                        waited_ms: started.elapsed().as_millis() as u64,
                    });
                    self.processes.kill(pid);
                    thread::sleep(self.shutdown.kill_grace);
                    if self.processes.is_running(pid) {
                        warn!(vm = %self.config.name, pid, "process still alive after SIGKILL");
                    }
                    return ShutdownOutcome::Forced;
                }
            }
        }
    }

    /// Stop if running, then boot from the installed disk whatever the previous mode was.
    pub fn restart(&self, reporter: &mut dyn Reporter) -> Result<StartOutcome> {
        if self.is_running() {
            self.stop(reporter)?;
        }
        self.start(BootMode::InstalledDisk, reporter)
    }

    pub fn wait_ssh(&self, timeout: Duration, reporter: &mut dyn Reporter) -> Result<Duration> {
        self.shell.wait_until_ready(timeout, reporter)
    }

    pub fn ssh_run(&self, command: &str) -> Result<CapturedOutput> {
        self.require_running()?;
        self.shell.execute(command)
    }

    pub fn ssh_session(&self, reporter: &mut dyn Reporter) -> Result<()> {
        self.require_running()?;
        let end = self.shell.interactive()?;
        reporter.report(Event::SessionEnded {
            vm: self.config.name.clone(),
            interrupted: end.interrupted,
        });
        Ok(())
    }

    pub fn console_session(&self, reporter: &mut dyn Reporter) -> Result<()> {
        self.require_running()?;

        let socat = self
            .processes
            .find_program("socat")
            .ok_or_else(|| Error::ToolNotFound {
                tools: vec!["socat".to_string()],
                help: Some(
                    "Install with: brew install socat (or your distribution's socat package)"
                        .to_string(),
                ),
            })?;

        if !self.paths.console_socket.exists() {
            return Err(Error::ConsoleUnavailable {
                vm: self.config.name.clone(),
                socket: self.paths.console_socket.clone(),
            });
        }

        let command = CommandLine::for_path(&socat)
            .arg("-,raw,echo=0,escape=0x0f")
            .arg(format!("unix-connect:{}", self.paths.console_socket.display()));
        self.attach(
            &command,
            format!("Connecting to {} console (Ctrl+O to exit)", self.config.name),
            reporter,
        )
    }

    pub fn follow_log(&self, reporter: &mut dyn Reporter) -> Result<()> {
        if !self.paths.log_file.is_file() {
            return Err(Error::LogUnavailable {
                vm: self.config.name.clone(),
                path: self.paths.log_file.clone(),
            });
        }

        let command = CommandLine::new("tail")
            .arg("-f")
            .arg(self.paths.log_file.display().to_string());
        self.attach(
            &command,
            format!("Following {} (Ctrl+C to exit)", self.paths.log_file.display()),
            reporter,
        )
    }

    fn attach(
        &self,
        command: &CommandLine,
        title: String,
        reporter: &mut dyn Reporter,
    ) -> Result<()> {
        reporter.report(Event::SessionAttaching {
            vm: self.config.name.clone(),
            title,
        });
        let end = self
            .processes
            .attach(command)
            .map_err(|source| Error::Spawn {
                program: command.program().to_string(),
                source,
            })?;
        debug!(vm = %self.config.name, code = ?end.code, "session ended");
        reporter.report(Event::SessionEnded {
            vm: self.config.name.clone(),
            interrupted: end.interrupted,
        });
        Ok(())
    }

    /// Recreate disk images. Markers from an earlier instance no longer describe the new disks.
    pub fn create_disks(&self, reporter: &mut dyn Reporter) -> Result<()> {
        let qemu_img = self.platform.qemu_img()?;
        markers::clear(&self.paths.pid_file);
        markers::clear(&self.paths.state_file);
        self.disks.create(&qemu_img, reporter)
    }

    pub fn delete_disks(&self, reporter: &mut dyn Reporter) {
        self.disks.delete();
        self.clear_runtime_markers();
        reporter.report(Event::DisksDeleted {
            vm: self.config.name.clone(),
        });
    }

    fn require_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::NotRunning {
                vm: self.config.name.clone(),
            })
        }
    }

    fn clear_runtime_markers(&self) {
        markers::clear(&self.paths.pid_file);
        markers::clear(&self.paths.state_file);
        markers::clear(&self.paths.console_socket);
    }
}

fn virtio_drive(path: &Path) -> String {
    format!("file={},if=virtio,format=qcow2", path.display())
}

fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| Error::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}
