use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::{SshSettings, VmConfig};
use crate::error::{Error, Result};

use super::events::Event;
use super::process::{CapturedOutput, CommandLine, ProcessControl, SessionEnd};
use super::reporter::Reporter;

/// Options for throwaway guests: no host key pinning, fast connect failures and quiet output.
pub const SSH_OPTIONS: [&str; 8] = [
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "ConnectTimeout=2",
    "-o",
    "LogLevel=ERROR",
];

pub const READINESS_INTERVAL: Duration = Duration::from_secs(2);

/// ssh reserves this exit status for its own failures.
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// ssh access to one VM through its forwarded host port.
pub struct RemoteShell<'a> {
    vm: String,
    port: u16,
    key: PathBuf,
    user: String,
    host: String,
    interval: Duration,
    processes: &'a dyn ProcessControl,
}

impl<'a> RemoteShell<'a> {
    pub fn new(
        vm: &VmConfig,
        settings: &SshSettings,
        key: &Path,
        processes: &'a dyn ProcessControl,
    ) -> Self {
        Self {
            vm: vm.name.clone(),
            port: vm.port,
            key: key.to_path_buf(),
            user: settings.user.clone(),
            host: settings.host.clone(),
            interval: READINESS_INTERVAL,
            processes,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn base_command(&self) -> CommandLine {
        CommandLine::new("ssh")
            .arg("-i")
            .arg(self.key.display().to_string())
            .arg("-p")
            .arg(self.port.to_string())
            .args(SSH_OPTIONS)
            .arg(format!("{}@{}", self.user, self.host))
    }

    /// Run a trivial remote command; any failure reads as "not ready".
    pub fn probe(&self) -> bool {
        match self.processes.run(&self.base_command().arg("exit")) {
            Ok(output) => output.success(),
            Err(err) => {
                debug!(vm = %self.vm, error = %err, "ssh probe could not spawn");
                false
            }
        }
    }

    /// Run `command` remotely. Remote non-zero exits are returned as output;
    /// ssh's own failures are errors.
    pub fn execute(&self, command: &str) -> Result<CapturedOutput> {
        let output = self
            .processes
            .run(&self.base_command().arg(command))
            .map_err(|source| Error::Spawn {
                program: "ssh".to_string(),
                source,
            })?;

        match output.code {
            Some(SSH_TRANSPORT_FAILURE) => Err(Error::RemoteTransport {
                vm: self.vm.clone(),
                message: non_empty(output.stderr.trim(), "ssh exited with status 255"),
            }),
            None => Err(Error::RemoteTransport {
                vm: self.vm.clone(),
                message: "ssh terminated by signal".to_string(),
            }),
            Some(_) => Ok(output),
        }
    }

    /// Probe until one succeeds or `timeout` passes. Returns the time spent waiting.
    pub fn wait_until_ready(
        &self,
        timeout: Duration,
        reporter: &mut dyn Reporter,
    ) -> Result<Duration> {
        reporter.report(Event::ReadinessWaiting {
            vm: self.vm.clone(),
        });

        let started = Instant::now();
        while started.elapsed() < timeout {
            if self.probe() {
                let elapsed = started.elapsed();
                reporter.report(Event::ReadinessReached {
                    vm: self.vm.clone(),
                    elapsed_ms: elapsed.as_millis() as u64,
                });
                return Ok(elapsed);
            }
            thread::sleep(self.interval);
            reporter.report(Event::ReadinessAttemptFailed {
                vm: self.vm.clone(),
            });
        }

        let elapsed = started.elapsed();
        reporter.report(Event::ReadinessTimedOut {
            vm: self.vm.clone(),
            elapsed_ms: elapsed.as_millis() as u64,
        });
        Err(Error::ReadinessTimeout {
            vm: self.vm.clone(),
            elapsed,
        })
    }

    /// Interactive login with the terminal attached.
    pub fn interactive(&self) -> Result<SessionEnd> {
        self.processes
            .attach(&self.base_command())
            .map_err(|source| Error::Spawn {
                program: "ssh".to_string(),
                source,
            })
    }
}

fn non_empty(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}
