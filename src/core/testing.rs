//! In-memory `ProcessControl` used by unit tests.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io;
use std::path::PathBuf;

use super::process::{CapturedOutput, CommandLine, Pid, ProcessControl, SessionEnd};

#[derive(Debug)]
pub(crate) struct FakeState {
    pub next_pid: Pid,
    pub alive: HashSet<Pid>,
    /// Processes that ignore SIGTERM.
    pub stubborn: HashSet<Pid>,
    pub launches: Vec<CommandLine>,
    pub runs: Vec<CommandLine>,
    pub attached: Vec<CommandLine>,
    pub terminated: Vec<Pid>,
    pub killed: Vec<Pid>,
    /// Number of `is_running` calls.
    pub liveness_polls: usize,
    /// `liveness_polls` observed by each `kill`.
    pub polls_at_kill: Vec<usize>,
    /// When set, launches fail with this stderr.
    pub launch_failure: Option<String>,
    /// When set, a successful launch does not write its pid file.
    pub skip_pidfile: bool,
    /// New hypervisor processes ignore SIGTERM.
    pub launch_stubborn: bool,
    /// When set, `qemu-img create` fails with this stderr.
    pub disk_failure: Option<String>,
    pub ssh_reachable: bool,
    /// Canned ssh results consumed before falling back to `ssh_reachable`.
    pub ssh_responses: VecDeque<CapturedOutput>,
    pub programs: HashSet<String>,
    pub interrupt_sessions: bool,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            next_pid: 40_000,
            alive: HashSet::new(),
            stubborn: HashSet::new(),
            launches: Vec::new(),
            runs: Vec::new(),
            attached: Vec::new(),
            terminated: Vec::new(),
            killed: Vec::new(),
            liveness_polls: 0,
            polls_at_kill: Vec::new(),
            launch_failure: None,
            skip_pidfile: false,
            launch_stubborn: false,
            disk_failure: None,
            ssh_reachable: false,
            ssh_responses: VecDeque::new(),
            programs: HashSet::new(),
            interrupt_sessions: false,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeProcesses {
    state: RefCell<FakeState>,
}

impl FakeProcesses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.borrow_mut())
    }

    pub fn launch_count(&self) -> usize {
        self.with(|state| state.launches.len())
    }

    pub fn last_launch(&self) -> Option<CommandLine> {
        self.with(|state| state.launches.last().cloned())
    }

    /// Simulate the hypervisor dying behind our back.
    pub fn crash(&self, pid: Pid) {
        self.with(|state| state.alive.remove(&pid));
    }
}

impl ProcessControl for FakeProcesses {
    fn is_running(&self, pid: Pid) -> bool {
        self.with(|state| {
            state.liveness_polls += 1;
            state.alive.contains(&pid)
        })
    }

    fn terminate(&self, pid: Pid) -> bool {
        self.with(|state| {
            if !state.alive.contains(&pid) {
                return false;
            }
            state.terminated.push(pid);
            if !state.stubborn.contains(&pid) {
                state.alive.remove(&pid);
            }
            true
        })
    }

    fn kill(&self, pid: Pid) {
        self.with(|state| {
            state.killed.push(pid);
            state.polls_at_kill.push(state.liveness_polls);
            state.alive.remove(&pid);
        });
    }

    fn launch(&self, command: &CommandLine) -> io::Result<CapturedOutput> {
        self.with(|state| {
            state.launches.push(command.clone());
            if let Some(stderr) = &state.launch_failure {
                return Ok(CapturedOutput {
                    code: Some(1),
                    stdout: String::new(),
                    stderr: stderr.clone(),
                });
            }

            let pid = state.next_pid;
            state.next_pid += 1;
            state.alive.insert(pid);
            if state.launch_stubborn {
                state.stubborn.insert(pid);
            }
            if !state.skip_pidfile {
                if let Some(pidfile) = command.value_after("-pidfile") {
                    fs::write(pidfile, format!("{pid}\n"))?;
                }
            }
            Ok(CapturedOutput {
                code: Some(0),
                ..CapturedOutput::default()
            })
        })
    }

    fn run(&self, command: &CommandLine) -> io::Result<CapturedOutput> {
        self.with(|state| {
            state.runs.push(command.clone());
            let args = command.arguments();

            let creates_image = command.program().ends_with("qemu-img")
                && args.first().map(String::as_str) == Some("create");
            if creates_image {
                if let Some(stderr) = &state.disk_failure {
                    return Ok(CapturedOutput {
                        code: Some(1),
                        stdout: String::new(),
                        stderr: stderr.clone(),
                    });
                }
                if let Some(image) = args.get(3) {
                    fs::write(image, "QFI")?;
                }
                return Ok(CapturedOutput {
                    code: Some(0),
                    ..CapturedOutput::default()
                });
            }

            if command.program() == "ssh" {
                if let Some(response) = state.ssh_responses.pop_front() {
                    return Ok(response);
                }
                let code = if state.ssh_reachable { 0 } else { 255 };
                return Ok(CapturedOutput {
                    code: Some(code),
                    ..CapturedOutput::default()
                });
            }

            Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("fake has no program {}", command.program()),
            ))
        })
    }

    fn attach(&self, command: &CommandLine) -> io::Result<SessionEnd> {
        self.with(|state| {
            state.attached.push(command.clone());
            Ok(SessionEnd {
                code: Some(0),
                interrupted: state.interrupt_sessions,
            })
        })
    }

    fn find_program(&self, name: &str) -> Option<PathBuf> {
        self.with(|state| {
            state
                .programs
                .contains(name)
                .then(|| PathBuf::from("/usr/bin").join(name))
        })
    }
}
