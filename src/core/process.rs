use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

use libc::{self, pid_t};
use tracing::{debug, warn};

pub type Pid = pid_t;

/// Full argument vector for an external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn for_path(program: &Path) -> Self {
        Self::new(program.display().to_string())
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Value following the first occurrence of `flag`.
    pub fn value_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|idx| self.args.get(idx + 1))
            .map(String::as_str)
    }

    /// Every value following an occurrence of `flag`.
    pub fn values_after<'a>(&'a self, flag: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.args
            .windows(2)
            .filter(move |pair| pair[0] == flag)
            .map(|pair| pair[1].as_str())
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// How an interactive session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEnd {
    pub code: Option<i32>,
    /// A keyboard interrupt arrived while the session was attached.
    pub interrupted: bool,
}

/// Spawning, signaling and liveness checks for OS processes.
pub trait ProcessControl {
    /// Whether `pid` exists and is signalable. "No such process" is `false`, never an error.
    fn is_running(&self, pid: Pid) -> bool;

    /// Request graceful termination. `false` when the process is already gone.
    fn terminate(&self, pid: Pid) -> bool;

    /// Forceful termination, best-effort.
    fn kill(&self, pid: Pid);

    /// Run the hypervisor. It daemonizes, so this returns once its setup handshake is done.
    fn launch(&self, command: &CommandLine) -> io::Result<CapturedOutput>;

    /// Run a command to completion with captured output.
    fn run(&self, command: &CommandLine) -> io::Result<CapturedOutput>;

    /// Hand the terminal to a command until it exits for any reason.
    fn attach(&self, command: &CommandLine) -> io::Result<SessionEnd>;

    /// Look a program up on PATH.
    fn find_program(&self, name: &str) -> Option<PathBuf>;
}

/// `ProcessControl` backed by the host OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostProcesses;

impl HostProcesses {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessControl for HostProcesses {
    fn is_running(&self, pid: Pid) -> bool {
        if pid <= 0 {
            return false;
        }
        let alive = unsafe { libc::kill(pid, 0) };
        if alive == 0 {
            return true;
        }
        // EPERM: the process exists but belongs to someone else.
        last_errno() == libc::EPERM
    }

    fn terminate(&self, pid: Pid) -> bool {
        if pid <= 0 {
            return false;
        }
        let term = unsafe { libc::kill(pid, libc::SIGTERM) };
        if term != 0 {
            let errno = last_errno();
            if errno != libc::ESRCH {
                warn!(pid, errno, "failed to send SIGTERM");
            }
            return false;
        }
        debug!(pid, "sent SIGTERM");
        true
    }

    fn kill(&self, pid: Pid) {
        if pid <= 0 {
            return;
        }
        let res = unsafe { libc::kill(pid, libc::SIGKILL) };
        debug!(pid, delivered = res == 0, "sent SIGKILL");
    }

    fn launch(&self, command: &CommandLine) -> io::Result<CapturedOutput> {
        debug!(command = %command, "launching hypervisor");
        self.run(command)
    }

    fn run(&self, command: &CommandLine) -> io::Result<CapturedOutput> {
        let output = command.to_command().stdin(Stdio::null()).output()?;
        Ok(CapturedOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn attach(&self, command: &CommandLine) -> io::Result<SessionEnd> {
        install_interrupt_handler();
        INTERRUPTED.store(false, Ordering::SeqCst);
        ATTACHED.store(true, Ordering::SeqCst);
        let status = command.to_command().status();
        ATTACHED.store(false, Ordering::SeqCst);
        let status = status?;
        Ok(SessionEnd {
            code: status.code(),
            interrupted: INTERRUPTED.swap(false, Ordering::SeqCst),
        })
    }

    fn find_program(&self, name: &str) -> Option<PathBuf> {
        find_executable(&[name])
    }
}

static ATTACHED: AtomicBool = AtomicBool::new(false);
static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static HANDLER: Once = Once::new();

/// While a session is attached the child owns Ctrl-C; otherwise it ends the invocation.
fn install_interrupt_handler() {
    HANDLER.call_once(|| {
        let installed = ctrlc::set_handler(|| {
            if ATTACHED.load(Ordering::SeqCst) {
                INTERRUPTED.store(true, Ordering::SeqCst);
            } else {
                std::process::exit(130);
            }
        });
        if let Err(err) = installed {
            warn!(error = %err, "could not install interrupt handler");
        }
    });
}

fn last_errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or_default()
}

pub fn find_executable(candidates: &[&str]) -> Option<PathBuf> {
    for candidate in candidates {
        let path = Path::new(candidate);
        if path.components().count() > 1 && path.is_file() {
            return Some(path.to_path_buf());
        }
    }

    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        for candidate in candidates {
            let full = dir.join(candidate);
            if full.is_file() {
                return Some(full);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn command_line_exposes_flag_values() {
        let command = CommandLine::new("qemu-system-x86_64")
            .args(["-name", "min", "-drive", "a", "-drive", "b"])
            .arg("-daemonize");
        assert_eq!(command.value_after("-name"), Some("min"));
        assert_eq!(command.value_after("-daemonize"), None);
        assert_eq!(command.values_after("-drive").collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(
            command.to_string(),
            "qemu-system-x86_64 -name min -drive a -drive b -daemonize"
        );
    }

    #[test]
    fn own_process_is_running() {
        let processes = HostProcesses::new();
        assert!(processes.is_running(std::process::id() as Pid));
        assert!(!processes.is_running(0));
        assert!(!processes.is_running(-1));
    }

    #[test]
    fn exited_child_is_not_running_and_signals_are_harmless() {
        let processes = HostProcesses::new();
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id() as Pid;
        child.wait().unwrap();

        assert!(!processes.is_running(pid));
        assert!(!processes.terminate(pid));
        processes.kill(pid);
    }

    #[test]
    fn terminate_stops_a_live_child() {
        let processes = HostProcesses::new();
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id() as Pid;

        assert!(processes.is_running(pid));
        assert!(processes.terminate(pid));
        let status = child.wait().unwrap();
        assert!(!status.success());
        assert!(!processes.is_running(pid));
    }

    #[test]
    fn run_captures_exit_code_and_streams() {
        let processes = HostProcesses::new();
        let output = processes
            .run(&CommandLine::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]))
            .unwrap();
        assert_eq!(output.code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[test]
    fn run_reports_missing_program_as_io_error() {
        let processes = HostProcesses::new();
        let err = processes
            .run(&CommandLine::new("definitely-not-a-real-binary-xyz"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn find_executable_accepts_explicit_paths_and_searches_path() {
        let dir = tempdir().unwrap();
        let tool = dir.path().join("socat");
        fs::write(&tool, "#!/bin/sh\n").unwrap();
        let explicit = tool.display().to_string();

        assert_eq!(find_executable(&[explicit.as_str()]), Some(tool.clone()));
        assert!(find_executable(&["sh"]).is_some());
        assert_eq!(find_executable(&["definitely-not-a-real-binary-xyz"]), None);
    }
}
