use std::io::{self, Write};

use crate::core::{Diagnostic, Event, Reporter, Severity, ShutdownOutcome};

use super::display::{GREEN, YELLOW, colorize};

const SEPARATOR_WIDTH: usize = 60;

/// Renders operation events as terminal lines.
pub struct Console<W: Write> {
    out: W,
    color: bool,
    /// A progress line is open and awaiting its terminator.
    progress: bool,
}

impl Console<io::Stdout> {
    pub fn stdout(color: bool) -> Self {
        Self::new(io::stdout(), color)
    }
}

impl<W: Write> Console<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self {
            out,
            color,
            progress: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn info(&mut self, message: &str) {
        self.line(&format!("  {message}"));
    }

    pub fn success(&mut self, message: &str) {
        let mark = colorize("✓", GREEN, self.color);
        self.line(&format!("  {mark} {message}"));
    }

    pub fn warning(&mut self, message: &str) {
        let mark = colorize("!", YELLOW, self.color);
        self.line(&format!("  {mark} {message}"));
    }

    fn diagnostic(&mut self, diagnostic: &Diagnostic) {
        match diagnostic.severity {
            Severity::Warning => self.warning(&diagnostic.message),
            Severity::Info => self.info(&diagnostic.message),
        }
        if let Some(help) = &diagnostic.help {
            self.info(&format!("  {help}"));
        }
    }

    fn line(&mut self, text: &str) {
        self.close_progress();
        let _ = writeln!(self.out, "{text}");
    }

    fn progress_start(&mut self, message: &str) {
        self.close_progress();
        let _ = write!(self.out, "  → {message}");
        let _ = self.out.flush();
        self.progress = true;
    }

    fn progress_tick(&mut self) {
        let _ = write!(self.out, ".");
        let _ = self.out.flush();
    }

    fn progress_end(&mut self, suffix: &str) {
        let _ = writeln!(self.out, " {suffix}");
        self.progress = false;
    }

    fn close_progress(&mut self) {
        if self.progress {
            let _ = writeln!(self.out);
            self.progress = false;
        }
    }
}

impl<W: Write> Reporter for Console<W> {
    fn report(&mut self, event: Event) {
        match event {
            Event::Diagnostic(diagnostic) => self.diagnostic(&diagnostic),
            Event::AlreadyRunning { vm, port, mode } => {
                let detail = match mode {
                    Some(mode) => format!("port {port}, {mode}"),
                    None => format!("port {port}"),
                };
                self.info(&format!("• {vm}: already running ({detail})"));
            }
            Event::VmStarted { vm, port, mode } => {
                self.success(&format!("Started {vm} (port {port}, {mode})"));
            }
            Event::StaleStateCleared { .. } => {}
            Event::ShutdownEscalated { vm, waited_ms, .. } => {
                self.warning(&format!(
                    "{vm}: still running after {:.1}s, sending SIGKILL",
                    waited_ms as f64 / 1000.0
                ));
            }
            Event::VmStopped { vm, outcome } => match outcome {
                ShutdownOutcome::Graceful => self.success(&format!("Stopped {vm}")),
                ShutdownOutcome::Forced => self.success(&format!("Stopped {vm} (forced)")),
            },
            Event::DiskCreated { vm, kind, size } => {
                self.success(&format!("Created {vm} {} disk ({size})", kind.describe()));
            }
            Event::DisksDeleted { vm } => self.success(&format!("Deleted {vm} disks")),
            Event::ReadinessWaiting { vm } => {
                self.progress_start(&format!("Waiting for SSH on {vm}..."));
            }
            Event::ReadinessAttemptFailed { .. } => self.progress_tick(),
            Event::ReadinessReached { elapsed_ms, .. } => {
                self.progress_end(&format!("ready ({}s)", elapsed_ms / 1000));
            }
            Event::ReadinessTimedOut { .. } => self.progress_end("timeout!"),
            Event::SessionAttaching { title, .. } => {
                self.line(&title);
                self.line(&"-".repeat(SEPARATOR_WIDTH));
            }
            Event::SessionEnded { interrupted, .. } => {
                if interrupted {
                    self.line("");
                }
            }
        }
    }
}
