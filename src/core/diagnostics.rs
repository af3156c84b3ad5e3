/// Severity level of a diagnostic emitted by testvm operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Informational message with no required action.
    Info,
    /// Warning that signals potential issues but allows the workflow to continue.
    Warning,
}

/// Structured diagnostic surfaced alongside operation progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// Optional hint to help callers remediate the issue.
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn new<S: Into<String>>(severity: Severity, message: S) -> Self {
        Self {
            severity,
            message: message.into(),
            help: None,
        }
    }

    pub fn info<S: Into<String>>(message: S) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn warning<S: Into<String>>(message: S) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn with_help<S: Into<String>>(mut self, help: S) -> Self {
        self.help = Some(help.into());
        self
    }
}
