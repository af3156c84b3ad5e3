use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{}", describe_missing(tools, help.as_deref()))]
    ToolNotFound {
        tools: Vec<String>,
        help: Option<String>,
    },
    #[error("Unsupported architecture: {machine}")]
    UnsupportedPlatform { machine: String },
    #[error("{vm}: disk not found. Run 'create' first.")]
    DiskNotFound { vm: String },
    #[error("Live ISO not found: {}. Stage the live medium before booting with --live.", path.display())]
    MediaNotFound { path: PathBuf },
    #[error(
        "{vm}: port {port} already in use. \
         Run 'testvm stop' or check for stale QEMU processes."
    )]
    PortInUse { vm: String, port: u16 },
    #[error("{vm}: QEMU failed to start: {message}")]
    LaunchFailed { vm: String, message: String },
    #[error("{vm}: SSH timeout after {}s", elapsed.as_secs())]
    ReadinessTimeout { vm: String, elapsed: Duration },
    #[error("{vm}: console socket not found at {}", socket.display())]
    ConsoleUnavailable { vm: String, socket: PathBuf },
    #[error("{vm}: not running")]
    NotRunning { vm: String },
    #[error(
        "{vm}: no log file at {}. VM was never started or log was deleted.",
        path.display()
    )]
    LogUnavailable { vm: String, path: PathBuf },
    #[error("Unknown VM '{name}'. Available: {}, all", available.join(", "))]
    UnknownVm {
        name: String,
        available: Vec<String>,
    },
    #[error("Specify VM for {command} ({})", available.join(" or "))]
    RequiresSingleTarget {
        command: &'static str,
        available: Vec<String>,
    },
    #[error("{vm}: failed to create disk image {}: {message}", path.display())]
    DiskCommandFailed {
        vm: String,
        path: PathBuf,
        message: String,
    },
    #[error("{vm}: SSH transport failed: {message}")]
    RemoteTransport { vm: String, message: String },
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write state file {}: {source}", path.display())]
    WriteState {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read configuration file at {}: {source}", path.display())]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Configuration at {} could not be parsed: {source}", path.display())]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Configuration at {} is invalid:\n{message}", path.display())]
    InvalidConfig { path: PathBuf, message: String },
    #[error("The configuration path {} does not exist or is not readable.", path.display())]
    ExplicitConfigMissing { path: PathBuf },
}

impl Error {
    /// Every operational failure maps to the same exit status.
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(1)
    }
}

fn describe_missing(tools: &[String], help: Option<&str>) -> String {
    let mut message = match tools {
        [single] => format!("{single} not found"),
        _ => format!("Missing dependencies: {}", tools.join(", ")),
    };
    if let Some(help) = help {
        message.push_str(". ");
        message.push_str(help);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tools_are_listed_together() {
        let err = Error::ToolNotFound {
            tools: vec!["qemu-system-x86_64".into(), "qemu-img".into()],
            help: None,
        };
        assert_eq!(
            err.to_string(),
            "Missing dependencies: qemu-system-x86_64, qemu-img"
        );
    }

    #[test]
    fn single_missing_tool_carries_help() {
        let err = Error::ToolNotFound {
            tools: vec!["socat".into()],
            help: Some("Install with: brew install socat".into()),
        };
        assert_eq!(
            err.to_string(),
            "socat not found. Install with: brew install socat"
        );
    }

    #[test]
    fn dispatch_errors_name_the_valid_targets() {
        let err = Error::UnknownVm {
            name: "huge".into(),
            available: vec!["min".into(), "full".into()],
        };
        assert_eq!(err.to_string(), "Unknown VM 'huge'. Available: min, full, all");

        let err = Error::RequiresSingleTarget {
            command: "ssh",
            available: vec!["min".into(), "full".into()],
        };
        assert_eq!(err.to_string(), "Specify VM for ssh (min or full)");
    }

    #[test]
    fn readiness_timeout_reports_whole_seconds() {
        let err = Error::ReadinessTimeout {
            vm: "min".into(),
            elapsed: Duration::from_millis(120_400),
        };
        assert_eq!(err.to_string(), "min: SSH timeout after 120s");
        assert_eq!(err.exit_code(), ExitCode::from(1));
    }
}
