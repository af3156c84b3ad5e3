use std::fmt;
use std::str::FromStr;

/// How a VM instance was booted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootMode {
    /// Boot from the shared live installation medium.
    LiveMedia,
    /// Boot from the system disk after installation.
    InstalledDisk,
}

impl BootMode {
    /// Token persisted in the boot-mode marker and shown to users.
    pub fn as_str(self) -> &'static str {
        match self {
            BootMode::LiveMedia => "live",
            BootMode::InstalledDisk => "disk",
        }
    }
}

impl fmt::Display for BootMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BootMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(BootMode::LiveMedia),
            "disk" => Ok(BootMode::InstalledDisk),
            other => Err(format!("unknown boot mode `{other}`")),
        }
    }
}

/// Derived state of a VM, computed on demand and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VmStatus {
    Running,
    Stopped,
    NotCreated,
}

impl VmStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VmStatus::Running => "running",
            VmStatus::Stopped => "stopped",
            VmStatus::NotCreated => "not_created",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            VmStatus::Running => "●",
            VmStatus::Stopped => "○",
            VmStatus::NotCreated => "−",
        }
    }

    /// Resolve from the two observations the status is derived from.
    pub fn derive(process_alive: bool, system_disk_exists: bool) -> Self {
        if process_alive {
            VmStatus::Running
        } else if system_disk_exists {
            VmStatus::Stopped
        } else {
            VmStatus::NotCreated
        }
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_mode_tokens_parse_back() {
        assert_eq!("live".parse::<BootMode>(), Ok(BootMode::LiveMedia));
        assert_eq!("disk".parse::<BootMode>(), Ok(BootMode::InstalledDisk));
        assert!("cdrom".parse::<BootMode>().is_err());
        assert!("Live".parse::<BootMode>().is_err());
    }

    #[test]
    fn status_prefers_liveness_over_disk_presence() {
        assert_eq!(VmStatus::derive(true, true), VmStatus::Running);
        assert_eq!(VmStatus::derive(true, false), VmStatus::Running);
        assert_eq!(VmStatus::derive(false, true), VmStatus::Stopped);
        assert_eq!(VmStatus::derive(false, false), VmStatus::NotCreated);
    }
}
