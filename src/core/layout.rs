use std::path::{Path, PathBuf};

use crate::config::{TestbedConfig, VmConfig};

/// On-disk arrangement of the test environment rooted at the state directory.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    ssh_key: PathBuf,
    live_medium: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            ssh_key: root.join("keys").join("test_key"),
            live_medium: root.join("live.iso"),
            root,
        }
    }

    pub fn from_config(config: &TestbedConfig) -> Self {
        let mut layout = Self::new(&config.state_dir);
        if let Some(key) = &config.ssh.key {
            layout.ssh_key = key.clone();
        }
        if let Some(medium) = &config.host.live_medium {
            layout.live_medium = medium.clone();
        }
        layout
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn disks_dir(&self) -> PathBuf {
        self.root.join("disks")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn ssh_key(&self) -> &Path {
        &self.ssh_key
    }

    /// Shared live installation medium, staged outside of this tool.
    pub fn live_medium(&self) -> &Path {
        &self.live_medium
    }

    pub fn vm_paths(&self, vm: &VmConfig) -> VmPaths {
        let disks = self.disks_dir();
        let name = &vm.name;
        VmPaths {
            system_disk: disks.join(format!("{name}-system.qcow2")),
            data_disk: vm
                .has_data_disk
                .then(|| disks.join(format!("{name}-data.qcow2"))),
            pid_file: disks.join(format!("{name}.pid")),
            state_file: disks.join(format!("{name}.state")),
            console_socket: disks.join(format!("{name}.sock")),
            log_file: self.logs_dir().join(format!("{name}.log")),
        }
    }
}

/// Every file owned by one VM name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmPaths {
    pub system_disk: PathBuf,
    /// Only defined when the VM is configured with a secondary disk.
    pub data_disk: Option<PathBuf>,
    pub pid_file: PathBuf,
    /// Boot-mode marker.
    pub state_file: PathBuf,
    pub console_socket: PathBuf,
    pub log_file: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Registry;

    #[test]
    fn vm_paths_follow_state_layout() {
        let layout = Layout::new("/work/.testenv");
        let registry = Registry::builtin();

        let min = layout.vm_paths(registry.get("min").unwrap());
        assert_eq!(min.system_disk, PathBuf::from("/work/.testenv/disks/min-system.qcow2"));
        assert_eq!(min.data_disk, None);
        assert_eq!(min.pid_file, PathBuf::from("/work/.testenv/disks/min.pid"));
        assert_eq!(min.state_file, PathBuf::from("/work/.testenv/disks/min.state"));
        assert_eq!(min.console_socket, PathBuf::from("/work/.testenv/disks/min.sock"));
        assert_eq!(min.log_file, PathBuf::from("/work/.testenv/logs/min.log"));

        let full = layout.vm_paths(registry.get("full").unwrap());
        assert_eq!(
            full.data_disk,
            Some(PathBuf::from("/work/.testenv/disks/full-data.qcow2"))
        );
    }

    #[test]
    fn config_overrides_shared_assets() {
        let mut config = TestbedConfig::default();
        config.state_dir = PathBuf::from("/srv/vms");
        config.ssh.key = Some(PathBuf::from("/keys/id_ed25519"));
        config.host.live_medium = Some(PathBuf::from("/isos/live.iso"));

        let layout = Layout::from_config(&config);
        assert_eq!(layout.root(), Path::new("/srv/vms"));
        assert_eq!(layout.ssh_key(), Path::new("/keys/id_ed25519"));
        assert_eq!(layout.live_medium(), Path::new("/isos/live.iso"));
        assert_eq!(layout.disks_dir(), PathBuf::from("/srv/vms/disks"));
    }
}
