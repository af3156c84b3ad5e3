use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::VmConfig;
use crate::error::{Error, Result};

use super::events::{DiskKind, Event};
use super::layout::Layout;
use super::markers;
use super::process::{CommandLine, ProcessControl};
use super::reporter::Reporter;

/// Per-VM qcow2 images.
pub struct DiskImages<'a> {
    vm: &'a VmConfig,
    dir: PathBuf,
    system: PathBuf,
    data: Option<PathBuf>,
    processes: &'a dyn ProcessControl,
}

impl<'a> DiskImages<'a> {
    pub fn new(vm: &'a VmConfig, layout: &Layout, processes: &'a dyn ProcessControl) -> Self {
        let paths = layout.vm_paths(vm);
        Self {
            vm,
            dir: layout.disks_dir(),
            system: paths.system_disk,
            data: paths.data_disk,
            processes,
        }
    }

    pub fn system_disk_path(&self) -> &Path {
        &self.system
    }

    /// Defined only when the VM is configured with a secondary disk.
    pub fn data_disk_path(&self) -> Option<&Path> {
        self.data.as_deref()
    }

    /// Presence of the system image only; the data disk is optional.
    pub fn exists(&self) -> bool {
        self.system.exists()
    }

    /// Replace any existing images with fresh ones.
    pub fn create(&self, qemu_img: &Path, reporter: &mut dyn Reporter) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|source| Error::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        self.delete();

        self.create_image(qemu_img, &self.system, &self.vm.system_disk_size)?;
        reporter.report(Event::DiskCreated {
            vm: self.vm.name.clone(),
            kind: DiskKind::System,
            size: self.vm.system_disk_size.clone(),
        });

        if let Some(data) = &self.data {
            self.create_image(qemu_img, data, &self.vm.data_disk_size)?;
            reporter.report(Event::DiskCreated {
                vm: self.vm.name.clone(),
                kind: DiskKind::Data,
                size: self.vm.data_disk_size.clone(),
            });
        }

        Ok(())
    }

    pub fn delete(&self) {
        markers::clear(&self.system);
        if let Some(data) = &self.data {
            markers::clear(data);
        }
    }

    fn create_image(&self, qemu_img: &Path, image: &Path, size: &str) -> Result<()> {
        let command = CommandLine::for_path(qemu_img)
            .args(["create", "-f", "qcow2"])
            .arg(image.display().to_string())
            .arg(size);
        debug!(command = %command, "creating disk image");

        let output = self.processes.run(&command).map_err(|source| Error::Spawn {
            program: qemu_img.display().to_string(),
            source,
        })?;

        if !output.success() {
            let stderr = output.stderr.trim();
            return Err(Error::DiskCommandFailed {
                vm: self.vm.name.clone(),
                path: image.to_path_buf(),
                message: if stderr.is_empty() {
                    format!(
                        "{} exited with status {}",
                        qemu_img.display(),
                        output.code.unwrap_or(-1)
                    )
                } else {
                    stderr.to_string()
                },
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Registry;
    use crate::core::testing::FakeProcesses;
    use tempfile::tempdir;

    #[test]
    fn create_replaces_both_images() {
        let dir = tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let registry = Registry::builtin();
        let full = registry.get("full").unwrap();
        let processes = FakeProcesses::new();
        let disks = DiskImages::new(full, &layout, &processes);

        fs::create_dir_all(layout.disks_dir()).unwrap();
        fs::write(disks.system_disk_path(), "old").unwrap();
        assert!(disks.exists());

        let mut events = Vec::new();
        disks.create(Path::new("/usr/bin/qemu-img"), &mut events).unwrap();

        assert_eq!(fs::read_to_string(disks.system_disk_path()).unwrap(), "QFI");
        assert!(disks.data_disk_path().unwrap().exists());
        assert_eq!(
            events,
            vec![
                Event::DiskCreated {
                    vm: "full".into(),
                    kind: DiskKind::System,
                    size: "20G".into(),
                },
                Event::DiskCreated {
                    vm: "full".into(),
                    kind: DiskKind::Data,
                    size: "5G".into(),
                },
            ]
        );

        let runs = processes.with(|state| state.runs.clone());
        assert_eq!(runs.len(), 2);
        assert_eq!(
            runs[0].arguments()[..3],
            ["create".to_string(), "-f".to_string(), "qcow2".to_string()]
        );
        assert_eq!(runs[0].arguments()[4], "20G");
    }

    #[test]
    fn data_disk_presence_is_not_part_of_existence() {
        let dir = tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let registry = Registry::builtin();
        let processes = FakeProcesses::new();
        let disks = DiskImages::new(registry.get("full").unwrap(), &layout, &processes);

        fs::create_dir_all(layout.disks_dir()).unwrap();
        fs::write(disks.data_disk_path().unwrap(), "").unwrap();
        assert!(!disks.exists());

        let min = DiskImages::new(registry.get("min").unwrap(), &layout, &processes);
        assert!(min.data_disk_path().is_none());
    }

    #[test]
    fn tool_failure_aborts_and_surfaces_stderr() {
        let dir = tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let registry = Registry::builtin();
        let processes = FakeProcesses::new();
        processes.with(|state| state.disk_failure = Some("Could not create: No space left".into()));
        let disks = DiskImages::new(registry.get("full").unwrap(), &layout, &processes);

        let err = disks
            .create(Path::new("/usr/bin/qemu-img"), &mut ())
            .unwrap_err();
        match err {
            Error::DiskCommandFailed { vm, message, .. } => {
                assert_eq!(vm, "full");
                assert_eq!(message, "Could not create: No space left");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(processes.with(|state| state.runs.len()), 1);
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let registry = Registry::builtin();
        let processes = FakeProcesses::new();
        let disks = DiskImages::new(registry.get("full").unwrap(), &layout, &processes);

        disks.create(Path::new("qemu-img"), &mut ()).unwrap();
        disks.delete();
        assert!(!disks.system_disk_path().exists());
        assert!(!disks.data_disk_path().unwrap().exists());
        disks.delete();
    }
}
