use std::ffi::CStr;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::HostOverrides;
use crate::error::{Error, Result};

use super::process::find_executable;

const QEMU_IMG: &str = "qemu-img";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    MacOs,
    Linux,
    Other,
}

impl HostOs {
    fn from_sysname(sysname: &str) -> Self {
        match sysname {
            "Darwin" => HostOs::MacOs,
            "Linux" => HostOs::Linux,
            _ => HostOs::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Aarch64,
    X86_64,
}

impl Arch {
    /// Normalize a raw machine string such as `arm64` or `AMD64`.
    pub fn normalize(machine: &str) -> Result<Self> {
        match machine.to_ascii_lowercase().as_str() {
            "arm64" | "aarch64" => Ok(Arch::Aarch64),
            "x86_64" | "amd64" => Ok(Arch::X86_64),
            _ => Err(Error::UnsupportedPlatform {
                machine: machine.to_string(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Arch::Aarch64 => "aarch64",
            Arch::X86_64 => "x86_64",
        }
    }

    /// QEMU machine type for this architecture.
    pub fn machine_type(self) -> &'static str {
        match self {
            Arch::Aarch64 => "virt",
            Arch::X86_64 => "q35",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accelerator {
    Hvf,
    Kvm,
}

impl Accelerator {
    pub fn as_str(self) -> &'static str {
        match self {
            Accelerator::Hvf => "hvf",
            Accelerator::Kvm => "kvm",
        }
    }
}

/// Host facts and tool locations, resolved once per invocation.
#[derive(Debug, Clone)]
pub struct Platform {
    os: HostOs,
    arch: Arch,
    overrides: HostOverrides,
}

impl Platform {
    pub fn new(os: HostOs, arch: Arch, overrides: HostOverrides) -> Self {
        Self {
            os,
            arch,
            overrides,
        }
    }

    pub fn detect(overrides: HostOverrides) -> Result<Self> {
        let (sysname, machine) = uname().unwrap_or_else(|| {
            let sysname = match std::env::consts::OS {
                "macos" => "Darwin",
                "linux" => "Linux",
                other => other,
            };
            (sysname.to_string(), std::env::consts::ARCH.to_string())
        });
        debug!(%sysname, %machine, "detected host platform");
        Self::from_uname(&sysname, &machine, overrides)
    }

    pub fn from_uname(sysname: &str, machine: &str, overrides: HostOverrides) -> Result<Self> {
        Ok(Self::new(
            HostOs::from_sysname(sysname),
            Arch::normalize(machine)?,
            overrides,
        ))
    }

    pub fn os(&self) -> HostOs {
        self.os
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn accelerator(&self) -> Accelerator {
        match self.os {
            HostOs::MacOs => Accelerator::Hvf,
            HostOs::Linux | HostOs::Other => Accelerator::Kvm,
        }
    }

    pub fn qemu_system_name(&self) -> String {
        format!("qemu-system-{}", self.arch)
    }

    pub fn qemu_binary(&self) -> Result<PathBuf> {
        let name = self.qemu_system_name();
        resolve_tool(self.overrides.qemu_system.as_deref(), &name)
    }

    pub fn qemu_img(&self) -> Result<PathBuf> {
        resolve_tool(self.overrides.qemu_img.as_deref(), QEMU_IMG)
    }

    /// Firmware locations probed in order.
    pub fn firmware_candidates(&self) -> Vec<PathBuf> {
        if let Some(pinned) = &self.overrides.firmware {
            return vec![pinned.clone()];
        }

        let arch = self.arch.as_str();
        let mut candidates = Vec::new();

        if self.os == HostOs::MacOs {
            // Homebrew keeps firmware next to the binaries.
            if let Some(prefix) = self
                .qemu_binary()
                .ok()
                .and_then(|bin| bin.parent().and_then(Path::parent).map(Path::to_path_buf))
            {
                candidates.push(prefix.join(format!("share/qemu/edk2-{arch}-code.fd")));
            }
        }

        candidates.push(PathBuf::from(format!("/usr/share/qemu/edk2-{arch}-code.fd")));
        match self.arch {
            Arch::Aarch64 => {
                candidates.push(PathBuf::from("/usr/share/AAVMF/AAVMF_CODE.fd"));
                candidates.push(PathBuf::from("/usr/share/edk2/aarch64/QEMU_EFI.fd"));
            }
            Arch::X86_64 => {
                candidates.push(PathBuf::from("/usr/share/OVMF/OVMF_CODE.fd"));
                candidates.push(PathBuf::from("/usr/share/edk2/x64/OVMF_CODE.fd"));
            }
        }
        candidates
    }

    pub fn firmware_path(&self) -> Result<PathBuf> {
        let candidates = self.firmware_candidates();
        if let Some(found) = candidates.iter().find(|path| path.is_file()) {
            return Ok(found.clone());
        }

        let tried: Vec<String> = candidates
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        Err(Error::ToolNotFound {
            tools: vec!["UEFI firmware".to_string()],
            help: Some(format!("Tried: {}", tried.join(", "))),
        })
    }

    /// Fail fast when the hypervisor or image tool is missing, naming every gap at once.
    pub fn check_dependencies(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.qemu_binary().is_err() {
            missing.push(self.qemu_system_name());
        }
        if self.qemu_img().is_err() {
            missing.push(QEMU_IMG.to_string());
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::ToolNotFound {
                tools: missing,
                help: None,
            })
        }
    }
}

fn resolve_tool(pinned: Option<&Path>, name: &str) -> Result<PathBuf> {
    let found = match pinned {
        Some(path) => path.is_file().then(|| path.to_path_buf()),
        None => find_executable(&[name]),
    };
    found.ok_or_else(|| Error::ToolNotFound {
        tools: vec![name.to_string()],
        help: Some(match pinned {
            Some(path) => format!("Configured path {} does not exist", path.display()),
            None => "Not found in PATH".to_string(),
        }),
    })
}

fn uname() -> Option<(String, String)> {
    let mut info: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&mut info) } != 0 {
        return None;
    }
    let sysname = unsafe { CStr::from_ptr(info.sysname.as_ptr()) }
        .to_string_lossy()
        .into_owned();
    let machine = unsafe { CStr::from_ptr(info.machine.as_ptr()) }
        .to_string_lossy()
        .into_owned();
    Some((sysname, machine))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn pinned(dir: &Path) -> HostOverrides {
        let qemu = dir.join("qemu-system-x86_64");
        let img = dir.join("qemu-img");
        let firmware = dir.join("code.fd");
        for path in [&qemu, &img, &firmware] {
            fs::write(path, "").unwrap();
        }
        HostOverrides {
            qemu_system: Some(qemu),
            qemu_img: Some(img),
            firmware: Some(firmware),
            live_medium: None,
        }
    }

    #[test]
    fn normalizes_supported_architectures() {
        assert_eq!(Arch::normalize("arm64").unwrap(), Arch::Aarch64);
        assert_eq!(Arch::normalize("aarch64").unwrap(), Arch::Aarch64);
        assert_eq!(Arch::normalize("AMD64").unwrap(), Arch::X86_64);
        assert_eq!(Arch::normalize("x86_64").unwrap(), Arch::X86_64);

        let err = Arch::normalize("riscv64").unwrap_err();
        assert!(matches!(err, Error::UnsupportedPlatform { ref machine } if machine == "riscv64"));
    }

    #[test]
    fn accelerator_depends_only_on_os_family() {
        let mac = Platform::from_uname("Darwin", "arm64", HostOverrides::default()).unwrap();
        assert_eq!(mac.accelerator(), Accelerator::Hvf);
        assert_eq!(mac.qemu_system_name(), "qemu-system-aarch64");

        let linux = Platform::from_uname("Linux", "x86_64", HostOverrides::default()).unwrap();
        assert_eq!(linux.accelerator(), Accelerator::Kvm);

        let bsd = Platform::from_uname("FreeBSD", "amd64", HostOverrides::default()).unwrap();
        assert_eq!(bsd.accelerator(), Accelerator::Kvm);
        assert_eq!(bsd.os(), HostOs::Other);
    }

    #[test]
    fn firmware_candidates_are_architecture_specific() {
        let x86 = Platform::new(HostOs::Linux, Arch::X86_64, HostOverrides::default());
        let candidates = x86.firmware_candidates();
        assert_eq!(
            candidates.first(),
            Some(&PathBuf::from("/usr/share/qemu/edk2-x86_64-code.fd"))
        );
        assert!(candidates.contains(&PathBuf::from("/usr/share/OVMF/OVMF_CODE.fd")));
        assert!(!candidates.contains(&PathBuf::from("/usr/share/AAVMF/AAVMF_CODE.fd")));

        let arm = Platform::new(HostOs::Linux, Arch::Aarch64, HostOverrides::default());
        assert!(arm
            .firmware_candidates()
            .contains(&PathBuf::from("/usr/share/AAVMF/AAVMF_CODE.fd")));
    }

    #[test]
    fn missing_pinned_firmware_lists_what_was_tried() {
        let overrides = HostOverrides {
            firmware: Some(PathBuf::from("/nonexistent/code.fd")),
            ..HostOverrides::default()
        };
        let platform = Platform::new(HostOs::Linux, Arch::X86_64, overrides);
        let err = platform.firmware_path().unwrap_err();
        assert_eq!(
            err.to_string(),
            "UEFI firmware not found. Tried: /nonexistent/code.fd"
        );
    }

    #[test]
    fn pinned_tools_satisfy_dependency_check() {
        let dir = tempdir().unwrap();
        let overrides = pinned(dir.path());
        let platform = Platform::new(HostOs::Linux, Arch::X86_64, overrides.clone());

        platform.check_dependencies().unwrap();
        assert_eq!(platform.qemu_binary().unwrap(), overrides.qemu_system.unwrap());
        assert_eq!(platform.qemu_img().unwrap(), overrides.qemu_img.unwrap());
        assert_eq!(platform.firmware_path().unwrap(), overrides.firmware.unwrap());
    }

    #[test]
    fn dependency_check_names_every_missing_tool() {
        let overrides = HostOverrides {
            qemu_system: Some(PathBuf::from("/nonexistent/qemu-system-aarch64")),
            qemu_img: Some(PathBuf::from("/nonexistent/qemu-img")),
            ..HostOverrides::default()
        };
        let platform = Platform::new(HostOs::Linux, Arch::Aarch64, overrides);
        let err = platform.check_dependencies().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing dependencies: qemu-system-aarch64, qemu-img"
        );
    }
}
