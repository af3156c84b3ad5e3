use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

pub const CONFIG_FILE_NAME: &str = "testvm.toml";
pub const DEFAULT_STATE_DIR: &str = ".testenv";
pub const DEFAULT_SSH_USER: &str = "core";
pub const DEFAULT_SSH_HOST: &str = "localhost";
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MEMORY_MIB: u32 = 2048;
pub const DEFAULT_CPUS: u32 = 2;
pub const DEFAULT_SYSTEM_DISK_SIZE: &str = "20G";
pub const DEFAULT_DATA_DISK_SIZE: &str = "5G";

/// Guest-internal SSH port exposed by the live medium.
pub const LIVE_SSH_PORT: u16 = 22;

/// Reserved target name that expands to every configured VM.
pub const ALL_TARGET: &str = "all";

const MIN_MEMORY_MIB: u32 = 128;

/// Static description of one test VM. Never mutated after loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    pub name: String,
    /// Host port forwarded to the guest's SSH service.
    pub port: u16,
    pub mac: String,
    pub has_data_disk: bool,
    pub second_nic_mac: Option<String>,
    /// SSH port inside the guest once booted from the installed disk.
    pub ssh_port: u16,
    pub memory_mib: u32,
    pub cpus: u32,
    pub system_disk_size: String,
    pub data_disk_size: String,
}

impl VmConfig {
    pub fn new(name: impl Into<String>, port: u16, mac: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port,
            mac: mac.into(),
            has_data_disk: false,
            second_nic_mac: None,
            ssh_port: LIVE_SSH_PORT,
            memory_mib: DEFAULT_MEMORY_MIB,
            cpus: DEFAULT_CPUS,
            system_disk_size: DEFAULT_SYSTEM_DISK_SIZE.to_string(),
            data_disk_size: DEFAULT_DATA_DISK_SIZE.to_string(),
        }
    }

    pub fn with_data_disk(mut self) -> Self {
        self.has_data_disk = true;
        self
    }

    pub fn with_second_nic(mut self, mac: impl Into<String>) -> Self {
        self.second_nic_mac = Some(mac.into());
        self
    }

    pub fn with_ssh_port(mut self, port: u16) -> Self {
        self.ssh_port = port;
        self
    }
}

/// The two VMs every checkout ships with.
pub fn builtin_vms() -> Vec<VmConfig> {
    vec![
        VmConfig::new("min", 3021, "EA:C5:B8:F5:4E:DF"),
        VmConfig::new("full", 3022, "DE:0C:DF:04:6D:30")
            .with_data_disk()
            .with_second_nic("DE:0C:DF:04:6D:31")
            .with_ssh_port(2222),
    ]
}

/// Ordered set of VM definitions keyed by name.
#[derive(Debug, Clone)]
pub struct Registry {
    vms: Vec<VmConfig>,
}

impl Registry {
    pub fn new(vms: Vec<VmConfig>) -> Self {
        Self { vms }
    }

    pub fn builtin() -> Self {
        Self::new(builtin_vms())
    }

    pub fn get(&self, name: &str) -> Option<&VmConfig> {
        self.vms.iter().find(|vm| vm.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VmConfig> {
        self.vms.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.vms.iter().map(|vm| vm.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.vms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vms.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SshSettings {
    pub user: String,
    pub host: String,
    /// Private key; defaults to `<state_dir>/keys/test_key`.
    pub key: Option<PathBuf>,
    pub wait_timeout: Duration,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            user: DEFAULT_SSH_USER.to_string(),
            host: DEFAULT_SSH_HOST.to_string(),
            key: None,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

/// Host tool locations pinned by configuration instead of discovered.
#[derive(Debug, Clone, Default)]
pub struct HostOverrides {
    pub qemu_system: Option<PathBuf>,
    pub qemu_img: Option<PathBuf>,
    pub firmware: Option<PathBuf>,
    pub live_medium: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TestbedConfig {
    /// File the configuration was loaded from, if any.
    pub file_path: Option<PathBuf>,
    pub state_dir: PathBuf,
    pub ssh: SshSettings,
    pub host: HostOverrides,
    pub registry: Registry,
    pub warnings: Vec<String>,
}

impl Default for TestbedConfig {
    fn default() -> Self {
        Self {
            file_path: None,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            ssh: SshSettings::default(),
            host: HostOverrides::default(),
            registry: Registry::builtin(),
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Load exactly this file; a missing file is an error.
    Explicit(PathBuf),
    /// Use `testvm.toml` in this directory when present, built-in defaults otherwise.
    Discover(PathBuf),
}

pub fn load_config(source: &ConfigSource) -> Result<TestbedConfig> {
    match source {
        ConfigSource::Explicit(path) => {
            if !path.is_file() {
                return Err(Error::ExplicitConfigMissing { path: path.clone() });
            }
            load_config_file(path)
        }
        ConfigSource::Discover(dir) => {
            let candidate = dir.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                load_config_file(&candidate)
            } else {
                Ok(TestbedConfig::default())
            }
        }
    }
}

pub fn load_config_file(path: &Path) -> Result<TestbedConfig> {
    let contents = fs::read_to_string(path).map_err(|source| Error::ReadConfig {
        path: path.to_path_buf(),
        source,
    })?;

    let value: toml::Value = toml::from_str(&contents).map_err(|source| Error::ParseConfig {
        path: path.to_path_buf(),
        source,
    })?;

    let mut warnings = detect_unknown_fields(&value);

    let raw = RawConfig::deserialize(value).map_err(|source| Error::ParseConfig {
        path: path.to_path_buf(),
        source,
    })?;

    raw.into_validated(path, &mut warnings)
}

fn invalid_config(path: &Path, message: impl Into<String>) -> Error {
    Error::InvalidConfig {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn detect_unknown_fields(value: &toml::Value) -> Vec<String> {
    let mut warnings = Vec::new();
    let toml::Value::Table(table) = value else {
        return warnings;
    };

    warn_table(table, &["state_dir", "ssh", "host", "vms"], "root", &mut warnings);

    if let Some(toml::Value::Table(ssh)) = table.get("ssh") {
        warn_table(ssh, &["user", "host", "key", "wait_timeout_secs"], "[ssh]", &mut warnings);
    }

    if let Some(toml::Value::Table(host)) = table.get("host") {
        warn_table(
            host,
            &["qemu", "qemu_img", "firmware", "live_medium"],
            "[host]",
            &mut warnings,
        );
    }

    if let Some(toml::Value::Array(entries)) = table.get("vms") {
        for (idx, entry) in entries.iter().enumerate() {
            if let toml::Value::Table(vm) = entry {
                warn_table(
                    vm,
                    &[
                        "name",
                        "port",
                        "mac",
                        "data_disk",
                        "second_nic_mac",
                        "ssh_port",
                        "memory",
                        "cpus",
                        "system_disk_size",
                        "data_disk_size",
                    ],
                    &format!("[[vms]] #{idx}"),
                    &mut warnings,
                );
            }
        }
    }

    warnings
}

fn warn_table(
    table: &toml::map::Map<String, toml::Value>,
    allowed: &[&str],
    context: &str,
    warnings: &mut Vec<String>,
) {
    for key in table.keys() {
        if !allowed.contains(&key.as_str()) {
            warnings.push(format!(
                "Unknown field `{key}` at {context}; this value will be ignored."
            ));
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    state_dir: Option<PathBuf>,
    #[serde(default)]
    ssh: RawSsh,
    #[serde(default)]
    host: RawHost,
    vms: Option<Vec<RawVm>>,
}

#[derive(Debug, Deserialize, Default)]
struct RawSsh {
    user: Option<String>,
    host: Option<String>,
    key: Option<PathBuf>,
    wait_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawHost {
    qemu: Option<PathBuf>,
    qemu_img: Option<PathBuf>,
    firmware: Option<PathBuf>,
    live_medium: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawVm {
    name: Option<String>,
    port: Option<u16>,
    mac: Option<String>,
    #[serde(default)]
    data_disk: bool,
    second_nic_mac: Option<String>,
    ssh_port: Option<u16>,
    memory: Option<RawMemory>,
    cpus: Option<u32>,
    system_disk_size: Option<String>,
    data_disk_size: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawMemory {
    Mib(u32),
    Spec(String),
}

impl RawConfig {
    fn into_validated(self, path: &Path, warnings: &mut Vec<String>) -> Result<TestbedConfig> {
        let root_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let state_dir = self
            .state_dir
            .map(|dir| resolve_path(&root_dir, dir))
            .unwrap_or_else(|| root_dir.join(DEFAULT_STATE_DIR));

        let ssh = SshSettings {
            user: self.ssh.user.unwrap_or_else(|| DEFAULT_SSH_USER.to_string()),
            host: self.ssh.host.unwrap_or_else(|| DEFAULT_SSH_HOST.to_string()),
            key: self.ssh.key.map(|key| resolve_path(&root_dir, key)),
            wait_timeout: match self.ssh.wait_timeout_secs {
                Some(0) => {
                    return Err(invalid_config(
                        path,
                        "`ssh.wait_timeout_secs` must be at least 1.",
                    ));
                }
                Some(secs) => Duration::from_secs(secs),
                None => DEFAULT_WAIT_TIMEOUT,
            },
        };

        let host = HostOverrides {
            qemu_system: self.host.qemu.map(|p| resolve_path(&root_dir, p)),
            qemu_img: self.host.qemu_img.map(|p| resolve_path(&root_dir, p)),
            firmware: self.host.firmware.map(|p| resolve_path(&root_dir, p)),
            live_medium: self.host.live_medium.map(|p| resolve_path(&root_dir, p)),
        };

        let registry = match self.vms {
            None => Registry::builtin(),
            Some(raw_vms) => {
                if raw_vms.is_empty() {
                    return Err(invalid_config(
                        path,
                        "`vms` is present but empty. Remove it to use the built-in `min` and `full` VMs.",
                    ));
                }
                Registry::new(validate_vms(path, raw_vms)?)
            }
        };

        Ok(TestbedConfig {
            file_path: Some(path.to_path_buf()),
            state_dir,
            ssh,
            host,
            registry,
            warnings: warnings.clone(),
        })
    }
}

fn validate_vms(path: &Path, raw_vms: Vec<RawVm>) -> Result<Vec<VmConfig>> {
    let mut seen_names = HashSet::new();
    let mut seen_ports = HashSet::new();
    let mut vms = Vec::with_capacity(raw_vms.len());

    for (idx, vm) in raw_vms.into_iter().enumerate() {
        let name = vm.name.filter(|n| !n.trim().is_empty()).ok_or_else(|| {
            invalid_config(
                path,
                format!("[[vms]] #{idx} must define a non-empty `name`. Example: `name = \"min\"`."),
            )
        })?;

        if name == ALL_TARGET {
            return Err(invalid_config(
                path,
                format!("VM name `{ALL_TARGET}` is reserved for addressing every VM."),
            ));
        }

        if !seen_names.insert(name.clone()) {
            return Err(invalid_config(
                path,
                format!("Duplicate VM name `{name}` detected. Each VM must have a unique `name`."),
            ));
        }

        let port = vm.port.filter(|p| *p != 0).ok_or_else(|| {
            invalid_config(
                path,
                format!("VM `{name}` must set `port` to a host port between 1 and 65535."),
            )
        })?;
        if !seen_ports.insert(port) {
            return Err(invalid_config(
                path,
                format!("VM `{name}` reuses host port {port}; forwarded ports must be unique."),
            ));
        }

        let mac = vm.mac.ok_or_else(|| {
            invalid_config(path, format!("VM `{name}` is missing required field `mac`."))
        })?;
        validate_mac(&mac).map_err(|msg| invalid_config(path, format!("VM `{name}`: {msg}")))?;

        if let Some(second) = &vm.second_nic_mac {
            validate_mac(second)
                .map_err(|msg| invalid_config(path, format!("VM `{name}` second NIC: {msg}")))?;
        }

        let ssh_port = vm.ssh_port.unwrap_or(LIVE_SSH_PORT);
        if ssh_port == 0 {
            return Err(invalid_config(
                path,
                format!("VM `{name}` must use an `ssh_port` between 1 and 65535."),
            ));
        }

        let cpus = vm.cpus.unwrap_or(DEFAULT_CPUS);
        if cpus == 0 {
            return Err(invalid_config(
                path,
                format!("VM `{name}` must request at least one CPU. Example: `cpus = 2`."),
            ));
        }

        let memory_mib = match vm.memory {
            None => DEFAULT_MEMORY_MIB,
            Some(RawMemory::Mib(mib)) => mib,
            Some(RawMemory::Spec(spec)) => parse_memory_mib(&spec).map_err(|msg| {
                invalid_config(
                    path,
                    format!(
                        "VM `{name}` has invalid memory specification `{spec}`: {msg}. \
                         Example values: `2048`, `2048 MiB`, `2 GiB`."
                    ),
                )
            })?,
        };
        if memory_mib < MIN_MEMORY_MIB {
            return Err(invalid_config(
                path,
                format!("VM `{name}` must have at least {MIN_MEMORY_MIB} MiB of memory."),
            ));
        }

        let system_disk_size = vm
            .system_disk_size
            .unwrap_or_else(|| DEFAULT_SYSTEM_DISK_SIZE.to_string());
        validate_disk_size(&system_disk_size).map_err(|msg| {
            invalid_config(path, format!("VM `{name}` system_disk_size: {msg}"))
        })?;

        let data_disk_size = vm
            .data_disk_size
            .unwrap_or_else(|| DEFAULT_DATA_DISK_SIZE.to_string());
        validate_disk_size(&data_disk_size)
            .map_err(|msg| invalid_config(path, format!("VM `{name}` data_disk_size: {msg}")))?;

        vms.push(VmConfig {
            name,
            port,
            mac,
            has_data_disk: vm.data_disk,
            second_nic_mac: vm.second_nic_mac,
            ssh_port,
            memory_mib,
            cpus,
            system_disk_size,
            data_disk_size,
        });
    }

    Ok(vms)
}

fn resolve_path(base: &Path, input: PathBuf) -> PathBuf {
    if input.is_absolute() {
        input
    } else {
        base.join(input)
    }
}

fn validate_mac(mac: &str) -> std::result::Result<(), String> {
    let octets: Vec<&str> = mac.split(':').collect();
    let well_formed = octets.len() == 6
        && octets
            .iter()
            .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()));
    if well_formed {
        Ok(())
    } else {
        Err(format!(
            "`{mac}` is not a MAC address; expected six hex octets like `DE:0C:DF:04:6D:30`"
        ))
    }
}

fn validate_disk_size(size: &str) -> std::result::Result<(), String> {
    let digits =
        size.trim_end_matches(|c: char| matches!(c.to_ascii_uppercase(), 'K' | 'M' | 'G' | 'T'));
    let suffix_len = size.len() - digits.len();
    if digits.is_empty() || suffix_len > 1 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!(
            "`{size}` is not a disk size; use digits with an optional K, M, G or T suffix (e.g. `20G`)"
        ));
    }
    Ok(())
}

fn parse_memory_mib(input: &str) -> std::result::Result<u32, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("memory value cannot be empty".to_string());
    }

    let mut parts = trimmed.split_whitespace();
    let amount = parts
        .next()
        .ok_or_else(|| "memory value is missing numeric component".to_string())?;
    let unit = parts.next();
    if parts.next().is_some() {
        return Err("memory value contains unexpected extra tokens".to_string());
    }

    let amount_value: f64 = amount
        .parse()
        .map_err(|_| format!("could not parse `{amount}` as a number"))?;

    let mib = match unit.map(|u| u.to_ascii_lowercase()) {
        None => amount_value,
        Some(ref u) if u == "mib" || u == "mb" || u == "m" => amount_value,
        Some(ref u) if u == "gib" || u == "gb" || u == "g" => amount_value * 1024.0,
        Some(ref u) => {
            return Err(format!(
                "unsupported memory unit `{u}`; supported units are MiB and GiB"
            ));
        }
    };

    if !(0.0..=f64::from(u32::MAX)).contains(&mib) {
        return Err("memory value is out of range".to_string());
    }
    Ok(mib as u32)
}
