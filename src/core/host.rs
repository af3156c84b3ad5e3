use sysinfo::System;

use crate::config::VmConfig;

use super::diagnostics::Diagnostic;

const MIB: u64 = 1024 * 1024;

/// Warn when the host cannot currently spare the guest's memory.
pub fn memory_headroom(vm: &VmConfig) -> Option<Diagnostic> {
    let mut system = System::new();
    system.refresh_memory();
    check_memory(vm, system.available_memory())
}

fn check_memory(vm: &VmConfig, available_bytes: u64) -> Option<Diagnostic> {
    // Some platforms report zero when the figure is unknown.
    if available_bytes == 0 {
        return None;
    }
    let available_mib = available_bytes / MIB;
    if available_mib >= u64::from(vm.memory_mib) {
        return None;
    }
    Some(
        Diagnostic::warning(format!(
            "{}: host has {} MiB available but the VM requests {} MiB",
            vm.name, available_mib, vm.memory_mib
        ))
        .with_help("The guest may swap heavily or fail to boot."),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Registry;

    #[test]
    fn warns_only_when_memory_is_short() {
        let registry = Registry::builtin();
        let min = registry.get("min").unwrap();

        assert!(check_memory(min, 8 * 1024 * MIB).is_none());
        assert!(check_memory(min, 0).is_none());

        let warning = check_memory(min, 1024 * MIB).unwrap();
        assert_eq!(
            warning.message,
            "min: host has 1024 MiB available but the VM requests 2048 MiB"
        );
    }
}
