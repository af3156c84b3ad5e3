use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::config::{ConfigSource, TestbedConfig, load_config};
use crate::error::Result;

/// Explicit `--config` or `./testvm.toml`, with `--root` replacing the state directory.
pub fn load_testbed(
    config_override: Option<&Path>,
    root: Option<PathBuf>,
) -> Result<TestbedConfig> {
    let source = match config_override {
        Some(path) => ConfigSource::Explicit(path.to_path_buf()),
        None => ConfigSource::Discover(PathBuf::from(".")),
    };
    let mut config = load_config(&source)?;
    if let Some(root) = root {
        config.state_dir = root;
    }
    Ok(config)
}

pub fn emit_config_warnings(warnings: &[String]) {
    if let Some(message) = format_config_warnings(warnings) {
        eprint!("{message}");
    }
}

fn format_config_warnings(warnings: &[String]) -> Option<String> {
    if warnings.is_empty() {
        return None;
    }

    let count = warnings.len();
    let suffix = if count == 1 { "" } else { "s" };
    let mut buf = String::new();
    let _ = writeln!(buf, "Found {count} warning{suffix} while parsing configuration:");
    for warning in warnings {
        let _ = writeln!(buf, "  • {warning}");
    }
    Some(buf)
}
