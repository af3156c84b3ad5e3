//! Disk-backed markers that stand in for process memory across invocations.
//!
//! Reads never fail: a missing file and an unparsable file both read as `None`.
//! Clearing a marker that is already gone is success.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use libc::pid_t;
use tracing::warn;

use crate::error::{Error, Result};

use super::status::BootMode;

pub fn read_pid(path: &Path) -> Option<pid_t> {
    let contents = fs::read_to_string(path).ok()?;
    contents.trim().parse::<pid_t>().ok().filter(|pid| *pid > 0)
}

pub fn read_mode(path: &Path) -> Option<BootMode> {
    let contents = fs::read_to_string(path).ok()?;
    contents.trim().parse().ok()
}

pub fn write_mode(path: &Path, mode: BootMode) -> Result<()> {
    fs::write(path, mode.as_str()).map_err(|source| Error::WriteState {
        path: path.to_path_buf(),
        source,
    })
}

/// Remove a marker, socket or image file. Absence is not an error.
pub fn clear(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "failed to remove state file");
        }
    }
}
