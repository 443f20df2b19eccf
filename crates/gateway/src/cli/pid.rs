//! PID file for the `serve` process.
//!
//! The file is locked with `fs2` for as long as the gateway runs, so a
//! second gateway pointed at the same path (and therefore the same relay
//! port) refuses to start. The relay child never writes one.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, Write};
use std::path::Path;

use fs2::FileExt;

/// Lock `path` and write the current PID into it.
///
/// Keep the returned [`File`] alive until shutdown; dropping it releases
/// the lock.
pub fn write_pid_file(path: &Path) -> anyhow::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Not truncated until the lock is held.
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .read(true)
        .open(path)
        .map_err(|e| anyhow::anyhow!("opening PID file {}: {e}", path.display()))?;

    file.try_lock_exclusive().map_err(|_| {
        let holder = read_pid(path)
            .map(|pid| format!(" by PID {pid}"))
            .unwrap_or_default();
        anyhow::anyhow!(
            "another callrelay gateway is running (PID file {} is locked{holder})",
            path.display()
        )
    })?;

    let pid = std::process::id();
    file.set_len(0)?;
    file.rewind()?;
    writeln!(file, "{pid}")?;
    file.flush()?;

    tracing::info!(path = %path.display(), pid, "PID file written");
    Ok(file)
}

/// PID recorded in `path`, if the file exists and parses.
pub fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Remove the PID file; the lock goes with `_handle`.
pub fn remove_pid_file(path: &Path, _handle: File) {
    if let Err(e) = fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
