//! OS-specific directories and the local host name.

use std::path::PathBuf;

use crate::constants::APP_NAME;
use crate::error::{ParkError, ParkResult};

/// Application data directory, e.g. `~/.local/share/ParkStream` on Linux.
pub fn data_dir() -> ParkResult<PathBuf> {
    let base = dirs::data_dir()
        .ok_or_else(|| ParkError::Config("could not determine data directory".into()))?;
    Ok(base.join(APP_NAME))
}

/// Application configuration directory.
pub fn config_dir() -> ParkResult<PathBuf> {
    let base = dirs::config_dir()
        .ok_or_else(|| ParkError::Config("could not determine config directory".into()))?;
    Ok(base.join(APP_NAME))
}

/// Hostname of this machine, used as the "current host" endpoint candidate.
pub fn hostname() -> Option<String> {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
}
