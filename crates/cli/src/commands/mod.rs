//! Command implementations.

mod info;
mod run;
mod validate;

pub use info::run_info;
pub use run::run_pipeline;
pub use validate::run_validate;

use std::path::Path;

use anyhow::{Context, Result};
use contracts::{DeviceProfile, ModeSelection, StreamId};
use device::{select_key_stream, select_modes, StreamConfig};

use crate::error::CliError;

/// Load a device profile, failing early on a missing file
fn load_profile(path: &Path) -> Result<DeviceProfile> {
    if !path.exists() {
        return Err(CliError::config_not_found(path.display().to_string()).into());
    }
    config_loader::ConfigLoader::load_from_path(path)
        .with_context(|| format!("Failed to load profile from {}", path.display()))
}

/// Modes and key stream a `start()` with this profile would use
fn plan_selection(profile: &DeviceProfile) -> Result<(Vec<ModeSelection>, StreamId), CliError> {
    let config = StreamConfig::from_profile(profile)?;
    let selections = select_modes(&config, &profile.device)
        .map_err(|e| CliError::unstreamable(e.to_string()))?;
    let key_stream = select_key_stream(&selections, &profile.device.key_stream_priority);
    Ok((selections, key_stream))
}

fn describe_selection(selection: &ModeSelection) -> String {
    let outputs: Vec<String> = selection
        .outputs
        .iter()
        .map(|o| format!("{}:{}", o.stream, o.format))
        .collect();
    format!(
        "sub-device {} {}x{}@{} {} -> {}",
        selection.subdevice(),
        selection.width(),
        selection.height(),
        selection.fps(),
        selection.mode.pixel_format.fourcc,
        outputs.join(", ")
    )
}
