//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{DeviceProfile, SyncTolerance};
use serde::Serialize;
use tracing::info;

use super::{describe_selection, load_profile, plan_selection};
use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ProfileSummary>,
}

#[derive(Serialize)]
struct ProfileSummary {
    device: String,
    mode_count: usize,
    stream_count: usize,
    selected_modes: Vec<String>,
    key_stream: String,
    motion_tracking: bool,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating device profile");

    let result = validate_profile(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Profile validation failed")
    }
}

fn validate_profile(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();
    let invalid = |error: String| ValidationResult {
        valid: false,
        config_path: config_path.clone(),
        error: Some(error),
        warnings: None,
        summary: None,
    };

    let profile = match load_profile(&args.config) {
        Ok(profile) => profile,
        Err(e) => return invalid(format!("{:#}", e)),
    };
    let (selections, key_stream) = match plan_selection(&profile) {
        Ok(plan) => plan,
        Err(e) => return invalid(e.to_string()),
    };

    let warnings = collect_warnings(&profile);
    ValidationResult {
        valid: true,
        config_path: config_path.clone(),
        error: None,
        warnings: (!warnings.is_empty()).then_some(warnings),
        summary: Some(ProfileSummary {
            device: profile.device.name.clone(),
            mode_count: profile.device.modes.len(),
            stream_count: profile.streams.len(),
            selected_modes: selections.iter().map(describe_selection).collect(),
            key_stream: key_stream.to_string(),
            motion_tracking: profile.motion_tracking,
        }),
    }
}

/// Collect profile warnings (non-fatal issues)
fn collect_warnings(profile: &DeviceProfile) -> Vec<String> {
    let mut warnings = Vec::new();

    if profile.streams.is_empty() {
        warnings.push("No streams enabled - start() will be rejected".to_string());
    }

    if profile.motion_tracking && profile.device.motion_subdevice.is_none() {
        warnings.push("motion_tracking is set but the device has no motion module".to_string());
    }

    let archive = &profile.archive;
    if matches!(archive.tolerance, SyncTolerance::Unbounded) && profile.streams.len() > 1 {
        warnings.push(
            "archive.tolerance is unbounded - framesets may pair frames far apart in time"
                .to_string(),
        );
    }
    if archive.slots_per_stream < archive.history_depth {
        warnings.push(format!(
            "archive.slots_per_stream ({}) is below history_depth ({}) - pending framesets will be evicted early",
            archive.slots_per_stream, archive.history_depth
        ));
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Profile is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Device: {}", summary.device);
            println!("  Hardware modes: {}", summary.mode_count);
            println!("  Enabled streams: {}", summary.stream_count);
            println!("  Selected modes:");
            for mode in &summary.selected_modes {
                println!("    - {}", mode);
            }
            println!("  Key stream: {}", summary.key_stream);
            println!("  Motion tracking: {}", summary.motion_tracking);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Profile is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
