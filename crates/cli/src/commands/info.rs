//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{
    ArchiveConfig, Capability, DeviceProfile, HardwareMode, OptionEntry, PresetEntry,
    SubdeviceMapping,
};
use serde::Serialize;
use tracing::info;

use super::load_profile;
use crate::cli::InfoArgs;

/// Profile info for JSON output
#[derive(Serialize)]
struct ProfileInfo<'a> {
    name: &'a str,
    serial: &'a str,
    firmware_version: &'a str,
    depth_scale: f32,
    num_transfer_buffers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    motion_subdevice: Option<usize>,
    capabilities: &'a [Capability],
    stream_subdevices: &'a [SubdeviceMapping],
    #[serde(skip_serializing_if = "Option::is_none")]
    modes: Option<&'a [HardwareMode]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presets: Option<&'a [PresetEntry]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'a [OptionEntry]>,
    archive: &'a ArchiveConfig,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading device profile info");

    let profile = load_profile(&args.config)?;

    if args.json {
        let info = build_profile_info(&profile, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize profile info")?;
        println!("{}", json);
    } else {
        print_profile_info(&profile, args);
    }

    Ok(())
}

fn build_profile_info<'a>(profile: &'a DeviceProfile, args: &InfoArgs) -> ProfileInfo<'a> {
    let device = &profile.device;
    ProfileInfo {
        name: &device.name,
        serial: &device.serial,
        firmware_version: &device.firmware_version,
        depth_scale: device.depth_scale,
        num_transfer_buffers: device.num_transfer_buffers,
        motion_subdevice: device.motion_subdevice,
        capabilities: &device.capabilities,
        stream_subdevices: &device.stream_subdevices,
        modes: args.modes.then_some(device.modes.as_slice()),
        presets: args.options.then_some(device.presets.as_slice()),
        options: args.options.then_some(device.options.as_slice()),
        archive: &profile.archive,
    }
}

fn print_profile_info(profile: &DeviceProfile, args: &InfoArgs) {
    let device = &profile.device;

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                    Device Capabilities                       ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("Device");
    println!("   ├─ Name: {}", device.name);
    println!("   ├─ Serial: {}", device.serial);
    println!("   ├─ Firmware: {}", device.firmware_version);
    println!("   ├─ Depth scale: {} m/unit", device.depth_scale);
    println!("   ├─ Transfer buffers: {}", device.num_transfer_buffers);
    match device.motion_subdevice {
        Some(subdevice) => println!("   └─ Motion module: sub-device {}", subdevice),
        None => println!("   └─ Motion module: none"),
    }

    let capabilities: Vec<String> = device
        .capabilities
        .iter()
        .map(|c| format!("{:?}", c))
        .collect();
    println!("\nCapabilities: {}", capabilities.join(", "));

    println!("\nStreams ({})", device.stream_subdevices.len());
    for (i, mapping) in device.stream_subdevices.iter().enumerate() {
        let prefix = if i + 1 == device.stream_subdevices.len() { "└─" } else { "├─" };
        let modes = device
            .modes
            .iter()
            .filter(|m| m.output_format(mapping.stream).is_some())
            .count();
        println!(
            "   {} {} -> sub-device {} ({} modes)",
            prefix, mapping.stream, mapping.subdevice, modes
        );
    }

    if args.modes {
        println!("\nHardware Modes ({})", device.modes.len());
        for (i, mode) in device.modes.iter().enumerate() {
            let prefix = if i + 1 == device.modes.len() { "└─" } else { "├─" };
            let outputs: Vec<String> = mode
                .outputs
                .iter()
                .map(|o| format!("{}:{}", o.stream, o.format))
                .collect();
            println!(
                "   {} [{}] {}x{}@{} {} -> {} ({:?})",
                prefix,
                mode.subdevice,
                mode.width,
                mode.height,
                mode.fps,
                mode.pixel_format.fourcc,
                outputs.join(", "),
                mode.unpacker
            );
        }
    }

    if args.options {
        println!("\nPresets ({})", device.presets.len());
        for (i, preset) in device.presets.iter().enumerate() {
            let prefix = if i + 1 == device.presets.len() { "└─" } else { "├─" };
            println!(
                "   {} {} {:?}: {}x{} {} @ {}",
                prefix, preset.stream, preset.preset, preset.width, preset.height, preset.format, preset.fps
            );
        }

        println!("\nOptions ({})", device.options.len());
        for (i, option) in device.options.iter().enumerate() {
            let prefix = if i + 1 == device.options.len() { "└─" } else { "├─" };
            println!(
                "   {} {}: [{}, {}] step {} default {}",
                prefix, option.option, option.min, option.max, option.step, option.default
            );
        }
    }

    let archive = &profile.archive;
    println!("\nArchive");
    println!("   ├─ History depth: {}", archive.history_depth);
    println!("   ├─ Slots per stream: {}", archive.slots_per_stream);
    println!("   ├─ Published framesets: {}", archive.max_published_framesets);
    println!("   ├─ Detached frames: {}", archive.max_detached_refs);
    println!("   └─ Tolerance: {:?}", archive.tolerance);

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(modes: bool, options: bool) -> InfoArgs {
        InfoArgs {
            config: super::super::tests::mock_profile_path(),
            json: true,
            modes,
            options,
        }
    }

    #[test]
    fn test_json_omits_unrequested_sections() {
        let args = args(false, false);
        let profile = load_profile(&args.config).unwrap();
        let value = serde_json::to_value(build_profile_info(&profile, &args)).unwrap();

        assert_eq!(value["name"], "Mock D4");
        assert_eq!(value["motion_subdevice"], 3);
        assert!(value.get("modes").is_none());
        assert!(value.get("options").is_none());
    }

    #[test]
    fn test_json_includes_modes_and_options() {
        let args = args(true, true);
        let profile = load_profile(&args.config).unwrap();
        let value = serde_json::to_value(build_profile_info(&profile, &args)).unwrap();

        let modes = value["modes"].as_array().unwrap();
        assert_eq!(modes.len(), profile.device.modes.len());
        assert_eq!(value["stream_subdevices"][3]["stream"], "color");
        assert!(!value["options"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_run_info_text() {
        let mut args = args(true, true);
        args.json = false;
        run_info(&args).unwrap();
    }
}
