//! # Config Loader
//!
//! Device profile loading.
//!
//! Responsibilities:
//! - Parse TOML/JSON profile files
//! - Validate the capability table, stream requests and archive capacities
//! - Produce a [`DeviceProfile`]
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let profile = ConfigLoader::load_from_path(Path::new("configs/mock_d4.toml")).unwrap();
//! println!("Device: {}", profile.device.name);
//! ```

mod parser;
mod validator;

pub use contracts::DeviceProfile;
pub use parser::ConfigFormat;
pub use validator::validate_device_info;

use contracts::ContractError;
use std::path::Path;

/// Profile loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load a profile from a file path
    ///
    /// The format is detected from the extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<DeviceProfile, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load a profile from a string
    pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<DeviceProfile, ContractError> {
        let profile = parser::parse(content, format)?;
        validator::validate(&profile)?;
        Ok(profile)
    }

    pub fn to_toml(profile: &DeviceProfile) -> Result<String, ContractError> {
        toml::to_string_pretty(profile)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    pub fn to_json(profile: &DeviceProfile) -> Result<String, ContractError> {
        serde_json::to_string_pretty(profile)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    fn read_file(path: &Path) -> Result<String, ContractError> {
        Ok(std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::StreamId;
    use std::io::Write;

    const MOCK_PROFILE: &str = include_str!("../../../configs/mock_d4.toml");

    #[test]
    fn test_load_bundled_profile() {
        let profile = ConfigLoader::load_from_str(MOCK_PROFILE, ConfigFormat::Toml).unwrap();
        assert_eq!(profile.device.subdevice_of(StreamId::Color), Some(1));
        assert!(!profile.streams.is_empty());
    }

    #[test]
    fn test_round_trip_json() {
        let profile = ConfigLoader::load_from_str(MOCK_PROFILE, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&profile).unwrap();
        let again = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(profile, again);
    }

    #[test]
    fn test_load_from_path_detects_format() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(MOCK_PROFILE.as_bytes()).unwrap();
        let profile = ConfigLoader::load_from_path(file.path()).unwrap();
        assert_eq!(profile.device.name, "Mock D4");

        let yaml = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let err = ConfigLoader::load_from_path(yaml.path()).unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let content = MOCK_PROFILE.replace("name = \"Mock D4\"", "name = \"\"");
        let err = ConfigLoader::load_from_str(&content, ConfigFormat::Toml).unwrap_err();
        assert!(matches!(err, ContractError::ConfigValidation { .. }));
    }
}
