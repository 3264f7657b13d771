//! Engine configuration
//!
//! Loaded from a JSON file; every field has a default so a partial or
//! missing file still yields a usable configuration.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::card::SpecVersion;
use crate::error::{EuiccError, Result};

/// AID of the ISD-R application
pub const ISD_R_AID: &str = "A0000005591010FFFFFFFF8900000100";

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "EUICC_LPA_CONFIG";

const DEFAULT_CONFIG_DIR: &str = ".euicc-lpa";
const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Local profile assistant configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LpaConfig {
    /// Device capabilities as "name,major-version" items
    pub device_capabilities: Vec<String>,
    /// Oldest SGP.22 version accepted
    pub min_spec_version: SpecVersion,
    /// Newest SGP.22 version accepted, unbounded when absent
    pub max_spec_version: Option<SpecVersion>,
    pub supports_multiple_enabled_profiles: bool,
    /// ISD-R AID as hex
    pub isd_r_aid: String,
    /// Use extended length APDUs for STORE DATA
    pub extended_apdu: bool,
}

impl Default for LpaConfig {
    fn default() -> Self {
        Self {
            device_capabilities: vec!["gsm,11".into(), "utran,11".into(), "eutran,11".into()],
            min_spec_version: SpecVersion::V2_0,
            max_spec_version: None,
            supports_multiple_enabled_profiles: false,
            isd_r_aid: ISD_R_AID.to_string(),
            extended_apdu: false,
        }
    }
}

impl LpaConfig {
    /// Default configuration file location
    ///
    /// `EUICC_LPA_CONFIG` wins, then `~/.euicc-lpa/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::home_dir().map(|home| home.join(DEFAULT_CONFIG_DIR).join(DEFAULT_CONFIG_FILE))
    }

    /// Load from `path`, or from [`LpaConfig::default_path`] when None
    ///
    /// A missing file yields the defaults; an unreadable or invalid one is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => path,
            None => {
                debug!("No configuration location, using defaults");
                return Ok(Self::default());
            }
        };

        if !path.exists() {
            info!("No configuration at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| EuiccError::Config(format!("cannot read {:?}: {}", path, e)))?;
        let config = Self::from_json(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(content).map_err(|e| EuiccError::Config(e.to_string()))?;
        config.isd_r_aid_bytes()?;
        Ok(config)
    }

    /// ISD-R AID as bytes
    pub fn isd_r_aid_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(&self.isd_r_aid)
            .map_err(|e| EuiccError::Config(format!("invalid ISD-R AID '{}': {}", self.isd_r_aid, e)))
    }
}
