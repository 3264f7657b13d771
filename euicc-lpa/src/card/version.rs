//! SGP.22 specification version
//!
//! The ISD-R announces the version it implements in the response to the
//! SELECT that opens the logical channel. Several request layouts depend on it.

use std::fmt;
use std::str::FromStr;

use log::error;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::tlv::{decode, tags};

/// SGP.22 version triple, ordered like a semantic version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl SpecVersion {
    /// SGP.22 v2.0.0, the oldest version this engine talks to
    pub const V2_0: SpecVersion = SpecVersion::new(2, 0, 0);
    /// SGP.22 v2.1.0, which changed the IMEI layout and BPP checks
    pub const V2_1: SpecVersion = SpecVersion::new(2, 1, 0);

    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Build from the three version bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [major, minor, patch] => Some(Self::new(*major, *minor, *patch)),
            _ => None,
        }
    }

    /// Extract the version from a SELECT response
    ///
    /// The version sits under tag `82` of the ISD-R application template
    /// (`E0`), which is either the root or a child of it.
    pub fn from_open_channel_response(data: &[u8]) -> Option<Self> {
        let root = match decode(data) {
            Ok(root) => root,
            Err(e) => {
                error!("Cannot decode select response: {}", e);
                return None;
            }
        };

        let node = if root.tag == tags::ISD_R_APP_TEMPLATE {
            root.child(&[tags::VERSION])
        } else {
            root.child(&[tags::ISD_R_APP_TEMPLATE, tags::VERSION])
        };

        let version = node
            .ok()
            .and_then(|n| n.as_bytes().ok())
            .and_then(Self::from_bytes);
        if version.is_none() {
            error!("Cannot parse version from select response: {}", hex::encode_upper(data));
        }
        version
    }
}

impl fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SpecVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(format!("invalid version '{}': expected major.minor.patch", s));
        }
        let mut numbers = [0u8; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| format!("invalid version component '{}' in '{}'", part, s))?;
        }
        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }
}

impl Serialize for SpecVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SpecVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
