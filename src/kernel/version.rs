//! Kernel version parsing and ordering.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::ResolveError;

// Leading "X.Y[.Z]" of a release string such as "6.17.2-arch1-1" or "6.18.0-rc3".
static RELEASE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)\.(\d+)(?:\.(\d+))?").expect("Invalid kernel release regex")
});

/// Numeric kernel version, ordered component-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KernelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl KernelVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        KernelVersion { major, minor, patch }
    }

    /// Parse the numeric prefix of a `uname -r` style release string.
    pub fn from_release(release: &str) -> Result<Self, ResolveError> {
        let caps = RELEASE_REGEX
            .captures(release.trim())
            .ok_or_else(|| ResolveError::InvalidVersion(release.to_string()))?;

        let component = |idx: usize| -> Result<u32, ResolveError> {
            match caps.get(idx) {
                Some(m) => m
                    .as_str()
                    .parse::<u32>()
                    .map_err(|_| ResolveError::InvalidVersion(release.to_string())),
                None => Ok(0),
            }
        };

        Ok(KernelVersion {
            major: component(1)?,
            minor: component(2)?,
            patch: component(3)?,
        })
    }

    /// The `major.minor` series this version belongs to.
    pub fn series(&self) -> KernelSeries {
        KernelSeries {
            major: self.major,
            minor: self.minor,
        }
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for KernelVersion {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KernelVersion::from_release(s)
    }
}

impl Serialize for KernelVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for KernelVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        KernelVersion::from_release(&raw).map_err(serde::de::Error::custom)
    }
}

/// A `major.minor` kernel series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KernelSeries {
    pub major: u32,
    pub minor: u32,
}

impl KernelSeries {
    /// First release of the series.
    pub fn base(&self) -> KernelVersion {
        KernelVersion::new(self.major, self.minor, 0)
    }
}

impl fmt::Display for KernelSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for KernelSeries {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(KernelVersion::from_release(s)?.series())
    }
}

impl Serialize for KernelSeries {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for KernelSeries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<KernelSeries>().map_err(serde::de::Error::custom)
    }
}
