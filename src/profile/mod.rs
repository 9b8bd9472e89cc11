//! # Profile
//!
//! This module covers target profiles, which hold every address, offset chain and byte sequence the
//! engine needs for one build of one target program.
//!
//! Profiles are TOML files:
//!
//! ```toml
//! name = "Plants vs. Zombies 1.0.0.1051"
//! process = "PlantsVsZombies.exe"
//! pointer_width = 32
//!
//! [values.sun]
//! base = 0x006A9EC0
//! offsets = [0x0, 0x768, 0x5560]
//! size = 4
//!
//! [patches.sun_never_decreases]
//! address = 0x008AF806
//! active = "90 90 90 90 90 90"
//! inactive = "89 B7 60 55 00 00"
//!
//! [trampolines.overlap_planting]
//! hook = 0x0040E020
//! restore = "83 EC 18 53 55"
//! cave_size = 2048
//! body = "31 C0 C2 0C 00 83 EC 18 53 55 E9 16 E0 F0 FE"
//! ```
//!
//! When `module` is set, value bases, patch addresses and hook addresses are relative to that
//! module's load address.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::hook::TrampolineRecord;
use crate::patcher::PatchRecord;
use crate::pointer::PointerChain;
use crate::provider::{Address, PointerWidth};

/// Profile compiled into the crate, for Plants vs. Zombies 1.0.0.1051
pub const BUILTIN_PROFILE: &str = include_str!("../../profiles/plants_vs_zombies.toml");

/// A value reached through a pointer chain
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValueField {
    /// Address the chain starts from
    pub base: Address,
    /// Offsets followed from `base`
    pub offsets: Vec<i64>,
    /// Width of the value in bytes
    pub size: usize,
}

impl ValueField {
    /// The chain leading to this value
    pub fn chain(&self) -> PointerChain {
        PointerChain::new(self.base, self.offsets.clone())
    }
}

/// Everything known about one target program
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetProfile {
    /// Human readable name, usually including the program version
    pub name: String,
    /// Process name to attach to
    pub process: String,
    /// Module the addresses are relative to, absolute addresses if unset
    #[serde(default)]
    pub module: Option<String>,
    /// Pointer width of the target
    pub pointer_width: PointerWidth,
    /// Values read and written through pointer chains
    #[serde(default)]
    pub values: BTreeMap<String, ValueField>,
    /// Code patches
    #[serde(default)]
    pub patches: BTreeMap<String, PatchRecord>,
    /// Code cave hooks
    #[serde(default)]
    pub trampolines: BTreeMap<String, TrampolineRecord>,
}

impl TargetProfile {
    /// Loads and validates a profile from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let profile: Self = text.parse()?;
        debug!(path = %path.display(), name = %profile.name, "loaded profile");
        Ok(profile)
    }

    /// The built-in Plants vs. Zombies profile
    pub fn builtin() -> Result<Self> {
        BUILTIN_PROFILE.parse()
    }

    /// Checks every record in the profile
    pub fn validate(&self) -> Result<()> {
        if self.process.is_empty() {
            return Err(Error::Profile(format!("{}: process name is empty", self.name)));
        }
        for (name, value) in &self.values {
            if value.offsets.is_empty() {
                return Err(Error::Profile(format!("value {name}: offsets are empty")));
            }
            if !matches!(value.size, 1 | 2 | 4 | 8) {
                return Err(Error::Profile(format!(
                    "value {name}: size {} is not 1, 2, 4 or 8",
                    value.size
                )));
            }
        }
        for (name, patch) in &self.patches {
            patch
                .validate()
                .map_err(|e| Error::Profile(format!("patch {name}: {e}")))?;
        }
        for (name, trampoline) in &self.trampolines {
            trampoline
                .validate()
                .map_err(|e| Error::Profile(format!("trampoline {name}: {e}")))?;
        }
        Ok(())
    }

    /// Looks up a value field by name
    pub fn value(&self, name: &str) -> Result<&ValueField> {
        self.values
            .get(name)
            .ok_or_else(|| self.unknown("value", name))
    }

    /// Looks up a patch by name
    pub fn patch(&self, name: &str) -> Result<&PatchRecord> {
        self.patches
            .get(name)
            .ok_or_else(|| self.unknown("patch", name))
    }

    /// Looks up a trampoline by name
    pub fn trampoline(&self, name: &str) -> Result<&TrampolineRecord> {
        self.trampolines
            .get(name)
            .ok_or_else(|| self.unknown("trampoline", name))
    }

    /// Error for a name the profile doesn't define
    fn unknown(&self, kind: &str, name: &str) -> Error {
        Error::Profile(format!("{} has no {kind} named {name:?}", self.name))
    }
}

impl FromStr for TargetProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let profile: Self = toml::from_str(s)?;
        profile.validate()?;
        Ok(profile)
    }
}
