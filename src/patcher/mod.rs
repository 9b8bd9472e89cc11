//! # Patch
//!
//! This module covers patches, which overwrite a fixed location with one of two byte sequences of equal
//! length.
//!
//! Patching is stateless: [`set_patch`] writes whichever sequence is requested and never reads back
//! what was there. Callers that want to remember whether a patch is on keep a [`PatchState`], and
//! [`probe_patch`] can inspect the location when they don't know.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec::HexBytes;
use crate::error::{Error, Result};
use crate::provider::{Address, MemoryProvider, PointerWidth};

/// A fixed-address byte substitution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchRecord {
    /// Location of the patch
    pub address: Address,
    /// Bytes written when the patch is applied
    pub active: HexBytes,
    /// Original bytes, written when the patch is reverted
    pub inactive: HexBytes,
}

impl PatchRecord {
    /// Creates a new record
    pub fn new(address: Address, active: impl Into<Vec<u8>>, inactive: impl Into<Vec<u8>>) -> Self {
        Self {
            address,
            active: HexBytes::new(active.into()),
            inactive: HexBytes::new(inactive.into()),
        }
    }

    /// Length of the patched range
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Returns `true` if the record patches nothing
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Checks that both sequences are non-empty and the same length
    pub fn validate(&self) -> Result<()> {
        if self.active.is_empty() || self.inactive.is_empty() {
            return Err(Error::InvariantViolation(format!(
                "patch at {:#x} has an empty byte sequence",
                self.address
            )));
        }
        if self.active.len() != self.inactive.len() {
            return Err(Error::InvariantViolation(format!(
                "patch at {:#x} has {} active bytes but {} inactive bytes",
                self.address,
                self.active.len(),
                self.inactive.len()
            )));
        }
        Ok(())
    }

    /// Bytes written for `state`
    pub fn bytes(&self, state: PatchState) -> &[u8] {
        match state {
            PatchState::Active => &self.active,
            PatchState::Inactive => &self.inactive,
        }
    }

    /// Same record moved `delta` bytes further along, used for module-relative addresses
    pub fn rebased(&self, delta: Address, width: PointerWidth) -> Result<Self> {
        Ok(Self {
            address: width.rebase(self.address, delta)?,
            ..self.clone()
        })
    }
}

/// Whether a patch is applied
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PatchState {
    /// The original bytes are in place
    #[default]
    Inactive,
    /// The patch bytes are in place
    Active,
}

impl PatchState {
    /// Returns `true` for [`PatchState::Active`]
    pub fn is_active(self) -> bool {
        self == Self::Active
    }

    /// The other state
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Active => Self::Inactive,
            Self::Inactive => Self::Active,
        }
    }
}

impl From<bool> for PatchState {
    fn from(active: bool) -> Self {
        if active {
            Self::Active
        } else {
            Self::Inactive
        }
    }
}

/// Writes the active bytes of `record` when `active` is set, the inactive bytes otherwise
///
/// The record is validated before anything is written.
pub fn set_patch<P: MemoryProvider>(
    provider: &P,
    handle: &P::Handle,
    record: &PatchRecord,
    active: bool,
) -> Result<()> {
    record.validate()?;
    let state = PatchState::from(active);
    let bytes = record.bytes(state);
    debug!(address = record.address, len = bytes.len(), ?state, "writing patch");
    provider.write_memory(handle, record.address, bytes)
}

/// Reads the patched range and reports which of the two sequences is there
///
/// Returns `None` when the range holds neither, for example when the target is a different version.
pub fn probe_patch<P: MemoryProvider>(
    provider: &P,
    handle: &P::Handle,
    record: &PatchRecord,
) -> Result<Option<PatchState>> {
    record.validate()?;
    let current = provider.read_memory(handle, record.address, record.len())?;
    let state = if current == *record.active {
        Some(PatchState::Active)
    } else if current == *record.inactive {
        Some(PatchState::Inactive)
    } else {
        None
    };
    debug!(address = record.address, ?state, "probed patch");
    Ok(state)
}

/// Applies `record` until the returned guard is dropped or restored
pub fn apply_scoped<'a, P: MemoryProvider>(
    provider: &'a P,
    handle: &'a P::Handle,
    record: &'a PatchRecord,
) -> Result<PatchGuard<'a, P>> {
    set_patch(provider, handle, record, true)?;
    Ok(PatchGuard {
        provider,
        handle,
        record,
        applied: true,
    })
}

/// Guard for an applied patch
///
/// The original bytes are written back when the guard is dropped. Use [`PatchGuard::restore`] to
/// find out whether that write succeeded.
pub struct PatchGuard<'a, P: MemoryProvider> {
    /// Provider the patch was written through
    provider: &'a P,
    /// Process the patch was written to
    handle: &'a P::Handle,
    /// The applied patch
    record: &'a PatchRecord,
    /// Cleared once the original bytes are back
    applied: bool,
}

impl<P: MemoryProvider> PatchGuard<'_, P> {
    /// The patch this guard reverts
    pub fn record(&self) -> &PatchRecord {
        self.record
    }

    /// Writes the original bytes back
    pub fn restore(mut self) -> Result<()> {
        self.applied = false;
        set_patch(self.provider, self.handle, self.record, false)
    }
}

impl<P: MemoryProvider> Drop for PatchGuard<'_, P> {
    fn drop(&mut self) {
        if self.applied {
            if let Err(e) = set_patch(self.provider, self.handle, self.record, false) {
                warn!(address = self.record.address, error = %e, "failed to revert patch");
            }
        }
    }
}
