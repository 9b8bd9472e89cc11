//! # Pointer
//!
//! This module covers pointer chains, which locate a value by repeatedly dereferencing from a base
//! address.
//!
//! Every offset but the last is added to the current address and the pointer stored there becomes
//! the new current address. The last offset is added to the final pointer and is never read, so
//! a chain with a single offset is just `base + offset` and touches no memory at all.

use tracing::trace;

use crate::codec::decode_le;
use crate::error::{Error, Result};
use crate::provider::{Address, MemoryProvider, PointerWidth};

/// Resolves `base` through `offsets` to the address of the value they point to
///
/// Reads made while walking the chain that fail are reported as [`Error::UnresolvedPointer`]
/// with the index of the offset being followed.
pub fn resolve_address<P: MemoryProvider>(
    provider: &P,
    handle: &P::Handle,
    base: Address,
    offsets: &[i64],
    width: PointerWidth,
) -> Result<Address> {
    let (&last, intermediate) = offsets.split_last().ok_or_else(|| {
        Error::InvariantViolation("pointer chain must have at least one offset".to_owned())
    })?;

    let mut current = base;
    for (level, &offset) in intermediate.iter().enumerate() {
        let slot = width.offset(current, offset)?;
        let bytes = provider
            .read_memory(handle, slot, width.bytes())
            .map_err(|e| Error::UnresolvedPointer {
                level,
                address: slot,
                source: Box::new(e),
            })?;
        current = decode_le(&bytes)?;
        trace!(level, slot, value = current, "followed pointer");
    }

    let address = width.offset(current, last)?;
    trace!(level = intermediate.len(), address, "resolved pointer chain");
    Ok(address)
}

/// Resolves a chain and reads `size` bytes at the result
pub fn read_resolved<P: MemoryProvider>(
    provider: &P,
    handle: &P::Handle,
    base: Address,
    offsets: &[i64],
    width: PointerWidth,
    size: usize,
) -> Result<Vec<u8>> {
    let address = resolve_address(provider, handle, base, offsets, width)?;
    provider.read_memory(handle, address, size)
}

/// Resolves a chain and writes `data` at the result
///
/// The length of `data` is not checked against anything, the caller decides how much to write.
pub fn write_resolved<P: MemoryProvider>(
    provider: &P,
    handle: &P::Handle,
    base: Address,
    offsets: &[i64],
    width: PointerWidth,
    data: &[u8],
) -> Result<()> {
    let address = resolve_address(provider, handle, base, offsets, width)?;
    provider.write_memory(handle, address, data)
}

/// A base address and the offsets followed from it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointerChain {
    /// Address the chain starts from
    pub base: Address,
    /// Offsets applied in order, never empty
    pub offsets: Vec<i64>,
}

impl PointerChain {
    /// Creates a new chain
    pub fn new(base: Address, offsets: impl Into<Vec<i64>>) -> Self {
        Self {
            base,
            offsets: offsets.into(),
        }
    }

    /// Same chain starting `delta` bytes further along, used for module-relative bases
    pub fn rebased(&self, delta: Address, width: PointerWidth) -> Result<Self> {
        Ok(Self {
            base: width.rebase(self.base, delta)?,
            offsets: self.offsets.clone(),
        })
    }

    /// See [`resolve_address`]
    pub fn resolve<P: MemoryProvider>(
        &self,
        provider: &P,
        handle: &P::Handle,
        width: PointerWidth,
    ) -> Result<Address> {
        resolve_address(provider, handle, self.base, &self.offsets, width)
    }

    /// See [`read_resolved`]
    pub fn read<P: MemoryProvider>(
        &self,
        provider: &P,
        handle: &P::Handle,
        width: PointerWidth,
        size: usize,
    ) -> Result<Vec<u8>> {
        read_resolved(provider, handle, self.base, &self.offsets, width, size)
    }

    /// See [`write_resolved`]
    pub fn write<P: MemoryProvider>(
        &self,
        provider: &P,
        handle: &P::Handle,
        width: PointerWidth,
        data: &[u8],
    ) -> Result<()> {
        write_resolved(provider, handle, self.base, &self.offsets, width, data)
    }
}
