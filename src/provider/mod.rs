//! # Provider
//!
//! This module covers memory providers, which give the engine access to the memory of a target process.
//!
//! The engine never touches memory itself. Everything it does is expressed through the five
//! operations of [`MemoryProvider`], so the same pointer chains, patches and trampolines can be
//! driven against a real process ([`SystemProcess`]), the current process ([`LocalProcess`]) or a
//! simulated one ([`InMemoryProvider`]).

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub mod local;
pub mod stub;
pub mod system;

pub use local::{LocalHandle, LocalProcess};
pub use stub::{InMemoryHandle, InMemoryProvider};
pub use system::{SystemHandle, SystemProcess};

#[cfg(target_os = "linux")]
#[path = "platform/linux.rs"]
mod platform;
#[cfg(windows)]
#[path = "platform/windows.rs"]
mod platform;
#[cfg(not(any(target_os = "linux", windows)))]
#[path = "platform/unsupported.rs"]
mod platform;

/// An address in the target process.
///
/// Always 64 bits wide so that one type serves both 32- and 64-bit targets. The width the target
/// actually uses is described by [`PointerWidth`].
pub type Address = u64;

/// Capability for reading, writing and allocating memory in another process
///
/// Implementations are expected to report failures with the matching [`Error`] variant:
/// [`Error::ProcessNotFound`], [`Error::MemoryAccess`], [`Error::ModuleNotFound`] and
/// [`Error::Allocation`]. Nothing is retried.
pub trait MemoryProvider {
    /// Opaque identifier for an attached process
    type Handle;

    /// Looks up a running process by name
    fn find_process(&self, name: &str) -> Result<Self::Handle>;

    /// Reads exactly `size` bytes at `address`
    fn read_memory(&self, handle: &Self::Handle, address: Address, size: usize) -> Result<Vec<u8>>;

    /// Writes all of `data` at `address`
    fn write_memory(&self, handle: &Self::Handle, address: Address, data: &[u8]) -> Result<()>;

    /// Returns the load address of the module named `module_name`
    fn module_base_address(&self, handle: &Self::Handle, module_name: &str) -> Result<Address>;

    /// Allocates `size` bytes of readable, writable and executable memory in the process
    fn allocate_memory(&self, handle: &Self::Handle, size: usize) -> Result<Address>;
}

impl<P: MemoryProvider + ?Sized> MemoryProvider for &P {
    type Handle = P::Handle;

    fn find_process(&self, name: &str) -> Result<Self::Handle> {
        (**self).find_process(name)
    }

    fn read_memory(&self, handle: &Self::Handle, address: Address, size: usize) -> Result<Vec<u8>> {
        (**self).read_memory(handle, address, size)
    }

    fn write_memory(&self, handle: &Self::Handle, address: Address, data: &[u8]) -> Result<()> {
        (**self).write_memory(handle, address, data)
    }

    fn module_base_address(&self, handle: &Self::Handle, module_name: &str) -> Result<Address> {
        (**self).module_base_address(handle, module_name)
    }

    fn allocate_memory(&self, handle: &Self::Handle, size: usize) -> Result<Address> {
        (**self).allocate_memory(handle, size)
    }
}

/// Pointer width of a target process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum PointerWidth {
    /// 32-bit process, 4 byte pointers
    Bits32,
    /// 64-bit process, 8 byte pointers
    Bits64,
}

impl PointerWidth {
    /// Pointer width matching the host process
    pub fn native() -> Self {
        if cfg!(target_pointer_width = "64") {
            Self::Bits64
        } else {
            Self::Bits32
        }
    }

    /// Size of a pointer in bytes
    pub fn bytes(self) -> usize {
        match self {
            Self::Bits32 => 4,
            Self::Bits64 => 8,
        }
    }

    /// Size of a pointer in bits
    pub fn bits(self) -> u32 {
        match self {
            Self::Bits32 => 32,
            Self::Bits64 => 64,
        }
    }

    /// Highest address a process of this width can use
    pub fn max_address(self) -> Address {
        match self {
            Self::Bits32 => u64::from(u32::MAX),
            Self::Bits64 => u64::MAX,
        }
    }

    /// Adds a signed offset to `address`, failing if the result leaves the address space
    pub fn offset(self, address: Address, offset: i64) -> Result<Address> {
        address
            .checked_add_signed(offset)
            .filter(|&result| result <= self.max_address())
            .ok_or_else(|| {
                Error::Range(format!(
                    "{address:#x} {} {:#x} leaves the {}-bit address space",
                    if offset < 0 { '-' } else { '+' },
                    offset.unsigned_abs(),
                    self.bits()
                ))
            })
    }

    /// Moves `address` forward by `delta`, failing if the result leaves the address space
    pub fn rebase(self, address: Address, delta: Address) -> Result<Address> {
        address
            .checked_add(delta)
            .filter(|&result| result <= self.max_address())
            .ok_or_else(|| {
                Error::Range(format!(
                    "{address:#x} + {delta:#x} leaves the {}-bit address space",
                    self.bits()
                ))
            })
    }
}

impl TryFrom<u32> for PointerWidth {
    type Error = Error;

    fn try_from(bits: u32) -> Result<Self> {
        match bits {
            32 => Ok(Self::Bits32),
            64 => Ok(Self::Bits64),
            other => Err(Error::Range(format!(
                "unsupported pointer width {other}, expected 32 or 64"
            ))),
        }
    }
}

impl From<PointerWidth> for u32 {
    fn from(width: PointerWidth) -> Self {
        width.bits()
    }
}

impl Display for PointerWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}
