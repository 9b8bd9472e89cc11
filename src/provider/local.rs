//! Provider for the current process
//!
//! Reads and writes go straight through raw pointers after checking the range is mapped, and
//! writes to read-only pages lift the page protection for the duration of the write.

use std::io;
use std::ptr;
use std::sync::{Mutex, PoisonError};

use region::Protection;
use tracing::debug;

use super::{platform, Address, MemoryProvider};
use crate::error::{Error, Result};

/// Handle to the current process
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalHandle {
    /// Our own process id
    pub pid: u32,
}

/// Provider that edits the memory of the process it runs in
///
/// Allocations made through this provider stay alive as long as the provider does.
pub struct LocalProcess {
    /// Allocations handed out by `allocate_memory`
    allocations: Mutex<Vec<region::Allocation>>,
}

impl LocalProcess {
    /// Creates a new [`LocalProcess`]
    ///
    /// # Safety
    ///
    /// This provider writes to whatever address it is given.
    /// The caller must ensure that every address written through it is either memory not tracked by Rust
    /// (for example memory returned by [`MemoryProvider::allocate_memory`]) or memory for which the
    /// write cannot invalidate anything Rust assumes about it.
    pub unsafe fn new() -> Self {
        Self {
            allocations: Mutex::new(Vec::new()),
        }
    }

    /// Handle to the current process without a name lookup
    pub fn current(&self) -> LocalHandle {
        LocalHandle {
            pid: std::process::id(),
        }
    }
}

/// Access rights over a fully mapped range
struct RangeAccess {
    /// Every page in the range is readable
    readable: bool,
    /// Every page in the range is writable
    writable: bool,
}

/// Checks that `[address, address + size)` is mapped and reports its protection
fn query(address: usize, size: usize) -> io::Result<RangeAccess> {
    let end = address
        .checked_add(size)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "range overflows"))?;
    let mut covered = address;
    let mut access = RangeAccess {
        readable: true,
        writable: true,
    };

    let regions = region::query_range(address as *const u8, size).map_err(region_error)?;
    for region in regions {
        let region = region.map_err(region_error)?;
        let range = region.as_range();
        if range.start > covered {
            break;
        }
        let protection = region.protection();
        access.readable &= protection.contains(Protection::READ);
        access.writable &= protection.contains(Protection::WRITE);
        covered = covered.max(range.end);
        if covered >= end {
            return Ok(access);
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AddrNotAvailable,
        "range is not fully mapped",
    ))
}

/// Converts a `region` error into an `io::Error`
fn region_error(error: region::Error) -> io::Error {
    io::Error::other(error.to_string())
}

/// Converts a target address into a pointer-sized integer
fn host_address(address: Address, size: usize) -> Result<usize> {
    usize::try_from(address).map_err(|_| {
        Error::memory_access(
            address,
            size,
            io::Error::new(io::ErrorKind::InvalidInput, "address out of range"),
        )
    })
}

impl MemoryProvider for LocalProcess {
    type Handle = LocalHandle;

    fn find_process(&self, name: &str) -> Result<Self::Handle> {
        let exe = std::env::current_exe().map_err(|e| Error::ProcessNotFound(format!("{name} ({e})")))?;
        let matches = exe
            .file_name()
            .and_then(|file| file.to_str())
            .is_some_and(|file| file.eq_ignore_ascii_case(name));
        if matches {
            Ok(self.current())
        } else {
            Err(Error::ProcessNotFound(name.to_owned()))
        }
    }

    fn read_memory(&self, _handle: &Self::Handle, address: Address, size: usize) -> Result<Vec<u8>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let host = host_address(address, size)?;
        let access = query(host, size).map_err(|e| Error::memory_access(address, size, e))?;
        if !access.readable {
            return Err(Error::memory_access(
                address,
                size,
                io::Error::new(io::ErrorKind::PermissionDenied, "range is not readable"),
            ));
        }

        let mut buf = vec![0u8; size];
        // Safety: the whole range was just checked to be mapped and readable
        unsafe { ptr::copy_nonoverlapping(host as *const u8, buf.as_mut_ptr(), size) };
        Ok(buf)
    }

    fn write_memory(&self, _handle: &Self::Handle, address: Address, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let size = data.len();
        let host = host_address(address, size)?;
        let access = query(host, size).map_err(|e| Error::memory_access(address, size, e))?;

        // Safety: the range is mapped, and `LocalProcess::new` requires the caller to vouch for the target
        unsafe {
            let _guard = if access.writable {
                None
            } else {
                debug!(address, size, "lifting page protection for write");
                Some(
                    region::protect_with_handle(
                        host as *const u8,
                        size,
                        Protection::READ_WRITE_EXECUTE,
                    )
                    .map_err(|e| Error::memory_access(address, size, region_error(e)))?,
                )
            };
            ptr::copy_nonoverlapping(data.as_ptr(), host as *mut u8, size);
        }
        Ok(())
    }

    fn module_base_address(&self, handle: &Self::Handle, module_name: &str) -> Result<Address> {
        platform::module_base(handle.pid, module_name)
    }

    fn allocate_memory(&self, _handle: &Self::Handle, size: usize) -> Result<Address> {
        let allocation = region::alloc(size, Protection::READ_WRITE_EXECUTE).map_err(|e| {
            Error::Allocation {
                size,
                source: region_error(e),
            }
        })?;
        let address = allocation.as_ptr::<u8>() as usize as Address;
        self.allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(allocation);
        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use region::Protection;

    use super::*;

    /// Value read through the provider by address
    static MAGIC: u32 = 0xDEAD_BEEF;

    #[test]
    /// Reads of static data see the same bytes Rust does
    fn test_read_static() {
        let provider = unsafe { LocalProcess::new() };
        let handle = provider.current();
        let address = &MAGIC as *const u32 as usize as Address;

        assert_eq!(
            provider.read_memory(&handle, address, 4).unwrap(),
            0xDEAD_BEEFu32.to_le_bytes()
        );
    }

    #[test]
    /// Allocations are zeroed, readable and writable
    fn test_allocate_write_read() {
        let provider = unsafe { LocalProcess::new() };
        let handle = provider.current();

        let address = provider.allocate_memory(&handle, 64).unwrap();
        assert_eq!(provider.read_memory(&handle, address, 4).unwrap(), [0; 4]);

        provider.write_memory(&handle, address + 2, &[0xE9, 0x01]).unwrap();
        assert_eq!(
            provider.read_memory(&handle, address, 4).unwrap(),
            [0, 0, 0xE9, 0x01]
        );
    }

    #[test]
    /// Writing read-only memory lifts the protection temporarily and restores it afterwards
    fn test_write_read_only() {
        let provider = unsafe { LocalProcess::new() };
        let handle = provider.current();

        let address = provider.allocate_memory(&handle, 16).unwrap();
        let ptr = address as usize as *const u8;
        unsafe { region::protect(ptr, 16, Protection::READ).unwrap() };

        // sanity check
        for region in region::query_range(ptr, 16).unwrap() {
            assert_eq!(region.unwrap().protection(), Protection::READ);
        }

        provider.write_memory(&handle, address, &[0x90, 0x90]).unwrap();
        assert_eq!(
            provider.read_memory(&handle, address, 3).unwrap(),
            [0x90, 0x90, 0x00]
        );

        // make sure permissions were restored
        for region in region::query_range(ptr, 16).unwrap() {
            assert_eq!(region.unwrap().protection(), Protection::READ);
        }
    }

    #[test]
    /// Unmapped memory is reported instead of faulting
    fn test_unmapped() {
        let provider = unsafe { LocalProcess::new() };
        let handle = provider.current();

        assert!(matches!(
            provider.read_memory(&handle, 0, 4),
            Err(Error::MemoryAccess { address: 0, size: 4, .. })
        ));
        assert!(provider.write_memory(&handle, 0, &[1]).is_err());
    }

    #[test]
    /// The current executable is found by its file name only
    fn test_find_process() {
        let provider = unsafe { LocalProcess::new() };
        let exe = std::env::current_exe().unwrap();
        let name = exe.file_name().unwrap().to_str().unwrap();

        assert_eq!(provider.find_process(name).unwrap(), provider.current());
        assert!(matches!(
            provider.find_process("not-this-process.exe"),
            Err(Error::ProcessNotFound(_))
        ));
    }
}
