//! Fallbacks for platforms without module lookup or remote allocation support

use std::io;

use crate::error::{Error, Result};
use crate::provider::Address;

/// Module lookup is not implemented on this platform
pub(crate) fn module_base(_pid: u32, module_name: &str) -> Result<Address> {
    Err(Error::ModuleNotFound(format!(
        "{module_name} (module lookup is not supported on this platform)"
    )))
}

/// There is no protection-ignoring write path on this platform
pub(crate) fn write_protected(_pid: u32, _address: Address, _data: &[u8]) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "no protected write fallback on this platform",
    ))
}

/// Remote allocation is not implemented on this platform
pub(crate) fn allocate(_pid: u32, size: usize) -> Result<Address> {
    Err(Error::Allocation {
        size,
        source: io::Error::new(
            io::ErrorKind::Unsupported,
            "remote allocation is not supported on this platform",
        ),
    })
}
