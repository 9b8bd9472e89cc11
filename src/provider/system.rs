//! Provider for other processes running on this machine
//!
//! Processes are found with `sysinfo`, memory is read and written with `process-memory`, and the
//! platform module supplies module lookup and remote allocation where the OS allows it.

use std::io;

use process_memory::{CopyAddress, ProcessHandle, PutAddress, TryIntoProcessHandle};
use sysinfo::System;
use tracing::{debug, info};

use super::{platform, Address, MemoryProvider};
use crate::error::{Error, Result};

/// An attached process
#[derive(Debug, Clone)]
pub struct SystemHandle {
    /// Process id
    pub pid: u32,
    /// Name the process was found by
    pub name: String,
    /// Handle used for reads and writes
    process: ProcessHandle,
}

/// Provider backed by the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcess;

impl SystemProcess {
    /// Creates a new [`SystemProcess`]
    pub fn new() -> Self {
        Self
    }

    /// Attaches to a known process id
    pub fn attach(&self, pid: u32, name: impl Into<String>) -> Result<SystemHandle> {
        let name = name.into();
        #[allow(clippy::cast_possible_wrap, clippy::unnecessary_cast)]
        let process = (pid as process_memory::Pid)
            .try_into_process_handle()
            .map_err(|e| Error::ProcessNotFound(format!("{name} (pid {pid}: {e})")))?;
        info!(pid, name = %name, "attached to process");
        Ok(SystemHandle { pid, name, process })
    }
}

/// Converts a target address into a host pointer-sized integer
fn host_address(address: Address, size: usize) -> Result<usize> {
    usize::try_from(address).map_err(|_| {
        Error::memory_access(
            address,
            size,
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "address does not fit the host pointer width",
            ),
        )
    })
}

impl MemoryProvider for SystemProcess {
    type Handle = SystemHandle;

    fn find_process(&self, name: &str) -> Result<Self::Handle> {
        let system = System::new_all();
        let pid = system
            .processes()
            .values()
            .filter(|process| process.name().eq_ignore_ascii_case(name))
            .map(|process| process.pid().as_u32())
            .min()
            .ok_or_else(|| Error::ProcessNotFound(name.to_owned()))?;
        self.attach(pid, name)
    }

    fn read_memory(&self, handle: &Self::Handle, address: Address, size: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; size];
        handle
            .process
            .copy_address(host_address(address, size)?, &mut buf)
            .map_err(|e| Error::memory_access(address, size, e))?;
        Ok(buf)
    }

    fn write_memory(&self, handle: &Self::Handle, address: Address, data: &[u8]) -> Result<()> {
        let host = host_address(address, data.len())?;
        match handle.process.put_address(host, data) {
            Ok(()) => Ok(()),
            Err(e) => {
                // read-only pages (code) need the platform's protection-ignoring path
                debug!(address, len = data.len(), error = %e, "direct write failed, retrying");
                platform::write_protected(handle.pid, address, data)
                    .map_err(|_| Error::memory_access(address, data.len(), e))
            }
        }
    }

    fn module_base_address(&self, handle: &Self::Handle, module_name: &str) -> Result<Address> {
        platform::module_base(handle.pid, module_name)
    }

    fn allocate_memory(&self, handle: &Self::Handle, size: usize) -> Result<Address> {
        let address = platform::allocate(handle.pid, size)?;
        info!(pid = handle.pid, size, address, "allocated memory in target");
        Ok(address)
    }
}
