//! Windows process plumbing: module lookup through a Toolhelp snapshot and `VirtualAllocEx`

use std::io;

use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Module32FirstW, Module32NextW, MODULEENTRY32W, TH32CS_SNAPMODULE,
    TH32CS_SNAPMODULE32,
};
use windows::Win32::System::Memory::{
    VirtualAllocEx, MEM_COMMIT, MEM_RESERVE, PAGE_EXECUTE_READWRITE,
};
use windows::Win32::System::Threading::{
    OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_OPERATION,
};

use crate::error::{Error, Result};
use crate::provider::Address;

/// Closes the wrapped handle when dropped
struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// Decodes a NUL-terminated UTF-16 module name
fn entry_name(entry: &MODULEENTRY32W) -> String {
    let len = entry
        .szModule
        .iter()
        .position(|&c| c == 0)
        .unwrap_or(entry.szModule.len());
    String::from_utf16_lossy(&entry.szModule[..len])
}

/// Returns the load address of `module_name` in process `pid`
pub(crate) fn module_base(pid: u32, module_name: &str) -> Result<Address> {
    let snapshot = unsafe {
        CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, pid)
    }
    .map_err(|e| Error::ModuleNotFound(format!("{module_name} ({e})")))?;
    let snapshot = OwnedHandle(snapshot);

    let mut entry = MODULEENTRY32W {
        dwSize: std::mem::size_of::<MODULEENTRY32W>() as u32,
        ..Default::default()
    };

    let mut next = unsafe { Module32FirstW(snapshot.0, &mut entry) };
    while next.is_ok() {
        if entry_name(&entry).eq_ignore_ascii_case(module_name) {
            return Ok(entry.modBaseAddr as usize as Address);
        }
        next = unsafe { Module32NextW(snapshot.0, &mut entry) };
    }

    Err(Error::ModuleNotFound(module_name.to_owned()))
}

/// `WriteProcessMemory` already lifts protections on image pages, so there is nothing more to try
pub(crate) fn write_protected(_pid: u32, _address: Address, _data: &[u8]) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "no protected write fallback on Windows",
    ))
}

/// Allocates read-write-execute memory in process `pid`
pub(crate) fn allocate(pid: u32, size: usize) -> Result<Address> {
    let process = unsafe { OpenProcess(PROCESS_VM_OPERATION | PROCESS_QUERY_INFORMATION, false, pid) }
        .map_err(|e| Error::Allocation {
            size,
            source: io::Error::other(e.to_string()),
        })?;
    let process = OwnedHandle(process);

    let address = unsafe {
        VirtualAllocEx(
            process.0,
            None,
            size,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_EXECUTE_READWRITE,
        )
    };
    if address.is_null() {
        return Err(Error::Allocation {
            size,
            source: io::Error::last_os_error(),
        });
    }
    Ok(address as usize as Address)
}
