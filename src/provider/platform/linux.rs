//! Linux process plumbing: module lookup through `/proc/<pid>/maps` and `/proc/<pid>/mem` writes

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader};
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::error::{Error, Result};
use crate::provider::Address;

/// A file-backed mapping from `/proc/<pid>/maps`
#[derive(Debug, Clone, PartialEq, Eq)]
struct Mapping {
    /// First address of the mapping
    start: Address,
    /// Path of the backing file
    path: String,
}

/// Parses one maps line: "START-END perms offset dev inode path"
///
/// The path runs to the end of the line and may contain spaces.
fn parse_mapping(line: &str) -> Option<Mapping> {
    let mut parts = line.splitn(6, char::is_whitespace);
    let range = parts.next()?;
    let start = Address::from_str_radix(range.split('-').next()?, 16).ok()?;
    // perms, offset, dev, inode
    parts.nth(3)?;
    let path = parts.next()?.trim();
    let path = path.strip_suffix(" (deleted)").unwrap_or(path);
    if path.is_empty() {
        return None;
    }
    Some(Mapping {
        start,
        path: path.to_owned(),
    })
}

/// Returns `true` if `path` names the module `module_name`
fn is_module(path: &str, module_name: &str) -> bool {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.eq_ignore_ascii_case(module_name))
}

/// Finds the lowest mapping of `module_name` in `maps`
fn find_module<R: BufRead>(maps: R, module_name: &str) -> io::Result<Option<Address>> {
    for line in maps.lines() {
        if let Some(mapping) = parse_mapping(&line?) {
            if is_module(&mapping.path, module_name) {
                return Ok(Some(mapping.start));
            }
        }
    }
    Ok(None)
}

/// Returns the load address of `module_name` in process `pid`
pub(crate) fn module_base(pid: u32, module_name: &str) -> Result<Address> {
    let maps_path = format!("/proc/{pid}/maps");
    let file = File::open(&maps_path)
        .map_err(|e| Error::ModuleNotFound(format!("{module_name} ({maps_path}: {e})")))?;

    find_module(BufReader::new(file), module_name)
        .map_err(|e| Error::ModuleNotFound(format!("{module_name} ({maps_path}: {e})")))?
        .ok_or_else(|| Error::ModuleNotFound(module_name.to_owned()))
}

/// Writes through `/proc/<pid>/mem`, which ignores page protections of the target
///
/// `process_vm_writev` refuses to write read-only pages such as code, this does not.
pub(crate) fn write_protected(pid: u32, address: Address, data: &[u8]) -> io::Result<()> {
    let mem = OpenOptions::new()
        .write(true)
        .open(format!("/proc/{pid}/mem"))?;
    mem.write_all_at(data, address)
}

/// Remote allocation would need code injection into the target, which is out of scope here
pub(crate) fn allocate(_pid: u32, size: usize) -> Result<Address> {
    Err(Error::Allocation {
        size,
        source: io::Error::new(
            io::ErrorKind::Unsupported,
            "remote allocation is not supported on Linux",
        ),
    })
}
