//! In-memory provider that simulates a single target process
//!
//! Memory is a set of mapped regions; reads and writes must fall entirely inside one region.
//! Every successful write is logged so tests can check exactly what the engine sent.

use std::collections::BTreeMap;
use std::io;
use std::sync::{Mutex, PoisonError};

use super::{Address, MemoryProvider, PointerWidth};
use crate::error::{Error, Result};

/// Default start of the range used for simulated allocations
const DEFAULT_ALLOCATION_BASE: Address = 0x1000_0000;
/// Allocations are rounded up to this granularity, like OS pages
const ALLOCATION_GRANULARITY: u64 = 0x1000;

/// Handle to the simulated process
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InMemoryHandle {
    /// Simulated process id
    pub pid: u32,
}

/// Mutable state of the simulated process
#[derive(Debug)]
struct State {
    /// Mapped regions keyed by start address
    regions: BTreeMap<Address, Vec<u8>>,
    /// Every write in the order it happened
    writes: Vec<(Address, Vec<u8>)>,
    /// Next address handed out by `allocate_memory`
    next_allocation: Address,
    /// Whether `allocate_memory` succeeds
    allocations_enabled: bool,
}

/// A simulated process, for tests and dry runs
#[derive(Debug)]
pub struct InMemoryProvider {
    /// Process name matched by `find_process`
    name: String,
    /// Simulated process id
    pid: u32,
    /// Loaded modules and their base addresses
    modules: BTreeMap<String, Address>,
    /// Memory contents, behind a lock because the provider API takes `&self`
    state: Mutex<State>,
}

impl InMemoryProvider {
    /// Creates an empty process called `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pid: 1,
            modules: BTreeMap::new(),
            state: Mutex::new(State {
                regions: BTreeMap::new(),
                writes: Vec::new(),
                next_allocation: DEFAULT_ALLOCATION_BASE,
                allocations_enabled: true,
            }),
        }
    }

    /// Sets the process id reported through handles
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Maps a region at `address` holding `bytes`
    pub fn with_region(mut self, address: Address, bytes: impl Into<Vec<u8>>) -> Self {
        self.state_mut().regions.insert(address, bytes.into());
        self
    }

    /// Maps a zero-filled region of `size` bytes at `address`
    pub fn with_zeroed(self, address: Address, size: usize) -> Self {
        self.with_region(address, vec![0; size])
    }

    /// Maps a pointer-sized region at `address` holding `value`
    pub fn with_pointer(self, address: Address, value: Address, width: PointerWidth) -> Self {
        let bytes = value.to_le_bytes()[..width.bytes()].to_vec();
        self.with_region(address, bytes)
    }

    /// Registers a loaded module
    pub fn with_module(mut self, name: impl Into<String>, base: Address) -> Self {
        self.modules.insert(name.into(), base);
        self
    }

    /// Starts simulated allocations at `address`
    pub fn with_allocation_base(mut self, address: Address) -> Self {
        self.state_mut().next_allocation = address;
        self
    }

    /// Makes every allocation fail
    pub fn without_allocations(mut self) -> Self {
        self.state_mut().allocations_enabled = false;
        self
    }

    /// Reads memory without going through a handle
    pub fn peek(&self, address: Address, size: usize) -> Option<Vec<u8>> {
        let state = self.state();
        locate(&state.regions, address, size).map(|(start, offset)| {
            let region = &state.regions[&start];
            region[offset..offset + size].to_vec()
        })
    }

    /// All successful writes so far, oldest first
    pub fn writes(&self) -> Vec<(Address, Vec<u8>)> {
        self.state().writes.clone()
    }

    /// Forgets the write log
    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }

    /// Locks the state, ignoring poisoning since every update is a single step
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutable access to the state while building
    fn state_mut(&mut self) -> &mut State {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails unless `handle` refers to this process
    fn check_handle(&self, handle: &InMemoryHandle) -> Result<()> {
        if handle.pid == self.pid {
            Ok(())
        } else {
            Err(Error::ProcessNotFound(format!("pid {}", handle.pid)))
        }
    }
}

/// Finds the region containing `[address, address + size)`, returning its start and the offset into it
fn locate(
    regions: &BTreeMap<Address, Vec<u8>>,
    address: Address,
    size: usize,
) -> Option<(Address, usize)> {
    let (&start, bytes) = regions.range(..=address).next_back()?;
    let offset = usize::try_from(address - start).ok()?;
    let end = offset.checked_add(size)?;
    (end <= bytes.len()).then_some((start, offset))
}

/// Error for accesses outside every mapped region
fn unmapped(address: Address, size: usize) -> Error {
    Error::memory_access(
        address,
        size,
        io::Error::new(io::ErrorKind::AddrNotAvailable, "range is not mapped"),
    )
}

impl MemoryProvider for InMemoryProvider {
    type Handle = InMemoryHandle;

    fn find_process(&self, name: &str) -> Result<Self::Handle> {
        if name == self.name {
            Ok(InMemoryHandle { pid: self.pid })
        } else {
            Err(Error::ProcessNotFound(name.to_owned()))
        }
    }

    fn read_memory(&self, handle: &Self::Handle, address: Address, size: usize) -> Result<Vec<u8>> {
        self.check_handle(handle)?;
        self.peek(address, size)
            .ok_or_else(|| unmapped(address, size))
    }

    fn write_memory(&self, handle: &Self::Handle, address: Address, data: &[u8]) -> Result<()> {
        self.check_handle(handle)?;
        let mut state = self.state();
        let (start, offset) =
            locate(&state.regions, address, data.len()).ok_or_else(|| unmapped(address, data.len()))?;
        if let Some(region) = state.regions.get_mut(&start) {
            region[offset..offset + data.len()].copy_from_slice(data);
        }
        state.writes.push((address, data.to_vec()));
        Ok(())
    }

    fn module_base_address(&self, handle: &Self::Handle, module_name: &str) -> Result<Address> {
        self.check_handle(handle)?;
        self.modules
            .get(module_name)
            .copied()
            .ok_or_else(|| Error::ModuleNotFound(module_name.to_owned()))
    }

    fn allocate_memory(&self, handle: &Self::Handle, size: usize) -> Result<Address> {
        self.check_handle(handle)?;
        let mut state = self.state();
        if !state.allocations_enabled || size == 0 {
            return Err(Error::Allocation {
                size,
                source: io::Error::new(io::ErrorKind::OutOfMemory, "allocation refused"),
            });
        }
        let address = state.next_allocation;
        let reserved = (size as u64).div_ceil(ALLOCATION_GRANULARITY) * ALLOCATION_GRANULARITY;
        state.next_allocation = address + reserved;
        state.regions.insert(address, vec![0; size]);
        Ok(address)
    }
}
