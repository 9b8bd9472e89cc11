#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![doc = include_str!("../README.md")]

pub mod code;
pub mod codec;
pub mod error;
pub mod hook;
pub mod patcher;
pub mod pointer;
pub mod profile;
pub mod provider;
pub mod session;

pub use error::{Error, Result};
pub use hook::{install_trampoline, uninstall_trampoline, TrampolineRecord};
pub use patcher::{probe_patch, set_patch, PatchRecord, PatchState};
pub use pointer::{read_resolved, resolve_address, write_resolved, PointerChain};
pub use profile::TargetProfile;
pub use provider::{
    Address, InMemoryProvider, LocalProcess, MemoryProvider, PointerWidth, SystemProcess,
};
pub use session::Session;
