//! # Hook
//!
//! This module covers trampolines, which redirect execution from a hook site into a freshly allocated
//! code cave.
//!
//! Installing a trampoline allocates the cave, copies the cave body into it and overwrites the first
//! five bytes of the hook site with a near jump to the cave. The cave body is opaque: whatever it
//! does, including jumping back, is up to whoever wrote it. Uninstalling writes the original hook
//! bytes back and leaves the cave allocated.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::code::x86::{build_near_jump, NEAR_JUMP_LEN};
use crate::codec::{format_hex_bytes, HexBytes};
use crate::error::{Error, Result};
use crate::provider::{Address, MemoryProvider, PointerWidth};

/// A hook site and the cave it jumps to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrampolineRecord {
    /// Location overwritten with the jump
    #[serde(rename = "hook")]
    pub hook_address: Address,
    /// Original bytes at the hook site, at least the length of the jump
    #[serde(rename = "restore")]
    pub restore_bytes: HexBytes,
    /// Code copied into the cave
    #[serde(rename = "body")]
    pub cave_body: HexBytes,
    /// Number of bytes allocated for the cave
    pub cave_size: usize,
}

impl TrampolineRecord {
    /// Creates a new record
    pub fn new(
        hook_address: Address,
        restore_bytes: impl Into<Vec<u8>>,
        cave_body: impl Into<Vec<u8>>,
        cave_size: usize,
    ) -> Self {
        Self {
            hook_address,
            restore_bytes: HexBytes::new(restore_bytes.into()),
            cave_body: HexBytes::new(cave_body.into()),
            cave_size,
        }
    }

    /// Same record with the hook site moved `delta` bytes further along
    pub fn rebased(&self, delta: Address, width: PointerWidth) -> Result<Self> {
        Ok(Self {
            hook_address: width.rebase(self.hook_address, delta)?,
            ..self.clone()
        })
    }

    /// Checks the record without touching the target
    pub fn validate(&self) -> Result<()> {
        validate(self.cave_size, &self.cave_body, &self.restore_bytes)
    }

    /// See [`install_trampoline`]
    pub fn install<P: MemoryProvider>(&self, provider: &P, handle: &P::Handle) -> Result<Address> {
        install_trampoline(
            provider,
            handle,
            self.cave_size,
            &self.cave_body,
            self.hook_address,
            &self.restore_bytes,
        )
    }

    /// See [`uninstall_trampoline`]
    pub fn uninstall<P: MemoryProvider>(&self, provider: &P, handle: &P::Handle) -> Result<()> {
        uninstall_trampoline(provider, handle, self.hook_address, &self.restore_bytes)
    }

    /// Installs the trampoline until the returned guard is dropped or unhooked
    pub fn install_scoped<'a, P: MemoryProvider>(
        &'a self,
        provider: &'a P,
        handle: &'a P::Handle,
    ) -> Result<HookGuard<'a, P>> {
        let cave_address = self.install(provider, handle)?;
        Ok(HookGuard {
            provider,
            handle,
            record: self,
            cave_address,
            installed: true,
        })
    }
}

/// Checks the inputs of [`install_trampoline`]
fn validate(cave_size: usize, cave_body: &[u8], hook_restore_bytes: &[u8]) -> Result<()> {
    if cave_body.is_empty() {
        return Err(Error::InvariantViolation("cave body is empty".to_owned()));
    }
    if cave_body.len() > cave_size {
        return Err(Error::InvariantViolation(format!(
            "cave body of {} bytes does not fit a {cave_size} byte cave",
            cave_body.len()
        )));
    }
    if hook_restore_bytes.len() < NEAR_JUMP_LEN {
        return Err(Error::InvariantViolation(format!(
            "hook restore bytes must cover the {NEAR_JUMP_LEN} byte jump, got {}",
            hook_restore_bytes.len()
        )));
    }
    Ok(())
}

/// Allocates a cave, fills it with `cave_body` and points the hook site at it
///
/// Returns the address of the cave. Only the first five bytes of the hook site are written, any
/// further restore bytes are left as they are. Nothing is allocated if the inputs are invalid.
pub fn install_trampoline<P: MemoryProvider>(
    provider: &P,
    handle: &P::Handle,
    cave_size: usize,
    cave_body: &[u8],
    hook_address: Address,
    hook_restore_bytes: &[u8],
) -> Result<Address> {
    validate(cave_size, cave_body, hook_restore_bytes)?;

    let cave_address = provider.allocate_memory(handle, cave_size)?;
    let jump = build_near_jump(cave_address, hook_address)?;

    provider.write_memory(handle, cave_address, cave_body)?;
    provider.write_memory(handle, hook_address, &jump)?;

    info!(
        hook_address,
        cave_address,
        cave_size,
        jump = %format_hex_bytes(&jump),
        "installed trampoline"
    );
    Ok(cave_address)
}

/// Writes the original bytes back to the hook site
///
/// The cave stays allocated.
pub fn uninstall_trampoline<P: MemoryProvider>(
    provider: &P,
    handle: &P::Handle,
    hook_address: Address,
    hook_restore_bytes: &[u8],
) -> Result<()> {
    if hook_restore_bytes.is_empty() {
        return Err(Error::InvariantViolation(
            "hook restore bytes are empty".to_owned(),
        ));
    }
    provider.write_memory(handle, hook_address, hook_restore_bytes)?;
    info!(hook_address, "uninstalled trampoline");
    Ok(())
}

/// Guard for an installed trampoline
///
/// The hook site is restored when the guard is dropped. Use [`HookGuard::unhook`] to find out
/// whether that write succeeded.
pub struct HookGuard<'a, P: MemoryProvider> {
    /// Provider the trampoline was installed through
    provider: &'a P,
    /// Process the trampoline was installed in
    handle: &'a P::Handle,
    /// The installed trampoline
    record: &'a TrampolineRecord,
    /// Where the cave ended up
    cave_address: Address,
    /// Cleared once the hook site is restored
    installed: bool,
}

impl<P: MemoryProvider> HookGuard<'_, P> {
    /// Address of the cave the hook jumps to
    pub fn cave_address(&self) -> Address {
        self.cave_address
    }

    /// Manually unhooks rather than letting the guard go out of scope
    pub fn unhook(mut self) -> Result<()> {
        self.installed = false;
        self.record.uninstall(self.provider, self.handle)
    }
}

impl<P: MemoryProvider> Drop for HookGuard<'_, P> {
    fn drop(&mut self) {
        if self.installed {
            if let Err(e) = self.record.uninstall(self.provider, self.handle) {
                warn!(hook_address = self.record.hook_address, error = %e, "failed to unhook");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::InMemoryProvider;

    /// Original prologue at the overlap-planting hook site
    const RESTORE: [u8; 5] = [0x83, 0xEC, 0x18, 0x53, 0x55];

    /// Overlap-planting trampoline
    fn overlap_planting() -> TrampolineRecord {
        TrampolineRecord::new(
            0x0040_E020,
            RESTORE,
            [
                0x31u8, 0xC0, 0xC2, 0x0C, 0x00, 0x83, 0xEC, 0x18, 0x53, 0x55, 0xE9, 0x16, 0xE0,
                0xF0, 0xFE,
            ],
            2048,
        )
    }

    /// Game with the hook site mapped and caves handed out at 0x00500000
    fn game() -> InMemoryProvider {
        InMemoryProvider::new("PlantsVsZombies.exe")
            .with_region(0x0040_E020, [0x83u8, 0xEC, 0x18, 0x53, 0x55, 0x8B, 0x6C])
            .with_allocation_base(0x0050_0000)
    }

    #[test]
    /// The cave gets the body and the hook site gets a jump to the cave
    fn test_install() {
        let provider = game();
        let handle = provider.find_process("PlantsVsZombies.exe").unwrap();
        let record = overlap_planting();

        let cave = record.install(&provider, &handle).unwrap();
        assert_eq!(cave, 0x0050_0000);
        assert_eq!(provider.peek(cave, 15).unwrap(), *record.cave_body);
        assert_eq!(
            provider.peek(0x0040_E020, 7).unwrap(),
            [0xE9, 0xDB, 0x1F, 0x0F, 0x00, 0x8B, 0x6C]
        );

        // rest of the cave stays zeroed
        assert_eq!(provider.peek(cave + 15, 2048 - 15).unwrap(), vec![0; 2048 - 15]);
    }

    #[test]
    /// Uninstalling restores the hook site exactly as it was before installing
    fn test_round_trip() {
        let provider = game();
        let handle = provider.find_process("PlantsVsZombies.exe").unwrap();
        let record = overlap_planting();
        let before = provider.peek(0x0040_E020, 7).unwrap();

        record.install(&provider, &handle).unwrap();
        record.uninstall(&provider, &handle).unwrap();
        assert_eq!(provider.peek(0x0040_E020, 7).unwrap(), before);

        // a second install gets a fresh cave, the first one is never reused
        let cave = record.install(&provider, &handle).unwrap();
        assert_eq!(cave, 0x0050_1000);
    }

    #[test]
    /// Invalid records fail before anything is allocated or written
    fn test_invalid_record() {
        let provider = game();
        let handle = provider.find_process("PlantsVsZombies.exe").unwrap();

        let too_big = TrampolineRecord::new(0x0040_E020, RESTORE, vec![0x90u8; 16], 8);
        let empty = TrampolineRecord::new(0x0040_E020, RESTORE, Vec::new(), 8);
        let short = TrampolineRecord::new(0x0040_E020, [0x83u8, 0xEC], [0xC3u8], 8);
        for record in [too_big, empty, short] {
            assert!(matches!(
                record.install(&provider, &handle),
                Err(Error::InvariantViolation(_))
            ));
        }
        assert!(provider.writes().is_empty());

        // the next allocation is still the first one
        assert_eq!(
            overlap_planting().install(&provider, &handle).unwrap(),
            0x0050_0000
        );
    }

    #[test]
    /// Allocation failures leave the hook site untouched
    fn test_allocation_failure() {
        let provider = game().without_allocations();
        let handle = provider.find_process("PlantsVsZombies.exe").unwrap();

        assert!(matches!(
            overlap_planting().install(&provider, &handle),
            Err(Error::Allocation { size: 2048, .. })
        ));
        assert!(provider.writes().is_empty());
    }

    #[test]
    /// Caves out of near jump range are reported instead of writing a wrong jump
    fn test_cave_out_of_range() {
        let provider = game().with_allocation_base(0x7FF6_0000_0000);
        let handle = provider.find_process("PlantsVsZombies.exe").unwrap();

        assert!(matches!(
            overlap_planting().install(&provider, &handle),
            Err(Error::Range(_))
        ));
        assert!(provider.writes().is_empty());
    }

    #[test]
    /// The guard unhooks when dropped
    fn test_scoped() {
        let provider = game();
        let handle = provider.find_process("PlantsVsZombies.exe").unwrap();
        let record = overlap_planting();

        {
            let guard = record.install_scoped(&provider, &handle).unwrap();
            assert_eq!(guard.cave_address(), 0x0050_0000);
            assert_eq!(provider.peek(0x0040_E020, 1).unwrap(), [0xE9]);
        }
        assert_eq!(provider.peek(0x0040_E020, 5).unwrap(), RESTORE);

        let guard = record.install_scoped(&provider, &handle).unwrap();
        guard.unhook().unwrap();
        assert_eq!(provider.peek(0x0040_E020, 5).unwrap(), RESTORE);
    }
}
