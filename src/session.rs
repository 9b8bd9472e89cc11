//! # Session
//!
//! A provider, an attached process and the profile describing it. Sessions turn profile names
//! ("sun", "no_cooldown") into engine calls.

use tracing::info;

use crate::codec::{decode_le, encode_le};
use crate::error::Result;
use crate::hook::TrampolineRecord;
use crate::patcher::{self, PatchRecord, PatchState};
use crate::pointer::PointerChain;
use crate::profile::TargetProfile;
use crate::provider::{Address, MemoryProvider};

/// An attached target process
pub struct Session<P: MemoryProvider> {
    /// Provider used for every memory access
    provider: P,
    /// The attached process
    handle: P::Handle,
    /// Addresses and records for the target
    profile: TargetProfile,
    /// Load address of the profile's module, zero for absolute profiles
    module_base: Address,
}

impl<P: MemoryProvider> Session<P> {
    /// Finds the profile's process and attaches to it
    ///
    /// Module-relative profiles also look the module up here, so a missing module fails the attach
    /// rather than the first access.
    pub fn attach(provider: P, profile: TargetProfile) -> Result<Self> {
        let handle = provider.find_process(&profile.process)?;
        let module_base = match &profile.module {
            Some(module) => provider.module_base_address(&handle, module)?,
            None => 0,
        };
        info!(
            process = %profile.process,
            profile = %profile.name,
            module_base,
            "attached session"
        );
        Ok(Self {
            provider,
            handle,
            profile,
            module_base,
        })
    }

    /// The provider behind this session
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The attached process
    pub fn handle(&self) -> &P::Handle {
        &self.handle
    }

    /// The profile this session was attached with
    pub fn profile(&self) -> &TargetProfile {
        &self.profile
    }

    /// Load address the profile's addresses are relative to, zero if they are absolute
    pub fn module_base(&self) -> Address {
        self.module_base
    }

    /// Chain for the value called `name`, with the module base applied
    pub fn value_chain(&self, name: &str) -> Result<PointerChain> {
        self.profile
            .value(name)?
            .chain()
            .rebased(self.module_base, self.profile.pointer_width)
    }

    /// Resolves the address of the value called `name`
    pub fn value_address(&self, name: &str) -> Result<Address> {
        self.value_chain(name)?
            .resolve(&self.provider, &self.handle, self.profile.pointer_width)
    }

    /// Reads the value called `name`
    pub fn read_value(&self, name: &str) -> Result<u64> {
        let size = self.profile.value(name)?.size;
        let bytes = self.value_chain(name)?.read(
            &self.provider,
            &self.handle,
            self.profile.pointer_width,
            size,
        )?;
        decode_le(&bytes)
    }

    /// Writes `value` to the value called `name`, failing if it doesn't fit the field
    pub fn write_value(&self, name: &str, value: u64) -> Result<()> {
        let size = self.profile.value(name)?.size;
        let bytes = encode_le(value, size)?;
        self.value_chain(name)?.write(
            &self.provider,
            &self.handle,
            self.profile.pointer_width,
            &bytes,
        )
    }

    /// The patch called `name`, with the module base applied
    pub fn patch_record(&self, name: &str) -> Result<PatchRecord> {
        self.profile
            .patch(name)?
            .rebased(self.module_base, self.profile.pointer_width)
    }

    /// Applies or reverts the patch called `name`
    pub fn set_patch(&self, name: &str, active: bool) -> Result<()> {
        let record = self.patch_record(name)?;
        patcher::set_patch(&self.provider, &self.handle, &record, active)
    }

    /// Reports whether the patch called `name` is applied
    pub fn probe_patch(&self, name: &str) -> Result<Option<PatchState>> {
        let record = self.patch_record(name)?;
        patcher::probe_patch(&self.provider, &self.handle, &record)
    }

    /// The trampoline called `name`, with the module base applied
    pub fn trampoline_record(&self, name: &str) -> Result<TrampolineRecord> {
        self.profile
            .trampoline(name)?
            .rebased(self.module_base, self.profile.pointer_width)
    }

    /// Installs the trampoline called `name`, returning the cave address
    pub fn install_hook(&self, name: &str) -> Result<Address> {
        self.trampoline_record(name)?
            .install(&self.provider, &self.handle)
    }

    /// Uninstalls the trampoline called `name`
    pub fn uninstall_hook(&self, name: &str) -> Result<()> {
        self.trampoline_record(name)?
            .uninstall(&self.provider, &self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::provider::{InMemoryProvider, PointerWidth};

    /// Module-relative profile for a relocated build
    const PROFILE: &str = r#"
name = "Relocated"
process = "game.exe"
module = "game.exe"
pointer_width = 32

[values.ammo]
base = 0x1000
offsets = [0x0, 0x20]
size = 2

[patches.infinite_ammo]
address = 0x2000
active = "90 90"
inactive = "FF C8"
"#;

    /// Game loaded at 0x00800000 with the ammo object at 0x00900000
    fn game() -> InMemoryProvider {
        InMemoryProvider::new("game.exe")
            .with_module("game.exe", 0x0080_0000)
            .with_pointer(0x0080_1000, 0x0090_0000, PointerWidth::Bits32)
            .with_region(0x0090_0020, 30u16.to_le_bytes())
            .with_region(0x0080_2000, [0xFFu8, 0xC8])
    }

    #[test]
    /// Module-relative addresses are moved by the module's load address
    fn test_module_relative() {
        let session = Session::attach(game(), PROFILE.parse().unwrap()).unwrap();
        assert_eq!(session.module_base(), 0x0080_0000);
        assert_eq!(session.value_address("ammo").unwrap(), 0x0090_0020);
        assert_eq!(session.read_value("ammo").unwrap(), 30);

        session.write_value("ammo", 999).unwrap();
        assert_eq!(session.read_value("ammo").unwrap(), 999);

        session.set_patch("infinite_ammo", true).unwrap();
        assert_eq!(session.provider().peek(0x0080_2000, 2).unwrap(), [0x90, 0x90]);
        assert_eq!(
            session.probe_patch("infinite_ammo").unwrap(),
            Some(PatchState::Active)
        );
    }

    #[test]
    /// A module loaded near the top of a 32-bit address space can't push records past it
    fn test_module_past_address_space() {
        let game = InMemoryProvider::new("game.exe").with_module("game.exe", 0xFFFF_F000);
        let session = Session::attach(game, PROFILE.parse().unwrap()).unwrap();

        assert!(matches!(
            session.patch_record("infinite_ammo"),
            Err(Error::Range(_))
        ));
        assert!(matches!(
            session.set_patch("infinite_ammo", true),
            Err(Error::Range(_))
        ));
        assert!(matches!(session.read_value("ammo"), Err(Error::Range(_))));
        assert!(session.provider().writes().is_empty());
    }

    #[test]
    /// Values that don't fit the field are rejected without writing
    fn test_write_too_wide() {
        let session = Session::attach(game(), PROFILE.parse().unwrap()).unwrap();
        assert!(matches!(
            session.write_value("ammo", 0x1_0000),
            Err(Error::Range(_))
        ));
        assert!(session.provider().writes().is_empty());
    }

    #[test]
    /// Attaching fails when the process or the module is missing
    fn test_attach_errors() {
        let profile: TargetProfile = PROFILE.parse().unwrap();

        let other = InMemoryProvider::new("other.exe");
        assert!(matches!(
            Session::attach(other, profile.clone()),
            Err(Error::ProcessNotFound(_))
        ));

        let unloaded = InMemoryProvider::new("game.exe");
        assert!(matches!(
            Session::attach(unloaded, profile),
            Err(Error::ModuleNotFound(_))
        ));
    }

    #[test]
    /// Sessions work over borrowed providers too
    fn test_borrowed_provider() {
        let provider = game();
        let session = Session::attach(&provider, PROFILE.parse().unwrap()).unwrap();
        assert!(matches!(
            session.read_value("health"),
            Err(Error::Profile(_))
        ));
        session.set_patch("infinite_ammo", true).unwrap();
        assert_eq!(provider.writes().len(), 1);
    }
}
