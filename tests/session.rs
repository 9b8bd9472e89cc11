use libtrainer::{
    Error, InMemoryProvider, PatchState, PointerWidth, Session, TargetProfile,
};

/// Application object the base slot points to
const APP: u64 = 0x0100_0000;
/// Board object hanging off the application object
const BOARD: u64 = 0x0200_0000;

/// A simulated Plants vs. Zombies with 150 sun in adventure mode
fn plants_vs_zombies() -> InMemoryProvider {
    InMemoryProvider::new("PlantsVsZombies.exe")
        .with_pointer(0x006A_9EC0, APP, PointerWidth::Bits32)
        .with_pointer(APP + 0x768, BOARD, PointerWidth::Bits32)
        .with_region(APP + 0x7F8, 1u32.to_le_bytes())
        .with_region(BOARD + 0x5560, 150u32.to_le_bytes())
        .with_region(0x008A_F806, [0x89u8, 0xB7, 0x60, 0x55, 0x00, 0x00])
        .with_region(0x0048_728C, [0x83u8, 0x47, 0x24, 0x01, 0x8B, 0x47, 0x24])
        .with_region(0x0041_0AE6, [0x0Fu8, 0x85, 0xE5, 0x00, 0x00, 0x00])
        .with_region(0x0040_E020, [0x83u8, 0xEC, 0x18, 0x53, 0x55])
        .with_allocation_base(0x0050_0000)
}

#[test]
/// Everything the built-in profile offers works against a game laid out the way it expects
fn test_builtin_profile() {
    let session =
        Session::attach(plants_vs_zombies(), TargetProfile::builtin().unwrap()).unwrap();

    // values
    assert_eq!(session.read_value("sun").unwrap(), 150);
    assert_eq!(session.read_value("game_mode").unwrap(), 1);
    session.write_value("sun", 9990).unwrap();
    assert_eq!(session.read_value("sun").unwrap(), 9990);
    assert_eq!(
        session.provider().peek(BOARD + 0x5560, 4).unwrap(),
        9990u32.to_le_bytes()
    );

    // patches
    for name in ["sun_never_decreases", "no_cooldown", "column_planting"] {
        let original = session.patch_record(name).unwrap().inactive;
        assert_eq!(session.probe_patch(name).unwrap(), Some(PatchState::Inactive));

        session.set_patch(name, true).unwrap();
        assert_eq!(session.probe_patch(name).unwrap(), Some(PatchState::Active));

        session.set_patch(name, false).unwrap();
        let record = session.patch_record(name).unwrap();
        assert_eq!(
            session.provider().peek(record.address, record.len()).unwrap(),
            *original
        );
    }

    // trampoline
    let cave = session.install_hook("overlap_planting").unwrap();
    assert_eq!(cave, 0x0050_0000);
    assert_eq!(
        session.provider().peek(0x0040_E020, 5).unwrap(),
        [0xE9, 0xDB, 0x1F, 0x0F, 0x00]
    );
    assert_eq!(
        session.provider().peek(cave, 5).unwrap(),
        [0x31, 0xC0, 0xC2, 0x0C, 0x00]
    );

    session.uninstall_hook("overlap_planting").unwrap();
    assert_eq!(
        session.provider().peek(0x0040_E020, 5).unwrap(),
        [0x83, 0xEC, 0x18, 0x53, 0x55]
    );
}

#[test]
/// An unreadable board pointer fails mid-chain instead of writing somewhere random
fn test_board_not_loaded() {
    let game = InMemoryProvider::new("PlantsVsZombies.exe")
        .with_pointer(0x006A_9EC0, APP, PointerWidth::Bits32);
    let session = Session::attach(game, TargetProfile::builtin().unwrap()).unwrap();

    let err = session.write_value("sun", 9990).unwrap_err();
    assert!(matches!(
        err,
        Error::UnresolvedPointer { level: 1, address, .. } if address == APP + 0x768
    ));
    assert!(session.provider().writes().is_empty());
}

#[test]
/// Nothing to attach to
fn test_game_not_running() {
    let desktop = InMemoryProvider::new("explorer.exe");
    assert!(matches!(
        Session::attach(desktop, TargetProfile::builtin().unwrap()),
        Err(Error::ProcessNotFound(_))
    ));
}
