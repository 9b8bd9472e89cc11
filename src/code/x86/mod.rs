//! x86 and x86-64 jump encoding

use iced_x86::{Code, Encoder, Instruction};

use crate::error::{Error, Result};
use crate::provider::Address;

/// Length of a near jump (`E9` followed by a 32-bit displacement)
pub const NEAR_JUMP_LEN: usize = 5;

/// Opcode of a near relative jump
pub const NEAR_JUMP_OPCODE: u8 = 0xE9;

/// Displacement of a near jump placed at `current` that lands on `target`
///
/// The displacement is relative to the end of the jump, so it is `target - (current + 5)`,
/// computed without wrapping.
pub fn near_jump_displacement(target: Address, current: Address) -> Result<i32> {
    let next = i128::from(current) + NEAR_JUMP_LEN as i128;
    let displacement = i128::from(target) - next;
    i32::try_from(displacement).map_err(|_| {
        Error::Range(format!(
            "jump from {current:#x} to {target:#x} needs displacement {displacement:#x}, which does not fit in 32 bits"
        ))
    })
}

/// Builds a near jump placed at `current` that transfers control to `target`
///
/// Both addresses within the low 4 GiB are encoded in 32-bit mode, anything higher in 64-bit
/// mode. The bytes are identical either way, `E9` followed by the little-endian displacement.
pub fn build_near_jump(target: Address, current: Address) -> Result<[u8; NEAR_JUMP_LEN]> {
    // reject before handing the addresses to the encoder
    near_jump_displacement(target, current)?;

    let low = |address: Address| address <= u64::from(u32::MAX);
    let (bitness, code) = if low(target) && low(current) {
        (32, Code::Jmp_rel32_32)
    } else {
        (64, Code::Jmp_rel32_64)
    };

    let instruction = Instruction::with_branch(code, target)?;
    let mut encoder = Encoder::new(bitness);
    let len = encoder.encode(&instruction, current)?;
    let buffer = encoder.take_buffer();

    buffer
        .get(..len)
        .and_then(|bytes| <[u8; NEAR_JUMP_LEN]>::try_from(bytes).ok())
        .ok_or_else(|| {
            Error::InvariantViolation(format!(
                "encoder produced {len} bytes for a near jump, expected {NEAR_JUMP_LEN}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use iced_x86::{Decoder, DecoderOptions};

    use super::*;

    #[test]
    /// Jump from the overlap-planting hook site to a cave above it
    fn test_forward_jump() {
        let bytes = build_near_jump(0x0050_0000, 0x0040_E020).unwrap();
        assert_eq!(bytes, [0xE9, 0xDB, 0x1F, 0x0F, 0x00]);
        assert_eq!(
            near_jump_displacement(0x0050_0000, 0x0040_E020).unwrap(),
            0x000F_1FDB
        );
    }

    #[test]
    /// Backwards jumps get a negative displacement
    fn test_backward_jump() {
        let bytes = build_near_jump(0x0040_E020, 0x0050_0000).unwrap();
        // 0x0040E020 - 0x00500005 = -0xF1FE5
        assert_eq!(bytes[0], NEAR_JUMP_OPCODE);
        assert_eq!(i32::from_le_bytes(bytes[1..].try_into().unwrap()), -0xF_1FE5);

        // a jump to itself
        assert_eq!(
            build_near_jump(0x1000, 0x1000).unwrap(),
            [0xE9, 0xFB, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    /// Whatever we emit decodes back to a jump at the requested target
    fn test_decodes_to_target() {
        for (target, current) in [
            (0x0050_0000u64, 0x0040_E020u64),
            (0x0040_0000, 0x7FFF_0000),
            (0x7FF6_1234_0000, 0x7FF6_1200_0000),
        ] {
            let bytes = build_near_jump(target, current).unwrap();
            let bitness = if current > u64::from(u32::MAX) { 64 } else { 32 };
            let mut decoder = Decoder::with_ip(bitness, &bytes, current, DecoderOptions::NONE);
            let instruction = decoder.decode();

            assert_eq!(instruction.len(), NEAR_JUMP_LEN);
            assert_eq!(instruction.near_branch_target(), target);
        }
    }

    #[test]
    /// Targets further than 2 GiB away can't be reached with a near jump
    fn test_out_of_range() {
        assert!(matches!(
            build_near_jump(0x1_0000_0000, 0x1000),
            Err(Error::Range(_))
        ));
        assert!(matches!(
            build_near_jump(0x7FFF_0000_0000, 0x0040_0000),
            Err(Error::Range(_))
        ));

        // largest forward displacement still fits
        assert!(build_near_jump(0x8000_0004, 0).is_ok());
        assert!(build_near_jump(0x8000_0005, 0).is_err());
    }
}
