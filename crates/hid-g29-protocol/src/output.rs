//! FFB output report decoding (host to device).
//!
//! # Protocol notes
//!
//! The host drives a G29's force feedback with 7-byte output reports in the
//! classic lg4ff slot format: byte 0 is `(slot_mask << 4) | operation`, the
//! remaining bytes are effect data. The kernel's in-tree `hid-lg4ff.c`
//! driver plays constant force with `{0x11, 0x08, force, 0x80, 0, 0, 0}`
//! where `force` is unsigned 8-bit and `0x80` means no force, and drives the
//! built-in autocenter spring with the two-step sequence
//! `{0xFE, 0x0D, k, k, strength, 0, 0}` then `{0x14, 0, ...}` (deactivate:
//! `{0xF5, 0, ...}`).
//!
//! The decoder maps exactly that subset onto [`FfbCommand`] values. Vendor
//! `0xF8` commands (rotation range, rev LEDs, mode switching) are surfaced
//! as [`FfbCommand::Vendor`] so the caller can acknowledge them without
//! modelling their behaviour, and anything else decodes to
//! [`FfbCommand::Unknown`].

#![deny(static_mut_refs)]

use crate::descriptor::OUTPUT_REPORT_LEN;
use crate::ids::commands;
use crate::types::ProtocolError;

/// Scale applied to the decoded 8-bit constant-force magnitude.
///
/// Empirical tuning carried over from the reference emulator; changing it
/// changes the feel of every FFB-enabled game.
pub const CONSTANT_FORCE_SCALE: i16 = 48;

/// Autocenter strength applied when the host activates the spring without
/// configuring it first.
pub const DEFAULT_AUTOCENTER: i16 = 1024;

/// Scale applied to the configured autocenter strength byte.
pub const AUTOCENTER_SCALE: i16 = 16;

/// A decoded host FFB command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfbCommand {
    /// Constant force update for slot 1. `force` is the signed, scaled
    /// magnitude to apply to the steering column.
    ConstantForce {
        force: i16,
    },
    /// Stop the slot-1 effect.
    StopEffect,
    /// Activate the autocenter spring with its last configured (or default)
    /// strength.
    EnableAutocenter,
    /// Configure the autocenter spring strength.
    ConfigureAutocenter {
        strength: i16,
    },
    /// Deactivate the autocenter spring.
    DisableAutocenter,
    /// Vendor command (`0xF8`): rotation range, LEDs, mode switch. The
    /// emulator acknowledges these without acting on them.
    Vendor {
        sub: u8,
    },
    /// Anything the emulator does not model.
    Unknown {
        cmd: u8,
    },
}

/// Decode one 7-byte output report.
///
/// The constant-force magnitude arrives biased by `0x80`; pulling the wheel
/// left and right are negative and positive raw values respectively, and the
/// sign is flipped so a positive decoded force turns the reported steering
/// in the direction the host pushes.
pub fn decode_output_report(data: &[u8]) -> Result<FfbCommand, ProtocolError> {
    if data.len() != OUTPUT_REPORT_LEN {
        return Err(ProtocolError::InvalidReportSize {
            expected: OUTPUT_REPORT_LEN,
            actual: data.len(),
        });
    }

    let cmd = data[0];
    let decoded = match cmd {
        commands::CONSTANT_FORCE => {
            let biased = data[2].wrapping_sub(0x80) as i8;
            FfbCommand::ConstantForce {
                force: -(biased as i16) * CONSTANT_FORCE_SCALE,
            }
        }
        commands::STOP_EFFECT => FfbCommand::StopEffect,
        commands::AUTOCENTER_ENABLE => FfbCommand::EnableAutocenter,
        commands::AUTOCENTER_CONFIGURE if data[1] == 0x0D => FfbCommand::ConfigureAutocenter {
            strength: data[2] as i16 * AUTOCENTER_SCALE,
        },
        commands::AUTOCENTER_DISABLE => FfbCommand::DisableAutocenter,
        commands::VENDOR => FfbCommand::Vendor { sub: data[1] },
        _ => FfbCommand::Unknown { cmd },
    };
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_force_negative_pull() {
        // 0xC0 - 0x80 = +64 raw, flipped and scaled: -64 * 48 = -3072.
        let report = [0x11, 0x08, 0xC0, 0x80, 0x00, 0x00, 0x00];
        let cmd = decode_output_report(&report).unwrap();
        assert_eq!(cmd, FfbCommand::ConstantForce { force: -3072 });
    }

    #[test]
    fn test_constant_force_center_is_zero() {
        let report = [0x11, 0x08, 0x80, 0x80, 0x00, 0x00, 0x00];
        let cmd = decode_output_report(&report).unwrap();
        assert_eq!(cmd, FfbCommand::ConstantForce { force: 0 });
    }

    #[test]
    fn test_constant_force_full_left() {
        // 0x00 - 0x80 wraps to -128, flipped: +128 * 48 = 6144.
        let report = [0x11, 0x08, 0x00, 0x80, 0x00, 0x00, 0x00];
        let cmd = decode_output_report(&report).unwrap();
        assert_eq!(cmd, FfbCommand::ConstantForce { force: 6144 });
    }

    #[test]
    fn test_stop_effect() {
        let report = [0x13, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(decode_output_report(&report).unwrap(), FfbCommand::StopEffect);
    }

    #[test]
    fn test_autocenter_sequence() {
        let configure = [0xFE, 0x0D, 0x40, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(
            decode_output_report(&configure).unwrap(),
            FfbCommand::ConfigureAutocenter { strength: 1024 }
        );

        let enable = [0x14, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(decode_output_report(&enable).unwrap(), FfbCommand::EnableAutocenter);

        let disable = [0xF5, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(decode_output_report(&disable).unwrap(), FfbCommand::DisableAutocenter);
    }

    #[test]
    fn test_configure_with_wrong_subcommand_is_unknown() {
        let report = [0xFE, 0x0C, 0x40, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(
            decode_output_report(&report).unwrap(),
            FfbCommand::Unknown { cmd: 0xFE }
        );
    }

    #[test]
    fn test_vendor_commands_surface_subcommand() {
        for sub in [0x81u8, 0x12, 0x09, 0x0A] {
            let report = [0xF8, sub, 0x00, 0x00, 0x00, 0x00, 0x00];
            assert_eq!(
                decode_output_report(&report).unwrap(),
                FfbCommand::Vendor { sub }
            );
        }
    }

    #[test]
    fn test_wrong_size_rejected() {
        let err = decode_output_report(&[0x11, 0x08]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidReportSize {
                expected: 7,
                actual: 2
            }
        );
    }
}
