//! USB identity and FFB command byte constants for the emulated G29.

#![deny(static_mut_refs)]

/// Logitech USB vendor ID.
pub const LOGITECH_VENDOR_ID: u16 = 0x046D;

/// G29 racing wheel product ID (PlayStation/PC mode).
///
/// Verified: kernel `USB_DEVICE_ID_LOGITECH_G29_WHEEL = 0xc24f`.
pub const G29_PRODUCT_ID: u16 = 0xC24F;

/// Device release number reported in the device descriptor (`bcdDevice`).
pub const G29_BCD_DEVICE: u16 = 0x0111;

/// Command bytes the host sends in the first byte of the 7-byte output report.
///
/// These follow the classic lg4ff slot protocol: the low nibble of byte 0 is
/// the operation, the high nibble the effect slot mask. The emulator only
/// models the subset a PC host actually exercises against a G29.
pub mod commands {
    /// Download-and-play a constant force into slot 1 (`(1 << 4) | 0x01`).
    pub const CONSTANT_FORCE: u8 = 0x11;
    /// Stop the effect in slot 1 (`(1 << 4) | 0x03`).
    pub const STOP_EFFECT: u8 = 0x13;
    /// Activate the built-in autocenter spring.
    pub const AUTOCENTER_ENABLE: u8 = 0x14;
    /// Deactivate the built-in autocenter spring.
    pub const AUTOCENTER_DISABLE: u8 = 0xF5;
    /// Configure autocenter spring parameters (byte 1 = `0x0d`).
    pub const AUTOCENTER_CONFIGURE: u8 = 0xFE;
    /// Vendor command prefix (rotation range, rev LEDs, mode switching).
    pub const VENDOR: u8 = 0xF8;
}

/// Sub-commands carried in byte 1 of a [`commands::VENDOR`] report.
pub mod vendor_commands {
    /// Set wheel rotation range.
    pub const SET_RANGE: u8 = 0x81;
    /// Set rev-light LEDs.
    pub const SET_LEDS: u8 = 0x12;
    /// Switch compatibility mode.
    pub const MODE_SWITCH: u8 = 0x09;
    /// Revert mode upon USB reset.
    pub const MODE_REVERT: u8 = 0x0A;
}
