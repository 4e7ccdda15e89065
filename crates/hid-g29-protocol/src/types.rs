//! Shared protocol types.

#![deny(static_mut_refs)]

use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A report buffer had the wrong size.
    #[error("invalid report size: expected {expected} bytes, got {actual}")]
    InvalidReportSize {
        /// Expected byte count.
        expected: usize,
        /// Actual byte count.
        actual: usize,
    },
}

/// Canonical button indices of the emulated wheel.
///
/// The discriminant is the bit position inside the report's 26-bit button
/// field (bytes 9–12). The order mirrors the Linux gamepad button layout the
/// kernel driver exposes for a real G29.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WheelButton {
    South = 0,
    East,
    West,
    North,
    TL,
    TR,
    TL2,
    TR2,
    Select,
    Start,
    ThumbL,
    ThumbR,
    Mode,
    Dead,
    TriggerHappy1,
    TriggerHappy2,
    TriggerHappy3,
    TriggerHappy4,
    TriggerHappy5,
    TriggerHappy6,
    TriggerHappy7,
    TriggerHappy8,
    TriggerHappy9,
    TriggerHappy10,
    TriggerHappy11,
    TriggerHappy12,
}

impl WheelButton {
    /// Number of buttons in the report.
    pub const COUNT: usize = 26;

    /// All buttons in bit order.
    pub const ALL: [WheelButton; Self::COUNT] = [
        WheelButton::South,
        WheelButton::East,
        WheelButton::West,
        WheelButton::North,
        WheelButton::TL,
        WheelButton::TR,
        WheelButton::TL2,
        WheelButton::TR2,
        WheelButton::Select,
        WheelButton::Start,
        WheelButton::ThumbL,
        WheelButton::ThumbR,
        WheelButton::Mode,
        WheelButton::Dead,
        WheelButton::TriggerHappy1,
        WheelButton::TriggerHappy2,
        WheelButton::TriggerHappy3,
        WheelButton::TriggerHappy4,
        WheelButton::TriggerHappy5,
        WheelButton::TriggerHappy6,
        WheelButton::TriggerHappy7,
        WheelButton::TriggerHappy8,
        WheelButton::TriggerHappy9,
        WheelButton::TriggerHappy10,
        WheelButton::TriggerHappy11,
        WheelButton::TriggerHappy12,
    ];

    /// Bit position of this button in the report's button field.
    pub const fn bit(self) -> usize {
        self as usize
    }
}

/// Pressed state for every wheel button, indexed by [`WheelButton::bit`].
pub type ButtonStates = [bool; WheelButton::COUNT];
