//! The boundary the input side of the system presents to the core.

use std::time::Instant;

use hid_g29_protocol::{ButtonStates, WheelButton};

/// Logical wheel input snapshot: pedals, D-pad, and button bitmap.
///
/// Pedals are booleans here; the coordinator turns them into the 0/100
/// percent ramp the report encoder expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WheelInputState {
    pub throttle: bool,
    pub brake: bool,
    pub clutch: bool,
    /// −1 left, 0 centre, 1 right.
    pub dpad_x: i8,
    /// −1 up, 0 centre, 1 down.
    pub dpad_y: i8,
    /// Indexed by [`WheelButton::bit`].
    pub buttons: ButtonStates,
}

impl Default for WheelInputState {
    fn default() -> Self {
        Self {
            throttle: false,
            brake: false,
            clutch: false,
            dpad_x: 0,
            dpad_y: 0,
            buttons: [false; WheelButton::COUNT],
        }
    }
}

/// One coalesced batch of input: the logical state, the mouse X distance
/// accumulated since the previous frame, and whether the enable toggle
/// chord was pressed.
#[derive(Debug, Clone, Copy)]
pub struct InputFrame {
    pub logical: WheelInputState,
    pub mouse_dx: i32,
    pub timestamp: Instant,
    pub toggle_pressed: bool,
}

impl InputFrame {
    /// An empty frame carrying the given logical state.
    pub fn new(logical: WheelInputState) -> Self {
        Self {
            logical,
            mouse_dx: 0,
            timestamp: Instant::now(),
            toggle_pressed: false,
        }
    }
}

/// What the enable/disable paths need from the input manager.
///
/// The facade drives grab transitions through this trait so the core can be
/// exercised in tests without real devices.
pub trait InputPort {
    /// Acquire or release exclusive access to the captured devices.
    /// Returns whether every required device ended up grabbed.
    fn grab_devices(&self, enable: bool) -> bool;

    /// Whether at least one keyboard and one mouse are currently grabbed.
    fn all_required_grabbed(&self) -> bool;

    /// Re-read hardware key state so stale presses cannot linger across a
    /// grab transition.
    fn resync_key_states(&self);

    /// Whether the devices needed for emulation are present at all.
    fn devices_ready(&self) -> bool;
}
