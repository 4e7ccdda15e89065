//! The fixed key-to-wheel mapping.
//!
//! Steering comes from mouse X; everything else is keyboard:
//! W/S/A drive throttle/brake/clutch, the arrow keys are the D-pad, and
//! Q through Enter cover the 26 wheel buttons. Ctrl+M toggles emulation.

use evdev::Key;

use hid_g29_protocol::WheelButton;
use wheel_engine::WheelInputState;

/// Key half of the enable/disable chord.
pub const TOGGLE_KEY: Key = Key::KEY_M;

/// Map a key to the wheel button it drives, if any.
pub fn button_for_key(key: Key) -> Option<WheelButton> {
    let button = match key {
        Key::KEY_Q => WheelButton::South,
        Key::KEY_E => WheelButton::East,
        Key::KEY_F => WheelButton::West,
        Key::KEY_G => WheelButton::North,
        Key::KEY_H => WheelButton::TL,
        Key::KEY_R => WheelButton::TR,
        Key::KEY_T => WheelButton::TL2,
        Key::KEY_Y => WheelButton::TR2,
        Key::KEY_U => WheelButton::Select,
        Key::KEY_I => WheelButton::Start,
        Key::KEY_O => WheelButton::ThumbL,
        Key::KEY_P => WheelButton::ThumbR,
        Key::KEY_1 => WheelButton::Mode,
        Key::KEY_2 => WheelButton::Dead,
        Key::KEY_3 => WheelButton::TriggerHappy1,
        Key::KEY_4 => WheelButton::TriggerHappy2,
        Key::KEY_5 => WheelButton::TriggerHappy3,
        Key::KEY_6 => WheelButton::TriggerHappy4,
        Key::KEY_7 => WheelButton::TriggerHappy5,
        Key::KEY_8 => WheelButton::TriggerHappy6,
        Key::KEY_9 => WheelButton::TriggerHappy7,
        Key::KEY_0 => WheelButton::TriggerHappy8,
        Key::KEY_LEFTSHIFT => WheelButton::TriggerHappy9,
        Key::KEY_SPACE => WheelButton::TriggerHappy10,
        Key::KEY_TAB => WheelButton::TriggerHappy11,
        Key::KEY_ENTER => WheelButton::TriggerHappy12,
        _ => return None,
    };
    Some(button)
}

/// Build the logical wheel state from a key predicate.
///
/// Used both on the live aggregated key table and on the raw key bitmaps
/// fetched during a resync.
pub fn build_logical_state(is_pressed: impl Fn(Key) -> bool) -> WheelInputState {
    let mut state = WheelInputState::default();

    state.throttle = is_pressed(Key::KEY_W);
    state.brake = is_pressed(Key::KEY_S);
    state.clutch = is_pressed(Key::KEY_A);

    let right = is_pressed(Key::KEY_RIGHT) as i8;
    let left = is_pressed(Key::KEY_LEFT) as i8;
    let down = is_pressed(Key::KEY_DOWN) as i8;
    let up = is_pressed(Key::KEY_UP) as i8;
    state.dpad_x = right - left;
    state.dpad_y = down - up;

    for button in WheelButton::ALL {
        state.buttons[button.bit()] = is_pressed(key_for_button(button));
    }
    state
}

fn key_for_button(button: WheelButton) -> Key {
    // Inverse of button_for_key; kept in one place so the two cannot drift.
    const KEYS: [Key; WheelButton::COUNT] = [
        Key::KEY_Q,
        Key::KEY_E,
        Key::KEY_F,
        Key::KEY_G,
        Key::KEY_H,
        Key::KEY_R,
        Key::KEY_T,
        Key::KEY_Y,
        Key::KEY_U,
        Key::KEY_I,
        Key::KEY_O,
        Key::KEY_P,
        Key::KEY_1,
        Key::KEY_2,
        Key::KEY_3,
        Key::KEY_4,
        Key::KEY_5,
        Key::KEY_6,
        Key::KEY_7,
        Key::KEY_8,
        Key::KEY_9,
        Key::KEY_0,
        Key::KEY_LEFTSHIFT,
        Key::KEY_SPACE,
        Key::KEY_TAB,
        Key::KEY_ENTER,
    ];
    KEYS[button.bit()]
}

/// Keys the capability probe requires before treating a device as the
/// emulator's keyboard.
pub fn keyboard_probe_keys() -> [Key; 4] {
    [Key::KEY_W, Key::KEY_S, Key::KEY_A, Key::KEY_M]
}
