//! Snapshot tests pinning exact wire bytes.
//!
//! These byte vectors are load-bearing: a host that has matched on the
//! 046d:c24f identity expects precisely this layout.

use hid_g29_protocol::{build_input_report, ReportState, WheelButton};

#[test]
fn snapshot_neutral() {
    let report = build_input_report(&ReportState::default());
    assert_eq!(
        report,
        [0x00, 0x80, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x0F, 0x00, 0x00, 0x00, 0x00]
    );
}

#[test]
fn snapshot_full_lock_left() {
    let state = ReportState {
        steering: -32768.0,
        ..ReportState::default()
    };
    let report = build_input_report(&state);
    assert_eq!(&report[0..2], &[0x00, 0x00]);
}

#[test]
fn snapshot_full_lock_right() {
    let state = ReportState {
        steering: 32767.0,
        ..ReportState::default()
    };
    let report = build_input_report(&state);
    assert_eq!(&report[0..2], &[0xFF, 0xFF]);
}

#[test]
fn snapshot_all_pedals_pressed() {
    let state = ReportState {
        clutch: 100.0,
        brake: 100.0,
        throttle: 100.0,
        ..ReportState::default()
    };
    let report = build_input_report(&state);
    // Inverted pedals bottom out at 1, not 0, because the percent-to-axis
    // multiply floors 655.35f32 * 100.
    assert_eq!(&report[2..8], &[0x01, 0x00, 0x01, 0x00, 0x01, 0x00]);
}

#[test]
fn snapshot_dpad_up_right() {
    let state = ReportState {
        dpad_x: 1,
        dpad_y: -1,
        ..ReportState::default()
    };
    let report = build_input_report(&state);
    assert_eq!(report[8], 0x01);
}

#[test]
fn snapshot_face_buttons() {
    let mut state = ReportState::default();
    state.buttons[WheelButton::South.bit()] = true;
    state.buttons[WheelButton::East.bit()] = true;
    state.buttons[WheelButton::West.bit()] = true;
    state.buttons[WheelButton::North.bit()] = true;
    let report = build_input_report(&state);
    assert_eq!(&report[9..13], &[0x0F, 0x00, 0x00, 0x00]);
}

#[test]
fn snapshot_trigger_happy_block() {
    let mut state = ReportState::default();
    for button in [
        WheelButton::TriggerHappy1,
        WheelButton::TriggerHappy12,
    ] {
        state.buttons[button.bit()] = true;
    }
    let report = build_input_report(&state);
    let bits = u32::from_le_bytes([report[9], report[10], report[11], report[12]]);
    assert_eq!(bits, (1 << 14) | (1 << 25));
}
