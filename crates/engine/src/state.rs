//! The authoritative wheel state and its mutation helpers.
//!
//! All mutation goes through methods that are called with the state mutex
//! held (the [`WheelDevice`](crate::device::WheelDevice) owns the lock) and
//! report whether anything observable changed, so the caller can decide
//! whether to wake the write pump.

use hid_g29_protocol::{FfbCommand, ReportState, WheelButton};

use crate::input::WheelInputState;

/// Steering axis full scale.
pub const STEERING_MAX: f32 = 32767.0;
/// Largest steering step a single mouse delta may contribute.
pub const STEERING_MAX_STEP: f32 = 2000.0;
/// Mouse counts to steering units at sensitivity 1.
pub const STEERING_BASE_GAIN: f32 = 0.05;
/// Reported steering changes below this are not worth a USB frame.
const STEERING_EPSILON: f32 = 0.1;

/// FFB gain bounds exposed to the user.
pub const FFB_GAIN_MIN: f32 = 0.1;
pub const FFB_GAIN_MAX: f32 = 4.0;

/// Authoritative wheel state, guarded by the coordinator's mutex.
#[derive(Debug, Clone)]
pub struct WheelState {
    /// Whether emulation is on. Gate for input application and FFB decode.
    pub enabled: bool,
    /// Reported steering: `clamp(user_steering + ffb_offset)`.
    pub steering: f32,
    /// The user's accumulated steering input.
    pub user_steering: f32,
    /// FFB contribution to the reported steering.
    pub ffb_offset: f32,
    /// FFB spring-damper velocity.
    pub ffb_velocity: f32,
    /// User FFB strength multiplier.
    pub ffb_gain: f32,
    pub throttle: f32,
    pub brake: f32,
    pub clutch: f32,
    pub dpad_x: i8,
    pub dpad_y: i8,
    pub buttons: [bool; WheelButton::COUNT],
    /// Commanded constant force (already scaled).
    pub ffb_force: i16,
    /// Autocenter spring magnitude.
    pub ffb_autocenter: i16,
}

impl Default for WheelState {
    fn default() -> Self {
        Self {
            enabled: false,
            steering: 0.0,
            user_steering: 0.0,
            ffb_offset: 0.0,
            ffb_velocity: 0.0,
            ffb_gain: 1.0,
            throttle: 0.0,
            brake: 0.0,
            clutch: 0.0,
            dpad_x: 0,
            dpad_y: 0,
            buttons: [false; WheelButton::COUNT],
            ffb_force: 0,
            ffb_autocenter: 0,
        }
    }
}

impl WheelState {
    /// Recompute reported steering from its two contributions.
    ///
    /// Returns whether the reported value moved by at least the reporting
    /// threshold.
    pub fn apply_steering(&mut self) -> bool {
        let combined = (self.user_steering + self.ffb_offset).clamp(-32768.0, STEERING_MAX);
        if (combined - self.steering).abs() < STEERING_EPSILON {
            return false;
        }
        self.steering = combined;
        true
    }

    /// Fold a mouse X delta into the user steering.
    ///
    /// The step is scaled by `sensitivity × 0.05` and bounded so one wild
    /// mouse read cannot spin the wheel across its whole range.
    pub fn apply_steering_delta(&mut self, delta: i32, sensitivity: i32) -> bool {
        if delta == 0 {
            return false;
        }
        let gain = sensitivity as f32 * STEERING_BASE_GAIN;
        let step = (delta as f32 * gain).clamp(-STEERING_MAX_STEP, STEERING_MAX_STEP);
        self.user_steering = (self.user_steering + step).clamp(-STEERING_MAX, STEERING_MAX);
        self.apply_steering()
    }

    /// Apply a logical input snapshot. Pedals coerce to a 0/100 ramp.
    pub fn apply_snapshot(&mut self, snapshot: &WheelInputState) -> bool {
        let mut changed = false;
        let mut set_axis = |axis: &mut f32, pressed: bool| {
            let next = if pressed { 100.0 } else { 0.0 };
            if *axis != next {
                *axis = next;
                changed = true;
            }
        };

        set_axis(&mut self.throttle, snapshot.throttle);
        set_axis(&mut self.brake, snapshot.brake);
        set_axis(&mut self.clutch, snapshot.clutch);

        if self.dpad_x != snapshot.dpad_x {
            self.dpad_x = snapshot.dpad_x;
            changed = true;
        }
        if self.dpad_y != snapshot.dpad_y {
            self.dpad_y = snapshot.dpad_y;
            changed = true;
        }
        if self.buttons != snapshot.buttons {
            self.buttons = snapshot.buttons;
            changed = true;
        }
        changed
    }

    /// Return every axis and button to neutral.
    ///
    /// `reset_ffb` additionally zeroes the FFB offset and velocity; the
    /// enable path keeps them so a re-enable under active FFB resumes
    /// smoothly, the disable path clears everything.
    pub fn apply_neutral(&mut self, reset_ffb: bool) {
        self.steering = 0.0;
        self.user_steering = 0.0;
        if reset_ffb {
            self.ffb_offset = 0.0;
            self.ffb_velocity = 0.0;
        }
        self.throttle = 0.0;
        self.brake = 0.0;
        self.clutch = 0.0;
        self.dpad_x = 0;
        self.dpad_y = 0;
        self.buttons = [false; WheelButton::COUNT];
    }

    /// Apply a decoded host FFB command. Returns whether FFB state changed
    /// in a way the simulation should react to.
    pub fn apply_ffb_command(&mut self, command: FfbCommand) -> bool {
        match command {
            FfbCommand::ConstantForce { force } => {
                self.ffb_force = force;
                true
            }
            FfbCommand::StopEffect => {
                self.ffb_force = 0;
                true
            }
            FfbCommand::DisableAutocenter => {
                if self.ffb_autocenter != 0 {
                    self.ffb_autocenter = 0;
                    true
                } else {
                    false
                }
            }
            FfbCommand::ConfigureAutocenter { strength } => {
                if self.ffb_autocenter != strength {
                    self.ffb_autocenter = strength;
                    true
                } else {
                    false
                }
            }
            FfbCommand::EnableAutocenter => {
                if self.ffb_autocenter == 0 {
                    self.ffb_autocenter = crate::ffb::DEFAULT_AUTOCENTER;
                    true
                } else {
                    false
                }
            }
            FfbCommand::Vendor { .. } | FfbCommand::Unknown { .. } => false,
        }
    }

    /// Clamp and store the user FFB gain.
    pub fn set_ffb_gain(&mut self, gain: f32) {
        self.ffb_gain = gain.clamp(FFB_GAIN_MIN, FFB_GAIN_MAX);
    }

    /// Snapshot for the report encoder.
    pub fn report_state(&self) -> ReportState {
        ReportState {
            steering: self.steering,
            clutch: self.clutch,
            brake: self.brake,
            throttle: self.throttle,
            dpad_x: self.dpad_x,
            dpad_y: self.dpad_y,
            buttons: self.buttons,
        }
    }

    /// Whether every field is at its neutral value.
    pub fn is_neutral(&self) -> bool {
        self.steering == 0.0
            && self.user_steering == 0.0
            && self.ffb_offset == 0.0
            && self.ffb_velocity == 0.0
            && self.throttle == 0.0
            && self.brake == 0.0
            && self.clutch == 0.0
            && self.dpad_x == 0
            && self.dpad_y == 0
            && self.buttons.iter().all(|b| !b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steering_delta_accumulates() {
        let mut state = WheelState::default();
        for _ in 0..10 {
            state.apply_steering_delta(100, 50);
        }
        // 10 × 100 × 50 × 0.05 = 25000.
        assert_eq!(state.user_steering, 25000.0);
        assert_eq!(state.steering, 25000.0);
    }

    #[test]
    fn test_steering_delta_clamps_at_full_lock() {
        let mut state = WheelState::default();
        for _ in 0..100 {
            state.apply_steering_delta(10_000, 100);
        }
        assert_eq!(state.user_steering, STEERING_MAX);

        for _ in 0..200 {
            state.apply_steering_delta(-10_000, 100);
        }
        assert_eq!(state.user_steering, -STEERING_MAX);
    }

    #[test]
    fn test_single_step_is_bounded() {
        let mut state = WheelState::default();
        state.apply_steering_delta(1_000_000, 100);
        assert_eq!(state.user_steering, STEERING_MAX_STEP);
    }

    #[test]
    fn test_zero_delta_is_no_change() {
        let mut state = WheelState::default();
        assert!(!state.apply_steering_delta(0, 50));
    }

    #[test]
    fn test_snapshot_idempotent() {
        let mut state = WheelState::default();
        let mut snapshot = WheelInputState::default();
        snapshot.throttle = true;
        snapshot.dpad_x = 1;
        snapshot.buttons[3] = true;

        assert!(state.apply_snapshot(&snapshot));
        assert!(!state.apply_snapshot(&snapshot), "second apply must be a no-op");
        assert_eq!(state.throttle, 100.0);
        assert_eq!(state.dpad_x, 1);
    }

    #[test]
    fn test_steering_tracks_ffb_offset() {
        let mut state = WheelState::default();
        state.user_steering = 30000.0;
        state.ffb_offset = 10000.0;
        assert!(state.apply_steering());
        // Combined exceeds full scale and clamps.
        assert_eq!(state.steering, STEERING_MAX);

        state.ffb_offset = -40000.0;
        state.user_steering = 0.0;
        assert!(state.apply_steering());
        assert_eq!(state.steering, -32768.0);
    }

    #[test]
    fn test_sub_epsilon_steering_not_reported() {
        let mut state = WheelState::default();
        state.user_steering = 0.05;
        assert!(!state.apply_steering());
        assert_eq!(state.steering, 0.0);
    }

    #[test]
    fn test_neutral_preserves_ffb_when_asked() {
        let mut state = WheelState::default();
        state.ffb_offset = 500.0;
        state.ffb_velocity = 10.0;
        state.throttle = 100.0;

        state.apply_neutral(false);
        assert_eq!(state.ffb_offset, 500.0);
        assert_eq!(state.throttle, 0.0);

        state.apply_neutral(true);
        assert_eq!(state.ffb_offset, 0.0);
        assert_eq!(state.ffb_velocity, 0.0);
        assert!(state.is_neutral());
    }

    #[test]
    fn test_ffb_command_application() {
        let mut state = WheelState::default();

        assert!(state.apply_ffb_command(FfbCommand::ConstantForce { force: -3072 }));
        assert_eq!(state.ffb_force, -3072);

        assert!(state.apply_ffb_command(FfbCommand::StopEffect));
        assert_eq!(state.ffb_force, 0);

        // Enabling with no configured strength takes the default.
        assert!(state.apply_ffb_command(FfbCommand::EnableAutocenter));
        assert_eq!(state.ffb_autocenter, crate::ffb::DEFAULT_AUTOCENTER);
        // Enabling again changes nothing.
        assert!(!state.apply_ffb_command(FfbCommand::EnableAutocenter));

        assert!(state.apply_ffb_command(FfbCommand::ConfigureAutocenter { strength: 2048 }));
        assert_eq!(state.ffb_autocenter, 2048);
        assert!(!state.apply_ffb_command(FfbCommand::ConfigureAutocenter { strength: 2048 }));

        assert!(state.apply_ffb_command(FfbCommand::DisableAutocenter));
        assert_eq!(state.ffb_autocenter, 0);
        assert!(!state.apply_ffb_command(FfbCommand::DisableAutocenter));

        // Vendor traffic is acknowledged without touching state.
        assert!(!state.apply_ffb_command(FfbCommand::Vendor { sub: 0x81 }));
    }

    #[test]
    fn test_gain_clamped() {
        let mut state = WheelState::default();
        state.set_ffb_gain(0.0);
        assert_eq!(state.ffb_gain, FFB_GAIN_MIN);
        state.set_ffb_gain(10.0);
        assert_eq!(state.ffb_gain, FFB_GAIN_MAX);
        state.set_ffb_gain(0.3);
        assert_eq!(state.ffb_gain, 0.3);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// user_steering stays in range under any delta sequence, and the
        /// reported steering is always the clamped sum.
        #[test]
        fn prop_steering_invariants(
            deltas in proptest::collection::vec(-50_000i32..=50_000, 0..64),
            sensitivity in 1i32..=100,
        ) {
            let mut state = WheelState::default();
            for delta in deltas {
                state.apply_steering_delta(delta, sensitivity);
                prop_assert!(state.user_steering.abs() <= STEERING_MAX);
                let expected = (state.user_steering + state.ffb_offset)
                    .clamp(-32768.0, STEERING_MAX);
                prop_assert!((state.steering - expected).abs() < STEERING_EPSILON);
            }
        }

        /// Applying the same snapshot twice is always a no-op the second time.
        #[test]
        fn prop_snapshot_idempotent(
            throttle in any::<bool>(),
            brake in any::<bool>(),
            clutch in any::<bool>(),
            dx in -1i8..=1,
            dy in -1i8..=1,
            pressed_bit in 0usize..hid_g29_protocol::WheelButton::COUNT,
        ) {
            let mut snapshot = crate::input::WheelInputState::default();
            snapshot.throttle = throttle;
            snapshot.brake = brake;
            snapshot.clutch = clutch;
            snapshot.dpad_x = dx;
            snapshot.dpad_y = dy;
            snapshot.buttons[pressed_bit] = true;

            let mut state = WheelState::default();
            state.apply_snapshot(&snapshot);
            prop_assert!(!state.apply_snapshot(&snapshot));
        }
    }
}
