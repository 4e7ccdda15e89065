//! Force-feedback physics.
//!
//! The host commands a constant force and an autocenter spring; this module
//! turns them into an offset that perturbs the reported steering the way a
//! motor would turn a real column. The chain per tick:
//!
//! 1. shape the raw commanded force ([`shape_torque`]),
//! 2. low-pass the shaped force so square command edges feel like torque
//!    ramps,
//! 3. add the autocenter spring term,
//! 4. chase the resulting target with a stiffness/damping second-order
//!    response, clamping offset and velocity.
//!
//! Everything here is pure computation over an explicit snapshot; the
//! device facade owns the locking and the 1 kHz cadence.

pub use hid_g29_protocol::output::DEFAULT_AUTOCENTER;

/// Hard bound on the FFB steering offset.
pub const OFFSET_LIMIT: f32 = 22000.0;
/// Spring constant of the offset response.
pub const STIFFNESS: f32 = 120.0;
/// Exponential damping rate of the offset response.
pub const DAMPING: f32 = 8.0;
/// Velocity ceiling of the offset response.
pub const MAX_VELOCITY: f32 = 90000.0;
/// Corner frequency of the commanded-force low-pass.
pub const FORCE_FILTER_HZ: f32 = 38.0;

/// Raw force below which output is attenuated toward zero.
const SHAPE_THRESHOLD: f32 = 80.0;
const SHAPE_MIN_GAIN: f32 = 0.25;
const SHAPE_SLIP_KNEE: f32 = 4000.0;
const SHAPE_SLIP_FULL: f32 = 14000.0;
const SHAPE_BOOST: f32 = 3.0;

/// Nonlinear raw-force-to-torque mapping.
///
/// Sub-threshold commands fade quadratically so idle-hum oscillation from
/// games is imperceptible; mid-range commands run at reduced gain; heavy
/// commands (kerbs, walls) ramp back toward full gain. The boost recovers
/// the amplitude lost to the reduced mid-range gain.
pub fn shape_torque(raw: f32) -> f32 {
    let magnitude = raw.abs();
    if magnitude < SHAPE_THRESHOLD {
        return raw * (magnitude / SHAPE_THRESHOLD);
    }

    let t = ((magnitude - SHAPE_THRESHOLD) / (SHAPE_SLIP_FULL - SHAPE_THRESHOLD)).clamp(0.0, 1.0);
    let slip_weight = t * t;

    let gain = if magnitude > SHAPE_SLIP_KNEE {
        let heavy = ((magnitude - SHAPE_SLIP_KNEE) / (SHAPE_SLIP_FULL - SHAPE_SLIP_KNEE))
            .clamp(0.0, 1.0);
        SHAPE_MIN_GAIN + (1.0 - SHAPE_MIN_GAIN) * heavy
    } else {
        SHAPE_MIN_GAIN + slip_weight * (1.0 - SHAPE_MIN_GAIN)
    };

    raw * gain * SHAPE_BOOST
}

/// Snapshot of the FFB-relevant wheel state, copied under the state mutex.
#[derive(Debug, Clone, Copy)]
pub struct FfbSnapshot {
    pub force: i16,
    pub autocenter: i16,
    pub offset: f32,
    pub velocity: f32,
    pub gain: f32,
    pub steering: f32,
}

/// Result of one simulation step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FfbStep {
    pub offset: f32,
    pub velocity: f32,
}

/// The simulation state that survives between ticks.
#[derive(Debug, Default)]
pub struct ForceSimulation {
    filtered_force: f32,
}

impl ForceSimulation {
    /// Advance the simulation by `dt` seconds (already clamped by the
    /// caller to the 1–10 ms window).
    pub fn step(&mut self, snapshot: &FfbSnapshot, dt: f32) -> FfbStep {
        let shaped = shape_torque(snapshot.force as f32);

        let alpha = (1.0 - (-dt * FORCE_FILTER_HZ).exp()).clamp(0.0, 1.0);
        self.filtered_force += (shaped - self.filtered_force) * alpha;

        let spring = if snapshot.autocenter > 0 {
            -(snapshot.steering * snapshot.autocenter as f32) / 32768.0
        } else {
            0.0
        };

        let target =
            ((self.filtered_force + spring) * snapshot.gain).clamp(-OFFSET_LIMIT, OFFSET_LIMIT);

        let mut velocity = snapshot.velocity;
        let mut offset = snapshot.offset;

        velocity += (target - offset) * STIFFNESS * dt;
        velocity *= (-DAMPING * dt).exp();
        velocity = velocity.clamp(-MAX_VELOCITY, MAX_VELOCITY);

        offset += velocity * dt;
        if offset > OFFSET_LIMIT {
            offset = OFFSET_LIMIT;
            velocity = 0.0;
        } else if offset < -OFFSET_LIMIT {
            offset = -OFFSET_LIMIT;
            velocity = 0.0;
        }

        FfbStep { offset, velocity }
    }

    /// Current filtered force, for diagnostics.
    pub fn filtered_force(&self) -> f32 {
        self.filtered_force
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(force: i16) -> FfbSnapshot {
        FfbSnapshot {
            force,
            autocenter: 0,
            offset: 0.0,
            velocity: 0.0,
            gain: 1.0,
            steering: 0.0,
        }
    }

    fn settle(sim: &mut ForceSimulation, snapshot: &FfbSnapshot, ticks: usize) -> FfbStep {
        let mut current = *snapshot;
        let mut step = FfbStep {
            offset: current.offset,
            velocity: current.velocity,
        };
        for _ in 0..ticks {
            step = sim.step(&current, 0.001);
            current.offset = step.offset;
            current.velocity = step.velocity;
        }
        step
    }

    #[test]
    fn test_shape_attenuates_micro_forces() {
        for raw in [-79.0f32, -20.0, -1.0, 1.0, 20.0, 79.0] {
            let shaped = shape_torque(raw);
            assert!(
                shaped.abs() <= raw.abs(),
                "sub-threshold force {} must attenuate, got {}",
                raw,
                shaped
            );
            assert_eq!(shaped.signum(), raw.signum());
        }
    }

    #[test]
    fn test_shape_zero_is_zero() {
        assert_eq!(shape_torque(0.0), 0.0);
    }

    #[test]
    fn test_shape_heavy_forces_reach_full_gain() {
        // At slip_full the heavy ramp hits gain 1.0, so output = raw × boost.
        let shaped = shape_torque(14000.0);
        assert!((shaped - 14000.0 * SHAPE_BOOST).abs() < 1.0);
    }

    #[test]
    fn test_shape_mid_range_runs_reduced() {
        // Just above threshold the gain sits near min_gain × boost.
        let shaped = shape_torque(100.0);
        assert!(shaped < 100.0 * SHAPE_BOOST * 0.5);
        assert!(shaped > 0.0);
    }

    #[test]
    fn test_constant_force_drives_offset_toward_target() {
        let mut sim = ForceSimulation::default();
        let step = settle(&mut sim, &snapshot(-3072), 200);
        assert!(
            step.offset < -100.0,
            "negative force must produce a negative offset, got {}",
            step.offset
        );
    }

    #[test]
    fn test_offset_clamp_zeroes_velocity() {
        let mut sim = ForceSimulation::default();
        let mut current = snapshot(0);
        // Start right at the rail with velocity pushing outward.
        current.offset = OFFSET_LIMIT - 1.0;
        current.velocity = MAX_VELOCITY;
        let step = sim.step(&current, 0.01);
        assert_eq!(step.offset, OFFSET_LIMIT);
        assert_eq!(step.velocity, 0.0);
    }

    #[test]
    fn test_offset_never_exceeds_limit() {
        let mut sim = ForceSimulation::default();
        let mut current = snapshot(i16::MAX);
        current.gain = FFB_GAIN_TEST_MAX;
        for _ in 0..2000 {
            let step = sim.step(&current, 0.001);
            assert!(step.offset.abs() <= OFFSET_LIMIT);
            assert!(step.velocity.abs() <= MAX_VELOCITY);
            current.offset = step.offset;
            current.velocity = step.velocity;
        }
    }

    const FFB_GAIN_TEST_MAX: f32 = 4.0;

    #[test]
    fn test_autocenter_pulls_against_steering() {
        let mut sim = ForceSimulation::default();
        let mut current = FfbSnapshot {
            force: 0,
            autocenter: 1024,
            offset: 0.0,
            velocity: 0.0,
            gain: 1.0,
            steering: 10000.0,
        };
        let mut step = FfbStep { offset: 0.0, velocity: 0.0 };
        for _ in 0..3000 {
            step = sim.step(&current, 0.001);
            current.offset = step.offset;
            current.velocity = step.velocity;
        }
        // Steady state near -(steering × autocenter / 32768) × gain = -312.5.
        let expected = -(10000.0 * 1024.0 / 32768.0);
        assert!(
            (step.offset - expected).abs() < expected.abs() * 0.1,
            "spring offset {} should settle near {}",
            step.offset,
            expected
        );
    }

    #[test]
    fn test_zero_force_decays_to_rest() {
        let mut sim = ForceSimulation::default();
        // Kick the simulation, then let it settle with no command.
        let mut current = snapshot(5000);
        for _ in 0..100 {
            let step = sim.step(&current, 0.001);
            current.offset = step.offset;
            current.velocity = step.velocity;
        }
        current.force = 0;
        let step = settle(&mut sim, &current, 5000);
        assert!(
            step.offset.abs() < 50.0,
            "offset should decay toward rest, got {}",
            step.offset
        );
        assert!(
            sim.filtered_force().abs() < 1.0,
            "filtered force should have washed out, got {}",
            sim.filtered_force()
        );
    }
}
