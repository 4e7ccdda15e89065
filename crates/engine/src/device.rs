//! The wheel device facade: thread lifecycle, enable/disable state machine,
//! and the USB write/read pumps.
//!
//! Thread model (all long-lived, all exit on shutdown):
//!
//! | thread          | spawned       | purpose                              |
//! |-----------------|---------------|--------------------------------------|
//! | `ffb-sim`       | [`WheelDevice::create`] | physics tick at ~1 kHz     |
//! | `hid-write-pump`| first enable  | push input reports on dirty/warm-up  |
//! | `hid-read-pump` | first enable  | drain host FFB output reports        |
//!
//! Two condition variables keep wake-ups cheap: `state_cv` wakes the write
//! pump, `ffb_cv` wakes the simulation. Every wait carries a timeout so a
//! cleared running flag is observed within a few milliseconds.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use hid_g29_protocol::{build_input_report, decode_output_report, INPUT_REPORT_LEN, OUTPUT_REPORT_LEN};
use wheel_gadget::{GadgetError, HidGadget, ReadReadiness};

use crate::ffb::{FfbSnapshot, ForceSimulation};
use crate::input::{InputFrame, InputPort};
use crate::state::WheelState;

/// Reports pushed unconditionally after enable so the host latches on.
const WARMUP_FRAMES: i32 = 25;
/// How long the enable path waits for the endpoint to become writable.
const ENDPOINT_READY_TIMEOUT: Duration = Duration::from_millis(1500);
/// How long the enable/disable paths wait for the pump to flush neutral.
const NEUTRAL_FLUSH_TIMEOUT: Duration = Duration::from_millis(150);
/// Write pump condvar wait slice.
const PUMP_WAIT: Duration = Duration::from_millis(2);
/// FFB simulation condvar wait slice (~1 kHz tick rate).
const FFB_WAIT: Duration = Duration::from_millis(1);
/// Read pump poll slice.
const READ_POLL: Duration = Duration::from_millis(5);
/// Back-off while the endpoint is missing or broken.
const ENDPOINT_BACKOFF: Duration = Duration::from_millis(5);
/// Short idle sleep for gated loops.
const IDLE_SLEEP: Duration = Duration::from_millis(2);
/// Endpoint readiness retry inside the write pump.
const PUMP_READY_TIMEOUT: Duration = Duration::from_millis(50);
/// Endpoint readiness retry inside the read pump.
const READER_READY_TIMEOUT: Duration = Duration::from_millis(10);

/// Errors surfaced by [`WheelDevice::create`].
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The USB gadget could not be brought up.
    #[error(transparent)]
    Gadget(#[from] GadgetError),
    /// An OS thread could not be spawned.
    #[error("failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        /// Thread label.
        name: &'static str,
        /// Underlying error.
        source: io::Error,
    },
}

/// Everything the worker threads share.
struct Shared {
    state: Mutex<WheelState>,
    /// Wakes the write pump.
    state_cv: Condvar,
    /// Wakes the FFB simulation.
    ffb_cv: Condvar,
    state_dirty: AtomicBool,
    warmup_frames: AtomicI32,
    /// Sole gate for host I/O, toggled only by the facade.
    output_enabled: AtomicBool,
    ffb_running: AtomicBool,
    pump_running: AtomicBool,
    reader_running: AtomicBool,
    /// Process-wide run flag, owned by the daemon shell.
    running: Arc<AtomicBool>,
    gadget: HidGadget,
}

impl Shared {
    fn alive(&self, local: &AtomicBool) -> bool {
        local.load(Ordering::Acquire) && self.running.load(Ordering::Acquire)
    }

    fn notify_state_changed(&self) {
        self.state_dirty.store(true, Ordering::Release);
        self.state_cv.notify_all();
        self.ffb_cv.notify_all();
    }
}

struct Threads {
    ffb: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

/// The only surface the rest of the system uses to drive the wheel.
pub struct WheelDevice {
    shared: Arc<Shared>,
    /// Serialises enable/disable transitions; never held while the state
    /// mutex is needed by the pumps.
    enable_mutex: Mutex<()>,
    threads: Mutex<Threads>,
    shut_down: AtomicBool,
}

impl WheelDevice {
    /// Bring up the gadget, park the state at neutral, and start the FFB
    /// simulation thread.
    pub fn create(gadget: HidGadget, running: Arc<AtomicBool>) -> Result<Self, DeviceError> {
        debug!("creating virtual wheel via USB gadget");
        gadget.initialize()?;

        let shared = Arc::new(Shared {
            state: Mutex::new(WheelState::default()),
            state_cv: Condvar::new(),
            ffb_cv: Condvar::new(),
            state_dirty: AtomicBool::new(false),
            warmup_frames: AtomicI32::new(0),
            output_enabled: AtomicBool::new(false),
            ffb_running: AtomicBool::new(true),
            pump_running: AtomicBool::new(false),
            reader_running: AtomicBool::new(false),
            running,
            gadget,
        });

        let ffb_shared = Arc::clone(&shared);
        let ffb = thread::Builder::new()
            .name("ffb-sim".into())
            .spawn(move || Self::ffb_loop(&ffb_shared))
            .map_err(|e| DeviceError::ThreadSpawn {
                name: "ffb-sim",
                source: e,
            })?;

        let device = Self {
            shared,
            enable_mutex: Mutex::new(()),
            threads: Mutex::new(Threads {
                ffb: Some(ffb),
                pump: None,
                reader: None,
            }),
            shut_down: AtomicBool::new(false),
        };
        device.send_neutral(true);
        Ok(device)
    }

    /// Whether emulation is currently enabled.
    pub fn is_enabled(&self) -> bool {
        self.shared.state.lock().enabled
    }

    /// Whether reports are currently allowed to reach the host.
    pub fn output_enabled(&self) -> bool {
        self.shared.output_enabled.load(Ordering::Acquire)
    }

    /// Clone of the current wheel state, for diagnostics and tests.
    pub fn snapshot_state(&self) -> WheelState {
        self.shared.state.lock().clone()
    }

    /// Clamp and store the user FFB strength multiplier.
    pub fn set_ffb_gain(&self, gain: f32) {
        self.shared.state.lock().set_ffb_gain(gain);
    }

    /// Flip the enabled state.
    pub fn toggle_enabled(&self, input: &dyn InputPort) -> bool {
        let next = !self.is_enabled();
        self.set_enabled(next, input)
    }

    /// Run the enable or disable transition.
    ///
    /// Enable: grab inputs → neutral state → UDC bind → endpoint ready →
    /// pumps up → neutral flush (pump first, direct write fallback) →
    /// warm-up burst. Any failure reverts to a fully disabled, neutral
    /// state with grabs released. Disable mirrors: neutral flush
    /// best-effort, output gate closed, grabs released.
    ///
    /// Returns whether the device ended up in the requested state.
    pub fn set_enabled(&self, enable: bool, input: &dyn InputPort) -> bool {
        let _transition = self.enable_mutex.lock();
        let shared = &self.shared;

        let changed = {
            let mut state = shared.state.lock();
            if state.enabled == enable {
                false
            } else {
                state.enabled = enable;
                true
            }
        };
        if !changed {
            if !enable {
                input.grab_devices(false);
            }
            return true;
        }

        let success = if enable {
            self.run_enable(input)
        } else {
            self.run_disable(input);
            true
        };
        if success {
            info!(
                "emulation {}",
                if enable { "ENABLED" } else { "DISABLED" }
            );
        }
        success
    }

    fn revert_enable(&self, input: &dyn InputPort, release_grabs: bool) {
        if release_grabs {
            input.grab_devices(false);
        }
        let mut state = self.shared.state.lock();
        state.apply_neutral(true);
        state.enabled = false;
    }

    fn run_enable(&self, input: &dyn InputPort) -> bool {
        let shared = &self.shared;

        if !input.devices_ready() {
            error!("enable aborted: required input devices missing");
            self.revert_enable(input, false);
            return false;
        }
        if !input.grab_devices(true) {
            error!("enable aborted: unable to grab keyboard/mouse");
            self.revert_enable(input, false);
            return false;
        }
        if !input.all_required_grabbed() {
            error!("enable aborted: missing required input device");
            self.revert_enable(input, true);
            return false;
        }
        input.resync_key_states();

        shared.output_enabled.store(false, Ordering::Release);
        shared.warmup_frames.store(0, Ordering::Release);
        shared.state_dirty.store(false, Ordering::Release);

        let neutral_report = {
            let mut state = shared.state.lock();
            state.apply_neutral(false);
            build_input_report(&state.report_state())
        };

        if !shared.gadget.is_udc_bound() {
            if let Err(e) = shared.gadget.bind_udc() {
                error!(error = %e, "enable aborted: UDC bind failed");
                self.revert_enable(input, true);
                return false;
            }
        }

        if !shared.gadget.wait_ready(ENDPOINT_READY_TIMEOUT) {
            error!("HID endpoint never became ready; holding neutral");
            self.revert_enable(input, true);
            return false;
        }

        if !self.ensure_pump_threads() {
            self.revert_enable(input, true);
            return false;
        }

        shared.output_enabled.store(true, Ordering::Release);
        shared.warmup_frames.store(0, Ordering::Release);
        shared.state_dirty.store(false, Ordering::Release);
        {
            let mut state = shared.state.lock();
            state.apply_neutral(false);
        }
        shared.state_dirty.store(true, Ordering::Release);
        shared.state_cv.notify_all();

        let mut neutral_sent = self.wait_for_state_flush(NEUTRAL_FLUSH_TIMEOUT);
        if !neutral_sent {
            // The pump did not flush in time; fall back to a direct write.
            shared.output_enabled.store(false, Ordering::Release);
            shared.state_dirty.store(false, Ordering::Release);
            neutral_sent = shared.gadget.write_report_blocking(&neutral_report);
            if !neutral_sent {
                error!("failed to prime HID reports; holding neutral");
                self.revert_enable(input, true);
                return false;
            }
            shared.output_enabled.store(true, Ordering::Release);
        }

        shared.warmup_frames.store(WARMUP_FRAMES, Ordering::Release);
        shared.state_cv.notify_all();
        true
    }

    fn run_disable(&self, input: &dyn InputPort) {
        let shared = &self.shared;
        shared.warmup_frames.store(0, Ordering::Release);

        let neutral_report = {
            let mut state = shared.state.lock();
            state.apply_neutral(true);
            build_input_report(&state.report_state())
        };

        let mut neutral_sent = false;
        if shared.pump_running.load(Ordering::Acquire)
            && shared.output_enabled.load(Ordering::Acquire)
        {
            shared.state_dirty.store(true, Ordering::Release);
            shared.state_cv.notify_all();
            neutral_sent = self.wait_for_state_flush(NEUTRAL_FLUSH_TIMEOUT);
        }

        shared.output_enabled.store(false, Ordering::Release);
        shared.state_dirty.store(false, Ordering::Release);

        if !neutral_sent && !shared.gadget.write_report_blocking(&neutral_report) {
            warn!("failed to send neutral frame while disabling");
        }
        input.resync_key_states();
        input.grab_devices(false);
    }

    /// Apply one input frame: steering delta plus logical snapshot.
    ///
    /// No-op unless emulation is enabled and output is flowing.
    pub fn process_input_frame(&self, frame: &InputFrame, sensitivity: i32) {
        let shared = &self.shared;
        let changed = {
            let mut state = shared.state.lock();
            if !state.enabled || !shared.output_enabled.load(Ordering::Acquire) {
                return;
            }
            let mut changed = state.apply_steering_delta(frame.mouse_dx, sensitivity);
            changed |= state.apply_snapshot(&frame.logical);
            changed
        };
        if changed {
            shared.notify_state_changed();
        }
    }

    /// Park the state at neutral; wake the pump if the endpoint is live.
    pub fn send_neutral(&self, reset_ffb: bool) {
        {
            let mut state = self.shared.state.lock();
            state.apply_neutral(reset_ffb);
        }
        if self.shared.gadget.is_ready() {
            self.shared.notify_state_changed();
        }
    }

    /// Feed one complete 7-byte FFB output report into the state.
    ///
    /// This is the read pump's delivery path; it is public so hosts of the
    /// facade can inject FFB traffic from other transports.
    pub fn apply_ffb_packet(&self, packet: &[u8; OUTPUT_REPORT_LEN]) {
        Self::apply_ffb_packet_shared(&self.shared, packet);
    }

    fn apply_ffb_packet_shared(shared: &Shared, packet: &[u8; OUTPUT_REPORT_LEN]) {
        let Ok(command) = decode_output_report(packet) else {
            return;
        };
        let mut state = shared.state.lock();
        if !state.enabled {
            return;
        }
        if state.apply_ffb_command(command) {
            // Woken inside the critical section so the simulation snapshots
            // the new command on its very next tick.
            shared.ffb_cv.notify_all();
        }
    }

    /// Poll `state_dirty` until the pump consumed it or the deadline hits.
    fn wait_for_state_flush(&self, timeout: Duration) -> bool {
        let shared = &self.shared;
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if !shared.state_dirty.load(Ordering::Acquire) {
                return true;
            }
            if !shared.running.load(Ordering::Acquire)
                || !shared.pump_running.load(Ordering::Acquire)
                || !shared.output_enabled.load(Ordering::Acquire)
            {
                break;
            }
            thread::sleep(IDLE_SLEEP);
        }
        !shared.state_dirty.load(Ordering::Acquire)
    }

    fn ensure_pump_threads(&self) -> bool {
        self.shared.gadget.set_non_blocking(true);
        let mut threads = self.threads.lock();

        if !self.shared.pump_running.load(Ordering::Acquire) {
            self.shared.pump_running.store(true, Ordering::Release);
            let shared = Arc::clone(&self.shared);
            match thread::Builder::new()
                .name("hid-write-pump".into())
                .spawn(move || Self::write_pump_loop(&shared))
            {
                Ok(handle) => threads.pump = Some(handle),
                Err(e) => {
                    error!(error = %e, "failed to spawn write pump");
                    self.shared.pump_running.store(false, Ordering::Release);
                    return false;
                }
            }
        }

        if !self.shared.reader_running.load(Ordering::Acquire) {
            self.shared.reader_running.store(true, Ordering::Release);
            let shared = Arc::clone(&self.shared);
            match thread::Builder::new()
                .name("hid-read-pump".into())
                .spawn(move || Self::read_pump_loop(&shared))
            {
                Ok(handle) => threads.reader = Some(handle),
                Err(e) => {
                    error!(error = %e, "failed to spawn read pump");
                    self.shared.reader_running.store(false, Ordering::Release);
                    return false;
                }
            }
        }
        true
    }

    /// Stop every worker and join them. Safe to call repeatedly.
    pub fn shutdown_threads(&self) {
        let shared = &self.shared;
        shared.ffb_running.store(false, Ordering::Release);
        shared.pump_running.store(false, Ordering::Release);
        shared.reader_running.store(false, Ordering::Release);
        shared.warmup_frames.store(0, Ordering::Release);
        shared.output_enabled.store(false, Ordering::Release);

        shared.state_cv.notify_all();
        shared.ffb_cv.notify_all();

        let mut threads = self.threads.lock();
        for handle in [
            threads.pump.take(),
            threads.reader.take(),
            threads.ffb.take(),
        ]
        .into_iter()
        .flatten()
        {
            if handle.join().is_err() {
                error!("wheel worker thread panicked");
            }
        }
    }

    /// Stop threads and tear the gadget down.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown_threads();
        self.shared.gadget.shutdown();
    }

    // ─── worker loops ────────────────────────────────────────────────────

    fn write_pump_loop(shared: &Shared) {
        debug!("write pump started");
        loop {
            {
                let mut state = shared.state.lock();
                if !shared.alive(&shared.pump_running) {
                    break;
                }
                let _ = shared.state_cv.wait_for(&mut state, PUMP_WAIT);
            }
            if !shared.alive(&shared.pump_running) {
                break;
            }

            let should_send = shared.state_dirty.swap(false, Ordering::AcqRel);
            let mut warmup = false;
            if shared.warmup_frames.load(Ordering::Acquire) > 0 {
                warmup = true;
                shared.warmup_frames.fetch_sub(1, Ordering::AcqRel);
            }
            let allow_output = shared.output_enabled.load(Ordering::Acquire);
            if !allow_output || !(should_send || warmup) {
                continue;
            }

            let mut ready = shared.gadget.is_ready();
            if !ready {
                if !shared.gadget.is_udc_bound() {
                    shared.state_dirty.store(true, Ordering::Release);
                    thread::sleep(IDLE_SLEEP);
                } else if !shared.gadget.wait_ready(PUMP_READY_TIMEOUT) {
                    shared.state_dirty.store(true, Ordering::Release);
                    thread::sleep(IDLE_SLEEP);
                } else {
                    ready = true;
                }
            }
            if ready && !Self::send_report(shared) {
                shared.gadget.reset_endpoint();
                shared.state_dirty.store(true, Ordering::Release);
            }
        }
        debug!("write pump stopped");
    }

    fn send_report(shared: &Shared) -> bool {
        let report: [u8; INPUT_REPORT_LEN] = {
            let state = shared.state.lock();
            build_input_report(&state.report_state())
        };
        shared.gadget.write_report_blocking(&report)
    }

    fn read_pump_loop(shared: &Shared) {
        debug!("read pump started");
        let mut pending = [0u8; OUTPUT_REPORT_LEN];
        let mut pending_len = 0usize;

        while shared.alive(&shared.reader_running) {
            if !shared.gadget.is_udc_bound() {
                thread::sleep(ENDPOINT_BACKOFF);
                continue;
            }
            if !shared.gadget.is_ready() && !shared.gadget.wait_ready(READER_READY_TIMEOUT) {
                thread::sleep(IDLE_SLEEP);
                continue;
            }

            match shared.gadget.poll_readable(READ_POLL) {
                ReadReadiness::Idle => continue,
                ReadReadiness::Gone => {
                    shared.gadget.reset_endpoint();
                    thread::sleep(ENDPOINT_BACKOFF);
                }
                ReadReadiness::Readable => {
                    Self::drain_output(shared, &mut pending, &mut pending_len);
                }
            }
        }
        debug!("read pump stopped");
    }

    /// Drain the endpoint, reassembling 7-byte commands out of whatever
    /// framing the kernel hands us.
    fn drain_output(shared: &Shared, pending: &mut [u8; OUTPUT_REPORT_LEN], pending_len: &mut usize) {
        let mut buffer = [0u8; 32];
        while shared.alive(&shared.reader_running) {
            let count = match shared.gadget.read_nonblocking(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::NotConnected => break,
                Err(e) => {
                    warn!(error = %e, "FFB output read failed, resetting endpoint");
                    shared.gadget.reset_endpoint();
                    break;
                }
            };

            let mut offset = 0usize;
            while offset < count {
                let needed = OUTPUT_REPORT_LEN - *pending_len;
                let chunk = (count - offset).min(needed);
                pending[*pending_len..*pending_len + chunk]
                    .copy_from_slice(&buffer[offset..offset + chunk]);
                *pending_len += chunk;
                offset += chunk;

                if *pending_len == OUTPUT_REPORT_LEN {
                    if shared.output_enabled.load(Ordering::Acquire) {
                        Self::apply_ffb_packet_shared(shared, pending);
                    }
                    *pending_len = 0;
                }
            }
        }
    }

    fn ffb_loop(shared: &Shared) {
        debug!("FFB simulation started");
        let mut sim = ForceSimulation::default();
        let mut last = Instant::now();

        loop {
            let snapshot = {
                let mut state = shared.state.lock();
                let _ = shared.ffb_cv.wait_for(&mut state, FFB_WAIT);
                if !shared.alive(&shared.ffb_running) {
                    break;
                }
                if !state.enabled || !shared.output_enabled.load(Ordering::Acquire) {
                    None
                } else {
                    Some(FfbSnapshot {
                        force: state.ffb_force,
                        autocenter: state.ffb_autocenter,
                        offset: state.ffb_offset,
                        velocity: state.ffb_velocity,
                        gain: state.ffb_gain,
                        steering: state.steering,
                    })
                }
            };
            let Some(snapshot) = snapshot else {
                thread::sleep(IDLE_SLEEP);
                continue;
            };

            let now = Instant::now();
            let dt = now.duration_since(last).as_secs_f32().clamp(0.001, 0.01);
            last = now;

            let step = sim.step(&snapshot, dt);

            let steering_changed = {
                let mut state = shared.state.lock();
                if !shared.alive(&shared.ffb_running) {
                    break;
                }
                // A disable may have neutralised the state while this tick
                // was computing; its result is stale and must not land.
                if !state.enabled {
                    continue;
                }
                state.ffb_offset = step.offset;
                state.ffb_velocity = step.velocity;
                state.apply_steering()
            };
            if steering_changed {
                shared.state_dirty.store(true, Ordering::Release);
                shared.state_cv.notify_all();
            }
        }
        debug!("FFB simulation stopped");
    }
}

impl Drop for WheelDevice {
    fn drop(&mut self) {
        self.shutdown();
    }
}
