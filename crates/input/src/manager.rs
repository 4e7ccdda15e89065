//! The input manager: reader thread and frame mailbox.
//!
//! A single reader thread waits on the captured devices, drains their
//! events, and coalesces the results into one pending [`InputFrame`]:
//! mouse deltas accumulate, the toggle edge is sticky, and the logical
//! state is always the latest. Consumers take the frame and the
//! accumulators reset, so a slow consumer sees one merged frame instead of
//! a backlog.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use wheel_engine::{InputFrame, InputPort, WheelInputState};

use crate::error::InputError;
use crate::scanner::DeviceScanner;

/// Reader poll slice; also bounds shutdown latency.
const READER_WAIT: Duration = Duration::from_millis(200);

struct Pending {
    frame: InputFrame,
    current: WheelInputState,
    sequence: u64,
    consumed: u64,
}

struct Mailbox {
    pending: Mutex<Pending>,
    cv: Condvar,
}

impl Mailbox {
    fn new(initial: WheelInputState) -> Self {
        Self {
            pending: Mutex::new(Pending {
                frame: InputFrame::new(initial),
                current: initial,
                sequence: 0,
                consumed: 0,
            }),
            cv: Condvar::new(),
        }
    }

    /// Merge one reader pass into the pending frame.
    fn publish(&self, logical: WheelInputState, mouse_dx: i32, toggle: bool) {
        let mut pending = self.pending.lock();
        pending.current = logical;
        pending.frame.logical = logical;
        pending.frame.mouse_dx += mouse_dx;
        pending.frame.toggle_pressed |= toggle;
        pending.frame.timestamp = Instant::now();
        pending.sequence += 1;
        self.cv.notify_all();
    }

    fn take_locked(pending: &mut Pending) -> InputFrame {
        let frame = pending.frame;
        pending.frame.mouse_dx = 0;
        pending.frame.toggle_pressed = false;
        pending.consumed = pending.sequence;
        frame
    }

    fn try_take(&self) -> Option<InputFrame> {
        let mut pending = self.pending.lock();
        if pending.consumed == pending.sequence {
            return None;
        }
        Some(Self::take_locked(&mut pending))
    }

    fn wait_take(&self, timeout: Duration, keep_waiting: impl Fn() -> bool) -> Option<InputFrame> {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        loop {
            if pending.consumed != pending.sequence {
                return Some(Self::take_locked(&mut pending));
            }
            if !keep_waiting() {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let _ = self.cv.wait_for(&mut pending, deadline - now);
        }
    }
}

/// Captures keyboard/mouse input and produces wheel input frames.
pub struct InputManager {
    scanner: Arc<DeviceScanner>,
    mailbox: Arc<Mailbox>,
    reader_running: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl InputManager {
    /// Discover devices and start the reader thread.
    pub fn initialize(
        keyboard_override: Option<&Path>,
        mouse_override: Option<&Path>,
        running: Arc<AtomicBool>,
    ) -> Result<Self, InputError> {
        let scanner = Arc::new(DeviceScanner::discover(keyboard_override, mouse_override)?);
        let mailbox = Arc::new(Mailbox::new(scanner.logical_state()));
        let reader_running = Arc::new(AtomicBool::new(true));

        let reader = {
            let scanner = Arc::clone(&scanner);
            let mailbox = Arc::clone(&mailbox);
            let reader_running = Arc::clone(&reader_running);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("input-reader".into())
                .spawn(move || {
                    Self::reader_loop(&scanner, &mailbox, &reader_running, &running);
                })
                .map_err(InputError::ReaderSpawn)?
        };

        info!("input manager initialized");
        Ok(Self {
            scanner,
            mailbox,
            reader_running,
            running,
            reader: Mutex::new(Some(reader)),
        })
    }

    fn reader_loop(
        scanner: &DeviceScanner,
        mailbox: &Mailbox,
        reader_running: &AtomicBool,
        running: &AtomicBool,
    ) {
        debug!("input reader started");
        while reader_running.load(Ordering::Acquire) && running.load(Ordering::Acquire) {
            scanner.wait_for_events(READER_WAIT);
            let drained = scanner.drain_events();
            let next = scanner.logical_state();

            let changed = {
                let pending = mailbox.pending.lock();
                pending.current != next
            };
            if drained.mouse_dx == 0 && !drained.toggle && !changed {
                continue;
            }
            mailbox.publish(next, drained.mouse_dx, drained.toggle);
        }
        mailbox.cv.notify_all();
        debug!("input reader stopped");
    }

    /// Block for up to `timeout` waiting for a frame.
    pub fn wait_for_frame(&self, timeout: Duration) -> Option<InputFrame> {
        let reader_running = Arc::clone(&self.reader_running);
        let running = Arc::clone(&self.running);
        self.mailbox.wait_take(timeout, move || {
            reader_running.load(Ordering::Acquire) && running.load(Ordering::Acquire)
        })
    }

    /// Non-blocking frame fetch.
    pub fn try_get_frame(&self) -> Option<InputFrame> {
        self.mailbox.try_take()
    }

    /// Latest logical wheel state, without consuming the pending frame.
    pub fn latest_logical_state(&self) -> WheelInputState {
        self.mailbox.pending.lock().current
    }

    /// Stop the reader and release the devices.
    pub fn shutdown(&self) {
        self.reader_running.store(false, Ordering::Release);
        self.mailbox.cv.notify_all();
        if let Some(handle) = self.reader.lock().take() {
            let _ = handle.join();
        }
        self.scanner.close();
    }
}

impl InputPort for InputManager {
    fn grab_devices(&self, enable: bool) -> bool {
        self.scanner.grab(enable)
    }

    fn all_required_grabbed(&self) -> bool {
        self.scanner.all_required_grabbed()
    }

    fn resync_key_states(&self) {
        self.scanner.resync_key_states();
        let current = self.scanner.logical_state();
        let mut pending = self.mailbox.pending.lock();
        pending.current = current;
        pending.frame.logical = current;
    }

    fn devices_ready(&self) -> bool {
        self.scanner.has_required_devices()
    }
}

impl Drop for InputManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_coalesces_deltas() {
        let mailbox = Mailbox::new(WheelInputState::default());
        mailbox.publish(WheelInputState::default(), 10, false);
        mailbox.publish(WheelInputState::default(), 15, true);

        let frame = mailbox.try_take().expect("frame pending");
        assert_eq!(frame.mouse_dx, 25);
        assert!(frame.toggle_pressed);

        // Consuming resets the accumulators.
        assert!(mailbox.try_take().is_none());
        mailbox.publish(WheelInputState::default(), 1, false);
        let frame = mailbox.try_take().unwrap();
        assert_eq!(frame.mouse_dx, 1);
        assert!(!frame.toggle_pressed);
    }

    #[test]
    fn test_mailbox_keeps_latest_logical_state() {
        let mailbox = Mailbox::new(WheelInputState::default());
        let mut first = WheelInputState::default();
        first.throttle = true;
        let mut second = WheelInputState::default();
        second.brake = true;

        mailbox.publish(first, 0, false);
        mailbox.publish(second, 0, false);

        let frame = mailbox.try_take().unwrap();
        assert!(!frame.logical.throttle, "stale logical state must not win");
        assert!(frame.logical.brake);
    }

    #[test]
    fn test_wait_take_times_out_empty() {
        let mailbox = Mailbox::new(WheelInputState::default());
        let start = Instant::now();
        let frame = mailbox.wait_take(Duration::from_millis(30), || true);
        assert!(frame.is_none());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_wait_take_stops_when_told() {
        let mailbox = Mailbox::new(WheelInputState::default());
        let frame = mailbox.wait_take(Duration::from_secs(5), || false);
        assert!(frame.is_none());
    }
}
