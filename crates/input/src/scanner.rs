//! Discovery, exclusive grab, and event draining of evdev devices.

use std::collections::HashMap;
use std::os::fd::BorrowedFd;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use evdev::{Device, InputEventKind, Key, RelativeAxisType};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::InputError;
use crate::mapping::{self, TOGGLE_KEY};

struct CapturedDevice {
    device: Device,
    path: PathBuf,
    keyboard: bool,
    mouse: bool,
    grabbed: bool,
}

#[derive(Default)]
struct ScannerState {
    devices: Vec<CapturedDevice>,
    /// Pressed-count per key across all keyboards, so a key held on one
    /// device survives a release on another.
    key_counts: HashMap<Key, u32>,
    prev_toggle_chord: bool,
}

/// Owns the captured input devices and their aggregated key state.
pub struct DeviceScanner {
    state: Mutex<ScannerState>,
}

/// What one drain pass produced.
#[derive(Debug, Default, Clone, Copy)]
pub struct DrainResult {
    /// Accumulated `REL_X` distance.
    pub mouse_dx: i32,
    /// Rising edge of the Ctrl+M chord.
    pub toggle: bool,
    /// Whether any key event arrived.
    pub keys_changed: bool,
}

fn wants_keyboard(keys: &evdev::AttributeSetRef<Key>) -> bool {
    mapping::keyboard_probe_keys().iter().all(|k| keys.contains(*k))
}

fn is_mouse(device: &Device) -> bool {
    device
        .supported_relative_axes()
        .map(|axes| axes.contains(RelativeAxisType::REL_X))
        .unwrap_or(false)
}

fn is_keyboard(device: &Device) -> bool {
    device
        .supported_keys()
        .map(wants_keyboard)
        .unwrap_or(false)
}

fn set_nonblocking(device: &Device) {
    if let Err(e) = fcntl(device.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK)) {
        warn!(error = %e, "failed to set input device non-blocking");
    }
}

impl DeviceScanner {
    /// Discover devices; explicit overrides win over auto-detection.
    pub fn discover(
        keyboard_override: Option<&Path>,
        mouse_override: Option<&Path>,
    ) -> Result<Self, InputError> {
        let mut state = ScannerState::default();

        if let Some(path) = keyboard_override {
            state.devices.push(open_manual(path, true, false)?);
        }
        if let Some(path) = mouse_override {
            state.devices.push(open_manual(path, false, true)?);
        }

        let auto_keyboard = keyboard_override.is_none();
        let auto_mouse = mouse_override.is_none();
        if auto_keyboard || auto_mouse {
            for (path, device) in evdev::enumerate() {
                let keyboard = auto_keyboard && is_keyboard(&device);
                let mouse = auto_mouse && is_mouse(&device);
                if !keyboard && !mouse {
                    continue;
                }
                debug!(
                    path = %path.display(),
                    name = device.name().unwrap_or("?"),
                    keyboard,
                    mouse,
                    "captured input device"
                );
                set_nonblocking(&device);
                state.devices.push(CapturedDevice {
                    device,
                    path,
                    keyboard,
                    mouse,
                    grabbed: false,
                });
            }
        }

        if !state.devices.iter().any(|d| d.keyboard) {
            return Err(InputError::NoKeyboard);
        }
        if !state.devices.iter().any(|d| d.mouse) {
            return Err(InputError::NoMouse);
        }

        info!(
            devices = state.devices.len(),
            "input capture ready"
        );
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Whether a keyboard and a mouse are both present.
    pub fn has_required_devices(&self) -> bool {
        let state = self.state.lock();
        state.devices.iter().any(|d| d.keyboard) && state.devices.iter().any(|d| d.mouse)
    }

    /// Grab or release every captured device.
    ///
    /// Returns whether all required devices ended up in the requested
    /// state. Releasing never fails.
    pub fn grab(&self, enable: bool) -> bool {
        let mut state = self.state.lock();
        for dev in state.devices.iter_mut() {
            if enable && !dev.grabbed {
                match dev.device.grab() {
                    Ok(()) => dev.grabbed = true,
                    Err(e) => warn!(path = %dev.path.display(), error = %e, "grab failed"),
                }
            } else if !enable && dev.grabbed {
                if let Err(e) = dev.device.ungrab() {
                    debug!(path = %dev.path.display(), error = %e, "ungrab failed");
                }
                dev.grabbed = false;
            }
        }
        if enable {
            Self::all_required_grabbed_locked(&state)
        } else {
            true
        }
    }

    fn all_required_grabbed_locked(state: &ScannerState) -> bool {
        state.devices.iter().any(|d| d.keyboard && d.grabbed)
            && state.devices.iter().any(|d| d.mouse && d.grabbed)
    }

    /// Whether at least one grabbed keyboard and one grabbed mouse exist.
    pub fn all_required_grabbed(&self) -> bool {
        Self::all_required_grabbed_locked(&self.state.lock())
    }

    /// Block until any device has events, or the timeout expires.
    pub fn wait_for_events(&self, timeout: Duration) {
        let state = self.state.lock();
        if state.devices.is_empty() {
            drop(state);
            std::thread::sleep(timeout.min(Duration::from_millis(50)));
            return;
        }
        // The devices stay alive for the duration of the poll because the
        // lock is held; the raw borrow is sound.
        let mut fds: Vec<PollFd> = state
            .devices
            .iter()
            .map(|d| unsafe {
                PollFd::new(
                    BorrowedFd::borrow_raw(d.device.as_raw_fd()),
                    PollFlags::POLLIN,
                )
            })
            .collect();
        let wait_ms = timeout.as_millis().min(u16::MAX as u128) as u16;
        let _ = poll(&mut fds, PollTimeout::from(wait_ms));
    }

    /// Drain pending events from every device.
    ///
    /// Devices that report a fatal read error are dropped; the caller can
    /// detect the loss through [`DeviceScanner::has_required_devices`].
    pub fn drain_events(&self) -> DrainResult {
        let mut state = self.state.lock();
        let ScannerState {
            devices,
            key_counts,
            ..
        } = &mut *state;
        let mut result = DrainResult::default();
        let mut lost: Vec<usize> = Vec::new();

        for (index, dev) in devices.iter_mut().enumerate() {
            let events = match dev.device.fetch_events() {
                Ok(events) => events.collect::<Vec<_>>(),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => {
                    warn!(path = %dev.path.display(), error = %e, "input device lost");
                    lost.push(index);
                    continue;
                }
            };
            for event in events {
                match event.kind() {
                    InputEventKind::Key(key) => match event.value() {
                        1 => {
                            *key_counts.entry(key).or_insert(0) += 1;
                            result.keys_changed = true;
                        }
                        0 => {
                            if let Some(count) = key_counts.get_mut(&key) {
                                *count = count.saturating_sub(1);
                                if *count == 0 {
                                    key_counts.remove(&key);
                                }
                            }
                            result.keys_changed = true;
                        }
                        // Autorepeat keeps the key held; nothing to track.
                        _ => {}
                    },
                    InputEventKind::RelAxis(RelativeAxisType::REL_X) => {
                        result.mouse_dx += event.value();
                    }
                    _ => {}
                }
            }
        }

        for index in lost.into_iter().rev() {
            state.devices.remove(index);
        }

        let chord = Self::is_pressed_locked(&state, Key::KEY_LEFTCTRL)
            || Self::is_pressed_locked(&state, Key::KEY_RIGHTCTRL);
        let chord = chord && Self::is_pressed_locked(&state, TOGGLE_KEY);
        result.toggle = chord && !state.prev_toggle_chord;
        state.prev_toggle_chord = chord;

        result
    }

    fn is_pressed_locked(state: &ScannerState, key: Key) -> bool {
        state.key_counts.get(&key).copied().unwrap_or(0) > 0
    }

    /// Whether the aggregated key table currently holds `key` pressed.
    pub fn is_pressed(&self, key: Key) -> bool {
        Self::is_pressed_locked(&self.state.lock(), key)
    }

    /// Build the logical wheel state from the aggregated key table.
    pub fn logical_state(&self) -> wheel_engine::WheelInputState {
        let state = self.state.lock();
        mapping::build_logical_state(|key| Self::is_pressed_locked(&state, key))
    }

    /// Rebuild the aggregated key table from each device's kernel bitmap.
    ///
    /// Run after grab transitions: a release swallowed by the grab would
    /// otherwise leave a phantom pressed key.
    pub fn resync_key_states(&self) {
        let mut state = self.state.lock();
        let mut counts: HashMap<Key, u32> = HashMap::new();
        for dev in state.devices.iter_mut() {
            if !dev.keyboard {
                continue;
            }
            match dev.device.get_key_state() {
                Ok(pressed) => {
                    for key in pressed.iter() {
                        *counts.entry(key).or_insert(0) += 1;
                    }
                }
                Err(e) => debug!(path = %dev.path.display(), error = %e, "key resync failed"),
            }
        }
        state.key_counts = counts;
        let chord = (Self::is_pressed_locked(&state, Key::KEY_LEFTCTRL)
            || Self::is_pressed_locked(&state, Key::KEY_RIGHTCTRL))
            && Self::is_pressed_locked(&state, TOGGLE_KEY);
        state.prev_toggle_chord = chord;
    }

    /// Release grabs and drop every device.
    pub fn close(&self) {
        let mut state = self.state.lock();
        for dev in state.devices.iter_mut() {
            if dev.grabbed {
                let _ = dev.device.ungrab();
            }
        }
        state.devices.clear();
        state.key_counts.clear();
    }
}

fn open_manual(path: &Path, keyboard: bool, mouse: bool) -> Result<CapturedDevice, InputError> {
    let device = Device::open(path).map_err(|e| InputError::DeviceOpen {
        path: path.to_path_buf(),
        source: e,
    })?;
    set_nonblocking(&device);
    info!(path = %path.display(), keyboard, mouse, "opened configured input device");
    Ok(CapturedDevice {
        device,
        path: path.to_path_buf(),
        keyboard,
        mouse,
        grabbed: false,
    })
}
