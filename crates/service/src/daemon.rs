//! Daemon plumbing: privilege check, signal handling, and the run loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{info, warn};

use wheel_engine::{InputPort, WheelDevice};
use wheel_input::InputManager;

/// How long the run loop waits for a frame before re-checking liveness.
const FRAME_WAIT: Duration = Duration::from_millis(100);

static RUNNING: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn handle_signal(_signal: libc::c_int) {
    // Only async-signal-safe work here: a single atomic store.
    if let Some(flag) = RUNNING.get() {
        flag.store(false, Ordering::Release);
    }
}

/// Gadget setup and evdev grabs need root.
pub fn check_root() -> Result<()> {
    // SAFETY: geteuid has no failure modes.
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        bail!("this program must run as root to build the USB gadget and grab input devices");
    }
    Ok(())
}

/// Route SIGINT/SIGTERM to the shared running flag.
pub fn install_signal_handlers(running: Arc<AtomicBool>) -> Result<()> {
    if RUNNING.set(running).is_err() {
        bail!("signal handlers installed twice");
    }

    // SAFETY: the handler is a plain fn performing one atomic store.
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handle_signal as usize;
        libc::sigemptyset(&mut action.sa_mask);
        for signal in [libc::SIGINT, libc::SIGTERM] {
            if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
                bail!(
                    "failed to install handler for signal {}: {}",
                    signal,
                    std::io::Error::last_os_error()
                );
            }
        }
    }
    Ok(())
}

/// The main frame loop: waits for input frames, routes the toggle chord,
/// applies frames to the wheel, and disables emulation if a required
/// device disappears.
pub fn run_loop(
    device: &WheelDevice,
    input: &InputManager,
    sensitivity: i32,
    running: &AtomicBool,
) {
    info!("press Ctrl+M to toggle emulation");
    while running.load(Ordering::Acquire) {
        let Some(frame) = input.wait_for_frame(FRAME_WAIT) else {
            if device.is_enabled() && !input.devices_ready() {
                warn!("required input device lost, disabling emulation");
                device.set_enabled(false, input);
            }
            continue;
        };

        if frame.toggle_pressed {
            device.toggle_enabled(input);
        }
        device.process_input_frame(&frame, sensitivity);
    }

    if device.is_enabled() {
        info!("shutting down while enabled, sending neutral");
        device.set_enabled(false, input);
    }
}
