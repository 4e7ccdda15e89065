//! Wheel emulation core.
//!
//! Three cooperating pieces live here:
//!
//! - [`state`]: the authoritative [`WheelState`](state::WheelState) and its
//!   serialised mutation helpers;
//! - [`ffb`]: the force-feedback physics that turn host FFB commands into a
//!   steering offset;
//! - [`device`]: the [`WheelDevice`](device::WheelDevice) facade owning the
//!   threads, the enable/disable state machine, and the USB write/read
//!   pumps.
//!
//! The input side of the system talks to the core only through
//! [`InputFrame`](input::InputFrame) snapshots and the
//! [`InputPort`](input::InputPort) trait, so the core never touches evdev.

pub mod device;
pub mod ffb;
pub mod input;
pub mod state;

pub use device::{DeviceError, WheelDevice};
pub use input::{InputFrame, InputPort, WheelInputState};
pub use state::WheelState;
