//! Logitech G29 HID protocol: report descriptor, input report encoding, and
//! FFB output report decoding.
//!
//! This crate is intentionally I/O-free and allocation-free on hot paths.
//! It provides pure functions and types that can be tested without hardware:
//! the gadget side encodes a 13-byte input report from wheel state, and
//! decodes the host's 7-byte FFB output reports into [`FfbCommand`] values.

#![deny(static_mut_refs)]

pub mod descriptor;
pub mod ids;
pub mod input;
pub mod output;
pub mod types;

pub use descriptor::{G29_REPORT_DESCRIPTOR, INPUT_REPORT_LEN, OUTPUT_REPORT_LEN};
pub use ids::{G29_BCD_DEVICE, G29_PRODUCT_ID, LOGITECH_VENDOR_ID};
pub use input::{build_input_report, hat_from_dpad, ReportState, HAT_NEUTRAL};
pub use output::{decode_output_report, FfbCommand};
pub use types::{ButtonStates, ProtocolError, WheelButton};
