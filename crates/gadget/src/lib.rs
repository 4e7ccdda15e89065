//! Linux USB gadget backend for the wheel emulator.
//!
//! Owns the device's presence on the host: the ConfigFS gadget tree, the
//! UDC binding that makes the gadget enumerate, and the `/dev/hidg0`
//! character device used for report I/O. Everything kernel-facing lives
//! here so the rest of the system only sees [`HidGadget`]'s narrow
//! contract: blocking report writes with retry, non-blocking reads, and
//! pollable readiness.
//!
//! All paths are routed through [`GadgetPaths`] so tests can exercise the
//! tree builder and endpoint against a temporary directory instead of a
//! live kernel.

pub mod configfs;
pub mod endpoint;
pub mod error;

pub use configfs::GadgetPaths;
pub use endpoint::{HidGadget, ReadReadiness};
pub use error::{GadgetError, Result};
