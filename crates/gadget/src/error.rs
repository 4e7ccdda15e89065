//! Gadget and endpoint error types.

use std::io;
use std::path::PathBuf;

/// Errors raised while managing the USB gadget.
#[derive(Debug, thiserror::Error)]
pub enum GadgetError {
    /// ConfigFS is not mounted (or the kernel lacks gadget support).
    #[error("USB gadget ConfigFS not available at {0}")]
    NoConfigFs(PathBuf),

    /// No USB device controller to bind the gadget to.
    #[error("no USB device controller found under {0}")]
    NoUdc(PathBuf),

    /// Building or tearing down the gadget tree failed.
    #[error("gadget setup failed ({context}): {source}")]
    GadgetSetup {
        /// What was being written when the failure occurred.
        context: String,
        /// Underlying filesystem error.
        source: io::Error,
    },

    /// UDC attach/detach failed.
    #[error("failed to {action} UDC '{udc}': {source}")]
    UdcBinding {
        /// "bind" or "unbind".
        action: &'static str,
        /// UDC name involved.
        udc: String,
        /// Underlying filesystem error.
        source: io::Error,
    },

    /// The hidg character device could not be opened.
    #[error("failed to open HID endpoint {path}: {source}")]
    EndpointOpen {
        /// Endpoint device path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
}

impl GadgetError {
    pub(crate) fn setup(context: impl Into<String>, source: io::Error) -> Self {
        GadgetError::GadgetSetup {
            context: context.into(),
            source,
        }
    }
}

/// Specialised result for gadget operations.
pub type Result<T> = std::result::Result<T, GadgetError>;
