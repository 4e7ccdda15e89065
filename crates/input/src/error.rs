use std::io;
use std::path::PathBuf;

/// Input capture errors.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// No usable keyboard was found.
    #[error("no keyboard device found")]
    NoKeyboard,

    /// No usable mouse was found.
    #[error("no mouse device found")]
    NoMouse,

    /// A configured device path could not be opened.
    #[error("failed to open input device {path}: {source}")]
    DeviceOpen {
        /// The offending path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// The reader thread could not be spawned.
    #[error("failed to spawn input reader thread: {0}")]
    ReaderSpawn(io::Error),
}
