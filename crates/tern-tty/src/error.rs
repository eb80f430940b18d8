// SPDX-License-Identifier: MIT
//
// Error taxonomy for the terminal device.
//
// Three families of failure: the descriptor itself (not a terminal,
// attribute calls rejected, closed mid-read), plain I/O errors from
// poll/read/write, and the size-report exchange (no answer in time, or
// an answer that does not parse). EINTR never surfaces here: every
// call site retries it.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Errors produced by the terminal device.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The descriptor does not refer to a terminal. Construction
    /// refuses it before any attribute is touched.
    #[error("Descriptor {fd} is not a terminal")]
    NotATty {
        /// The rejected descriptor.
        fd: RawFd,
    },

    /// A termios call failed. `op` names which one.
    #[error("{op} failed: {source}")]
    Termios {
        /// The failing call (`"tcgetattr"` or `"tcsetattr"`).
        op: &'static str,
        /// The underlying OS error.
        source: io::Error,
    },

    /// Registering the window-change signal handler failed.
    #[error("Failed to install resize handler: {source}")]
    Signal {
        /// The underlying OS error.
        source: io::Error,
    },

    /// A read, write, or poll on the descriptor failed.
    #[error("Terminal I/O failed: {0}")]
    Io(#[from] io::Error),

    /// `read()` returned zero bytes: the peer hung up or the
    /// descriptor was closed underneath us.
    #[error("Terminal closed")]
    Closed,

    /// The terminal did not complete a size report within the
    /// configured deadline.
    #[error("No size report within {waited:?}")]
    SizeTimeout {
        /// How long we waited before giving up.
        waited: Duration,
    },

    /// The size report arrived but did not have the expected
    /// `rows;cols` shape.
    #[error("Malformed size report: {reply:?}")]
    SizeReply {
        /// The reply as accumulated, control characters escaped by
        /// the `{:?}` formatting above.
        reply: String,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DeviceError>;

// ─── Tests ───────────────────────────────────────────────────────────────────
