// SPDX-License-Identifier: MIT
//
// The terminal device: one descriptor, raw mode for its lifetime,
// decoded reads with resize injection, in-band geometry queries, and
// guaranteed attribute restoration.
//
// Construction is all-or-nothing. The descriptor is verified to be a
// terminal, its attributes are snapshotted, raw mode is applied, and
// the resize handler is registered; if any step fails, the steps
// already taken are undone before the error returns. From then on the
// snapshot is sacred: explicit restore(), drop glue, and the panic
// hook all write back that exact struct, so the shell the user returns
// to is the shell they left.
//
// Reads and the size query share one decoded input path. That is what
// makes the resize design work: SIGWINCH becomes a flag, the flag
// becomes a character, and everything downstream just sees input.

use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use signal_hook::SigId;

use crate::error::{DeviceError, Result};
use crate::fdio::{self, ByteReader};
use crate::raw;
use crate::resize::{self, ResizeFlag};
use crate::size::{self, Collected, Size};

// ─── Configuration ───────────────────────────────────────────────────────────

/// Tuning knobs for a [`TerminalDevice`].
///
/// The defaults suit an interactive full-screen program; override
/// fields with struct update syntax when they don't.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Character injected into the input stream for a window resize.
    ///
    /// Pick a control character the application treats as "redraw
    /// everything". It must not occur inside a cursor position report
    /// (avoid `R`, digits, `;`, ESC, `[`), or the size query will
    /// misread its own answer.
    pub redraw: char,

    /// Upper bound on one wait inside a blocked read.
    ///
    /// Also the worst-case latency between a resize and its redraw
    /// character when the signal's EINTR is missed, and the patience
    /// for a multi-byte sequence's continuation bytes.
    pub poll_interval: Duration,

    /// How long the terminal gets to answer the size query.
    pub reply_timeout: Duration,
}

impl Default for DeviceConfig {
    /// Ctrl-R redraw, 50 ms poll tick, one second for the size reply.
    fn default() -> Self {
        Self {
            redraw: '\u{12}',
            poll_interval: Duration::from_millis(50),
            reply_timeout: Duration::from_secs(1),
        }
    }
}

// ─── Device ──────────────────────────────────────────────────────────────────

/// A terminal descriptor held in raw mode, with decoded reads, resize
/// delivery as input, and exact restoration.
///
/// The descriptor must be open for both reading and writing and is
/// not owned: the device puts it into raw mode and restores it, the
/// caller keeps it open for the device's lifetime.
///
/// # Example
///
/// ```no_run
/// use tern_tty::device::TerminalDevice;
///
/// // Stdin of an interactive session.
/// let mut dev = TerminalDevice::new(0, '\u{12}')?;
///
/// let size = dev.query_size()?;
/// dev.write("ready\r\n")?;
///
/// loop {
///     let c = dev.read_char()?;
///     if c == dev.redraw_char() {
///         // Window changed: re-query and repaint.
///         let _ = dev.query_size()?;
///         continue;
///     }
///     if c == 'q' {
///         break;
///     }
/// }
///
/// dev.restore()?;
/// # Ok::<(), tern_tty::error::DeviceError>(())
/// ```
pub struct TerminalDevice {
    fd: RawFd,
    /// Attributes captured before raw entry. `None` once restored.
    saved: Option<libc::termios>,
    reader: ByteReader,
    resize: ResizeFlag,
    /// Registration token for the SIGWINCH action; removed on drop.
    sig_id: Option<SigId>,
    config: DeviceConfig,
}

impl TerminalDevice {
    /// Take over `fd` with default tuning and the given redraw
    /// character.
    ///
    /// # Errors
    ///
    /// [`DeviceError::NotATty`] if `fd` is not a terminal (nothing is
    /// modified in that case), [`DeviceError::Termios`] if raw entry
    /// fails, [`DeviceError::Signal`] if the resize handler cannot be
    /// registered (raw mode is undone before returning).
    pub fn new(fd: RawFd, redraw: char) -> Result<Self> {
        Self::with_config(
            fd,
            DeviceConfig {
                redraw,
                ..DeviceConfig::default()
            },
        )
    }

    /// Take over `fd` with explicit tuning.
    ///
    /// # Errors
    ///
    /// As for [`new`](Self::new).
    pub fn with_config(fd: RawFd, config: DeviceConfig) -> Result<Self> {
        if !raw::is_tty(fd) {
            return Err(DeviceError::NotATty { fd });
        }

        raw::install_panic_hook();
        let saved = raw::enter_raw(fd)?;

        let flag = ResizeFlag::new();
        let sig_id = match flag.install() {
            Ok(id) => id,
            Err(e) => {
                // Half a device is worse than none.
                let _ = raw::restore(fd, &saved);
                return Err(e);
            }
        };

        tracing::debug!(fd, redraw = ?config.redraw, "terminal device ready");
        Ok(Self {
            fd,
            saved: Some(saved),
            reader: ByteReader::new(fd),
            resize: flag,
            sig_id: Some(sig_id),
            config,
        })
    }

    /// The descriptor this device drives.
    #[inline]
    #[must_use]
    pub const fn fd(&self) -> RawFd {
        self.fd
    }

    /// The character [`read_char`](Self::read_char) substitutes for a
    /// resize.
    #[inline]
    #[must_use]
    pub const fn redraw_char(&self) -> char {
        self.config.redraw
    }

    /// Whether the descriptor is still in raw mode (restore pending).
    #[inline]
    #[must_use]
    pub const fn is_raw(&self) -> bool {
        self.saved.is_some()
    }

    /// Send `text` to the terminal as its exact UTF-8 bytes.
    ///
    /// No buffering and no newline translation: in raw mode a line
    /// break is `\r\n`, and escape sequences pass through untouched.
    ///
    /// # Errors
    ///
    /// [`DeviceError::Io`] if the write fails.
    pub fn write(&self, text: &str) -> Result<()> {
        fdio::write_all(self.fd, text.as_bytes())
    }

    /// Block until one character is available and return it.
    ///
    /// Returns, in order of priority: the redraw character if a
    /// resize is pending, otherwise the next decoded character from
    /// the input stream (U+FFFD standing in for malformed bytes).
    /// Blocks indefinitely; a resize always wakes it within one poll
    /// interval.
    ///
    /// # Errors
    ///
    /// [`DeviceError::Closed`] on hangup, [`DeviceError::Io`] for
    /// other transport failures.
    pub fn read_char(&mut self) -> Result<char> {
        loop {
            let next = self.reader.next_char(
                &self.resize,
                self.config.redraw,
                self.config.poll_interval,
                None,
            )?;
            // Without a deadline, next_char only parks between ticks.
            if let Some(c) = next {
                return Ok(c);
            }
        }
    }

    /// Block until one raw byte is available and return it undecoded.
    ///
    /// The escape hatch for consuming a control sequence whose length
    /// the caller knows. Bytes pushed back by the decoder come first,
    /// so the stream order is preserved. Resizes are not observed
    /// here: the pending flag stays set for the next
    /// [`read_char`](Self::read_char).
    ///
    /// # Errors
    ///
    /// As for [`read_char`](Self::read_char).
    pub fn read_byte(&mut self) -> Result<u8> {
        loop {
            if let Some(byte) = self.reader.poll_byte(self.config.poll_interval)? {
                return Ok(byte);
            }
        }
    }

    /// Ask the terminal how big it is.
    ///
    /// Writes the corner-park-and-report query, then reads the answer
    /// through the decoded input path. If a resize lands mid-answer,
    /// the stale reply is drained and the query reissued for the new
    /// window. The cursor is left at the bottom-right corner; callers
    /// are expected to repaint after this.
    ///
    /// # Errors
    ///
    /// [`DeviceError::SizeTimeout`] if no complete reply arrives
    /// within the configured deadline, [`DeviceError::SizeReply`] if
    /// the reply does not parse, plus any transport error.
    pub fn query_size(&mut self) -> Result<Size> {
        loop {
            fdio::write_all(self.fd, size::SIZE_QUERY)?;
            let deadline = Instant::now() + self.config.reply_timeout;

            match size::collect_report(
                &mut self.reader,
                &self.resize,
                self.config.redraw,
                self.config.poll_interval,
                deadline,
            )? {
                Collected::Reply(reply) => {
                    let parsed = size::parse_report(&reply)?;
                    tracing::debug!(rows = parsed.rows, cols = parsed.cols, "size reported");
                    return Ok(parsed);
                }
                Collected::Resized => {
                    tracing::debug!("resize mid-reply, reissuing size query");
                    self.drain_stale_report(deadline)?;
                }
                Collected::TimedOut => {
                    return Err(DeviceError::SizeTimeout {
                        waited: self.config.reply_timeout,
                    });
                }
            }
        }
    }

    /// Mark a resize as pending without a signal.
    ///
    /// The next [`read_char`](Self::read_char) returns the redraw
    /// character. For callers that want to force a full repaint
    /// through the ordinary input path.
    pub fn request_redraw(&self) {
        self.resize.set();
    }

    /// Put the terminal back exactly as it was found.
    ///
    /// Applies the construction-time snapshot with `TCSANOW`. Calling
    /// it again (or when construction never changed anything) is a
    /// no-op. The device remains usable afterwards, now reading
    /// whatever mode the restored attributes describe.
    ///
    /// # Errors
    ///
    /// [`DeviceError::Termios`] if `tcsetattr` fails; the snapshot is
    /// kept so the call can be retried.
    pub fn restore(&mut self) -> Result<()> {
        if let Some(ref saved) = self.saved {
            raw::restore(self.fd, saved)?;
            self.saved = None;
        }
        Ok(())
    }

    /// Consume what remains of a size reply made stale by a resize:
    /// up to its `R` terminator, the stream going quiet, or the
    /// deadline. Type-ahead consumed here is lost; a resize mid-query
    /// is already a repaint-everything event.
    fn drain_stale_report(&mut self, deadline: Instant) -> Result<()> {
        loop {
            if Instant::now() >= deadline {
                return Ok(());
            }
            match self.reader.poll_byte(self.config.poll_interval)? {
                None | Some(b'R') => return Ok(()),
                Some(_) => {}
            }
        }
    }
}

impl Drop for TerminalDevice {
    /// Unregister the resize handler and restore the terminal.
    /// Restoration errors are unreportable here and ignored.
    fn drop(&mut self) {
        if let Some(id) = self.sig_id.take() {
            resize::unregister(id);
        }
        let _ = self.restore();
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
