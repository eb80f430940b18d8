// SPDX-License-Identifier: MIT
//
// Descriptor-level I/O: bounded-poll byte reads, EINTR-safe writes,
// and UTF-8 character assembly.
//
// Safety: This module necessarily uses `unsafe` for poll(2), read(2),
// and write(2) on a raw descriptor. Each unsafe block is minimal and
// documented.
#![allow(unsafe_code)]
//
// The read side never parks in a blocking read(). It waits in poll()
// with a short timeout, so two things can interrupt a "blocked" read
// promptly: the poll timeout itself, and EINTR from a signal (poll is
// not restarted by SA_RESTART). Both surface as "no byte yet" and the
// caller re-checks its resize flag before waiting again. That loop is
// what turns an asynchronous SIGWINCH into a synchronous character
// with bounded latency.
//
// Character assembly follows the UTF-8 lead-byte table. Malformed
// input is substituted with U+FFFD rather than reported as an error:
// one byte of line noise must not poison the stream. The one-byte
// pushback slot keeps it synchronized, since a non-continuation byte
// that breaks a sequence is the first byte of the next character.

use std::io;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use crate::error::{DeviceError, Result};
use crate::resize::ResizeFlag;

/// Substituted for any malformed or truncated sequence.
const REPLACEMENT: char = '\u{FFFD}';

/// Expected total length of a UTF-8 sequence, from its lead byte.
///
/// Returns 0 for bytes that cannot start a sequence (stray
/// continuations and the invalid 0xF8..=0xFF range).
const fn utf8_len(lead: u8) -> usize {
    match lead {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => 0,
    }
}

/// Continuation bytes have the shape `10xxxxxx`.
const fn is_continuation(byte: u8) -> bool {
    byte & 0xC0 == 0x80
}

/// Write all of `bytes` to `fd`, looping on partial writes and EINTR.
pub(crate) fn write_all(fd: RawFd, mut bytes: &[u8]) -> Result<()> {
    while !bytes.is_empty() {
        let n = unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err.into());
        }
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::WriteZero).into());
        }

        #[allow(clippy::cast_sign_loss)] // n > 0 checked above.
        let written = n as usize;
        bytes = &bytes[written..];
    }
    Ok(())
}

/// Byte source over a raw descriptor with a one-byte pushback slot.
///
/// Does not own the descriptor; the device that created it does.
#[derive(Debug)]
pub(crate) struct ByteReader {
    fd: RawFd,
    /// Byte pushed back by the decoder, delivered before the next read.
    carry: Option<u8>,
}

impl ByteReader {
    pub(crate) const fn new(fd: RawFd) -> Self {
        Self { fd, carry: None }
    }

    /// Push one byte back; the next read returns it first.
    ///
    /// The decoder needs exactly one slot: the byte that proved a
    /// sequence broken is the lead of the next character.
    pub(crate) fn unread(&mut self, byte: u8) {
        debug_assert!(self.carry.is_none(), "pushback slot already full");
        self.carry = Some(byte);
    }

    /// Wait up to `wait` (at least one millisecond) for one byte.
    ///
    /// Returns `Ok(None)` on timeout and on EINTR, so the caller can
    /// re-check its resize flag and decide whether to keep waiting.
    ///
    /// # Errors
    ///
    /// [`DeviceError::Closed`] once the descriptor reads as end of
    /// file, [`DeviceError::Io`] for any other poll/read failure.
    pub(crate) fn poll_byte(&mut self, wait: Duration) -> Result<Option<u8>> {
        if let Some(byte) = self.carry.take() {
            return Ok(Some(byte));
        }

        let timeout_ms = libc::c_int::try_from(wait.as_millis())
            .unwrap_or(libc::c_int::MAX)
            .max(1);

        // Bounded wait for readability.
        let ready = unsafe {
            let mut pfd = libc::pollfd {
                fd: self.fd,
                events: libc::POLLIN,
                revents: 0,
            };
            libc::poll(&raw mut pfd, 1, timeout_ms)
        };

        if ready == 0 {
            return Ok(None);
        }
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(err.into());
        }

        // Readable (or hung up, which read() reports as EOF).
        let mut byte = 0u8;
        let n = unsafe { libc::read(self.fd, (&raw mut byte).cast(), 1) };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(err.into());
        }
        if n == 0 {
            return Err(DeviceError::Closed);
        }
        Ok(Some(byte))
    }

    /// Produce the next character: a decoded scalar, U+FFFD for
    /// malformed input, or `redraw` if a resize is pending.
    ///
    /// The resize flag is consumed before any byte is taken, so a
    /// resize that happened before the call is delivered first, and
    /// one that lands mid-wait is delivered within `interval`.
    /// Returns `Ok(None)` only when `deadline` expires first.
    ///
    /// # Errors
    ///
    /// Propagates [`poll_byte`](Self::poll_byte) failures.
    pub(crate) fn next_char(
        &mut self,
        resize: &ResizeFlag,
        redraw: char,
        interval: Duration,
        deadline: Option<Instant>,
    ) -> Result<Option<char>> {
        loop {
            if resize.take() {
                tracing::trace!("resize pending, injecting redraw character");
                return Ok(Some(redraw));
            }

            let wait = match deadline {
                None => interval,
                Some(d) => {
                    let left = d.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Ok(None);
                    }
                    left.min(interval)
                }
            };

            match self.poll_byte(wait)? {
                None => {} // Timeout or EINTR: re-check the flag, wait again.
                Some(lead) => return self.assemble(lead, interval).map(Some),
            }
        }
    }

    /// Assemble one character starting from `lead`.
    ///
    /// The continuation tail of a multi-byte sequence must arrive
    /// within `interval`; terminals emit a character's bytes in a
    /// single write, so a missing tail is line noise, not latency.
    /// A resize observed while collecting is left pending for the
    /// next call rather than tearing the sequence.
    fn assemble(&mut self, lead: u8, interval: Duration) -> Result<char> {
        let want = utf8_len(lead);

        if want == 1 {
            return Ok(char::from(lead));
        }
        if want == 0 {
            tracing::trace!(byte = lead, "byte cannot start a sequence");
            return Ok(REPLACEMENT);
        }

        let mut buf = [lead, 0, 0, 0];
        let mut have = 1;
        let stall = Instant::now() + interval;

        while have < want {
            let left = stall.saturating_duration_since(Instant::now());
            if left.is_zero() {
                tracing::trace!(have, want, "sequence tail never arrived");
                return Ok(REPLACEMENT);
            }

            match self.poll_byte(left)? {
                None => {} // EINTR or short wake: the stall deadline decides.
                Some(byte) if is_continuation(byte) => {
                    buf[have] = byte;
                    have += 1;
                }
                Some(byte) => {
                    // Start of the next character; give it back.
                    self.unread(byte);
                    tracing::trace!(have, want, "sequence broken by non-continuation byte");
                    return Ok(REPLACEMENT);
                }
            }
        }

        // Well-formed shape; from_utf8 still rejects overlong and
        // surrogate encodings.
        Ok(std::str::from_utf8(&buf[..want])
            .ok()
            .and_then(|s| s.chars().next())
            .unwrap_or(REPLACEMENT))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
