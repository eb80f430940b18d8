// SPDX-License-Identifier: MIT
//
// Screen geometry over the wire.
//
// No ioctl here. The device asks the terminal itself: park the cursor
// at the bottom-right corner (the terminal clamps the move), then
// request a cursor position report. The answer arrives through the
// ordinary input stream as `ESC [ rows ; cols R`, so collection rides
// the same decoded read path as keyboard input, and a resize that
// lands mid-reply shows up in-band as the redraw character. The caller
// reissues the query in that case; the partial answer describes a
// window that no longer exists.
//
// Parsing is deliberately lenient about the frame (leading newline or
// ESC [ prefixes are stripped, fields are trimmed, trailing fields are
// ignored) and strict about the payload: two base-10 numbers or it is
// an error.

use std::time::{Duration, Instant};

use crate::error::{DeviceError, Result};
use crate::fdio::ByteReader;
use crate::resize::ResizeFlag;

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    /// Number of rows (height in character cells).
    pub rows: u16,
    /// Number of columns (width in character cells).
    pub cols: u16,
}

/// The outbound query, sent byte for byte: cursor to row 999, column
/// 999 (clamped to the real corner), then Device Status Report 6
/// ("where is the cursor?").
pub(crate) const SIZE_QUERY: &[u8] = b"\x1b[999;999H\x1b[6n";

/// Longest reply accepted before declaring the peer unresponsive. A
/// real report tops out around 15 bytes (`ESC [ 65535 ; 65535 R`).
const MAX_REPLY_LEN: usize = 32;

/// How one attempt at collecting a report ended.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Collected {
    /// Everything up to (excluding) the terminating `R`.
    Reply(String),
    /// The redraw character surfaced mid-reply: a resize happened and
    /// the report in flight is stale.
    Resized,
    /// The deadline expired first.
    TimedOut,
}

/// Accumulate one cursor position report from the input stream.
///
/// Reads decoded characters until the `R` terminator, the deadline, or
/// an injected redraw character, whichever comes first.
///
/// # Errors
///
/// [`DeviceError::SizeReply`] if the reply outgrows [`MAX_REPLY_LEN`];
/// any transport error from the underlying reads.
pub(crate) fn collect_report(
    reader: &mut ByteReader,
    resize: &ResizeFlag,
    redraw: char,
    interval: Duration,
    deadline: Instant,
) -> Result<Collected> {
    let mut reply = String::new();

    loop {
        match reader.next_char(resize, redraw, interval, Some(deadline))? {
            None => return Ok(Collected::TimedOut),
            Some(c) if c == redraw => return Ok(Collected::Resized),
            Some('R') => return Ok(Collected::Reply(reply)),
            Some(c) => {
                reply.push(c);
                if reply.len() > MAX_REPLY_LEN {
                    return Err(DeviceError::SizeReply { reply });
                }
            }
        }
    }
}

/// Parse an accumulated reply (the part before `R`) into a [`Size`].
///
/// # Errors
///
/// [`DeviceError::SizeReply`] when the payload is not two base-10
/// numbers.
pub(crate) fn parse_report(reply: &str) -> Result<Size> {
    let body = reply.trim_start_matches(['\n', '\x1b', '[']);

    let mut fields = body.split(';');
    let rows = parse_field(fields.next(), reply)?;
    let cols = parse_field(fields.next(), reply)?;
    // Anything after the second field is ignored.

    Ok(Size { rows, cols })
}

fn parse_field(field: Option<&str>, reply: &str) -> Result<u16> {
    field
        .and_then(|f| f.trim().parse::<u16>().ok())
        .ok_or_else(|| DeviceError::SizeReply {
            reply: reply.to_string(),
        })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};

    const TICK: Duration = Duration::from_millis(25);

    #[allow(unsafe_code)] // The pipe pair comes straight from the syscall.
    fn pipe() -> (OwnedFd, OwnedFd) {
        let mut fds: [libc::c_int; 2] = [0; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0, "pipe(2) failed");
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    fn collect(r: &OwnedFd, flag: &ResizeFlag) -> Result<Collected> {
        let mut reader = ByteReader::new(r.as_raw_fd());
        collect_report(
            &mut reader,
            flag,
            '\u{12}',
            TICK,
            Instant::now() + Duration::from_millis(200),
        )
    }

    // ── Wire format ──────────────────────────────────────────────────

    #[test]
    fn query_bytes_are_exact() {
        assert_eq!(SIZE_QUERY, b"\x1b[999;999H\x1b[6n".as_slice());
    }

    #[test]
    fn query_parks_cursor_before_asking() {
        let s = std::str::from_utf8(SIZE_QUERY).unwrap();
        let report = s.find("\x1b[6n").unwrap();
        assert!(s.find("\x1b[999;999H").unwrap() < report);
    }

    // ── Reply parsing ────────────────────────────────────────────────

    #[test]
    fn parses_a_framed_reply() {
        assert_eq!(
            parse_report("\x1b[40;120").unwrap(),
            Size { rows: 40, cols: 120 }
        );
    }

    #[test]
    fn parses_with_leading_newline() {
        // Some terminals leak a newline ahead of the report.
        assert_eq!(
            parse_report("\n\x1b[40;120").unwrap(),
            Size { rows: 40, cols: 120 }
        );
    }

    #[test]
    fn parses_bare_numbers() {
        assert_eq!(parse_report("24;80").unwrap(), Size { rows: 24, cols: 80 });
    }

    #[test]
    fn parses_single_digit_fields() {
        assert_eq!(parse_report("\x1b[1;1").unwrap(), Size { rows: 1, cols: 1 });
    }

    #[test]
    fn tolerates_field_whitespace() {
        assert_eq!(
            parse_report("\x1b[ 40; 120").unwrap(),
            Size { rows: 40, cols: 120 }
        );
    }

    #[test]
    fn ignores_trailing_fields() {
        assert_eq!(
            parse_report("\x1b[40;120;7").unwrap(),
            Size { rows: 40, cols: 120 }
        );
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(matches!(
            parse_report("\x1b[40120"),
            Err(DeviceError::SizeReply { .. })
        ));
    }

    #[test]
    fn rejects_non_numeric_fields() {
        assert!(matches!(
            parse_report("\x1b[ab;cd"),
            Err(DeviceError::SizeReply { .. })
        ));
    }

    #[test]
    fn rejects_empty_reply() {
        assert!(matches!(
            parse_report(""),
            Err(DeviceError::SizeReply { .. })
        ));
    }

    #[test]
    fn rejects_overflowing_dimension() {
        assert!(matches!(
            parse_report("\x1b[70000;80"),
            Err(DeviceError::SizeReply { .. })
        ));
    }

    // ── Reply collection ─────────────────────────────────────────────

    #[test]
    fn collects_up_to_the_terminator() {
        let (r, w) = pipe();
        let flag = ResizeFlag::new();

        crate::fdio::write_all(w.as_raw_fd(), b"\x1b[40;120R").unwrap();
        assert_eq!(
            collect(&r, &flag).unwrap(),
            Collected::Reply("\x1b[40;120".to_string())
        );
    }

    #[test]
    fn collected_reply_parses_to_the_reported_size() {
        let (r, w) = pipe();
        let flag = ResizeFlag::new();

        crate::fdio::write_all(w.as_raw_fd(), b"\x1b[40;120R").unwrap();
        let Collected::Reply(reply) = collect(&r, &flag).unwrap() else {
            panic!("expected a complete reply");
        };
        assert_eq!(parse_report(&reply).unwrap(), Size { rows: 40, cols: 120 });
    }

    #[test]
    fn pending_resize_preempts_collection() {
        let (r, w) = pipe();
        let flag = ResizeFlag::new();

        crate::fdio::write_all(w.as_raw_fd(), b"\x1b[40;120R").unwrap();
        flag.set();
        assert_eq!(collect(&r, &flag).unwrap(), Collected::Resized);
    }

    #[test]
    fn silence_times_out() {
        let (r, _w) = pipe();
        let flag = ResizeFlag::new();

        assert_eq!(collect(&r, &flag).unwrap(), Collected::TimedOut);
    }

    #[test]
    fn unterminated_babble_errors_at_the_cap() {
        let (r, w) = pipe();
        let flag = ResizeFlag::new();

        crate::fdio::write_all(w.as_raw_fd(), &[b'x'; MAX_REPLY_LEN + 8]).unwrap();
        assert!(matches!(
            collect(&r, &flag),
            Err(DeviceError::SizeReply { .. })
        ));
    }

    // ── Size ─────────────────────────────────────────────────────────

    #[test]
    fn size_is_copy() {
        let a = Size { rows: 24, cols: 80 };
        let b = a;
        assert_eq!(a, b);
    }

    #[test]
    fn size_inequality() {
        assert_ne!(
            Size { rows: 24, cols: 80 },
            Size { rows: 40, cols: 120 }
        );
    }
}
