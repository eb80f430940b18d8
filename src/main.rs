// SPDX-License-Identifier: MIT
//
// tern: interactive inspector for the tern-tty device.
//
// Drives the whole device surface against a live terminal: raw entry,
// decoded reads, resize-as-input, the in-band size query, the raw
// byte escape hatch, and exact restoration on the way out. Run it,
// mash keys, resize the window, and watch what the device sees.
//
// Every event reaches the screen through the same path:
//
//   keystroke ─► read_char ──► described on screen
//   SIGWINCH ──► flag ─► redraw char ─► size re-query
//
// Input comes from stdin when stdin is a terminal; under redirection
// the controlling terminal is reopened via /dev/tty, the way any
// full-screen tool stays interactive inside a pipeline.

use std::env;
use std::fs::File;
use std::io::IsTerminal;
use std::os::unix::io::AsRawFd;
use std::process;
use std::sync::Arc;

use tern_tty::device::TerminalDevice;
use tern_tty::error::DeviceError;
use tern_tty::size::Size;
use tracing_subscriber::EnvFilter;

/// Injected by the device when the window changes. Ctrl-R, so typing
/// an actual Ctrl-R exercises the same path by hand.
const REDRAW: char = '\u{12}';

// ─── Device session ─────────────────────────────────────────────────────────

/// A live device plus whatever keeps its descriptor open.
///
/// Field order matters: fields drop in declaration order, so the
/// device restores the terminal while `_tty` still holds the
/// descriptor open. Error returns from [`run`] tear down through
/// this drop.
struct Session {
    dev: TerminalDevice,
    /// The reopened controlling terminal under redirected stdin,
    /// held only to keep the descriptor alive. `None` when the
    /// device sits on stdin itself.
    _tty: Option<File>,
}

/// Build the device on stdin, or on the controlling terminal when
/// stdin is redirected.
fn open_device() -> Result<Session, DeviceError> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(Session {
            dev: TerminalDevice::new(stdin.as_raw_fd(), REDRAW)?,
            _tty: None,
        });
    }

    // Inside a pipeline; the interactive session moves to /dev/tty.
    let tty = File::options().read(true).write(true).open("/dev/tty")?;
    let dev = TerminalDevice::new(tty.as_raw_fd(), REDRAW)?;
    Ok(Session {
        dev,
        _tty: Some(tty),
    })
}

fn banner(dev: &TerminalDevice, size: Size) -> Result<(), DeviceError> {
    dev.write("\r\ntern: terminal device inspector\r\n")?;
    dev.write(&size_line(size))?;
    dev.write("keys            q or Ctrl-C quits, s queries the size, r taps one raw byte\r\n")?;
    dev.write("                resize the window (or press Ctrl-R) for the redraw character\r\n\r\n")?;
    Ok(())
}

fn run() -> Result<(), DeviceError> {
    let mut session = open_device()?;
    let dev = &mut session.dev;
    tracing::info!(fd = dev.fd(), "device ready");

    let size = dev.query_size()?;
    banner(dev, size)?;

    loop {
        let c = dev.read_char()?;

        // Resize (or a hand-typed Ctrl-R): same character, same path.
        if c == dev.redraw_char() {
            let size = dev.query_size()?;
            tracing::info!(rows = size.rows, cols = size.cols, "redraw observed");
            dev.write("\r\nredraw          ")?;
            dev.write(&size_line(size))?;
            continue;
        }

        match c {
            'q' | '\u{3}' => break,
            's' => {
                let size = dev.query_size()?;
                dev.write("\r\n")?;
                dev.write(&size_line(size))?;
            }
            'r' => {
                dev.write("raw tap         press any key...\r\n")?;
                let byte = dev.read_byte()?;
                dev.write(&format!("raw byte        0x{byte:02x}\r\n"))?;
            }
            other => dev.write(&key_line(other))?,
        }
    }

    dev.restore()?;
    dev.write("bye\r\n")?;
    Ok(())
}

// ─── Display helpers ────────────────────────────────────────────────────────

fn size_line(size: Size) -> String {
    format!("screen size     {} rows x {} cols\r\n", size.rows, size.cols)
}

/// One display line for a decoded character: printable form, scalar
/// value, and the UTF-8 bytes it arrived as.
fn key_line(c: char) -> String {
    let mut utf8 = [0u8; 4];
    let bytes = c.encode_utf8(&mut utf8).as_bytes();
    let hex = bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        "{:<8} U+{:04X}  {} byte(s)  {}\r\n",
        printable(c),
        u32::from(c),
        bytes.len(),
        hex
    )
}

/// Caret notation for C0 controls, the character itself otherwise.
fn printable(c: char) -> String {
    match c {
        '\u{7f}' => "^?".to_string(),
        c if c < ' ' => {
            let caret = char::from_u32(0x40 + u32::from(c)).unwrap_or('?');
            format!("^{caret}")
        }
        c if c.is_control() => c.escape_debug().to_string(),
        c => c.to_string(),
    }
}

// ─── Logging ────────────────────────────────────────────────────────────────

/// Route tracing to the file named by `TERN_LOG`, if set.
///
/// The terminal itself is the thing under inspection, so logs cannot
/// go to stdout or stderr. `RUST_LOG` filters as usual, defaulting to
/// debug.
fn init_logging() {
    let Ok(path) = env::var("TERN_LOG") else { return };

    let file = match File::create(&path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("tern: {path}: {e}");
            process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .init();

    tracing::info!("logging to {path}");
}

// ─── Entry point ────────────────────────────────────────────────────────────

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() > 1 {
        eprintln!("usage: tern");
        eprintln!("  takes no arguments; runs an interactive device inspector");
        process::exit(2);
    }

    init_logging();

    if let Err(e) = run() {
        eprintln!("tern: {e}");
        process::exit(1);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::{FromRawFd, OwnedFd, RawFd};

    // ── Caret notation ────────────────────────────────────────────────

    #[test]
    fn control_chars_use_caret_notation() {
        assert_eq!(printable('\u{0}'), "^@");
        assert_eq!(printable('\u{3}'), "^C");
        assert_eq!(printable('\u{1b}'), "^[");
        assert_eq!(printable('\u{12}'), "^R");
    }

    #[test]
    fn delete_is_caret_question() {
        assert_eq!(printable('\u{7f}'), "^?");
    }

    #[test]
    fn printable_chars_pass_through() {
        assert_eq!(printable('a'), "a");
        assert_eq!(printable('é'), "é");
        assert_eq!(printable('🦀'), "🦀");
    }

    #[test]
    fn replacement_char_passes_through() {
        assert_eq!(printable('\u{FFFD}'), "\u{FFFD}");
    }

    #[test]
    fn non_c0_controls_are_escaped() {
        assert_eq!(printable('\u{85}'), "\\u{85}");
    }

    // ── Key lines ─────────────────────────────────────────────────────

    #[test]
    fn key_line_shows_scalar_and_bytes() {
        let line = key_line('A');
        assert!(line.contains("U+0041"));
        assert!(line.contains("1 byte(s)"));
        assert!(line.contains("41"));
    }

    #[test]
    fn key_line_shows_multibyte_hex() {
        let line = key_line('é');
        assert!(line.contains("U+00E9"));
        assert!(line.contains("2 byte(s)"));
        assert!(line.contains("c3 a9"));
    }

    #[test]
    fn key_line_shows_four_byte_sequences() {
        let line = key_line('🦀');
        assert!(line.contains("U+1F980"));
        assert!(line.contains("4 byte(s)"));
        assert!(line.contains("f0 9f a6 80"));
    }

    #[test]
    fn key_lines_end_with_crlf() {
        assert!(key_line('x').ends_with("\r\n"));
        assert!(size_line(Size { rows: 24, cols: 80 }).ends_with("\r\n"));
    }

    #[test]
    fn size_line_reports_both_dimensions() {
        let line = size_line(Size { rows: 40, cols: 120 });
        assert!(line.contains("40 rows"));
        assert!(line.contains("120 cols"));
    }

    // ── Session teardown ──────────────────────────────────────────────

    /// Allocate a pseudo-terminal pair, or skip when the host has no
    /// pty devices.
    #[allow(unsafe_code)] // Pseudo-terminal allocation is raw libc.
    fn open_pty() -> Option<(OwnedFd, OwnedFd)> {
        unsafe {
            let master = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY);
            if master < 0 {
                return None;
            }
            if libc::grantpt(master) != 0 || libc::unlockpt(master) != 0 {
                libc::close(master);
                return None;
            }
            let mut name: [libc::c_char; 128] = [0; 128];
            if libc::ptsname_r(master, name.as_mut_ptr(), name.len()) != 0 {
                libc::close(master);
                return None;
            }
            let slave = libc::open(name.as_ptr(), libc::O_RDWR | libc::O_NOCTTY);
            if slave < 0 {
                libc::close(master);
                return None;
            }
            Some((OwnedFd::from_raw_fd(master), OwnedFd::from_raw_fd(slave)))
        }
    }

    #[allow(unsafe_code)] // Attribute inspection is tcgetattr.
    fn attrs(fd: RawFd) -> libc::termios {
        unsafe {
            let mut t: libc::termios = std::mem::zeroed();
            assert_eq!(libc::tcgetattr(fd, &raw mut t), 0, "tcgetattr failed");
            t
        }
    }

    /// The device must write its saved attributes back before the
    /// `File` holding the descriptor closes it; the other order would
    /// leave the terminal raw on every error return from `run`.
    #[test]
    fn session_restores_before_the_descriptor_closes() {
        let Some((_master, slave)) = open_pty() else { return };
        let watch = slave.try_clone().unwrap();
        let tty = File::from(slave);

        let before = attrs(watch.as_raw_fd());
        {
            let dev = TerminalDevice::new(tty.as_raw_fd(), REDRAW).unwrap();
            assert_eq!(attrs(watch.as_raw_fd()).c_lflag & libc::ECHO, 0);

            let _session = Session {
                dev,
                _tty: Some(tty),
            };
            // Scope exit stands in for an error return from run().
        }
        let after = attrs(watch.as_raw_fd());

        assert_eq!(after.c_iflag, before.c_iflag);
        assert_eq!(after.c_oflag, before.c_oflag);
        assert_eq!(after.c_cflag, before.c_cflag);
        assert_eq!(after.c_lflag, before.c_lflag);
        assert_eq!(after.c_cc, before.c_cc);
    }
}
