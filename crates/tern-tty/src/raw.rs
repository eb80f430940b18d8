// SPDX-License-Identifier: MIT
//
// Raw mode entry and exit via termios.
//
// Safety: This module necessarily uses `unsafe` for termios (tcgetattr,
// tcsetattr) and isatty. These are the standard POSIX interfaces for
// terminal control and have no safe alternative. Each unsafe block is
// minimal and documented.
#![allow(unsafe_code)]
//
// The attribute snapshot taken before entering raw mode is the ground
// truth for every restore path: explicit `restore()`, drop glue, and
// the panic hook all write back that exact struct. Entry applies with
// TCSAFLUSH (pending input predates raw mode and would be misread);
// restore applies with TCSANOW so type-ahead the user produced during
// the session survives into the shell.
//
// The panic hook cannot reach the device instance, so the snapshot is
// mirrored into a process-wide slot behind a Mutex. One slot is enough:
// a process drives one terminal. Restoring termios also re-enables
// OPOST, which is what makes the panic message print with sane line
// endings instead of staircasing.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::{Mutex, Once};

use crate::error::{DeviceError, Result};

/// Process-wide mirror of the attribute snapshot, for the panic hook.
///
/// Keyed by descriptor so the hook restores the right terminal even
/// when the device was built on a reopened `/dev/tty` rather than
/// stdin. Behind a [`Mutex`], not `static mut`.
static TERMIOS_BACKUP: Mutex<Option<(RawFd, libc::termios)>> = Mutex::new(None);

/// Panic hook guard: installed at most once per process.
static PANIC_HOOK_INSTALLED: Once = Once::new();

/// Check whether `fd` refers to a terminal.
#[must_use]
pub(crate) fn is_tty(fd: RawFd) -> bool {
    unsafe { libc::isatty(fd) != 0 }
}

/// Capture the current attributes of `fd`.
///
/// # Errors
///
/// [`DeviceError::Termios`] if `tcgetattr` fails (for instance on a
/// descriptor that stopped being a terminal).
pub(crate) fn snapshot(fd: RawFd) -> Result<libc::termios> {
    unsafe {
        let mut termios: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &raw mut termios) != 0 {
            return Err(DeviceError::Termios {
                op: "tcgetattr",
                source: io::Error::last_os_error(),
            });
        }
        Ok(termios)
    }
}

/// Turn an attribute set into raw mode, cfmakeraw style.
///
/// No line assembly, no echo, no signal generation, no flow control,
/// no output post-processing, 8-bit characters. `VMIN=1`/`VTIME=0`
/// makes `read()` block until at least one byte is available, which is
/// the contract the poll-then-read loop in `fdio` relies on.
pub(crate) fn make_raw(termios: &mut libc::termios) {
    termios.c_iflag &= !(libc::IGNBRK
        | libc::BRKINT
        | libc::PARMRK
        | libc::ISTRIP
        | libc::INLCR
        | libc::IGNCR
        | libc::ICRNL
        | libc::IXON);
    termios.c_oflag &= !libc::OPOST;
    termios.c_lflag &= !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);
    termios.c_cflag &= !(libc::CSIZE | libc::PARENB);
    termios.c_cflag |= libc::CS8;
    termios.c_cc[libc::VMIN] = 1;
    termios.c_cc[libc::VTIME] = 0;
}

/// Snapshot `fd`, switch it into raw mode, and return the snapshot.
///
/// On success the snapshot is also mirrored into the panic backup.
/// On failure the terminal is untouched.
///
/// # Errors
///
/// [`DeviceError::Termios`] if either attribute call fails.
pub(crate) fn enter_raw(fd: RawFd) -> Result<libc::termios> {
    let saved = snapshot(fd)?;

    let mut attrs = saved;
    make_raw(&mut attrs);

    unsafe {
        if libc::tcsetattr(fd, libc::TCSAFLUSH, &raw const attrs) != 0 {
            return Err(DeviceError::Termios {
                op: "tcsetattr",
                source: io::Error::last_os_error(),
            });
        }
    }

    store_backup(fd, saved);
    tracing::debug!(fd, "entered raw mode");
    Ok(saved)
}

/// Write `saved` back to `fd` and clear the panic backup for it.
///
/// Applies with `TCSANOW`: immediate, keeps queued input.
///
/// # Errors
///
/// [`DeviceError::Termios`] if `tcsetattr` fails.
pub(crate) fn restore(fd: RawFd, saved: &libc::termios) -> Result<()> {
    unsafe {
        if libc::tcsetattr(fd, libc::TCSANOW, saved) != 0 {
            return Err(DeviceError::Termios {
                op: "tcsetattr",
                source: io::Error::last_os_error(),
            });
        }
    }

    clear_backup(fd);
    tracing::debug!(fd, "restored terminal attributes");
    Ok(())
}

/// Install a panic hook that restores the terminal before the panic
/// message prints.
///
/// Without this, a panic that aborts before unwinding reaches the
/// device's drop glue leaves the terminal raw: no echo, no line
/// editing, the message itself staircased. The hook restores from the
/// backup slot, then delegates to the original handler.
pub(crate) fn install_panic_hook() {
    PANIC_HOOK_INSTALLED.call_once(|| {
        let original = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            restore_from_backup();
            original(info);
        }));
    });
}

/// Restore termios from the backup slot. Best-effort, ignores errors.
fn restore_from_backup() {
    if let Ok(guard) = TERMIOS_BACKUP.lock() {
        if let Some((fd, ref saved)) = *guard {
            unsafe {
                let _ = libc::tcsetattr(fd, libc::TCSANOW, saved);
            }
        }
    }
}

fn store_backup(fd: RawFd, saved: libc::termios) {
    if let Ok(mut guard) = TERMIOS_BACKUP.lock() {
        *guard = Some((fd, saved));
    }
}

/// Drop the backup entry if it belongs to `fd`. A slot written by a
/// later device on another descriptor is left alone.
fn clear_backup(fd: RawFd) {
    if let Ok(mut guard) = TERMIOS_BACKUP.lock() {
        if matches!(*guard, Some((backup_fd, _)) if backup_fd == fd) {
            *guard = None;
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
