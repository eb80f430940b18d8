// SPDX-License-Identifier: MIT
//
// tern-tty: terminal I/O device for tern.
//
// One descriptor, one job: be the terminal. The device holds the
// descriptor in raw mode for its lifetime and guarantees bit-for-bit
// attribute restoration on every exit path, panic included. Input is
// delivered as decoded characters, with one deliberate twist: a window
// resize is folded into the stream as a synthetic "redraw" character,
// so callers handle resizes exactly like keystrokes. Screen geometry
// is asked of the terminal itself over the wire (cursor park plus
// Device Status Report), never ioctl, so it works across anything
// that speaks the protocol.
//
// This crate intentionally avoids terminal frameworks (crossterm,
// termion) in favor of direct termios and ANSI control. Every byte
// sent to and read from the terminal is accounted for.

pub mod device;
pub mod error;
pub mod size;

mod fdio;
mod raw;
mod resize;
