// SPDX-License-Identifier: MIT
//
// Window-resize notification, folded into a flag.
//
// SIGWINCH arrives at an arbitrary point, possibly while the read loop
// is blocked in poll(). The handler does exactly one thing that is
// legal in signal context: store `true` into an atomic owned by the
// device instance. The read loop consumes the flag between poll ticks
// and substitutes the synthetic redraw character for it. Nothing here
// is process-global; each device carries its own flag, registered and
// unregistered with its lifetime.
//
// Relaxed ordering throughout: the flag publishes no data, it is the
// entire message.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::SIGWINCH;
use signal_hook::SigId;

use crate::error::{DeviceError, Result};

/// A pending-resize flag set from signal context and consumed by reads.
#[derive(Debug, Default)]
pub(crate) struct ResizeFlag {
    observed: Arc<AtomicBool>,
}

impl ResizeFlag {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a SIGWINCH action that sets this flag.
    ///
    /// The returned [`SigId`] identifies the action for
    /// [`unregister`]; the caller keeps it for teardown.
    ///
    /// # Errors
    ///
    /// [`DeviceError::Signal`] if the handler cannot be installed.
    pub(crate) fn install(&self) -> Result<SigId> {
        signal_hook::flag::register(SIGWINCH, Arc::clone(&self.observed))
            .map_err(|source| DeviceError::Signal { source })
    }

    /// Consume the flag: returns whether a resize was pending and
    /// clears it in the same atomic operation.
    pub(crate) fn take(&self) -> bool {
        self.observed.swap(false, Ordering::Relaxed)
    }

    /// Mark a resize as pending, as the signal handler would.
    ///
    /// Also the hook for callers that want to force a redraw pass
    /// through the input stream without an actual window change.
    pub(crate) fn set(&self) {
        self.observed.store(true, Ordering::Relaxed);
    }
}

/// Remove a previously installed SIGWINCH action.
pub(crate) fn unregister(id: SigId) {
    signal_hook::low_level::unregister(id);
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_consumes_the_flag() {
        let flag = ResizeFlag::new();
        assert!(!flag.take());

        flag.set();
        assert!(flag.take());
        assert!(!flag.take()); // Consumed by the previous take.
    }

    #[test]
    fn flags_are_independent() {
        let a = ResizeFlag::new();
        let b = ResizeFlag::new();

        a.set();
        assert!(!b.take());
        assert!(a.take());
    }

    #[test]
    fn sigwinch_sets_installed_flag() {
        let flag = ResizeFlag::new();
        let id = flag.install().unwrap();

        // raise() runs the handler on this thread before returning.
        signal_hook::low_level::raise(SIGWINCH).unwrap();

        assert!(flag.take());
        unregister(id);
    }
}
