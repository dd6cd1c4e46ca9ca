//! Cooperative interrupt signalling between the controller and a running fetch.
//!
//! Polling rather than preemption: the engine's I/O loop cannot be safely
//! preempted mid-buffer-write, so pause and cancel are advisory flags the
//! engine consults at safe points ([`InterruptSignal::checkpoint`]). The
//! latency of a pause/cancel request is bounded by the interval between two
//! checkpoints, not instantaneous.

use std::sync::atomic::{AtomicBool, Ordering};

/// Why a fetch was interrupted at a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// The pause flag was set; partial output is left in place.
    Paused,
    /// The stop flag was set; partial output is cleaned up by the caller.
    Stopped,
}

/// Two independent advisory flags checked by the fetch engine at safe points.
///
/// Owned by the controller instance and passed by reference into engine
/// calls; there is no process-wide singleton, so multiple controllers can
/// coexist.
#[derive(Debug, Default)]
pub struct InterruptSignal {
    pause: AtomicBool,
    stop: AtomicBool,
}

impl InterruptSignal {
    /// Creates a signal with both flags clear.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears both flags. Called once per `start`/`resume` before the run
    /// loop begins.
    pub fn arm(&self) {
        self.pause.store(false, Ordering::SeqCst);
        self.stop.store(false, Ordering::SeqCst);
    }

    /// Requests a pause at the next checkpoint. Idempotent.
    pub fn request_pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    /// Requests a stop at the next checkpoint. Idempotent.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Returns true when a pause has been requested and not yet observed.
    #[must_use]
    pub fn is_pause_requested(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    /// Returns true when a stop has been requested and not yet observed.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Consulted by the engine at each safe point.
    ///
    /// Stop wins when both flags are set: cancellation is the stronger
    /// intent than pausing.
    ///
    /// # Errors
    ///
    /// Returns the pending [`Interrupt`] when either flag is set.
    pub fn checkpoint(&self) -> Result<(), Interrupt> {
        if self.stop.load(Ordering::SeqCst) {
            return Err(Interrupt::Stopped);
        }
        if self.pause.load(Ordering::SeqCst) {
            return Err(Interrupt::Paused);
        }
        Ok(())
    }
}
