//! Signal handling for deploy operations (SIGINT/SIGTERM).
//!
//! The first signal sets an interrupted flag; operations poll it between
//! phases, so a sync aborts cleanly before the next remote mutation and
//! the device file is either untouched or fully updated, never half
//! written. A second signal exits immediately.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Exit code for interrupted operations.
pub const EXIT_CODE_INTERRUPTED: i32 = 80;

/// Shared interrupt state, polled by the ops between phases.
#[derive(Debug, Default)]
pub struct InterruptState {
    /// First signal received.
    interrupted: AtomicBool,
    /// Signal count (for tracking the double-signal fast exit).
    signal_count: AtomicU8,
}

impl InterruptState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether an interrupt has been requested.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Handle a signal. Returns true when the process should exit
    /// immediately (second signal).
    pub fn handle_signal(&self) -> bool {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);
        self.interrupted.store(true, Ordering::SeqCst);
        count >= 1
    }

    /// Request an interrupt without a signal (for tests).
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }
}

/// Installs the SIGINT/SIGTERM handler and hands out the shared state.
pub struct InterruptGuard {
    state: Arc<InterruptState>,
}

impl InterruptGuard {
    pub fn new() -> Self {
        Self {
            state: Arc::new(InterruptState::new()),
        }
    }

    /// Get a handle on the shared state.
    pub fn state(&self) -> Arc<InterruptState> {
        Arc::clone(&self.state)
    }

    /// Install the signal handlers. Must be called once at startup.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || {
            if state.handle_signal() {
                eprintln!("\nReceived second interrupt, exiting immediately...");
                std::process::exit(EXIT_CODE_INTERRUPTED);
            }
            eprintln!("\nReceived interrupt, finishing current step then stopping...");
        })
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = InterruptState::new();
        assert!(!state.is_interrupted());
    }

    #[test]
    fn test_first_signal_sets_flag() {
        let state = InterruptState::new();
        assert!(!state.handle_signal());
        assert!(state.is_interrupted());
    }

    #[test]
    fn test_second_signal_requests_exit() {
        let state = InterruptState::new();
        state.handle_signal();
        assert!(state.handle_signal());
    }

    #[test]
    fn test_manual_interrupt() {
        let state = InterruptState::new();
        state.interrupt();
        assert!(state.is_interrupted());
        // A manual interrupt is not a signal; the next real signal is
        // still the first one.
        assert!(!state.handle_signal());
    }
}
