//! Event register shared between producers and the scheduler
//!
//! A signal is a single bit in an [`AtomicU32`]. Producers (link receive path,
//! console, timers) raise bits from any thread; the scheduler polls and clears
//! them once per tick. Raising an already-set signal coalesces into the
//! existing bit.

use core::fmt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Named signals observed by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    /// A frame is waiting in the inbox
    MessageArrived,
    /// The link confirmed a transmission
    SendConfirmed,
    /// A console intent is waiting in the inbox
    KeyboardIntent,
    /// The booth-selection dwell elapsed
    SelectionTimeout,
    /// The connect/registration response timer elapsed
    RetryTimeout,
}

impl Signal {
    pub const ALL: [Signal; 5] = [
        Signal::MessageArrived,
        Signal::SendConfirmed,
        Signal::KeyboardIntent,
        Signal::SelectionTimeout,
        Signal::RetryTimeout,
    ];

    const fn mask(self) -> u32 {
        1 << (self as u32)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::MessageArrived => "message-arrived",
            Signal::SendConfirmed => "send-confirmed",
            Signal::KeyboardIntent => "keyboard-intent",
            Signal::SelectionTimeout => "selection-timeout",
            Signal::RetryTimeout => "retry-timeout",
        };
        f.write_str(name)
    }
}

/// Lock-free set of pending signals
///
/// Cloning yields another handle to the same register.
#[derive(Debug, Clone, Default)]
pub struct EventRegister {
    bits: Arc<AtomicU32>,
}

impl EventRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise `signal`, returning `false` if it was already pending
    pub fn raise(&self, signal: Signal) -> bool {
        let previous = self.bits.fetch_or(signal.mask(), Ordering::AcqRel);
        previous & signal.mask() == 0
    }

    pub fn clear(&self, signal: Signal) {
        self.bits.fetch_and(!signal.mask(), Ordering::AcqRel);
    }

    pub fn clear_all(&self) {
        self.bits.store(0, Ordering::Release);
    }

    pub fn is_set(&self, signal: Signal) -> bool {
        self.bits.load(Ordering::Acquire) & signal.mask() != 0
    }

    /// Clear `signal` and report whether it was pending
    pub fn take(&self, signal: Signal) -> bool {
        let previous = self.bits.fetch_and(!signal.mask(), Ordering::AcqRel);
        previous & signal.mask() != 0
    }

    /// Whether any signal is pending
    pub fn any(&self) -> bool {
        self.bits.load(Ordering::Acquire) != 0
    }
}
