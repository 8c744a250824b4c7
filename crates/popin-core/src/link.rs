//! Link-layer contract and the inbox hand-off
//!
//! The core never touches a radio. It sends through a [`LinkLayer`] and
//! receives through an [`InboxHandle`] that any thread may hold: delivering a
//! frame stores it in a bounded lock-free channel and raises
//! [`Signal::MessageArrived`] for the scheduler.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::event::{EventRegister, Signal};
use crate::types::NodeId;
use crate::Result;

// ----------------------------------------------------------------------------
// Link Layer Contract
// ----------------------------------------------------------------------------

/// Transmit side of the link layer
pub trait LinkLayer {
    /// Send `payload` to `dest`; [`NodeId::BROADCAST`] reaches every node
    fn send(&mut self, payload: &[u8], dest: NodeId) -> Result<()>;
}

impl<L: LinkLayer + ?Sized> LinkLayer for Box<L> {
    fn send(&mut self, payload: &[u8], dest: NodeId) -> Result<()> {
        (**self).send(payload, dest)
    }
}

/// A frame as delivered by the link layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedFrame {
    pub source: NodeId,
    pub payload: Vec<u8>,
    /// Received signal strength in dBm
    pub rssi: i16,
    /// Signal-to-noise ratio
    pub snr: i8,
}

impl ReceivedFrame {
    pub fn new(source: NodeId, payload: Vec<u8>, rssi: i16, snr: i8) -> Self {
        Self {
            source,
            payload,
            rssi,
            snr,
        }
    }
}

// ----------------------------------------------------------------------------
// Console Intents
// ----------------------------------------------------------------------------

/// Human intents produced by the console front-end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    /// Accept the offered booth
    Affirm,
    /// Decline the offered booth
    Decline,
    /// Leave the booth
    Exit,
    /// Leave the waiting queue
    LeaveQueue,
    /// Chat with the booth (users) or message active users (admins)
    Chat(String),
    /// Admin broadcast to every node
    Announce(String),
    /// Admin: toggle periodic booth announces
    ToggleBroadcast,
    /// Report current status as an application event
    Status,
}

// ----------------------------------------------------------------------------
// Inbox
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct InboxCounters {
    overwritten_frames: AtomicU64,
    overwritten_intents: AtomicU64,
    coalesced_signals: AtomicU64,
}

/// Producer side of the inbox, shared with link and console threads
#[derive(Debug, Clone)]
pub struct InboxHandle {
    frames_tx: Sender<ReceivedFrame>,
    frames_rx: Receiver<ReceivedFrame>,
    intents_tx: Sender<Intent>,
    intents_rx: Receiver<Intent>,
    events: EventRegister,
    counters: Arc<InboxCounters>,
}

/// Consumer side of the inbox, owned by the scheduler
#[derive(Debug)]
pub struct Inbox {
    frames: Receiver<ReceivedFrame>,
    intents: Receiver<Intent>,
    counters: Arc<InboxCounters>,
}

/// Create a connected inbox pair
///
/// A depth of 1 keeps only the most recent frame: a second arrival before the
/// scheduler drains the first overwrites it. Larger depths behave as a FIFO
/// that still drops the oldest entry when full.
pub fn inbox(frame_depth: usize, intent_depth: usize, events: EventRegister) -> (Inbox, InboxHandle) {
    let (frames_tx, frames_rx) = bounded(frame_depth.max(1));
    let (intents_tx, intents_rx) = bounded(intent_depth.max(1));
    let counters = Arc::new(InboxCounters::default());

    let inbox = Inbox {
        frames: frames_rx.clone(),
        intents: intents_rx.clone(),
        counters: Arc::clone(&counters),
    };
    let handle = InboxHandle {
        frames_tx,
        frames_rx,
        intents_tx,
        intents_rx,
        events,
        counters,
    };
    (inbox, handle)
}

/// Push `item`, evicting the oldest entry while the channel is full
fn push_overwriting<T>(tx: &Sender<T>, rx: &Receiver<T>, mut item: T, evicted: &AtomicU64) -> bool {
    loop {
        match tx.try_send(item) {
            Ok(()) => return true,
            Err(TrySendError::Full(returned)) => {
                if rx.try_recv().is_ok() {
                    evicted.fetch_add(1, Ordering::Relaxed);
                }
                item = returned;
            }
            Err(TrySendError::Disconnected(_)) => return false,
        }
    }
}

impl InboxHandle {
    fn raise(&self, signal: Signal) {
        if !self.events.raise(signal) {
            self.counters.coalesced_signals.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Hand a received frame to the scheduler
    pub fn deliver(&self, frame: ReceivedFrame) -> bool {
        let stored = push_overwriting(
            &self.frames_tx,
            &self.frames_rx,
            frame,
            &self.counters.overwritten_frames,
        );
        if stored {
            self.raise(Signal::MessageArrived);
        }
        stored
    }

    /// Hand a console intent to the scheduler
    pub fn submit_intent(&self, intent: Intent) -> bool {
        let stored = push_overwriting(
            &self.intents_tx,
            &self.intents_rx,
            intent,
            &self.counters.overwritten_intents,
        );
        if stored {
            self.raise(Signal::KeyboardIntent);
        }
        stored
    }

    /// Report a link-level transmit confirmation
    pub fn confirm_send(&self) {
        self.raise(Signal::SendConfirmed);
    }
}

impl Inbox {
    /// Take every buffered frame in arrival order
    pub fn drain_frames(&self) -> Vec<ReceivedFrame> {
        self.frames.try_iter().collect()
    }

    /// Take every buffered intent in submission order
    pub fn drain_intents(&self) -> Vec<Intent> {
        self.intents.try_iter().collect()
    }

    pub fn overwritten_frames(&self) -> u64 {
        self.counters.overwritten_frames.load(Ordering::Relaxed)
    }

    pub fn overwritten_intents(&self) -> u64 {
        self.counters.overwritten_intents.load(Ordering::Relaxed)
    }

    pub fn coalesced_signals(&self) -> u64 {
        self.counters.coalesced_signals.load(Ordering::Relaxed)
    }
}
