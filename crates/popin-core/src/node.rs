//! Shared surface of the two role state machines
//!
//! Both FSMs implement [`ProtocolFsm`] and talk to the outside world only
//! through a [`NodeContext`]: outbound messages are queued there, timers are
//! armed there and application events are buffered there for the console.

use core::fmt;
use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::event::EventRegister;
use crate::link::Intent;
use crate::message::{BoothStatus, Message};
use crate::timer::{TimerBank, TimerKind, TimerStatus};
use crate::types::{NodeId, Role, Timestamp};

// ----------------------------------------------------------------------------
// Inbound Messages
// ----------------------------------------------------------------------------

/// A decoded message together with its link metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub source: NodeId,
    pub message: Message,
    pub rssi: i16,
    pub snr: i8,
}

/// A message queued for transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub dest: NodeId,
    pub message: Message,
}

// ----------------------------------------------------------------------------
// Node Context
// ----------------------------------------------------------------------------

/// Per-tick view of the scheduler handed to the FSM
#[derive(Debug)]
pub struct NodeContext {
    now: Timestamp,
    tick: u64,
    timers: TimerBank,
    events: EventRegister,
    outbox: Vec<Outbound>,
    app_events: Vec<AppEvent>,
}

impl NodeContext {
    pub fn new(events: EventRegister) -> Self {
        Self {
            now: Timestamp::ZERO,
            tick: 0,
            timers: TimerBank::new(),
            events,
            outbox: Vec::new(),
            app_events: Vec::new(),
        }
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub(crate) fn advance(&mut self, now: Timestamp) {
        self.now = now;
        self.tick += 1;
    }

    /// Queue `message` for `dest`
    pub fn send(&mut self, dest: NodeId, message: Message) {
        self.outbox.push(Outbound { dest, message });
    }

    /// Report an application event to the console
    pub fn emit(&mut self, event: AppEvent) {
        self.app_events.push(event);
    }

    /// Arm `kind`, discarding any expiry not yet consumed
    pub fn start_timer(&mut self, kind: TimerKind, duration: Duration) {
        self.events.clear(kind.signal());
        self.timers.start(kind, duration, self.now);
    }

    /// Disarm `kind`, discarding any expiry not yet consumed
    pub fn stop_timer(&mut self, kind: TimerKind) {
        self.timers.stop(kind);
        self.events.clear(kind.signal());
    }

    pub fn stop_all_timers(&mut self) {
        self.stop_timer(TimerKind::Retry);
        self.stop_timer(TimerKind::BoothSelection);
    }

    pub fn timer_status(&self, kind: TimerKind) -> TimerStatus {
        self.timers.status(kind)
    }

    pub(crate) fn poll_timers(&mut self) {
        self.timers.poll(self.now, &self.events);
    }

    pub(crate) fn take_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    pub(crate) fn take_app_events(&mut self) -> Vec<AppEvent> {
        std::mem::take(&mut self.app_events)
    }

    pub fn pending_outbox(&self) -> &[Outbound] {
        &self.outbox
    }
}

// ----------------------------------------------------------------------------
// Protocol FSM Trait
// ----------------------------------------------------------------------------

/// A role-specific protocol state machine driven by the scheduler
pub trait ProtocolFsm: Send {
    fn id(&self) -> NodeId;

    fn role(&self) -> Role;

    /// Called once before the first tick
    fn on_start(&mut self, ctx: &mut NodeContext);

    /// A decoded frame arrived
    fn on_message(&mut self, ctx: &mut NodeContext, inbound: Inbound);

    /// A timer expired
    fn on_timer(&mut self, ctx: &mut NodeContext, kind: TimerKind);

    /// The console submitted an intent
    fn on_intent(&mut self, ctx: &mut NodeContext, intent: Intent);

    /// Called at the end of every tick for periodic work
    fn on_tick(&mut self, ctx: &mut NodeContext);

    fn snapshot(&self) -> NodeSnapshot;
}

// ----------------------------------------------------------------------------
// User States
// ----------------------------------------------------------------------------

/// Lifecycle state of a user node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserState {
    Scanning,
    Connected,
    Waiting,
    InUse,
}

impl fmt::Display for UserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UserState::Scanning => "SCANNING",
            UserState::Connected => "CONNECTED",
            UserState::Waiting => "WAITING",
            UserState::InUse => "IN_USE",
        };
        f.write_str(name)
    }
}

/// Exchange whose response timed out too often
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStage {
    Connect,
    Register,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    /// The user asked to leave
    Exited,
    /// The booth sent TIMEOUT_ALERT
    TimedOut,
    /// No alert arrived within the grace margin
    ForcedExpiry,
}

// ----------------------------------------------------------------------------
// Application Events
// ----------------------------------------------------------------------------

/// Events reported to the console front-end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AppEvent {
    // User side
    StateChanged {
        from: UserState,
        to: UserState,
    },
    ScanStarted,
    BoothDiscovered {
        booth: NodeId,
        rssi: i16,
        status: BoothStatus,
    },
    BoothSelected {
        booth: NodeId,
        score: i32,
    },
    NoBoothFound,
    BoothOffered {
        booth: NodeId,
        current_count: u8,
        capacity: u8,
        waiting_count: u8,
        description: String,
        awaiting_decision: bool,
    },
    RegistrationRefused {
        booth: NodeId,
    },
    QueuePosition {
        booth: NodeId,
        position: u8,
        total: u8,
    },
    QueueDropped {
        booth: NodeId,
    },
    SessionStarted {
        booth: NodeId,
    },
    SessionEnded {
        booth: NodeId,
        reason: SessionEndReason,
    },
    ExitConfirmed {
        booth: NodeId,
        success: bool,
    },
    RetriesExhausted {
        booth: NodeId,
        stage: RetryStage,
    },
    ChatReceived {
        via: NodeId,
        sender: Option<NodeId>,
        text: String,
    },
    AdminMessage {
        booth: NodeId,
        text: String,
    },

    // Admin side
    UserAdmitted {
        user: NodeId,
    },
    UserQueued {
        user: NodeId,
        position: u8,
        total: u8,
    },
    UserRefused {
        user: NodeId,
    },
    UserExited {
        user: NodeId,
    },
    SessionExpired {
        user: NodeId,
    },
    OfferSent {
        user: NodeId,
    },
    OfferExpired {
        user: NodeId,
    },
    BroadcastToggled {
        enabled: bool,
    },

    Status(NodeSnapshot),
}

// ----------------------------------------------------------------------------
// Snapshots
// ----------------------------------------------------------------------------

/// Serializable view of a node for the console and the simulator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum NodeSnapshot {
    Admin(AdminSnapshot),
    User(UserSnapshot),
}

impl NodeSnapshot {
    pub fn id(&self) -> NodeId {
        match self {
            NodeSnapshot::Admin(admin) => admin.id,
            NodeSnapshot::User(user) => user.id,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            NodeSnapshot::Admin(_) => Role::Admin,
            NodeSnapshot::User(_) => Role::User,
        }
    }

    /// Human-readable state name
    pub fn state_name(&self) -> String {
        match self {
            NodeSnapshot::Admin(_) => "ACTIVE".to_string(),
            NodeSnapshot::User(user) => user.state.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminSnapshot {
    pub id: NodeId,
    pub status: BoothStatus,
    pub description: String,
    pub active: Vec<NodeId>,
    pub waiting: Vec<NodeId>,
    pub registered: Vec<NodeId>,
    pub pending_offer: Option<NodeId>,
    pub broadcast_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: NodeId,
    pub state: UserState,
    pub booth: Option<NodeId>,
    pub queue_position: u8,
    pub queue_total: u8,
    pub session_start: Option<Timestamp>,
    /// Booths where a session started, in order
    pub visits: Vec<NodeId>,
}
