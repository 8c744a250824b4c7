//! Pop-in Core Protocol Implementation
//!
//! Application-layer protocol for a short-range booth admission network: a
//! fixed set of admin nodes own capacity-limited booths, and user nodes
//! discover them by signal strength, register, queue when full, hold a timed
//! session and leave.
//!
//! The crate holds the whole protocol core and nothing that touches a radio:
//! the event register, one-shot timers, the binary message codec, the booth
//! registry with its admission algorithms, and the user and admin state
//! machines driven by a single cooperative [`Scheduler`].

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod admin;
pub mod admission;
pub mod config;
pub mod errors;
pub mod event;
pub mod link;
pub mod message;
pub mod node;
pub mod registry;
pub mod scan;
pub mod scheduler;
pub mod timer;
pub mod types;
pub mod user;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use admin::AdminFsm;
pub use admission::{booth_score, select_optimal_booth, RegistrationOutcome};
pub use config::ProtocolConfig;
pub use errors::{PacketError, PopinError, PopinResult, RegistryError, Result};
pub use event::{EventRegister, Signal};
pub use link::{inbox, Inbox, InboxHandle, Intent, LinkLayer, ReceivedFrame};
pub use message::{
    BoothStatus, Message, MessageType, RegisterReason, MAX_DESCRIPTION_LEN, MAX_FRAME_LEN,
    MAX_TEXT_LEN,
};
pub use node::{
    AdminSnapshot, AppEvent, Inbound, NodeContext, NodeSnapshot, Outbound, ProtocolFsm,
    RetryStage, SessionEndReason, UserSnapshot, UserState,
};
pub use registry::{ActiveUser, AdmissionOffer, Booth};
pub use scan::{ScanEntry, ScanTable};
pub use scheduler::{build_fsm, Scheduler, SchedulerStats};
pub use timer::{OneShotTimer, TimerBank, TimerKind, TimerStatus};
pub use types::{ManualTimeSource, NodeId, Role, SystemTimeSource, TimeSource, Timestamp};
pub use user::UserFsm;
