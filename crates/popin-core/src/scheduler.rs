//! Cooperative scheduler
//!
//! One [`Scheduler`] owns the event register, the timers, the inbox, the
//! selected FSM, the link and the clock. Each [`Scheduler::run_step`] call is
//! one tick: poll timers, dispatch pending signals in a fixed order, run the
//! FSM's periodic work and flush outbound messages to the link.

use serde::{Deserialize, Serialize};

use crate::admin::AdminFsm;
use crate::config::ProtocolConfig;
use crate::event::{EventRegister, Signal};
use crate::link::{inbox, Inbox, InboxHandle, LinkLayer, ReceivedFrame};
use crate::message::Message;
use crate::node::{AppEvent, Inbound, NodeContext, NodeSnapshot, ProtocolFsm};
use crate::timer::{TimerKind, TimerStatus};
use crate::types::{NodeId, Role, TimeSource, Timestamp};
use crate::user::UserFsm;
use crate::{PopinError, Result};

#[cfg(not(feature = "std"))]
use log::{debug, info, trace, warn};
#[cfg(feature = "std")]
use tracing::{debug, info, trace, warn};

/// Counters kept by the scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub frames_overwritten: u64,
    pub signals_coalesced: u64,
    pub messages_sent: u64,
    pub send_failures: u64,
    pub send_confirmations: u64,
}

/// Build the FSM for `id`, choosing the role from the admin range
pub fn build_fsm(id: NodeId, config: &ProtocolConfig) -> Box<dyn ProtocolFsm> {
    match Role::for_id(id, &config.admin_ids()) {
        Role::Admin => Box::new(AdminFsm::new(id, config.clone())),
        Role::User => Box::new(UserFsm::new(id, config.clone())),
    }
}

/// Single cooperative execution context of a node
pub struct Scheduler<L: LinkLayer, T: TimeSource> {
    config: ProtocolConfig,
    fsm: Box<dyn ProtocolFsm>,
    link: L,
    clock: T,
    events: EventRegister,
    inbox: Inbox,
    handle: InboxHandle,
    ctx: NodeContext,
    stats: SchedulerStats,
    pending_app_events: Vec<AppEvent>,
    started: bool,
}

impl<L: LinkLayer, T: TimeSource> Scheduler<L, T> {
    /// Create the scheduler for node `id`
    pub fn new(id: NodeId, config: ProtocolConfig, link: L, clock: T) -> Result<Self> {
        config.validate()?;
        if id.value() == 0 || id.is_broadcast() {
            return Err(PopinError::config_error(format!(
                "Node id {} is reserved",
                id
            )));
        }

        let events = EventRegister::new();
        let (inbox, handle) = inbox(
            config.rx_queue_depth,
            config.intent_queue_depth,
            events.clone(),
        );
        let fsm = build_fsm(id, &config);
        info!("Node {} running as {}", id, fsm.role());

        Ok(Self {
            ctx: NodeContext::new(events.clone()),
            config,
            fsm,
            link,
            clock,
            events,
            inbox,
            handle,
            stats: SchedulerStats::default(),
            pending_app_events: Vec::new(),
            started: false,
        })
    }

    pub fn id(&self) -> NodeId {
        self.fsm.id()
    }

    pub fn role(&self) -> Role {
        self.fsm.role()
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Producer handle for link and console threads
    pub fn handle(&self) -> InboxHandle {
        self.handle.clone()
    }

    pub fn events(&self) -> &EventRegister {
        &self.events
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn tick_count(&self) -> u64 {
        self.ctx.tick()
    }

    pub fn timer_status(&self, kind: TimerKind) -> TimerStatus {
        self.ctx.timer_status(kind)
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        self.fsm.snapshot()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            frames_overwritten: self.inbox.overwritten_frames(),
            signals_coalesced: self.inbox.coalesced_signals(),
            ..self.stats.clone()
        }
    }

    /// Take the application events produced so far
    pub fn drain_app_events(&mut self) -> Vec<AppEvent> {
        std::mem::take(&mut self.pending_app_events)
    }

    /// Run one scheduler tick
    pub fn run_step(&mut self) {
        self.ctx.advance(self.clock.now());
        if !self.started {
            self.started = true;
            self.fsm.on_start(&mut self.ctx);
        }
        self.stats.ticks += 1;

        self.ctx.poll_timers();

        if self.events.take(Signal::MessageArrived) {
            for frame in self.inbox.drain_frames() {
                self.dispatch_frame(frame);
            }
        }
        if self.events.take(Signal::SelectionTimeout) {
            self.fsm.on_timer(&mut self.ctx, TimerKind::BoothSelection);
        }
        if self.events.take(Signal::RetryTimeout) {
            self.fsm.on_timer(&mut self.ctx, TimerKind::Retry);
        }
        if self.events.take(Signal::KeyboardIntent) {
            for intent in self.inbox.drain_intents() {
                self.fsm.on_intent(&mut self.ctx, intent);
            }
        }
        if self.events.take(Signal::SendConfirmed) {
            self.stats.send_confirmations += 1;
        }

        self.fsm.on_tick(&mut self.ctx);
        self.flush_outbox();
        self.pending_app_events.extend(self.ctx.take_app_events());
    }

    fn dispatch_frame(&mut self, frame: ReceivedFrame) {
        self.stats.frames_received += 1;
        let source_role = Role::for_id(frame.source, &self.config.admin_ids());
        match Message::decode(&frame.payload, source_role) {
            Ok(message) => {
                trace!(
                    "Node {} received {:?} from {}",
                    self.fsm.id(),
                    message.message_type(),
                    frame.source
                );
                self.fsm.on_message(
                    &mut self.ctx,
                    Inbound {
                        source: frame.source,
                        message,
                        rssi: frame.rssi,
                        snr: frame.snr,
                    },
                );
            }
            Err(err) => {
                self.stats.frames_dropped += 1;
                debug!(
                    "Node {} dropped frame from {}: {}",
                    self.fsm.id(),
                    frame.source,
                    err
                );
            }
        }
    }

    fn flush_outbox(&mut self) {
        for outbound in self.ctx.take_outbox() {
            let bytes = outbound.message.encode();
            match self.link.send(&bytes, outbound.dest) {
                Ok(()) => self.stats.messages_sent += 1,
                Err(err) => {
                    self.stats.send_failures += 1;
                    warn!(
                        "Node {} failed to send {:?} to {}: {}",
                        self.fsm.id(),
                        outbound.message.message_type(),
                        outbound.dest,
                        err
                    );
                }
            }
        }
    }
}
