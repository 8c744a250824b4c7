//! User-side protocol state machine
//!
//! `SCANNING -> CONNECTED -> {WAITING | IN_USE} -> SCANNING`. Every response
//! the user waits for is guarded by the retry timer with a fixed ceiling, and
//! every return to SCANNING drops all per-booth state.

use crate::admission::{booth_score, select_optimal_booth};
use crate::config::ProtocolConfig;
use crate::link::Intent;
use crate::message::{Message, RegisterReason};
use crate::node::{
    AppEvent, Inbound, NodeContext, NodeSnapshot, ProtocolFsm, RetryStage, SessionEndReason,
    UserSnapshot, UserState,
};
use crate::scan::ScanTable;
use crate::timer::TimerKind;
use crate::types::{NodeId, Role, Timestamp};
use smallvec::SmallVec;

#[cfg(not(feature = "std"))]
use log::{debug, info, trace, warn};
#[cfg(feature = "std")]
use tracing::{debug, info, trace, warn};

/// Response the user is currently waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Awaiting {
    Nothing,
    BoothInfo,
    Decision,
    Registration,
}

/// Protocol state of a user node
#[derive(Debug, Clone)]
pub struct UserFsm {
    id: NodeId,
    config: ProtocolConfig,
    state: UserState,
    awaiting: Awaiting,
    scan_table: ScanTable,
    scan_open: bool,
    last_scan_tick: u64,
    booth: Option<NodeId>,
    connect_retries: u32,
    register_retries: u32,
    session_start: Option<Timestamp>,
    queue_position: u8,
    queue_total: u8,
    visits: Vec<NodeId>,
    /// Booths visited or refused; announces from them are not selectable
    spent: SmallVec<[NodeId; 4]>,
}

impl UserFsm {
    pub fn new(id: NodeId, config: ProtocolConfig) -> Self {
        let scan_table = ScanTable::new(config.booth_count());
        Self {
            id,
            config,
            state: UserState::Scanning,
            awaiting: Awaiting::Nothing,
            scan_table,
            scan_open: false,
            last_scan_tick: 0,
            booth: None,
            connect_retries: 0,
            register_retries: 0,
            session_start: None,
            queue_position: 0,
            queue_total: 0,
            visits: Vec::new(),
            spent: SmallVec::new(),
        }
    }

    pub fn state(&self) -> UserState {
        self.state
    }

    pub fn booth(&self) -> Option<NodeId> {
        self.booth
    }

    pub fn scan_table(&self) -> &ScanTable {
        &self.scan_table
    }

    pub fn is_scan_open(&self) -> bool {
        self.scan_open
    }

    pub fn queue_position(&self) -> (u8, u8) {
        (self.queue_position, self.queue_total)
    }

    pub fn connect_retries(&self) -> u32 {
        self.connect_retries
    }

    pub fn register_retries(&self) -> u32 {
        self.register_retries
    }

    pub fn visits(&self) -> &[NodeId] {
        &self.visits
    }

    /// Booths this user will not select again
    pub fn spent_booths(&self) -> &[NodeId] {
        &self.spent
    }

    fn mark_spent(&mut self, booth: NodeId) {
        if !self.spent.contains(&booth) {
            self.spent.push(booth);
        }
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    fn transition(&mut self, ctx: &mut NodeContext, to: UserState) {
        let from = self.state;
        if from == to {
            return;
        }
        info!("User {} state {} -> {}", self.id, from, to);
        self.state = to;
        ctx.emit(AppEvent::StateChanged { from, to });
    }

    /// Return to SCANNING, dropping every piece of per-booth state
    fn return_to_scanning(&mut self, ctx: &mut NodeContext) {
        ctx.stop_all_timers();
        self.scan_table.reset();
        self.scan_open = false;
        self.last_scan_tick = ctx.tick();
        self.awaiting = Awaiting::Nothing;
        self.booth = None;
        self.connect_retries = 0;
        self.register_retries = 0;
        self.session_start = None;
        self.queue_position = 0;
        self.queue_total = 0;
        self.transition(ctx, UserState::Scanning);
    }

    fn start_scan(&mut self, ctx: &mut NodeContext) {
        self.scan_table.reset();
        self.scan_open = true;
        self.last_scan_tick = ctx.tick();
        for admin in self.config.admin_ids() {
            ctx.send(NodeId::new(admin), Message::BoothScan);
        }
        ctx.start_timer(TimerKind::BoothSelection, self.config.selection_dwell());
        debug!("User {} scanning for booths", self.id);
        ctx.emit(AppEvent::ScanStarted);
    }

    fn send_to_booth(&self, ctx: &mut NodeContext, message: Message) {
        if let Some(booth) = self.booth {
            ctx.send(booth, message);
        }
    }

    fn send_connect(&mut self, ctx: &mut NodeContext) {
        self.send_to_booth(ctx, Message::ConnectRequest);
        ctx.start_timer(TimerKind::Retry, self.config.connect_timeout());
        self.awaiting = Awaiting::BoothInfo;
    }

    /// Affirm the offered booth and request registration
    fn send_affirm_and_register(&mut self, ctx: &mut NodeContext) {
        self.send_to_booth(ctx, Message::UserResponse { accept: true });
        self.send_register(ctx);
    }

    fn send_register(&mut self, ctx: &mut NodeContext) {
        self.send_to_booth(ctx, Message::RegisterRequest);
        ctx.start_timer(TimerKind::Retry, self.config.register_timeout());
        self.awaiting = Awaiting::Registration;
    }

    fn give_up(&mut self, ctx: &mut NodeContext, stage: RetryStage) {
        let booth = self.booth.unwrap_or(NodeId::BROADCAST);
        warn!("User {} gave up on booth {} after retries ({:?})", self.id, booth, stage);
        ctx.emit(AppEvent::RetriesExhausted { booth, stage });
        self.return_to_scanning(ctx);
    }

    fn end_session(&mut self, ctx: &mut NodeContext, reason: SessionEndReason) {
        if let Some(booth) = self.booth {
            info!("User {} session at booth {} ended ({:?})", self.id, booth, reason);
            ctx.emit(AppEvent::SessionEnded { booth, reason });
        }
        self.return_to_scanning(ctx);
    }

    // ------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------

    fn on_selection_timeout(&mut self, ctx: &mut NodeContext) {
        if self.state != UserState::Scanning || !self.scan_open {
            return;
        }
        self.scan_open = false;
        self.last_scan_tick = ctx.tick();

        let Some(booth) = select_optimal_booth(self.scan_table.valid_entries()) else {
            debug!("User {} found no booth", self.id);
            self.scan_table.reset();
            ctx.emit(AppEvent::NoBoothFound);
            return;
        };

        let score = self.scan_table.get(booth).map(booth_score).unwrap_or_default();
        info!("User {} selected booth {} (score {})", self.id, booth, score);
        ctx.emit(AppEvent::BoothSelected { booth, score });

        self.booth = Some(booth);
        self.connect_retries = 0;
        self.send_connect(ctx);
        self.transition(ctx, UserState::Connected);
    }

    fn on_retry_timeout(&mut self, ctx: &mut NodeContext) {
        match (self.state, self.awaiting) {
            (UserState::Connected, Awaiting::BoothInfo) => {
                if self.connect_retries < self.config.connect_retry_limit {
                    self.connect_retries += 1;
                    debug!("User {} connect retry {}", self.id, self.connect_retries);
                    self.send_connect(ctx);
                } else {
                    self.give_up(ctx, RetryStage::Connect);
                }
            }
            (UserState::Connected, Awaiting::Registration) => {
                if self.register_retries < self.config.register_retry_limit {
                    self.register_retries += 1;
                    debug!("User {} register retry {}", self.id, self.register_retries);
                    self.send_affirm_and_register(ctx);
                } else {
                    self.give_up(ctx, RetryStage::Register);
                }
            }
            (UserState::Waiting, Awaiting::Registration) => {
                if self.register_retries < self.config.register_retry_limit {
                    self.register_retries += 1;
                    debug!("User {} slot claim retry {}", self.id, self.register_retries);
                    self.send_register(ctx);
                } else {
                    self.send_to_booth(ctx, Message::QueueLeave);
                    self.give_up(ctx, RetryStage::Register);
                }
            }
            _ => trace!("User {} ignoring stale retry timeout", self.id),
        }
    }

    // ------------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------------

    fn on_booth_info(
        &mut self,
        ctx: &mut NodeContext,
        current_count: u8,
        capacity: u8,
        waiting_count: u8,
        description: String,
    ) {
        if self.state != UserState::Connected || self.awaiting != Awaiting::BoothInfo {
            return;
        }
        ctx.stop_timer(TimerKind::Retry);
        let booth = self.booth.unwrap_or(NodeId::BROADCAST);
        info!(
            "User {} got booth {} info: {} ({}/{}, {} waiting)",
            self.id, booth, description, current_count, capacity, waiting_count
        );
        ctx.emit(AppEvent::BoothOffered {
            booth,
            current_count,
            capacity,
            waiting_count,
            description,
            awaiting_decision: !self.config.auto_affirm,
        });

        self.register_retries = 0;
        if self.config.auto_affirm {
            self.send_affirm_and_register(ctx);
        } else {
            self.awaiting = Awaiting::Decision;
        }
    }

    fn on_register_response(&mut self, ctx: &mut NodeContext, success: bool, reason: RegisterReason) {
        let expecting = self.awaiting == Awaiting::Registration
            && matches!(self.state, UserState::Connected | UserState::Waiting);
        if !expecting {
            trace!("User {} ignoring unexpected register response", self.id);
            return;
        }
        if !success && reason == RegisterReason::Success {
            warn!("User {} ignoring contradictory register response", self.id);
            return;
        }
        ctx.stop_timer(TimerKind::Retry);
        self.awaiting = Awaiting::Nothing;
        let booth = self.booth.unwrap_or(NodeId::BROADCAST);

        if success {
            self.session_start = Some(ctx.now());
            self.visits.push(booth);
            self.mark_spent(booth);
            self.queue_position = 0;
            self.queue_total = 0;
            ctx.emit(AppEvent::SessionStarted { booth });
            self.transition(ctx, UserState::InUse);
            return;
        }

        match reason {
            RegisterReason::FullWaiting => {
                self.transition(ctx, UserState::Waiting);
            }
            RegisterReason::AlreadyUsed | RegisterReason::Success => {
                info!("User {} already visited booth {}", self.id, booth);
                self.mark_spent(booth);
                ctx.emit(AppEvent::RegistrationRefused { booth });
                self.return_to_scanning(ctx);
            }
        }
    }

    fn on_queue_position(&mut self, ctx: &mut NodeContext, position: u8, total: u8) {
        if self.state != UserState::Waiting {
            return;
        }
        let booth = self.booth.unwrap_or(NodeId::BROADCAST);
        if position == 0 || total == 0 {
            info!("User {} dropped from booth {} queue", self.id, booth);
            ctx.emit(AppEvent::QueueDropped { booth });
            self.return_to_scanning(ctx);
            return;
        }
        self.queue_position = position;
        self.queue_total = total;
        ctx.emit(AppEvent::QueuePosition {
            booth,
            position,
            total,
        });
    }

    fn on_queue_ready(&mut self, ctx: &mut NodeContext) {
        if self.state != UserState::Waiting {
            return;
        }
        info!("User {} claiming offered slot", self.id);
        self.register_retries = 0;
        self.send_register(ctx);
    }

    /// Frames of a booth exchange are accepted only from the targeted booth
    fn from_target(&self, source: NodeId) -> bool {
        self.booth == Some(source)
    }
}

impl ProtocolFsm for UserFsm {
    fn id(&self) -> NodeId {
        self.id
    }

    fn role(&self) -> Role {
        Role::User
    }

    fn on_start(&mut self, ctx: &mut NodeContext) {
        info!("User {} starting", self.id);
        self.start_scan(ctx);
    }

    fn on_message(&mut self, ctx: &mut NodeContext, inbound: Inbound) {
        let Inbound {
            source,
            message,
            rssi,
            snr,
        } = inbound;

        match message {
            Message::BoothAnnounce(status) => {
                if self.state != UserState::Scanning || !self.scan_open {
                    trace!("User {} ignoring announce from {} outside scan", self.id, source);
                    return;
                }
                if !self.config.is_admin(status.booth_id) {
                    debug!("User {} ignoring announce for unknown booth {}", self.id, status.booth_id);
                    return;
                }
                if self.scan_table.record(status, rssi, snr) {
                    if self.spent.contains(&status.booth_id) {
                        self.scan_table.invalidate(status.booth_id);
                    }
                    ctx.emit(AppEvent::BoothDiscovered {
                        booth: status.booth_id,
                        rssi,
                        status,
                    });
                }
            }
            Message::AdminMessage { text } => {
                ctx.emit(AppEvent::AdminMessage { booth: source, text });
            }
            Message::Chat { sender, text } => {
                ctx.emit(AppEvent::ChatReceived {
                    via: source,
                    sender,
                    text,
                });
            }
            Message::ExitResponse { success } => {
                ctx.emit(AppEvent::ExitConfirmed {
                    booth: source,
                    success,
                });
            }
            message if !self.from_target(source) => {
                debug!(
                    "User {} dropping {:?} from {} (not the targeted booth)",
                    self.id,
                    message.message_type(),
                    source
                );
            }
            Message::BoothInfo {
                current_count,
                capacity,
                waiting_count,
                description,
            } => self.on_booth_info(ctx, current_count, capacity, waiting_count, description),
            Message::RegisterResponse { success, reason } => {
                self.on_register_response(ctx, success, reason)
            }
            Message::QueueInfo { position, total } | Message::QueueUpdate { position, total } => {
                self.on_queue_position(ctx, position, total)
            }
            Message::QueueReady => self.on_queue_ready(ctx),
            Message::TimeoutAlert => {
                if self.state == UserState::InUse {
                    self.end_session(ctx, SessionEndReason::TimedOut);
                }
            }
            other => trace!("User {} ignoring {:?}", self.id, other.message_type()),
        }
    }

    fn on_timer(&mut self, ctx: &mut NodeContext, kind: TimerKind) {
        match kind {
            TimerKind::BoothSelection => self.on_selection_timeout(ctx),
            TimerKind::Retry => self.on_retry_timeout(ctx),
        }
    }

    fn on_intent(&mut self, ctx: &mut NodeContext, intent: Intent) {
        match (intent, self.state) {
            (Intent::Affirm, UserState::Connected) if self.awaiting == Awaiting::Decision => {
                self.send_affirm_and_register(ctx);
            }
            (Intent::Decline, UserState::Connected) => {
                info!("User {} declined booth", self.id);
                self.send_to_booth(ctx, Message::UserResponse { accept: false });
                self.return_to_scanning(ctx);
            }
            (Intent::Exit, UserState::InUse) => {
                self.send_to_booth(ctx, Message::ExitRequest);
                self.end_session(ctx, SessionEndReason::Exited);
            }
            (Intent::LeaveQueue, UserState::Waiting) => {
                info!("User {} leaving queue", self.id);
                self.send_to_booth(ctx, Message::QueueLeave);
                self.return_to_scanning(ctx);
            }
            (Intent::Chat(text), UserState::InUse) => {
                self.send_to_booth(ctx, Message::Chat { sender: None, text });
            }
            (Intent::Status, _) => ctx.emit(AppEvent::Status(self.snapshot())),
            (intent, state) => {
                debug!("User {} ignoring {:?} in {}", self.id, intent, state);
            }
        }
    }

    fn on_tick(&mut self, ctx: &mut NodeContext) {
        match self.state {
            UserState::Scanning => {
                let due = ctx.tick().saturating_sub(self.last_scan_tick)
                    >= self.config.scan_interval_ticks;
                if !self.scan_open && due {
                    self.start_scan(ctx);
                }
            }
            UserState::InUse => {
                let expired = self.session_start.map_or(false, |start| {
                    ctx.now().duration_since(start) >= self.config.client_session_limit()
                });
                if expired {
                    warn!("User {} session expired without alert, leaving", self.id);
                    self.send_to_booth(ctx, Message::ExitRequest);
                    self.end_session(ctx, SessionEndReason::ForcedExpiry);
                }
            }
            UserState::Connected | UserState::Waiting => {}
        }
    }

    fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot::User(UserSnapshot {
            id: self.id,
            state: self.state,
            booth: self.booth,
            queue_position: self.queue_position,
            queue_total: self.queue_total,
            session_start: self.session_start,
            visits: self.visits.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventRegister;
    use crate::message::BoothStatus;
    use core::time::Duration;

    fn setup() -> (UserFsm, NodeContext) {
        let mut fsm = UserFsm::new(NodeId::new(7), ProtocolConfig::testing());
        let mut ctx = NodeContext::new(EventRegister::new());
        fsm.on_start(&mut ctx);
        (fsm, ctx)
    }

    fn announce(booth: u8, current: u8, waiting: u8, rssi: i16) -> Inbound {
        Inbound {
            source: NodeId::new(booth),
            message: Message::BoothAnnounce(BoothStatus {
                booth_id: NodeId::new(booth),
                current_count: current,
                capacity: 2,
                waiting_count: waiting,
            }),
            rssi,
            snr: 5,
        }
    }

    fn from(booth: u8, message: Message) -> Inbound {
        Inbound {
            source: NodeId::new(booth),
            message,
            rssi: -50,
            snr: 5,
        }
    }

    fn sent(ctx: &mut NodeContext) -> Vec<Message> {
        ctx.take_outbox().into_iter().map(|out| out.message).collect()
    }

    fn connect_to(fsm: &mut UserFsm, ctx: &mut NodeContext, booth: u8) {
        fsm.on_message(ctx, announce(booth, 0, 0, -50));
        fsm.on_timer(ctx, TimerKind::BoothSelection);
        ctx.take_outbox();
    }

    #[test]
    fn test_start_scans_every_admin() {
        let (fsm, mut ctx) = setup();
        let outbox = ctx.take_outbox();
        assert_eq!(outbox.len(), 3);
        assert!(outbox.iter().all(|out| out.message == Message::BoothScan));
        assert!(fsm.is_scan_open());
    }

    #[test]
    fn test_announce_outside_admin_range_is_ignored() {
        let (mut fsm, mut ctx) = setup();
        fsm.on_message(&mut ctx, announce(9, 0, 0, -30));
        assert!(fsm.scan_table().is_empty());
    }

    #[test]
    fn test_empty_scan_stays_scanning() {
        let (mut fsm, mut ctx) = setup();
        fsm.on_timer(&mut ctx, TimerKind::BoothSelection);
        assert_eq!(fsm.state(), UserState::Scanning);
        assert!(!fsm.is_scan_open());
        assert!(ctx.take_app_events().contains(&AppEvent::NoBoothFound));
    }

    #[test]
    fn test_selection_connects_to_best_booth() {
        let (mut fsm, mut ctx) = setup();
        ctx.take_outbox();
        fsm.on_message(&mut ctx, announce(1, 2, 2, -45));
        fsm.on_message(&mut ctx, announce(2, 0, 0, -70));
        fsm.on_timer(&mut ctx, TimerKind::BoothSelection);

        assert_eq!(fsm.state(), UserState::Connected);
        assert_eq!(fsm.booth(), Some(NodeId::new(2)));
        let outbox = ctx.take_outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].dest, NodeId::new(2));
        assert_eq!(outbox[0].message, Message::ConnectRequest);
    }

    #[test]
    fn test_booth_info_auto_affirms() {
        let (mut fsm, mut ctx) = setup();
        connect_to(&mut fsm, &mut ctx, 1);
        fsm.on_message(
            &mut ctx,
            from(
                1,
                Message::BoothInfo {
                    current_count: 0,
                    capacity: 2,
                    waiting_count: 0,
                    description: "Booth 1".to_string(),
                },
            ),
        );
        assert_eq!(
            sent(&mut ctx),
            vec![
                Message::UserResponse { accept: true },
                Message::RegisterRequest
            ]
        );
    }

    #[test]
    fn test_frames_from_other_booths_are_dropped() {
        let (mut fsm, mut ctx) = setup();
        connect_to(&mut fsm, &mut ctx, 1);
        fsm.on_message(
            &mut ctx,
            from(
                2,
                Message::RegisterResponse {
                    success: true,
                    reason: RegisterReason::Success,
                },
            ),
        );
        assert_eq!(fsm.state(), UserState::Connected);
    }

    #[test]
    fn test_register_outcomes() {
        let (mut fsm, mut ctx) = setup();
        connect_to(&mut fsm, &mut ctx, 1);
        fsm.awaiting = Awaiting::Registration;
        fsm.on_message(
            &mut ctx,
            from(
                1,
                Message::RegisterResponse {
                    success: false,
                    reason: RegisterReason::AlreadyUsed,
                },
            ),
        );
        assert_eq!(fsm.state(), UserState::Scanning);
        assert_eq!(fsm.booth(), None);

        let (mut fsm, mut ctx) = setup();
        connect_to(&mut fsm, &mut ctx, 1);
        fsm.awaiting = Awaiting::Registration;
        fsm.on_message(
            &mut ctx,
            from(
                1,
                Message::RegisterResponse {
                    success: false,
                    reason: RegisterReason::FullWaiting,
                },
            ),
        );
        assert_eq!(fsm.state(), UserState::Waiting);
        fsm.on_message(&mut ctx, from(1, Message::QueueInfo { position: 2, total: 3 }));
        assert_eq!(fsm.queue_position(), (2, 3));
    }

    #[test]
    fn test_forced_expiry_sends_exit() {
        let (mut fsm, mut ctx) = setup();
        connect_to(&mut fsm, &mut ctx, 1);
        fsm.awaiting = Awaiting::Registration;
        fsm.on_message(
            &mut ctx,
            from(
                1,
                Message::RegisterResponse {
                    success: true,
                    reason: RegisterReason::Success,
                },
            ),
        );
        assert_eq!(fsm.state(), UserState::InUse);

        let limit = fsm.config.client_session_limit();
        ctx.advance(Timestamp::ZERO + (limit - Duration::from_millis(1)));
        fsm.on_tick(&mut ctx);
        assert_eq!(fsm.state(), UserState::InUse);

        ctx.advance(Timestamp::ZERO + limit);
        fsm.on_tick(&mut ctx);
        assert_eq!(fsm.state(), UserState::Scanning);
        assert_eq!(sent(&mut ctx), vec![Message::ExitRequest]);
        assert!(ctx.take_app_events().contains(&AppEvent::SessionEnded {
            booth: NodeId::new(1),
            reason: SessionEndReason::ForcedExpiry,
        }));
    }

    #[test]
    fn test_decline_returns_to_scanning() {
        let config = ProtocolConfig {
            auto_affirm: false,
            ..ProtocolConfig::testing()
        };
        let mut fsm = UserFsm::new(NodeId::new(7), config);
        let mut ctx = NodeContext::new(EventRegister::new());
        fsm.on_start(&mut ctx);
        connect_to(&mut fsm, &mut ctx, 1);
        fsm.on_message(
            &mut ctx,
            from(
                1,
                Message::BoothInfo {
                    current_count: 0,
                    capacity: 2,
                    waiting_count: 0,
                    description: "Booth 1".to_string(),
                },
            ),
        );
        assert!(ctx.take_outbox().is_empty());

        fsm.on_intent(&mut ctx, Intent::Decline);
        assert_eq!(fsm.state(), UserState::Scanning);
        assert_eq!(sent(&mut ctx), vec![Message::UserResponse { accept: false }]);
    }
}
