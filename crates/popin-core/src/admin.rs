//! Admin-side protocol state machine
//!
//! The admin has a single resting state: it answers scans, connects,
//! registrations, exits and queue leaves, relays chat between active users,
//! and runs the periodic session and queue-ready sweeps.

use crate::admission::{
    admit_next, evaluate_registration, leave_queue, queue_updates, sweep_queue_ready,
    sweep_sessions, RegistrationOutcome,
};
use crate::config::ProtocolConfig;
use crate::link::Intent;
use crate::message::{Message, RegisterReason};
use crate::node::{AdminSnapshot, AppEvent, Inbound, NodeContext, NodeSnapshot, ProtocolFsm};
use crate::registry::Booth;
use crate::timer::TimerKind;
use crate::types::{NodeId, Role};

#[cfg(not(feature = "std"))]
use log::{debug, info, trace, warn};
#[cfg(feature = "std")]
use tracing::{debug, info, trace, warn};

/// Protocol state of a booth admin
#[derive(Debug, Clone)]
pub struct AdminFsm {
    config: ProtocolConfig,
    booth: Booth,
    broadcast_enabled: bool,
}

impl AdminFsm {
    pub fn new(id: NodeId, config: ProtocolConfig) -> Self {
        let booth = Booth::new(id, &config);
        let broadcast_enabled = config.broadcast_enabled;
        Self {
            config,
            booth,
            broadcast_enabled,
        }
    }

    pub fn booth(&self) -> &Booth {
        &self.booth
    }

    pub fn broadcast_enabled(&self) -> bool {
        self.broadcast_enabled
    }

    fn announce(&self, ctx: &mut NodeContext, dest: NodeId) {
        ctx.send(dest, Message::BoothAnnounce(self.booth.status()));
    }

    fn send_queue_updates(&self, ctx: &mut NodeContext) {
        for (user, update) in queue_updates(&self.booth) {
            ctx.send(user, update);
        }
    }

    /// Offer a freed slot to the queue head, if allowed
    fn try_admit_next(&mut self, ctx: &mut NodeContext) {
        if let Some(user) = admit_next(&mut self.booth, ctx.now()) {
            info!("Booth {} offering slot to user {}", self.booth.id(), user);
            ctx.send(user, Message::QueueReady);
            ctx.emit(AppEvent::OfferSent { user });
        }
    }

    // ------------------------------------------------------------------------
    // Request Handlers
    // ------------------------------------------------------------------------

    fn handle_register(&mut self, ctx: &mut NodeContext, user: NodeId) {
        let booth_id = self.booth.id();
        match evaluate_registration(&mut self.booth, user, ctx.now()) {
            RegistrationOutcome::Admitted { left_queue } => {
                info!("Booth {} admitted user {}", booth_id, user);
                ctx.send(
                    user,
                    Message::RegisterResponse {
                        success: true,
                        reason: RegisterReason::Success,
                    },
                );
                ctx.emit(AppEvent::UserAdmitted { user });
                if left_queue {
                    self.send_queue_updates(ctx);
                    self.try_admit_next(ctx);
                }
            }
            RegistrationOutcome::AlreadyActive => {
                debug!("Booth {} re-confirming active user {}", booth_id, user);
                ctx.send(
                    user,
                    Message::RegisterResponse {
                        success: true,
                        reason: RegisterReason::Success,
                    },
                );
            }
            RegistrationOutcome::AlreadyUsed => {
                info!("Booth {} refused user {} (already used)", booth_id, user);
                ctx.send(
                    user,
                    Message::RegisterResponse {
                        success: false,
                        reason: RegisterReason::AlreadyUsed,
                    },
                );
                ctx.emit(AppEvent::UserRefused { user });
            }
            RegistrationOutcome::Queued { position, total } => {
                let position = clamp(position);
                let total = clamp(total);
                info!(
                    "Booth {} queued user {} at {}/{}",
                    booth_id, user, position, total
                );
                ctx.send(
                    user,
                    Message::RegisterResponse {
                        success: false,
                        reason: RegisterReason::FullWaiting,
                    },
                );
                ctx.send(user, Message::QueueInfo { position, total });
                ctx.emit(AppEvent::UserQueued {
                    user,
                    position,
                    total,
                });
            }
            RegistrationOutcome::Rejected(err) => {
                warn!("Booth {} dropped registration from {}: {}", booth_id, user, err);
            }
        }
    }

    fn handle_exit(&mut self, ctx: &mut NodeContext, user: NodeId) {
        if self.booth.remove_active(user).is_none() {
            debug!("Booth {} exit from inactive user {}", self.booth.id(), user);
            ctx.send(user, Message::ExitResponse { success: false });
            return;
        }
        info!("Booth {} user {} exited", self.booth.id(), user);
        ctx.send(user, Message::ExitResponse { success: true });
        ctx.emit(AppEvent::UserExited { user });
        self.try_admit_next(ctx);
    }

    fn handle_queue_leave(&mut self, ctx: &mut NodeContext, user: NodeId) {
        let outcome = leave_queue(&mut self.booth, user);
        if outcome.removed {
            info!("Booth {} user {} left the queue", self.booth.id(), user);
            self.send_queue_updates(ctx);
        }
        if outcome.offer_released {
            self.try_admit_next(ctx);
        }
    }

    fn relay_chat(&mut self, ctx: &mut NodeContext, sender: NodeId, text: String) {
        if !self.booth.is_active(sender) {
            warn!("Booth {} rejected chat from inactive user {}", self.booth.id(), sender);
            return;
        }
        let recipients: Vec<NodeId> = self
            .booth
            .active_users()
            .iter()
            .map(|entry| entry.id)
            .filter(|&id| id != sender)
            .collect();
        for user in recipients {
            ctx.send(
                user,
                Message::Chat {
                    sender: Some(sender),
                    text: text.clone(),
                },
            );
        }
        ctx.emit(AppEvent::ChatReceived {
            via: sender,
            sender: Some(sender),
            text,
        });
    }

    // ------------------------------------------------------------------------
    // Sweeps
    // ------------------------------------------------------------------------

    fn sweep(&mut self, ctx: &mut NodeContext) {
        let expired = sweep_sessions(&mut self.booth, ctx.now(), self.config.session_duration());
        for user in &expired {
            info!("Booth {} session of user {} timed out", self.booth.id(), user);
            ctx.send(*user, Message::TimeoutAlert);
            ctx.emit(AppEvent::SessionExpired { user: *user });
        }

        if let Some(user) =
            sweep_queue_ready(&mut self.booth, ctx.now(), self.config.queue_ready_timeout())
        {
            info!("Booth {} offer to user {} expired", self.booth.id(), user);
            ctx.send(
                user,
                Message::QueueUpdate {
                    position: 0,
                    total: 0,
                },
            );
            ctx.emit(AppEvent::OfferExpired { user });
            self.send_queue_updates(ctx);
        }

        // Slots freed while an offer was outstanding
        self.try_admit_next(ctx);
    }
}

impl ProtocolFsm for AdminFsm {
    fn id(&self) -> NodeId {
        self.booth.id()
    }

    fn role(&self) -> Role {
        Role::Admin
    }

    fn on_start(&mut self, ctx: &mut NodeContext) {
        info!(
            "Booth {} open: {} (capacity {})",
            self.booth.id(),
            self.booth.description(),
            self.booth.capacity()
        );
        self.announce(ctx, NodeId::BROADCAST);
    }

    fn on_message(&mut self, ctx: &mut NodeContext, inbound: Inbound) {
        let source = inbound.source;
        if self.config.is_admin(source) {
            trace!("Booth {} ignoring frame from admin {}", self.booth.id(), source);
            return;
        }

        match inbound.message {
            Message::BoothScan => {
                trace!("Booth {} answering scan from {}", self.booth.id(), source);
                self.announce(ctx, source);
            }
            Message::ConnectRequest => {
                let status = self.booth.status();
                ctx.send(
                    source,
                    Message::BoothInfo {
                        current_count: status.current_count,
                        capacity: status.capacity,
                        waiting_count: status.waiting_count,
                        description: self.booth.description().to_string(),
                    },
                );
            }
            Message::UserResponse { accept } => {
                info!(
                    "Booth {} user {} answered {}",
                    self.booth.id(),
                    source,
                    if accept { "yes" } else { "no" }
                );
            }
            Message::RegisterRequest => self.handle_register(ctx, source),
            Message::ExitRequest => self.handle_exit(ctx, source),
            Message::QueueLeave => self.handle_queue_leave(ctx, source),
            Message::Chat { text, .. } => self.relay_chat(ctx, source, text),
            other => trace!(
                "Booth {} ignoring {:?} from {}",
                self.booth.id(),
                other.message_type(),
                source
            ),
        }
    }

    fn on_timer(&mut self, _ctx: &mut NodeContext, kind: TimerKind) {
        trace!("Booth {} ignoring {:?} timer", self.booth.id(), kind);
    }

    fn on_intent(&mut self, ctx: &mut NodeContext, intent: Intent) {
        match intent {
            Intent::Announce(text) => {
                info!("Booth {} broadcasting admin message", self.booth.id());
                ctx.send(NodeId::BROADCAST, Message::AdminMessage { text });
            }
            Intent::Chat(text) => {
                let users: Vec<NodeId> =
                    self.booth.active_users().iter().map(|entry| entry.id).collect();
                for user in users {
                    ctx.send(user, Message::AdminMessage { text: text.clone() });
                }
            }
            Intent::ToggleBroadcast => {
                self.broadcast_enabled = !self.broadcast_enabled;
                info!(
                    "Booth {} periodic broadcast {}",
                    self.booth.id(),
                    if self.broadcast_enabled { "on" } else { "off" }
                );
                ctx.emit(AppEvent::BroadcastToggled {
                    enabled: self.broadcast_enabled,
                });
            }
            Intent::Status => ctx.emit(AppEvent::Status(self.snapshot())),
            other => debug!("Booth {} ignoring {:?}", self.booth.id(), other),
        }
    }

    fn on_tick(&mut self, ctx: &mut NodeContext) {
        let tick = ctx.tick();
        if tick % self.config.sweep_interval_ticks == 0 {
            self.sweep(ctx);
        }
        if self.broadcast_enabled && tick % self.config.broadcast_interval_ticks == 0 {
            trace!("Booth {} periodic announce", self.booth.id());
            self.announce(ctx, NodeId::BROADCAST);
        }
    }

    fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot::Admin(AdminSnapshot {
            id: self.booth.id(),
            status: self.booth.status(),
            description: self.booth.description().to_string(),
            active: self.booth.active_users().iter().map(|entry| entry.id).collect(),
            waiting: self.booth.waiting_queue().collect(),
            registered: self.booth.registered_users().to_vec(),
            pending_offer: self.booth.pending_offer().map(|offer| offer.user),
            broadcast_enabled: self.broadcast_enabled,
        })
    }
}

fn clamp(value: usize) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventRegister;
    use crate::types::Timestamp;
    use core::time::Duration;

    fn setup() -> (AdminFsm, NodeContext) {
        let fsm = AdminFsm::new(NodeId::new(1), ProtocolConfig::testing());
        let ctx = NodeContext::new(EventRegister::new());
        (fsm, ctx)
    }

    fn from(user: u8, message: Message) -> Inbound {
        Inbound {
            source: NodeId::new(user),
            message,
            rssi: -50,
            snr: 5,
        }
    }

    fn sent(ctx: &mut NodeContext) -> Vec<(u8, Message)> {
        ctx.take_outbox()
            .into_iter()
            .map(|out| (out.dest.value(), out.message))
            .collect()
    }

    #[test]
    fn test_start_broadcasts_announce() {
        let (mut fsm, mut ctx) = setup();
        fsm.on_start(&mut ctx);
        let outbox = sent(&mut ctx);
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].0, 255);
        assert!(matches!(outbox[0].1, Message::BoothAnnounce(_)));
    }

    #[test]
    fn test_connect_replies_with_info() {
        let (mut fsm, mut ctx) = setup();
        fsm.on_message(&mut ctx, from(4, Message::ConnectRequest));
        assert_eq!(
            sent(&mut ctx),
            vec![(
                4,
                Message::BoothInfo {
                    current_count: 0,
                    capacity: 2,
                    waiting_count: 0,
                    description: "Booth 1 - Pop-up Store Experience".to_string(),
                }
            )]
        );
    }

    #[test]
    fn test_full_booth_queues_with_info() {
        let (mut fsm, mut ctx) = setup();
        fsm.on_message(&mut ctx, from(4, Message::RegisterRequest));
        fsm.on_message(&mut ctx, from(5, Message::RegisterRequest));
        ctx.take_outbox();

        fsm.on_message(&mut ctx, from(6, Message::RegisterRequest));
        assert_eq!(
            sent(&mut ctx),
            vec![
                (
                    6,
                    Message::RegisterResponse {
                        success: false,
                        reason: RegisterReason::FullWaiting
                    }
                ),
                (6, Message::QueueInfo { position: 1, total: 1 }),
            ]
        );
    }

    #[test]
    fn test_chat_relayed_only_from_active_users() {
        let (mut fsm, mut ctx) = setup();
        fsm.on_message(&mut ctx, from(4, Message::RegisterRequest));
        fsm.on_message(&mut ctx, from(5, Message::RegisterRequest));
        ctx.take_outbox();

        let chat = Message::Chat {
            sender: None,
            text: "hello".to_string(),
        };
        fsm.on_message(&mut ctx, from(9, chat.clone()));
        assert!(sent(&mut ctx).is_empty());

        fsm.on_message(&mut ctx, from(4, chat));
        assert_eq!(
            sent(&mut ctx),
            vec![(
                5,
                Message::Chat {
                    sender: Some(NodeId::new(4)),
                    text: "hello".to_string()
                }
            )]
        );
    }

    #[test]
    fn test_exit_from_inactive_user_is_refused() {
        let (mut fsm, mut ctx) = setup();
        fsm.on_message(&mut ctx, from(4, Message::ExitRequest));
        assert_eq!(sent(&mut ctx), vec![(4, Message::ExitResponse { success: false })]);
    }

    #[test]
    fn test_session_sweep_alerts_expired_users() {
        let (mut fsm, mut ctx) = setup();
        fsm.on_message(&mut ctx, from(4, Message::RegisterRequest));
        ctx.take_outbox();

        ctx.advance(Timestamp::ZERO + Duration::from_millis(fsm.config.session_duration_ms));
        fsm.on_tick(&mut ctx);
        let outbox = sent(&mut ctx);
        assert!(outbox.contains(&(4, Message::TimeoutAlert)));
        assert_eq!(fsm.booth().active_count(), 0);
        assert!(fsm.booth().is_registered(NodeId::new(4)));
    }

    #[test]
    fn test_frames_from_admins_are_ignored() {
        let (mut fsm, mut ctx) = setup();
        fsm.on_message(&mut ctx, from(2, Message::BoothScan));
        assert!(sent(&mut ctx).is_empty());
    }

    #[test]
    fn test_toggle_broadcast() {
        let (mut fsm, mut ctx) = setup();
        assert!(fsm.broadcast_enabled());
        fsm.on_intent(&mut ctx, Intent::ToggleBroadcast);
        assert!(!fsm.broadcast_enabled());
        assert_eq!(
            ctx.take_app_events(),
            vec![AppEvent::BroadcastToggled { enabled: false }]
        );
    }
}
