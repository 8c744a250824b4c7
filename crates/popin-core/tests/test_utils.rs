//! Test utilities for deterministic testing of the Pop-in protocol
//!
//! Nodes run on a [`ManualTimeSource`] and send through a [`RecordingLink`],
//! so tests decide exactly when time passes and which frames arrive.

use core::time::Duration;
use popin_core::{
    AdminSnapshot, AppEvent, InboxHandle, Intent, LinkLayer, ManualTimeSource, Message, NodeId,
    NodeSnapshot, ProtocolConfig, ReceivedFrame, Result as PopinResult, Role, Scheduler,
    UserSnapshot, UserState,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// ----------------------------------------------------------------------------
// Recording Link
// ----------------------------------------------------------------------------

/// A frame handed to the link by a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub source: NodeId,
    pub dest: NodeId,
    pub payload: Vec<u8>,
}

/// Link that records every frame instead of transmitting it
#[derive(Debug, Clone)]
pub struct RecordingLink {
    source: NodeId,
    sent: Arc<Mutex<Vec<SentFrame>>>,
}

impl RecordingLink {
    pub fn new(source: NodeId) -> Self {
        Self {
            source,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Take every frame recorded so far
    pub fn take(&self) -> Vec<SentFrame> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl LinkLayer for RecordingLink {
    fn send(&mut self, payload: &[u8], dest: NodeId) -> PopinResult<()> {
        self.sent.lock().unwrap().push(SentFrame {
            source: self.source,
            dest,
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Node Harness
// ----------------------------------------------------------------------------

/// One scheduler plus the handles needed to drive it from a test
pub struct NodeHarness {
    pub scheduler: Scheduler<RecordingLink, ManualTimeSource>,
    pub clock: ManualTimeSource,
    link: RecordingLink,
    handle: InboxHandle,
    events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl NodeHarness {
    pub fn new(id: u8, config: ProtocolConfig) -> Self {
        Self::with_clock(id, config, ManualTimeSource::new())
    }

    pub fn with_clock(id: u8, config: ProtocolConfig, clock: ManualTimeSource) -> Self {
        let id = NodeId::new(id);
        let link = RecordingLink::new(id);
        let scheduler = Scheduler::new(id, config, link.clone(), clock.clone())
            .expect("valid test configuration");
        let handle = scheduler.handle();
        Self {
            scheduler,
            clock,
            link,
            handle,
            events: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.scheduler.id()
    }

    pub fn config(&self) -> &ProtocolConfig {
        self.scheduler.config()
    }

    /// Run one tick without moving the clock
    pub fn step(&mut self) {
        self.scheduler.run_step();
        self.events.extend(self.scheduler.drain_app_events());
    }

    /// Move the clock forward and run one tick
    pub fn advance(&mut self, duration: Duration) {
        self.clock.advance(duration);
        self.step();
    }

    pub fn advance_ms(&mut self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Deliver `message` from `source` and run one tick
    pub fn receive(&mut self, source: u8, message: Message) {
        self.receive_with_rssi(source, message, -60);
    }

    pub fn receive_with_rssi(&mut self, source: u8, message: Message, rssi: i16) {
        self.handle.deliver(ReceivedFrame::new(
            NodeId::new(source),
            message.encode(),
            rssi,
            8,
        ));
        self.step();
    }

    /// Deliver raw bytes from `source` and run one tick
    pub fn receive_raw(&mut self, source: u8, payload: Vec<u8>) {
        self.handle
            .deliver(ReceivedFrame::new(NodeId::new(source), payload, -60, 8));
        self.step();
    }

    pub fn intent(&mut self, intent: Intent) {
        self.handle.submit_intent(intent);
        self.step();
    }

    /// Raw frames sent since the last call
    pub fn take_frames(&mut self) -> Vec<SentFrame> {
        self.link.take()
    }

    /// Decoded messages sent since the last call, with their destination
    pub fn take_sent(&mut self) -> Vec<(u8, Message)> {
        let role = self.scheduler.role();
        self.link
            .take()
            .into_iter()
            .map(|frame| {
                let message =
                    Message::decode(&frame.payload, role).expect("node sent a valid frame");
                (frame.dest.value(), message)
            })
            .collect()
    }

    /// Decoded messages sent to `dest` since the last call (others discarded)
    pub fn take_sent_to(&mut self, dest: u8) -> Vec<Message> {
        self.take_sent()
            .into_iter()
            .filter(|(to, _)| *to == dest)
            .map(|(_, message)| message)
            .collect()
    }

    pub fn take_events(&mut self) -> Vec<AppEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn admin(&self) -> AdminSnapshot {
        match self.scheduler.snapshot() {
            NodeSnapshot::Admin(snapshot) => snapshot,
            other => panic!("expected an admin, got {:?}", other),
        }
    }

    pub fn user(&self) -> UserSnapshot {
        match self.scheduler.snapshot() {
            NodeSnapshot::User(snapshot) => snapshot,
            other => panic!("expected a user, got {:?}", other),
        }
    }

    pub fn user_state(&self) -> UserState {
        self.user().state
    }
}

// ----------------------------------------------------------------------------
// Test Network
// ----------------------------------------------------------------------------

/// Several nodes on one clock, with frames routed between ticks
pub struct TestNetwork {
    pub clock: ManualTimeSource,
    pub nodes: Vec<NodeHarness>,
    rssi: HashMap<(u8, u8), i16>,
    default_rssi: i16,
}

#[allow(dead_code)]
impl TestNetwork {
    pub fn new(config: ProtocolConfig, ids: impl IntoIterator<Item = u8>) -> Self {
        let clock = ManualTimeSource::new();
        let nodes = ids
            .into_iter()
            .map(|id| NodeHarness::with_clock(id, config.clone(), clock.clone()))
            .collect();
        Self {
            clock,
            nodes,
            rssi: HashMap::new(),
            default_rssi: -80,
        }
    }

    /// Signal strength between `a` and `b`, in both directions
    pub fn set_rssi(&mut self, a: u8, b: u8, rssi: i16) {
        self.rssi.insert((a, b), rssi);
        self.rssi.insert((b, a), rssi);
    }

    pub fn node(&self, id: u8) -> &NodeHarness {
        self.nodes
            .iter()
            .find(|node| node.id().value() == id)
            .expect("node exists")
    }

    pub fn node_mut(&mut self, id: u8) -> &mut NodeHarness {
        self.nodes
            .iter_mut()
            .find(|node| node.id().value() == id)
            .expect("node exists")
    }

    /// Advance the clock, tick every node, then route the frames they sent
    pub fn step(&mut self, duration: Duration) {
        self.clock.advance(duration);
        for node in &mut self.nodes {
            node.step();
        }
        self.route();
    }

    pub fn run_for(&mut self, total: Duration, step: Duration) {
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            self.step(step);
            elapsed += step;
        }
    }

    fn route(&mut self) {
        let frames: Vec<SentFrame> = self
            .nodes
            .iter_mut()
            .flat_map(|node| node.take_frames())
            .collect();

        for frame in frames {
            for node in &self.nodes {
                let id = node.id();
                let addressed = id == frame.dest || (frame.dest.is_broadcast() && id != frame.source);
                if !addressed {
                    continue;
                }
                let rssi = self
                    .rssi
                    .get(&(frame.source.value(), id.value()))
                    .copied()
                    .unwrap_or(self.default_rssi);
                node.handle.deliver(ReceivedFrame::new(
                    frame.source,
                    frame.payload.clone(),
                    rssi,
                    8,
                ));
            }
        }
    }

    pub fn admins(&self) -> impl Iterator<Item = &NodeHarness> {
        self.nodes
            .iter()
            .filter(|node| node.scheduler.role() == Role::Admin)
    }

    pub fn users(&self) -> impl Iterator<Item = &NodeHarness> {
        self.nodes
            .iter()
            .filter(|node| node.scheduler.role() == Role::User)
    }
}
