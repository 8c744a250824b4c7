//! In-process simulation of a booth floor
//!
//! Admins and users share one manual clock and an in-memory radio. Frames sent
//! during a tick reach their receivers before the next tick, stamped with a
//! fixed RSSI per (user, booth) pair drawn from a seeded generator, so a given
//! seed always replays the same run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use popin_core::{
    AppEvent, InboxHandle, LinkLayer, ManualTimeSource, NodeId, NodeSnapshot, PopinError,
    ProtocolConfig, ReceivedFrame, Role, Scheduler, UserState,
};

use crate::console;
use crate::error::{CliError, Result};

/// RSSI used between two admins, which ignore each other anyway
const ADMIN_TO_ADMIN_RSSI: i16 = -100;
/// Weakest and strongest RSSI drawn for a (user, booth) pair
const RSSI_RANGE: core::ops::RangeInclusive<i16> = -95..=-35;
/// SNR stamped on simulated frames
const SIM_SNR: i8 = 8;
/// Frames one peer may address to a node in a single tick (a user can send
/// USER_RESPONSE and REGISTER_REQUEST together; an admin a reply plus queue
/// notices and its announce)
const FRAMES_PER_PEER_PER_TICK: usize = 4;

/// Parameters of one simulation run
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub protocol: ProtocolConfig,
    pub users: u8,
    pub duration: Duration,
    pub tick: Duration,
    pub seed: u64,
}

// ----------------------------------------------------------------------------
// In-Memory Radio
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Transmission {
    source: NodeId,
    dest: NodeId,
    payload: Vec<u8>,
}

type Air = Arc<Mutex<Vec<Transmission>>>;

/// Link that puts frames on the shared air
struct SimLink {
    id: NodeId,
    air: Air,
}

impl LinkLayer for SimLink {
    fn send(&mut self, payload: &[u8], dest: NodeId) -> popin_core::Result<()> {
        let mut air = self
            .air
            .lock()
            .map_err(|_| PopinError::link_error("simulated radio lock poisoned"))?;
        air.push(Transmission {
            source: self.id,
            dest,
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

struct SimNode {
    scheduler: Scheduler<SimLink, ManualTimeSource>,
    handle: InboxHandle,
}

// ----------------------------------------------------------------------------
// Report
// ----------------------------------------------------------------------------

/// Counters for one booth
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoothReport {
    pub id: NodeId,
    pub admitted: u32,
    pub queued: u32,
    pub refused: u32,
    pub exited: u32,
    pub expired: u32,
    pub offers_expired: u32,
    pub served: usize,
    pub active: Vec<NodeId>,
    pub waiting: Vec<NodeId>,
    pub frames_received: u64,
    pub frames_dropped: u64,
}

impl BoothReport {
    fn new(id: NodeId) -> Self {
        Self {
            id,
            admitted: 0,
            queued: 0,
            refused: 0,
            exited: 0,
            expired: 0,
            offers_expired: 0,
            served: 0,
            active: Vec::new(),
            waiting: Vec::new(),
            frames_received: 0,
            frames_dropped: 0,
        }
    }
}

/// Where one user ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserReport {
    pub id: NodeId,
    pub state: UserState,
    pub booth: Option<NodeId>,
    pub visits: Vec<NodeId>,
}

/// Result of a simulation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub seed: u64,
    pub duration_ms: u64,
    pub ticks: u64,
    pub frames_on_air: u64,
    pub booths: Vec<BoothReport>,
    pub users: Vec<UserReport>,
}

impl SimulationReport {
    /// Human-readable summary
    pub fn render_text(&self) -> String {
        let mut out = format!(
            "simulated {} ms ({} ticks, seed {}, {} frames)\n\nbooths:\n",
            self.duration_ms, self.ticks, self.seed, self.frames_on_air
        );
        for booth in &self.booths {
            out.push_str(&format!(
                "  booth {}: served {}, admitted {}, queued {}, refused {}, exited {}, expired {}, offers expired {}, active {:?}, waiting {:?}\n",
                booth.id,
                booth.served,
                booth.admitted,
                booth.queued,
                booth.refused,
                booth.exited,
                booth.expired,
                booth.offers_expired,
                ids(&booth.active),
                ids(&booth.waiting),
            ));
        }
        out.push_str("\nusers:\n");
        for user in &self.users {
            let booth = user
                .booth
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string());
            out.push_str(&format!(
                "  user {}: {} at {}, visited {:?}\n",
                user.id,
                user.state,
                booth,
                ids(&user.visits)
            ));
        }
        out
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn ids(list: &[NodeId]) -> Vec<u8> {
    list.iter().map(|id| id.value()).collect()
}

// ----------------------------------------------------------------------------
// Simulation
// ----------------------------------------------------------------------------

/// A floor of booths and users driven tick by tick
pub struct Simulation {
    config: SimulationConfig,
    clock: ManualTimeSource,
    air: Air,
    nodes: Vec<SimNode>,
    rssi: HashMap<(NodeId, NodeId), i16>,
    booths: HashMap<NodeId, BoothReport>,
    frames_on_air: u64,
    ticks: u64,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        let mut protocol = config.protocol.clone();
        let admin_count = protocol.booth_count();
        let node_count = admin_count + usize::from(config.users);
        let last_id = usize::from(protocol.admin_id_end) + usize::from(config.users);
        if last_id >= usize::from(NodeId::BROADCAST.value()) {
            return Err(CliError::Simulation(format!(
                "{} users do not fit after admin {}",
                config.users, protocol.admin_id_end
            )));
        }
        if config.tick.is_zero() {
            return Err(CliError::Simulation("Tick must be greater than 0".to_string()));
        }

        // Every tick's traffic arrives at once
        let depth = node_count * FRAMES_PER_PEER_PER_TICK;
        if protocol.rx_queue_depth < depth {
            debug!(
                "Raising rx queue depth from {} to {} for simulation",
                protocol.rx_queue_depth, depth
            );
            protocol.rx_queue_depth = depth;
        }

        let clock = ManualTimeSource::new();
        let air: Air = Arc::new(Mutex::new(Vec::new()));
        let mut nodes = Vec::with_capacity(node_count);
        let mut booths = HashMap::new();

        let user_ids = (1..=config.users).map(|n| protocol.admin_id_end + n);
        for id in protocol.admin_ids().chain(user_ids) {
            let id = NodeId::new(id);
            let link = SimLink {
                id,
                air: Arc::clone(&air),
            };
            let scheduler = Scheduler::new(id, protocol.clone(), link, clock.clone())?;
            if scheduler.role() == Role::Admin {
                booths.insert(id, BoothReport::new(id));
            }
            let handle = scheduler.handle();
            nodes.push(SimNode { scheduler, handle });
        }

        let rssi = Self::draw_rssi(&protocol, config.users, config.seed);
        info!(
            "Simulating {} booths and {} users (seed {})",
            admin_count, config.users, config.seed
        );

        Ok(Self {
            config: SimulationConfig {
                protocol,
                ..config
            },
            clock,
            air,
            nodes,
            rssi,
            booths,
            frames_on_air: 0,
            ticks: 0,
        })
    }

    /// Signal strength for every (user, booth) pair, symmetric
    fn draw_rssi(
        protocol: &ProtocolConfig,
        users: u8,
        seed: u64,
    ) -> HashMap<(NodeId, NodeId), i16> {
        let mut rng = fastrand::Rng::with_seed(seed);
        let mut rssi = HashMap::new();
        for user in 1..=users {
            let user = NodeId::new(protocol.admin_id_end + user);
            for booth in protocol.admin_ids().map(NodeId::new) {
                let value = rng.i16(RSSI_RANGE);
                rssi.insert((user, booth), value);
                rssi.insert((booth, user), value);
            }
        }
        rssi
    }

    fn link_rssi(&self, from: NodeId, to: NodeId) -> i16 {
        match self.rssi.get(&(from, to)) {
            Some(value) => *value,
            None if self.config.protocol.is_admin(from) && self.config.protocol.is_admin(to) => {
                ADMIN_TO_ADMIN_RSSI
            }
            // user to user: as good as the weakest draw
            None => *RSSI_RANGE.start(),
        }
    }

    /// Advance the clock by one tick and run every node
    pub fn step(&mut self) -> Result<()> {
        self.clock.advance(self.config.tick);
        self.ticks += 1;

        for node in &mut self.nodes {
            node.scheduler.run_step();
            let id = node.scheduler.id();
            for event in node.scheduler.drain_app_events() {
                debug!("[node {}] {}", id, console::describe(&event));
                if let Some(booth) = self.booths.get_mut(&id) {
                    count_event(booth, &event);
                }
            }
        }

        self.route()
    }

    fn route(&mut self) -> Result<()> {
        let transmissions = {
            let mut air = self
                .air
                .lock()
                .map_err(|_| CliError::Simulation("simulated radio lock poisoned".to_string()))?;
            std::mem::take(&mut *air)
        };
        self.frames_on_air += transmissions.len() as u64;

        for transmission in transmissions {
            for node in &self.nodes {
                let id = node.scheduler.id();
                let addressed = id == transmission.dest
                    || (transmission.dest.is_broadcast() && id != transmission.source);
                if !addressed {
                    continue;
                }
                node.handle.deliver(ReceivedFrame::new(
                    transmission.source,
                    transmission.payload.clone(),
                    self.link_rssi(transmission.source, id),
                    SIM_SNR,
                ));
            }
        }
        Ok(())
    }

    /// Run for the configured duration and build the report
    pub fn run(mut self) -> Result<SimulationReport> {
        let ticks = (self.config.duration.as_millis() / self.config.tick.as_millis().max(1)) as u64;
        for _ in 0..ticks {
            self.step()?;
        }
        Ok(self.report())
    }

    pub fn report(&self) -> SimulationReport {
        let mut booths = Vec::new();
        let mut users = Vec::new();

        for node in &self.nodes {
            let stats = node.scheduler.stats();
            match node.scheduler.snapshot() {
                NodeSnapshot::Admin(admin) => {
                    let mut booth = self
                        .booths
                        .get(&admin.id)
                        .cloned()
                        .unwrap_or_else(|| BoothReport::new(admin.id));
                    booth.served = admin.registered.len();
                    booth.active = admin.active;
                    booth.waiting = admin.waiting;
                    booth.frames_received = stats.frames_received;
                    booth.frames_dropped = stats.frames_dropped;
                    booths.push(booth);
                }
                NodeSnapshot::User(user) => users.push(UserReport {
                    id: user.id,
                    state: user.state,
                    booth: user.booth,
                    visits: user.visits,
                }),
            }
        }

        SimulationReport {
            seed: self.config.seed,
            duration_ms: self.ticks * self.config.tick.as_millis() as u64,
            ticks: self.ticks,
            frames_on_air: self.frames_on_air,
            booths,
            users,
        }
    }
}

fn count_event(booth: &mut BoothReport, event: &AppEvent) {
    match event {
        AppEvent::UserAdmitted { .. } => booth.admitted += 1,
        AppEvent::UserQueued { .. } => booth.queued += 1,
        AppEvent::UserRefused { .. } => booth.refused += 1,
        AppEvent::UserExited { .. } => booth.exited += 1,
        AppEvent::SessionExpired { .. } => booth.expired += 1,
        AppEvent::OfferExpired { .. } => booth.offers_expired += 1,
        _ => {}
    }
}
