//! Booth registry: the admin-side data model
//!
//! A [`Booth`] tracks who is inside, who has ever been admitted, who is
//! waiting and which waiter currently holds an admission offer. The registry
//! enforces its list limits; admission policy lives in
//! [`crate::admission`].

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::ProtocolConfig;
use crate::errors::RegistryError;
use crate::message::BoothStatus;
use crate::types::{NodeId, Timestamp};

/// A user currently inside the booth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveUser {
    pub id: NodeId,
    pub session_start: Timestamp,
}

/// The outstanding "your turn" notification sent to the queue head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionOffer {
    pub user: NodeId,
    pub offered_at: Timestamp,
}

/// State of one booth
#[derive(Debug, Clone)]
pub struct Booth {
    id: NodeId,
    capacity: usize,
    max_users: usize,
    description: String,
    active: Vec<ActiveUser>,
    registered: HashSet<NodeId>,
    registration_order: Vec<NodeId>,
    waiting: VecDeque<NodeId>,
    pending_offer: Option<AdmissionOffer>,
}

impl Booth {
    pub fn new(id: NodeId, config: &ProtocolConfig) -> Self {
        Self::with_limits(
            id,
            config.booth_capacity,
            config.max_users,
            config.description_for(id),
        )
    }

    pub fn with_limits(id: NodeId, capacity: usize, max_users: usize, description: String) -> Self {
        Self {
            id,
            capacity,
            max_users,
            description,
            active: Vec::with_capacity(capacity),
            registered: HashSet::new(),
            registration_order: Vec::new(),
            waiting: VecDeque::new(),
            pending_offer: None,
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_users(&self) -> usize {
        self.max_users
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn active_users(&self) -> &[ActiveUser] {
        &self.active
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn has_free_slot(&self) -> bool {
        self.active.len() < self.capacity
    }

    pub fn is_active(&self, user: NodeId) -> bool {
        self.active.iter().any(|entry| entry.id == user)
    }

    pub fn session_start(&self, user: NodeId) -> Option<Timestamp> {
        self.active
            .iter()
            .find(|entry| entry.id == user)
            .map(|entry| entry.session_start)
    }

    /// Users ever admitted, in admission order
    pub fn registered_users(&self) -> &[NodeId] {
        &self.registration_order
    }

    pub fn is_registered(&self, user: NodeId) -> bool {
        self.registered.contains(&user)
    }

    pub fn waiting_queue(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.waiting.iter().copied()
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_waiting(&self, user: NodeId) -> bool {
        self.waiting.contains(&user)
    }

    /// 1-based position of `user` in the waiting queue
    pub fn queue_position(&self, user: NodeId) -> Option<usize> {
        self.waiting
            .iter()
            .position(|&id| id == user)
            .map(|index| index + 1)
    }

    pub fn waiting_head(&self) -> Option<NodeId> {
        self.waiting.front().copied()
    }

    pub fn pending_offer(&self) -> Option<AdmissionOffer> {
        self.pending_offer
    }

    /// Occupancy summary for BOOTH_ANNOUNCE
    pub fn status(&self) -> BoothStatus {
        BoothStatus {
            booth_id: self.id,
            current_count: saturate(self.active.len()),
            capacity: saturate(self.capacity),
            waiting_count: saturate(self.waiting.len()),
        }
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    /// Record `user` as ever admitted; returns `false` if already recorded
    pub fn record_registration(&mut self, user: NodeId) -> Result<bool, RegistryError> {
        if self.registered.contains(&user) {
            return Ok(false);
        }
        if self.registration_order.len() >= self.max_users {
            return Err(RegistryError::RegisteredListFull {
                limit: self.max_users,
            });
        }
        self.registered.insert(user);
        self.registration_order.push(user);
        Ok(true)
    }

    /// Place `user` inside the booth with a fresh session start
    pub fn add_active(&mut self, user: NodeId, now: Timestamp) -> Result<(), RegistryError> {
        if self.is_active(user) {
            return Ok(());
        }
        if self.active.len() >= self.capacity {
            return Err(RegistryError::ActiveListFull {
                capacity: self.capacity,
            });
        }
        self.active.push(ActiveUser {
            id: user,
            session_start: now,
        });
        Ok(())
    }

    pub fn remove_active(&mut self, user: NodeId) -> Option<ActiveUser> {
        let index = self.active.iter().position(|entry| entry.id == user)?;
        Some(self.active.remove(index))
    }

    /// Append `user` to the waiting queue, returning its 1-based position
    ///
    /// A user already waiting keeps its place.
    pub fn enqueue(&mut self, user: NodeId) -> Result<usize, RegistryError> {
        if let Some(position) = self.queue_position(user) {
            return Ok(position);
        }
        if self.waiting.len() >= self.max_users {
            return Err(RegistryError::WaitingQueueFull {
                limit: self.max_users,
            });
        }
        self.waiting.push_back(user);
        Ok(self.waiting.len())
    }

    pub fn remove_waiting(&mut self, user: NodeId) -> bool {
        match self.waiting.iter().position(|&id| id == user) {
            Some(index) => self.waiting.remove(index).is_some(),
            None => false,
        }
    }

    pub fn set_offer(&mut self, user: NodeId, now: Timestamp) {
        self.pending_offer = Some(AdmissionOffer {
            user,
            offered_at: now,
        });
    }

    pub fn clear_offer(&mut self) -> Option<AdmissionOffer> {
        self.pending_offer.take()
    }

    pub fn is_offered(&self, user: NodeId) -> bool {
        self.pending_offer.map_or(false, |offer| offer.user == user)
    }
}

fn saturate(value: usize) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}
