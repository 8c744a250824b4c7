//! Core types for the Pop-in protocol
//!
//! This module defines the fundamental types used throughout the protocol,
//! using newtype patterns for semantic validation and type safety.

use core::fmt;
use core::ops::{Add, RangeInclusive, Sub};
use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ----------------------------------------------------------------------------
// Node Identifier
// ----------------------------------------------------------------------------

/// Link-layer address of a node (single byte on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u8);

impl NodeId {
    /// Destination id that reaches every node
    pub const BROADCAST: Self = Self(255);

    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    pub const fn is_broadcast(self) -> bool {
        self.0 == Self::BROADCAST.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for NodeId {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

// ----------------------------------------------------------------------------
// Node Role
// ----------------------------------------------------------------------------

/// Role of a node, fixed at startup from its id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Owns a booth and answers user requests
    Admin,
    /// Discovers booths and requests entry
    User,
}

impl Role {
    /// Derive the role of `id` given the admin id range
    pub fn for_id(id: NodeId, admin_ids: &RangeInclusive<u8>) -> Self {
        if admin_ids.contains(&id.value()) {
            Role::Admin
        } else {
            Role::User
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::User => write!(f, "user"),
        }
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp on the node's clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(other.as_millis() as u64))
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    pub const ZERO: Self = Self(0);

    /// Create a new timestamp
    pub const fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time since the Unix epoch
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Get duration since another timestamp (zero if `other` is later)
    pub fn duration_since(&self, other: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

// ----------------------------------------------------------------------------
// Time Source Trait
// ----------------------------------------------------------------------------

/// Trait for providing timestamps
///
/// The scheduler never reads the clock directly, which keeps every timeout in
/// the protocol testable with a manual clock.
pub trait TimeSource {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// Wall-clock implementation of TimeSource
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually advanced clock shared between a driver and its nodes
///
/// Clones observe the same time, so a simulator can advance one handle and
/// every node reading its own clone sees the new value.
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    current_time: Arc<AtomicU64>,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(millis: u64) -> Self {
        Self {
            current_time: Arc::new(AtomicU64::new(millis)),
        }
    }

    /// Advance time by `duration`
    pub fn advance(&self, duration: Duration) {
        self.current_time
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    /// Set the time to a specific value
    pub fn set_time(&self, millis: u64) {
        self.current_time.store(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current_time.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_admin_range() {
        let admins = 1..=3;
        assert_eq!(Role::for_id(NodeId::new(1), &admins), Role::Admin);
        assert_eq!(Role::for_id(NodeId::new(3), &admins), Role::Admin);
        assert_eq!(Role::for_id(NodeId::new(4), &admins), Role::User);
        assert_eq!(Role::for_id(NodeId::new(42), &admins), Role::User);
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let start = Timestamp::new(1_000);
        let later = start + Duration::from_millis(2_500);
        assert_eq!(later.as_millis(), 3_500);
        assert_eq!(later - start, 2_500);
        assert_eq!(start - later, 0);
        assert_eq!(later.duration_since(start), Duration::from_millis(2_500));
    }

    #[test]
    fn test_manual_time_source_clones_share_time() {
        let clock = ManualTimeSource::new();
        let observer = clock.clone();
        clock.advance(Duration::from_secs(3));
        assert_eq!(observer.now().as_millis(), 3_000);
        clock.set_time(10);
        assert_eq!(observer.now(), Timestamp::new(10));
    }
}
