//! Admission control algorithms
//!
//! Pure operations over a [`Booth`]: registration evaluation, the waiting
//! queue admission step, the session and queue-ready sweeps, and booth
//! selection for users. None of them send anything; they return outcomes the
//! admin FSM turns into messages.

use core::time::Duration;

use crate::errors::RegistryError;
use crate::message::Message;
use crate::registry::Booth;
use crate::scan::ScanEntry;
use crate::types::{NodeId, Timestamp};

// ----------------------------------------------------------------------------
// Registration
// ----------------------------------------------------------------------------

/// Result of evaluating a REGISTER_REQUEST
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// Admitted; `left_queue` is set when the user was removed from the queue
    Admitted { left_queue: bool },
    /// Already inside; the earlier success reply was probably lost
    AlreadyActive,
    /// Admitted before, never again
    AlreadyUsed,
    /// Booth full; user is waiting at `position` of `total`
    Queued { position: usize, total: usize },
    /// A registry limit refused the user
    Rejected(RegistryError),
}

/// Evaluate a registration request from `user`
///
/// Order: active users are confirmed again, registered users are refused,
/// a full booth queues the user, otherwise the user is admitted. Every waiter
/// ahead of the user (the pending offer holder included) reserves one slot,
/// so a newcomer never overtakes the queue.
pub fn evaluate_registration(booth: &mut Booth, user: NodeId, now: Timestamp) -> RegistrationOutcome {
    if booth.is_active(user) {
        return RegistrationOutcome::AlreadyActive;
    }
    if booth.is_registered(user) {
        return RegistrationOutcome::AlreadyUsed;
    }

    let reserved = match booth.queue_position(user) {
        Some(position) => position - 1,
        None => booth.waiting_count(),
    };
    if booth.active_count() + reserved >= booth.capacity() {
        return match booth.enqueue(user) {
            Ok(position) => RegistrationOutcome::Queued {
                position,
                total: booth.waiting_count(),
            },
            Err(err) => RegistrationOutcome::Rejected(err),
        };
    }

    if booth.registered_users().len() >= booth.max_users() {
        return RegistrationOutcome::Rejected(RegistryError::RegisteredListFull {
            limit: booth.max_users(),
        });
    }
    if booth.is_offered(user) {
        booth.clear_offer();
    }
    let left_queue = booth.remove_waiting(user);
    if let Err(err) = booth.record_registration(user) {
        return RegistrationOutcome::Rejected(err);
    }
    if let Err(err) = booth.add_active(user, now) {
        return RegistrationOutcome::Rejected(err);
    }
    RegistrationOutcome::Admitted { left_queue }
}

// ----------------------------------------------------------------------------
// Waiting Queue
// ----------------------------------------------------------------------------

/// Offer the free slot to the queue head
///
/// Proceeds only without an outstanding offer and with a free slot. The head
/// stays queued until it registers or its offer times out.
pub fn admit_next(booth: &mut Booth, now: Timestamp) -> Option<NodeId> {
    if booth.pending_offer().is_some() || !booth.has_free_slot() {
        return None;
    }
    let head = booth.waiting_head()?;
    booth.set_offer(head, now);
    Some(head)
}

/// Result of a QUEUE_LEAVE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLeaveOutcome {
    pub removed: bool,
    /// The leaving user held the pending offer, which is now cleared
    pub offer_released: bool,
}

pub fn leave_queue(booth: &mut Booth, user: NodeId) -> QueueLeaveOutcome {
    let removed = booth.remove_waiting(user);
    let offer_released = booth.is_offered(user);
    if offer_released {
        booth.clear_offer();
    }
    QueueLeaveOutcome {
        removed,
        offer_released,
    }
}

/// QUEUE_UPDATE for every waiter with its current position
pub fn queue_updates(booth: &Booth) -> Vec<(NodeId, Message)> {
    let total = clamp(booth.waiting_count());
    booth
        .waiting_queue()
        .enumerate()
        .map(|(index, user)| {
            (
                user,
                Message::QueueUpdate {
                    position: clamp(index + 1),
                    total,
                },
            )
        })
        .collect()
}

// ----------------------------------------------------------------------------
// Sweeps
// ----------------------------------------------------------------------------

/// Active users whose session reached `duration`
pub fn expired_sessions(booth: &Booth, now: Timestamp, duration: Duration) -> Vec<NodeId> {
    booth
        .active_users()
        .iter()
        .filter(|entry| now.duration_since(entry.session_start) >= duration)
        .map(|entry| entry.id)
        .collect()
}

/// Remove every expired session, returning the removed users
///
/// Expired ids are collected before any removal.
pub fn sweep_sessions(booth: &mut Booth, now: Timestamp, duration: Duration) -> Vec<NodeId> {
    let expired = expired_sessions(booth, now, duration);
    for user in &expired {
        booth.remove_active(*user);
    }
    expired
}

/// Drop the offer holder if its offer outlived `timeout`
pub fn sweep_queue_ready(booth: &mut Booth, now: Timestamp, timeout: Duration) -> Option<NodeId> {
    let offer = booth.pending_offer()?;
    if now.duration_since(offer.offered_at) <= timeout {
        return None;
    }
    booth.clear_offer();
    booth.remove_waiting(offer.user);
    Some(offer.user)
}

// ----------------------------------------------------------------------------
// Booth Selection
// ----------------------------------------------------------------------------

/// Bonus for a booth with at least one free slot
pub const FREE_SLOT_BONUS: i32 = 20;

/// Penalty per waiting user
pub const WAITING_PENALTY: i32 = 10;

/// Selection score: signal strength, plus a free-slot bonus, minus queue length
pub fn booth_score(entry: &ScanEntry) -> i32 {
    let bonus = if entry.has_free_slot() {
        FREE_SLOT_BONUS
    } else {
        0
    };
    i32::from(entry.rssi) + bonus - WAITING_PENALTY * i32::from(entry.waiting_count)
}

/// Highest-scoring valid booth; ties go to the entry seen first
pub fn select_optimal_booth<'a, I>(entries: I) -> Option<NodeId>
where
    I: IntoIterator<Item = &'a ScanEntry>,
{
    let mut best: Option<(NodeId, i32)> = None;
    for entry in entries.into_iter().filter(|entry| entry.valid) {
        let score = booth_score(entry);
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((entry.booth_id, score)),
        }
    }
    best.map(|(id, _)| id)
}

fn clamp(value: usize) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booth(capacity: usize) -> Booth {
        Booth::with_limits(NodeId::new(1), capacity, 20, "Booth 1".to_string())
    }

    fn id(value: u8) -> NodeId {
        NodeId::new(value)
    }

    fn entry(booth: u8, rssi: i16, current: u8, capacity: u8, waiting: u8) -> ScanEntry {
        ScanEntry {
            booth_id: id(booth),
            rssi,
            snr: 0,
            current_count: current,
            capacity,
            waiting_count: waiting,
            valid: true,
        }
    }

    #[test]
    fn test_registration_order_of_checks() {
        let mut booth = booth(1);
        let now = Timestamp::ZERO;

        assert_eq!(
            evaluate_registration(&mut booth, id(4), now),
            RegistrationOutcome::Admitted { left_queue: false }
        );
        assert_eq!(
            evaluate_registration(&mut booth, id(4), now),
            RegistrationOutcome::AlreadyActive
        );
        assert_eq!(
            evaluate_registration(&mut booth, id(5), now),
            RegistrationOutcome::Queued {
                position: 1,
                total: 1
            }
        );
        assert_eq!(
            evaluate_registration(&mut booth, id(5), now),
            RegistrationOutcome::Queued {
                position: 1,
                total: 1
            }
        );

        booth.remove_active(id(4));
        assert_eq!(
            evaluate_registration(&mut booth, id(4), now),
            RegistrationOutcome::AlreadyUsed
        );
        assert!(!booth.is_waiting(id(4)));
    }

    #[test]
    fn test_pending_offer_reserves_a_slot() {
        let mut booth = booth(2);
        let now = Timestamp::ZERO;
        evaluate_registration(&mut booth, id(4), now);
        evaluate_registration(&mut booth, id(5), now);
        evaluate_registration(&mut booth, id(6), now);
        evaluate_registration(&mut booth, id(7), now);

        booth.remove_active(id(4));
        assert_eq!(admit_next(&mut booth, now), Some(id(6)));

        // A newcomer cannot take the reserved slot
        assert!(matches!(
            evaluate_registration(&mut booth, id(8), now),
            RegistrationOutcome::Queued { position: 3, total: 3 }
        ));

        assert_eq!(
            evaluate_registration(&mut booth, id(6), now),
            RegistrationOutcome::Admitted { left_queue: true }
        );
        assert!(booth.pending_offer().is_none());
        assert_eq!(booth.waiting_queue().collect::<Vec<_>>(), vec![id(7), id(8)]);
    }

    #[test]
    fn test_admit_next_requires_free_slot_and_no_offer() {
        let mut booth = booth(1);
        let now = Timestamp::ZERO;
        evaluate_registration(&mut booth, id(4), now);
        evaluate_registration(&mut booth, id(5), now);
        evaluate_registration(&mut booth, id(6), now);

        assert_eq!(admit_next(&mut booth, now), None);
        booth.remove_active(id(4));
        assert_eq!(admit_next(&mut booth, now), Some(id(5)));
        assert_eq!(admit_next(&mut booth, now), None);
        assert!(booth.is_waiting(id(5)));
    }

    #[test]
    fn test_queue_updates_are_contiguous() {
        let mut booth = booth(1);
        for user in 4..8 {
            evaluate_registration(&mut booth, id(user), Timestamp::ZERO);
        }
        leave_queue(&mut booth, id(6));
        let updates = queue_updates(&booth);
        assert_eq!(
            updates,
            vec![
                (id(5), Message::QueueUpdate { position: 1, total: 2 }),
                (id(7), Message::QueueUpdate { position: 2, total: 2 }),
            ]
        );
    }

    #[test]
    fn test_leave_queue_releases_offer() {
        let mut booth = booth(1);
        evaluate_registration(&mut booth, id(4), Timestamp::ZERO);
        evaluate_registration(&mut booth, id(5), Timestamp::ZERO);
        booth.remove_active(id(4));
        admit_next(&mut booth, Timestamp::ZERO);

        let outcome = leave_queue(&mut booth, id(5));
        assert!(outcome.removed);
        assert!(outcome.offer_released);
        assert!(booth.pending_offer().is_none());
    }

    #[test]
    fn test_session_sweep_removes_all_expired() {
        let mut booth = booth(3);
        evaluate_registration(&mut booth, id(4), Timestamp::new(0));
        evaluate_registration(&mut booth, id(5), Timestamp::new(100));
        evaluate_registration(&mut booth, id(6), Timestamp::new(500));

        let expired = sweep_sessions(&mut booth, Timestamp::new(1_100), Duration::from_millis(1_000));
        assert_eq!(expired, vec![id(4), id(5)]);
        assert_eq!(booth.active_count(), 1);
        assert!(booth.is_active(id(6)));
        assert!(booth.is_registered(id(4)));
    }

    #[test]
    fn test_queue_ready_sweep_drops_stale_offer() {
        let mut booth = booth(1);
        evaluate_registration(&mut booth, id(4), Timestamp::ZERO);
        evaluate_registration(&mut booth, id(5), Timestamp::ZERO);
        evaluate_registration(&mut booth, id(6), Timestamp::ZERO);
        booth.remove_active(id(4));
        admit_next(&mut booth, Timestamp::new(100));

        let timeout = Duration::from_millis(1_000);
        assert_eq!(sweep_queue_ready(&mut booth, Timestamp::new(1_100), timeout), None);
        assert_eq!(
            sweep_queue_ready(&mut booth, Timestamp::new(1_101), timeout),
            Some(id(5))
        );
        assert!(!booth.is_waiting(id(5)));
        assert_eq!(admit_next(&mut booth, Timestamp::new(1_101)), Some(id(6)));
    }

    #[test]
    fn test_booth_score() {
        assert_eq!(booth_score(&entry(1, -60, 1, 2, 0)), -40);
        assert_eq!(booth_score(&entry(2, -40, 2, 2, 0)), -40);
        assert_eq!(booth_score(&entry(3, -40, 2, 2, 3)), -70);
    }

    #[test]
    fn test_selection_prefers_first_seen_on_tie() {
        let first = [entry(1, -60, 1, 2, 0), entry(2, -40, 2, 2, 0)];
        assert_eq!(select_optimal_booth(&first), Some(id(1)));

        let reversed = [entry(2, -40, 2, 2, 0), entry(1, -60, 1, 2, 0)];
        assert_eq!(select_optimal_booth(&reversed), Some(id(2)));
    }

    #[test]
    fn test_selection_skips_invalid_entries() {
        let mut stale = entry(1, -10, 0, 2, 0);
        stale.valid = false;
        let entries = [stale, entry(2, -80, 0, 2, 0)];
        assert_eq!(select_optimal_booth(&entries), Some(id(2)));
        assert_eq!(select_optimal_booth(&[stale]), None);
        assert_eq!(select_optimal_booth(&[]), None);
    }
}
