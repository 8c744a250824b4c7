//! Scan result table kept by user nodes

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::message::BoothStatus;
use crate::types::NodeId;

/// Last announce seen from one booth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEntry {
    pub booth_id: NodeId,
    pub rssi: i16,
    pub snr: i8,
    pub current_count: u8,
    pub capacity: u8,
    pub waiting_count: u8,
    pub valid: bool,
}

impl ScanEntry {
    pub fn from_announce(status: BoothStatus, rssi: i16, snr: i8) -> Self {
        Self {
            booth_id: status.booth_id,
            rssi,
            snr,
            current_count: status.current_count,
            capacity: status.capacity,
            waiting_count: status.waiting_count,
            valid: true,
        }
    }

    pub fn has_free_slot(&self) -> bool {
        self.current_count < self.capacity
    }
}

/// Announces collected during one scan window, in first-seen order
#[derive(Debug, Clone)]
pub struct ScanTable {
    entries: SmallVec<[ScanEntry; 4]>,
    limit: usize,
}

impl ScanTable {
    /// Table holding at most `limit` booths
    pub fn new(limit: usize) -> Self {
        Self {
            entries: SmallVec::new(),
            limit,
        }
    }

    /// Record an announce; refreshes an existing entry in place
    ///
    /// Returns `false` when a new booth does not fit.
    pub fn record(&mut self, status: BoothStatus, rssi: i16, snr: i8) -> bool {
        let entry = ScanEntry::from_announce(status, rssi, snr);
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|existing| existing.booth_id == status.booth_id)
        {
            *existing = entry;
            return true;
        }
        if self.entries.len() >= self.limit {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Keep the entry for `booth` but exclude it from selection
    pub fn invalidate(&mut self, booth: NodeId) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.booth_id == booth) {
            entry.valid = false;
        }
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, booth: NodeId) -> Option<&ScanEntry> {
        self.entries.iter().find(|entry| entry.booth_id == booth)
    }

    pub fn entries(&self) -> &[ScanEntry] {
        &self.entries
    }

    pub fn valid_entries(&self) -> impl Iterator<Item = &ScanEntry> {
        self.entries.iter().filter(|entry| entry.valid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(id: u8, current: u8) -> BoothStatus {
        BoothStatus {
            booth_id: NodeId::new(id),
            current_count: current,
            capacity: 2,
            waiting_count: 0,
        }
    }

    #[test]
    fn test_repeat_announce_refreshes_in_place() {
        let mut table = ScanTable::new(3);
        assert!(table.record(status(2, 0), -70, 5));
        assert!(table.record(status(1, 0), -60, 5));
        assert!(table.record(status(2, 1), -40, 7));

        let ids: Vec<u8> = table.entries().iter().map(|e| e.booth_id.value()).collect();
        assert_eq!(ids, vec![2, 1]);
        let refreshed = table.get(NodeId::new(2)).unwrap();
        assert_eq!(refreshed.rssi, -40);
        assert_eq!(refreshed.current_count, 1);
    }

    #[test]
    fn test_table_is_bounded() {
        let mut table = ScanTable::new(2);
        assert!(table.record(status(1, 0), -60, 0));
        assert!(table.record(status(2, 0), -60, 0));
        assert!(!table.record(status(3, 0), -60, 0));
        assert_eq!(table.len(), 2);

        table.reset();
        assert!(table.is_empty());
    }

    #[test]
    fn test_invalidated_entries_are_not_selectable() {
        let mut table = ScanTable::new(3);
        table.record(status(1, 0), -60, 0);
        table.record(status(2, 0), -70, 0);
        table.invalidate(NodeId::new(1));
        let valid: Vec<u8> = table.valid_entries().map(|e| e.booth_id.value()).collect();
        assert_eq!(valid, vec![2]);
    }
}
