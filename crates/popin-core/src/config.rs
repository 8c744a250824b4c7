//! Protocol Configuration
//!
//! Every constant the booth protocol depends on lives in [`ProtocolConfig`]:
//! id ranges, booth limits, timer durations, retry ceilings and the tick
//! cadences used for periodic work.

use core::ops::RangeInclusive;
use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::message::{MAX_DESCRIPTION_LEN, MAX_TEXT_LEN};
use crate::types::NodeId;
use crate::{PopinError, Result};

/// Configuration shared by admin and user nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// First node id that runs as a booth admin
    pub admin_id_start: u8,
    /// Last node id that runs as a booth admin
    pub admin_id_end: u8,
    /// Simultaneous users a booth admits
    pub booth_capacity: usize,
    /// Limit for the registered list and the waiting queue
    pub max_users: usize,
    /// Booth description; `{id}` is replaced with the booth id
    pub description_template: String,

    /// Dwell time collecting announces before choosing a booth
    pub selection_dwell_ms: u64,
    /// Wait for BOOTH_INFO after a connect request
    pub connect_timeout_ms: u64,
    /// Connect retries before falling back to scanning
    pub connect_retry_limit: u32,
    /// Wait for REGISTER_RESPONSE after a registration request
    pub register_timeout_ms: u64,
    /// Registration retries before falling back to scanning
    pub register_retry_limit: u32,

    /// Length of a booth session
    pub session_duration_ms: u64,
    /// Extra time a user waits for TIMEOUT_ALERT before leaving on its own
    pub session_grace_ms: u64,
    /// Time a notified queue head has to claim the offered slot
    pub queue_ready_timeout_ms: u64,

    /// Scheduler ticks between scan cycles while scanning
    pub scan_interval_ticks: u64,
    /// Scheduler ticks between admin session/queue sweeps
    pub sweep_interval_ticks: u64,
    /// Scheduler ticks between unsolicited booth announces
    pub broadcast_interval_ticks: u64,
    /// Whether admins send unsolicited booth announces
    pub broadcast_enabled: bool,

    /// Register automatically when booth info arrives
    pub auto_affirm: bool,
    /// Received frames buffered between ticks (1 keeps only the latest)
    pub rx_queue_depth: usize,
    /// Console intents buffered between ticks
    pub intent_queue_depth: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            admin_id_start: 1,
            admin_id_end: 3,
            booth_capacity: 2,
            max_users: 20,
            description_template: "Booth {id} - Pop-up Store Experience".to_string(),

            selection_dwell_ms: 2_000,
            connect_timeout_ms: 3_000,
            connect_retry_limit: 3,
            register_timeout_ms: 3_000,
            register_retry_limit: 3,

            session_duration_ms: 60_000,
            session_grace_ms: 5_000,
            queue_ready_timeout_ms: 10_000,

            scan_interval_ticks: 500,
            sweep_interval_ticks: 100,
            broadcast_interval_ticks: 1_000,
            broadcast_enabled: true,

            auto_affirm: true,
            rx_queue_depth: 1,
            intent_queue_depth: 8,
        }
    }
}

impl ProtocolConfig {
    /// Short timers and tick intervals for tests and simulation
    pub fn testing() -> Self {
        Self {
            selection_dwell_ms: 200,
            connect_timeout_ms: 300,
            connect_retry_limit: 2,
            register_timeout_ms: 300,
            register_retry_limit: 2,
            session_duration_ms: 5_000,
            session_grace_ms: 500,
            queue_ready_timeout_ms: 1_000,
            scan_interval_ticks: 10,
            sweep_interval_ticks: 1,
            broadcast_interval_ticks: 50,
            rx_queue_depth: 16,
            ..Self::default()
        }
    }

    /// Node ids that run as booth admins
    pub fn admin_ids(&self) -> RangeInclusive<u8> {
        self.admin_id_start..=self.admin_id_end
    }

    /// Whether `id` belongs to a booth admin
    pub fn is_admin(&self, id: NodeId) -> bool {
        self.admin_ids().contains(&id.value())
    }

    /// Number of booths in the network
    pub fn booth_count(&self) -> usize {
        self.admin_ids().count()
    }

    /// Booth description for `booth`, truncated to the wire limit
    pub fn description_for(&self, booth: NodeId) -> String {
        let mut text = self
            .description_template
            .replace("{id}", &booth.value().to_string());
        if text.len() > MAX_DESCRIPTION_LEN {
            let mut cut = MAX_DESCRIPTION_LEN;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }
        text
    }

    pub fn selection_dwell(&self) -> Duration {
        Duration::from_millis(self.selection_dwell_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn register_timeout(&self) -> Duration {
        Duration::from_millis(self.register_timeout_ms)
    }

    pub fn session_duration(&self) -> Duration {
        Duration::from_millis(self.session_duration_ms)
    }

    /// Session length after which a user leaves without TIMEOUT_ALERT
    pub fn client_session_limit(&self) -> Duration {
        Duration::from_millis(self.session_duration_ms + self.session_grace_ms)
    }

    pub fn queue_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_ready_timeout_ms)
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        if self.admin_id_start == 0 || self.admin_id_start > self.admin_id_end {
            return Err(PopinError::config_error(format!(
                "Invalid admin id range {}..={}",
                self.admin_id_start, self.admin_id_end
            )));
        }
        if NodeId::new(self.admin_id_end).is_broadcast() {
            return Err(PopinError::config_error(
                "Admin id range must not include the broadcast id",
            ));
        }
        if self.booth_capacity == 0 {
            return Err(PopinError::config_error(
                "Booth capacity must be greater than 0",
            ));
        }
        if self.booth_capacity > u8::MAX as usize || self.max_users > u8::MAX as usize {
            return Err(PopinError::config_error(
                "Booth capacity and max users must fit in a single byte",
            ));
        }
        if self.max_users < self.booth_capacity {
            return Err(PopinError::config_error(format!(
                "Max users ({}) must be at least the booth capacity ({})",
                self.max_users, self.booth_capacity
            )));
        }
        if self.selection_dwell_ms == 0
            || self.connect_timeout_ms == 0
            || self.register_timeout_ms == 0
            || self.session_duration_ms == 0
            || self.queue_ready_timeout_ms == 0
        {
            return Err(PopinError::config_error("Timer durations must be greater than 0"));
        }
        if self.scan_interval_ticks == 0
            || self.sweep_interval_ticks == 0
            || self.broadcast_interval_ticks == 0
        {
            return Err(PopinError::config_error("Tick intervals must be greater than 0"));
        }
        if self.rx_queue_depth == 0 || self.intent_queue_depth == 0 {
            return Err(PopinError::config_error("Queue depths must be greater than 0"));
        }
        if self.description_template.len() > MAX_TEXT_LEN {
            return Err(PopinError::config_error("Description template is too long"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
