//! Reset escalation.
//!
//! Faults the in-cycle remedies fail to clear escalate in two steps: first a
//! software reset of the sensor and driver stack, then a power cycle of the
//! main computer through the isolated supervisor circuit. The thresholds are
//! deployment configuration.

use crate::fault::FaultType;
use serde::{Deserialize, Serialize};

const UNRESOLVED_FAULT_CYCLES: u16 = 20;
const MAX_SOFTWARE_RESETS: u8 = 3;
const RECOVERY_CLEAN_CYCLES: u16 = 50;
const MAX_PERSISTENCE_FAILURES: u8 = 5;
const POWER_CYCLE_DELAY_MS: u32 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Consecutive cycles a sensor anomaly may survive sensor re-initialization
    /// before the driver stack is reset.
    pub unresolved_fault_cycles: u16,
    /// Software resets allowed without an intervening clean period.
    pub max_software_resets: u8,
    /// Anomaly-free cycles after which the software reset budget refills.
    pub recovery_clean_cycles: u16,
    /// Consecutive abandoned state writes tolerated.
    pub max_persistence_failures: u8,
    pub power_cycle_delay_ms: u32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            unresolved_fault_cycles: UNRESOLVED_FAULT_CYCLES,
            max_software_resets: MAX_SOFTWARE_RESETS,
            recovery_clean_cycles: RECOVERY_CLEAN_CYCLES,
            max_persistence_failures: MAX_PERSISTENCE_FAILURES,
            power_cycle_delay_ms: POWER_CYCLE_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EscalationState {
    pub anomaly_streak: u16,
    pub software_resets: u8,
    pub clean_cycles: u16,
    pub persistence_failures: u8,
    pub total_software_resets: u32,
    pub power_cycle_requested: bool,
}

#[derive(Debug)]
pub struct EscalationPolicy {
    config: EscalationConfig,
    state: EscalationState,
}

impl EscalationPolicy {
    pub fn new(config: EscalationConfig) -> Self {
        Self {
            config,
            state: EscalationState::default(),
        }
    }

    /// Feeds the outcome of a state write.
    pub fn record_persistence(&mut self, succeeded: bool) {
        if succeeded {
            self.state.persistence_failures = 0;
        } else {
            self.state.persistence_failures = self.state.persistence_failures.saturating_add(1);
        }
    }

    /// Updates the counters with this cycle's fault and returns the reset
    /// demand, if any: `SoftwareResetRequired`, `Critical` or `None`.
    ///
    /// `Critical` latches; it is reported once and never again.
    pub fn evaluate(&mut self, fault: FaultType) -> FaultType {
        if self.state.power_cycle_requested {
            return FaultType::None;
        }

        if self.state.persistence_failures >= self.config.max_persistence_failures {
            return self.latch_power_cycle();
        }

        if fault != FaultType::SensorAnomaly {
            self.state.anomaly_streak = 0;
            self.state.clean_cycles = self.state.clean_cycles.saturating_add(1);
            if self.state.clean_cycles >= self.config.recovery_clean_cycles {
                self.state.software_resets = 0;
            }
            return FaultType::None;
        }

        self.state.clean_cycles = 0;
        self.state.anomaly_streak = self.state.anomaly_streak.saturating_add(1);
        if self.state.anomaly_streak < self.config.unresolved_fault_cycles {
            return FaultType::None;
        }

        self.state.anomaly_streak = 0;
        if self.state.software_resets >= self.config.max_software_resets {
            return self.latch_power_cycle();
        }

        self.state.software_resets += 1;
        self.state.total_software_resets = self.state.total_software_resets.saturating_add(1);
        FaultType::SoftwareResetRequired
    }

    fn latch_power_cycle(&mut self) -> FaultType {
        self.state.power_cycle_requested = true;
        FaultType::Critical
    }

    pub fn get_state(&self) -> &EscalationState {
        &self.state
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }
}
