use crate::state::{AdcsState, Thresholds};
use heapless::Vec;
use serde::{Deserialize, Serialize};

const MAX_FAULT_HISTORY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultType {
    None,
    HighAngularRate,
    LowPower,
    SensorAnomaly,
    SoftwareResetRequired,
    Critical,
}

impl FaultType {
    pub fn is_fault(self) -> bool {
        self != FaultType::None
    }
}

/// Evaluates the fault chain in strict priority order. Only the first
/// matching condition is reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultManager {
    thresholds: Thresholds,
}

impl FaultManager {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// `sensors_consistent` is the redundant-sensor vote sampled this cycle;
    /// a failed sensor read must be passed in as `false`.
    pub fn check_faults(&self, state: &AdcsState, sensors_consistent: bool) -> FaultType {
        if self.check_angular_rate(state) {
            return FaultType::HighAngularRate;
        }
        if self.check_power_level(state) {
            return FaultType::LowPower;
        }
        if !sensors_consistent {
            return FaultType::SensorAnomaly;
        }
        FaultType::None
    }

    fn check_angular_rate(&self, state: &AdcsState) -> bool {
        !self.thresholds.rate_within_bound(&state.angular_velocity)
    }

    fn check_power_level(&self, state: &AdcsState) -> bool {
        self.thresholds.power_is_low(state.power_level_w)
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FaultRecord {
    pub id: u32,
    pub fault_type: FaultType,
    pub timestamp_ms: u32,
    pub duration_ms: u32,
    pub resolved: bool,
}

/// Bounded history of fault onsets. The oldest record is evicted when full.
#[derive(Debug)]
pub struct FaultLog {
    fault_history: Vec<FaultRecord, MAX_FAULT_HISTORY>,
    next_fault_id: u32,
}

impl Default for FaultLog {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultLog {
    pub fn new() -> Self {
        Self {
            fault_history: Vec::new(),
            next_fault_id: 1,
        }
    }

    /// Feeds this cycle's fault. A change of fault type resolves the open
    /// record and opens a new one; a repeat only extends the open record.
    pub fn observe(&mut self, fault: FaultType, timestamp_ms: u32) {
        let open = self.fault_history.iter().rposition(|f| !f.resolved);

        if let Some(index) = open {
            let record = &mut self.fault_history[index];
            record.duration_ms = timestamp_ms.wrapping_sub(record.timestamp_ms);
            if record.fault_type == fault {
                return;
            }
            record.resolved = true;
        }

        if fault.is_fault() {
            self.record_fault(fault, timestamp_ms);
        }
    }

    pub fn record_fault(&mut self, fault_type: FaultType, timestamp_ms: u32) -> u32 {
        let fault_id = self.next_fault_id;
        self.next_fault_id = self.next_fault_id.wrapping_add(1);

        let fault_record = FaultRecord {
            id: fault_id,
            fault_type,
            timestamp_ms,
            duration_ms: 0,
            resolved: false,
        };

        if self.fault_history.is_full() {
            self.fault_history.remove(0);
        }

        let _ = self.fault_history.push(fault_record);
        fault_id
    }

    pub fn get_active_faults(&self) -> impl Iterator<Item = &FaultRecord> {
        self.fault_history.iter().filter(|f| !f.resolved)
    }

    pub fn get_fault_history(&self) -> &[FaultRecord] {
        &self.fault_history
    }

    pub fn clear_resolved_faults(&mut self) {
        self.fault_history.retain(|f| !f.resolved);
    }
}
