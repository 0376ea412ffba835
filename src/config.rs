use crate::escalation::EscalationConfig;
use crate::hal::PointingTarget;
use crate::persistence::DEFAULT_MAX_WRITE_ATTEMPTS;
use crate::state::Thresholds;
use crate::watchdog::WatchdogConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const CYCLE_PERIOD_MS: u32 = 250;

/// What the controller does with a restored state that passed the boot
/// safety check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResumePolicy {
    /// Always re-run the stabilization sequence from detumbling.
    AlwaysDetumble,
    /// Continue in the restored operational mode.
    ResumeRestored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("cycle period {period_ms} ms leaves no budget under watchdog timeout {timeout_ms} ms minus {margin_ms} ms margin")]
    CycleExceedsWatchdog {
        period_ms: u32,
        timeout_ms: u32,
        margin_ms: u32,
    },
    #[error("at least one NVM write attempt is required")]
    NoWriteAttempts,
    #[error("threshold `{0}` must be a positive finite number")]
    InvalidThreshold(&'static str),
    #[error("escalation threshold `{0}` must be non-zero")]
    InvalidEscalation(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Fixed delay between the end of one cycle and the start of the next.
    pub cycle_period_ms: u32,
    pub watchdog: WatchdogConfig,
    pub thresholds: Thresholds,
    pub escalation: EscalationConfig,
    pub resume_policy: ResumePolicy,
    pub pointing_target: PointingTarget,
    pub max_write_attempts: u8,
    /// Byte offset of the state slots on the NVM device.
    pub nvm_base_offset: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cycle_period_ms: CYCLE_PERIOD_MS,
            watchdog: WatchdogConfig::default(),
            thresholds: Thresholds::default(),
            escalation: EscalationConfig::default(),
            resume_policy: ResumePolicy::AlwaysDetumble,
            pointing_target: PointingTarget::Nadir,
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
            nvm_base_offset: 0,
        }
    }
}

impl ControllerConfig {
    /// Worst-case time one cycle may take so that the next refresh still
    /// lands inside the watchdog window.
    pub fn cycle_budget_ms(&self) -> u32 {
        self.watchdog
            .timeout_ms
            .saturating_sub(self.watchdog.margin_ms)
            .saturating_sub(self.cycle_period_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycle_budget_ms() == 0 {
            return Err(ConfigError::CycleExceedsWatchdog {
                period_ms: self.cycle_period_ms,
                timeout_ms: self.watchdog.timeout_ms,
                margin_ms: self.watchdog.margin_ms,
            });
        }

        if self.max_write_attempts == 0 {
            return Err(ConfigError::NoWriteAttempts);
        }

        let t = &self.thresholds;
        if !(t.max_angular_rate_rad_s.is_finite() && t.max_angular_rate_rad_s > 0.0) {
            return Err(ConfigError::InvalidThreshold("max_angular_rate_rad_s"));
        }
        if !(t.low_power_w.is_finite() && t.low_power_w > 0.0) {
            return Err(ConfigError::InvalidThreshold("low_power_w"));
        }
        if !(t.power_restore_hysteresis_w.is_finite() && t.power_restore_hysteresis_w >= 0.0) {
            return Err(ConfigError::InvalidThreshold("power_restore_hysteresis_w"));
        }

        let e = &self.escalation;
        if e.unresolved_fault_cycles == 0 {
            return Err(ConfigError::InvalidEscalation("unresolved_fault_cycles"));
        }
        if e.max_persistence_failures == 0 {
            return Err(ConfigError::InvalidEscalation("max_persistence_failures"));
        }

        Ok(())
    }
}
