use serde::{Deserialize, Serialize};

/// Stability bound on every body axis, rad/s.
pub const MAX_ANGULAR_RATE_RAD_S: f32 = 0.1;
/// Below this bus power the spacecraft is power-negative.
pub const LOW_POWER_THRESHOLD_W: f32 = 4.0;
/// Extra margin above the low-power threshold before SafeMode is released.
pub const POWER_RESTORE_HYSTERESIS_W: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperatingMode {
    Detumbling = 0,
    SunAcquisition = 1,
    NominalPointing = 2,
    SafeMode = 3,
    FaultRecovery = 4,
}

impl OperatingMode {
    pub const ALL: [OperatingMode; 5] = [
        OperatingMode::Detumbling,
        OperatingMode::SunAcquisition,
        OperatingMode::NominalPointing,
        OperatingMode::SafeMode,
        OperatingMode::FaultRecovery,
    ];

    /// SafeMode and FaultRecovery are entered only in response to a fault.
    pub fn is_contingency(self) -> bool {
        matches!(self, OperatingMode::SafeMode | OperatingMode::FaultRecovery)
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(OperatingMode::Detumbling),
            1 => Some(OperatingMode::SunAcquisition),
            2 => Some(OperatingMode::NominalPointing),
            3 => Some(OperatingMode::SafeMode),
            4 => Some(OperatingMode::FaultRecovery),
            _ => None,
        }
    }
}

impl core::fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            OperatingMode::Detumbling => "detumbling",
            OperatingMode::SunAcquisition => "sun-acquisition",
            OperatingMode::NominalPointing => "nominal-pointing",
            OperatingMode::SafeMode => "safe-mode",
            OperatingMode::FaultRecovery => "fault-recovery",
        };
        f.write_str(name)
    }
}

/// Limits shared by the fault chain, the transition table and the boot check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub max_angular_rate_rad_s: f32,
    pub low_power_w: f32,
    pub power_restore_hysteresis_w: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_angular_rate_rad_s: MAX_ANGULAR_RATE_RAD_S,
            low_power_w: LOW_POWER_THRESHOLD_W,
            power_restore_hysteresis_w: POWER_RESTORE_HYSTERESIS_W,
        }
    }
}

impl Thresholds {
    /// True when no axis exceeds the stability bound.
    pub fn rate_within_bound(&self, angular_velocity: &[f32; 3]) -> bool {
        angular_velocity
            .iter()
            .all(|axis| axis.abs() <= self.max_angular_rate_rad_s)
    }

    pub fn power_is_low(&self, power_level_w: f32) -> bool {
        power_level_w.is_nan() || power_level_w < self.low_power_w
    }

    pub fn power_restored(&self, power_level_w: f32) -> bool {
        power_level_w >= self.low_power_w + self.power_restore_hysteresis_w
    }

    /// Boot-time check that a restored state can be trusted to continue from.
    ///
    /// Uses the plain low-power threshold rather than [`Self::power_restored`].
    /// The fault chain runs on every cycle, so a resumed state that dips below
    /// the threshold is in SafeMode after the first cycle anyway; the
    /// hysteresis only keeps a live SafeMode exit from chattering.
    pub fn safe_to_resume(&self, angular_velocity: &[f32; 3], power_level_w: f32) -> bool {
        self.rate_within_bound(angular_velocity) && power_level_w > self.low_power_w
    }
}

/// The single live control state, owned by the mode controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdcsState {
    pub current_mode: OperatingMode,
    pub mode_entry_time_ms: u32,
    pub angular_velocity: [f32; 3],
    pub power_level_w: f32,
    pre_fault_mode: OperatingMode,
}

impl AdcsState {
    pub fn new(
        current_mode: OperatingMode,
        mode_entry_time_ms: u32,
        angular_velocity: [f32; 3],
        power_level_w: f32,
        pre_fault_mode: OperatingMode,
    ) -> Self {
        let mut state = Self {
            current_mode,
            mode_entry_time_ms,
            angular_velocity,
            power_level_w,
            pre_fault_mode: OperatingMode::Detumbling,
        };
        state.remember_operational_mode(pre_fault_mode);
        state
    }

    /// Hard-coded fallback used when nothing trustworthy survives in NVM.
    pub fn safe_default(now_ms: u32) -> Self {
        Self {
            current_mode: OperatingMode::SafeMode,
            mode_entry_time_ms: now_ms,
            angular_velocity: [0.0; 3],
            power_level_w: 0.0,
            pre_fault_mode: OperatingMode::Detumbling,
        }
    }

    pub fn pre_fault_mode(&self) -> OperatingMode {
        self.pre_fault_mode
    }

    /// Records `mode` as the mode to resume after a contingency. Contingency
    /// modes are ignored so the field only ever holds an operational mode.
    pub fn remember_operational_mode(&mut self, mode: OperatingMode) {
        if !mode.is_contingency() {
            self.pre_fault_mode = mode;
        }
    }

    pub fn time_in_mode_ms(&self, now_ms: u32) -> u32 {
        now_ms.wrapping_sub(self.mode_entry_time_ms)
    }
}

/// Inputs the transition table needs besides the state itself, sampled once
/// per cycle from the guidance collaborators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionInputs {
    pub sun_vector_aligned: bool,
    pub fault_recovery_complete: bool,
}

/// Candidate next mode from the autonomous transition table. Pure: depends
/// only on its arguments.
pub fn evaluate_transition(
    state: &AdcsState,
    inputs: &TransitionInputs,
    thresholds: &Thresholds,
) -> OperatingMode {
    match state.current_mode {
        OperatingMode::Detumbling => {
            if thresholds.rate_within_bound(&state.angular_velocity) {
                OperatingMode::SunAcquisition
            } else {
                OperatingMode::Detumbling
            }
        }
        OperatingMode::SunAcquisition => {
            if inputs.sun_vector_aligned {
                OperatingMode::NominalPointing
            } else {
                OperatingMode::SunAcquisition
            }
        }
        // No autonomous exit; only faults leave nominal pointing
        OperatingMode::NominalPointing => OperatingMode::NominalPointing,
        OperatingMode::SafeMode => {
            if thresholds.power_restored(state.power_level_w) {
                state.pre_fault_mode
            } else {
                OperatingMode::SafeMode
            }
        }
        OperatingMode::FaultRecovery => {
            if inputs.fault_recovery_complete {
                state.pre_fault_mode
            } else {
                OperatingMode::FaultRecovery
            }
        }
    }
}
