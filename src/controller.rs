use crate::config::{ConfigError, ControllerConfig, ResumePolicy};
use crate::escalation::{EscalationPolicy, EscalationState};
use crate::fault::{FaultLog, FaultManager, FaultType};
use crate::hal::{NvmDevice, Platform, PowerProfile, WatchdogTimer};
use heapless::Deque;
use crate::persistence::{PersistedRecord, PersistentStateStore, StoreError, StoreStats};
use crate::state::{evaluate_transition, AdcsState, OperatingMode, TransitionInputs};
use crate::watchdog::{WatchdogStats, WatchdogSupervisor};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

const PERFORMANCE_HISTORY_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootOutcome {
    /// The stored record failed its checksum.
    CorruptRecord,
    /// No record was ever committed.
    BlankStorage,
    /// The device could not be read.
    StorageUnreadable,
    /// A valid record was found but its rates or power ruled out resuming.
    UnsafeToResume,
    /// A valid, safe record was found; stabilization restarts from detumbling.
    RestartedDetumbling,
    /// A valid, safe record was found and its mode was resumed directly.
    ResumedRestored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootReport {
    pub outcome: BootOutcome,
    pub restored_mode: Option<OperatingMode>,
    pub resolved_mode: OperatingMode,
    pub persisted: bool,
}

/// Summary of one control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u32,
    pub mode: OperatingMode,
    pub fault: FaultType,
    /// Reset demand raised by the escalation policy this cycle.
    pub escalation: FaultType,
    pub transitions: u8,
    pub persisted: bool,
    pub persistence_failed: bool,
    pub power_cycle_requested: bool,
    pub elapsed_ms: u32,
}

impl CycleReport {
    fn new(cycle: u32, mode: OperatingMode) -> Self {
        Self {
            cycle,
            mode,
            fault: FaultType::None,
            escalation: FaultType::None,
            transitions: 0,
            persisted: false,
            persistence_failed: false,
            power_cycle_requested: false,
            elapsed_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct PerformanceStats {
    pub cycle_time_ms: u32,
    pub watchdog_remaining_ms: u32,
}

/// Resolves the state to boot into from whatever the store returned.
fn resolve_boot_state(
    read: Result<PersistedRecord, StoreError>,
    now_ms: u32,
    config: &ControllerConfig,
) -> (AdcsState, BootOutcome, Option<OperatingMode>) {
    let record = match read {
        Ok(record) => record,
        Err(e) => {
            let outcome = match e {
                StoreError::CorruptState => BootOutcome::CorruptRecord,
                StoreError::Empty => BootOutcome::BlankStorage,
                StoreError::Nvm(_) | StoreError::WriteFailure { .. } => {
                    BootOutcome::StorageUnreadable
                }
            };
            return (AdcsState::safe_default(now_ms), outcome, None);
        }
    };

    let restored = Some(record.mode);
    if !config
        .thresholds
        .safe_to_resume(&record.angular_velocity, record.power_level_w)
    {
        let state = AdcsState::new(
            OperatingMode::SafeMode,
            now_ms,
            record.angular_velocity,
            record.power_level_w,
            record.mode,
        );
        return (state, BootOutcome::UnsafeToResume, restored);
    }

    let (mode, outcome) = match config.resume_policy {
        ResumePolicy::ResumeRestored if !record.mode.is_contingency() => {
            (record.mode, BootOutcome::ResumedRestored)
        }
        _ => (OperatingMode::Detumbling, BootOutcome::RestartedDetumbling),
    };
    let state = AdcsState::new(
        mode,
        now_ms,
        record.angular_velocity,
        record.power_level_w,
        record.mode,
    );
    (state, outcome, restored)
}

/// The ADCS mode state machine. Owns the live state and drives one control
/// cycle per call to [`ModeController::run_cycle`].
pub struct ModeController<P: Platform, N: NvmDevice, W: WatchdogTimer> {
    platform: P,
    store: PersistentStateStore<N>,
    watchdog: WatchdogSupervisor<W>,
    fault_manager: FaultManager,
    fault_log: FaultLog,
    escalation: EscalationPolicy,
    config: ControllerConfig,

    state: AdcsState,
    boot_report: BootReport,
    cycle_count: u32,
    /// Last profile commanded; `None` until the first command after boot.
    power_profile: Option<PowerProfile>,

    performance_history: Deque<PerformanceStats, PERFORMANCE_HISTORY_LEN>,
}

impl<P: Platform, N: NvmDevice, W: WatchdogTimer> ModeController<P, N, W> {
    /// Startup protocol: recover or rebuild the state from NVM, persist it if
    /// it changed, then arm the watchdog.
    pub fn boot(
        platform: P,
        nvm: N,
        watchdog_timer: W,
        config: ControllerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut store =
            PersistentStateStore::new(nvm, config.nvm_base_offset, config.max_write_attempts);
        let mut escalation = EscalationPolicy::new(config.escalation);

        let read = store.read();
        if let Err(e) = &read {
            warn!(error = %e, "No trustworthy persisted state, entering safe mode");
        }
        let (state, outcome, restored_mode) = resolve_boot_state(read, platform.now_ms(), &config);

        let mut persisted = false;
        if restored_mode != Some(state.current_mode) {
            match store.write(&state) {
                Ok(()) => {
                    persisted = true;
                    escalation.record_persistence(true);
                }
                Err(e) => {
                    warn!(error = %e, "Could not persist boot state");
                    escalation.record_persistence(false);
                }
            }
        }

        let boot_report = BootReport {
            outcome,
            restored_mode,
            resolved_mode: state.current_mode,
            persisted,
        };
        info!(
            outcome = ?outcome,
            restored = ?restored_mode,
            mode = %state.current_mode,
            pre_fault = %state.pre_fault_mode(),
            "ADCS boot complete"
        );

        let mut watchdog = WatchdogSupervisor::new(watchdog_timer, config.watchdog);
        watchdog.initialize(platform.now_ms());

        Ok(Self {
            platform,
            store,
            watchdog,
            fault_manager: FaultManager::new(config.thresholds),
            fault_log: FaultLog::new(),
            escalation,
            config,
            state,
            boot_report,
            cycle_count: 0,
            power_profile: None,
            performance_history: Deque::new(),
        })
    }

    /// Runs one control cycle. Every step is total; the watchdog refresh is
    /// always the final action.
    pub fn run_cycle(&mut self) -> CycleReport {
        let cycle_start = self.platform.now_ms();
        self.cycle_count = self.cycle_count.wrapping_add(1);
        let mut report = CycleReport::new(self.cycle_count, self.state.current_mode);

        let (sensors_consistent, inputs) = self.sample_sensors();

        let candidate =
            evaluate_transition(&self.state, &inputs, self.fault_manager.thresholds());
        let entered = self.change_mode(candidate, &mut report);

        // the entry hook has already dispatched the new mode's behavior
        if !entered {
            self.dispatch_behavior(self.state.current_mode);
        }

        let fault = self.fault_manager.check_faults(&self.state, sensors_consistent);
        self.fault_log.observe(fault, self.platform.now_ms());
        let escalation = self.escalation.evaluate(fault);
        self.perform_reset_action(escalation, &mut report);

        self.handle_fault(fault, &mut report);

        report.mode = self.state.current_mode;
        report.fault = fault;
        report.escalation = escalation;

        let cycle_end = self.platform.now_ms();
        report.elapsed_ms = cycle_end.wrapping_sub(cycle_start);
        self.record_performance(&report, cycle_end);
        debug!(
            cycle = report.cycle,
            mode = %report.mode,
            fault = ?report.fault,
            elapsed_ms = report.elapsed_ms,
            "Cycle complete"
        );

        self.watchdog.refresh(cycle_end);
        report
    }

    fn sample_sensors(&mut self) -> (bool, TransitionInputs) {
        let mut consistent = true;

        match self.platform.read_angular_velocity() {
            Ok(rate) => self.state.angular_velocity = rate,
            Err(e) => {
                consistent = false;
                warn!(error = %e, "Angular velocity read failed");
            }
        }

        match self.platform.read_power_level() {
            Ok(power) => self.state.power_level_w = power,
            Err(e) => {
                consistent = false;
                warn!(error = %e, "Power level read failed");
            }
        }

        match self.platform.consistency_ok() {
            Ok(ok) => consistent &= ok,
            Err(e) => {
                consistent = false;
                warn!(error = %e, "Sensor consistency check failed");
            }
        }

        // guidance predicates are only queried when the current mode uses them
        let mode = self.state.current_mode;
        let inputs = TransitionInputs {
            sun_vector_aligned: mode == OperatingMode::SunAcquisition
                && self.platform.sun_vector_aligned(),
            fault_recovery_complete: mode == OperatingMode::FaultRecovery
                && self.platform.fault_recovery_complete(),
        };

        (consistent, inputs)
    }

    /// Exit hook, commit, entry hook, persist. Returns false when `next` is
    /// already the current mode.
    fn change_mode(&mut self, next: OperatingMode, report: &mut CycleReport) -> bool {
        let previous = self.state.current_mode;
        if next == previous {
            return false;
        }

        self.platform.stand_down(previous);

        if next.is_contingency() {
            self.state.remember_operational_mode(previous);
        }
        self.state.current_mode = next;
        self.state.mode_entry_time_ms = self.platform.now_ms();
        self.dispatch_behavior(next);

        info!(
            from = %previous,
            to = %next,
            pre_fault = %self.state.pre_fault_mode(),
            "Mode transition"
        );
        report.transitions = report.transitions.saturating_add(1);

        self.persist(report);
        true
    }

    fn persist(&mut self, report: &mut CycleReport) {
        let succeeded = self.store.write(&self.state).is_ok();
        if succeeded {
            report.persisted = true;
        } else {
            report.persistence_failed = true;
        }
        self.escalation.record_persistence(succeeded);
    }

    fn dispatch_behavior(&mut self, mode: OperatingMode) {
        if !mode.is_contingency() {
            self.restore_nominal_profile();
        }

        match mode {
            OperatingMode::Detumbling => self.platform.command_detumble(),
            OperatingMode::SunAcquisition => self.platform.command_sun_acquisition(),
            OperatingMode::NominalPointing => {
                self.platform.command_pointing(self.config.pointing_target);
            }
            OperatingMode::SafeMode => self.command_power_profile(PowerProfile::Survival),
            OperatingMode::FaultRecovery => self.command_power_profile(PowerProfile::Conserve),
        }
    }

    fn command_power_profile(&mut self, profile: PowerProfile) {
        self.platform.command_power_profile(profile);
        self.power_profile = Some(profile);
    }

    /// Operational modes run on the nominal profile, but only once power
    /// clears the same margin that releases SafeMode. Until then the reduced
    /// profile left by a contingency stays in force.
    fn restore_nominal_profile(&mut self) {
        if self.power_profile != Some(PowerProfile::Nominal)
            && self
                .fault_manager
                .thresholds()
                .power_restored(self.state.power_level_w)
        {
            debug!(power_w = self.state.power_level_w, "Restoring nominal power profile");
            self.command_power_profile(PowerProfile::Nominal);
        }
    }

    fn perform_reset_action(&mut self, escalation: FaultType, report: &mut CycleReport) {
        match escalation {
            FaultType::SoftwareResetRequired => {
                warn!(
                    resets = self.escalation.get_state().software_resets,
                    "Sensor anomaly unresolved, restarting driver stack"
                );
                self.platform.reinitialize_drivers();
                self.change_mode(OperatingMode::FaultRecovery, report);
            }
            FaultType::Critical => {
                let delay_ms = self.config.escalation.power_cycle_delay_ms;
                error!(delay_ms, "Software recovery exhausted, requesting power cycle");
                self.platform.request_power_cycle(delay_ms);
                report.power_cycle_requested = true;
            }
            FaultType::None
            | FaultType::HighAngularRate
            | FaultType::LowPower
            | FaultType::SensorAnomaly => {}
        }
    }

    fn handle_fault(&mut self, fault: FaultType, report: &mut CycleReport) {
        match fault {
            FaultType::HighAngularRate => {
                warn!(rate = ?self.state.angular_velocity, "High angular rate");
                if !self.change_mode(OperatingMode::Detumbling, report) {
                    self.platform.command_detumble();
                }
            }
            FaultType::LowPower => {
                warn!(power_w = self.state.power_level_w, "Low power");
                if !self.change_mode(OperatingMode::SafeMode, report) {
                    self.command_power_profile(PowerProfile::Survival);
                }
            }
            FaultType::SensorAnomaly => {
                warn!("Sensor anomaly, reinitializing sensor array");
                self.platform.reinitialize_sensors();
            }
            FaultType::None | FaultType::SoftwareResetRequired | FaultType::Critical => {}
        }
    }

    fn record_performance(&mut self, report: &CycleReport, now_ms: u32) {
        let budget = self.config.cycle_budget_ms();
        if report.elapsed_ms > budget {
            warn!(elapsed_ms = report.elapsed_ms, budget_ms = budget, "Cycle exceeded its budget");
        }

        if self.performance_history.is_full() {
            self.performance_history.pop_front();
        }
        let _ = self.performance_history.push_back(PerformanceStats {
            cycle_time_ms: report.elapsed_ms,
            watchdog_remaining_ms: self.watchdog.remaining_ms(now_ms),
        });
    }

    pub fn state(&self) -> &AdcsState {
        &self.state
    }

    pub fn current_mode(&self) -> OperatingMode {
        self.state.current_mode
    }

    pub fn get_boot_report(&self) -> &BootReport {
        &self.boot_report
    }

    pub fn get_fault_log(&self) -> &FaultLog {
        &self.fault_log
    }

    pub fn get_escalation_state(&self) -> &EscalationState {
        self.escalation.get_state()
    }

    pub fn get_store_stats(&self) -> &StoreStats {
        self.store.get_stats()
    }

    pub fn get_watchdog_stats(&self) -> &WatchdogStats {
        self.watchdog.get_stats()
    }

    /// Timing of the most recent cycles, oldest first.
    pub fn get_performance_history(&self) -> impl Iterator<Item = &PerformanceStats> {
        self.performance_history.iter()
    }

    pub fn power_profile(&self) -> Option<PowerProfile> {
        self.power_profile
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn nvm_mut(&mut self) -> &mut N {
        self.store.device_mut()
    }

    pub fn watchdog_timer(&self) -> &W {
        self.watchdog.timer()
    }

    /// Tears the controller down into its hardware, as a reset would.
    pub fn into_parts(self) -> (P, N, W) {
        (self.platform, self.store.into_device(), self.watchdog.into_timer())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(mode: OperatingMode, rate: [f32; 3], power: f32) -> PersistedRecord {
        PersistedRecord {
            mode,
            entry_time_ms: 1_234,
            angular_velocity: rate,
            power_level_w: power,
        }
    }

    #[test]
    fn test_boot_resolution_cases() {
        let config = ControllerConfig::default();

        let (state, outcome, restored) =
            resolve_boot_state(Err(StoreError::CorruptState), 50, &config);
        assert_eq!(outcome, BootOutcome::CorruptRecord);
        assert_eq!(state.current_mode, OperatingMode::SafeMode);
        assert_eq!(state.mode_entry_time_ms, 50);
        assert_eq!(restored, None);

        let (state, outcome, _) = resolve_boot_state(
            Ok(record(OperatingMode::NominalPointing, [0.2, 0.0, 0.0], 6.0)),
            50,
            &config,
        );
        assert_eq!(outcome, BootOutcome::UnsafeToResume);
        assert_eq!(state.current_mode, OperatingMode::SafeMode);
        assert_eq!(state.pre_fault_mode(), OperatingMode::NominalPointing);

        let (state, outcome, _) = resolve_boot_state(
            Ok(record(OperatingMode::Detumbling, [0.01, 0.01, 0.0], 6.0)),
            50,
            &config,
        );
        assert_eq!(outcome, BootOutcome::RestartedDetumbling);
        assert_eq!(state.current_mode, OperatingMode::Detumbling);
    }

    #[test]
    fn test_boot_low_power_is_unsafe() {
        let (state, outcome, _) = resolve_boot_state(
            Ok(record(OperatingMode::SunAcquisition, [0.0; 3], 4.0)),
            0,
            &ControllerConfig::default(),
        );
        assert_eq!(outcome, BootOutcome::UnsafeToResume);
        assert_eq!(state.current_mode, OperatingMode::SafeMode);
        assert_eq!(state.pre_fault_mode(), OperatingMode::SunAcquisition);
    }

    #[test]
    fn test_resume_policy() {
        let config = ControllerConfig {
            resume_policy: ResumePolicy::ResumeRestored,
            ..ControllerConfig::default()
        };

        let (state, outcome, _) = resolve_boot_state(
            Ok(record(OperatingMode::NominalPointing, [0.0; 3], 6.0)),
            0,
            &config,
        );
        assert_eq!(outcome, BootOutcome::ResumedRestored);
        assert_eq!(state.current_mode, OperatingMode::NominalPointing);

        let (state, outcome, _) =
            resolve_boot_state(Ok(record(OperatingMode::SafeMode, [0.0; 3], 6.0)), 0, &config);
        assert_eq!(outcome, BootOutcome::RestartedDetumbling);
        assert_eq!(state.current_mode, OperatingMode::Detumbling);
    }
}
