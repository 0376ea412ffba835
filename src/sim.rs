//! Host-side stand-ins for the spacecraft hardware.
//!
//! The models are deliberately coarse: enough physics for the supervisor to
//! walk through its modes, plus hooks to inject tumbling, power loss, sensor
//! disagreement, NVM failures and watchdog expiry.

use crate::hal::{
    ActuatorSuite, Clock, ConsistencyMonitor, HardwareError, ModeConditions, NvmDevice, NvmError,
    PointingTarget, PowerCycleSupervisor, PowerProfile, SensorSuite, WatchdogTimer,
};
use crate::state::OperatingMode;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::rc::Rc;
use tracing::{debug, info};

// Rate damping while magnetorquers run: fraction of rate left after 1 s
const DETUMBLE_RETENTION_PER_S: f32 = 0.8;
// Residual disturbance torque adds this much rate per second on axis x
const DISTURBANCE_RAD_S_PER_S: f32 = 0.000_2;
const SUN_ACQUISITION_MS: u32 = 3_000;
const DRIVER_RESTART_MS: u32 = 2_000;

const BATTERY_CAPACITY_WH: f32 = 20.0;
const SOLAR_GENERATION_W: f32 = 6.0;
const ORBIT_PERIOD_MS: u32 = 5_400_000;
const ECLIPSE_FRACTION: f32 = 0.35;
// Bus power reported at empty and full charge
const BUS_POWER_EMPTY_W: f32 = 2.0;
const BUS_POWER_FULL_W: f32 = 8.0;

pub const DEFAULT_NVM_SIZE: usize = 256;

/// Shared simulated time, in milliseconds.
#[derive(Debug, Clone, Default)]
pub struct SimClock(Rc<Cell<u32>>);

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u32) {
        self.0.set(self.0.get().wrapping_add(ms));
    }

    pub fn set(&self, ms: u32) {
        self.0.set(ms);
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u32 {
        self.0.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorHealth {
    Nominal,
    /// Cleared by re-initializing the sensor array.
    Transient,
    /// Cleared only by restarting the driver stack.
    Persistent,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Actuation {
    Idle,
    Detumble,
    SunAcquisition,
    Pointing(PointingTarget),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpacecraftState {
    pub angular_velocity: [f32; 3],
    pub battery_wh: f32,
    pub actuation: Actuation,
    pub power_profile: PowerProfile,
    pub sensor_health: SensorHealth,
    pub sun_acquisition_elapsed_ms: u32,
    pub sensor_reinitializations: u32,
    pub driver_restarts: u32,
    pub power_cycle_due_at: Option<u32>,
}

/// Simulated spacecraft implementing every platform collaborator.
#[derive(Debug)]
pub struct SimulatedSpacecraft {
    clock: SimClock,
    state: SpacecraftState,
    read_failures_remaining: u32,
    drivers_ready_at: Option<u32>,
    orbit_phase_ms: u32,
}

impl SimulatedSpacecraft {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            state: SpacecraftState {
                angular_velocity: [0.0; 3],
                battery_wh: BATTERY_CAPACITY_WH * 0.8,
                actuation: Actuation::Idle,
                power_profile: PowerProfile::Nominal,
                sensor_health: SensorHealth::Nominal,
                sun_acquisition_elapsed_ms: 0,
                sensor_reinitializations: 0,
                driver_restarts: 0,
                power_cycle_due_at: None,
            },
            read_failures_remaining: 0,
            drivers_ready_at: None,
            orbit_phase_ms: 0,
        }
    }

    /// Integrates the models over `dt_ms` and advances the shared clock.
    pub fn advance(&mut self, dt_ms: u32) {
        let dt_s = dt_ms as f32 / 1000.0;

        // the pointing loop also holds body rates down
        if matches!(self.state.actuation, Actuation::Detumble | Actuation::Pointing(_)) {
            let retention = DETUMBLE_RETENTION_PER_S.powf(dt_s);
            for axis in &mut self.state.angular_velocity {
                *axis *= retention;
            }
        }
        self.state.angular_velocity[0] += DISTURBANCE_RAD_S_PER_S * dt_s;

        if self.state.actuation == Actuation::SunAcquisition {
            self.state.sun_acquisition_elapsed_ms =
                self.state.sun_acquisition_elapsed_ms.saturating_add(dt_ms);
        }

        self.orbit_phase_ms = (self.orbit_phase_ms + dt_ms) % ORBIT_PERIOD_MS;
        let sunlit = (self.orbit_phase_ms as f32 / ORBIT_PERIOD_MS as f32) >= ECLIPSE_FRACTION;
        let generation = if sunlit { SOLAR_GENERATION_W } else { 0.0 };
        let net_w = generation - self.load_w();
        self.state.battery_wh =
            (self.state.battery_wh + net_w * dt_s / 3600.0).clamp(0.0, BATTERY_CAPACITY_WH);

        self.clock.advance(dt_ms);
    }

    fn load_w(&self) -> f32 {
        let base = match self.state.power_profile {
            PowerProfile::Nominal => 4.0,
            PowerProfile::Conserve => 2.5,
            PowerProfile::Survival => 1.2,
        };
        match self.state.actuation {
            Actuation::Detumble | Actuation::SunAcquisition => base + 0.8,
            Actuation::Pointing(_) => base + 0.5,
            Actuation::Idle => base,
        }
    }

    fn bus_power_w(&self) -> f32 {
        let soc = self.state.battery_wh / BATTERY_CAPACITY_WH;
        BUS_POWER_EMPTY_W + (BUS_POWER_FULL_W - BUS_POWER_EMPTY_W) * soc
    }

    pub fn inject_tumble(&mut self, angular_velocity: [f32; 3]) {
        info!(?angular_velocity, "Injecting tumble");
        self.state.angular_velocity = angular_velocity;
    }

    /// Sets the battery charge as a fraction of capacity.
    pub fn set_battery_fraction(&mut self, fraction: f32) {
        self.state.battery_wh = BATTERY_CAPACITY_WH * fraction.clamp(0.0, 1.0);
    }

    pub fn set_sensor_health(&mut self, health: SensorHealth) {
        self.state.sensor_health = health;
    }

    /// The next `count` sensor reads time out.
    pub fn fail_sensor_reads(&mut self, count: u32) {
        self.read_failures_remaining = count;
    }

    pub fn get_state(&self) -> &SpacecraftState {
        &self.state
    }

    /// True once a requested power cycle's delay has elapsed.
    pub fn power_cycle_due(&self) -> bool {
        self.state
            .power_cycle_due_at
            .is_some_and(|at| self.clock.now_ms().wrapping_sub(at) < u32::MAX / 2)
    }

    /// Models the supervisor circuit cutting and restoring power: actuators
    /// stop and pending requests are cleared, the physical state persists.
    pub fn power_cycle(&mut self) {
        self.state.actuation = Actuation::Idle;
        self.state.power_profile = PowerProfile::Nominal;
        self.state.power_cycle_due_at = None;
        self.state.sun_acquisition_elapsed_ms = 0;
        self.drivers_ready_at = None;
        self.read_failures_remaining = 0;
    }

    fn take_read_failure(&mut self) -> bool {
        if self.read_failures_remaining > 0 {
            self.read_failures_remaining -= 1;
            true
        } else {
            false
        }
    }
}

impl SensorSuite for SimulatedSpacecraft {
    fn read_angular_velocity(&mut self) -> Result<[f32; 3], HardwareError> {
        if self.take_read_failure() {
            return Err(HardwareError::Timeout);
        }
        Ok(self.state.angular_velocity)
    }

    fn read_power_level(&mut self) -> Result<f32, HardwareError> {
        Ok(self.bus_power_w())
    }

    fn reinitialize_sensors(&mut self) {
        self.state.sensor_reinitializations += 1;
        if self.state.sensor_health == SensorHealth::Transient {
            self.state.sensor_health = SensorHealth::Nominal;
        }
    }

    fn reinitialize_drivers(&mut self) {
        self.state.driver_restarts += 1;
        self.state.sensor_health = SensorHealth::Nominal;
        self.drivers_ready_at = Some(self.clock.now_ms().wrapping_add(DRIVER_RESTART_MS));
    }
}

impl ConsistencyMonitor for SimulatedSpacecraft {
    fn consistency_ok(&mut self) -> Result<bool, HardwareError> {
        Ok(self.state.sensor_health == SensorHealth::Nominal)
    }
}

impl ModeConditions for SimulatedSpacecraft {
    fn sun_vector_aligned(&mut self) -> bool {
        self.state.sun_acquisition_elapsed_ms >= SUN_ACQUISITION_MS
    }

    fn fault_recovery_complete(&mut self) -> bool {
        match self.drivers_ready_at {
            Some(at) => self.clock.now_ms().wrapping_sub(at) < u32::MAX / 2,
            None => true,
        }
    }
}

impl ActuatorSuite for SimulatedSpacecraft {
    fn command_detumble(&mut self) {
        self.state.actuation = Actuation::Detumble;
    }

    fn command_sun_acquisition(&mut self) {
        self.state.actuation = Actuation::SunAcquisition;
    }

    fn command_pointing(&mut self, target: PointingTarget) {
        self.state.actuation = Actuation::Pointing(target);
    }

    fn command_power_profile(&mut self, profile: PowerProfile) {
        if profile != self.state.power_profile {
            debug!(?profile, "Power profile change");
        }
        self.state.power_profile = profile;
    }

    fn stand_down(&mut self, mode: OperatingMode) {
        if mode == OperatingMode::SunAcquisition {
            self.state.sun_acquisition_elapsed_ms = 0;
        }
        self.state.actuation = Actuation::Idle;
    }
}

impl Clock for SimulatedSpacecraft {
    fn now_ms(&self) -> u32 {
        self.clock.now_ms()
    }
}

impl PowerCycleSupervisor for SimulatedSpacecraft {
    fn request_power_cycle(&mut self, delay_ms: u32) {
        self.state.power_cycle_due_at = Some(self.clock.now_ms().wrapping_add(delay_ms));
    }
}

/// RAM-backed NVM with failure injection. Erased bytes read as `0xFF`.
#[derive(Debug, Clone)]
pub struct RamNvm {
    storage: Vec<u8>,
    busy_writes: u32,
    failing_writes: u32,
    power_loss_after: Option<usize>,
    powered: bool,
    bytes_written: usize,
    write_calls: u32,
}

impl Default for RamNvm {
    fn default() -> Self {
        Self::new(DEFAULT_NVM_SIZE)
    }
}

impl RamNvm {
    pub fn new(size: usize) -> Self {
        Self {
            storage: vec![0xFF; size],
            busy_writes: 0,
            failing_writes: 0,
            power_loss_after: None,
            powered: true,
            bytes_written: 0,
            write_calls: 0,
        }
    }

    /// The next `count` writes report the device busy.
    pub fn set_busy_writes(&mut self, count: u32) {
        self.busy_writes = count;
    }

    /// The next `count` writes fail.
    pub fn set_failing_writes(&mut self, count: u32) {
        self.failing_writes = count;
    }

    /// Power dies after `bytes` more bytes reach the medium. The write in
    /// progress is torn and every later write fails until power returns.
    pub fn simulate_power_loss_after(&mut self, bytes: usize) {
        self.power_loss_after = Some(bytes);
    }

    pub fn restore_power(&mut self) {
        self.powered = true;
        self.power_loss_after = None;
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn flip_bit(&mut self, offset: usize, bit: u8) {
        self.storage[offset] ^= 1 << (bit % 8);
    }

    pub fn contents(&self) -> &[u8] {
        &self.storage
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub fn write_calls(&self) -> u32 {
        self.write_calls
    }

    fn range(&self, offset: u32, len: usize) -> Result<core::ops::Range<usize>, NvmError> {
        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.storage.len() => Ok(start..end),
            _ => Err(NvmError::OutOfRange { offset, len }),
        }
    }
}

impl NvmDevice for RamNvm {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), NvmError> {
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.storage[range]);
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> nb::Result<(), NvmError> {
        self.write_calls += 1;

        if !self.powered {
            return Err(nb::Error::Other(NvmError::WriteFailed));
        }
        if self.busy_writes > 0 {
            self.busy_writes -= 1;
            return Err(nb::Error::WouldBlock);
        }
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(nb::Error::Other(NvmError::WriteFailed));
        }

        let range = self.range(offset, data.len()).map_err(nb::Error::Other)?;

        if let Some(remaining) = self.power_loss_after {
            if remaining < data.len() {
                let start = range.start;
                self.storage[start..start + remaining].copy_from_slice(&data[..remaining]);
                self.bytes_written += remaining;
                self.power_loss_after = Some(0);
                self.powered = false;
                return Err(nb::Error::Other(NvmError::WriteFailed));
            }
            self.power_loss_after = Some(remaining - data.len());
        }

        self.storage[range].copy_from_slice(data);
        self.bytes_written += data.len();
        Ok(())
    }
}

/// Software model of the hardware watchdog, driven by [`SimClock`].
#[derive(Debug, Clone)]
pub struct HostWatchdog {
    clock: SimClock,
    timeout_ms: Option<u32>,
    last_feed_ms: u32,
    feeds: u32,
}

impl HostWatchdog {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            timeout_ms: None,
            last_feed_ms: 0,
            feeds: 0,
        }
    }

    /// True when the countdown has run out; on hardware the processor would
    /// already be resetting.
    pub fn has_expired(&self) -> bool {
        match self.timeout_ms {
            Some(timeout) => self.clock.now_ms().wrapping_sub(self.last_feed_ms) > timeout,
            None => false,
        }
    }

    pub fn feeds(&self) -> u32 {
        self.feeds
    }

    pub fn is_running(&self) -> bool {
        self.timeout_ms.is_some()
    }
}

impl WatchdogTimer for HostWatchdog {
    fn start(&mut self, timeout_ms: u32) {
        self.timeout_ms = Some(timeout_ms);
        self.last_feed_ms = self.clock.now_ms();
    }

    fn feed(&mut self) {
        self.last_feed_ms = self.clock.now_ms();
        self.feeds += 1;
    }
}
