//! Collaborator interfaces the supervisor drives.
//!
//! Sensor drivers, actuator control laws, guidance computations and the
//! storage and watchdog peripherals all live behind these traits so the mode
//! state machine runs unchanged against flight hardware, the host simulator
//! in [`crate::sim`], or a scripted test double. Every call is expected to
//! return within a bounded, small latency.

use crate::state::OperatingMode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A failed sensor transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HardwareError {
    #[error("sensor did not respond in time")]
    Timeout,
    #[error("sensor bus error")]
    Bus,
    #[error("sensor returned an out-of-range value")]
    InvalidReading,
}

/// A failed storage transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NvmError {
    #[error("address {offset:#x}+{len} is outside the device")]
    OutOfRange { offset: u32, len: usize },
    #[error("device write failed")]
    WriteFailed,
    #[error("device read failed")]
    ReadFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerProfile {
    Nominal,
    /// Payload off, reduced actuation duty cycle.
    Conserve,
    /// Only the flight computer, receiver and heaters stay powered.
    Survival,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PointingTarget {
    Nadir,
    SunTracking,
    /// Inertial attitude as a unit quaternion `[w, x, y, z]`.
    Inertial([f32; 4]),
}

pub trait SensorSuite {
    fn read_angular_velocity(&mut self) -> Result<[f32; 3], HardwareError>;
    fn read_power_level(&mut self) -> Result<f32, HardwareError>;
    /// Re-initializes the sensor array after a consistency failure.
    fn reinitialize_sensors(&mut self);
    /// Restarts the sensor and driver stack without restarting the processor.
    fn reinitialize_drivers(&mut self);
}

/// Redundant-sensor cross check.
pub trait ConsistencyMonitor {
    fn consistency_ok(&mut self) -> Result<bool, HardwareError>;
}

/// Guidance predicates the transition table depends on.
pub trait ModeConditions {
    fn sun_vector_aligned(&mut self) -> bool;
    fn fault_recovery_complete(&mut self) -> bool;
}

/// Fire-and-forget actuation commands; the supervisor never waits for
/// confirmation.
pub trait ActuatorSuite {
    fn command_detumble(&mut self);
    fn command_sun_acquisition(&mut self);
    fn command_pointing(&mut self, target: PointingTarget);
    fn command_power_profile(&mut self, profile: PowerProfile);
    /// Deactivates whatever actuation `mode` had running.
    fn stand_down(&mut self, mode: OperatingMode);
}

/// Monotonic millisecond clock. Wraps at `u32::MAX`.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

/// The isolated circuit able to power-cycle the main computer.
pub trait PowerCycleSupervisor {
    fn request_power_cycle(&mut self, delay_ms: u32);
}

/// Everything the mode controller needs from the spacecraft besides storage
/// and the watchdog.
pub trait Platform:
    SensorSuite + ConsistencyMonitor + ModeConditions + ActuatorSuite + Clock + PowerCycleSupervisor
{
}

impl<T> Platform for T where
    T: SensorSuite
        + ConsistencyMonitor
        + ModeConditions
        + ActuatorSuite
        + Clock
        + PowerCycleSupervisor
{
}

/// Byte-addressable non-volatile memory.
///
/// Writes report `nb::Error::WouldBlock` while the device is busy; callers
/// retry a bounded number of times.
pub trait NvmDevice {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), NvmError>;
    fn write(&mut self, offset: u32, data: &[u8]) -> nb::Result<(), NvmError>;
}

/// Hardware countdown timer that resets the processor when it expires.
pub trait WatchdogTimer {
    fn start(&mut self, timeout_ms: u32);
    fn feed(&mut self);
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex {
    //! Bindings for Cortex-M flight computers.

    use super::Clock;
    use core::cell::Cell;
    use cortex_m::peripheral::DWT;

    /// Millisecond clock derived from the DWT cycle counter. The counter must
    /// be enabled and `now_ms` called at least once per counter wrap.
    pub struct DwtClock {
        cycles_per_ms: u32,
        last_cycles: Cell<u32>,
        elapsed_ms: Cell<u32>,
        remainder: Cell<u32>,
    }

    impl DwtClock {
        pub fn new(core_clock_hz: u32) -> Self {
            Self {
                cycles_per_ms: (core_clock_hz / 1000).max(1),
                last_cycles: Cell::new(DWT::cycle_count()),
                elapsed_ms: Cell::new(0),
                remainder: Cell::new(0),
            }
        }
    }

    impl Clock for DwtClock {
        fn now_ms(&self) -> u32 {
            let now = DWT::cycle_count();
            let delta = now
                .wrapping_sub(self.last_cycles.get())
                .wrapping_add(self.remainder.get());
            self.last_cycles.set(now);
            self.remainder.set(delta % self.cycles_per_ms);
            let ms = self.elapsed_ms.get().wrapping_add(delta / self.cycles_per_ms);
            self.elapsed_ms.set(ms);
            ms
        }
    }
}
