#![allow(dead_code)]

use adcs_supervisor::hal::{
    ActuatorSuite, Clock, ConsistencyMonitor, HardwareError, ModeConditions, NvmDevice, NvmError,
    PointingTarget, PowerCycleSupervisor, PowerProfile, SensorSuite, WatchdogTimer,
};
use adcs_supervisor::persistence::{PersistedRecord, PersistentStateStore};
use adcs_supervisor::sim::{RamNvm, SimClock};
use adcs_supervisor::{AdcsState, ControllerConfig, ModeController, OperatingMode};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ReadRate,
    ReadPower,
    ConsistencyCheck,
    SunCheck,
    RecoveryCheck,
    Detumble,
    SunAcquisition,
    Pointing(PointingTarget),
    Profile(PowerProfile),
    StandDown(OperatingMode),
    ReinitSensors,
    ReinitDrivers,
    PowerCycle(u32),
    NvmWrite { offset: u32, len: usize },
    WatchdogStart(u32),
    WatchdogFeed,
}

#[derive(Debug, Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<Event>>>);

impl Journal {
    pub fn push(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.0.borrow().iter().filter(|e| pred(e)).count()
    }

    pub fn last(&self) -> Option<Event> {
        self.0.borrow().last().cloned()
    }
}

/// Platform whose sensor values are set directly by the test. Every call is
/// journaled and advances the shared clock by `call_latency_ms`.
#[derive(Debug)]
pub struct ScriptedPlatform {
    pub clock: SimClock,
    pub journal: Journal,
    pub angular_velocity: [f32; 3],
    pub power_level_w: f32,
    pub consistent: bool,
    pub sun_aligned: bool,
    pub recovery_complete: bool,
    pub rate_read_error: Option<HardwareError>,
    pub power_read_error: Option<HardwareError>,
    pub consistency_error: Option<HardwareError>,
    pub call_latency_ms: u32,
}

impl ScriptedPlatform {
    pub fn new(clock: SimClock, journal: Journal) -> Self {
        Self {
            clock,
            journal,
            angular_velocity: [0.01, 0.01, 0.0],
            power_level_w: 6.0,
            consistent: true,
            sun_aligned: false,
            recovery_complete: false,
            rate_read_error: None,
            power_read_error: None,
            consistency_error: None,
            call_latency_ms: 0,
        }
    }

    fn call(&self, event: Event) {
        self.journal.push(event);
        self.clock.advance(self.call_latency_ms);
    }
}

impl SensorSuite for ScriptedPlatform {
    fn read_angular_velocity(&mut self) -> Result<[f32; 3], HardwareError> {
        self.call(Event::ReadRate);
        match self.rate_read_error {
            Some(e) => Err(e),
            None => Ok(self.angular_velocity),
        }
    }

    fn read_power_level(&mut self) -> Result<f32, HardwareError> {
        self.call(Event::ReadPower);
        match self.power_read_error {
            Some(e) => Err(e),
            None => Ok(self.power_level_w),
        }
    }

    fn reinitialize_sensors(&mut self) {
        self.call(Event::ReinitSensors);
    }

    fn reinitialize_drivers(&mut self) {
        self.call(Event::ReinitDrivers);
    }
}

impl ConsistencyMonitor for ScriptedPlatform {
    fn consistency_ok(&mut self) -> Result<bool, HardwareError> {
        self.call(Event::ConsistencyCheck);
        match self.consistency_error {
            Some(e) => Err(e),
            None => Ok(self.consistent),
        }
    }
}

impl ModeConditions for ScriptedPlatform {
    fn sun_vector_aligned(&mut self) -> bool {
        self.call(Event::SunCheck);
        self.sun_aligned
    }

    fn fault_recovery_complete(&mut self) -> bool {
        self.call(Event::RecoveryCheck);
        self.recovery_complete
    }
}

impl ActuatorSuite for ScriptedPlatform {
    fn command_detumble(&mut self) {
        self.call(Event::Detumble);
    }

    fn command_sun_acquisition(&mut self) {
        self.call(Event::SunAcquisition);
    }

    fn command_pointing(&mut self, target: PointingTarget) {
        self.call(Event::Pointing(target));
    }

    fn command_power_profile(&mut self, profile: PowerProfile) {
        self.call(Event::Profile(profile));
    }

    fn stand_down(&mut self, mode: OperatingMode) {
        self.call(Event::StandDown(mode));
    }
}

impl Clock for ScriptedPlatform {
    fn now_ms(&self) -> u32 {
        self.clock.now_ms()
    }
}

impl PowerCycleSupervisor for ScriptedPlatform {
    fn request_power_cycle(&mut self, delay_ms: u32) {
        self.call(Event::PowerCycle(delay_ms));
    }
}

/// RAM NVM that journals successful and failed write calls.
#[derive(Debug)]
pub struct JournalNvm {
    pub inner: RamNvm,
    journal: Journal,
    clock: SimClock,
    pub write_latency_ms: u32,
}

impl JournalNvm {
    pub fn new(inner: RamNvm, journal: Journal, clock: SimClock) -> Self {
        Self { inner, journal, clock, write_latency_ms: 0 }
    }
}

impl NvmDevice for JournalNvm {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), NvmError> {
        self.inner.read(offset, buf)
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> nb::Result<(), NvmError> {
        self.journal.push(Event::NvmWrite { offset, len: data.len() });
        self.clock.advance(self.write_latency_ms);
        self.inner.write(offset, data)
    }
}

#[derive(Debug)]
pub struct JournalWatchdog {
    journal: Journal,
    pub feeds: u32,
}

impl JournalWatchdog {
    pub fn new(journal: Journal) -> Self {
        Self { journal, feeds: 0 }
    }
}

impl WatchdogTimer for JournalWatchdog {
    fn start(&mut self, timeout_ms: u32) {
        self.journal.push(Event::WatchdogStart(timeout_ms));
    }

    fn feed(&mut self) {
        self.feeds += 1;
        self.journal.push(Event::WatchdogFeed);
    }
}

pub type TestController = ModeController<ScriptedPlatform, JournalNvm, JournalWatchdog>;

pub struct Harness {
    pub clock: SimClock,
    pub journal: Journal,
}

impl Harness {
    pub fn new() -> Self {
        Self { clock: SimClock::new(), journal: Journal::default() }
    }

    pub fn platform(&self) -> ScriptedPlatform {
        ScriptedPlatform::new(self.clock.clone(), self.journal.clone())
    }

    pub fn boot(&self, nvm: RamNvm, config: ControllerConfig) -> TestController {
        self.boot_with(self.platform(), nvm, config)
    }

    pub fn boot_with(
        &self,
        platform: ScriptedPlatform,
        nvm: RamNvm,
        config: ControllerConfig,
    ) -> TestController {
        let nvm = JournalNvm::new(nvm, self.journal.clone(), self.clock.clone());
        let watchdog = JournalWatchdog::new(self.journal.clone());
        ModeController::boot(platform, nvm, watchdog, config).expect("valid test configuration")
    }
}

/// An NVM image holding one committed record.
pub fn nvm_with_record(
    mode: OperatingMode,
    angular_velocity: [f32; 3],
    power_level_w: f32,
) -> RamNvm {
    let mut store = PersistentStateStore::with_defaults(RamNvm::default());
    let pre_fault = OperatingMode::Detumbling;
    let state = AdcsState::new(mode, 100, angular_velocity, power_level_w, pre_fault);
    store.write(&state).expect("write to fresh RAM NVM");
    store.into_device()
}

/// Reads back whatever the controller last persisted.
pub fn stored_record(controller: &mut TestController) -> PersistedRecord {
    let image = controller.nvm_mut().inner.clone();
    PersistentStateStore::with_defaults(image)
        .read()
        .expect("a committed record")
}

pub fn stored_mode(controller: &mut TestController) -> OperatingMode {
    stored_record(controller).mode
}

/// Index of the first event matching `pred`.
pub fn position(events: &[Event], pred: impl Fn(&Event) -> bool) -> Option<usize> {
    events.iter().position(pred)
}

pub fn is_nvm_write(event: &Event) -> bool {
    matches!(event, Event::NvmWrite { .. })
}

pub fn resume_config() -> ControllerConfig {
    ControllerConfig {
        resume_policy: adcs_supervisor::ResumePolicy::ResumeRestored,
        ..ControllerConfig::default()
    }
}
