use adcs_supervisor::hal::{Clock, NvmDevice};
use adcs_supervisor::sim::{HostWatchdog, RamNvm, SensorHealth, SimClock, SimulatedSpacecraft};
use adcs_supervisor::{BootOutcome, ControllerConfig, FaultType, ModeController, OperatingMode};

type Controller = ModeController<SimulatedSpacecraft, RamNvm, HostWatchdog>;

fn boot(clock: &SimClock, spacecraft: SimulatedSpacecraft, nvm: RamNvm) -> Controller {
    let watchdog = HostWatchdog::new(clock.clone());
    ModeController::boot(spacecraft, nvm, watchdog, ControllerConfig::default()).unwrap()
}

/// Runs cycles until `mode` is reached; returns the number of cycles taken.
fn run_until(controller: &mut Controller, mode: OperatingMode, max_cycles: u32) -> Option<u32> {
    let period = controller.config().cycle_period_ms;
    for cycle in 1..=max_cycles {
        let report = controller.run_cycle();
        controller.platform_mut().advance(period);
        assert!(!controller.watchdog_timer().has_expired());
        if report.mode == mode {
            return Some(cycle);
        }
    }
    None
}

fn reboot(controller: Controller, clock: &SimClock) -> Controller {
    let (mut spacecraft, mut nvm, _) = controller.into_parts();
    spacecraft.power_cycle();
    nvm.restore_power();
    boot(clock, spacecraft, nvm)
}

fn pointing_spacecraft() -> (SimClock, Controller) {
    let clock = SimClock::new();
    let mut controller = boot(&clock, SimulatedSpacecraft::new(clock.clone()), RamNvm::default());
    assert!(run_until(&mut controller, OperatingMode::NominalPointing, 40).is_some());
    (clock, controller)
}

#[test]
fn test_blank_spacecraft_reaches_nominal_pointing() {
    let clock = SimClock::new();
    let mut controller = boot(&clock, SimulatedSpacecraft::new(clock.clone()), RamNvm::default());
    assert_eq!(controller.current_mode(), OperatingMode::SafeMode);

    let cycles = run_until(&mut controller, OperatingMode::NominalPointing, 40);
    assert!(cycles.is_some(), "never reached nominal pointing");
    assert!(controller.get_fault_log().get_fault_history().is_empty());
    assert!(controller.watchdog_timer().feeds() >= cycles.unwrap());
}

#[test]
fn test_tumble_is_damped_and_pointing_resumes() {
    let (_clock, mut controller) = pointing_spacecraft();

    controller.platform_mut().inject_tumble([0.25, -0.2, 0.15]);
    let report = controller.run_cycle();
    assert_eq!(report.fault, FaultType::HighAngularRate);
    assert_eq!(report.mode, OperatingMode::Detumbling);

    assert!(run_until(&mut controller, OperatingMode::SunAcquisition, 60).is_some());
    assert!(run_until(&mut controller, OperatingMode::NominalPointing, 40).is_some());
    let rate = controller.state().angular_velocity;
    assert!(rate.iter().all(|w| w.abs() <= 0.1), "rate {rate:?}");
}

#[test]
fn test_brown_out_waits_in_safe_mode() {
    let (_clock, mut controller) = pointing_spacecraft();

    controller.platform_mut().set_battery_fraction(0.1);
    let report = controller.run_cycle();
    assert_eq!(report.fault, FaultType::LowPower);
    assert_eq!(report.mode, OperatingMode::SafeMode);
    assert!(run_until(&mut controller, OperatingMode::NominalPointing, 10).is_none());

    controller.platform_mut().set_battery_fraction(0.9);
    assert_eq!(run_until(&mut controller, OperatingMode::NominalPointing, 2), Some(1));
}

#[test]
fn test_watchdog_reset_restarts_from_persisted_state() {
    let (clock, mut controller) = pointing_spacecraft();

    let stall = controller.config().watchdog.timeout_ms + 1;
    controller.platform_mut().advance(stall);
    assert!(controller.watchdog_timer().has_expired());

    let mut controller = reboot(controller, &clock);
    let report = *controller.get_boot_report();
    assert_eq!(report.outcome, BootOutcome::RestartedDetumbling);
    assert_eq!(report.restored_mode, Some(OperatingMode::NominalPointing));
    assert_eq!(controller.current_mode(), OperatingMode::Detumbling);
    assert!(controller.watchdog_timer().is_running());
    assert!(!controller.watchdog_timer().has_expired());

    assert!(run_until(&mut controller, OperatingMode::NominalPointing, 40).is_some());
}

#[test]
fn test_power_loss_mid_write_keeps_previous_record() {
    let (clock, mut controller) = pointing_spacecraft();

    controller.nvm_mut().simulate_power_loss_after(12);
    controller.platform_mut().set_battery_fraction(0.1);
    let report = controller.run_cycle();
    assert_eq!(report.mode, OperatingMode::SafeMode);
    assert!(report.persistence_failed);

    let mut controller = reboot(controller, &clock);
    assert_eq!(
        controller.get_boot_report().restored_mode,
        Some(OperatingMode::NominalPointing)
    );

    // the real bus power is still low, so the first cycle falls back to safe mode
    let report = controller.run_cycle();
    assert_eq!(report.mode, OperatingMode::SafeMode);
    assert!(report.persisted);
}

#[test]
fn test_corrupted_nvm_after_reset_boots_safe() {
    let (clock, controller) = pointing_spacecraft();
    let (spacecraft, mut nvm, _) = controller.into_parts();

    // corrupt the newest record, whichever slot holds it
    let mut probe = adcs_supervisor::PersistentStateStore::with_defaults(nvm.clone());
    probe.read().unwrap();
    let slot = probe.get_stats().active_slot.unwrap();
    let offset = usize::from(slot) * adcs_supervisor::persistence::SLOT_STRIDE as usize;
    nvm.flip_bit(offset + 2, 6);

    let controller = boot(&clock, spacecraft, nvm);
    assert_eq!(controller.get_boot_report().outcome, BootOutcome::CorruptRecord);
    assert_eq!(controller.current_mode(), OperatingMode::SafeMode);
}

#[test]
fn test_persistent_anomaly_recovers_through_driver_restart() {
    let (_clock, mut controller) = pointing_spacecraft();
    controller.platform_mut().set_sensor_health(SensorHealth::Persistent);

    let cycles = run_until(&mut controller, OperatingMode::FaultRecovery, 30);
    assert_eq!(cycles, Some(20));
    assert_eq!(controller.platform().get_state().driver_restarts, 1);
    assert_eq!(controller.state().pre_fault_mode(), OperatingMode::NominalPointing);

    assert!(run_until(&mut controller, OperatingMode::NominalPointing, 20).is_some());
    assert_eq!(controller.get_escalation_state().software_resets, 1);
}

#[test]
fn test_transient_anomaly_cleared_by_sensor_reinit() {
    let (_clock, mut controller) = pointing_spacecraft();
    controller.platform_mut().set_sensor_health(SensorHealth::Transient);

    assert_eq!(controller.run_cycle().fault, FaultType::SensorAnomaly);
    assert_eq!(controller.run_cycle().fault, FaultType::None);
    assert_eq!(controller.current_mode(), OperatingMode::NominalPointing);
    assert_eq!(controller.platform().get_state().sensor_reinitializations, 1);
}

#[test]
fn test_sim_clock_drives_controller_time() {
    let clock = SimClock::new();
    clock.set(10_000);
    let mut nvm = RamNvm::default();
    let controller = boot(&clock, SimulatedSpacecraft::new(clock.clone()), nvm.clone());
    assert_eq!(controller.state().mode_entry_time_ms, clock.now_ms());

    // the boot controller's NVM is separate from the untouched clone
    let mut blank = [0u8; 4];
    nvm.read(0, &mut blank).unwrap();
    assert_eq!(blank, [0xFF; 4]);
}
