use adcs_supervisor::sim::{HostWatchdog, RamNvm, SensorHealth, SimClock, SimulatedSpacecraft};
use adcs_supervisor::{ConfigError, ControllerConfig, ModeController};
use std::time::Duration;
use tokio::time;
use tracing::{error, info, warn};

const MAX_CYCLES: u32 = 480;
// Simulated time runs this many times faster than wall-clock time
const TIME_SCALE: u32 = 25;

type Controller = ModeController<SimulatedSpacecraft, RamNvm, HostWatchdog>;

/// Scripted events exercising each branch of the supervisor.
fn apply_scenario(cycle: u32, controller: &mut Controller) {
    match cycle {
        40 => controller.platform_mut().inject_tumble([0.35, -0.2, 0.15]),
        140 => {
            info!("Scenario: battery brown-out");
            controller.platform_mut().set_battery_fraction(0.15);
        }
        190 => {
            info!("Scenario: battery recharged");
            controller.platform_mut().set_battery_fraction(0.9);
        }
        240 => {
            info!("Scenario: redundant gyros disagree until the drivers restart");
            controller.platform_mut().set_sensor_health(SensorHealth::Persistent);
        }
        300 => {
            info!("Scenario: sensor bus timeouts");
            controller.platform_mut().fail_sensor_reads(3);
        }
        360 => {
            warn!("Scenario: control task hangs past the watchdog deadline");
            let stall = controller.config().watchdog.timeout_ms + 1;
            controller.platform_mut().advance(stall);
        }
        _ => {}
    }
}

/// Models a processor reset: the controller is dropped, its hardware survives
/// and the startup protocol runs again from the same NVM.
fn reset(
    controller: Controller,
    clock: &SimClock,
    config: ControllerConfig,
) -> Result<Controller, ConfigError> {
    let (mut spacecraft, nvm, _) = controller.into_parts();
    spacecraft.power_cycle();
    let watchdog = HostWatchdog::new(clock.clone());
    ModeController::boot(spacecraft, nvm, watchdog, config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("🛰️  ADCS Supervisor Simulator");
    println!("============================");

    let config = ControllerConfig::default();
    let config_json = serde_json::to_string(&config)?;
    info!(config = %config_json, "Configuration");

    let clock = SimClock::new();
    let spacecraft = SimulatedSpacecraft::new(clock.clone());
    let watchdog = HostWatchdog::new(clock.clone());
    let mut controller = ModeController::boot(spacecraft, RamNvm::default(), watchdog, config)?;
    let boot_json = serde_json::to_string(controller.get_boot_report())?;
    info!(boot = %boot_json, "Initial boot");

    let period = config.cycle_period_ms;
    let mut interval = time::interval(Duration::from_millis(u64::from(period / TIME_SCALE).max(1)));
    let mut resets = 0u32;

    for cycle in 1..=MAX_CYCLES {
        interval.tick().await;

        apply_scenario(cycle, &mut controller);

        if controller.watchdog_timer().has_expired() || controller.platform().power_cycle_due() {
            resets += 1;
            error!(cycle, "💥 Processor reset");
            controller = reset(controller, &clock, config)?;
            let boot_json = serde_json::to_string(controller.get_boot_report())?;
            info!(boot = %boot_json, "Recovered from reset");
        }

        let report = controller.run_cycle();
        if report.transitions > 0 || report.fault.is_fault() || report.escalation.is_fault() {
            let report_json = serde_json::to_string(&report)?;
            info!("📡 CYCLE: {}", report_json);
        }

        controller.platform_mut().advance(period);
    }

    let store_json = serde_json::to_string(controller.get_store_stats())?;
    let watchdog_json = serde_json::to_string(controller.get_watchdog_stats())?;
    let spacecraft_json = serde_json::to_string(controller.platform().get_state())?;
    info!(
        mode = %controller.current_mode(),
        resets,
        faults_logged = controller.get_fault_log().get_fault_history().len(),
        store = %store_json,
        watchdog = %watchdog_json,
        spacecraft = %spacecraft_json,
        "Simulation complete"
    );

    Ok(())
}
