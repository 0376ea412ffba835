//! # ADCS Supervisor
//!
//! Supervisory firmware for a small satellite's attitude determination and
//! control subsystem. Once per control period it decides which operating mode
//! the attitude subsystem runs, overrides that decision when faults demand it,
//! and keeps a checksummed snapshot of its state in non-volatile memory so it
//! can rebuild a safe state after any reset.
//!
//! ## Quick Start
//!
//! ```rust
//! use adcs_supervisor::sim::{HostWatchdog, RamNvm, SimClock, SimulatedSpacecraft};
//! use adcs_supervisor::{ControllerConfig, ModeController, OperatingMode};
//!
//! let clock = SimClock::new();
//! let spacecraft = SimulatedSpacecraft::new(clock.clone());
//! let watchdog = HostWatchdog::new(clock.clone());
//!
//! // A blank NVM boots into safe mode with a freshly persisted default
//! let mut controller =
//!     ModeController::boot(spacecraft, RamNvm::default(), watchdog, ControllerConfig::default())
//!         .expect("default configuration is valid");
//! assert_eq!(controller.current_mode(), OperatingMode::SafeMode);
//!
//! let report = controller.run_cycle();
//! assert_eq!(report.cycle, 1);
//! ```
//!
//! ## Architecture
//!
//! - [`hal`] - Collaborator traits for sensors, actuators, storage and the watchdog
//! - [`state`] - Operating modes, the live state and the transition table
//! - [`fault`] - Prioritized fault evaluation and fault history
//! - [`escalation`] - Software-reset and power-cycle escalation thresholds
//! - [`persistence`] - Crash-atomic, checksummed state storage
//! - [`watchdog`] - Hardware watchdog supervision
//! - [`controller`] - Startup protocol and the per-cycle state machine
//! - [`sim`] - Host-side simulated hardware

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod controller;
pub mod escalation;
pub mod fault;
pub mod hal;
pub mod persistence;
pub mod sim;
pub mod state;
pub mod watchdog;

// Re-export main public types for convenience
pub use config::{ConfigError, ControllerConfig, ResumePolicy};
pub use controller::{BootOutcome, BootReport, CycleReport, ModeController};
pub use fault::{FaultManager, FaultType};
pub use persistence::{PersistedRecord, PersistentStateStore, StoreError};
pub use state::{AdcsState, OperatingMode};
pub use watchdog::WatchdogSupervisor;
