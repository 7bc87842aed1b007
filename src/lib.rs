//! # genstart — Autonomous generator start/stop controller for Victron Venus OS
//!
//! Watches AC load, PV yield, battery SoC/voltage/current and inverter
//! alarms over D-Bus, applies a set of independently-configurable start
//! conditions with hysteresis, and drives a relay-switched or CAN-connected
//! (Fischer Panda) generator through warmup, running and cooldown — honoring
//! quiet hours and a periodic exercise test-run schedule along the way.
//!
//! ## Architecture
//!
//! - `config`: process-level configuration (service name, logging, polling)
//! - `logging`: structured logging and tracing setup
//! - `error`: crate-wide error type
//! - `bus`: the `com.victronenergy.BusItem` monitor abstraction, with a
//!   real zbus-backed implementation and an in-memory test double
//! - `settings`: mirror of the `com.victronenergy.settings` tree that holds
//!   all generator configuration (thresholds, timers, schedules)
//! - `telemetry`: typed accessors over the raw bus readings the engine needs
//! - `conditions`: the seven start/stop condition evaluators with hysteresis
//! - `quiet_hours`: quiet-hours window gating
//! - `scheduler`: periodic test-run scheduling
//! - `statistics`: daily and accumulated runtime tracking
//! - `engine`: the per-generator state machine (warmup/running/cooldown)
//! - `controller`: top-level orchestration tying the above into the event loop
//! - `persistence`: on-disk state recovery across restarts

pub mod bus;
pub mod conditions;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod quiet_hours;
pub mod scheduler;
pub mod settings;
pub mod statistics;
pub mod telemetry;

pub use config::Config;
pub use error::{GenstartError, Result};
