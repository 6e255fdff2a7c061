//! `hsbp-runtime` – The manager task
//!
//! Wires the kernel's backplane state machines to time, notifications and
//! the outside world.
//!
//! # Modules
//!
//! - [`manager`] – [`Manager`][manager::Manager]: the single task that owns
//!   every backplane, runs discovery passes and serialises polls, indicator
//!   writes and correlation.  [`ManagerHandle`][manager::ManagerHandle] is
//!   its cloneable front door.
//! - [`poll_loop`] – [`PollTimer`][poll_loop::PollTimer]: the per-backplane
//!   ticker that paces register polling.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   `tracing` subscriber with optional OTLP export.

pub mod manager;
pub mod poll_loop;
pub mod telemetry;

pub use manager::{
    BackplaneStatus, Collaborators, Manager, ManagerHandle, ManagerSettings, ManagerStatus,
};
pub use poll_loop::{PollExit, PollTimer};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
