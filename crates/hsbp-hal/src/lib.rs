//! `hsbp-hal` – Hardware Abstraction
//!
//! Everything that touches a backplane CPLD or the platform's bus layout
//! goes through the traits in this crate, so the engine never cares whether
//! it is talking to i2c-dev, a bench rig or a simulator.
//!
//! # Modules
//!
//! - [`registers`] – [`RegisterAccess`][registers::RegisterAccess] and
//!   [`ChannelOpener`][registers::ChannelOpener] traits plus the CPLD
//!   register map and blink codes.
//! - [`cpld`] – [`HsbpCpld`][cpld::HsbpCpld]: typed register reads (inverted
//!   bitmaps, identity, version string) and indicator writes.
//! - [`address`] – [`AddressResolver`][address::AddressResolver]: maps an
//!   inventory reporter's bus to the physical mux channel, via sysfs or a
//!   static table.
//! - [`power`] – [`PowerOracle`][power::PowerOracle]: gates register access
//!   on board power.
//! - [`sim`] – simulated register banks for tests and benches.
//! - `i2c_dev` – Linux `/dev/i2c-*` channels (Linux only).

pub mod address;
pub mod cpld;
#[cfg(target_os = "linux")]
pub mod i2c_dev;
pub mod power;
pub mod registers;
pub mod sim;

pub use address::{AddressResolver, MuxChannel, StaticAddressResolver, SysfsAddressResolver};
pub use cpld::{CpldIdentity, HsbpCpld, RegisterSnapshot};
#[cfg(target_os = "linux")]
pub use i2c_dev::{I2cDevChannel, I2cDevOpener};
pub use power::{PowerOracle, SharedPowerState};
pub use registers::{BlinkPattern, ChannelOpener, RegisterAccess};
pub use sim::{SimBank, SimChannelOpener, SimCpld};
