#![cfg_attr(not(feature = "std"), no_std)]

//! Control core for a solar battery charge controller.
//!
//! Everything in this crate is pure computation over explicit `now` timestamps and
//! caller-owned state: no hardware access, no global mutable state, no panics on the
//! happy or unhappy path. The firmware binary (`controller-fw`) is the only place that
//! touches real peripherals; this crate is exercised directly by unit and property
//! tests on the host.

#[macro_use]
extern crate logger;

pub mod battery_config;
pub mod bus;
pub mod charger;
pub mod daq;
pub mod dcdc;
pub mod half_bridge;
pub mod load;
pub mod persistence;
pub mod port;
pub mod status;
pub mod system;

pub use battery_config::{BatteryConfig, Chemistry};
pub use bus::DcBus;
pub use charger::{Charger, ChargerState};
pub use dcdc::{Dcdc, DcdcConfig, DcdcMode, DcdcRole, DcdcState};
pub use half_bridge::{Alignment, HalfBridge};
pub use load::{LoadOutput, LoadOutputConfig, LoadState};
pub use port::PowerPort;
pub use status::{DeviceStatus, ErrorFlag};
pub use system::System;

/// Monotonic seconds since boot. Signed so a subsystem may pre-seed a timestamp in the
/// past (e.g. "allow start immediately") the way the original firmware's `time_t` did.
pub type Seconds = i64;
