//! Capability traits the firmware binary requires from a concrete board (§6, §9 Design
//! Notes: hardware access is expressed as traits at the seam, not inheritance).
//!
//! `controller-core` never sees any of this; these traits exist only so `tasks.rs` can
//! be written once and instantiated against whatever board module wires up real
//! peripherals.

pub use controller_core::persistence::PersistenceMedium;
use embedded_hal::digital::OutputPin;

/// One full set of measurements the 10 Hz control tick needs (§6's DAQ contract).
#[derive(Debug, Clone, Copy)]
pub struct Measurements {
    pub hv_voltage: f32,
    pub hv_current: f32,
    pub lv_voltage: f32,
    pub lv_current: f32,
    pub inductor_current: f32,
    pub battery_temp_c: f32,
    pub ambient_temp_c: f32,
}

/// Asynchronous data acquisition: sampling the ADC channels the control loop reads
/// every tick, plus the comparator/alert programming the fast-trip ISR path depends on.
/// A board implements this over its own ADC driver and raw-to-voltage scaling
/// (`controller_core::daq` provides the scaling helpers).
pub trait Daq {
    type Error;

    async fn sample(&mut self) -> Result<Measurements, Self::Error>;

    /// Programs the LV-bus comparator thresholds that feed `System::dma_alert`.
    async fn set_lv_alerts(&mut self, upper: f32, lower: f32) -> Result<(), Self::Error>;

    /// Programs the HV-bus overvoltage comparator that can fast-trip the converter
    /// independently of the 10 Hz control tick's own `hs_voltage_max` check.
    async fn set_hv_limit(&mut self, upper: f32) -> Result<(), Self::Error>;

    /// Zeroes the current-sense channels' offset at startup, with no load applied.
    async fn calibrate_current_sensors(&mut self) -> Result<(), Self::Error>;
}

/// The load output's physical enable switch.
pub trait LoadSwitch: OutputPin {}
impl<T: OutputPin> LoadSwitch for T {}

/// PWM register programming for the half-bridge (§4.1): the board owns the concrete
/// timer peripheral; the firmware only ever hands it the values `HalfBridge` already
/// computed.
pub trait PwmTimer {
    fn set_arr(&mut self, arr: u32);
    fn set_ccr(&mut self, ccr: u32);
    fn set_dead_time(&mut self, clocks: u32);
    fn enable_outputs(&mut self);
    fn disable_outputs(&mut self);
}

/// Feeds the independent watchdog. A board that has none can implement this as a no-op,
/// but the control task calls it every tick regardless (§5).
pub trait Watchdog {
    fn feed(&mut self);
}
