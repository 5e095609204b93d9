//! DC bus: a voltage domain shared by a half-bridge terminal.

/// One voltage domain (e.g. the low-voltage battery/load bus, or the high-voltage
/// solar/nanogrid bus) of a DC/DC converter.
///
/// A bus only stores scalar set-points; the droop computation that turns an
/// open-circuit intercept into a current-compensated bound lives on [`crate::PowerPort`],
/// which is the exclusive owner of a `DcBus`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DcBus {
    /// Last measured bus voltage.
    pub voltage: f32,
    /// Droop-compensated voltage the bus should be driven to while sinking energy.
    pub sink_voltage_bound: f32,
    /// Open-circuit equivalent of `sink_voltage_bound` before droop compensation.
    pub sink_voltage_intercept: f32,
    /// Droop-compensated voltage below which the bus must stop sourcing energy.
    pub src_voltage_bound: f32,
    /// Open-circuit equivalent of `src_voltage_bound` before droop compensation.
    pub src_voltage_intercept: f32,
    /// Number of identical cells/batteries in series on this bus (auto 12/24V detection).
    pub series_multiplier: u8,
}

impl DcBus {
    /// Creates a bus with permissive bounds (sink wide open, source never starts) until
    /// the owning subsystem (charger, DC/DC role config) installs real intercepts.
    pub fn new(series_multiplier: u8) -> Self {
        debug_assert!(series_multiplier >= 1);
        Self {
            voltage: 0.0,
            sink_voltage_bound: f32::INFINITY,
            sink_voltage_intercept: f32::INFINITY,
            src_voltage_bound: 0.0,
            src_voltage_intercept: 0.0,
            series_multiplier,
        }
    }

    /// Checks the entity invariant `src_voltage_bound <= sink_voltage_bound`, both
    /// positive. Used only by tests and debug assertions; callers are not expected to
    /// handle a violation explicitly since the producing subsystems are trusted to
    /// maintain it.
    pub fn bounds_valid(&self) -> bool {
        self.src_voltage_bound <= self.sink_voltage_bound
            && self.src_voltage_bound >= 0.0
            && self.sink_voltage_bound > 0.0
    }
}
