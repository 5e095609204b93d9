//! Aggregated device status: error flags, running extremes and day-boundary accounting.

use enumset::{EnumSet, EnumSetType};

use crate::Seconds;

/// Flat error taxonomy, organized into three groups by how they propagate:
///
/// - Hardware/electrical, fatal-for-the-tick: recovered locally by stopping the
///   offending actuator, but block re-entry into charging until the next tick's
///   gating re-evaluates them.
/// - Chemical/limits, advisory: set/cleared by the owning subsystem every tick it
///   evaluates; informational, don't by themselves stop power flow.
/// - Load-policy, derived: set by the load output from the other two groups' state
///   rather than from a direct measurement.
#[derive(EnumSetType, Debug)]
pub enum ErrorFlag {
    BatOvervoltage,
    DcdcHsOvervoltage,
    LoadOvervoltage,
    LoadOvercurrent,
    LoadShortCircuit,
    IntOvertemp,

    BatUndervoltage,
    BatDisOvertemp,
    BatDisUndertemp,
    BatChgOvertemp,
    BatChgUndertemp,

    LoadLowSoc,
    LoadVoltageDip,
}

impl ErrorFlag {
    /// Hardware/electrical flags that prevent entering Bulk from Idle and force a
    /// converter emergency stop while asserted.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorFlag::BatOvervoltage
                | ErrorFlag::DcdcHsOvervoltage
                | ErrorFlag::LoadOvervoltage
                | ErrorFlag::LoadOvercurrent
                | ErrorFlag::LoadShortCircuit
                | ErrorFlag::IntOvertemp
        )
    }
}

/// A running min/max latch, cleared only at an explicit reset (e.g. day boundary).
#[derive(Debug, Clone, Copy)]
pub struct Extremes {
    pub min: f32,
    pub max: f32,
}

impl Extremes {
    pub fn new() -> Self {
        Self {
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
        }
    }

    pub fn observe(&mut self, value: f32) {
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for Extremes {
    fn default() -> Self {
        Self::new()
    }
}

/// One ok -> error transition, as kept in [`DeviceStatus::fault_log`].
#[derive(Debug, Clone, Copy)]
pub struct FaultEvent {
    pub at: Seconds,
    pub flag: ErrorFlag,
}

/// Device-wide status aggregation: current error set, day counter and cumulative
/// energy, plus the extremes tracked for telemetry.
#[derive(Debug, Clone)]
pub struct DeviceStatus {
    errors: EnumSet<ErrorFlag>,
    previous_errors: EnumSet<ErrorFlag>,
    pub bus_voltage_extremes: Extremes,
    pub temperature_extremes: Extremes,
    pub day_counter: u32,
    pub cumulative_charge_wh: f32,
    pub cumulative_discharge_wh: f32,
    last_day_boundary_at: Seconds,
    /// Incremented whenever the error set gains a flag it didn't carry on the previous
    /// tick -- i.e. on an ok -> error transition, never while a flag stays latched.
    pub fault_transition_count: u32,
    /// Bounded history of the last 8 fault transitions, for post-mortem telemetry
    /// without needing the persisted blob.
    pub fault_log: heapless::HistoryBuffer<FaultEvent, 8>,
}

const SECONDS_PER_DAY: Seconds = 24 * 3600;

impl DeviceStatus {
    pub fn new() -> Self {
        Self {
            errors: EnumSet::empty(),
            previous_errors: EnumSet::empty(),
            bus_voltage_extremes: Extremes::new(),
            temperature_extremes: Extremes::new(),
            day_counter: 0,
            cumulative_charge_wh: 0.0,
            cumulative_discharge_wh: 0.0,
            last_day_boundary_at: 0,
            fault_transition_count: 0,
            fault_log: heapless::HistoryBuffer::new(),
        }
    }

    pub fn set_error(&mut self, flag: ErrorFlag) {
        self.errors.insert(flag);
    }

    pub fn clear_error(&mut self, flag: ErrorFlag) {
        self.errors.remove(flag);
    }

    pub fn errors(&self) -> EnumSet<ErrorFlag> {
        self.errors
    }

    pub fn has_fatal_error(&self) -> bool {
        self.errors.iter().any(ErrorFlag::is_fatal)
    }

    pub fn has_error(&self, flag: ErrorFlag) -> bool {
        self.errors.contains(flag)
    }

    /// Call once per tick after all `set_error`/`clear_error` calls for that tick:
    /// snapshots the error set, bumps [`Self::fault_transition_count`] for newly-set
    /// flags, and appends each transition to [`Self::fault_log`].
    pub fn commit_tick(&mut self, now: Seconds) {
        let newly_set = self.errors - self.previous_errors;
        self.fault_transition_count += newly_set.len() as u32;
        for flag in newly_set.iter() {
            self.fault_log.write(FaultEvent { at: now, flag });
        }
        self.previous_errors = self.errors;
    }

    /// Rolls the day counter and resets the day-scoped extremes when `now` has crossed
    /// a day boundary relative to the last reset.
    pub fn check_day_boundary(&mut self, now: Seconds) -> bool {
        if now - self.last_day_boundary_at >= SECONDS_PER_DAY {
            self.last_day_boundary_at = now;
            self.day_counter += 1;
            self.bus_voltage_extremes.reset();
            self.temperature_extremes.reset();
            true
        } else {
            false
        }
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fatal_flag_still_clears_once_condition_resolves() {
        let mut s = DeviceStatus::new();
        s.set_error(ErrorFlag::LoadShortCircuit);
        assert!(s.has_fatal_error());
        s.clear_error(ErrorFlag::LoadShortCircuit);
        assert!(!s.has_fatal_error());
    }

    #[test]
    fn fault_transition_count_increments_once_per_new_flag() {
        let mut s = DeviceStatus::new();
        s.set_error(ErrorFlag::LoadOvercurrent);
        s.commit_tick(0);
        assert_eq!(s.fault_transition_count, 1);
        // Flag stays latched across the next tick: no further increment.
        s.set_error(ErrorFlag::LoadOvercurrent);
        s.commit_tick(1);
        assert_eq!(s.fault_transition_count, 1);
        s.set_error(ErrorFlag::BatChgOvertemp);
        s.commit_tick(2);
        assert_eq!(s.fault_transition_count, 2);
        assert_eq!(s.fault_log.len(), 2);
    }

    #[test]
    fn day_boundary_resets_extremes_and_bumps_counter() {
        let mut s = DeviceStatus::new();
        s.bus_voltage_extremes.observe(13.2);
        assert!(!s.check_day_boundary(3600));
        assert!(s.check_day_boundary(SECONDS_PER_DAY + 1));
        assert_eq!(s.day_counter, 1);
        assert_eq!(s.bus_voltage_extremes.min, f32::INFINITY);
    }

    #[test]
    fn advisory_flag_clears_normally() {
        let mut s = DeviceStatus::new();
        s.set_error(ErrorFlag::BatUndervoltage);
        s.clear_error(ErrorFlag::BatUndervoltage);
        assert!(s.errors().is_empty());
    }

    #[test]
    fn derived_load_flags_are_not_fatal() {
        assert!(!ErrorFlag::LoadLowSoc.is_fatal());
        assert!(!ErrorFlag::LoadVoltageDip.is_fatal());
    }
}
