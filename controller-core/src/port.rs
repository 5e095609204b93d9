//! Power port: a signed-current view onto a [`DcBus`] (§3, §4.2).

use crate::bus::DcBus;

/// A logical DC terminal: current, ± limits, ± margins, droop resistances and the
/// energy counters that accrue on it. Exclusively owns the [`DcBus`] it measures.
#[derive(Debug, Clone)]
pub struct PowerPort {
    pub bus: DcBus,
    /// Signed current; positive = into the port (charging the bus).
    pub current: f32,
    pub pos_current_limit: f32,
    pub neg_current_limit: f32,
    pub pos_current_margin: f32,
    pub neg_current_margin: f32,
    /// Virtual resistance subtracted from the sink intercept per amp of current.
    pub sink_droop_res: f32,
    /// Virtual resistance added to the source intercept per amp of current.
    pub src_droop_res: f32,
    pub pos_energy_wh: f32,
    pub neg_energy_wh: f32,
}

impl PowerPort {
    pub fn new(bus: DcBus) -> Self {
        Self {
            bus,
            current: 0.0,
            pos_current_limit: 0.0,
            neg_current_limit: 0.0,
            pos_current_margin: 0.0,
            neg_current_margin: 0.0,
            sink_droop_res: 0.0,
            src_droop_res: 0.0,
            pos_energy_wh: 0.0,
            neg_energy_wh: 0.0,
        }
    }

    /// Recomputes the current margins from the latest measured current and limits.
    /// Invariant (§3): `pos_current_margin = pos_current_limit - current`.
    pub fn update_current_margins(&mut self) {
        self.pos_current_margin = self.pos_current_limit - self.current;
        self.neg_current_margin = self.neg_current_limit - self.current;
    }

    /// Recomputes the bus's droop-adjusted bounds from this port's droop resistances
    /// and the latest current, per §4.2's derate rule:
    /// `effective target voltage = bound - droop_res * |current|`.
    pub fn update_bus_voltage_bounds(&mut self) {
        let i = self.current.abs();
        self.bus.sink_voltage_bound = self.bus.sink_voltage_intercept - self.sink_droop_res * i;
        self.bus.src_voltage_bound = self.bus.src_voltage_intercept + self.src_droop_res * i;
    }

    /// Energy accounting (§4.2). Must be called exactly once per second; returns the
    /// signed Wh delta just applied so a caller (device status aggregation) can fold it
    /// into a running total without duplicating the sign logic.
    pub fn energy_balance(&mut self) -> f32 {
        let wh = self.bus.voltage * self.current / 3600.0;
        if self.current >= 0.0 {
            self.pos_energy_wh += wh;
            wh
        } else {
            self.neg_energy_wh -= wh;
            wh
        }
    }

    /// Resets the daily energy counters at a day boundary, preserving any cumulative
    /// totals a caller keeps separately (§3 invariant: "reset on day boundary").
    pub fn reset_daily_energy(&mut self) {
        self.pos_energy_wh = 0.0;
        self.neg_energy_wh = 0.0;
    }
}


#[cfg(test)]
mod proptest_invariants {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // Property 3 (§8): pos/neg current margin exactly tracks the corresponding
        // limit and the latest measured current, for any limits/current combination.
        #[test]
        fn current_margins_match_invariant_exactly(
            pos_limit in 0.0f32..200.0,
            neg_limit in -200.0f32..0.0,
            current in -200.0f32..200.0,
        ) {
            let mut port = PowerPort::new(DcBus::new(1));
            port.pos_current_limit = pos_limit;
            port.neg_current_limit = neg_limit;
            port.current = current;
            port.update_current_margins();
            prop_assert_eq!(port.pos_current_margin + port.current, port.pos_current_limit);
            prop_assert_eq!(port.neg_current_margin + port.current, port.neg_current_limit);
        }

        // Property 4 (§8): after N seconds of constant V, I > 0, the positive energy
        // counter tracks V*I*N within 1%.
        #[test]
        fn energy_counter_tracks_power_within_one_percent(
            voltage in 1.0f32..60.0,
            current in 0.1f32..40.0,
            hours in 1u32..6,
        ) {
            let mut port = PowerPort::new(DcBus::new(1));
            port.bus.voltage = voltage;
            port.current = current;
            let seconds = hours * 3600;
            for _ in 0..seconds {
                port.energy_balance();
            }
            let expected = voltage * current * hours as f32;
            prop_assert!((port.pos_energy_wh - expected).abs() <= expected * 0.01);
        }
    }
}
