//! Charger state machine: Idle -> Bulk -> Topping -> Trickle (or Idle for lithium
//! chemistries), with an optional periodic Equalization excursion from Trickle, plus the
//! discharge gate that blocks the battery port's negative current limit near empty.

use crate::battery_config::BatteryConfig;
use crate::port::PowerPort;
use crate::Seconds;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargerState {
    Idle,
    Bulk,
    Topping,
    Trickle,
    Equalization,
}

/// Single-pole low-pass filter over state-of-charge estimates, bypassed until its
/// accumulation window fills (grounded on `signal-processing`'s `EstimatedSum`: start in
/// an "estimating" mode that reports a plain running mean, then hand off to a steady
/// one-pole filter once enough samples have accrued to trust the smoothed value).
///
/// Does not special-case an open-circuit-voltage estimate that falls below the
/// configured "empty" point (a pack resting below its nominal empty voltage, e.g. from
/// self-discharge): the raw sample is already clamped to `[0, 1]` before it reaches the
/// filter, so the filtered value saturates at 0 rather than going negative.
#[derive(Debug, Clone, Copy)]
pub struct SocFilter {
    window: u16,
    filled: u16,
    sum: f32,
    filtered: f32,
    /// Pole for the steady-state filter: `filtered += (sample - filtered) * alpha`.
    alpha: f32,
}

impl SocFilter {
    pub fn new(window: u16, alpha: f32) -> Self {
        debug_assert!(window > 0);
        debug_assert!((0.0..=1.0).contains(&alpha));
        Self {
            window,
            filled: 0,
            sum: 0.0,
            filtered: 0.0,
            alpha,
        }
    }

    /// Feeds one raw SOC sample (0.0..=1.0) and returns the filtered estimate.
    pub fn update(&mut self, sample: f32) -> f32 {
        let sample = sample.clamp(0.0, 1.0);
        if self.filled < self.window {
            self.filled += 1;
            self.sum += sample;
            self.filtered = self.sum / self.filled as f32;
        } else {
            self.filtered += (sample - self.filtered) * self.alpha;
        }
        self.filtered
    }

    pub fn value(&self) -> f32 {
        self.filtered
    }

    pub fn is_estimating(&self) -> bool {
        self.filled < self.window
    }
}

/// Resting-voltage SOC estimate, valid only near equilibrium (`|current| < 0.2 A`) where
/// the terminal voltage is close to open-circuit voltage. Returns `None` when the pack
/// is under enough load that the estimate would be unreliable, in which case the caller
/// should leave the existing filtered value alone rather than feed it a bad sample.
pub fn ocv_soc_estimate(cfg: &BatteryConfig, bus_voltage: f32, current: f32) -> Option<f32> {
    if current.abs() >= 0.2 {
        return None;
    }
    let v_cell = bus_voltage / cfg.series_cells as f32;
    let span = cfg.cell_ocv_full_v - cfg.cell_ocv_empty_v;
    Some(((v_cell - cfg.cell_ocv_empty_v) / span).clamp(0.0, 1.0))
}

/// Charger state machine and its accumulated timers.
#[derive(Debug, Clone, Copy)]
pub struct Charger {
    pub state: ChargerState,
    pub soc: SocFilter,
    time_state_changed: Seconds,
    /// Timestamp the bus voltage most recently reached the droop-adjusted topping
    /// target, continuously; `None` while voltage is below it. The difference
    /// `now - since` is the `target_voltage_timer` that ends Topping by elapsed time.
    target_voltage_since: Option<Seconds>,
    last_equalization_at: Option<Seconds>,
    /// Latched by [`Self::discharge_control`]; cleared only once voltage recovers past
    /// the recharge hysteresis band.
    discharge_blocked: bool,
    pub num_full_charges: u32,
    pub num_deep_discharges: u32,
    deep_dis_last_equalization: u32,
    /// Tracks whether the filtered SOC was at/above the deep-discharge threshold on the
    /// previous tick, so a downward crossing is only counted once per discharge.
    above_deep_discharge_threshold: bool,
}

/// If Topping has run this long without current tapering below the cutoff, it
/// regresses back to Bulk rather than stalling forever -- a low-power condition (e.g.
/// insufficient sun) rather than a completed charge. Checked before the normal
/// target-voltage-timer completion path on every tick, so a pack that happens to
/// satisfy both on the same tick regresses to Bulk instead of advancing to Trickle; a
/// known ambiguity in the system this state machine is modeled on, preserved rather
/// than silently resolved.
const TOPPING_MAX_DURATION_S: Seconds = 8 * 3600;

impl Charger {
    pub fn new(soc_window: u16, soc_alpha: f32) -> Self {
        Self {
            state: ChargerState::Idle,
            soc: SocFilter::new(soc_window, soc_alpha),
            time_state_changed: 0,
            target_voltage_since: None,
            last_equalization_at: None,
            discharge_blocked: false,
            num_full_charges: 0,
            num_deep_discharges: 0,
            deep_dis_last_equalization: 0,
            // SocFilter starts at a filtered value of 0.0 before any sample lands, which
            // is below any sane threshold; start "already below" so the first real
            // sample crossing back above it doesn't register as a deep-discharge exit.
            above_deep_discharge_threshold: false,
        }
    }

    fn enter(&mut self, state: ChargerState, now: Seconds) {
        debug!("charger: {:?} -> {:?} at t={}", self.state, state, now);
        self.state = state;
        self.time_state_changed = now;
        self.target_voltage_since = None;
    }

    /// Advances the state machine by one tick and writes this state's target voltage and
    /// current back onto `port` (its bus's sink-voltage intercept and its positive
    /// current limit) so the next tick's droop-adjusted bound reflects it. `temp_c` is
    /// the pack temperature used for compensation and the charge temperature window;
    /// `charge_enabled` reflects upstream permission to charge at all (e.g. DC/DC not in
    /// an emergency stop, no fatal device error latched).
    pub fn update(&mut self, now: Seconds, cfg: &BatteryConfig, port: &mut PowerPort, temp_c: f32, charge_enabled: bool) {
        let bus_voltage = port.bus.voltage;
        let current = port.current;

        if let Some(sample) = ocv_soc_estimate(cfg, bus_voltage, current) {
            self.soc.update(sample);
        }
        self.track_deep_discharge(cfg);

        if !charge_enabled {
            if self.state != ChargerState::Idle {
                self.enter(ChargerState::Idle, now);
            }
            self.apply_targets(cfg, port, temp_c);
            return;
        }

        let temp_ok = (cfg.charge_temp_min_c..=cfg.charge_temp_max_c).contains(&temp_c);

        match self.state {
            ChargerState::Idle => {
                let rested = now - self.time_state_changed > cfg.time_limit_recharge_s;
                if bus_voltage < cfg.recharge_voltage(temp_c) && rested && temp_ok {
                    self.enter(ChargerState::Bulk, now);
                }
            }
            ChargerState::Bulk => {
                if bus_voltage >= cfg.topping_voltage(temp_c) {
                    self.enter(ChargerState::Topping, now);
                }
            }
            ChargerState::Topping => {
                let elapsed_in_state = now - self.time_state_changed;

                if elapsed_in_state >= TOPPING_MAX_DURATION_S && current > cfg.topping_current_cutoff {
                    self.enter(ChargerState::Bulk, now);
                    self.apply_targets(cfg, port, temp_c);
                    return;
                }

                let at_target = bus_voltage >= port.bus.sink_voltage_bound;
                if at_target {
                    let since = *self.target_voltage_since.get_or_insert(now);
                    let target_voltage_timer = now - since;
                    let done_by_time = target_voltage_timer >= cfg.topping_duration_s;
                    let done_by_current = current < cfg.topping_current_cutoff;
                    if done_by_time || done_by_current {
                        self.num_full_charges += 1;
                        if cfg.is_lithium {
                            self.enter(ChargerState::Idle, now);
                        } else {
                            self.enter(ChargerState::Trickle, now);
                        }
                    }
                } else {
                    self.target_voltage_since = None;
                }
            }
            ChargerState::Trickle => {
                if bus_voltage < cfg.recharge_voltage(temp_c) {
                    self.enter(ChargerState::Bulk, now);
                } else if cfg.equalization_enabled && self.equalization_due(cfg, now) {
                    self.enter(ChargerState::Equalization, now);
                }
            }
            ChargerState::Equalization => {
                let elapsed = now - self.time_state_changed;
                if elapsed >= cfg.equalization_duration_s || bus_voltage >= cfg.equalization_voltage(temp_c) {
                    self.last_equalization_at = Some(now);
                    self.deep_dis_last_equalization = self.num_deep_discharges;
                    self.enter(ChargerState::Trickle, now);
                }
            }
        }

        self.apply_targets(cfg, port, temp_c);
    }

    /// Writes this tick's target voltage/current onto the port, per state. Bulk and
    /// Topping share the same ceiling (Bulk is simply the current-limited approach to
    /// it); the DC/DC's own constant-current derate is what keeps Bulk from overshooting
    /// it, not the charger.
    fn apply_targets(&self, cfg: &BatteryConfig, port: &mut PowerPort, temp_c: f32) {
        let (target_voltage, target_current) = match self.state {
            ChargerState::Idle => (cfg.recharge_voltage(temp_c), 0.0),
            ChargerState::Bulk | ChargerState::Topping => (cfg.topping_voltage(temp_c), cfg.charge_current_max),
            ChargerState::Trickle => (cfg.trickle_voltage(temp_c), cfg.charge_current_max),
            ChargerState::Equalization => (cfg.equalization_voltage(temp_c), cfg.charge_current_max),
        };
        port.bus.sink_voltage_intercept = target_voltage;
        port.pos_current_limit = target_current;
    }

    fn equalization_due(&self, cfg: &BatteryConfig, now: Seconds) -> bool {
        let due_by_time = match self.last_equalization_at {
            None => true,
            Some(last) => now - last >= cfg.equalization_interval_s,
        };
        let due_by_cycles =
            self.num_deep_discharges - self.deep_dis_last_equalization >= cfg.equalization_trigger_deep_cycles;
        due_by_time || due_by_cycles
    }

    fn track_deep_discharge(&mut self, cfg: &BatteryConfig) {
        let above = self.soc.value() >= cfg.deep_discharge_soc_threshold;
        if self.above_deep_discharge_threshold && !above {
            self.num_deep_discharges += 1;
        }
        self.above_deep_discharge_threshold = above;
    }

    /// Sets the battery port's `neg_current_limit`: blocked (0) if battery voltage is at
    /// or below the absolute minimum, temperature is outside the discharge window, or an
    /// explicit low-SOC fault is latched; `-discharge_current_max` otherwise. Voltage
    /// recovery is hysteretic: once blocked, discharge is re-permitted only after
    /// voltage climbs past `absolute_min_voltage() + recharge_hysteresis_v`.
    pub fn discharge_control(&mut self, cfg: &BatteryConfig, bus_voltage: f32, temp_c: f32, low_soc_fault: bool) -> f32 {
        let temp_ok = (cfg.discharge_temp_min_c..=cfg.discharge_temp_max_c).contains(&temp_c);
        let must_block = bus_voltage <= cfg.absolute_min_voltage() || !temp_ok || low_soc_fault;

        if must_block {
            self.discharge_blocked = true;
        } else if self.discharge_blocked && bus_voltage > cfg.absolute_min_voltage() + cfg.recharge_hysteresis_v {
            self.discharge_blocked = false;
        }

        if self.discharge_blocked {
            0.0
        } else {
            -cfg.discharge_current_max
        }
    }
}
