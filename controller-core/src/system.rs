//! Composition root: one `System` owns every subsystem by value and is constructed
//! exactly once. There is no global mutable state and no singleton pattern anywhere in
//! this crate -- the original firmware's process-wide globals are replaced by fields
//! here, and polymorphic dispatch (converter role, chemistry) is replaced by plain
//! enums and config structs rather than trait objects or inheritance.

use crate::battery_config::BatteryConfig;
use crate::bus::DcBus;
use crate::charger::Charger;
use crate::daq::Debounce2;
use crate::dcdc::{Dcdc, DcdcConfig};
use crate::half_bridge::HalfBridge;
use crate::load::LoadOutput;
use crate::port::PowerPort;
use crate::status::{DeviceStatus, ErrorFlag};
use crate::Seconds;

/// Persisted counters are flushed to flash on this cadence rather than every tick, to
/// bound flash wear over the device's lifetime.
const PERSISTENCE_WRITE_INTERVAL_S: Seconds = 6 * 3600;

/// Everything the control loop needs, wired once at boot. `hv` is the solar/nanogrid
/// terminal; `lv` is the shared battery-and-load terminal -- in the classic single-stage
/// MPPT solar charge controller topology this spec describes, the charger and the load
/// output both operate on the same LV bus, so a third dedicated "battery port" would
/// only duplicate `lv`.
pub struct System {
    pub half_bridge: HalfBridge,
    pub hv: PowerPort,
    pub lv: PowerPort,
    pub dcdc: Dcdc,
    pub charger: Charger,
    pub battery_config: BatteryConfig,
    pub load: LoadOutput,
    pub status: DeviceStatus,
    /// Last battery temperature seen by `control_tick`, so the slower housekeeping
    /// context has something to feed `DeviceStatus`'s extremes without its own sensor
    /// read (housekeeping runs independently of the 10 Hz sampling cadence).
    pub last_battery_temp_c: f32,
    overvoltage_trip: Debounce2,
    undervoltage_trip: Debounce2,
    last_persistence_write_at: Seconds,
}

impl System {
    pub fn new(
        half_bridge: HalfBridge,
        hv_series_multiplier: u8,
        lv_series_multiplier: u8,
        dcdc_config: DcdcConfig,
        battery_config: BatteryConfig,
        load: LoadOutput,
        soc_window: u16,
        soc_alpha: f32,
    ) -> Self {
        Self {
            half_bridge,
            hv: PowerPort::new(DcBus::new(hv_series_multiplier)),
            lv: PowerPort::new(DcBus::new(lv_series_multiplier)),
            dcdc: Dcdc::new(dcdc_config),
            charger: Charger::new(soc_window, soc_alpha),
            battery_config,
            load,
            status: DeviceStatus::new(),
            last_battery_temp_c: 25.0,
            overvoltage_trip: Debounce2::new(),
            undervoltage_trip: Debounce2::new(),
            last_persistence_write_at: 0,
        }
    }

    /// 10 Hz control context: runs the DC/DC derate-and-MPPT loop, the charger state
    /// machine (which derives its own resting-voltage SOC estimate and exports its
    /// target voltage/current straight onto `lv`), the discharge gate, and the load
    /// output's debounced protections, then commits the tick's error-flag transitions.
    pub fn control_tick(&mut self, now: Seconds, dt_s: f32, inductor_current: f32, temp_c: f32, ambient_c: f32) {
        self.last_battery_temp_c = temp_c;
        self.hv.update_current_margins();
        self.lv.update_current_margins();
        self.hv.update_bus_voltage_bounds();
        self.lv.update_bus_voltage_bounds();

        let emergency_stop = self.status.has_fatal_error();
        self.dcdc.control(
            &mut self.half_bridge,
            &self.hv,
            &self.lv,
            now,
            inductor_current,
            temp_c,
            emergency_stop,
            &mut self.status,
        );

        let charge_enabled = !emergency_stop && self.dcdc.state != crate::dcdc::DcdcState::Off;
        self.charger.update(now, &self.battery_config, &mut self.lv, temp_c, charge_enabled);

        let low_soc_fault = self.status.has_error(ErrorFlag::LoadLowSoc);
        self.lv.neg_current_limit =
            self.charger
                .discharge_control(&self.battery_config, self.lv.bus.voltage, temp_c, low_soc_fault);

        if temp_c >= self.battery_config.discharge_temp_max_c {
            self.status.set_error(ErrorFlag::BatDisOvertemp);
        } else {
            self.status.clear_error(ErrorFlag::BatDisOvertemp);
        }
        if temp_c <= self.battery_config.discharge_temp_min_c {
            self.status.set_error(ErrorFlag::BatDisUndertemp);
        } else {
            self.status.clear_error(ErrorFlag::BatDisUndertemp);
        }

        let filtered_soc = self.charger.soc.value();
        self.load.control(
            now,
            dt_s,
            &self.battery_config,
            &self.status,
            self.lv.current,
            self.lv.bus.voltage,
            self.lv.bus.sink_voltage_bound,
            filtered_soc,
            ambient_c,
        );

        if filtered_soc <= self.battery_config.deep_discharge_soc_threshold {
            self.status.set_error(ErrorFlag::LoadLowSoc);
        } else {
            self.status.clear_error(ErrorFlag::LoadLowSoc);
        }
        if self.lv.current.abs() >= self.lv.pos_current_limit.max(self.lv.neg_current_limit.abs()) {
            self.status.set_error(ErrorFlag::LoadOvercurrent);
        } else {
            self.status.clear_error(ErrorFlag::LoadOvercurrent);
        }
        self.status.commit_tick(now);
    }

    /// 1 Hz housekeeping context: energy accounting, extremes and day-boundary
    /// rollover. Independent of the 10 Hz loop's timing so a slow persistence write
    /// never delays the control tick. Returns `true` when the persisted counters
    /// (fault log, day counter, cumulative energy) are due for a flash write-through --
    /// the caller owns the actual `PersistenceMedium` write since that's an I/O
    /// capability this crate doesn't have.
    pub fn housekeeping_tick(&mut self, now: Seconds, temp_c: f32) -> bool {
        let hv_wh = self.hv.energy_balance();
        let lv_wh = self.lv.energy_balance();

        if lv_wh >= 0.0 {
            self.status.cumulative_charge_wh += lv_wh;
        } else {
            self.status.cumulative_discharge_wh += -lv_wh;
        }
        let _ = hv_wh;

        self.status.bus_voltage_extremes.observe(self.lv.bus.voltage);
        self.status.temperature_extremes.observe(temp_c);

        if self.status.check_day_boundary(now) {
            self.hv.reset_daily_energy();
            self.lv.reset_daily_energy();
        }

        if now - self.last_persistence_write_at >= PERSISTENCE_WRITE_INTERVAL_S {
            self.last_persistence_write_at = now;
            true
        } else {
            false
        }
    }

    /// Fast-trip ISR path: called from the ADC DMA/comparator interrupt, not the
    /// cooperative scheduler. Debounces two consecutive over-threshold samples before
    /// latching a shutdown, so a single noise spike can't trip the converter.
    pub fn dma_alert(&mut self, lv_voltage_over: bool, lv_voltage_under: bool) {
        if self.overvoltage_trip.sample(lv_voltage_over) {
            warn!("fast-trip: lv bus overvoltage, forcing outputs off");
            self.half_bridge.stop();
            self.load.stop_fast_trip();
            self.status.set_error(ErrorFlag::BatOvervoltage);
        }
        if self.undervoltage_trip.sample(lv_voltage_under) {
            warn!("fast-trip: lv bus voltage dip, forcing outputs off");
            self.half_bridge.stop();
            self.load.stop_fast_trip();
            self.status.set_error(ErrorFlag::LoadShortCircuit);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::battery_config::Chemistry;
    use crate::dcdc::{DcdcMode, DcdcRole};
    use crate::half_bridge::Alignment;
    use crate::load::LoadOutputConfig;

    fn system() -> System {
        let half_bridge = HalfBridge::init(64_000_000, 20, 300, 0.05, 0.95, Alignment::Center);
        let dcdc_config = DcdcConfig {
            mode: DcdcMode::Buck,
            role: DcdcRole::SolarCharger,
            pwm_delta: 2,
            over_temperature_c: 60.0,
            under_temperature_c: -20.0,
            inductor_current_max: 30.0,
            hs_voltage_max: 100.0,
            ls_voltage_min: 8.0,
            ls_voltage_max: 16.0,
            restart_interval_s: 60,
            power_good_threshold_w: 1.0,
            power_good_timeout_s: 10,
        };
        let battery_config = BatteryConfig::for_chemistry(Chemistry::SealedLeadAcid, 6, 10.0, 10.0);
        let load_config = LoadOutputConfig::with_defaults(0.01);
        let mut sys = System::new(
            half_bridge,
            6,
            6,
            dcdc_config,
            battery_config,
            LoadOutput::new(load_config, 25.0),
            4,
            0.1,
        );
        sys.load.enable();
        sys
    }

    #[test]
    fn dma_alert_latches_load_off_on_second_overvoltage_sample() {
        let mut sys = system();
        sys.dma_alert(true, false);
        assert!(sys.load.is_on());
        sys.dma_alert(true, false);
        assert_eq!(sys.load.state, crate::load::LoadState::OffShortCircuit);
        assert!(sys.status.errors().contains(ErrorFlag::BatOvervoltage));
    }

    #[test]
    fn control_tick_runs_without_panicking_from_cold_boot() {
        let mut sys = system();
        sys.hv.bus.voltage = 18.0;
        sys.hv.current = 2.0;
        sys.lv.bus.voltage = 12.0;
        sys.lv.current = 1.0;
        for t in 0..500 {
            sys.control_tick(t, 0.1, 1.0, 25.0, 25.0);
        }
        assert!(!sys.status.has_fatal_error());
    }

    #[test]
    fn housekeeping_rolls_day_boundary_and_accumulates_energy() {
        let mut sys = system();
        sys.lv.bus.voltage = 12.0;
        sys.lv.current = 2.0;
        for t in 0..90_000i64 {
            sys.housekeeping_tick(t, 25.0);
        }
        assert!(sys.status.day_counter >= 1);
        assert!(sys.status.cumulative_charge_wh > 0.0);
    }

    #[test]
    fn housekeeping_signals_persistence_write_every_six_hours() {
        let mut sys = system();
        let mut writes = 0;
        for t in 0..(6 * 3600 + 1) {
            if sys.housekeeping_tick(t, 25.0) {
                writes += 1;
            }
        }
        assert_eq!(writes, 1);
    }
}
