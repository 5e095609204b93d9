//! Load output switch: thermal-integrated, debounced on/off control of the LV load
//! terminal, plus its USB auxiliary mirror.

use crate::battery_config::BatteryConfig;
use crate::status::{DeviceStatus, ErrorFlag};
use crate::Seconds;

/// The control tick runs at 10 Hz; debounce windows expressed in ticks are scaled from
/// this so a config's "N seconds of sustained overvoltage" reads naturally.
const CONTROL_FREQUENCY_HZ: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Disabled,
    On,
    OffLowSoc,
    OffOvercurrent,
    OffOvervoltage,
    OffTemperature,
    OffShortCircuit,
}

#[derive(Debug, Clone, Copy)]
pub struct LoadOutputConfig {
    /// Switch on-resistance, for the junction thermal model.
    pub r_on: f32,
    pub thermal_tau_s: f32,
    /// Junction temperature at which the thermal integrator trips `OffOvercurrent`
    /// (§4.5: "go to OFF_OVERCURRENT when the thermal integrator exceeds its limit").
    pub junction_max_c: f32,
    /// Added to the LV bus's droop-adjusted `sink_voltage_bound` to get the
    /// overvoltage trip threshold (§4.5 / S4: `sink_voltage_bound + 0.5 V`).
    pub overvoltage_headroom_v: f32,
    /// Subtracted from `sink_voltage_bound` to get the voltage the bus must fall back
    /// to before an overvoltage trip is allowed to recover.
    pub ov_hysteresis: f32,
    /// Consecutive over-bound control ticks required before an overvoltage trip
    /// latches, so a single noisy sample can't drop the load.
    pub overvoltage_debounce_ticks: u32,
    /// SOC at/below which the load is disconnected.
    pub low_soc_cutoff: f32,
    /// SOC at/above which the load is allowed to reconnect after a low-SOC trip,
    /// preventing chatter at the cutoff boundary (grounded on `dc_bus.cpp`'s reconnect
    /// hysteresis).
    pub low_soc_reconnect: f32,
    /// Time an overcurrent trip stays latched before the output automatically retries.
    pub oc_recovery_delay_s: Seconds,
    /// Time a low-SOC trip stays latched before the output is allowed to retry, in
    /// addition to the SOC having recovered past `low_soc_reconnect` (§4.5: "return to
    /// ON after lvd_recovery_delay AND underlying undervoltage cleared").
    pub lvd_recovery_delay_s: Seconds,
}

impl LoadOutputConfig {
    pub fn with_defaults(r_on: f32) -> Self {
        Self {
            r_on,
            thermal_tau_s: 60.0,
            junction_max_c: 100.0,
            overvoltage_headroom_v: 0.5,
            ov_hysteresis: 0.2,
            overvoltage_debounce_ticks: CONTROL_FREQUENCY_HZ,
            low_soc_cutoff: 0.15,
            low_soc_reconnect: 0.30,
            oc_recovery_delay_s: 10,
            lvd_recovery_delay_s: 10,
        }
    }
}

/// Debounced, thermally-protected load output, plus the USB auxiliary output that
/// mirrors most of its transitions (§3, §4.5).
#[derive(Debug, Clone, Copy)]
pub struct LoadOutput {
    pub config: LoadOutputConfig,
    pub state: LoadState,
    pub usb_state: LoadState,
    pub junction_temperature_c: f32,
    pub enabled: bool,
    pub usb_enable: bool,
    overvoltage_debounce_count: u32,
    /// When the main output's current latched trip (overcurrent or overvoltage) was
    /// entered, so the recovery delay can be timed from it. `None` for every other
    /// state.
    tripped_at: Option<Seconds>,
    /// When the output most recently entered `OffLowSoc`, timing `lvd_recovery_delay_s`.
    low_soc_since: Option<Seconds>,
}

impl LoadOutput {
    pub fn new(config: LoadOutputConfig, ambient_c: f32) -> Self {
        Self {
            config,
            state: LoadState::Disabled,
            usb_state: LoadState::Disabled,
            junction_temperature_c: ambient_c,
            enabled: false,
            usb_enable: false,
            overvoltage_debounce_count: 0,
            tripped_at: None,
            low_soc_since: None,
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
        if self.state == LoadState::Disabled {
            self.state = LoadState::On;
        }
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.state = LoadState::Disabled;
    }

    pub fn usb_enable(&mut self) {
        self.usb_enable = true;
        if self.usb_state == LoadState::Disabled {
            self.usb_state = LoadState::On;
        }
    }

    pub fn usb_disable(&mut self) {
        self.usb_enable = false;
        self.usb_state = LoadState::Disabled;
    }

    /// `status` carries the device-wide temperature flags (§4.5: "go to OFF_TEMPERATURE
    /// if device-status signals internal or battery overtemp/undertemp"); `status` is
    /// read-only here, the owning `System` decides when those flags are set.
    /// `sink_voltage_bound` is the LV bus's droop-adjusted sink bound, used to derive
    /// the overvoltage trip/recovery thresholds relative to the present set-point
    /// rather than a fixed absolute voltage.
    #[allow(clippy::too_many_arguments)]
    pub fn control(
        &mut self,
        now: Seconds,
        dt_s: f32,
        battery_cfg: &BatteryConfig,
        status: &DeviceStatus,
        current: f32,
        bus_voltage: f32,
        sink_voltage_bound: f32,
        soc: f32,
        ambient_c: f32,
    ) {
        let temp_fault = status.has_error(ErrorFlag::IntOvertemp)
            || status.has_error(ErrorFlag::BatDisOvertemp)
            || status.has_error(ErrorFlag::BatDisUndertemp);
        // No dedicated under-voltage variant exists in this state machine; an absolute
        // pack-voltage floor breach is a battery-protection condition like low SOC, so
        // it's folded into the same state.
        let floor_fault = bus_voltage <= battery_cfg.absolute_min_voltage();

        self.control_main(now, dt_s, current, bus_voltage, sink_voltage_bound, soc, ambient_c, temp_fault, floor_fault);
        self.control_usb(now, soc, temp_fault, floor_fault);
    }

    #[allow(clippy::too_many_arguments)]
    fn control_main(
        &mut self,
        now: Seconds,
        dt_s: f32,
        current: f32,
        bus_voltage: f32,
        sink_voltage_bound: f32,
        soc: f32,
        ambient_c: f32,
        temp_fault: bool,
        floor_fault: bool,
    ) {
        if !self.enabled {
            self.state = LoadState::Disabled;
            return;
        }
        if matches!(self.state, LoadState::OffTemperature | LoadState::OffShortCircuit) {
            return;
        }

        // I^2*R heating against a first-order cooling term.
        let heating = current * current * self.config.r_on;
        let cooling = (self.junction_temperature_c - ambient_c) / self.config.thermal_tau_s;
        self.junction_temperature_c += (heating - cooling) * dt_s;

        let overvoltage_threshold = sink_voltage_bound + self.config.overvoltage_headroom_v;
        if bus_voltage >= overvoltage_threshold {
            self.overvoltage_debounce_count += 1;
        } else {
            self.overvoltage_debounce_count = 0;
        }

        // Overcurrent trips auto-retry after a fixed delay; overvoltage recovers only
        // once the bus voltage itself falls back past the hysteresis band.
        match self.state {
            LoadState::OffOvercurrent => match self.tripped_at {
                Some(at) if now - at >= self.config.oc_recovery_delay_s => self.tripped_at = None,
                _ => return,
            },
            LoadState::OffOvervoltage => {
                if bus_voltage > sink_voltage_bound - self.config.ov_hysteresis {
                    return;
                }
                self.tripped_at = None;
            }
            LoadState::OffLowSoc => match self.low_soc_since {
                Some(since) if now - since >= self.config.lvd_recovery_delay_s && soc >= self.config.low_soc_reconnect => {
                    self.low_soc_since = None;
                }
                _ => return,
            },
            _ => {}
        }

        if temp_fault {
            self.state = LoadState::OffTemperature;
            return;
        }
        if self.junction_temperature_c >= self.config.junction_max_c {
            self.state = LoadState::OffOvercurrent;
            self.tripped_at = Some(now);
            return;
        }
        if self.overvoltage_debounce_count >= self.config.overvoltage_debounce_ticks {
            self.state = LoadState::OffOvervoltage;
            self.tripped_at = Some(now);
            return;
        }
        if floor_fault || soc <= self.config.low_soc_cutoff {
            if self.state != LoadState::OffLowSoc {
                self.low_soc_since = Some(now);
            }
            self.state = LoadState::OffLowSoc;
            return;
        }

        self.state = LoadState::On;
    }

    /// The USB auxiliary output mirrors low-SOC, temperature and short-circuit
    /// transitions but ignores overvoltage and overcurrent (§4.5: "it is a separate
    /// downstream regulator").
    fn control_usb(&mut self, now: Seconds, soc: f32, temp_fault: bool, floor_fault: bool) {
        if !self.usb_enable {
            self.usb_state = LoadState::Disabled;
            return;
        }
        if matches!(self.usb_state, LoadState::OffTemperature | LoadState::OffShortCircuit) {
            return;
        }
        if self.usb_state == LoadState::OffLowSoc {
            let recovered = match self.low_soc_since {
                Some(since) if now - since >= self.config.lvd_recovery_delay_s && soc >= self.config.low_soc_reconnect => true,
                _ => false,
            };
            if !recovered {
                return;
            }
        }

        if temp_fault {
            self.usb_state = LoadState::OffTemperature;
        } else if floor_fault || soc <= self.config.low_soc_cutoff {
            self.usb_state = LoadState::OffLowSoc;
        } else {
            self.usb_state = LoadState::On;
        }
    }

    /// Immediate latched shutdown from the ISR fast-trip path: a voltage collapse is
    /// mapped onto the short-circuit state since it is the only latch in this state
    /// machine that a tick-rate `control` call cannot clear on its own. Affects both
    /// outputs -- a bus collapse takes the USB regulator down with it.
    pub fn stop_fast_trip(&mut self) {
        self.state = LoadState::OffShortCircuit;
        self.usb_state = LoadState::OffShortCircuit;
    }

    pub fn is_on(&self) -> bool {
        self.state == LoadState::On
    }

    pub fn usb_is_on(&self) -> bool {
        self.usb_state == LoadState::On
    }
}
