//! DC/DC control loop: MPPT perturb-and-observe plus the derate conditions and
//! emergency stops that can force the duty step regardless of the MPPT's own opinion.

use crate::half_bridge::HalfBridge;
use crate::port::PowerPort;
use crate::status::{DeviceStatus, ErrorFlag};
use crate::Seconds;

/// Converter topology mode. Fixed per device at construction; a single unit never
/// switches between these at runtime (role is wiring, not state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcdcMode {
    Off,
    Buck,
    Boost,
    Nanogrid,
}

/// Which side the DC/DC is presently regulating. `Off` and the forced states
/// (`CcLs`/`CvLs`/`CcHs`/`CvHs`) are entered by the derate logic; `Mppt` is the normal
/// perturb-and-observe mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcdcState {
    Off,
    /// Just started: duty is held at the voltage-ratio estimate set on entry for
    /// [`STARTUP_WARMUP_TICKS`] ticks before perturb-and-observe takes over (§4.3).
    Starting,
    Mppt,
    /// Forced constant-current regulation on the low-voltage side.
    CcLs,
    /// Forced constant-voltage regulation on the low-voltage side.
    CvLs,
    /// Forced constant-current regulation on the high-voltage side.
    CcHs,
    /// Forced constant-voltage regulation on the high-voltage side.
    CvHs,
}

/// Fixed-at-construction role describing which side is the source and which is the
/// sink for this unit's topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcdcRole {
    /// HV (solar) sources, LV (battery) sinks.
    SolarCharger,
    /// LV sources, HV sinks (e.g. driving a nanogrid bus from the battery).
    BatteryDischarger,
}

#[derive(Debug, Clone, Copy)]
pub struct DcdcConfig {
    pub mode: DcdcMode,
    pub role: DcdcRole,
    /// PWM step size in raw counts applied per control tick.
    pub pwm_delta: i32,
    pub over_temperature_c: f32,
    pub under_temperature_c: f32,
    pub inductor_current_max: f32,
    /// Hardware-rated maximum on the high-voltage bus; exceeding it is an immediate
    /// emergency stop, not a derate.
    pub hs_voltage_max: f32,
    pub ls_voltage_min: f32,
    pub ls_voltage_max: f32,
    /// Minimum time the converter must stay off before a restart is attempted.
    pub restart_interval_s: Seconds,
    /// Below this delivered power, the converter is considered not to be doing
    /// anything useful; after `power_good_timeout_s` of that it stops itself rather
    /// than churn the duty cycle indefinitely.
    pub power_good_threshold_w: f32,
    pub power_good_timeout_s: Seconds,
}

/// Ticks the converter holds the ratio-seeded initial duty in [`DcdcState::Starting`]
/// before perturb-and-observe begins (§4.3).
const STARTUP_WARMUP_TICKS: u8 = 3;

#[derive(Debug, Clone, Copy)]
pub struct Dcdc {
    pub config: DcdcConfig,
    pub state: DcdcState,
    pub enable: bool,
    /// Sign of the last MPPT perturbation, so `control` can continue in the same
    /// direction if power increased, or reverse it otherwise.
    last_step_sign: i32,
    power: f32,
    power_prev: f32,
    pub inductor_current: f32,
    /// Timestamp the converter last transitioned to `Off`, used by the restart gate.
    off_timestamp: Seconds,
    power_good_since: Option<Seconds>,
    started_at: Option<Seconds>,
    warmup_ticks_remaining: u8,
}

impl Dcdc {
    pub fn new(config: DcdcConfig) -> Self {
        Self {
            config,
            state: DcdcState::Off,
            enable: true,
            last_step_sign: 1,
            power: 0.0,
            power_prev: 0.0,
            inductor_current: 0.0,
            off_timestamp: -config.restart_interval_s,
            power_good_since: None,
            started_at: None,
            warmup_ticks_remaining: 0,
        }
    }

    /// Start gating while `Off`: enabled, the restart-interval cooldown has elapsed
    /// since the last stop, and both bus voltages sit inside their hardware windows.
    /// Equality at either boundary is allowed.
    pub fn check_start_conditions(&self, now: Seconds, hv: &PowerPort, lv: &PowerPort) -> bool {
        if self.config.mode == DcdcMode::Off || !self.enable {
            return false;
        }
        if now - self.off_timestamp < self.config.restart_interval_s {
            return false;
        }
        if lv.bus.voltage < self.config.ls_voltage_min || lv.bus.voltage > self.config.ls_voltage_max {
            return false;
        }
        if !(hv.bus.voltage > 0.0 && hv.bus.voltage <= self.config.hs_voltage_max) {
            return false;
        }
        true
    }

    /// One control-tick step. `hv` and `lv` are the two bus-side ports; which one is
    /// "source" and which is "sink" is determined by `self.config.role`.
    /// `emergency_stop` carries a fatal condition latched by another subsystem (on the
    /// previous tick) that should force this converter off regardless of its own
    /// readings. Returns the duty step (in raw counts) actually applied to
    /// `half_bridge`, matching the contract the firmware's fast-trip ISR uses to veto a
    /// step with `stop()`.
    #[allow(clippy::too_many_arguments)]
    pub fn control(
        &mut self,
        half_bridge: &mut HalfBridge,
        hv: &PowerPort,
        lv: &PowerPort,
        now: Seconds,
        inductor_current: f32,
        temp_c: f32,
        emergency_stop: bool,
        status: &mut DeviceStatus,
    ) -> i32 {
        self.inductor_current = inductor_current;

        if hv.bus.voltage > self.config.hs_voltage_max {
            status.set_error(ErrorFlag::DcdcHsOvervoltage);
            return self.trip(half_bridge, now);
        }
        if lv.bus.voltage > self.config.ls_voltage_max {
            status.set_error(ErrorFlag::BatOvervoltage);
            return self.trip(half_bridge, now);
        }
        if emergency_stop || self.config.mode == DcdcMode::Off {
            return self.trip(half_bridge, now);
        }

        let (src, sink) = match self.config.role {
            DcdcRole::SolarCharger => (hv, lv),
            DcdcRole::BatteryDischarger => (lv, hv),
        };
        let buck = self.config.mode == DcdcMode::Buck;

        if self.state == DcdcState::Off {
            if !self.check_start_conditions(now, hv, lv) {
                half_bridge.stop();
                return 0;
            }
            // Best first-cycle estimate: seed the duty from the input/output voltage
            // ratio instead of starting from whatever the clamp's minimum happens to be.
            let initial_duty = if buck {
                (sink.bus.voltage / src.bus.voltage.max(0.1)).clamp(0.0, 1.0)
            } else {
                (1.0 - src.bus.voltage / sink.bus.voltage.max(0.1)).clamp(0.0, 1.0)
            };
            half_bridge.set_duty(initial_duty);
            half_bridge.start();
            self.state = DcdcState::Starting;
            self.power_good_since = None;
            self.started_at = Some(now);
            self.warmup_ticks_remaining = STARTUP_WARMUP_TICKS;
            return 0;
        }

        // Derate conditions, checked in priority order. Buck and boost walk the duty
        // cycle in opposite directions to reduce delivered power; the two current-limit
        // rows only apply in Buck (the table has no Boost entry for them).
        if temp_c >= self.config.over_temperature_c || temp_c <= self.config.under_temperature_c {
            self.state = DcdcState::CcLs;
            return self.force_step(half_bridge, if buck { -1 } else { 1 });
        }
        if buck && sink.current >= sink.pos_current_limit {
            self.state = DcdcState::CcLs;
            return self.force_step(half_bridge, -1);
        }
        if self.inductor_current.abs() >= self.config.inductor_current_max {
            self.state = DcdcState::CcLs;
            return self.force_step(half_bridge, if buck { -1 } else { 1 });
        }
        if buck && src.current <= src.neg_current_limit {
            self.state = DcdcState::CcHs;
            return self.force_step(half_bridge, -1);
        }
        if src.bus.voltage <= src.bus.src_voltage_bound {
            self.state = DcdcState::CvHs;
            return self.force_step(half_bridge, if buck { -1 } else { 1 });
        }
        if sink.bus.voltage >= sink.bus.sink_voltage_bound {
            self.state = DcdcState::CvLs;
            return self.force_step(half_bridge, if buck { -1 } else { 1 });
        }

        if self.state == DcdcState::Starting {
            self.power_prev = self.power;
            self.power = src.bus.voltage * src.current;
            self.warmup_ticks_remaining = self.warmup_ticks_remaining.saturating_sub(1);
            if self.warmup_ticks_remaining == 0 {
                self.state = DcdcState::Mppt;
            }
            return 0;
        }

        self.state = DcdcState::Mppt;
        self.power_prev = self.power;
        self.power = src.bus.voltage * src.current;

        if self.power.abs() < self.config.power_good_threshold_w {
            let since = *self.power_good_since.get_or_insert(now);
            if now - since >= self.config.power_good_timeout_s {
                return self.trip(half_bridge, now);
            }
        } else {
            self.power_good_since = None;
        }

        let step = self.mppt_step();
        half_bridge.step_duty(step);
        half_bridge.start();
        step
    }

    fn force_step(&mut self, half_bridge: &mut HalfBridge, sign: i32) -> i32 {
        let step = sign * self.config.pwm_delta;
        half_bridge.step_duty(step);
        half_bridge.start();
        step
    }

    /// Stop, latch the off timestamp for the restart cooldown, and return a zero step.
    fn trip(&mut self, half_bridge: &mut HalfBridge, now: Seconds) -> i32 {
        self.state = DcdcState::Off;
        half_bridge.stop();
        self.off_timestamp = now;
        self.power_good_since = None;
        0
    }

    /// Perturb-and-observe: continue stepping the same direction while delivered power
    /// increases tick over tick; reverse otherwise.
    fn mppt_step(&mut self) -> i32 {
        let sign = if self.power >= self.power_prev {
            self.last_step_sign
        } else {
            -self.last_step_sign
        };
        self.last_step_sign = sign;
        sign * self.config.pwm_delta
    }

    pub fn started_at(&self) -> Option<Seconds> {
        self.started_at
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bus::DcBus;
    use crate::half_bridge::Alignment;

    fn hb() -> HalfBridge {
        HalfBridge::init(64_000_000, 20, 300, 0.0, 1.0, Alignment::Center)
    }

    fn config() -> DcdcConfig {
        DcdcConfig {
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
        }
    }

    fn port(voltage: f32, current: f32) -> PowerPort {
        let mut p = PowerPort::new(DcBus::new(1));
        p.bus.voltage = voltage;
        p.bus.sink_voltage_bound = 14.4;
        p.bus.src_voltage_bound = 10.0;
        p.current = current;
        p.pos_current_limit = 20.0;
        p.neg_current_limit = -20.0;
        p
    }

    fn running(dcdc: &mut Dcdc) {
        dcdc.state = DcdcState::Mppt;
        dcdc.started_at = Some(0);
    }

    #[test]
    fn emergency_stop_forces_off_and_zero_step() {
        let mut dcdc = Dcdc::new(config());
        running(&mut dcdc);
        let mut half_bridge = hb();
        half_bridge.set_duty(0.5);
        half_bridge.start();
        let mut status = DeviceStatus::new();
        let step = dcdc.control(
            &mut half_bridge,
            &port(18.0, 2.0),
            &port(12.0, 1.0),
            0,
            0.0,
            25.0,
            true,
            &mut status,
        );
        assert_eq!(step, 0);
        assert_eq!(dcdc.state, DcdcState::Off);
        assert!(!half_bridge.enabled());
    }

    #[test]
    fn hs_overvoltage_trips_immediately_and_sets_fatal_flag() {
        let mut dcdc = Dcdc::new(config());
        running(&mut dcdc);
        let mut half_bridge = hb();
        let mut status = DeviceStatus::new();
        let step = dcdc.control(
            &mut half_bridge,
            &port(150.0, 2.0),
            &port(12.0, 1.0),
            0,
            0.0,
            25.0,
            false,
            &mut status,
        );
        assert_eq!(step, 0);
        assert_eq!(dcdc.state, DcdcState::Off);
        assert!(status.has_error(ErrorFlag::DcdcHsOvervoltage));
        assert!(status.has_fatal_error());
    }

    #[test]
    fn over_temperature_forces_cc_ls_and_steps_down_in_buck() {
        let mut dcdc = Dcdc::new(config());
        running(&mut dcdc);
        let mut half_bridge = hb();
        let mut status = DeviceStatus::new();
        let step = dcdc.control(
            &mut half_bridge,
            &port(18.0, 2.0),
            &port(12.0, 1.0),
            0,
            0.0,
            65.0,
            false,
            &mut status,
        );
        assert_eq!(dcdc.state, DcdcState::CcLs);
        assert_eq!(step, -2);
    }

    #[test]
    fn over_temperature_steps_up_in_boost() {
        let mut cfg = config();
        cfg.mode = DcdcMode::Boost;
        let mut dcdc = Dcdc::new(cfg);
        running(&mut dcdc);
        let mut half_bridge = hb();
        let mut status = DeviceStatus::new();
        let step = dcdc.control(
            &mut half_bridge,
            &port(18.0, 2.0),
            &port(12.0, 1.0),
            0,
            0.0,
            65.0,
            false,
            &mut status,
        );
        assert_eq!(step, 2);
    }

    #[test]
    fn sink_at_voltage_bound_forces_cv_ls() {
        let mut dcdc = Dcdc::new(config());
        running(&mut dcdc);
        let mut half_bridge = hb();
        let lv = port(14.4, 1.0);
        let mut status = DeviceStatus::new();
        let step = dcdc.control(
            &mut half_bridge,
            &port(18.0, 2.0),
            &lv,
            0,
            0.0,
            25.0,
            false,
            &mut status,
        );
        assert_eq!(dcdc.state, DcdcState::CvLs);
        assert_eq!(step, -2);
    }

    #[test]
    fn inductor_current_over_limit_forces_cc_ls() {
        let mut dcdc = Dcdc::new(config());
        running(&mut dcdc);
        let mut half_bridge = hb();
        let mut status = DeviceStatus::new();
        let step = dcdc.control(
            &mut half_bridge,
            &port(18.0, 2.0),
            &port(12.0, 1.0),
            0,
            31.0,
            25.0,
            false,
            &mut status,
        );
        assert_eq!(dcdc.state, DcdcState::CcLs);
        assert_eq!(step, -2);
    }

    #[test]
    fn mppt_continues_same_direction_while_power_rises() {
        let mut dcdc = Dcdc::new(config());
        running(&mut dcdc);
        let mut half_bridge = hb();
        half_bridge.set_duty(0.3);
        let lv = port(12.0, 1.0);
        let mut status = DeviceStatus::new();
        let step1 = dcdc.control(
            &mut half_bridge,
            &port(18.0, 2.0),
            &lv,
            0,
            0.0,
            25.0,
            false,
            &mut status,
        );
        assert_eq!(dcdc.state, DcdcState::Mppt);
        let step2 = dcdc.control(
            &mut half_bridge,
            &port(18.0, 3.0),
            &lv,
            1,
            0.0,
            25.0,
            false,
            &mut status,
        );
        assert_eq!(step1.signum(), step2.signum());
    }

    #[test]
    fn mppt_reverses_direction_when_power_falls() {
        let mut dcdc = Dcdc::new(config());
        running(&mut dcdc);
        let mut half_bridge = hb();
        half_bridge.set_duty(0.3);
        let lv = port(12.0, 1.0);
        let mut status = DeviceStatus::new();
        let step1 = dcdc.control(
            &mut half_bridge,
            &port(18.0, 3.0),
            &lv,
            0,
            0.0,
            25.0,
            false,
            &mut status,
        );
        let step2 = dcdc.control(
            &mut half_bridge,
            &port(18.0, 1.0),
            &lv,
            1,
            0.0,
            25.0,
            false,
            &mut status,
        );
        assert_eq!(step1.signum(), -step2.signum());
    }

    #[test]
    fn sustained_low_power_trips_the_converter() {
        let mut dcdc = Dcdc::new(config());
        running(&mut dcdc);
        let mut half_bridge = hb();
        let src = port(18.0, 0.01);
        let lv = port(12.0, 0.0);
        let mut status = DeviceStatus::new();
        for t in 0..10 {
            let step = dcdc.control(&mut half_bridge, &src, &lv, t, 0.0, 25.0, false, &mut status);
            assert_eq!(dcdc.state, DcdcState::Mppt);
            let _ = step;
        }
        let step = dcdc.control(&mut half_bridge, &src, &lv, 10, 0.0, 25.0, false, &mut status);
        assert_eq!(step, 0);
        assert_eq!(dcdc.state, DcdcState::Off);
    }

    #[test]
    fn start_blocked_before_restart_interval_elapses_allowed_at_equality() {
        let mut dcdc = Dcdc::new(config());
        dcdc.off_timestamp = 0;
        let lv = port(12.0, 0.0);
        let hv = port(18.0, 0.0);
        assert!(!dcdc.check_start_conditions(59, &hv, &lv));
        assert!(dcdc.check_start_conditions(60, &hv, &lv));
    }

    #[test]
    fn start_blocked_outside_ls_voltage_window() {
        let mut dcdc = Dcdc::new(config());
        dcdc.off_timestamp = -1000;
        let hv = port(18.0, 0.0);
        assert!(!dcdc.check_start_conditions(0, &hv, &port(20.0, 0.0)));
        assert!(dcdc.check_start_conditions(0, &hv, &port(12.0, 0.0)));
    }

    #[test]
    fn disabled_never_starts() {
        let mut dcdc = Dcdc::new(config());
        dcdc.off_timestamp = -1000;
        dcdc.enable = false;
        assert!(!dcdc.check_start_conditions(0, &port(18.0, 0.0), &port(12.0, 0.0)));
    }

    #[test]
    fn start_seeds_duty_from_voltage_ratio_and_holds_through_warmup() {
        let mut dcdc = Dcdc::new(config());
        dcdc.off_timestamp = -1000;
        let mut half_bridge = hb();
        let hv = port(18.0, 2.0);
        let lv = port(12.0, 1.0);
        let mut status = DeviceStatus::new();

        let step = dcdc.control(&mut half_bridge, &hv, &lv, 0, 0.0, 25.0, false, &mut status);
        assert_eq!(step, 0);
        assert_eq!(dcdc.state, DcdcState::Starting);
        assert!((half_bridge.get_duty() - 12.0 / 18.0).abs() < 0.05);
        assert!(half_bridge.enabled());

        for t in 1..3 {
            let step = dcdc.control(&mut half_bridge, &hv, &lv, t, 0.0, 25.0, false, &mut status);
            assert_eq!(step, 0);
            assert_eq!(dcdc.state, DcdcState::Starting, "must stay in warm-up for at least 3 ticks");
        }

        let step = dcdc.control(&mut half_bridge, &hv, &lv, 3, 0.0, 25.0, false, &mut status);
        assert_eq!(step, 0);
        assert_eq!(dcdc.state, DcdcState::Mppt);
    }
}
