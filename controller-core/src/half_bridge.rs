//! Half-bridge PWM primitive (§4.1): pure actuation, no feedback logic.

/// PWM alignment scheme. Center-aligned halves the auto-reload count for the same
/// switching frequency because the counter sweeps up and down once per period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Edge,
    Center,
}

/// Complementary half-bridge PWM with enforced dead-time and a clamped duty cycle.
///
/// This struct owns the duty-cycle *state*; it never touches a register. The firmware
/// binary reads [`HalfBridge::ccr`], [`HalfBridge::arr`], [`HalfBridge::dead_time_clocks`]
/// and [`HalfBridge::enabled`] once per tick and programs the real timer accordingly.
#[derive(Debug, Clone, Copy)]
pub struct HalfBridge {
    arr: u32,
    ccr: u32,
    ccr_min: u32,
    ccr_max: u32,
    dead_time_clocks: u32,
    enabled: bool,
}

impl HalfBridge {
    /// Computes `arr`, `ccr_min`/`ccr_max` and `dead_time_clocks` from the switching
    /// frequency, dead-time and duty clamp, leaving outputs disabled (§4.1).
    ///
    /// `f_core_hz` is the timer's input clock; `freq_khz` the desired switching
    /// frequency; `dead_time_ns` the required shoot-through-prevention gap.
    pub fn init(
        f_core_hz: u32,
        freq_khz: u32,
        dead_time_ns: u32,
        min_duty: f32,
        max_duty: f32,
        alignment: Alignment,
    ) -> Self {
        debug_assert!(freq_khz > 0);
        debug_assert!((0.0..=1.0).contains(&min_duty));
        debug_assert!((0.0..=1.0).contains(&max_duty));
        debug_assert!(min_duty <= max_duty);

        let period_clocks = f_core_hz / (freq_khz * 1000);
        let arr = match alignment {
            Alignment::Edge => period_clocks,
            Alignment::Center => period_clocks / 2,
        };

        let f_core_mhz = f_core_hz / 1_000_000;
        let dead_time_clocks = f_core_mhz * dead_time_ns / 1000;

        let ccr_min = (arr as f32 * min_duty) as u32;
        let ccr_max = (arr as f32 * max_duty) as u32;

        Self {
            arr,
            ccr: ccr_min,
            ccr_min,
            ccr_max,
            dead_time_clocks,
            enabled: false,
        }
    }

    /// Stores `ccr = clamp(arr * x, ccr_min, ccr_max)`. Never violates the clamp.
    pub fn set_duty(&mut self, x: f32) {
        let raw = (self.arr as f32 * x.clamp(0.0, 1.0)) as u32;
        self.ccr = raw.clamp(self.ccr_min, self.ccr_max);
    }

    /// Same clamp as [`Self::set_duty`], but for a raw register value.
    pub fn set_ccr(&mut self, n: u32) {
        self.ccr = n.clamp(self.ccr_min, self.ccr_max);
    }

    /// Nudges the duty by `delta` raw counts, clamped. This is the DC/DC control loop's
    /// ±1 LSB step (§4.3); `delta` is typically `pwm_delta` (`+1` or `-1`).
    pub fn step_duty(&mut self, delta: i32) {
        let next = (self.ccr as i64 + delta as i64).clamp(self.ccr_min as i64, self.ccr_max as i64);
        self.ccr = next as u32;
    }

    pub fn get_duty(&self) -> f32 {
        self.ccr as f32 / self.arr as f32
    }

    pub fn ccr(&self) -> u32 {
        self.ccr
    }

    pub fn arr(&self) -> u32 {
        self.arr
    }

    pub fn dead_time_clocks(&self) -> u32 {
        self.dead_time_clocks
    }

    /// No-op if `ccr == 0` (§4.1): refuses to enable outputs with a zero duty cycle.
    pub fn start(&mut self) {
        if self.ccr != 0 {
            self.enabled = true;
        }
    }

    /// Disables outputs. Safe to call unconditionally, including from an emergency-stop
    /// path; the next PWM period sees the outputs off.
    pub fn stop(&mut self) {
        self.enabled = false;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }
}


#[cfg(test)]
mod proptest_invariants {
    use super::*;
    use proptest::prelude::*;

    fn hb_strategy() -> impl Strategy<Value = HalfBridge> {
        (0.0f32..0.5, 0.5f32..1.0).prop_map(|(min_duty, max_duty)| {
            HalfBridge::init(64_000_000, 20, 300, min_duty, max_duty, Alignment::Center)
        })
    }

    proptest! {
        // Property 1 (§8): ccr always stays within [ccr_min, ccr_max], whatever sequence
        // of set_duty/set_ccr/step_duty calls drives it there.
        #[test]
        fn ccr_always_within_clamp_bounds(
            mut h in hb_strategy(),
            duties in proptest::collection::vec(any::<f32>(), 0..20),
            ccrs in proptest::collection::vec(any::<u32>(), 0..20),
            steps in proptest::collection::vec(-5i32..=5, 0..20),
        ) {
            let (min, max) = (h.ccr_min, h.ccr_max);
            for d in duties {
                h.set_duty(d);
                prop_assert!(h.ccr() >= min && h.ccr() <= max);
            }
            for c in ccrs {
                h.set_ccr(c);
                prop_assert!(h.ccr() >= min && h.ccr() <= max);
            }
            for s in steps {
                h.step_duty(s);
                prop_assert!(h.ccr() >= min && h.ccr() <= max);
            }
        }

        // Property 6 (§8): repeated set_duty(x) without an intervening timer event is
        // idempotent.
        #[test]
        fn set_duty_is_idempotent(mut h in hb_strategy(), x in 0.0f32..1.0) {
            h.set_duty(x);
            let first = h.ccr();
            h.set_duty(x);
            prop_assert_eq!(h.ccr(), first);
        }
    }
}
