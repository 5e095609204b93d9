//! Battery chemistry presets and the per-pack configuration derived from them.

use crate::Seconds;

/// Supported battery chemistries. Each carries fixed per-cell voltage thresholds;
/// [`BatteryConfig::for_chemistry`] scales them by `series_cells` to get pack voltages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chemistry {
    FloodedLeadAcid,
    SealedLeadAcid,
    Lfp,
    Nmc,
}

/// Per-cell voltage thresholds for one chemistry, before series scaling.
struct CellProfile {
    topping_v: f32,
    recharge_v: f32,
    trickle_v: f32,
    absolute_min_v: f32,
    equalization_v: f32,
    /// mV/°C/cell, applied around 25°C.
    temp_co_mv_per_c: f32,
    /// Open-circuit voltage at 0% and 100% state of charge, used by the resting-voltage
    /// SOC estimate. Flat curves (LFP) make this a rough estimate only.
    ocv_empty_v: f32,
    ocv_full_v: f32,
}

const FLOODED_LEAD_ACID: CellProfile = CellProfile {
    topping_v: 2.45,
    recharge_v: 2.20,
    trickle_v: 2.27,
    absolute_min_v: 1.75,
    equalization_v: 2.55,
    temp_co_mv_per_c: -4.0,
    ocv_empty_v: 1.95,
    ocv_full_v: 2.15,
};

const SEALED_LEAD_ACID: CellProfile = CellProfile {
    topping_v: 2.40,
    recharge_v: 2.20,
    trickle_v: 2.25,
    absolute_min_v: 1.80,
    equalization_v: 2.45,
    temp_co_mv_per_c: -3.0,
    ocv_empty_v: 1.95,
    ocv_full_v: 2.15,
};

const LFP: CellProfile = CellProfile {
    topping_v: 3.55,
    recharge_v: 3.30,
    trickle_v: 3.375,
    absolute_min_v: 2.50,
    equalization_v: 3.55,
    temp_co_mv_per_c: 0.0,
    ocv_empty_v: 3.00,
    ocv_full_v: 3.35,
};

const NMC: CellProfile = CellProfile {
    topping_v: 4.20,
    recharge_v: 3.90,
    trickle_v: 4.05,
    absolute_min_v: 3.00,
    equalization_v: 4.20,
    temp_co_mv_per_c: 0.0,
    ocv_empty_v: 3.00,
    ocv_full_v: 4.10,
};

/// Resolved, pack-level battery configuration. Chemistry-derived voltages are expanded
/// to absolute pack voltages at construction time so the rest of the crate never needs
/// to know the chemistry or the cell count.
#[derive(Debug, Clone, Copy)]
pub struct BatteryConfig {
    pub chemistry: Chemistry,
    pub series_cells: u8,
    /// Lithium chemistries skip the Trickle phase entirely (Topping completes to Idle).
    pub is_lithium: bool,
    topping_v: f32,
    recharge_v: f32,
    trickle_v: f32,
    absolute_min_v: f32,
    equalization_v: f32,
    temp_co_v_per_c: f32,
    pub cell_ocv_empty_v: f32,
    pub cell_ocv_full_v: f32,
    pub charge_current_max: f32,
    pub discharge_current_max: f32,
    /// Below this current the Topping phase is considered tapered off.
    pub topping_current_cutoff: f32,
    /// Minimum rest time in Idle before a sagging pack is allowed back into Bulk.
    pub time_limit_recharge_s: Seconds,
    /// Maximum time the droop-adjusted target voltage must hold before Topping ends
    /// regardless of current.
    pub topping_duration_s: Seconds,
    /// Hysteresis added to `absolute_min_voltage()` before discharge is re-permitted.
    pub recharge_hysteresis_v: f32,
    pub charge_temp_min_c: f32,
    pub charge_temp_max_c: f32,
    pub discharge_temp_min_c: f32,
    pub discharge_temp_max_c: f32,
    /// Equalization is permitted only for flooded lead-acid chemistry; other
    /// chemistries silently skip the equalization state.
    pub equalization_enabled: bool,
    pub equalization_interval_s: Seconds,
    pub equalization_duration_s: Seconds,
    /// Deep-discharge cycle count at which equalization is triggered even if the
    /// calendar interval hasn't elapsed yet.
    pub equalization_trigger_deep_cycles: u32,
    /// Filtered SOC threshold below which a discharge counts as "deep".
    pub deep_discharge_soc_threshold: f32,
}

impl BatteryConfig {
    fn profile(chemistry: Chemistry) -> &'static CellProfile {
        match chemistry {
            Chemistry::FloodedLeadAcid => &FLOODED_LEAD_ACID,
            Chemistry::SealedLeadAcid => &SEALED_LEAD_ACID,
            Chemistry::Lfp => &LFP,
            Chemistry::Nmc => &NMC,
        }
    }

    pub fn for_chemistry(
        chemistry: Chemistry,
        series_cells: u8,
        charge_current_max: f32,
        discharge_current_max: f32,
    ) -> Self {
        debug_assert!(series_cells >= 1);
        let p = Self::profile(chemistry);
        let n = series_cells as f32;
        let is_lithium = matches!(chemistry, Chemistry::Lfp | Chemistry::Nmc);
        Self {
            chemistry,
            series_cells,
            is_lithium,
            topping_v: p.topping_v * n,
            recharge_v: p.recharge_v * n,
            trickle_v: p.trickle_v * n,
            absolute_min_v: p.absolute_min_v * n,
            equalization_v: p.equalization_v * n,
            temp_co_v_per_c: p.temp_co_mv_per_c / 1000.0 * n,
            cell_ocv_empty_v: p.ocv_empty_v,
            cell_ocv_full_v: p.ocv_full_v,
            charge_current_max,
            discharge_current_max,
            topping_current_cutoff: charge_current_max * 0.1,
            time_limit_recharge_s: 60,
            topping_duration_s: 120 * 60,
            recharge_hysteresis_v: 0.1,
            charge_temp_min_c: 0.0,
            charge_temp_max_c: 45.0,
            discharge_temp_min_c: -20.0,
            discharge_temp_max_c: 60.0,
            equalization_enabled: matches!(chemistry, Chemistry::FloodedLeadAcid),
            equalization_interval_s: 90 * 24 * 3600,
            equalization_duration_s: 4 * 3600,
            equalization_trigger_deep_cycles: 10,
            deep_discharge_soc_threshold: 0.2,
        }
    }

    /// Topping (absorption) target voltage, compensated for `temp_c` around 25°C.
    pub fn topping_voltage(&self, temp_c: f32) -> f32 {
        self.topping_v + self.temp_co_v_per_c * (temp_c - 25.0)
    }

    /// Voltage below which the charger re-enters Bulk from Trickle.
    pub fn recharge_voltage(&self, temp_c: f32) -> f32 {
        self.recharge_v + self.temp_co_v_per_c * (temp_c - 25.0)
    }

    pub fn trickle_voltage(&self, temp_c: f32) -> f32 {
        self.trickle_v + self.temp_co_v_per_c * (temp_c - 25.0)
    }

    /// Floor below which the load output is forced off and discharge is blocked
    /// regardless of SOC.
    pub fn absolute_min_voltage(&self) -> f32 {
        self.absolute_min_v
    }

    pub fn equalization_voltage(&self, temp_c: f32) -> f32 {
        self.equalization_v + self.temp_co_v_per_c * (temp_c - 25.0)
    }

    /// A fixture matching the literal example configuration used for end-to-end charger
    /// scenarios: 6-cell flooded lead-acid, topping 14.4 V, recharge 13.8 V, absolute
    /// min 11.0 V, topping current cutoff 2 A, 60 s recharge rest, 120 min topping.
    #[cfg(test)]
    pub(crate) fn test_fixture_flooded_6s() -> Self {
        Self {
            chemistry: Chemistry::FloodedLeadAcid,
            series_cells: 6,
            is_lithium: false,
            topping_v: 14.4,
            recharge_v: 13.8,
            trickle_v: 13.6,
            absolute_min_v: 11.0,
            equalization_v: 14.7,
            temp_co_v_per_c: 0.0,
            cell_ocv_empty_v: 1.95,
            cell_ocv_full_v: 2.15,
            charge_current_max: 20.0,
            discharge_current_max: 20.0,
            topping_current_cutoff: 2.0,
            time_limit_recharge_s: 60,
            topping_duration_s: 120 * 60,
            recharge_hysteresis_v: 0.1,
            charge_temp_min_c: 0.0,
            charge_temp_max_c: 45.0,
            discharge_temp_min_c: -20.0,
            discharge_temp_max_c: 60.0,
            equalization_enabled: true,
            equalization_interval_s: 90 * 24 * 3600,
            equalization_duration_s: 4 * 3600,
            equalization_trigger_deep_cycles: 10,
            deep_discharge_soc_threshold: 0.2,
        }
    }
}
