//! A host-simulated board: fixed, plausible measurements standing in for a real ADC,
//! PWM timer and flash driver. Used so `main.rs` links and runs end to end without a
//! concrete chip's HAL crate wired in -- swapping this module for a real board is the
//! only change a port to actual hardware needs (§9 Design Notes).

use embedded_hal::digital::{ErrorType, OutputPin};

use crate::hal::{Daq, Measurements, PersistenceMedium, PwmTimer, Watchdog};

pub struct SimDaq;

impl Daq for SimDaq {
    type Error = core::convert::Infallible;

    async fn sample(&mut self) -> Result<Measurements, Self::Error> {
        Ok(Measurements {
            hv_voltage: 18.0,
            hv_current: 2.0,
            lv_voltage: 13.2,
            lv_current: 1.0,
            inductor_current: 1.0,
            battery_temp_c: 25.0,
            ambient_temp_c: 22.0,
        })
    }

    async fn set_lv_alerts(&mut self, _upper: f32, _lower: f32) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn set_hv_limit(&mut self, _upper: f32) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn calibrate_current_sensors(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[derive(Default)]
pub struct SimPwmTimer {
    pub arr: u32,
    pub ccr: u32,
    pub dead_time_clocks: u32,
    pub outputs_enabled: bool,
}

impl PwmTimer for SimPwmTimer {
    fn set_arr(&mut self, arr: u32) {
        self.arr = arr;
    }

    fn set_ccr(&mut self, ccr: u32) {
        self.ccr = ccr;
    }

    fn set_dead_time(&mut self, clocks: u32) {
        self.dead_time_clocks = clocks;
    }

    fn enable_outputs(&mut self) {
        self.outputs_enabled = true;
    }

    fn disable_outputs(&mut self) {
        self.outputs_enabled = false;
    }
}

pub struct SimLoadSwitch {
    pub on: bool,
}

impl ErrorType for SimLoadSwitch {
    type Error = core::convert::Infallible;
}

impl OutputPin for SimLoadSwitch {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.on = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.on = true;
        Ok(())
    }
}

#[derive(Default)]
pub struct SimWatchdog {
    pub feed_count: u32,
}

impl Watchdog for SimWatchdog {
    fn feed(&mut self) {
        self.feed_count += 1;
    }
}

/// In-memory stand-in for flash/EEPROM (§6): a byte-addressable store of at least the
/// 512 bytes the spec's persisted-state contract requires.
pub struct SimFlash {
    storage: [u8; 512],
}

impl Default for SimFlash {
    fn default() -> Self {
        Self { storage: [0xFF; 512] }
    }
}

impl PersistenceMedium for SimFlash {
    type Error = core::convert::Infallible;

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), Self::Error> {
        buf.copy_from_slice(&self.storage[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, buf: &[u8]) -> Result<(), Self::Error> {
        self.storage[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn erase(&mut self) -> Result<(), Self::Error> {
        self.storage = [0xFF; 512];
        Ok(())
    }
}
