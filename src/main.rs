#![no_std]
#![no_main]

//! Firmware entry point: wires a concrete board into the three cooperating contexts
//! described in §5 and starts the embassy executor. All control semantics live in
//! `controller-core`; this crate only supplies real peripherals and task scheduling.

use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use static_cell::StaticCell;

use controller_core::battery_config::{BatteryConfig, Chemistry};
use controller_core::dcdc::{DcdcConfig, DcdcMode, DcdcRole};
use controller_core::half_bridge::{Alignment, HalfBridge};
use controller_core::load::{LoadOutput, LoadOutputConfig};
use controller_core::System;

use hal::{Daq, PwmTimer};

#[macro_use]
extern crate logger;

mod board;
mod hal;
mod tasks;

static SYSTEM: StaticCell<Mutex<CriticalSectionRawMutex, System>> = StaticCell::new();

/// Parameters for a single 12V/6-cell sealed lead-acid solar charge controller. A real
/// deployment would load these from the persisted configuration blob instead of
/// hard-coding them (§6); wiring that up is board-specific and left to the concrete
/// board module.
fn default_system() -> System {
    let half_bridge = HalfBridge::init(64_000_000, 20, 300, 0.05, 0.95, Alignment::Center);

    let dcdc_config = DcdcConfig {
        mode: DcdcMode::Buck,
        role: DcdcRole::SolarCharger,
        pwm_delta: 2,
        over_temperature_c: 60.0,
        under_temperature_c: -20.0,
        inductor_current_max: 40.0,
        hs_voltage_max: 100.0,
        ls_voltage_min: 8.0,
        ls_voltage_max: 16.0,
        restart_interval_s: 60,
        power_good_threshold_w: 2.0,
        power_good_timeout_s: 10,
    };

    let battery_config = BatteryConfig::for_chemistry(Chemistry::SealedLeadAcid, 6, 20.0, 20.0);

    let load_config = LoadOutputConfig::with_defaults(0.01);
    let mut load = LoadOutput::new(load_config, 25.0);
    load.enable();

    System::new(half_bridge, 6, 6, dcdc_config, battery_config, load, 16, 0.05)
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("controller-fw starting");

    let system = SYSTEM.init(Mutex::new(default_system()));

    let mut daq = board::SimDaq;
    let mut pwm = board::SimPwmTimer::default();
    let watchdog = board::SimWatchdog::default();
    let flash = board::SimFlash::default();

    if daq.calibrate_current_sensors().await.is_err() {
        error!("current sensor calibration failed, continuing with factory offsets");
    }
    let _ = daq.set_lv_alerts(16.0, 10.0).await;
    let _ = daq.set_hv_limit(100.0).await;

    {
        let sys = system.lock().await;
        pwm.set_arr(sys.half_bridge.arr());
        pwm.set_dead_time(sys.half_bridge.dead_time_clocks());
    }

    spawner.must_spawn(tasks::control_task(system, daq, pwm));
    spawner.must_spawn(tasks::housekeeping_task(system, watchdog, flash));

    info!("controller-fw tasks spawned, entering idle loop");
    loop {
        embassy_futures::yield_now().await;
    }
}
