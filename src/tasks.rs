//! The cooperating contexts: a 10 Hz control task, a 1 Hz housekeeping task, and the
//! main/idle task that owns persistence and watchdog feeding. The ISR fast-trip path is
//! not an embassy task at all -- it's `System::dma_alert`, called directly from the
//! board's interrupt handler.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Ticker};

use controller_core::persistence;
use controller_core::persistence::PersistenceMedium;
use controller_core::System;

use crate::board::{SimDaq, SimFlash, SimPwmTimer, SimWatchdog};
use crate::hal::{Daq, PwmTimer, Watchdog};

pub type SharedSystem = Mutex<CriticalSectionRawMutex, System>;

const PERSISTENCE_VERSION: u16 = 1;

/// 10 Hz control context: samples the DAQ, runs `System::control_tick`, and programs
/// the half-bridge registers with whatever duty the control loop landed on.
///
/// Task functions can't be generic, so this is wired directly to the simulated board's
/// concrete types; swapping to a real board means swapping these two type names.
#[embassy_executor::task]
pub async fn control_task(system: &'static SharedSystem, mut daq: SimDaq, mut pwm: SimPwmTimer) {
    let mut ticker = Ticker::every(Duration::from_millis(100));
    let mut now: i64 = 0;

    loop {
        match daq.sample().await {
            Ok(m) => {
                let mut sys = system.lock().await;
                sys.hv.bus.voltage = m.hv_voltage;
                sys.hv.current = m.hv_current;
                sys.lv.bus.voltage = m.lv_voltage;
                sys.lv.current = m.lv_current;

                sys.control_tick(now, 0.1, m.inductor_current, m.battery_temp_c, m.ambient_temp_c);

                pwm.set_ccr(sys.half_bridge.ccr());
                if sys.half_bridge.enabled() {
                    pwm.enable_outputs();
                } else {
                    pwm.disable_outputs();
                }
            }
            Err(_) => {
                error!("control task: DAQ sample failed, forcing half-bridge off");
                pwm.disable_outputs();
            }
        }

        now += 1;
        ticker.next().await;
    }
}

/// 1 Hz housekeeping context: energy accounting, extremes, day-boundary rollover and
/// the periodic persistence write-through. Deliberately decoupled from the control
/// task's timing.
///
/// Task functions can't be generic, so `flash` is wired directly to the simulated
/// board's concrete flash type, same as `control_task`'s DAQ/PWM arguments.
#[embassy_executor::task]
pub async fn housekeeping_task(system: &'static SharedSystem, mut watchdog: SimWatchdog, mut flash: SimFlash) {
    let mut ticker = Ticker::every(Duration::from_secs(1));
    let mut now: i64 = 0;

    loop {
        let due_for_write = {
            let mut sys = system.lock().await;
            let temp_c = sys.last_battery_temp_c;
            sys.housekeeping_tick(now, temp_c)
        };

        if due_for_write {
            let sys = system.lock().await;
            let mut payload = [0u8; 16];
            payload[0..4].copy_from_slice(&sys.status.day_counter.to_le_bytes());
            payload[4..8].copy_from_slice(&sys.status.fault_transition_count.to_le_bytes());
            payload[8..12].copy_from_slice(&sys.charger.num_full_charges.to_le_bytes());
            payload[12..16].copy_from_slice(&sys.charger.num_deep_discharges.to_le_bytes());
            drop(sys);

            let mut buf = [0u8; 24];
            match persistence::encode(&mut buf, PERSISTENCE_VERSION, &payload) {
                Ok(len) => {
                    if flash.write(0, &buf[..len]).is_err() {
                        error!("housekeeping task: persistence write failed");
                    }
                }
                Err(_) => error!("housekeeping task: failed to encode persisted counters"),
            }
        }

        watchdog.feed();

        now += 1;
        ticker.next().await;
    }
}
