// MIT License
//
// Copyright (c) 2025 Ronan LE MEILLAT for SCTG Development
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Runs the full thermostat loop against a simulated heater: autotune the
//! gains, then follow a two-step profile with them.

use std::time::Duration;

use core::convert::Infallible;
use embedded_hal::digital::{ErrorType, OutputPin};
use env_logger::Env;
use log::{info, warn};

use stc_thermostat::hal::Display;
use stc_thermostat::profile::ProfileEvent;
use stc_thermostat::simulation::{SimulatedSensor, ThermalSystem};
use stc_thermostat::{
    AutotuneParams, AutotuneState, ConfigItem, ControlReport, DutyCycleDriver, MemoryEeprom,
    Probe, TemperatureScale, Thermostat,
};

const SCALE: TemperatureScale = TemperatureScale::Celsius;
const MID_TICK: Duration = Duration::from_millis(60);
const AUTOTUNE_LIMIT_SECONDS: u32 = 3600;
const PROFILE_LIMIT_SECONDS: u32 = 1800;
const PROFILE: u8 = 0;
// (setpoint in tenths, duration in profile minutes)
const PROFILE_STEPS: [(i16, u16); 2] = [(520, 3), (550, 3)];
const SETTLE_AFTER_PROFILE_SECONDS: u32 = 300;

/// Relay driven by the duty-cycle driver.
#[derive(Default)]
struct SimulatedRelay {
    energized: bool,
}

impl ErrorType for SimulatedRelay {
    type Error = Infallible;
}

impl OutputPin for SimulatedRelay {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.energized = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.energized = true;
        Ok(())
    }
}

/// Keeps what a seven-segment display would show.
#[derive(Default)]
struct ConsoleDisplay {
    text: String,
}

impl Display for ConsoleDisplay {
    fn render(&mut self, value: i16, decimal: bool) {
        self.text = if decimal {
            format!("{:.1}", value as f32 / 10.0)
        } else {
            value.to_string()
        };
    }

    fn render_alarm(&mut self) {
        self.text = "AL".to_string();
    }

    fn render_off(&mut self) {
        self.text = "OFF".to_string();
    }
}

struct Bench {
    thermostat: Thermostat<MemoryEeprom>,
    plant: ThermalSystem,
    sensor: SimulatedSensor,
    relay: SimulatedRelay,
    driver: DutyCycleDriver,
    display: ConsoleDisplay,
    carry: Duration,
    seconds: u32,
}

impl Bench {
    /// Advance mid ticks until the next control second, driving the relay
    /// and the plant at the fast tick rate in between.
    fn next_second(&mut self) -> ControlReport {
        let fast_tick = self.thermostat.output_period().fast_tick();
        let cell = self.thermostat.output_cell();
        loop {
            let report = self.thermostat.tick(&mut self.sensor, &mut self.display);

            self.carry += MID_TICK;
            while self.carry >= fast_tick {
                self.carry -= fast_tick;
                let powered = self.thermostat.powered();
                let on = self
                    .driver
                    .tick(cell.load(), powered, &mut self.relay)
                    .unwrap_or(false);
                self.plant
                    .update(if on { 1.0 } else { 0.0 }, fast_tick.as_secs_f32());
            }
            self.sensor
                .set_temperature(Probe::Primary, self.plant.tenths());

            if let Some(report) = report {
                self.seconds += 1;
                return report;
            }
        }
    }

    fn print_row(&self, report: &ControlReport) {
        println!(
            "{:7} | {:15.2} | {:7} | {:6} | {:>7} | {:?}",
            self.seconds,
            self.plant.get_temperature(),
            self.display.text,
            report.setpoint,
            report.output,
            report.autotune
        );
    }
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let mut thermostat = Thermostat::new(MemoryEeprom::new(), SCALE);
    thermostat.store_mut().restore_defaults(SCALE);
    // Shortest output window: about 2 seconds.
    if let Err(err) = thermostat.configure(ConfigItem::OutputPeriod, 0) {
        warn!("keeping default output period: {}", err);
    }

    // Starting at 50°C, ambient 22°C, 300J/°C heat capacity,
    // 10W resistor, heat loss coefficient 0.1 W/°C
    let plant = ThermalSystem::new(50.0, 22.0, 300.0, 10.0, 0.1);
    let mut sensor = SimulatedSensor::new(SCALE, plant.tenths(), plant.tenths());
    thermostat.begin(&mut sensor);

    let mut bench = Bench {
        thermostat,
        plant,
        sensor,
        relay: SimulatedRelay::default(),
        driver: DutyCycleDriver::new(),
        display: ConsoleDisplay::default(),
        carry: Duration::ZERO,
        seconds: 0,
    };

    // First, run autotuning process
    println!("Starting autotuning process");
    println!("Time(s) | Temperature(°C) | Display | SP     | Output  | Autotune");
    println!("--------|-----------------|---------|--------|---------|---------");

    bench.thermostat.start_autotune(AutotuneParams::default());
    while bench.seconds < AUTOTUNE_LIMIT_SECONDS {
        let report = bench.next_second();
        if bench.seconds % 10 == 0 {
            bench.print_row(&report);
        }
        if matches!(report.autotune, AutotuneState::Done | AutotuneState::Idle) {
            break;
        }
    }

    match bench.thermostat.autotuner().result() {
        Some(result) => {
            println!("\nAutotuning complete!");
            println!("Oscillation amplitude: {} tenths", result.amplitude);
            println!("Oscillation period: {}s", result.period);
            println!("Kp = {}", result.gains.kp);
            println!("Ki = {}", result.gains.ki);
            println!("Kd = {}", result.gains.kd);
            bench.thermostat.acknowledge_autotune();
        }
        None => {
            println!("\nAutotuning failed, using default parameters");
            bench.thermostat.abort_autotune();
        }
    }

    // Program and run the profile with the tuned gains
    let store = bench.thermostat.store_mut();
    for (step, &(setpoint, duration)) in PROFILE_STEPS.iter().enumerate() {
        let step = step as u8;
        if let Err(err) = store
            .set_profile_setpoint(PROFILE, step, setpoint)
            .and_then(|_| store.set_profile_duration(PROFILE, step, duration))
        {
            warn!("cannot program profile step {}: {}", step, err);
        }
    }
    if let Some(&(last, _)) = PROFILE_STEPS.last() {
        let step = PROFILE_STEPS.len() as u8;
        if let Err(err) = store
            .set_profile_setpoint(PROFILE, step, last)
            .and_then(|_| store.set_profile_duration(PROFILE, step, 0))
        {
            warn!("cannot program final setpoint: {}", err);
        }
    }
    if let Err(err) = bench.thermostat.start_profile(PROFILE) {
        warn!("profile {} not started: {}", PROFILE, err);
        return;
    }

    println!("\nStarting profile {} with tuned parameters:", PROFILE);
    println!("Time(s) | Temperature(°C) | Display | SP     | Output  | Autotune");
    println!("--------|-----------------|---------|--------|---------|---------");

    let limit = bench.seconds + PROFILE_LIMIT_SECONDS;
    let mut finished_at = None;
    while bench.seconds < limit {
        let report = bench.next_second();
        if bench.seconds % 30 == 0 || report.profile_event.is_some() {
            bench.print_row(&report);
        }
        if let Some(ProfileEvent::Finished { setpoint, .. }) = report.profile_event {
            info!("profile done, holding {}", setpoint);
            finished_at = Some(bench.seconds);
        }
        if let Some(finished) = finished_at {
            if bench.seconds >= finished + SETTLE_AFTER_PROFILE_SECONDS {
                break;
            }
        }
    }

    println!("\nSimulation complete!");
}
