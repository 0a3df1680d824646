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

//! Thermostat on a Raspberry Pi: two NTC probes on an ADS1115, the heater
//! relay on a GPIO pin and the configuration EEPROM image in a file.

use ads1x1x::{channel, Ads1x1x, FullScaleRange, TargetAddr};
use core::convert::Infallible;
use embedded_hal::digital::{ErrorType, OutputPin};
use env_logger::Env;
use linux_embedded_hal::I2cdev;
use log::{debug, error, info};
use nb::block;
use rppal::gpio::Gpio;
use std::error::Error;
use std::process;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use stc_thermostat::hal::{Display, LoopWatchdog, TemperatureSensor, Watchdog};
use stc_thermostat::{
    AutotuneParams, DutyCycleDriver, FileEeprom, OutputPeriod, Probe, TemperatureScale,
    Thermostat,
};

const I2C_BUS: &str = "/dev/i2c-1";
const RELAY_GPIO: u8 = 17;
const EEPROM_FILE: &str = "stc-eeprom.bin";
const SCALE: TemperatureScale = TemperatureScale::Celsius;

const MID_TICK: Duration = Duration::from_millis(60);
const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(2);

// NTC from the 3.3 V supply to the input, series resistor to ground, so the
// code rises with temperature. 3.3 V reads 26400 at the ±4.096 V range.
const SUPPLY_CODE: i32 = 26_400;
const MAX_CODE: u16 = 1023;

type Adc = Ads1x1x<
    I2cdev,
    ads1x1x::ic::Ads1115,
    ads1x1x::ic::Resolution16Bit,
    ads1x1x::mode::OneShot,
>;

/// Both probes on one ADS1115, probe 1 on A0 and probe 2 on A1.
struct AdsProbes {
    adc: Adc,
    selected: Probe,
}

impl AdsProbes {
    fn new(bus: &str) -> Result<Self, Box<dyn Error>> {
        let mut adc = Ads1x1x::new_ads1115(I2cdev::new(bus)?, TargetAddr::default());
        adc.set_full_scale_range(FullScaleRange::Within4_096V)
            .map_err(|err| format!("ADS1115 setup failed: {:?}", err))?;
        Ok(AdsProbes {
            adc,
            selected: Probe::Primary,
        })
    }

    fn to_code(raw: i16) -> u16 {
        let scaled = raw.max(0) as i32 * MAX_CODE as i32 / SUPPLY_CODE;
        scaled.min(MAX_CODE as i32) as u16
    }
}

impl TemperatureSensor for AdsProbes {
    fn start_conversion(&mut self, probe: Probe) {
        // The ADS1115 converts on read, selecting the channel is enough.
        self.selected = probe;
    }

    fn read_result(&mut self) -> u16 {
        let reading = match self.selected {
            Probe::Primary => block!(self.adc.read(channel::SingleA0)),
            Probe::Secondary => block!(self.adc.read(channel::SingleA1)),
        };
        match reading {
            Ok(raw) => Self::to_code(raw),
            Err(err) => {
                // Full scale trips the sensor alarm.
                error!("{:?} read failed: {:?}", self.selected, err);
                MAX_CODE
            }
        }
    }
}

/// Heater relay on a GPIO pin.
struct Relay(rppal::gpio::OutputPin);

impl ErrorType for Relay {
    type Error = Infallible;
}

impl OutputPin for Relay {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.set_low();
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.set_high();
        Ok(())
    }
}

/// Reports what a seven-segment display would show whenever it changes.
#[derive(Default)]
struct LogDisplay {
    text: String,
}

impl LogDisplay {
    fn show(&mut self, text: String) {
        if text != self.text {
            debug!("display: {}", text);
            self.text = text;
        }
    }
}

impl Display for LogDisplay {
    fn render(&mut self, value: i16, decimal: bool) {
        if decimal {
            self.show(format!("{:.1}", value as f32 / 10.0));
        } else {
            self.show(value.to_string());
        }
    }

    fn render_alarm(&mut self) {
        self.show("AL".to_string());
    }

    fn render_off(&mut self) {
        self.show("OFF".to_string());
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let autotune = std::env::args().any(|arg| arg == "--autotune");

    println!("Raspberry Pi STC thermostat");

    // A damaged image stops startup instead of being replaced by defaults.
    let (eeprom, fresh) = FileEeprom::open(EEPROM_FILE)?;
    let mut thermostat = Thermostat::new(eeprom, SCALE);
    if fresh {
        thermostat.store_mut().restore_defaults(SCALE);
    }

    let mut probes = AdsProbes::new(I2C_BUS)?;
    let mut relay = Relay(Gpio::new()?.get(RELAY_GPIO)?.into_output_low());
    let mut display = LogDisplay::default();

    // Fast tick side: time-proportion the relay from the shared duty and
    // supervise the control loop.
    let duty = thermostat.output_cell();
    let powered = Arc::new(AtomicBool::new(thermostat.powered()));
    let period = Arc::new(AtomicU8::new(thermostat.output_period().selector()));
    let watchdog = Arc::new(LoopWatchdog::new(WATCHDOG_TIMEOUT));
    {
        let powered = Arc::clone(&powered);
        let period = Arc::clone(&period);
        let watchdog = Arc::clone(&watchdog);
        thread::spawn(move || {
            let mut driver = DutyCycleDriver::new();
            let mut fast_tick = OutputPeriod::from_selector(period.load(Ordering::Relaxed) as u16)
                .fast_tick();
            let mut next = Instant::now();
            loop {
                if watchdog.expired() {
                    let _ = driver.shut_down(&mut relay);
                    error!(
                        "control loop stalled for more than {:?}, relay released",
                        watchdog.timeout()
                    );
                    process::exit(1);
                }
                let _ = driver.tick(duty.load(), powered.load(Ordering::Relaxed), &mut relay);
                if driver.at_window_start() {
                    fast_tick = OutputPeriod::from_selector(period.load(Ordering::Relaxed) as u16)
                        .fast_tick();
                }
                next += fast_tick;
                thread::sleep(next.saturating_duration_since(Instant::now()));
            }
        });
    }

    thermostat.begin(&mut probes);
    if autotune {
        thermostat.start_autotune(AutotuneParams::default());
    }

    println!("Time(s) | Temperature(°C) | Display | SP     | Output | Autotune");
    println!("--------|-----------------|---------|--------|--------|---------");

    let start_time = Instant::now();
    let mut next_tick = Instant::now();
    loop {
        if let Some(report) = thermostat.tick(&mut probes, &mut display) {
            powered.store(thermostat.powered(), Ordering::Relaxed);
            period.store(thermostat.output_period().selector(), Ordering::Relaxed);
            println!(
                "{:7.1} | {:15.1} | {:7} | {:6} | {:6} | {:?}",
                start_time.elapsed().as_secs_f32(),
                report.temperature as f32 / 10.0,
                display.text,
                report.setpoint,
                report.output,
                report.autotune
            );
            if let Some(result) = thermostat.autotuner().result() {
                if thermostat.acknowledge_autotune() {
                    info!(
                        "autotune stored Kp {} Ki {} Kd {}",
                        result.gains.kp, result.gains.ki, result.gains.kd
                    );
                }
            }
        }

        watchdog.acknowledge();
        next_tick += MID_TICK;
        thread::sleep(next_tick.saturating_duration_since(Instant::now()));
    }
}
