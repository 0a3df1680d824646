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

//! The control loop tying acquisition, regulation, profiles and autotuning
//! to one mid tick.
//!
//! [`Thermostat::tick`] is called every mid tick (about 60 ms). Sensors are
//! sampled on every call; every 16th call runs the one-second control
//! section, which converts temperatures, checks the sensor alarm and
//! computes the new duty. The duty is published through an [`OutputCell`]
//! for the fast-tick [`DutyCycleDriver`](crate::hal::DutyCycleDriver).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use log::{info, warn};

use crate::autotune::{AutotuneParams, AutotuneState, Autotuner};
use crate::config::{ConfigError, ConfigItem, ConfigStore, Eeprom};
use crate::controller::PiController;
use crate::hal::{Display, OutputPeriod, TemperatureSensor};
use crate::profile::{start_profile, ProfileEvent, ProfileSequencer};
use crate::temperature::{Probe, TemperatureAcquisition, TemperatureScale};

/// Mid ticks per control second.
pub const MID_TICKS_PER_SECOND: u16 = 16;

/// Duty shared between the control loop (writer) and the duty-cycle
/// driver (reader).
#[derive(Debug, Default)]
pub struct OutputCell(AtomicU8);

impl OutputCell {
    pub fn new(duty: u8) -> Self {
        OutputCell(AtomicU8::new(duty))
    }

    pub fn load(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn store(&self, duty: u8) {
        self.0.store(duty, Ordering::Relaxed)
    }
}

/// Snapshot of one control second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlReport {
    pub temperature: i16,
    pub temperature2: i16,
    pub setpoint: i16,
    pub output: u8,
    pub alarm: bool,
    pub autotune: AutotuneState,
    pub profile_event: Option<ProfileEvent>,
}

pub struct Thermostat<E> {
    store: ConfigStore<E>,
    scale: TemperatureScale,
    acquisition: TemperatureAcquisition,
    controller: PiController,
    sequencer: ProfileSequencer,
    autotuner: Autotuner,
    output: Arc<OutputCell>,
    mid_ticks: u16,
    alarm: bool,
    display_probe: Probe,
}

impl<E: Eeprom> Thermostat<E> {
    pub fn new(eeprom: E, scale: TemperatureScale) -> Self {
        Thermostat {
            store: ConfigStore::new(eeprom),
            scale,
            acquisition: TemperatureAcquisition::new(scale),
            controller: PiController::new(),
            sequencer: ProfileSequencer::new(),
            autotuner: Autotuner::default(),
            output: Arc::new(OutputCell::default()),
            mid_ticks: 0,
            alarm: false,
            display_probe: Probe::Primary,
        }
    }

    /// Start the first conversion. Call once before the first tick.
    pub fn begin<S: TemperatureSensor>(&mut self, sensor: &mut S) {
        self.acquisition.begin(sensor);
        info!(
            "thermostat running in {:?}, mode {:?}, power {}",
            self.scale,
            self.store.run_mode(),
            if self.store.powered() { "on" } else { "off" }
        );
    }

    /// One mid tick. Returns a report when the control section ran.
    pub fn tick<S: TemperatureSensor, D: Display>(
        &mut self,
        sensor: &mut S,
        display: &mut D,
    ) -> Option<ControlReport> {
        self.mid_ticks = self.mid_ticks.wrapping_add(1);
        self.acquisition.sample(sensor, self.mid_ticks);
        if self.mid_ticks % MID_TICKS_PER_SECOND != 0 {
            return None;
        }
        Some(self.control_second(display))
    }

    fn control_second<D: Display>(&mut self, display: &mut D) -> ControlReport {
        self.acquisition.convert(&self.store);
        let temperature = self.acquisition.temperature(Probe::Primary);

        let fault = self
            .acquisition
            .sensor_fault(self.store.item(ConfigItem::SecondProbe) != 0);
        if fault != self.alarm {
            if fault {
                warn!("sensor alarm, output disabled");
            } else {
                info!("sensor alarm cleared");
            }
            self.alarm = fault;
        }

        let mut profile_event = None;
        let output = if fault {
            display.render_alarm();
            0
        } else {
            let output = if self.autotuner.is_active() {
                self.autotuner.update(temperature, &mut self.store, self.scale)
            } else {
                profile_event = self
                    .sequencer
                    .on_second(MID_TICKS_PER_SECOND, &mut self.store);
                self.controller.update(temperature, &self.store, self.scale)
            };
            if self.store.powered() {
                display.render(self.acquisition.temperature(self.display_probe), true);
            } else {
                display.render_off();
            }
            output
        };
        self.output.store(output);

        ControlReport {
            temperature,
            temperature2: self.acquisition.temperature(Probe::Secondary),
            setpoint: self.store.item_signed(ConfigItem::Setpoint),
            output,
            alarm: fault,
            autotune: self.autotuner.state(),
            profile_event,
        }
    }

    /// Set a named item after checking its range.
    pub fn configure(&mut self, item: ConfigItem, value: i16) -> Result<(), ConfigError> {
        self.store.set_checked(item, value, self.scale)
    }

    pub fn start_profile(&mut self, profile: u8) -> Result<(), ConfigError> {
        start_profile(&mut self.store, profile)
    }

    /// Hand the output to the autotuner. Returns `false` when a run is
    /// already in progress.
    pub fn start_autotune(&mut self, params: AutotuneParams) -> bool {
        if !self.autotuner.set_params(params) {
            return false;
        }
        self.controller.reset();
        self.autotuner.start();
        true
    }

    pub fn abort_autotune(&mut self) {
        self.autotuner.abort();
    }

    /// Release a finished autotune so regulation resumes with the new gains.
    pub fn acknowledge_autotune(&mut self) -> bool {
        self.autotuner.acknowledge()
    }

    pub fn set_power(&mut self, on: bool) {
        self.store.set_item(ConfigItem::PowerOn, on as u16);
        info!("power {}", if on { "on" } else { "off" });
    }

    pub fn powered(&self) -> bool {
        self.store.powered()
    }

    pub fn select_display_probe(&mut self, probe: Probe) {
        self.display_probe = probe;
    }

    pub fn output_period(&self) -> OutputPeriod {
        OutputPeriod::from_selector(self.store.item(ConfigItem::OutputPeriod))
    }

    /// Handle for the fast-tick side.
    pub fn output_cell(&self) -> Arc<OutputCell> {
        Arc::clone(&self.output)
    }

    pub fn output(&self) -> u8 {
        self.output.load()
    }

    pub fn alarm(&self) -> bool {
        self.alarm
    }

    pub fn temperature(&self, probe: Probe) -> i16 {
        self.acquisition.temperature(probe)
    }

    pub fn autotuner(&self) -> &Autotuner {
        &self.autotuner
    }

    pub fn controller(&self) -> &PiController {
        &self.controller
    }

    pub fn scale(&self) -> TemperatureScale {
        self.scale
    }

    pub fn store(&self) -> &ConfigStore<E> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ConfigStore<E> {
        &mut self.store
    }
}
