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

//! Control core of a dual-stage (heat/cool) thermostat.
//!
//! The crate samples two thermistor probes through a fixed-point filter,
//! regulates a time-proportioned output with a PI controller, runs
//! multi-step temperature profiles and can identify its own gains with a
//! relay-feedback autotuner. All persistent state lives in an
//! address-mapped EEPROM image behind [`ConfigStore`].
//!
//! Hardware is reached through the traits in [`hal`]; [`simulation`]
//! provides host-side stand-ins.

pub mod autotune;
pub mod config;
pub mod controller;
pub mod hal;
pub mod profile;
pub mod simulation;
pub mod storage;
pub mod temperature;
pub mod thermostat;

/// Number of stored temperature profiles.
pub const NO_OF_PROFILES: u8 = 5;

pub use autotune::{AutotuneParams, AutotuneResult, AutotuneState, Autotuner};
pub use config::{Address, ConfigError, ConfigItem, ConfigStore, Eeprom, MemoryEeprom, RunMode};
pub use controller::{Gains, PiController};
pub use hal::{Display, DutyCycleDriver, LoopWatchdog, OutputPeriod, TemperatureSensor, Watchdog};
pub use profile::{ProfileEvent, ProfileSequencer};
pub use storage::{FileEeprom, StorageError};
pub use temperature::{Probe, TemperatureAcquisition, TemperatureScale};
pub use thermostat::{ControlReport, OutputCell, Thermostat};
