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

//! Temperature acquisition: fixed-point filtering of raw ADC codes and
//! conversion to calibrated tenths of a degree.
//!
//! Each probe keeps an exponential moving average of its raw 10-bit
//! readings, `f = f - (f >> k) + raw`, whose steady state is `raw << k`.
//! The upper 5 bits of the accumulator select a segment of a 32-entry
//! calibration table and the next 6 bits interpolate inside it.

use log::debug;

use crate::config::{ConfigItem, ConfigStore, Eeprom};
use crate::hal::TemperatureSensor;

/// Filter strength `k`. Must stay within `1..=6` for the accumulator to
/// fit 16 bits and the interpolation fields to line up.
pub const FILTER_SHIFT: u32 = 2;

/// Width of a raw ADC reading.
pub const ADC_BITS: u32 = 10;

const ADC_MASK: u16 = (1 << ADC_BITS) - 1;

/// Accumulator start value: mid scale.
pub const FILTER_INIT: u16 = 0x7fff >> (6 - FILTER_SHIFT);

// Limits on the top 8 accumulator bits outside which the probe is
// considered shorted or open.
const FAULT_HIGH: u16 = 248;
const FAULT_LOW: u16 = 8;

const CELSIUS_TABLE: [i16; 32] = [
    0, -486, -355, -270, -205, -151, -104, -61, -21, 16, 51, 85, 119, 152, 184, 217, 250, 284,
    318, 354, 391, 431, 473, 519, 569, 624, 688, 763, 856, 977, 1154, 1482,
];

const FAHRENHEIT_TABLE: [i16; 32] = [
    0, -555, -319, -167, -49, 48, 134, 211, 282, 348, 412, 474, 534, 593, 652, 711, 770, 831,
    893, 957, 1025, 1096, 1172, 1253, 1343, 1444, 1559, 1694, 1860, 2078, 2397, 2987,
];

/// Display and regulation unit. Selects the calibration table and the
/// fixed-point scaling of the controller and autotuner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemperatureScale {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureScale {
    pub fn calibration_table(self) -> &'static [i16; 32] {
        match self {
            TemperatureScale::Celsius => &CELSIUS_TABLE,
            TemperatureScale::Fahrenheit => &FAHRENHEIT_TABLE,
        }
    }

    /// Right shift taking the PI accumulator back to output units.
    pub fn pi_postscale(self) -> u32 {
        match self {
            TemperatureScale::Celsius => 12,
            TemperatureScale::Fahrenheit => 13,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Primary,
    Secondary,
}

impl Probe {
    fn index(self) -> usize {
        match self {
            Probe::Primary => 0,
            Probe::Secondary => 1,
        }
    }
}

/// Piecewise-linear interpolation of a filter accumulator over `table`.
///
/// Equivalent to summing 64 terms, `64 - a` of the lower bracketing entry
/// and `a` of the upper one, plus 32 for rounding, then dividing by 64.
pub fn interpolate(table: &[i16; 32], filtered: u16) -> i16 {
    let a = ((filtered >> (FILTER_SHIFT - 1)) & 0x3f) as i32;
    let b = ((filtered >> (FILTER_SHIFT + 5)) & 0x1f) as usize;
    let lo = table[b] as i32;
    let hi = table[(b + 1).min(table.len() - 1)] as i32;
    ((32 + lo * (64 - a) + hi * a) >> 6) as i16
}

/// Exponential moving average of raw ADC codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdFilter(u16);

impl AdFilter {
    pub const fn new() -> Self {
        AdFilter(FILTER_INIT)
    }

    pub fn update(&mut self, raw: u16) {
        self.0 = self.0 - (self.0 >> FILTER_SHIFT) + raw.min(ADC_MASK);
    }

    pub fn value(self) -> u16 {
        self.0
    }

    /// True when the reading sits against either rail of the ADC span.
    pub fn is_saturated(self) -> bool {
        let top = self.0 >> (FILTER_SHIFT + ADC_BITS - 8);
        top >= FAULT_HIGH || top <= FAULT_LOW
    }
}

impl Default for AdFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Filter and calibrated temperature for both probes.
#[derive(Debug, Clone)]
pub struct TemperatureAcquisition {
    scale: TemperatureScale,
    filters: [AdFilter; 2],
    temperatures: [i16; 2],
}

impl TemperatureAcquisition {
    pub fn new(scale: TemperatureScale) -> Self {
        TemperatureAcquisition {
            scale,
            filters: [AdFilter::new(); 2],
            temperatures: [0; 2],
        }
    }

    /// Kick off the first conversion; [`sample`](Self::sample) expects one
    /// to be pending.
    pub fn begin<S: TemperatureSensor>(&mut self, sensor: &mut S) {
        sensor.start_conversion(Probe::Primary);
    }

    /// Fold the pending conversion into its probe's filter and start the
    /// other probe. Odd ticks complete probe 1, even ticks probe 2.
    pub fn sample<S: TemperatureSensor>(&mut self, sensor: &mut S, tick: u16) {
        let (done, next) = if tick & 1 == 1 {
            (Probe::Primary, Probe::Secondary)
        } else {
            (Probe::Secondary, Probe::Primary)
        };
        let raw = sensor.read_result();
        self.filters[done.index()].update(raw);
        sensor.start_conversion(next);
    }

    /// Convert both accumulators and apply the per-probe calibration offsets.
    pub fn convert<E: Eeprom>(&mut self, store: &ConfigStore<E>) {
        let table = self.scale.calibration_table();
        let corrections = [
            store.item_signed(ConfigItem::TemperatureCorrection),
            store.item_signed(ConfigItem::TemperatureCorrection2),
        ];
        for (index, filter) in self.filters.iter().enumerate() {
            self.temperatures[index] =
                interpolate(table, filter.value()).saturating_add(corrections[index]);
        }
        debug!(
            "temperatures {} / {} (filters {} / {})",
            self.temperatures[0],
            self.temperatures[1],
            self.filters[0].value(),
            self.filters[1].value()
        );
    }

    pub fn temperature(&self, probe: Probe) -> i16 {
        self.temperatures[probe.index()]
    }

    pub fn filter(&self, probe: Probe) -> AdFilter {
        self.filters[probe.index()]
    }

    /// Probe 1 out of range, or probe 2 out of range while it is enabled.
    pub fn sensor_fault(&self, second_probe_enabled: bool) -> bool {
        self.filters[0].is_saturated() || (second_probe_enabled && self.filters[1].is_saturated())
    }

    pub fn scale(&self) -> TemperatureScale {
        self.scale
    }
}
