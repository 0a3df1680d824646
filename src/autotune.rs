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

//! Relay-feedback autotuner (Åström-Hägglund) with Ziegler-Nichols gains.
//!
//! The tuner first waits for the process to settle at `output_start`, then
//! switches the output between `output_start - output_swing` and
//! `output_start + output_swing` every time the temperature crosses the
//! settled base temperature. Once two successive minima and two successive
//! maxima agree within the hysteresis, the oscillation amplitude and period
//! give the ultimate gain and period from which PI(D) gains are derived.

use log::{debug, info, warn};

use crate::config::{ConfigStore, Eeprom};
use crate::controller::{Gains, D_PRESCALE, I_PRESCALE, P_PRESCALE};
use crate::temperature::TemperatureScale;

/// Ticks between two settle samples.
const SETTLE_SAMPLE_TICKS: u16 = 32;
/// Settle samples taken before giving up.
const SETTLE_MAX_SAMPLES: u16 = 30;
/// Half cycles searched before giving up.
const MAX_PEAK_COUNT: u8 = 19;

/// Tuner phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutotuneState {
    Idle,
    Go,
    Settle,
    Init,
    FindMin,
    FindMax,
    Done,
    Fail,
}

/// Relay parameters, in duty units and tenths of a degree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutotuneParams {
    pub output_start: u8,
    pub output_swing: u8,
    pub hysteresis: i16,
}

impl Default for AutotuneParams {
    fn default() -> Self {
        AutotuneParams {
            output_start: 72,
            output_swing: 64,
            hysteresis: 2,
        }
    }
}

impl AutotuneParams {
    fn low(&self) -> u8 {
        self.output_start.saturating_sub(self.output_swing)
    }

    fn high(&self) -> u8 {
        self.output_start.saturating_add(self.output_swing)
    }
}

/// Identified oscillation and the gains derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutotuneResult {
    /// Distance between the last maximum and the preceding minimum.
    pub amplitude: u16,
    /// Ticks between the two most recent maxima.
    pub period: u16,
    pub gains: Gains,
}

/// Ziegler-Nichols relay-feedback gains for an oscillation of `amplitude`
/// tenths and `period` ticks under a relay of `swing` duty units.
///
/// The constants fold in the 4/π describing-function factor and the PI
/// post-scale, so the gains come out in the units the controller consumes.
/// Returns `None` when either measurement is zero.
pub fn ziegler_nichols(
    swing: u8,
    amplitude: u16,
    period: u16,
    scale: TemperatureScale,
) -> Option<Gains> {
    if amplitude == 0 || period == 0 {
        return None;
    }
    let unity = 1u64 << scale.pi_postscale();
    let zn_p = 200 * 8 * unity / 3142;
    let zn_i = 200 * 2000 * 8 * unity / 3_142_000;
    let zn_d = 200 * 333 * 8 * unity / 3_142_000;

    let swing = swing as u64;
    let amplitude = amplitude as u64;
    let period = period as u64;
    let saturate = |value: u64| value.min(u16::MAX as u64) as u16;

    Some(Gains {
        kp: saturate((zn_p * swing / amplitude) >> P_PRESCALE),
        ki: saturate((zn_i * swing / (amplitude * period)) >> I_PRESCALE),
        kd: saturate((zn_d * swing * period / amplitude) >> D_PRESCALE),
    })
}

/// Relay autotune state machine, updated once per control second.
#[derive(Debug, Clone)]
pub struct Autotuner {
    state: AutotuneState,
    params: AutotuneParams,
    ticks: u16,
    peaks: [i16; 4],
    peak_times: [u16; 2],
    peak_count: u8,
    base_temperature: i16,
    output: u8,
    result: Option<AutotuneResult>,
}

impl Default for Autotuner {
    fn default() -> Self {
        Self::new(AutotuneParams::default())
    }
}

impl Autotuner {
    pub fn new(params: AutotuneParams) -> Self {
        Autotuner {
            state: AutotuneState::Idle,
            params,
            ticks: 0,
            peaks: [0; 4],
            peak_times: [0; 2],
            peak_count: 0,
            base_temperature: 0,
            output: 0,
            result: None,
        }
    }

    /// Arm a new run. Takes effect on the next update.
    pub fn start(&mut self) {
        info!("autotune started with {:?}", self.params);
        self.result = None;
        self.peak_count = 0;
        self.transition(AutotuneState::Go);
    }

    /// Stop immediately and release the output.
    pub fn abort(&mut self) {
        if self.state != AutotuneState::Idle {
            info!("autotune aborted in {:?}", self.state);
        }
        self.output = 0;
        self.state = AutotuneState::Idle;
    }

    /// Leave `Done` once the result has been read. Returns whether a
    /// finished run was acknowledged.
    pub fn acknowledge(&mut self) -> bool {
        if self.state == AutotuneState::Done {
            self.transition(AutotuneState::Idle);
            true
        } else {
            false
        }
    }

    /// True while the tuner owns the output, `Done` included.
    pub fn is_active(&self) -> bool {
        self.state != AutotuneState::Idle
    }

    /// Advance one tick with the latest temperature. Gains are written to
    /// `store` when the oscillation converges. Returns the duty to apply.
    pub fn update<E: Eeprom>(
        &mut self,
        temperature: i16,
        store: &mut ConfigStore<E>,
        scale: TemperatureScale,
    ) -> u8 {
        self.ticks = self.ticks.wrapping_add(1);
        let hysteresis = self.params.hysteresis;

        match self.state {
            AutotuneState::Idle => self.output = 0,
            AutotuneState::Go => {
                self.output = self.params.output_start;
                self.ticks = 0;
                self.transition(AutotuneState::Settle);
            }
            AutotuneState::Settle => self.settle(temperature),
            AutotuneState::Init => {
                if temperature < self.base_temperature.saturating_sub(hysteresis) {
                    self.output = self.params.high();
                    self.peak_count = 0;
                    self.peaks[0] = temperature;
                    self.ticks = 0;
                    self.transition(AutotuneState::FindMin);
                }
            }
            AutotuneState::FindMin => {
                let slot = self.slot();
                if temperature < self.peaks[slot] {
                    self.peaks[slot] = temperature;
                }
                if temperature > self.base_temperature.saturating_add(hysteresis) {
                    debug!("autotune minimum {} at peak {}", self.peaks[slot], self.peak_count);
                    self.peak_count += 1;
                    self.peaks[self.slot()] = temperature;
                    self.peak_times[self.time_slot()] = self.ticks;
                    self.output = self.params.low();
                    self.transition(AutotuneState::FindMax);
                }
            }
            AutotuneState::FindMax => self.find_max(temperature, store, scale),
            AutotuneState::Done => self.output = 0,
            AutotuneState::Fail => {
                self.output = 0;
                self.transition(AutotuneState::Idle);
            }
        }
        self.output
    }

    fn settle(&mut self, temperature: i16) {
        self.output = self.params.output_start;
        if self.ticks % SETTLE_SAMPLE_TICKS != 0 {
            return;
        }
        let sample = self.ticks / SETTLE_SAMPLE_TICKS;
        self.peaks[(sample & 0x3) as usize] = temperature;

        // Needs four samples from this run, not leftovers of a previous one.
        if sample >= 4 && self.spread() <= self.params.hysteresis {
            let sum: i32 = self.peaks.iter().map(|&peak| peak as i32).sum();
            self.base_temperature = (sum >> 2) as i16;
            self.output = self.params.low();
            info!("autotune settled at {}", self.base_temperature);
            self.transition(AutotuneState::Init);
        } else if sample >= SETTLE_MAX_SAMPLES {
            warn!("autotune did not settle within {} samples", SETTLE_MAX_SAMPLES);
            self.fail();
        }
    }

    fn find_max<E: Eeprom>(
        &mut self,
        temperature: i16,
        store: &mut ConfigStore<E>,
        scale: TemperatureScale,
    ) {
        let slot = self.slot();
        if temperature > self.peaks[slot] {
            self.peaks[slot] = temperature;
            self.peak_times[self.time_slot()] = self.ticks;
        }
        if temperature >= self.base_temperature.saturating_sub(self.params.hysteresis) {
            return;
        }
        debug!("autotune maximum {} at peak {}", self.peaks[slot], self.peak_count);

        if self.peak_count >= 3 {
            let minima = distance(self.peaks[2], self.peaks[0]);
            let maxima = distance(self.peaks[3], self.peaks[1]);
            let hysteresis = self.params.hysteresis.max(0) as u16;
            if minima <= hysteresis && maxima <= hysteresis {
                let previous = (self.peak_count.wrapping_sub(1) & 0x3) as usize;
                let amplitude = distance(self.peaks[slot], self.peaks[previous]);
                let period = self.peak_times[1].abs_diff(self.peak_times[0]);
                self.finish(amplitude, period, store, scale);
                return;
            } else if self.peak_count >= MAX_PEAK_COUNT {
                warn!("autotune did not converge after {} half cycles", self.peak_count);
                self.fail();
                return;
            }
        }

        self.peak_count += 1;
        self.peaks[self.slot()] = temperature;
        self.output = self.params.high();
        self.transition(AutotuneState::FindMin);
    }

    fn finish<E: Eeprom>(
        &mut self,
        amplitude: u16,
        period: u16,
        store: &mut ConfigStore<E>,
        scale: TemperatureScale,
    ) {
        match ziegler_nichols(self.params.output_swing, amplitude, period, scale) {
            Some(gains) => {
                gains.store(store);
                info!(
                    "autotune done: amplitude {} period {} -> Kp {} Ki {} Kd {}",
                    amplitude, period, gains.kp, gains.ki, gains.kd
                );
                self.result = Some(AutotuneResult {
                    amplitude,
                    period,
                    gains,
                });
                self.output = 0;
                self.transition(AutotuneState::Done);
            }
            None => {
                warn!(
                    "autotune measured a degenerate oscillation (amplitude {}, period {})",
                    amplitude, period
                );
                self.fail();
            }
        }
    }

    fn fail(&mut self) {
        self.output = 0;
        self.transition(AutotuneState::Fail);
    }

    fn transition(&mut self, next: AutotuneState) {
        debug!("autotune {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn slot(&self) -> usize {
        (self.peak_count & 0x3) as usize
    }

    fn time_slot(&self) -> usize {
        ((self.peak_count >> 1) & 0x1) as usize
    }

    fn spread(&self) -> i16 {
        let max = self.peaks.iter().copied().max().unwrap_or(0);
        let min = self.peaks.iter().copied().min().unwrap_or(0);
        max.saturating_sub(min)
    }

    pub fn state(&self) -> AutotuneState {
        self.state
    }

    pub fn output(&self) -> u8 {
        self.output
    }

    pub fn result(&self) -> Option<AutotuneResult> {
        self.result
    }

    pub fn base_temperature(&self) -> i16 {
        self.base_temperature
    }

    pub fn peak_times(&self) -> [u16; 2] {
        self.peak_times
    }

    pub fn peak_count(&self) -> u8 {
        self.peak_count
    }

    pub fn params(&self) -> AutotuneParams {
        self.params
    }

    /// Replace the relay parameters. Ignored while a run is in progress.
    pub fn set_params(&mut self, params: AutotuneParams) -> bool {
        if self.is_active() {
            return false;
        }
        self.params = params;
        true
    }
}

fn distance(a: i16, b: i16) -> u16 {
    (a as i32 - b as i32).unsigned_abs().min(u16::MAX as u32) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigItem, MemoryEeprom};
    use std::collections::VecDeque;

    const CELSIUS: TemperatureScale = TemperatureScale::Celsius;

    fn defaults() -> ConfigStore<MemoryEeprom> {
        let mut store = ConfigStore::new(MemoryEeprom::new());
        store.restore_defaults(CELSIUS);
        store
    }

    /// Integrating plant behind a dead time: the temperature ramps up or
    /// down by `rate` per tick depending on which side of the start level
    /// the delayed relay output is.
    struct RelayPlant {
        temperature: i16,
        delay_line: VecDeque<u8>,
        start: u8,
    }

    impl RelayPlant {
        fn new(temperature: i16, delay: usize, start: u8) -> Self {
            RelayPlant {
                temperature,
                delay_line: std::iter::repeat(start).take(delay).collect(),
                start,
            }
        }

        fn apply(&mut self, output: u8, rate: i16) {
            self.delay_line.push_back(output);
            let delayed = self.delay_line.pop_front().unwrap();
            if delayed > self.start {
                self.temperature += rate;
            } else if delayed < self.start {
                self.temperature -= rate;
            }
        }
    }

    #[test]
    fn test_zn_constants() {
        let gains = ziegler_nichols(64, 20, 20, CELSIUS).unwrap();
        assert_eq!(gains, Gains::new(417, 667, 43));
        assert_eq!(ziegler_nichols(64, 0, 20, CELSIUS), None);
        assert_eq!(ziegler_nichols(64, 20, 0, CELSIUS), None);
        // One more bit of post-scale doubles every gain.
        assert_eq!(
            ziegler_nichols(64, 20, 20, TemperatureScale::Fahrenheit),
            Some(Gains::new(834, 1334, 86))
        );
    }

    #[test]
    fn test_autotuning_converges_on_relay_plant() {
        let mut store = defaults();
        let mut tuner = Autotuner::default();
        let mut plant = RelayPlant::new(500, 3, 72);
        tuner.start();

        let mut done_at = None;
        for tick in 0..5000 {
            let output = tuner.update(plant.temperature, &mut store, CELSIUS);
            if tuner.state() == AutotuneState::Done {
                done_at = Some(tick);
                break;
            }
            plant.apply(output, 2);
        }

        assert_eq!(done_at, Some(173));
        assert_eq!(tuner.base_temperature(), 500);
        let result = tuner.result().unwrap();
        assert_eq!(result.amplitude, 20);
        assert_eq!(result.period, 20);
        // Floating point Ziegler-Nichols gives Kp 417.2, Ki 667.5.
        assert_eq!(result.gains, Gains::new(417, 667, 43));
        assert_eq!(Gains::load(&store), result.gains);
        assert_eq!(store.item(ConfigItem::Kp), 417);

        // Done holds the output off until acknowledged.
        assert_eq!(tuner.output(), 0);
        assert_eq!(tuner.update(500, &mut store, CELSIUS), 0);
        assert!(tuner.is_active());
        assert!(tuner.acknowledge());
        assert!(!tuner.is_active());
        assert_eq!(tuner.result(), Some(result));
    }

    #[test]
    fn test_relay_levels_follow_crossings() {
        let mut store = defaults();
        let mut tuner = Autotuner::default();
        let mut plant = RelayPlant::new(500, 3, 72);
        tuner.start();

        let mut levels = Vec::new();
        for _ in 0..173 {
            let output = tuner.update(plant.temperature, &mut store, CELSIUS);
            if levels.last() != Some(&output) {
                levels.push(output);
            }
            plant.apply(output, 2);
        }
        assert_eq!(&levels[..4], &[72, 8, 136, 8]);
        assert!(levels.iter().all(|&level| [72, 8, 136].contains(&level)));
    }

    #[test]
    fn test_growing_oscillation_fails() {
        let mut store = defaults();
        Gains::new(128, 8, 8).store(&mut store);
        let mut tuner = Autotuner::default();
        let mut plant = RelayPlant::new(500, 3, 72);
        tuner.start();

        let mut flips = 0;
        let mut previous: Option<u8> = None;
        let mut failed_at = None;
        for tick in 0..20_000 {
            let output = tuner.update(plant.temperature, &mut store, CELSIUS);
            if tuner.state() == AutotuneState::Fail {
                failed_at = Some(tick);
                break;
            }
            assert_ne!(tuner.state(), AutotuneState::Done);
            if let Some(previous) = previous {
                if output != previous && previous != 72 {
                    flips += 1;
                }
            }
            previous = Some(output);
            plant.apply(output, 2 + flips);
        }

        assert_eq!(failed_at, Some(294));
        assert_eq!(tuner.peak_count(), 19);
        assert_eq!(tuner.output(), 0);
        assert_eq!(Gains::load(&store), Gains::new(128, 8, 8));

        tuner.update(500, &mut store, CELSIUS);
        assert_eq!(tuner.state(), AutotuneState::Idle);
    }

    #[test]
    fn test_noisy_settle_fails_after_thirty_samples() {
        let mut store = defaults();
        let mut tuner = Autotuner::default();
        tuner.start();

        let mut failed_at = None;
        for tick in 0..2000u32 {
            let temperature = if (tick / 32) % 2 == 0 { 500 } else { 540 };
            tuner.update(temperature, &mut store, CELSIUS);
            if tuner.state() == AutotuneState::Fail {
                failed_at = Some(tick);
                break;
            }
            assert_eq!(tuner.output(), 72);
        }
        assert_eq!(failed_at, Some(960));

        assert_eq!(tuner.update(500, &mut store, CELSIUS), 0);
        assert_eq!(tuner.state(), AutotuneState::Idle);
        assert!(tuner.result().is_none());
    }

    #[test]
    fn test_abort_releases_output() {
        let mut store = defaults();
        let mut tuner = Autotuner::default();
        tuner.start();
        assert_eq!(tuner.update(500, &mut store, CELSIUS), 72);
        assert!(!tuner.set_params(AutotuneParams::default()));

        tuner.abort();
        assert_eq!(tuner.state(), AutotuneState::Idle);
        assert_eq!(tuner.update(500, &mut store, CELSIUS), 0);
        assert!(!tuner.acknowledge());
    }
}
