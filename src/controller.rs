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

//! Fixed-point PI regulation with back-calculation anti-windup.

use crate::config::{ConfigItem, ConfigStore, Eeprom, RunMode};
use crate::temperature::TemperatureScale;

/// Left shift applied to the proportional term.
pub const P_PRESCALE: u32 = 4;
/// Left shift applied to the integral increment.
pub const I_PRESCALE: u32 = 0;
/// Right shift applied to the derivative gain computed by the autotuner.
pub const D_PRESCALE: u32 = 10;

/// Controller gains as stored in `cP`, `cI` and `cd`.
///
/// `kd` is identified and persisted by the autotuner but not used by
/// [`PiController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Gains {
    pub kp: u16,
    pub ki: u16,
    pub kd: u16,
}

impl Gains {
    pub fn new(kp: u16, ki: u16, kd: u16) -> Self {
        Gains { kp, ki, kd }
    }

    pub fn load<E: Eeprom>(store: &ConfigStore<E>) -> Self {
        Gains {
            kp: store.item(ConfigItem::Kp),
            ki: store.item(ConfigItem::Ki),
            kd: store.item(ConfigItem::Kd),
        }
    }

    pub fn store<E: Eeprom>(self, store: &mut ConfigStore<E>) {
        store.set_item(ConfigItem::Kp, self.kp);
        store.set_item(ConfigItem::Ki, self.ki);
        store.set_item(ConfigItem::Kd, self.kd);
    }
}

/// Persisted output envelope `[OL, OH]`, each bound limited to a byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLimits {
    pub min: u8,
    pub max: u8,
}

impl OutputLimits {
    pub fn load<E: Eeprom>(store: &ConfigStore<E>) -> Self {
        let byte = |item| store.item(item).min(u8::MAX as u16) as u8;
        OutputLimits {
            min: byte(ConfigItem::MinOutput),
            max: byte(ConfigItem::MaxOutput),
        }
    }

    /// Bring `value` into the envelope. The lower bound wins when the two
    /// bounds cross.
    pub fn clamp(self, value: u8) -> u8 {
        value.min(self.max).max(self.min)
    }
}

/// PI controller state: the wide integral accumulator and the last duty.
#[derive(Debug, Clone, Default)]
pub struct PiController {
    integral: i64,
    output: u8,
}

impl PiController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one control step from the persisted setpoint, gains, envelope
    /// and run mode. Returns the new duty.
    pub fn update<E: Eeprom>(
        &mut self,
        temperature: i16,
        store: &ConfigStore<E>,
        scale: TemperatureScale,
    ) -> u8 {
        let limits = OutputLimits::load(store);
        if store.run_mode() == RunMode::ConstantOutput {
            let fixed = store.item(ConfigItem::Output).min(u8::MAX as u16) as u8;
            self.output = limits.clamp(fixed);
            return self.output;
        }
        self.compute(
            store.item_signed(ConfigItem::Setpoint),
            temperature,
            Gains::load(store),
            limits,
            scale,
        )
    }

    /// The control law itself, independent of storage.
    pub fn compute(
        &mut self,
        setpoint: i16,
        temperature: i16,
        gains: Gains,
        limits: OutputLimits,
        scale: TemperatureScale,
    ) -> u8 {
        let postscale = scale.pi_postscale();
        let error = setpoint as i64 - temperature as i64;

        self.integral += (gains.ki as i64 * error) << I_PRESCALE;
        let mut raw = ((gains.kp as i64 * error) << P_PRESCALE) + self.integral;

        let upper = (limits.max as i64) << postscale;
        let lower = (limits.min as i64) << postscale;
        if raw > upper {
            self.integral -= raw - upper;
            raw = upper;
        }
        if raw < lower {
            self.integral += lower - raw;
            raw = lower;
        }

        self.output = (raw >> postscale) as u8;
        self.output
    }

    pub fn integral(&self) -> i64 {
        self.integral
    }

    pub fn output(&self) -> u8 {
        self.output
    }

    /// Forget the accumulated integral and the last duty.
    pub fn reset(&mut self) {
        self.integral = 0;
        self.output = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryEeprom;
    use crate::simulation::ThermalSystem;

    const FULL: OutputLimits = OutputLimits { min: 0, max: 255 };
    const CELSIUS: TemperatureScale = TemperatureScale::Celsius;

    fn defaults() -> ConfigStore<MemoryEeprom> {
        let mut store = ConfigStore::new(MemoryEeprom::new());
        store.restore_defaults(CELSIUS);
        store
    }

    #[test]
    fn test_integral_accumulates_in_range() {
        let mut pid = PiController::new();
        let gains = Gains::new(128, 8, 0);
        for n in 1..=10 {
            pid.compute(300, 200, gains, FULL, CELSIUS);
            assert_eq!(pid.integral(), 800 * n);
        }
        // (128 * 100 << 4) + 8000 = 212800, >> 12
        assert_eq!(pid.output(), 51);
    }

    #[test]
    fn test_anti_windup_holds_output_at_bound() {
        let mut pid = PiController::new();
        let gains = Gains::new(128, 8, 0);
        let upper = 255i64 << CELSIUS.pi_postscale();
        let p_term = (128i64 * 1300) << P_PRESCALE;

        for _ in 0..500 {
            assert_eq!(pid.compute(300, -1000, gains, FULL, CELSIUS), 255);
            assert_eq!(p_term + pid.integral(), upper);
        }
    }

    #[test]
    fn test_recovery_after_saturation_is_immediate() {
        let mut pid = PiController::new();
        let gains = Gains::new(128, 8, 0);
        for _ in 0..500 {
            pid.compute(300, -1000, gains, FULL, CELSIUS);
        }
        // A naive integral would keep the output pinned for thousands of ticks.
        assert_eq!(pid.compute(300, 300, gains, FULL, CELSIUS), 0);
        assert_eq!(pid.integral(), 0);
        assert_eq!(pid.compute(300, 290, gains, FULL, CELSIUS), 5);
    }

    #[test]
    fn test_output_stays_inside_envelope() {
        let mut pid = PiController::new();
        let gains = Gains::new(999, 999, 0);
        let limits = OutputLimits { min: 40, max: 180 };
        for temperature in (-400..=1400).step_by(50) {
            let output = pid.compute(300, temperature, gains, limits, CELSIUS);
            assert!((40..=180).contains(&output), "output {}", output);
        }
    }

    #[test]
    fn test_crossed_envelope_holds_lower_bound() {
        let mut pid = PiController::new();
        let gains = Gains::new(128, 8, 0);
        let crossed = OutputLimits { min: 180, max: 40 };
        assert_eq!(pid.compute(300, 200, gains, crossed, CELSIUS), 180);
        assert_eq!(pid.compute(300, 1400, gains, crossed, CELSIUS), 180);
        assert_eq!(crossed.clamp(0), 180);
        assert_eq!(crossed.clamp(255), 180);
    }

    #[test]
    fn test_fahrenheit_uses_wider_postscale() {
        let gains = Gains::new(128, 0, 0);
        let mut celsius = PiController::new();
        let mut fahrenheit = PiController::new();
        let c = celsius.compute(300, 200, gains, FULL, CELSIUS);
        let f = fahrenheit.compute(300, 200, gains, FULL, TemperatureScale::Fahrenheit);
        assert_eq!(c, 50);
        assert_eq!(f, 25);
    }

    #[test]
    fn test_constant_output_mode_bypasses_regulation() {
        let mut store = defaults();
        store.set_run_mode(RunMode::ConstantOutput);
        store.set_item(ConfigItem::Output, 200);

        let mut pid = PiController::new();
        assert_eq!(pid.update(-400, &store, CELSIUS), 200);
        assert_eq!(pid.integral(), 0);

        store.set_item(ConfigItem::MaxOutput, 180);
        assert_eq!(pid.update(-400, &store, CELSIUS), 180);
    }

    #[test]
    fn test_gain_change_keeps_integral() {
        let mut store = defaults();
        let mut pid = PiController::new();
        pid.update(290, &store, CELSIUS);
        let integral = pid.integral();
        Gains::new(300, 20, 8).store(&mut store);
        pid.update(290, &store, CELSIUS);
        assert_eq!(pid.integral(), integral + 20 * 10);
    }

    #[test]
    fn test_pid_controller_regulates_thermal_model() {
        let mut store = defaults();
        store.set_item_signed(ConfigItem::Setpoint, 600);
        let mut pid = PiController::new();
        let mut thermal_system = ThermalSystem::new(25.0, 22.0, 30.0, 10.0, 0.1);

        for tick in 0..1500 {
            let temp = thermal_system.tenths();
            let output = pid.update(temp, &store, CELSIUS);
            thermal_system.update(output as f32 / 255.0, 1.0);

            // After 1200 seconds, temperature should be close to setpoint
            if tick > 1200 {
                assert!(
                    (temp - 600).abs() <= 5,
                    "Temperature {} should be close to setpoint 600",
                    temp
                );
            }
        }
    }
}
