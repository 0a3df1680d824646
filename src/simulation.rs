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

//! Host-side plant and sensor models for running the control loop without
//! hardware.

use crate::hal::TemperatureSensor;
use crate::temperature::{interpolate, Probe, TemperatureScale, ADC_BITS, FILTER_SHIFT};

/// Thermal model for simulation
pub struct ThermalSystem {
    temperature: f32,          // Current temperature (°C)
    pub ambient_temp: f32,     // Ambient temperature (°C)
    pub thermal_capacity: f32, // Thermal capacity (J/°C)
    pub heater_power: f32,     // Heater power (W)
    pub heat_loss_coeff: f32,  // Heat loss coefficient (W/°C)
}

impl ThermalSystem {
    pub fn new(
        initial_temp: f32,
        ambient_temp: f32,
        thermal_capacity: f32,
        heater_power: f32,
        heat_loss_coeff: f32,
    ) -> Self {
        ThermalSystem {
            temperature: initial_temp,
            ambient_temp,
            thermal_capacity,
            heater_power,
            heat_loss_coeff,
        }
    }

    /// Update temperature based on heater duty cycle
    pub fn update(&mut self, duty_cycle: f32, dt: f32) {
        // Heat added by resistor (J)
        let heat_added = self.heater_power * duty_cycle * dt;

        // Heat lost to environment (J)
        let heat_lost = self.heat_loss_coeff * (self.temperature - self.ambient_temp) * dt;

        let net_heat = heat_added - heat_lost;
        self.temperature += net_heat / self.thermal_capacity;
    }

    pub fn get_temperature(&self) -> f32 {
        self.temperature
    }

    /// Temperature in tenths of a degree, truncated.
    pub fn tenths(&self) -> i16 {
        (self.temperature * 10.0) as i16
    }
}

/// First ADC code past calibration entry 0, where the table turns monotonic.
const MIN_MONOTONIC_CODE: u16 = 32;
const MAX_CODE: u16 = (1 << ADC_BITS) - 1;

/// Smallest ADC code that settles to a reading of at least `tenths`,
/// clamped to the table span.
pub fn raw_for_temperature(scale: TemperatureScale, tenths: i16) -> u16 {
    let table = scale.calibration_table();
    let settled = |code: u16| interpolate(table, code << FILTER_SHIFT);

    let (mut low, mut high) = (MIN_MONOTONIC_CODE, MAX_CODE);
    while low < high {
        let mid = low + (high - low) / 2;
        if settled(mid) >= tenths {
            high = mid;
        } else {
            low = mid + 1;
        }
    }
    low
}

/// Sensor front end fed from simulated probe temperatures.
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    scale: TemperatureScale,
    temperatures: [i16; 2],
    disconnected: [bool; 2],
    selected: Probe,
}

impl SimulatedSensor {
    pub fn new(scale: TemperatureScale, primary: i16, secondary: i16) -> Self {
        SimulatedSensor {
            scale,
            temperatures: [primary, secondary],
            disconnected: [false; 2],
            selected: Probe::Primary,
        }
    }

    pub fn set_temperature(&mut self, probe: Probe, tenths: i16) {
        self.temperatures[probe as usize] = tenths;
    }

    /// An open probe reads full scale.
    pub fn set_disconnected(&mut self, probe: Probe, disconnected: bool) {
        self.disconnected[probe as usize] = disconnected;
    }
}

impl TemperatureSensor for SimulatedSensor {
    fn start_conversion(&mut self, probe: Probe) {
        self.selected = probe;
    }

    fn read_result(&mut self) -> u16 {
        let index = self.selected as usize;
        if self.disconnected[index] {
            MAX_CODE
        } else {
            raw_for_temperature(self.scale, self.temperatures[index])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, MemoryEeprom};
    use crate::temperature::TemperatureAcquisition;

    #[test]
    fn test_thermal_model() {
        let mut system = ThermalSystem::new(25.0, 25.0, 300.0, 10.0, 0.0);

        // With no heat loss, applying 10W for 30s should increase temp by 1°C
        system.update(1.0, 30.0);
        assert!((system.get_temperature() - 26.0).abs() < 0.01);
        assert_eq!(system.tenths(), 260);

        let mut system_with_loss = ThermalSystem::new(30.0, 20.0, 300.0, 0.0, 0.5);
        system_with_loss.update(0.0, 60.0);
        assert!(system_with_loss.get_temperature() < 30.0);
    }

    #[test]
    fn test_raw_code_settles_near_requested_temperature() {
        for scale in [TemperatureScale::Celsius, TemperatureScale::Fahrenheit] {
            let table = scale.calibration_table();
            for tenths in (-300..=1000).step_by(50) {
                let code = raw_for_temperature(scale, tenths);
                let reading = interpolate(table, code << FILTER_SHIFT);
                assert!(reading >= tenths, "{:?} {} -> {}", scale, tenths, reading);
                assert!(reading - tenths <= 12, "{:?} {} -> {}", scale, tenths, reading);
            }
        }
        assert_eq!(raw_for_temperature(TemperatureScale::Celsius, 250), 512);
    }

    #[test]
    fn test_simulated_probes_through_acquisition() {
        let scale = TemperatureScale::Celsius;
        let store = ConfigStore::new(MemoryEeprom::from_image([0; 256]));
        let mut sensor = SimulatedSensor::new(scale, 200, 650);
        let mut acquisition = TemperatureAcquisition::new(scale);

        acquisition.begin(&mut sensor);
        for tick in 1..=64 {
            acquisition.sample(&mut sensor, tick);
        }
        acquisition.convert(&store);
        assert!((acquisition.temperature(Probe::Primary) - 200).abs() <= 2);
        assert!((acquisition.temperature(Probe::Secondary) - 650).abs() <= 5);
        assert!(!acquisition.sensor_fault(true));

        sensor.set_disconnected(Probe::Secondary, true);
        for tick in 65..=128 {
            acquisition.sample(&mut sensor, tick);
        }
        assert!(!acquisition.sensor_fault(false));
        assert!(acquisition.sensor_fault(true));
    }
}
