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

//! Hardware capabilities consumed by the control core.
//!
//! Platform adapters implement [`TemperatureSensor`] and [`Display`] and
//! drive the actuator through [`DutyCycleDriver`] with any
//! `embedded_hal` output pin.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use embedded_hal::digital::OutputPin;

use crate::temperature::Probe;

/// Analog front end shared by both probes.
pub trait TemperatureSensor {
    /// Select `probe` and start a conversion.
    fn start_conversion(&mut self, probe: Probe);

    /// Raw 10-bit code of the conversion started last.
    fn read_result(&mut self) -> u16;
}

/// Seven-segment display, rendered by the platform.
pub trait Display {
    /// Show `value`; with `decimal` it is a temperature in tenths.
    fn render(&mut self, value: i16, decimal: bool);

    /// Show the sensor alarm indication.
    fn render_alarm(&mut self);

    /// Show the switched-off indication.
    fn render_off(&mut self);
}

/// Liveness timer the main loop must feed every iteration.
pub trait Watchdog {
    fn acknowledge(&self);
}

/// Time-proportioning driver run from the fast tick.
///
/// An 8-bit counter spans one output window. The duty value is latched when
/// the counter wraps and the actuator stays energized while
/// `counter <= latched`, so a duty of `n` keeps it on for `n + 1` of 256
/// ticks and a duty of zero keeps it off.
#[derive(Debug, Clone, Default)]
pub struct DutyCycleDriver {
    counter: u8,
    latched: u8,
}

impl DutyCycleDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance one fast tick and drive `pin`. Returns the actuator level.
    pub fn tick<P: OutputPin>(
        &mut self,
        duty: u8,
        powered: bool,
        pin: &mut P,
    ) -> Result<bool, P::Error> {
        self.counter = self.counter.wrapping_add(1);
        if self.counter == 0 {
            self.latched = duty;
        }
        let energized = powered && self.latched != 0 && self.counter <= self.latched;
        if energized {
            pin.set_high()?;
        } else {
            pin.set_low()?;
        }
        Ok(energized)
    }

    pub fn latched(&self) -> u8 {
        self.latched
    }

    /// True on the tick that latched a new duty.
    pub fn at_window_start(&self) -> bool {
        self.counter == 0
    }

    /// Drop the latched duty and de-energize `pin` right away.
    pub fn shut_down<P: OutputPin>(&mut self, pin: &mut P) -> Result<(), P::Error> {
        self.latched = 0;
        pin.set_low()
    }
}

/// Fast tick period selected by [`ConfigItem::OutputPeriod`].
///
/// The selector reproduces the STC-1000 board timer setup: a 1 µs
/// timer clock counting 245 per period, prescaled by 4/16/64 and
/// postscaled by 8 or 16.
///
/// [`ConfigItem::OutputPeriod`]: crate::config::ConfigItem::OutputPeriod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputPeriod {
    selector: u8,
}

const TIMER_PERIOD_COUNTS: u64 = 245;

impl OutputPeriod {
    pub const MAX_SELECTOR: u8 = 4;

    pub fn from_selector(selector: u16) -> Self {
        OutputPeriod {
            selector: selector.min(Self::MAX_SELECTOR as u16) as u8,
        }
    }

    pub fn selector(self) -> u8 {
        self.selector
    }

    pub fn fast_tick(self) -> Duration {
        let prescale = match (self.selector & 0x6) >> 1 {
            0 => 4,
            1 => 16,
            _ => 64,
        };
        let postscale = if self.selector & 1 == 1 { 16 } else { 8 };
        Duration::from_micros(TIMER_PERIOD_COUNTS * prescale * postscale)
    }

    /// Length of one full duty window.
    pub fn window(self) -> Duration {
        self.fast_tick() * 256
    }
}

/// Software watchdog for hosted adapters.
///
/// The monitored loop calls [`acknowledge`](Watchdog::acknowledge) every
/// iteration. A supervisor on another thread polls
/// [`expired`](LoopWatchdog::expired), which reports a loop that stopped
/// doing so within `timeout`. Share it through an `Arc`.
#[derive(Debug)]
pub struct LoopWatchdog {
    timeout: Duration,
    origin: Instant,
    // Milliseconds since `origin` at the last acknowledge.
    last_ack: AtomicU64,
}

impl LoopWatchdog {
    pub fn new(timeout: Duration) -> Self {
        LoopWatchdog {
            timeout,
            origin: Instant::now(),
            last_ack: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    pub fn expired(&self) -> bool {
        let silent = self.now_ms().saturating_sub(self.last_ack.load(Ordering::Relaxed));
        silent > self.timeout.as_millis() as u64
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Watchdog for LoopWatchdog {
    fn acknowledge(&self) {
        self.last_ack.store(self.now_ms(), Ordering::Relaxed);
    }
}
