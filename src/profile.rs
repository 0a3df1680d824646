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

//! Multi-step temperature profiles.
//!
//! A profile is up to nine (setpoint, duration) steps followed by a final
//! setpoint. Durations count profile ticks, nominally one per minute. The
//! running step and its elapsed time live in the configuration store so a
//! profile resumes where it was after a power cycle.

use log::{info, warn};

use crate::config::{ConfigError, ConfigItem, ConfigStore, Eeprom, RunMode, LAST_STEP};
use crate::NO_OF_PROFILES;

/// Mid ticks that must accumulate before the next profile tick.
pub const PROFILE_TICK_MID_TICKS: u16 = 1000;

/// Outcome of one profile tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileEvent {
    /// No profile is running.
    Inactive,
    /// The current step keeps running.
    Holding { profile: u8, step: u8, elapsed: u16 },
    /// The previous step ran out and `step` started.
    Advanced { profile: u8, step: u8, setpoint: i16 },
    /// The last step ran out. The thermostat now holds `setpoint`.
    Finished { profile: u8, setpoint: i16 },
}

/// Decimates the one-second control section down to profile ticks.
#[derive(Debug, Clone, Default)]
pub struct ProfileSequencer {
    pending: u16,
}

impl ProfileSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for `mid_ticks` elapsed since the previous control second and
    /// run a profile tick once enough have accumulated. The accumulator is
    /// held at zero while no profile runs.
    pub fn on_second<E: Eeprom>(
        &mut self,
        mid_ticks: u16,
        store: &mut ConfigStore<E>,
    ) -> Option<ProfileEvent> {
        if store.run_mode().profile().is_none() {
            self.pending = 0;
            return None;
        }
        self.pending = self.pending.saturating_add(mid_ticks);
        if self.pending < PROFILE_TICK_MID_TICKS {
            return None;
        }
        self.pending = 0;
        Some(Self::advance(store))
    }

    pub fn pending(&self) -> u16 {
        self.pending
    }

    /// One profile tick.
    pub fn advance<E: Eeprom>(store: &mut ConfigStore<E>) -> ProfileEvent {
        let Some(profile) = store.run_mode().profile() else {
            return ProfileEvent::Inactive;
        };

        let mut step = store.item(ConfigItem::Step);
        if step > LAST_STEP as u16 {
            warn!("profile step {} out of range, clamping to {}", step, LAST_STEP);
            step = LAST_STEP as u16;
        }
        let step = step as u8;
        let elapsed = store.item(ConfigItem::StepElapsed).saturating_add(1);

        // Steps 0..=8 and the final setpoint 9 are always addressable for a
        // valid profile, so these reads cannot fail.
        let duration = store.profile_duration(profile, step).unwrap_or(0);
        if elapsed < duration {
            store.set_item(ConfigItem::StepElapsed, elapsed);
            return ProfileEvent::Holding {
                profile,
                step,
                elapsed,
            };
        }

        let setpoint = store.profile_setpoint(profile, step + 1).unwrap_or_else(|_| {
            store.item_signed(ConfigItem::Setpoint)
        });
        store.set_item_signed(ConfigItem::Setpoint, setpoint);

        if step == LAST_STEP || store.profile_duration(profile, step + 1).unwrap_or(0) == 0 {
            store.set_run_mode(RunMode::ConstantTemperature);
            info!(
                "profile {} finished, holding {} as constant setpoint",
                profile, setpoint
            );
            return ProfileEvent::Finished { profile, setpoint };
        }

        let step = step + 1;
        store.set_item(ConfigItem::Step, step as u16);
        store.set_item(ConfigItem::StepElapsed, 0);
        info!("profile {} advanced to step {} at {}", profile, step, setpoint);
        ProfileEvent::Advanced {
            profile,
            step,
            setpoint,
        }
    }
}

/// Begin running `profile` from its first step.
///
/// The run mode, step, elapsed time and setpoint are separate writes.
pub fn start_profile<E: Eeprom>(
    store: &mut ConfigStore<E>,
    profile: u8,
) -> Result<(), ConfigError> {
    if profile >= NO_OF_PROFILES {
        return Err(ConfigError::StepOutOfRange { profile, step: 0 });
    }
    let setpoint = store.profile_setpoint(profile, 0)?;
    store.set_item(ConfigItem::Step, 0);
    store.set_item(ConfigItem::StepElapsed, 0);
    store.set_item_signed(ConfigItem::Setpoint, setpoint);
    store.set_run_mode(RunMode::Profile(profile));
    info!("profile {} started at {}", profile, setpoint);
    Ok(())
}
