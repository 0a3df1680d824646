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

//! Persistent, address-mapped configuration store.
//!
//! Every configuration value is a 16-bit word at a logical address in
//! `0..=127`. Logical address `a` occupies EEPROM bytes `2a` (low) and
//! `2a + 1` (high). Writes that would not change the stored word are skipped
//! to spare EEPROM endurance.
//!
//! Layout:
//!
//! | Logical address      | Content                                        |
//! |----------------------|------------------------------------------------|
//! | `19 * p + 2 * s`     | setpoint of profile `p`, step `s` (`s <= 9`)   |
//! | `19 * p + 2 * s + 1` | duration of profile `p`, step `s` (`s <= 8`)   |
//! | `95..=109`           | named items, see [`ConfigItem`]                |
//! | `127`                | power-on flag                                  |
//!
//! Multi-field updates are independent sequential writes. A power loss in
//! the middle of one leaves the fields that were already written updated and
//! the others untouched.

use core::ops::RangeInclusive;

use log::{debug, warn};
use thiserror::Error;

use crate::temperature::TemperatureScale;
use crate::NO_OF_PROFILES;

/// Number of logical configuration addresses.
pub const ADDRESS_COUNT: usize = 128;

/// Size in bytes of the backing EEPROM.
pub const EEPROM_SIZE: usize = ADDRESS_COUNT * 2;

/// Steps per profile that carry a duration.
pub const STEPS_PER_PROFILE: u8 = 9;

/// Index of the last step that carries a duration.
pub const LAST_STEP: u8 = STEPS_PER_PROFILE - 1;

/// Logical slots reserved for one profile (9 step pairs plus the final setpoint).
const PROFILE_STRIDE: u8 = 19;

/// First logical address of the named item block.
const NAMED_BLOCK: u8 = PROFILE_STRIDE * NO_OF_PROFILES;

/// Errors raised at the configuration API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("config address {0} is outside 0..=127")]
    AddressOutOfRange(u8),
    #[error("profile {profile} step {step} does not exist")]
    StepOutOfRange { profile: u8, step: u8 },
    #[error("value {value} for {item:?} is outside {min}..={max}")]
    ValueOutOfRange {
        item: ConfigItem,
        value: i16,
        min: i16,
        max: i16,
    },
}

/// A validated logical configuration address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u8);

impl Address {
    pub const fn new(raw: u8) -> Result<Self, ConfigError> {
        if (raw as usize) < ADDRESS_COUNT {
            Ok(Address(raw))
        } else {
            Err(ConfigError::AddressOutOfRange(raw))
        }
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Setpoint slot of `step` in `profile`. Step 9 is the final setpoint
    /// that becomes the constant target once step 8 has run out.
    pub fn profile_setpoint(profile: u8, step: u8) -> Result<Self, ConfigError> {
        if profile >= NO_OF_PROFILES || step > STEPS_PER_PROFILE {
            return Err(ConfigError::StepOutOfRange { profile, step });
        }
        Address::new(PROFILE_STRIDE * profile + (step << 1))
    }

    /// Duration slot of `step` in `profile`.
    pub fn profile_duration(profile: u8, step: u8) -> Result<Self, ConfigError> {
        if step > LAST_STEP {
            return Err(ConfigError::StepOutOfRange { profile, step });
        }
        Ok(Address(Address::profile_setpoint(profile, step)?.0 + 1))
    }
}

impl From<ConfigItem> for Address {
    fn from(item: ConfigItem) -> Self {
        item.address()
    }
}

/// Named configuration items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigItem {
    /// Calibration offset added to probe 1 (tenths).
    TemperatureCorrection,
    /// Calibration offset added to probe 2 (tenths).
    TemperatureCorrection2,
    /// Active setpoint (tenths).
    Setpoint,
    /// Reserved slot, kept so the following items keep their addresses.
    Differential,
    /// Current profile step.
    Step,
    /// Elapsed time in the current profile step.
    StepElapsed,
    /// Output period selector, see [`crate::hal::OutputPeriod`].
    OutputPeriod,
    Kp,
    Ki,
    Kd,
    /// Fixed output used in constant output mode.
    Output,
    MinOutput,
    MaxOutput,
    /// Non-zero when probe 2 is fitted and monitored for faults.
    SecondProbe,
    RunMode,
    /// Non-zero when the thermostat is switched on.
    PowerOn,
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    min: i16,
    max: i16,
    default: i16,
}

const fn limits(min: i16, max: i16, default: i16) -> Limits {
    Limits { min, max, default }
}

struct ItemLayout {
    address: u8,
    signed: bool,
    celsius: Limits,
    fahrenheit: Limits,
}

const fn layout(address: u8, signed: bool, celsius: Limits, fahrenheit: Limits) -> ItemLayout {
    ItemLayout {
        address,
        signed,
        celsius,
        fahrenheit,
    }
}

const RUN_MODE_MAX: i16 = NO_OF_PROFILES as i16 + 1;
const DEFAULT_RUN_MODE: i16 = NO_OF_PROFILES as i16;

// Indexed by `ConfigItem as usize`.
static ITEM_TABLE: [ItemLayout; 16] = [
    layout(NAMED_BLOCK, true, limits(-50, 50, 0), limits(-100, 100, 0)),
    layout(NAMED_BLOCK + 1, true, limits(-50, 50, 0), limits(-100, 100, 0)),
    layout(NAMED_BLOCK + 2, true, limits(-400, 1400, 300), limits(-400, 2500, 680)),
    layout(NAMED_BLOCK + 3, false, limits(0, 250, 10), limits(0, 500, 20)),
    layout(NAMED_BLOCK + 4, false, limits(0, 8, 0), limits(0, 8, 0)),
    layout(NAMED_BLOCK + 5, false, limits(0, 999, 0), limits(0, 999, 0)),
    layout(NAMED_BLOCK + 6, false, limits(0, 4, 2), limits(0, 4, 2)),
    layout(NAMED_BLOCK + 7, false, limits(0, 999, 128), limits(0, 999, 128)),
    layout(NAMED_BLOCK + 8, false, limits(0, 999, 8), limits(0, 999, 8)),
    layout(NAMED_BLOCK + 9, false, limits(0, 999, 8), limits(0, 999, 8)),
    layout(NAMED_BLOCK + 10, false, limits(0, 255, 127), limits(0, 255, 127)),
    layout(NAMED_BLOCK + 11, false, limits(0, 255, 0), limits(0, 255, 0)),
    layout(NAMED_BLOCK + 12, false, limits(0, 255, 255), limits(0, 255, 255)),
    layout(NAMED_BLOCK + 13, false, limits(0, 1, 0), limits(0, 1, 0)),
    layout(
        NAMED_BLOCK + 14,
        false,
        limits(0, RUN_MODE_MAX, DEFAULT_RUN_MODE),
        limits(0, RUN_MODE_MAX, DEFAULT_RUN_MODE),
    ),
    layout(127, false, limits(0, 1, 1), limits(0, 1, 1)),
];

impl ConfigItem {
    pub const ALL: [ConfigItem; 16] = [
        ConfigItem::TemperatureCorrection,
        ConfigItem::TemperatureCorrection2,
        ConfigItem::Setpoint,
        ConfigItem::Differential,
        ConfigItem::Step,
        ConfigItem::StepElapsed,
        ConfigItem::OutputPeriod,
        ConfigItem::Kp,
        ConfigItem::Ki,
        ConfigItem::Kd,
        ConfigItem::Output,
        ConfigItem::MinOutput,
        ConfigItem::MaxOutput,
        ConfigItem::SecondProbe,
        ConfigItem::RunMode,
        ConfigItem::PowerOn,
    ];

    fn layout(self) -> &'static ItemLayout {
        &ITEM_TABLE[self as usize]
    }

    pub fn address(self) -> Address {
        Address(self.layout().address)
    }

    /// True when the stored word is a two's-complement signed value.
    pub fn is_signed(self) -> bool {
        self.layout().signed
    }

    fn limits(self, scale: TemperatureScale) -> Limits {
        match scale {
            TemperatureScale::Celsius => self.layout().celsius,
            TemperatureScale::Fahrenheit => self.layout().fahrenheit,
        }
    }

    /// Values the configuration UI may assign to this item.
    pub fn range(self, scale: TemperatureScale) -> RangeInclusive<i16> {
        let limits = self.limits(scale);
        limits.min..=limits.max
    }

    pub fn default_value(self, scale: TemperatureScale) -> i16 {
        self.limits(scale).default
    }
}

/// Operating mode selector stored in [`ConfigItem::RunMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Following profile `n` (`n < NO_OF_PROFILES`).
    Profile(u8),
    ConstantTemperature,
    ConstantOutput,
}

impl RunMode {
    /// Decode a stored run mode. Values past the last mode are treated as
    /// constant output, the nearest valid mode.
    pub fn from_raw(raw: u16) -> Self {
        let profiles = NO_OF_PROFILES as u16;
        if raw < profiles {
            RunMode::Profile(raw as u8)
        } else if raw == profiles {
            RunMode::ConstantTemperature
        } else {
            if raw > profiles + 1 {
                warn!("run mode {} out of range, using constant output", raw);
            }
            RunMode::ConstantOutput
        }
    }

    pub fn to_raw(self) -> u16 {
        match self {
            RunMode::Profile(profile) => profile.min(NO_OF_PROFILES - 1) as u16,
            RunMode::ConstantTemperature => NO_OF_PROFILES as u16,
            RunMode::ConstantOutput => NO_OF_PROFILES as u16 + 1,
        }
    }

    pub fn profile(self) -> Option<u8> {
        match self {
            RunMode::Profile(profile) => Some(profile),
            _ => None,
        }
    }
}

/// Byte-addressed non-volatile memory.
pub trait Eeprom {
    fn read_byte(&self, address: u8) -> u8;

    /// Program one byte. Returns once the cell holds the new value.
    fn write_byte(&mut self, address: u8, value: u8);

    /// Make the bytes written so far durable. Called once per stored word,
    /// outside the critical section. Devices that program in place need
    /// nothing here.
    fn commit(&mut self) {}
}

impl<E: Eeprom + ?Sized> Eeprom for &mut E {
    fn read_byte(&self, address: u8) -> u8 {
        (**self).read_byte(address)
    }

    fn write_byte(&mut self, address: u8, value: u8) {
        (**self).write_byte(address, value)
    }

    fn commit(&mut self) {
        (**self).commit()
    }
}

/// RAM-backed EEPROM image that counts physical byte writes and commits.
#[derive(Debug, Clone)]
pub struct MemoryEeprom {
    cells: [u8; EEPROM_SIZE],
    writes: usize,
    commits: usize,
}

impl MemoryEeprom {
    /// An erased device (all cells `0xFF`).
    pub fn new() -> Self {
        Self::from_image([0xFF; EEPROM_SIZE])
    }

    pub fn from_image(cells: [u8; EEPROM_SIZE]) -> Self {
        MemoryEeprom {
            cells,
            writes: 0,
            commits: 0,
        }
    }

    pub fn image(&self) -> &[u8; EEPROM_SIZE] {
        &self.cells
    }

    /// Number of byte writes performed since construction.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    pub fn commit_count(&self) -> usize {
        self.commits
    }
}

impl Default for MemoryEeprom {
    fn default() -> Self {
        Self::new()
    }
}

impl Eeprom for MemoryEeprom {
    fn read_byte(&self, address: u8) -> u8 {
        self.cells[address as usize]
    }

    fn write_byte(&mut self, address: u8, value: u8) {
        self.cells[address as usize] = value;
        self.writes += 1;
    }

    fn commit(&mut self) {
        self.commits += 1;
    }
}

/// Word-oriented view over an [`Eeprom`].
#[derive(Debug)]
pub struct ConfigStore<E> {
    eeprom: E,
}

impl<E: Eeprom> ConfigStore<E> {
    pub fn new(eeprom: E) -> Self {
        ConfigStore { eeprom }
    }

    pub fn get(&self, address: Address) -> u16 {
        let base = address.raw() << 1;
        u16::from_le_bytes([self.eeprom.read_byte(base), self.eeprom.read_byte(base + 1)])
    }

    /// Store `value` at `address`. Returns `false` when the stored word
    /// already equals `value` and nothing was written.
    ///
    /// Both bytes are programmed inside one critical section so no reader
    /// can observe half of the new word.
    pub fn set(&mut self, address: Address, value: u16) -> bool {
        if self.get(address) == value {
            return false;
        }
        let base = address.raw() << 1;
        let [low, high] = value.to_le_bytes();
        let eeprom = &mut self.eeprom;
        critical_section::with(|_| {
            eeprom.write_byte(base, low);
            eeprom.write_byte(base + 1, high);
        });
        self.eeprom.commit();
        debug!("config[{}] <- {}", address.raw(), value);
        true
    }

    pub fn get_signed(&self, address: Address) -> i16 {
        self.get(address) as i16
    }

    pub fn set_signed(&mut self, address: Address, value: i16) -> bool {
        self.set(address, value as u16)
    }

    pub fn item(&self, item: ConfigItem) -> u16 {
        self.get(item.address())
    }

    pub fn item_signed(&self, item: ConfigItem) -> i16 {
        self.get_signed(item.address())
    }

    pub fn set_item(&mut self, item: ConfigItem, value: u16) -> bool {
        self.set(item.address(), value)
    }

    pub fn set_item_signed(&mut self, item: ConfigItem, value: i16) -> bool {
        self.set_signed(item.address(), value)
    }

    /// Store `value` after checking it against the item's permitted range.
    pub fn set_checked(
        &mut self,
        item: ConfigItem,
        value: i16,
        scale: TemperatureScale,
    ) -> Result<(), ConfigError> {
        let range = item.range(scale);
        if !range.contains(&value) {
            return Err(ConfigError::ValueOutOfRange {
                item,
                value,
                min: *range.start(),
                max: *range.end(),
            });
        }
        self.set_item_signed(item, value);
        Ok(())
    }

    pub fn run_mode(&self) -> RunMode {
        RunMode::from_raw(self.item(ConfigItem::RunMode))
    }

    pub fn set_run_mode(&mut self, mode: RunMode) {
        self.set_item(ConfigItem::RunMode, mode.to_raw());
    }

    pub fn powered(&self) -> bool {
        self.item(ConfigItem::PowerOn) != 0
    }

    pub fn profile_setpoint(&self, profile: u8, step: u8) -> Result<i16, ConfigError> {
        Ok(self.get_signed(Address::profile_setpoint(profile, step)?))
    }

    pub fn set_profile_setpoint(
        &mut self,
        profile: u8,
        step: u8,
        setpoint: i16,
    ) -> Result<(), ConfigError> {
        self.set_signed(Address::profile_setpoint(profile, step)?, setpoint);
        Ok(())
    }

    pub fn profile_duration(&self, profile: u8, step: u8) -> Result<u16, ConfigError> {
        Ok(self.get(Address::profile_duration(profile, step)?))
    }

    pub fn set_profile_duration(
        &mut self,
        profile: u8,
        step: u8,
        duration: u16,
    ) -> Result<(), ConfigError> {
        self.set(Address::profile_duration(profile, step)?, duration);
        Ok(())
    }

    /// Seed every named item with its default and clear all profiles to
    /// the default setpoint with zero durations.
    pub fn restore_defaults(&mut self, scale: TemperatureScale) {
        let setpoint = ConfigItem::Setpoint.default_value(scale);
        for profile in 0..NO_OF_PROFILES {
            for step in 0..=STEPS_PER_PROFILE {
                self.set_signed(Address(PROFILE_STRIDE * profile + (step << 1)), setpoint);
                if step <= LAST_STEP {
                    self.set(Address(PROFILE_STRIDE * profile + (step << 1) + 1), 0);
                }
            }
        }
        for item in ConfigItem::ALL {
            self.set_item_signed(item, item.default_value(scale));
        }
    }

    pub fn eeprom(&self) -> &E {
        &self.eeprom
    }

    pub fn into_inner(self) -> E {
        self.eeprom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_every_address() {
        let mut store = ConfigStore::new(MemoryEeprom::new());
        for raw in 0..ADDRESS_COUNT as u8 {
            let address = Address::new(raw).unwrap();
            for value in [0u16, 1, 0x00FF, 0xFF00, 0x1234, u16::MAX] {
                store.set(address, value);
                assert_eq!(store.get(address), value, "address {}", raw);
            }
        }
    }

    #[test]
    fn test_unchanged_value_is_not_written() {
        let mut store = ConfigStore::new(MemoryEeprom::new());
        let address = ConfigItem::Setpoint.address();

        assert!(store.set(address, 300));
        assert_eq!(store.eeprom().write_count(), 2);

        let current = store.get(address);
        assert!(!store.set(address, current));
        assert_eq!(store.eeprom().write_count(), 2);
    }

    #[test]
    fn test_word_is_committed_once_after_both_bytes() {
        let mut store = ConfigStore::new(MemoryEeprom::new());
        store.set_item(ConfigItem::Kp, 0x1234);
        assert_eq!(store.eeprom().write_count(), 2);
        assert_eq!(store.eeprom().commit_count(), 1);

        store.set_item(ConfigItem::Kp, 0x1234);
        assert_eq!(store.eeprom().commit_count(), 1);
    }

    #[test]
    fn test_word_is_stored_low_byte_first() {
        let mut store = ConfigStore::new(MemoryEeprom::new());
        store.set(Address::new(10).unwrap(), 0xABCD);
        assert_eq!(store.eeprom().image()[20], 0xCD);
        assert_eq!(store.eeprom().image()[21], 0xAB);
    }

    #[test]
    fn test_address_layout() {
        assert_eq!(Address::profile_setpoint(0, 0).unwrap().raw(), 0);
        assert_eq!(Address::profile_duration(0, 0).unwrap().raw(), 1);
        assert_eq!(Address::profile_setpoint(2, 3).unwrap().raw(), 44);
        assert_eq!(Address::profile_setpoint(4, 9).unwrap().raw(), 94);
        assert_eq!(ConfigItem::TemperatureCorrection.address().raw(), 95);
        assert_eq!(ConfigItem::Setpoint.address().raw(), 97);
        assert_eq!(ConfigItem::Kp.address().raw(), 102);
        assert_eq!(ConfigItem::RunMode.address().raw(), 109);
        assert_eq!(ConfigItem::PowerOn.address().raw(), 127);
    }

    #[test]
    fn test_invalid_addresses_are_rejected() {
        assert_eq!(Address::new(128), Err(ConfigError::AddressOutOfRange(128)));
        assert!(Address::profile_setpoint(5, 0).is_err());
        assert!(Address::profile_setpoint(0, 10).is_err());
        assert!(Address::profile_duration(0, 9).is_err());
    }

    #[test]
    fn test_signed_values_survive_storage() {
        let mut store = ConfigStore::new(MemoryEeprom::new());
        store.set_item_signed(ConfigItem::TemperatureCorrection, -25);
        assert_eq!(store.item_signed(ConfigItem::TemperatureCorrection), -25);
        assert_eq!(store.item(ConfigItem::TemperatureCorrection), 0xFFE7);
    }

    #[test]
    fn test_checked_set_enforces_item_range() {
        let mut store = ConfigStore::new(MemoryEeprom::new());
        let scale = TemperatureScale::Celsius;

        assert!(store.set_checked(ConfigItem::Setpoint, 1400, scale).is_ok());
        assert_eq!(
            store.set_checked(ConfigItem::Setpoint, 1401, scale),
            Err(ConfigError::ValueOutOfRange {
                item: ConfigItem::Setpoint,
                value: 1401,
                min: -400,
                max: 1400,
            })
        );
        assert!(store
            .set_checked(ConfigItem::Setpoint, 2500, TemperatureScale::Fahrenheit)
            .is_ok());
        assert_eq!(store.item_signed(ConfigItem::Setpoint), 2500);
    }

    #[test]
    fn test_run_mode_decoding_clamps_corrupt_values() {
        assert_eq!(RunMode::from_raw(0), RunMode::Profile(0));
        assert_eq!(RunMode::from_raw(4), RunMode::Profile(4));
        assert_eq!(RunMode::from_raw(5), RunMode::ConstantTemperature);
        assert_eq!(RunMode::from_raw(6), RunMode::ConstantOutput);
        assert_eq!(RunMode::from_raw(0xFFFF), RunMode::ConstantOutput);
        assert_eq!(RunMode::ConstantTemperature.to_raw(), 5);
    }

    #[test]
    fn test_restore_defaults() {
        let mut store = ConfigStore::new(MemoryEeprom::new());
        store.restore_defaults(TemperatureScale::Celsius);

        assert_eq!(store.item_signed(ConfigItem::Setpoint), 300);
        assert_eq!(store.item(ConfigItem::Kp), 128);
        assert_eq!(store.item(ConfigItem::MaxOutput), 255);
        assert_eq!(store.run_mode(), RunMode::ConstantTemperature);
        assert!(store.powered());
        for profile in 0..NO_OF_PROFILES {
            assert_eq!(store.profile_setpoint(profile, 9).unwrap(), 300);
            for step in 0..STEPS_PER_PROFILE {
                assert_eq!(store.profile_duration(profile, step).unwrap(), 0);
            }
        }

        let writes = store.eeprom().write_count();
        store.restore_defaults(TemperatureScale::Celsius);
        assert_eq!(store.eeprom().write_count(), writes);
    }

    #[test]
    fn test_store_over_borrowed_eeprom() {
        let mut eeprom = MemoryEeprom::new();
        {
            let mut store = ConfigStore::new(&mut eeprom);
            store.set_item(ConfigItem::Ki, 42);
        }
        assert_eq!(ConfigStore::new(&mut eeprom).item(ConfigItem::Ki), 42);
    }
}
