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

//! EEPROM image kept in a file, for hosted adapters without a real device.
//!
//! Byte writes only touch the RAM copy. Each committed word replaces the
//! file through a temporary sibling and a rename, so the file on disk is
//! always a complete image from before or after the word.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use thiserror::Error;

use crate::config::{Eeprom, EEPROM_SIZE};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("EEPROM image {} has {len} bytes, expected {size}", path.display(), size = EEPROM_SIZE)]
    BadLength { path: PathBuf, len: usize },
    #[error("cannot read EEPROM image {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug)]
pub struct FileEeprom {
    path: PathBuf,
    cells: [u8; EEPROM_SIZE],
    dirty: bool,
}

impl FileEeprom {
    /// Open the image at `path`. The flag is `true` when no image existed
    /// yet and the device starts erased.
    ///
    /// An image of the wrong size is left untouched on disk and reported as
    /// [`StorageError::BadLength`].
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, bool), StorageError> {
        let path = path.as_ref().to_path_buf();
        let mut cells = [0xFF; EEPROM_SIZE];
        let fresh = match fs::read(&path) {
            Ok(bytes) if bytes.len() == EEPROM_SIZE => {
                cells.copy_from_slice(&bytes);
                false
            }
            Ok(bytes) => {
                warn!(
                    "{} has {} bytes, leaving it in place",
                    path.display(),
                    bytes.len()
                );
                return Err(StorageError::BadLength {
                    path,
                    len: bytes.len(),
                });
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!("no EEPROM image at {}, starting erased", path.display());
                true
            }
            Err(source) => return Err(StorageError::Read { path, source }),
        };
        Ok((
            FileEeprom {
                path,
                cells,
                dirty: false,
            },
            fresh,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Replace the file with the RAM image.
    pub fn persist(&self) -> io::Result<()> {
        let temp = self.temp_path();
        let mut file = File::create(&temp)?;
        file.write_all(&self.cells)?;
        file.sync_all()?;
        fs::rename(&temp, &self.path)
    }
}

impl Eeprom for FileEeprom {
    fn read_byte(&self, address: u8) -> u8 {
        self.cells[address as usize]
    }

    fn write_byte(&mut self, address: u8, value: u8) {
        self.cells[address as usize] = value;
        self.dirty = true;
    }

    /// On failure the RAM image stays authoritative and the next commit
    /// retries.
    fn commit(&mut self) {
        if !self.dirty {
            return;
        }
        match self.persist() {
            Ok(()) => self.dirty = false,
            Err(err) => error!("writing {} failed: {}", self.path.display(), err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigItem, ConfigStore};
    use crate::temperature::TemperatureScale;

    #[test]
    fn test_missing_image_starts_erased() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let (eeprom, fresh) = FileEeprom::open(dir.path().join("eeprom.bin")).unwrap();
        assert!(fresh);
        assert_eq!(eeprom.read_byte(0), 0xFF);
        assert!(!eeprom.path().exists());
    }

    #[test]
    fn test_bytes_reach_disk_only_on_commit() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("eeprom.bin");
        let (mut eeprom, _) = FileEeprom::open(&path).unwrap();

        eeprom.write_byte(4, 0x12);
        eeprom.write_byte(5, 0x34);
        assert!(!path.exists());

        eeprom.commit();
        let image = fs::read(&path).unwrap();
        assert_eq!(image.len(), EEPROM_SIZE);
        assert_eq!(&image[4..6], &[0x12, 0x34]);
        assert!(!eeprom.temp_path().exists());
    }

    #[test]
    fn test_configuration_survives_reopen() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("eeprom.bin");
        {
            let (eeprom, _) = FileEeprom::open(&path).unwrap();
            let mut store = ConfigStore::new(eeprom);
            store.restore_defaults(TemperatureScale::Celsius);
            store.set_item(ConfigItem::Kp, 417);
            store.set_profile_duration(2, 3, 90).unwrap();
        }

        let (eeprom, fresh) = FileEeprom::open(&path).unwrap();
        assert!(!fresh);
        let store = ConfigStore::new(eeprom);
        assert_eq!(store.item(ConfigItem::Kp), 417);
        assert_eq!(store.profile_duration(2, 3).unwrap(), 90);
        assert_eq!(store.item_signed(ConfigItem::Setpoint), 300);
    }

    #[test]
    fn test_truncated_image_is_rejected_and_kept() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("eeprom.bin");
        fs::write(&path, [0xAB; 100]).unwrap();

        match FileEeprom::open(&path) {
            Err(StorageError::BadLength { len, .. }) => assert_eq!(len, 100),
            other => panic!("unexpected {:?}", other.map(|(_, fresh)| fresh)),
        }
        assert_eq!(fs::read(&path).unwrap(), vec![0xAB; 100]);
    }
}
