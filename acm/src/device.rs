// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Collaborators through which a configuration talks to the ACM.

use crate::error::Error;
use crate::hw::{ConfigFile, STATUS_GROUP};
use crate::operation::ETHER_ADDR_LEN;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::PathBuf;

pub type MacAddress = [u8; ETHER_ADDR_LEN];

/// Read-only items of the driver's `status` group.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StatusItem {
    /// Scheduler tick frequency in Hz.
    TimeFreq,
    MsgbufMemsize,
    MsgbufCount,
    MsgbufDatawidth,
    /// Non-zero when the IP supports receive redundancy.
    RxRedundancy,
    IndividualRecovery,
}

impl StatusItem {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TimeFreq => "time_freq",
            Self::MsgbufMemsize => "msgbuf_memsize",
            Self::MsgbufCount => "msgbuf_count",
            Self::MsgbufDatawidth => "msgbuf_datawidth",
            Self::RxRedundancy => "rx_redundancy",
            Self::IndividualRecovery => "individual_recovery",
        }
    }
}

pub trait StatusSource {
    fn status(&self, item: StatusItem) -> Result<i64, Error>;
}

/// Positional access to the `config_bin` files.
pub trait ConfigInterface {
    fn write(&mut self, file: ConfigFile, bytes: &[u8], offset: u64) -> Result<(), Error>;
    fn read(&self, file: ConfigFile, size: usize, offset: u64) -> Result<Vec<u8>, Error>;
}

pub trait MacSource {
    fn mac_address(&self, ifname: &str) -> Result<MacAddress, Error>;
}

/// Everything a configuration needs from the hardware side.
pub trait Device: StatusSource + ConfigInterface + MacSource {}

impl<T: StatusSource + ConfigInterface + MacSource> Device for T {}

fn parse_mac(text: &str) -> Option<MacAddress> {
    let mut mac = [0; ETHER_ADDR_LEN];
    let mut parts = text.trim().split(':');
    for byte in mac.iter_mut() {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    match parts.next() {
        Some(_) => None,
        None => Some(mac),
    }
}

/// Parses a status value the way `strtoull(.., 0)` does.
fn parse_status(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else if text.len() > 1 && text.starts_with('0') {
        i64::from_str_radix(&text[1..], 8).ok()
    } else {
        text.parse().ok()
    }
}

/// The driver's sysfs tree.
pub struct SysfsDevice {
    base: PathBuf,
    net: PathBuf,
}

impl SysfsDevice {
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Self {
            base: base.into(),
            net: PathBuf::from("/sys/class/net"),
        }
    }

    fn config_path(&self, file: ConfigFile) -> PathBuf {
        self.base.join(file.to_string())
    }
}

impl StatusSource for SysfsDevice {
    fn status(&self, item: StatusItem) -> Result<i64, Error> {
        let path = self.base.join(STATUS_GROUP).join(item.name());
        let text = fs::read_to_string(&path)?;
        parse_status(&text).ok_or_else(|| Error::Io(format!("{}: not a number", path.display())))
    }
}

impl ConfigInterface for SysfsDevice {
    fn write(&mut self, file: ConfigFile, bytes: &[u8], offset: u64) -> Result<(), Error> {
        let path = self.config_path(file);
        log::trace!("write {} bytes to {} at {}", bytes.len(), path.display(), offset);
        let handle = OpenOptions::new().write(true).open(&path)?;
        handle.write_all_at(bytes, offset)?;
        Ok(())
    }

    fn read(&self, file: ConfigFile, size: usize, offset: u64) -> Result<Vec<u8>, Error> {
        let path = self.config_path(file);
        let handle = OpenOptions::new().read(true).open(&path)?;
        let mut bytes = vec![0; size];
        let count = handle.read_at(&mut bytes, offset)?;
        if count != size {
            log::info!(
                "less data read than expected from {}: expected {}, read {}",
                path.display(),
                size,
                count
            );
        }
        Ok(bytes)
    }
}

impl MacSource for SysfsDevice {
    fn mac_address(&self, ifname: &str) -> Result<MacAddress, Error> {
        let path = self.net.join(ifname).join("address");
        let text = fs::read_to_string(&path)?;
        parse_mac(&text).ok_or_else(|| Error::Io(format!("{}: malformed address", path.display())))
    }
}

/// An ACM kept in memory: status values are settable, and every file is a
/// byte vector that grows as it is written.
#[derive(Clone, Debug)]
pub struct MemoryDevice {
    status: HashMap<StatusItem, i64>,
    files: HashMap<ConfigFile, Vec<u8>>,
    macs: HashMap<String, MacAddress>,
}

impl Default for MemoryDevice {
    fn default() -> Self {
        let status = vec![
            (StatusItem::TimeFreq, 12_500_000),
            (StatusItem::MsgbufMemsize, 16384),
            (StatusItem::MsgbufCount, 32),
            (StatusItem::MsgbufDatawidth, 4),
            (StatusItem::RxRedundancy, 1),
            (StatusItem::IndividualRecovery, 1),
        ];
        let macs = vec![
            ("sw0p2".to_string(), [0x02, 0, 0, 0, 0, 0x02]),
            ("sw0p3".to_string(), [0x02, 0, 0, 0, 0, 0x03]),
        ];
        Self {
            status: status.into_iter().collect(),
            files: HashMap::new(),
            macs: macs.into_iter().collect(),
        }
    }
}

impl MemoryDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&mut self, item: StatusItem, value: i64) {
        self.status.insert(item, value);
    }

    pub fn set_mac(&mut self, ifname: &str, mac: MacAddress) {
        self.macs.insert(ifname.to_string(), mac);
    }

    /// Content of `file` as written so far.
    pub fn file(&self, file: ConfigFile) -> &[u8] {
        self.files.get(&file).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Little-endian word at `offset`, zero where never written.
    pub fn word(&self, file: ConfigFile, offset: usize) -> u32 {
        let mut bytes = [0; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.file(file).get(offset + i).copied().unwrap_or(0);
        }
        u32::from_le_bytes(bytes)
    }
}

impl StatusSource for MemoryDevice {
    fn status(&self, item: StatusItem) -> Result<i64, Error> {
        self.status
            .get(&item)
            .copied()
            .ok_or_else(|| Error::Io(format!("status item {} missing", item.name())))
    }
}

impl ConfigInterface for MemoryDevice {
    fn write(&mut self, file: ConfigFile, bytes: &[u8], offset: u64) -> Result<(), Error> {
        let content = self.files.entry(file).or_default();
        let start = offset as usize;
        if content.len() < start + bytes.len() {
            content.resize(start + bytes.len(), 0);
        }
        content[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn read(&self, file: ConfigFile, size: usize, offset: u64) -> Result<Vec<u8>, Error> {
        let content = self.file(file);
        Ok((0..size)
            .map(|i| content.get(offset as usize + i).copied().unwrap_or(0))
            .collect())
    }
}

impl MacSource for MemoryDevice {
    fn mac_address(&self, ifname: &str) -> Result<MacAddress, Error> {
        self.macs
            .get(ifname)
            .copied()
            .ok_or_else(|| Error::Io(format!("no interface {}", ifname)))
    }
}
