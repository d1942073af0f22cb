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

use crate::error::Error;
use crate::hw::MODULE_COUNT;
use crate::schedule::FscCommand;
use crate::settings::LinkDelays;
use crate::stream::StreamId;
use chrono::{DateTime, TimeZone, Utc};

/// Handle of a module in its configuration.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ModuleId(pub(crate) usize);

/// How the bypass module is wired to the switch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionMode {
    Serial = 0,
    Parallel = 1,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Speed {
    Speed100M = 0,
    Speed1G = 1,
}

impl From<ConnectionMode> for u32 {
    fn from(mode: ConnectionMode) -> u32 {
        mode as u32
    }
}

impl From<Speed> for u32 {
    fn from(speed: Speed) -> u32 {
        speed as u32
    }
}

/// One bypass module: a stream collection sharing a schedule cycle and a
/// set of hardware tables.
#[derive(Clone, Debug)]
pub struct Module {
    pub(crate) index: usize,
    pub(crate) mode: ConnectionMode,
    pub(crate) speed: Speed,
    pub(crate) delays: LinkDelays,
    pub(crate) cycle_ns: u32,
    pub(crate) start: DateTime<Utc>,
    pub(crate) streams: Vec<StreamId>,
    pub(crate) fsc: Vec<FscCommand>,
}

impl Module {
    pub(crate) fn new(
        mode: ConnectionMode,
        speed: Speed,
        index: usize,
        delays: LinkDelays,
    ) -> Result<Self, Error> {
        if index >= MODULE_COUNT {
            return Err(Error::InvalidArgument("module id out of range"));
        }
        Ok(Self {
            index,
            mode,
            speed,
            delays,
            cycle_ns: 0,
            start: Utc.timestamp(0, 0),
            streams: Vec::new(),
            fsc: Vec::new(),
        })
    }

    /// Hardware module number, 0 or 1.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub fn speed(&self) -> Speed {
        self.speed
    }

    pub fn delays(&self) -> &LinkDelays {
        &self.delays
    }

    pub fn cycle_ns(&self) -> u32 {
        self.cycle_ns
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Member streams in insertion order.
    pub fn streams(&self) -> &[StreamId] {
        &self.streams
    }

    /// The compiled schedule, ascending by tick.
    pub fn fsc_commands(&self) -> &[FscCommand] {
        &self.fsc
    }

    pub(crate) fn set_schedule(&mut self, cycle_ns: u32, start: DateTime<Utc>) -> Result<(), Error> {
        if cycle_ns == 0 {
            return Err(Error::InvalidArgument("cycle time must be greater than 0"));
        }
        self.cycle_ns = cycle_ns;
        self.start = start;
        Ok(())
    }

    /// Switch port the bypass sits on.
    pub fn port_name(&self) -> &'static str {
        match self.index {
            0 => "sw0p2",
            _ => "sw0p3",
        }
    }

    pub(crate) fn remove_fsc_of(&mut self, stream: StreamId) {
        self.fsc.retain(|fsc| fsc.schedule_ref.stream != stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Delays;

    #[test]
    fn module_ids_and_cycle() {
        let delays = Delays::default().speed_1g;
        assert!(Module::new(ConnectionMode::Serial, Speed::Speed1G, 2, delays).is_err());
        let mut module = Module::new(ConnectionMode::Parallel, Speed::Speed1G, 1, delays).unwrap();
        assert_eq!(module.port_name(), "sw0p3");
        assert_eq!(module.cycle_ns(), 0);
        assert!(module.set_schedule(0, Utc.timestamp(5, 0)).is_err());
        module.set_schedule(1_000_000, Utc.timestamp(5, 7)).unwrap();
        assert_eq!(module.cycle_ns(), 1_000_000);
        assert_eq!(module.start().timestamp_subsec_nanos(), 7);
        assert_eq!(u32::from(ConnectionMode::Parallel), 1);
        assert_eq!(u32::from(Speed::Speed100M), 0);
    }
}
