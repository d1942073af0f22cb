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
use crate::hw::words::SchedCommand;
use crate::stream::StreamId;
use crate::Tick;

/// Identifies a schedule entry within its stream. Never reused.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct EntryId(pub(crate) u32);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Timing {
    /// Ingress side: the lookup rule accepts frames between `start` and
    /// `end` of every period.
    Window { start: u32, end: u32 },
    /// Egress side: a frame is sent at `send` of every period.
    Event { send: u32 },
}

/// One timing rule of a stream. All times are in nanoseconds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScheduleEntry {
    pub(crate) id: EntryId,
    pub period: u32,
    pub timing: Timing,
}

impl ScheduleEntry {
    pub fn window(period: u32, start: u32, end: u32) -> Result<Timing, Error> {
        if period == 0 {
            return Err(Error::InvalidArgument("schedule period is zero"));
        }
        if start > period || end > period {
            return Err(Error::InvalidArgument("window not within period"));
        }
        Ok(Timing::Window { start, end })
    }

    pub fn event(period: u32, send: u32) -> Result<Timing, Error> {
        if period == 0 {
            return Err(Error::InvalidArgument("schedule period is zero"));
        }
        if send > period {
            return Err(Error::InvalidArgument("send time not within period"));
        }
        Ok(Timing::Event { send })
    }

    pub fn id(&self) -> EntryId {
        self.id
    }
}

/// Back-reference from a hardware command to the entry it was compiled from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScheduleRef {
    pub stream: StreamId,
    pub entry: EntryId,
}

/// One absolute-cycle schedule table command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FscCommand {
    pub abs_cycle: Tick,
    pub cmd: SchedCommand,
    pub schedule_ref: ScheduleRef,
}

/// Inserts `item` keeping `list` ascending by `abs_cycle`. Equal cycles keep
/// insertion order.
pub fn insert_sorted(list: &mut Vec<FscCommand>, item: FscCommand) {
    let at = list.partition_point(|fsc| fsc.abs_cycle <= item.abs_cycle);
    log::trace!(
        "fsc at tick {} for {:?} goes to position {}",
        item.abs_cycle,
        item.schedule_ref,
        at
    );
    list.insert(at, item);
}
