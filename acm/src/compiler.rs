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

//! Schedule compilation.
//!
//! A schedule entry expands into absolute ticks of one module cycle, which
//! are merged into the module's command list. The command words carry the
//! stream indices current at compile time; `update_fsc_indexes` rewrites
//! them from the final indices just before the table is written.

use crate::config::Configuration;
use crate::device::Device;
use crate::error::Error;
use crate::hw::words::{SchedCommand, Trigger};
use crate::module::{ConnectionMode, Module, ModuleId};
use crate::schedule::{insert_sorted, EntryId, FscCommand, ScheduleRef, Timing};
use crate::settings::LinkDelays;
use crate::stream::{StreamId, StreamKind};
use crate::Tick;

/// What a compiled tick does.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Edge {
    Open,
    Close,
    Fire,
}

/// The module parameters a schedule expands against.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timebase {
    pub cycle_ns: u32,
    pub tick_ns: u32,
    pub mode: ConnectionMode,
    pub delays: LinkDelays,
}

impl Timebase {
    pub fn of(module: &Module, tick_ns: u32) -> Self {
        Self {
            cycle_ns: module.cycle_ns,
            tick_ns,
            mode: module.mode,
            delays: module.delays,
        }
    }

    fn cycle_ticks(&self) -> i64 {
        self.cycle_ns as i64 / self.tick_ns as i64
    }

    fn wrap(&self, tick: i64) -> Tick {
        let cycle = self.cycle_ticks();
        let tick = if tick >= cycle { tick - cycle } else { tick };
        tick as Tick
    }

    fn occurrences(&self, period: u32) -> Result<i64, Error> {
        if period == 0 {
            return Err(Error::InvalidArgument("schedule period is zero"));
        }
        Ok(self.cycle_ns as i64 / period as i64)
    }
}

/// Sends at `send` of every period, early by the egress path delay.
/// Occurrences that would fall before the cycle start move to its end.
pub fn expand_event(base: &Timebase, period: u32, send: u32) -> Result<Vec<(Tick, Edge)>, Error> {
    let mut count = base.occurrences(period)?;
    let delay = (base.delays.chip_eg + base.delays.phy_eg) as i64;
    let tick = base.tick_ns as i64;
    let mut ticks = Vec::new();
    let mut i = 0;
    while i < count {
        let time = send as i64 + i * period as i64 - delay;
        i += 1;
        if time < 0 {
            count += 1;
            continue;
        }
        // nearest tick
        let at = num::Integer::div_floor(&(2 * time + tick), &(2 * tick));
        ticks.push((base.wrap(at), Edge::Fire));
    }
    Ok(ticks)
}

/// Opens the lookup rule at `start` and closes it at `end` of every period,
/// late by the ingress path delay. A close within one tick of the next
/// open is merged away with that open.
pub fn expand_window(
    base: &Timebase,
    period: u32,
    start: u32,
    end: u32,
) -> Result<Vec<(Tick, Edge)>, Error> {
    let count = base.occurrences(period)? as usize;
    let delays = &base.delays;
    let ingress = (delays.chip_in + delays.phy_in) as i64;
    let serial = match base.mode {
        ConnectionMode::Serial => delays.ser_switch as i64,
        ConnectionMode::Parallel => 0,
    };
    let tick = base.tick_ns as i64;
    let mut opens = Vec::with_capacity(count);
    let mut closes = Vec::with_capacity(count);
    for i in 0..count as i64 {
        let offset = i * period as i64;
        let open = num::Integer::div_floor(&(start as i64 + offset + ingress + serial), &tick);
        let close = num::Integer::div_ceil(&(end as i64 + offset + ingress), &tick);
        opens.push(Some(open));
        closes.push(Some(close));
    }
    let first_open = opens.first().copied().flatten();
    // the last close meets the first open of the next cycle
    for i in 0..count {
        let (next, shift) = if i + 1 < count {
            (i + 1, 0)
        } else {
            (0, base.cycle_ticks())
        };
        if let (Some(close), Some(open)) = (closes[i], opens[next]) {
            if open - (close - shift) <= 1 {
                log::trace!("merging window close {} with open {}", close, open);
                closes[i] = None;
                opens[next] = None;
            }
        }
    }
    if closes.iter().all(Option::is_none) {
        // windows tile the cycle, the rule stays open
        return Ok(first_open
            .map(|open| vec![(base.wrap(open), Edge::Open)])
            .unwrap_or_default());
    }
    let mut ticks = Vec::with_capacity(2 * count);
    for (open, close) in opens.into_iter().zip(closes) {
        if let Some(open) = open {
            ticks.push((base.wrap(open), Edge::Open));
        }
        if let Some(close) = close {
            ticks.push((base.wrap(close), Edge::Close));
        }
    }
    Ok(ticks)
}

impl<D: Device> Configuration<D> {
    /// Gather index of the recovery stream behind an ingress stream's
    /// event child, if the chain is complete.
    fn recovery_gather(&self, stream: StreamId) -> Result<Option<u16>, Error> {
        let event = match self.stream(stream)?.child {
            Some(event) => self.stream(event)?,
            None => return Ok(None),
        };
        match event.child {
            Some(recovery) => Ok(Some(self.stream(recovery)?.indices.gather)),
            None => Ok(None),
        }
    }

    /// Expands one schedule entry into its module's command list.
    pub(crate) fn compile_entry(&mut self, id: StreamId, entry: EntryId) -> Result<(), Error> {
        let stream = self.stream(id)?;
        let module_id = stream
            .module
            .ok_or(Error::InternalInconsistency("compiling a stream outside a module"))?;
        let schedule = *stream
            .schedule(entry)
            .ok_or(Error::InvalidArgument("no such schedule entry"))?;
        let base = Timebase::of(self.module(module_id)?, self.tick_ns()?);
        let indices = stream.indices;
        let ingress = stream.kind.is_ingress();
        let commands = match schedule.timing {
            Timing::Event { send } => {
                if ingress {
                    return Err(Error::PermissionDenied("event schedule on an ingress stream"));
                }
                let redundancy = match stream.kind {
                    StreamKind::RedundantTx => indices.redundancy as u32,
                    _ => 0,
                };
                let fire = SchedCommand::fire(indices.gather as u32, redundancy);
                expand_event(&base, schedule.period, send)?
                    .into_iter()
                    .map(|(tick, _)| (tick, fire))
                    .collect::<Vec<_>>()
            }
            Timing::Window { start, end } => {
                if !ingress {
                    return Err(Error::PermissionDenied("window schedule on an egress stream"));
                }
                let rule = indices.lookup as u32;
                let open = SchedCommand::open_window(rule);
                let close = match self.recovery_gather(id)? {
                    Some(gather) => SchedCommand::close_window(rule, gather as u32, Trigger::FirstStage),
                    None => SchedCommand::close_window(rule, 0, Trigger::NoTrigger),
                };
                expand_window(&base, schedule.period, start, end)?
                    .into_iter()
                    .map(|(tick, edge)| match edge {
                        Edge::Open => (tick, open),
                        _ => (tick, close),
                    })
                    .collect::<Vec<_>>()
            }
        };
        log::debug!(
            "entry {:?} of {:?} compiles to {} commands",
            entry,
            id,
            commands.len()
        );
        let fsc = &mut self.module_mut(module_id)?.fsc;
        for (abs_cycle, cmd) in commands {
            insert_sorted(
                fsc,
                FscCommand {
                    abs_cycle,
                    cmd,
                    schedule_ref: ScheduleRef { stream: id, entry },
                },
            );
        }
        Ok(())
    }

    /// Compiles every schedule entry of a member stream.
    pub(crate) fn compile_stream(&mut self, id: StreamId) -> Result<(), Error> {
        let entries = self
            .stream(id)?
            .schedules
            .iter()
            .map(|entry| entry.id)
            .collect::<Vec<_>>();
        for entry in entries {
            self.compile_entry(id, entry)?;
        }
        Ok(())
    }

    /// Recomputes all indices and rebuilds the command list of every
    /// attached module from scratch.
    pub(crate) fn recompile(&mut self) -> Result<(), Error> {
        let attached = self.attached().map(|(id, _)| id).collect::<Vec<ModuleId>>();
        for module in &attached {
            self.recalc_all(*module)?;
        }
        for module in &attached {
            self.module_mut(*module)?.fsc.clear();
            for stream in self.module(*module)?.streams.clone() {
                self.compile_stream(stream)?;
            }
        }
        Ok(())
    }

    /// The command word of `fsc` with its index fields taken from the
    /// stream it was compiled from.
    pub fn update_fsc_indexes(&self, fsc: &FscCommand) -> Result<SchedCommand, Error> {
        let stream = self
            .stream(fsc.schedule_ref.stream)
            .map_err(|_| Error::InternalInconsistency("command without a stream"))?;
        if stream.schedule(fsc.schedule_ref.entry).is_none() {
            return Err(Error::InternalInconsistency("command without a schedule entry"));
        }
        let indices = stream.indices;
        let mut cmd = fsc.cmd;
        match cmd.trigger {
            Trigger::NoTrigger => {
                cmd.dma_index = 0;
                cmd.rule = indices.lookup as u32;
                cmd.redundancy = 0;
            }
            Trigger::StandAlone => {
                cmd.dma_index = indices.gather as u32;
                cmd.rule = 0;
                cmd.redundancy = match stream.kind {
                    StreamKind::RedundantTx => indices.redundancy as u32,
                    _ => 0,
                };
            }
            Trigger::FirstStage => {
                let event = stream
                    .child
                    .ok_or(Error::InternalInconsistency("ingress stream misses event stream"))?;
                let recovery = self
                    .stream(event)?
                    .child
                    .ok_or(Error::InternalInconsistency("event stream misses recovery stream"))?;
                cmd.dma_index = self.stream(recovery)?.indices.gather as u32;
                cmd.rule = indices.lookup as u32;
                cmd.redundancy = 0;
            }
            Trigger::Reserved => {
                log::error!("unknown trigger in command at tick {}", fsc.abs_cycle);
                return Err(Error::InternalInconsistency("unknown trigger type"));
            }
        }
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitfield::Word;
    use crate::settings::Delays;
    use crate::stream::Stream;

    fn base(cycle_ns: u32, mode: ConnectionMode) -> Timebase {
        Timebase {
            cycle_ns,
            tick_ns: 80,
            mode,
            delays: Delays::default().speed_1g,
        }
    }

    #[test]
    fn window_occurrences() {
        let base = base(10_000, ConnectionMode::Parallel);
        let ticks = expand_window(&base, 2000, 1500, 1900).unwrap();
        let mut list = Vec::new();
        for (tick, edge) in ticks {
            let cmd = match edge {
                Edge::Open => SchedCommand::open_window(12),
                _ => SchedCommand::close_window(12, 0, Trigger::NoTrigger),
            };
            insert_sorted(
                &mut list,
                FscCommand {
                    abs_cycle: tick,
                    cmd,
                    schedule_ref: ScheduleRef {
                        stream: StreamId(0),
                        entry: EntryId(0),
                    },
                },
            );
        }
        let at = list.iter().map(|fsc| fsc.abs_cycle).collect::<Vec<_>>();
        assert_eq!(at, vec![4, 23, 29, 48, 54, 73, 79, 98, 104, 123]);
        let words = list.iter().map(|fsc| fsc.cmd.pack()).collect::<Vec<_>>();
        for pair in words.chunks(2) {
            assert_eq!(pair, &[134414336, 268632064][..]);
        }
    }

    #[test]
    fn serial_delays_open_only() {
        let parallel = expand_window(&base(10_000, ConnectionMode::Parallel), 10_000, 1500, 1900).unwrap();
        let serial = expand_window(&base(10_000, ConnectionMode::Serial), 10_000, 1500, 1900).unwrap();
        // (1500 + 348 + 940) / 80
        assert_eq!(serial[0], (34, Edge::Open));
        assert_eq!(serial[1], parallel[1]);
    }

    #[test]
    fn back_to_back_windows_merge() {
        // each close lands on the next open
        let ticks = expand_window(&base(8000, ConnectionMode::Parallel), 2000, 0, 2000).unwrap();
        assert_eq!(ticks, vec![(4, Edge::Open)]);
        let ticks = expand_window(&base(10_000, ConnectionMode::Parallel), 10_000, 0, 10_000).unwrap();
        assert_eq!(ticks, vec![(4, Edge::Open)]);
        let ticks = expand_window(&base(8000, ConnectionMode::Parallel), 2000, 400, 1990).unwrap();
        assert_eq!(ticks.len(), 8);
    }

    #[test]
    fn events_wrap_before_cycle_start() {
        let base = base(10_000, ConnectionMode::Parallel);
        // 319 ns of egress delay
        let ticks = expand_event(&base, 5000, 100).unwrap();
        assert_eq!(ticks, vec![(60, Edge::Fire), (122, Edge::Fire)]);
        let ticks = expand_event(&base, 5000, 1000).unwrap();
        assert_eq!(ticks, vec![(9, Edge::Fire), (71, Edge::Fire)]);
        assert!(expand_event(&base, 0, 0).is_err());
    }

    #[test]
    fn non_dividing_period_drops_the_tail() {
        let base = base(10_000, ConnectionMode::Parallel);
        assert_eq!(expand_event(&base, 3000, 1000).unwrap().len(), 3);
        assert_eq!(expand_window(&base, 3000, 100, 200).unwrap().len(), 6);
    }

    #[test]
    fn fixup_errors() {
        use crate::device::MemoryDevice;
        use crate::settings::Settings;
        let mut config = Configuration::new(MemoryDevice::new(), Settings::default());
        let mut ingress = Stream::new(StreamKind::IngressTriggered, None);
        let entry = ingress.push_schedule(1000, Timing::Window { start: 0, end: 10 });
        ingress.indices.lookup = 3;
        config.streams.push(Some(ingress));
        let fsc = |cmd, entry| FscCommand {
            abs_cycle: 0,
            cmd,
            schedule_ref: ScheduleRef {
                stream: StreamId(0),
                entry,
            },
        };
        let first_stage = SchedCommand::close_window(9, 9, Trigger::FirstStage);
        assert_eq!(
            config.update_fsc_indexes(&fsc(first_stage, entry)),
            Err(Error::InternalInconsistency("ingress stream misses event stream"))
        );
        assert!(config
            .update_fsc_indexes(&fsc(SchedCommand::open_window(0), EntryId(7)))
            .is_err());
        let mut reserved = SchedCommand::nop();
        reserved.trigger = Trigger::Reserved;
        assert!(config.update_fsc_indexes(&fsc(reserved, entry)).is_err());
        let close = config
            .update_fsc_indexes(&fsc(SchedCommand::close_window(0, 5, Trigger::NoTrigger), entry))
            .unwrap();
        assert_eq!((close.rule, close.dma_index, close.close), (3, 0, true));
    }
}
