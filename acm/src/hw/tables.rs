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

//! Encoding of a configuration into the `config_bin` row files.
//!
//! A module's tables are encoded into a `Batch` of positional writes first
//! and handed to the device afterwards.

use crate::bitfield::Word;
use crate::buffers::MessageBuffer;
use crate::config::Configuration;
use crate::device::{ConfigInterface, Device};
use crate::error::{Error, Resource};
use crate::hw::words::*;
use crate::hw::{
    ConfigFile, ALIAS_SIZE, CONST_BUFFER_SIZE, DEFAULT_RULE, DMA_ROWS, LAYER7_SIZE, LOOKUP_RULES,
    LOOKUP_SIZE, REDUNDANCY_ROWS, SCHED_LAST_DELTA, SCHED_MAX_DELTA, SCHED_NOP_DELTA, SCHED_ROWS,
    SCHED_TABLES,
};
use crate::index::GATHER_FORWARD;
use crate::module::{ConnectionMode, ModuleId};
use crate::operation::{OpCode, Operation};
use crate::stream::{Stream, StreamKind};
use crate::Tick;

const WORD: usize = 4;
/// Lock-vector bits per prefetch lock row.
const LOCK_GROUP_BITS: u32 = 16;
const LOCK_GROUPS: u32 = 4;

/// Positional writes collected before they go to the device.
#[derive(Debug, Default)]
pub(crate) struct Batch {
    writes: Vec<(ConfigFile, usize, Vec<u8>)>,
}

impl Batch {
    fn bytes(&mut self, file: ConfigFile, offset: usize, bytes: &[u8]) {
        self.writes.push((file, offset, bytes.to_vec()));
    }

    fn word(&mut self, file: ConfigFile, offset: usize, value: u32) {
        self.bytes(file, offset, &value.to_le_bytes());
    }

    fn words(&mut self, file: ConfigFile, offset: usize, values: &[u32]) {
        let bytes = values
            .iter()
            .flat_map(|value| value.to_le_bytes().to_vec())
            .collect::<Vec<_>>();
        self.bytes(file, offset, &bytes);
    }

    fn commit<D: ConfigInterface>(self, device: &mut D) -> Result<(), Error> {
        for (file, offset, bytes) in self.writes {
            device.write(file, &bytes, offset as u64)?;
        }
        Ok(())
    }
}

pub(crate) fn write_u32<D: ConfigInterface>(
    device: &mut D,
    file: ConfigFile,
    offset: usize,
    value: u32,
) -> Result<(), Error> {
    device.write(file, &value.to_le_bytes(), offset as u64)
}

/// The identifier is stored as a signed word.
pub(crate) fn write_configuration_id<D: ConfigInterface>(
    device: &mut D,
    identifier: u32,
) -> Result<(), Error> {
    device.write(
        ConfigFile::ConfigurationId,
        &(identifier as i32).to_le_bytes(),
        0,
    )
}

pub(crate) fn read_configuration_id<D: ConfigInterface>(device: &D) -> Result<u32, Error> {
    let bytes = device.read(ConfigFile::ConfigurationId, WORD, 0)?;
    let mut word = [0; WORD];
    word.copy_from_slice(&bytes[..WORD]);
    Ok(i32::from_le_bytes(word) as u32)
}

/// Descriptors first, then the name aliases.
pub(crate) fn write_buffers<D: ConfigInterface>(
    device: &mut D,
    buffers: &[MessageBuffer],
) -> Result<(), Error> {
    let mut batch = Batch::default();
    for buffer in buffers {
        let index = buffer.index as usize;
        batch.word(ConfigFile::MsgBuffDesc, index * WORD, buffer.descriptor().pack());
    }
    for buffer in buffers {
        let index = buffer.index as usize;
        batch.bytes(
            ConfigFile::MsgBuffAlias,
            index * ALIAS_SIZE,
            &alias_bytes(buffer.index, &buffer.name),
        );
    }
    batch.commit(device)
}

fn push_delta(rows: &mut Vec<SchedRow>, cmd: SchedCommand, delta: u32) {
    let first = if delta > SCHED_MAX_DELTA {
        SCHED_NOP_DELTA
    } else {
        delta
    };
    rows.push(SchedRow {
        cmd,
        delta: first as u16,
    });
    let mut rest = delta - first;
    while rest > 0 {
        let step = if rest > SCHED_MAX_DELTA {
            SCHED_NOP_DELTA
        } else {
            rest
        };
        rows.push(SchedRow {
            cmd: SchedCommand::nop(),
            delta: step as u16,
        });
        rest -= step;
    }
}

/// Lowers commands, ascending by tick, to table rows. Every row waits
/// `delta` ticks before the next one runs; gaps too long for one row are
/// filled with NOPs.
pub(crate) fn schedule_rows<I>(commands: I) -> Vec<SchedRow>
where
    I: IntoIterator<Item = (Tick, SchedCommand)>,
{
    let mut rows = Vec::new();
    let mut commands = commands.into_iter().peekable();
    if let Some((first, _)) = commands.peek() {
        if *first != 0 {
            push_delta(&mut rows, SchedCommand::nop(), *first);
        }
    }
    while let Some((at, cmd)) = commands.next() {
        match commands.peek() {
            Some((next, _)) => push_delta(&mut rows, cmd, next.saturating_sub(at)),
            None => rows.push(SchedRow {
                cmd,
                delta: SCHED_LAST_DELTA,
            }),
        }
    }
    rows
}

fn padded<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut row = [0; N];
    let len = bytes.len().min(N);
    row[..len].copy_from_slice(&bytes[..len]);
    row
}

impl<D: Device> Configuration<D> {
    fn buffer_index(&self, op: &Operation) -> Result<u32, Error> {
        op.buffer()
            .and_then(|name| self.resolve(name))
            .map(|buffer| buffer.index as u32)
            .ok_or(Error::InternalInconsistency("unresolved message buffer"))
    }

    fn member_streams(&self, id: ModuleId) -> Result<Vec<&Stream>, Error> {
        self.module(id)?
            .streams
            .iter()
            .map(|stream| self.stream(*stream))
            .collect()
    }

    /// Lookup rules, stream triggers and the ingress control registers.
    fn encode_lookup(&self, id: ModuleId, batch: &mut Batch) -> Result<(), Error> {
        let module = self.module(id)?;
        let mid = module.index;
        let mut lookup_enable = 0;
        let mut layer7_enable = 0;
        let mut layer7_length = 0;
        let mut policing = 0;
        for stream in self.member_streams(id)? {
            if !stream.kind.is_ingress() {
                continue;
            }
            let idx = stream.indices.lookup as usize;
            if let Some(lookup) = &stream.lookup {
                let layer7 = mid * LAYER7_SIZE * LOOKUP_RULES + idx * LAYER7_SIZE;
                batch.bytes(
                    ConfigFile::Layer7Mask,
                    layer7,
                    &padded::<LAYER7_SIZE>(&lookup.filter_mask),
                );
                batch.bytes(
                    ConfigFile::Layer7Pattern,
                    layer7,
                    &padded::<LAYER7_SIZE>(&lookup.filter_pattern),
                );
                let rule = mid * LOOKUP_SIZE * LOOKUP_RULES + idx * LOOKUP_SIZE;
                batch.bytes(ConfigFile::LookupMask, rule, &lookup.header_mask);
                batch.bytes(ConfigFile::LookupPattern, rule, &lookup.header);
                if lookup.filter_size() > 0 {
                    layer7_enable |= 1 << idx;
                    layer7_length = layer7_length.max(lookup.filter_size() as u32);
                }
            }
            let child = stream.child.map(|child| self.stream(child)).transpose()?;
            let gather = child.map_or(stream.indices.gather, |child| child.indices.gather);
            let trigger = StreamTrigger {
                valid: true,
                force_drop: false,
                gather: gather as u32,
                scatter: stream.indices.scatter as u32,
                redundancy: stream.indices.redundancy as u32,
            };
            batch.word(
                ConfigFile::StreamTrigger,
                (mid * (LOOKUP_RULES + 1) + idx) * WORD,
                trigger.pack(),
            );
            lookup_enable |= 1 << idx;
            if stream.has_operation(OpCode::Read)
                || child.map_or(false, |child| child.has_operation(OpCode::Insert))
            {
                policing |= 1 << idx;
            }
        }

        let default_rule = match module.mode {
            ConnectionMode::Serial => StreamTrigger {
                valid: true,
                gather: GATHER_FORWARD as u32,
                ..Default::default()
            },
            ConnectionMode::Parallel => StreamTrigger {
                valid: true,
                force_drop: true,
                ..Default::default()
            },
        };
        batch.word(
            ConfigFile::StreamTrigger,
            (mid * (LOOKUP_RULES + 1) + DEFAULT_RULE) * WORD,
            default_rule.pack(),
        );

        let at = mid * WORD;
        batch.word(
            ConfigFile::IngressPolicingControl,
            at,
            control(CONTROL_RULE_MASK, policing),
        );
        batch.word(
            ConfigFile::IngressPolicingEnable,
            at,
            control(CONTROL_RULE_MASK, lookup_enable),
        );
        batch.word(
            ConfigFile::Layer7Enable,
            at,
            control(CONTROL_RULE_MASK, layer7_enable),
        );
        batch.word(
            ConfigFile::Layer7Length,
            at,
            control(CONTROL_LAYER7_LENGTH, layer7_length),
        );
        batch.word(
            ConfigFile::LookupEnable,
            at,
            control(CONTROL_RULE_MASK, lookup_enable),
        );
        Ok(())
    }

    fn encode_scatter(&self, id: ModuleId, batch: &mut Batch) -> Result<(), Error> {
        let mut rows = vec![ScatterCommand::timestamp().pack()];
        for stream in self.member_streams(id)? {
            if !stream.kind.is_ingress() {
                continue;
            }
            let reads = stream
                .operations
                .iter()
                .filter(|op| op.code() == OpCode::Read)
                .collect::<Vec<_>>();
            for (k, op) in reads.iter().enumerate() {
                let row = stream.indices.scatter as usize + k;
                if rows.len() <= row {
                    rows.resize(row + 1, 0);
                }
                rows[row] = ScatterCommand::copy(
                    k + 1 == reads.len(),
                    op.offset() as u32,
                    op.length() as u32,
                    self.buffer_index(op)?,
                )
                .pack();
            }
        }
        if rows.len() > DMA_ROWS {
            return Err(Error::ResourceExhausted(Resource::ScatterRows));
        }
        let mid = self.module(id)?.index;
        batch.words(ConfigFile::ScatterDma, mid * DMA_ROWS * WORD, &rows);
        Ok(())
    }

    /// Gather and prefetch programs, plus the constant buffer the gather
    /// rows read from.
    fn encode_gather(&self, id: ModuleId, batch: &mut Batch) -> Result<(), Error> {
        let nop = PrefetchCommand::Nop.pack();
        let mut gather = vec![0; DMA_ROWS];
        let mut prefetch = vec![0; DMA_ROWS];
        gather[0] = GatherCommand::new(true, GatherOp::MoveFrame, 0, 0).pack();
        prefetch[0] = nop;
        gather[GATHER_FORWARD as usize] = GatherCommand::new(true, GatherOp::Forward, 0, 0).pack();
        prefetch[GATHER_FORWARD as usize] = nop;
        let mut constants = vec![0u8; CONST_BUFFER_SIZE];
        let mut const_used = 0;

        let row = |at: usize| {
            if at < DMA_ROWS {
                Ok(at)
            } else {
                Err(Error::ResourceExhausted(Resource::GatherRows))
            }
        };

        for stream in self.member_streams(id)? {
            let start = stream.indices.gather as usize;
            match stream.kind {
                StreamKind::IngressTriggered => {
                    if stream.has_operation(OpCode::ForwardAll) {
                        gather[row(start)?] =
                            GatherCommand::new(true, GatherOp::Forward, 0, 0).pack();
                    }
                    continue;
                }
                StreamKind::RedundantRx => continue,
                _ => {}
            }
            let dual = stream.kind == StreamKind::RedundantTx;

            let inserts = stream
                .operations
                .iter()
                .filter(|op| op.code() == OpCode::Insert)
                .collect::<Vec<_>>();
            let mut at = start;
            if inserts.is_empty() {
                prefetch[row(at)?] = nop;
            } else {
                let mut vector = 0u64;
                for op in &inserts {
                    vector |= 1u64 << self.buffer_index(op)?;
                }
                for group in 0..LOCK_GROUPS {
                    let bits = (vector >> (group * LOCK_GROUP_BITS)) as u32 & 0xffff;
                    if bits != 0 {
                        prefetch[row(at)?] = PrefetchCommand::Lock {
                            group,
                            dual,
                            vector: bits,
                        }
                        .pack();
                        at += 1;
                    }
                }
                for (k, op) in inserts.iter().enumerate() {
                    prefetch[row(at)?] = PrefetchCommand::Move {
                        last: k + 1 == inserts.len(),
                        irq: false,
                        length: op.length() as u32,
                        msgbuf: self.buffer_index(op)?,
                    }
                    .pack();
                    at += 1;
                }
            }

            let mut at = start;
            let count = stream.operations.len();
            for (k, op) in stream.operations.iter().enumerate() {
                let final_op = k + 1 == count;
                // the R-tag follows the VLAN tag
                let rtag_next = dual && at - start == 2;
                let length = op.length() as u32;
                let command = match op {
                    Operation::InsertConstant { data, .. } => {
                        if const_used + data.len() > CONST_BUFFER_SIZE {
                            return Err(Error::ResourceExhausted(Resource::ConstantBuffer));
                        }
                        constants[const_used..const_used + data.len()].copy_from_slice(data);
                        const_used += data.len();
                        GatherOp::MoveConstant.with(length, (const_used - data.len()) as u32)
                    }
                    Operation::Pad { value, .. } => GatherOp::ConstByte.with(length, *value as u32),
                    Operation::Forward { offset, .. } => {
                        GatherOp::MoveFrame.with(length, *offset as u32)
                    }
                    Operation::Insert { .. } => GatherOp::MovePrefetch.with(0, 0),
                    Operation::Read { .. } | Operation::ForwardAll => continue,
                };
                let mut command = command;
                command.last = final_op && !rtag_next;
                gather[row(at)?] = command.pack();
                at += 1;
                if rtag_next {
                    gather[row(at)?] = GatherCommand::new(final_op, GatherOp::RTag, 0, 0).pack();
                    at += 1;
                }
            }
        }

        let mid = self.module(id)?.index;
        batch.bytes(ConfigFile::ConstBuffer, mid * CONST_BUFFER_SIZE, &constants);
        batch.words(ConfigFile::PrefetchDma, mid * DMA_ROWS * WORD, &prefetch);
        batch.words(ConfigFile::GatherDma, mid * DMA_ROWS * WORD, &gather);
        Ok(())
    }

    fn encode_redundancy(&self, id: ModuleId, batch: &mut Batch) -> Result<(), Error> {
        let mut rows = vec![0; REDUNDANCY_ROWS];
        rows[0] = RedundancyEntry {
            source: SEQ_SRC_INTSEQNUM,
            update: SEQ_UPD_NOP,
            drop_no_rtag: false,
            seq_index: 0,
        }
        .pack();
        for stream in self.member_streams(id)? {
            let idx = stream.indices.redundancy as usize;
            let entry = match stream.kind {
                StreamKind::RedundantTx => RedundancyEntry {
                    source: SEQ_SRC_INTSEQNUM,
                    update: SEQ_UPD_FIN_BOTH,
                    drop_no_rtag: false,
                    seq_index: idx as u32,
                },
                StreamKind::RedundantRx => RedundancyEntry {
                    source: SEQ_SRC_RXSEQNUM,
                    update: SEQ_UPD_MAXNUM,
                    drop_no_rtag: true,
                    seq_index: idx as u32,
                },
                _ => continue,
            };
            *rows
                .get_mut(idx)
                .ok_or(Error::ResourceExhausted(Resource::RedundantStreams))? = entry.pack();
        }
        let mid = self.module(id)?.index;
        batch.words(
            ConfigFile::RedundancyControl,
            mid * REDUNDANCY_ROWS * WORD,
            &rows,
        );
        Ok(())
    }

    fn encode_individual_recovery(&self, id: ModuleId, batch: &mut Batch) -> Result<(), Error> {
        let mut timeouts = vec![0; LOOKUP_RULES];
        for stream in self.member_streams(id)? {
            if stream.kind.is_ingress() {
                if let Some(slot) = timeouts.get_mut(stream.indices.lookup as usize) {
                    *slot = stream.indiv_recov_timeout_ms;
                }
            }
        }
        let mid = self.module(id)?.index;
        batch.words(
            ConfigFile::IndividualRecovery,
            mid * LOOKUP_RULES * WORD,
            &timeouts,
        );
        Ok(())
    }

    /// Encodes every table of one module.
    pub(crate) fn encode_module(&self, id: ModuleId) -> Result<Batch, Error> {
        let module = self.module(id)?;
        let at = module.index * WORD;
        let mut batch = Batch::default();
        self.encode_gather(id, &mut batch)?;
        self.encode_lookup(id, &mut batch)?;
        self.encode_scatter(id, &mut batch)?;
        batch.word(ConfigFile::ConnectionMode, at, module.mode.into());
        self.encode_redundancy(id, &mut batch)?;
        self.encode_individual_recovery(id, &mut batch)?;
        batch.word(ConfigFile::Speed, at, module.speed.into());
        batch.word(ConfigFile::ModuleEnable, at, control(CONTROL_ENABLE, 1));
        Ok(batch)
    }

    pub(crate) fn write_module(&mut self, id: ModuleId) -> Result<(), Error> {
        let batch = self.encode_module(id)?;
        log::debug!("writing {} table rows of module {:?}", batch.writes.len(), id);
        batch.commit(&mut self.device)
    }

    /// Base recovery timeouts of module 0's redundant streams. Written only
    /// when both modules are configured.
    pub(crate) fn write_base_recovery(&mut self) -> Result<(), Error> {
        let primary = match self.bypass {
            [Some(primary), Some(_)] => primary,
            _ => return Ok(()),
        };
        let mut timeouts = vec![0; REDUNDANCY_ROWS];
        for stream in self.member_streams(primary)? {
            if stream.kind.is_redundant() {
                if let Some(slot) = timeouts.get_mut(stream.indices.redundancy as usize) {
                    *slot = self.settings.recovery_timeout_ms;
                }
            }
        }
        let mut batch = Batch::default();
        batch.words(ConfigFile::BaseRecovery, 0, &timeouts);
        batch.commit(&mut self.device)
    }

    /// Writes the module's schedule into a free table together with its
    /// cycle and start time.
    pub(crate) fn write_schedule(&mut self, id: ModuleId) -> Result<(), Error> {
        let module = self.module(id)?;
        let mid = module.index;
        let status = self.device.read(
            ConfigFile::TableStatus,
            SCHED_TABLES * TableStatus::SIZE,
            (mid * SCHED_TABLES * TableStatus::SIZE) as u64,
        )?;
        let table = status
            .chunks(TableStatus::SIZE)
            .map(|bits| TableStatus::from_bits(u16::from_le_bytes([bits[0], bits[1]])))
            .position(|status| status.is_free())
            .ok_or(Error::NoFreeScheduleTable)?;

        let commands = module
            .fsc
            .iter()
            .map(|fsc| Ok((fsc.abs_cycle, self.update_fsc_indexes(fsc)?)))
            .collect::<Result<Vec<_>, Error>>()?;
        let rows = schedule_rows(commands);
        if rows.len() > SCHED_ROWS {
            return Err(Error::ResourceExhausted(Resource::ScheduleEvents));
        }
        let bytes = rows
            .iter()
            .flat_map(|row| row.to_bytes().to_vec())
            .collect::<Vec<_>>();
        let slot = mid * SCHED_TABLES + table;
        let cycle = cycle_time_bytes(module.cycle_ns);
        let start = start_time_bytes(module.start.timestamp(), module.start.timestamp_subsec_nanos() as i32);
        log::debug!(
            "module {:?}: {} schedule rows into table {}",
            id,
            rows.len(),
            table
        );

        let mut batch = Batch::default();
        batch.bytes(ConfigFile::SchedTabRow, slot * SCHED_ROWS * SchedRow::SIZE, &bytes);
        batch.bytes(ConfigFile::SchedCycleTime, slot * cycle.len(), &cycle);
        batch.bytes(ConfigFile::SchedStartTable, slot * start.len(), &start);
        batch.word(ConfigFile::EmergencyDisable, mid * WORD, 0);
        batch.commit(&mut self.device)
    }
}

impl GatherOp {
    fn with(self, length: u32, data: u32) -> GatherCommand {
        GatherCommand::new(false, self, length, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;
    use crate::module::Speed;
    use crate::settings::Settings;
    use crate::stream::Lookup;
    use chrono::{TimeZone, Utc};

    fn ticks(rows: &[SchedRow]) -> Vec<(u16, bool)> {
        rows.iter()
            .map(|row| (row.delta, row.cmd == SchedCommand::nop()))
            .collect()
    }

    #[test]
    fn rows_wait_for_the_next_command() {
        let open = SchedCommand::open_window(1);
        let rows = schedule_rows(vec![(0, open), (100, open), (108, open)]);
        assert_eq!(ticks(&rows), vec![(100, false), (8, false), (8, false)]);

        let rows = schedule_rows(vec![(20, open), (200_000, open)]);
        assert_eq!(
            ticks(&rows),
            vec![
                (20, true),
                (60000, false),
                (60000, true),
                (60000, true),
                (19980, true),
                (8, false)
            ]
        );
        assert!(schedule_rows(vec![]).is_empty());
    }

    fn module(config: &mut Configuration<MemoryDevice>, mode: ConnectionMode) -> ModuleId {
        let module = config.create_module(mode, Speed::Speed1G, 1).unwrap();
        config
            .set_module_schedule(module, 1_000_000, Utc.timestamp(7, 9))
            .unwrap();
        module
    }

    #[test]
    fn time_triggered_program() {
        let mut config = Configuration::new(MemoryDevice::new(), Settings::default());
        let m = module(&mut config, ConnectionMode::Parallel);
        let tt = config
            .create_time_triggered_stream([1, 2, 3, 4, 5, 6], [0; 6], 10, 0)
            .unwrap();
        config
            .add_operation(tt, Operation::insert(8, "acm_tx").unwrap())
            .unwrap();
        config.add_operation(tt, Operation::pad(40, 0xaa).unwrap()).unwrap();
        config.add_module_stream(m, tt).unwrap();
        config.add_module(m).unwrap();
        config.write_module(m).unwrap();

        let device = config.device();
        let base = DMA_ROWS * WORD;
        let gather = |row: usize| GatherCommand::unpack(device.word(ConfigFile::GatherDma, base + row * WORD));
        let prefetch = |row: usize| PrefetchCommand::unpack(device.word(ConfigFile::PrefetchDma, base + row * WORD));
        assert_eq!(gather(2), GatherCommand::new(false, GatherOp::MoveConstant, 6, 0));
        // placeholder resolved to the sw0p3 address
        assert_eq!(gather(3), GatherCommand::new(false, GatherOp::MoveConstant, 6, 6));
        assert_eq!(gather(4), GatherCommand::new(false, GatherOp::MoveConstant, 4, 12));
        assert_eq!(gather(5), GatherCommand::new(false, GatherOp::MovePrefetch, 0, 0));
        assert_eq!(gather(6), GatherCommand::new(true, GatherOp::ConstByte, 40, 0xaa));
        assert_eq!(
            prefetch(2),
            PrefetchCommand::Lock {
                group: 0,
                dual: false,
                vector: 1
            }
        );
        assert_eq!(
            prefetch(3),
            PrefetchCommand::Move {
                last: true,
                irq: false,
                length: 8,
                msgbuf: 0
            }
        );
        let constants = &device.file(ConfigFile::ConstBuffer)[CONST_BUFFER_SIZE..];
        assert_eq!(&constants[..16], &[1, 2, 3, 4, 5, 6, 2, 0, 0, 0, 0, 3, 0x81, 0, 0, 10][..]);
        // parallel modules drop unmatched frames
        let default = StreamTrigger::unpack(device.word(
            ConfigFile::StreamTrigger,
            (LOOKUP_RULES + 1 + DEFAULT_RULE) * WORD,
        ));
        assert!(default.valid && default.force_drop);
        assert_eq!(device.word(ConfigFile::ModuleEnable, WORD), 1);
    }

    #[test]
    fn ingress_program() {
        let mut config = Configuration::new(MemoryDevice::new(), Settings::default());
        let m = module(&mut config, ConnectionMode::Serial);
        let lookup = Lookup::new(
            [0xaa; LOOKUP_SIZE],
            [0xff; LOOKUP_SIZE],
            Some((&[1, 2, 3][..], &[0xff, 0xff, 0xff][..])),
        )
        .unwrap();
        let ingress = config.create_ingress_triggered_stream(lookup).unwrap();
        config
            .add_operation(ingress, Operation::read(14, 20, "acm_a").unwrap())
            .unwrap();
        config
            .add_operation(ingress, Operation::read(40, 8, "acm_b").unwrap())
            .unwrap();
        config.set_indiv_recov(ingress, 250).unwrap();
        config.add_module_stream(m, ingress).unwrap();
        config.add_module(m).unwrap();
        config.validate_config(false).unwrap();
        config.write_module(m).unwrap();

        let device = config.device();
        let scatter = |row: usize| {
            ScatterCommand::unpack(device.word(ConfigFile::ScatterDma, (DMA_ROWS + row) * WORD))
        };
        assert_eq!(scatter(0), ScatterCommand::timestamp());
        assert_eq!(scatter(1), ScatterCommand::copy(false, 14, 20, 0));
        assert_eq!(scatter(2), ScatterCommand::copy(true, 40, 8, 1));
        let trigger = StreamTrigger::unpack(device.word(ConfigFile::StreamTrigger, (LOOKUP_RULES + 1) * WORD));
        assert_eq!((trigger.valid, trigger.scatter, trigger.gather), (true, 1, 0));
        assert_eq!(device.word(ConfigFile::LookupEnable, WORD), 1);
        assert_eq!(device.word(ConfigFile::Layer7Enable, WORD), 1);
        assert_eq!(device.word(ConfigFile::Layer7Length, WORD), 3);
        assert_eq!(device.word(ConfigFile::IngressPolicingControl, WORD), 1);
        assert_eq!(device.word(ConfigFile::IndividualRecovery, LOOKUP_RULES * WORD), 250);
        let layer7 = device.file(ConfigFile::Layer7Pattern);
        assert_eq!(&layer7[LAYER7_SIZE * LOOKUP_RULES..][..4], &[1, 2, 3, 0][..]);
        // serial modules forward unmatched frames
        let default = StreamTrigger::unpack(device.word(
            ConfigFile::StreamTrigger,
            (LOOKUP_RULES + 1 + DEFAULT_RULE) * WORD,
        ));
        assert_eq!((default.force_drop, default.gather), (false, 1));
    }

    #[test]
    fn schedule_goes_to_a_free_table() {
        let mut config = Configuration::new(MemoryDevice::new(), Settings::default());
        let m = module(&mut config, ConnectionMode::Parallel);
        config.add_module(m).unwrap();
        // module 1, table 0 busy
        config
            .device_mut()
            .write(ConfigFile::TableStatus, &[0x2, 0, 0, 0], 4)
            .unwrap();
        config.write_schedule(m).unwrap();
        let device = config.device();
        let cycle = &device.file(ConfigFile::SchedCycleTime)[3 * 8..];
        assert_eq!(&cycle[4..8], &1_000_000u32.to_le_bytes()[..]);
        let start = &device.file(ConfigFile::SchedStartTable)[3 * 12..];
        assert_eq!(&start[..8], &7i64.to_le_bytes()[..]);
        assert_eq!(&start[8..12], &9i32.to_le_bytes()[..]);

        config
            .device_mut()
            .write(ConfigFile::TableStatus, &[0x1, 0, 0x2, 0], 4)
            .unwrap();
        assert_eq!(config.write_schedule(m), Err(Error::NoFreeScheduleTable));
    }
}
