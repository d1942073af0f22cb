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

//! Bit layouts of the words the driver accepts.
//!
//! Every word type packs to and unpacks from a little-endian `u32`; bit
//! positions are those of the driver's `acmdrv.h`.

use crate::bitfield::{Field, Word};
use crate::hw::ALIAS_SIZE;
use crate::operation::MAX_NAME_SIZE;

/// How a schedule command starts the gather engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Trigger {
    NoTrigger = 0,
    StandAlone = 1,
    FirstStage = 2,
    /// Not produced by the compiler.
    Reserved = 3,
}

impl Default for Trigger {
    fn default() -> Self {
        Self::NoTrigger
    }
}

impl From<u32> for Trigger {
    fn from(bits: u32) -> Self {
        match bits & 0x3 {
            0 => Self::NoTrigger,
            1 => Self::StandAlone,
            2 => Self::FirstStage,
            _ => Self::Reserved,
        }
    }
}

/// A schedule table command.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SchedCommand {
    pub dma_index: u32,
    pub rule: u32,
    pub redundancy: u32,
    pub trigger: Trigger,
    pub close: bool,
    pub open: bool,
    pub ngn_disable: bool,
    pub ngn_enable: bool,
}

impl SchedCommand {
    const DMA_INDEX: Field = Field::new(0, 8);
    const RULE: Field = Field::new(14, 18);
    const REDUNDANCY: Field = Field::new(19, 23);
    const TRIGGER: Field = Field::new(25, 26);
    const CLOSE: Field = Field::bit(27);
    const OPEN: Field = Field::bit(28);
    const NGN_DISABLE: Field = Field::bit(29);
    const NGN_ENABLE: Field = Field::bit(30);

    /// Fires the gather engine at `dma_index`.
    pub fn fire(dma_index: u32, redundancy: u32) -> Self {
        Self {
            dma_index,
            redundancy,
            trigger: Trigger::StandAlone,
            ..Default::default()
        }
    }

    pub fn open_window(rule: u32) -> Self {
        Self {
            rule,
            open: true,
            ..Default::default()
        }
    }

    /// Closes the window of `rule`; a first-stage close also fires the
    /// recovery frame at `dma_index`.
    pub fn close_window(rule: u32, dma_index: u32, trigger: Trigger) -> Self {
        Self {
            dma_index,
            rule,
            trigger,
            close: true,
            ..Default::default()
        }
    }

    pub fn nop() -> Self {
        Self::default()
    }
}

impl Word for SchedCommand {
    fn pack(&self) -> u32 {
        let mut word = 0;
        Self::DMA_INDEX.store(&mut word, self.dma_index);
        Self::RULE.store(&mut word, self.rule);
        Self::REDUNDANCY.store(&mut word, self.redundancy);
        Self::TRIGGER.store(&mut word, self.trigger as u32);
        Self::CLOSE.set_flag(&mut word, self.close);
        Self::OPEN.set_flag(&mut word, self.open);
        Self::NGN_DISABLE.set_flag(&mut word, self.ngn_disable);
        Self::NGN_ENABLE.set_flag(&mut word, self.ngn_enable);
        word
    }

    fn unpack(word: u32) -> Self {
        Self {
            dma_index: Self::DMA_INDEX.load(word),
            rule: Self::RULE.load(word),
            redundancy: Self::REDUNDANCY.load(word),
            trigger: Trigger::from(Self::TRIGGER.load(word)),
            close: Self::CLOSE.flag(word),
            open: Self::OPEN.flag(word),
            ngn_disable: Self::NGN_DISABLE.flag(word),
            ngn_enable: Self::NGN_ENABLE.flag(word),
        }
    }
}

/// Stream trigger rule: what happens when a lookup rule matches.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StreamTrigger {
    pub valid: bool,
    pub force_drop: bool,
    pub gather: u32,
    pub scatter: u32,
    pub redundancy: u32,
}

impl StreamTrigger {
    const VALID: Field = Field::bit(0);
    const FORCE_DROP: Field = Field::bit(3);
    const GATHER: Field = Field::new(8, 15);
    const SCATTER: Field = Field::new(17, 24);
    const REDUNDANCY: Field = Field::new(26, 30);
}

impl Word for StreamTrigger {
    fn pack(&self) -> u32 {
        let mut word = 0;
        Self::VALID.set_flag(&mut word, self.valid);
        Self::FORCE_DROP.set_flag(&mut word, self.force_drop);
        Self::GATHER.store(&mut word, self.gather);
        Self::SCATTER.store(&mut word, self.scatter);
        Self::REDUNDANCY.store(&mut word, self.redundancy);
        word
    }

    fn unpack(word: u32) -> Self {
        Self {
            valid: Self::VALID.flag(word),
            force_drop: Self::FORCE_DROP.flag(word),
            gather: Self::GATHER.load(word),
            scatter: Self::SCATTER.load(word),
            redundancy: Self::REDUNDANCY.load(word),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScatterOp {
    Invalid = 0,
    Move = 1,
    MoveWithTimestamp = 2,
}

/// One scatter DMA row: copies received bytes into a message buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScatterCommand {
    pub last: bool,
    pub op: ScatterOp,
    pub irq: bool,
    pub offset: u32,
    pub length: u32,
    pub msgbuf: u32,
}

impl ScatterCommand {
    const LAST: Field = Field::bit(0);
    const OP: Field = Field::new(1, 2);
    const IRQ: Field = Field::bit(3);
    const OFFSET: Field = Field::new(4, 14);
    const LENGTH: Field = Field::new(15, 25);
    const MSGBUF: Field = Field::new(26, 30);

    /// Row 0 of every module; stores the receive timestamp.
    pub fn timestamp() -> Self {
        Self {
            last: true,
            op: ScatterOp::MoveWithTimestamp,
            irq: false,
            offset: 0,
            length: 0,
            msgbuf: 0,
        }
    }

    /// Copies `length` received bytes at `offset`, timestamped.
    pub fn copy(last: bool, offset: u32, length: u32, msgbuf: u32) -> Self {
        Self {
            last,
            op: ScatterOp::MoveWithTimestamp,
            irq: false,
            offset,
            length,
            msgbuf,
        }
    }
}

impl Word for ScatterCommand {
    fn pack(&self) -> u32 {
        let mut word = 0;
        Self::LAST.set_flag(&mut word, self.last);
        Self::OP.store(&mut word, self.op as u32);
        Self::IRQ.set_flag(&mut word, self.irq);
        Self::OFFSET.store(&mut word, self.offset);
        Self::LENGTH.store(&mut word, self.length);
        Self::MSGBUF.store(&mut word, self.msgbuf);
        word
    }

    fn unpack(word: u32) -> Self {
        let op = match Self::OP.load(word) {
            1 => ScatterOp::Move,
            2 => ScatterOp::MoveWithTimestamp,
            _ => ScatterOp::Invalid,
        };
        Self {
            last: Self::LAST.flag(word),
            op,
            irq: Self::IRQ.flag(word),
            offset: Self::OFFSET.load(word),
            length: Self::LENGTH.load(word),
            msgbuf: Self::MSGBUF.load(word),
        }
    }
}

/// Prefetch DMA row. The move and lock forms share bits, so which fields
/// are meaningful depends on `op`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PrefetchCommand {
    Invalid,
    Nop,
    Move {
        last: bool,
        irq: bool,
        length: u32,
        msgbuf: u32,
    },
    Lock {
        group: u32,
        dual: bool,
        vector: u32,
    },
}

impl PrefetchCommand {
    const LAST: Field = Field::bit(0);
    const OP: Field = Field::new(1, 2);
    const IRQ: Field = Field::bit(4);
    const LENGTH: Field = Field::new(5, 15);
    const GROUP: Field = Field::new(8, 9);
    const DUAL: Field = Field::bit(12);
    const MSGBUF: Field = Field::new(16, 20);
    const LOCK_VECTOR: Field = Field::new(16, 31);
}

impl Word for PrefetchCommand {
    fn pack(&self) -> u32 {
        let mut word = 0;
        match *self {
            Self::Invalid => {}
            Self::Nop => Self::OP.store(&mut word, 1),
            Self::Move {
                last,
                irq,
                length,
                msgbuf,
            } => {
                Self::LAST.set_flag(&mut word, last);
                Self::OP.store(&mut word, 2);
                Self::IRQ.set_flag(&mut word, irq);
                Self::LENGTH.store(&mut word, length);
                Self::MSGBUF.store(&mut word, msgbuf);
            }
            Self::Lock {
                group,
                dual,
                vector,
            } => {
                Self::OP.store(&mut word, 3);
                Self::GROUP.store(&mut word, group);
                Self::DUAL.set_flag(&mut word, dual);
                Self::LOCK_VECTOR.store(&mut word, vector);
            }
        }
        word
    }

    fn unpack(word: u32) -> Self {
        match Self::OP.load(word) {
            1 => Self::Nop,
            2 => Self::Move {
                last: Self::LAST.flag(word),
                irq: Self::IRQ.flag(word),
                length: Self::LENGTH.load(word),
                msgbuf: Self::MSGBUF.load(word),
            },
            3 => Self::Lock {
                group: Self::GROUP.load(word),
                dual: Self::DUAL.flag(word),
                vector: Self::LOCK_VECTOR.load(word),
            },
            _ => Self::Invalid,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GatherOp {
    Invalid = 0,
    Forward = 1,
    MovePrefetch = 2,
    InsertDelay = 3,
    MoveConstant = 4,
    MoveFrame = 5,
    ConstByte = 6,
    RTag = 7,
}

impl From<u32> for GatherOp {
    fn from(bits: u32) -> Self {
        match bits & 0x7 {
            1 => Self::Forward,
            2 => Self::MovePrefetch,
            3 => Self::InsertDelay,
            4 => Self::MoveConstant,
            5 => Self::MoveFrame,
            6 => Self::ConstByte,
            7 => Self::RTag,
            _ => Self::Invalid,
        }
    }
}

/// Gather DMA row: one step of assembling an egress frame.
///
/// `data` is the frame or constant-buffer offset, or the fill byte of a
/// `ConstByte` row.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GatherCommand {
    pub last: bool,
    pub op: GatherOp,
    pub length: u32,
    pub data: u32,
}

impl GatherCommand {
    const LAST: Field = Field::bit(0);
    const OP: Field = Field::new(1, 3);
    const LENGTH: Field = Field::new(5, 15);
    const OFFSET: Field = Field::new(16, 27);
    const BYTE: Field = Field::new(16, 23);

    pub fn new(last: bool, op: GatherOp, length: u32, data: u32) -> Self {
        Self {
            last,
            op,
            length,
            data,
        }
    }

    fn data_field(&self) -> Field {
        match self.op {
            GatherOp::ConstByte => Self::BYTE,
            _ => Self::OFFSET,
        }
    }
}

impl Word for GatherCommand {
    fn pack(&self) -> u32 {
        let mut word = 0;
        Self::LAST.set_flag(&mut word, self.last);
        Self::OP.store(&mut word, self.op as u32);
        Self::LENGTH.store(&mut word, self.length);
        self.data_field().store(&mut word, self.data);
        word
    }

    fn unpack(word: u32) -> Self {
        let mut command = Self::new(
            Self::LAST.flag(word),
            GatherOp::from(Self::OP.load(word)),
            Self::LENGTH.load(word),
            0,
        );
        command.data = command.data_field().load(word);
        command
    }
}

/// Sequence number source of a redundancy control entry.
pub const SEQ_SRC_RXSEQNUM: u32 = 0;
pub const SEQ_SRC_MAXNUM: u32 = 1;
pub const SEQ_SRC_INTSEQNUM: u32 = 2;
/// Sequence number update of a redundancy control entry.
pub const SEQ_UPD_NOP: u32 = 0;
pub const SEQ_UPD_MAXNUM: u32 = 1;
pub const SEQ_UPD_FIN_BOTH: u32 = 3;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RedundancyEntry {
    pub source: u32,
    pub update: u32,
    pub drop_no_rtag: bool,
    pub seq_index: u32,
}

impl RedundancyEntry {
    const SOURCE: Field = Field::new(0, 2);
    const UPDATE: Field = Field::new(8, 9);
    const DROP_NO_RTAG: Field = Field::bit(14);
    const SEQ_INDEX: Field = Field::new(16, 20);
}

impl Word for RedundancyEntry {
    fn pack(&self) -> u32 {
        let mut word = 0;
        Self::SOURCE.store(&mut word, self.source);
        Self::UPDATE.store(&mut word, self.update);
        Self::DROP_NO_RTAG.set_flag(&mut word, self.drop_no_rtag);
        Self::SEQ_INDEX.store(&mut word, self.seq_index);
        word
    }

    fn unpack(word: u32) -> Self {
        Self {
            source: Self::SOURCE.load(word),
            update: Self::UPDATE.load(word),
            drop_no_rtag: Self::DROP_NO_RTAG.flag(word),
            seq_index: Self::SEQ_INDEX.load(word),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BufferType {
    Rx = 0,
    Tx = 1,
}

/// Message buffer descriptor; `size` counts blocks of the data width.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BufferDescriptor {
    pub offset: u32,
    pub reset: bool,
    pub kind: BufferType,
    pub size: u32,
    pub timestamp: bool,
    pub valid: bool,
}

impl BufferDescriptor {
    const OFFSET: Field = Field::new(0, 15);
    const RESET: Field = Field::bit(19);
    const TYPE: Field = Field::bit(20);
    const SIZE: Field = Field::new(21, 29);
    const TIMESTAMP: Field = Field::bit(30);
    const VALID: Field = Field::bit(31);
}

impl Word for BufferDescriptor {
    fn pack(&self) -> u32 {
        let mut word = 0;
        Self::OFFSET.store(&mut word, self.offset);
        Self::RESET.set_flag(&mut word, self.reset);
        Self::TYPE.store(&mut word, self.kind as u32);
        Self::SIZE.store(&mut word, self.size.saturating_sub(1));
        Self::TIMESTAMP.set_flag(&mut word, self.timestamp);
        Self::VALID.set_flag(&mut word, self.valid);
        word
    }

    fn unpack(word: u32) -> Self {
        Self {
            offset: Self::OFFSET.load(word),
            reset: Self::RESET.flag(word),
            kind: if Self::TYPE.flag(word) {
                BufferType::Tx
            } else {
                BufferType::Rx
            },
            size: Self::SIZE.load(word) + 1,
            timestamp: Self::TIMESTAMP.flag(word),
            valid: Self::VALID.flag(word),
        }
    }
}

/// Bits of the per-module control registers.
pub const CONTROL_ENABLE: Field = Field::bit(0);
pub const CONTROL_RULE_MASK: Field = Field::new(0, 15);
pub const CONTROL_LAYER7_LENGTH: Field = Field::new(0, 6);

pub fn control(field: Field, value: u32) -> u32 {
    let mut word = 0;
    field.store(&mut word, value);
    word
}

/// One row of a schedule table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SchedRow {
    pub cmd: SchedCommand,
    pub delta: u16,
}

impl SchedRow {
    pub const SIZE: usize = 8;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];
        bytes[..4].copy_from_slice(&self.cmd.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.delta.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let [c0, c1, c2, c3, d0, d1, _, _] = *bytes;
        Self {
            cmd: SchedCommand::unpack(u32::from_le_bytes([c0, c1, c2, c3])),
            delta: u16::from_le_bytes([d0, d1]),
        }
    }
}

/// Status of one schedule table, as read back from the driver.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TableStatus {
    pub can_be_used: bool,
    pub in_use: bool,
}

impl TableStatus {
    pub const SIZE: usize = 2;

    pub fn from_bits(bits: u16) -> Self {
        let word = bits as u32;
        Self {
            can_be_used: Field::bit(0).flag(word),
            in_use: Field::bit(1).flag(word),
        }
    }

    pub fn is_free(&self) -> bool {
        !self.can_be_used && !self.in_use
    }
}

/// `sched_cycle_time` record.
pub fn cycle_time_bytes(cycle_ns: u32) -> [u8; 8] {
    let mut bytes = [0; 8];
    bytes[4..].copy_from_slice(&cycle_ns.to_le_bytes());
    bytes
}

/// `sched_start_table` record.
pub fn start_time_bytes(sec: i64, nsec: i32) -> [u8; 12] {
    let mut bytes = [0; 12];
    bytes[..8].copy_from_slice(&sec.to_le_bytes());
    bytes[8..].copy_from_slice(&nsec.to_le_bytes());
    bytes
}

// index byte, then the unused 8-byte stream id
const ALIAS_NAME: usize = 9;

/// Packed `msg_buff_alias` record: index, a zero stream id and the name.
pub fn alias_bytes(index: u8, name: &str) -> [u8; ALIAS_SIZE] {
    let mut bytes = [0; ALIAS_SIZE];
    bytes[0] = index;
    let name = name.as_bytes();
    let len = name.len().min(MAX_NAME_SIZE);
    bytes[ALIAS_NAME..ALIAS_NAME + len].copy_from_slice(&name[..len]);
    bytes
}

/// Index and name of a `msg_buff_alias` record.
pub fn alias_entry(bytes: &[u8]) -> (u8, &[u8]) {
    let index = bytes.first().copied().unwrap_or(0);
    let name = bytes.get(ALIAS_NAME..).unwrap_or(&[]);
    let end = name.iter().position(|byte| *byte == 0).unwrap_or(name.len());
    (index, &name[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_commands() {
        assert_eq!(SchedCommand::open_window(12).pack(), 268632064);
        assert_eq!(
            SchedCommand::close_window(12, 0, Trigger::NoTrigger).pack(),
            134414336
        );
        let fire = SchedCommand::fire(0x1ff, 31);
        assert_eq!(SchedCommand::unpack(fire.pack()), fire);
        assert_eq!(SchedCommand::unpack(0x0600_0000).trigger, Trigger::Reserved);
    }

    #[test]
    fn trigger_round_trip() {
        for gather in &[0u32, 1, 2, 127, 255] {
            for scatter in &[0u32, 1, 200, 255] {
                for redundancy in &[0u32, 1, 31] {
                    let trigger = StreamTrigger {
                        valid: true,
                        force_drop: *gather == 0,
                        gather: *gather,
                        scatter: *scatter,
                        redundancy: *redundancy,
                    };
                    assert_eq!(StreamTrigger::unpack(trigger.pack()), trigger);
                }
            }
        }
    }

    #[test]
    fn dma_rows() {
        assert_eq!(ScatterCommand::timestamp().pack(), 0b101);
        let copy = ScatterCommand::copy(true, 14, 4, 3);
        assert_eq!(copy.pack(), 1 | 2 << 1 | 14 << 4 | 4 << 15 | 3 << 26);
        assert_eq!(ScatterCommand::unpack(copy.pack()), copy);

        assert_eq!(PrefetchCommand::Nop.pack(), 2);
        let lock = PrefetchCommand::Lock {
            group: 1,
            dual: true,
            vector: 0x8001,
        };
        assert_eq!(lock.pack(), 3 << 1 | 1 << 8 | 1 << 12 | 0x8001 << 16);
        assert_eq!(PrefetchCommand::unpack(lock.pack()), lock);

        let pad = GatherCommand::new(true, GatherOp::ConstByte, 10, 0xab);
        assert_eq!(pad.pack(), 1 | 6 << 1 | 10 << 5 | 0xab << 16);
        assert_eq!(GatherCommand::unpack(pad.pack()), pad);
        let mov = GatherCommand::new(false, GatherOp::MoveConstant, 6, 0xfff);
        assert_eq!(GatherCommand::unpack(mov.pack()), mov);
    }

    #[test]
    fn descriptor_stores_size_minus_one() {
        let desc = BufferDescriptor {
            offset: 7,
            reset: false,
            kind: BufferType::Tx,
            size: 3,
            timestamp: true,
            valid: true,
        };
        assert_eq!(desc.pack(), 7 | 1 << 20 | 2 << 21 | 1 << 30 | 1 << 31);
        assert_eq!(BufferDescriptor::unpack(desc.pack()), desc);
    }

    #[test]
    fn records() {
        let row = SchedRow {
            cmd: SchedCommand::open_window(1),
            delta: 0x1234,
        };
        assert_eq!(SchedRow::from_bytes(&row.to_bytes()), row);
        assert!(TableStatus::from_bits(0).is_free());
        assert!(!TableStatus::from_bits(2).is_free());
        assert_eq!(&cycle_time_bytes(1)[..], &[0, 0, 0, 0, 1, 0, 0, 0]);
        let alias = alias_bytes(4, "acm_a");
        assert_eq!(alias[0], 4);
        assert_eq!(&alias[9..14], b"acm_a");
        assert_eq!(alias[14], 0);
        assert_eq!(alias_entry(&alias), (4, &b"acm_a"[..]));
        assert_eq!(alias_entry(&[]), (0, &[][..]));
    }
}
