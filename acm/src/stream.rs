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
use crate::hw::{LAYER7_MAX, LOOKUP_SIZE};
use crate::module::ModuleId;
use crate::operation::{OpCode, Operation};
use crate::schedule::{EntryId, ScheduleEntry, Timing};

/// Handle of a stream in its configuration. Handles of deleted streams
/// are never handed out again.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StreamId(pub(crate) usize);

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StreamKind {
    IngressTriggered,
    TimeTriggered,
    Event,
    Recovery,
    RedundantTx,
    RedundantRx,
}

impl StreamKind {
    /// The kind a redundant stream had before it was paired.
    pub fn base(&self) -> StreamKind {
        match self {
            Self::RedundantTx => Self::TimeTriggered,
            Self::RedundantRx => Self::IngressTriggered,
            other => *other,
        }
    }

    /// Streams matched by a lookup rule on receive.
    pub fn is_ingress(&self) -> bool {
        matches!(self, Self::IngressTriggered | Self::RedundantRx)
    }

    pub fn is_redundant(&self) -> bool {
        matches!(self, Self::RedundantTx | Self::RedundantRx)
    }

    /// The operation compatibility table.
    pub fn permits(&self, code: OpCode) -> bool {
        use OpCode::*;
        match self {
            Self::TimeTriggered | Self::RedundantTx | Self::Recovery => {
                matches!(code, Insert | InsertConstant | Pad)
            }
            Self::Event => matches!(code, Insert | InsertConstant | Pad | Forward),
            Self::IngressTriggered => matches!(code, Read | ForwardAll),
            Self::RedundantRx => code == Read,
        }
    }
}

/// Receive-side match of an ingress stream.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Lookup {
    /// DMAC, SMAC and VLAN tag of the received frame.
    pub header: [u8; LOOKUP_SIZE],
    pub header_mask: [u8; LOOKUP_SIZE],
    /// Optional layer-7 filter; empty when unused.
    pub filter_pattern: Vec<u8>,
    pub filter_mask: Vec<u8>,
}

impl Lookup {
    pub fn new(
        header: [u8; LOOKUP_SIZE],
        header_mask: [u8; LOOKUP_SIZE],
        filter: Option<(&[u8], &[u8])>,
    ) -> Result<Self, Error> {
        let (pattern, mask) = filter.unwrap_or((&[], &[]));
        if pattern.len() != mask.len() {
            return Err(Error::InvalidArgument("filter pattern and mask differ in size"));
        }
        if pattern.len() > LAYER7_MAX {
            return Err(Error::InvalidArgument("filter longer than 112 bytes"));
        }
        Ok(Self {
            header,
            header_mask,
            filter_pattern: pattern.to_vec(),
            filter_mask: mask.to_vec(),
        })
    }

    pub fn filter_size(&self) -> usize {
        self.filter_pattern.len()
    }
}

/// Positions of a stream's rows in the four hardware tables. Zero means
/// unused, except that gather row 1 is the shared forward-all row.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Indices {
    pub lookup: u8,
    pub redundancy: u8,
    pub gather: u16,
    pub scatter: u16,
}

#[derive(Clone, Debug)]
pub struct Stream {
    pub(crate) kind: StreamKind,
    pub(crate) lookup: Option<Lookup>,
    pub(crate) operations: Vec<Operation>,
    pub(crate) schedules: Vec<ScheduleEntry>,
    next_entry: u32,
    pub(crate) child: Option<StreamId>,
    pub(crate) parent: Option<StreamId>,
    pub(crate) peer: Option<StreamId>,
    pub(crate) module: Option<ModuleId>,
    pub(crate) indiv_recov_timeout_ms: u32,
    pub(crate) indices: Indices,
}

impl Stream {
    pub(crate) fn new(kind: StreamKind, lookup: Option<Lookup>) -> Self {
        Self {
            kind,
            lookup,
            operations: Vec::new(),
            schedules: Vec::new(),
            next_entry: 0,
            child: None,
            parent: None,
            peer: None,
            module: None,
            indiv_recov_timeout_ms: 0,
            indices: Indices::default(),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn lookup(&self) -> Option<&Lookup> {
        self.lookup.as_ref()
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn schedules(&self) -> &[ScheduleEntry] {
        &self.schedules
    }

    pub fn child(&self) -> Option<StreamId> {
        self.child
    }

    pub fn parent(&self) -> Option<StreamId> {
        self.parent
    }

    pub fn peer(&self) -> Option<StreamId> {
        self.peer
    }

    /// The module whose stream collection holds this stream.
    pub fn module(&self) -> Option<ModuleId> {
        self.module
    }

    pub fn indices(&self) -> Indices {
        self.indices
    }

    pub fn indiv_recov_timeout_ms(&self) -> u32 {
        self.indiv_recov_timeout_ms
    }

    pub(crate) fn push_schedule(&mut self, period: u32, timing: Timing) -> EntryId {
        let id = EntryId(self.next_entry);
        self.next_entry += 1;
        self.schedules.push(ScheduleEntry { id, period, timing });
        id
    }

    pub(crate) fn schedule(&self, id: EntryId) -> Option<&ScheduleEntry> {
        self.schedules.iter().find(|entry| entry.id == id)
    }

    pub fn has_operation(&self, code: OpCode) -> bool {
        self.operations.iter().any(|op| op.code() == code)
    }

    pub fn count_operations(&self, code: OpCode) -> usize {
        self.operations.iter().filter(|op| op.code() == code).count()
    }

    /// Gather rows taken by the operations, plus the R-tag row of a
    /// redundant sender.
    pub fn count_gather_ops(&self) -> usize {
        let rtag = (self.kind == StreamKind::RedundantTx) as usize;
        self.operations.iter().filter(|op| op.code().is_gather()).count() + rtag
    }

    pub fn count_scatter_ops(&self) -> usize {
        self.count_operations(OpCode::Read)
    }

    /// Inserts plus the four lock-vector rows, or a single NOP row.
    pub fn count_prefetch_ops(&self) -> usize {
        match self.count_operations(OpCode::Insert) {
            0 => 1,
            inserts => inserts + 4,
        }
    }
}
