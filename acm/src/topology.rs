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

//! Stream construction, linking and module membership.
//!
//! Every mutation is checked by re-running validation on the result and is
//! undone completely when validation rejects it.

use crate::buffers::check_name;
use crate::config::Configuration;
use crate::device::{Device, MacAddress, StatusItem};
use crate::error::Error;
use crate::index::IndexClass;
use crate::module::ModuleId;
use crate::operation::{OpCode, Operation, ETHER_ADDR_LEN};
use crate::schedule::{EntryId, ScheduleEntry, ScheduleRef, Timing};
use crate::stream::{Indices, Lookup, Stream, StreamId, StreamKind};

const VLAN_MIN: u16 = 3;
/// Matches any VLAN on an event stream.
const VLAN_ANY: u16 = 4095;
const PRIO_MAX: u8 = 7;
const TPID: [u8; 2] = [0x81, 0x00];

const BROADCAST: MacAddress = [0xff; ETHER_ADDR_LEN];
const UNSPECIFIED: MacAddress = [0; ETHER_ADDR_LEN];

/// What `set_reference` does for a pair of stream kinds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Link {
    Child,
    Pair(StreamKind),
}

impl Link {
    fn of(a: StreamKind, b: StreamKind) -> Result<Self, Error> {
        use StreamKind::*;
        match (a, b) {
            (Event, Recovery) | (IngressTriggered, Event) => Ok(Link::Child),
            (TimeTriggered, TimeTriggered) => Ok(Link::Pair(RedundantTx)),
            (IngressTriggered, IngressTriggered) => Ok(Link::Pair(RedundantRx)),
            _ => {
                log::error!("no reference from {:?} to {:?}", a, b);
                Err(Error::InvalidTransition)
            }
        }
    }
}

impl<D: Device> Configuration<D> {
    fn push_stream(&mut self, stream: Stream) -> StreamId {
        let id = StreamId(self.streams.len());
        log::debug!("created {:?} stream {:?}", stream.kind, id);
        self.streams.push(Some(stream));
        id
    }

    pub fn create_ingress_triggered_stream(&mut self, lookup: Lookup) -> Result<StreamId, Error> {
        Ok(self.push_stream(Stream::new(StreamKind::IngressTriggered, Some(lookup))))
    }

    pub fn create_time_triggered_stream(
        &mut self,
        dmac: MacAddress,
        smac: MacAddress,
        vlan_id: u16,
        vlan_prio: u8,
    ) -> Result<StreamId, Error> {
        self.create_egress_stream(StreamKind::TimeTriggered, dmac, smac, vlan_id, vlan_prio)
    }

    /// An event stream answers its ingress parent. An all-ones address or
    /// VLAN 4095 copies that field from the received frame.
    pub fn create_event_stream(
        &mut self,
        dmac: MacAddress,
        smac: MacAddress,
        vlan_id: u16,
        vlan_prio: u8,
    ) -> Result<StreamId, Error> {
        self.create_egress_stream(StreamKind::Event, dmac, smac, vlan_id, vlan_prio)
    }

    pub fn create_recovery_stream(
        &mut self,
        dmac: MacAddress,
        smac: MacAddress,
        vlan_id: u16,
        vlan_prio: u8,
    ) -> Result<StreamId, Error> {
        self.create_egress_stream(StreamKind::Recovery, dmac, smac, vlan_id, vlan_prio)
    }

    fn create_egress_stream(
        &mut self,
        kind: StreamKind,
        dmac: MacAddress,
        smac: MacAddress,
        vlan_id: u16,
        vlan_prio: u8,
    ) -> Result<StreamId, Error> {
        if !(VLAN_MIN..=VLAN_ANY).contains(&vlan_id) {
            return Err(Error::InvalidArgument("vlan id out of range"));
        }
        if vlan_prio > PRIO_MAX {
            return Err(Error::InvalidArgument("vlan priority out of range"));
        }
        let id = self.push_stream(Stream::new(kind, None));
        if let Err(e) = self.set_egress_header(id, dmac, smac, vlan_id, vlan_prio) {
            self.streams[id.0] = None;
            return Err(e);
        }
        Ok(id)
    }

    /// Appends the operations producing DMAC, SMAC and VLAN tag. An all-zero
    /// SMAC is replaced by the port address of the stream's module.
    pub fn set_egress_header(
        &mut self,
        id: StreamId,
        dmac: MacAddress,
        smac: MacAddress,
        vlan_id: u16,
        vlan_prio: u8,
    ) -> Result<(), Error> {
        let kind = self.stream(id)?.kind;
        if kind.is_ingress() {
            return Err(Error::InvalidTransition);
        }
        let event = kind == StreamKind::Event;
        if vlan_id == VLAN_ANY && !event {
            return Err(Error::InvalidArgument("vlan 4095 only on event streams"));
        }
        let dmac = if event && dmac == BROADCAST {
            Operation::forward(0, 6)?
        } else {
            Operation::insert_constant(&dmac)?
        };
        let smac = if event && smac == BROADCAST {
            Operation::forward(6, 6)?
        } else if smac == UNSPECIFIED {
            Operation::local_source_address()
        } else {
            Operation::insert_constant(&smac)?
        };
        let vlan = if event && vlan_id == VLAN_ANY {
            Operation::forward(12, 4)?
        } else {
            let tci = (vlan_prio as u16) << 13 | vlan_id & 0x0fff;
            let [hi, lo] = tci.to_be_bytes();
            Operation::insert_constant(&[TPID[0], TPID[1], hi, lo])?
        };

        let before = self.stream(id)?.operations.len();
        for op in vec![dmac, smac, vlan] {
            if let Err(e) = self.add_operation(id, op) {
                log::warn!("egress header of {:?} rejected: {}", id, e);
                self.stream_mut(id)?.operations.truncate(before);
                if let Some(module) = self.stream(id)?.module {
                    self.recalc(module, IndexClass::Gather)?;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn add_operation(&mut self, id: StreamId, mut op: Operation) -> Result<(), Error> {
        if self.config_applied(id) {
            return Err(Error::PermissionDenied("configuration already applied"));
        }
        let stream = self.stream(id)?;
        let code = op.code();
        if !stream.kind.permits(code) {
            log::error!("{:?} does not permit {:?}", stream.kind, code);
            return Err(Error::InvalidTransition);
        }
        if code == OpCode::ForwardAll
            && (stream.child.is_some() || stream.has_operation(OpCode::ForwardAll))
        {
            log::error!("{:?} cannot take another forward-all", id);
            return Err(Error::InvalidTransition);
        }
        if let Some(name) = op.buffer() {
            check_name(name, &self.settings.msg_buffer_prefix)?;
        }
        let module = stream.module;
        if let (true, Some(module)) = (op.is_placeholder(), module) {
            let mac = self.device.mac_address(self.module(module)?.port_name())?;
            op.resolve_placeholder(mac);
        }

        self.stream_mut(id)?.operations.push(op);
        if let Err(e) = self.validate_stream(id, false) {
            self.stream_mut(id)?.operations.pop();
            return Err(e);
        }
        if let Some(module) = module {
            let class = match code {
                OpCode::Read => IndexClass::Scatter,
                _ => IndexClass::Gather,
            };
            self.recalc(module, class)?;
        }
        Ok(())
    }

    /// Drops every operation except an egress stream's header.
    pub fn clear_operations(&mut self, id: StreamId) -> Result<(), Error> {
        if self.config_applied(id) {
            return Err(Error::PermissionDenied("configuration already applied"));
        }
        let stream = self.stream_mut(id)?;
        let keep = if stream.kind.is_ingress() { 0 } else { 3 };
        stream.operations.truncate(keep);
        let module = stream.module;
        if let Some(module) = module {
            self.recalc(module, IndexClass::Scatter)?;
            self.recalc(module, IndexClass::Gather)?;
        }
        Ok(())
    }

    /// Links `reference` to `id`, either as its child or as its redundant
    /// partner depending on the two kinds.
    pub fn set_reference(&mut self, id: StreamId, reference: StreamId) -> Result<(), Error> {
        if id == reference {
            return Err(Error::InvalidArgument("stream references itself"));
        }
        let a = self.stream(id)?.clone();
        let b = self.stream(reference)?.clone();
        let link = Link::of(a.kind, b.kind)?;
        let paired = matches!(link, Link::Pair(_));
        if a.child.is_some()
            || a.peer.is_some()
            || b.parent.is_some()
            || b.peer.is_some()
            || (paired && b.child.is_some())
        {
            return Err(Error::AlreadyLinked);
        }
        if self.config_applied(id) || self.config_applied(reference) {
            return Err(Error::PermissionDenied("configuration already applied"));
        }
        if a.kind == StreamKind::IngressTriggered && a.has_operation(OpCode::ForwardAll) {
            log::error!("{:?} forwards all frames and cannot be referenced", id);
            return Err(Error::InvalidTransition);
        }
        if link == Link::Pair(StreamKind::RedundantRx) {
            if b.has_operation(OpCode::ForwardAll) {
                return Err(Error::InvalidTransition);
            }
            if self.device.status(StatusItem::RxRedundancy)? != 1 {
                return Err(Error::PermissionDenied("rx redundancy not supported"));
            }
        }

        let mut added = Vec::new();
        let result = self.link(id, reference, link, &mut added);
        if let Err(e) = result {
            log::warn!("reference {:?} -> {:?} rolled back: {}", id, reference, e);
            for stream in added.iter().rev() {
                self.remove_from_collection(*stream)?;
            }
            self.streams[id.0] = Some(a);
            self.streams[reference.0] = Some(b);
            return Err(e);
        }

        match link {
            Link::Pair(kind) => {
                if kind == StreamKind::RedundantTx {
                    for stream in &[id, reference] {
                        if let Some(module) = self.stream(*stream)?.module {
                            self.recalc(module, IndexClass::Gather)?;
                        }
                    }
                }
                self.recalc_redundancy_of(&[id, reference])?;
            }
            Link::Child => {
                let root = match a.kind {
                    StreamKind::IngressTriggered => Some(id),
                    _ => a.parent,
                };
                if let Some(root) = root {
                    self.recompile_stream(root)?;
                }
            }
        }
        log::debug!("linked {:?} -> {:?} as {:?}", id, reference, link);
        Ok(())
    }

    /// The speculative part of `set_reference`; `added` collects streams that
    /// joined a module on the way.
    fn link(
        &mut self,
        id: StreamId,
        reference: StreamId,
        link: Link,
        added: &mut Vec<StreamId>,
    ) -> Result<(), Error> {
        match link {
            Link::Child => {
                self.stream_mut(id)?.child = Some(reference);
                self.stream_mut(reference)?.parent = Some(id);
                if let Some(module) = self.stream(id)?.module {
                    let mut next = Some(reference);
                    while let Some(stream) = next {
                        self.add_to_collection(module, stream)?;
                        added.push(stream);
                        self.compile_stream(stream)?;
                        next = self.stream(stream)?.child;
                    }
                }
            }
            Link::Pair(kind) => {
                for (stream, peer) in &[(id, reference), (reference, id)] {
                    let stream = self.stream_mut(*stream)?;
                    stream.kind = kind;
                    stream.peer = Some(*peer);
                }
            }
        }
        self.validate_stream(id, false)
    }

    /// Rebuilds the command list entries of a member stream.
    fn recompile_stream(&mut self, id: StreamId) -> Result<(), Error> {
        if let Some(module) = self.stream(id)?.module {
            self.module_mut(module)?.remove_fsc_of(id);
            self.compile_stream(id)?;
        }
        Ok(())
    }

    /// Deletes a detached stream and the children it owns. A redundant
    /// partner falls back to its unpaired kind.
    pub fn delete_stream(&mut self, id: StreamId) -> Result<(), Error> {
        let stream = self.stream(id)?;
        if stream.module.is_some() {
            return Err(Error::PermissionDenied("stream is in a module"));
        }
        if matches!(stream.kind, StreamKind::Event | StreamKind::Recovery) && stream.parent.is_some()
        {
            return Err(Error::PermissionDenied("stream is referenced"));
        }
        let peer = stream.peer;
        let mut subtree = Vec::new();
        let mut next = stream.child;
        while let Some(child) = next {
            let child_stream = self.stream(child)?;
            if child_stream.module.is_some() {
                return Err(Error::PermissionDenied("child stream is in a module"));
            }
            subtree.push(child);
            next = child_stream.child;
        }

        if let Some(peer) = peer {
            let partner = self.stream_mut(peer)?;
            partner.kind = partner.kind.base();
            partner.peer = None;
            let module = partner.module;
            if let Some(module) = module {
                self.recalc_all(module)?;
            }
            log::debug!("{:?} lost its partner {:?}", peer, id);
        }
        for stream in subtree.iter().rev().chain(std::iter::once(&id)) {
            self.streams[stream.0] = None;
            log::debug!("deleted stream {:?}", stream);
        }
        Ok(())
    }

    /// Makes `id` a member of `module` and renumbers the module.
    pub(crate) fn add_to_collection(&mut self, module: ModuleId, id: StreamId) -> Result<(), Error> {
        let stream = self.stream(id)?;
        if stream.module.is_some() {
            return Err(Error::AlreadyMember);
        }
        let mac = if stream.operations.iter().any(Operation::is_placeholder) {
            Some(self.device.mac_address(self.module(module)?.port_name())?)
        } else {
            None
        };
        let (kind, peer) = (stream.kind, stream.peer);

        self.module_mut(module)?.streams.push(id);
        let stream = self.stream_mut(id)?;
        stream.module = Some(module);
        if let Some(mac) = mac {
            for op in stream.operations.iter_mut() {
                op.resolve_placeholder(mac);
            }
        }

        let mut result = self
            .validate_module(module, false)
            .and_then(|_| self.recalc_indices(id));
        if let (true, Some(peer)) = (result.is_ok() && kind.is_redundant(), peer) {
            result = self.recalc_redundancy_of(&[id, peer]);
        }
        if let Err(e) = result {
            log::warn!("{:?} rejected by module {:?}: {}", id, module, e);
            self.remove_from_collection(id)?;
            return Err(e);
        }
        log::debug!("{:?} joined module {:?}", id, module);
        Ok(())
    }

    pub(crate) fn remove_from_collection(&mut self, id: StreamId) -> Result<(), Error> {
        let module = match self.stream(id)?.module {
            Some(module) => module,
            None => return Ok(()),
        };
        let collection = self.module_mut(module)?;
        collection.streams.retain(|stream| *stream != id);
        collection.remove_fsc_of(id);
        let stream = self.stream_mut(id)?;
        stream.module = None;
        stream.indices = Indices::default();
        self.recalc_all(module)
    }

    /// Adds a time-triggered or ingress stream to a module. An ingress
    /// stream brings its event child and that child's recovery stream. The
    /// whole group joins or none of it does.
    pub fn add_module_stream(&mut self, module: ModuleId, id: StreamId) -> Result<(), Error> {
        if self.applied {
            return Err(Error::PermissionDenied("configuration already applied"));
        }
        self.module(module)?;
        let stream = self.stream(id)?;
        if !matches!(
            stream.kind,
            StreamKind::TimeTriggered | StreamKind::IngressTriggered
        ) {
            log::error!("{:?} streams join a module through their parent", stream.kind);
            return Err(Error::InvalidTransition);
        }
        let mut group = vec![id];
        let mut next = stream.child;
        while let Some(child) = next {
            group.push(child);
            next = self.stream(child)?.child;
        }

        let mut added = Vec::new();
        for stream in group {
            let result = self.add_to_collection(module, stream).and_then(|_| {
                added.push(stream);
                self.compile_stream(stream)?;
                self.validate_stream(stream, false)
            });
            if let Err(e) = result {
                for stream in added.iter().rev() {
                    self.remove_from_collection(*stream)?;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn set_indiv_recov(&mut self, id: StreamId, timeout_ms: u32) -> Result<(), Error> {
        if self.config_applied(id) {
            return Err(Error::PermissionDenied("configuration already applied"));
        }
        if !self.stream(id)?.kind.is_ingress() {
            return Err(Error::PermissionDenied("individual recovery on an egress stream"));
        }
        if self.device.status(StatusItem::IndividualRecovery)? != 1 {
            return Err(Error::PermissionDenied("individual recovery not supported"));
        }
        self.stream_mut(id)?.indiv_recov_timeout_ms = timeout_ms;
        Ok(())
    }

    /// Sends the stream at `send` of every `period`.
    pub fn add_event(&mut self, id: StreamId, period: u32, send: u32) -> Result<EntryId, Error> {
        let timing = ScheduleEntry::event(period, send)?;
        if !matches!(
            self.stream(id)?.kind,
            StreamKind::TimeTriggered | StreamKind::RedundantTx
        ) {
            return Err(Error::PermissionDenied("event schedule on this stream kind"));
        }
        self.add_schedule(id, period, timing)
    }

    /// Accepts the stream between `start` and `end` of every `period`.
    pub fn add_window(
        &mut self,
        id: StreamId,
        period: u32,
        start: u32,
        end: u32,
    ) -> Result<EntryId, Error> {
        let timing = ScheduleEntry::window(period, start, end)?;
        if !self.stream(id)?.kind.is_ingress() {
            return Err(Error::PermissionDenied("window schedule on this stream kind"));
        }
        self.add_schedule(id, period, timing)
    }

    fn add_schedule(&mut self, id: StreamId, period: u32, timing: Timing) -> Result<EntryId, Error> {
        let stream = self.stream_mut(id)?;
        let entry = stream.push_schedule(period, timing);
        let module = match stream.module {
            Some(module) => module,
            None => return Ok(entry),
        };
        let result = self
            .compile_entry(id, entry)
            .and_then(|_| self.validate_stream(id, false));
        if let Err(e) = result {
            let schedule_ref = ScheduleRef { stream: id, entry };
            self.module_mut(module)?
                .fsc
                .retain(|fsc| fsc.schedule_ref != schedule_ref);
            self.stream_mut(id)?.schedules.retain(|s| s.id != entry);
            return Err(e);
        }
        Ok(entry)
    }

    pub fn clear_schedule(&mut self, id: StreamId) -> Result<(), Error> {
        if let Some(module) = self.stream(id)?.module {
            self.module_mut(module)?.remove_fsc_of(id);
        }
        self.stream_mut(id)?.schedules.clear();
        Ok(())
    }
}
