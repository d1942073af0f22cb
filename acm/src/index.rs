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

//! Hardware index allocation.
//!
//! Four independent passes over a module's stream collection hand out dense
//! row numbers for the lookup, redundancy, gather and scatter tables. The
//! passes never check table capacity; validation does that.

use crate::config::Configuration;
use crate::device::Device;
use crate::error::Error;
use crate::module::ModuleId;
use crate::operation::OpCode;
use crate::stream::{StreamId, StreamKind};
use itertools::Itertools;

const LOOKUP_START: usize = 0;
const REDUNDANCY_START: usize = 1;
/// Gather row 0 sends nothing.
pub(crate) const GATHER_NOP: u16 = 0;
/// Gather row 1 forwards the received frame unchanged.
pub(crate) const GATHER_FORWARD: u16 = 1;
pub(crate) const GATHER_START: usize = 2;
const SCATTER_NOP: u16 = 0;
pub(crate) const SCATTER_START: usize = 1;

/// One of the four index passes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum IndexClass {
    Lookup,
    Redundancy,
    Gather,
    Scatter,
}

impl IndexClass {
    /// The passes affected by a structural change to a stream of `kind`.
    pub(crate) fn for_kind(kind: StreamKind) -> &'static [IndexClass] {
        use IndexClass::*;
        match kind {
            StreamKind::IngressTriggered => &[Lookup, Scatter, Gather],
            StreamKind::RedundantRx => &[Lookup, Redundancy, Scatter],
            StreamKind::TimeTriggered | StreamKind::RedundantTx => &[Redundancy, Gather],
            StreamKind::Event | StreamKind::Recovery => &[Gather],
        }
    }
}

impl<D: Device> Configuration<D> {
    fn members(&self, module: ModuleId) -> Result<Vec<StreamId>, Error> {
        Ok(self.module(module)?.streams.clone())
    }

    pub(crate) fn recalc_lookup(&mut self, module: ModuleId) -> Result<(), Error> {
        let mut next = LOOKUP_START;
        for id in self.members(module)? {
            let stream = self.stream_mut(id)?;
            stream.indices.lookup = if stream.kind.is_ingress() {
                next += 1;
                (next - 1) as u8
            } else {
                0
            };
            log::trace!("lookup index of {:?}: {}", id, stream.indices.lookup);
        }
        Ok(())
    }

    /// Redundancy indices form one space shared by both modules: a pair
    /// spanning the two modules takes the index module 0 handed out, and
    /// module 1 numbers its remaining pairs around those.
    pub(crate) fn recalc_redundancy(&mut self, module: ModuleId) -> Result<(), Error> {
        let members = self.members(module)?;
        let secondary = self.module(module)?.index != 0;
        let mut copied = Vec::new();
        if secondary {
            for id in &members {
                if let Some(index) = self.primary_partner_index(*id, module)? {
                    copied.push(index);
                }
            }
        }
        let mut next = REDUNDANCY_START;
        for id in members {
            let (kind, peer) = {
                let stream = self.stream(id)?;
                (stream.kind, stream.peer)
            };
            if !kind.is_redundant() {
                self.stream_mut(id)?.indices.redundancy = 0;
                continue;
            }
            let index = match self.primary_partner_index(id, module)? {
                Some(index) if secondary => index,
                _ => {
                    while copied.contains(&(next as u8)) {
                        next += 1;
                    }
                    next += 1;
                    (next - 1) as u8
                }
            };
            self.stream_mut(id)?.indices.redundancy = index;
            if let Some(peer) = peer {
                self.stream_mut(peer)?.indices.redundancy = index;
            }
            log::trace!("redundancy index of {:?} and {:?}: {}", id, peer, index);
        }
        Ok(())
    }

    /// The index of `id`'s partner when the partner lives in module 0 and
    /// `id` does not.
    fn primary_partner_index(&self, id: StreamId, module: ModuleId) -> Result<Option<u8>, Error> {
        let peer = match self.stream(id)?.peer {
            Some(peer) => self.stream(peer)?,
            None => return Ok(None),
        };
        Ok(match peer.module {
            Some(other) if other != module && self.module(other)?.index == 0 => {
                Some(peer.indices.redundancy)
            }
            _ => None,
        })
    }

    pub(crate) fn recalc_gather(&mut self, module: ModuleId) -> Result<(), Error> {
        let mut next = GATHER_START;
        for id in self.members(module)? {
            let stream = self.stream_mut(id)?;
            let ops = stream.count_gather_ops();
            stream.indices.gather = match ops {
                0 => GATHER_NOP,
                1 if stream.has_operation(OpCode::ForwardAll) => GATHER_FORWARD,
                _ => {
                    let index = next;
                    next += ops.max(stream.count_prefetch_ops());
                    index as u16
                }
            };
            log::trace!("gather index of {:?}: {}", id, stream.indices.gather);
        }
        Ok(())
    }

    pub(crate) fn recalc_scatter(&mut self, module: ModuleId) -> Result<(), Error> {
        let mut next = SCATTER_START;
        for id in self.members(module)? {
            let stream = self.stream_mut(id)?;
            let reads = stream.count_scatter_ops();
            stream.indices.scatter = if stream.kind.is_ingress() && reads > 0 {
                next += reads;
                (next - reads) as u16
            } else {
                SCATTER_NOP
            };
            log::trace!("scatter index of {:?}: {}", id, stream.indices.scatter);
        }
        Ok(())
    }

    pub(crate) fn recalc(&mut self, module: ModuleId, class: IndexClass) -> Result<(), Error> {
        match class {
            IndexClass::Lookup => self.recalc_lookup(module),
            IndexClass::Redundancy => self.recalc_redundancy(module),
            IndexClass::Gather => self.recalc_gather(module),
            IndexClass::Scatter => self.recalc_scatter(module),
        }
    }

    pub(crate) fn recalc_all(&mut self, module: ModuleId) -> Result<(), Error> {
        for class in &[
            IndexClass::Lookup,
            IndexClass::Redundancy,
            IndexClass::Gather,
            IndexClass::Scatter,
        ] {
            self.recalc(module, *class)?;
        }
        Ok(())
    }

    /// Reruns the passes for `stream`'s kind in its module. Detached
    /// streams carry no indices.
    pub(crate) fn recalc_indices(&mut self, stream: StreamId) -> Result<(), Error> {
        let (kind, module) = {
            let stream = self.stream(stream)?;
            (stream.kind, stream.module)
        };
        if let Some(module) = module {
            for class in IndexClass::for_kind(kind) {
                self.recalc(module, *class)?;
            }
        }
        Ok(())
    }

    /// Renumbers redundancy in every module holding one of `streams`,
    /// module 0 first.
    pub(crate) fn recalc_redundancy_of(&mut self, streams: &[StreamId]) -> Result<(), Error> {
        let mut modules = Vec::new();
        for id in streams {
            if let Some(module) = self.stream(*id)?.module {
                modules.push((self.module(module)?.index, module));
            }
        }
        for (_, module) in modules.into_iter().sorted().dedup() {
            self.recalc_redundancy(module)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;
    use crate::module::{ConnectionMode, Speed};
    use crate::operation::Operation;
    use crate::settings::Settings;
    use crate::stream::Stream;

    fn config() -> Configuration<MemoryDevice> {
        Configuration::new(MemoryDevice::new(), Settings::default())
    }

    /// Places a stream straight into a module, bypassing validation.
    fn place(
        config: &mut Configuration<MemoryDevice>,
        module: ModuleId,
        kind: StreamKind,
        ops: Vec<Operation>,
    ) -> StreamId {
        let id = StreamId(config.streams.len());
        let mut stream = Stream::new(kind, None);
        stream.operations = ops;
        stream.module = Some(module);
        config.streams.push(Some(stream));
        config.module_mut(module).unwrap().streams.push(id);
        id
    }

    fn pair(config: &mut Configuration<MemoryDevice>, a: StreamId, b: StreamId) {
        config.stream_mut(a).unwrap().peer = Some(b);
        config.stream_mut(b).unwrap().peer = Some(a);
    }

    fn tt(inserts: usize) -> Vec<Operation> {
        let mut ops = vec![Operation::pad(60, 0).unwrap()];
        for i in 0..inserts {
            ops.push(Operation::insert(4, &format!("acm_{}", i)).unwrap());
        }
        ops
    }

    #[test]
    fn gather_advance() {
        let mut config = config();
        let m = config
            .create_module(ConnectionMode::Parallel, Speed::Speed1G, 0)
            .unwrap();
        let empty = place(&mut config, m, StreamKind::IngressTriggered, vec![]);
        let fwd = place(
            &mut config,
            m,
            StreamKind::IngressTriggered,
            vec![Operation::forward_all()],
        );
        let a = place(&mut config, m, StreamKind::TimeTriggered, tt(0));
        let b = place(&mut config, m, StreamKind::TimeTriggered, tt(2));
        let c = place(&mut config, m, StreamKind::RedundantTx, tt(0));
        let d = place(&mut config, m, StreamKind::TimeTriggered, tt(0));
        config.recalc_gather(m).unwrap();
        let gather = |id| config.stream(id).unwrap().indices.gather;
        assert_eq!(gather(empty), GATHER_NOP);
        assert_eq!(gather(fwd), GATHER_FORWARD);
        // one pad: max(1, 1)
        assert_eq!(gather(a), 2);
        // pad and two inserts against six prefetch rows
        assert_eq!(gather(b), 3);
        // pad plus the R-tag row
        assert_eq!(gather(c), 9);
        assert_eq!(gather(d), 11);
    }

    #[test]
    fn lookup_and_scatter_follow_insertion_order() {
        let mut config = config();
        let m = config
            .create_module(ConnectionMode::Serial, Speed::Speed1G, 0)
            .unwrap();
        let reads = |n: usize| {
            (0..n)
                .map(|i| Operation::read(0, 8, &format!("acm_r{}", i)).unwrap())
                .collect::<Vec<_>>()
        };
        let a = place(&mut config, m, StreamKind::IngressTriggered, reads(2));
        let t = place(&mut config, m, StreamKind::TimeTriggered, tt(0));
        let b = place(&mut config, m, StreamKind::RedundantRx, reads(0));
        let c = place(&mut config, m, StreamKind::IngressTriggered, reads(3));
        config.recalc_all(m).unwrap();
        let first = config
            .streams
            .iter()
            .flatten()
            .map(|s| s.indices)
            .collect::<Vec<_>>();
        let idx = |id| config.stream(id).unwrap().indices;
        assert_eq!((idx(a).lookup, idx(b).lookup, idx(c).lookup), (0, 1, 2));
        assert_eq!(idx(t).lookup, 0);
        assert_eq!((idx(a).scatter, idx(b).scatter, idx(c).scatter), (1, 0, 3));
        config.recalc_all(m).unwrap();
        let second = config
            .streams
            .iter()
            .flatten()
            .map(|s| s.indices)
            .collect::<Vec<_>>();
        assert_eq!(first, second);
    }

    #[test]
    fn redundancy_is_shared_across_modules() {
        let mut config = config();
        let m0 = config
            .create_module(ConnectionMode::Parallel, Speed::Speed1G, 0)
            .unwrap();
        let m1 = config
            .create_module(ConnectionMode::Parallel, Speed::Speed1G, 1)
            .unwrap();
        // module 1 holds a local pair ahead of its half of a spanning pair
        let l0 = place(&mut config, m1, StreamKind::RedundantTx, tt(0));
        let l1 = place(&mut config, m1, StreamKind::RedundantTx, tt(0));
        let x1 = place(&mut config, m1, StreamKind::RedundantTx, tt(0));
        let x0 = place(&mut config, m0, StreamKind::RedundantTx, tt(0));
        let y0 = place(&mut config, m0, StreamKind::TimeTriggered, tt(0));
        pair(&mut config, l0, l1);
        pair(&mut config, x0, x1);
        config.recalc_redundancy_of(&[l0, x0]).unwrap();
        let red = |id| config.stream(id).unwrap().indices.redundancy;
        assert_eq!(red(x0), 1);
        assert_eq!(red(x1), 1);
        assert_eq!(red(y0), 0);
        // the module-local pair skips the copied index
        assert_eq!(red(l0), 3);
        assert_eq!(red(l1), 3);
    }
}
