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

//! Message buffer allocation.
//!
//! Buffers are laid out back to back in the ACM's message buffer memory,
//! in units of the memory's data width. `Read` buffers reserve room for the
//! receive timestamp.

use std::convert::TryFrom;

use crate::config::Configuration;
use crate::device::{Device, StatusItem};
use crate::error::{Error, Resource};
use crate::hw::words::{alias_entry, BufferDescriptor, BufferType};
use crate::hw::{ConfigFile, ALIAS_SIZE, LOCK_MASK_BITS};
use crate::operation::{OpCode, Operation};

/// Bytes of timestamp stored in front of received data.
const TIMESTAMP_SIZE: u16 = 4;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageBuffer {
    pub name: String,
    pub index: u8,
    /// In blocks of the data width.
    pub offset: u16,
    pub size: u16,
    pub kind: BufferType,
}

impl MessageBuffer {
    pub fn descriptor(&self) -> BufferDescriptor {
        BufferDescriptor {
            offset: self.offset as u32,
            reset: false,
            kind: self.kind,
            size: self.size as u32,
            timestamp: true,
            valid: true,
        }
    }
}

pub(crate) fn check_name(name: &str, prefix: &str) -> Result<(), Error> {
    if !name.starts_with(prefix) {
        log::error!("buffer name {} does not start with {}", name, prefix);
        return Err(Error::PermissionDenied("message buffer prefix"));
    }
    Ok(())
}

fn required_blocks(op: &Operation, granularity: u16) -> u16 {
    let len = match op.code() {
        OpCode::Read => op.length() + TIMESTAMP_SIZE,
        _ => op.length(),
    };
    num::Integer::div_ceil(&len, &granularity)
}

/// Moves the end of the layout, which must stay addressable.
fn advance(offset: u16, blocks: u16) -> Result<u16, Error> {
    offset.checked_add(blocks).ok_or_else(|| {
        log::error!("message buffers exceed {} blocks", u16::MAX);
        Error::ResourceExhausted(Resource::MessageBufferMemory)
    })
}

/// Lays out the buffers of `modules`, each given as its operations in
/// stream order.
pub(crate) fn allocate<'a, M, O>(
    modules: M,
    granularity: i64,
    memsize: i64,
) -> Result<Vec<MessageBuffer>, Error>
where
    M: IntoIterator<Item = O>,
    O: IntoIterator<Item = &'a Operation>,
{
    if granularity <= 0 || granularity > u16::MAX as i64 {
        return Err(Error::InvalidArgument("message buffer data width"));
    }
    let granularity = granularity as u16;
    let mut buffers: Vec<MessageBuffer> = Vec::new();
    let mut offset: u16 = 0;
    for ops in modules {
        for op in ops {
            let name = match (op.code(), op.buffer()) {
                (OpCode::Read, Some(name)) | (OpCode::Insert, Some(name)) => name,
                _ => continue,
            };
            let kind = match op.code() {
                OpCode::Read => BufferType::Rx,
                _ => BufferType::Tx,
            };
            let size = required_blocks(op, granularity);
            match buffers.iter().position(|buffer| buffer.name == name) {
                Some(at) if buffers[at].kind != kind => {
                    log::error!("buffer {} used for both directions", name);
                    return Err(Error::PermissionDenied("buffer direction"));
                }
                Some(at) => {
                    if size > buffers[at].size {
                        let grow = size - buffers[at].size;
                        offset = advance(offset, grow)?;
                        buffers[at].size = size;
                        for later in buffers[at + 1..].iter_mut() {
                            later.offset += grow;
                        }
                    }
                }
                None => {
                    let index = u8::try_from(buffers.len())
                        .map_err(|_| Error::ResourceExhausted(Resource::MessageBufferCount))?;
                    buffers.push(MessageBuffer {
                        name: name.to_string(),
                        index,
                        offset,
                        size,
                        kind,
                    });
                    offset = advance(offset, size)?;
                }
            }
        }
        if (offset as i64 + 1) * granularity as i64 >= memsize {
            log::error!(
                "message buffers need {} bytes, {} available",
                (offset as i64 + 1) * granularity as i64,
                memsize
            );
            return Err(Error::ResourceExhausted(Resource::MessageBufferMemory));
        }
    }
    Ok(buffers)
}

impl<D: Device> Configuration<D> {
    /// Rebuilds the buffer table from the attached modules.
    pub(crate) fn recompute_buffers(&mut self) -> Result<(), Error> {
        let granularity = self.device.status(StatusItem::MsgbufDatawidth)?;
        let memsize = self.device.status(StatusItem::MsgbufMemsize)?;
        let modules = self
            .attached()
            .map(|(_, module)| {
                module
                    .streams
                    .iter()
                    .filter_map(|id| self.streams.get(id.0).and_then(Option::as_ref))
                    .flat_map(|stream| stream.operations.iter())
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        self.buffers = allocate(modules, granularity, memsize)?;
        Ok(())
    }

    /// Buffers as of the last validation or apply.
    pub fn message_buffers(&self) -> &[MessageBuffer] {
        &self.buffers
    }

    pub fn resolve(&self, name: &str) -> Option<&MessageBuffer> {
        self.buffers.iter().find(|buffer| buffer.name == name)
    }

    /// Index of the buffer the ACM knows as `name`, from the aliases
    /// written at apply.
    pub fn buffer_id(&self, name: &str) -> Result<u8, Error> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("empty message buffer name"));
        }
        let count = self.device.status(StatusItem::MsgbufCount)?.max(0) as usize;
        for i in 0..count {
            let record = self
                .device
                .read(ConfigFile::MsgBuffAlias, ALIAS_SIZE, (i * ALIAS_SIZE) as u64)?;
            let (index, alias) = alias_entry(&record);
            if alias == name.as_bytes() {
                return Ok(index);
            }
        }
        log::error!("message buffer {} not found in {} aliases", name, count);
        Err(Error::UnknownBuffer(name.to_string()))
    }

    /// Locks the buffers whose bits are set in `mask`.
    pub fn set_buffer_locking_mask(&mut self, mask: u64) -> Result<(), Error> {
        self.write_lock_control(ConfigFile::LockMsgBufs, mask)
    }

    /// Unlocks the buffers whose bits are set in `mask`.
    pub fn set_buffer_unlocking_mask(&mut self, mask: u64) -> Result<(), Error> {
        self.write_lock_control(ConfigFile::UnlockMsgBufs, mask)
    }

    /// Buffers locked right now, bit `i` for buffer `i`.
    pub fn buffer_locking_vector(&self) -> Result<u64, Error> {
        let bytes = self.device.read(ConfigFile::LockMsgBufs, 8, 0)?;
        let mut vector = [0; 8];
        for (to, from) in vector.iter_mut().zip(bytes) {
            *to = from;
        }
        Ok(u64::from_le_bytes(vector))
    }

    fn write_lock_control(&mut self, file: ConfigFile, mask: u64) -> Result<(), Error> {
        let count = self.device.status(StatusItem::MsgbufCount)?;
        if count <= 0 {
            log::error!("invalid number of message buffers: {}", count);
            return Err(Error::ResourceExhausted(Resource::MessageBufferCount));
        }
        let usable = match count as usize {
            n if n >= LOCK_MASK_BITS => u64::MAX,
            n => (1u64 << n) - 1,
        };
        if mask & !usable != 0 {
            log::error!("mask {:#x} beyond {} message buffers", mask, count);
            return Err(Error::ResourceExhausted(Resource::MessageBufferCount));
        }
        log::debug!("{} <- {:#x}", file, mask);
        self.device.write(file, &mask.to_le_bytes(), 0)
    }
}
