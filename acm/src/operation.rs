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

/// Largest frame the ACM handles, in bytes.
pub const MAX_FRAME_SIZE: u16 = 1528;
/// Longest message buffer name, matching the alias record.
pub const MAX_NAME_SIZE: usize = 55;
pub const ETHER_ADDR_LEN: usize = 6;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum OpCode {
    Read,
    Insert,
    InsertConstant,
    Pad,
    Forward,
    ForwardAll,
}

impl OpCode {
    /// Operations executed by the gather (egress) engine.
    pub fn is_gather(&self) -> bool {
        !matches!(self, OpCode::Read)
    }
}

/// A single frame-edit primitive.
///
/// The list order of a stream's operations is the hardware processing order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Operation {
    /// Copy `length` bytes at `offset` of the received frame into a message
    /// buffer.
    Read {
        offset: u16,
        length: u16,
        buffer: String,
    },
    /// Insert the content of a message buffer.
    Insert { length: u16, buffer: String },
    /// Insert constant bytes. A placeholder carries no data yet; it becomes
    /// the MAC address of the module's switch port once the stream is added
    /// to a module.
    InsertConstant { data: Vec<u8>, placeholder: bool },
    Pad { length: u16, value: u8 },
    /// Copy `length` bytes at `offset` of the received frame.
    Forward { offset: u16, length: u16 },
    /// Forward the received frame unchanged.
    ForwardAll,
}

fn check_len(length: u16, min: u16, max: u16) -> Result<(), Error> {
    if length < min || length > max {
        return Err(Error::InvalidArgument("operation length out of range"));
    }
    Ok(())
}

fn check_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || name.len() > MAX_NAME_SIZE {
        return Err(Error::InvalidArgument("message buffer name length"));
    }
    Ok(())
}

impl Operation {
    pub fn read(offset: u16, length: u16, buffer: &str) -> Result<Self, Error> {
        check_len(length, 4, MAX_FRAME_SIZE)?;
        if offset as u32 + length as u32 > MAX_FRAME_SIZE as u32 {
            return Err(Error::InvalidArgument("read beyond frame end"));
        }
        check_name(buffer)?;
        Ok(Self::Read {
            offset,
            length,
            buffer: buffer.to_string(),
        })
    }

    pub fn insert(length: u16, buffer: &str) -> Result<Self, Error> {
        check_len(length, 3, 1500)?;
        check_name(buffer)?;
        Ok(Self::Insert {
            length,
            buffer: buffer.to_string(),
        })
    }

    pub fn insert_constant(data: &[u8]) -> Result<Self, Error> {
        check_len(data.len().min(u16::MAX as usize) as u16, 1, 1500)?;
        Ok(Self::InsertConstant {
            data: data.to_vec(),
            placeholder: false,
        })
    }

    /// The source address placeholder, resolved per module.
    pub fn local_source_address() -> Self {
        Self::InsertConstant {
            data: vec![0; ETHER_ADDR_LEN],
            placeholder: true,
        }
    }

    pub fn pad(length: u16, value: u8) -> Result<Self, Error> {
        check_len(length, 1, 1500)?;
        Ok(Self::Pad { length, value })
    }

    pub fn forward(offset: u16, length: u16) -> Result<Self, Error> {
        check_len(length, 2, 1508)?;
        if offset as u32 + length as u32 > MAX_FRAME_SIZE as u32 {
            return Err(Error::InvalidArgument("forward beyond frame end"));
        }
        Ok(Self::Forward { offset, length })
    }

    pub fn forward_all() -> Self {
        Self::ForwardAll
    }

    pub fn code(&self) -> OpCode {
        match self {
            Self::Read { .. } => OpCode::Read,
            Self::Insert { .. } => OpCode::Insert,
            Self::InsertConstant { .. } => OpCode::InsertConstant,
            Self::Pad { .. } => OpCode::Pad,
            Self::Forward { .. } => OpCode::Forward,
            Self::ForwardAll => OpCode::ForwardAll,
        }
    }

    /// Number of bytes the operation reads or emits. Zero for `ForwardAll`.
    pub fn length(&self) -> u16 {
        match self {
            Self::Read { length, .. }
            | Self::Insert { length, .. }
            | Self::Pad { length, .. }
            | Self::Forward { length, .. } => *length,
            Self::InsertConstant { data, .. } => data.len() as u16,
            Self::ForwardAll => 0,
        }
    }

    pub fn offset(&self) -> u16 {
        match self {
            Self::Read { offset, .. } | Self::Forward { offset, .. } => *offset,
            _ => 0,
        }
    }

    /// Name of the message buffer used by `Read` and `Insert`.
    pub fn buffer(&self) -> Option<&str> {
        match self {
            Self::Read { buffer, .. } | Self::Insert { buffer, .. } => Some(buffer),
            _ => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(
            self,
            Self::InsertConstant {
                placeholder: true,
                ..
            }
        )
    }

    /// Replaces a placeholder's payload; other operations are left alone.
    pub(crate) fn resolve_placeholder(&mut self, mac: [u8; ETHER_ADDR_LEN]) {
        if let Self::InsertConstant {
            data,
            placeholder: true,
        } = self
        {
            *data = mac.to_vec();
        }
    }
}
