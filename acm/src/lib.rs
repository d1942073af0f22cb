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

mod bitfield;
mod buffers;
mod compiler;
mod config;
mod device;
mod error;
pub mod hw;
mod index;
mod module;
mod operation;
mod schedule;
mod settings;
mod stream;
mod topology;
mod validate;

// Public types
// scheduler ticks since the start of a cycle
pub type Tick = u32;

pub use crate::bitfield::{Field, Word};
pub use crate::buffers::MessageBuffer;
pub use crate::compiler::{expand_event, expand_window, Edge, Timebase};
pub use crate::config::Configuration;
pub use crate::device::{
    ConfigInterface, Device, MacAddress, MacSource, MemoryDevice, StatusItem, StatusSource,
    SysfsDevice,
};
pub use crate::error::{Error, Resource, Violation};
pub use crate::module::{ConnectionMode, Module, ModuleId, Speed};
pub use crate::operation::{OpCode, Operation, ETHER_ADDR_LEN, MAX_FRAME_SIZE, MAX_NAME_SIZE};
pub use crate::schedule::{EntryId, FscCommand, ScheduleEntry, ScheduleRef, Timing};
pub use crate::settings::{Delays, LinkDelays, Settings};
pub use crate::stream::{Indices, Lookup, Stream, StreamId, StreamKind};
