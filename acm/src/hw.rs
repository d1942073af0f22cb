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

//! The ACM's configuration interface: file names, table geometry and the
//! binary words written to it.

use std::fmt;

pub(crate) mod tables;
pub mod words;

/// sysfs group holding the binary configuration files.
pub const CONFIG_GROUP: &str = "config_bin";
/// sysfs group holding the message buffer lock controls.
pub const CONTROL_GROUP: &str = "control_bin";
/// sysfs group holding the read-only status items.
pub const STATUS_GROUP: &str = "status";

/// Bypass modules per ACM.
pub const MODULE_COUNT: usize = 2;
/// Lookup rules per module, not counting the default rule.
pub const LOOKUP_RULES: usize = 16;
/// Index of the default stream trigger rule.
pub const DEFAULT_RULE: usize = LOOKUP_RULES;
pub const LOOKUP_SIZE: usize = 16;
/// Layer-7 pattern row size; only `LAYER7_MAX` bytes of it are compared.
pub const LAYER7_SIZE: usize = 128;
pub const LAYER7_MAX: usize = 112;
pub const DMA_ROWS: usize = 256;
pub const REDUNDANCY_ROWS: usize = 32;
pub const CONST_BUFFER_SIZE: usize = 4096;
pub const SCHED_TABLES: usize = 2;
pub const SCHED_ROWS: usize = 1024;
/// Largest delta a schedule row can carry.
pub const SCHED_MAX_DELTA: u32 = 0xffff;
/// Delta of the NOP rows that split longer gaps.
pub const SCHED_NOP_DELTA: u32 = 60000;
/// Delta written after the last command of a cycle.
pub const SCHED_LAST_DELTA: u16 = 8;
/// Minimum distance between two schedule commands, in ticks.
pub const SCHED_MIN_GAP: u32 = 8;
pub const ALIAS_SIZE: usize = 64;
/// Message buffers a lock mask can address.
pub const LOCK_MASK_BITS: usize = 64;
pub const CLEAR_ALL_PATTERN: u32 = 0x13F7_2288;

/// A binary file of the configuration interface.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ConfigFile {
    SchedTabRow,
    ConfigurationId,
    SchedCycleTime,
    SchedStartTable,
    TableStatus,
    EmergencyDisable,
    ConnectionMode,
    ConfigState,
    ModuleEnable,
    ClearAllFpga,
    IngressPolicingControl,
    IngressPolicingEnable,
    Layer7Enable,
    Layer7Length,
    LookupEnable,
    Speed,
    ConstBuffer,
    StreamTrigger,
    Layer7Mask,
    Layer7Pattern,
    LookupMask,
    LookupPattern,
    ScatterDma,
    GatherDma,
    PrefetchDma,
    RedundancyControl,
    BaseRecovery,
    IndividualRecovery,
    MsgBuffAlias,
    MsgBuffDesc,
    LockMsgBufs,
    UnlockMsgBufs,
}

impl ConfigFile {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SchedTabRow => "sched_tab_row",
            Self::ConfigurationId => "configuration_id",
            Self::SchedCycleTime => "sched_cycle_time",
            Self::SchedStartTable => "sched_start_table",
            Self::TableStatus => "table_status",
            Self::EmergencyDisable => "emergency_disable",
            Self::ConnectionMode => "cntl_connection_mode",
            Self::ConfigState => "config_state",
            Self::ModuleEnable => "cntl_ngn_enable",
            Self::ClearAllFpga => "clear_all_fpga",
            Self::IngressPolicingControl => "cntl_ingress_policing_control",
            Self::IngressPolicingEnable => "cntl_ingress_policing_enable",
            Self::Layer7Enable => "cntl_layer7_enable",
            Self::Layer7Length => "cntl_layer7_length",
            Self::LookupEnable => "cntl_lookup_enable",
            Self::Speed => "cntl_speed",
            Self::ConstBuffer => "const_buffer",
            Self::StreamTrigger => "stream_trigger",
            Self::Layer7Mask => "layer7_mask",
            Self::Layer7Pattern => "layer7_pattern",
            Self::LookupMask => "lookup_mask",
            Self::LookupPattern => "lookup_pattern",
            Self::ScatterDma => "scatter_dma",
            Self::GatherDma => "gather_dma",
            Self::PrefetchDma => "prefetch_dma",
            Self::RedundancyControl => "redund_cnt_tab",
            Self::BaseRecovery => "base_recovery",
            Self::IndividualRecovery => "individual_recovery",
            Self::MsgBuffAlias => "msg_buff_alias",
            Self::MsgBuffDesc => "msg_buff_desc",
            Self::LockMsgBufs => "lock_msg_bufs",
            Self::UnlockMsgBufs => "unlock_msg_bufs",
        }
    }

    pub fn group(&self) -> &'static str {
        match self {
            Self::LockMsgBufs | Self::UnlockMsgBufs => CONTROL_GROUP,
            _ => CONFIG_GROUP,
        }
    }
}

impl fmt::Display for ConfigFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group(), self.name())
    }
}

/// Values of the `config_state` file that bracket a configuration write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigState {
    Start = 2,
    End = 3,
}

impl From<ConfigState> for u32 {
    fn from(state: ConfigState) -> u32 {
        state as u32
    }
}
