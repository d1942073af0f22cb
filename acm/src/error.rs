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

use std::fmt;

// errno values reported by the C-facing tools that drive the ACM.
const EPERM: i32 = 1;
const EIO: i32 = 5;
const EEXIST: i32 = 17;
const EINVAL: i32 = 22;

/// A validation rule that rejected a stream, module or configuration.
///
/// Every rule carries the numeric code the ACM tooling reports for it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Violation {
    EgressFrameSize,
    OperationMissing,
    IncompatiblePeriod,
    ModuleCycle,
    ScheduleGap,
    StreamNotInConfiguration,
    ForwardOffset,
    Payload,
    RedundantSameModule,
    InsertCount,
    RedundantSchedule,
}

impl Violation {
    pub fn code(&self) -> i32 {
        match self {
            Self::EgressFrameSize => 140,
            Self::OperationMissing => 141,
            Self::IncompatiblePeriod => 148,
            Self::ModuleCycle => 150,
            Self::ScheduleGap => 151,
            Self::StreamNotInConfiguration => 155,
            Self::ForwardOffset => 158,
            Self::Payload => 159,
            Self::RedundantSameModule => 163,
            Self::InsertCount => 164,
            Self::RedundantSchedule => EINVAL,
        }
    }
}

/// Fixed-size hardware resources that a configuration can run out of.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Resource {
    ConstantBuffer,
    RedundantStreams,
    ScheduleEvents,
    LookupEntries,
    ScatterRows,
    GatherRows,
    MessageBufferMemory,
    MessageBufferCount,
}

impl Resource {
    pub fn code(&self) -> i32 {
        match self {
            Self::ConstantBuffer => 142,
            Self::RedundantStreams => 143,
            Self::ScheduleEvents => 144,
            Self::LookupEntries => 145,
            Self::ScatterRows => 146,
            Self::GatherRows => 147,
            Self::MessageBufferMemory => EPERM,
            Self::MessageBufferCount => 156,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    InvalidArgument(&'static str),
    InvalidTransition,
    AlreadyLinked,
    AlreadyMember,
    PermissionDenied(&'static str),
    ValidationFailed(Violation),
    ResourceExhausted(Resource),
    InternalInconsistency(&'static str),
    NoFreeScheduleTable,
    ConfigMismatch { expected: u32, found: u32 },
    UnknownBuffer(String),
    Io(String),
}

impl Error {
    /// The negative errno-style value for this error.
    pub fn code(&self) -> i32 {
        let code = match self {
            Self::InvalidArgument(_) | Self::InvalidTransition => EINVAL,
            Self::AlreadyLinked => EINVAL,
            Self::AlreadyMember => EPERM,
            Self::PermissionDenied(_) => EPERM,
            Self::ValidationFailed(violation) => violation.code(),
            Self::ResourceExhausted(resource) => resource.code(),
            Self::InternalInconsistency(_) => 153,
            Self::NoFreeScheduleTable => 157,
            Self::ConfigMismatch { .. } => EEXIST,
            Self::UnknownBuffer(_) => 160,
            Self::Io(_) => EIO,
        };
        -code
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidArgument(what) => write!(f, "ERROR: invalid argument: {}", what),
            Self::PermissionDenied(what) => write!(f, "ERROR: not permitted: {}", what),
            Self::InternalInconsistency(what) => {
                write!(f, "ERROR: internal inconsistency: {}", what)
            }
            Self::ConfigMismatch { expected, found } => write!(
                f,
                "ERROR: configuration id {} on hardware, expected {}",
                found, expected
            ),
            Self::UnknownBuffer(name) => write!(f, "ERROR: no message buffer named {}", name),
            Self::Io(msg) => write!(f, "ERROR: device access failed: {}", msg),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_negative() {
        assert_eq!(Error::ValidationFailed(Violation::ScheduleGap).code(), -151);
        assert_eq!(Error::ResourceExhausted(Resource::LookupEntries).code(), -145);
        assert_eq!(Error::InvalidTransition.code(), -EINVAL);
        assert_eq!(Error::NoFreeScheduleTable.code(), -157);
        assert_eq!(Error::UnknownBuffer("acm_x".to_string()).code(), -160);
    }

    #[test]
    fn display_names_the_problem() {
        let e = Error::ConfigMismatch {
            expected: 3,
            found: 4,
        };
        assert_eq!(
            e.to_string(),
            "ERROR: configuration id 4 on hardware, expected 3"
        );
        assert_eq!(Error::AlreadyMember.to_string(), "AlreadyMember");
    }
}
