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

use crate::buffers::MessageBuffer;
use crate::device::{Device, StatusItem};
use crate::error::Error;
use crate::hw::{tables, ConfigFile, ConfigState, CLEAR_ALL_PATTERN, MODULE_COUNT};
use crate::module::{ConnectionMode, Module, ModuleId, Speed};
use crate::settings::Settings;
use crate::stream::{Stream, StreamId};
use chrono::{DateTime, Utc};

/// The root of a configuration: owns every stream and module and the
/// device they are written to.
///
/// Streams and modules are created detached. A stream joins a module with
/// `add_module_stream`, and a module joins the configuration with
/// `add_module`. Once `apply_configuration` succeeds the configuration is
/// frozen; only its schedule can be replaced afterwards.
pub struct Configuration<D: Device> {
    pub(crate) device: D,
    pub(crate) settings: Settings,
    pub(crate) streams: Vec<Option<Stream>>,
    pub(crate) modules: Vec<Option<Module>>,
    pub(crate) bypass: [Option<ModuleId>; MODULE_COUNT],
    pub(crate) applied: bool,
    pub(crate) buffers: Vec<MessageBuffer>,
}

impl<D: Device> Configuration<D> {
    pub fn new(device: D, settings: Settings) -> Self {
        Self {
            device,
            settings,
            streams: Vec::new(),
            modules: Vec::new(),
            bypass: [None; MODULE_COUNT],
            applied: false,
            buffers: Vec::new(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_applied(&self) -> bool {
        self.applied
    }

    pub fn stream(&self, id: StreamId) -> Result<&Stream, Error> {
        self.streams
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidArgument("no such stream"))
    }

    pub(crate) fn stream_mut(&mut self, id: StreamId) -> Result<&mut Stream, Error> {
        self.streams
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(Error::InvalidArgument("no such stream"))
    }

    pub fn module(&self, id: ModuleId) -> Result<&Module, Error> {
        self.modules
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidArgument("no such module"))
    }

    pub(crate) fn module_mut(&mut self, id: ModuleId) -> Result<&mut Module, Error> {
        self.modules
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(Error::InvalidArgument("no such module"))
    }

    /// The module attached as hardware module `index`.
    pub fn bypass(&self, index: usize) -> Option<ModuleId> {
        self.bypass.get(index).copied().flatten()
    }

    pub fn is_attached(&self, module: ModuleId) -> bool {
        self.bypass.contains(&Some(module))
    }

    /// Attached modules, module 0 first.
    pub(crate) fn attached(&self) -> impl Iterator<Item = (ModuleId, &Module)> + '_ {
        self.bypass
            .iter()
            .flatten()
            .filter_map(move |id| self.module(*id).ok().map(|module| (*id, module)))
    }

    /// True once the stream's module belongs to an applied configuration.
    /// Any missing link reads as not applied.
    pub fn config_applied(&self, stream: StreamId) -> bool {
        self.stream(stream)
            .ok()
            .and_then(|stream| stream.module)
            .map(|module| self.applied && self.is_attached(module))
            .unwrap_or(false)
    }

    /// Scheduler tick in nanoseconds.
    pub(crate) fn tick_ns(&self) -> Result<u32, Error> {
        let freq = self.device.status(StatusItem::TimeFreq)?;
        let tick = if freq > 0 { 1_000_000_000 / freq } else { 0 };
        if tick <= 0 || tick > u32::MAX as i64 {
            log::error!("invalid tick duration {} from frequency {}", tick, freq);
            return Err(Error::InvalidArgument("tick duration"));
        }
        Ok(tick as u32)
    }

    pub fn create_module(
        &mut self,
        mode: ConnectionMode,
        speed: Speed,
        index: usize,
    ) -> Result<ModuleId, Error> {
        let delays = self.settings.delays.for_speed(speed);
        let module = Module::new(mode, speed, index, delays)?;
        let id = ModuleId(self.modules.len());
        self.modules.push(Some(module));
        log::debug!("created module {:?} as bypass {}", id, index);
        Ok(id)
    }

    /// Deletes a detached module together with its member streams.
    pub fn delete_module(&mut self, id: ModuleId) -> Result<(), Error> {
        if self.is_attached(id) {
            log::error!("module {:?} is part of the configuration", id);
            return Err(Error::PermissionDenied("module added to configuration"));
        }
        let members = self.module(id)?.streams.clone();
        for stream in members.iter().rev() {
            self.stream_mut(*stream)?.module = None;
        }
        for stream in &members {
            if self.stream(*stream).is_ok() {
                self.delete_stream(*stream)?;
            }
        }
        self.modules[id.0] = None;
        log::debug!("deleted module {:?}", id);
        Ok(())
    }

    pub fn set_module_schedule(
        &mut self,
        id: ModuleId,
        cycle_ns: u32,
        start: DateTime<Utc>,
    ) -> Result<(), Error> {
        self.module_mut(id)?.set_schedule(cycle_ns, start)
    }

    /// Attaches a module in the bypass slot of its hardware index.
    pub fn add_module(&mut self, id: ModuleId) -> Result<(), Error> {
        if self.applied {
            return Err(Error::PermissionDenied("configuration already applied"));
        }
        let index = self.module(id)?.index;
        if self.bypass[index].is_some() {
            log::error!("configuration already has a module {}", index);
            return Err(Error::InvalidArgument("module id already configured"));
        }
        self.bypass[index] = Some(id);
        if let Err(e) = self.validate_config(false) {
            log::warn!("module {:?} rejected: {}", id, e);
            self.bypass[index] = None;
            return Err(e);
        }
        Ok(())
    }

    /// Validates the configuration and writes all of it to the hardware.
    /// Only marked applied when every write succeeded.
    pub fn apply_configuration(&mut self, identifier: u32) -> Result<(), Error> {
        if identifier == 0 {
            return Err(Error::InvalidArgument("configuration identifier 0"));
        }
        if self.applied {
            return Err(Error::PermissionDenied("configuration already applied"));
        }
        self.recompile()?;
        self.validate_config(true)?;
        self.write_configuration(identifier)?;
        self.applied = true;
        log::info!("configuration {} applied", identifier);
        Ok(())
    }

    /// Replaces only the schedules of a configuration already running as
    /// `expected`.
    pub fn apply_schedule_only(&mut self, identifier: u32, expected: u32) -> Result<(), Error> {
        if identifier == 0 {
            return Err(Error::InvalidArgument("configuration identifier 0"));
        }
        let found = tables::read_configuration_id(&self.device)?;
        if found != expected {
            log::error!("configuration {} on hardware, expected {}", found, expected);
            return Err(Error::ConfigMismatch { expected, found });
        }
        self.recompile()?;
        self.validate_config(true)?;
        self.write_schedules()?;
        tables::write_configuration_id(&mut self.device, identifier)?;
        log::info!("schedule of configuration {} applied", identifier);
        Ok(())
    }

    /// Stops the ACM and clears its tables.
    pub fn disable_configuration(&mut self) -> Result<(), Error> {
        log::info!("disabling configuration");
        tables::write_u32(&mut self.device, ConfigFile::ClearAllFpga, 0, CLEAR_ALL_PATTERN)
    }

    fn write_configuration(&mut self, identifier: u32) -> Result<(), Error> {
        tables::write_u32(&mut self.device, ConfigFile::ClearAllFpga, 0, CLEAR_ALL_PATTERN)?;
        tables::write_u32(
            &mut self.device,
            ConfigFile::ConfigState,
            0,
            ConfigState::Start.into(),
        )?;
        tables::write_buffers(&mut self.device, &self.buffers)?;
        let attached = self.attached().map(|(id, _)| id).collect::<Vec<_>>();
        for id in &attached {
            self.write_module(*id)?;
        }
        self.write_base_recovery()?;
        tables::write_configuration_id(&mut self.device, identifier)?;
        tables::write_u32(
            &mut self.device,
            ConfigFile::ConfigState,
            0,
            ConfigState::End.into(),
        )?;
        self.write_schedules()
    }

    fn write_schedules(&mut self) -> Result<(), Error> {
        let attached = self.attached().map(|(id, _)| id).collect::<Vec<_>>();
        for id in attached {
            self.write_schedule(id)?;
        }
        Ok(())
    }
}
