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

use crate::module::Speed;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Propagation delays of one link speed, in nanoseconds.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LinkDelays {
    pub chip_in: u32,
    pub chip_eg: u32,
    pub phy_in: u32,
    pub phy_eg: u32,
    pub ser_bypass: u32,
    pub ser_switch: u32,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct Delays {
    pub speed_100m: LinkDelays,
    pub speed_1g: LinkDelays,
}

impl Delays {
    pub fn for_speed(&self, speed: Speed) -> LinkDelays {
        match speed {
            Speed::Speed100M => self.speed_100m,
            Speed::Speed1G => self.speed_1g,
        }
    }
}

impl Default for Delays {
    fn default() -> Self {
        Self {
            speed_100m: LinkDelays {
                chip_in: 50,
                chip_eg: 120,
                phy_in: 404,
                phy_eg: 444,
                ser_bypass: 2844,
                ser_switch: 3900,
            },
            speed_1g: LinkDelays {
                chip_in: 50,
                chip_eg: 120,
                phy_in: 298,
                phy_eg: 199,
                ser_bypass: 439,
                ser_switch: 940,
            },
        }
    }
}

/// Library-wide settings, read once when a configuration is created.
///
/// Any key missing from a settings file keeps its default.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Timeout written to every base recovery row of a redundant pair.
    pub recovery_timeout_ms: u32,
    /// Every message buffer name starts with this.
    pub msg_buffer_prefix: String,
    pub delays: Delays,
    /// Root of the driver's sysfs tree.
    pub base_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recovery_timeout_ms: 1000,
            msg_buffer_prefix: "acm_".to_string(),
            delays: Delays::default(),
            base_path: PathBuf::from("/sys/devices/acm/"),
        }
    }
}

impl Settings {
    pub fn from_file<P: AsRef<Path>>(file_name: P) -> anyhow::Result<Self> {
        let path = file_name.as_ref();
        let file = File::open(path)
            .with_context(|| format!("settings file {} not found", path.display()))?;
        let reader = BufReader::new(file);
        let settings = serde_yaml::from_reader(reader)
            .with_context(|| format!("malformed settings in {}", path.display()))?;
        log::debug!("settings loaded from {}", path.display());
        Ok(settings)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(settings: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(settings)?)
    }
}
