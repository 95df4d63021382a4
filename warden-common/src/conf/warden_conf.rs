// Copyright 2025 OPPO.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::conf::{ControllerConf, LogConf};
use crate::WardenResult;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WardenConf {
    pub controller: ControllerConf,
    pub log: LogConf,
}

impl WardenConf {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> WardenResult<Self> {
        let mut conf: WardenConf = toml::from_str(s)?;
        conf.init()?;
        Ok(conf)
    }

    pub fn from_file(path: impl AsRef<Path>) -> WardenResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn init(&mut self) -> WardenResult<()> {
        self.controller.init()
    }
}
