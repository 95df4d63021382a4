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

use crate::utils::{schedule, DurationUnit};
use crate::{WardenError, WardenResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Task controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConf {
    // Number of tasks reconciled concurrently.
    pub workers: usize,

    // Requeue delay while waiting for a job to disappear.
    #[serde(skip)]
    pub deletion_poll_interval: Duration,
    #[serde(alias = "deletion_poll_interval")]
    pub deletion_poll_interval_str: String,

    // How long a deleting task waits for its job before reporting a timeout.
    #[serde(skip)]
    pub dependent_deletion_timeout: Duration,
    #[serde(alias = "dependent_deletion_timeout")]
    pub dependent_deletion_timeout_str: String,

    // Per-key retry backoff.
    #[serde(skip)]
    pub backoff_base: Duration,
    #[serde(alias = "backoff_base")]
    pub backoff_base_str: String,

    #[serde(skip)]
    pub backoff_max: Duration,
    #[serde(alias = "backoff_max")]
    pub backoff_max_str: String,

    // Attempts for a status write that keeps hitting resource version conflicts.
    pub status_update_retries: usize,

    // Fixed-rate cron schedule for resyncing tasks whose job is still running.
    pub resync_schedule: String,
    #[serde(skip)]
    pub resync_interval: Duration,

    // Image vector yaml, the embedded default is used when unset.
    pub image_vector_path: Option<String>,
}

impl ControllerConf {
    pub fn init(&mut self) -> WardenResult<()> {
        self.deletion_poll_interval =
            DurationUnit::from_str(&self.deletion_poll_interval_str)?.as_duration();
        self.dependent_deletion_timeout =
            DurationUnit::from_str(&self.dependent_deletion_timeout_str)?.as_duration();
        self.backoff_base = DurationUnit::from_str(&self.backoff_base_str)?.as_duration();
        self.backoff_max = DurationUnit::from_str(&self.backoff_max_str)?.as_duration();
        self.resync_interval = schedule::interval_of(&self.resync_schedule)?;

        if self.workers == 0 {
            return Err(WardenError::Config("workers must be at least 1".to_string()));
        }
        if self.backoff_base > self.backoff_max {
            return Err(WardenError::Config(format!(
                "backoff_base {} exceeds backoff_max {}",
                self.backoff_base_str, self.backoff_max_str
            )));
        }

        Ok(())
    }
}

impl Default for ControllerConf {
    fn default() -> Self {
        Self {
            workers: 3,

            deletion_poll_interval: Duration::from_secs(5),
            deletion_poll_interval_str: "5s".to_string(),

            dependent_deletion_timeout: Duration::from_secs(300),
            dependent_deletion_timeout_str: "5m".to_string(),

            backoff_base: Duration::from_millis(100),
            backoff_base_str: "100ms".to_string(),

            backoff_max: Duration::from_secs(300),
            backoff_max_str: "5m".to_string(),

            status_update_retries: 5,

            resync_schedule: "*/5 * * * *".to_string(),
            resync_interval: Duration::from_secs(300),

            image_vector_path: None,
        }
    }
}
