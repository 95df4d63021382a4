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

use crate::state::ObjectKey;
use crate::utils::schedule;
use crate::WardenResult;
use std::collections::BTreeMap;
use std::time::Duration;

pub struct CommonUtils;

impl CommonUtils {
    /// Merge maps left to right, later entries win.
    /// Returns `None` when there is nothing to merge; `None` inputs are skipped.
    pub fn merge_maps<K, V>(maps: &[Option<&BTreeMap<K, V>>]) -> Option<BTreeMap<K, V>>
    where
        K: Ord + Clone,
        V: Clone,
    {
        if maps.is_empty() {
            return None;
        }

        let mut merged = BTreeMap::new();
        for map in maps.iter().flatten() {
            for (k, v) in map.iter() {
                merged.insert(k.clone(), v.clone());
            }
        }
        Some(merged)
    }

    /// `key("ns", Some("name"))` is `ns/name`, `key("name", None)` is a cluster scoped key.
    pub fn key(namespace_or_name: impl AsRef<str>, name: Option<&str>) -> ObjectKey {
        match name {
            Some(name) => ObjectKey::new(namespace_or_name.as_ref(), name),
            None => ObjectKey::cluster(namespace_or_name.as_ref()),
        }
    }

    pub fn is_empty_string(s: impl AsRef<str>) -> bool {
        s.as_ref().trim().is_empty()
    }

    pub fn if_condition_or<T>(condition: bool, true_val: T, false_val: T) -> T {
        if condition {
            true_val
        } else {
            false_val
        }
    }

    pub fn compute_schedule_interval(cron_schedule: impl AsRef<str>) -> WardenResult<Duration> {
        schedule::interval_of(cron_schedule.as_ref())
    }
}
