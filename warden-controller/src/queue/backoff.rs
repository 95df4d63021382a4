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

use rand::Rng;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;

/// Per-item exponential backoff: `base * 2^failures`, capped at `max`, plus up to 10% jitter.
pub struct ExponentialBackoff<T> {
    base: Duration,
    max: Duration,
    jitter: bool,
    failures: Mutex<HashMap<T, u32>>,
}

impl<T: Eq + Hash + Clone> ExponentialBackoff<T> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: true,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay for the given number of previous failures, without jitter.
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Record one more failure of `item` and return how long to wait before retrying it.
    pub fn next(&self, item: &T) -> Duration {
        let failures = match self.failures.lock() {
            Ok(mut map) => {
                let count = map.entry(item.clone()).or_insert(0);
                let prev = *count;
                *count = count.saturating_add(1);
                prev
            }
            Err(_) => 0,
        };

        let delay = self.delay(failures);
        if !self.jitter || delay.is_zero() {
            return delay;
        }

        let spread = (delay.as_millis() as u64 / 10).max(1);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=spread));
        (delay + jitter).min(self.max)
    }

    pub fn failures(&self, item: &T) -> u32 {
        self.failures
            .lock()
            .map(|x| x.get(item).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn forget(&self, item: &T) {
        if let Ok(mut map) = self.failures.lock() {
            map.remove(item);
        }
    }
}
