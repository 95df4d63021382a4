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

use crate::{WardenError, WardenResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::fmt::Write;
use std::time::Duration;

static DURATION_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)(ns|us|µs|ms|s|m|h|d)").unwrap());

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Human readable duration, e.g. `500ms`, `10s`, `1h30m`.
///
/// A bare number is read as seconds. Rendering follows the Go `time.Duration`
/// format because that is what the backup-restore sidecar parses on its flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct DurationUnit {
    duration: Duration,
}

impl DurationUnit {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> WardenResult<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(WardenError::Config("empty duration".to_string()));
        }

        if let Ok(secs) = s.parse::<u64>() {
            return Ok(Self::new(Duration::from_secs(secs)));
        }

        let mut nanos: f64 = 0.0;
        let mut consumed = 0;
        for cap in DURATION_PART.captures_iter(s) {
            let whole = match cap.get(0) {
                Some(m) if m.start() == consumed => m,
                _ => return Err(WardenError::Config(format!("invalid duration: {}", s))),
            };
            consumed = whole.end();

            let value: f64 = cap[1]
                .parse()
                .map_err(|e| WardenError::Config(format!("invalid duration {}: {}", s, e)))?;
            let scale: f64 = match &cap[2] {
                "ns" => 1.0,
                "us" | "µs" => 1e3,
                "ms" => 1e6,
                "s" => 1e9,
                "m" => 60.0 * 1e9,
                "h" => 3600.0 * 1e9,
                "d" => 86400.0 * 1e9,
                unit => {
                    return Err(WardenError::Config(format!(
                        "invalid duration unit {} in {}",
                        unit, s
                    )))
                }
            };
            nanos += value * scale;
        }

        if consumed != s.len() {
            return Err(WardenError::Config(format!("invalid duration: {}", s)));
        }

        Ok(Self::new(Duration::from_nanos(nanos.round() as u64)))
    }

    pub fn as_duration(&self) -> Duration {
        self.duration
    }

    pub fn as_millis(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    /// Render in Go `time.Duration` style: `0s`, `1.5ms`, `10m0s`, `1h0m0s`.
    pub fn to_go_string(&self) -> String {
        let nanos = self.duration.as_nanos();
        if nanos == 0 {
            return "0s".to_string();
        }

        if nanos < NANOS_PER_SEC {
            let (unit, div) = if nanos < 1_000 {
                ("ns", 1)
            } else if nanos < 1_000_000 {
                ("µs", 1_000)
            } else {
                ("ms", 1_000_000)
            };
            return format!("{}{}", Self::fraction(nanos, div), unit);
        }

        let total_secs = self.duration.as_secs();
        let hours = total_secs / 3600;
        let minutes = (total_secs % 3600) / 60;
        let secs = (total_secs % 60) as u128 * NANOS_PER_SEC + self.duration.subsec_nanos() as u128;

        let mut out = String::new();
        if hours > 0 {
            let _ = write!(out, "{}h", hours);
        }
        if hours > 0 || minutes > 0 {
            let _ = write!(out, "{}m", minutes);
        }
        let _ = write!(out, "{}s", Self::fraction(secs, NANOS_PER_SEC));
        out
    }

    fn fraction(value: u128, unit: u128) -> String {
        let int = value / unit;
        let frac = value % unit;
        if frac == 0 {
            return int.to_string();
        }
        let width = unit.to_string().len() - 1;
        let digits = format!("{:0width$}", frac, width = width);
        format!("{}.{}", int, digits.trim_end_matches('0'))
    }
}

impl From<Duration> for DurationUnit {
    fn from(duration: Duration) -> Self {
        Self::new(duration)
    }
}

impl fmt::Display for DurationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_go_string())
    }
}
