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

//! Fixed-rate interval of a 5-field cron schedule.
//!
//! The interval is the distance between the next two fire times. That is exact
//! for minute, hour, day and weekday based schedules. Calendar-variable
//! schedules (day-of-month, month) yield the gap between their next two
//! occurrences, which changes over the year.

use crate::{WardenError, WardenResult};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;

const CRON_FIELDS: usize = 5;

fn malformed(expr: &str, reason: impl Into<String>) -> WardenError {
    WardenError::MalformedSchedule {
        expr: expr.to_string(),
        reason: reason.into(),
    }
}

/// Standard cron numbers Sunday as 0 or 7, the `cron` crate as 1..=7 starting at Sunday.
fn convert_weekday(n: u32) -> u32 {
    (n % 7) + 1
}

fn convert_weekday_item(expr: &str, item: &str) -> WardenResult<String> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (item, None),
    };

    let parse = |s: &str| -> WardenResult<Option<u32>> {
        if s.chars().all(|c| c.is_ascii_digit()) {
            let n: u32 = s
                .parse()
                .map_err(|_| malformed(expr, format!("invalid day of week {}", s)))?;
            if n > 7 {
                return Err(malformed(expr, format!("day of week {} out of range", n)));
            }
            Ok(Some(n))
        } else {
            Ok(None)
        }
    };

    let converted = match range.split_once('-') {
        Some((start, end)) => match (parse(start)?, parse(end)?) {
            (Some(start), Some(end)) => {
                let (from, to) = (convert_weekday(start), convert_weekday(end));
                if to < from && end == 7 {
                    // e.g. 5-7 (Fri..Sun) becomes 6-7,1
                    format!("{}-7,1", from)
                } else {
                    format!("{}-{}", from, to)
                }
            }
            _ => range.to_string(),
        },
        None => match parse(range)? {
            Some(n) => convert_weekday(n).to_string(),
            None => range.to_string(),
        },
    };

    Ok(match step {
        Some(step) => format!("{}/{}", converted, step),
        None => converted,
    })
}

fn normalize(expr: &str) -> WardenResult<String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != CRON_FIELDS {
        return Err(malformed(
            expr,
            format!("expected {} fields, found {}", CRON_FIELDS, fields.len()),
        ));
    }

    let weekday = fields[4]
        .split(',')
        .map(|item| convert_weekday_item(expr, item))
        .collect::<WardenResult<Vec<_>>>()?
        .join(",");

    Ok(format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], weekday
    ))
}

pub fn parse_schedule(expr: &str) -> WardenResult<Schedule> {
    let normalized = normalize(expr)?;
    Schedule::from_str(&normalized).map_err(|e| malformed(expr, e.to_string()))
}

/// Repeat interval of `expr`, measured from the next fire time after `from`.
pub fn interval_after(expr: &str, from: DateTime<Utc>) -> WardenResult<Duration> {
    let schedule = parse_schedule(expr)?;
    let mut upcoming = schedule.after(&from);
    let (first, second) = match (upcoming.next(), upcoming.next()) {
        (Some(first), Some(second)) => (first, second),
        _ => return Err(malformed(expr, "schedule does not repeat")),
    };

    (second - first)
        .to_std()
        .map_err(|e| malformed(expr, e.to_string()))
}

/// Repeat interval of `expr` from now. Exact for fixed-rate schedules; for
/// calendar-variable ones (monthly) it is the gap between the next two runs.
pub fn interval_of(expr: &str) -> WardenResult<Duration> {
    interval_after(expr, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fixed_rate_intervals() {
        let cases = [
            ("0 0 * * *", Duration::from_secs(24 * 3600)),
            ("0 0 * * 1", Duration::from_secs(7 * 24 * 3600)),
            ("*/1 * * * *", Duration::from_secs(60)),
            ("0 */1 * * *", Duration::from_secs(3600)),
            ("*/15 * * * *", Duration::from_secs(15 * 60)),
            ("0 0 * * 0", Duration::from_secs(7 * 24 * 3600)),
            ("0 0 * * 7", Duration::from_secs(7 * 24 * 3600)),
        ];
        for (expr, expected) in cases {
            assert_eq!(interval_of(expr).unwrap(), expected, "{}", expr);
        }
    }

    #[test]
    fn test_weekday_ranges() {
        // Mon..Fri at midnight, measured from a Monday
        let monday = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(
            interval_after("0 0 * * 1-5", monday).unwrap(),
            Duration::from_secs(24 * 3600)
        );
        assert_eq!(normalize("0 0 * * 5-7").unwrap(), "0 0 0 * * 6-7,1");
        assert_eq!(normalize("0 0 * * 1,3").unwrap(), "0 0 0 * * 2,4");
        assert_eq!(normalize("0 0 * * MON").unwrap(), "0 0 0 * * MON");
    }

    #[test]
    fn test_malformed() {
        for expr in ["invalid-cron", "", "* * * *", "61 * * * *", "0 0 * * 8"] {
            let err = interval_of(expr).unwrap_err();
            assert!(
                matches!(err, WardenError::MalformedSchedule { .. }),
                "{}: {}",
                expr,
                err
            );
        }
    }

    #[test]
    fn test_calendar_variable_schedule() {
        // The first of each month: January to February is 31 days.
        let from = Utc.with_ymd_and_hms(2023, 12, 15, 12, 0, 0).unwrap();
        assert_eq!(
            interval_after("0 0 1 * *", from).unwrap(),
            Duration::from_secs(31 * 24 * 3600)
        );
    }
}
