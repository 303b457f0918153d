// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta, Timelike};
use thiserror::Error;

// Field name   | Mandatory? | Allowed values | Allowed special characters
// ----------   | ---------- | -------------- | --------------------------
// Seconds      | No         | 0-59           | * / , -
// Minutes      | Yes        | 0-59           | * / , -
// Hours        | Yes        | 0-23           | * / , -
// Day of month | Yes        | 1-31           | * / , -
// Month        | Yes        | 1-12           | * / , -
// Day of week  | Yes        | 0-6            | * / , - (Sunday = 0)

/// Errors produced while parsing or scheduling a cron expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("invalid expr {expr}: expected 5 or 6 fields, got {got}")]
    FieldCount { expr: String, got: usize },
    #[error("invalid expr {expr}: {reason}")]
    Field { expr: String, reason: String },
    #[error("next fire time not found")]
    NoUpcomingFire,
}

/// A parsed cron expression: one 64-bit set per field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronExpr {
    sec: u64,
    min: u64,
    hour: u64,
    dom: u64,
    month: u64,
    dow: u64,
}

// All bits set for a field left blank as `*`.
const DOM_BLANK: u64 = 0xffff_fffe; // 1-31
const DOW_BLANK: u64 = 0x7f; // 0-6

impl CronExpr {
    /// Parse a five-field (`min hour dom month dow`) or six-field (leading
    /// seconds) expression. Items support `*`, `n`, `n-m`, `*/k`, `n/k`
    /// (meaning `n-max/k`) and `n-m/k`, comma-separated.
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let mut fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 && fields.len() != 6 {
            return Err(CronError::FieldCount {
                expr: expr.to_string(),
                got: fields.len(),
            });
        }
        if fields.len() == 5 {
            // Seconds are optional and default to the top of the minute.
            fields.insert(0, "0");
        }

        let field = |i: usize, min: u32, max: u32| {
            parse_field(fields[i], min, max).map_err(|reason| CronError::Field {
                expr: expr.to_string(),
                reason,
            })
        };

        Ok(Self {
            sec: field(0, 0, 59)?,
            min: field(1, 0, 59)?,
            hour: field(2, 0, 23)?,
            dom: field(3, 1, 31)?,
            month: field(4, 1, 12)?,
            dow: field(5, 0, 6)?,
        })
    }

    /// The next matching instant strictly after `from`, truncated to whole
    /// seconds. `None` when no instant matches within roughly two years
    /// (an unsatisfiable day/month combination).
    pub fn next(&self, from: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut t = from.with_nanosecond(0)? + TimeDelta::seconds(1);
        let year = t.year();
        let mut init = false;

        'retry: loop {
            if t.year() > year + 1 {
                return None;
            }

            while (1u64 << t.month()) & self.month == 0 {
                if !init {
                    init = true;
                    t = first_of_month(t)?;
                }
                t = next_month(t)?;
                if t.month() == 1 {
                    continue 'retry;
                }
            }

            while !self.match_day(t) {
                if !init {
                    init = true;
                    t = t.date().and_hms_opt(0, 0, 0)?;
                }
                t += TimeDelta::days(1);
                if t.day() == 1 {
                    continue 'retry;
                }
            }

            while (1u64 << t.hour()) & self.hour == 0 {
                if !init {
                    init = true;
                    t = t.with_minute(0)?.with_second(0)?;
                }
                t += TimeDelta::hours(1);
                if t.hour() == 0 {
                    continue 'retry;
                }
            }

            while (1u64 << t.minute()) & self.min == 0 {
                if !init {
                    init = true;
                    t = t.with_second(0)?;
                }
                t += TimeDelta::minutes(1);
                if t.minute() == 0 {
                    continue 'retry;
                }
            }

            while (1u64 << t.second()) & self.sec == 0 {
                init = true;
                t += TimeDelta::seconds(1);
                if t.second() == 0 {
                    continue 'retry;
                }
            }

            return Some(t);
        }
    }

    /// Day matching: a blank day-of-month defers to day-of-week and vice
    /// versa; when both are constrained, either one matching suffices.
    fn match_day(&self, t: NaiveDateTime) -> bool {
        if self.dom == DOM_BLANK {
            return (1u64 << t.weekday().num_days_from_sunday()) & self.dow != 0;
        }
        if self.dow == DOW_BLANK {
            return (1u64 << t.day()) & self.dom != 0;
        }
        (1u64 << t.weekday().num_days_from_sunday()) & self.dow != 0
            || (1u64 << t.day()) & self.dom != 0
    }

    #[cfg(test)]
    pub(crate) fn minute_bits(&self) -> u64 {
        self.min
    }
}

fn first_of_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(t.year(), t.month(), 1)?.and_hms_opt(0, 0, 0)
}

fn next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let (y, m) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1)?.and_hms_opt(0, 0, 0)
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<u64, String> {
    let mut bits = 0u64;

    for item in field.split(',') {
        let slash: Vec<&str> = item.split('/').collect();
        if slash.len() > 2 {
            return Err(format!("too many slashes: {item}"));
        }

        let dash: Vec<&str> = slash[0].split('-').collect();
        if dash.len() > 2 {
            return Err(format!("too many hyphens: {}", slash[0]));
        }

        let (start, end) = if dash[0] == "*" {
            if dash.len() != 1 {
                return Err(format!("invalid range: {}", slash[0]));
            }
            (min, max)
        } else {
            let start: u32 = dash[0]
                .parse()
                .map_err(|_| format!("invalid range: {}", slash[0]))?;
            let end = if dash.len() == 1 {
                // `n/k` reads as `n-max/k`; a bare `n` is just `n`.
                if slash.len() == 2 { max } else { start }
            } else {
                dash[1]
                    .parse()
                    .map_err(|_| format!("invalid range: {}", slash[0]))?
            };
            (start, end)
        };

        if start > end {
            return Err(format!("invalid range: {}", slash[0]));
        }
        if start < min || end > max {
            return Err(format!("out of range [{min}, {max}]: {}", slash[0]));
        }

        let incr: u32 = if slash.len() == 1 {
            1
        } else {
            match slash[1].parse() {
                Ok(k) if k > 0 => k,
                _ => return Err(format!("invalid increment: {}", slash[1])),
            }
        };

        if incr == 1 {
            bits |= !(u64::MAX << (end + 1)) & (u64::MAX << start);
        } else {
            let mut i = start;
            while i <= end {
                bits |= 1u64 << i;
                i += incr;
            }
        }
    }

    Ok(bits)
}
