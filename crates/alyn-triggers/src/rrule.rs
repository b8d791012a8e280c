//! RFC 5545 recurrence evaluation, restricted to the subset reminder
//! schedules actually use: FREQ (MINUTELY/HOURLY/DAILY/WEEKLY/MONTHLY),
//! INTERVAL, BYDAY (weekly only), UNTIL. Other parts are ignored.
//!
//! Sub-daily frequencies advance by fixed UTC durations; daily and larger
//! frequencies step the civil clock in the trigger's timezone so a 09:00
//! reminder stays at 09:00 across DST transitions.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDateTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use tracing::debug;

use crate::error::{Result, TriggerError};

/// Upper bound on civil-time stepping, to keep a pathological rule from
/// spinning (covers several centuries of daily occurrences).
const MAX_STEPS: usize = 200_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

/// A parsed recurrence rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub freq: Frequency,
    pub interval: u32,
    /// Weekdays for `FREQ=WEEKLY;BYDAY=…`; empty otherwise.
    pub by_day: Vec<Weekday>,
    pub until: Option<DateTime<Utc>>,
}

impl RecurrenceRule {
    /// Parse an RRULE string such as `FREQ=MINUTELY;INTERVAL=5`. A leading
    /// `RRULE:` prefix is accepted.
    pub fn parse(rule: &str) -> Result<Self> {
        let body = rule.trim();
        let body = body.strip_prefix("RRULE:").unwrap_or(body);

        let mut freq = None;
        let mut interval = 1u32;
        let mut by_day = Vec::new();
        let mut until = None;

        for part in body.split(';').filter(|p| !p.trim().is_empty()) {
            let Some((key, value)) = part.split_once('=') else {
                return Err(TriggerError::InvalidRule(format!(
                    "malformed part '{part}' in '{rule}'"
                )));
            };
            match key.trim().to_ascii_uppercase().as_str() {
                "FREQ" => {
                    freq = Some(match value.trim().to_ascii_uppercase().as_str() {
                        "MINUTELY" => Frequency::Minutely,
                        "HOURLY" => Frequency::Hourly,
                        "DAILY" => Frequency::Daily,
                        "WEEKLY" => Frequency::Weekly,
                        "MONTHLY" => Frequency::Monthly,
                        other => {
                            return Err(TriggerError::InvalidRule(format!(
                                "unsupported FREQ '{other}'"
                            )))
                        }
                    });
                }
                "INTERVAL" => {
                    interval = value.trim().parse::<u32>().map_err(|_| {
                        TriggerError::InvalidRule(format!("bad INTERVAL '{value}'"))
                    })?;
                    if interval == 0 {
                        return Err(TriggerError::InvalidRule("INTERVAL must be >= 1".into()));
                    }
                }
                "BYDAY" => {
                    for token in value.split(',') {
                        by_day.push(parse_weekday(token.trim())?);
                    }
                }
                "UNTIL" => until = Some(parse_until(value.trim())?),
                other => {
                    debug!(part = other, "ignoring unsupported RRULE part");
                }
            }
        }

        let freq = freq
            .ok_or_else(|| TriggerError::InvalidRule(format!("missing FREQ in '{rule}'")))?;
        Ok(Self {
            freq,
            interval,
            by_day,
            until,
        })
    }

    /// First occurrence strictly after `after`, for a series anchored at
    /// `start` and evaluated in `tz`. `None` once the rule is exhausted.
    pub fn next_occurrence(
        &self,
        start: DateTime<Utc>,
        after: DateTime<Utc>,
        tz: Tz,
    ) -> Option<DateTime<Utc>> {
        let candidate = match self.freq {
            Frequency::Minutely => self.next_fixed_step(start, after, 60),
            Frequency::Hourly => self.next_fixed_step(start, after, 3600),
            Frequency::Daily => self.next_civil_step(start, after, tz, self.interval as i64),
            Frequency::Weekly => {
                if self.by_day.is_empty() {
                    self.next_civil_step(start, after, tz, 7 * self.interval as i64)
                } else {
                    self.next_weekly_by_day(start, after, tz)
                }
            }
            Frequency::Monthly => self.next_monthly(start, after, tz),
        }?;

        match self.until {
            Some(until) if candidate > until => None,
            _ => Some(candidate),
        }
    }

    /// Fixed-duration frequencies advance arithmetically; no civil
    /// calendar involved.
    fn next_fixed_step(
        &self,
        start: DateTime<Utc>,
        after: DateTime<Utc>,
        unit_secs: i64,
    ) -> Option<DateTime<Utc>> {
        let step_secs = unit_secs.checked_mul(self.interval as i64)?;
        if start > after {
            return Some(start);
        }
        let elapsed = (after - start).num_seconds();
        let steps = elapsed / step_secs + 1;
        Some(start + Duration::seconds(steps.checked_mul(step_secs)?))
    }

    fn next_civil_step(
        &self,
        start: DateTime<Utc>,
        after: DateTime<Utc>,
        tz: Tz,
        step_days: i64,
    ) -> Option<DateTime<Utc>> {
        let mut local = start.with_timezone(&tz).naive_local();
        for _ in 0..MAX_STEPS {
            let occurrence = resolve_local(local, tz)?;
            if occurrence > after {
                return Some(occurrence);
            }
            local += Duration::days(step_days);
        }
        None
    }

    fn next_weekly_by_day(
        &self,
        start: DateTime<Utc>,
        after: DateTime<Utc>,
        tz: Tz,
    ) -> Option<DateTime<Utc>> {
        let start_local = start.with_timezone(&tz).naive_local();
        // Monday-aligned week index relative to the anchor's week, so
        // INTERVAL=2 means every other calendar week.
        let anchor_offset = start_local.weekday().num_days_from_monday() as i64;
        let mut local = start_local;
        for _ in 0..MAX_STEPS {
            let days_since = (local.date() - start_local.date()).num_days();
            let week_index = (days_since + anchor_offset).div_euclid(7);
            if self.by_day.contains(&local.weekday())
                && week_index % self.interval as i64 == 0
            {
                let occurrence = resolve_local(local, tz)?;
                if occurrence > after {
                    return Some(occurrence);
                }
            }
            local += Duration::days(1);
        }
        None
    }

    fn next_monthly(
        &self,
        start: DateTime<Utc>,
        after: DateTime<Utc>,
        tz: Tz,
    ) -> Option<DateTime<Utc>> {
        let mut local = start.with_timezone(&tz).naive_local();
        for _ in 0..MAX_STEPS {
            let occurrence = resolve_local(local, tz)?;
            if occurrence > after {
                return Some(occurrence);
            }
            local = local.checked_add_months(Months::new(self.interval))?;
        }
        None
    }
}

/// Map a civil datetime back to an instant. In a DST gap the occurrence
/// shifts forward one hour; in a fold the earlier instant wins.
fn resolve_local(local: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_weekday(token: &str) -> Result<Weekday> {
    match token.to_ascii_uppercase().as_str() {
        "MO" => Ok(Weekday::Mon),
        "TU" => Ok(Weekday::Tue),
        "WE" => Ok(Weekday::Wed),
        "TH" => Ok(Weekday::Thu),
        "FR" => Ok(Weekday::Fri),
        "SA" => Ok(Weekday::Sat),
        "SU" => Ok(Weekday::Sun),
        other => Err(TriggerError::InvalidRule(format!("bad BYDAY token '{other}'"))),
    }
}

fn parse_until(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%SZ") {
        return Ok(naive.and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    Err(TriggerError::InvalidRule(format!("bad UNTIL '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn parse_minutely_with_interval() {
        let rule = RecurrenceRule::parse("FREQ=MINUTELY;INTERVAL=5").unwrap();
        assert_eq!(rule.freq, Frequency::Minutely);
        assert_eq!(rule.interval, 5);
    }

    #[test]
    fn parse_rejects_unknown_freq_and_missing_freq() {
        assert!(RecurrenceRule::parse("FREQ=SECONDLY").is_err());
        assert!(RecurrenceRule::parse("INTERVAL=5").is_err());
        assert!(RecurrenceRule::parse("FREQ=DAILY;INTERVAL=0").is_err());
    }

    #[test]
    fn parse_ignores_unsupported_parts() {
        let rule = RecurrenceRule::parse("FREQ=DAILY;COUNT=3;WKST=MO").unwrap();
        assert_eq!(rule.freq, Frequency::Daily);
    }

    #[test]
    fn minutely_advances_by_at_least_the_interval() {
        let rule = RecurrenceRule::parse("FREQ=MINUTELY;INTERVAL=5").unwrap();
        let start = utc(2026, 8, 1, 9, 0, 0);
        let next = rule.next_occurrence(start, start, Tz::UTC).unwrap();
        assert_eq!(next, utc(2026, 8, 1, 9, 5, 0));
    }

    #[test]
    fn occurrence_is_strictly_after_the_fire_time() {
        let rule = RecurrenceRule::parse("FREQ=MINUTELY;INTERVAL=5").unwrap();
        let start = utc(2026, 8, 1, 9, 0, 0);
        // Fired exactly on an occurrence: the same instant must not re-arm.
        let next = rule
            .next_occurrence(start, utc(2026, 8, 1, 9, 5, 0), Tz::UTC)
            .unwrap();
        assert_eq!(next, utc(2026, 8, 1, 9, 10, 0));
    }

    #[test]
    fn future_start_is_the_first_occurrence() {
        let rule = RecurrenceRule::parse("FREQ=HOURLY").unwrap();
        let start = utc(2026, 8, 2, 0, 0, 0);
        let next = rule
            .next_occurrence(start, utc(2026, 8, 1, 0, 0, 0), Tz::UTC)
            .unwrap();
        assert_eq!(next, start);
    }

    #[test]
    fn daily_keeps_local_clock_time_across_dst() {
        let rule = RecurrenceRule::parse("FREQ=DAILY").unwrap();
        let tz = chrono_tz::Europe::Paris;
        // 2026-03-28 09:00 Paris is UTC+1; clocks jump forward that night.
        let start = tz
            .with_ymd_and_hms(2026, 3, 28, 9, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let next = rule.next_occurrence(start, start, tz).unwrap();
        let next_local = next.with_timezone(&tz);
        assert_eq!(next_local.format("%Y-%m-%d %H:%M").to_string(), "2026-03-29 09:00");
        // Wall-clock gap between occurrences is 23 hours, not 24.
        assert_eq!((next - start).num_hours(), 23);
    }

    #[test]
    fn weekly_by_day_picks_the_next_listed_weekday() {
        let rule = RecurrenceRule::parse("FREQ=WEEKLY;BYDAY=MO,WE").unwrap();
        // 2026-08-03 is a Monday.
        let start = utc(2026, 8, 3, 8, 0, 0);
        let next = rule.next_occurrence(start, start, Tz::UTC).unwrap();
        assert_eq!(next, utc(2026, 8, 5, 8, 0, 0));
        let after_wed = rule.next_occurrence(start, next, Tz::UTC).unwrap();
        assert_eq!(after_wed, utc(2026, 8, 10, 8, 0, 0));
    }

    #[test]
    fn until_exhausts_the_series() {
        let rule = RecurrenceRule::parse("FREQ=DAILY;UNTIL=20260803T090000Z").unwrap();
        let start = utc(2026, 8, 1, 9, 0, 0);
        let second = rule.next_occurrence(start, start, Tz::UTC).unwrap();
        assert_eq!(second, utc(2026, 8, 2, 9, 0, 0));
        let third = rule.next_occurrence(start, second, Tz::UTC).unwrap();
        assert_eq!(third, utc(2026, 8, 3, 9, 0, 0));
        assert!(rule.next_occurrence(start, third, Tz::UTC).is_none());
    }
}
