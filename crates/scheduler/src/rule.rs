//! 重复规则
//!
//! 支持两种形式：日历规则（`freq`/`dtstart`/`by*` 映射）与 CRON 表达式字符串。
//! 所有时间均按 UTC 处理。

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use chrono::{
    DateTime, Datelike, Days, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc,
    Weekday,
};
use cron::Schedule;
use serde::Deserialize;

use assembler_core::{AssemblyError, AssemblyResult, Component, ConfigValue};

/// How far ahead occurrence searches look before giving up.
const LOOKAHEAD_MONTHS: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Frequency {
    Yearly,
    Monthly,
    Weekly,
    Daily,
    Hourly,
    Minutely,
    Secondly,
}

impl Frequency {
    const ALL: [Frequency; 7] = [
        Frequency::Yearly,
        Frequency::Monthly,
        Frequency::Weekly,
        Frequency::Daily,
        Frequency::Hourly,
        Frequency::Minutely,
        Frequency::Secondly,
    ];

    /// `0` is yearly, `6` is secondly.
    pub fn from_index(index: u64) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn name(self) -> &'static str {
        match self {
            Frequency::Yearly => "YEARLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Daily => "DAILY",
            Frequency::Hourly => "HOURLY",
            Frequency::Minutely => "MINUTELY",
            Frequency::Secondly => "SECONDLY",
        }
    }
}

impl FromStr for Frequency {
    type Err = AssemblyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|freq| freq.name() == upper)
            .ok_or_else(|| AssemblyError::InvalidRule(format!("unknown frequency '{s}'")))
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn parse_weekday(s: &str) -> AssemblyResult<Weekday> {
    match s.trim().to_ascii_uppercase().as_str() {
        "MO" => Ok(Weekday::Mon),
        "TU" => Ok(Weekday::Tue),
        "WE" => Ok(Weekday::Wed),
        "TH" => Ok(Weekday::Thu),
        "FR" => Ok(Weekday::Fri),
        "SA" => Ok(Weekday::Sat),
        "SU" => Ok(Weekday::Sun),
        _ => Err(AssemblyError::InvalidRule(format!("unknown weekday '{s}'"))),
    }
}

fn weekday_from_index(index: u64) -> AssemblyResult<Weekday> {
    u8::try_from(index)
        .ok()
        .and_then(|i| Weekday::try_from(i).ok())
        .ok_or_else(|| AssemblyError::InvalidRule(format!("weekday index {index} out of range 0-6")))
}

/// Accepts RFC 3339, `YYYY-MM-DD[ T]HH:MM:SS` or `YYYY-MM-DD`; naive times
/// are taken as UTC.
pub fn parse_datetime(s: &str) -> AssemblyResult<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
        .map_err(|_| AssemblyError::InvalidRule(format!("cannot parse datetime '{s}'")))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NameOrIndex {
    Index(u64),
    Name(String),
}

/// Mapping form of a calendar rule, as written in configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleSpec {
    freq: NameOrIndex,
    dtstart: Option<String>,
    interval: Option<u32>,
    count: Option<u32>,
    until: Option<String>,
    bymonth: Option<OneOrMany<u32>>,
    bymonthday: Option<OneOrMany<i32>>,
    byweekday: Option<OneOrMany<NameOrIndex>>,
    byhour: Option<OneOrMany<u32>>,
    byminute: Option<OneOrMany<u32>>,
    bysecond: Option<OneOrMany<u32>>,
}

/// Builder for [`RRule`]; `build` applies the calendar defaults.
#[derive(Debug, Clone)]
pub struct RRuleBuilder {
    freq: Frequency,
    dtstart: Option<DateTime<Utc>>,
    interval: u32,
    count: Option<u32>,
    until: Option<DateTime<Utc>>,
    bymonth: Option<Vec<u32>>,
    bymonthday: Option<Vec<i32>>,
    byweekday: Option<Vec<Weekday>>,
    byhour: Option<Vec<u32>>,
    byminute: Option<Vec<u32>>,
    bysecond: Option<Vec<u32>>,
}

impl RRuleBuilder {
    pub fn dtstart(mut self, dtstart: DateTime<Utc>) -> Self {
        self.dtstart = Some(dtstart);
        self
    }

    pub fn interval(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    pub fn count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn bymonth(mut self, months: Vec<u32>) -> Self {
        self.bymonth = Some(months);
        self
    }

    pub fn bymonthday(mut self, days: Vec<i32>) -> Self {
        self.bymonthday = Some(days);
        self
    }

    pub fn byweekday(mut self, weekdays: Vec<Weekday>) -> Self {
        self.byweekday = Some(weekdays);
        self
    }

    pub fn byhour(mut self, hours: Vec<u32>) -> Self {
        self.byhour = Some(hours);
        self
    }

    pub fn byminute(mut self, minutes: Vec<u32>) -> Self {
        self.byminute = Some(minutes);
        self
    }

    pub fn bysecond(mut self, seconds: Vec<u32>) -> Self {
        self.bysecond = Some(seconds);
        self
    }

    pub fn build(self) -> AssemblyResult<RRule> {
        if self.interval == 0 {
            return Err(AssemblyError::InvalidRule("interval must be at least 1".to_string()));
        }
        let dtstart = truncate_to_second(self.dtstart.unwrap_or_else(Utc::now).naive_utc());

        let bymonth = checked_units("bymonth", self.bymonth, 1..=12)?;
        let byhour = checked_units("byhour", self.byhour, 0..=23)?;
        let byminute = checked_units("byminute", self.byminute, 0..=59)?;
        let bysecond = checked_units("bysecond", self.bysecond, 0..=59)?;
        let mut bymonthday = self.bymonthday.map(sorted);
        if let Some(day) = bymonthday
            .iter()
            .flatten()
            .find(|day| **day == 0 || !(-31..=31).contains(*day))
        {
            return Err(AssemblyError::InvalidRule(format!("bymonthday value {day} out of range")));
        }
        let mut byweekday = self.byweekday;
        let mut bymonth = bymonth;

        if bymonthday.is_none() && byweekday.is_none() {
            match self.freq {
                Frequency::Yearly => {
                    bymonth.get_or_insert_with(|| vec![dtstart.month()]);
                    bymonthday = Some(vec![dtstart.day() as i32]);
                }
                Frequency::Monthly => bymonthday = Some(vec![dtstart.day() as i32]),
                Frequency::Weekly => byweekday = Some(vec![dtstart.weekday()]),
                _ => {}
            }
        }

        let pin = |by: Option<Vec<u32>>, unit: Frequency, value: u32| match by {
            None if self.freq < unit => Some(vec![value]),
            other => other,
        };

        Ok(RRule {
            freq: self.freq,
            dtstart,
            interval: self.interval,
            count: self.count,
            until: self.until.map(|until| until.naive_utc()),
            bymonth,
            bymonthday,
            byweekday,
            byhour: pin(byhour, Frequency::Hourly, dtstart.hour()),
            byminute: pin(byminute, Frequency::Minutely, dtstart.minute()),
            bysecond: pin(bysecond, Frequency::Secondly, dtstart.second()),
        })
    }
}

fn sorted<T: Ord>(mut values: Vec<T>) -> Vec<T> {
    values.sort();
    values.dedup();
    values
}

fn checked_units(
    key: &str,
    values: Option<Vec<u32>>,
    range: std::ops::RangeInclusive<u32>,
) -> AssemblyResult<Option<Vec<u32>>> {
    let Some(values) = values else {
        return Ok(None);
    };
    if let Some(bad) = values.iter().find(|v| !range.contains(*v)) {
        return Err(AssemblyError::InvalidRule(format!(
            "{key} value {bad} out of range {}-{}",
            range.start(),
            range.end()
        )));
    }
    Ok(Some(sorted(values)))
}

fn truncate_to_second(t: NaiveDateTime) -> NaiveDateTime {
    t.with_nanosecond(0).unwrap_or(t)
}

fn truncate_to(t: NaiveDateTime, unit: Frequency) -> NaiveDateTime {
    let (hour, minute, second) = match unit {
        Frequency::Hourly => (t.hour(), 0, 0),
        Frequency::Minutely => (t.hour(), t.minute(), 0),
        _ => (t.hour(), t.minute(), t.second()),
    };
    t.date()
        .and_hms_opt(hour, minute, second)
        .unwrap_or(t)
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.weekday().num_days_from_monday()))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(31, |last| last.day())
}

fn days_in_year(year: i32) -> u64 {
    if NaiveDate::from_ymd_opt(year, 2, 29).is_some() {
        366
    } else {
        365
    }
}

fn contains<T: PartialEq>(by: &Option<Vec<T>>, value: T) -> bool {
    by.as_ref().map_or(true, |values| values.contains(&value))
}

/// A calendar recurrence rule.
#[derive(Debug, Clone, PartialEq)]
pub struct RRule {
    freq: Frequency,
    dtstart: NaiveDateTime,
    interval: u32,
    count: Option<u32>,
    until: Option<NaiveDateTime>,
    bymonth: Option<Vec<u32>>,
    bymonthday: Option<Vec<i32>>,
    byweekday: Option<Vec<Weekday>>,
    byhour: Option<Vec<u32>>,
    byminute: Option<Vec<u32>>,
    bysecond: Option<Vec<u32>>,
}

impl RRule {
    pub fn builder(freq: Frequency) -> RRuleBuilder {
        RRuleBuilder {
            freq,
            dtstart: None,
            interval: 1,
            count: None,
            until: None,
            bymonth: None,
            bymonthday: None,
            byweekday: None,
            byhour: None,
            byminute: None,
            bysecond: None,
        }
    }

    /// Builds a rule from its configuration mapping.
    pub fn from_value(value: &ConfigValue) -> AssemblyResult<Self> {
        let spec: RuleSpec = value
            .deserialize()
            .map_err(|e| AssemblyError::InvalidRule(e.to_string()))?;

        let freq = match spec.freq {
            NameOrIndex::Index(index) => Frequency::from_index(index).ok_or_else(|| {
                AssemblyError::InvalidRule(format!("frequency index {index} out of range 0-6"))
            })?,
            NameOrIndex::Name(name) => name.parse()?,
        };

        let mut builder = Self::builder(freq);
        if let Some(dtstart) = spec.dtstart {
            builder = builder.dtstart(parse_datetime(&dtstart)?);
        }
        if let Some(interval) = spec.interval {
            builder = builder.interval(interval);
        }
        if let Some(count) = spec.count {
            builder = builder.count(count);
        }
        if let Some(until) = spec.until {
            builder = builder.until(parse_datetime(&until)?);
        }
        if let Some(months) = spec.bymonth {
            builder = builder.bymonth(months.into_vec());
        }
        if let Some(days) = spec.bymonthday {
            builder = builder.bymonthday(days.into_vec());
        }
        if let Some(weekdays) = spec.byweekday {
            let weekdays = weekdays
                .into_vec()
                .into_iter()
                .map(|day| match day {
                    NameOrIndex::Index(index) => weekday_from_index(index),
                    NameOrIndex::Name(name) => parse_weekday(&name),
                })
                .collect::<AssemblyResult<Vec<_>>>()?;
            builder = builder.byweekday(weekdays);
        }
        if let Some(hours) = spec.byhour {
            builder = builder.byhour(hours.into_vec());
        }
        if let Some(minutes) = spec.byminute {
            builder = builder.byminute(minutes.into_vec());
        }
        if let Some(seconds) = spec.bysecond {
            builder = builder.bysecond(seconds.into_vec());
        }
        builder.build()
    }

    pub fn freq(&self) -> Frequency {
        self.freq
    }

    pub fn dtstart(&self) -> DateTime<Utc> {
        self.dtstart.and_utc()
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn count(&self) -> Option<u32> {
        self.count
    }

    pub fn until(&self) -> Option<DateTime<Utc>> {
        self.until.map(|until| until.and_utc())
    }

    /// Occurrences in order, starting at `dtstart`, searched up to ten
    /// years past it.
    pub fn iter(&self) -> Occurrences<'_> {
        self.occurrences_from(self.dtstart, lookahead(self.dtstart))
    }

    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let after = after.naive_utc();
        self.occurrences_from(after, lookahead(after))
            .find(|t| t.naive_utc() > after)
    }

    /// Whether an occurrence falls strictly between `after` and `before`;
    /// the search stops at `before`.
    pub fn any_between(&self, after: DateTime<Utc>, before: DateTime<Utc>) -> bool {
        let (after, before) = (after.naive_utc(), before.naive_utc());
        self.occurrences_from(after, before)
            .find(|t| t.naive_utc() > after)
            .is_some_and(|t| t.naive_utc() < before)
    }

    /// Occurrences strictly between `after` and `before`.
    pub fn between(&self, after: DateTime<Utc>, before: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let (after, before) = (after.naive_utc(), before.naive_utc());
        self.occurrences_from(after, before)
            .skip_while(|t| t.naive_utc() <= after)
            .take_while(|t| t.naive_utc() < before)
            .collect()
    }

    pub fn upcoming(&self, from: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
        let from = from.naive_utc();
        self.occurrences_from(from, lookahead(from))
            .skip_while(|t| t.naive_utc() <= from)
            .take(n)
            .collect()
    }

    fn occurrences_from(&self, after: NaiveDateTime, horizon: NaiveDateTime) -> Occurrences<'_> {
        // counted rules must be walked from the start to number occurrences
        let period = if self.count.is_some() || after <= self.dtstart {
            0
        } else {
            let elapsed = self.periods_until(after);
            elapsed - elapsed.rem_euclid(i64::from(self.interval))
        };
        Occurrences {
            rule: self,
            period,
            pending: VecDeque::new(),
            emitted: 0,
            horizon,
            finished: false,
        }
    }

    /// Whole periods between `dtstart`'s period and the one holding `t`.
    fn periods_until(&self, t: NaiveDateTime) -> i64 {
        let start = self.dtstart;
        match self.freq {
            Frequency::Yearly => i64::from(t.year() - start.year()),
            Frequency::Monthly => {
                i64::from(t.year() - start.year()) * 12 + i64::from(t.month())
                    - i64::from(start.month())
            }
            Frequency::Weekly => (week_start(t.date()) - week_start(start.date())).num_days() / 7,
            Frequency::Daily => (t.date() - start.date()).num_days(),
            Frequency::Hourly => {
                (truncate_to(t, Frequency::Hourly) - truncate_to(start, Frequency::Hourly))
                    .num_hours()
            }
            Frequency::Minutely => {
                (truncate_to(t, Frequency::Minutely) - truncate_to(start, Frequency::Minutely))
                    .num_minutes()
            }
            Frequency::Secondly => (t - start).num_seconds(),
        }
    }

    fn period_start(&self, period: i64) -> Option<NaiveDateTime> {
        let start = self.dtstart;
        let midnight = |date: NaiveDate| date.and_time(NaiveTime::MIN);
        match self.freq {
            Frequency::Yearly => {
                let year = i32::try_from(i64::from(start.year()) + period).ok()?;
                NaiveDate::from_ymd_opt(year, 1, 1).map(midnight)
            }
            Frequency::Monthly => {
                let index = i64::from(start.year()) * 12 + i64::from(start.month0()) + period;
                let year = i32::try_from(index.div_euclid(12)).ok()?;
                let month = u32::try_from(index.rem_euclid(12)).ok()? + 1;
                NaiveDate::from_ymd_opt(year, month, 1).map(midnight)
            }
            Frequency::Weekly => week_start(start.date())
                .checked_add_days(Days::new(u64::try_from(period.checked_mul(7)?).ok()?))
                .map(midnight),
            Frequency::Daily => start
                .date()
                .checked_add_days(Days::new(u64::try_from(period).ok()?))
                .map(midnight),
            Frequency::Hourly => truncate_to(start, Frequency::Hourly)
                .checked_add_signed(Duration::try_hours(period)?),
            Frequency::Minutely => truncate_to(start, Frequency::Minutely)
                .checked_add_signed(Duration::try_minutes(period)?),
            Frequency::Secondly => start.checked_add_signed(Duration::try_seconds(period)?),
        }
    }

    fn matches_date(&self, date: NaiveDate) -> bool {
        let month_day = |day: &i32| {
            if *day > 0 {
                date.day() as i32 == *day
            } else {
                date.day() as i32 - days_in_month(date.year(), date.month()) as i32 - 1 == *day
            }
        };
        contains(&self.bymonth, date.month())
            && self
                .bymonthday
                .as_ref()
                .map_or(true, |days| days.iter().any(month_day))
            && contains(&self.byweekday, date.weekday())
    }

    /// Values of a time unit inside one period: a fixed value when the
    /// period is that fine, otherwise the `by*` expansion.
    fn unit_values(&self, unit: Frequency, by: &Option<Vec<u32>>, current: u32) -> Vec<u32> {
        if self.freq >= unit {
            if contains(by, current) {
                vec![current]
            } else {
                Vec::new()
            }
        } else {
            by.clone().unwrap_or_else(|| vec![current])
        }
    }

    fn candidates(&self, begin: NaiveDateTime) -> Vec<NaiveDateTime> {
        let date = begin.date();
        let span = match self.freq {
            Frequency::Yearly => days_in_year(date.year()),
            Frequency::Monthly => u64::from(days_in_month(date.year(), date.month())),
            Frequency::Weekly => 7,
            _ => 1,
        };
        let days: Vec<NaiveDate> = date
            .iter_days()
            .take(span as usize)
            .filter(|day| self.matches_date(*day))
            .collect();
        if days.is_empty() {
            return Vec::new();
        }

        let hours = self.unit_values(Frequency::Hourly, &self.byhour, begin.hour());
        let minutes = self.unit_values(Frequency::Minutely, &self.byminute, begin.minute());
        let seconds = self.unit_values(Frequency::Secondly, &self.bysecond, begin.second());

        let mut out = Vec::with_capacity(days.len() * hours.len() * minutes.len() * seconds.len());
        for day in &days {
            for hour in &hours {
                for minute in &minutes {
                    for second in &seconds {
                        if let Some(t) = day.and_hms_opt(*hour, *minute, *second) {
                            out.push(t);
                        }
                    }
                }
            }
        }
        out
    }
}

fn lookahead(from: NaiveDateTime) -> NaiveDateTime {
    from.checked_add_months(Months::new(LOOKAHEAD_MONTHS))
        .unwrap_or(NaiveDateTime::MAX)
}

/// Iterator over the occurrences of an [`RRule`].
pub struct Occurrences<'a> {
    rule: &'a RRule,
    period: i64,
    pending: VecDeque<NaiveDateTime>,
    emitted: u32,
    horizon: NaiveDateTime,
    finished: bool,
}

impl Iterator for Occurrences<'_> {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(candidate) = self.pending.pop_front() {
                if candidate < self.rule.dtstart {
                    continue;
                }
                let past_until = self.rule.until.is_some_and(|until| candidate > until);
                let exhausted = self.rule.count.is_some_and(|count| self.emitted >= count);
                if past_until || exhausted {
                    self.finished = true;
                    self.pending.clear();
                    return None;
                }
                self.emitted += 1;
                return Some(candidate.and_utc());
            }
            if self.finished {
                return None;
            }

            match self.rule.period_start(self.period) {
                Some(begin)
                    if begin <= self.horizon
                        && self.rule.until.map_or(true, |until| begin <= until) =>
                {
                    self.pending.extend(self.rule.candidates(begin));
                    self.period += i64::from(self.rule.interval);
                }
                _ => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}

/// A cron expression (`sec min hour day-of-month month day-of-week [year]`).
#[derive(Debug, Clone)]
pub struct CronRule {
    expression: String,
    schedule: Schedule,
}

impl CronRule {
    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl FromStr for CronRule {
    type Err = AssemblyError;

    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let schedule = Schedule::from_str(expression).map_err(|e| {
            AssemblyError::InvalidRule(format!("invalid cron expression '{expression}': {e}"))
        })?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }
}

/// Either a calendar rule or a cron expression.
#[derive(Debug, Clone)]
pub enum RecurrenceRule {
    Calendar(RRule),
    Cron(CronRule),
}

impl RecurrenceRule {
    pub fn cron(expression: &str) -> AssemblyResult<Self> {
        expression.parse().map(RecurrenceRule::Cron)
    }

    /// A string is a cron expression, a mapping a calendar rule; an already
    /// built rule component is reused.
    pub fn from_value(value: &ConfigValue) -> AssemblyResult<Self> {
        match value {
            ConfigValue::String(expression) => Self::cron(expression),
            ConfigValue::Map(_) => RRule::from_value(value).map(RecurrenceRule::Calendar),
            ConfigValue::Component(component) => component
                .downcast::<RecurrenceRule>()
                .map(|rule| rule.as_ref().clone())
                .ok_or_else(|| {
                    AssemblyError::InvalidRule(format!(
                        "component '{}' is not a recurrence rule",
                        component.name()
                    ))
                }),
            other => Err(AssemblyError::InvalidRule(format!(
                "expected a cron string or a rule mapping, got {}",
                other.kind()
            ))),
        }
    }

    /// First occurrence strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            RecurrenceRule::Calendar(rule) => rule.next_after(after),
            RecurrenceRule::Cron(rule) => rule.schedule.after(&after).find(|t| *t > after),
        }
    }

    pub fn any_between(&self, after: DateTime<Utc>, before: DateTime<Utc>) -> bool {
        match self {
            RecurrenceRule::Calendar(rule) => rule.any_between(after, before),
            RecurrenceRule::Cron(rule) => rule
                .schedule
                .after(&after)
                .find(|t| *t > after)
                .is_some_and(|next| next < before),
        }
    }

    pub fn between(&self, after: DateTime<Utc>, before: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        match self {
            RecurrenceRule::Calendar(rule) => rule.between(after, before),
            RecurrenceRule::Cron(rule) => rule
                .schedule
                .after(&after)
                .skip_while(|t| *t <= after)
                .take_while(|t| *t < before)
                .collect(),
        }
    }

    pub fn upcoming(&self, from: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
        match self {
            RecurrenceRule::Calendar(rule) => rule.upcoming(from, n),
            RecurrenceRule::Cron(rule) => rule
                .schedule
                .after(&from)
                .skip_while(|t| *t <= from)
                .take(n)
                .collect(),
        }
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecurrenceRule::Calendar(rule) => write!(
                f,
                "{} every {} from {}",
                rule.freq,
                rule.interval,
                rule.dtstart.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            RecurrenceRule::Cron(rule) => write!(f, "cron '{}'", rule.expression),
        }
    }
}

impl Component for RecurrenceRule {
    fn component_name(&self) -> &str {
        "RecurrenceRule"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn rule(spec: serde_json::Value) -> RRule {
        RRule::from_value(&ConfigValue::from(spec)).unwrap()
    }

    #[test]
    fn test_parse_datetime_forms() {
        let expected = utc(2024, 3, 1, 12, 30, 0);
        assert_eq!(parse_datetime("2024-03-01T12:30:00Z").unwrap(), expected);
        assert_eq!(parse_datetime("2024-03-01T14:30:00+02:00").unwrap(), expected);
        assert_eq!(parse_datetime("2024-03-01 12:30:00").unwrap(), expected);
        assert_eq!(parse_datetime("2024-03-01").unwrap(), utc(2024, 3, 1, 0, 0, 0));
        assert!(parse_datetime("yesterday").is_err());
    }

    #[test]
    fn test_frequency_names_and_indices() {
        assert_eq!("daily".parse::<Frequency>().unwrap(), Frequency::Daily);
        assert_eq!(Frequency::from_index(0), Some(Frequency::Yearly));
        assert_eq!(Frequency::from_index(6), Some(Frequency::Secondly));
        assert_eq!(Frequency::from_index(7), None);
    }

    #[test]
    fn test_daily_pins_time_of_dtstart() {
        let r = rule(json!({"freq": "DAILY", "dtstart": "2024-01-01T08:15:30Z", "count": 3}));
        let all: Vec<_> = r.iter().collect();
        assert_eq!(
            all,
            vec![
                utc(2024, 1, 1, 8, 15, 30),
                utc(2024, 1, 2, 8, 15, 30),
                utc(2024, 1, 3, 8, 15, 30)
            ]
        );
    }

    #[test]
    fn test_hourly_with_interval_and_next_after() {
        let r = rule(json!({"freq": 4, "interval": 2, "dtstart": "2024-01-01 00:10:00"}));
        assert_eq!(r.next_after(utc(2024, 1, 1, 0, 10, 0)), Some(utc(2024, 1, 1, 2, 10, 0)));
        assert_eq!(r.next_after(utc(2024, 1, 5, 3, 0, 0)), Some(utc(2024, 1, 5, 4, 10, 0)));
        assert_eq!(r.next_after(utc(2023, 1, 1, 0, 0, 0)), Some(utc(2024, 1, 1, 0, 10, 0)));
    }

    #[test]
    fn test_weekly_byweekday_expansion() {
        let r = rule(json!({
            "freq": "WEEKLY",
            "dtstart": "2024-01-03T09:00:00Z",
            "byweekday": ["MO", "FR"],
            "count": 4,
        }));
        // 2024-01-03 is a Wednesday
        assert_eq!(
            r.iter().collect::<Vec<_>>(),
            vec![
                utc(2024, 1, 5, 9, 0, 0),
                utc(2024, 1, 8, 9, 0, 0),
                utc(2024, 1, 12, 9, 0, 0),
                utc(2024, 1, 15, 9, 0, 0)
            ]
        );
    }

    #[test]
    fn test_monthly_negative_monthday_is_last_day() {
        let r = rule(json!({"freq": "MONTHLY", "dtstart": "2024-01-01", "bymonthday": -1, "count": 3}));
        assert_eq!(
            r.iter().collect::<Vec<_>>(),
            vec![utc(2024, 1, 31, 0, 0, 0), utc(2024, 2, 29, 0, 0, 0), utc(2024, 3, 31, 0, 0, 0)]
        );
    }

    #[test]
    fn test_monthly_skips_months_without_the_day() {
        let r = rule(json!({"freq": "MONTHLY", "dtstart": "2024-01-31", "count": 3}));
        assert_eq!(
            r.iter().collect::<Vec<_>>(),
            vec![utc(2024, 1, 31, 0, 0, 0), utc(2024, 3, 31, 0, 0, 0), utc(2024, 5, 31, 0, 0, 0)]
        );
    }

    #[test]
    fn test_yearly_defaults_to_anniversary() {
        let r = rule(json!({"freq": "YEARLY", "dtstart": "2020-02-29T06:00:00Z"}));
        assert_eq!(r.upcoming(utc(2020, 3, 1, 0, 0, 0), 2), vec![
            utc(2024, 2, 29, 6, 0, 0),
            utc(2028, 2, 29, 6, 0, 0)
        ]);
    }

    #[test]
    fn test_until_is_inclusive_and_between_is_exclusive() {
        let r = rule(json!({
            "freq": "MINUTELY",
            "dtstart": "2024-01-01T00:00:00Z",
            "until": "2024-01-01T00:03:00Z",
        }));
        assert_eq!(r.iter().count(), 4);
        assert_eq!(
            r.between(utc(2024, 1, 1, 0, 0, 0), utc(2024, 1, 1, 0, 3, 0)),
            vec![utc(2024, 1, 1, 0, 1, 0), utc(2024, 1, 1, 0, 2, 0)]
        );
        assert_eq!(r.next_after(utc(2024, 1, 1, 0, 3, 0)), None);
    }

    #[test]
    fn test_count_limits_later_searches() {
        let r = rule(json!({"freq": "SECONDLY", "dtstart": "2024-01-01T00:00:00Z", "count": 1}));
        assert_eq!(r.next_after(utc(2023, 12, 31, 23, 59, 59)), Some(utc(2024, 1, 1, 0, 0, 0)));
        assert_eq!(r.next_after(utc(2024, 1, 1, 0, 0, 0)), None);
    }

    #[test]
    fn test_invalid_specs_are_rejected() {
        for spec in [
            json!({"freq": "FORTNIGHTLY"}),
            json!({"freq": 9}),
            json!({"freq": "DAILY", "interval": 0}),
            json!({"freq": "DAILY", "byhour": 24}),
            json!({"freq": "DAILY", "bymonthday": 0}),
            json!({"freq": "DAILY", "byweekday": "XX"}),
            json!({"freq": "DAILY", "byweekno": 3}),
            json!({"dtstart": "2024-01-01"}),
        ] {
            let err = RRule::from_value(&ConfigValue::from(spec.clone())).unwrap_err();
            assert!(matches!(err, AssemblyError::InvalidRule(_)), "{spec}: {err}");
        }
    }

    #[test]
    fn test_cron_rule() {
        let r = RecurrenceRule::cron("0 */15 * * * *").unwrap();
        let from = utc(2024, 1, 1, 10, 0, 0);
        assert_eq!(r.next_after(from), Some(utc(2024, 1, 1, 10, 15, 0)));
        assert_eq!(r.upcoming(from, 2), vec![utc(2024, 1, 1, 10, 15, 0), utc(2024, 1, 1, 10, 30, 0)]);
        assert!(r.any_between(from, utc(2024, 1, 1, 10, 16, 0)));
        assert!(!r.any_between(from, utc(2024, 1, 1, 10, 15, 0)));
        assert!(RecurrenceRule::cron("not a cron").is_err());
    }

    #[test]
    fn test_rule_from_value_forms() {
        assert!(matches!(
            RecurrenceRule::from_value(&ConfigValue::from("0 0 * * * *")).unwrap(),
            RecurrenceRule::Cron(_)
        ));
        assert!(matches!(
            RecurrenceRule::from_value(&ConfigValue::from(json!({"freq": "DAILY"}))).unwrap(),
            RecurrenceRule::Calendar(_)
        ));
        let component = ConfigValue::component(RecurrenceRule::cron("0 0 * * * *").unwrap());
        assert!(RecurrenceRule::from_value(&component).is_ok());
        assert!(RecurrenceRule::from_value(&ConfigValue::Integer(3)).is_err());
    }
}
