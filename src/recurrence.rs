//! Weekly recurrence expansion.
//!
//! A rule is anchored on its first date; occurrences fall every
//! `interval_weeks * 7` days from that anchor. Expansion is always bounded by
//! a query window and never yields an occurrence whose start lies before the
//! window start, so a window opening mid-day drops that day's earlier
//! occurrence instead of booking into the past.

use chrono::{Datelike, NaiveDate, NaiveTime, TimeDelta, Weekday};

use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklyRule {
    pub start_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub interval_weeks: u32,
    /// Exclusive.
    pub end_date: Option<NaiveDate>,
}

impl WeeklyRule {
    /// The rule behind a REGULAR slot. Exceptions have none.
    pub fn from_slot(slot: &AvailabilitySlot) -> Option<Self> {
        match slot.kind {
            SlotKind::Regular { repeating } => Some(Self {
                start_date: slot.start_date,
                start_time: slot.start_time,
                end_time: slot.end_time,
                interval_weeks: repeating.interval_weeks,
                end_date: repeating.end_date,
            }),
            SlotKind::Exception { .. } => None,
        }
    }

    /// The open-ended weekly rule of a template entry, anchored on or after `anchor`.
    pub fn from_template(entry: &ClassTemplateEntry, anchor: NaiveDate) -> Self {
        let end_time = entry.hour + TimeDelta::minutes(entry.duration_minutes as i64);
        Self {
            start_date: first_on_or_after(anchor, entry.day),
            start_time: entry.hour,
            end_time,
            interval_weeks: 1,
            end_date: None,
        }
    }

    pub fn weekday(&self) -> Weekday {
        self.start_date.weekday()
    }
}

/// A concrete dated occurrence of a rule or exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl Occurrence {
    pub fn span(&self) -> Span {
        Span::new(to_ms(self.date, self.start_time), to_ms(self.date, self.end_time))
    }

    /// Identity used to match exceptions against rule occurrences.
    pub fn key(&self) -> (NaiveDate, NaiveTime) {
        (self.date, self.start_time)
    }
}

pub fn first_on_or_after(date: NaiveDate, weekday: Weekday) -> NaiveDate {
    let ahead = (7 + weekday.num_days_from_monday() - date.weekday().num_days_from_monday()) % 7;
    date + TimeDelta::days(ahead as i64)
}

/// Expand `rule` into the ordered occurrences starting inside `window`.
pub fn expand(rule: &WeeklyRule, window: &Span) -> Vec<Occurrence> {
    let mut out = Vec::new();
    if rule.end_time <= rule.start_time {
        return out;
    }
    let step_days = 7 * rule.interval_weeks.max(1) as i64;

    let window_date = date_of(window.start);
    let mut date = if window_date > rule.start_date {
        let offset = (window_date - rule.start_date).num_days();
        let steps = (offset + step_days - 1) / step_days;
        rule.start_date + TimeDelta::days(steps * step_days)
    } else {
        rule.start_date
    };

    loop {
        if rule.end_date.is_some_and(|end| date >= end) {
            break;
        }
        let start = to_ms(date, rule.start_time);
        if start >= window.end {
            break;
        }
        if start >= window.start {
            out.push(Occurrence {
                date,
                start_time: rule.start_time,
                end_time: rule.end_time,
            });
        }
        date = date + TimeDelta::days(step_days);
    }
    out
}
