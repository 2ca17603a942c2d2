use std::fmt;

use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::Serialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::materialize;
use super::SchedulingError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or_default()
}

/// Why a proposed lesson time was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotInFuture,
    OutsideAvailability,
    /// Overlaps the given lesson of the same teacher.
    Overlaps(Ulid),
    /// The referenced slot no longer exists or no longer covers the time.
    SlotUnavailable(Ulid),
    /// The student already has a weekly entry at this time.
    TemplateOverlap(Ulid),
    /// Lost every optimistic retry to concurrent writers.
    ConcurrentUpdate,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NotInFuture => write!(f, "scheduled time is not in the future"),
            Rejection::OutsideAvailability => {
                write!(f, "time is not inside the teacher's free availability")
            }
            Rejection::Overlaps(id) => write!(f, "overlaps lesson {id}"),
            Rejection::SlotUnavailable(id) => write!(f, "slot {id} is no longer available"),
            Rejection::TemplateOverlap(id) => write!(f, "overlaps weekly entry {id}"),
            Rejection::ConcurrentUpdate => write!(f, "calendar changed concurrently, try again"),
        }
    }
}

impl Rejection {
    /// Metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::NotInFuture => "not_in_future",
            Rejection::OutsideAvailability => "outside_availability",
            Rejection::Overlaps(_) => "overlap",
            Rejection::SlotUnavailable(_) => "slot_unavailable",
            Rejection::TemplateOverlap(_) => "template_overlap",
            Rejection::ConcurrentUpdate => "concurrent_update",
        }
    }
}

/// What a proposed lesson must satisfy on top of not overlapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct BookingCheck {
    /// The span must fit inside a materialized free slot.
    pub require_free_slot: bool,
    /// ...and that free slot must come from this slot.
    pub slot_id: Option<Ulid>,
    /// Lesson being moved; it never blocks itself.
    pub exclude: Option<Ulid>,
}

impl BookingCheck {
    pub fn in_free_slot(slot_id: Option<Ulid>) -> Self {
        Self {
            require_free_slot: true,
            slot_id,
            exclude: None,
        }
    }

    pub fn overlap_only() -> Self {
        Self::default()
    }

    pub fn excluding(mut self, class_id: Ulid) -> Self {
        self.exclude = Some(class_id);
        self
    }
}

/// Boolean answer for "can this be booked?" queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub ok: bool,
    pub reason: Option<String>,
}

impl From<Result<(), Rejection>> for Verdict {
    fn from(r: Result<(), Rejection>) -> Self {
        match r {
            Ok(()) => Verdict { ok: true, reason: None },
            Err(rej) => Verdict {
                ok: false,
                reason: Some(rej.to_string()),
            },
        }
    }
}

pub(crate) fn validate_span(span: &Span) -> Result<(), SchedulingError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(SchedulingError::validation("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn validate_window(window: &Span) -> Result<(), SchedulingError> {
    validate_span(window)?;
    if window.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(SchedulingError::validation("query window too wide"));
    }
    Ok(())
}

pub(crate) fn validate_duration(minutes: u32) -> Result<(), SchedulingError> {
    if !(MIN_LESSON_MINUTES..=MAX_LESSON_MINUTES).contains(&minutes) {
        return Err(SchedulingError::validation(format!(
            "duration must be between {MIN_LESSON_MINUTES} and {MAX_LESSON_MINUTES} minutes"
        )));
    }
    Ok(())
}

/// A weekly class must finish before midnight of the day it starts.
pub(crate) fn validate_same_day(hour: NaiveTime, minutes: u32) -> Result<(), SchedulingError> {
    if hour.num_seconds_from_midnight() / 60 + minutes >= 24 * 60 {
        return Err(SchedulingError::validation("class must end before midnight"));
    }
    Ok(())
}

pub(crate) fn validate_text(field: &str, value: &str) -> Result<(), SchedulingError> {
    if value.len() > MAX_TEXT_LEN {
        return Err(SchedulingError::validation(format!("{field} too long")));
    }
    Ok(())
}

/// Lesson span starting at `at`. Fails on out-of-range instants.
pub(crate) fn lesson_span(at: Ms, minutes: u32) -> Result<Span, SchedulingError> {
    validate_duration(minutes)?;
    let span = Span {
        start: at,
        end: at + minutes as Ms * MINUTE_MS,
    };
    validate_span(&span)?;
    Ok(span)
}

/// Whether `span` may be committed on `calendar` at `now`.
///
/// Checks run cheapest first: future, overlap, then the availability overlay.
pub fn check_booking(
    calendar: &TeacherCalendar,
    span: &Span,
    now: Ms,
    check: &BookingCheck,
) -> Result<(), Rejection> {
    if span.start <= now {
        return Err(Rejection::NotInFuture);
    }

    if let Some(other) = calendar
        .occupying(span)
        .find(|l| Some(l.id) != check.exclude)
    {
        return Err(Rejection::Overlaps(other.id));
    }

    if !check.require_free_slot {
        return Ok(());
    }

    if let Some(slot_id) = check.slot_id
        && calendar.slot(slot_id).is_none_or(|s| !s.is_open())
    {
        return Err(Rejection::SlotUnavailable(slot_id));
    }

    // Slots never cross midnight, so any covering occurrence starts that day.
    let day = Span::new(start_of_day(date_of(span.start)), span.end);
    let view = materialize(calendar, &day, check.exclude);
    let covering = view.free_slots.iter().find(|f| {
        f.span.contains_span(span) && check.slot_id.is_none_or(|id| id == f.slot_id)
    });
    match (covering, check.slot_id) {
        (Some(_), _) => Ok(()),
        (None, Some(slot_id)) => Err(Rejection::SlotUnavailable(slot_id)),
        (None, None) => Err(Rejection::OutsideAvailability),
    }
}

/// Lesson that would occupy a weekly time on a given date.
pub(crate) fn weekly_span(date: NaiveDate, hour: NaiveTime, minutes: u32) -> Span {
    let start = to_ms(date, hour);
    Span::new(start, start + minutes as Ms * MINUTE_MS)
}

/// Whether two weekly entries on the same weekday overlap in time.
pub(crate) fn template_entries_overlap(a: &ClassTemplateEntry, b: &ClassTemplateEntry) -> bool {
    if a.day != b.day {
        return false;
    }
    let anchor = NaiveDate::MIN;
    weekly_span(anchor, a.hour, a.duration_minutes)
        .overlaps(&weekly_span(anchor, b.hour, b.duration_minutes))
}
