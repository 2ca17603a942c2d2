use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use ulid::Ulid;

use crate::model::*;
use crate::recurrence::{expand, Occurrence, WeeklyRule};

// ── Availability Algorithm ────────────────────────────────────────

/// A bookable free interval, traced back to the slot that opened it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeSlot {
    pub slot_id: Ulid,
    pub title: String,
    pub color: Option<String>,
    pub from_exception: bool,
    pub span: Span,
}

impl FreeSlot {
    pub fn date(&self) -> NaiveDate {
        date_of(self.span.start)
    }

    pub fn start_time(&self) -> NaiveTime {
        to_naive(self.span.start).time()
    }

    pub fn end_time(&self) -> NaiveTime {
        to_naive(self.span.end).time()
    }

    pub fn weekday(&self) -> Weekday {
        self.date().weekday()
    }
}

/// Date-concrete view of one teacher's calendar over a window.
#[derive(Debug, Clone, Default)]
pub struct MaterializedAvailability {
    pub free_slots: Vec<FreeSlot>,
    pub booked_classes: Vec<ScheduledClass>,
    pub exceptions: Vec<AvailabilitySlot>,
}

/// A recurring weekly time, for "pick a weekly slot" views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyTime {
    pub slot_id: Ulid,
    pub title: String,
    pub weekday: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl WeeklyTime {
    /// Composite `weekday-startTime-endTime` key.
    pub fn key(&self) -> String {
        format!(
            "{}-{}-{}",
            self.weekday.num_days_from_sunday(),
            self.start_time.format("%H:%M"),
            self.end_time.format("%H:%M")
        )
    }
}

/// Expand active REGULAR slots over `window`, then overlay active exceptions.
/// Result is ordered by `(date, start_time)`, one occurrence per key.
pub fn occurrences<'a>(
    calendar: &'a TeacherCalendar,
    window: &Span,
) -> Vec<(Occurrence, &'a AvailabilitySlot)> {
    let mut by_key: BTreeMap<(NaiveDate, NaiveTime), (Occurrence, &AvailabilitySlot)> =
        BTreeMap::new();

    for slot in calendar.slots.iter().filter(|s| s.is_active) {
        if let Some(rule) = WeeklyRule::from_slot(slot) {
            for occ in expand(&rule, window) {
                by_key.insert(occ.key(), (occ, slot));
            }
        }
    }

    for slot in calendar.slots.iter().filter(|s| s.is_active) {
        let SlotKind::Exception { removed, replaces } = slot.kind else {
            continue;
        };
        let original = (slot.start_date, replaces.unwrap_or(slot.start_time));
        if removed {
            by_key.remove(&original);
            continue;
        }
        if replaces.is_some() {
            by_key.remove(&original);
        }
        if slot.end_time <= slot.start_time {
            continue;
        }
        let occ = Occurrence {
            date: slot.start_date,
            start_time: slot.start_time,
            end_time: slot.end_time,
        };
        let start = occ.span().start;
        if start >= window.start && start < window.end {
            by_key.insert(occ.key(), (occ, slot));
        }
    }

    by_key.into_values().collect()
}

/// Merge recurring slots, exceptions and booked lessons into free vs booked.
///
/// `exclude` leaves one lesson out of the booked set, so a lesson being moved
/// does not block its own new time.
pub fn materialize(
    calendar: &TeacherCalendar,
    window: &Span,
    exclude: Option<Ulid>,
) -> MaterializedAvailability {
    let booked_classes: Vec<ScheduledClass> = calendar
        .occupying(window)
        .filter(|l| Some(l.id) != exclude)
        .cloned()
        .collect();

    let mut booked: Vec<Span> = booked_classes.iter().map(|l| l.span()).collect();
    booked.sort_by_key(|s| s.start);
    let booked = merge_overlapping(&booked);

    let mut free_slots = Vec::new();
    for (occ, slot) in occurrences(calendar, window) {
        for piece in subtract_intervals(&[occ.span()], &booked) {
            free_slots.push(FreeSlot {
                slot_id: slot.id,
                title: slot.title.clone(),
                color: slot.color.clone(),
                from_exception: slot.is_exception(),
                span: piece,
            });
        }
    }

    let first_day = date_of(window.start);
    let last_day = date_of(window.end - 1);
    let exceptions = calendar
        .slots
        .iter()
        .filter(|s| s.is_exception() && s.start_date >= first_day && s.start_date <= last_day)
        .cloned()
        .collect();

    MaterializedAvailability {
        free_slots,
        booked_classes,
        exceptions,
    }
}

/// Collapse dated free slots into distinct weekly times, first occurrence wins.
pub fn distinct_weekly(free: &[FreeSlot]) -> Vec<WeeklyTime> {
    let mut seen: BTreeMap<(u32, NaiveTime, NaiveTime), WeeklyTime> = BTreeMap::new();
    for f in free {
        let weekly = WeeklyTime {
            slot_id: f.slot_id,
            title: f.title.clone(),
            weekday: f.weekday(),
            start_time: f.start_time(),
            end_time: f.end_time(),
        };
        seen.entry((
            weekly.weekday.num_days_from_sunday(),
            weekly.start_time,
            weekly.end_time,
        ))
        .or_insert(weekly);
    }
    seen.into_values().collect()
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{lesson, weekly_slot};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn weeks_from(date: NaiveDate, weeks: i64) -> Span {
        let start = start_of_day(date);
        Span::new(start, start + weeks * WEEK_MS)
    }

    fn exception(teacher_id: Ulid, date: NaiveDate, from: NaiveTime, to: NaiveTime, removed: bool, replaces: Option<NaiveTime>) -> AvailabilitySlot {
        AvailabilitySlot {
            id: Ulid::new(),
            teacher_id,
            title: "Exceção".into(),
            start_date: date,
            start_time: from,
            end_time: to,
            is_active: true,
            color: None,
            kind: SlotKind::Exception { removed, replaces },
        }
    }

    fn calendar_with(slots: Vec<AvailabilitySlot>) -> TeacherCalendar {
        let mut cal = TeacherCalendar::new(Ulid::new());
        cal.slots = slots;
        cal
    }

    // ── subtract_intervals ────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![Span::new(100, 200), Span::new(300, 400)];
        let remove = vec![Span::new(200, 300)];
        assert_eq!(subtract_intervals(&base, &remove), base);
    }

    #[test]
    fn subtract_full_overlap() {
        let base = vec![Span::new(100, 200)];
        let remove = vec![Span::new(50, 250)];
        assert!(subtract_intervals(&base, &remove).is_empty());
    }

    #[test]
    fn subtract_middle_punch() {
        let base = vec![Span::new(100, 300)];
        let remove = vec![Span::new(150, 200)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![Span::new(100, 150), Span::new(200, 300)]
        );
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let spans = vec![Span::new(100, 200), Span::new(200, 300), Span::new(400, 500)];
        assert_eq!(
            merge_overlapping(&spans),
            vec![Span::new(100, 300), Span::new(400, 500)]
        );
    }

    // ── occurrences / materialize ─────────────────────────

    #[test]
    fn regular_slot_expands_weekly() {
        let t_id = Ulid::new();
        let cal = calendar_with(vec![weekly_slot(t_id, d(2025, 9, 1), (10, 0), (11, 0))]);
        let view = materialize(&cal, &weeks_from(d(2025, 9, 1), 4), None);
        assert_eq!(view.free_slots.len(), 4);
        assert!(view.free_slots.iter().all(|f| f.weekday() == Weekday::Mon));
        assert!(view.booked_classes.is_empty());
    }

    #[test]
    fn removed_exception_deletes_single_date() {
        let t_id = Ulid::new();
        let cal = calendar_with(vec![
            weekly_slot(t_id, d(2025, 9, 1), (10, 0), (11, 0)),
            exception(t_id, d(2025, 9, 15), t(10, 0), t(11, 0), true, None),
        ]);
        let view = materialize(&cal, &weeks_from(d(2025, 9, 1), 4), None);
        let dates: Vec<_> = view.free_slots.iter().map(|f| f.date()).collect();
        assert_eq!(dates, vec![d(2025, 9, 1), d(2025, 9, 8), d(2025, 9, 22)]);
        assert_eq!(view.exceptions.len(), 1);
    }

    #[test]
    fn replacing_exception_moves_one_occurrence() {
        let t_id = Ulid::new();
        let cal = calendar_with(vec![
            weekly_slot(t_id, d(2025, 9, 1), (10, 0), (11, 0)),
            exception(t_id, d(2025, 9, 8), t(15, 0), t(16, 0), false, Some(t(10, 0))),
        ]);
        let view = materialize(&cal, &weeks_from(d(2025, 9, 1), 2), None);
        assert_eq!(view.free_slots.len(), 2);
        assert_eq!(view.free_slots[1].date(), d(2025, 9, 8));
        assert_eq!(view.free_slots[1].start_time(), t(15, 0));
        assert!(view.free_slots[1].from_exception);
    }

    #[test]
    fn additive_exception_opens_extra_date() {
        let t_id = Ulid::new();
        let cal = calendar_with(vec![
            weekly_slot(t_id, d(2025, 9, 1), (10, 0), (11, 0)),
            exception(t_id, d(2025, 9, 3), t(18, 0), t(19, 0), false, None),
        ]);
        let view = materialize(&cal, &weeks_from(d(2025, 9, 1), 1), None);
        let dates: Vec<_> = view.free_slots.iter().map(|f| f.date()).collect();
        assert_eq!(dates, vec![d(2025, 9, 1), d(2025, 9, 3)]);
    }

    #[test]
    fn exception_outside_window_is_ignored() {
        let t_id = Ulid::new();
        let cal = calendar_with(vec![exception(t_id, d(2025, 12, 1), t(9, 0), t(10, 0), false, None)]);
        let view = materialize(&cal, &weeks_from(d(2025, 9, 1), 2), None);
        assert!(view.free_slots.is_empty());
        assert!(view.exceptions.is_empty());
    }

    #[test]
    fn inactive_slot_contributes_nothing() {
        let t_id = Ulid::new();
        let mut slot = weekly_slot(t_id, d(2025, 9, 1), (10, 0), (11, 0));
        slot.is_active = false;
        let cal = calendar_with(vec![slot]);
        assert!(materialize(&cal, &weeks_from(d(2025, 9, 1), 4), None).free_slots.is_empty());
    }

    #[test]
    fn booked_lesson_is_subtracted() {
        let t_id = Ulid::new();
        let mut cal = calendar_with(vec![weekly_slot(t_id, d(2025, 9, 1), (10, 0), (12, 0))]);
        let booked = lesson(t_id, Ulid::new(), to_ms(d(2025, 9, 1), t(10, 0)), 60);
        cal.insert_lesson(booked.clone());

        let view = materialize(&cal, &weeks_from(d(2025, 9, 1), 1), None);
        assert_eq!(view.free_slots.len(), 1);
        assert_eq!(view.free_slots[0].start_time(), t(11, 0));
        assert_eq!(view.free_slots[0].end_time(), t(12, 0));
        assert_eq!(view.booked_classes, vec![booked]);
    }

    #[test]
    fn canceled_lesson_frees_its_time() {
        let t_id = Ulid::new();
        let mut cal = calendar_with(vec![weekly_slot(t_id, d(2025, 9, 1), (10, 0), (11, 0))]);
        let mut canceled = lesson(t_id, Ulid::new(), to_ms(d(2025, 9, 1), t(10, 0)), 60);
        canceled.status = LessonStatus::Canceled;
        cal.insert_lesson(canceled);

        let view = materialize(&cal, &weeks_from(d(2025, 9, 1), 1), None);
        assert_eq!(view.free_slots.len(), 1);
        assert!(view.booked_classes.is_empty());
    }

    #[test]
    fn excluded_lesson_does_not_block() {
        let t_id = Ulid::new();
        let mut cal = calendar_with(vec![weekly_slot(t_id, d(2025, 9, 1), (10, 0), (11, 0))]);
        let moving = lesson(t_id, Ulid::new(), to_ms(d(2025, 9, 1), t(10, 0)), 60);
        let moving_id = moving.id;
        cal.insert_lesson(moving);

        let window = weeks_from(d(2025, 9, 1), 1);
        assert!(materialize(&cal, &window, None).free_slots.is_empty());
        assert_eq!(materialize(&cal, &window, Some(moving_id)).free_slots.len(), 1);
    }

    #[test]
    fn distinct_weekly_collapses_dates() {
        let t_id = Ulid::new();
        let cal = calendar_with(vec![
            weekly_slot(t_id, d(2025, 9, 1), (10, 0), (11, 0)),
            weekly_slot(t_id, d(2025, 9, 3), (14, 0), (15, 0)),
        ]);
        let view = materialize(&cal, &weeks_from(d(2025, 9, 1), 4), None);
        assert_eq!(view.free_slots.len(), 8);

        let weekly = distinct_weekly(&view.free_slots);
        assert_eq!(weekly.len(), 2);
        assert_eq!(weekly[0].weekday, Weekday::Mon);
        assert_eq!(weekly[0].key(), "1-10:00-11:00");
        assert_eq!(weekly[1].key(), "3-14:00-15:00");
    }

    #[test]
    fn duplicate_regular_slots_collapse_by_key() {
        let t_id = Ulid::new();
        let cal = calendar_with(vec![
            weekly_slot(t_id, d(2025, 9, 1), (10, 0), (11, 0)),
            weekly_slot(t_id, d(2025, 9, 1), (10, 0), (11, 0)),
        ]);
        let view = materialize(&cal, &weeks_from(d(2025, 9, 1), 1), None);
        assert_eq!(view.free_slots.len(), 1);
    }
}
