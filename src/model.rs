use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only instant type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 86_400_000;
pub const WEEK_MS: Ms = 7 * DAY_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Calendar edge ────────────────────────────────────────────────
//
// Wall-clock values (date + time of day) are UTC. These helpers are the
// single place where calendar values become instants and back.

pub fn to_ms(date: NaiveDate, time: NaiveTime) -> Ms {
    date.and_time(time).and_utc().timestamp_millis()
}

pub fn start_of_day(date: NaiveDate) -> Ms {
    to_ms(date, NaiveTime::MIN)
}

pub fn to_naive(ms: Ms) -> NaiveDateTime {
    DateTime::from_timestamp_millis(ms)
        .unwrap_or_default()
        .naive_utc()
}

pub fn date_of(ms: Ms) -> NaiveDate {
    to_naive(ms).date()
}

/// Calendar month bucket for reschedule counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn of(ms: Ms) -> Self {
        let date = date_of(ms);
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl std::fmt::Display for MonthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

// ── Users ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Teacher,
    Student,
}

impl Role {
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::Manager)
    }
}

/// Who is acting, as resolved by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Ulid,
    pub name: String,
    pub role: Role,
}

// ── Lessons ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LessonStatus {
    Scheduled,
    Completed,
    Canceled,
    Rescheduled,
}

impl LessonStatus {
    /// Whether a lesson in this status holds its time on the teacher's calendar.
    pub fn occupies_calendar(&self) -> bool {
        matches!(self, LessonStatus::Scheduled | LessonStatus::Completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassType {
    Regular,
    Makeup,
    Trial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CreditKind {
    TeacherCancellation,
    Bonus,
    LateStudent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelInitiator {
    Teacher,
    Student,
    School,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledClass {
    pub id: Ulid,
    pub student_id: Ulid,
    pub teacher_id: Ulid,
    pub scheduled_at: Ms,
    pub duration_minutes: u32,
    pub language: String,
    pub class_type: ClassType,
    pub status: LessonStatus,
    pub availability_slot_id: Option<Ulid>,
    pub template_entry_id: Option<Ulid>,
    pub rescheduled_from: Option<Ulid>,
    pub reschedule_reason: Option<String>,
    /// Credit debited to create this lesson, if any.
    pub credit_used: Option<CreditKind>,
    pub canceled_at: Option<Ms>,
    pub canceled_by: Option<CancelInitiator>,
    pub cancel_reason: Option<String>,
    pub completed_at: Option<Ms>,
    pub created_by: Ulid,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl ScheduledClass {
    pub fn span(&self) -> Span {
        Span::new(
            self.scheduled_at,
            self.scheduled_at + self.duration_minutes as Ms * MINUTE_MS,
        )
    }

    pub fn occupies_calendar(&self) -> bool {
        self.status.occupies_calendar()
    }
}

// ── Availability ─────────────────────────────────────────────────

/// Weekly repetition of a REGULAR slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repeating {
    pub interval_weeks: u32,
    /// Exclusive: no occurrence falls on or after this date.
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotKind {
    Regular {
        repeating: Repeating,
    },
    /// One-date override. `removed` cancels the occurrence keyed by
    /// `(start_date, replaces.unwrap_or(start_time))`; otherwise the slot adds
    /// an occurrence, replacing the one at `replaces` when set.
    Exception {
        removed: bool,
        replaces: Option<NaiveTime>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub id: Ulid,
    pub teacher_id: Ulid,
    pub title: String,
    pub start_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_active: bool,
    pub color: Option<String>,
    pub kind: SlotKind,
}

impl AvailabilitySlot {
    pub fn weekday(&self) -> Weekday {
        self.start_date.weekday()
    }

    pub fn is_exception(&self) -> bool {
        matches!(self.kind, SlotKind::Exception { .. })
    }

    /// Active and not a removal marker: time a lesson may actually occupy.
    pub fn is_open(&self) -> bool {
        self.is_active && !matches!(self.kind, SlotKind::Exception { removed: true, .. })
    }

    pub fn duration_minutes(&self) -> u32 {
        (self.end_time - self.start_time).num_minutes().max(0) as u32
    }
}

// ── Student side ─────────────────────────────────────────────────

/// One standing weekly commitment of a student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassTemplateEntry {
    pub id: Ulid,
    pub day: Weekday,
    pub hour: NaiveTime,
    pub teacher_id: Ulid,
    pub language: String,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditBalance {
    pub teacher_cancellation: u32,
    pub bonus: u32,
    pub late_student: u32,
}

impl CreditBalance {
    pub fn get(&self, kind: CreditKind) -> u32 {
        match kind {
            CreditKind::TeacherCancellation => self.teacher_cancellation,
            CreditKind::Bonus => self.bonus,
            CreditKind::LateStudent => self.late_student,
        }
    }

    pub fn get_mut(&mut self, kind: CreditKind) -> &mut u32 {
        match kind {
            CreditKind::TeacherCancellation => &mut self.teacher_cancellation,
            CreditKind::Bonus => &mut self.bonus,
            CreditKind::LateStudent => &mut self.late_student,
        }
    }
}

// ── Documents ────────────────────────────────────────────────────

/// Everything bookable about one teacher: declared slots and committed lessons.
#[derive(Debug, Clone)]
pub struct TeacherCalendar {
    pub teacher_id: Ulid,
    pub version: u64,
    pub slots: Vec<AvailabilitySlot>,
    /// All lessons, any status, sorted by `scheduled_at`.
    pub lessons: Vec<ScheduledClass>,
}

impl TeacherCalendar {
    pub fn new(teacher_id: Ulid) -> Self {
        Self {
            teacher_id,
            version: 0,
            slots: Vec::new(),
            lessons: Vec::new(),
        }
    }

    /// Insert lesson maintaining sort order by scheduled_at.
    pub fn insert_lesson(&mut self, lesson: ScheduledClass) {
        let pos = self
            .lessons
            .binary_search_by_key(&lesson.scheduled_at, |l| l.scheduled_at)
            .unwrap_or_else(|e| e);
        self.lessons.insert(pos, lesson);
    }

    pub fn remove_lesson(&mut self, id: Ulid) -> Option<ScheduledClass> {
        let pos = self.lessons.iter().position(|l| l.id == id)?;
        Some(self.lessons.remove(pos))
    }

    pub fn lesson(&self, id: Ulid) -> Option<&ScheduledClass> {
        self.lessons.iter().find(|l| l.id == id)
    }

    pub fn slot(&self, id: Ulid) -> Option<&AvailabilitySlot> {
        self.slots.iter().find(|s| s.id == id)
    }

    /// Lessons whose span overlaps the query window, any status.
    /// Lessons starting at or after `query.end` are skipped by binary search.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &ScheduledClass> {
        let right_bound = self
            .lessons
            .partition_point(|l| l.scheduled_at < query.end);
        self.lessons[..right_bound]
            .iter()
            .filter(move |l| l.span().end > query.start)
    }

    /// Lessons in the window that still hold their time.
    pub fn occupying(&self, query: &Span) -> impl Iterator<Item = &ScheduledClass> {
        self.overlapping(query).filter(|l| l.occupies_calendar())
    }
}

/// Per-student bookkeeping: weekly template, teacher relations, credits, quota usage.
#[derive(Debug, Clone)]
pub struct StudentAccount {
    pub student_id: Ulid,
    pub version: u64,
    pub template: Vec<ClassTemplateEntry>,
    pub teacher_ids: Vec<Ulid>,
    pub credits: CreditBalance,
    pub reschedules: BTreeMap<MonthKey, u32>,
}

impl StudentAccount {
    pub fn new(student_id: Ulid) -> Self {
        Self {
            student_id,
            version: 0,
            template: Vec::new(),
            teacher_ids: Vec::new(),
            credits: CreditBalance::default(),
            reschedules: BTreeMap::new(),
        }
    }

    pub fn template_entry(&self, id: Ulid) -> Option<&ClassTemplateEntry> {
        self.template.iter().find(|e| e.id == id)
    }

    pub fn reschedules_in(&self, month: MonthKey) -> u32 {
        self.reschedules.get(&month).copied().unwrap_or(0)
    }
}

// ── WAL records ──────────────────────────────────────────────────

/// Flat event types. Each one touches exactly one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SlotAdded {
        slot: AvailabilitySlot,
    },
    SlotActiveSet {
        id: Ulid,
        teacher_id: Ulid,
        active: bool,
    },
    SlotRemoved {
        id: Ulid,
        teacher_id: Ulid,
    },
    ClassCreated {
        class: ScheduledClass,
    },
    ClassUpdated {
        class: ScheduledClass,
    },
    ClassDeleted {
        id: Ulid,
        teacher_id: Ulid,
        student_id: Ulid,
    },
    TemplateEntryAdded {
        student_id: Ulid,
        entry: ClassTemplateEntry,
    },
    TemplateEntryRemoved {
        student_id: Ulid,
        entry_id: Ulid,
    },
    TeacherLinked {
        student_id: Ulid,
        teacher_id: Ulid,
    },
    TeacherUnlinked {
        student_id: Ulid,
        teacher_id: Ulid,
    },
    CreditAdjusted {
        student_id: Ulid,
        kind: CreditKind,
        delta: i64,
    },
    RescheduleCounted {
        student_id: Ulid,
        month: MonthKey,
        count: u32,
    },
}

/// The document an event applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Target {
    Teacher(Ulid),
    Student(Ulid),
}

impl Event {
    pub fn target(&self) -> Target {
        match self {
            Event::SlotAdded { slot } => Target::Teacher(slot.teacher_id),
            Event::ClassCreated { class } | Event::ClassUpdated { class } => {
                Target::Teacher(class.teacher_id)
            }
            Event::SlotActiveSet { teacher_id, .. }
            | Event::SlotRemoved { teacher_id, .. }
            | Event::ClassDeleted { teacher_id, .. } => Target::Teacher(*teacher_id),
            Event::TemplateEntryAdded { student_id, .. }
            | Event::TemplateEntryRemoved { student_id, .. }
            | Event::TeacherLinked { student_id, .. }
            | Event::TeacherUnlinked { student_id, .. }
            | Event::CreditAdjusted { student_id, .. }
            | Event::RescheduleCounted { student_id, .. } => Target::Student(*student_id),
        }
    }
}

/// One transaction as persisted: all events land together or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub at: Ms,
    pub events: Vec<Event>,
}
