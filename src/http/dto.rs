//! Wire shapes for the REST API.
//!
//! Engine types stay storage-shaped (unix millis, bincode-friendly enums);
//! everything here is camelCase JSON with RFC 3339 instants, `YYYY-MM-DD`
//! dates and `HH:mm` times.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::{
    AccountView, AdminAvailability, DeleteReport, DeleteScope, FreeSlot, GenerationReport,
    MaterializedAvailability, SchedulingError, SkippedOccurrence, WeeklyTime,
};
use crate::limits::DEFAULT_LESSON_MINUTES;
use crate::model::*;

pub fn instant(ms: Ms) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub fn millis(at: DateTime<Utc>) -> Ms {
    at.timestamp_millis()
}

/// `HH:mm` times.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(time: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
            match time {
                Some(t) => super::serialize(t, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
            Option::<String>::deserialize(d)?
                .map(|raw| NaiveTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

/// Weekdays as lowercase English names; accepts a name or a 0 = Sunday index.
pub mod weekday {
    use chrono::Weekday;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Index(u8),
        Name(String),
    }

    pub fn name(day: Weekday) -> &'static str {
        match day {
            Weekday::Mon => "monday",
            Weekday::Tue => "tuesday",
            Weekday::Wed => "wednesday",
            Weekday::Thu => "thursday",
            Weekday::Fri => "friday",
            Weekday::Sat => "saturday",
            Weekday::Sun => "sunday",
        }
    }

    pub fn serialize<S: Serializer>(day: &Weekday, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(name(*day))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Weekday, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Index(i) if i < 7 => Weekday::try_from((i + 6) % 7).map_err(serde::de::Error::custom),
            Raw::Index(i) => Err(serde::de::Error::custom(format!("weekday index {i} out of range"))),
            Raw::Name(n) => n.parse::<Weekday>().map_err(|_| serde::de::Error::custom(format!("unknown weekday {n}"))),
        }
    }
}

// ── Envelope ─────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

// ── Responses ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDto {
    pub id: Ulid,
    pub student_id: Ulid,
    pub teacher_id: Ulid,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub language: String,
    pub class_type: ClassType,
    pub status: LessonStatus,
    pub availability_slot_id: Option<Ulid>,
    pub template_entry_id: Option<Ulid>,
    pub rescheduled_from: Option<Ulid>,
    pub reschedule_reason: Option<String>,
    pub credit_used: Option<CreditKind>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub canceled_by: Option<CancelInitiator>,
    pub cancel_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by: Ulid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ScheduledClass> for ClassDto {
    fn from(c: ScheduledClass) -> Self {
        Self {
            id: c.id,
            student_id: c.student_id,
            teacher_id: c.teacher_id,
            scheduled_at: instant(c.scheduled_at),
            duration_minutes: c.duration_minutes,
            language: c.language,
            class_type: c.class_type,
            status: c.status,
            availability_slot_id: c.availability_slot_id,
            template_entry_id: c.template_entry_id,
            rescheduled_from: c.rescheduled_from,
            reschedule_reason: c.reschedule_reason,
            credit_used: c.credit_used,
            canceled_at: c.canceled_at.map(instant),
            canceled_by: c.canceled_by,
            cancel_reason: c.cancel_reason,
            completed_at: c.completed_at.map(instant),
            created_by: c.created_by,
            created_at: instant(c.created_at),
            updated_at: instant(c.updated_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKindName {
    Regular,
    Exception,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotDto {
    pub id: Ulid,
    pub teacher_id: Ulid,
    pub title: String,
    pub start_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub is_active: bool,
    pub color: Option<String>,
    pub kind: SlotKindName,
    pub repeat_interval_weeks: Option<u32>,
    pub repeat_end_date: Option<NaiveDate>,
    pub removed: bool,
    #[serde(with = "hhmm::option")]
    pub replaces: Option<NaiveTime>,
}

impl From<AvailabilitySlot> for SlotDto {
    fn from(s: AvailabilitySlot) -> Self {
        let (kind, repeating, removed, replaces) = match s.kind {
            SlotKind::Regular { repeating } => (SlotKindName::Regular, Some(repeating), false, None),
            SlotKind::Exception { removed, replaces } => (SlotKindName::Exception, None, removed, replaces),
        };
        Self {
            id: s.id,
            teacher_id: s.teacher_id,
            title: s.title,
            start_date: s.start_date,
            start_time: s.start_time,
            end_time: s.end_time,
            is_active: s.is_active,
            color: s.color,
            kind,
            repeat_interval_weeks: repeating.map(|r| r.interval_weeks),
            repeat_end_date: repeating.and_then(|r| r.end_date),
            removed,
            replaces,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateEntryDto {
    pub id: Ulid,
    #[serde(with = "weekday")]
    pub day: Weekday,
    /// 0 = Sunday.
    pub day_index: u32,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub teacher_id: Ulid,
    pub language: String,
}

impl From<ClassTemplateEntry> for TemplateEntryDto {
    fn from(e: ClassTemplateEntry) -> Self {
        Self {
            id: e.id,
            day: e.day,
            day_index: e.day.num_days_from_sunday(),
            start_time: e.hour,
            duration_minutes: e.duration_minutes,
            teacher_id: e.teacher_id,
            language: e.language,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeSlotDto {
    pub slot_id: Ulid,
    pub title: String,
    pub color: Option<String>,
    pub from_exception: bool,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl From<FreeSlot> for FreeSlotDto {
    fn from(f: FreeSlot) -> Self {
        Self {
            date: f.date(),
            start_time: f.start_time(),
            end_time: f.end_time(),
            start: instant(f.span.start),
            end: instant(f.span.end),
            slot_id: f.slot_id,
            title: f.title,
            color: f.color,
            from_exception: f.from_exception,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyTimeDto {
    pub key: String,
    pub slot_id: Ulid,
    pub title: String,
    #[serde(with = "weekday")]
    pub day: Weekday,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
}

impl From<WeeklyTime> for WeeklyTimeDto {
    fn from(w: WeeklyTime) -> Self {
        Self {
            key: w.key(),
            slot_id: w.slot_id,
            title: w.title,
            day: w.weekday,
            start_time: w.start_time,
            end_time: w.end_time,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityDto {
    pub free_slots: Vec<FreeSlotDto>,
    pub booked_classes: Vec<ClassDto>,
    pub exceptions: Vec<SlotDto>,
}

impl From<MaterializedAvailability> for AvailabilityDto {
    fn from(v: MaterializedAvailability) -> Self {
        Self {
            free_slots: v.free_slots.into_iter().map(Into::into).collect(),
            booked_classes: v.booked_classes.into_iter().map(Into::into).collect(),
            exceptions: v.exceptions.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminAvailabilityDto {
    pub slots: Vec<WeeklyTimeDto>,
    pub exceptions: Vec<SlotDto>,
    pub booked_classes: Vec<ClassDto>,
}

impl From<AdminAvailability> for AdminAvailabilityDto {
    fn from(v: AdminAvailability) -> Self {
        Self {
            slots: v.slots.into_iter().map(Into::into).collect(),
            exceptions: v.exceptions.into_iter().map(Into::into).collect(),
            booked_classes: v.booked_classes.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDto {
    pub student_id: Ulid,
    pub template: Vec<TemplateEntryDto>,
    pub teacher_ids: Vec<Ulid>,
    pub credits: CreditBalance,
    /// `YYYY-MM`.
    pub month: String,
    pub reschedules_used: u32,
    pub reschedule_limit: Option<u32>,
    pub can_reschedule: bool,
}

impl From<AccountView> for AccountDto {
    fn from(a: AccountView) -> Self {
        Self {
            student_id: a.student_id,
            template: a.template.into_iter().map(Into::into).collect(),
            teacher_ids: a.teacher_ids,
            credits: a.credits,
            month: a.month.to_string(),
            reschedules_used: a.reschedules_used,
            reschedule_limit: a.reschedule_limit,
            can_reschedule: a.can_reschedule,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedDto {
    pub entry_id: Ulid,
    pub scheduled_at: DateTime<Utc>,
    pub reason: &'static str,
}

impl From<SkippedOccurrence> for SkippedDto {
    fn from(s: SkippedOccurrence) -> Self {
        Self {
            entry_id: s.entry_id,
            scheduled_at: instant(s.scheduled_at),
            reason: s.reason.reason(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationDto {
    pub created_count: usize,
    pub created: Vec<ClassDto>,
    pub skipped: Vec<SkippedDto>,
    pub already_present: usize,
    pub failed_chunks: usize,
}

impl From<GenerationReport> for GenerationDto {
    fn from(r: GenerationReport) -> Self {
        Self {
            created_count: r.created.len(),
            created: r.created.into_iter().map(Into::into).collect(),
            skipped: r.skipped.into_iter().map(Into::into).collect(),
            already_present: r.already_present,
            failed_chunks: r.failed_chunks,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteDto {
    pub deleted_count: usize,
    pub failed_chunks: usize,
}

impl From<DeleteReport> for DeleteDto {
    fn from(r: DeleteReport) -> Self {
        Self {
            deleted_count: r.deleted,
            failed_chunks: r.failed_chunks,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignScheduleResponse {
    pub template_entry: TemplateEntryDto,
    pub generated: GenerationDto,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedEntryDto {
    pub template_entry: TemplateEntryDto,
    pub deleted: Option<DeleteDto>,
}

// ── Requests ─────────────────────────────────────────────

fn default_minutes() -> u32 {
    DEFAULT_LESSON_MINUTES
}

fn default_class_type() -> ClassType {
    ClassType::Regular
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookClassRequest {
    pub student_id: Ulid,
    pub teacher_id: Ulid,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default = "default_minutes")]
    pub duration_minutes: u32,
    pub language: String,
    #[serde(default = "default_class_type")]
    pub class_type: ClassType,
    #[serde(default)]
    pub availability_slot_id: Option<Ulid>,
    #[serde(default)]
    pub use_credit: Option<CreditKind>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleRequest {
    pub new_scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub availability_slot_id: Option<Ulid>,
    #[serde(default)]
    pub use_credit: Option<CreditKind>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub initiator: CancelInitiator,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeTeacherRequest {
    pub teacher_id: Ulid,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditsRequest {
    pub kind: CreditKind,
    pub delta: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignScheduleRequest {
    pub student_id: Ulid,
    pub teacher_id: Ulid,
    pub slot_id: Ulid,
    pub language: String,
    #[serde(with = "weekday")]
    pub day: Weekday,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSlotRequest {
    pub title: String,
    pub start_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    #[serde(default)]
    pub color: Option<String>,
    pub kind: SlotKindName,
    #[serde(default)]
    pub repeat_interval_weeks: Option<u32>,
    #[serde(default)]
    pub repeat_end_date: Option<NaiveDate>,
    #[serde(default)]
    pub removed: bool,
    #[serde(default, with = "hhmm::option")]
    pub replaces: Option<NaiveTime>,
}

impl NewSlotRequest {
    pub fn kind(&self) -> SlotKind {
        match self.kind {
            SlotKindName::Regular => SlotKind::Regular {
                repeating: Repeating {
                    interval_weeks: self.repeat_interval_weeks.unwrap_or(1),
                    end_date: self.repeat_end_date,
                },
            },
            SlotKindName::Exception => SlotKind::Exception {
                removed: self.removed,
                replaces: self.replaces,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetActiveRequest {
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateEntryRequest {
    pub teacher_id: Ulid,
    #[serde(with = "weekday")]
    pub day: Weekday,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(default = "default_minutes")]
    pub duration_minutes: u32,
    pub language: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub entry_ids: Option<Vec<Ulid>>,
    #[serde(default)]
    pub from_date: Option<NaiveDate>,
    #[serde(default)]
    pub weeks: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeleteOption {
    FromDate,
    DateRange,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteClassesRequest {
    pub option: DeleteOption,
    pub from_date: NaiveDate,
    #[serde(default)]
    pub to_date: Option<NaiveDate>,
    #[serde(default)]
    pub template_entries: Option<Vec<Ulid>>,
}

impl DeleteClassesRequest {
    pub fn scope(&self) -> Result<DeleteScope, SchedulingError> {
        match (self.option, self.to_date) {
            (DeleteOption::FromDate, _) => Ok(DeleteScope::FromDate(self.from_date)),
            (DeleteOption::DateRange, Some(to)) => Ok(DeleteScope::DateRange(self.from_date, to)),
            (DeleteOption::DateRange, None) => {
                Err(SchedulingError::validation("toDate is required for date-range"))
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WindowQuery {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

impl WindowQuery {
    pub fn millis(&self) -> (Option<Ms>, Option<Ms>) {
        (self.from.map(millis), self.to.map(millis))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CanBookQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveEntryQuery {
    #[serde(default)]
    pub delete_future_from: Option<NaiveDate>,
}
