use ulid::Ulid;

use crate::auth::{require_self_or_staff, require_staff};
use crate::model::*;

use super::availability::{distinct_weekly, materialize, MaterializedAvailability, WeeklyTime};
use super::conflict::{check_booking, validate_span, validate_window, BookingCheck, Verdict};
use super::ledger::can_reschedule;
use super::{Engine, SchedulingError};

/// Staff view of a teacher's week: recurring free times, one-off exceptions
/// and what is already booked.
#[derive(Debug, Clone, Default)]
pub struct AdminAvailability {
    pub slots: Vec<WeeklyTime>,
    pub exceptions: Vec<AvailabilitySlot>,
    pub booked_classes: Vec<ScheduledClass>,
}

#[derive(Debug, Clone)]
pub struct AccountView {
    pub student_id: Ulid,
    pub template: Vec<ClassTemplateEntry>,
    pub teacher_ids: Vec<Ulid>,
    pub credits: CreditBalance,
    pub month: MonthKey,
    pub reschedules_used: u32,
    pub reschedule_limit: Option<u32>,
    pub can_reschedule: bool,
}

impl Engine {
    /// `[from, to)`, defaulting to now and `availability_days` past the start.
    fn query_window(&self, from: Option<Ms>, to: Option<Ms>) -> Result<Span, SchedulingError> {
        let start = from.unwrap_or_else(|| self.now());
        let end = to.unwrap_or(start + self.policy.availability_days as Ms * DAY_MS);
        if end <= start {
            return Err(SchedulingError::validation("end must be after start"));
        }
        let window = Span::new(start, end);
        validate_window(&window)?;
        Ok(window)
    }

    /// Free time a student could book. Never starts in the past.
    pub async fn teacher_availability(
        &self,
        teacher_id: Ulid,
        from: Option<Ms>,
        to: Option<Ms>,
    ) -> Result<MaterializedAvailability, SchedulingError> {
        self.require_user(teacher_id, Role::Teacher).await?;
        let window = self.query_window(from, to)?;
        let now = self.now();
        if window.end <= now {
            return Ok(MaterializedAvailability::default());
        }
        let window = Span::new(window.start.max(now), window.end);
        let cal = self.teacher_snapshot(teacher_id).await;
        Ok(materialize(&cal, &window, None))
    }

    pub async fn admin_teacher_availability(
        &self,
        teacher_id: Ulid,
        from: Option<Ms>,
        to: Option<Ms>,
        actor: &Identity,
    ) -> Result<AdminAvailability, SchedulingError> {
        require_staff(actor)?;
        self.require_user(teacher_id, Role::Teacher).await?;
        let window = self.query_window(from, to)?;
        let cal = self.teacher_snapshot(teacher_id).await;
        let view = materialize(&cal, &window, None);
        Ok(AdminAvailability {
            slots: distinct_weekly(&view.free_slots),
            exceptions: view.exceptions,
            booked_classes: view.booked_classes,
        })
    }

    /// Would a lesson over `[start, end)` be accepted right now?
    pub async fn can_book(
        &self,
        teacher_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Verdict, SchedulingError> {
        self.require_user(teacher_id, Role::Teacher).await?;
        if end <= start {
            return Err(SchedulingError::validation("end must be after start"));
        }
        let span = Span::new(start, end);
        validate_span(&span)?;
        let cal = self.teacher_snapshot(teacher_id).await;
        Ok(check_booking(&cal, &span, self.now(), &BookingCheck::in_free_slot(None)).into())
    }

    pub async fn class(&self, class_id: Ulid, actor: &Identity) -> Result<ScheduledClass, SchedulingError> {
        let (_, lesson) = self.load_class(class_id).await?;
        let involved = actor.id == lesson.student_id || actor.id == lesson.teacher_id;
        if !involved && !actor.role.is_staff() {
            return Err(SchedulingError::Authorization("not a participant of this class"));
        }
        Ok(lesson)
    }

    /// Every lesson of a student across teachers, in start order.
    pub async fn student_classes(
        &self,
        student_id: Ulid,
        from: Option<Ms>,
        to: Option<Ms>,
        actor: &Identity,
    ) -> Result<Vec<ScheduledClass>, SchedulingError> {
        require_self_or_staff(actor, student_id)?;
        if let (Some(from), Some(to)) = (from, to)
            && to <= from
        {
            return Err(SchedulingError::validation("end must be after start"));
        }

        let mut lessons = Vec::new();
        for (teacher_id, ids) in self.classes_by_teacher(student_id) {
            let cal = self.teacher_snapshot(teacher_id).await;
            lessons.extend(
                ids.iter()
                    .filter_map(|id| cal.lesson(*id))
                    .filter(|l| from.is_none_or(|f| l.scheduled_at >= f))
                    .filter(|l| to.is_none_or(|t| l.scheduled_at < t))
                    .cloned(),
            );
        }
        lessons.sort_by_key(|l| (l.scheduled_at, l.id));
        Ok(lessons)
    }

    pub async fn student_account(
        &self,
        student_id: Ulid,
        actor: &Identity,
    ) -> Result<AccountView, SchedulingError> {
        require_self_or_staff(actor, student_id)?;
        self.require_user(student_id, Role::Student).await?;
        let acc = self.student_snapshot(student_id).await;
        let month = MonthKey::of(self.now());
        let limit = self.policy.reschedule_limit(Role::Student);
        Ok(AccountView {
            student_id,
            can_reschedule: can_reschedule(&acc, month, limit),
            reschedules_used: acc.reschedules_in(month),
            reschedule_limit: limit,
            month,
            template: acc.template,
            teacher_ids: acc.teacher_ids,
            credits: acc.credits,
        })
    }
}
