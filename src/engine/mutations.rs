use chrono::{NaiveDate, NaiveTime, Weekday};
use ulid::Ulid;

use crate::auth::{require_self_or_staff, require_staff};
use crate::limits::*;
use crate::messages::{reopened_slot_title, Notice};
use crate::model::*;

use super::conflict::{
    check_booking, lesson_span, template_entries_overlap, validate_duration, validate_text,
    BookingCheck, Rejection,
};
use super::{ledger, Engine, Outcome, SchedulingError, TxnPlan};

/// Give a student a standing weekly time by consuming a teacher's open slot.
#[derive(Debug, Clone)]
pub struct AssignSchedule {
    pub student_id: Ulid,
    pub teacher_id: Ulid,
    pub slot_id: Ulid,
    pub language: String,
    pub day: Weekday,
    pub start_time: NaiveTime,
}

/// One-off lesson, e.g. a makeup class.
#[derive(Debug, Clone)]
pub struct BookClass {
    pub student_id: Ulid,
    pub teacher_id: Ulid,
    pub scheduled_at: Ms,
    pub duration_minutes: u32,
    pub language: String,
    pub class_type: ClassType,
    pub availability_slot_id: Option<Ulid>,
    pub use_credit: Option<CreditKind>,
}

#[derive(Debug, Clone, Default)]
pub struct RescheduleClass {
    pub new_scheduled_at: Ms,
    pub reason: Option<String>,
    pub availability_slot_id: Option<Ulid>,
    /// Spend a credit instead of the monthly quota.
    pub use_credit: Option<CreditKind>,
}

#[derive(Debug, Clone)]
pub struct CancelClass {
    pub initiator: CancelInitiator,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewSlot {
    pub title: String,
    pub start_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub color: Option<String>,
    pub kind: SlotKind,
}

pub(super) fn class_link(id: Ulid) -> String {
    format!("/classes/{id}")
}

pub(super) fn validate_language(language: &str) -> Result<(), SchedulingError> {
    if language.trim().is_empty() {
        return Err(SchedulingError::validation("language is required"));
    }
    validate_text("language", language)
}

fn validate_reason(reason: &Option<String>) -> Result<(), SchedulingError> {
    match reason {
        Some(r) => validate_text("reason", r),
        None => Ok(()),
    }
}

fn validate_slot(slot: &NewSlot) -> Result<(), SchedulingError> {
    if slot.title.trim().is_empty() {
        return Err(SchedulingError::validation("title is required"));
    }
    validate_text("title", &slot.title)?;
    if slot.end_time <= slot.start_time {
        return Err(SchedulingError::validation("end time must be after start time"));
    }
    if ((slot.end_time - slot.start_time).num_minutes() as u32) < MIN_LESSON_MINUTES {
        return Err(SchedulingError::validation("slot is shorter than a lesson"));
    }
    if let SlotKind::Regular { repeating } = &slot.kind {
        if !(1..=MAX_REPEAT_INTERVAL_WEEKS).contains(&repeating.interval_weeks) {
            return Err(SchedulingError::validation(format!(
                "repeat interval must be 1 to {MAX_REPEAT_INTERVAL_WEEKS} weeks"
            )));
        }
        if repeating.end_date.is_some_and(|end| end <= slot.start_date) {
            return Err(SchedulingError::validation("repeat end date must be after the start date"));
        }
    }
    Ok(())
}

/// A fresh `scheduled` lesson with no history.
pub(super) fn new_lesson(
    student_id: Ulid,
    teacher_id: Ulid,
    scheduled_at: Ms,
    duration_minutes: u32,
    language: String,
    created_by: Ulid,
    now: Ms,
) -> ScheduledClass {
    ScheduledClass {
        id: Ulid::new(),
        student_id,
        teacher_id,
        scheduled_at,
        duration_minutes,
        language,
        class_type: ClassType::Regular,
        status: LessonStatus::Scheduled,
        availability_slot_id: None,
        template_entry_id: None,
        rescheduled_from: None,
        reschedule_reason: None,
        credit_used: None,
        canceled_at: None,
        canceled_by: None,
        cancel_reason: None,
        completed_at: None,
        created_by,
        created_at: now,
        updated_at: now,
    }
}

fn require_scheduled(lesson: &ScheduledClass, action: &str) -> Result<(), SchedulingError> {
    if lesson.status != LessonStatus::Scheduled {
        return Err(SchedulingError::validation(format!(
            "only scheduled classes can be {action}"
        )));
    }
    Ok(())
}

impl Engine {
    // ── Weekly assignment ────────────────────────────────

    pub async fn assign_schedule(
        &self,
        req: AssignSchedule,
        actor: &Identity,
    ) -> Result<Outcome<ClassTemplateEntry>, SchedulingError> {
        require_staff(actor)?;
        validate_language(&req.language)?;
        self.require_user(req.student_id, Role::Student).await?;
        self.require_user(req.teacher_id, Role::Teacher).await?;

        let (engine, req) = (self, &req);
        let entry = self
            .run_txn("assign_schedule", move || engine.plan_assign(req))
            .await?;

        let notice = Notice::ScheduleAssigned {
            day: entry.day,
            at: to_ms(date_of(self.now()), entry.hour),
        };
        let intent = self.intent(
            vec![req.student_id, req.teacher_id],
            notice,
            format!("/class-templates/{}", req.student_id),
        );
        Ok(Outcome::new(entry).with(intent))
    }

    async fn plan_assign(
        &self,
        req: &AssignSchedule,
    ) -> Result<(TxnPlan, ClassTemplateEntry), SchedulingError> {
        let cal = self.teacher_snapshot(req.teacher_id).await;
        let slot = cal
            .slot(req.slot_id)
            .filter(|s| s.is_open())
            .ok_or(Rejection::SlotUnavailable(req.slot_id))?;
        if slot.weekday() != req.day || slot.start_time != req.start_time {
            return Err(SchedulingError::validation("day and start time must match the slot"));
        }

        let acc = self.student_snapshot(req.student_id).await;
        if acc.template.len() >= MAX_TEMPLATE_ENTRIES {
            return Err(SchedulingError::validation("too many weekly entries"));
        }
        let entry = ClassTemplateEntry {
            id: Ulid::new(),
            day: req.day,
            hour: req.start_time,
            teacher_id: req.teacher_id,
            language: req.language.clone(),
            duration_minutes: slot.duration_minutes().min(DEFAULT_LESSON_MINUTES),
        };
        validate_duration(entry.duration_minutes)?;
        if let Some(clash) = acc.template.iter().find(|e| template_entries_overlap(e, &entry)) {
            return Err(Rejection::TemplateOverlap(clash.id).into());
        }

        let mut plan = TxnPlan::new();
        plan.read_teacher(&cal);
        plan.read_student(&acc);
        plan.push(Event::SlotRemoved {
            id: slot.id,
            teacher_id: cal.teacher_id,
        });
        plan.push(Event::TemplateEntryAdded {
            student_id: acc.student_id,
            entry: entry.clone(),
        });
        if !acc.teacher_ids.contains(&req.teacher_id) {
            plan.push(Event::TeacherLinked {
                student_id: acc.student_id,
                teacher_id: req.teacher_id,
            });
        }
        Ok((plan, entry))
    }

    // ── One-off booking ──────────────────────────────────

    pub async fn book_class(
        &self,
        req: BookClass,
        actor: &Identity,
    ) -> Result<Outcome<ScheduledClass>, SchedulingError> {
        require_staff(actor)?;
        validate_language(&req.language)?;
        let span = lesson_span(req.scheduled_at, req.duration_minutes)?;
        if span.start <= self.now() {
            return Err(Rejection::NotInFuture.into());
        }
        self.require_user(req.student_id, Role::Student).await?;
        self.require_user(req.teacher_id, Role::Teacher).await?;

        let (engine, req_ref, actor_id) = (self, &req, actor.id);
        let class = self
            .run_txn("book_class", move || engine.plan_book(req_ref, span, actor_id))
            .await?;

        let intent = self.intent(
            vec![class.student_id, class.teacher_id],
            Notice::ClassBooked { at: class.scheduled_at },
            class_link(class.id),
        );
        Ok(Outcome::new(class).with(intent))
    }

    async fn plan_book(
        &self,
        req: &BookClass,
        span: Span,
        actor_id: Ulid,
    ) -> Result<(TxnPlan, ScheduledClass), SchedulingError> {
        let now = self.now();
        let cal = self.teacher_snapshot(req.teacher_id).await;
        check_booking(&cal, &span, now, &BookingCheck::in_free_slot(req.availability_slot_id))?;
        let acc = self.student_snapshot(req.student_id).await;

        let mut plan = TxnPlan::new();
        plan.read_teacher(&cal);
        plan.read_student(&acc);
        if let Some(kind) = req.use_credit {
            plan.push(ledger::debit(&acc, kind, 1)?);
        }

        let mut class = new_lesson(
            req.student_id,
            req.teacher_id,
            span.start,
            req.duration_minutes,
            req.language.clone(),
            actor_id,
            now,
        );
        class.class_type = req.class_type;
        class.availability_slot_id = req.availability_slot_id;
        class.credit_used = req.use_credit;
        plan.push(Event::ClassCreated { class: class.clone() });
        if !acc.teacher_ids.contains(&req.teacher_id) {
            plan.push(Event::TeacherLinked {
                student_id: req.student_id,
                teacher_id: req.teacher_id,
            });
        }
        Ok((plan, class))
    }

    // ── Reschedule ───────────────────────────────────────

    /// Move a scheduled lesson. The old row becomes `rescheduled`; the new row
    /// points back at it through `rescheduled_from`.
    pub async fn reschedule_class(
        &self,
        class_id: Ulid,
        req: RescheduleClass,
        actor: &Identity,
    ) -> Result<Outcome<ScheduledClass>, SchedulingError> {
        if req.new_scheduled_at <= self.now() {
            return Err(Rejection::NotInFuture.into());
        }
        validate_reason(&req.reason)?;
        let (_, lesson) = self.load_class(class_id).await?;
        require_self_or_staff(actor, lesson.student_id)?;

        let (engine, req_ref) = (self, &req);
        let (old, new) = self
            .run_txn("reschedule_class", move || {
                engine.plan_reschedule(class_id, req_ref, actor)
            })
            .await?;

        let intent = self.intent(
            vec![new.student_id, new.teacher_id],
            Notice::ClassRescheduled {
                from: old.scheduled_at,
                to: new.scheduled_at,
            },
            class_link(new.id),
        );
        Ok(Outcome::new(new).with(intent))
    }

    async fn plan_reschedule(
        &self,
        class_id: Ulid,
        req: &RescheduleClass,
        actor: &Identity,
    ) -> Result<(TxnPlan, (ScheduledClass, ScheduledClass)), SchedulingError> {
        let now = self.now();
        let (cal, old) = self.load_class(class_id).await?;
        require_scheduled(&old, "rescheduled")?;
        if !actor.role.is_staff() && old.scheduled_at <= now {
            return Err(SchedulingError::validation("class has already started"));
        }
        if req.new_scheduled_at == old.scheduled_at {
            return Err(SchedulingError::validation("new time equals the current time"));
        }

        let span = lesson_span(req.new_scheduled_at, old.duration_minutes)?;
        let check = BookingCheck::in_free_slot(req.availability_slot_id).excluding(class_id);
        check_booking(&cal, &span, now, &check)?;

        let acc = self.student_snapshot(old.student_id).await;
        let mut plan = TxnPlan::new();
        plan.read_teacher(&cal);
        plan.read_student(&acc);
        match req.use_credit {
            Some(kind) => plan.push(ledger::debit(&acc, kind, 1)?),
            None => {
                let limit = self.policy.reschedule_limit(actor.role);
                if let Some(counted) = ledger::count_reschedule(&acc, MonthKey::of(now), limit)? {
                    plan.push(counted);
                }
            }
        }

        let mut retired = old.clone();
        retired.status = LessonStatus::Rescheduled;
        retired.updated_at = now;

        let new = ScheduledClass {
            id: Ulid::new(),
            scheduled_at: span.start,
            status: LessonStatus::Scheduled,
            availability_slot_id: req.availability_slot_id,
            rescheduled_from: Some(old.id),
            reschedule_reason: req.reason.clone(),
            credit_used: req.use_credit,
            canceled_at: None,
            canceled_by: None,
            cancel_reason: None,
            completed_at: None,
            created_by: actor.id,
            created_at: now,
            updated_at: now,
            ..old.clone()
        };
        plan.push(Event::ClassUpdated { class: retired });
        plan.push(Event::ClassCreated { class: new.clone() });
        Ok((plan, (old, new)))
    }

    // ── Cancel / complete ────────────────────────────────

    pub async fn cancel_class(
        &self,
        class_id: Ulid,
        req: CancelClass,
        actor: &Identity,
    ) -> Result<Outcome<ScheduledClass>, SchedulingError> {
        require_staff(actor)?;
        validate_reason(&req.reason)?;

        let (engine, req_ref) = (self, &req);
        let class = self
            .run_txn("cancel_class", move || engine.plan_cancel(class_id, req_ref))
            .await?;

        let intent = self.intent(
            vec![class.student_id, class.teacher_id],
            Notice::ClassCanceled { at: class.scheduled_at },
            class_link(class.id),
        );
        Ok(Outcome::new(class).with(intent))
    }

    async fn plan_cancel(
        &self,
        class_id: Ulid,
        req: &CancelClass,
    ) -> Result<(TxnPlan, ScheduledClass), SchedulingError> {
        let now = self.now();
        let (cal, lesson) = self.load_class(class_id).await?;
        require_scheduled(&lesson, "canceled")?;
        if lesson.scheduled_at <= now {
            return Err(SchedulingError::validation("class has already started"));
        }

        let mut canceled = lesson.clone();
        canceled.status = LessonStatus::Canceled;
        canceled.canceled_at = Some(now);
        canceled.canceled_by = Some(req.initiator);
        canceled.cancel_reason = req.reason.clone();
        canceled.updated_at = now;

        let mut plan = TxnPlan::new();
        plan.read_teacher(&cal);
        plan.push(Event::ClassUpdated { class: canceled.clone() });
        if req.initiator == CancelInitiator::Teacher {
            plan.push(ledger::credit(lesson.student_id, CreditKind::TeacherCancellation, 1));
        }
        if let Some(kind) = lesson.credit_used
            && req.initiator != CancelInitiator::Student
        {
            plan.push(ledger::credit(lesson.student_id, kind, 1));
        }
        Ok((plan, canceled))
    }

    pub async fn complete_class(
        &self,
        class_id: Ulid,
        actor: &Identity,
    ) -> Result<Outcome<ScheduledClass>, SchedulingError> {
        let (_, lesson) = self.load_class(class_id).await?;
        let own_teacher = actor.role == Role::Teacher && actor.id == lesson.teacher_id;
        if !actor.role.is_staff() && !own_teacher {
            return Err(SchedulingError::Authorization("only staff or the class teacher"));
        }
        let engine = self;
        let class = self
            .run_txn("complete_class", move || engine.plan_complete(class_id))
            .await?;
        Ok(Outcome::new(class))
    }

    async fn plan_complete(&self, class_id: Ulid) -> Result<(TxnPlan, ScheduledClass), SchedulingError> {
        let now = self.now();
        let (cal, lesson) = self.load_class(class_id).await?;
        require_scheduled(&lesson, "completed")?;
        if lesson.scheduled_at > now {
            return Err(SchedulingError::validation("class has not started yet"));
        }
        let mut done = lesson;
        done.status = LessonStatus::Completed;
        done.completed_at = Some(now);
        done.updated_at = now;

        let mut plan = TxnPlan::new();
        plan.read_teacher(&cal);
        plan.push(Event::ClassUpdated { class: done.clone() });
        Ok((plan, done))
    }

    // ── Slot reclaim ─────────────────────────────────────

    /// Delete a canceled or rescheduled lesson and reopen its time as a
    /// one-date availability slot.
    pub async fn convert_class_to_slot(
        &self,
        class_id: Ulid,
        actor: &Identity,
    ) -> Result<Outcome<AvailabilitySlot>, SchedulingError> {
        require_staff(actor)?;
        let engine = self;
        let slot = self
            .run_txn("convert_class_to_slot", move || engine.plan_convert(class_id))
            .await?;
        let intent = self.intent(
            vec![slot.teacher_id],
            Notice::SlotReopened {
                at: to_ms(slot.start_date, slot.start_time),
            },
            format!("/teachers/{}/availability", slot.teacher_id),
        );
        Ok(Outcome::new(slot).with(intent))
    }

    async fn plan_convert(&self, class_id: Ulid) -> Result<(TxnPlan, AvailabilitySlot), SchedulingError> {
        let now = self.now();
        let (cal, lesson) = self.load_class(class_id).await?;
        if !matches!(lesson.status, LessonStatus::Canceled | LessonStatus::Rescheduled) {
            return Err(SchedulingError::validation(
                "only canceled or rescheduled classes can become slots",
            ));
        }
        if lesson.scheduled_at <= now {
            return Err(Rejection::NotInFuture.into());
        }
        let span = lesson.span();
        let (start, end) = (to_naive(span.start), to_naive(span.end));
        if end.date() != start.date() {
            return Err(SchedulingError::validation("class crosses midnight"));
        }
        if let Some(other) = cal.occupying(&span).next() {
            return Err(Rejection::Overlaps(other.id).into());
        }

        let slot = AvailabilitySlot {
            id: Ulid::new(),
            teacher_id: lesson.teacher_id,
            title: reopened_slot_title(self.policy.locale).into(),
            start_date: start.date(),
            start_time: start.time(),
            end_time: end.time(),
            is_active: true,
            color: None,
            kind: SlotKind::Exception {
                removed: false,
                replaces: None,
            },
        };
        let mut plan = TxnPlan::new();
        plan.read_teacher(&cal);
        plan.push(Event::ClassDeleted {
            id: lesson.id,
            teacher_id: lesson.teacher_id,
            student_id: lesson.student_id,
        });
        plan.push(Event::SlotAdded { slot: slot.clone() });
        Ok((plan, slot))
    }

    // ── Teacher change ───────────────────────────────────

    pub async fn change_teacher(
        &self,
        class_id: Ulid,
        teacher_id: Ulid,
        actor: &Identity,
    ) -> Result<Outcome<ScheduledClass>, SchedulingError> {
        require_staff(actor)?;
        self.require_user(teacher_id, Role::Teacher).await?;

        let engine = self;
        let (previous, class) = self
            .run_txn("change_teacher", move || engine.plan_change_teacher(class_id, teacher_id))
            .await?;

        let intent = self.intent(
            vec![class.student_id, previous, class.teacher_id],
            Notice::TeacherChanged { at: class.scheduled_at },
            class_link(class.id),
        );
        Ok(Outcome::new(class).with(intent))
    }

    async fn plan_change_teacher(
        &self,
        class_id: Ulid,
        teacher_id: Ulid,
    ) -> Result<(TxnPlan, (Ulid, ScheduledClass)), SchedulingError> {
        let now = self.now();
        let (old_cal, lesson) = self.load_class(class_id).await?;
        require_scheduled(&lesson, "reassigned")?;
        let previous = lesson.teacher_id;
        if previous == teacher_id {
            return Err(SchedulingError::validation("class already has this teacher"));
        }

        let new_cal = self.teacher_snapshot(teacher_id).await;
        check_booking(&new_cal, &lesson.span(), now, &BookingCheck::overlap_only())?;
        let acc = self.student_snapshot(lesson.student_id).await;

        let mut moved = lesson.clone();
        moved.teacher_id = teacher_id;
        moved.availability_slot_id = None;
        moved.updated_at = now;

        let mut plan = TxnPlan::new();
        plan.read_teacher(&old_cal);
        plan.read_teacher(&new_cal);
        plan.read_student(&acc);
        plan.push(Event::ClassDeleted {
            id: class_id,
            teacher_id: previous,
            student_id: lesson.student_id,
        });
        plan.push(Event::ClassCreated { class: moved.clone() });
        if !acc.teacher_ids.contains(&teacher_id) {
            plan.push(Event::TeacherLinked {
                student_id: acc.student_id,
                teacher_id,
            });
        }
        let still_taught = old_cal.lessons.iter().any(|l| {
            l.id != class_id
                && l.student_id == lesson.student_id
                && l.status == LessonStatus::Scheduled
        }) || acc.template.iter().any(|e| e.teacher_id == previous);
        if !still_taught && acc.teacher_ids.contains(&previous) {
            plan.push(Event::TeacherUnlinked {
                student_id: acc.student_id,
                teacher_id: previous,
            });
        }
        Ok((plan, (previous, moved)))
    }

    // ── Credits ──────────────────────────────────────────

    pub async fn adjust_credits(
        &self,
        student_id: Ulid,
        kind: CreditKind,
        delta: i64,
        actor: &Identity,
    ) -> Result<Outcome<CreditBalance>, SchedulingError> {
        require_staff(actor)?;
        if delta == 0 || delta.abs() > MAX_CREDIT_DELTA {
            return Err(SchedulingError::validation(format!(
                "delta must be non-zero and at most {MAX_CREDIT_DELTA} in magnitude"
            )));
        }
        self.require_user(student_id, Role::Student).await?;
        let engine = self;
        let balance = self
            .run_txn("adjust_credits", move || engine.plan_adjust(student_id, kind, delta))
            .await?;
        Ok(Outcome::new(balance))
    }

    async fn plan_adjust(
        &self,
        student_id: Ulid,
        kind: CreditKind,
        delta: i64,
    ) -> Result<(TxnPlan, CreditBalance), SchedulingError> {
        let acc = self.student_snapshot(student_id).await;
        let event = if delta > 0 {
            ledger::credit(student_id, kind, delta as u32)
        } else {
            ledger::debit(&acc, kind, delta.unsigned_abs() as u32)?
        };
        let mut balance = acc.credits;
        ledger::apply_delta(&mut balance, kind, delta);

        let mut plan = TxnPlan::new();
        plan.read_student(&acc);
        plan.push(event);
        Ok((plan, balance))
    }

    // ── Teacher slots ────────────────────────────────────

    pub async fn add_slot(
        &self,
        teacher_id: Ulid,
        slot: NewSlot,
        actor: &Identity,
    ) -> Result<Outcome<AvailabilitySlot>, SchedulingError> {
        require_self_or_staff(actor, teacher_id)?;
        validate_slot(&slot)?;
        self.require_user(teacher_id, Role::Teacher).await?;

        let slot = AvailabilitySlot {
            id: Ulid::new(),
            teacher_id,
            title: slot.title,
            start_date: slot.start_date,
            start_time: slot.start_time,
            end_time: slot.end_time,
            is_active: true,
            color: slot.color,
            kind: slot.kind,
        };
        let (engine, slot_ref) = (self, &slot);
        self.run_txn("add_slot", move || engine.plan_add_slot(slot_ref))
            .await?;
        Ok(Outcome::new(slot))
    }

    async fn plan_add_slot(&self, slot: &AvailabilitySlot) -> Result<(TxnPlan, ()), SchedulingError> {
        let cal = self.teacher_snapshot(slot.teacher_id).await;
        if cal.slots.len() >= MAX_SLOTS_PER_TEACHER {
            return Err(SchedulingError::validation("too many slots for this teacher"));
        }
        let mut plan = TxnPlan::new();
        plan.read_teacher(&cal);
        plan.push(Event::SlotAdded { slot: slot.clone() });
        Ok((plan, ()))
    }

    pub async fn remove_slot(
        &self,
        slot_id: Ulid,
        actor: &Identity,
    ) -> Result<Outcome<AvailabilitySlot>, SchedulingError> {
        let teacher_id = self.teacher_of_slot(slot_id)?;
        require_self_or_staff(actor, teacher_id)?;
        let engine = self;
        let slot = self
            .run_txn("remove_slot", move || engine.plan_slot_change(teacher_id, slot_id, None))
            .await?;
        Ok(Outcome::new(slot))
    }

    pub async fn set_slot_active(
        &self,
        slot_id: Ulid,
        active: bool,
        actor: &Identity,
    ) -> Result<Outcome<AvailabilitySlot>, SchedulingError> {
        let teacher_id = self.teacher_of_slot(slot_id)?;
        require_self_or_staff(actor, teacher_id)?;
        let engine = self;
        let slot = self
            .run_txn("set_slot_active", move || {
                engine.plan_slot_change(teacher_id, slot_id, Some(active))
            })
            .await?;
        Ok(Outcome::new(slot))
    }

    /// `None` removes the slot; `Some(active)` toggles it.
    async fn plan_slot_change(
        &self,
        teacher_id: Ulid,
        slot_id: Ulid,
        active: Option<bool>,
    ) -> Result<(TxnPlan, AvailabilitySlot), SchedulingError> {
        let cal = self.teacher_snapshot(teacher_id).await;
        let mut slot = cal
            .slot(slot_id)
            .cloned()
            .ok_or(SchedulingError::not_found("slot", slot_id))?;
        let mut plan = TxnPlan::new();
        plan.read_teacher(&cal);
        match active {
            None => plan.push(Event::SlotRemoved { id: slot_id, teacher_id }),
            Some(active) => {
                slot.is_active = active;
                plan.push(Event::SlotActiveSet {
                    id: slot_id,
                    teacher_id,
                    active,
                });
            }
        }
        Ok((plan, slot))
    }
}
