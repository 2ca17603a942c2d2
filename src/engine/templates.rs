//! Weekly template maintenance and the bulk lesson paths behind it.
//!
//! Generation and deletion are chunked: each chunk of `BULK_CHUNK_SIZE`
//! lessons is its own transaction, and a failed chunk does not undo the
//! chunks before it. Callers get counts, not all-or-nothing.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime, Weekday};
use tracing::{info, warn};
use ulid::Ulid;

use crate::auth::require_staff;
use crate::limits::*;
use crate::messages::Notice;
use crate::model::*;
use crate::observability::BULK_DELETED_TOTAL;
use crate::recurrence::{expand, WeeklyRule};

use super::conflict::{
    check_booking, template_entries_overlap, validate_duration, validate_same_day, BookingCheck,
    Rejection,
};
use super::mutations::{new_lesson, validate_language};
use super::{ledger, Engine, Outcome, SchedulingError, TxnPlan};

#[derive(Debug, Clone)]
pub struct NewTemplateEntry {
    pub teacher_id: Ulid,
    pub day: Weekday,
    pub hour: NaiveTime,
    pub duration_minutes: u32,
    pub language: String,
}

/// Date bound of a bulk deletion. Ranges include `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteScope {
    FromDate(NaiveDate),
    DateRange(NaiveDate, NaiveDate),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedOccurrence {
    pub entry_id: Ulid,
    pub scheduled_at: Ms,
    pub reason: Rejection,
}

#[derive(Debug, Clone, Default)]
pub struct GenerationReport {
    pub created: Vec<ScheduledClass>,
    pub skipped: Vec<SkippedOccurrence>,
    /// Occurrences that already had a lesson for the same entry.
    pub already_present: usize,
    pub failed_chunks: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted: usize,
    pub failed_chunks: usize,
}

#[derive(Debug, Clone)]
pub struct RemovedEntry {
    pub entry: ClassTemplateEntry,
    pub deleted: Option<DeleteReport>,
}

/// Which lessons a bulk deletion may touch.
#[derive(Debug, Clone)]
struct DeleteBounds {
    student_id: Ulid,
    lower: Ms,
    upper: Option<Ms>,
    entries: Option<Vec<Ulid>>,
}

impl DeleteBounds {
    fn new(student_id: Ulid, scope: DeleteScope, entries: Option<Vec<Ulid>>) -> Result<Self, SchedulingError> {
        let (from, to) = match scope {
            DeleteScope::FromDate(from) => (from, None),
            DeleteScope::DateRange(from, to) => {
                if to < from {
                    return Err(SchedulingError::validation("toDate must not be before fromDate"));
                }
                (from, Some(to))
            }
        };
        Ok(Self {
            student_id,
            lower: start_of_day(from),
            upper: to.map(|to| start_of_day(to) + DAY_MS),
            entries,
        })
    }

    /// Past lessons never match, whatever the date bound says.
    fn matches(&self, lesson: &ScheduledClass, now: Ms) -> bool {
        lesson.student_id == self.student_id
            && lesson.status == LessonStatus::Scheduled
            && lesson.scheduled_at > now
            && lesson.scheduled_at >= self.lower
            && self.upper.is_none_or(|upper| lesson.scheduled_at < upper)
            && self.entries.as_ref().is_none_or(|ids| {
                lesson.template_entry_id.is_some_and(|t| ids.contains(&t))
            })
    }
}

#[derive(Debug, Default)]
struct ChunkResult {
    created: Vec<ScheduledClass>,
    skipped: Vec<SkippedOccurrence>,
    already_present: usize,
}

impl Engine {
    pub async fn template(
        &self,
        student_id: Ulid,
        actor: &Identity,
    ) -> Result<Vec<ClassTemplateEntry>, SchedulingError> {
        crate::auth::require_self_or_staff(actor, student_id)?;
        let mut entries = self.student_snapshot(student_id).await.template;
        entries.sort_by_key(|e| (e.day.num_days_from_monday(), e.hour));
        Ok(entries)
    }

    pub async fn add_template_entry(
        &self,
        student_id: Ulid,
        req: NewTemplateEntry,
        actor: &Identity,
    ) -> Result<Outcome<ClassTemplateEntry>, SchedulingError> {
        require_staff(actor)?;
        validate_language(&req.language)?;
        validate_duration(req.duration_minutes)?;
        validate_same_day(req.hour, req.duration_minutes)?;
        self.require_user(student_id, Role::Student).await?;
        self.require_user(req.teacher_id, Role::Teacher).await?;

        let entry = ClassTemplateEntry {
            id: Ulid::new(),
            day: req.day,
            hour: req.hour,
            teacher_id: req.teacher_id,
            language: req.language,
            duration_minutes: req.duration_minutes,
        };
        let (engine, entry_ref) = (self, &entry);
        self.run_txn("add_template_entry", move || engine.plan_add_entry(student_id, entry_ref))
            .await?;
        Ok(Outcome::new(entry))
    }

    async fn plan_add_entry(
        &self,
        student_id: Ulid,
        entry: &ClassTemplateEntry,
    ) -> Result<(TxnPlan, ()), SchedulingError> {
        let acc = self.student_snapshot(student_id).await;
        if acc.template.len() >= MAX_TEMPLATE_ENTRIES {
            return Err(SchedulingError::validation("too many weekly entries"));
        }
        if let Some(clash) = acc.template.iter().find(|e| template_entries_overlap(e, entry)) {
            return Err(Rejection::TemplateOverlap(clash.id).into());
        }
        let mut plan = TxnPlan::new();
        plan.read_student(&acc);
        plan.push(Event::TemplateEntryAdded {
            student_id,
            entry: entry.clone(),
        });
        if !acc.teacher_ids.contains(&entry.teacher_id) {
            plan.push(Event::TeacherLinked {
                student_id,
                teacher_id: entry.teacher_id,
            });
        }
        Ok((plan, ()))
    }

    /// Drop a weekly entry. With `delete_future_from`, also bulk-delete the
    /// entry's future lessons from that date on.
    pub async fn remove_template_entry(
        &self,
        student_id: Ulid,
        entry_id: Ulid,
        delete_future_from: Option<NaiveDate>,
        actor: &Identity,
    ) -> Result<Outcome<RemovedEntry>, SchedulingError> {
        require_staff(actor)?;
        let engine = self;
        let entry = self
            .run_txn("remove_template_entry", move || engine.plan_remove_entry(student_id, entry_id))
            .await?;

        let Some(from) = delete_future_from else {
            return Ok(Outcome::new(RemovedEntry { entry, deleted: None }));
        };
        let cascade = self
            .delete_future_classes(student_id, DeleteScope::FromDate(from), Some(vec![entry_id]), actor)
            .await?;
        Ok(Outcome {
            value: RemovedEntry {
                entry,
                deleted: Some(cascade.value),
            },
            notifications: cascade.notifications,
        })
    }

    async fn plan_remove_entry(
        &self,
        student_id: Ulid,
        entry_id: Ulid,
    ) -> Result<(TxnPlan, ClassTemplateEntry), SchedulingError> {
        let acc = self.student_snapshot(student_id).await;
        let entry = acc
            .template_entry(entry_id)
            .cloned()
            .ok_or(SchedulingError::not_found("template entry", entry_id))?;
        let mut plan = TxnPlan::new();
        plan.read_student(&acc);
        plan.push(Event::TemplateEntryRemoved { student_id, entry_id });
        Ok((plan, entry))
    }

    // ── Generation ───────────────────────────────────────

    /// Pre-generate lessons for weekly entries over `[from, from + weeks)`.
    ///
    /// Re-running is harmless: an occurrence that already has a lesson for the
    /// same entry, in any status, is left alone.
    pub async fn generate_template_classes(
        &self,
        student_id: Ulid,
        entry_ids: Option<Vec<Ulid>>,
        from: NaiveDate,
        weeks: u32,
        actor: &Identity,
    ) -> Result<Outcome<GenerationReport>, SchedulingError> {
        require_staff(actor)?;
        if !(1..=MAX_GENERATION_WEEKS).contains(&weeks) {
            return Err(SchedulingError::validation(format!(
                "weeks must be 1 to {MAX_GENERATION_WEEKS}"
            )));
        }
        self.require_user(student_id, Role::Student).await?;

        let acc = self.student_snapshot(student_id).await;
        let entries: Vec<ClassTemplateEntry> = match entry_ids {
            Some(ids) => ids
                .into_iter()
                .map(|id| {
                    acc.template_entry(id)
                        .cloned()
                        .ok_or(SchedulingError::not_found("template entry", id))
                })
                .collect::<Result<_, _>>()?,
            None => acc.template.clone(),
        };

        let start = start_of_day(from);
        let window = Span::new(start, start + weeks as Ms * WEEK_MS);
        let mut by_teacher: BTreeMap<Ulid, Vec<(ClassTemplateEntry, Span)>> = BTreeMap::new();
        for entry in &entries {
            let rule = WeeklyRule::from_template(entry, from);
            for occ in expand(&rule, &window) {
                by_teacher
                    .entry(entry.teacher_id)
                    .or_default()
                    .push((entry.clone(), occ.span()));
            }
        }

        let mut report = GenerationReport::default();
        let actor_id = actor.id;
        for (teacher_id, items) in &by_teacher {
            let teacher_id = *teacher_id;
            for chunk in items.chunks(BULK_CHUNK_SIZE) {
                let engine = self;
                let result = self
                    .run_txn("generate_template_classes", move || {
                        engine.plan_generate_chunk(teacher_id, student_id, chunk, actor_id)
                    })
                    .await;
                match result {
                    Ok(done) => {
                        report.created.extend(done.created);
                        report.skipped.extend(done.skipped);
                        report.already_present += done.already_present;
                    }
                    Err(e) => {
                        warn!(%student_id, %teacher_id, "generation chunk failed: {e}");
                        report.failed_chunks += 1;
                    }
                }
            }
        }

        info!(
            %student_id,
            created = report.created.len(),
            skipped = report.skipped.len(),
            "generated template classes"
        );
        let mut outcome = Outcome::new(report);
        let created = outcome.value.created.len();
        if created > 0 {
            outcome = outcome.with(self.intent(
                vec![student_id],
                Notice::ClassesGenerated { count: created },
                format!("/students/{student_id}/classes"),
            ));
        }
        Ok(outcome)
    }

    async fn plan_generate_chunk(
        &self,
        teacher_id: Ulid,
        student_id: Ulid,
        chunk: &[(ClassTemplateEntry, Span)],
        actor_id: Ulid,
    ) -> Result<(TxnPlan, ChunkResult), SchedulingError> {
        let now = self.now();
        let cal = self.teacher_snapshot(teacher_id).await;
        let mut plan = TxnPlan::new();
        plan.read_teacher(&cal);

        let mut result = ChunkResult::default();
        let mut planned: Vec<Span> = Vec::new();
        for (entry, span) in chunk {
            let present = cal
                .lessons
                .iter()
                .any(|l| l.template_entry_id == Some(entry.id) && l.scheduled_at == span.start);
            if present {
                result.already_present += 1;
                continue;
            }
            let verdict = check_booking(&cal, span, now, &BookingCheck::overlap_only()).and_then(|()| {
                match planned.iter().any(|p| p.overlaps(span)) {
                    true => Err(Rejection::TemplateOverlap(entry.id)),
                    false => Ok(()),
                }
            });
            if let Err(reason) = verdict {
                result.skipped.push(SkippedOccurrence {
                    entry_id: entry.id,
                    scheduled_at: span.start,
                    reason,
                });
                continue;
            }

            let mut lesson = new_lesson(
                student_id,
                teacher_id,
                span.start,
                entry.duration_minutes,
                entry.language.clone(),
                actor_id,
                now,
            );
            lesson.template_entry_id = Some(entry.id);
            planned.push(*span);
            plan.push(Event::ClassCreated { class: lesson.clone() });
            result.created.push(lesson);
        }
        Ok((plan, result))
    }

    // ── Bulk deletion ────────────────────────────────────

    /// Delete a student's future `scheduled` lessons inside `scope`, optionally
    /// only those generated from `template_entries`. Lessons already started
    /// are never touched. Credits spent on a deleted lesson are refunded;
    /// reschedule quota is not.
    pub async fn delete_future_classes(
        &self,
        student_id: Ulid,
        scope: DeleteScope,
        template_entries: Option<Vec<Ulid>>,
        actor: &Identity,
    ) -> Result<Outcome<DeleteReport>, SchedulingError> {
        require_staff(actor)?;
        let bounds = DeleteBounds::new(student_id, scope, template_entries)?;

        let mut report = DeleteReport::default();
        for (teacher_id, ids) in self.classes_by_teacher(student_id) {
            let now = self.now();
            let cal = self.teacher_snapshot(teacher_id).await;
            let matching: Vec<Ulid> = ids
                .iter()
                .filter_map(|id| cal.lesson(*id))
                .filter(|l| bounds.matches(l, now))
                .map(|l| l.id)
                .collect();

            for chunk in matching.chunks(BULK_CHUNK_SIZE) {
                let (engine, bounds_ref) = (self, &bounds);
                let result = self
                    .run_txn("delete_future_classes", move || {
                        engine.plan_delete_chunk(teacher_id, chunk, bounds_ref)
                    })
                    .await;
                match result {
                    Ok(n) => report.deleted += n,
                    Err(e) => {
                        warn!(%student_id, %teacher_id, "deletion chunk failed: {e}");
                        report.failed_chunks += 1;
                    }
                }
            }
        }

        metrics::counter!(BULK_DELETED_TOTAL).increment(report.deleted as u64);
        info!(%student_id, deleted = report.deleted, failed_chunks = report.failed_chunks, "deleted future classes");

        let mut outcome = Outcome::new(report);
        if report.deleted > 0 {
            outcome = outcome.with(self.intent(
                vec![student_id],
                Notice::ClassesDeleted { count: report.deleted },
                format!("/students/{student_id}/classes"),
            ));
        }
        Ok(outcome)
    }

    async fn plan_delete_chunk(
        &self,
        teacher_id: Ulid,
        chunk: &[Ulid],
        bounds: &DeleteBounds,
    ) -> Result<(TxnPlan, usize), SchedulingError> {
        let now = self.now();
        let cal = self.teacher_snapshot(teacher_id).await;
        let mut plan = TxnPlan::new();
        plan.read_teacher(&cal);

        let mut deleted = 0;
        for id in chunk {
            let Some(lesson) = cal.lesson(*id).filter(|l| bounds.matches(l, now)) else {
                continue;
            };
            plan.push(Event::ClassDeleted {
                id: lesson.id,
                teacher_id,
                student_id: lesson.student_id,
            });
            if let Some(kind) = lesson.credit_used {
                plan.push(ledger::credit(lesson.student_id, kind, 1));
            }
            deleted += 1;
        }
        Ok((plan, deleted))
    }
}
