//! HTTP handlers for the REST API.
//!
//! Each handler authenticates through `Caller`, delegates to the engine,
//! hands the resulting notification intents to the dispatcher and wraps
//! the value in the `{success, message, data}` envelope.

use axum::{
    extract::{Path, State},
    Json,
};
use ulid::Ulid;

use super::dto::*;
use super::error::{AppError, Localized};
use super::state::{AppState, Caller, JsonBody, QueryArgs};
use crate::engine::{
    AssignSchedule, BookClass, CancelClass, NewSlot, NewTemplateEntry, Outcome, RescheduleClass,
    Verdict,
};
use crate::messages::{classes_deleted, classes_generated, Msg};
use crate::model::date_of;

/// Result type for handlers.
pub type HandlerResult<T> = Result<Json<ApiResponse<T>>, AppError>;

fn respond<T>(message: impl Into<String>, data: T) -> HandlerResult<T> {
    Ok(Json(ApiResponse::ok(message, data)))
}

impl AppState {
    /// Queue an outcome's notifications and return its value.
    fn deliver<T>(&self, outcome: Outcome<T>) -> T {
        self.notifications.dispatch(outcome.notifications);
        outcome.value
    }
}

// =============================================================================
// Health
// =============================================================================

/// GET /health
pub async fn health() -> HandlerResult<HealthResponse> {
    respond(
        Msg::Ok.text(Default::default()),
        HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        },
    )
}

// =============================================================================
// Classes
// =============================================================================

/// POST /classes
pub async fn book_class(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(req): JsonBody<BookClassRequest>,
) -> HandlerResult<ClassDto> {
    let booking = BookClass {
        student_id: req.student_id,
        teacher_id: req.teacher_id,
        scheduled_at: millis(req.scheduled_at),
        duration_minutes: req.duration_minutes,
        language: req.language,
        class_type: req.class_type,
        availability_slot_id: req.availability_slot_id,
        use_credit: req.use_credit,
    };
    let outcome = state
        .engine
        .book_class(booking, &caller.identity)
        .await
        .localized(caller.locale)?;
    respond(Msg::ClassBooked.text(caller.locale), state.deliver(outcome).into())
}

/// GET /classes/{id}
pub async fn get_class(
    State(state): State<AppState>,
    caller: Caller,
    Path(class_id): Path<Ulid>,
) -> HandlerResult<ClassDto> {
    let class = state
        .engine
        .class(class_id, &caller.identity)
        .await
        .localized(caller.locale)?;
    respond(Msg::Ok.text(caller.locale), class.into())
}

/// POST /classes/{id}/reschedule
pub async fn reschedule_class(
    State(state): State<AppState>,
    caller: Caller,
    Path(class_id): Path<Ulid>,
    JsonBody(req): JsonBody<RescheduleRequest>,
) -> HandlerResult<ClassDto> {
    let move_to = RescheduleClass {
        new_scheduled_at: millis(req.new_scheduled_at),
        reason: req.reason,
        availability_slot_id: req.availability_slot_id,
        use_credit: req.use_credit,
    };
    let outcome = state
        .engine
        .reschedule_class(class_id, move_to, &caller.identity)
        .await
        .localized(caller.locale)?;
    respond(Msg::ClassRescheduled.text(caller.locale), state.deliver(outcome).into())
}

/// POST /classes/{id}/cancel
pub async fn cancel_class(
    State(state): State<AppState>,
    caller: Caller,
    Path(class_id): Path<Ulid>,
    JsonBody(req): JsonBody<CancelRequest>,
) -> HandlerResult<ClassDto> {
    let cancel = CancelClass {
        initiator: req.initiator,
        reason: req.reason,
    };
    let outcome = state
        .engine
        .cancel_class(class_id, cancel, &caller.identity)
        .await
        .localized(caller.locale)?;
    respond(Msg::ClassCanceled.text(caller.locale), state.deliver(outcome).into())
}

/// POST /classes/{id}/complete
pub async fn complete_class(
    State(state): State<AppState>,
    caller: Caller,
    Path(class_id): Path<Ulid>,
) -> HandlerResult<ClassDto> {
    let outcome = state
        .engine
        .complete_class(class_id, &caller.identity)
        .await
        .localized(caller.locale)?;
    respond(Msg::ClassCompleted.text(caller.locale), state.deliver(outcome).into())
}

/// POST /classes/{id}/convert-to-slot
pub async fn convert_to_slot(
    State(state): State<AppState>,
    caller: Caller,
    Path(class_id): Path<Ulid>,
) -> HandlerResult<SlotDto> {
    let outcome = state
        .engine
        .convert_class_to_slot(class_id, &caller.identity)
        .await
        .localized(caller.locale)?;
    respond(Msg::ClassConverted.text(caller.locale), state.deliver(outcome).into())
}

/// PUT /classes/{id}/teacher
pub async fn change_teacher(
    State(state): State<AppState>,
    caller: Caller,
    Path(class_id): Path<Ulid>,
    JsonBody(req): JsonBody<ChangeTeacherRequest>,
) -> HandlerResult<ClassDto> {
    let outcome = state
        .engine
        .change_teacher(class_id, req.teacher_id, &caller.identity)
        .await
        .localized(caller.locale)?;
    respond(Msg::TeacherChanged.text(caller.locale), state.deliver(outcome).into())
}

// =============================================================================
// Students
// =============================================================================

/// GET /students/{id}/classes?from&to
pub async fn student_classes(
    State(state): State<AppState>,
    caller: Caller,
    Path(student_id): Path<Ulid>,
    QueryArgs(window): QueryArgs<WindowQuery>,
) -> HandlerResult<Vec<ClassDto>> {
    let (from, to) = window.millis();
    let classes = state
        .engine
        .student_classes(student_id, from, to, &caller.identity)
        .await
        .localized(caller.locale)?;
    respond(Msg::Ok.text(caller.locale), classes.into_iter().map(Into::into).collect())
}

/// GET /students/{id}/account
pub async fn student_account(
    State(state): State<AppState>,
    caller: Caller,
    Path(student_id): Path<Ulid>,
) -> HandlerResult<AccountDto> {
    let account = state
        .engine
        .student_account(student_id, &caller.identity)
        .await
        .localized(caller.locale)?;
    respond(Msg::Ok.text(caller.locale), account.into())
}

/// POST /admin/students/{id}/credits
pub async fn adjust_credits(
    State(state): State<AppState>,
    caller: Caller,
    Path(student_id): Path<Ulid>,
    JsonBody(req): JsonBody<CreditsRequest>,
) -> HandlerResult<crate::model::CreditBalance> {
    let outcome = state
        .engine
        .adjust_credits(student_id, req.kind, req.delta, &caller.identity)
        .await
        .localized(caller.locale)?;
    respond(Msg::CreditsAdjusted.text(caller.locale), state.deliver(outcome))
}

// =============================================================================
// Admin scheduling
// =============================================================================

/// POST /admin/assign-schedule
///
/// Consumes the slot, then pre-generates the new entry's lessons over the
/// configured horizon.
pub async fn assign_schedule(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(req): JsonBody<AssignScheduleRequest>,
) -> HandlerResult<AssignScheduleResponse> {
    let assign = AssignSchedule {
        student_id: req.student_id,
        teacher_id: req.teacher_id,
        slot_id: req.slot_id,
        language: req.language,
        day: req.day,
        start_time: req.start_time,
    };
    let outcome = state
        .engine
        .assign_schedule(assign, &caller.identity)
        .await
        .localized(caller.locale)?;
    let entry = state.deliver(outcome);

    let today = date_of(state.engine.now());
    let weeks = state.engine.policy().generation_weeks;
    let generated = state
        .engine
        .generate_template_classes(req.student_id, Some(vec![entry.id]), today, weeks, &caller.identity)
        .await
        .localized(caller.locale)?;
    let generated = state.deliver(generated);

    respond(
        Msg::ScheduleAssigned.text(caller.locale),
        AssignScheduleResponse {
            template_entry: entry.into(),
            generated: generated.into(),
        },
    )
}

/// GET /admin/teacher-availability/{teacherId}?from&to
pub async fn admin_teacher_availability(
    State(state): State<AppState>,
    caller: Caller,
    Path(teacher_id): Path<Ulid>,
    QueryArgs(window): QueryArgs<WindowQuery>,
) -> HandlerResult<AdminAvailabilityDto> {
    let (from, to) = window.millis();
    let view = state
        .engine
        .admin_teacher_availability(teacher_id, from, to, &caller.identity)
        .await
        .localized(caller.locale)?;
    respond(Msg::Ok.text(caller.locale), view.into())
}

// =============================================================================
// Teachers and slots
// =============================================================================

/// GET /teachers/{id}/availability?from&to
pub async fn teacher_availability(
    State(state): State<AppState>,
    caller: Caller,
    Path(teacher_id): Path<Ulid>,
    QueryArgs(window): QueryArgs<WindowQuery>,
) -> HandlerResult<AvailabilityDto> {
    let (from, to) = window.millis();
    let view = state
        .engine
        .teacher_availability(teacher_id, from, to)
        .await
        .localized(caller.locale)?;
    respond(Msg::Ok.text(caller.locale), view.into())
}

/// GET /teachers/{id}/can-book?start&end
pub async fn can_book(
    State(state): State<AppState>,
    caller: Caller,
    Path(teacher_id): Path<Ulid>,
    QueryArgs(query): QueryArgs<CanBookQuery>,
) -> HandlerResult<Verdict> {
    let verdict = state
        .engine
        .can_book(teacher_id, millis(query.start), millis(query.end))
        .await
        .localized(caller.locale)?;
    respond(Msg::Ok.text(caller.locale), verdict)
}

/// POST /teachers/{id}/slots
pub async fn add_slot(
    State(state): State<AppState>,
    caller: Caller,
    Path(teacher_id): Path<Ulid>,
    JsonBody(req): JsonBody<NewSlotRequest>,
) -> HandlerResult<SlotDto> {
    let slot = NewSlot {
        kind: req.kind(),
        title: req.title,
        start_date: req.start_date,
        start_time: req.start_time,
        end_time: req.end_time,
        color: req.color,
    };
    let outcome = state
        .engine
        .add_slot(teacher_id, slot, &caller.identity)
        .await
        .localized(caller.locale)?;
    respond(Msg::SlotAdded.text(caller.locale), state.deliver(outcome).into())
}

/// DELETE /slots/{id}
pub async fn remove_slot(
    State(state): State<AppState>,
    caller: Caller,
    Path(slot_id): Path<Ulid>,
) -> HandlerResult<SlotDto> {
    let outcome = state
        .engine
        .remove_slot(slot_id, &caller.identity)
        .await
        .localized(caller.locale)?;
    respond(Msg::SlotRemoved.text(caller.locale), state.deliver(outcome).into())
}

/// PUT /slots/{id}/active
pub async fn set_slot_active(
    State(state): State<AppState>,
    caller: Caller,
    Path(slot_id): Path<Ulid>,
    JsonBody(req): JsonBody<SetActiveRequest>,
) -> HandlerResult<SlotDto> {
    let outcome = state
        .engine
        .set_slot_active(slot_id, req.is_active, &caller.identity)
        .await
        .localized(caller.locale)?;
    respond(Msg::SlotUpdated.text(caller.locale), state.deliver(outcome).into())
}

// =============================================================================
// Class templates
// =============================================================================

/// GET /class-templates/{studentId}
pub async fn get_template(
    State(state): State<AppState>,
    caller: Caller,
    Path(student_id): Path<Ulid>,
) -> HandlerResult<Vec<TemplateEntryDto>> {
    let entries = state
        .engine
        .template(student_id, &caller.identity)
        .await
        .localized(caller.locale)?;
    respond(Msg::Ok.text(caller.locale), entries.into_iter().map(Into::into).collect())
}

/// POST /class-templates/{studentId}/entries
pub async fn add_template_entry(
    State(state): State<AppState>,
    caller: Caller,
    Path(student_id): Path<Ulid>,
    JsonBody(req): JsonBody<TemplateEntryRequest>,
) -> HandlerResult<TemplateEntryDto> {
    let entry = NewTemplateEntry {
        teacher_id: req.teacher_id,
        day: req.day,
        hour: req.start_time,
        duration_minutes: req.duration_minutes,
        language: req.language,
    };
    let outcome = state
        .engine
        .add_template_entry(student_id, entry, &caller.identity)
        .await
        .localized(caller.locale)?;
    respond(Msg::TemplateEntryAdded.text(caller.locale), state.deliver(outcome).into())
}

/// DELETE /class-templates/{studentId}/entries/{entryId}?deleteFutureFrom=
pub async fn remove_template_entry(
    State(state): State<AppState>,
    caller: Caller,
    Path((student_id, entry_id)): Path<(Ulid, Ulid)>,
    QueryArgs(query): QueryArgs<RemoveEntryQuery>,
) -> HandlerResult<RemovedEntryDto> {
    let outcome = state
        .engine
        .remove_template_entry(student_id, entry_id, query.delete_future_from, &caller.identity)
        .await
        .localized(caller.locale)?;
    let removed = state.deliver(outcome);
    let message = match removed.deleted {
        Some(report) => classes_deleted(report.deleted, caller.locale),
        None => Msg::TemplateEntryRemoved.text(caller.locale).to_owned(),
    };
    respond(
        message,
        RemovedEntryDto {
            template_entry: removed.entry.into(),
            deleted: removed.deleted.map(Into::into),
        },
    )
}

/// POST /class-templates/{studentId}/generate
pub async fn generate_classes(
    State(state): State<AppState>,
    caller: Caller,
    Path(student_id): Path<Ulid>,
    JsonBody(req): JsonBody<GenerateRequest>,
) -> HandlerResult<GenerationDto> {
    let from = req.from_date.unwrap_or_else(|| date_of(state.engine.now()));
    let weeks = req.weeks.unwrap_or(state.engine.policy().generation_weeks);
    let outcome = state
        .engine
        .generate_template_classes(student_id, req.entry_ids, from, weeks, &caller.identity)
        .await
        .localized(caller.locale)?;
    let report = state.deliver(outcome);
    let message = classes_generated(report.created.len(), report.skipped.len(), caller.locale);
    respond(message, report.into())
}

/// POST /class-templates/{studentId}/delete-classes
pub async fn delete_classes(
    State(state): State<AppState>,
    caller: Caller,
    Path(student_id): Path<Ulid>,
    JsonBody(req): JsonBody<DeleteClassesRequest>,
) -> HandlerResult<DeleteDto> {
    let scope = req.scope().localized(caller.locale)?;
    let outcome = state
        .engine
        .delete_future_classes(student_id, scope, req.template_entries, &caller.identity)
        .await
        .localized(caller.locale)?;
    let report = state.deliver(outcome);
    respond(classes_deleted(report.deleted, caller.locale), report.into())
}
