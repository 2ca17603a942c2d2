use chrono::{NaiveDate, NaiveTime, Weekday};

use super::*;
use crate::auth::{StaticDirectory, UserRecord};

const H: Ms = 3_600_000; // 1 hour in ms

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn at(d: NaiveDate, h: u32, m: u32) -> Ms {
    to_ms(d, hm(h, m))
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("classbook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

struct School {
    engine: Arc<Engine>,
    clock: Arc<ManualClock>,
    directory: Arc<StaticDirectory>,
    path: PathBuf,
    admin: Identity,
    teacher: Identity,
    other_teacher: Identity,
    student: Identity,
}

fn user(dir: &StaticDirectory, name: &str, role: Role) -> Identity {
    let id = Ulid::new();
    dir.insert(UserRecord {
        id,
        name: name.into(),
        role,
        token: None,
    });
    Identity {
        id,
        name: name.into(),
        role,
    }
}

/// Monday 2025-09-01 08:00 UTC.
fn monday_morning() -> Ms {
    at(date(2025, 9, 1), 8, 0)
}

fn school(name: &str) -> School {
    let path = test_wal_path(name);
    let directory = Arc::new(StaticDirectory::new());
    let admin = user(&directory, "Admin", Role::Admin);
    let teacher = user(&directory, "Teresa", Role::Teacher);
    let other_teacher = user(&directory, "Otto", Role::Teacher);
    let student = user(&directory, "Sam", Role::Student);
    let clock = Arc::new(ManualClock::new(monday_morning()));
    let engine = Engine::with_clock(
        path.clone(),
        directory.clone(),
        SchedulingPolicy::default(),
        clock.clone(),
    )
    .unwrap();
    School {
        engine: Arc::new(engine),
        clock,
        directory,
        path,
        admin,
        teacher,
        other_teacher,
        student,
    }
}

impl School {
    fn reopen(&self) -> Engine {
        Engine::with_clock(
            self.path.clone(),
            self.directory.clone(),
            SchedulingPolicy::default(),
            self.clock.clone(),
        )
        .unwrap()
    }

    async fn weekly(&self, teacher: &Identity, from: NaiveDate, start: (u32, u32), end: (u32, u32)) -> AvailabilitySlot {
        let slot = NewSlot {
            title: "Aula".into(),
            start_date: from,
            start_time: hm(start.0, start.1),
            end_time: hm(end.0, end.1),
            color: None,
            kind: SlotKind::Regular {
                repeating: Repeating {
                    interval_weeks: 1,
                    end_date: None,
                },
            },
        };
        self.engine.add_slot(teacher.id, slot, &self.admin).await.unwrap().value
    }

    async fn exception(&self, on: NaiveDate, start: (u32, u32), end: (u32, u32), removed: bool, replaces: Option<NaiveTime>) -> AvailabilitySlot {
        let slot = NewSlot {
            title: "Extra".into(),
            start_date: on,
            start_time: hm(start.0, start.1),
            end_time: hm(end.0, end.1),
            color: None,
            kind: SlotKind::Exception { removed, replaces },
        };
        self.engine.add_slot(self.teacher.id, slot, &self.admin).await.unwrap().value
    }

    fn booking(&self, scheduled_at: Ms) -> BookClass {
        BookClass {
            student_id: self.student.id,
            teacher_id: self.teacher.id,
            scheduled_at,
            duration_minutes: 60,
            language: "en".into(),
            class_type: ClassType::Regular,
            availability_slot_id: None,
            use_credit: None,
        }
    }

    async fn book(&self, scheduled_at: Ms) -> ScheduledClass {
        self.engine
            .book_class(self.booking(scheduled_at), &self.admin)
            .await
            .unwrap()
            .value
    }

    async fn credits(&self) -> CreditBalance {
        self.engine.student_account(self.student.id, &self.admin).await.unwrap().credits
    }
}

fn move_to(at: Ms) -> RescheduleClass {
    RescheduleClass {
        new_scheduled_at: at,
        ..Default::default()
    }
}

// ── Booking ──────────────────────────────────────────────

#[tokio::test]
async fn book_inside_availability() {
    let s = school("book_inside.wal");
    s.weekly(&s.teacher, date(2025, 9, 3), (14, 0), (18, 0)).await;

    let out = s
        .engine
        .book_class(s.booking(at(date(2025, 9, 10), 15, 0)), &s.admin)
        .await
        .unwrap();
    assert_eq!(out.value.status, LessonStatus::Scheduled);
    assert_eq!(out.notifications.len(), 1);
    assert_eq!(out.notifications[0].recipients, vec![s.student.id, s.teacher.id]);

    let view = s
        .engine
        .teacher_availability(s.teacher.id, Some(at(date(2025, 9, 10), 0, 0)), Some(at(date(2025, 9, 11), 0, 0)))
        .await
        .unwrap();
    assert_eq!(view.booked_classes.len(), 1);
    let free: Vec<Span> = view.free_slots.iter().map(|f| f.span).collect();
    assert_eq!(
        free,
        vec![
            Span::new(at(date(2025, 9, 10), 14, 0), at(date(2025, 9, 10), 15, 0)),
            Span::new(at(date(2025, 9, 10), 16, 0), at(date(2025, 9, 10), 18, 0)),
        ]
    );
}

#[tokio::test]
async fn booking_rejections() {
    let s = school("book_rejections.wal");
    s.weekly(&s.teacher, date(2025, 9, 3), (14, 0), (16, 0)).await;
    let wed = date(2025, 9, 10);
    s.book(at(wed, 14, 0)).await;

    let overlap = s.engine.book_class(s.booking(at(wed, 14, 30)), &s.admin).await.unwrap_err();
    assert!(matches!(overlap, SchedulingError::Conflict(Rejection::Overlaps(_))));

    let outside = s.engine.book_class(s.booking(at(wed, 19, 0)), &s.admin).await.unwrap_err();
    assert_eq!(outside, SchedulingError::Conflict(Rejection::OutsideAvailability));

    let past = s.engine.book_class(s.booking(at(date(2025, 8, 27), 14, 0)), &s.admin).await.unwrap_err();
    assert!(matches!(past, SchedulingError::Validation(_)));

    let by_student = s.engine.book_class(s.booking(at(wed, 15, 0)), &s.student).await.unwrap_err();
    assert!(matches!(by_student, SchedulingError::Authorization(_)));

    let mut unknown = s.booking(at(wed, 15, 0));
    unknown.teacher_id = Ulid::new();
    let err = s.engine.book_class(unknown, &s.admin).await.unwrap_err();
    assert!(matches!(err, SchedulingError::NotFound { entity: "teacher", .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_never_double_book() {
    let s = school("concurrent_bookings.wal");
    s.weekly(&s.teacher, date(2025, 9, 3), (14, 0), (18, 0)).await;
    let target = at(date(2025, 9, 10), 14, 0);

    let mut handles = Vec::new();
    for i in 0..16 {
        let engine = s.engine.clone();
        let admin = s.admin.clone();
        // Half the callers aim 30 minutes later; every pair still overlaps.
        let req = s.booking(target + (i % 2) * H / 2);
        handles.push(tokio::spawn(async move { engine.book_class(req, &admin).await }));
    }

    let mut booked = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => booked += 1,
            Err(SchedulingError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(booked, 1);

    let lessons = s.engine.student_classes(s.student.id, None, None, &s.admin).await.unwrap();
    assert_eq!(lessons.len(), 1);
}

// ── Reschedule, quota and credits ────────────────────────

#[tokio::test]
async fn reschedule_keeps_history() {
    let s = school("reschedule_history.wal");
    s.weekly(&s.teacher, date(2025, 9, 3), (14, 0), (18, 0)).await;
    let wed = date(2025, 9, 10);
    let original = s.book(at(wed, 14, 0)).await;

    let mut req = move_to(at(wed, 16, 0));
    req.reason = Some("dentist".into());
    let moved = s.engine.reschedule_class(original.id, req, &s.student).await.unwrap().value;
    assert_eq!(moved.rescheduled_from, Some(original.id));
    assert_eq!(moved.reschedule_reason.as_deref(), Some("dentist"));
    assert_eq!(moved.created_by, s.student.id);

    let old = s.engine.class(original.id, &s.admin).await.unwrap();
    assert_eq!(old.status, LessonStatus::Rescheduled);
    assert_eq!(old.scheduled_at, original.scheduled_at);

    // The old time is free again.
    s.engine
        .book_class(s.booking(at(wed, 14, 0)), &s.admin)
        .await
        .unwrap();
    let all = s.engine.student_classes(s.student.id, None, None, &s.student).await.unwrap();
    assert_eq!(all.len(), 3);

    // A rescheduled lesson cannot move again.
    let err = s.engine.reschedule_class(original.id, move_to(at(wed, 17, 0)), &s.admin).await.unwrap_err();
    assert!(matches!(err, SchedulingError::Validation(_)));
}

#[tokio::test]
async fn third_student_reschedule_in_a_month_is_refused() {
    let s = school("reschedule_quota.wal");
    s.weekly(&s.teacher, date(2025, 9, 3), (12, 0), (18, 0)).await;
    let wed = date(2025, 9, 10);
    let first = s.book(at(wed, 12, 0)).await;

    let second = s.engine.reschedule_class(first.id, move_to(at(wed, 13, 0)), &s.student).await.unwrap().value;
    let third = s.engine.reschedule_class(second.id, move_to(at(wed, 14, 0)), &s.student).await.unwrap().value;
    let err = s.engine.reschedule_class(third.id, move_to(at(wed, 15, 0)), &s.student).await.unwrap_err();
    assert!(matches!(err, SchedulingError::QuotaExceeded { used: 2, limit: 2, .. }));

    let account = s.engine.student_account(s.student.id, &s.student).await.unwrap();
    assert_eq!(account.reschedules_used, 2);
    assert!(!account.can_reschedule);

    // Staff moves are not counted.
    s.engine.reschedule_class(third.id, move_to(at(wed, 15, 0)), &s.admin).await.unwrap();

    // The counter resets with the month.
    s.clock.set(at(date(2025, 10, 1), 8, 0));
    let account = s.engine.student_account(s.student.id, &s.student).await.unwrap();
    assert_eq!(account.reschedules_used, 0);
    assert!(account.can_reschedule);
}

#[tokio::test]
async fn credit_reschedule_bypasses_quota_and_fails_cleanly() {
    let s = school("reschedule_credit.wal");
    s.weekly(&s.teacher, date(2025, 9, 3), (12, 0), (18, 0)).await;
    let wed = date(2025, 9, 10);
    let lesson = s.book(at(wed, 12, 0)).await;
    let blocker = s.book(at(wed, 16, 0)).await;

    let mut with_credit = move_to(at(wed, 13, 0));
    with_credit.use_credit = Some(CreditKind::Bonus);
    let err = s.engine.reschedule_class(lesson.id, with_credit.clone(), &s.student).await.unwrap_err();
    assert!(matches!(err, SchedulingError::InsufficientCredit { kind: CreditKind::Bonus, balance: 0, needed: 1 }));

    s.engine.adjust_credits(s.student.id, CreditKind::Bonus, 1, &s.admin).await.unwrap();

    // A refused move spends nothing.
    let mut onto_blocker = move_to(at(wed, 16, 30));
    onto_blocker.use_credit = Some(CreditKind::Bonus);
    let err = s.engine.reschedule_class(lesson.id, onto_blocker, &s.student).await.unwrap_err();
    assert_eq!(err, SchedulingError::Conflict(Rejection::Overlaps(blocker.id)));
    assert_eq!(s.credits().await.bonus, 1);
    assert_eq!(s.engine.class(lesson.id, &s.student).await.unwrap().status, LessonStatus::Scheduled);

    let moved = s.engine.reschedule_class(lesson.id, with_credit, &s.student).await.unwrap().value;
    assert_eq!(moved.credit_used, Some(CreditKind::Bonus));
    assert_eq!(s.credits().await.bonus, 0);
    let account = s.engine.student_account(s.student.id, &s.student).await.unwrap();
    assert_eq!(account.reschedules_used, 0);
}

#[tokio::test]
async fn student_cannot_touch_someone_elses_class() {
    let s = school("reschedule_foreign.wal");
    s.weekly(&s.teacher, date(2025, 9, 3), (12, 0), (18, 0)).await;
    let lesson = s.book(at(date(2025, 9, 10), 12, 0)).await;
    let stranger = user(&s.directory, "Zoe", Role::Student);

    let err = s
        .engine
        .reschedule_class(lesson.id, move_to(at(date(2025, 9, 10), 13, 0)), &stranger)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::Authorization(_)));
    assert!(s.engine.class(lesson.id, &stranger).await.is_err());
}

// ── Cancel, complete, reclaim ────────────────────────────

#[tokio::test]
async fn teacher_cancellation_grants_credit_and_refunds() {
    let s = school("cancel_credits.wal");
    s.weekly(&s.teacher, date(2025, 9, 3), (12, 0), (18, 0)).await;
    let wed = date(2025, 9, 10);
    s.engine.adjust_credits(s.student.id, CreditKind::Bonus, 1, &s.admin).await.unwrap();

    let mut paid = s.booking(at(wed, 12, 0));
    paid.use_credit = Some(CreditKind::Bonus);
    let paid = s.engine.book_class(paid, &s.admin).await.unwrap().value;
    assert_eq!(s.credits().await.bonus, 0);

    let cancel = CancelClass {
        initiator: CancelInitiator::Teacher,
        reason: Some("sick".into()),
    };
    let canceled = s.engine.cancel_class(paid.id, cancel, &s.admin).await.unwrap().value;
    assert_eq!(canceled.status, LessonStatus::Canceled);
    assert_eq!(canceled.canceled_by, Some(CancelInitiator::Teacher));
    assert_eq!(canceled.cancel_reason.as_deref(), Some("sick"));

    let credits = s.credits().await;
    assert_eq!(credits.teacher_cancellation, 1);
    assert_eq!(credits.bonus, 1);

    // Student-initiated cancellations forfeit the credit.
    let mut paid = s.booking(at(wed, 14, 0));
    paid.use_credit = Some(CreditKind::Bonus);
    let paid = s.engine.book_class(paid, &s.admin).await.unwrap().value;
    let cancel = CancelClass {
        initiator: CancelInitiator::Student,
        reason: None,
    };
    s.engine.cancel_class(paid.id, cancel.clone(), &s.admin).await.unwrap();
    assert_eq!(s.credits().await.bonus, 0);

    let err = s.engine.cancel_class(paid.id, cancel, &s.admin).await.unwrap_err();
    assert!(matches!(err, SchedulingError::Validation(_)));
}

#[tokio::test]
async fn complete_only_after_start() {
    let s = school("complete.wal");
    s.weekly(&s.teacher, date(2025, 9, 3), (12, 0), (18, 0)).await;
    let lesson = s.book(at(date(2025, 9, 3), 12, 0)).await;

    let err = s.engine.complete_class(lesson.id, &s.teacher).await.unwrap_err();
    assert!(matches!(err, SchedulingError::Validation(_)));

    let err = s.engine.complete_class(lesson.id, &s.other_teacher).await.unwrap_err();
    assert!(matches!(err, SchedulingError::Authorization(_)));

    s.clock.set(at(date(2025, 9, 3), 12, 30));
    let done = s.engine.complete_class(lesson.id, &s.teacher).await.unwrap().value;
    assert_eq!(done.status, LessonStatus::Completed);
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn slot_reclaim_round_trip() {
    let s = school("slot_reclaim.wal");
    s.weekly(&s.teacher, date(2025, 9, 3), (14, 0), (15, 0)).await;
    let wed = date(2025, 9, 10);
    let lesson = s.book(at(wed, 14, 0)).await;

    let cancel = CancelClass {
        initiator: CancelInitiator::School,
        reason: None,
    };
    s.engine.cancel_class(lesson.id, cancel, &s.admin).await.unwrap();

    let slot = s.engine.convert_class_to_slot(lesson.id, &s.admin).await.unwrap().value;
    assert_eq!(slot.start_date, wed);
    assert_eq!(slot.start_time, hm(14, 0));
    assert_eq!(slot.end_time, hm(15, 0));
    assert_eq!(slot.kind, SlotKind::Exception { removed: false, replaces: None });
    assert!(matches!(
        s.engine.class(lesson.id, &s.admin).await.unwrap_err(),
        SchedulingError::NotFound { entity: "class", .. }
    ));

    let view = s
        .engine
        .teacher_availability(s.teacher.id, Some(at(wed, 0, 0)), Some(at(wed, 23, 0)))
        .await
        .unwrap();
    assert_eq!(view.free_slots.len(), 1);
    assert!(view.free_slots[0].from_exception);
    assert_eq!(view.free_slots[0].slot_id, slot.id);

    let assign = AssignSchedule {
        student_id: s.student.id,
        teacher_id: s.teacher.id,
        slot_id: slot.id,
        language: "en".into(),
        day: Weekday::Wed,
        start_time: hm(14, 0),
    };
    let entry = s.engine.assign_schedule(assign.clone(), &s.admin).await.unwrap().value;
    assert_eq!(entry.duration_minutes, 60);
    assert_eq!(entry.hour, hm(14, 0));

    // The consumed slot is gone.
    let err = s.engine.assign_schedule(assign, &s.admin).await.unwrap_err();
    assert_eq!(err, SchedulingError::Conflict(Rejection::SlotUnavailable(slot.id)));

    let account = s.engine.student_account(s.student.id, &s.admin).await.unwrap();
    assert_eq!(account.template, vec![entry]);
    assert_eq!(account.teacher_ids, vec![s.teacher.id]);
}

#[tokio::test]
async fn convert_requires_inactive_future_class() {
    let s = school("convert_guard.wal");
    s.weekly(&s.teacher, date(2025, 9, 3), (14, 0), (16, 0)).await;
    let lesson = s.book(at(date(2025, 9, 10), 14, 0)).await;

    let err = s.engine.convert_class_to_slot(lesson.id, &s.admin).await.unwrap_err();
    assert!(matches!(err, SchedulingError::Validation(_)));
}

#[tokio::test]
async fn assign_rejects_mismatched_slot_and_template_overlap() {
    let s = school("assign_guard.wal");
    let a = s.weekly(&s.teacher, date(2025, 9, 3), (14, 0), (15, 30)).await;
    let b = s.weekly(&s.other_teacher, date(2025, 9, 3), (14, 30), (15, 30)).await;

    let wrong_day = AssignSchedule {
        student_id: s.student.id,
        teacher_id: s.teacher.id,
        slot_id: a.id,
        language: "en".into(),
        day: Weekday::Thu,
        start_time: hm(14, 0),
    };
    assert!(matches!(
        s.engine.assign_schedule(wrong_day.clone(), &s.admin).await.unwrap_err(),
        SchedulingError::Validation(_)
    ));

    let ok = AssignSchedule {
        day: Weekday::Wed,
        ..wrong_day
    };
    s.engine.assign_schedule(ok, &s.admin).await.unwrap();

    let clash = AssignSchedule {
        student_id: s.student.id,
        teacher_id: s.other_teacher.id,
        slot_id: b.id,
        language: "en".into(),
        day: Weekday::Wed,
        start_time: hm(14, 30),
    };
    let err = s.engine.assign_schedule(clash, &s.admin).await.unwrap_err();
    assert!(matches!(err, SchedulingError::Conflict(Rejection::TemplateOverlap(_))));
}

#[tokio::test]
async fn removal_markers_cannot_be_assigned_or_booked() {
    let s = school("assign_removal_marker.wal");
    s.weekly(&s.teacher, date(2025, 9, 1), (9, 0), (10, 0)).await;
    let marker = s.exception(date(2025, 9, 8), (9, 0), (10, 0), true, None).await;

    let assign = AssignSchedule {
        student_id: s.student.id,
        teacher_id: s.teacher.id,
        slot_id: marker.id,
        language: "en".into(),
        day: Weekday::Mon,
        start_time: hm(9, 0),
    };
    let err = s.engine.assign_schedule(assign, &s.admin).await.unwrap_err();
    assert_eq!(err, SchedulingError::Conflict(Rejection::SlotUnavailable(marker.id)));

    let booking = BookClass {
        availability_slot_id: Some(marker.id),
        ..s.booking(at(date(2025, 9, 8), 9, 0))
    };
    let err = s.engine.book_class(booking, &s.admin).await.unwrap_err();
    assert_eq!(err, SchedulingError::Conflict(Rejection::SlotUnavailable(marker.id)));

    // The marker survives and the date stays hidden.
    let view = s
        .engine
        .teacher_availability(s.teacher.id, Some(at(date(2025, 9, 8), 0, 0)), Some(at(date(2025, 9, 9), 0, 0)))
        .await
        .unwrap();
    assert!(view.free_slots.is_empty());
    assert_eq!(view.exceptions.len(), 1);
    assert!(s.engine.template(s.student.id, &s.admin).await.unwrap().is_empty());
}

// ── Availability overlay ─────────────────────────────────

#[tokio::test]
async fn exceptions_override_weekly_slots() {
    let s = school("exception_override.wal");
    s.weekly(&s.teacher, date(2025, 9, 1), (9, 0), (10, 0)).await;
    s.exception(date(2025, 9, 8), (9, 0), (10, 0), true, None).await;
    s.exception(date(2025, 9, 15), (11, 0), (12, 0), false, Some(hm(9, 0))).await;

    let view = s
        .engine
        .teacher_availability(s.teacher.id, Some(at(date(2025, 9, 2), 0, 0)), Some(at(date(2025, 9, 23), 0, 0)))
        .await
        .unwrap();
    let free: Vec<Span> = view.free_slots.iter().map(|f| f.span).collect();
    assert_eq!(
        free,
        vec![
            Span::new(at(date(2025, 9, 15), 11, 0), at(date(2025, 9, 15), 12, 0)),
            Span::new(at(date(2025, 9, 22), 9, 0), at(date(2025, 9, 22), 10, 0)),
        ]
    );
    assert_eq!(view.exceptions.len(), 2);

    let err = s.engine.book_class(s.booking(at(date(2025, 9, 8), 9, 0)), &s.admin).await.unwrap_err();
    assert_eq!(err, SchedulingError::Conflict(Rejection::OutsideAvailability));
    s.book(at(date(2025, 9, 15), 11, 0)).await;

    let verdict = s
        .engine
        .can_book(s.teacher.id, at(date(2025, 9, 22), 9, 0), at(date(2025, 9, 22), 10, 0))
        .await
        .unwrap();
    assert!(verdict.ok);
    let verdict = s
        .engine
        .can_book(s.teacher.id, at(date(2025, 9, 15), 11, 0), at(date(2025, 9, 15), 12, 0))
        .await
        .unwrap();
    assert!(!verdict.ok);
    assert!(verdict.reason.is_some());
}

#[tokio::test]
async fn inactive_slots_offer_nothing() {
    let s = school("inactive_slot.wal");
    let slot = s.weekly(&s.teacher, date(2025, 9, 1), (9, 0), (10, 0)).await;
    s.engine.set_slot_active(slot.id, false, &s.teacher).await.unwrap();

    let view = s.engine.teacher_availability(s.teacher.id, None, None).await.unwrap();
    assert!(view.free_slots.is_empty());

    s.engine.set_slot_active(slot.id, true, &s.teacher).await.unwrap();
    let view = s.engine.teacher_availability(s.teacher.id, None, None).await.unwrap();
    assert_eq!(view.free_slots.len(), 4);

    let err = s.engine.remove_slot(slot.id, &s.other_teacher).await.unwrap_err();
    assert!(matches!(err, SchedulingError::Authorization(_)));
    s.engine.remove_slot(slot.id, &s.teacher).await.unwrap();
    assert!(matches!(
        s.engine.remove_slot(slot.id, &s.teacher).await.unwrap_err(),
        SchedulingError::NotFound { .. }
    ));
}

#[tokio::test]
async fn admin_view_collapses_weeks() {
    let s = school("admin_view.wal");
    s.weekly(&s.teacher, date(2025, 9, 1), (9, 0), (10, 0)).await;
    s.weekly(&s.teacher, date(2025, 9, 3), (14, 0), (15, 0)).await;

    let view = s
        .engine
        .admin_teacher_availability(s.teacher.id, None, None, &s.admin)
        .await
        .unwrap();
    let keys: Vec<String> = view.slots.iter().map(|w| w.key()).collect();
    assert_eq!(keys, vec!["1-09:00-10:00", "3-14:00-15:00"]);

    let err = s
        .engine
        .admin_teacher_availability(s.teacher.id, None, None, &s.teacher)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::Authorization(_)));
}

// ── Teacher change ───────────────────────────────────────

#[tokio::test]
async fn change_teacher_moves_lesson_and_links() {
    let s = school("change_teacher.wal");
    s.weekly(&s.teacher, date(2025, 9, 3), (14, 0), (16, 0)).await;
    let lesson = s.book(at(date(2025, 9, 10), 14, 0)).await;

    let out = s.engine.change_teacher(lesson.id, s.other_teacher.id, &s.admin).await.unwrap();
    assert_eq!(out.value.teacher_id, s.other_teacher.id);
    assert_eq!(out.notifications[0].recipients.len(), 3);

    let stored = s.engine.class(lesson.id, &s.other_teacher).await.unwrap();
    assert_eq!(stored.teacher_id, s.other_teacher.id);
    let lessons = s.engine.student_classes(s.student.id, None, None, &s.admin).await.unwrap();
    assert_eq!(lessons.len(), 1);

    let account = s.engine.student_account(s.student.id, &s.admin).await.unwrap();
    assert_eq!(account.teacher_ids, vec![s.other_teacher.id]);

    let view = s
        .engine
        .teacher_availability(s.teacher.id, Some(at(date(2025, 9, 10), 0, 0)), Some(at(date(2025, 9, 11), 0, 0)))
        .await
        .unwrap();
    assert!(view.booked_classes.is_empty());
}

// ── Templates ────────────────────────────────────────────

fn wednesday_entry(s: &School) -> NewTemplateEntry {
    NewTemplateEntry {
        teacher_id: s.teacher.id,
        day: Weekday::Wed,
        hour: hm(14, 0),
        duration_minutes: 60,
        language: "en".into(),
    }
}

#[tokio::test]
async fn generation_is_idempotent_and_reports_skips() {
    let s = school("generate.wal");
    let entry = s.engine.add_template_entry(s.student.id, wednesday_entry(&s), &s.admin).await.unwrap().value;

    // Someone else already holds the third Wednesday.
    let other = user(&s.directory, "Olga", Role::Student);
    s.weekly(&s.teacher, date(2025, 9, 17), (14, 0), (15, 0)).await;
    let mut req = s.booking(at(date(2025, 9, 17), 14, 0));
    req.student_id = other.id;
    let taken = s.engine.book_class(req, &s.admin).await.unwrap().value;

    let out = s
        .engine
        .generate_template_classes(s.student.id, None, date(2025, 9, 1), 3, &s.admin)
        .await
        .unwrap();
    let report = &out.value;
    let starts: Vec<Ms> = report.created.iter().map(|l| l.scheduled_at).collect();
    assert_eq!(starts, vec![at(date(2025, 9, 3), 14, 0), at(date(2025, 9, 10), 14, 0)]);
    assert!(report.created.iter().all(|l| l.template_entry_id == Some(entry.id)));
    assert_eq!(
        report.skipped,
        vec![SkippedOccurrence {
            entry_id: entry.id,
            scheduled_at: at(date(2025, 9, 17), 14, 0),
            reason: Rejection::Overlaps(taken.id),
        }]
    );
    assert_eq!(out.notifications.len(), 1);

    let again = s
        .engine
        .generate_template_classes(s.student.id, Some(vec![entry.id]), date(2025, 9, 1), 2, &s.admin)
        .await
        .unwrap()
        .value;
    assert!(again.created.is_empty());
    assert_eq!(again.already_present, 2);
}

#[tokio::test]
async fn generation_validates_input() {
    let s = school("generate_invalid.wal");
    let err = s
        .engine
        .generate_template_classes(s.student.id, None, date(2025, 9, 1), 0, &s.admin)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::Validation(_)));

    let err = s
        .engine
        .generate_template_classes(s.student.id, Some(vec![Ulid::new()]), date(2025, 9, 1), 2, &s.admin)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::NotFound { entity: "template entry", .. }));
}

#[tokio::test]
async fn template_entry_must_end_by_midnight() {
    let s = school("template_midnight.wal");
    let late = NewTemplateEntry {
        hour: hm(23, 30),
        ..wednesday_entry(&s)
    };
    let err = s.engine.add_template_entry(s.student.id, late, &s.admin).await.unwrap_err();
    assert!(matches!(err, SchedulingError::Validation(_)));
    assert!(s.engine.template(s.student.id, &s.admin).await.unwrap().is_empty());

    let at_midnight = NewTemplateEntry {
        hour: hm(23, 0),
        ..wednesday_entry(&s)
    };
    let err = s.engine.add_template_entry(s.student.id, at_midnight, &s.admin).await.unwrap_err();
    assert!(matches!(err, SchedulingError::Validation(_)));

    let last = NewTemplateEntry {
        hour: hm(22, 30),
        ..wednesday_entry(&s)
    };
    s.engine.add_template_entry(s.student.id, last, &s.admin).await.unwrap();
    let report = s
        .engine
        .generate_template_classes(s.student.id, None, date(2025, 9, 1), 2, &s.admin)
        .await
        .unwrap();
    let starts: Vec<Ms> = report.value.created.iter().map(|l| l.scheduled_at).collect();
    assert_eq!(starts, vec![at(date(2025, 9, 3), 22, 30), at(date(2025, 9, 10), 22, 30)]);
}

#[tokio::test]
async fn template_entries_may_not_overlap() {
    let s = school("template_overlap.wal");
    s.engine.add_template_entry(s.student.id, wednesday_entry(&s), &s.admin).await.unwrap();
    let mut later = wednesday_entry(&s);
    later.hour = hm(14, 30);
    let err = s.engine.add_template_entry(s.student.id, later, &s.admin).await.unwrap_err();
    assert!(matches!(err, SchedulingError::Conflict(Rejection::TemplateOverlap(_))));

    let template = s.engine.template(s.student.id, &s.student).await.unwrap();
    assert_eq!(template.len(), 1);
}

#[tokio::test]
async fn bulk_delete_spares_the_past_and_refunds() {
    let s = school("bulk_delete.wal");
    let entry = s.engine.add_template_entry(s.student.id, wednesday_entry(&s), &s.admin).await.unwrap().value;
    s.engine
        .generate_template_classes(s.student.id, None, date(2025, 9, 1), 4, &s.admin)
        .await
        .unwrap();

    s.weekly(&s.teacher, date(2025, 9, 4), (10, 0), (11, 0)).await;
    s.engine.adjust_credits(s.student.id, CreditKind::Bonus, 1, &s.admin).await.unwrap();
    let mut paid = s.booking(at(date(2025, 9, 11), 10, 0));
    paid.use_credit = Some(CreditKind::Bonus);
    s.engine.book_class(paid, &s.admin).await.unwrap();

    // The first Wednesday is over.
    s.clock.set(at(date(2025, 9, 3), 16, 0));

    let only_range = s
        .engine
        .delete_future_classes(
            s.student.id,
            DeleteScope::DateRange(date(2025, 9, 10), date(2025, 9, 11)),
            None,
            &s.admin,
        )
        .await
        .unwrap();
    assert_eq!(only_range.value, DeleteReport { deleted: 2, failed_chunks: 0 });
    assert_eq!(s.credits().await.bonus, 1);

    let removed = s
        .engine
        .remove_template_entry(s.student.id, entry.id, Some(date(2025, 9, 1)), &s.admin)
        .await
        .unwrap()
        .value;
    assert_eq!(removed.entry.id, entry.id);
    assert_eq!(removed.deleted, Some(DeleteReport { deleted: 2, failed_chunks: 0 }));

    let left = s.engine.student_classes(s.student.id, None, None, &s.admin).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].scheduled_at, at(date(2025, 9, 3), 14, 0));
    assert!(s.engine.template(s.student.id, &s.admin).await.unwrap().is_empty());

    let err = s
        .engine
        .delete_future_classes(
            s.student.id,
            DeleteScope::DateRange(date(2025, 9, 11), date(2025, 9, 10)),
            None,
            &s.admin,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::Validation(_)));
}

// ── Persistence ──────────────────────────────────────────

async fn assert_replayed(engine: &Engine, s: &School, original: Ulid, moved: Ulid) {
    let lessons = engine.student_classes(s.student.id, None, None, &s.admin).await.unwrap();
    assert_eq!(lessons.len(), 2);
    let current = engine.class(moved, &s.admin).await.unwrap();
    assert_eq!(current.rescheduled_from, Some(original));

    let account = engine.student_account(s.student.id, &s.admin).await.unwrap();
    assert_eq!(account.credits.late_student, 3);
    assert_eq!(account.reschedules_used, 1);
    assert_eq!(account.template.len(), 1);

    let err = engine
        .book_class(s.booking(at(date(2025, 9, 10), 15, 30)), &s.admin)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulingError::Conflict(Rejection::Overlaps(_))));
}

#[tokio::test]
async fn state_survives_replay_and_compaction() {
    let s = school("replay.wal");
    s.weekly(&s.teacher, date(2025, 9, 3), (14, 0), (18, 0)).await;
    let lesson = s.book(at(date(2025, 9, 10), 14, 0)).await;
    let moved = s
        .engine
        .reschedule_class(lesson.id, move_to(at(date(2025, 9, 10), 15, 0)), &s.student)
        .await
        .unwrap()
        .value;
    s.engine.adjust_credits(s.student.id, CreditKind::LateStudent, 3, &s.admin).await.unwrap();
    s.engine.add_template_entry(s.student.id, wednesday_entry(&s), &s.admin).await.unwrap();

    assert_replayed(&s.reopen(), &s, lesson.id, moved.id).await;
    assert!(s.engine.wal_appends_since_compact().await > 0);

    s.engine.compact_wal().await.unwrap();
    assert_eq!(s.engine.wal_appends_since_compact().await, 0);
    assert_replayed(&s.reopen(), &s, lesson.id, moved.id).await;
}
