mod availability;
mod conflict;
mod error;
mod ledger;
mod mutations;
mod queries;
mod templates;
#[cfg(test)]
mod tests;

pub use availability::{
    distinct_weekly, materialize, merge_overlapping, occurrences, subtract_intervals, FreeSlot,
    MaterializedAvailability, WeeklyTime,
};
pub use conflict::{check_booking, BookingCheck, Rejection, Verdict};
pub use error::SchedulingError;
pub use ledger::{can_reschedule, count_reschedule, credit, debit};
pub use mutations::{AssignSchedule, BookClass, CancelClass, NewSlot, RescheduleClass};
pub use queries::{AccountView, AdminAvailability};
pub use templates::{
    DeleteReport, DeleteScope, GenerationReport, NewTemplateEntry, RemovedEntry, SkippedOccurrence,
};

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::auth::Directory;
use crate::messages::{Locale, Notice};
use crate::model::*;
use crate::notify::NotificationIntent;
use crate::observability::{
    BOOKINGS_REJECTED_TOTAL, TRANSACTIONS_TOTAL, TRANSACTION_RETRIES_TOTAL, WAL_FLUSH_BATCH_SIZE,
    WAL_FLUSH_DURATION_SECONDS,
};
use crate::wal::Wal;

pub type SharedCalendar = Arc<RwLock<TeacherCalendar>>;
pub type SharedAccount = Arc<RwLock<StudentAccount>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        commit: Commit,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        commits: Vec<Commit>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Commit, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Waits for one append, drains whatever else is already queued, then
/// flushes and fsyncs once for the whole batch before answering every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { commit, response } => {
                let mut batch = vec![(commit, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { commit, response }) => batch.push((commit, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                flush_and_respond(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (commit, _) in batch {
        if let Err(e) = wal.append_buffered(commit) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so stale bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { commits, response } => {
            let result = Wal::write_compact_file(wal.path(), &commits)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { commit, response } => {
            flush_and_respond(wal, &mut vec![(commit, response)]);
        }
    }
}

// ── Policy, clock, outcome ───────────────────────────────

/// Scheduling knobs injected at construction.
#[derive(Debug, Clone)]
pub struct SchedulingPolicy {
    /// Non-credit reschedules a student may make per calendar month.
    pub student_reschedule_limit: u32,
    pub max_txn_retries: u32,
    /// Default horizon when generating lessons from a template.
    pub generation_weeks: u32,
    /// Default availability window for queries without `to`.
    pub availability_days: u32,
    /// Language of notification text.
    pub locale: Locale,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self {
            student_reschedule_limit: 2,
            max_txn_retries: 3,
            generation_weeks: 8,
            availability_days: 28,
            locale: Locale::PtBr,
        }
    }
}

impl SchedulingPolicy {
    /// Monthly quota for non-credit reschedules. Staff and teachers have none.
    pub fn reschedule_limit(&self, role: Role) -> Option<u32> {
        (role == Role::Student).then_some(self.student_reschedule_limit)
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Ms;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Ms {
        conflict::now_ms()
    }
}

/// Settable clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(at: Ms) -> Self {
        Self(AtomicI64::new(at))
    }

    pub fn set(&self, at: Ms) {
        self.0.store(at, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Ms) {
        self.0.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Ms {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a mutation plus the notifications it asks to have delivered.
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    pub value: T,
    pub notifications: Vec<NotificationIntent>,
}

impl<T> Outcome<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            notifications: Vec::new(),
        }
    }

    pub(super) fn with(mut self, intent: NotificationIntent) -> Self {
        self.notifications.push(intent);
        self
    }
}

// ── Transactions ─────────────────────────────────────────

/// Reads observed and events to write, built from snapshots.
#[derive(Debug, Default)]
pub(super) struct TxnPlan {
    reads: BTreeMap<Target, u64>,
    events: Vec<Event>,
}

impl TxnPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_teacher(&mut self, cal: &TeacherCalendar) {
        self.reads.insert(Target::Teacher(cal.teacher_id), cal.version);
    }

    pub fn read_student(&mut self, acc: &StudentAccount) {
        self.reads.insert(Target::Student(acc.student_id), acc.version);
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

/// Secondary lookups maintained on apply.
#[derive(Default)]
struct Indexes {
    class_to_teacher: DashMap<Ulid, Ulid>,
    slot_to_teacher: DashMap<Ulid, Ulid>,
    /// Student → lesson ids across all teachers.
    student_classes: DashMap<Ulid, Vec<Ulid>>,
}

/// Apply an event to a calendar. The caller holds the write lock.
fn apply_to_calendar(cal: &mut TeacherCalendar, event: &Event, idx: &Indexes) {
    match event {
        Event::SlotAdded { slot } => {
            cal.slots.retain(|s| s.id != slot.id);
            cal.slots.push(slot.clone());
            idx.slot_to_teacher.insert(slot.id, cal.teacher_id);
        }
        Event::SlotActiveSet { id, active, .. } => {
            if let Some(slot) = cal.slots.iter_mut().find(|s| s.id == *id) {
                slot.is_active = *active;
            }
        }
        Event::SlotRemoved { id, .. } => {
            cal.slots.retain(|s| s.id != *id);
            idx.slot_to_teacher.remove(id);
        }
        Event::ClassCreated { class } => {
            cal.remove_lesson(class.id);
            cal.insert_lesson(class.clone());
            idx.class_to_teacher.insert(class.id, cal.teacher_id);
            let mut ids = idx.student_classes.entry(class.student_id).or_default();
            if !ids.contains(&class.id) {
                ids.push(class.id);
            }
        }
        Event::ClassUpdated { class } => {
            cal.remove_lesson(class.id);
            cal.insert_lesson(class.clone());
        }
        Event::ClassDeleted { id, student_id, .. } => {
            cal.remove_lesson(*id);
            // A teacher change re-creates the lesson elsewhere in the same commit.
            idx.class_to_teacher
                .remove_if(id, |_, teacher| *teacher == cal.teacher_id);
            let still_exists = idx.class_to_teacher.contains_key(id);
            if !still_exists
                && let Some(mut ids) = idx.student_classes.get_mut(student_id)
            {
                ids.retain(|c| c != id);
            }
        }
        _ => return,
    }
    cal.version += 1;
}

fn apply_to_account(acc: &mut StudentAccount, event: &Event) {
    match event {
        Event::TemplateEntryAdded { entry, .. } => {
            acc.template.retain(|e| e.id != entry.id);
            acc.template.push(entry.clone());
        }
        Event::TemplateEntryRemoved { entry_id, .. } => {
            acc.template.retain(|e| e.id != *entry_id);
        }
        Event::TeacherLinked { teacher_id, .. } => {
            if !acc.teacher_ids.contains(teacher_id) {
                acc.teacher_ids.push(*teacher_id);
            }
        }
        Event::TeacherUnlinked { teacher_id, .. } => {
            acc.teacher_ids.retain(|t| t != teacher_id);
        }
        Event::CreditAdjusted { kind, delta, .. } => {
            ledger::apply_delta(&mut acc.credits, *kind, *delta);
        }
        Event::RescheduleCounted { month, count, .. } => {
            acc.reschedules.insert(*month, *count);
        }
        _ => return,
    }
    acc.version += 1;
}

pub struct Engine {
    teachers: DashMap<Ulid, SharedCalendar>,
    students: DashMap<Ulid, SharedAccount>,
    wal_tx: mpsc::Sender<WalCommand>,
    index: Indexes,
    /// Commits hold it shared; compaction takes it exclusively.
    commit_gate: RwLock<()>,
    pub(super) directory: Arc<dyn Directory>,
    pub(super) policy: SchedulingPolicy,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        directory: Arc<dyn Directory>,
        policy: SchedulingPolicy,
    ) -> io::Result<Self> {
        Self::with_clock(wal_path, directory, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        wal_path: PathBuf,
        directory: Arc<dyn Directory>,
        policy: SchedulingPolicy,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let commits = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            teachers: DashMap::new(),
            students: DashMap::new(),
            wal_tx,
            index: Indexes::default(),
            commit_gate: RwLock::new(()),
            directory,
            policy,
            clock,
        };

        // Sole owner of every Arc during replay, so try_write always succeeds.
        // Never block here: this may run inside an async context.
        for commit in &commits {
            for event in &commit.events {
                match event.target() {
                    Target::Teacher(id) => {
                        if let Ok(mut cal) = engine.calendar(id).try_write() {
                            apply_to_calendar(&mut cal, event, &engine.index);
                        }
                    }
                    Target::Student(id) => {
                        if let Ok(mut acc) = engine.account(id).try_write() {
                            apply_to_account(&mut acc, event);
                        }
                    }
                }
            }
        }
        info!(
            commits = commits.len(),
            teachers = engine.teachers.len(),
            students = engine.students.len(),
            "engine state replayed"
        );
        Ok(engine)
    }

    pub fn now(&self) -> Ms {
        self.clock.now()
    }

    pub fn policy(&self) -> &SchedulingPolicy {
        &self.policy
    }

    fn calendar(&self, teacher_id: Ulid) -> SharedCalendar {
        self.teachers
            .entry(teacher_id)
            .or_insert_with(|| Arc::new(RwLock::new(TeacherCalendar::new(teacher_id))))
            .value()
            .clone()
    }

    fn account(&self, student_id: Ulid) -> SharedAccount {
        self.students
            .entry(student_id)
            .or_insert_with(|| Arc::new(RwLock::new(StudentAccount::new(student_id))))
            .value()
            .clone()
    }

    /// Point-in-time copy. Unknown teachers read as an empty version-0 calendar.
    pub(super) async fn teacher_snapshot(&self, teacher_id: Ulid) -> TeacherCalendar {
        let shared = self.teachers.get(&teacher_id).map(|e| e.value().clone());
        match shared {
            Some(cal) => cal.read().await.clone(),
            None => TeacherCalendar::new(teacher_id),
        }
    }

    pub(super) async fn student_snapshot(&self, student_id: Ulid) -> StudentAccount {
        let shared = self.students.get(&student_id).map(|e| e.value().clone());
        match shared {
            Some(acc) => acc.read().await.clone(),
            None => StudentAccount::new(student_id),
        }
    }

    pub(super) fn teacher_of_class(&self, class_id: Ulid) -> Result<Ulid, SchedulingError> {
        self.index
            .class_to_teacher
            .get(&class_id)
            .map(|e| *e.value())
            .ok_or(SchedulingError::not_found("class", class_id))
    }

    pub(super) fn teacher_of_slot(&self, slot_id: Ulid) -> Result<Ulid, SchedulingError> {
        self.index
            .slot_to_teacher
            .get(&slot_id)
            .map(|e| *e.value())
            .ok_or(SchedulingError::not_found("slot", slot_id))
    }

    /// Lesson ids of a student grouped by the teacher calendar holding them.
    pub(super) fn classes_by_teacher(&self, student_id: Ulid) -> BTreeMap<Ulid, Vec<Ulid>> {
        let ids = self
            .index
            .student_classes
            .get(&student_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut grouped: BTreeMap<Ulid, Vec<Ulid>> = BTreeMap::new();
        for id in ids {
            if let Some(teacher) = self.index.class_to_teacher.get(&id).map(|e| *e.value()) {
                grouped.entry(teacher).or_default().push(id);
            }
        }
        grouped
    }

    /// Snapshot of the calendar holding `class_id`, plus the lesson itself.
    pub(super) async fn load_class(
        &self,
        class_id: Ulid,
    ) -> Result<(TeacherCalendar, ScheduledClass), SchedulingError> {
        let teacher_id = self.teacher_of_class(class_id)?;
        let cal = self.teacher_snapshot(teacher_id).await;
        let lesson = cal
            .lesson(class_id)
            .cloned()
            .ok_or(SchedulingError::not_found("class", class_id))?;
        Ok((cal, lesson))
    }

    /// The directory entry for `user_id`, which must hold `role`.
    pub(super) async fn require_user(
        &self,
        user_id: Ulid,
        role: Role,
    ) -> Result<Identity, SchedulingError> {
        let entity = match role {
            Role::Teacher => "teacher",
            Role::Student => "student",
            Role::Admin | Role::Manager => "user",
        };
        match self.directory.identity(user_id).await {
            Some(user) if user.role == role => Ok(user),
            _ => Err(SchedulingError::not_found(entity, user_id)),
        }
    }

    pub(super) fn intent(&self, recipients: Vec<Ulid>, notice: Notice, link: String) -> NotificationIntent {
        let (title, body) = notice.render(self.policy.locale);
        NotificationIntent {
            recipients,
            title,
            body,
            link,
        }
    }

    /// Write commit to WAL via the background group-commit writer.
    async fn wal_append(&self, commit: &Commit) -> Result<(), SchedulingError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                commit: commit.clone(),
                response: tx,
            })
            .await
            .map_err(|_| SchedulingError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| SchedulingError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| SchedulingError::Storage(e.to_string()))
    }

    /// Lock every touched document in global order, verify the versions the
    /// plan was built from, persist, apply. `Ok(false)` means a stale read.
    async fn commit(&self, plan: TxnPlan) -> Result<bool, SchedulingError> {
        let _gate = self.commit_gate.read().await;

        let mut targets: BTreeSet<Target> = plan.reads.keys().copied().collect();
        targets.extend(plan.events.iter().map(Event::target));

        // Target orders teachers before students, each by id.
        let mut calendars: BTreeMap<Ulid, OwnedRwLockWriteGuard<TeacherCalendar>> = BTreeMap::new();
        let mut accounts: BTreeMap<Ulid, OwnedRwLockWriteGuard<StudentAccount>> = BTreeMap::new();
        for target in targets {
            match target {
                Target::Teacher(id) => {
                    calendars.insert(id, self.calendar(id).write_owned().await);
                }
                Target::Student(id) => {
                    accounts.insert(id, self.account(id).write_owned().await);
                }
            }
        }

        for (target, seen) in &plan.reads {
            let current = match target {
                Target::Teacher(id) => calendars.get(id).map(|c| c.version),
                Target::Student(id) => accounts.get(id).map(|a| a.version),
            };
            if current != Some(*seen) {
                return Ok(false);
            }
        }

        if plan.events.is_empty() {
            return Ok(true);
        }

        let commit = Commit {
            at: self.now(),
            events: plan.events,
        };
        self.wal_append(&commit).await?;
        for event in &commit.events {
            match event.target() {
                Target::Teacher(id) => {
                    if let Some(cal) = calendars.get_mut(&id) {
                        apply_to_calendar(cal, event, &self.index);
                    }
                }
                Target::Student(id) => {
                    if let Some(acc) = accounts.get_mut(&id) {
                        apply_to_account(acc, event);
                    }
                }
            }
        }
        Ok(true)
    }

    /// Plan from fresh snapshots and commit, re-planning on a stale read up to
    /// `max_txn_retries` times. Errors from planning abort without writing.
    pub(super) async fn run_txn<T, F, Fut>(
        &self,
        operation: &'static str,
        mut attempt: F,
    ) -> Result<T, SchedulingError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(TxnPlan, T), SchedulingError>>,
    {
        for n in 0..=self.policy.max_txn_retries {
            let (plan, value) = match attempt().await {
                Ok(planned) => planned,
                Err(e) => {
                    if let SchedulingError::Conflict(rejection) = &e {
                        metrics::counter!(BOOKINGS_REJECTED_TOTAL, "reason" => rejection.reason())
                            .increment(1);
                        info!(operation, %rejection, "rejected");
                    }
                    metrics::counter!(TRANSACTIONS_TOTAL, "operation" => operation, "outcome" => "rejected")
                        .increment(1);
                    return Err(e);
                }
            };
            let events = plan.len();
            if self.commit(plan).await? {
                metrics::counter!(TRANSACTIONS_TOTAL, "operation" => operation, "outcome" => "committed")
                    .increment(1);
                debug!(operation, events, attempt = n, "committed");
                return Ok(value);
            }
            metrics::counter!(TRANSACTION_RETRIES_TOTAL, "operation" => operation).increment(1);
            debug!(operation, attempt = n, "stale snapshot, retrying");
        }
        metrics::counter!(TRANSACTIONS_TOTAL, "operation" => operation, "outcome" => "conflict")
            .increment(1);
        metrics::counter!(BOOKINGS_REJECTED_TOTAL, "reason" => Rejection::ConcurrentUpdate.reason())
            .increment(1);
        Err(SchedulingError::Conflict(Rejection::ConcurrentUpdate))
    }

    // ── WAL maintenance ──────────────────────────────────

    /// Rewrite the WAL as one snapshot commit per document.
    pub async fn compact_wal(&self) -> Result<(), SchedulingError> {
        let _gate = self.commit_gate.write().await;
        let at = self.now();
        let mut commits = Vec::new();

        let calendars: Vec<SharedCalendar> = self.teachers.iter().map(|e| e.value().clone()).collect();
        for shared in calendars {
            let cal = shared.read().await;
            let mut events: Vec<Event> = cal
                .slots
                .iter()
                .map(|slot| Event::SlotAdded { slot: slot.clone() })
                .collect();
            events.extend(
                cal.lessons
                    .iter()
                    .map(|class| Event::ClassCreated { class: class.clone() }),
            );
            if !events.is_empty() {
                commits.push(Commit { at, events });
            }
        }

        let accounts: Vec<SharedAccount> = self.students.iter().map(|e| e.value().clone()).collect();
        for shared in accounts {
            let acc = shared.read().await;
            let student_id = acc.student_id;
            let mut events: Vec<Event> = acc
                .template
                .iter()
                .map(|entry| Event::TemplateEntryAdded {
                    student_id,
                    entry: entry.clone(),
                })
                .collect();
            events.extend(acc.teacher_ids.iter().map(|&teacher_id| Event::TeacherLinked {
                student_id,
                teacher_id,
            }));
            for kind in [CreditKind::TeacherCancellation, CreditKind::Bonus, CreditKind::LateStudent] {
                let balance = acc.credits.get(kind);
                if balance > 0 {
                    events.push(ledger::credit(student_id, kind, balance));
                }
            }
            events.extend(acc.reschedules.iter().map(|(&month, &count)| {
                Event::RescheduleCounted {
                    student_id,
                    month,
                    count,
                }
            }));
            if !events.is_empty() {
                commits.push(Commit { at, events });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                commits,
                response: tx,
            })
            .await
            .map_err(|_| SchedulingError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| SchedulingError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| SchedulingError::Storage(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
