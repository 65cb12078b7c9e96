mod availability;
mod conflict;
mod error;
mod queries;
mod transitions;

pub use availability::{blocked_spans, day_slots, merge_overlapping, subtract_intervals};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::{Notice, NotifyHub};
use crate::wal::Wal;

pub type SharedCalendarState = Arc<RwLock<CalendarState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    /// Teacher id → calendar. The calendar is the only shared mutable
    /// resource; one transition holds one write lock for check + commit.
    pub state: DashMap<Ulid, SharedCalendarState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: lesson id → teacher id.
    pub(super) lesson_index: DashMap<Ulid, Ulid>,
    /// Student id → lesson ids, for student-side listings.
    pub(super) by_student: DashMap<Ulid, Vec<Ulid>>,
}

/// Apply an event directly to a calendar (no locking — caller holds the lock).
fn apply_to_calendar(
    cal: &mut CalendarState,
    event: &Event,
    lesson_index: &DashMap<Ulid, Ulid>,
    by_student: &DashMap<Ulid, Vec<Ulid>>,
) {
    match event {
        Event::LessonRequested {
            id,
            teacher_id,
            student_id,
            span,
            lesson_type,
            instrument,
            message,
            at,
        } => {
            cal.insert_lesson(Lesson {
                id: *id,
                teacher_id: *teacher_id,
                student_id: *student_id,
                span: *span,
                status: LessonStatus::Requested,
                lesson_type: *lesson_type,
                instrument: instrument.clone(),
                student_message: message.clone(),
                teacher_note: None,
                proposed: None,
                created_at: *at,
                updated_at: *at,
            });
            lesson_index.insert(*id, *teacher_id);
            by_student.entry(*student_id).or_default().push(*id);
        }
        Event::LessonApproved { id, at, .. } => {
            if let Some(l) = cal.lesson_mut(*id) {
                l.status = LessonStatus::Scheduled;
                l.updated_at = *at;
            }
        }
        Event::LessonRejected { id, note, at, .. } => {
            if let Some(l) = cal.lesson_mut(*id) {
                l.status = LessonStatus::Rejected;
                l.teacher_note = note.clone();
                l.updated_at = *at;
            }
        }
        Event::AlternativeProposed { id, proposed, note, at, .. } => {
            if let Some(l) = cal.lesson_mut(*id) {
                l.status = LessonStatus::PendingStudentApproval;
                l.proposed = Some(*proposed);
                l.teacher_note = note.clone();
                l.updated_at = *at;
            }
        }
        Event::RescheduleAccepted { id, at, .. } => {
            // The span changes, so the lesson is re-inserted to keep sort order.
            if let Some(mut l) = cal.take_lesson(*id) {
                if let Some(p) = l.proposed.take() {
                    l.span = p;
                }
                l.status = LessonStatus::Scheduled;
                l.updated_at = *at;
                cal.insert_lesson(l);
            }
        }
        Event::RescheduleDeclined { id, at, .. } => {
            if let Some(l) = cal.lesson_mut(*id) {
                l.status = LessonStatus::Cancelled;
                l.proposed = None;
                l.updated_at = *at;
            }
        }
        Event::LessonCompleted { id, at, .. } => {
            if let Some(l) = cal.lesson_mut(*id) {
                l.status = LessonStatus::Completed;
                l.updated_at = *at;
            }
        }
        Event::LessonCancelled { id, at, .. } => {
            if let Some(l) = cal.lesson_mut(*id) {
                l.status = LessonStatus::Cancelled;
                l.updated_at = *at;
            }
        }
        Event::LessonNoShow { id, at, .. } => {
            if let Some(l) = cal.lesson_mut(*id) {
                l.status = LessonStatus::NoShow;
                l.updated_at = *at;
            }
        }
        Event::LessonSnapshot { lesson } => {
            lesson_index.insert(lesson.id, lesson.teacher_id);
            by_student.entry(lesson.student_id).or_default().push(lesson.id);
            cal.insert_lesson(lesson.clone());
        }
        // TeacherRegistered is handled at the registry level, not here
        Event::TeacherRegistered { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            lesson_index: DashMap::new(),
            by_student: DashMap::new(),
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never use blocking_write here because this may
        // run inside an async context.
        for event in &events {
            match event {
                Event::TeacherRegistered { id, name, hours } => {
                    let cal = CalendarState::new(*id, name.clone(), *hours);
                    engine.state.insert(*id, Arc::new(RwLock::new(cal)));
                }
                other => {
                    if let Some(teacher_id) = event_teacher_id(other)
                        && let Some(entry) = engine.state.get(&teacher_id)
                    {
                        let cal_arc = entry.clone();
                        let mut guard = cal_arc.try_write().expect("replay: uncontended write");
                        apply_to_calendar(&mut guard, other, &engine.lesson_index, &engine.by_student);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_calendar(&self, teacher_id: &Ulid) -> Option<SharedCalendarState> {
        self.state.get(teacher_id).map(|e| e.value().clone())
    }

    pub fn teacher_for_lesson(&self, lesson_id: &Ulid) -> Option<Ulid> {
        self.lesson_index.get(lesson_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify the counterparty in one call.
    pub(super) async fn persist_and_apply(
        &self,
        cal: &mut CalendarState,
        event: &Event,
        lesson_id: Ulid,
        notify_to: Ulid,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_calendar(cal, event, &self.lesson_index, &self.by_student);
        self.notify.send(Notice {
            recipient: notify_to,
            lesson_id,
            event: event.clone(),
        });
        Ok(())
    }

    /// Lookup lesson → teacher, get the calendar, acquire its write lock.
    pub(super) async fn resolve_lesson_write(
        &self,
        lesson_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<CalendarState>), EngineError> {
        let teacher_id = self
            .teacher_for_lesson(lesson_id)
            .ok_or(EngineError::NotFound(*lesson_id))?;
        let cal = self
            .get_calendar(&teacher_id)
            .ok_or(EngineError::NotFound(teacher_id))?;
        let guard = cal.write_owned().await;
        Ok((teacher_id, guard))
    }
}

/// Extract the owning teacher's id from a lesson event.
fn event_teacher_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::LessonRequested { teacher_id, .. }
        | Event::LessonApproved { teacher_id, .. }
        | Event::LessonRejected { teacher_id, .. }
        | Event::AlternativeProposed { teacher_id, .. }
        | Event::RescheduleAccepted { teacher_id, .. }
        | Event::RescheduleDeclined { teacher_id, .. }
        | Event::LessonCompleted { teacher_id, .. }
        | Event::LessonCancelled { teacher_id, .. }
        | Event::LessonNoShow { teacher_id, .. } => Some(*teacher_id),
        Event::LessonSnapshot { lesson } => Some(lesson.teacher_id),
        Event::TeacherRegistered { .. } => None,
    }
}
