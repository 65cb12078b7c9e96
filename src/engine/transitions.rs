use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{check_duration, check_horizon};
use super::conflict::{check_commit_clear, check_slot_open, now_ms, today_utc, validate_span};
use super::{Engine, EngineError, WalCommand};

/// The actor named in the transition table for this move, and nobody else.
fn check_actor(lesson: &Lesson, actor: &Actor, expected: Role) -> Result<(), EngineError> {
    let participant = match expected {
        Role::Teacher => lesson.teacher_id,
        Role::Student => lesson.student_id,
    };
    if actor.role != expected || actor.id != participant {
        return Err(EngineError::UnauthorizedTransition { id: lesson.id, role: actor.role });
    }
    Ok(())
}

/// Either side of the negotiation, but nobody else.
fn check_participant(lesson: &Lesson, actor: &Actor) -> Result<(), EngineError> {
    let participant = match actor.role {
        Role::Teacher => actor.id == lesson.teacher_id,
        Role::Student => actor.id == lesson.student_id,
    };
    if !participant {
        return Err(EngineError::UnauthorizedTransition { id: lesson.id, role: actor.role });
    }
    Ok(())
}

fn check_status(lesson: &Lesson, from: LessonStatus) -> Result<(), EngineError> {
    if lesson.status != from {
        return Err(EngineError::InvalidState { id: lesson.id, status: lesson.status });
    }
    Ok(())
}

fn check_text(text: &Option<String>) -> Result<(), EngineError> {
    if let Some(t) = text
        && t.len() > MAX_TEXT_LEN
    {
        return Err(EngineError::LimitExceeded("message too long"));
    }
    Ok(())
}

impl Engine {
    pub async fn register_teacher(
        &self,
        id: Ulid,
        name: Option<String>,
        hours: WeeklyHours,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_TEACHERS {
            return Err(EngineError::LimitExceeded("too many teachers"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("teacher name too long"));
        }
        if !hours.is_valid() {
            return Err(EngineError::InvalidSchedule("working hours out of range"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::TeacherRegistered { id, name: name.clone(), hours };
        self.wal_append(&event).await?;
        let cal = CalendarState::new(id, name, hours);
        self.state.insert(id, Arc::new(RwLock::new(cal)));
        Ok(())
    }

    /// Create a lesson in `Requested` state. Student-only; the span must be a
    /// currently bookable slot: allowed duration, inside the booking horizon,
    /// inside working hours, and clear of every non-terminal lesson.
    #[allow(clippy::too_many_arguments)]
    pub async fn request_lesson(
        &self,
        actor: &Actor,
        id: Ulid,
        teacher_id: Ulid,
        span: Span,
        lesson_type: LessonType,
        instrument: String,
        message: Option<String>,
    ) -> Result<(), EngineError> {
        if actor.role != Role::Student {
            return Err(EngineError::UnauthorizedTransition { id, role: actor.role });
        }
        validate_span(&span)?;
        if span.duration_ms() % MINUTE_MS != 0 {
            return Err(EngineError::InvalidSchedule("unsupported lesson duration"));
        }
        check_duration((span.duration_ms() / MINUTE_MS) as u32)?;
        if instrument.is_empty() {
            return Err(EngineError::InvalidSchedule("instrument is required"));
        }
        if instrument.len() > MAX_INSTRUMENT_LEN {
            return Err(EngineError::LimitExceeded("instrument name too long"));
        }
        check_text(&message)?;

        let date = date_of(span.start)
            .ok_or(EngineError::InvalidSchedule("timestamp out of range"))?;
        check_horizon(date, today_utc())?;

        let cal = self
            .get_calendar(&teacher_id)
            .ok_or(EngineError::NotFound(teacher_id))?;
        let mut guard = cal.write().await;
        if guard.lessons.len() >= MAX_LESSONS_PER_CALENDAR {
            return Err(EngineError::LimitExceeded("too many lessons on calendar"));
        }
        if self.lesson_index.contains_key(&id) || guard.lesson(id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }

        let inside_hours = guard
            .hours
            .window_for(date)
            .is_some_and(|w| w.contains_span(&span));
        if !inside_hours {
            return Err(EngineError::InvalidSchedule("outside the teacher's working hours"));
        }

        check_slot_open(&guard, &span)?;

        let event = Event::LessonRequested {
            id,
            teacher_id,
            student_id: actor.id,
            span,
            lesson_type,
            instrument,
            message,
            at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event, id, teacher_id).await
    }

    /// Teacher accepts the requested time. Availability is re-validated at
    /// commit so two approvals can never leave overlapping scheduled lessons.
    pub async fn approve(&self, actor: &Actor, lesson_id: Ulid) -> Result<(), EngineError> {
        let (teacher_id, mut cal) = self.resolve_lesson_write(&lesson_id).await?;
        let lesson = cal.lesson(lesson_id).ok_or(EngineError::NotFound(lesson_id))?;
        check_actor(lesson, actor, Role::Teacher)?;
        check_status(lesson, LessonStatus::Requested)?;
        let span = lesson.span;
        let student_id = lesson.student_id;

        check_commit_clear(&cal, &span, lesson_id)?;

        let event = Event::LessonApproved { id: lesson_id, teacher_id, at: now_ms() };
        self.persist_and_apply(&mut cal, &event, lesson_id, student_id).await
    }

    pub async fn reject(
        &self,
        actor: &Actor,
        lesson_id: Ulid,
        note: Option<String>,
    ) -> Result<(), EngineError> {
        check_text(&note)?;
        let (teacher_id, mut cal) = self.resolve_lesson_write(&lesson_id).await?;
        let lesson = cal.lesson(lesson_id).ok_or(EngineError::NotFound(lesson_id))?;
        check_actor(lesson, actor, Role::Teacher)?;
        check_status(lesson, LessonStatus::Requested)?;
        let student_id = lesson.student_id;

        let event = Event::LessonRejected { id: lesson_id, teacher_id, note, at: now_ms() };
        self.persist_and_apply(&mut cal, &event, lesson_id, student_id).await
    }

    /// Teacher counters with a different time; the ball moves to the student.
    /// The proposed span is not committed (and does not block the calendar)
    /// until accepted.
    pub async fn propose_alternative(
        &self,
        actor: &Actor,
        lesson_id: Ulid,
        proposed: Span,
        note: Option<String>,
    ) -> Result<(), EngineError> {
        validate_span(&proposed)?;
        check_text(&note)?;
        let now = now_ms();
        if proposed.start <= now {
            return Err(EngineError::InvalidSchedule("proposed time must be in the future"));
        }

        let (teacher_id, mut cal) = self.resolve_lesson_write(&lesson_id).await?;
        let lesson = cal.lesson(lesson_id).ok_or(EngineError::NotFound(lesson_id))?;
        check_actor(lesson, actor, Role::Teacher)?;
        check_status(lesson, LessonStatus::Requested)?;
        let student_id = lesson.student_id;

        let event = Event::AlternativeProposed {
            id: lesson_id,
            teacher_id,
            proposed,
            note,
            at: now,
        };
        self.persist_and_apply(&mut cal, &event, lesson_id, student_id).await
    }

    /// Student accepts the counter-proposal: the proposed span replaces the
    /// original, re-validated against the calendar at commit time.
    pub async fn accept_reschedule(
        &self,
        actor: &Actor,
        lesson_id: Ulid,
    ) -> Result<(), EngineError> {
        let (teacher_id, mut cal) = self.resolve_lesson_write(&lesson_id).await?;
        let lesson = cal.lesson(lesson_id).ok_or(EngineError::NotFound(lesson_id))?;
        check_actor(lesson, actor, Role::Student)?;
        check_status(lesson, LessonStatus::PendingStudentApproval)?;
        let Some(proposed) = lesson.proposed else {
            return Err(EngineError::InvalidState { id: lesson_id, status: lesson.status });
        };

        check_commit_clear(&cal, &proposed, lesson_id)?;

        let event = Event::RescheduleAccepted { id: lesson_id, teacher_id, at: now_ms() };
        self.persist_and_apply(&mut cal, &event, lesson_id, teacher_id).await
    }

    pub async fn decline_reschedule(
        &self,
        actor: &Actor,
        lesson_id: Ulid,
        note: Option<String>,
    ) -> Result<(), EngineError> {
        check_text(&note)?;
        let (teacher_id, mut cal) = self.resolve_lesson_write(&lesson_id).await?;
        let lesson = cal.lesson(lesson_id).ok_or(EngineError::NotFound(lesson_id))?;
        check_actor(lesson, actor, Role::Student)?;
        check_status(lesson, LessonStatus::PendingStudentApproval)?;

        let event = Event::RescheduleDeclined { id: lesson_id, teacher_id, note, at: now_ms() };
        self.persist_and_apply(&mut cal, &event, lesson_id, teacher_id).await
    }

    pub async fn mark_completed(&self, actor: &Actor, lesson_id: Ulid) -> Result<(), EngineError> {
        let (teacher_id, mut cal) = self.resolve_lesson_write(&lesson_id).await?;
        let lesson = cal.lesson(lesson_id).ok_or(EngineError::NotFound(lesson_id))?;
        check_actor(lesson, actor, Role::Teacher)?;
        check_status(lesson, LessonStatus::Scheduled)?;
        let student_id = lesson.student_id;

        let event = Event::LessonCompleted { id: lesson_id, teacher_id, at: now_ms() };
        self.persist_and_apply(&mut cal, &event, lesson_id, student_id).await
    }

    /// Teacher-only, and only once the lesson has started.
    pub async fn mark_no_show(&self, actor: &Actor, lesson_id: Ulid) -> Result<(), EngineError> {
        let (teacher_id, mut cal) = self.resolve_lesson_write(&lesson_id).await?;
        let lesson = cal.lesson(lesson_id).ok_or(EngineError::NotFound(lesson_id))?;
        check_actor(lesson, actor, Role::Teacher)?;
        check_status(lesson, LessonStatus::Scheduled)?;
        let now = now_ms();
        if now < lesson.span.start {
            return Err(EngineError::InvalidSchedule(
                "cannot mark a no-show before the lesson starts",
            ));
        }
        let student_id = lesson.student_id;

        let event = Event::LessonNoShow { id: lesson_id, teacher_id, at: now };
        self.persist_and_apply(&mut cal, &event, lesson_id, student_id).await
    }

    /// Either participant may cancel a scheduled lesson.
    pub async fn cancel(&self, actor: &Actor, lesson_id: Ulid) -> Result<(), EngineError> {
        let (teacher_id, mut cal) = self.resolve_lesson_write(&lesson_id).await?;
        let lesson = cal.lesson(lesson_id).ok_or(EngineError::NotFound(lesson_id))?;
        check_participant(lesson, actor)?;
        check_status(lesson, LessonStatus::Scheduled)?;
        let counterparty = match actor.role {
            Role::Teacher => lesson.student_id,
            Role::Student => lesson.teacher_id,
        };

        let event = Event::LessonCancelled {
            id: lesson_id,
            teacher_id,
            by: actor.role,
            at: now_ms(),
        };
        self.persist_and_apply(&mut cal, &event, lesson_id, counterparty).await
    }

    /// Compact the WAL by rewriting it as the minimal event set that
    /// recreates current state: one registration plus one snapshot per lesson.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let teacher_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in teacher_ids {
            let Some(cal_arc) = self.get_calendar(&id) else { continue };
            let guard = cal_arc.read().await;

            events.push(Event::TeacherRegistered {
                id: guard.teacher_id,
                name: guard.name.clone(),
                hours: guard.hours,
            });
            for lesson in &guard.lessons {
                events.push(Event::LessonSnapshot { lesson: lesson.clone() });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
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
