use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{check_duration, check_horizon, day_slots};
use super::conflict::today_utc;
use super::{Engine, EngineError};

impl Engine {
    /// The bookable slot grid for one teacher, one day, one duration.
    /// Pure read — unavailable slots are included, flagged.
    pub async fn compute_slots(
        &self,
        teacher_id: Ulid,
        date: NaiveDate,
        duration_min: u32,
    ) -> Result<Vec<Slot>, EngineError> {
        check_duration(duration_min)?;
        check_horizon(date, today_utc())?;
        let cal = self
            .get_calendar(&teacher_id)
            .ok_or(EngineError::NotFound(teacher_id))?;
        let guard = cal.read().await;
        Ok(day_slots(&guard, date, duration_min))
    }

    pub async fn get_lesson(&self, lesson_id: Ulid) -> Result<Lesson, EngineError> {
        let teacher_id = self
            .teacher_for_lesson(&lesson_id)
            .ok_or(EngineError::NotFound(lesson_id))?;
        let cal = self
            .get_calendar(&teacher_id)
            .ok_or(EngineError::NotFound(teacher_id))?;
        let guard = cal.read().await;
        guard
            .lesson(lesson_id)
            .cloned()
            .ok_or(EngineError::NotFound(lesson_id))
    }

    /// Directory for the booking builder's first step.
    pub async fn list_teachers(&self) -> Vec<TeacherInfo> {
        let arcs: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(arcs.len());
        for cal in arcs {
            let guard = cal.read().await;
            out.push(TeacherInfo { id: guard.teacher_id, name: guard.name.clone() });
        }
        out.sort_by_key(|t| t.id);
        out
    }

    /// A teacher's lessons, optionally restricted to a time window.
    /// Result is sorted by start (calendar order).
    pub async fn list_for_teacher(
        &self,
        teacher_id: Ulid,
        range: Option<Span>,
    ) -> Result<Vec<Lesson>, EngineError> {
        if let Some(r) = &range {
            if r.start >= r.end {
                return Err(EngineError::InvalidSchedule("range start must come before end"));
            }
            if r.duration_ms() > MAX_QUERY_WINDOW_MS {
                return Err(EngineError::LimitExceeded("query window too wide"));
            }
        }
        let cal = self
            .get_calendar(&teacher_id)
            .ok_or(EngineError::NotFound(teacher_id))?;
        let guard = cal.read().await;
        Ok(match range {
            Some(r) => guard.overlapping(&r).cloned().collect(),
            None => guard.lessons.clone(),
        })
    }

    /// Every lesson a student takes part in, across teachers, sorted by start.
    pub async fn list_for_student(&self, student_id: Ulid) -> Vec<Lesson> {
        let ids = self
            .by_student
            .get(&student_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(lesson) = self.get_lesson(id).await {
                out.push(lesson);
            }
        }
        out.sort_by_key(|l| l.span.start);
        out
    }

    /// The actor's side of the negotiation queue: every lesson whose derived
    /// turn points at them.
    pub async fn pending_for_actor(&self, actor: &Actor) -> Vec<Lesson> {
        match actor.role {
            Role::Teacher => {
                let Some(cal) = self.get_calendar(&actor.id) else {
                    return Vec::new();
                };
                let guard = cal.read().await;
                guard
                    .lessons
                    .iter()
                    .filter(|l| l.status.pending_for() == Turn::Teacher)
                    .cloned()
                    .collect()
            }
            Role::Student => self
                .list_for_student(actor.id)
                .await
                .into_iter()
                .filter(|l| l.status.pending_for() == Turn::Student)
                .collect(),
        }
    }
}
