use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Ms
}

pub(crate) fn today_utc() -> chrono::NaiveDate {
    date_of(now_ms()).unwrap_or_default()
}

/// Range and width sanity for any span entering the engine. Ordering is
/// checked here too since wire input can carry start >= end.
pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start >= span.end {
        return Err(EngineError::InvalidSchedule("start must come before end"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::InvalidSchedule("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::InvalidSchedule("span too wide"));
    }
    Ok(())
}

/// Request-time check: every non-terminal lesson holds its slot, so a new
/// request may not land on any of them.
pub(crate) fn check_slot_open(cal: &CalendarState, span: &Span) -> Result<(), EngineError> {
    for other in cal.overlapping(span) {
        if other.status.blocks() {
            return Err(EngineError::SlotConflict(other.id));
        }
    }
    Ok(())
}

/// Commit-time re-validation for approve/accept: only committed times veto.
/// A rival lesson still sitting in `Requested` does not block — it loses the
/// race at its own approval instead (last commit wins, the loser renegotiates).
pub(crate) fn check_commit_clear(
    cal: &CalendarState,
    span: &Span,
    exclude: Ulid,
) -> Result<(), EngineError> {
    for other in cal.overlapping(span) {
        if other.id == exclude {
            continue;
        }
        if other.status.commits_time() {
            return Err(EngineError::SlotConflict(other.id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::*;

    fn cal_with(status: LessonStatus, start: Ms, end: Ms) -> (CalendarState, Ulid) {
        let mut cal = CalendarState::new(Ulid::new(), None, WeeklyHours::default());
        let id = Ulid::new();
        let teacher_id = cal.teacher_id;
        cal.insert_lesson(Lesson {
            id,
            teacher_id,
            student_id: Ulid::new(),
            span: Span::new(start, end),
            status,
            lesson_type: LessonType::Individual,
            instrument: "flute".into(),
            student_message: None,
            teacher_note: None,
            proposed: None,
            created_at: 0,
            updated_at: 0,
        });
        (cal, id)
    }

    #[test]
    fn request_blocked_by_any_non_terminal() {
        for status in [
            LessonStatus::Requested,
            LessonStatus::PendingStudentApproval,
            LessonStatus::Scheduled,
        ] {
            let (cal, id) = cal_with(status, 1000, 2000);
            let err = check_slot_open(&cal, &Span::new(1500, 2500)).unwrap_err();
            assert!(matches!(err, EngineError::SlotConflict(c) if c == id));
        }
    }

    #[test]
    fn terminal_lessons_do_not_block_requests() {
        for status in [
            LessonStatus::Completed,
            LessonStatus::Cancelled,
            LessonStatus::Rejected,
            LessonStatus::NoShow,
        ] {
            let (cal, _) = cal_with(status, 1000, 2000);
            assert!(check_slot_open(&cal, &Span::new(1500, 2500)).is_ok());
        }
    }

    #[test]
    fn commit_check_vetoed_by_scheduled_only() {
        let (cal, id) = cal_with(LessonStatus::Scheduled, 1000, 2000);
        let err = check_commit_clear(&cal, &Span::new(1500, 2500), Ulid::new()).unwrap_err();
        assert!(matches!(err, EngineError::SlotConflict(c) if c == id));

        // A rival open request does not veto a commit.
        let (cal, _) = cal_with(LessonStatus::Requested, 1000, 2000);
        assert!(check_commit_clear(&cal, &Span::new(1500, 2500), Ulid::new()).is_ok());
    }

    #[test]
    fn commit_check_excludes_the_lesson_itself() {
        let (cal, id) = cal_with(LessonStatus::PendingStudentApproval, 1000, 2000);
        assert!(check_commit_clear(&cal, &Span::new(1000, 2000), id).is_ok());
    }

    #[test]
    fn adjacent_spans_do_not_conflict() {
        let (cal, _) = cal_with(LessonStatus::Scheduled, 1000, 2000);
        assert!(check_slot_open(&cal, &Span::new(2000, 3000)).is_ok());
        assert!(check_slot_open(&cal, &Span::new(0, 1000)).is_ok());
    }

    #[test]
    fn span_validation() {
        assert!(validate_span(&Span { start: 2000, end: 1000 }).is_err());
        assert!(validate_span(&Span { start: 1000, end: 1000 }).is_err());
        assert!(validate_span(&Span::new(-5, 1000)).is_err());
        assert!(validate_span(&Span::new(0, MAX_VALID_TIMESTAMP_MS + 1)).is_err());
        assert!(validate_span(&Span::new(1000, 1000 + MAX_SPAN_DURATION_MS + 1)).is_err());
        assert!(validate_span(&Span::new(1000, 2000)).is_ok());
    }
}
