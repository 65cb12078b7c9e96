use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

// ── Slot computation ──────────────────────────────────────────────

pub(crate) fn check_duration(duration_min: u32) -> Result<(), EngineError> {
    if ALLOWED_DURATIONS_MIN.contains(&duration_min) {
        Ok(())
    } else {
        Err(EngineError::InvalidSchedule("unsupported lesson duration"))
    }
}

/// Bookings open the day after `today` and close `BOOKING_HORIZON_DAYS` out.
pub(crate) fn check_horizon(date: NaiveDate, today: NaiveDate) -> Result<(), EngineError> {
    if date <= today {
        return Err(EngineError::InvalidSchedule(
            "same-day and past dates cannot be booked",
        ));
    }
    let limit = today
        .checked_add_days(chrono::Days::new(BOOKING_HORIZON_DAYS))
        .ok_or(EngineError::InvalidSchedule("date out of range"))?;
    if date > limit {
        return Err(EngineError::InvalidSchedule("date is beyond the booking horizon"));
    }
    Ok(())
}

/// Merged spans of every non-terminal lesson intersecting `window`,
/// clamped to it. Terminal lessons never block.
pub fn blocked_spans(cal: &CalendarState, window: &Span) -> Vec<Span> {
    let spans: Vec<Span> = cal
        .overlapping(window)
        .filter(|l| l.status.blocks())
        .map(|l| {
            Span::new(
                l.span.start.max(window.start),
                l.span.end.min(window.end),
            )
        })
        .collect();
    // already sorted by start — calendar order
    merge_overlapping(&spans)
}

/// All bookable slots of the requested duration on one calendar day.
///
/// Candidates start every `SLOT_GRANULARITY_MIN` minutes inside the day's
/// working window and must end by close of hours. A candidate is available
/// iff it sits entirely inside the free remainder of the window. A day off
/// yields an empty list; a fully booked day yields all-unavailable slots.
pub fn day_slots(cal: &CalendarState, date: NaiveDate, duration_min: u32) -> Vec<Slot> {
    let Some(window) = cal.hours.window_for(date) else {
        return Vec::new();
    };
    let duration = duration_min as Ms * MINUTE_MS;
    let step = SLOT_GRANULARITY_MIN as Ms * MINUTE_MS;

    let blocked = blocked_spans(cal, &window);
    let free = subtract_intervals(&[window], &blocked);

    let mut slots = Vec::new();
    let mut start = window.start;
    while start + duration <= window.end {
        let candidate = Span::new(start, start + duration);
        let available = free.iter().any(|f| f.contains_span(&candidate));
        slots.push(Slot { span: candidate, available });
        start += step;
    }
    slots
}

// ── Span algebra ──────────────────────────────────────────────────

/// Merge sorted overlapping/adjacent spans into disjoint spans.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    // 2025-06-10 is a Tuesday.
    fn tuesday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()
    }

    fn calendar(hours: WeeklyHours) -> CalendarState {
        CalendarState::new(Ulid::new(), Some("Ana".into()), hours)
    }

    fn lesson(cal: &mut CalendarState, start: Ms, end: Ms, status: LessonStatus) {
        let l = Lesson {
            id: Ulid::new(),
            teacher_id: cal.teacher_id,
            student_id: Ulid::new(),
            span: Span::new(start, end),
            status,
            lesson_type: LessonType::Individual,
            instrument: "violin".into(),
            student_message: None,
            teacher_note: None,
            proposed: None,
            created_at: 0,
            updated_at: 0,
        };
        cal.insert_lesson(l);
    }

    fn at(date: NaiveDate, hour: u16, min: u16) -> Ms {
        day_start_ms(date) + (hour as Ms * 60 + min as Ms) * MINUTE_MS
    }

    // ── subtract_intervals ────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![Span::new(100, 200), Span::new(300, 400)];
        let remove = vec![Span::new(200, 300)];
        assert_eq!(subtract_intervals(&base, &remove), base);
    }

    #[test]
    fn subtract_full_overlap() {
        let base = vec![Span::new(100, 200)];
        let remove = vec![Span::new(50, 250)];
        assert!(subtract_intervals(&base, &remove).is_empty());
    }

    #[test]
    fn subtract_middle_punch() {
        let base = vec![Span::new(100, 300)];
        let remove = vec![Span::new(150, 200)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![Span::new(100, 150), Span::new(200, 300)]
        );
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = vec![Span::new(0, 1000)];
        let remove = vec![Span::new(100, 200), Span::new(400, 500), Span::new(800, 900)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![
                Span::new(0, 100),
                Span::new(200, 400),
                Span::new(500, 800),
                Span::new(900, 1000),
            ]
        );
    }

    // ── merge_overlapping ────────────────────────────────

    #[test]
    fn merge_overlapping_basic() {
        let spans = vec![Span::new(100, 300), Span::new(200, 400), Span::new(500, 600)];
        assert_eq!(
            merge_overlapping(&spans),
            vec![Span::new(100, 400), Span::new(500, 600)]
        );
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let spans = vec![Span::new(100, 200), Span::new(200, 300)];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(100, 300)]);
    }

    // ── day_slots ────────────────────────────────────────

    #[test]
    fn free_day_all_available() {
        let cal = calendar(WeeklyHours::weekdays(9 * 60, 17 * 60));
        let slots = day_slots(&cal, tuesday(), 45);
        // 480-minute window, 45-minute slots on a 15-minute grid.
        assert_eq!(slots.len(), 30);
        assert!(slots.iter().all(|s| s.available));
        assert_eq!(slots[0].span.start, at(tuesday(), 9, 0));
        assert_eq!(slots[0].span.end, at(tuesday(), 9, 45));
        // Last slot ends exactly at close of hours.
        assert_eq!(slots.last().unwrap().span.end, at(tuesday(), 17, 0));
        // Ordered by start.
        assert!(slots.windows(2).all(|w| w[0].span.start < w[1].span.start));
    }

    #[test]
    fn day_off_is_empty() {
        let cal = calendar(WeeklyHours::weekdays(9 * 60, 17 * 60));
        let saturday = NaiveDate::from_ymd_opt(2025, 6, 14).unwrap();
        assert!(day_slots(&cal, saturday, 30).is_empty());
    }

    #[test]
    fn scheduled_lesson_blocks_overlapping_slots() {
        let mut cal = calendar(WeeklyHours::weekdays(9 * 60, 17 * 60));
        let d = tuesday();
        lesson(&mut cal, at(d, 10, 0), at(d, 10, 45), LessonStatus::Scheduled);

        let slots = day_slots(&cal, d, 45);
        for s in &slots {
            let overlaps = s.span.overlaps(&Span::new(at(d, 10, 0), at(d, 10, 45)));
            assert_eq!(s.available, !overlaps, "slot at {}", s.span.start);
        }
        // [09:15, 10:00) is adjacent, not overlapping — still bookable.
        let nine_fifteen = slots.iter().find(|s| s.span.start == at(d, 9, 15)).unwrap();
        assert!(nine_fifteen.available);
    }

    #[test]
    fn requested_and_pending_block_terminal_does_not() {
        let mut cal = calendar(WeeklyHours::weekdays(9 * 60, 17 * 60));
        let d = tuesday();
        lesson(&mut cal, at(d, 9, 0), at(d, 9, 30), LessonStatus::Requested);
        lesson(&mut cal, at(d, 10, 0), at(d, 10, 30), LessonStatus::PendingStudentApproval);
        lesson(&mut cal, at(d, 11, 0), at(d, 11, 30), LessonStatus::Cancelled);
        lesson(&mut cal, at(d, 12, 0), at(d, 12, 30), LessonStatus::Completed);

        let slots = day_slots(&cal, d, 30);
        let find = |h, m| slots.iter().find(|s| s.span.start == at(d, h, m)).unwrap();
        assert!(!find(9, 0).available);
        assert!(!find(10, 0).available);
        assert!(find(11, 0).available);
        assert!(find(12, 0).available);
    }

    #[test]
    fn pending_proposal_span_does_not_block() {
        // The proposed time is not committed until the student accepts.
        let mut cal = calendar(WeeklyHours::weekdays(9 * 60, 17 * 60));
        let d = tuesday();
        lesson(&mut cal, at(d, 9, 0), at(d, 9, 30), LessonStatus::PendingStudentApproval);
        cal.lessons[0].proposed = Some(Span::new(at(d, 14, 0), at(d, 14, 30)));

        let slots = day_slots(&cal, d, 30);
        let two_pm = slots.iter().find(|s| s.span.start == at(d, 14, 0)).unwrap();
        assert!(two_pm.available);
    }

    #[test]
    fn fully_booked_day_all_unavailable() {
        let mut cal = calendar(WeeklyHours::weekdays(9 * 60, 17 * 60));
        let d = tuesday();
        lesson(&mut cal, at(d, 9, 0), at(d, 17, 0), LessonStatus::Scheduled);

        let slots = day_slots(&cal, d, 60);
        assert!(!slots.is_empty());
        assert!(slots.iter().all(|s| !s.available));
    }

    #[test]
    fn lesson_spilling_past_window_is_clamped() {
        let mut cal = calendar(WeeklyHours::weekdays(9 * 60, 17 * 60));
        let d = tuesday();
        // Blocks from before open until 09:30.
        lesson(&mut cal, at(d, 8, 0), at(d, 9, 30), LessonStatus::Scheduled);

        let slots = day_slots(&cal, d, 30);
        assert!(!slots[0].available);
        let nine_thirty = slots.iter().find(|s| s.span.start == at(d, 9, 30)).unwrap();
        assert!(nine_thirty.available);
    }

    // ── horizon / duration checks ─────────────────────────

    #[test]
    fn duration_whitelist() {
        for d in ALLOWED_DURATIONS_MIN {
            assert!(check_duration(d).is_ok());
        }
        assert!(matches!(check_duration(40), Err(EngineError::InvalidSchedule(_))));
        assert!(matches!(check_duration(0), Err(EngineError::InvalidSchedule(_))));
    }

    #[test]
    fn horizon_bounds() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        let day = |n: u64| today.checked_add_days(chrono::Days::new(n)).unwrap();

        assert!(check_horizon(today, today).is_err()); // same-day
        assert!(check_horizon(day(1), today).is_ok());
        assert!(check_horizon(day(BOOKING_HORIZON_DAYS), today).is_ok());
        assert!(check_horizon(day(BOOKING_HORIZON_DAYS + 1), today).is_err());
        let yesterday = today.pred_opt().unwrap();
        assert!(check_horizon(yesterday, today).is_err());
    }

    #[test]
    fn ninety_minute_slots_fit_grid() {
        let cal = calendar(WeeklyHours::uniform(9 * 60, 12 * 60));
        let slots = day_slots(&cal, tuesday(), 90);
        // 180-minute window: starts 09:00..=10:30 on the 15-minute grid.
        assert_eq!(slots.len(), 7);
        assert_eq!(slots.last().unwrap().span.end, at(tuesday(), 12, 0));
    }
}
