//! Client-side three-step booking draft: teacher → date/duration/slot →
//! details. Forward navigation is gated; abandoning the draft leaves no trace
//! anywhere — nothing exists server-side until the form is submitted.

use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::ALLOWED_DURATIONS_MIN;
use crate::model::{LessonType, Slot, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderError {
    NoTeacherSelected,
    NoScheduleSelected,
    NoSlotSelected,
    SlotUnavailable,
    UnsupportedDuration,
    MissingInstrument,
    IncompleteDetails,
}

impl std::fmt::Display for BuilderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            BuilderError::NoTeacherSelected => "choose a teacher first",
            BuilderError::NoScheduleSelected => "choose a date and duration first",
            BuilderError::NoSlotSelected => "choose an available time slot first",
            BuilderError::SlotUnavailable => "that slot is taken, pick another",
            BuilderError::UnsupportedDuration => "lessons are 30, 45, 60 or 90 minutes",
            BuilderError::MissingInstrument => "tell us which instrument",
            BuilderError::IncompleteDetails => "fill in the lesson details before submitting",
        };
        write!(f, "{msg}")
    }
}

impl std::error::Error for BuilderError {}

/// The compound request a completed builder produces, ready for the engine's
/// create entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingForm {
    pub teacher_id: Ulid,
    pub span: Span,
    pub lesson_type: LessonType,
    pub instrument: String,
    pub message: Option<String>,
}

#[derive(Debug, Default)]
pub struct BookingBuilder {
    teacher_id: Option<Ulid>,
    date: Option<NaiveDate>,
    duration_min: Option<u32>,
    slot: Option<Slot>,
    lesson_type: Option<LessonType>,
    instrument: Option<String>,
    message: Option<String>,
}

impl BookingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Step 1. Switching teachers discards the downstream schedule and slot.
    pub fn select_teacher(&mut self, teacher_id: Ulid) {
        if self.teacher_id != Some(teacher_id) {
            self.date = None;
            self.duration_min = None;
            self.slot = None;
        }
        self.teacher_id = Some(teacher_id);
    }

    /// Step 2a — gated on a teacher selection. Changing the date or duration
    /// invalidates a previously chosen slot.
    pub fn select_schedule(
        &mut self,
        date: NaiveDate,
        duration_min: u32,
    ) -> Result<(), BuilderError> {
        if self.teacher_id.is_none() {
            return Err(BuilderError::NoTeacherSelected);
        }
        if !ALLOWED_DURATIONS_MIN.contains(&duration_min) {
            return Err(BuilderError::UnsupportedDuration);
        }
        if self.date != Some(date) || self.duration_min != Some(duration_min) {
            self.slot = None;
        }
        self.date = Some(date);
        self.duration_min = Some(duration_min);
        Ok(())
    }

    /// Step 2b — the slot comes from a `slots` fetch for the selected
    /// schedule and must still be available.
    pub fn select_slot(&mut self, slot: Slot) -> Result<(), BuilderError> {
        if self.date.is_none() {
            return Err(BuilderError::NoScheduleSelected);
        }
        if !slot.available {
            return Err(BuilderError::SlotUnavailable);
        }
        self.slot = Some(slot);
        Ok(())
    }

    /// Step 3 — gated on a selected, available slot.
    pub fn details(
        &mut self,
        lesson_type: LessonType,
        instrument: String,
        message: Option<String>,
    ) -> Result<(), BuilderError> {
        if self.slot.is_none() {
            return Err(BuilderError::NoSlotSelected);
        }
        if instrument.is_empty() {
            return Err(BuilderError::MissingInstrument);
        }
        self.lesson_type = Some(lesson_type);
        self.instrument = Some(instrument);
        self.message = message;
        Ok(())
    }

    /// Submit: validates completeness and consumes the draft.
    pub fn finish(self) -> Result<BookingForm, BuilderError> {
        let teacher_id = self.teacher_id.ok_or(BuilderError::NoTeacherSelected)?;
        let slot = self.slot.ok_or(BuilderError::NoSlotSelected)?;
        let lesson_type = self.lesson_type.ok_or(BuilderError::IncompleteDetails)?;
        let instrument = self.instrument.ok_or(BuilderError::IncompleteDetails)?;
        Ok(BookingForm {
            teacher_id,
            span: slot.span,
            lesson_type,
            instrument,
            message: self.message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 11).unwrap()
    }

    fn free_slot(start: i64) -> Slot {
        Slot { span: Span::new(start, start + 45 * 60_000), available: true }
    }

    #[test]
    fn steps_are_gated() {
        let mut b = BookingBuilder::new();
        assert_eq!(
            b.select_schedule(a_date(), 45),
            Err(BuilderError::NoTeacherSelected)
        );
        assert_eq!(b.select_slot(free_slot(0)), Err(BuilderError::NoScheduleSelected));
        assert_eq!(
            b.details(LessonType::Individual, "piano".into(), None),
            Err(BuilderError::NoSlotSelected)
        );
    }

    #[test]
    fn happy_path() {
        let mut b = BookingBuilder::new();
        let teacher = Ulid::new();
        b.select_teacher(teacher);
        b.select_schedule(a_date(), 45).unwrap();
        b.select_slot(free_slot(1000)).unwrap();
        b.details(LessonType::Group, "cello".into(), Some("hi".into())).unwrap();

        let form = b.finish().unwrap();
        assert_eq!(form.teacher_id, teacher);
        assert_eq!(form.span, Span::new(1000, 1000 + 45 * 60_000));
        assert_eq!(form.lesson_type, LessonType::Group);
        assert_eq!(form.instrument, "cello");
        assert_eq!(form.message.as_deref(), Some("hi"));
    }

    #[test]
    fn unavailable_slot_rejected() {
        let mut b = BookingBuilder::new();
        b.select_teacher(Ulid::new());
        b.select_schedule(a_date(), 30).unwrap();
        let taken = Slot { span: Span::new(0, 30 * 60_000), available: false };
        assert_eq!(b.select_slot(taken), Err(BuilderError::SlotUnavailable));
    }

    #[test]
    fn unsupported_duration_rejected() {
        let mut b = BookingBuilder::new();
        b.select_teacher(Ulid::new());
        assert_eq!(b.select_schedule(a_date(), 40), Err(BuilderError::UnsupportedDuration));
    }

    #[test]
    fn switching_teacher_resets_schedule_and_slot() {
        let mut b = BookingBuilder::new();
        b.select_teacher(Ulid::new());
        b.select_schedule(a_date(), 60).unwrap();
        b.select_slot(free_slot(500)).unwrap();

        b.select_teacher(Ulid::new());
        assert_eq!(b.select_slot(free_slot(500)), Err(BuilderError::NoScheduleSelected));
    }

    #[test]
    fn changing_schedule_invalidates_slot() {
        let mut b = BookingBuilder::new();
        b.select_teacher(Ulid::new());
        b.select_schedule(a_date(), 60).unwrap();
        b.select_slot(free_slot(500)).unwrap();

        b.select_schedule(a_date(), 30).unwrap();
        assert_eq!(b.finish().unwrap_err(), BuilderError::NoSlotSelected);
    }

    #[test]
    fn reselecting_same_schedule_keeps_slot() {
        let mut b = BookingBuilder::new();
        b.select_teacher(Ulid::new());
        b.select_schedule(a_date(), 60).unwrap();
        b.select_slot(free_slot(500)).unwrap();

        b.select_schedule(a_date(), 60).unwrap();
        b.details(LessonType::Individual, "oboe".into(), None).unwrap();
        assert!(b.finish().is_ok());
    }

    #[test]
    fn finish_requires_details() {
        let mut b = BookingBuilder::new();
        b.select_teacher(Ulid::new());
        b.select_schedule(a_date(), 45).unwrap();
        b.select_slot(free_slot(0)).unwrap();
        assert_eq!(b.finish().unwrap_err(), BuilderError::IncompleteDetails);
    }

    #[test]
    fn empty_instrument_rejected() {
        let mut b = BookingBuilder::new();
        b.select_teacher(Ulid::new());
        b.select_schedule(a_date(), 45).unwrap();
        b.select_slot(free_slot(0)).unwrap();
        assert_eq!(
            b.details(LessonType::Individual, String::new(), None),
            Err(BuilderError::MissingInstrument)
        );
    }
}
