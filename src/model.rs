use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only instant type. All times are UTC.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// UTC calendar day an instant falls on. None outside the representable range.
pub fn date_of(ms: Ms) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp_millis(ms).map(|dt| dt.date_naive())
}

/// Midnight UTC of a calendar day, in ms.
pub fn day_start_ms(date: NaiveDate) -> Ms {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

// ── Actors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Teacher => write!(f, "teacher"),
            Role::Student => write!(f, "student"),
        }
    }
}

/// Authenticated session identity, supplied by the auth collaborator.
/// The engine trusts it and checks only the transition table's actor rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Ulid,
    pub role: Role,
}

impl Actor {
    pub fn teacher(id: Ulid) -> Self {
        Self { id, role: Role::Teacher }
    }

    pub fn student(id: Ulid) -> Self {
        Self { id, role: Role::Student }
    }
}

// ── Lesson ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonType {
    Individual,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    Requested,
    Scheduled,
    PendingStudentApproval,
    Completed,
    Cancelled,
    Rejected,
    NoShow,
}

/// Whose move it is, derived from status. The negotiation protocol adds no
/// state of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Turn {
    Teacher,
    Student,
    Nobody,
}

impl LessonStatus {
    /// Terminal lessons are immutable and never block the calendar.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LessonStatus::Completed
                | LessonStatus::Cancelled
                | LessonStatus::Rejected
                | LessonStatus::NoShow
        )
    }

    /// Non-terminal lessons occupy their span on the teacher's calendar.
    pub fn blocks(&self) -> bool {
        !self.is_terminal()
    }

    /// The span is a committed reservation, not just an open request.
    /// Only committed times can veto an approval — a rival `Requested`
    /// lesson loses the race at its own approval instead.
    pub fn commits_time(&self) -> bool {
        matches!(self, LessonStatus::Scheduled | LessonStatus::PendingStudentApproval)
    }

    pub fn pending_for(&self) -> Turn {
        match self {
            LessonStatus::Requested => Turn::Teacher,
            LessonStatus::PendingStudentApproval => Turn::Student,
            _ => Turn::Nobody,
        }
    }
}

impl std::fmt::Display for LessonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LessonStatus::Requested => "requested",
            LessonStatus::Scheduled => "scheduled",
            LessonStatus::PendingStudentApproval => "pending_student_approval",
            LessonStatus::Completed => "completed",
            LessonStatus::Cancelled => "cancelled",
            LessonStatus::Rejected => "rejected",
            LessonStatus::NoShow => "no_show",
        };
        write!(f, "{s}")
    }
}

/// The central entity. Mutated only through the engine's transition moves;
/// `proposed` is Some exactly while status is PendingStudentApproval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: Ulid,
    pub teacher_id: Ulid,
    pub student_id: Ulid,
    pub span: Span,
    pub status: LessonStatus,
    pub lesson_type: LessonType,
    pub instrument: String,
    pub student_message: Option<String>,
    pub teacher_note: Option<String>,
    pub proposed: Option<Span>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// One candidate interval within working hours. Unavailable slots are kept
/// (not hidden) so callers can render them disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub span: Span,
    pub available: bool,
}

// ── Working hours ────────────────────────────────────────────────

/// Open/close as minutes from midnight, e.g. 540..1020 for 09:00–17:00.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub open_min: u16,
    pub close_min: u16,
}

/// Weekly schedule, indexed Monday..Sunday. None = day off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyHours {
    pub days: [Option<DayHours>; 7],
}

impl WeeklyHours {
    /// Mon–Fri with the given hours, weekend off.
    pub fn weekdays(open_min: u16, close_min: u16) -> Self {
        let d = Some(DayHours { open_min, close_min });
        Self { days: [d, d, d, d, d, None, None] }
    }

    /// Same hours all seven days.
    pub fn uniform(open_min: u16, close_min: u16) -> Self {
        let d = Some(DayHours { open_min, close_min });
        Self { days: [d; 7] }
    }

    pub fn is_valid(&self) -> bool {
        self.days
            .iter()
            .flatten()
            .all(|d| d.open_min < d.close_min && d.close_min <= 24 * 60)
    }

    /// The bookable window on a calendar day, or None for a day off.
    pub fn window_for(&self, date: NaiveDate) -> Option<Span> {
        let d = self.days[date.weekday().num_days_from_monday() as usize]?;
        let base = day_start_ms(date);
        Some(Span::new(
            base + d.open_min as Ms * MINUTE_MS,
            base + d.close_min as Ms * MINUTE_MS,
        ))
    }
}

impl Default for WeeklyHours {
    fn default() -> Self {
        Self::weekdays(9 * 60, 17 * 60)
    }
}

// ── Calendar state ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CalendarState {
    pub teacher_id: Ulid,
    pub name: Option<String>,
    pub hours: WeeklyHours,
    /// All lessons ever negotiated with this teacher, sorted by `span.start`.
    /// Terminal lessons are retained as history.
    pub lessons: Vec<Lesson>,
}

impl CalendarState {
    pub fn new(teacher_id: Ulid, name: Option<String>, hours: WeeklyHours) -> Self {
        Self { teacher_id, name, hours, lessons: Vec::new() }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert_lesson(&mut self, lesson: Lesson) {
        let pos = self
            .lessons
            .binary_search_by_key(&lesson.span.start, |l| l.span.start)
            .unwrap_or_else(|e| e);
        self.lessons.insert(pos, lesson);
    }

    /// Remove and return a lesson; used to re-sort after an accepted reschedule.
    pub fn take_lesson(&mut self, id: Ulid) -> Option<Lesson> {
        let pos = self.lessons.iter().position(|l| l.id == id)?;
        Some(self.lessons.remove(pos))
    }

    pub fn lesson(&self, id: Ulid) -> Option<&Lesson> {
        self.lessons.iter().find(|l| l.id == id)
    }

    pub fn lesson_mut(&mut self, id: Ulid) -> Option<&mut Lesson> {
        self.lessons.iter_mut().find(|l| l.id == id)
    }

    /// Lessons whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Lesson> {
        let right_bound = self.lessons.partition_point(|l| l.span.start < query.end);
        self.lessons[..right_bound]
            .iter()
            .filter(move |l| l.span.end > query.start)
    }
}

/// Teacher directory entry for the booking builder's first step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeacherInfo {
    pub id: Ulid,
    pub name: Option<String>,
}

// ── Events ───────────────────────────────────────────────────────

/// The WAL record format — one entry per accepted transition, flat.
/// `LessonSnapshot` appears only in compacted logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    TeacherRegistered {
        id: Ulid,
        name: Option<String>,
        hours: WeeklyHours,
    },
    LessonRequested {
        id: Ulid,
        teacher_id: Ulid,
        student_id: Ulid,
        span: Span,
        lesson_type: LessonType,
        instrument: String,
        message: Option<String>,
        at: Ms,
    },
    LessonApproved {
        id: Ulid,
        teacher_id: Ulid,
        at: Ms,
    },
    LessonRejected {
        id: Ulid,
        teacher_id: Ulid,
        note: Option<String>,
        at: Ms,
    },
    AlternativeProposed {
        id: Ulid,
        teacher_id: Ulid,
        proposed: Span,
        note: Option<String>,
        at: Ms,
    },
    RescheduleAccepted {
        id: Ulid,
        teacher_id: Ulid,
        at: Ms,
    },
    /// The decline reason travels in the event and its notification only;
    /// the lesson record keeps no student-side note field.
    RescheduleDeclined {
        id: Ulid,
        teacher_id: Ulid,
        note: Option<String>,
        at: Ms,
    },
    LessonCompleted {
        id: Ulid,
        teacher_id: Ulid,
        at: Ms,
    },
    LessonCancelled {
        id: Ulid,
        teacher_id: Ulid,
        by: Role,
        at: Ms,
    },
    LessonNoShow {
        id: Ulid,
        teacher_id: Ulid,
        at: Ms,
    },
    LessonSnapshot {
        lesson: Lesson,
    },
}

impl Event {
    /// Short label for logs and notification payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::TeacherRegistered { .. } => "teacher_registered",
            Event::LessonRequested { .. } => "lesson_requested",
            Event::LessonApproved { .. } => "lesson_approved",
            Event::LessonRejected { .. } => "lesson_rejected",
            Event::AlternativeProposed { .. } => "alternative_proposed",
            Event::RescheduleAccepted { .. } => "reschedule_accepted",
            Event::RescheduleDeclined { .. } => "reschedule_declined",
            Event::LessonCompleted { .. } => "lesson_completed",
            Event::LessonCancelled { .. } => "lesson_cancelled",
            Event::LessonNoShow { .. } => "lesson_no_show",
            Event::LessonSnapshot { .. } => "lesson_snapshot",
        }
    }
}
