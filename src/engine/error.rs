use ulid::Ulid;

use crate::model::{LessonStatus, Role};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The requested move is not legal from the lesson's current status.
    InvalidState { id: Ulid, status: LessonStatus },
    /// The acting role/identity does not match the transition table.
    UnauthorizedTransition { id: Ulid, role: Role },
    InvalidSchedule(&'static str),
    /// Commit-time overlap with another non-terminal lesson.
    SlotConflict(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidState { id, status } => write!(
                f,
                "lesson {id} is {status}: this action is no longer available"
            ),
            EngineError::UnauthorizedTransition { id, role } => {
                write!(f, "lesson {id}: a {role} may not make this move")
            }
            EngineError::InvalidSchedule(msg) => write!(f, "invalid schedule: {msg}"),
            EngineError::SlotConflict(id) => write!(
                f,
                "conflict with lesson {id}: this time was just taken, please choose another slot"
            ),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
