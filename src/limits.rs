//! Hard limits and scheduling constants, enforced at mutation entry points.

use crate::model::Ms;

/// Timestamps before the epoch are never valid.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;

/// 2100-01-01T00:00:00Z. Anything later is a client bug.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// No lesson or proposal may span more than 12 hours.
pub const MAX_SPAN_DURATION_MS: Ms = 12 * 3_600_000;

/// Lesson durations offered to students, in minutes.
pub const ALLOWED_DURATIONS_MIN: [u32; 4] = [30, 45, 60, 90];

/// Candidate slots start on this boundary within working hours.
pub const SLOT_GRANULARITY_MIN: u16 = 15;

/// Bookings open the day after today and close this many days ahead.
pub const BOOKING_HORIZON_DAYS: u64 = 30;

pub const MAX_TEACHERS: usize = 10_000;

pub const MAX_LESSONS_PER_CALENDAR: usize = 10_000;

/// Teacher display names.
pub const MAX_NAME_LEN: usize = 256;

/// Student messages, teacher notes, decline reasons.
pub const MAX_TEXT_LEN: usize = 2_000;

pub const MAX_INSTRUMENT_LEN: usize = 64;

/// Widest window accepted by lesson-list range queries (~1 year).
pub const MAX_QUERY_WINDOW_MS: Ms = 370 * 24 * 3_600_000;

/// One wire line (one JSON command) may not exceed this.
pub const MAX_WIRE_LINE_LEN: usize = 64 * 1024;
