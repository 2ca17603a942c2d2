use crate::model::{DAY_MS, Ms};

/// Widest availability / listing window a single query may ask for.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * DAY_MS;

/// Valid instants: 2000-01-01 .. 2100-01-01.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const MIN_LESSON_MINUTES: u32 = 15;
pub const MAX_LESSON_MINUTES: u32 = 240;

pub const MAX_REPEAT_INTERVAL_WEEKS: u32 = 4;
pub const MAX_GENERATION_WEEKS: u32 = 52;

pub const MAX_TEXT_LEN: usize = 500;
pub const MAX_TEMPLATE_ENTRIES: usize = 32;
pub const MAX_SLOTS_PER_TEACHER: usize = 512;

/// Documents touched per bulk commit. Matches the store's `in`-query batch limit.
pub const BULK_CHUNK_SIZE: usize = 30;

/// Credit adjustments in one admin call.
pub const MAX_CREDIT_DELTA: i64 = 100;

/// Lesson length for weekly entries carved out of a longer slot.
pub const DEFAULT_LESSON_MINUTES: u32 = 60;
