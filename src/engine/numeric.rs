//! Direct numeric time entry.
//!
//! Digits accumulate into a four-digit `mmss` buffer. The two rightmost
//! digits are seconds (capped at 59), anything left of them is minutes
//! (capped at 599).

use super::EngineError;
use crate::types::sanitize::{MAX_MINUTES, MAX_SECONDS};

/// Maximum number of digits kept in the buffer.
pub const BUFFER_DIGITS: usize = 4;

/// Interprets a digit buffer as seconds.
///
/// Non-digits are ignored and only the last four digits count, so `"930"`
/// is 9:30 and `"12345"` is 23:45.
#[must_use]
pub fn buffer_seconds(buffer: &str) -> u32 {
    let digits: Vec<u32> = buffer.chars().filter_map(|c| c.to_digit(10)).collect();
    let digits = &digits[digits.len().saturating_sub(BUFFER_DIGITS)..];
    let split = digits.len().saturating_sub(2);
    let fold = |ds: &[u32]| ds.iter().fold(0, |acc, d| acc * 10 + d);
    let minutes = fold(&digits[..split]).min(MAX_MINUTES);
    let seconds = fold(&digits[split..]).min(MAX_SECONDS);
    minutes * 60 + seconds
}

/// Digit buffer plus the retained value of the last run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NumericEntry {
    buffer: String,
    retained: u32,
}

impl NumericEntry {
    /// Creates an empty buffer remembering `retained` seconds.
    #[must_use]
    pub fn new(retained: u32) -> Self {
        Self {
            buffer: String::new(),
            retained,
        }
    }

    /// Appends a digit, dropping the oldest one beyond four.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidDigit`] for anything but `0`-`9`.
    pub fn push(&mut self, digit: char) -> Result<(), EngineError> {
        if !digit.is_ascii_digit() {
            return Err(EngineError::InvalidDigit(digit));
        }
        self.buffer.push(digit);
        if self.buffer.len() > BUFFER_DIGITS {
            self.buffer.remove(0);
        }
        Ok(())
    }

    /// Returns the buffered digits.
    #[must_use]
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Returns the buffer as seconds, or `None` when empty.
    #[must_use]
    pub fn buffered_seconds(&self) -> Option<u32> {
        (!self.buffer.is_empty()).then(|| buffer_seconds(&self.buffer))
    }

    #[must_use]
    pub fn retained(&self) -> u32 {
        self.retained
    }

    pub fn set_retained(&mut self, seconds: u32) {
        self.retained = seconds;
    }

    /// Seconds shown while idle: the buffer, else the retained value when
    /// `keep_last` is on, else zero.
    #[must_use]
    pub fn idle_seconds(&self, keep_last: bool) -> u32 {
        self.buffered_seconds()
            .unwrap_or(if keep_last { self.retained } else { 0 })
    }

    /// Empties the buffer and returns what it held.
    pub fn take(&mut self) -> Option<u32> {
        let seconds = self.buffered_seconds();
        self.buffer.clear();
        seconds
    }

    /// Empties the buffer and forgets the retained value.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.retained = 0;
    }
}
