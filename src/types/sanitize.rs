//! Lenient loading of persisted configuration.
//!
//! Stored blobs come from several generations of the board and are full of
//! numbers written as strings, sound references written as objects, missing
//! fields and out-of-range values. Nothing here ever rejects a blob: each
//! field is coerced on its own and anything unusable falls back to the
//! default for that field.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use super::{
    ButtonRow, ColorTag, Cue, InsertVoice, NumericEntryConfig, ReturnMode, TimerCardConfig,
    TimerMode, MAX_BUTTON_ROWS, MAX_NOTIFY_ROWS, MODE_COUNT,
};
use crate::sound::SoundId;

/// Upper bound of the minutes field of any time offset.
pub const MAX_MINUTES: u32 = 599;
/// Upper bound of the seconds field of any time offset.
pub const MAX_SECONDS: u32 = 59;
/// Longest visible button row label, in characters.
pub const BUTTON_LABEL_CHARS: usize = 4;

/// Bounds of the end loop length in seconds.
pub const END_LOOP_RANGE: (u32, u32) = (5, 60);
/// End loop length used when neither the seconds nor the legacy loop count is set.
pub const DEFAULT_END_LOOP_SECONDS: u32 = 8;
/// Seconds one legacy "loop" stood for.
const SECONDS_PER_LEGACY_LOOP: u32 = 8;

/// Bounds of the insert mute window in seconds.
pub const MUTE_WINDOW_RANGE: (f64, f64) = (0.5, 5.0);
/// Mute window used when the stored value is unusable.
pub const DEFAULT_MUTE_WINDOW: f64 = 2.0;

/// Bounds of the auto-reset delay in seconds.
pub const AUTO_RESET_RANGE: (u32, u32) = (5, 60);

// ============================================================================
// Value coercion
// ============================================================================

/// Reads a finite number from a number, numeric string or bool.
pub(crate) fn number_of(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Bool(b) => f64::from(u8::from(*b)),
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Truthiness the way the stored blobs were written.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty() && s != "false" && s != "0",
        Value::Array(_) | Value::Object(_) => true,
        Value::Null => false,
    }
}

/// Truncates toward zero and clamps into `0..=max`.
pub(crate) fn clamp_whole(n: f64, max: u32) -> u32 {
    if n <= 0.0 {
        0
    } else if n >= f64::from(max) {
        max
    } else {
        n as u32
    }
}

/// Rounds and clamps into `min..=max`.
pub(crate) fn clamp_rounded(n: f64, (min, max): (u32, u32)) -> u32 {
    n.round().clamp(f64::from(min), f64::from(max)) as u32
}

/// Clamps a mute window into its range and snaps it to 0.5 s steps.
#[must_use]
pub fn sanitize_mute_window(raw: Option<f64>) -> f64 {
    let clamped = raw
        .filter(|n| n.is_finite())
        .map_or(DEFAULT_MUTE_WINDOW, |n| {
            n.clamp(MUTE_WINDOW_RANGE.0, MUTE_WINDOW_RANGE.1)
        });
    (clamped * 2.0).round() / 2.0
}

/// Derives the end loop length from the seconds field or the legacy count.
#[must_use]
pub fn sanitize_end_loop(seconds: Option<f64>, legacy_loops: Option<f64>) -> u32 {
    if let Some(s) = seconds {
        return clamp_rounded(s, END_LOOP_RANGE);
    }
    if let Some(loops) = legacy_loops {
        let loops = loops.round().clamp(1.0, 8.0) as u32;
        return (loops * SECONDS_PER_LEGACY_LOOP).clamp(END_LOOP_RANGE.0, END_LOOP_RANGE.1);
    }
    DEFAULT_END_LOOP_SECONDS
}

fn string_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

pub(crate) fn vec_of<T: DeserializeOwned>(value: Value) -> Vec<T> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!("Dropping unreadable list entry: {}", e);
                None
            }
        })
        .collect()
}

// ============================================================================
// Field deserializers
// ============================================================================

pub(crate) fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(string_of(&Value::deserialize(d)?))
}

pub(crate) fn lenient_u32<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    Ok(number_of(&Value::deserialize(d)?).map_or(0, |n| clamp_whole(n, u32::MAX)))
}

pub(crate) fn lenient_opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(number_of(&Value::deserialize(d)?))
}

pub(crate) fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(truthy(&Value::deserialize(d)?))
}

pub(crate) fn lenient_vec<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(vec_of(Value::deserialize(d)?))
}

pub(crate) fn lenient_opt_vec<'de, D, T>(d: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(d)?;
    Ok(value.is_array().then(|| vec_of(value)))
}

/// Falls back to `T::default()` for anything that does not parse.
pub(crate) fn lenient_or_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    Ok(serde_json::from_value(Value::deserialize(d)?).unwrap_or_default())
}

/// `""` and unknown names mean "no color change".
pub(crate) fn lenient_color<'de, D: Deserializer<'de>>(d: D) -> Result<Option<ColorTag>, D::Error> {
    Ok(ColorTag::from_name(&string_of(&Value::deserialize(d)?)))
}

/// Color of a notify row that has no `color` field at all.
pub(crate) fn default_row_color() -> Option<ColorTag> {
    Some(ColorTag::Yellow)
}

// ============================================================================
// Raw shapes
// ============================================================================

/// A timer mode as found in storage, before sanitization.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct RawTimerMode {
    #[serde(deserialize_with = "lenient_string")]
    timer_name: String,
    #[serde(deserialize_with = "lenient_string")]
    button_label: String,
    #[serde(deserialize_with = "lenient_opt_f64")]
    time_min: Option<f64>,
    #[serde(deserialize_with = "lenient_opt_f64")]
    time_sec: Option<f64>,
    start_sound: Option<SoundId>,
    end_sound: Option<SoundId>,
    #[serde(deserialize_with = "lenient_opt_f64")]
    end_loops: Option<f64>,
    #[serde(deserialize_with = "lenient_opt_f64")]
    end_loop_sec: Option<f64>,
    end_insert_voice_sound: Option<Value>,
    #[serde(deserialize_with = "lenient_opt_f64")]
    end_insert_mute_sec: Option<f64>,
    #[serde(deserialize_with = "lenient_vec")]
    nb_rows: Vec<super::NotifyRow>,
    #[serde(deserialize_with = "lenient_opt_vec")]
    btn_rows: Option<Vec<ButtonRow>>,
    #[serde(deserialize_with = "lenient_bool")]
    hidden: bool,
}

fn sanitize_cue(cue: Cue) -> Cue {
    Cue {
        min: cue.min.min(MAX_MINUTES),
        sec: cue.sec.min(MAX_SECONDS),
        sound: cue.sound,
    }
}

fn insert_of(value: Option<&Value>) -> InsertVoice {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return InsertVoice::None;
    };
    if matches!(value, Value::String(s) if s.trim().is_empty()) {
        return InsertVoice::None;
    }
    let id = SoundId::from_value(value);
    if id.is_silence() {
        InsertVoice::Silent
    } else {
        InsertVoice::Voice(id)
    }
}

impl From<RawTimerMode> for TimerMode {
    fn from(raw: RawTimerMode) -> Self {
        let mut notify_rows = raw.nb_rows;
        notify_rows.truncate(MAX_NOTIFY_ROWS);
        for row in &mut notify_rows {
            row.first = sanitize_cue(std::mem::take(&mut row.first));
            row.second = sanitize_cue(std::mem::take(&mut row.second));
        }

        let button_rows = raw.btn_rows.map(|mut rows| {
            rows.truncate(MAX_BUTTON_ROWS);
            for row in &mut rows {
                row.first = sanitize_cue(std::mem::take(&mut row.first));
                row.second = sanitize_cue(std::mem::take(&mut row.second));
                row.label = row.label.chars().take(BUTTON_LABEL_CHARS).collect();
            }
            rows
        });

        Self {
            name: raw.timer_name,
            button_label: raw.button_label,
            minutes: raw.time_min.map_or(0, |n| clamp_whole(n, MAX_MINUTES)),
            seconds: raw.time_sec.map_or(0, |n| clamp_whole(n, MAX_SECONDS)),
            // A stored mode without a sound field stays silent.
            start_sound: raw.start_sound.unwrap_or_else(SoundId::silence),
            end_sound: raw.end_sound.unwrap_or_else(SoundId::silence),
            end_loop_seconds: sanitize_end_loop(raw.end_loop_sec, raw.end_loops),
            end_insert: insert_of(raw.end_insert_voice_sound.as_ref()),
            end_insert_mute_seconds: sanitize_mute_window(raw.end_insert_mute_sec),
            notify_rows,
            button_rows,
            hidden: raw.hidden,
        }
    }
}

/// A card configuration as found in storage, before sanitization.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct RawCardConfig {
    #[serde(deserialize_with = "lenient_vec")]
    modes: Vec<TimerMode>,
    return_mode: Option<Value>,
    #[serde(deserialize_with = "lenient_bool")]
    card_hidden: bool,
    #[serde(deserialize_with = "lenient_or_default")]
    ten_key: NumericEntryConfig,
    #[serde(deserialize_with = "lenient_opt_f64")]
    reset_sec: Option<f64>,
}

impl From<RawCardConfig> for TimerCardConfig {
    fn from(raw: RawCardConfig) -> Self {
        let mut stored = raw.modes.into_iter();
        let modes =
            std::array::from_fn(|i| stored.next().unwrap_or_else(|| TimerMode::default_for(i)));
        Self {
            modes,
            return_mode: raw
                .return_mode
                .as_ref()
                .map_or_else(ReturnMode::default, ReturnMode::from_value),
            card_hidden: raw.card_hidden,
            numeric_entry: raw.ten_key,
            reset_seconds: raw.reset_sec.map(|n| clamp_rounded(n, AUTO_RESET_RANGE)),
        }
    }
}

impl ReturnMode {
    /// Reads `"last"`, `"A"`..`"C"` or a mode index; anything else is `Last`.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        if let Some(n) = value.as_f64() {
            return match n {
                n if n >= 0.0 && n < MODE_COUNT as f64 => Self::Fixed(n as usize),
                _ => Self::Last,
            };
        }
        let text = string_of(value);
        match text.trim() {
            "A" | "a" => Self::Fixed(0),
            "B" | "b" => Self::Fixed(1),
            "C" | "c" => Self::Fixed(2),
            _ => Self::Last,
        }
    }
}
