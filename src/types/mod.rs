//! Core data types for the timer board.
//!
//! This module defines the data structures used for:
//! - Timer mode configuration (durations, sounds, notify and button rows)
//! - Per-card policies (return mode, numeric entry, auto-reset override)
//! - Board-wide settings
//! - Small display helpers shared by the engine and the CLI
//!
//! Every type here deserializes leniently from the board's persisted camelCase
//! shapes; see [`sanitize`] for the coercion rules.

pub mod sanitize;

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::sound::{BuiltinTone, SoundId};
use sanitize::{
    clamp_rounded, default_row_color, lenient_bool, lenient_color, lenient_or_default,
    lenient_string, lenient_u32, RawCardConfig, RawTimerMode, AUTO_RESET_RANGE,
};

/// Number of modes (A/B/C) every timer card has.
pub const MODE_COUNT: usize = 3;
/// Maximum notify rows per mode.
pub const MAX_NOTIFY_ROWS: usize = 3;
/// Maximum toggle button rows per mode.
pub const MAX_BUTTON_ROWS: usize = 4;
/// Default auto-reset delay in seconds.
pub const DEFAULT_AUTO_RESET_SECONDS: u32 = 15;

// ============================================================================
// SlotId
// ============================================================================

/// Identifier of one timer slot on the board.
///
/// Slots are numbered by the board, but the id is only ever used as a key
/// suffix, so it is kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SlotId(String);

impl SlotId {
    /// Creates a slot id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    /// Returns true for the board's first slot, the one that inherits the
    /// pre-slot configuration key.
    #[must_use]
    pub fn is_first(&self) -> bool {
        self.0 == "0"
    }

    /// Returns the id as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SlotId {
    fn default() -> Self {
        Self("0".to_string())
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SlotId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<usize> for SlotId {
    fn from(index: usize) -> Self {
        Self(index.to_string())
    }
}

impl<'de> Deserialize<'de> for SlotId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::new(lenient_string(deserializer)?))
    }
}

// ============================================================================
// ColorTag
// ============================================================================

/// Background color a notify row switches the running card to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorTag {
    Yellow,
    Orange,
    Green,
    Blue,
    Pink,
}

impl ColorTag {
    /// All tags in picker order.
    pub const ALL: [ColorTag; 5] = [
        ColorTag::Yellow,
        ColorTag::Orange,
        ColorTag::Green,
        ColorTag::Blue,
        ColorTag::Pink,
    ];

    /// Parses a stored tag name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "yellow" => Some(Self::Yellow),
            "orange" => Some(Self::Orange),
            "green" => Some(Self::Green),
            "blue" => Some(Self::Blue),
            "pink" => Some(Self::Pink),
            _ => None,
        }
    }

    /// Returns the stored tag name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Yellow => "yellow",
            Self::Orange => "orange",
            Self::Green => "green",
            Self::Blue => "blue",
            Self::Pink => "pink",
        }
    }

    /// Returns the card background swatch.
    #[must_use]
    pub const fn hex(self) -> &'static str {
        match self {
            Self::Yellow => "#fff3b0",
            Self::Orange => "#ffd8a8",
            Self::Green => "#d3f9d8",
            Self::Blue => "#cfe8ff",
            Self::Pink => "#ffd9e8",
        }
    }

    /// Japanese label used in pickers.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Yellow => "黄",
            Self::Orange => "橙",
            Self::Green => "緑",
            Self::Blue => "青",
            Self::Pink => "桃",
        }
    }
}

// ============================================================================
// Rows
// ============================================================================

/// One sound cue at a fixed seconds-remaining threshold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cue {
    /// Minutes part of the threshold (0-599)
    #[serde(deserialize_with = "lenient_u32")]
    pub min: u32,
    /// Seconds part of the threshold (0-59)
    #[serde(deserialize_with = "lenient_u32")]
    pub sec: u32,
    /// Sound played when the threshold is crossed
    pub sound: SoundId,
}

impl Cue {
    /// Creates a cue at `min:sec` remaining.
    pub fn new(min: u32, sec: u32, sound: impl Into<SoundId>) -> Self {
        Self {
            min,
            sec,
            sound: sound.into(),
        }
    }

    /// Returns the threshold in seconds remaining.
    #[must_use]
    pub fn threshold_seconds(&self) -> u32 {
        self.min * 60 + self.sec
    }
}

/// Which of a row's two cues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CueSlot {
    First,
    Second,
}

impl CueSlot {
    /// Both slots in firing order.
    pub const BOTH: [CueSlot; 2] = [CueSlot::First, CueSlot::Second];
}

/// A mid-countdown notification: up to two cues plus a background color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyRow {
    #[serde(rename = "notify1", default, deserialize_with = "lenient_or_default")]
    pub first: Cue,
    #[serde(rename = "notify2", default, deserialize_with = "lenient_or_default")]
    pub second: Cue,
    /// Background applied when any cue of this row fires (`None` keeps it)
    #[serde(default = "default_row_color", deserialize_with = "lenient_color")]
    pub color: Option<ColorTag>,
}

impl NotifyRow {
    /// Returns the cue in `slot`.
    #[must_use]
    pub fn cue(&self, slot: CueSlot) -> &Cue {
        match slot {
            CueSlot::First => &self.first,
            CueSlot::Second => &self.second,
        }
    }
}

impl Default for NotifyRow {
    fn default() -> Self {
        Self {
            first: Cue::default(),
            second: Cue::default(),
            color: default_row_color(),
        }
    }
}

/// A user-togglable notification channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonRow {
    #[serde(rename = "n1", default, deserialize_with = "lenient_or_default")]
    pub first: Cue,
    #[serde(rename = "n2", default, deserialize_with = "lenient_or_default")]
    pub second: Cue,
    /// Button caption (at most four characters)
    #[serde(default, deserialize_with = "lenient_string")]
    pub label: String,
}

impl ButtonRow {
    /// Returns the cue in `slot`.
    #[must_use]
    pub fn cue(&self, slot: CueSlot) -> &Cue {
        match slot {
            CueSlot::First => &self.first,
            CueSlot::Second => &self.second,
        }
    }
}

// ============================================================================
// InsertVoice
// ============================================================================

/// What, if anything, interrupts the end loop.
///
/// `None` and `Silent` both keep the loop audible; they differ in that an
/// explicit silent insert still plays the intro cue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InsertVoice {
    /// No insert configured.
    #[default]
    None,
    /// Insert explicitly set to silence.
    Silent,
    /// Voice clip played in the mute window.
    Voice(SoundId),
}

impl Serialize for InsertVoice {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::None => serializer.serialize_str(""),
            Self::Silent => serializer.serialize_str("none"),
            Self::Voice(id) => id.serialize(serializer),
        }
    }
}

// ============================================================================
// TimerMode
// ============================================================================

/// One of a card's three modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawTimerMode")]
pub struct TimerMode {
    /// Timer name shown on the card
    #[serde(rename = "timerName")]
    pub name: String,
    /// Mode button caption (empty hides the button)
    pub button_label: String,
    /// Minutes part of the duration (0-599)
    #[serde(rename = "timeMin")]
    pub minutes: u32,
    /// Seconds part of the duration (0-59)
    #[serde(rename = "timeSec")]
    pub seconds: u32,
    pub start_sound: SoundId,
    pub end_sound: SoundId,
    /// Seconds the end loop plays before the watchdog stops it (5-60)
    #[serde(rename = "endLoopSec")]
    pub end_loop_seconds: u32,
    #[serde(rename = "endInsertVoiceSound")]
    pub end_insert: InsertVoice,
    /// Length of the insert window in seconds (0.5-5, 0.5 steps)
    #[serde(rename = "endInsertMuteSec")]
    pub end_insert_mute_seconds: f64,
    #[serde(rename = "nbRows")]
    pub notify_rows: Vec<NotifyRow>,
    /// Toggle rows; `None` when the mode never had any
    #[serde(rename = "btnRows")]
    pub button_rows: Option<Vec<ButtonRow>>,
    pub hidden: bool,
}

impl TimerMode {
    /// The fresh mode at `index` of a new card.
    #[must_use]
    pub fn default_for(index: usize) -> Self {
        Self {
            name: default_timer_name(index),
            button_label: String::new(),
            minutes: 0,
            seconds: 0,
            start_sound: SoundId::builtin(BuiltinTone::Beep),
            end_sound: SoundId::builtin(BuiltinTone::LoopAlarm),
            end_loop_seconds: sanitize::DEFAULT_END_LOOP_SECONDS,
            end_insert: InsertVoice::None,
            end_insert_mute_seconds: sanitize::DEFAULT_MUTE_WINDOW,
            notify_rows: Vec::new(),
            button_rows: None,
            hidden: false,
        }
    }

    /// Returns the configured duration in seconds.
    #[must_use]
    pub fn duration_seconds(&self) -> u32 {
        self.minutes * 60 + self.seconds
    }

    /// Sets the duration, clamping to 599:59.
    #[must_use]
    pub fn with_duration(mut self, minutes: u32, seconds: u32) -> Self {
        self.minutes = minutes.min(sanitize::MAX_MINUTES);
        self.seconds = seconds.min(sanitize::MAX_SECONDS);
        self
    }

    /// Sets the end sound.
    #[must_use]
    pub fn with_end_sound(mut self, sound: impl Into<SoundId>) -> Self {
        self.end_sound = sound.into();
        self
    }

    /// Sets the start sound.
    #[must_use]
    pub fn with_start_sound(mut self, sound: impl Into<SoundId>) -> Self {
        self.start_sound = sound.into();
        self
    }

    /// Sets the end loop length, clamping to 5-60 seconds.
    #[must_use]
    pub fn with_end_loop_seconds(mut self, seconds: u32) -> Self {
        self.end_loop_seconds = sanitize::sanitize_end_loop(Some(f64::from(seconds)), None);
        self
    }

    /// Sets the end insert and its window.
    #[must_use]
    pub fn with_insert(mut self, insert: InsertVoice, window_seconds: f64) -> Self {
        self.end_insert = insert;
        self.end_insert_mute_seconds = sanitize::sanitize_mute_window(Some(window_seconds));
        self
    }

    /// Appends a notify row (ignored beyond the per-mode maximum).
    #[must_use]
    pub fn with_notify_row(mut self, row: NotifyRow) -> Self {
        if self.notify_rows.len() < MAX_NOTIFY_ROWS {
            self.notify_rows.push(row);
        }
        self
    }

    /// Appends a button row (ignored beyond the per-mode maximum).
    #[must_use]
    pub fn with_button_row(mut self, row: ButtonRow) -> Self {
        let rows = self.button_rows.get_or_insert_with(Vec::new);
        if rows.len() < MAX_BUTTON_ROWS {
            rows.push(row);
        }
        self
    }

    /// Returns the button rows, empty when none are configured.
    #[must_use]
    pub fn button_rows(&self) -> &[ButtonRow] {
        self.button_rows.as_deref().unwrap_or_default()
    }

    /// Returns the name shown on the card at board position `index`.
    #[must_use]
    pub fn display_name(&self, index: usize) -> String {
        if is_default_like_name(&self.name) {
            default_timer_name(index)
        } else {
            self.name.clone()
        }
    }
}

impl Default for TimerMode {
    fn default() -> Self {
        Self::default_for(0)
    }
}

// ============================================================================
// Card policies
// ============================================================================

/// Which mode a card returns to when reset out of `Finished`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnMode {
    /// The mode that was active before the run started.
    #[default]
    Last,
    /// Always the given mode.
    Fixed(usize),
}

impl fmt::Display for ReturnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Last => f.write_str("last"),
            Self::Fixed(i) => f.write_str(mode_letter(*i)),
        }
    }
}

impl Serialize for ReturnMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReturnMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_value(&Value::deserialize(deserializer)?))
    }
}

/// Direct numeric time entry ("ten-key") policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NumericEntryConfig {
    #[serde(deserialize_with = "lenient_bool")]
    pub enabled: bool,
    /// Retain the last non-zero entry across runs
    #[serde(deserialize_with = "lenient_bool")]
    pub keep_last: bool,
}

impl Default for NumericEntryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            keep_last: true,
        }
    }
}

/// Everything persisted for one timer card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawCardConfig")]
pub struct TimerCardConfig {
    pub modes: [TimerMode; MODE_COUNT],
    pub return_mode: ReturnMode,
    pub card_hidden: bool,
    #[serde(rename = "tenKey")]
    pub numeric_entry: NumericEntryConfig,
    /// Per-card auto-reset delay overriding the board setting
    #[serde(rename = "resetSec", skip_serializing_if = "Option::is_none")]
    pub reset_seconds: Option<u32>,
}

impl Default for TimerCardConfig {
    fn default() -> Self {
        Self {
            modes: std::array::from_fn(TimerMode::default_for),
            return_mode: ReturnMode::Last,
            card_hidden: false,
            numeric_entry: NumericEntryConfig::default(),
            reset_seconds: None,
        }
    }
}

impl TimerCardConfig {
    /// Returns the mode at `index`, if it exists.
    #[must_use]
    pub fn mode(&self, index: usize) -> Option<&TimerMode> {
        self.modes.get(index)
    }

    /// Sets the mode at `index` (ignored when out of range).
    #[must_use]
    pub fn with_mode(mut self, index: usize, mode: TimerMode) -> Self {
        if let Some(slot) = self.modes.get_mut(index) {
            *slot = mode;
        }
        self
    }

    /// Sets the return-mode policy.
    #[must_use]
    pub fn with_return_mode(mut self, return_mode: ReturnMode) -> Self {
        self.return_mode = return_mode;
        self
    }

    /// Sets the numeric entry policy.
    #[must_use]
    pub fn with_numeric_entry(mut self, numeric_entry: NumericEntryConfig) -> Self {
        self.numeric_entry = numeric_entry;
        self
    }

    /// Returns the indices of modes that get a visible mode button.
    ///
    /// Buttons are only shown when at least two modes qualify, so a single
    /// labelled mode yields an empty list.
    #[must_use]
    pub fn visible_modes(&self) -> Vec<usize> {
        let visible: Vec<usize> = self
            .modes
            .iter()
            .enumerate()
            .filter(|(_, m)| !m.hidden && !m.button_label.trim().is_empty())
            .map(|(i, _)| i)
            .collect();
        if visible.len() >= 2 {
            visible
        } else {
            Vec::new()
        }
    }

    /// Resolves the auto-reset delay against the board default.
    #[must_use]
    pub fn auto_reset_seconds(&self, board: &BoardSettings) -> u32 {
        self.reset_seconds.unwrap_or(board.auto_reset_seconds)
    }

    /// Validates the configuration.
    ///
    /// Returns an error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if let ReturnMode::Fixed(i) = self.return_mode {
            if i >= MODE_COUNT {
                return Err("戻りモードはA/B/Cのいずれかを指定してください".to_string());
            }
        }
        for (i, mode) in self.modes.iter().enumerate() {
            if mode.notify_rows.len() > MAX_NOTIFY_ROWS {
                return Err(format!(
                    "モード{}の通知行は{}行までです",
                    mode_letter(i),
                    MAX_NOTIFY_ROWS
                ));
            }
            if mode.button_rows().len() > MAX_BUTTON_ROWS {
                return Err(format!(
                    "モード{}の通知ボタンは{}行までです",
                    mode_letter(i),
                    MAX_BUTTON_ROWS
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// BoardSettings
// ============================================================================

/// Settings shared by every card on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BoardSettings {
    /// Delay before a finished card resets itself (5-60 seconds)
    #[serde(rename = "autoResetSec", deserialize_with = "lenient_reset_seconds")]
    pub auto_reset_seconds: u32,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            auto_reset_seconds: DEFAULT_AUTO_RESET_SECONDS,
        }
    }
}

impl BoardSettings {
    /// Sets the auto-reset delay, clamping to 5-60 seconds.
    #[must_use]
    pub fn with_auto_reset_seconds(mut self, seconds: u32) -> Self {
        self.auto_reset_seconds = clamp_rounded(f64::from(seconds), AUTO_RESET_RANGE);
        self
    }
}

fn lenient_reset_seconds<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(sanitize::number_of(&value)
        .map_or(DEFAULT_AUTO_RESET_SECONDS, |n| clamp_rounded(n, AUTO_RESET_RANGE)))
}

// ============================================================================
// Display helpers
// ============================================================================

/// Card background, derived from the engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardBackground {
    Idle,
    Running,
    Notify(ColorTag),
    Finished,
}

impl CardBackground {
    /// Returns the background color.
    #[must_use]
    pub const fn hex(self) -> &'static str {
        match self {
            Self::Idle => "#f1f3f4",
            Self::Running => "#e0f2ff",
            Self::Notify(tag) => tag.hex(),
            Self::Finished => "#ffd6d6",
        }
    }
}

/// Returns the letter of mode `index` (`A`, `B`, `C`).
#[must_use]
pub fn mode_letter(index: usize) -> &'static str {
    match index {
        0 => "A",
        1 => "B",
        2 => "C",
        _ => "?",
    }
}

/// Returns the generated name of the card at board position `index`.
#[must_use]
pub fn default_timer_name(index: usize) -> String {
    format!("タイマー{}", index + 1)
}

/// Returns true for names that older boards filled in as placeholders.
#[must_use]
pub fn is_default_like_name(name: &str) -> bool {
    let t = name.trim();
    t.is_empty() || t == "通知" || t.eq_ignore_ascii_case("n1") || t.eq_ignore_ascii_case("n2")
}

/// Formats seconds as `mm:ss` (minutes may exceed two digits).
#[must_use]
pub fn format_mmss(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ------------------------------------------------------------------------
    // TimerMode Tests
    // ------------------------------------------------------------------------

    mod timer_mode_tests {
        use super::*;

        #[test]
        fn test_default_for() {
            let mode = TimerMode::default_for(1);
            assert_eq!(mode.name, "タイマー2");
            assert_eq!(mode.start_sound, SoundId::builtin(BuiltinTone::Beep));
            assert_eq!(mode.end_sound, SoundId::builtin(BuiltinTone::LoopAlarm));
            assert_eq!(mode.end_loop_seconds, sanitize::DEFAULT_END_LOOP_SECONDS);
            assert_eq!(mode.duration_seconds(), 0);
            assert!(mode.button_rows().is_empty());
        }

        #[test]
        fn test_builders_clamp() {
            let mode = TimerMode::default()
                .with_duration(700, 80)
                .with_end_loop_seconds(2)
                .with_insert(InsertVoice::Silent, 7.3);
            assert_eq!(mode.duration_seconds(), 599 * 60 + 59);
            assert_eq!(mode.end_loop_seconds, 5);
            assert_eq!(mode.end_insert_mute_seconds, 5.0);
        }

        #[test]
        fn test_row_limits() {
            let mut mode = TimerMode::default();
            for _ in 0..5 {
                mode = mode
                    .with_notify_row(NotifyRow::default())
                    .with_button_row(ButtonRow::default());
            }
            assert_eq!(mode.notify_rows.len(), MAX_NOTIFY_ROWS);
            assert_eq!(mode.button_rows().len(), MAX_BUTTON_ROWS);
        }

        #[test]
        fn test_serialized_field_names() {
            let mode = TimerMode::default()
                .with_duration(1, 30)
                .with_insert(InsertVoice::Silent, 2.0);
            let value = serde_json::to_value(&mode).unwrap();
            assert_eq!(value["timerName"], "タイマー1");
            assert_eq!(value["timeMin"], 1);
            assert_eq!(value["timeSec"], 30);
            assert_eq!(value["startSound"], "builtin-beep");
            assert_eq!(value["endSound"], "alarm8");
            assert_eq!(value["endLoopSec"], 10);
            assert_eq!(value["endInsertVoiceSound"], "none");
            assert_eq!(value["nbRows"], json!([]));
            assert_eq!(value["btnRows"], Value::Null);
        }

        #[test]
        fn test_display_name() {
            let mut mode = TimerMode::default();
            mode.name = "通知".to_string();
            assert_eq!(mode.display_name(4), "タイマー5");
            mode.name = "N2".to_string();
            assert_eq!(mode.display_name(0), "タイマー1");
            mode.name = "ラーメン".to_string();
            assert_eq!(mode.display_name(0), "ラーメン");
        }
    }

    // ------------------------------------------------------------------------
    // TimerCardConfig Tests
    // ------------------------------------------------------------------------

    mod card_config_tests {
        use super::*;

        fn sample() -> TimerCardConfig {
            let mode = TimerMode::default()
                .with_duration(3, 0)
                .with_insert(InsertVoice::Voice(SoundId::new("voice-1")), 1.5)
                .with_notify_row(NotifyRow {
                    first: Cue::new(1, 0, "beep"),
                    second: Cue::new(0, 30, "beep3"),
                    color: Some(ColorTag::Orange),
                })
                .with_button_row(ButtonRow {
                    first: Cue::new(0, 10, "t:before:10"),
                    second: Cue::default(),
                    label: "10秒".to_string(),
                });
            TimerCardConfig::default()
                .with_mode(1, mode)
                .with_return_mode(ReturnMode::Fixed(2))
                .with_numeric_entry(NumericEntryConfig {
                    enabled: true,
                    keep_last: false,
                })
        }

        #[test]
        fn test_round_trip_is_stable() {
            let config = sample();
            let json = serde_json::to_string(&config).unwrap();
            let back: TimerCardConfig = serde_json::from_str(&json).unwrap();
            assert_eq!(back, config);
        }

        #[test]
        fn test_serialized_policies() {
            let value = serde_json::to_value(sample()).unwrap();
            assert_eq!(value["returnMode"], "C");
            assert_eq!(value["tenKey"], json!({"enabled": true, "keepLast": false}));
            assert_eq!(value["cardHidden"], false);
            assert!(value.get("resetSec").is_none());
            assert_eq!(value["modes"].as_array().unwrap().len(), MODE_COUNT);
        }

        #[test]
        fn test_visible_modes() {
            let mut config = TimerCardConfig::default();
            assert!(config.visible_modes().is_empty());

            config.modes[0].button_label = "A".to_string();
            assert!(config.visible_modes().is_empty());

            config.modes[2].button_label = "C".to_string();
            assert_eq!(config.visible_modes(), vec![0, 2]);

            config.modes[2].hidden = true;
            assert!(config.visible_modes().is_empty());
        }

        #[test]
        fn test_auto_reset_override() {
            let board = BoardSettings::default().with_auto_reset_seconds(30);
            let mut config = TimerCardConfig::default();
            assert_eq!(config.auto_reset_seconds(&board), 30);
            config.reset_seconds = Some(7);
            assert_eq!(config.auto_reset_seconds(&board), 7);
        }

        #[test]
        fn test_validate() {
            assert!(TimerCardConfig::default().validate().is_ok());
            let config = TimerCardConfig::default().with_return_mode(ReturnMode::Fixed(3));
            assert!(config.validate().is_err());
        }
    }

    // ------------------------------------------------------------------------
    // Board and display Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_board_settings_clamp() {
        assert_eq!(BoardSettings::default().auto_reset_seconds, 15);
        assert_eq!(
            BoardSettings::default().with_auto_reset_seconds(1).auto_reset_seconds,
            5
        );
        let parsed: BoardSettings = serde_json::from_value(json!({"autoResetSec": "90"})).unwrap();
        assert_eq!(parsed.auto_reset_seconds, 60);
        let parsed: BoardSettings = serde_json::from_value(json!({})).unwrap();
        assert_eq!(parsed.auto_reset_seconds, 15);
    }

    #[test]
    fn test_slot_id() {
        assert!(SlotId::from("0").is_first());
        assert!(!SlotId::from(1usize).is_first());
        let id: SlotId = serde_json::from_value(json!(3)).unwrap();
        assert_eq!(id.as_str(), "3");
        assert_eq!(serde_json::to_value(&id).unwrap(), json!("3"));
    }

    #[test]
    fn test_color_tags() {
        assert_eq!(ColorTag::from_name("Pink"), Some(ColorTag::Pink));
        assert_eq!(ColorTag::from_name(""), None);
        assert_eq!(ColorTag::Blue.hex(), "#cfe8ff");
        assert_eq!(CardBackground::Notify(ColorTag::Green).hex(), "#d3f9d8");
        assert_eq!(CardBackground::Finished.hex(), "#ffd6d6");
    }

    #[test]
    fn test_format_mmss() {
        assert_eq!(format_mmss(0), "00:00");
        assert_eq!(format_mmss(570), "09:30");
        assert_eq!(format_mmss(599 * 60 + 59), "599:59");
    }

    #[test]
    fn test_return_mode_display() {
        assert_eq!(ReturnMode::Last.to_string(), "last");
        assert_eq!(ReturnMode::Fixed(1).to_string(), "B");
    }
}
