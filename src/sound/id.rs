//! Logical sound identifiers.
//!
//! A [`SoundId`] is the normalized form of whatever a timer configuration
//! names as a sound: the empty string for silence, one of three canonical
//! built-in ids, or an opaque sound library id. Normalization folds the
//! many historical spellings and labels into those forms and is idempotent.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Canonical id of the single beep.
pub const BEEP_ID: &str = "builtin-beep";
/// Canonical id of the triple beep.
pub const TRIPLE_BEEP_ID: &str = "builtin-beep3";
/// Canonical id of the looping alarm.
pub const LOOP_ALARM_ID: &str = "alarm8";

const SILENCE_ALIASES: &[&str] = &["none", "(none)", "mute", "silent"];
const BEEP_ALIASES: &[&str] = &[
    "alarm",
    "beep",
    "builtin-beep",
    "builtin:beep",
    "ピッ",
    "ぴっ",
    "ﾋﾟｯ",
];
const TRIPLE_BEEP_ALIASES: &[&str] = &[
    "beep3",
    "builtin-beep3",
    "builtin:beep3",
    "ピピピッ",
    "ぴぴぴっ",
    "ﾋﾟﾋﾟﾋﾟｯ",
];
const LOOP_ALARM_ALIASES: &[&str] = &["alarm8", "builtin-alarm8", "builtin:alarm8", "ループ", "るーぷ"];

/// Time-announcement presets: `"<relation>:<seconds>"` to the display name the
/// matching voice clip is registered under in the sound library.
pub const TIME_PRESETS: &[(&str, &str)] = &[
    ("before:10", "10 seconds ago"),
    ("before:15", "15 seconds ago"),
    ("before:20", "20 seconds ago"),
    ("before:30", "30 seconds ago"),
    ("before:40", "40 seconds ago"),
    ("before:45", "45 seconds ago"),
    ("before:50", "50 seconds ago"),
    ("before:60", "1 minute ago"),
    ("elapsed:60", "1 minute has passed"),
    ("elapsed:120", "2 minutes have passed"),
    ("elapsed:180", "3 minutes have passed"),
    ("elapsed:240", "4 minutes have passed"),
    ("elapsed:300", "5 minutes have passed"),
    ("elapsed:600", "10 minutes have passed"),
    ("elapsed:900", "15 minutes have passed"),
    ("elapsed:1200", "20 minutes have passed"),
    ("elapsed:1500", "25 minutes have passed"),
    ("elapsed:1800", "30 minutes have passed"),
    ("elapsed:2400", "40 minutes have passed"),
    ("elapsed:2700", "45 minutes have passed"),
    ("elapsed:3000", "50 minutes have passed"),
    ("elapsed:3600", "1 hour has passed"),
];

// ============================================================================
// BuiltinTone
// ============================================================================

/// The three tones synthesized by the player itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTone {
    /// Short single beep.
    Beep,
    /// Three short beeps.
    TripleBeep,
    /// Triple-beep pattern repeated for as long as it plays.
    LoopAlarm,
}

impl BuiltinTone {
    /// Returns the canonical sound id of this tone.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::Beep => BEEP_ID,
            Self::TripleBeep => TRIPLE_BEEP_ID,
            Self::LoopAlarm => LOOP_ALARM_ID,
        }
    }

    /// Maps a canonical id back to its tone.
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            BEEP_ID => Some(Self::Beep),
            TRIPLE_BEEP_ID => Some(Self::TripleBeep),
            LOOP_ALARM_ID => Some(Self::LoopAlarm),
            _ => None,
        }
    }

    /// Japanese label shown next to sound pickers.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Beep => "ピッ",
            Self::TripleBeep => "ピピピッ",
            Self::LoopAlarm => "ピピピッ（ループ）",
        }
    }
}

// ============================================================================
// SoundId
// ============================================================================

/// A normalized logical sound identifier.
///
/// The inner string is always the output of [`normalize_sound_id`], so two
/// ids that name the same sound compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SoundId(String);

impl SoundId {
    /// Normalizes `raw` into a sound id.
    #[must_use]
    pub fn new(raw: &str) -> Self {
        Self(normalize_sound_id(raw))
    }

    /// The silent sound.
    #[must_use]
    pub fn silence() -> Self {
        Self(String::new())
    }

    /// The id of a built-in tone.
    #[must_use]
    pub fn builtin(tone: BuiltinTone) -> Self {
        Self(tone.id().to_string())
    }

    /// Builds an id from a loosely shaped JSON value.
    ///
    /// Strings are used directly; objects contribute their `id`, `value` or
    /// `label` field (first present wins); numbers are stringified; anything
    /// else is silence.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::new(s),
            Value::Number(n) => Self::new(&n.to_string()),
            Value::Object(map) => ["id", "value", "label"]
                .iter()
                .find_map(|key| map.get(*key).filter(|v| !v.is_null()))
                .map_or_else(Self::silence, Self::from_value),
            _ => Self::silence(),
        }
    }

    /// Returns true if this id plays nothing.
    #[must_use]
    pub fn is_silence(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the built-in tone this id names, if any.
    #[must_use]
    pub fn builtin_tone(&self) -> Option<BuiltinTone> {
        BuiltinTone::from_id(&self.0)
    }

    /// Returns the normalized string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human readable label (built-in labels in Japanese, silence as 無音).
    #[must_use]
    pub fn label(&self) -> String {
        if self.is_silence() {
            return "無音".to_string();
        }
        if let Some(tone) = self.builtin_tone() {
            return tone.label().to_string();
        }
        self.0.clone()
    }
}

impl fmt::Display for SoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_silence() {
            f.write_str("none")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl From<&str> for SoundId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<BuiltinTone> for SoundId {
    fn from(tone: BuiltinTone) -> Self {
        Self::builtin(tone)
    }
}

impl Serialize for SoundId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Silence is persisted as "none", the spelling older boards wrote.
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SoundId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

// ============================================================================
// Normalization
// ============================================================================

/// Normalizes a raw sound reference.
///
/// - strips any number of `sound:` prefixes and surrounding whitespace
/// - maps `t:<relation>:<seconds>` presets to the slug of their voice name
/// - folds silence and built-in aliases (case-insensitive) to canonical ids
/// - returns every other value trimmed but otherwise unchanged
///
/// `normalize_sound_id(&normalize_sound_id(x)) == normalize_sound_id(x)`.
#[must_use]
pub fn normalize_sound_id(raw: &str) -> String {
    let mut s = raw.trim();
    while let Some(rest) = s.strip_prefix("sound:") {
        s = rest.trim();
    }
    if s.is_empty() {
        return String::new();
    }

    if let Some(slug) = resolve_time_preset(s) {
        return normalize_sound_id(&slug);
    }

    let lower = s.to_lowercase();
    let is = |aliases: &[&str]| aliases.contains(&s) || aliases.contains(&lower.as_str());

    if is(SILENCE_ALIASES) {
        String::new()
    } else if is(BEEP_ALIASES) {
        BEEP_ID.to_string()
    } else if is(TRIPLE_BEEP_ALIASES) {
        TRIPLE_BEEP_ID.to_string()
    } else if is(LOOP_ALARM_ALIASES) {
        LOOP_ALARM_ID.to_string()
    } else {
        s.to_string()
    }
}

// ============================================================================
// Time announcements
// ============================================================================

/// A spoken time announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeCue {
    /// "N seconds ago", relative to the end.
    Before(u32),
    /// "N minutes have passed", relative to the start.
    Elapsed(u32),
}

impl TimeCue {
    fn preset_key(self) -> String {
        match self {
            Self::Before(s) => format!("before:{s}"),
            Self::Elapsed(s) => format!("elapsed:{s}"),
        }
    }

    /// Slug of the name listed in [`TIME_PRESETS`], if the cue is listed.
    #[must_use]
    pub fn preset_slug(self) -> Option<String> {
        let key = self.preset_key();
        TIME_PRESETS
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, name)| slugify(name))
    }

    /// Slug of the generated name older boards saved: seconds for `before`,
    /// whole minutes (rounded) for `elapsed`.
    #[must_use]
    pub fn generated_slug(self) -> String {
        match self {
            Self::Before(s) => format!("{s}-seconds-ago"),
            Self::Elapsed(s) => format!("{}-minutes-have-passed", (s + 30) / 60),
        }
    }

    /// Parses a spoken-name slug.
    ///
    /// Accepts `30-seconds-ago`, `2-minutes-have-passed`,
    /// `1-hour-has-passed` and short forms such as `30s-ago` or `1m-elapsed`.
    #[must_use]
    pub fn from_slug(slug: &str) -> Option<Self> {
        let digits = slug.find(|c: char| !c.is_ascii_digit())?;
        if digits == 0 {
            return None;
        }
        let count: u32 = slug[..digits].parse().ok()?;
        let rest = &slug[digits..];
        let rest = rest.strip_prefix('-').unwrap_or(rest);
        let (unit, suffix) = rest.split_once('-')?;
        let scale = match unit {
            "s" | "sec" | "secs" | "second" | "seconds" => 1,
            "m" | "min" | "mins" | "minute" | "minutes" => 60,
            "h" | "hr" | "hrs" | "hour" | "hours" => 3600,
            _ => return None,
        };
        let seconds = count.checked_mul(scale)?;
        match suffix {
            "ago" => Some(Self::Before(seconds)),
            "has-passed" | "have-passed" | "passed" | "elapsed" => Some(Self::Elapsed(seconds)),
            _ => None,
        }
    }
}

/// Maps `t:before:30` style presets to the slug of their voice name.
///
/// Listed presets use the [`TIME_PRESETS`] name; other second counts use the
/// generated name. Returns `None` for anything that is not a preset.
#[must_use]
pub fn resolve_time_preset(raw: &str) -> Option<String> {
    let key = raw.strip_prefix("t:")?;
    let (relation, seconds) = key.split_once(':')?;
    let seconds: u32 = seconds.trim().parse().ok()?;
    let cue = match relation {
        "before" => TimeCue::Before(seconds),
        "elapsed" => TimeCue::Elapsed(seconds),
        _ => return None,
    };
    Some(cue.preset_slug().unwrap_or_else(|| cue.generated_slug()))
}

/// Other slugs a library clip for the same announcement may be named by.
///
/// `1-minute-has-passed` and `1-minutes-have-passed` name the same clip;
/// `slug` itself is not included.
#[must_use]
pub fn time_slug_aliases(slug: &str) -> Vec<String> {
    let Some(cue) = TimeCue::from_slug(slug) else {
        return Vec::new();
    };
    let mut aliases = Vec::with_capacity(2);
    for alias in cue.preset_slug().into_iter().chain([cue.generated_slug()]) {
        if alias != slug && !aliases.contains(&alias) {
            aliases.push(alias);
        }
    }
    aliases
}

/// Lowercases and reduces a label to `[a-z0-9-]`, collapsing runs of `-`.
#[must_use]
pub fn slugify(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for ch in label.trim().to_lowercase().chars() {
        let ch = if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            ch
        } else {
            '-'
        };
        if ch == '-' && (out.is_empty() || out.ends_with('-')) {
            continue;
        }
        out.push(ch);
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}
