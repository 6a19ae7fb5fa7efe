//! Per-card runtime state and notification bookkeeping.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use tokio::time::Instant;

use crate::sound::SoundId;
use crate::types::{ColorTag, CueSlot, TimerMode};

// ============================================================================
// TimerPhase
// ============================================================================

/// Lifecycle of one countdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimerPhase {
    /// Waiting to start; `remaining` holds the configured duration
    #[default]
    Idle,
    /// Counting down
    Running,
    /// Reached zero; the end sequence owns the audio
    Finished,
}

impl TimerPhase {
    /// Returns the Japanese display name.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "待機中",
            Self::Running => "実行中",
            Self::Finished => "終了",
        }
    }
}

impl fmt::Display for TimerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Fire tags
// ============================================================================

/// Which configured row a cue belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FireSource {
    /// Notify row at this index
    Notify(usize),
    /// Button row at this index
    Button(usize),
}

/// Identity of one armed threshold: row, slot and threshold seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FireTag {
    pub source: FireSource,
    pub slot: CueSlot,
    pub threshold: u32,
}

/// A threshold crossed by one step of the countdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fire {
    pub tag: FireTag,
    pub sound: SoundId,
    /// Background switched to (notify rows only)
    pub color: Option<ColorTag>,
}

/// Returns true if stepping from `prev` to `next` reaches `threshold`.
///
/// Inclusive on landing exactly on the threshold, and tolerant of jumps that
/// skip over it.
#[must_use]
pub fn crossed(prev: u32, next: u32, threshold: u32) -> bool {
    next == threshold || (prev > threshold && next <= threshold)
}

/// Collects every threshold reached between `prev` and `next`.
///
/// Order is fixed: notify rows by index, then toggled button rows by index;
/// within a row the first cue before the second. Already-fired tags are not
/// filtered here.
#[must_use]
pub fn collect_fires(mode: &TimerMode, toggled: &BTreeSet<usize>, prev: u32, next: u32) -> Vec<Fire> {
    let mut fires = Vec::new();

    for (i, row) in mode.notify_rows.iter().enumerate() {
        for slot in CueSlot::BOTH {
            let cue = row.cue(slot);
            let threshold = cue.threshold_seconds();
            if crossed(prev, next, threshold) {
                fires.push(Fire {
                    tag: FireTag {
                        source: FireSource::Notify(i),
                        slot,
                        threshold,
                    },
                    sound: cue.sound.clone(),
                    color: row.color,
                });
            }
        }
    }

    let rows = mode.button_rows();
    for &i in toggled {
        let Some(row) = rows.get(i) else { continue };
        for slot in CueSlot::BOTH {
            let cue = row.cue(slot);
            let threshold = cue.threshold_seconds();
            if crossed(prev, next, threshold) {
                fires.push(Fire {
                    tag: FireTag {
                        source: FireSource::Button(i),
                        slot,
                        threshold,
                    },
                    sound: cue.sound.clone(),
                    color: None,
                });
            }
        }
    }

    fires
}

// ============================================================================
// TimerCardState
// ============================================================================

/// Runtime state of one card, owned by its engine.
#[derive(Debug, Clone, Default)]
pub struct TimerCardState {
    pub active_mode: usize,
    pub remaining: u32,
    pub phase: TimerPhase,
    pub finished_at: Option<Instant>,
    /// Mode that was active when the current run started
    pub mode_at_start: Option<usize>,
    /// Background set by the most recent notify row
    pub active_color: Option<ColorTag>,
    notified: HashSet<FireTag>,
    toggled: BTreeSet<usize>,
    button_fired: HashMap<usize, HashSet<FireTag>>,
}

impl TimerCardState {
    /// Creates an idle state for `mode` with `remaining` seconds.
    #[must_use]
    pub fn new(active_mode: usize, remaining: u32) -> Self {
        Self {
            active_mode,
            remaining,
            ..Self::default()
        }
    }

    /// Records `tag` as fired. Returns false if it already fired.
    pub fn mark_fired(&mut self, tag: FireTag) -> bool {
        match tag.source {
            FireSource::Notify(_) => self.notified.insert(tag),
            FireSource::Button(i) => self.button_fired.entry(i).or_default().insert(tag),
        }
    }

    /// Returns true if `tag` fired during the current run or toggle session.
    #[must_use]
    pub fn has_fired(&self, tag: &FireTag) -> bool {
        match tag.source {
            FireSource::Notify(_) => self.notified.contains(tag),
            FireSource::Button(i) => self
                .button_fired
                .get(&i)
                .is_some_and(|fired| fired.contains(tag)),
        }
    }

    /// Flips button row `index`. Returns the new on/off state.
    ///
    /// Both directions start a fresh toggle session, so thresholds that
    /// already fired are armed again.
    pub fn toggle(&mut self, index: usize) -> bool {
        self.button_fired.remove(&index);
        if self.toggled.remove(&index) {
            false
        } else {
            self.toggled.insert(index);
            true
        }
    }

    #[must_use]
    pub fn toggled(&self) -> &BTreeSet<usize> {
        &self.toggled
    }

    #[must_use]
    pub fn is_toggled(&self, index: usize) -> bool {
        self.toggled.contains(&index)
    }

    /// Forgets every fired tag, toggle and color.
    pub fn clear_notifications(&mut self) {
        self.clear_fired();
        self.toggled.clear();
    }

    /// Re-arms every threshold but leaves button rows switched on.
    pub fn clear_fired(&mut self) {
        self.notified.clear();
        self.button_fired.clear();
        self.active_color = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ButtonRow, Cue, NotifyRow};

    fn notify_row(first: (u32, u32, &str), second: (u32, u32, &str), color: ColorTag) -> NotifyRow {
        NotifyRow {
            first: Cue::new(first.0, first.1, first.2),
            second: Cue::new(second.0, second.1, second.2),
            color: Some(color),
        }
    }

    fn button_row(sec: u32, sound: &str) -> ButtonRow {
        ButtonRow {
            first: Cue::new(0, sec, sound),
            second: Cue::new(0, 0, ""),
            label: "呼出".to_string(),
        }
    }

    #[test]
    fn test_crossed() {
        assert!(crossed(4, 3, 3));
        assert!(crossed(5, 2, 3), "jump over the threshold");
        assert!(crossed(3, 3, 3), "landing exactly");
        assert!(!crossed(5, 4, 3));
        assert!(!crossed(3, 2, 3), "already below");
        assert!(crossed(1, 0, 0));
    }

    #[test]
    fn test_collect_fires_order() {
        let mode = TimerMode::default()
            .with_duration(0, 10)
            .with_notify_row(notify_row((0, 3, "x"), (0, 3, "y"), ColorTag::Blue))
            .with_notify_row(notify_row((0, 3, "z"), (0, 8, "w"), ColorTag::Pink))
            .with_button_row(button_row(9, "b0"))
            .with_button_row(button_row(3, "b1"));
        let toggled: BTreeSet<usize> = [1].into_iter().collect();

        let fires = collect_fires(&mode, &toggled, 4, 3);
        let sounds: Vec<&str> = fires.iter().map(|f| f.sound.as_str()).collect();
        assert_eq!(sounds, vec!["x", "y", "z", "b1"]);
        assert_eq!(fires[0].color, Some(ColorTag::Blue));
        assert_eq!(fires[3].color, None);
        assert_eq!(fires[3].tag.source, FireSource::Button(1));
    }

    #[test]
    fn test_untoggled_buttons_do_not_fire() {
        let mode = TimerMode::default().with_button_row(button_row(3, "b0"));
        assert!(collect_fires(&mode, &BTreeSet::new(), 4, 3).is_empty());
    }

    #[test]
    fn test_mark_fired_once() {
        let mut state = TimerCardState::new(0, 10);
        let tag = FireTag {
            source: FireSource::Notify(0),
            slot: CueSlot::First,
            threshold: 3,
        };
        assert!(state.mark_fired(tag));
        assert!(!state.mark_fired(tag));
        assert!(state.has_fired(&tag));

        state.clear_notifications();
        assert!(!state.has_fired(&tag));
    }

    #[test]
    fn test_toggle_rearms_button() {
        let mut state = TimerCardState::new(0, 10);
        let tag = FireTag {
            source: FireSource::Button(2),
            slot: CueSlot::Second,
            threshold: 5,
        };
        assert!(state.toggle(2));
        assert!(state.mark_fired(tag));

        assert!(!state.toggle(2));
        assert!(!state.is_toggled(2));
        assert!(state.toggle(2));
        assert!(!state.has_fired(&tag));
        assert!(state.mark_fired(tag));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(TimerPhase::Running.to_string(), "実行中");
        assert_eq!(TimerPhase::default(), TimerPhase::Idle);
    }
}
