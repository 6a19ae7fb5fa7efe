//! Display utilities for the timer board CLI.
//!
//! This module provides formatted output for:
//! - Engine events while a slot runs
//! - Slot configuration summaries
//! - The sound library listing
//! - Board settings
//! - Error messages
//!
//! Every `show_*` method prints the text built by the matching `*_lines`
//! function, so the wording can be tested without capturing stdout.

use crate::engine::{FireSource, TimerEvent};
use crate::sound::SoundLibraryEntry;
use crate::types::{
    format_mmss, mode_letter, BoardSettings, CueSlot, InsertVoice, SlotId, TimerCardConfig,
};

// ============================================================================
// Display
// ============================================================================

/// Display utilities for CLI output.
pub struct Display;

impl Display {
    /// Shows one engine event.
    ///
    /// Ticks overwrite the current line; everything else gets its own line.
    pub fn show_event(event: &TimerEvent, config: &TimerCardConfig) {
        let line = Self::event_line(event, config);
        if matches!(event, TimerEvent::Tick { .. }) {
            print!("\r{line}   ");
            use std::io::Write as _;
            let _ = std::io::stdout().flush();
        } else {
            println!("\r{line}");
        }
    }

    /// Formats one engine event.
    #[must_use]
    pub fn event_line(event: &TimerEvent, config: &TimerCardConfig) -> String {
        match event {
            TimerEvent::Started { mode, remaining } => format!(
                "* {}を開始しました ({}) 残り {}",
                Self::mode_name(config, *mode),
                mode_letter(*mode),
                format_mmss(*remaining)
            ),
            TimerEvent::Tick { remaining } => format!("  残り {}", format_mmss(*remaining)),
            TimerEvent::Notified {
                source,
                slot,
                threshold,
                sound,
            } => {
                let origin = match source {
                    FireSource::Notify(row) => format!("通知{}", row + 1),
                    FireSource::Button(row) => format!("ボタン{}", row + 1),
                };
                let cue = match slot {
                    CueSlot::First => 1,
                    CueSlot::Second => 2,
                };
                format!(
                    "! {origin}-{cue} 残り {} ({})",
                    format_mmss(*threshold),
                    sound.label()
                )
            }
            TimerEvent::Finished { mode } => {
                format!("[] {}が終了しました", Self::mode_name(config, *mode))
            }
            TimerEvent::Reset {
                mode,
                remaining,
                automatic,
            } => {
                let how = if *automatic { "自動" } else { "" };
                format!(
                    "< {how}リセットしました ({} {})",
                    mode_letter(*mode),
                    format_mmss(*remaining)
                )
            }
            TimerEvent::ModeChanged { mode, remaining } => format!(
                "> モード{}に切り替えました ({})",
                mode_letter(*mode),
                format_mmss(*remaining)
            ),
        }
    }

    /// Shows a slot configuration summary.
    pub fn show_config(slot: &SlotId, config: &TimerCardConfig, board: &BoardSettings) {
        for line in Self::config_lines(slot, config, board) {
            println!("{line}");
        }
    }

    /// Formats a slot configuration summary.
    #[must_use]
    pub fn config_lines(
        slot: &SlotId,
        config: &TimerCardConfig,
        board: &BoardSettings,
    ) -> Vec<String> {
        let mut lines = vec![
            format!("スロット {slot}"),
            "─────────────────────────────".to_string(),
        ];

        for (i, mode) in config.modes.iter().enumerate() {
            let hidden = if mode.hidden { " (非表示)" } else { "" };
            lines.push(format!(
                "モード{}: {} {}{}",
                mode_letter(i),
                mode.display_name(i),
                format_mmss(mode.duration_seconds()),
                hidden
            ));
            lines.push(format!(
                "  開始音: {} / 終了音: {} ({}秒)",
                mode.start_sound.label(),
                mode.end_sound.label(),
                mode.end_loop_seconds
            ));
            match &mode.end_insert {
                InsertVoice::None => {}
                InsertVoice::Silent => lines.push(format!(
                    "  割り込み: 無音 ({}秒)",
                    mode.end_insert_mute_seconds
                )),
                InsertVoice::Voice(id) => lines.push(format!(
                    "  割り込み: {} ({}秒)",
                    id.label(),
                    mode.end_insert_mute_seconds
                )),
            }
            for (r, row) in mode.notify_rows.iter().enumerate() {
                let color = row.color.map_or("変更なし", |c| c.label());
                lines.push(format!(
                    "  通知{}: {} {} / {} {} [{}]",
                    r + 1,
                    format_mmss(row.first.threshold_seconds()),
                    row.first.sound.label(),
                    format_mmss(row.second.threshold_seconds()),
                    row.second.sound.label(),
                    color
                ));
            }
            for (r, row) in mode.button_rows().iter().enumerate() {
                lines.push(format!(
                    "  ボタン{} 「{}」: {} {} / {} {}",
                    r + 1,
                    row.label,
                    format_mmss(row.first.threshold_seconds()),
                    row.first.sound.label(),
                    format_mmss(row.second.threshold_seconds()),
                    row.second.sound.label()
                ));
            }
        }

        lines.push(format!("戻りモード: {}", config.return_mode));
        let numeric = if config.numeric_entry.enabled {
            if config.numeric_entry.keep_last {
                "有効 (前回値を保持)"
            } else {
                "有効"
            }
        } else {
            "無効"
        };
        lines.push(format!("テンキー入力: {numeric}"));
        lines.push(format!(
            "自動リセット: {}秒",
            config.auto_reset_seconds(board)
        ));
        lines
    }

    /// Shows the sound library.
    pub fn show_library(entries: &[SoundLibraryEntry]) {
        for line in Self::library_lines(entries) {
            println!("{line}");
        }
    }

    /// Formats the sound library listing.
    #[must_use]
    pub fn library_lines(entries: &[SoundLibraryEntry]) -> Vec<String> {
        if entries.is_empty() {
            return vec!["登録された音声はありません".to_string()];
        }
        entries
            .iter()
            .map(|e| {
                let volume = (e.volume_factor() * 100.0).round() as u32;
                let broken = if e.broken { " (再登録が必要)" } else { "" };
                format!("{}  {}  音量{}%{}", e.id, e.name, volume, broken)
            })
            .collect()
    }

    /// Shows board settings, slots and pages.
    pub fn show_board(settings: &BoardSettings, slots: &[SlotId], pages: &[String], locked: bool) {
        println!("タイマーボード");
        println!("─────────────────────────────");
        println!("自動リセット: {}秒", settings.auto_reset_seconds);
        let slots: Vec<&str> = slots.iter().map(SlotId::as_str).collect();
        if slots.is_empty() {
            println!("スロット: 0");
        } else {
            println!("スロット: {}", slots.join(", "));
        }
        if !pages.is_empty() {
            println!("ページ: {}", pages.join(", "));
        }
        if locked {
            println!("ページはロックされています");
        }
    }

    /// Shows a success message.
    pub fn show_success(message: &str) {
        println!("* {}", message);
    }

    /// Shows a warning that does not stop the command.
    pub fn show_warning(message: &str) {
        eprintln!("警告: {}", message);
    }

    /// Shows an error message.
    pub fn show_error(message: &str) {
        eprintln!("エラー: {}", message);
    }

    fn mode_name(config: &TimerCardConfig, mode: usize) -> String {
        config
            .mode(mode)
            .map_or_else(|| mode_letter(mode).to_string(), |m| m.display_name(mode))
    }
}

// ============================================================================
// Tests
// ============================================================================
