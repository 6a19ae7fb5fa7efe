//! Countdown engine for one timer card.
//!
//! This module provides the core timer functionality:
//! - State transitions (Idle → Running → Finished → Idle)
//! - Threshold notifications with color changes and toggle buttons
//! - The cancellable end-of-countdown audio sequence
//! - Auto-reset and return-mode policies
//! - Direct numeric time entry

mod end_sequence;
mod numeric;
mod state;
mod timer;

use std::future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::sound::SoundId;
use crate::types::CueSlot;

pub use end_sequence::{
    EndPlan, EndSequenceCoordinator, InsertPlan, INTRO_CUE_LENGTH, RESUME_FADE_IN,
};
pub use numeric::{buffer_seconds, NumericEntry, BUFFER_DIGITS};
pub use state::{collect_fires, crossed, Fire, FireSource, FireTag, TimerCardState, TimerPhase};
pub use timer::{CountdownEngine, TICK_INTERVAL};

// ============================================================================
// EngineError
// ============================================================================

/// Operations rejected by the engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The operation is not allowed in the current phase.
    #[error("{operation}は{phase}には実行できません")]
    InvalidTransition {
        operation: &'static str,
        phase: TimerPhase,
    },

    /// Starting with nothing to count down.
    #[error("時間が0秒のため開始できません")]
    ZeroDuration,

    #[error("モード番号が不正です: {0}")]
    InvalidMode(usize),

    #[error("通知ボタン番号が不正です: {0}")]
    InvalidButton(usize),

    #[error("数字を入力してください: {0}")]
    InvalidDigit(char),

    #[error("テンキー入力が有効になっていません")]
    NumericEntryDisabled,
}

// ============================================================================
// TimerEvent
// ============================================================================

/// Engine notifications for the card view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    /// Countdown started
    Started {
        /// Active mode index
        mode: usize,
        /// Seconds to count down
        remaining: u32,
    },
    /// One or more seconds elapsed
    Tick {
        /// Remaining seconds
        remaining: u32,
    },
    /// A notify or button threshold fired
    Notified {
        source: FireSource,
        slot: CueSlot,
        threshold: u32,
        sound: SoundId,
    },
    /// Countdown reached zero
    Finished {
        /// Active mode index
        mode: usize,
    },
    /// Back to idle
    Reset {
        /// Mode selected for the next run
        mode: usize,
        /// Seconds shown while idle
        remaining: u32,
        /// True when the finished card reset itself
        automatic: bool,
    },
    /// A different mode was chosen while idle
    ModeChanged {
        mode: usize,
        remaining: u32,
    },
}

// ============================================================================
// Ticker
// ============================================================================

/// Drives `engine` until `shutdown` changes or its sender is dropped.
///
/// Sleeps until the engine's next deadline (the next one-second step while
/// running, the auto-reset while finished) and wakes early whenever an
/// operation moves a deadline.
pub async fn run_ticker(engine: Arc<Mutex<CountdownEngine>>, mut shutdown: watch::Receiver<bool>) {
    let wake = engine.lock().await.waker();

    loop {
        let deadline = engine.lock().await.next_deadline();

        tokio::select! {
            () = sleep_until_opt(deadline) => {
                engine.lock().await.on_deadline(Instant::now());
            }
            () = wake.notified() => {}
            _ = shutdown.changed() => {
                debug!("Ticker shutting down");
                break;
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}
