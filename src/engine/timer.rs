//! The per-card countdown state machine.

use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::end_sequence::{EndPlan, EndSequenceCoordinator};
use super::numeric::NumericEntry;
use super::state::{collect_fires, TimerCardState, TimerPhase};
use super::{EngineError, TimerEvent};
use crate::sound::{SoundId, SoundPlayer};
use crate::store::SlotStore;
use crate::types::{
    BoardSettings, CardBackground, ColorTag, ReturnMode, TimerCardConfig, TimerMode, MODE_COUNT,
};

/// Length of one countdown step.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// CountdownEngine
// ============================================================================

/// Countdown engine owning one card's runtime state.
///
/// All operations are synchronous and return immediately; audio and the end
/// sequence run in the background. Time only advances through [`tick`],
/// [`advance`] or [`on_deadline`], usually called by
/// [`run_ticker`](super::run_ticker).
///
/// [`tick`]: Self::tick
/// [`advance`]: Self::advance
/// [`on_deadline`]: Self::on_deadline
pub struct CountdownEngine {
    config: TimerCardConfig,
    board: BoardSettings,
    state: TimerCardState,
    numeric: NumericEntry,
    player: Arc<dyn SoundPlayer>,
    coordinator: EndSequenceCoordinator,
    store: Option<SlotStore>,
    event_tx: Option<mpsc::UnboundedSender<TimerEvent>>,
    next_tick_at: Option<Instant>,
    auto_reset_at: Option<Instant>,
    wake: Arc<Notify>,
}

impl CountdownEngine {
    /// Creates an idle engine for `config`.
    pub fn new(config: TimerCardConfig, board: BoardSettings, player: Arc<dyn SoundPlayer>) -> Self {
        let mut engine = Self {
            config,
            board,
            state: TimerCardState::default(),
            numeric: NumericEntry::default(),
            coordinator: EndSequenceCoordinator::new(Arc::clone(&player)),
            player,
            store: None,
            event_tx: None,
            next_tick_at: None,
            auto_reset_at: None,
            wake: Arc::new(Notify::new()),
        };
        engine.select_initial_mode();
        engine
    }

    /// Creates an engine from the configuration persisted for a slot.
    pub fn load(store: SlotStore, board: BoardSettings, player: Arc<dyn SoundPlayer>) -> Self {
        let config = store.load_config();
        Self::new(config, board, player).with_store(store)
    }

    /// Persists the last mode and the retained numeric value to `store`.
    ///
    /// The initial mode and numeric value are re-read from it.
    #[must_use]
    pub fn with_store(mut self, store: SlotStore) -> Self {
        self.numeric = NumericEntry::new(store.load_numeric_retained());
        self.store = Some(store);
        self.select_initial_mode();
        self
    }

    /// Sends [`TimerEvent`]s to `tx`.
    #[must_use]
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<TimerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Starts the countdown.
    ///
    /// A no-op while running. With numeric entry the buffer is consumed (or
    /// the retained value used) and, with `keep_last`, remembered.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidTransition`] while finished
    /// - [`EngineError::ZeroDuration`] when there is nothing to count
    pub fn start(&mut self) -> Result<(), EngineError> {
        match self.state.phase {
            TimerPhase::Running => return Ok(()),
            TimerPhase::Finished => {
                return Err(self.invalid("開始"));
            }
            TimerPhase::Idle => {}
        }

        if self.config.numeric_entry.enabled {
            let keep_last = self.config.numeric_entry.keep_last;
            let current = self.numeric.take().unwrap_or(if keep_last {
                self.numeric.retained()
            } else {
                self.state.remaining
            });
            if current > 0 {
                self.state.remaining = current;
                if keep_last {
                    self.numeric.set_retained(current);
                    self.persist(|store| store.save_numeric_retained(current));
                }
            }
        }

        if self.state.remaining == 0 {
            return Err(EngineError::ZeroDuration);
        }

        self.coordinator.invalidate();
        self.state.mode_at_start = Some(self.state.active_mode);
        self.state.phase = TimerPhase::Running;
        self.next_tick_at = Some(Instant::now() + TICK_INTERVAL);

        let start_sound = self.active_mode().start_sound.clone();
        self.play(&start_sound);

        info!(
            mode = self.state.active_mode,
            remaining = self.state.remaining,
            "Countdown started"
        );
        self.emit(TimerEvent::Started {
            mode: self.state.active_mode,
            remaining: self.state.remaining,
        });
        self.wake.notify_one();
        Ok(())
    }

    /// Returns to idle. Callable at any time.
    ///
    /// Stops all audio and cancels the end sequence before anything else.
    /// Coming out of `Finished`, the return-mode policy picks the next mode.
    pub fn reset(&mut self) {
        self.reset_inner(false);
    }

    /// Advances one second. Returns true if the countdown finished.
    pub fn tick(&mut self) -> bool {
        self.advance(1)
    }

    /// Advances `seconds` at once, as after missed ticks.
    ///
    /// Thresholds skipped over still fire. Returns true if the countdown
    /// finished.
    pub fn advance(&mut self, seconds: u32) -> bool {
        if self.state.phase != TimerPhase::Running || seconds == 0 {
            return false;
        }
        let prev = self.state.remaining;
        let next = prev.saturating_sub(seconds);
        self.fire_thresholds(prev, next);
        self.state.remaining = next;
        self.emit(TimerEvent::Tick { remaining: next });

        if next == 0 {
            self.finish();
            return true;
        }
        false
    }

    /// Handles a deadline returned by [`next_deadline`](Self::next_deadline).
    pub fn on_deadline(&mut self, now: Instant) {
        match self.state.phase {
            TimerPhase::Running => {
                let Some(due) = self.next_tick_at else { return };
                if now < due {
                    return;
                }
                let missed = (now - due).as_secs();
                let steps = u32::try_from(missed + 1).unwrap_or(u32::MAX);
                if steps > 1 {
                    debug!(steps, "Catching up missed ticks");
                }
                self.next_tick_at = Some(due + TICK_INTERVAL * steps);
                self.advance(steps);
            }
            TimerPhase::Finished => {
                if self.auto_reset_at.is_some_and(|at| now >= at) {
                    self.reset_inner(true);
                }
            }
            TimerPhase::Idle => {}
        }
    }

    /// Returns when the engine next needs [`on_deadline`](Self::on_deadline).
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state.phase {
            TimerPhase::Running => self.next_tick_at,
            TimerPhase::Finished => self.auto_reset_at,
            TimerPhase::Idle => None,
        }
    }

    /// Switches to mode `index` and loads its duration.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidTransition`] unless idle
    /// - [`EngineError::InvalidMode`] for an index outside A/B/C
    pub fn choose_mode(&mut self, index: usize) -> Result<(), EngineError> {
        if self.state.phase != TimerPhase::Idle {
            return Err(self.invalid("モード変更"));
        }
        if index >= MODE_COUNT {
            return Err(EngineError::InvalidMode(index));
        }

        self.state.active_mode = index;
        self.state.clear_fired();
        self.state.remaining = self.idle_remaining();
        self.persist(|store| store.save_last_mode(index));

        debug!(mode = index, "Mode changed");
        self.emit(TimerEvent::ModeChanged {
            mode: index,
            remaining: self.state.remaining,
        });
        Ok(())
    }

    /// Flips button row `index`. Returns whether it is now on.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidButton`] if the active mode has no such
    /// row.
    pub fn toggle_button_row(&mut self, index: usize) -> Result<bool, EngineError> {
        if index >= self.active_mode().button_rows().len() {
            return Err(EngineError::InvalidButton(index));
        }
        let on = self.state.toggle(index);
        debug!(row = index, on, "Button row toggled");
        Ok(on)
    }

    /// Appends a digit to the numeric entry buffer.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NumericEntryDisabled`] when numeric entry is off
    /// - [`EngineError::InvalidTransition`] unless idle
    /// - [`EngineError::InvalidDigit`] for non-digits
    pub fn push_digit(&mut self, digit: char) -> Result<(), EngineError> {
        self.check_numeric("数字入力")?;
        self.numeric.push(digit)?;
        self.state.remaining = self.idle_remaining();
        Ok(())
    }

    /// Clears the numeric entry buffer and the retained value.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NumericEntryDisabled`] when numeric entry is off
    /// - [`EngineError::InvalidTransition`] unless idle
    pub fn clear_buffer(&mut self) -> Result<(), EngineError> {
        self.check_numeric("クリア")?;
        self.numeric.clear();
        self.state.remaining = 0;
        self.persist(|store| store.save_numeric_retained(0));
        Ok(())
    }

    /// Replaces the configuration between countdowns.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] unless idle.
    pub fn apply_config(&mut self, config: TimerCardConfig) -> Result<(), EngineError> {
        if self.state.phase != TimerPhase::Idle {
            return Err(self.invalid("設定の反映"));
        }
        self.config = config;
        self.state.clear_notifications();
        self.select_initial_mode();
        debug!("Configuration applied");
        Ok(())
    }

    /// Re-reads the configuration from the store, if one is attached.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] unless idle.
    pub fn reload_config(&mut self) -> Result<(), EngineError> {
        let Some(config) = self.store.as_ref().map(SlotStore::load_config) else {
            return Ok(());
        };
        self.apply_config(config)
    }

    /// Replaces the board-wide settings.
    pub fn set_board_settings(&mut self, board: BoardSettings) {
        self.board = board;
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn phase(&self) -> TimerPhase {
        self.state.phase
    }

    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.state.remaining
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.phase == TimerPhase::Running
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.phase == TimerPhase::Finished
    }

    #[must_use]
    pub fn finished_at(&self) -> Option<Instant> {
        self.state.finished_at
    }

    #[must_use]
    pub fn active_mode_index(&self) -> usize {
        self.state.active_mode
    }

    #[must_use]
    pub fn active_mode(&self) -> &TimerMode {
        &self.config.modes[self.state.active_mode.min(MODE_COUNT - 1)]
    }

    /// Returns the background color of the most recent notify row.
    #[must_use]
    pub fn active_color(&self) -> Option<ColorTag> {
        self.state.active_color
    }

    /// Derives the card background from the phase and active color.
    #[must_use]
    pub fn background(&self) -> CardBackground {
        match self.state.phase {
            TimerPhase::Idle => CardBackground::Idle,
            TimerPhase::Running => self
                .state
                .active_color
                .map_or(CardBackground::Running, CardBackground::Notify),
            TimerPhase::Finished => CardBackground::Finished,
        }
    }

    #[must_use]
    pub fn is_button_on(&self, index: usize) -> bool {
        self.state.is_toggled(index)
    }

    #[must_use]
    pub fn numeric_buffer(&self) -> &str {
        self.numeric.buffer()
    }

    #[must_use]
    pub fn config(&self) -> &TimerCardConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> &TimerCardState {
        &self.state
    }

    #[must_use]
    pub fn coordinator(&self) -> &EndSequenceCoordinator {
        &self.coordinator
    }

    /// Returns the delay before a finished card resets itself.
    #[must_use]
    pub fn auto_reset_delay(&self) -> Duration {
        Duration::from_secs(u64::from(self.config.auto_reset_seconds(&self.board)))
    }

    /// Returns the handle the ticker waits on for deadline changes.
    #[must_use]
    pub fn waker(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn fire_thresholds(&mut self, prev: u32, next: u32) {
        let fires = collect_fires(self.active_mode(), self.state.toggled(), prev, next);
        for fire in fires {
            if !self.state.mark_fired(fire.tag) {
                continue;
            }
            debug!(
                source = ?fire.tag.source,
                threshold = fire.tag.threshold,
                sound = %fire.sound,
                "Threshold reached"
            );
            self.play(&fire.sound);
            if let Some(color) = fire.color {
                self.state.active_color = Some(color);
            }
            self.emit(TimerEvent::Notified {
                source: fire.tag.source,
                slot: fire.tag.slot,
                threshold: fire.tag.threshold,
                sound: fire.sound,
            });
        }
    }

    fn finish(&mut self) {
        let now = Instant::now();
        self.state.phase = TimerPhase::Finished;
        self.state.finished_at = Some(now);
        self.next_tick_at = None;
        self.auto_reset_at = Some(now + self.auto_reset_delay());

        let plan = EndPlan::for_mode(self.active_mode());
        self.coordinator.run(plan);

        info!(mode = self.state.active_mode, "Countdown finished");
        self.emit(TimerEvent::Finished {
            mode: self.state.active_mode,
        });
        self.wake.notify_one();
    }

    fn reset_inner(&mut self, automatic: bool) {
        let was_finished = self.state.phase == TimerPhase::Finished;
        self.coordinator.cancel();

        self.state.clear_notifications();
        self.state.finished_at = None;
        self.next_tick_at = None;
        self.auto_reset_at = None;

        let mut target = self.state.active_mode;
        if was_finished {
            target = match self.config.return_mode {
                ReturnMode::Last => self.state.mode_at_start.unwrap_or(target),
                ReturnMode::Fixed(i) if i < MODE_COUNT => i,
                ReturnMode::Fixed(_) => target,
            };
        }
        self.state.mode_at_start = None;
        self.state.active_mode = target;
        self.state.phase = TimerPhase::Idle;
        self.state.remaining = self.idle_remaining();
        self.persist(|store| store.save_last_mode(target));

        info!(mode = target, automatic, "Timer reset");
        self.emit(TimerEvent::Reset {
            mode: target,
            remaining: self.state.remaining,
            automatic,
        });
        self.wake.notify_one();
    }

    fn select_initial_mode(&mut self) {
        let saved = self.store.as_ref().and_then(SlotStore::load_last_mode);
        let index = match self.config.return_mode {
            ReturnMode::Last => saved.filter(|&i| i < MODE_COUNT).unwrap_or(0),
            ReturnMode::Fixed(i) if i < MODE_COUNT => i,
            ReturnMode::Fixed(_) => 0,
        };
        self.state.active_mode = index;
        self.state.remaining = self.idle_remaining();
    }

    /// Seconds shown while idle in the active mode.
    fn idle_remaining(&self) -> u32 {
        let numeric = self.config.numeric_entry;
        if numeric.enabled {
            self.numeric.idle_seconds(numeric.keep_last)
        } else {
            self.active_mode().duration_seconds()
        }
    }

    fn check_numeric(&self, operation: &'static str) -> Result<(), EngineError> {
        if !self.config.numeric_entry.enabled {
            return Err(EngineError::NumericEntryDisabled);
        }
        if self.state.phase != TimerPhase::Idle {
            return Err(self.invalid(operation));
        }
        Ok(())
    }

    fn invalid(&self, operation: &'static str) -> EngineError {
        EngineError::InvalidTransition {
            operation,
            phase: self.state.phase,
        }
    }

    fn play(&self, id: &SoundId) {
        if id.is_silence() {
            return;
        }
        if let Err(e) = self.player.play_once(id) {
            warn!(sound = %id, "サウンドを再生できません: {}", e);
        }
    }

    fn persist<F>(&self, write: F)
    where
        F: FnOnce(&SlotStore) -> Result<(), crate::store::StoreError>,
    {
        if let Some(store) = &self.store {
            if let Err(e) = write(store) {
                warn!(slot = %store.slot(), "状態を保存できません: {}", e);
            }
        }
    }

    fn emit(&self, event: TimerEvent) {
        if let Some(tx) = &self.event_tx {
            if tx.send(event).is_err() {
                debug!("Event receiver dropped");
            }
        }
    }
}

impl std::fmt::Debug for CountdownEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountdownEngine")
            .field("phase", &self.state.phase)
            .field("mode", &self.state.active_mode)
            .field("remaining", &self.state.remaining)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
