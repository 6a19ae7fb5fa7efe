//! Sound playback system for the timer board.
//!
//! This module provides everything between a configured sound id and the
//! speaker:
//!
//! - Sound id normalization (aliases, legacy spellings, time presets)
//! - The persisted sound library and its lookup
//! - Resolution of ids into playable sources and volumes
//! - Synthesized built-in tones
//! - Non-blocking playback with a single owned loop and a keep-warm pulse
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │   SoundPlayer    │ ← Main interface (used by the engine)
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │  SoundResolver   │────▶│  Built-in tones  │
//! │                  │     │  (synthesized)   │
//! │                  │     ├──────────────────┤
//! │                  │────▶│  SoundLibrary    │
//! └──────────────────┘     │  (via lookup)    │
//!                          └──────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use timerboard::sound::{RodioSoundPlayer, SoundId, SoundLibrary, SoundPlayer, SoundResolver};
//!
//! let resolver = SoundResolver::new(Arc::new(SoundLibrary::new()));
//! let player = RodioSoundPlayer::new(resolver, false).expect("audio init");
//!
//! player.play_once(&SoundId::new("beep3")).expect("playback failed");
//! player.play_loop(&SoundId::new("alarm8"), None).expect("playback failed");
//! player.stop_all();
//! ```

mod embedded;
mod error;
mod id;
mod library;
mod player;
mod resolver;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

pub use embedded::{keep_alive_samples, tone_duration, tone_samples, SAMPLE_RATE};
pub use error::{LibraryError, SoundError};
pub use id::{
    normalize_sound_id, resolve_time_preset, slugify, time_slug_aliases, BuiltinTone, SoundId,
    TimeCue, BEEP_ID, LOOP_ALARM_ID, TIME_PRESETS, TRIPLE_BEEP_ID,
};
pub use library::{
    is_expiring_url, mime_for_path, SoundLibrary, SoundLibraryEntry, SoundLookup,
    MAX_IMPORT_BYTES,
};
pub use player::{try_create_player, RodioSoundPlayer, KEEP_WARM_INTERVAL};
pub use resolver::{
    PlayableSource, ResolvedSound, SoundKind, SoundResolver, FALLBACK_TONE, GLOBAL_VOLUME,
};

/// Trait for sound playback implementations.
///
/// This trait abstracts the sound playback functionality, allowing for
/// different implementations (e.g., rodio-based, mock for testing).
/// Every method returns immediately; playback continues in the background.
pub trait SoundPlayer: Send + Sync {
    /// Plays a sound once at its resolved volume.
    ///
    /// # Errors
    ///
    /// Returns an error if playback could not be started.
    fn play_once(&self, id: &SoundId) -> Result<(), SoundError>;

    /// Plays a sound and cuts it off after `duration`, whatever its length.
    ///
    /// # Errors
    ///
    /// Returns an error if playback could not be started.
    fn play_bounded(&self, id: &SoundId, duration: Duration) -> Result<(), SoundError>;

    /// Starts looping a sound until [`stop_all`](Self::stop_all).
    ///
    /// Replaces any loop this player already owns. With `fade_in`, the
    /// volume ramps linearly from silence over that duration.
    ///
    /// # Errors
    ///
    /// Returns an error if playback could not be started.
    fn play_loop(&self, id: &SoundId, fade_in: Option<Duration>) -> Result<(), SoundError>;

    /// Stops every sound this player started. Safe to call at any time.
    fn stop_all(&self);

    /// Returns true if the audio system is available.
    fn is_available(&self) -> bool;

    /// Returns true if sound playback is disabled.
    fn is_disabled(&self) -> bool;

    /// Enables sound playback.
    fn enable(&self);

    /// Disables sound playback.
    fn disable(&self);
}

/// Plays `id` for `duration` and completes once the duration has elapsed.
///
/// Completion does not wait for the device to confirm the stop. A playback
/// failure is logged and the wait still happens, so callers keep their pace.
pub async fn play_for_duration(player: &dyn SoundPlayer, id: &SoundId, duration: Duration) {
    if !id.is_silence() {
        if let Err(e) = player.play_bounded(id, duration) {
            debug!(sound = %id, "Bounded playback failed: {}", e);
        }
    }
    tokio::time::sleep(duration).await;
}

// ============================================================================
// Test doubles
// ============================================================================

/// A call recorded by [`MockSoundPlayer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerCall {
    Once(SoundId),
    Bounded(SoundId, Duration),
    Loop {
        id: SoundId,
        fade_in: Option<Duration>,
    },
    StopAll,
}

/// Mock sound player for testing.
#[derive(Debug)]
pub struct MockSoundPlayer {
    calls: Mutex<Vec<PlayerCall>>,
    looping: AtomicBool,
    available: AtomicBool,
    disabled: AtomicBool,
    should_fail: AtomicBool,
}

impl Default for MockSoundPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSoundPlayer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            looping: AtomicBool::new(false),
            available: AtomicBool::new(true),
            disabled: AtomicBool::new(false),
            should_fail: AtomicBool::new(false),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<PlayerCall> {
        self.lock().clone()
    }

    /// Returns the ids played once, in order.
    #[must_use]
    pub fn played_once(&self) -> Vec<SoundId> {
        self.lock()
            .iter()
            .filter_map(|c| match c {
                PlayerCall::Once(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn loop_count(&self) -> usize {
        self.count(|c| matches!(c, PlayerCall::Loop { .. }))
    }

    #[must_use]
    pub fn stop_all_count(&self) -> usize {
        self.count(|c| matches!(c, PlayerCall::StopAll))
    }

    /// Returns true if a loop was started and not stopped since.
    #[must_use]
    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::SeqCst)
    }

    pub fn clear_calls(&self) {
        self.lock().clear();
    }

    fn count(&self, pred: impl Fn(&PlayerCall) -> bool) -> usize {
        self.lock().iter().filter(|c| pred(c)).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PlayerCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: PlayerCall) -> Result<(), SoundError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(SoundError::PlaybackError("Mock failure".to_string()));
        }
        if self.disabled.load(Ordering::SeqCst) {
            return Ok(());
        }
        if matches!(call, PlayerCall::Loop { .. }) {
            self.looping.store(true, Ordering::SeqCst);
        }
        self.lock().push(call);
        Ok(())
    }
}

impl SoundPlayer for MockSoundPlayer {
    fn play_once(&self, id: &SoundId) -> Result<(), SoundError> {
        self.record(PlayerCall::Once(id.clone()))
    }

    fn play_bounded(&self, id: &SoundId, duration: Duration) -> Result<(), SoundError> {
        self.record(PlayerCall::Bounded(id.clone(), duration))
    }

    fn play_loop(&self, id: &SoundId, fade_in: Option<Duration>) -> Result<(), SoundError> {
        self.record(PlayerCall::Loop {
            id: id.clone(),
            fade_in,
        })
    }

    fn stop_all(&self) {
        self.looping.store(false, Ordering::SeqCst);
        self.lock().push(PlayerCall::StopAll);
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    fn enable(&self) {
        self.disabled.store(false, Ordering::SeqCst);
    }

    fn disable(&self) {
        self.disabled.store(true, Ordering::SeqCst);
    }
}

/// A player that plays nothing; used when no audio device is available.
#[derive(Debug, Default)]
pub struct NoopSoundPlayer;

impl SoundPlayer for NoopSoundPlayer {
    fn play_once(&self, _id: &SoundId) -> Result<(), SoundError> {
        Ok(())
    }

    fn play_bounded(&self, _id: &SoundId, _duration: Duration) -> Result<(), SoundError> {
        Ok(())
    }

    fn play_loop(&self, _id: &SoundId, _fade_in: Option<Duration>) -> Result<(), SoundError> {
        Ok(())
    }

    fn stop_all(&self) {}

    fn is_available(&self) -> bool {
        false
    }

    fn is_disabled(&self) -> bool {
        true
    }

    fn enable(&self) {}

    fn disable(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        // Verify all public types are accessible
        let _: fn(&str) -> String = normalize_sound_id;
        let _: fn(BuiltinTone) -> Vec<f32> = tone_samples;
        let _: fn() -> SoundLibrary = SoundLibrary::new;
        assert_eq!(FALLBACK_TONE, BuiltinTone::Beep);
    }

    #[test]
    fn test_mock_records_calls() {
        let player = MockSoundPlayer::new();
        let beep = SoundId::new("beep");
        player.play_once(&beep).unwrap();
        player
            .play_loop(&SoundId::new("alarm8"), Some(Duration::from_millis(300)))
            .unwrap();
        assert!(player.is_looping());
        player.stop_all();
        assert!(!player.is_looping());

        assert_eq!(player.played_once(), vec![beep]);
        assert_eq!(player.loop_count(), 1);
        assert_eq!(player.stop_all_count(), 1);
        assert_eq!(player.calls().len(), 3);
    }

    #[test]
    fn test_mock_failure_and_disable() {
        let player = MockSoundPlayer::new();
        player.set_should_fail(true);
        assert!(player.play_once(&SoundId::new("beep")).is_err());
        player.set_should_fail(false);

        player.disable();
        assert!(player.is_disabled());
        player.play_once(&SoundId::new("beep")).unwrap();
        assert!(player.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_for_duration_waits_even_on_failure() {
        let player = MockSoundPlayer::new();
        player.set_should_fail(true);
        let start = tokio::time::Instant::now();
        play_for_duration(&player, &SoundId::new("voice"), Duration::from_millis(1500)).await;
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_for_duration_silence_only_waits() {
        let player = MockSoundPlayer::new();
        play_for_duration(&player, &SoundId::silence(), Duration::from_secs(2)).await;
        assert!(player.calls().is_empty());
    }

    #[test]
    fn test_noop_player() {
        let player = NoopSoundPlayer;
        assert!(player.play_once(&SoundId::new("beep")).is_ok());
        assert!(!player.is_available());
        player.stop_all();
    }
}
