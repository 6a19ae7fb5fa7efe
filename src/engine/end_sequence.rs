//! End-of-countdown audio sequencing.
//!
//! When a countdown reaches zero the coordinator plays the mode's end sound.
//! For the looping alarm it arms an absolute deadline, optionally interrupts
//! the loop with an intro cue and a voice clip, and runs a watchdog that
//! silences everything at the deadline.
//!
//! Every spawned step captures the generation it was started under and
//! re-checks it after each await. [`EndSequenceCoordinator::cancel`] bumps the
//! generation, so a stale step never produces sound after a reset.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, warn};

use crate::sound::{play_for_duration, BuiltinTone, SoundId, SoundPlayer};
use crate::types::{InsertVoice, TimerMode};

/// Length of the intro cue before an inserted voice.
pub const INTRO_CUE_LENGTH: Duration = Duration::from_millis(1000);

/// Fade applied when the loop comes back after an inserted voice.
pub const RESUME_FADE_IN: Duration = Duration::from_millis(300);

// ============================================================================
// Plans
// ============================================================================

/// What interrupts the end loop.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertPlan {
    /// Loop right away.
    None,
    /// Loop right away and play the intro cue over it.
    Silent,
    /// Stop everything, play the intro cue, the voice for `window`, then
    /// resume the loop if the deadline has not passed.
    Voice { id: SoundId, window: Duration },
}

/// What happens when a countdown reaches zero.
#[derive(Debug, Clone, PartialEq)]
pub enum EndPlan {
    Silence,
    /// Play a sound once.
    Once(SoundId),
    /// Loop the alarm for `loop_seconds`.
    Loop {
        loop_seconds: u32,
        insert: InsertPlan,
    },
}

impl EndPlan {
    /// Derives the plan from a mode's end settings.
    #[must_use]
    pub fn for_mode(mode: &TimerMode) -> Self {
        if mode.end_sound.is_silence() {
            return Self::Silence;
        }
        if mode.end_sound.builtin_tone() != Some(BuiltinTone::LoopAlarm) {
            return Self::Once(mode.end_sound.clone());
        }

        let insert = match &mode.end_insert {
            InsertVoice::None => InsertPlan::None,
            InsertVoice::Silent => InsertPlan::Silent,
            InsertVoice::Voice(id) if id.is_silence() => InsertPlan::Silent,
            InsertVoice::Voice(id) => InsertPlan::Voice {
                id: id.clone(),
                window: Duration::from_secs_f64(mode.end_insert_mute_seconds),
            },
        };
        Self::Loop {
            loop_seconds: mode.end_loop_seconds,
            insert,
        }
    }
}

// ============================================================================
// EndSequenceCoordinator
// ============================================================================

/// Runs end plans and cancels them.
pub struct EndSequenceCoordinator {
    player: Arc<dyn SoundPlayer>,
    generation: Arc<AtomicU64>,
    deadline: Option<Instant>,
    sequence: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
}

impl EndSequenceCoordinator {
    pub fn new(player: Arc<dyn SoundPlayer>) -> Self {
        Self {
            player,
            generation: Arc::new(AtomicU64::new(0)),
            deadline: None,
            sequence: None,
            watchdog: None,
        }
    }

    /// Returns the current generation token.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Returns the loop deadline, if one is armed.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true while a sequence step or the watchdog is pending.
    #[must_use]
    pub fn is_active(&self) -> bool {
        let pending = |h: &Option<JoinHandle<()>>| h.as_ref().is_some_and(|h| !h.is_finished());
        pending(&self.sequence) || pending(&self.watchdog)
    }

    /// Invalidates in-flight steps without touching the audio.
    pub fn invalidate(&mut self) -> u64 {
        if let Some(handle) = self.sequence.take() {
            handle.abort();
        }
        if let Some(handle) = self.watchdog.take() {
            handle.abort();
        }
        self.deadline = None;
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Invalidates in-flight steps, clears the deadline and silences the
    /// player before returning.
    pub fn cancel(&mut self) {
        let generation = self.invalidate();
        self.player.stop_all();
        debug!(generation, "End sequence cancelled");
    }

    /// Runs `plan`. Any previous plan is invalidated first.
    pub fn run(&mut self, plan: EndPlan) {
        let generation = self.invalidate();
        debug!(generation, ?plan, "End sequence started");

        match plan {
            EndPlan::Silence => {}
            EndPlan::Once(id) => {
                if let Err(e) = self.player.play_once(&id) {
                    warn!(sound = %id, "終了音を再生できません: {}", e);
                }
            }
            EndPlan::Loop {
                loop_seconds,
                insert,
            } => self.run_loop(generation, loop_seconds, insert),
        }
    }

    fn run_loop(&mut self, generation: u64, loop_seconds: u32, insert: InsertPlan) {
        let deadline = Instant::now() + Duration::from_secs(u64::from(loop_seconds));
        self.deadline = Some(deadline);

        let Ok(runtime) = Handle::try_current() else {
            warn!("非同期ランタイムがないため、終了シーケンスを簡略化します");
            if self.spawn_thread_watchdog(generation, Duration::from_secs(u64::from(loop_seconds)))
            {
                self.start_loop(None);
            }
            return;
        };

        self.watchdog = Some(runtime.spawn(watchdog(
            Arc::clone(&self.player),
            Arc::clone(&self.generation),
            generation,
            deadline,
        )));

        match insert {
            InsertPlan::None => self.start_loop(None),
            InsertPlan::Silent => {
                self.start_loop(None);
                if let Err(e) = self.player.play_once(&SoundId::builtin(BuiltinTone::TripleBeep)) {
                    debug!("Intro cue failed: {}", e);
                }
            }
            InsertPlan::Voice { id, window } => {
                // A residual sound would mask the insert.
                self.player.stop_all();
                self.sequence = Some(runtime.spawn(voice_sequence(
                    Arc::clone(&self.player),
                    Arc::clone(&self.generation),
                    generation,
                    deadline,
                    id,
                    window,
                )));
            }
        }
    }

    /// Stops all audio after `after` on a plain thread. Returns false (and
    /// the loop must not start) if the thread cannot be spawned.
    fn spawn_thread_watchdog(&self, generation: u64, after: Duration) -> bool {
        let player = Arc::clone(&self.player);
        let current = Arc::clone(&self.generation);
        let spawned = std::thread::Builder::new()
            .name("timerboard-watchdog".to_string())
            .spawn(move || {
                std::thread::sleep(after);
                if current.load(Ordering::SeqCst) == generation {
                    debug!(generation, "Loop deadline reached, stopping all sounds");
                    player.stop_all();
                }
            });
        match spawned {
            Ok(_) => true,
            Err(e) => {
                warn!("停止タイマーを起動できないため、アラームを鳴らしません: {}", e);
                false
            }
        }
    }

    fn start_loop(&self, fade_in: Option<Duration>) {
        if let Err(e) = self.player.play_loop(&SoundId::builtin(BuiltinTone::LoopAlarm), fade_in) {
            warn!("アラームを再生できません: {}", e);
        }
    }
}

impl Drop for EndSequenceCoordinator {
    fn drop(&mut self) {
        self.invalidate();
    }
}

impl std::fmt::Debug for EndSequenceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndSequenceCoordinator")
            .field("generation", &self.generation())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

async fn watchdog(
    player: Arc<dyn SoundPlayer>,
    current: Arc<AtomicU64>,
    generation: u64,
    deadline: Instant,
) {
    sleep_until(deadline).await;
    if current.load(Ordering::SeqCst) != generation {
        return;
    }
    debug!(generation, "Loop deadline reached, stopping all sounds");
    player.stop_all();
}

async fn voice_sequence(
    player: Arc<dyn SoundPlayer>,
    current: Arc<AtomicU64>,
    generation: u64,
    deadline: Instant,
    voice: SoundId,
    window: Duration,
) {
    let cancelled = || current.load(Ordering::SeqCst) != generation;

    if cancelled() {
        return;
    }
    play_for_duration(
        player.as_ref(),
        &SoundId::builtin(BuiltinTone::TripleBeep),
        INTRO_CUE_LENGTH,
    )
    .await;
    if cancelled() {
        return;
    }

    play_for_duration(player.as_ref(), &voice, window).await;
    if cancelled() {
        return;
    }

    if Instant::now() < deadline {
        debug!(generation, "Resuming alarm loop");
        if let Err(e) =
            player.play_loop(&SoundId::builtin(BuiltinTone::LoopAlarm), Some(RESUME_FADE_IN))
        {
            warn!("アラームを再開できません: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound::{MockSoundPlayer, PlayerCall};

    fn coordinator() -> (EndSequenceCoordinator, Arc<MockSoundPlayer>) {
        let player = Arc::new(MockSoundPlayer::new());
        (EndSequenceCoordinator::new(player.clone()), player)
    }

    fn voice_plan(loop_seconds: u32) -> EndPlan {
        EndPlan::Loop {
            loop_seconds,
            insert: InsertPlan::Voice {
                id: SoundId::new("voice"),
                window: Duration::from_secs(2),
            },
        }
    }

    mod plan_tests {
        use super::*;

        #[test]
        fn test_plan_for_default_mode() {
            let plan = EndPlan::for_mode(&TimerMode::default());
            assert_eq!(
                plan,
                EndPlan::Loop {
                    loop_seconds: 8,
                    insert: InsertPlan::None
                }
            );
        }

        #[test]
        fn test_plan_for_other_sounds() {
            let mode = TimerMode::default().with_end_sound("none");
            assert_eq!(EndPlan::for_mode(&mode), EndPlan::Silence);

            let mode = TimerMode::default().with_end_sound("ピッ");
            assert_eq!(
                EndPlan::for_mode(&mode),
                EndPlan::Once(SoundId::builtin(BuiltinTone::Beep))
            );
        }

        #[test]
        fn test_plan_inserts() {
            let mode = TimerMode::default().with_insert(InsertVoice::Silent, 2.0);
            assert!(matches!(
                EndPlan::for_mode(&mode),
                EndPlan::Loop {
                    insert: InsertPlan::Silent,
                    ..
                }
            ));

            let mode =
                TimerMode::default().with_insert(InsertVoice::Voice(SoundId::new("v")), 1.5);
            assert_eq!(
                EndPlan::for_mode(&mode),
                EndPlan::Loop {
                    loop_seconds: 8,
                    insert: InsertPlan::Voice {
                        id: SoundId::new("v"),
                        window: Duration::from_millis(1500)
                    }
                }
            );
        }
    }

    mod coordinator_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_loop_without_insert_stops_at_deadline() {
            let (mut coord, player) = coordinator();
            coord.run(EndPlan::Loop {
                loop_seconds: 5,
                insert: InsertPlan::None,
            });
            assert_eq!(player.loop_count(), 1);
            assert!(coord.deadline().is_some());

            tokio::time::sleep(Duration::from_millis(4900)).await;
            assert_eq!(player.stop_all_count(), 0);
            tokio::time::sleep(Duration::from_millis(200)).await;
            assert_eq!(player.stop_all_count(), 1);
            assert!(!player.is_looping());
        }

        #[tokio::test(start_paused = true)]
        async fn test_voice_sequence_order() {
            let (mut coord, player) = coordinator();
            coord.run(voice_plan(10));

            tokio::time::sleep(Duration::from_millis(3100)).await;
            let calls = player.calls();
            assert_eq!(
                calls,
                vec![
                    PlayerCall::StopAll,
                    PlayerCall::Bounded(SoundId::builtin(BuiltinTone::TripleBeep), INTRO_CUE_LENGTH),
                    PlayerCall::Bounded(SoundId::new("voice"), Duration::from_secs(2)),
                    PlayerCall::Loop {
                        id: SoundId::builtin(BuiltinTone::LoopAlarm),
                        fade_in: Some(RESUME_FADE_IN)
                    },
                ]
            );
        }

        #[tokio::test(start_paused = true)]
        async fn test_no_resume_after_deadline() {
            let (mut coord, player) = coordinator();
            coord.run(EndPlan::Loop {
                loop_seconds: 5,
                insert: InsertPlan::Voice {
                    id: SoundId::new("voice"),
                    window: Duration::from_secs(5),
                },
            });

            tokio::time::sleep(Duration::from_secs(10)).await;
            assert_eq!(player.loop_count(), 0);
        }

        #[tokio::test(start_paused = true)]
        async fn test_cancel_mid_sequence() {
            let (mut coord, player) = coordinator();
            coord.run(voice_plan(10));
            let before = coord.generation();

            tokio::time::sleep(Duration::from_millis(1500)).await;
            coord.cancel();
            assert!(coord.generation() > before);
            assert!(coord.deadline().is_none());
            let stops = player.stop_all_count();
            assert_eq!(stops, 2);

            tokio::time::sleep(Duration::from_secs(20)).await;
            assert_eq!(player.loop_count(), 0);
            assert_eq!(player.stop_all_count(), stops, "watchdog must not fire");
            assert!(!coord.is_active());
        }

        #[tokio::test(start_paused = true)]
        async fn test_silent_insert_keeps_loop() {
            let (mut coord, player) = coordinator();
            coord.run(EndPlan::Loop {
                loop_seconds: 8,
                insert: InsertPlan::Silent,
            });

            tokio::time::sleep(Duration::from_secs(3)).await;
            assert!(player.is_looping());
            assert_eq!(player.stop_all_count(), 0);
            assert_eq!(
                player.played_once(),
                vec![SoundId::builtin(BuiltinTone::TripleBeep)]
            );
        }

        #[tokio::test(start_paused = true)]
        async fn test_rerun_invalidates_previous_watchdog() {
            let (mut coord, player) = coordinator();
            coord.run(EndPlan::Loop {
                loop_seconds: 5,
                insert: InsertPlan::None,
            });
            tokio::time::sleep(Duration::from_secs(3)).await;
            coord.run(EndPlan::Loop {
                loop_seconds: 5,
                insert: InsertPlan::None,
            });

            tokio::time::sleep(Duration::from_millis(2500)).await;
            assert_eq!(player.stop_all_count(), 0);
            tokio::time::sleep(Duration::from_secs(3)).await;
            assert_eq!(player.stop_all_count(), 1);
        }

        #[test]
        fn test_without_runtime_loops_directly() {
            let (mut coord, player) = coordinator();
            coord.run(voice_plan(10));
            assert_eq!(player.loop_count(), 1);
        }

        #[test]
        fn test_without_runtime_deadline_still_stops_loop() {
            let (mut coord, player) = coordinator();
            coord.run(EndPlan::Loop {
                loop_seconds: 1,
                insert: InsertPlan::None,
            });
            assert!(player.is_looping());

            std::thread::sleep(Duration::from_millis(1500));
            assert!(!player.is_looping());
            assert_eq!(player.stop_all_count(), 1);
        }

        #[test]
        fn test_without_runtime_cancel_disarms_deadline() {
            let (mut coord, player) = coordinator();
            coord.run(EndPlan::Loop {
                loop_seconds: 1,
                insert: InsertPlan::None,
            });
            coord.cancel();
            assert_eq!(player.stop_all_count(), 1);

            std::thread::sleep(Duration::from_millis(1500));
            assert_eq!(player.stop_all_count(), 1);
        }

        #[tokio::test]
        async fn test_once_and_silence() {
            let (mut coord, player) = coordinator();
            coord.run(EndPlan::Silence);
            assert!(player.calls().is_empty());

            coord.run(EndPlan::Once(SoundId::new("chime")));
            assert_eq!(player.played_once(), vec![SoundId::new("chime")]);
            assert!(!coord.is_active());
        }
    }
}
