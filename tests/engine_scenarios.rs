//! Scenario tests for the countdown engine and its end sequence.
//!
//! All tests run on a paused clock, so multi-second scenarios complete
//! instantly and deterministically.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};

use timerboard::engine::{
    run_ticker, CountdownEngine, FireSource, TimerEvent, TimerPhase, RESUME_FADE_IN,
};
use timerboard::sound::{BuiltinTone, MockSoundPlayer, PlayerCall, SoundId};
use timerboard::store::{KeyValueStore, MemoryStore, SlotStore};
use timerboard::types::{
    BoardSettings, ButtonRow, CardBackground, ColorTag, Cue, CueSlot, InsertVoice,
    NumericEntryConfig, NotifyRow, ReturnMode, SlotId, TimerCardConfig, TimerMode,
};

// ============================================================================
// Test Helpers
// ============================================================================

fn beep() -> SoundId {
    SoundId::builtin(BuiltinTone::Beep)
}

fn beep3() -> SoundId {
    SoundId::builtin(BuiltinTone::TripleBeep)
}

fn alarm() -> SoundId {
    SoundId::builtin(BuiltinTone::LoopAlarm)
}

/// A card whose mode A counts down `seconds`.
fn card(seconds: u32) -> TimerCardConfig {
    TimerCardConfig::default().with_mode(0, TimerMode::default_for(0).with_duration(0, seconds))
}

fn create_engine(
    config: TimerCardConfig,
    board: BoardSettings,
) -> (
    CountdownEngine,
    Arc<MockSoundPlayer>,
    mpsc::UnboundedReceiver<TimerEvent>,
) {
    let player = Arc::new(MockSoundPlayer::new());
    let (tx, rx) = mpsc::unbounded_channel();
    let engine = CountdownEngine::new(config, board, player.clone()).with_events(tx);
    (engine, player, rx)
}

/// Starts `engine` and spawns a ticker driving it.
async fn start_with_ticker(
    mut engine: CountdownEngine,
) -> (Arc<Mutex<CountdownEngine>>, watch::Sender<bool>, JoinHandle<()>) {
    engine.start().unwrap();
    let engine = Arc::new(Mutex::new(engine));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(run_ticker(Arc::clone(&engine), shutdown_rx));
    (engine, shutdown_tx, handle)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<TimerEvent>) -> Vec<TimerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn notified_thresholds(events: &[TimerEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|e| match e {
            TimerEvent::Notified { threshold, .. } => Some(*threshold),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Countdown to the end loop
// ============================================================================

mod end_loop_scenarios {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn five_second_countdown_loops_then_watchdog_stops_once() {
        let config = TimerCardConfig::default().with_mode(
            0,
            TimerMode::default_for(0)
                .with_duration(0, 5)
                .with_end_loop_seconds(5),
        );
        let board = BoardSettings::default().with_auto_reset_seconds(60);
        let (engine, player, mut rx) = create_engine(config, board);
        let (engine, shutdown, ticker) = start_with_ticker(engine).await;

        sleep(Duration::from_millis(5_500)).await;
        assert_eq!(engine.lock().await.phase(), TimerPhase::Finished);
        assert!(player.is_looping());
        assert_eq!(player.loop_count(), 1);
        assert_eq!(player.stop_all_count(), 0);

        let events = drain(&mut rx);
        assert_eq!(events.first(), Some(&TimerEvent::Started { mode: 0, remaining: 5 }));
        let ticks: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                TimerEvent::Tick { remaining } => Some(*remaining),
                _ => None,
            })
            .collect();
        assert_eq!(ticks, vec![4, 3, 2, 1, 0]);
        assert_eq!(events.last(), Some(&TimerEvent::Finished { mode: 0 }));

        // Still ringing just before the loop deadline
        sleep(Duration::from_millis(4_000)).await;
        assert!(player.is_looping());
        assert_eq!(player.stop_all_count(), 0);

        sleep(Duration::from_millis(1_000)).await;
        assert!(!player.is_looping());
        assert_eq!(player.stop_all_count(), 1);
        assert_eq!(engine.lock().await.phase(), TimerPhase::Finished);

        shutdown.send(true).unwrap();
        ticker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn start_sound_and_end_loop_calls() {
        let (mut engine, player, _rx) = create_engine(card(2), BoardSettings::default());
        engine.start().unwrap();
        assert_eq!(player.played_once(), vec![beep()]);

        player.clear_calls();
        assert!(engine.advance(2));
        assert_eq!(
            player.calls(),
            vec![PlayerCall::Loop {
                id: alarm(),
                fade_in: None
            }]
        );
        assert!(engine.coordinator().deadline().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn non_loop_end_sound_plays_once_without_deadline() {
        let config = TimerCardConfig::default().with_mode(
            0,
            TimerMode::default_for(0)
                .with_duration(0, 1)
                .with_end_sound(beep3()),
        );
        let (mut engine, player, _rx) = create_engine(config, BoardSettings::default());
        engine.start().unwrap();
        player.clear_calls();

        engine.tick();
        assert_eq!(player.calls(), vec![PlayerCall::Once(beep3())]);
        assert!(engine.coordinator().deadline().is_none());
    }
}

// ============================================================================
// Notifications
// ============================================================================

mod notification_scenarios {
    use super::*;

    fn card_with_notify() -> TimerCardConfig {
        TimerCardConfig::default().with_mode(
            0,
            TimerMode::default_for(0)
                .with_duration(0, 5)
                .with_notify_row(NotifyRow {
                    first: Cue::new(0, 3, beep3()),
                    second: Cue::new(0, 1, beep()),
                    color: Some(ColorTag::Green),
                }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn notify_at_three_seconds_fires_once_and_colors_card() {
        let (mut engine, player, mut rx) = create_engine(card_with_notify(), BoardSettings::default());
        engine.start().unwrap();
        player.clear_calls();

        engine.tick();
        assert!(player.played_once().is_empty());
        assert_eq!(engine.background(), CardBackground::Running);

        engine.tick();
        assert_eq!(player.played_once(), vec![beep3()]);
        assert_eq!(engine.background(), CardBackground::Notify(ColorTag::Green));

        engine.tick();
        assert_eq!(player.played_once(), vec![beep3()]);

        engine.tick();
        assert_eq!(player.played_once(), vec![beep3(), beep()]);

        let events = drain(&mut rx);
        assert_eq!(notified_thresholds(&events), vec![3, 1]);
        assert!(events.contains(&TimerEvent::Notified {
            source: FireSource::Notify(0),
            slot: CueSlot::First,
            threshold: 3,
            sound: beep3(),
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn late_deadline_catches_up_and_still_fires_skipped_threshold() {
        let (mut engine, player, mut rx) = create_engine(card_with_notify(), BoardSettings::default());
        let started = Instant::now();
        engine.start().unwrap();
        player.clear_calls();

        // Woken 2.5 seconds late for the first step
        engine.on_deadline(started + Duration::from_millis(3_500));

        assert_eq!(engine.remaining(), 2);
        assert_eq!(player.played_once(), vec![beep3()]);
        assert_eq!(engine.next_deadline(), Some(started + Duration::from_secs(4)));

        let events = drain(&mut rx);
        assert_eq!(notified_thresholds(&events), vec![3]);
        assert!(events.contains(&TimerEvent::Tick { remaining: 2 }));
    }

    #[tokio::test(start_paused = true)]
    async fn early_deadline_is_ignored() {
        let (mut engine, _player, _rx) = create_engine(card_with_notify(), BoardSettings::default());
        let started = Instant::now();
        engine.start().unwrap();

        engine.on_deadline(started + Duration::from_millis(900));
        assert_eq!(engine.remaining(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn button_rows_fire_only_while_toggled_on() {
        let config = TimerCardConfig::default().with_mode(
            0,
            TimerMode::default_for(0)
                .with_duration(0, 10)
                .with_button_row(ButtonRow {
                    first: Cue::new(0, 5, beep3()),
                    second: Cue::new(0, 2, beep()),
                    label: "休憩".to_string(),
                }),
        );
        let (mut engine, player, _rx) = create_engine(config, BoardSettings::default());

        assert!(engine.toggle_button_row(0).unwrap());
        engine.start().unwrap();
        player.clear_calls();

        engine.advance(5);
        assert_eq!(player.played_once(), vec![beep3()]);

        // Switched off before the second cue
        assert!(!engine.toggle_button_row(0).unwrap());
        engine.advance(3);
        assert_eq!(player.played_once(), vec![beep3()]);

        engine.reset();
        assert!(!engine.is_button_on(0));

        // A fresh run re-arms the row once toggled again
        assert!(engine.toggle_button_row(0).unwrap());
        engine.start().unwrap();
        player.clear_calls();
        engine.advance(5);
        assert_eq!(player.played_once(), vec![beep3()]);
    }
}

// ============================================================================
// End sequence
// ============================================================================

mod end_sequence_scenarios {
    use super::*;

    fn card_with_insert(insert: InsertVoice) -> TimerCardConfig {
        TimerCardConfig::default().with_mode(
            0,
            TimerMode::default_for(0)
                .with_duration(0, 3)
                .with_end_loop_seconds(10)
                .with_insert(insert, 2.0),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn voice_insert_runs_cue_voice_then_resumes_loop() {
        let voice = SoundId::new("chime");
        let (mut engine, player, _rx) = create_engine(
            card_with_insert(InsertVoice::Voice(voice.clone())),
            BoardSettings::default(),
        );
        engine.start().unwrap();
        player.clear_calls();
        engine.advance(3);

        sleep(Duration::from_millis(3_500)).await;
        assert_eq!(
            player.calls(),
            vec![
                PlayerCall::StopAll,
                PlayerCall::Bounded(beep3(), Duration::from_secs(1)),
                PlayerCall::Bounded(voice, Duration::from_secs(2)),
                PlayerCall::Loop {
                    id: alarm(),
                    fade_in: Some(RESUME_FADE_IN)
                },
            ]
        );
        assert!(player.is_looping());

        // Loop deadline is ten seconds after the finish
        sleep(Duration::from_secs(7)).await;
        assert!(!player.is_looping());
        assert_eq!(player.stop_all_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_during_insert_produces_no_further_sound() {
        let (mut engine, player, _rx) = create_engine(
            card_with_insert(InsertVoice::Voice(SoundId::new("chime"))),
            BoardSettings::default(),
        );
        engine.start().unwrap();
        engine.advance(3);
        let generation = engine.coordinator().generation();

        sleep(Duration::from_millis(500)).await;
        engine.reset();
        assert!(engine.coordinator().generation() > generation);
        assert!(engine.coordinator().deadline().is_none());
        assert!(!player.is_looping());

        player.clear_calls();
        sleep(Duration::from_secs(30)).await;
        assert!(player.calls().is_empty());
        assert_eq!(engine.phase(), TimerPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_insert_keeps_loop_and_plays_intro_cue() {
        let (mut engine, player, _rx) =
            create_engine(card_with_insert(InsertVoice::Silent), BoardSettings::default());
        engine.start().unwrap();
        player.clear_calls();
        engine.advance(3);

        assert_eq!(
            player.calls(),
            vec![
                PlayerCall::Loop {
                    id: alarm(),
                    fade_in: None
                },
                PlayerCall::Once(beep3()),
            ]
        );

        sleep(Duration::from_secs(5)).await;
        assert!(player.is_looping());
        assert_eq!(player.stop_all_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_reset_invalidates_old_watchdog() {
        let (mut engine, player, _rx) =
            create_engine(card_with_insert(InsertVoice::None), BoardSettings::default());
        engine.start().unwrap();
        engine.advance(3);
        engine.reset();

        sleep(Duration::from_secs(2)).await;
        engine.start().unwrap();
        engine.advance(3);
        let stops = player.stop_all_count();

        // The first loop's deadline passes while the second one still rings
        sleep(Duration::from_millis(8_500)).await;
        assert!(player.is_looping());
        assert_eq!(player.stop_all_count(), stops);

        sleep(Duration::from_secs(2)).await;
        assert!(!player.is_looping());
        assert_eq!(player.stop_all_count(), stops + 1);
    }
}

// ============================================================================
// Reset policies
// ============================================================================

mod reset_scenarios {
    use super::*;

    fn two_mode_card(return_mode: ReturnMode) -> TimerCardConfig {
        TimerCardConfig::default()
            .with_mode(0, TimerMode::default_for(0).with_duration(0, 3))
            .with_mode(1, TimerMode::default_for(1).with_duration(0, 5))
            .with_return_mode(return_mode)
    }

    #[tokio::test(start_paused = true)]
    async fn last_return_mode_restores_mode_of_the_run() {
        let (mut engine, _player, mut rx) =
            create_engine(two_mode_card(ReturnMode::Last), BoardSettings::default());
        engine.choose_mode(1).unwrap();
        engine.start().unwrap();
        engine.advance(5);
        assert!(engine.is_finished());

        engine.reset();
        assert_eq!(engine.active_mode_index(), 1);
        assert_eq!(engine.remaining(), 5);
        assert_eq!(
            drain(&mut rx).last(),
            Some(&TimerEvent::Reset {
                mode: 1,
                remaining: 5,
                automatic: false
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_return_mode_applies_only_after_finish() {
        let (mut engine, _player, _rx) =
            create_engine(two_mode_card(ReturnMode::Fixed(0)), BoardSettings::default());
        engine.choose_mode(1).unwrap();
        engine.start().unwrap();
        engine.reset();
        assert_eq!(engine.active_mode_index(), 1);

        engine.start().unwrap();
        engine.advance(5);
        engine.reset();
        assert_eq!(engine.active_mode_index(), 0);
        assert_eq!(engine.remaining(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_card_resets_itself_after_board_delay() {
        let board = BoardSettings::default().with_auto_reset_seconds(5);
        let (engine, player, mut rx) = create_engine(card(2), board);
        let (engine, shutdown, ticker) = start_with_ticker(engine).await;

        sleep(Duration::from_millis(2_500)).await;
        assert!(engine.lock().await.is_finished());

        sleep(Duration::from_secs(4)).await;
        assert!(engine.lock().await.is_finished());

        sleep(Duration::from_secs(1)).await;
        {
            let engine = engine.lock().await;
            assert_eq!(engine.phase(), TimerPhase::Idle);
            assert_eq!(engine.remaining(), 2);
        }
        assert!(!player.is_looping());
        assert_eq!(
            drain(&mut rx).last(),
            Some(&TimerEvent::Reset {
                mode: 0,
                remaining: 2,
                automatic: true
            })
        );

        shutdown.send(true).unwrap();
        ticker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn card_reset_delay_overrides_board() {
        let mut config = card(1);
        config.reset_seconds = Some(8);
        let board = BoardSettings::default().with_auto_reset_seconds(5);
        let (engine, _player, _rx) = create_engine(config, board);
        let (engine, shutdown, ticker) = start_with_ticker(engine).await;

        sleep(Duration::from_millis(7_500)).await;
        assert!(engine.lock().await.is_finished());

        sleep(Duration::from_secs(2)).await;
        assert_eq!(engine.lock().await.phase(), TimerPhase::Idle);

        shutdown.send(true).unwrap();
        ticker.await.unwrap();
    }
}

// ============================================================================
// Persistence
// ============================================================================

mod persistence_scenarios {
    use super::*;

    fn slot_store(store: &Arc<MemoryStore>, slot: &str) -> SlotStore {
        let store: Arc<dyn KeyValueStore> = store.clone();
        SlotStore::new(store, SlotId::new(slot))
    }

    #[tokio::test(start_paused = true)]
    async fn numeric_entry_930_counts_nine_thirty_and_is_retained() {
        let memory = Arc::new(MemoryStore::new());
        let config = TimerCardConfig::default().with_numeric_entry(NumericEntryConfig {
            enabled: true,
            keep_last: true,
        });
        slot_store(&memory, "1").save_config(&config).unwrap();

        let player = Arc::new(MockSoundPlayer::new());
        let mut engine =
            CountdownEngine::load(slot_store(&memory, "1"), BoardSettings::default(), player.clone());
        for digit in "930".chars() {
            engine.push_digit(digit).unwrap();
        }
        assert_eq!(engine.remaining(), 570);

        engine.start().unwrap();
        assert_eq!(engine.remaining(), 570);
        assert_eq!(engine.numeric_buffer(), "");
        assert_eq!(slot_store(&memory, "1").load_numeric_retained(), 570);

        engine.reset();
        assert_eq!(engine.remaining(), 570);

        let reloaded =
            CountdownEngine::load(slot_store(&memory, "1"), BoardSettings::default(), player);
        assert_eq!(reloaded.remaining(), 570);
    }

    #[tokio::test(start_paused = true)]
    async fn saved_config_and_last_mode_survive_reload() {
        let memory = Arc::new(MemoryStore::new());
        let config = TimerCardConfig::default()
            .with_mode(0, TimerMode::default_for(0).with_duration(1, 30))
            .with_mode(2, TimerMode::default_for(2).with_duration(0, 45));
        slot_store(&memory, "2").save_config(&config).unwrap();
        assert_eq!(slot_store(&memory, "2").load_config(), config);

        let player = Arc::new(MockSoundPlayer::new());
        let mut engine =
            CountdownEngine::load(slot_store(&memory, "2"), BoardSettings::default(), player.clone());
        assert_eq!(engine.remaining(), 90);
        engine.choose_mode(2).unwrap();

        let reloaded =
            CountdownEngine::load(slot_store(&memory, "2"), BoardSettings::default(), player);
        assert_eq!(reloaded.active_mode_index(), 2);
        assert_eq!(reloaded.remaining(), 45);
    }

    #[tokio::test(start_paused = true)]
    async fn slots_do_not_share_state() {
        let memory = Arc::new(MemoryStore::new());
        slot_store(&memory, "1")
            .save_config(&card(10))
            .unwrap();

        let player = Arc::new(MockSoundPlayer::new());
        let first = CountdownEngine::load(slot_store(&memory, "1"), BoardSettings::default(), player.clone());
        let second = CountdownEngine::load(slot_store(&memory, "2"), BoardSettings::default(), player);
        assert_eq!(first.remaining(), 10);
        assert_eq!(second.remaining(), 0);
    }
}
