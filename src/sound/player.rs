//! Sound player implementation using rodio.
//!
//! This module provides the `RodioSoundPlayer` which uses the rodio v0.20
//! audio library for cross-platform sound playback.
//!
//! The output stream is not `Send`, so it lives on a dedicated thread for the
//! lifetime of the player. That thread also keeps the device awake: after
//! [`KEEP_WARM_INTERVAL`] of total silence it plays a short inaudible burst.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use rodio::buffer::SamplesBuffer;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use tracing::{debug, warn};

use super::embedded::{keep_alive_samples, tone_samples, SAMPLE_RATE};
use super::error::SoundError;
use super::id::{BuiltinTone, SoundId};
use super::resolver::{PlayableSource, ResolvedSound, SoundResolver, FALLBACK_TONE};
use super::SoundPlayer;

/// Idle time after which the output device is nudged.
pub const KEEP_WARM_INTERVAL: Duration = Duration::from_secs(4);

type BoxedSource = Box<dyn Source<Item = f32> + Send>;

/// Activity shared between the player and its stream thread.
#[derive(Debug)]
struct Activity {
    looping: AtomicBool,
    last_play: Mutex<Instant>,
}

impl Activity {
    fn touch(&self) {
        *self.last_play.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn is_idle(&self) -> bool {
        !self.looping.load(Ordering::Relaxed)
            && self
                .last_play
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .elapsed()
                >= KEEP_WARM_INTERVAL
    }
}

/// How a decoded sound should be shaped before it reaches a sink.
#[derive(Debug, Clone, Copy)]
enum Shape {
    Once,
    Bounded(Duration),
    Loop(Option<Duration>),
}

/// Counters captured when a sound is requested.
///
/// A remote clip is attached only if no stop (and, for loops, no newer loop)
/// happened while it was being fetched.
#[derive(Debug, Clone, Copy)]
struct Ticket {
    stops: u64,
    loops: u64,
}

/// The sinks a player owns, shared with its fetch workers.
struct Outputs {
    /// Handle to the output stream for creating sinks.
    stream_handle: OutputStreamHandle,
    /// The single loop this player owns.
    loop_sink: Mutex<Option<Sink>>,
    /// One-shot and bounded sounds still playing.
    one_shots: Mutex<Vec<Sink>>,
    activity: Arc<Activity>,
    stops: AtomicU64,
    loops: AtomicU64,
}

impl Outputs {
    fn ticket(&self) -> Ticket {
        Ticket {
            stops: self.stops.load(Ordering::SeqCst),
            loops: self.loops.load(Ordering::SeqCst),
        }
    }

    fn is_current(&self, ticket: Ticket, shape: Shape) -> bool {
        ticket.stops == self.stops.load(Ordering::SeqCst)
            && (!matches!(shape, Shape::Loop(_))
                || ticket.loops == self.loops.load(Ordering::SeqCst))
    }

    /// Plays `source` on a new sink unless `ticket` went stale.
    fn attach(
        &self,
        id: &SoundId,
        source: BoxedSource,
        volume: f32,
        shape: Shape,
        ticket: Ticket,
    ) -> Result<(), SoundError> {
        let sink = Sink::try_new(&self.stream_handle)
            .map_err(|e| SoundError::StreamError(e.to_string()))?;
        sink.set_volume(volume);

        match shape {
            Shape::Loop(_) => {
                let mut slot = self.loop_sink.lock().unwrap_or_else(PoisonError::into_inner);
                if !self.is_current(ticket, shape) {
                    debug!(sound = %id, "Loop superseded before playback, dropped");
                    return Ok(());
                }
                sink.append(source);
                if let Some(previous) = slot.replace(sink) {
                    previous.stop();
                }
                self.activity.looping.store(true, Ordering::Relaxed);
                debug!(sound = %id, "Loop playback started");
            }
            Shape::Once | Shape::Bounded(_) => {
                let mut sinks = self.one_shots.lock().unwrap_or_else(PoisonError::into_inner);
                if !self.is_current(ticket, shape) {
                    debug!(sound = %id, "Sound stopped before playback, dropped");
                    return Ok(());
                }
                sink.append(source);
                sinks.retain(|s| !s.empty());
                sinks.push(sink);
                debug!(sound = %id, "Sound playback started");
            }
        }
        self.activity.touch();
        Ok(())
    }

    fn stop_loop(&self) {
        if let Some(sink) = self
            .loop_sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sink.stop();
        }
        self.activity.looping.store(false, Ordering::Relaxed);
    }

    fn stop_all(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.stop_loop();
        for sink in self
            .one_shots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            sink.stop();
        }
        self.activity.touch();
    }
}

/// A sound player that uses rodio for audio playback.
///
/// This player is thread-safe and can be shared across threads using `Arc`.
/// Sound playback is non-blocking; sounds continue playing in the background.
/// Remote library clips are fetched on a short-lived worker thread and start
/// once downloaded.
pub struct RodioSoundPlayer {
    outputs: Arc<Outputs>,
    /// Stops the stream thread when dropped or signalled.
    shutdown: Sender<()>,
    resolver: SoundResolver,
    activity: Arc<Activity>,
    /// Whether sound playback is disabled.
    disabled: AtomicBool,
}

impl RodioSoundPlayer {
    /// Creates a new sound player.
    ///
    /// # Arguments
    ///
    /// * `resolver` - Resolves sound ids against the sound library.
    /// * `disabled` - If true, all sound playback will be silently skipped.
    ///
    /// # Errors
    ///
    /// Returns `SoundError::DeviceNotAvailable` if no audio output device
    /// is available.
    pub fn new(resolver: SoundResolver, disabled: bool) -> Result<Self, SoundError> {
        let activity = Arc::new(Activity {
            looping: AtomicBool::new(false),
            last_play: Mutex::new(Instant::now()),
        });
        let (stream_handle, shutdown) = spawn_stream_thread(Arc::clone(&activity))?;

        debug!("Audio output stream initialized");

        Ok(Self {
            outputs: Arc::new(Outputs {
                stream_handle,
                loop_sink: Mutex::new(None),
                one_shots: Mutex::new(Vec::new()),
                activity: Arc::clone(&activity),
                stops: AtomicU64::new(0),
                loops: AtomicU64::new(0),
            }),
            shutdown,
            resolver,
            activity,
            disabled: AtomicBool::new(disabled),
        })
    }

    fn start(&self, id: &SoundId, shape: Shape) -> Result<(), SoundError> {
        if self.disabled.load(Ordering::Relaxed) {
            debug!("Sound playback disabled, skipping");
            return Ok(());
        }

        if matches!(shape, Shape::Loop(_)) {
            // A new loop replaces the old one right away, even if its own
            // clip still has to be fetched.
            self.outputs.loops.fetch_add(1, Ordering::SeqCst);
            self.outputs.stop_loop();
        }
        let ticket = self.outputs.ticket();

        let resolved = self.resolver.resolve(id);
        let volume = resolved.volume();
        if let ResolvedSound::Library { source, .. } = &resolved {
            if source.is_remote() {
                let outputs = Arc::clone(&self.outputs);
                spawn_fetch(outputs, id.clone(), source.clone(), volume, shape, ticket);
                return Ok(());
            }
        }

        let source = match source_for(&resolved, shape) {
            Ok(Some(source)) => source,
            Ok(None) => return Ok(()),
            Err(e) if e.should_fall_back() => {
                warn!(sound = %id, "音源を再生できません。代替音を使用します: {}", e);
                tone_source(FALLBACK_TONE, shape)
            }
            Err(e) => return Err(e),
        };
        self.outputs.attach(id, source, volume, shape, ticket)
    }
}

impl SoundPlayer for RodioSoundPlayer {
    fn play_once(&self, id: &SoundId) -> Result<(), SoundError> {
        self.start(id, Shape::Once)
    }

    fn play_bounded(&self, id: &SoundId, duration: Duration) -> Result<(), SoundError> {
        self.start(id, Shape::Bounded(duration))
    }

    fn play_loop(&self, id: &SoundId, fade_in: Option<Duration>) -> Result<(), SoundError> {
        self.start(id, Shape::Loop(fade_in))
    }

    fn stop_all(&self) {
        self.outputs.stop_all();
        debug!("All sounds stopped");
    }

    /// Always true once the player exists; the stream is opened in `new`.
    fn is_available(&self) -> bool {
        true
    }

    fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    fn enable(&self) {
        self.disabled.store(false, Ordering::Relaxed);
        debug!("Sound playback enabled");
    }

    fn disable(&self) {
        self.disabled.store(true, Ordering::Relaxed);
        self.stop_all();
        debug!("Sound playback disabled");
    }
}

impl Drop for RodioSoundPlayer {
    fn drop(&mut self) {
        self.stop_all();
        let _ = self.shutdown.send(());
    }
}

impl std::fmt::Debug for RodioSoundPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RodioSoundPlayer")
            .field("disabled", &self.disabled.load(Ordering::Relaxed))
            .field("looping", &self.activity.looping.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Stream thread
// ============================================================================

/// Opens the default output on its own thread and hands back a handle.
fn spawn_stream_thread(
    activity: Arc<Activity>,
) -> Result<(OutputStreamHandle, Sender<()>), SoundError> {
    let (ready_tx, ready_rx) = bounded::<Result<OutputStreamHandle, String>>(1);
    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

    thread::Builder::new()
        .name("timerboard-audio".to_string())
        .spawn(move || {
            let (stream, handle) = match OutputStream::try_default() {
                Ok(pair) => pair,
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            if ready_tx.send(Ok(handle.clone())).is_err() {
                return;
            }
            loop {
                match shutdown_rx.recv_timeout(KEEP_WARM_INTERVAL) {
                    Err(RecvTimeoutError::Timeout) => {
                        if activity.is_idle() {
                            let pulse = SamplesBuffer::new(1, SAMPLE_RATE, keep_alive_samples());
                            if let Err(e) = handle.play_raw(pulse) {
                                debug!("Keep-alive pulse failed: {}", e);
                            }
                            activity.touch();
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            drop(stream);
            debug!("Audio output stream closed");
        })
        .map_err(|e| SoundError::DeviceNotAvailable(e.to_string()))?;

    let handle = ready_rx
        .recv()
        .map_err(|e| SoundError::DeviceNotAvailable(e.to_string()))?
        .map_err(SoundError::DeviceNotAvailable)?;
    Ok((handle, shutdown_tx))
}

// ============================================================================
// Sources
// ============================================================================

fn shaped(source: BoxedSource, shape: Shape) -> BoxedSource {
    match shape {
        Shape::Once => source,
        Shape::Bounded(duration) => Box::new(source.take_duration(duration)),
        Shape::Loop(fade_in) => {
            let looped = source.repeat_infinite();
            match fade_in {
                Some(fade) => Box::new(looped.fade_in(fade)),
                None => Box::new(looped),
            }
        }
    }
}

fn tone_source(tone: BuiltinTone, shape: Shape) -> BoxedSource {
    let buffer: BoxedSource = Box::new(SamplesBuffer::new(1, SAMPLE_RATE, tone_samples(tone)));
    match (tone, shape) {
        // A bounded loop alarm keeps cycling until the bound.
        (BuiltinTone::LoopAlarm, Shape::Bounded(duration)) => {
            Box::new(buffer.repeat_infinite().take_duration(duration))
        }
        _ => shaped(buffer, shape),
    }
}

fn clip_source(source: &PlayableSource, shape: Shape) -> Result<BoxedSource, SoundError> {
    let bytes = source.load()?;
    let decoder =
        Decoder::new(Cursor::new(bytes)).map_err(|e| SoundError::DecodeError(e.to_string()))?;
    Ok(shaped(Box::new(decoder.convert_samples::<f32>()), shape))
}

fn source_for(resolved: &ResolvedSound, shape: Shape) -> Result<Option<BoxedSource>, SoundError> {
    match resolved {
        ResolvedSound::Silence => Ok(None),
        ResolvedSound::Builtin { tone, .. } => Ok(Some(tone_source(*tone, shape))),
        ResolvedSound::Fallback { .. } => Ok(Some(tone_source(FALLBACK_TONE, shape))),
        ResolvedSound::Library { source, .. } => clip_source(source, shape).map(Some),
    }
}

/// Fetches a remote clip off the caller's thread, then plays it.
///
/// A failed fetch plays the fallback tone instead, unless the request was
/// stopped in the meantime.
fn spawn_fetch(
    outputs: Arc<Outputs>,
    id: SoundId,
    source: PlayableSource,
    volume: f32,
    shape: Shape,
    ticket: Ticket,
) {
    let spawned = thread::Builder::new()
        .name("timerboard-fetch".to_string())
        .spawn(move || {
            let clip = clip_source(&source, shape).unwrap_or_else(|e| {
                warn!(sound = %id, "音源を再生できません。代替音を使用します: {}", e);
                tone_source(FALLBACK_TONE, shape)
            });
            if let Err(e) = outputs.attach(&id, clip, volume, shape, ticket) {
                warn!(sound = %id, "サウンドの再生に失敗しました: {}", e);
            }
        });
    if let Err(e) = spawned {
        warn!("音声取得スレッドを起動できません: {}", e);
    }
}

/// Creates a sound player, returning None if audio is unavailable.
///
/// This is a convenience function for optional sound support.
/// If audio initialization fails, a warning is logged and None is returned.
#[must_use]
pub fn try_create_player(resolver: SoundResolver, disabled: bool) -> Option<Arc<RodioSoundPlayer>> {
    match RodioSoundPlayer::new(resolver, disabled) {
        Ok(player) => Some(Arc::new(player)),
        Err(e) => {
            warn!("オーディオを利用できません。サウンドを無効にします: {}", e);
            None
        }
    }
}
