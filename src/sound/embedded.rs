//! Built-in tones.
//!
//! The three built-in sounds are synthesized in-process rather than shipped
//! as files, so they can never be missing. All buffers are mono f32 at
//! [`SAMPLE_RATE`].

use std::f32::consts::PI;
use std::time::Duration;

use super::id::BuiltinTone;

/// Sample rate of every synthesized buffer.
pub const SAMPLE_RATE: u32 = 44_100;

/// Pitch of the beep.
const BEEP_HZ: f32 = 1_000.0;
/// Length of the single beep.
const BEEP_MS: u64 = 120;
/// Length of each beep inside the triple beep.
const SHORT_BEEP_MS: u64 = 80;
/// Pause between the beeps of the triple beep.
const SHORT_GAP_MS: u64 = 70;
/// One period of the looping alarm.
pub const LOOP_PERIOD: Duration = Duration::from_secs(1);

/// Length of the keep-alive burst.
pub const KEEP_ALIVE_LENGTH: Duration = Duration::from_millis(60);
/// Amplitude of the keep-alive burst; low enough to be inaudible.
const KEEP_ALIVE_AMPLITUDE: f32 = 1.0e-4;

fn sample_count(duration: Duration) -> usize {
    (duration.as_secs_f64() * f64::from(SAMPLE_RATE)).round() as usize
}

/// A sine burst shaped by a Hann window, so it starts and ends without clicks.
fn hann_burst(freq: f32, ms: u64) -> Vec<f32> {
    let n = sample_count(Duration::from_millis(ms));
    let rate = SAMPLE_RATE as f32;
    let span = (n.max(2) - 1) as f32;
    (0..n)
        .map(|i| {
            let t = i as f32 / rate;
            let window = 0.5 * (1.0 - (2.0 * PI * i as f32 / span).cos());
            (2.0 * PI * freq * t).sin() * window
        })
        .collect()
}

fn pad_to(mut samples: Vec<f32>, duration: Duration) -> Vec<f32> {
    let n = sample_count(duration);
    if samples.len() < n {
        samples.resize(n, 0.0);
    }
    samples
}

fn triple_beep() -> Vec<f32> {
    let beep = hann_burst(BEEP_HZ, SHORT_BEEP_MS);
    let gap = vec![0.0; sample_count(Duration::from_millis(SHORT_GAP_MS))];
    let mut out = Vec::with_capacity(3 * (beep.len() + gap.len()));
    for i in 0..3 {
        out.extend_from_slice(&beep);
        if i < 2 {
            out.extend_from_slice(&gap);
        }
    }
    out
}

/// Returns the samples of `tone`.
///
/// For [`BuiltinTone::LoopAlarm`] this is one period; the player repeats it.
#[must_use]
pub fn tone_samples(tone: BuiltinTone) -> Vec<f32> {
    match tone {
        BuiltinTone::Beep => hann_burst(BEEP_HZ, BEEP_MS),
        BuiltinTone::TripleBeep => triple_beep(),
        BuiltinTone::LoopAlarm => pad_to(triple_beep(), LOOP_PERIOD),
    }
}

/// Returns the natural length of one play of `tone`.
#[must_use]
pub fn tone_duration(tone: BuiltinTone) -> Duration {
    let samples = tone_samples(tone).len() as f64;
    Duration::from_secs_f64(samples / f64::from(SAMPLE_RATE))
}

/// Returns a near-silent burst used to keep the output device awake.
#[must_use]
pub fn keep_alive_samples() -> Vec<f32> {
    hann_burst(BEEP_HZ, KEEP_ALIVE_LENGTH.as_millis() as u64)
        .into_iter()
        .map(|s| s * KEEP_ALIVE_AMPLITUDE)
        .collect()
}
