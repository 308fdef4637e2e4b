//! Microphone PCM preparation for the local recognizer.
//!
//! Raw device buffers arrive interleaved at the device rate.  Whisper wants
//! 16 kHz mono phrases, so each buffer is downmixed, resampled, and fed to a
//! [`PhraseCutter`] that closes a phrase after a pause in speech.
//!
//! ```text
//! device f32 (N ch, R Hz) ─▶ downmix ─▶ to_16k ─▶ PhraseCutter ─▶ Vec<f32> per phrase
//! ```

use std::time::Duration;

/// Whisper's input rate.
pub const TARGET_RATE: u32 = 16_000;

/// 30 ms at 16 kHz.
const FRAME: usize = 480;

/// Phrases shorter than half a second are dropped; whisper tends to invent
/// words for them.
pub const MIN_PHRASE_SAMPLES: usize = TARGET_RATE as usize / 2;

/// One whisper window (30 s).  Longer speech is cut without waiting for a
/// pause.
pub const MAX_PHRASE_SAMPLES: usize = TARGET_RATE as usize * 30;

/// RMS level above which a frame counts as speech.
pub const SPEECH_RMS: f32 = 0.01;

/// Average interleaved channels into one.
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    let n = usize::from(channels);
    match n {
        0 => Vec::new(),
        1 => samples.to_vec(),
        _ => samples
            .chunks_exact(n)
            .map(|frame| frame.iter().sum::<f32>() / n as f32)
            .collect(),
    }
}

/// Linear-interpolation resample from `rate` Hz to [`TARGET_RATE`].
pub fn to_16k(samples: &[f32], rate: u32) -> Vec<f32> {
    if rate == TARGET_RATE || rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let step = f64::from(rate) / f64::from(TARGET_RATE);
    let len = (samples.len() as f64 / step).ceil() as usize;
    let last = samples.len() - 1;

    (0..len)
        .map(|i| {
            let pos = i as f64 * step;
            let lo = (pos as usize).min(last);
            let hi = (lo + 1).min(last);
            let t = (pos - lo as f64) as f32;
            samples[lo] + (samples[hi] - samples[lo]) * t
        })
        .collect()
}

fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    (frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32).sqrt()
}

// ---------------------------------------------------------------------------
// PhraseCutter
// ---------------------------------------------------------------------------

/// Splits a 16 kHz mono stream into spoken phrases.
///
/// Leading silence is skipped, and a phrase closes once `pause` of
/// continuous silence follows speech.  The trailing silence is not part of
/// the returned phrase.
#[derive(Debug)]
pub struct PhraseCutter {
    threshold: f32,
    pause_samples: usize,
    buf: Vec<f32>,
    silent_run: usize,
}

impl PhraseCutter {
    pub fn new(threshold: f32, pause: Duration) -> Self {
        let pause_samples = (pause.as_secs_f64() * f64::from(TARGET_RATE)) as usize;
        Self {
            threshold,
            pause_samples: pause_samples.max(FRAME),
            buf: Vec::new(),
            silent_run: 0,
        }
    }

    /// Feed audio; returns every phrase that closed inside it.
    pub fn push(&mut self, audio: &[f32]) -> Vec<Vec<f32>> {
        let mut phrases = Vec::new();
        for frame in audio.chunks(FRAME) {
            let speech = rms(frame) >= self.threshold;
            if self.buf.is_empty() && !speech {
                continue;
            }

            self.buf.extend_from_slice(frame);
            if speech {
                self.silent_run = 0;
            } else {
                self.silent_run += frame.len();
            }

            if self.silent_run >= self.pause_samples || self.buf.len() >= MAX_PHRASE_SAMPLES {
                phrases.extend(self.cut());
            }
        }
        phrases
    }

    /// Close whatever is buffered (end of recording).
    pub fn flush(&mut self) -> Option<Vec<f32>> {
        self.cut()
    }

    fn cut(&mut self) -> Option<Vec<f32>> {
        let mut phrase = std::mem::take(&mut self.buf);
        let spoken = phrase.len().saturating_sub(self.silent_run);
        phrase.truncate(spoken);
        self.silent_run = 0;
        (phrase.len() >= MIN_PHRASE_SAMPLES).then_some(phrase)
    }
}
