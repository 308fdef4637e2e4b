//! On-device dictation: microphone capture via `cpal`, transcription via
//! `whisper-rs`.
//!
//! ```text
//! start()
//!   └─▶ spawn "voice-capture" thread ──┐ owns cpal::Stream (not Send)
//!        ◀── ready / device error ─────┤
//!                                      │ loop {
//!                                      │   chunk ─▶ downmix ─▶ to_16k ─▶ PhraseCutter
//!                                      │   phrase ─▶ whisper ─▶ Result{final}
//!                                      │   stop flag? break
//!                                      │ }
//!                                      │ drop stream, flush tail ─▶ Result{final}
//!                                      └─▶ End
//! ```
//!
//! `stop` only raises the flag; the phrase being spoken is still transcribed
//! and delivered before `End`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::config::VoiceConfig;

use super::pcm::{self, PhraseCutter};
use super::recognizer::{RecognitionEvent, RecognizerError, SpeechRecognizer};

const POLL: Duration = Duration::from_millis(100);

/// One device buffer as delivered by the cpal callback.
struct Chunk {
    samples: Vec<f32>,
    rate: u32,
    channels: u16,
}

/// Whisper-backed [`SpeechRecognizer`] using the default input device.
pub struct LocalRecognizer {
    ctx: Arc<WhisperContext>,
    threads: i32,
    // Stop flag of the current run.
    run: Mutex<Option<Arc<AtomicBool>>>,
}

impl LocalRecognizer {
    /// Load the GGML model at `model`.
    pub fn load(model: &Path) -> Result<Self, RecognizerError> {
        if !model.exists() {
            return Err(RecognizerError::Model(format!(
                "{} does not exist",
                model.display()
            )));
        }
        let path = model.to_str().ok_or_else(|| {
            RecognizerError::Model(format!("non-UTF-8 model path: {}", model.display()))
        })?;

        let ctx = WhisperContext::new_with_params(path, WhisperContextParameters::default())
            .map_err(|e| RecognizerError::Model(e.to_string()))?;
        let threads = thread::available_parallelism()
            .map(|n| n.get().min(8) as i32)
            .unwrap_or(4);

        log::info!("voice: whisper model loaded from {}", model.display());
        Ok(Self {
            ctx: Arc::new(ctx),
            threads,
            run: Mutex::new(None),
        })
    }
}

impl SpeechRecognizer for LocalRecognizer {
    /// Opens the microphone before returning, so device errors surface
    /// here rather than as a later `Error` event.
    fn start(
        &self,
        config: &VoiceConfig,
    ) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>, RecognizerError> {
        let (events, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let stop = Arc::new(AtomicBool::new(false));

        let job = CaptureJob {
            ctx: Arc::clone(&self.ctx),
            threads: self.threads,
            language: config.whisper_language().map(str::to_owned),
            pause: config.phrase_pause(),
            stop: Arc::clone(&stop),
            events,
        };
        thread::Builder::new()
            .name("voice-capture".into())
            .spawn(move || job.run(ready_tx))
            .map_err(|e| RecognizerError::Start(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(RecognizerError::Start(e)),
            Err(_) => return Err(RecognizerError::Start("capture thread exited".into())),
        }

        let previous = self
            .run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(stop);
        if let Some(previous) = previous {
            previous.store(true, Ordering::SeqCst);
        }
        Ok(rx)
    }

    fn stop(&self) {
        if let Some(stop) = self
            .run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            stop.store(true, Ordering::SeqCst);
        }
    }
}

// ---------------------------------------------------------------------------
// Capture thread
// ---------------------------------------------------------------------------

struct CaptureJob {
    ctx: Arc<WhisperContext>,
    threads: i32,
    language: Option<String>,
    pause: Duration,
    stop: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<RecognitionEvent>,
}

impl CaptureJob {
    fn run(self, ready: std_mpsc::SyncSender<Result<(), String>>) {
        let (chunk_tx, chunks) = std_mpsc::channel();
        let stream = match open_input(chunk_tx) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        let _ = ready.send(Ok(()));
        log::debug!("voice: microphone open");

        let mut cutter = PhraseCutter::new(pcm::SPEECH_RMS, self.pause);
        let mut spoken = false;

        while !self.stop.load(Ordering::SeqCst) {
            match chunks.recv_timeout(POLL) {
                Ok(chunk) => {
                    for phrase in cutter.push(&prepare(&chunk)) {
                        self.deliver(&phrase, &mut spoken);
                    }
                }
                Err(std_mpsc::RecvTimeoutError::Timeout) => {}
                Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
            }
            if self.events.is_closed() {
                return;
            }
        }

        drop(stream);
        for chunk in chunks.try_iter() {
            for phrase in cutter.push(&prepare(&chunk)) {
                self.deliver(&phrase, &mut spoken);
            }
        }
        if let Some(tail) = cutter.flush() {
            self.deliver(&tail, &mut spoken);
        }
        let _ = self.events.send(RecognitionEvent::End);
        log::debug!("voice: microphone closed");
    }

    fn deliver(&self, phrase: &[f32], spoken: &mut bool) {
        match transcribe(&self.ctx, self.threads, self.language.as_deref(), phrase) {
            Ok(text) if text.is_empty() => {}
            Ok(text) => {
                let text = if *spoken { format!(" {text}") } else { text };
                *spoken = true;
                let _ = self.events.send(RecognitionEvent::Result {
                    text,
                    is_final: true,
                });
            }
            Err(e) => {
                log::warn!("voice: transcription failed: {e}");
                let _ = self.events.send(RecognitionEvent::Error(e));
            }
        }
    }
}

fn prepare(chunk: &Chunk) -> Vec<f32> {
    pcm::to_16k(&pcm::downmix(&chunk.samples, chunk.channels), chunk.rate)
}

fn open_input(tx: std_mpsc::Sender<Chunk>) -> Result<cpal::Stream, String> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| "no microphone found".to_string())?;
    let supported = device.default_input_config().map_err(|e| e.to_string())?;
    let rate = supported.sample_rate().0;
    let channels = supported.channels();
    let config: cpal::StreamConfig = supported.into();

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = tx.send(Chunk {
                    samples: data.to_vec(),
                    rate,
                    channels,
                });
            },
            |err: cpal::StreamError| log::error!("voice: input stream error: {err}"),
            None,
        )
        .map_err(|e| e.to_string())?;
    stream.play().map_err(|e| e.to_string())?;
    Ok(stream)
}

fn transcribe(
    ctx: &WhisperContext,
    threads: i32,
    language: Option<&str>,
    audio: &[f32],
) -> Result<String, String> {
    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
    params.set_language(language);
    params.set_n_threads(threads);
    params.set_print_progress(false);
    params.set_print_realtime(false);

    let mut state = ctx.create_state().map_err(|e| e.to_string())?;
    state.full(params, audio).map_err(|e| e.to_string())?;

    let segments = state.full_n_segments().map_err(|e| e.to_string())?;
    let mut text = String::new();
    for i in 0..segments {
        text.push_str(&state.full_get_segment_text(i).map_err(|e| e.to_string())?);
    }
    Ok(text.trim().to_string())
}
