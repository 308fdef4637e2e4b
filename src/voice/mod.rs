//! Voice input for the candidate's answer box.
//!
//! [`VoiceInput`] wraps an optional [`SpeechRecognizer`].  Without one the
//! control reports `is_supported() == false` and every call is a no-op, so a
//! host without speech recognition simply shows no microphone button.
//!
//! ```text
//! toggle_listening()  (off → on)
//!   └─▶ clear transcript, recognizer.start() ──▶ spawn pump
//!         Result{final}   → transcript += text
//!         Result{interim} → ignored
//!         Error / End     → is_listening = false, pump exits
//! toggle_listening()  (on → off)
//!   └─▶ recognizer.stop(), is_listening = false
//!       pump keeps draining results already in flight
//! ```
//!
//! The answer panel drains the accumulated text with
//! [`take_transcript`](VoiceInput::take_transcript), or with
//! [`finish`](VoiceInput::finish) when it wants the phrase the recognizer is
//! still transcribing.

#[cfg(feature = "local-voice")]
pub mod local;
pub mod pcm;
pub mod recognizer;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::VoiceConfig;

#[cfg(feature = "local-voice")]
pub use local::LocalRecognizer;
pub use recognizer::{RecognitionEvent, RecognizerError, SpeechRecognizer};

#[cfg(test)]
pub use recognizer::MockRecognizer;

/// Observable voice-input state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceSnapshot {
    pub is_supported: bool,
    pub is_listening: bool,
    pub transcript: String,
}

#[derive(Default)]
struct VoiceState {
    listening: bool,
    transcript: String,
    // Bumped on every start so a stale pump cannot touch a newer run.
    run: u64,
    pump: Option<JoinHandle<()>>,
}

/// How long [`VoiceInput::finish`] waits for trailing results.
const FINISH_GRACE: Duration = Duration::from_secs(10);

pub struct VoiceInput {
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
    config: VoiceConfig,
    state: Arc<Mutex<VoiceState>>,
}

fn lock(state: &Mutex<VoiceState>) -> MutexGuard<'_, VoiceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl VoiceInput {
    pub fn new(recognizer: Option<Arc<dyn SpeechRecognizer>>, config: VoiceConfig) -> Self {
        if recognizer.is_none() {
            log::info!("voice: no speech recognizer, voice input disabled");
        }
        Self {
            recognizer,
            config,
            state: Arc::new(Mutex::new(VoiceState::default())),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.recognizer.is_some()
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.state).listening
    }

    pub fn transcript(&self) -> String {
        lock(&self.state).transcript.clone()
    }

    pub fn reset_transcript(&self) {
        lock(&self.state).transcript.clear();
    }

    /// Return the accumulated text and clear it.
    pub fn take_transcript(&self) -> String {
        std::mem::take(&mut lock(&self.state).transcript)
    }

    pub fn snapshot(&self) -> VoiceSnapshot {
        let state = lock(&self.state);
        VoiceSnapshot {
            is_supported: self.is_supported(),
            is_listening: state.listening,
            transcript: state.transcript.clone(),
        }
    }

    /// Start listening (clearing the previous transcript) or stop.
    pub fn toggle_listening(&self) {
        let Some(recognizer) = &self.recognizer else {
            return;
        };

        let mut state = lock(&self.state);
        if state.listening {
            recognizer.stop();
            state.listening = false;
            log::debug!("voice: stopped listening");
            return;
        }

        state.transcript.clear();
        let mut events = match recognizer.start(&self.config) {
            Ok(events) => events,
            Err(e) => {
                log::warn!("voice: {e}");
                return;
            }
        };

        state.run += 1;
        state.listening = true;
        let run = state.run;
        log::debug!("voice: listening ({})", self.config.language);

        let shared = Arc::clone(&self.state);
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let mut state = lock(&shared);
                if state.run != run {
                    return;
                }
                match event {
                    RecognitionEvent::Result { text, is_final: true } => {
                        state.transcript.push_str(&text);
                    }
                    RecognitionEvent::Result { .. } => {}
                    RecognitionEvent::Error(e) => {
                        log::warn!("voice: recognition error: {e}");
                        state.listening = false;
                        return;
                    }
                    RecognitionEvent::End => {
                        state.listening = false;
                        return;
                    }
                }
            }
            let mut state = lock(&shared);
            if state.run == run {
                state.listening = false;
            }
        });
        if let Some(previous) = state.pump.replace(pump) {
            previous.abort();
        }
    }

    /// Stop listening, wait for the recognizer to deliver what it already
    /// heard, and return the transcript (clearing it).
    ///
    /// Gives up waiting after a grace period and returns what arrived.
    pub async fn finish(&self) -> String {
        let pump = {
            let mut state = lock(&self.state);
            if state.listening {
                if let Some(recognizer) = &self.recognizer {
                    recognizer.stop();
                }
                state.listening = false;
            }
            state.pump.take()
        };

        if let Some(pump) = pump {
            let abort = pump.abort_handle();
            if tokio::time::timeout(FINISH_GRACE, pump).await.is_err() {
                log::warn!("voice: recognizer still busy after {FINISH_GRACE:?}, dropping its tail");
                abort.abort();
            }
        }
        self.take_transcript()
    }
}

impl Drop for VoiceInput {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        if let Some(pump) = state.pump.take() {
            pump.abort();
        }
        if state.listening {
            if let Some(recognizer) = &self.recognizer {
                recognizer.stop();
            }
            state.listening = false;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn voice() -> (Arc<MockRecognizer>, VoiceInput) {
        let mock = Arc::new(MockRecognizer::default());
        let recognizer = Arc::clone(&mock) as Arc<dyn SpeechRecognizer>;
        (mock, VoiceInput::new(Some(recognizer), VoiceConfig::default()))
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn unsupported_voice_is_inert() {
        let voice = VoiceInput::new(None, VoiceConfig::default());
        assert!(!voice.is_supported());

        voice.toggle_listening();
        assert!(!voice.is_listening());
        assert_eq!(voice.snapshot(), VoiceSnapshot::default());
    }

    #[tokio::test]
    async fn final_results_accumulate_interim_ignored() {
        let (mock, voice) = voice();
        voice.toggle_listening();
        assert!(voice.is_listening());

        mock.final_text("I led the ");
        mock.emit(RecognitionEvent::Result {
            text: "migra".into(),
            is_final: false,
        });
        mock.final_text("migration project");
        settle().await;

        assert_eq!(voice.transcript(), "I led the migration project");
    }

    #[tokio::test]
    async fn toggling_on_clears_previous_transcript() {
        let (mock, voice) = voice();
        voice.toggle_listening();
        mock.final_text("first answer");
        settle().await;

        voice.toggle_listening();
        assert!(!voice.is_listening());
        assert_eq!(voice.transcript(), "first answer");
        assert_eq!(mock.stops(), 1);

        voice.toggle_listening();
        assert!(voice.is_listening());
        assert_eq!(voice.transcript(), "");
        assert_eq!(mock.starts(), 2);
    }

    #[tokio::test]
    async fn recognizer_error_stops_listening_silently() {
        let (mock, voice) = voice();
        voice.toggle_listening();
        mock.emit(RecognitionEvent::Error("no-speech".into()));
        settle().await;

        assert!(!voice.is_listening());
    }

    #[tokio::test]
    async fn recognizer_end_stops_listening() {
        let (mock, voice) = voice();
        voice.toggle_listening();
        mock.final_text("done");
        mock.emit(RecognitionEvent::End);
        settle().await;

        assert!(!voice.is_listening());
        assert_eq!(voice.transcript(), "done");
    }

    #[tokio::test]
    async fn failed_start_leaves_control_idle() {
        let mock = Arc::new(MockRecognizer::failing());
        let voice = VoiceInput::new(
            Some(Arc::clone(&mock) as Arc<dyn SpeechRecognizer>),
            VoiceConfig::default(),
        );
        voice.toggle_listening();

        assert!(voice.is_supported());
        assert!(!voice.is_listening());
    }

    #[tokio::test]
    async fn finish_waits_for_the_trailing_phrase() {
        let mock = Arc::new(MockRecognizer::lingering());
        let voice = Arc::new(VoiceInput::new(
            Some(Arc::clone(&mock) as Arc<dyn SpeechRecognizer>),
            VoiceConfig::default(),
        ));
        voice.toggle_listening();
        mock.final_text("I would cache");
        settle().await;

        let finishing = {
            let voice = Arc::clone(&voice);
            tokio::spawn(async move { voice.finish().await })
        };
        settle().await;
        assert!(!voice.is_listening());
        assert_eq!(mock.stops(), 1);

        mock.final_text(" the session tokens");
        mock.emit(RecognitionEvent::End);

        assert_eq!(finishing.await.unwrap(), "I would cache the session tokens");
        assert_eq!(voice.transcript(), "");
    }

    #[tokio::test]
    async fn results_after_toggle_off_still_land() {
        let mock = Arc::new(MockRecognizer::lingering());
        let voice = VoiceInput::new(
            Some(Arc::clone(&mock) as Arc<dyn SpeechRecognizer>),
            VoiceConfig::default(),
        );
        voice.toggle_listening();
        voice.toggle_listening();
        assert!(!voice.is_listening());

        mock.final_text("late words");
        settle().await;
        assert_eq!(voice.transcript(), "late words");
    }

    #[tokio::test(start_paused = true)]
    async fn finish_gives_up_on_a_stuck_recognizer() {
        let mock = Arc::new(MockRecognizer::lingering());
        let voice = VoiceInput::new(
            Some(Arc::clone(&mock) as Arc<dyn SpeechRecognizer>),
            VoiceConfig::default(),
        );
        voice.toggle_listening();
        mock.final_text("partial");
        settle().await;

        assert_eq!(voice.finish().await, "partial");
        assert!(!voice.is_listening());
    }

    #[tokio::test]
    async fn finish_without_a_run_returns_nothing() {
        let (_mock, voice) = voice();
        assert_eq!(voice.finish().await, "");
    }

    #[tokio::test]
    async fn take_transcript_drains_text() {
        let (mock, voice) = voice();
        voice.toggle_listening();
        mock.final_text("hello");
        settle().await;

        assert_eq!(voice.take_transcript(), "hello");
        assert_eq!(voice.transcript(), "");

        mock.final_text("again");
        settle().await;
        voice.reset_transcript();
        assert_eq!(voice.transcript(), "");
    }
}
