//! The speech-recognition capability behind [`VoiceInput`](super::VoiceInput).
//!
//! The local whisper implementation lives in `voice::local` behind the
//! `local-voice` feature.  [`MockRecognizer`] (available under
//! `#[cfg(test)]`) lets tests push recognition events by hand.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::VoiceConfig;

// ---------------------------------------------------------------------------
// RecognitionEvent
// ---------------------------------------------------------------------------

/// One notification from a running recognizer.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// A recognised phrase.  Interim hypotheses have `is_final == false`
    /// and may be revised later.
    Result { text: String, is_final: bool },
    /// Recognition failed (no microphone, network, permission).
    Error(String),
    /// The recognizer stopped on its own.
    End,
}

// ---------------------------------------------------------------------------
// RecognizerError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RecognizerError {
    #[error("speech recognition failed to start: {0}")]
    Start(String),

    #[error("speech model unavailable: {0}")]
    Model(String),
}

// ---------------------------------------------------------------------------
// SpeechRecognizer trait
// ---------------------------------------------------------------------------

/// A platform speech-to-text engine.
///
/// `start` begins a recognition run and returns the channel its events are
/// delivered on; the run is over once `End` or `Error` arrives or the
/// sender is dropped.  After `stop` a recognizer may still deliver results
/// for audio it already heard before closing the run.
pub trait SpeechRecognizer: Send + Sync {
    fn start(
        &self,
        config: &VoiceConfig,
    ) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>, RecognizerError>;

    /// Ask the current run to finish.
    fn stop(&self);
}

// ---------------------------------------------------------------------------
// MockRecognizer  (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
#[derive(Default)]
pub struct MockRecognizer {
    sender: std::sync::Mutex<Option<mpsc::UnboundedSender<RecognitionEvent>>>,
    fail_start: std::sync::atomic::AtomicBool,
    linger: std::sync::atomic::AtomicBool,
    starts: std::sync::atomic::AtomicUsize,
    stops: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockRecognizer {
    pub fn failing() -> Self {
        let mock = Self::default();
        mock.fail_start
            .store(true, std::sync::atomic::Ordering::SeqCst);
        mock
    }

    /// A recognizer that keeps its run open after `stop` until the test
    /// sends `End`, like one still transcribing buffered audio.
    pub fn lingering() -> Self {
        let mock = Self::default();
        mock.linger.store(true, std::sync::atomic::Ordering::SeqCst);
        mock
    }

    /// Deliver `event` to the current run, if any.
    pub fn emit(&self, event: RecognitionEvent) {
        if let Some(tx) = self.sender.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn final_text(&self, text: &str) {
        self.emit(RecognitionEvent::Result {
            text: text.into(),
            is_final: true,
        });
    }

    pub fn starts(&self) -> usize {
        self.starts.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl SpeechRecognizer for MockRecognizer {
    fn start(
        &self,
        _config: &VoiceConfig,
    ) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>, RecognizerError> {
        use std::sync::atomic::Ordering;

        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(RecognizerError::Start("microphone busy".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    fn stop(&self) {
        use std::sync::atomic::Ordering;

        self.stops.fetch_add(1, Ordering::SeqCst);
        if !self.linger.load(Ordering::SeqCst) {
            self.sender.lock().unwrap().take();
        }
    }
}
