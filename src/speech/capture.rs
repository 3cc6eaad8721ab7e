//! Continuous speech-to-text capture. While active, a capture session emits
//! one [`Utterance`] per finalized piece of recognized speech on a channel
//! the dialogue loop owns; interim hypotheses are never surfaced. This module
//! contains the [`SpeechCaptureSession`] struct which abstracts over the
//! possible backend implementations.

mod openai;

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::Config;
use crate::logger::Logger;
use crate::session::Utterance;

use openai::RealtimeCapture;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// This machine cannot capture speech at all. Fatal: reported at
    /// construction time, before any session starts.
    #[error("speech capture is not available on this machine: {0}")]
    Unsupported(String),

    #[error("could not record audio in the required format ({required}); the device records {actual}")]
    Format { required: String, actual: String },

    #[error("speech capture failed: {0}")]
    Backend(String),
}

/// The capture seam the dialogue loop programs against.
pub trait SpeechCapture {
    /// Begin continuous listening. A no-op while capture is already active,
    /// so resuming after playback can never double-start a session.
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Halt capture. Utterances already emitted stay queued for the consumer,
    /// and a later `start` opens a fresh session on the same channel.
    fn stop(&mut self);

    fn is_active(&self) -> bool;
}

pub struct SpeechCaptureSession(SpeechCaptureImpl);

impl SpeechCaptureSession {
    /// Build the capture session and the utterance channel it feeds. Fails
    /// fast when the platform has no usable capture support.
    pub fn new(
        config: &Config,
        logger: Arc<Mutex<dyn Logger>>,
    ) -> Result<(Self, UnboundedReceiver<Utterance>), CaptureError> {
        // If more capture backends are to be implemented, use the config to
        // decide which one to use at runtime.
        let (capture, utterances) = RealtimeCapture::new(config, logger)?;
        Ok((Self(SpeechCaptureImpl::OpenAiRealtime(capture)), utterances))
    }
}

impl SpeechCapture for SpeechCaptureSession {
    fn start(&mut self) -> Result<(), CaptureError> {
        match &mut self.0 {
            SpeechCaptureImpl::OpenAiRealtime(capture) => capture.start(),
        }
    }

    fn stop(&mut self) {
        match &mut self.0 {
            SpeechCaptureImpl::OpenAiRealtime(capture) => capture.stop(),
        }
    }

    fn is_active(&self) -> bool {
        match &self.0 {
            SpeechCaptureImpl::OpenAiRealtime(capture) => capture.is_active(),
        }
    }
}

enum SpeechCaptureImpl {
    OpenAiRealtime(RealtimeCapture),
}
