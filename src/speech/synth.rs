//! Speaking the examiner's replies aloud. A synthesizer resolves when
//! playback naturally completes or reports why it could not; the dialogue
//! loop treats both outcomes as the end of playback, so a broken speaker can
//! never leave a session stuck without capture.

mod openai;

use std::future::Future;

use thiserror::Error;

pub use openai::OpenAiSpeaker;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("audio playback failed: {0}")]
    Playback(String),
}

pub trait SpeechSynthesizer {
    /// Speak `text` aloud, resolving once the audio has finished playing.
    fn speak(&mut self, text: &str) -> impl Future<Output = Result<(), PlaybackError>>;
}
