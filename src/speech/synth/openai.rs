//! Synthesizer backend on the OpenAI speech endpoint: the reply text is
//! rendered to audio remotely and played through the default output device.

use std::io::Cursor;
use std::sync::Arc;

use reqwest::Client as ReqwestClient;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use serde::Serialize;

use crate::config::Config;

use super::{PlaybackError, SpeechSynthesizer};

const SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";
const SPEECH_MODEL: &str = "tts-1";
const VOICE: &str = "alloy";

pub struct OpenAiSpeaker {
    api_key: String,
    client: ReqwestClient,
    // The stream and its handle keep the output device open for the sink.
    _stream: OutputStream,
    _stream_handle: OutputStreamHandle,
    sink: Arc<Sink>,
}

impl OpenAiSpeaker {
    pub fn new(config: &Config) -> Result<Self, PlaybackError> {
        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|err| PlaybackError::Playback(err.to_string()))?;
        let sink =
            Sink::try_new(&stream_handle).map_err(|err| PlaybackError::Playback(err.to_string()))?;

        Ok(Self {
            api_key: config.openai_key.clone(),
            client: ReqwestClient::new(),
            _stream: stream,
            _stream_handle: stream_handle,
            sink: Arc::new(sink),
        })
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, PlaybackError> {
        let body = SpeechRequest {
            model: SPEECH_MODEL,
            input: text,
            voice: VOICE,
        };

        let response = self
            .client
            .post(SPEECH_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| PlaybackError::Synthesis(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let description = status
                .canonical_reason()
                .unwrap_or(status.as_str())
                .to_owned();
            return Err(PlaybackError::Synthesis(description));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| PlaybackError::Synthesis(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

impl SpeechSynthesizer for OpenAiSpeaker {
    async fn speak(&mut self, text: &str) -> Result<(), PlaybackError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let bytes = self.synthesize(text).await?;

        let source = Decoder::new(Cursor::new(bytes))
            .map_err(|err| PlaybackError::Playback(format!("could not decode audio: {err}")))?;
        self.sink.append(source.convert_samples::<f32>());

        // Draining the sink blocks, so it runs on the blocking pool; the
        // caller resumes capture only once playback has really ended.
        let sink = Arc::clone(&self.sink);
        tokio::task::spawn_blocking(move || sink.sleep_until_end())
            .await
            .map_err(|err| PlaybackError::Playback(err.to_string()))?;

        Ok(())
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speech_request_has_the_wire_shape() {
        let body = SpeechRequest {
            model: SPEECH_MODEL,
            input: "What do you do for a living?",
            voice: VOICE,
        };

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["model"], "tts-1");
        assert_eq!(value["voice"], "alloy");
        assert_eq!(value["input"], "What do you do for a living?");
    }
}
