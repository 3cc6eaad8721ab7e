//! Capture backend on the [OpenAI realtime transcription API](https://platform.openai.com/docs/guides/realtime?use-case=transcription).
//! Microphone audio is framed into the websocket; every
//! `input_audio_transcription.completed` event becomes one finalized
//! [`Utterance`] on the shared channel. Interim `delta` events are discarded.

use std::str::FromStr;
use std::sync::{Arc, Mutex, mpsc::Receiver as StdReceiver};

use anyhow::Context;
use base64::prelude::*;
use futures_util::{SinkExt, Stream, StreamExt, future};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, Receiver as TokioReceiver, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{http, protocol::Message},
};

use crate::config::Config;
use crate::logger::Logger;
use crate::session::Utterance;
use crate::speech::audio::StopTrigger;
use crate::speech::audio::format::SoundSpec;
use crate::speech::audio::recorder::AudioRecorder;

use super::CaptureError;

pub struct RealtimeCapture {
    api_key: String,
    recorder: AudioRecorder,
    utterance_tx: UnboundedSender<Utterance>,
    logger: Arc<Mutex<dyn Logger>>,
    active: Option<ActiveCapture>,
}

struct ActiveCapture {
    stop: StopTrigger,
    task: JoinHandle<()>,
}

impl RealtimeCapture {
    pub fn new(
        config: &Config,
        logger: Arc<Mutex<dyn Logger>>,
    ) -> Result<(Self, UnboundedReceiver<Utterance>), CaptureError> {
        let recorder = AudioRecorder::new(logger.clone(), config.audio_file.as_deref())
            .map_err(|err| CaptureError::Unsupported(format!("{err:#}")))?;

        // One channel for the lifetime of the backend: utterances survive
        // capture restarts, so nothing is lost between sessions.
        let (utterance_tx, utterance_rx) = mpsc::unbounded_channel();

        Ok((
            Self {
                api_key: config.openai_key.clone(),
                recorder,
                utterance_tx,
                logger,
                active: None,
            },
            utterance_rx,
        ))
    }

    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.is_active() {
            return Ok(());
        }

        let required = SoundSpec::realtime_input();
        let (audio_rx, stop, negotiated) = self
            .recorder
            .listen(Some(required.clone()))
            .map_err(|err| CaptureError::Backend(format!("{err:#}")))?;

        if let Some(actual) = negotiated {
            if actual != required {
                stop.stop();
                return Err(CaptureError::Format {
                    required: required.to_string(),
                    actual: actual.to_string(),
                });
            }
        }

        let audio = to_async_receiver(audio_rx);
        let api_key = self.api_key.clone();
        let utterances = self.utterance_tx.clone();
        let logger = self.logger.clone();
        let task = tokio::spawn(async move {
            if let Err(err) = run_transcription(api_key, audio, utterances, logger.clone()).await {
                logger
                    .lock()
                    .unwrap()
                    .error(&format!("Speech recognition stopped: {err:#}"));
            }
        });

        self.active = Some(ActiveCapture { stop, task });
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.stop.stop();
            active.task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }
}

async fn run_transcription(
    api_key: String,
    mut audio: TokioReceiver<Vec<u8>>,
    utterances: UnboundedSender<Utterance>,
    logger: Arc<Mutex<dyn Logger>>,
) -> anyhow::Result<()> {
    let ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>> = create_ws(&api_key).await?;
    let (mut ws_write, ws_read) = ws_stream.split();

    // Configure the session before any audio goes out: raw PCM input,
    // English transcription, server-side segmentation of utterances.
    let update = serde_json::to_string(&session_configuration())
        .context("Could not serialize the transcription session configuration")?;
    ws_write
        .send(Message::Text(update.into()))
        .await
        .context("Failed to configure the transcription session")?;

    let events = to_event_stream(ws_read);
    let forward_transcripts = tokio::spawn({
        let logger = logger.clone();
        async move {
            futures_util::pin_mut!(events);
            while let Some(event) = events.next().await {
                match event? {
                    TranscriptionMessage::Error(err) => {
                        anyhow::bail!(
                            "The transcription API responded with an error: {}: {}",
                            err.error.type_,
                            err.error.message,
                        );
                    }
                    TranscriptionMessage::TranscriptionCompleted(done) => {
                        let text = done.transcript.trim();
                        if text.is_empty() {
                            continue;
                        }
                        if utterances.send(Utterance::new(text)).is_err() {
                            // nobody is listening for utterances anymore
                            break;
                        }
                    }
                    TranscriptionMessage::SpeechStarted(_) => {
                        logger.lock().unwrap().debug("User started speaking");
                    }
                    TranscriptionMessage::SpeechStopped(_) => {
                        logger.lock().unwrap().debug("User stopped speaking");
                    }
                    // interim hypotheses and session bookkeeping are not surfaced
                    TranscriptionMessage::TranscriptionDelta(_)
                    | TranscriptionMessage::Unrecognized => {}
                }
            }
            anyhow::Ok(())
        }
    });

    let feed_logger = logger.clone();
    let feed_audio = tokio::spawn(async move {
        while let Some(chunk) = audio.recv().await {
            let json = "{\"type\": \"input_audio_buffer.append\",\"audio\": \"".to_owned();
            let json = json + &BASE64_STANDARD.encode(chunk);
            let json = json + "\"}";
            match ws_write.send(Message::Text(json.into())).await {
                Ok(()) => (),
                Err(err) => {
                    feed_logger
                        .lock()
                        .unwrap()
                        .warn(&format!("Could not send audio data: {err}"));
                    break;
                }
            }
        }
        // Audio source drained, meaning capture stopped. Closing our side
        // makes the server end the event stream too.
        let _ = ws_write.send(Message::Close(None)).await;
    });

    let (transcripts, _sink) = future::join(forward_transcripts, feed_audio).await;
    transcripts.context("Failed to run transcription")??;
    Ok(())
}

fn to_event_stream<S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Send>(
    ws_stream: S,
) -> impl Stream<Item = anyhow::Result<TranscriptionMessage>> + Send {
    ws_stream.filter_map(async move |try_msg| match try_msg {
        Err(err) => Some(Err(anyhow::Error::msg(format!(
            "Failed to consume websocket stream: {err}"
        )))),
        Ok(msg) => {
            if let Message::Text(msg) = msg {
                let msg = msg.as_str();
                Some(
                    serde_json::from_str::<TranscriptionMessage>(msg)
                        .context(format!("Failed to parse transcription message {msg}")),
                )
            } else {
                None
            }
        }
    })
}

fn to_async_receiver<T: Send + 'static>(receiver: StdReceiver<T>) -> TokioReceiver<T> {
    // Bounded, so a stalled websocket cannot queue unlimited audio. The
    // bridge runs on the blocking pool because the source is a std channel.
    let (tx, rx) = mpsc::channel(1024);
    tokio::task::spawn_blocking(move || {
        for item in receiver {
            if tx.blocking_send(item).is_err() {
                break;
            }
        }
    });
    rx
}

async fn create_ws(api_key: &str) -> anyhow::Result<WebSocketStream<MaybeTlsStream<TcpStream>>> {
    let url = http::Uri::from_str("wss://api.openai.com/v1/realtime?intent=transcription")?;
    // into_client_request for Uri will set headers required for websockets
    let mut req = url.into_client_request()?;
    let headers = req.headers_mut();
    let auth = HeaderValue::from_str(&("Bearer ".to_owned() + api_key))
        .context("Could not create header from OpenAI API key")?;
    headers
        .try_insert("Authorization", auth)
        .context("Failed to modify transcription websocket request headers")?;
    let beta = HeaderValue::from_str("realtime=v1").context("Could not create OpenAI-Beta header")?;
    headers
        .try_insert("OpenAI-Beta", beta)
        .context("Failed to modify transcription websocket request headers")?;

    let (ws_stream, _res) = connect_async(req).await?;
    Ok(ws_stream)
}

fn session_configuration() -> TranscriptionSessionUpdate {
    TranscriptionSessionUpdate {
        type_: "transcription_session.update",
        session: TranscriptionSessionConfig {
            // input audio must be 16-bit PCM at a 24kHz sample rate,
            // single channel, little-endian
            input_audio_format: "pcm16",
            input_audio_noise_reduction: NoiseReduction {
                type_: "near_field",
            },
            input_audio_transcription: TranscriptionModelConfig {
                language: Some("en"),
                model: Some("gpt-4o-transcribe"),
                prompt: None,
            },
            turn_detection: TurnDetection {
                type_: "server_vad",
            },
        },
    }
}

#[derive(Serialize)]
struct TranscriptionSessionUpdate {
    #[serde(rename = "type")]
    type_: &'static str,
    session: TranscriptionSessionConfig,
}

#[derive(Serialize)]
struct TranscriptionSessionConfig {
    input_audio_format: &'static str,
    input_audio_noise_reduction: NoiseReduction,
    input_audio_transcription: TranscriptionModelConfig,
    turn_detection: TurnDetection,
}

#[derive(Serialize)]
struct NoiseReduction {
    #[serde(rename = "type")]
    type_: &'static str,
}

#[derive(Serialize)]
struct TranscriptionModelConfig {
    language: Option<&'static str>,
    model: Option<&'static str>,
    prompt: Option<&'static str>,
}

#[derive(Serialize)]
struct TurnDetection {
    #[serde(rename = "type")]
    type_: &'static str,
}

/* Transcription events */

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum TranscriptionMessage {
    #[serde(rename = "error")]
    Error(ErrorEvent),

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted(SpeechBoundaryEvent),

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped(SpeechBoundaryEvent),

    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    TranscriptionDelta(TranscriptionDeltaEvent),

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted(TranscriptionCompletedEvent),

    /// Session bookkeeping we receive but do not act on.
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Deserialize)]
struct ErrorEvent {
    #[allow(dead_code)]
    event_id: Option<String>,
    error: ErrorEventDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorEventDetail {
    #[serde(rename = "type")]
    type_: String,
    #[allow(dead_code)]
    code: Option<String>,
    message: String,
    #[allow(dead_code)]
    param: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpeechBoundaryEvent {
    #[allow(dead_code)]
    event_id: Option<String>,
    #[allow(dead_code)]
    item_id: Option<String>,
    #[allow(dead_code)]
    audio_start_ms: Option<u32>,
    #[allow(dead_code)]
    audio_end_ms: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionDeltaEvent {
    #[allow(dead_code)]
    event_id: Option<String>,
    #[allow(dead_code)]
    item_id: Option<String>,
    #[allow(dead_code)]
    content_index: Option<i32>,
    #[allow(dead_code)]
    delta: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionCompletedEvent {
    #[allow(dead_code)]
    event_id: Option<String>,
    #[allow(dead_code)]
    item_id: Option<String>,
    #[allow(dead_code)]
    content_index: Option<i32>,
    transcript: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_event_parses_to_a_transcript() {
        let json = r#"{
            "type": "conversation.item.input_audio_transcription.completed",
            "event_id": "event_123",
            "item_id": "item_456",
            "content_index": 0,
            "transcript": "I work as a teacher"
        }"#;

        let msg: TranscriptionMessage = serde_json::from_str(json).unwrap();
        match msg {
            TranscriptionMessage::TranscriptionCompleted(done) => {
                assert_eq!(done.transcript, "I work as a teacher");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn unknown_event_types_are_tolerated() {
        let json = r#"{"type": "transcription_session.created", "session": {"id": "sess_1"}}"#;
        let msg: TranscriptionMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, TranscriptionMessage::Unrecognized));
    }

    #[test]
    fn error_event_carries_the_service_description() {
        let json = r#"{
            "type": "error",
            "event_id": "event_9",
            "error": {"type": "invalid_request_error", "message": "bad session", "code": null, "param": null}
        }"#;

        let msg: TranscriptionMessage = serde_json::from_str(json).unwrap();
        match msg {
            TranscriptionMessage::Error(err) => {
                assert_eq!(err.error.type_, "invalid_request_error");
                assert_eq!(err.error.message, "bad session");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn session_configuration_has_the_update_shape() {
        let value = serde_json::to_value(session_configuration()).unwrap();
        assert_eq!(value["type"], "transcription_session.update");
        assert_eq!(value["session"]["input_audio_format"], "pcm16");
        assert_eq!(value["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(
            value["session"]["input_audio_transcription"]["language"],
            "en"
        );
    }
}
