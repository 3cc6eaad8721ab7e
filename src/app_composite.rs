use std::sync::{Arc, Mutex};

use crate::{
    ai_providers::ChatCompletionsClient,
    config::Config,
    dialogue::DialogueOrchestrator,
    logger::{ConsoleLogger, Logger},
    prompts::PromptSet,
    speech::{capture::SpeechCaptureSession, synth::OpenAiSpeaker},
};

pub type ExamOrchestrator =
    DialogueOrchestrator<ChatCompletionsClient, SpeechCaptureSession, OpenAiSpeaker>;

pub struct AppComposite {
    pub orchestrator: ExamOrchestrator,
    pub logger: Arc<Mutex<dyn Logger>>,
}

impl AppComposite {
    /// Wire the production components together. Fails when the machine has
    /// no usable audio capture or playback, before any session can start.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let logger = ConsoleLogger::new();
        let logger: Arc<Mutex<dyn Logger>> = Arc::new(Mutex::new(logger));

        let prompts = PromptSet::ielts_examiner();
        let model = ChatCompletionsClient::new(config, prompts.clone());
        let (capture, utterances) = SpeechCaptureSession::new(config, logger.clone())?;
        let speaker = OpenAiSpeaker::new(config)?;

        Ok(Self {
            orchestrator: DialogueOrchestrator::new(
                model,
                capture,
                speaker,
                utterances,
                prompts,
                logger.clone(),
            ),
            logger,
        })
    }
}
