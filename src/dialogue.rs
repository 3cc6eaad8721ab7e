//! The dialogue loop at the heart of a practice session: listen for speech,
//! let a quiet window end the user's turn, fetch the examiner's reply, speak
//! it aloud, and listen again — then evaluate the whole conversation when the
//! learner stops the session.

pub mod silence;

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedReceiver};
use tokio::time::Duration;

use crate::analysis::AnalysisReport;
use crate::config::SILENCE_WINDOW_MS;
use crate::logger::Logger;
use crate::prompts::PromptSet;
use crate::session::{ConversationHistory, ExaminerModel, ServiceError, Transcript, Utterance};
use crate::speech::capture::{CaptureError, SpeechCapture};
use crate::speech::synth::{PlaybackError, SpeechSynthesizer};

use silence::SilenceTimer;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SessionState {
    Idle,
    Recording(RecordingPhase),
    Analyzing,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RecordingPhase {
    WaitingForUser,
    ProcessingTurn,
    PlayingResponse,
}

#[derive(Debug, Error)]
pub enum DialogueError {
    #[error("a session is already running")]
    SessionActive,

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// Requests the end of a running session. Clonable, so whatever watches for
/// user input (stdin, a signal handler) can stop the dialogue from outside.
#[derive(Clone)]
pub struct SessionControl {
    stop_tx: Sender<()>,
}

impl SessionControl {
    pub fn stop(&self) {
        // A second stop request while one is queued changes nothing.
        let _ = self.stop_tx.try_send(());
    }
}

enum Wake {
    StopRequested,
    Heard(Option<Utterance>),
    TurnComplete,
}

enum TurnWait {
    Reply(Result<String, ServiceError>),
    StopRequested,
    CaptureGone,
}

enum PlayWait {
    Finished(Result<(), PlaybackError>),
    StopRequested,
    CaptureGone,
}

enum Flow {
    Continue,
    Stop,
}

/// The state machine that owns a session: capture and synthesizer handles,
/// the silence window, the conversation history, and the transcript all live
/// here and nowhere else. The speech and model components only produce data
/// that this loop folds in.
pub struct DialogueOrchestrator<M, C, S> {
    model: M,
    capture: C,
    synth: S,
    prompts: PromptSet,
    state: SessionState,
    history: ConversationHistory,
    transcript: Transcript,
    timer: SilenceTimer,
    /// Latest utterance of the current quiet window; becomes the turn content
    /// when the window elapses.
    pending_turn: Option<Utterance>,
    utterances: UnboundedReceiver<Utterance>,
    stop_rx: Receiver<()>,
    stop_tx: Sender<()>,
    logger: Arc<Mutex<dyn Logger>>,
}

impl<M, C, S> DialogueOrchestrator<M, C, S>
where
    M: ExaminerModel,
    C: SpeechCapture,
    S: SpeechSynthesizer,
{
    pub fn new(
        model: M,
        capture: C,
        synth: S,
        utterances: UnboundedReceiver<Utterance>,
        prompts: PromptSet,
        logger: Arc<Mutex<dyn Logger>>,
    ) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        Self {
            model,
            capture,
            synth,
            prompts,
            state: SessionState::Idle,
            history: ConversationHistory::new(),
            transcript: Transcript::new(),
            timer: SilenceTimer::new(Duration::from_millis(SILENCE_WINDOW_MS)),
            pending_turn: None,
            utterances,
            stop_rx,
            stop_tx,
            logger,
        }
    }

    #[must_use]
    pub fn control(&self) -> SessionControl {
        SessionControl {
            stop_tx: self.stop_tx.clone(),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    #[must_use]
    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Run one full session, from the examiner's greeting until a stop
    /// request, and return the evaluation. Valid only while no session runs.
    pub async fn run_session(&mut self) -> Result<AnalysisReport, DialogueError> {
        if self.state != SessionState::Idle {
            return Err(DialogueError::SessionActive);
        }

        // Stop requests left over from a previous session do not apply here.
        while self.stop_rx.try_recv().is_ok() {}

        self.history.clear();
        self.transcript.clear();
        self.pending_turn = None;
        self.timer.cancel();

        self.capture.start()?;
        self.state = SessionState::Recording(RecordingPhase::WaitingForUser);

        // The examiner speaks first; the greeting prompt itself is not part
        // of the conversation, only the reply it provokes is.
        let greeting = self.prompts.greeting.clone();
        if let Flow::Stop = self.take_turn(greeting).await {
            return Ok(self.finish().await);
        }

        loop {
            let wake = {
                let Self {
                    stop_rx,
                    utterances,
                    timer,
                    ..
                } = self;
                tokio::select! {
                    biased;
                    _ = stop_rx.recv() => Wake::StopRequested,
                    heard = utterances.recv() => Wake::Heard(heard),
                    () = timer.fired() => Wake::TurnComplete,
                }
            };

            match wake {
                Wake::StopRequested => return Ok(self.finish().await),
                Wake::Heard(Some(utterance)) => {
                    fold_user_utterance(
                        &mut self.history,
                        &mut self.transcript,
                        &self.logger,
                        &utterance.text,
                    );
                    self.timer.reset();
                    self.pending_turn = Some(utterance);
                }
                Wake::Heard(None) => {
                    self.logger
                        .lock()
                        .unwrap()
                        .error("Speech capture ended unexpectedly; closing the session");
                    return Ok(self.finish().await);
                }
                Wake::TurnComplete => {
                    self.timer.cancel();
                    if let Some(utterance) = self.pending_turn.take() {
                        if let Flow::Stop = self.take_turn(utterance.text).await {
                            return Ok(self.finish().await);
                        }
                    }
                }
            }
        }
    }

    /// Drive one examiner turn for `user_message`. Real utterances were
    /// already folded into the history when they were heard; the message is
    /// passed separately on top of the history snapshot. Utterances arriving
    /// while the model call is in flight are folded in but trigger nothing.
    async fn take_turn(&mut self, user_message: String) -> Flow {
        self.state = SessionState::Recording(RecordingPhase::ProcessingTurn);

        let snapshot = self.history.clone();
        let wait = {
            let Self {
                model,
                stop_rx,
                utterances,
                history,
                transcript,
                logger,
                ..
            } = self;
            let reply = model.converse(snapshot, user_message);
            tokio::pin!(reply);
            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.recv() => break TurnWait::StopRequested,
                    heard = utterances.recv() => match heard {
                        Some(utterance) => {
                            fold_user_utterance(history, transcript, &**logger, &utterance.text);
                        }
                        None => break TurnWait::CaptureGone,
                    },
                    outcome = &mut reply => break TurnWait::Reply(outcome),
                }
            }
        };

        match wait {
            TurnWait::Reply(Ok(reply)) => {
                self.history.push_assistant(reply.clone());
                self.record_line(format!("AI: {reply}"));
                self.play_response(reply).await
            }
            TurnWait::Reply(Err(err)) => {
                // The turn is lost, but the session keeps listening.
                self.record_error(format!("Error: {err}"));
                self.state = SessionState::Recording(RecordingPhase::WaitingForUser);
                Flow::Continue
            }
            TurnWait::StopRequested => Flow::Stop,
            TurnWait::CaptureGone => {
                self.logger
                    .lock()
                    .unwrap()
                    .error("Speech capture ended unexpectedly; closing the session");
                Flow::Stop
            }
        }
    }

    /// Speak the examiner's reply. Completion and failure both end in
    /// listening again; resuming capture here is what keeps the conversation
    /// going, so it happens on every path.
    async fn play_response(&mut self, reply: String) -> Flow {
        self.state = SessionState::Recording(RecordingPhase::PlayingResponse);

        let wait = {
            let Self {
                synth,
                stop_rx,
                utterances,
                history,
                transcript,
                logger,
                ..
            } = self;
            let playback = synth.speak(&reply);
            tokio::pin!(playback);
            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.recv() => break PlayWait::StopRequested,
                    heard = utterances.recv() => match heard {
                        Some(utterance) => {
                            fold_user_utterance(history, transcript, &**logger, &utterance.text);
                        }
                        None => break PlayWait::CaptureGone,
                    },
                    outcome = &mut playback => break PlayWait::Finished(outcome),
                }
            }
        };

        match wait {
            PlayWait::Finished(outcome) => {
                if let Err(err) = outcome {
                    self.logger
                        .lock()
                        .unwrap()
                        .warn(&format!("Playback did not complete: {err}"));
                }
                self.resume_capture();
                self.state = SessionState::Recording(RecordingPhase::WaitingForUser);
                Flow::Continue
            }
            PlayWait::StopRequested => Flow::Stop,
            PlayWait::CaptureGone => {
                self.logger
                    .lock()
                    .unwrap()
                    .error("Speech capture ended unexpectedly; closing the session");
                Flow::Stop
            }
        }
    }

    fn resume_capture(&mut self) {
        if self.capture.is_active() {
            return;
        }
        if let Err(err) = self.capture.start() {
            self.logger
                .lock()
                .unwrap()
                .error(&format!("Could not resume speech capture: {err}"));
        }
    }

    /// The stop sequence: the quiet window is abandoned, capture halts, and
    /// the conversation goes to the model for evaluation. Ends in `Idle` on
    /// every path; an evaluation failure becomes the report text.
    async fn finish(&mut self) -> AnalysisReport {
        self.timer.cancel();
        self.pending_turn = None;
        self.capture.stop();
        self.state = SessionState::Analyzing;
        self.logger.lock().unwrap().info("Analyzing your conversation...");

        let report = match self.model.analyze(self.history.clone()).await {
            Ok(text) => AnalysisReport::from_raw(text),
            Err(err) => {
                self.logger
                    .lock()
                    .unwrap()
                    .error(&format!("The evaluation request failed: {err}"));
                AnalysisReport::from_raw(format!("Error: {err}"))
            }
        };

        self.state = SessionState::Idle;
        report
    }

    fn record_line(&mut self, line: String) {
        self.logger.lock().unwrap().info(&line);
        self.transcript.record(line);
    }

    fn record_error(&mut self, line: String) {
        self.logger.lock().unwrap().error(&line);
        self.transcript.record(line);
    }
}

fn fold_user_utterance(
    history: &mut ConversationHistory,
    transcript: &mut Transcript,
    logger: &Mutex<dyn Logger>,
    text: &str,
) {
    history.push_user(text);
    let line = format!("You: {text}");
    logger.lock().unwrap().info(&line);
    transcript.record(line);
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::future::Future;

    use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
    use tokio::time::sleep;

    use crate::logger::ConsoleLogger;

    #[derive(Default)]
    struct ModelScript {
        /// Scripted turn outcomes; `Err` holds a status description.
        replies: VecDeque<Result<String, String>>,
        /// (history length at call time, user message) per converse call.
        conversed: Vec<(usize, String)>,
        analysis: Option<Result<String, String>>,
        analyzed_history_lengths: Vec<usize>,
    }

    #[derive(Clone, Default)]
    struct FakeModel(Arc<Mutex<ModelScript>>);

    impl ExaminerModel for FakeModel {
        fn converse(
            &self,
            history: ConversationHistory,
            user_message: String,
        ) -> impl Future<Output = Result<String, ServiceError>> {
            let mut script = self.0.lock().unwrap();
            script.conversed.push((history.len(), user_message));
            let outcome = script
                .replies
                .pop_front()
                .unwrap_or_else(|| Ok("Noted.".to_owned()))
                .map_err(ServiceError::Status);
            async move { outcome }
        }

        fn analyze(
            &self,
            history: ConversationHistory,
        ) -> impl Future<Output = Result<String, ServiceError>> {
            let mut script = self.0.lock().unwrap();
            script.analyzed_history_lengths.push(history.len());
            let outcome = script
                .analysis
                .clone()
                .unwrap_or_else(|| Ok(String::new()))
                .map_err(ServiceError::Status);
            async move { outcome }
        }
    }

    #[derive(Default)]
    struct CaptureProbe {
        active: bool,
        starts: usize,
        stops: usize,
    }

    #[derive(Clone, Default)]
    struct FakeCapture(Arc<Mutex<CaptureProbe>>);

    impl SpeechCapture for FakeCapture {
        fn start(&mut self) -> Result<(), CaptureError> {
            let mut probe = self.0.lock().unwrap();
            if !probe.active {
                probe.active = true;
                probe.starts += 1;
            }
            Ok(())
        }

        fn stop(&mut self) {
            let mut probe = self.0.lock().unwrap();
            probe.active = false;
            probe.stops += 1;
        }

        fn is_active(&self) -> bool {
            self.0.lock().unwrap().active
        }
    }

    #[derive(Default)]
    struct SpeakerScript {
        outcomes: VecDeque<Result<(), PlaybackError>>,
        spoken: Vec<String>,
    }

    #[derive(Clone, Default)]
    struct FakeSpeaker(Arc<Mutex<SpeakerScript>>);

    impl SpeechSynthesizer for FakeSpeaker {
        fn speak(&mut self, text: &str) -> impl Future<Output = Result<(), PlaybackError>> {
            let mut script = self.0.lock().unwrap();
            script.spoken.push(text.to_owned());
            let outcome = script.outcomes.pop_front().unwrap_or(Ok(()));
            async move { outcome }
        }
    }

    struct Harness {
        orchestrator: DialogueOrchestrator<FakeModel, FakeCapture, FakeSpeaker>,
        model: FakeModel,
        capture: FakeCapture,
        speaker: FakeSpeaker,
        utterance_tx: UnboundedSender<Utterance>,
    }

    fn harness() -> Harness {
        let model = FakeModel::default();
        let capture = FakeCapture::default();
        let speaker = FakeSpeaker::default();
        let (utterance_tx, utterance_rx) = unbounded_channel();
        let logger: Arc<Mutex<dyn Logger>> = Arc::new(Mutex::new(ConsoleLogger::new()));

        let orchestrator = DialogueOrchestrator::new(
            model.clone(),
            capture.clone(),
            speaker.clone(),
            utterance_rx,
            PromptSet::ielts_examiner(),
            logger,
        );

        Harness {
            orchestrator,
            model,
            capture,
            speaker,
            utterance_tx,
        }
    }

    const AFTER_SILENCE: Duration = Duration::from_secs(6);

    #[tokio::test(start_paused = true)]
    async fn full_session_appends_and_speaks_each_reply() {
        let mut h = harness();
        {
            let mut script = h.model.0.lock().unwrap();
            script
                .replies
                .push_back(Ok("Good morning! Tell me about yourself.".to_owned()));
            script
                .replies
                .push_back(Ok("What subject do you teach?".to_owned()));
            script.analysis = Some(Ok("Fluency and Coherence:\nGood pace.\nScore: 6/9\n\n\
                Lexical Resource:\nAdequate range.\nScore: 6/9\n\n\
                Grammatical Range and Accuracy:\nMostly accurate.\nScore: 7/9\n\n\
                Pronunciation:\nClear.\nScore: 7/9\n\n\
                Overall Band Score: 6/9"
                .to_owned()));
        }

        let control = h.orchestrator.control();
        let tx = h.utterance_tx.clone();
        let driver = async move {
            tx.send(Utterance::new("I work as a teacher")).unwrap();
            sleep(AFTER_SILENCE).await;
            control.stop();
        };

        let (outcome, ()) = tokio::join!(h.orchestrator.run_session(), driver);
        let report = outcome.unwrap();

        // one user turn: greeting reply + user + reply = 2N + 1
        assert_eq!(h.orchestrator.history().len(), 3);
        assert_eq!(h.orchestrator.state(), SessionState::Idle);

        let script = h.model.0.lock().unwrap();
        assert_eq!(script.conversed.len(), 2);
        // the greeting goes out against an empty history
        assert_eq!(script.conversed[0].0, 0);
        // the turn sees the snapshot appended before it: greeting reply + user
        assert_eq!(script.conversed[1], (2, "I work as a teacher".to_owned()));
        assert_eq!(script.analyzed_history_lengths.as_slice(), [3]);

        let spoken = &h.speaker.0.lock().unwrap().spoken;
        assert_eq!(spoken.len(), 2);
        assert_eq!(spoken[1], "What subject do you teach?");

        // capture stayed active throughout, so resume never restarted it
        assert_eq!(h.capture.0.lock().unwrap().starts, 1);

        assert_eq!(report.paragraphs().len(), 5);
        assert_eq!(report.raw().matches("Score: ").count(), 5);
        assert!(report.raw().contains("Overall Band Score: 6/9"));

        let transcript = h.orchestrator.transcript();
        assert!(transcript.lines().contains(&"You: I work as a teacher".to_owned()));
        assert!(transcript
            .lines()
            .iter()
            .any(|line| line == "AI: What subject do you teach?"));
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_latest_utterance_in_a_quiet_window_triggers_a_turn() {
        let mut h = harness();

        let control = h.orchestrator.control();
        let tx = h.utterance_tx.clone();
        let driver = async move {
            tx.send(Utterance::new("first thought")).unwrap();
            sleep(Duration::from_secs(2)).await;
            tx.send(Utterance::new("and a second one")).unwrap();
            sleep(AFTER_SILENCE).await;
            control.stop();
        };

        let (outcome, ()) = tokio::join!(h.orchestrator.run_session(), driver);
        outcome.unwrap();

        let script = h.model.0.lock().unwrap();
        // greeting + exactly one user turn, with the later content
        assert_eq!(script.conversed.len(), 2);
        assert_eq!(script.conversed[1].1, "and a second one");

        // both utterances were folded into the history all the same
        assert_eq!(h.orchestrator.history().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_utterances_still_yields_a_report() {
        let mut h = harness();
        h.model.0.lock().unwrap().analysis = Some(Ok(String::new()));

        let control = h.orchestrator.control();
        let driver = async move {
            control.stop();
        };

        let (outcome, ()) = tokio::join!(h.orchestrator.run_session(), driver);
        let report = outcome.unwrap();

        assert!(report.is_empty());
        assert_eq!(h.orchestrator.state(), SessionState::Idle);
        assert_eq!(h.capture.0.lock().unwrap().stops, 1);
        assert_eq!(h.model.0.lock().unwrap().analyzed_history_lengths.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn a_failed_turn_is_surfaced_inline_and_the_session_continues() {
        let mut h = harness();
        {
            let mut script = h.model.0.lock().unwrap();
            script.replies.push_back(Ok("Welcome.".to_owned()));
            script.replies.push_back(Err("Too Many Requests".to_owned()));
            script.replies.push_back(Ok("Let us continue.".to_owned()));
        }

        let control = h.orchestrator.control();
        let tx = h.utterance_tx.clone();
        let driver = async move {
            tx.send(Utterance::new("my first answer")).unwrap();
            sleep(AFTER_SILENCE).await;
            tx.send(Utterance::new("my second answer")).unwrap();
            sleep(AFTER_SILENCE).await;
            control.stop();
        };

        let (outcome, ()) = tokio::join!(h.orchestrator.run_session(), driver);
        outcome.unwrap();

        let transcript = h.orchestrator.transcript();
        assert!(transcript
            .lines()
            .iter()
            .any(|line| line == "Error: Too Many Requests"));

        // no assistant turn was appended for the failed call:
        // greeting reply + two user turns + one recovered reply
        assert_eq!(h.orchestrator.history().len(), 4);

        let script = h.model.0.lock().unwrap();
        assert_eq!(script.conversed.len(), 3);

        let spoken = &h.speaker.0.lock().unwrap().spoken;
        assert_eq!(spoken.as_slice(), ["Welcome.", "Let us continue."]);
    }

    #[tokio::test(start_paused = true)]
    async fn playback_failure_still_resumes_capture() {
        let mut h = harness();
        {
            let mut script = h.speaker.0.lock().unwrap();
            script.outcomes.push_back(Ok(()));
            script
                .outcomes
                .push_back(Err(PlaybackError::Playback("device gone".to_owned())));
        }

        let control = h.orchestrator.control();
        let tx = h.utterance_tx.clone();
        let capture = h.capture.clone();
        let driver = async move {
            tx.send(Utterance::new("an answer")).unwrap();
            // the capture backend dies while we wait out the quiet window
            capture.0.lock().unwrap().active = false;
            sleep(AFTER_SILENCE).await;
            control.stop();
        };

        let (outcome, ()) = tokio::join!(h.orchestrator.run_session(), driver);
        outcome.unwrap();

        let probe = h.capture.0.lock().unwrap();
        // initial start plus the mandatory resume after the failed playback
        assert_eq!(probe.starts, 2);

        // the failed playback still counts as a spoken reply
        assert_eq!(h.speaker.0.lock().unwrap().spoken.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn a_session_can_be_rerun_with_a_fresh_history() {
        let mut h = harness();

        let control = h.orchestrator.control();
        let driver = async move { control.stop() };
        let (outcome, ()) = tokio::join!(h.orchestrator.run_session(), driver);
        outcome.unwrap();

        let control = h.orchestrator.control();
        let tx = h.utterance_tx.clone();
        let driver = async move {
            tx.send(Utterance::new("second session answer")).unwrap();
            sleep(AFTER_SILENCE).await;
            control.stop();
        };
        let (outcome, ()) = tokio::join!(h.orchestrator.run_session(), driver);
        outcome.unwrap();

        let script = h.model.0.lock().unwrap();
        // first session evaluated just the greeting reply; the second one
        // started over instead of accumulating
        assert_eq!(script.analyzed_history_lengths.as_slice(), [1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn losing_the_utterance_source_ends_the_session_with_a_report() {
        let mut h = harness();

        let tx = h.utterance_tx.clone();
        drop(h.utterance_tx);
        let driver = async move {
            drop(tx);
        };

        let (outcome, ()) = tokio::join!(h.orchestrator.run_session(), driver);
        let _report = outcome.unwrap();

        assert_eq!(h.orchestrator.state(), SessionState::Idle);
        assert_eq!(h.capture.0.lock().unwrap().stops, 1);
    }
}
