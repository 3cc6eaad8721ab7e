//! The prompt material that turns a generic chat model into an IELTS speaking
//! examiner. Kept as data so the dialogue loop stays independent of the exact
//! wording, and so alternative prompt sets can be wired in without touching
//! the orchestrator.

#[derive(Clone)]
pub struct PromptSet {
    /// System priming message sent ahead of the history on every turn.
    pub system: String,
    /// Opening user message that makes the examiner speak first.
    pub greeting: String,
    /// Rubric preamble for the end-of-session evaluation request.
    pub rubric: String,
}

impl PromptSet {
    #[must_use]
    pub fn ielts_examiner() -> Self {
        let system = "You are an IELTS examiner conducting a speaking test. \
            Engage naturally with the user, providing thoughtful and relevant \
            responses. Make sure to stay on topic based on the user's input, \
            and ask follow-up questions wherever appropriate. Maintain the \
            context of the entire conversation to ensure coherence."
            .to_owned();

        let greeting = "Hello, let's start the conversation. Please ask me a \
            question or tell me something about yourself."
            .to_owned();

        let rubric = "Analyze the following conversation based on IELTS \
            Speaking criteria, including Fluency and Coherence, Lexical \
            Resource, Grammatical Range and Accuracy, and Pronunciation. For \
            each criterion, provide detailed feedback and offer specific \
            suggestions for improvement. When possible, suggest alternative \
            words or phrases that could enhance the response. For example, \
            recommend using \"however\" instead of \"but\" to improve the \
            lexical resource. End each criterion section with a line in the \
            form \"Score: n/9\", separate the sections with blank lines, and \
            finish with a final line in the form \"Overall Band Score: n/9\"."
            .to_owned();

        Self {
            system,
            greeting,
            rubric,
        }
    }

    /// The full evaluation request for a rendered conversation transcript.
    #[must_use]
    pub fn analysis_request(&self, labeled_transcript: &str) -> String {
        format!(
            "{}\n\nHere is the conversation:\n{labeled_transcript}",
            self.rubric
        )
    }
}
