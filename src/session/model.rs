use std::future::Future;
use std::time::Instant;

use thiserror::Error;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One exchanged message. Immutable once appended to a history.
#[derive(Clone, Debug)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

/// Ordered, append-only record of the exchanged turns. The insertion order
/// defines the context sent to the examiner model; turns are never edited or
/// reordered after being appended.
#[derive(Clone, Default, Debug)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(ConversationTurn {
            role: Role::User,
            content: content.into(),
        });
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(ConversationTurn {
            role: Role::Assistant,
            content: content.into(),
        });
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    #[must_use]
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Render the conversation with speaker labels, one turn per line, the
    /// way the evaluation prompt presents it to the model.
    #[must_use]
    pub fn render_labeled(&self) -> String {
        self.turns
            .iter()
            .map(|turn| {
                let label = match turn.role {
                    Role::User => "You",
                    Role::Assistant | Role::System => "AI",
                };
                format!("{label}: {}", turn.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The line log shown to the learner while the session runs: what they said,
/// what the examiner replied, and any inline errors.
#[derive(Clone, Default, Debug)]
pub struct Transcript {
    lines: Vec<String>,
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

/// A finalized unit of recognized speech. Transient; the orchestrator folds
/// it into the [`ConversationHistory`].
#[derive(Clone, Debug)]
pub struct Utterance {
    pub text: String,
    pub heard_at: Instant,
}

impl Utterance {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            heard_at: Instant::now(),
        }
    }
}

/// A call to the conversational language-model service failed. Recoverable:
/// the orchestrator surfaces the description inline and keeps the session
/// alive.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service answered with a non-success status. Carries the upstream
    /// status description, which is shown to the learner verbatim.
    #[error("{0}")]
    Status(String),

    #[error("could not reach the language service: {0}")]
    Transport(String),

    #[error("could not decode the language service response: {0}")]
    Decode(String),

    #[error("the language service returned no completion")]
    EmptyCompletion,
}

/// The conversational examiner backing a session: one method drives a single
/// dialogue turn, the other produces the end-of-session evaluation. Both
/// receive a snapshot of the history so the model always sees the turns
/// appended before the call, in order, and nothing else.
pub trait ExaminerModel {
    fn converse(
        &self,
        history: ConversationHistory,
        user_message: String,
    ) -> impl Future<Output = Result<String, ServiceError>>;

    fn analyze(
        &self,
        history: ConversationHistory,
    ) -> impl Future<Output = Result<String, ServiceError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_keeps_insertion_order() {
        let mut history = ConversationHistory::new();
        history.push_assistant("Good morning. Shall we begin?");
        history.push_user("Yes, I am ready.");
        history.push_assistant("Tell me about your hometown.");

        let roles: Vec<Role> = history.turns().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn clear_starts_a_fresh_session() {
        let mut history = ConversationHistory::new();
        history.push_user("left over from the last run");
        history.clear();
        assert!(history.is_empty());
    }

    #[test]
    fn labeled_rendering_alternates_speakers() {
        let mut history = ConversationHistory::new();
        history.push_user("I work as a teacher");
        history.push_assistant("What subject do you teach?");

        assert_eq!(
            history.render_labeled(),
            "You: I work as a teacher\nAI: What subject do you teach?"
        );
    }
}
