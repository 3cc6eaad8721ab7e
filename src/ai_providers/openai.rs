//! Examiner backend on the OpenAI chat completions API. One client serves
//! both the per-turn conversation calls and the long-form evaluation call;
//! the two only differ in their message list and token budget.

use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::prompts::PromptSet;
use crate::session::{ConversationHistory, ConversationTurn, ExaminerModel, Role, ServiceError};

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

// Turn replies are meant to be spoken, so they stay short. The evaluation is
// long-form prose and gets a much larger budget.
const TURN_MAX_TOKENS: u32 = 150;
const ANALYSIS_MAX_TOKENS: u32 = 2048;

const TEMPERATURE: f32 = 0.7;

pub struct ChatCompletionsClient {
    api_key: String,
    model: String,
    prompts: PromptSet,
    client: ReqwestClient,
}

impl ChatCompletionsClient {
    #[must_use]
    pub fn new(config: &Config, prompts: PromptSet) -> Self {
        Self {
            api_key: config.openai_key.clone(),
            model: config.chat_model.clone(),
            prompts,
            client: ReqwestClient::new(),
        }
    }

    /// Message list for a dialogue turn: the system priming message, the
    /// entire accumulated history, then the new user message. The service
    /// keeps no session state, so the full history travels on every call.
    fn turn_messages(&self, history: &ConversationHistory, user_message: String) -> Vec<WireMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(WireMessage {
            role: WireRole::System,
            content: self.prompts.system.clone(),
        });
        messages.extend(history.turns().iter().map(WireMessage::from_turn));
        messages.push(WireMessage {
            role: WireRole::User,
            content: user_message,
        });
        messages
    }

    async fn complete(
        &self,
        messages: Vec<WireMessage>,
        max_tokens: u32,
    ) -> Result<String, ServiceError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            max_tokens,
            n: 1,
            stop: None,
            temperature: TEMPERATURE,
        };

        let response = self
            .client
            .post(CHAT_COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| ServiceError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let description = status
                .canonical_reason()
                .unwrap_or(status.as_str())
                .to_owned();
            return Err(ServiceError::Status(description));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|err| ServiceError::Decode(err.to_string()))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or(ServiceError::EmptyCompletion)?;
        Ok(choice.message.content.trim().to_owned())
    }
}

impl ExaminerModel for ChatCompletionsClient {
    async fn converse(
        &self,
        history: ConversationHistory,
        user_message: String,
    ) -> Result<String, ServiceError> {
        let messages = self.turn_messages(&history, user_message);
        self.complete(messages, TURN_MAX_TOKENS).await
    }

    async fn analyze(&self, history: ConversationHistory) -> Result<String, ServiceError> {
        let request = self.prompts.analysis_request(&history.render_labeled());
        let messages = vec![WireMessage {
            role: WireRole::User,
            content: request,
        }];
        self.complete(messages, ANALYSIS_MAX_TOKENS).await
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    n: u8,
    // Always serialized, as an explicit null when unset.
    stop: Option<String>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: WireRole,
    content: String,
}

impl WireMessage {
    fn from_turn(turn: &ConversationTurn) -> Self {
        let role = match turn.role {
            Role::User => WireRole::User,
            Role::Assistant => WireRole::Assistant,
            Role::System => WireRole::System,
        };
        Self {
            role,
            content: turn.content.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum WireRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: WireMessage,
}
