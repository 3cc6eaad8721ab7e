use std::{env, path::PathBuf, str::FromStr};

use anyhow::Context;

/// Fixed quiet period after the last utterance that ends a user turn.
pub const SILENCE_WINDOW_MS: u64 = 5000;

const DEFAULT_CHAT_MODEL: &str = "gpt-4";

pub struct Config {
    pub openai_key: String,
    /// Chat model used for both conversation turns and the final evaluation.
    pub chat_model: String,
    /// When set, audio is replayed from this PCM file instead of the
    /// microphone. Useful on machines without a working capture device.
    pub audio_file: Option<PathBuf>,
}

const ENV_PREFIX: &str = "VIVA_COACH__";

pub fn from_env() -> anyhow::Result<Config> {
    let openai_key = get_env("OPENAI_KEY")?;
    let chat_model =
        get_opt_env("CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_owned());
    let audio_file = get_opt_env("AUDIO_FILE")
        .map(|s| PathBuf::from_str(&s).context("Could not parse provided audio file path"))
        .map_or(Ok(None), |v| v.map(Some))?;

    Ok(Config {
        openai_key,
        chat_model,
        audio_file,
    })
}

fn get_env(key: &str) -> anyhow::Result<String> {
    env::var(format!("{ENV_PREFIX}{key}")).context(format!(
        "environment variable {ENV_PREFIX}{key} is required"
    ))
}

fn get_opt_env(key: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{key}")).ok()
}
