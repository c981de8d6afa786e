//! LLM transcript polishing
//!
//! Rewrites raw dictation into clean written text through an
//! OpenAI-compatible chat completions endpoint (Ollama, llama.cpp server,
//! OpenAI, ...). Long transcripts can be routed to a different model.

use crate::config::LlmConfig;
use crate::error::PolishError;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "\
You are a dictation proofreading editor. Rewrite raw speech-to-text output \
as clean written text.

Rules:
1. Keep all meaningful content; never summarize or drop information
2. Remove filler words (um, uh, you know, like, I mean) and meaningless repetition
3. Fix obvious speech-recognition homophone errors from context
4. Restore proper nouns and technical terms the recognizer mangled
5. Add punctuation and sentence breaks
6. Preserve the original meaning; add nothing that was not said

Output only the edited text, with no explanation.";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Polish a raw transcript. Whitespace-only input is returned unchanged.
pub fn polish_text(raw_text: &str, config: &LlmConfig) -> Result<String, PolishError> {
    if raw_text.trim().is_empty() {
        return Ok(raw_text.to_string());
    }

    let model = pick_model(config, raw_text.chars().count());
    let url = chat_url(&config.api_base);
    tracing::debug!("Polishing {} chars with {}", raw_text.chars().count(), model);

    let body = serde_json::json!({
        "model": model,
        "messages": [
            {"role": "system", "content": SYSTEM_PROMPT},
            {"role": "user", "content": user_prompt(raw_text)},
        ],
        "temperature": 0.3,
        "max_tokens": 512,
    });

    let mut agent_builder = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT);
    if !config.proxy.is_empty() {
        let proxy = ureq::Proxy::new(&config.proxy)
            .map_err(|e| PolishError::Network(format!("Invalid proxy: {}", e)))?;
        agent_builder = agent_builder.proxy(proxy);
    }
    let agent = agent_builder.build();

    let mut request = agent.post(&url);
    if !config.api_key.is_empty() {
        request = request.set("Authorization", &format!("Bearer {}", config.api_key));
    }

    let response = request.send_json(&body).map_err(|e| match e {
        ureq::Error::Status(code, resp) => {
            let body = resp.into_string().unwrap_or_default();
            PolishError::Api(format!("Server returned {}: {}", code, body))
        }
        ureq::Error::Transport(t) => PolishError::Network(t.to_string()),
    })?;

    let json: serde_json::Value = response
        .into_json()
        .map_err(|e| PolishError::Api(format!("Failed to parse response: {}", e)))?;

    let content = json["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or_default()
        .trim();

    // An empty completion is not worth failing the pipeline over.
    if content.is_empty() {
        tracing::warn!("LLM returned empty content, keeping raw transcript");
        return Ok(raw_text.to_string());
    }
    Ok(content.to_string())
}

fn user_prompt(raw_text: &str) -> String {
    format!("Input: {}\nOutput:", raw_text)
}

fn chat_url(api_base: &str) -> String {
    format!("{}/chat/completions", api_base.trim_end_matches('/'))
}

/// Choose the model: the long-text model applies above the configured
/// character threshold when one is set.
fn pick_model<'a>(config: &'a LlmConfig, chars: usize) -> &'a str {
    match &config.long_model {
        Some(long_model) if chars > config.long_threshold => long_model,
        _ => &config.model,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_returned_unchanged() {
        let config = LlmConfig::default();
        assert_eq!(polish_text("", &config).unwrap(), "");
        assert_eq!(polish_text("   ", &config).unwrap(), "   ");
    }

    #[test]
    fn test_chat_url_building() {
        assert_eq!(
            chat_url("http://localhost:11434/v1"),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(
            chat_url("http://localhost:11434/v1/"),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn test_user_prompt_format() {
        assert_eq!(user_prompt("hello"), "Input: hello\nOutput:");
    }

    #[test]
    fn test_model_routing_by_length() {
        let mut config = LlmConfig::default();
        config.model = "small-model".to_string();
        config.long_model = Some("big-model".to_string());
        config.long_threshold = 10;

        assert_eq!(pick_model(&config, 5), "small-model");
        assert_eq!(pick_model(&config, 10), "small-model");
        assert_eq!(pick_model(&config, 11), "big-model");
    }

    #[test]
    fn test_no_long_model_always_uses_default() {
        let config = LlmConfig::default();
        assert_eq!(pick_model(&config, 100_000), config.model);
    }
}
