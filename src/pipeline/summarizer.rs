//! Summarization: model collaborators plus the adapter the pipeline calls.
//!
//! The adapter makes exactly one bounded attempt per call and normalizes
//! every failure to `SummarizationError`. Retrying and truncation fallback
//! are the orchestrator's business.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, warn};

use super::speech_text::split_sentences;
use crate::config::{SummarizationConfig, SummarizerBackend};
use crate::error::SummarizationError;

const SUMMARIZE_PROMPT: &str = r#"Summarize this news article in about {words} words suitable for text-to-speech. Be concise and factual. Output ONLY the summary, nothing else.

Article: {text}

Summary:"#;

/// Text shorter than this is spoken as-is.
const MIN_SUMMARIZABLE_CHARS: usize = 50;

/// A summarization model.
#[async_trait]
pub trait Summarizer: Send + Sync {
    fn name(&self) -> &str;

    /// Reduce `text` to roughly `target_ratio` of its length.
    async fn summarize(&self, text: &str, target_ratio: f32) -> Result<String, SummarizationError>;
}

pub struct OllamaSummarizer {
    model: String,
    host: String,
    client: Client,
}

impl OllamaSummarizer {
    pub fn new(model: &str, host: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().build()?;
        Ok(Self {
            model: model.to_string(),
            host: host.to_string(),
            client,
        })
    }
}

#[async_trait]
impl Summarizer for OllamaSummarizer {
    fn name(&self) -> &str {
        &self.model
    }

    async fn summarize(&self, text: &str, target_ratio: f32) -> Result<String, SummarizationError> {
        let word_count = text.split_whitespace().count();
        let target_words = ((word_count as f32 * target_ratio).round() as usize).max(15);
        let prompt = SUMMARIZE_PROMPT
            .replace("{words}", &target_words.to_string())
            .replace("{text}", text);

        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": 0.3,
                // Roughly 1.5 tokens per word plus headroom.
                "num_predict": target_words * 2
            }
        });

        let url = format!("{}/api/generate", self.host);
        let resp = self.client.post(&url).json(&body).send().await.map_err(|e| {
            if e.is_connect() {
                SummarizationError::Unavailable(format!("cannot connect to Ollama at {}", self.host))
            } else {
                SummarizationError::Unavailable(format!("Ollama request failed: {e}"))
            }
        })?;

        if !resp.status().is_success() {
            return Err(SummarizationError::Unavailable(format!(
                "Ollama returned status {}",
                resp.status()
            )));
        }

        let data = resp
            .json::<serde_json::Value>()
            .await
            .map_err(|e| SummarizationError::Unavailable(format!("bad Ollama response: {e}")))?;
        let result = data["response"].as_str().unwrap_or("").trim().to_string();
        if result.is_empty() {
            return Err(SummarizationError::Unavailable("Ollama returned empty response".into()));
        }
        Ok(result)
    }
}

/// Lead-sentence extraction. Deterministic and local.
pub struct ExtractiveSummarizer;

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn summarize(&self, text: &str, target_ratio: f32) -> Result<String, SummarizationError> {
        let total_words = text.split_whitespace().count();
        if total_words == 0 {
            return Err(SummarizationError::Unavailable("empty input".into()));
        }
        let budget = ((total_words as f32 * target_ratio).ceil() as usize).max(1);

        let mut picked: Vec<&str> = Vec::new();
        let mut words = 0;
        for sentence in split_sentences(text) {
            let n = sentence.split_whitespace().count();
            if !picked.is_empty() && words + n > budget {
                break;
            }
            picked.push(sentence);
            words += n;
        }
        Ok(picked.join(" "))
    }
}

pub struct SummarizationAdapter {
    summarizer: Box<dyn Summarizer>,
    timeout: Duration,
    max_input_chars: usize,
}

impl SummarizationAdapter {
    pub fn new(summarizer: Box<dyn Summarizer>, timeout: Duration, max_input_chars: usize) -> Self {
        Self {
            summarizer,
            timeout,
            max_input_chars,
        }
    }

    pub fn from_config(config: &SummarizationConfig) -> Result<Self, reqwest::Error> {
        let summarizer: Box<dyn Summarizer> = match config.backend {
            SummarizerBackend::Ollama => Box::new(OllamaSummarizer::new(&config.model, &config.host)?),
            SummarizerBackend::Extractive => Box::new(ExtractiveSummarizer),
        };
        info!("Summarizer: {}", summarizer.name());
        Ok(Self::new(
            summarizer,
            Duration::from_secs(config.timeout_secs),
            config.max_input_chars,
        ))
    }

    pub fn model_name(&self) -> &str {
        self.summarizer.name()
    }

    /// One attempt, bounded by the configured timeout.
    pub async fn summarize(&self, body_text: &str, target_ratio: f32) -> Result<String, SummarizationError> {
        let input = preprocess(body_text, self.max_input_chars);
        if input.chars().count() < MIN_SUMMARIZABLE_CHARS {
            debug!("Text too short to summarize ({} chars)", input.len());
            return Ok(input);
        }

        let t_start = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.summarizer.summarize(&input, target_ratio))
            .await
            .unwrap_or(Err(SummarizationError::TimedOut(self.timeout)));
        let latency_ms = t_start.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(summary) => info!(
                "Summarized {} chars → {} chars ({latency_ms:.0}ms)",
                input.len(),
                summary.len()
            ),
            Err(e) => warn!("Summarizer {} failed after {latency_ms:.0}ms: {e}", self.summarizer.name()),
        }
        result
    }
}

/// Collapse whitespace and cap the input, preferring to end on a full stop
/// when one falls in the last fifth of the cut.
fn preprocess(text: &str, max_chars: usize) -> String {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.chars().count() <= max_chars {
        return text;
    }
    let cut: String = text.chars().take(max_chars).collect();
    match cut.rfind('.') {
        Some(pos) if pos as f64 > cut.len() as f64 * 0.8 => cut[..=pos].to_string(),
        _ => cut,
    }
}

/// Truncation fallback used when the model is unavailable: at most
/// `max_chars` characters, cut at a word boundary, with an ellipsis.
pub fn truncate_summary(text: &str, max_chars: usize) -> String {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.chars().count() <= max_chars {
        return text;
    }
    let mut out = String::new();
    for word in text.split(' ') {
        if out.chars().count() + word.chars().count() + 1 > max_chars {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    if out.is_empty() {
        out = text.chars().take(max_chars).collect();
    }
    out.push_str("...");
    out
}
