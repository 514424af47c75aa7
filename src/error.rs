//! Error taxonomy for the article pipeline.
//!
//! Only [`PipelineError`] ever fails a whole batch. Everything else is
//! recovered at the article boundary and shows up on the `ProcessedArticle`.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Request-level failures. A batch only ever fails with `VoiceNotFound`;
/// single-text synthesis can also surface the engine chain's error.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unknown voice preset: {0}")]
    VoiceNotFound(String),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
}

/// Summarization failures. The orchestrator recovers these with truncation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SummarizationError {
    #[error("Summarization unavailable: {0}")]
    Unavailable(String),

    #[error("Summarization timed out after {0:?}")]
    TimedOut(Duration),
}

/// A single engine's failure. Any of these moves the synthesis chain on.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum EngineError {
    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    #[error("Engine crashed: {0}")]
    Crashed(String),

    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("Engine timed out after {0}s")]
    TimedOut(u64),

    #[error("Engine is not registered")]
    NotRegistered,
}

/// One failed attempt in the engine chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineAttempt {
    pub engine: String,
    pub error: EngineError,
}

impl std::fmt::Display for EngineAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.engine, self.error)
    }
}

/// Synthesis failures, recovered per article as `SynthesisStatus::Failed`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SynthesisError {
    #[error("Synthesis failed on every engine [{}]", format_attempts(.attempts))]
    Failed { attempts: Vec<EngineAttempt> },

    #[error("Engine {engine} produced no audio")]
    EmptyOutput { engine: String },

    #[error("No speakable text")]
    NoText,

    #[error("Synthesis cancelled")]
    Cancelled,

    #[error("Audio not ready within {}s", .0.as_secs())]
    DeadlineExceeded(Duration),
}

impl SynthesisError {
    /// Engines that were tried before giving up.
    pub fn attempted_engines(&self) -> Vec<&str> {
        match self {
            Self::Failed { attempts } => attempts.iter().map(|a| a.engine.as_str()).collect(),
            Self::EmptyOutput { engine } => vec![engine.as_str()],
            Self::NoText | Self::Cancelled | Self::DeadlineExceeded(_) => Vec::new(),
        }
    }
}

fn format_attempts(attempts: &[EngineAttempt]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Storage-layer faults. Lookups degrade to misses, writes to inline audio.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Audio cache unavailable: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("Artifact has no cached location")]
    NotCached,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_synthesis_lists_every_attempt() {
        let err = SynthesisError::Failed {
            attempts: vec![
                EngineAttempt {
                    engine: "piper".into(),
                    error: EngineError::Unavailable("binary missing".into()),
                },
                EngineAttempt {
                    engine: "espeak-ng".into(),
                    error: EngineError::TimedOut(5),
                },
            ],
        };

        let msg = err.to_string();
        assert!(msg.contains("piper: Engine unavailable: binary missing"));
        assert!(msg.contains("espeak-ng: Engine timed out after 5s"));
        assert_eq!(err.attempted_engines(), vec!["piper", "espeak-ng"]);
    }
}
