//! Synthesis adapter: ordered engine chain with fallback.
//!
//! Each voice profile carries an ordered engine chain. The adapter walks
//! it and the first success wins. Every engine failure along the way is
//! kept so the caller can see what was tried.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::cache::AudioFormat;
use super::voices::{ToneParams, VoiceProfile};
use crate::error::{EngineAttempt, EngineError, SynthesisError};

/// Raw engine output.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOutput {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
}

/// A text-to-speech engine.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Unique engine id, as referenced by voice profiles.
    fn id(&self) -> &str;

    /// Map profile tone onto what this engine can express. Best effort.
    fn map_tone(&self, tone: &ToneParams) -> ToneParams {
        *tone
    }

    async fn synthesize(&self, text: &str, tone: &ToneParams) -> Result<EngineOutput, EngineError>;
}

#[derive(Default, Clone)]
pub struct EngineRegistry {
    engines: HashMap<String, Arc<dyn SpeechEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, engine: Arc<dyn SpeechEngine>) {
        let id = engine.id().to_string();
        if self.engines.insert(id.clone(), engine).is_some() {
            warn!("Engine {id} registered twice, keeping the latest");
        }
    }

    pub fn with(mut self, engine: Arc<dyn SpeechEngine>) -> Self {
        self.register(engine);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn SpeechEngine>> {
        self.engines.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.engines.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Successful synthesis, tagged with the engine that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
    pub engine_used: String,
    /// Engines that failed before this one succeeded.
    pub failed_attempts: Vec<EngineAttempt>,
}

pub struct SynthesisAdapter {
    registry: EngineRegistry,
    gate: Arc<Semaphore>,
    max_concurrent: usize,
}

impl SynthesisAdapter {
    /// `max_concurrent` bounds in-flight engine calls across all articles.
    pub fn new(registry: EngineRegistry, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            registry,
            gate: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub fn engine_ids(&self) -> Vec<String> {
        self.registry.ids()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn has_engine(&self, id: &str) -> bool {
        self.registry.get(id).is_some()
    }

    pub async fn synthesize(
        &self,
        text: &str,
        profile: &VoiceProfile,
    ) -> Result<SynthesizedAudio, SynthesisError> {
        self.synthesize_within(text, profile, None).await
    }

    /// Like `synthesize`, with `deadline` bounding the engine chain. The
    /// clock starts once a gate slot is held, so time spent queued behind
    /// other callers does not count.
    pub async fn synthesize_within(
        &self,
        text: &str,
        profile: &VoiceProfile,
        deadline: Option<Duration>,
    ) -> Result<SynthesizedAudio, SynthesisError> {
        if text.trim().is_empty() {
            return Err(SynthesisError::NoText);
        }

        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| SynthesisError::Cancelled)?;

        match deadline {
            Some(limit) => tokio::time::timeout(limit, self.run_chain(text, profile))
                .await
                .map_err(|_| SynthesisError::DeadlineExceeded(limit))?,
            None => self.run_chain(text, profile).await,
        }
    }

    async fn run_chain(&self, text: &str, profile: &VoiceProfile) -> Result<SynthesizedAudio, SynthesisError> {
        let mut attempts: Vec<EngineAttempt> = Vec::new();
        for engine_id in profile.engine_chain() {
            let Some(engine) = self.registry.get(engine_id) else {
                warn!("Voice {} references unknown engine {engine_id}", profile.id);
                attempts.push(EngineAttempt {
                    engine: engine_id.to_string(),
                    error: EngineError::NotRegistered,
                });
                continue;
            };

            let tone = engine.map_tone(&profile.tone_params);
            debug!("Synthesizing {} chars with {engine_id} ({tone:?})", text.len());
            match engine.synthesize(text, &tone).await {
                Ok(out) if out.bytes.is_empty() => {
                    warn!("Engine {engine_id} returned no audio");
                    return Err(SynthesisError::EmptyOutput {
                        engine: engine_id.to_string(),
                    });
                }
                Ok(out) => {
                    if !attempts.is_empty() {
                        info!(
                            "Voice {} fell back to {engine_id} after {} failed attempt(s)",
                            profile.id,
                            attempts.len()
                        );
                    }
                    return Ok(SynthesizedAudio {
                        bytes: out.bytes,
                        format: out.format,
                        engine_used: engine_id.to_string(),
                        failed_attempts: attempts,
                    });
                }
                Err(error) => {
                    warn!("Engine {engine_id} failed: {error}");
                    attempts.push(EngineAttempt {
                        engine: engine_id.to_string(),
                        error,
                    });
                }
            }
        }

        Err(SynthesisError::Failed { attempts })
    }
}
