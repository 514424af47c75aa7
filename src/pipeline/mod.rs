//! Article pipeline: summarize, fingerprint, cache, synthesize.
//!
//! `ArticlePipeline` is the only entry point. A batch resolves its voice
//! once, then runs every article as its own task; whatever happens to one
//! article (model outage, engine crash, even a panic) is recorded on that
//! article's `ProcessedArticle` and never fails the batch.

pub mod cache;
pub mod engines;
pub mod fingerprint;
pub mod history;
pub mod speech_text;
pub mod summarizer;
pub mod synthesis;
pub mod voices;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{EngineAttempt, PipelineError, SynthesisError};
use crate::feed::RawArticle;
use cache::{AudioArtifact, AudioCache};
use fingerprint::fingerprint;
use speech_text::prepare_for_speech;
use summarizer::{truncate_summary, SummarizationAdapter};
use synthesis::SynthesisAdapter;
use voices::{VoiceCatalog, VoiceProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisStatus {
    Succeeded,
    /// Audio came from a fallback engine.
    Degraded,
    Failed,
}

/// Outcome for one input article. Built once per run, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedArticle {
    pub raw: RawArticle,
    pub summary_text: String,
    pub summary_is_fallback: bool,
    pub audio: Option<AudioArtifact>,
    pub synthesis_status: SynthesisStatus,
    /// Engine that produced the audio; `None` on a cache hit or failure.
    pub engine_used: Option<String>,
    /// Engines that failed for this article, whether or not a later one
    /// produced audio.
    pub engine_failures: Vec<EngineAttempt>,
    pub error: Option<String>,
}

impl ProcessedArticle {
    fn failed(raw: RawArticle, summary_text: String, summary_is_fallback: bool, error: String) -> Self {
        Self {
            raw,
            summary_text,
            summary_is_fallback,
            audio: None,
            synthesis_status: SynthesisStatus::Failed,
            engine_used: None,
            engine_failures: Vec::new(),
            error: Some(error),
        }
    }

    /// Audio was served from the cache rather than synthesized in this run.
    pub fn is_cache_hit(&self) -> bool {
        self.audio.is_some() && self.engine_used.is_none()
    }
}

/// Per-article progress. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArticleStage {
    Pending,
    Summarized,
    SummaryFallback,
    CacheHit,
    Synthesizing,
    Succeeded,
    Failed,
}

impl ArticleStage {
    pub fn can_advance_to(self, next: ArticleStage) -> bool {
        use ArticleStage::*;
        matches!(
            (self, next),
            (Pending, Summarized | SummaryFallback | Failed)
                | (Summarized | SummaryFallback, CacheHit | Synthesizing | Failed)
                | (CacheHit | Synthesizing, Succeeded | Failed)
        )
    }
}

impl fmt::Display for ArticleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Summarized => "summarized",
            Self::SummaryFallback => "summary-fallback",
            Self::CacheHit => "cache-hit",
            Self::Synthesizing => "synthesizing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct StageTracker {
    index: usize,
    stage: ArticleStage,
}

impl StageTracker {
    fn new(index: usize) -> Self {
        Self {
            index,
            stage: ArticleStage::Pending,
        }
    }

    fn advance(&mut self, next: ArticleStage) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "illegal transition {} -> {next}",
            self.stage
        );
        debug!("Article #{}: {} -> {next}", self.index, self.stage);
        self.stage = next;
    }
}

/// Audio for one piece of text, from the cache or a fresh synthesis.
#[derive(Debug, Clone, Serialize)]
pub struct SpeechOutcome {
    pub artifact: AudioArtifact,
    pub status: SynthesisStatus,
    /// `None` when served from the cache.
    pub engine_used: Option<String>,
    pub engine_failures: Vec<EngineAttempt>,
}

impl SpeechOutcome {
    pub fn is_cache_hit(&self) -> bool {
        self.engine_used.is_none()
    }
}

struct Inner {
    catalog: VoiceCatalog,
    summarizer: SummarizationAdapter,
    synthesizer: SynthesisAdapter,
    cache: AudioCache,
    config: PipelineConfig,
}

/// Cheap to clone; clones share catalog, cache and the synthesis gate.
#[derive(Clone)]
pub struct ArticlePipeline {
    inner: Arc<Inner>,
}

impl ArticlePipeline {
    pub fn new(
        catalog: VoiceCatalog,
        summarizer: SummarizationAdapter,
        synthesizer: SynthesisAdapter,
        cache: AudioCache,
        config: PipelineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                catalog,
                summarizer,
                synthesizer,
                cache,
                config,
            }),
        }
    }

    pub fn voice_catalog(&self) -> Vec<Arc<VoiceProfile>> {
        self.inner.catalog.profiles()
    }

    pub fn voice(&self, voice_id: &str) -> Result<Arc<VoiceProfile>, PipelineError> {
        self.inner.catalog.lookup(voice_id)
    }

    /// Speak `text` as-is in one voice. Shares the cache and synthesis gate
    /// with batches; the text is its own cache key, no summarization runs.
    pub async fn speak(&self, text: &str, voice_id: &str) -> Result<SpeechOutcome, PipelineError> {
        let voice = self.inner.catalog.lookup(voice_id)?;
        Ok(self.inner.render_audio(text, &voice).await?)
    }

    pub fn summarizer(&self) -> &SummarizationAdapter {
        &self.inner.summarizer
    }

    pub fn synthesizer(&self) -> &SynthesisAdapter {
        &self.inner.synthesizer
    }

    pub fn cache(&self) -> &AudioCache {
        &self.inner.cache
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub async fn process_batch(
        &self,
        articles: Vec<RawArticle>,
        voice_id: &str,
    ) -> Result<Vec<ProcessedArticle>, PipelineError> {
        self.process_batch_with_cancel(articles, voice_id, &CancellationToken::new())
            .await
    }

    /// Process a batch; results come back in input order.
    ///
    /// Only an unknown voice fails the call. Cancelling `cancel`, or dropping
    /// the returned future, stops in-flight articles at their next suspension
    /// point; those already finished keep their results.
    pub async fn process_batch_with_cancel(
        &self,
        articles: Vec<RawArticle>,
        voice_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ProcessedArticle>, PipelineError> {
        let voice = self.inner.catalog.lookup(voice_id)?;
        let batch_token = cancel.child_token();
        let _guard = batch_token.clone().drop_guard();

        let total = articles.len();
        let limit = self.inner.config.max_concurrent_articles.max(1);
        info!("Processing {total} articles with voice {} ({limit} at a time)", voice.id);
        let t_start = Instant::now();

        let results: Vec<ProcessedArticle> = stream::iter(articles.into_iter().enumerate())
            .map(|(index, raw)| {
                let inner = self.inner.clone();
                let voice = voice.clone();
                let token = batch_token.clone();
                let fallback_chars = self.inner.config.fallback_summary_chars;
                let raw_copy = raw.clone();
                let summary_slot = Arc::new(OnceCell::<(String, bool)>::new());
                let slot = summary_slot.clone();
                async move {
                    let task = tokio::spawn(async move {
                        inner.process_article(index, raw, &voice, &token, &slot).await
                    });
                    match task.await {
                        Ok(article) => article,
                        Err(e) => {
                            warn!("Article #{index} task aborted: {e}");
                            // Keep the summary if the task got that far.
                            let (summary, is_fallback) = match summary_slot.get() {
                                Some((text, is_fallback)) => (text.clone(), *is_fallback),
                                None => (truncate_summary(&raw_copy.body_text, fallback_chars), true),
                            };
                            ProcessedArticle::failed(raw_copy, summary, is_fallback, format!("article task failed: {e}"))
                        }
                    }
                }
            })
            .buffered(limit)
            .collect()
            .await;

        let failed = results
            .iter()
            .filter(|a| a.synthesis_status == SynthesisStatus::Failed)
            .count();
        info!(
            "Batch done: {}/{total} with audio, {failed} failed ({:.1}s)",
            total - failed,
            t_start.elapsed().as_secs_f64()
        );
        Ok(results)
    }
}

impl Inner {
    async fn process_article(
        &self,
        index: usize,
        raw: RawArticle,
        voice: &VoiceProfile,
        cancel: &CancellationToken,
        summary_slot: &OnceCell<(String, bool)>,
    ) -> ProcessedArticle {
        let mut stage = StageTracker::new(index);

        let summarized = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            s = self.summarize(&raw.body_text) => Some(s),
        };
        let Some((summary_text, summary_is_fallback)) = summarized else {
            stage.advance(ArticleStage::Failed);
            let summary = truncate_summary(&raw.body_text, self.config.fallback_summary_chars);
            return ProcessedArticle::failed(raw, summary, true, "batch cancelled".into());
        };
        stage.advance(if summary_is_fallback {
            ArticleStage::SummaryFallback
        } else {
            ArticleStage::Summarized
        });
        let _ = summary_slot.set((summary_text.clone(), summary_is_fallback));

        let rendered = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = self.render_audio(&summary_text, voice) => Some(r),
        };

        match rendered {
            None => {
                stage.advance(ArticleStage::Failed);
                ProcessedArticle::failed(raw, summary_text, summary_is_fallback, "batch cancelled".into())
            }
            Some(Ok(outcome)) => {
                stage.advance(if outcome.is_cache_hit() {
                    ArticleStage::CacheHit
                } else {
                    ArticleStage::Synthesizing
                });
                stage.advance(ArticleStage::Succeeded);
                ProcessedArticle {
                    raw,
                    summary_text,
                    summary_is_fallback,
                    audio: Some(outcome.artifact),
                    synthesis_status: outcome.status,
                    engine_used: outcome.engine_used,
                    engine_failures: outcome.engine_failures,
                    error: None,
                }
            }
            Some(Err(e)) => {
                warn!(
                    "Article #{index} ({}) failed after trying {:?}: {e}",
                    raw.url,
                    e.attempted_engines()
                );
                stage.advance(ArticleStage::Synthesizing);
                stage.advance(ArticleStage::Failed);
                let error = e.to_string();
                let engine_failures = match e {
                    SynthesisError::Failed { attempts } => attempts,
                    _ => Vec::new(),
                };
                ProcessedArticle {
                    engine_failures,
                    ..ProcessedArticle::failed(raw, summary_text, summary_is_fallback, error)
                }
            }
        }
    }

    /// Summary text and whether it is the truncation fallback.
    async fn summarize(&self, body_text: &str) -> (String, bool) {
        let attempts = self.config.summarize_attempts.max(1);
        for attempt in 1..=attempts {
            match self.summarizer.summarize(body_text, self.config.target_ratio).await {
                Ok(summary) if !summary.trim().is_empty() => return (summary, false),
                Ok(_) => warn!("Summarizer returned empty text (attempt {attempt}/{attempts})"),
                Err(e) => warn!("Summarization attempt {attempt}/{attempts} failed: {e}"),
            }
        }
        (
            truncate_summary(body_text, self.config.fallback_summary_chars),
            true,
        )
    }

    /// Cache lookup, then synthesis on a miss. Cache errors never fail the
    /// article: a bad lookup is a miss and a failed write returns the audio
    /// inline. The deadline covers engine time only, not the wait for a
    /// synthesis slot.
    async fn render_audio(&self, text: &str, voice: &VoiceProfile) -> Result<SpeechOutcome, SynthesisError> {
        let fp = fingerprint(text, voice.id);

        match self.cache.get(&fp).await {
            Ok(Some(artifact)) => {
                return Ok(SpeechOutcome {
                    artifact,
                    status: SynthesisStatus::Succeeded,
                    engine_used: None,
                    engine_failures: Vec::new(),
                });
            }
            Ok(None) => {}
            Err(e) => warn!("Cache lookup for {fp} failed, synthesizing anyway: {e}"),
        }

        let spoken = prepare_for_speech(text);
        let deadline = Duration::from_secs(self.config.article_timeout_secs);
        let audio = self
            .synthesizer
            .synthesize_within(&spoken, voice, Some(deadline))
            .await?;

        let status = if voice.preferred_engine() == Some(audio.engine_used.as_str()) {
            SynthesisStatus::Succeeded
        } else {
            SynthesisStatus::Degraded
        };

        let artifact = match self.cache.put(&fp, &audio.bytes, audio.format).await {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!("Could not cache {fp}, returning audio inline: {e}");
                AudioArtifact::inline(fp, audio.bytes, audio.format)
            }
        };

        Ok(SpeechOutcome {
            artifact,
            status,
            engine_used: Some(audio.engine_used),
            engine_failures: audio.failed_attempts,
        })
    }
}
