//! HTTP API over the article pipeline.
//!
//! A thin axum layer: it resolves requests to pipeline calls and maps
//! pipeline errors to status codes. Audio is served straight from the cache
//! directory by fingerprint.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PipelineError, SynthesisError};
use crate::feed::RawArticle;
use crate::pipeline::fingerprint::CacheFingerprint;
use crate::pipeline::history::{BatchHistory, BatchRecord};
use crate::pipeline::summarizer::truncate_summary;
use crate::pipeline::voices::VoiceProfile;
use crate::pipeline::{ArticlePipeline, ProcessedArticle, SpeechOutcome};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: ArticlePipeline,
    pub history: Option<Arc<BatchHistory>>,
}

// --- Request/Response types ---

#[derive(Deserialize)]
struct NewsRequest {
    articles: Vec<RawArticle>,
    voice_preset: String,
}

#[derive(Serialize)]
struct NewsResponse {
    voice_preset: String,
    articles: Vec<ProcessedArticle>,
}

#[derive(Deserialize)]
struct SummarizeRequest {
    text: String,
    target_ratio: Option<f32>,
}

#[derive(Serialize)]
struct SummarizeResponse {
    summary: String,
    model: String,
    is_fallback: bool,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    summarizer: String,
    engines: Vec<String>,
    voices: usize,
}

#[derive(Deserialize)]
struct SpeechRequest {
    text: String,
    voice_preset: String,
}

#[derive(Serialize)]
struct SpeechResponse {
    voice_preset: String,
    cache_hit: bool,
    audio_url: String,
    #[serde(flatten)]
    outcome: SpeechOutcome,
}

#[derive(Serialize)]
struct VoiceEngines {
    voice: &'static str,
    chain: Vec<String>,
    /// Chain entries with no registered engine; always skipped.
    missing: Vec<String>,
}

#[derive(Serialize)]
struct ModelsStatusResponse {
    summarizer: String,
    engines: Vec<String>,
    synthesis_slots: usize,
    voices: Vec<VoiceEngines>,
}

#[derive(Serialize)]
struct VoiceSample {
    id: &'static str,
    display_name: &'static str,
    sample_text: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Build the axum router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/voices", get(handle_voices))
        .route("/voices/samples", get(handle_voice_samples))
        .route("/news", post(handle_news))
        .route("/summarize", post(handle_summarize))
        .route("/voice/synthesize", post(handle_voice_synthesize))
        .route("/voice/test/{voice}", post(handle_voice_test))
        .route("/models/status", get(handle_models_status))
        .route("/audio/{fingerprint}", get(handle_audio))
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(state: AppState, addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("News API listening on {addr}");
    axum::serve(listener, router(state)).await
}

// --- Handlers ---

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        summarizer: state.pipeline.summarizer().model_name().to_string(),
        engines: state.pipeline.synthesizer().engine_ids(),
        voices: state.pipeline.voice_catalog().len(),
    })
}

async fn handle_voices(State(state): State<AppState>) -> Json<Vec<VoiceProfile>> {
    Json(
        state
            .pipeline
            .voice_catalog()
            .iter()
            .map(|v| VoiceProfile::clone(v))
            .collect(),
    )
}

async fn handle_voice_samples(State(state): State<AppState>) -> Json<Vec<VoiceSample>> {
    Json(
        state
            .pipeline
            .voice_catalog()
            .iter()
            .map(|v| VoiceSample {
                id: v.id,
                display_name: v.display_name,
                sample_text: v.sample_text,
            })
            .collect(),
    )
}

async fn handle_news(State(state): State<AppState>, Json(req): Json<NewsRequest>) -> Response {
    info!(
        "HTTP /news: {} articles, voice {}",
        req.articles.len(),
        req.voice_preset
    );
    let t_start = Instant::now();

    match state.pipeline.process_batch(req.articles, &req.voice_preset).await {
        Ok(articles) => {
            if let Some(history) = &state.history {
                let latency_ms = t_start.elapsed().as_millis() as i64;
                history.save(&BatchRecord::from_results(&req.voice_preset, &articles, latency_ms));
            }
            Json(NewsResponse {
                voice_preset: req.voice_preset,
                articles,
            })
            .into_response()
        }
        Err(e) => {
            warn!("Rejected /news request: {e}");
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

fn speech_response(voice_preset: String, outcome: SpeechOutcome) -> Response {
    Json(SpeechResponse {
        voice_preset,
        cache_hit: outcome.is_cache_hit(),
        audio_url: format!("/audio/{}", outcome.artifact.fingerprint),
        outcome,
    })
    .into_response()
}

/// `unknown_voice` is the status for a voice that does not exist: 400 when
/// it came in the body, 404 when it was the path.
fn speech_error(e: PipelineError, unknown_voice: StatusCode) -> Response {
    let status = match &e {
        PipelineError::VoiceNotFound(_) => unknown_voice,
        PipelineError::Synthesis(SynthesisError::NoText) => StatusCode::BAD_REQUEST,
        PipelineError::Synthesis(SynthesisError::DeadlineExceeded(_)) => StatusCode::GATEWAY_TIMEOUT,
        PipelineError::Synthesis(SynthesisError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::Synthesis(_) => StatusCode::BAD_GATEWAY,
    };
    warn!("Speech request failed ({status}): {e}");
    error_response(status, e.to_string())
}

async fn handle_voice_synthesize(State(state): State<AppState>, Json(req): Json<SpeechRequest>) -> Response {
    if req.text.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "empty text");
    }
    info!("HTTP /voice/synthesize: {} chars, voice {}", req.text.len(), req.voice_preset);

    match state.pipeline.speak(&req.text, &req.voice_preset).await {
        Ok(outcome) => speech_response(req.voice_preset, outcome),
        Err(e) => speech_error(e, StatusCode::BAD_REQUEST),
    }
}

async fn handle_voice_test(State(state): State<AppState>, Path(voice_id): Path<String>) -> Response {
    let voice = match state.pipeline.voice(&voice_id) {
        Ok(voice) => voice,
        Err(e) => return speech_error(e, StatusCode::NOT_FOUND),
    };

    match state.pipeline.speak(voice.sample_text, voice.id).await {
        Ok(outcome) => speech_response(voice_id, outcome),
        Err(e) => speech_error(e, StatusCode::NOT_FOUND),
    }
}

async fn handle_models_status(State(state): State<AppState>) -> Json<ModelsStatusResponse> {
    let synthesizer = state.pipeline.synthesizer();
    let voices = state
        .pipeline
        .voice_catalog()
        .iter()
        .map(|v| {
            let chain: Vec<String> = v.engine_chain().into_iter().map(str::to_string).collect();
            let missing = chain.iter().filter(|e| !synthesizer.has_engine(e)).cloned().collect();
            VoiceEngines {
                voice: v.id,
                chain,
                missing,
            }
        })
        .collect();

    Json(ModelsStatusResponse {
        summarizer: state.pipeline.summarizer().model_name().to_string(),
        engines: synthesizer.engine_ids(),
        synthesis_slots: synthesizer.max_concurrent(),
        voices,
    })
}

async fn handle_summarize(State(state): State<AppState>, Json(req): Json<SummarizeRequest>) -> Response {
    if req.text.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "empty text");
    }

    let config = state.pipeline.config();
    let ratio = req
        .target_ratio
        .filter(|r| *r > 0.0 && *r <= 1.0)
        .unwrap_or(config.target_ratio);
    let summarizer = state.pipeline.summarizer();

    let (summary, is_fallback) = match summarizer.summarize(&req.text, ratio).await {
        Ok(summary) => (summary, false),
        Err(e) => {
            warn!("Summarize request fell back to truncation: {e}");
            (truncate_summary(&req.text, config.fallback_summary_chars), true)
        }
    };

    Json(SummarizeResponse {
        summary,
        model: summarizer.model_name().to_string(),
        is_fallback,
    })
    .into_response()
}

async fn handle_audio(State(state): State<AppState>, Path(fingerprint): Path<String>) -> Response {
    let fp: CacheFingerprint = match fingerprint.parse() {
        Ok(fp) => fp,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    match state.pipeline.cache().load(&fp).await {
        Ok(Some((artifact, bytes))) => {
            ([(header::CONTENT_TYPE, artifact.format.mime_type())], bytes).into_response()
        }
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("no audio for {fp}")),
        Err(e) => {
            warn!("Failed to serve audio {fp}: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
