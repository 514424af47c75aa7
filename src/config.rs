//! Configuration management for newsvoice-rs.
//!
//! Loads config from YAML files in standard locations. Every section has
//! defaults, so a missing or partial file still yields a working setup.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::pipeline::cache::AudioFormat;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub target_ratio: f32,
    pub fallback_summary_chars: usize,
    pub max_concurrent_articles: usize,
    pub article_timeout_secs: u64,
    pub summarize_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_ratio: 0.4,
            fallback_summary_chars: 200,
            max_concurrent_articles: 3,
            article_timeout_secs: 120,
            summarize_attempts: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarizerBackend {
    Ollama,
    Extractive,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SummarizationConfig {
    pub backend: SummarizerBackend,
    pub model: String,
    pub host: String,
    pub timeout_secs: u64,
    pub max_input_chars: usize,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            backend: SummarizerBackend::Ollama,
            model: "llama3.2:3b".into(),
            host: "http://localhost:11434".into(),
            timeout_secs: 30,
            max_input_chars: 4096,
        }
    }
}

/// An external TTS program. Arguments may use `{text}`, `{wpm}`, `{pitch}`,
/// `{speed}` and `{length_scale}` placeholders.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandEngineConfig {
    pub id: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub text_via_stdin: bool,
    #[serde(default = "default_engine_format")]
    pub format: AudioFormat,
    #[serde(default = "default_engine_timeout")]
    pub timeout_secs: u64,
}

fn default_engine_format() -> AudioFormat {
    AudioFormat::Wav
}

fn default_engine_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub max_concurrent: usize,
    pub engines: Vec<CommandEngineConfig>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            engines: vec![
                CommandEngineConfig {
                    id: "piper".into(),
                    program: "piper".into(),
                    args: vec![
                        "--model".into(),
                        "en_US-lessac-medium".into(),
                        "--length_scale".into(),
                        "{length_scale}".into(),
                        "--output_file".into(),
                        "-".into(),
                    ],
                    text_via_stdin: true,
                    format: AudioFormat::Wav,
                    timeout_secs: 60,
                },
                CommandEngineConfig {
                    id: "espeak-ng".into(),
                    program: "espeak-ng".into(),
                    args: vec![
                        "--stdout".into(),
                        "-s".into(),
                        "{wpm}".into(),
                        "-p".into(),
                        "{pitch}".into(),
                        "--".into(),
                        "{text}".into(),
                    ],
                    text_via_stdin: false,
                    format: AudioFormat::Wav,
                    timeout_secs: 5,
                },
            ],
        }
    }
}

/// Per-voice replacement for the global engine chain.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VoiceEngineOverride {
    pub engine_chain: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoicesConfig {
    /// Engines to try in order. The first is the voice's preferred engine;
    /// audio from any later one is reported as degraded.
    pub engine_chain: Vec<String>,
    pub overrides: HashMap<String, VoiceEngineOverride>,
}

impl VoicesConfig {
    pub fn with_chain(chain: &[&str]) -> Self {
        Self {
            engine_chain: chain.iter().map(|s| s.to_string()).collect(),
            overrides: HashMap::new(),
        }
    }
}

impl Default for VoicesConfig {
    fn default() -> Self {
        Self::with_chain(&["piper", "espeak-ng", "synthetic"])
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub max_age_days: u64,
    pub sweep_interval_secs: u64,
}

impl CacheConfig {
    /// `max_age_days` as a duration; huge values saturate instead of wrapping.
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_days.saturating_mul(24 * 3600))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("newsvoice/audio"),
            max_age_days: 7,
            sweep_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".newsvoice-history"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub summarization: SummarizationConfig,
    pub synthesis: SynthesisConfig,
    pub voices: VoicesConfig,
    pub cache: CacheConfig,
    pub api: ApiConfig,
    pub history: HistoryConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/newsvoice/config.yaml
    /// 3. /etc/newsvoice/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/newsvoice/config.yaml")),
                Some(PathBuf::from("/etc/newsvoice/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::from_yaml(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yml::Error> {
        let mut config: Self = serde_yml::from_str(contents)?;
        config.clamp();
        Ok(config)
    }

    /// Pull out-of-range values back to something usable.
    fn clamp(&mut self) {
        if !(self.pipeline.target_ratio > 0.0 && self.pipeline.target_ratio <= 1.0) {
            tracing::warn!(
                "target_ratio {} out of range, using 0.4",
                self.pipeline.target_ratio
            );
            self.pipeline.target_ratio = 0.4;
        }
        self.pipeline.max_concurrent_articles = self.pipeline.max_concurrent_articles.max(1);
        self.pipeline.summarize_attempts = self.pipeline.summarize_attempts.max(1);
        self.synthesis.max_concurrent = self.synthesis.max_concurrent.max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = Config::from_yaml(
            "pipeline:\n  max_concurrent_articles: 8\nsummarization:\n  backend: extractive\n",
        )
        .unwrap();
        assert_eq!(config.pipeline.max_concurrent_articles, 8);
        assert_eq!(config.pipeline.fallback_summary_chars, 200);
        assert_eq!(config.summarization.backend, SummarizerBackend::Extractive);
        assert_eq!(config.synthesis.engines.len(), 2);
        assert_eq!(config.cache.max_age_days, 7);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let config = Config::from_yaml(
            "pipeline:\n  target_ratio: 3.0\n  max_concurrent_articles: 0\nsynthesis:\n  max_concurrent: 0\n  engines: []\n",
        )
        .unwrap();
        assert_eq!(config.pipeline.target_ratio, 0.4);
        assert_eq!(config.pipeline.max_concurrent_articles, 1);
        assert_eq!(config.synthesis.max_concurrent, 1);
        assert!(config.synthesis.engines.is_empty());
    }

    #[test]
    fn voice_overrides_parse() {
        let config = Config::from_yaml(
            "voices:\n  overrides:\n    morgan_freeman:\n      engine_chain: [xtts, piper]\n",
        )
        .unwrap();
        let o = &config.voices.overrides["morgan_freeman"];
        assert_eq!(o.engine_chain, vec!["xtts", "piper"]);
        assert_eq!(config.voices.engine_chain, vec!["piper", "espeak-ng", "synthetic"]);
    }

    #[test]
    fn espeak_text_follows_option_terminator() {
        let config = SynthesisConfig::default();
        let espeak = config.engines.iter().find(|e| e.id == "espeak-ng").unwrap();
        let n = espeak.args.len();
        assert_eq!(espeak.args[n - 2..], ["--", "{text}"]);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/newsvoice.yaml")));
        assert_eq!(config.api.port, 8000);
    }

    #[test]
    fn cache_max_age_saturates() {
        let mut cache = CacheConfig::default();
        assert_eq!(cache.max_age(), Duration::from_secs(7 * 24 * 3600));
        cache.max_age_days = u64::MAX;
        assert_eq!(cache.max_age(), Duration::from_secs(u64::MAX));
    }
}
