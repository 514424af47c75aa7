//! Concrete speech engines.
//!
//! - `CommandEngine`: an external TTS program (piper, espeak-ng) that writes
//!   audio to stdout.
//! - `SyntheticEngine`: built-in tone renderer. Always available, lowest
//!   fidelity; meant as the end of a fallback chain.

use std::f32::consts::PI;
use std::io::Cursor;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::cache::AudioFormat;
use super::synthesis::{EngineOutput, EngineRegistry, SpeechEngine};
use super::voices::ToneParams;
use crate::config::{CommandEngineConfig, SynthesisConfig};
use crate::error::EngineError;

pub const SYNTHETIC_ENGINE_ID: &str = "synthetic";

/// espeak-ng's default speaking rate in words per minute.
const BASE_WPM: f32 = 175.0;

pub struct CommandEngine {
    config: CommandEngineConfig,
}

impl CommandEngine {
    pub fn new(config: CommandEngineConfig) -> Self {
        Self { config }
    }

    fn render_args(&self, text: &str, tone: &ToneParams) -> Vec<String> {
        let wpm = (BASE_WPM * tone.pace).round() as u32;
        // espeak-ng pitch is 0..=99 around 50; roughly 4 steps per semitone.
        let pitch = (50.0 + tone.pitch_bias * 4.0).round().clamp(0.0, 99.0) as u32;
        let speed = format!("{:.2}", tone.pace);
        let length_scale = format!("{:.2}", 1.0 / tone.pace);

        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{wpm}", &wpm.to_string())
                    .replace("{pitch}", &pitch.to_string())
                    .replace("{speed}", &speed)
                    .replace("{length_scale}", &length_scale)
                    .replace("{text}", text)
            })
            .collect()
    }
}

#[async_trait]
impl SpeechEngine for CommandEngine {
    fn id(&self) -> &str {
        &self.config.id
    }

    /// Neither piper nor espeak-ng has a warmth control; warmer voices get
    /// a slightly lower pitch instead.
    fn map_tone(&self, tone: &ToneParams) -> ToneParams {
        ToneParams {
            warmth: tone.warmth.clamp(0.0, 1.0),
            pace: tone.pace.clamp(0.5, 2.0),
            pitch_bias: (tone.pitch_bias - (tone.warmth - 0.5) * 2.0).clamp(-12.0, 12.0),
        }
    }

    async fn synthesize(&self, text: &str, tone: &ToneParams) -> Result<EngineOutput, EngineError> {
        if text.contains('\0') {
            return Err(EngineError::UnsupportedInput("text contains NUL".into()));
        }

        let args = self.render_args(text, tone);
        debug!("Running {} {:?}", self.config.program, args);

        let mut child = Command::new(&self.config.program)
            .args(&args)
            .stdin(if self.config.text_via_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    EngineError::Unavailable(format!("{} not found", self.config.program))
                } else {
                    EngineError::Unavailable(format!("failed to start {}: {e}", self.config.program))
                }
            })?;

        // Write text to stdin and close it
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(|e| EngineError::Crashed(format!("stdin write failed: {e}")))?;
            stdin
                .write_all(b"\n")
                .await
                .map_err(|e| EngineError::Crashed(format!("stdin write failed: {e}")))?;
        }

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| EngineError::TimedOut(self.config.timeout_secs))?
            .map_err(|e| EngineError::Crashed(e.to_string()))?;

        if !output.status.success() {
            let err = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Crashed(format!(
                "{} exited with {}: {}",
                self.config.program,
                output.status,
                err.trim()
            )));
        }

        Ok(EngineOutput {
            bytes: output.stdout,
            format: self.config.format,
        })
    }
}

/// Renders syllable-timed tones into a 16-bit mono WAV.
pub struct SyntheticEngine {
    sample_rate: u32,
}

impl SyntheticEngine {
    pub fn new() -> Self {
        Self { sample_rate: 22050 }
    }

    fn render(&self, text: &str, tone: &ToneParams) -> Result<Vec<u8>, hound::Error> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let rate = self.sample_rate as f32;
        let base_hz = 140.0 * 2f32.powf(tone.pitch_bias / 12.0);
        let pace = tone.pace.max(0.1);

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
            for word in text.split_whitespace() {
                let syllables = estimate_syllables(word);
                let seconds = 0.16 * syllables as f32 / pace;
                let n = (seconds * rate) as usize;
                // Vowel-heavy words sit a little higher.
                let hz = base_hz * (1.0 + 0.05 * (syllables as f32 - 1.0).min(4.0));
                let fade = (0.005 * rate) as usize;
                for i in 0..n {
                    let t = i as f32 / rate;
                    let envelope = (i.min(n - i) as f32 / fade.max(1) as f32).min(1.0);
                    let fundamental = (2.0 * PI * hz * t).sin();
                    let harmonic = (4.0 * PI * hz * t).sin() * tone.warmth.clamp(0.0, 1.0) * 0.5;
                    let sample = (fundamental + harmonic) * envelope * 0.3;
                    writer.write_sample((sample * i16::MAX as f32) as i16)?;
                }

                let pause = if word.ends_with(['.', '!', '?']) { 0.25 } else { 0.06 };
                for _ in 0..((pause / pace) * rate) as usize {
                    writer.write_sample(0i16)?;
                }
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }
}

impl Default for SyntheticEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechEngine for SyntheticEngine {
    fn id(&self) -> &str {
        SYNTHETIC_ENGINE_ID
    }

    async fn synthesize(&self, text: &str, tone: &ToneParams) -> Result<EngineOutput, EngineError> {
        if text.split_whitespace().next().is_none() {
            return Err(EngineError::UnsupportedInput("no words to render".into()));
        }
        let bytes = self
            .render(text, tone)
            .map_err(|e| EngineError::Crashed(format!("WAV encoding failed: {e}")))?;
        Ok(EngineOutput {
            bytes,
            format: AudioFormat::Wav,
        })
    }
}

fn estimate_syllables(word: &str) -> usize {
    let mut count = 0;
    let mut prev_vowel = false;
    for c in word.chars() {
        let vowel = matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
        if vowel && !prev_vowel {
            count += 1;
        }
        prev_vowel = vowel;
    }
    count.max(1)
}

/// Register the configured command engines plus the built-in one.
pub fn registry_from_config(config: &SynthesisConfig) -> EngineRegistry {
    let mut registry = EngineRegistry::new();
    for engine in &config.engines {
        registry.register(Arc::new(CommandEngine::new(engine.clone())));
    }
    registry.register(Arc::new(SyntheticEngine::new()));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_config(program: &str, args: &[&str]) -> CommandEngineConfig {
        CommandEngineConfig {
            id: "test".into(),
            program: program.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            text_via_stdin: false,
            format: AudioFormat::Wav,
            timeout_secs: 5,
        }
    }

    #[test]
    fn renders_placeholders() {
        let engine = CommandEngine::new(engine_config(
            "espeak-ng",
            &["-s", "{wpm}", "-p", "{pitch}", "--length_scale", "{length_scale}", "{text}"],
        ));
        let tone = ToneParams {
            warmth: 0.5,
            pace: 0.8,
            pitch_bias: -5.0,
        };
        let args = engine.render_args("Hello world", &tone);
        assert_eq!(args, vec!["-s", "140", "-p", "30", "--length_scale", "1.25", "Hello world"]);
    }

    #[test]
    fn map_tone_clamps_into_engine_range() {
        let engine = CommandEngine::new(engine_config("espeak-ng", &[]));
        let mapped = engine.map_tone(&ToneParams {
            warmth: 1.0,
            pace: 5.0,
            pitch_bias: -20.0,
        });
        assert_eq!(mapped.pace, 2.0);
        assert_eq!(mapped.pitch_bias, -12.0);
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let engine = CommandEngine::new(engine_config("/nonexistent/tts-binary", &["{text}"]));
        let err = engine.synthesize("Hello", &ToneParams::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_from_program() {
        let mut config = engine_config("cat", &[]);
        config.text_via_stdin = true;
        let engine = CommandEngine::new(config);
        let out = engine.synthesize("spoken words", &ToneParams::default()).await.unwrap();
        assert_eq!(out.bytes, b"spoken words\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_a_crash() {
        let engine = CommandEngine::new(engine_config("false", &[]));
        let err = engine.synthesize("Hello", &ToneParams::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::Crashed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_program_times_out() {
        let mut config = engine_config("sleep", &["10"]);
        config.timeout_secs = 1;
        let engine = CommandEngine::new(config);
        let err = engine.synthesize("Hello", &ToneParams::default()).await.unwrap_err();
        assert_eq!(err, EngineError::TimedOut(1));
    }

    #[tokio::test]
    async fn synthetic_engine_writes_valid_wav() {
        let engine = SyntheticEngine::new();
        let out = engine
            .synthesize("Good evening. Here are the headlines.", &ToneParams::default())
            .await
            .unwrap();
        assert_eq!(out.format, AudioFormat::Wav);
        assert_eq!(&out.bytes[..4], b"RIFF");

        let reader = hound::WavReader::new(Cursor::new(out.bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 22050);
        assert!(reader.duration() > 22050);
    }

    #[tokio::test]
    async fn synthetic_engine_rejects_blank_text() {
        let err = SyntheticEngine::new()
            .synthesize(" ", &ToneParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedInput(_)));
    }

    #[test]
    fn default_registry_includes_builtin_engine() {
        let registry = registry_from_config(&SynthesisConfig::default());
        assert_eq!(registry.ids(), vec!["espeak-ng", "piper", "synthetic"]);
    }

    #[test]
    fn syllable_estimate() {
        assert_eq!(estimate_syllables("news"), 1);
        assert_eq!(estimate_syllables("headlines"), 3);
        assert_eq!(estimate_syllables("x"), 1);
    }
}
