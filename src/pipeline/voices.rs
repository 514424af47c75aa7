//! Voice profile catalog: the fixed set of celebrity-style presets.
//!
//! Built once at startup from the preset table plus configured engine
//! preferences, then shared read-only.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::config::VoicesConfig;
use crate::error::PipelineError;

/// Engine-neutral tone settings. Engines map these onto their own knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ToneParams {
    /// 0.0 (crisp) to 1.0 (warm).
    pub warmth: f32,
    /// Speaking-rate multiplier; 1.0 is the engine's default rate.
    pub pace: f32,
    /// Pitch offset in semitones.
    pub pitch_bias: f32,
}

impl Default for ToneParams {
    fn default() -> Self {
        Self {
            warmth: 0.5,
            pace: 1.0,
            pitch_bias: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceCategory {
    Narrator,
    News,
    Casual,
    Entertainment,
    Tech,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoicePreset {
    MorganFreeman,
    DavidAttenborough,
    NewsAnchorPro,
    FriendlyHost,
    DramaticNarrator,
    TechReviewer,
    NewsAnchor,
    Casual,
    Documentary,
}

/// Static description of a preset.
struct PresetSpec {
    id: &'static str,
    display_name: &'static str,
    description: &'static str,
    category: VoiceCategory,
    sample_text: &'static str,
    tone: ToneParams,
}

const fn tone(warmth: f32, pace: f32, pitch_bias: f32) -> ToneParams {
    ToneParams {
        warmth,
        pace,
        pitch_bias,
    }
}

impl VoicePreset {
    pub const ALL: [VoicePreset; 9] = [
        Self::MorganFreeman,
        Self::DavidAttenborough,
        Self::NewsAnchorPro,
        Self::FriendlyHost,
        Self::DramaticNarrator,
        Self::TechReviewer,
        Self::NewsAnchor,
        Self::Casual,
        Self::Documentary,
    ];

    pub fn id(self) -> &'static str {
        self.spec().id
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.id() == id)
    }

    fn spec(self) -> PresetSpec {
        match self {
            Self::MorganFreeman => PresetSpec {
                id: "morgan_freeman",
                display_name: "Morgan Freeman Style",
                description: "Deep, wise, authoritative narrator voice",
                category: VoiceCategory::Narrator,
                sample_text: "Through the wormhole of time and space, we discover the mysteries of our universe.",
                tone: tone(0.85, 0.85, -4.0),
            },
            Self::DavidAttenborough => PresetSpec {
                id: "david_attenborough",
                display_name: "David Attenborough Style",
                description: "Gentle, educational, nature documentary voice",
                category: VoiceCategory::Narrator,
                sample_text: "In the heart of the wilderness, nature reveals her most extraordinary secrets.",
                tone: tone(0.75, 0.9, -1.0),
            },
            Self::NewsAnchorPro => PresetSpec {
                id: "news_anchor_pro",
                display_name: "Professional News Anchor",
                description: "Clear, authoritative, trustworthy news delivery",
                category: VoiceCategory::News,
                sample_text: "Good evening, here are tonight's top stories from around the world.",
                tone: tone(0.5, 1.0, 0.0),
            },
            Self::FriendlyHost => PresetSpec {
                id: "friendly_host",
                display_name: "Friendly Talk Show Host",
                description: "Warm, engaging, conversational style",
                category: VoiceCategory::Casual,
                sample_text: "Welcome back to the show! Today we have some fascinating stories to share.",
                tone: tone(0.8, 1.1, 2.0),
            },
            Self::DramaticNarrator => PresetSpec {
                id: "dramatic_narrator",
                display_name: "Dramatic Movie Narrator",
                description: "Deep, dramatic, cinematic voice",
                category: VoiceCategory::Entertainment,
                sample_text: "In a world where news travels at the speed of light, one app dares to make sense of it all.",
                tone: tone(0.6, 0.8, -5.0),
            },
            Self::TechReviewer => PresetSpec {
                id: "tech_reviewer",
                display_name: "Tech Reviewer Style",
                description: "Enthusiastic, clear, tech-savvy presentation",
                category: VoiceCategory::Tech,
                sample_text: "Today we're looking at the latest breakthrough in artificial intelligence technology.",
                tone: tone(0.4, 1.2, 1.5),
            },
            Self::NewsAnchor => PresetSpec {
                id: "news_anchor",
                display_name: "Professional News Anchor",
                description: "Clear, authoritative voice perfect for news",
                category: VoiceCategory::News,
                sample_text: "Here are the latest headlines.",
                tone: tone(0.5, 1.0, 0.0),
            },
            Self::Casual => PresetSpec {
                id: "casual",
                display_name: "Friendly Casual Voice",
                description: "Warm, conversational tone",
                category: VoiceCategory::Casual,
                sample_text: "So here's what happened today.",
                tone: tone(0.7, 1.05, 1.0),
            },
            Self::Documentary => PresetSpec {
                id: "documentary",
                display_name: "Documentary Narrator",
                description: "Deep, engaging documentary style",
                category: VoiceCategory::Narrator,
                sample_text: "Our story begins far from here.",
                tone: tone(0.7, 0.9, -2.0),
            },
        }
    }
}

/// Resolved synthesis configuration for one voice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceProfile {
    pub id: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub category: VoiceCategory,
    pub sample_text: &'static str,
    pub tone_params: ToneParams,
    /// Ordered, without repeats or blanks.
    pub engines: Vec<String>,
}

impl VoiceProfile {
    /// Engines to try, in order.
    pub fn engine_chain(&self) -> Vec<&str> {
        self.engines.iter().map(String::as_str).collect()
    }

    /// Head of the chain. Audio from any other engine is degraded.
    pub fn preferred_engine(&self) -> Option<&str> {
        self.engines.first().map(String::as_str)
    }
}

fn dedupe_chain(chain: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(chain.len());
    for engine in chain {
        let engine = engine.trim();
        if !engine.is_empty() && !out.iter().any(|e| e == engine) {
            out.push(engine.to_string());
        }
    }
    out
}

pub struct VoiceCatalog {
    profiles: BTreeMap<&'static str, Arc<VoiceProfile>>,
}

impl VoiceCatalog {
    pub fn new(config: &VoicesConfig) -> Self {
        for id in config.overrides.keys() {
            if VoicePreset::from_id(id).is_none() {
                warn!("Ignoring engine override for unknown voice: {id}");
            }
        }

        let profiles = VoicePreset::ALL
            .into_iter()
            .map(|preset| {
                let spec = preset.spec();
                let chain = config
                    .overrides
                    .get(spec.id)
                    .map(|o| &o.engine_chain)
                    .filter(|c| !c.is_empty())
                    .unwrap_or(&config.engine_chain);
                let engines = dedupe_chain(chain);
                if engines.is_empty() {
                    warn!("Voice {} has no engines configured", spec.id);
                }
                let profile = VoiceProfile {
                    id: spec.id,
                    display_name: spec.display_name,
                    description: spec.description,
                    category: spec.category,
                    sample_text: spec.sample_text,
                    tone_params: spec.tone,
                    engines,
                };
                (spec.id, Arc::new(profile))
            })
            .collect();

        Self { profiles }
    }

    pub fn lookup(&self, id: &str) -> Result<Arc<VoiceProfile>, PipelineError> {
        self.profiles
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::VoiceNotFound(id.to_string()))
    }

    pub fn profiles(&self) -> Vec<Arc<VoiceProfile>> {
        self.profiles.values().cloned().collect()
    }
}
