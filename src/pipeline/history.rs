//! Batch history and reporting.
//!
//! One JSONL line per processed batch, in daily files
//! `<dir>/{date}-batches.jsonl`.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ProcessedArticle, SynthesisStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub timestamp: String,
    pub voice: String,
    pub article_count: usize,
    pub succeeded: usize,
    pub degraded: usize,
    pub failed: usize,
    pub cache_hits: usize,
    pub summary_fallbacks: usize,
    /// Engine id → articles it synthesized.
    pub engines: BTreeMap<String, usize>,
    pub total_latency_ms: i64,
}

impl BatchRecord {
    pub fn from_results(voice: &str, results: &[ProcessedArticle], total_latency_ms: i64) -> Self {
        let count = |status: SynthesisStatus| results.iter().filter(|a| a.synthesis_status == status).count();
        let mut engines = BTreeMap::new();
        for engine in results.iter().filter_map(|a| a.engine_used.as_deref()) {
            *engines.entry(engine.to_string()).or_insert(0) += 1;
        }
        Self {
            timestamp: Local::now().to_rfc3339(),
            voice: voice.to_string(),
            article_count: results.len(),
            succeeded: count(SynthesisStatus::Succeeded),
            degraded: count(SynthesisStatus::Degraded),
            failed: count(SynthesisStatus::Failed),
            cache_hits: results.iter().filter(|a| a.is_cache_hit()).count(),
            summary_fallbacks: results.iter().filter(|a| a.summary_is_fallback).count(),
            engines,
            total_latency_ms,
        }
    }
}

pub struct BatchHistory {
    dir: PathBuf,
}

impl BatchHistory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_for(&self, date: &str) -> PathBuf {
        let date = if date == "today" {
            Local::now().format("%Y-%m-%d").to_string()
        } else {
            date.to_string()
        };
        self.dir.join(format!("{date}-batches.jsonl"))
    }

    /// Append a record to today's file. Failures are logged, never raised.
    pub fn save(&self, record: &BatchRecord) {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!("Failed to create history dir {}: {e}", self.dir.display());
            return;
        }

        let path = self.file_for("today");
        let mut file = match fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Failed to open history file: {e}");
                return;
            }
        };

        match serde_json::to_string(record) {
            Ok(line) => {
                if let Err(e) = writeln!(file, "{line}") {
                    warn!("Failed to write batch record: {e}");
                } else {
                    debug!("Saved batch record to {}", path.display());
                }
            }
            Err(e) => warn!("Failed to serialize batch record: {e}"),
        }
    }

    pub fn load(&self, date: &str) -> Vec<BatchRecord> {
        let contents = match fs::read_to_string(self.file_for(date)) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        contents
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    pub fn list_dates(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };

        let mut dates: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.strip_suffix("-batches.jsonl").map(str::to_string)
            })
            .collect();
        dates.sort();
        dates
    }

    pub fn generate_report(&self, date: &str) -> String {
        let records = self.load(date);
        if records.is_empty() {
            return format!("No batches recorded for {date}.");
        }

        let batches = records.len();
        let articles: usize = records.iter().map(|r| r.article_count).sum();
        let succeeded: usize = records.iter().map(|r| r.succeeded).sum();
        let degraded: usize = records.iter().map(|r| r.degraded).sum();
        let failed: usize = records.iter().map(|r| r.failed).sum();
        let cache_hits: usize = records.iter().map(|r| r.cache_hits).sum();
        let fallbacks: usize = records.iter().map(|r| r.summary_fallbacks).sum();
        let avg_latency: f64 =
            records.iter().map(|r| r.total_latency_ms as f64).sum::<f64>() / batches as f64;

        let mut voices: BTreeMap<&str, usize> = BTreeMap::new();
        let mut engines: BTreeMap<&str, usize> = BTreeMap::new();
        for r in &records {
            *voices.entry(r.voice.as_str()).or_insert(0) += 1;
            for (engine, n) in &r.engines {
                *engines.entry(engine.as_str()).or_insert(0) += n;
            }
        }

        let mut report = format!(
            "# Batch Report for {date}\n\n\
            - Batches: {batches}\n\
            - Articles: {articles}\n\
            - Succeeded: {succeeded}\n\
            - Degraded: {degraded}\n\
            - Failed: {failed}\n\
            - Cache hits: {cache_hits}\n\
            - Summary fallbacks: {fallbacks}\n\
            - Avg batch latency: {avg_latency:.0}ms\n\n\
            ## Voices\n"
        );
        for (voice, n) in &voices {
            report.push_str(&format!("- {voice}: {n}\n"));
        }
        report.push_str("\n## Engines\n");
        for (engine, n) in &engines {
            report.push_str(&format!("- {engine}: {n}\n"));
        }
        report
    }
}
