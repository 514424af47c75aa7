//! Feed collaborator interface and the raw article record.
//!
//! Live RSS retrieval lives outside this crate; the pipeline only needs
//! something that yields `RawArticle`s. `JsonFileFeed` serves the CLI.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// An article as delivered by a feed. Never modified by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawArticle {
    pub title: String,
    pub body_text: String,
    pub source_name: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the current entries. Order is arbitrary; urls are unique.
    async fn fetch(&self) -> Result<Vec<RawArticle>, String>;
}

/// Reads a JSON array of articles from disk.
pub struct JsonFileFeed {
    path: PathBuf,
}

impl JsonFileFeed {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

#[async_trait]
impl FeedSource for JsonFileFeed {
    async fn fetch(&self) -> Result<Vec<RawArticle>, String> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| format!("Failed to read {}: {e}", self.path.display()))?;
        let articles: Vec<RawArticle> = serde_json::from_str(&contents)
            .map_err(|e| format!("Failed to parse {}: {e}", self.path.display()))?;

        let articles = dedupe_by_url(articles)
            .into_iter()
            .map(|mut a| {
                a.title = clean_feed_text(&a.title);
                a.body_text = clean_feed_text(&a.body_text);
                a
            })
            .collect::<Vec<_>>();
        info!("Loaded {} articles from {}", articles.len(), self.path.display());
        Ok(articles)
    }
}

/// Drop entries whose url was already seen, keeping the first.
pub fn dedupe_by_url(articles: Vec<RawArticle>) -> Vec<RawArticle> {
    let mut seen = HashSet::new();
    articles
        .into_iter()
        .filter(|a| {
            let fresh = seen.insert(a.url.clone());
            if !fresh {
                warn!("Dropping duplicate feed entry: {}", a.url);
            }
            fresh
        })
        .collect()
}

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static BRACKET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[[^\]]*\]").unwrap());

/// Strip markup and feed artifacts (`[...]` notes), collapse whitespace.
pub fn clean_feed_text(text: &str) -> String {
    let text = TAG_RE.replace_all(text, " ");
    let text = BRACKET_RE.replace_all(&text, "");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(url: &str) -> RawArticle {
        RawArticle {
            title: "Title".into(),
            body_text: "Body".into(),
            source_name: "BBC News".into(),
            url: url.into(),
            published_at: Utc::now(),
        }
    }

    #[test]
    fn clean_feed_text_strips_markup() {
        let raw = "<p>Markets <b>rallied</b> today.</p>  [Reuters]\n\nMore soon.";
        assert_eq!(clean_feed_text(raw), "Markets rallied today. More soon.");
    }

    #[test]
    fn duplicate_urls_keep_first_entry() {
        let mut second = article("https://a.example/1");
        second.title = "Second".into();
        let out = dedupe_by_url(vec![article("https://a.example/1"), second, article("https://a.example/2")]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].title, "Title");
    }

    #[tokio::test]
    async fn json_file_feed_reads_articles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("articles.json");
        let body = serde_json::to_string(&vec![article("u1"), article("u1"), article("u2")]).unwrap();
        std::fs::write(&path, body).unwrap();

        let feed = JsonFileFeed::new(&path);
        let articles = feed.fetch().await.unwrap();
        assert_eq!(articles.len(), 2);
    }

    #[tokio::test]
    async fn json_file_feed_reports_missing_file() {
        let feed = JsonFileFeed::new(Path::new("/nonexistent/articles.json"));
        assert!(feed.fetch().await.is_err());
    }
}
