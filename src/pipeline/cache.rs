//! Durable audio cache keyed by content fingerprint.
//!
//! Layout: `<root>/<hex[0..2]>/<hex>.<ext>`. A path is derived from the
//! fingerprint alone (plus a fixed probe over formats), so anything that can
//! read the directory can serve audio without asking the pipeline.
//!
//! Writes go to a unique temp file and are renamed into place. Reads and
//! writes share the eviction lock; eviction takes it exclusively.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::fingerprint::CacheFingerprint;
use crate::error::CacheError;

/// Orphaned temp files (interrupted puts) older than this are swept.
const STALE_TEMP_AGE: Duration = Duration::from_secs(3600);

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Mp3,
    Ogg,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 3] = [Self::Wav, Self::Mp3, Self::Ogg];

    pub fn extension(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Ogg => "ogg",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::Mp3 => "audio/mpeg",
            Self::Ogg => "audio/ogg",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactLocation {
    /// Stored in the cache; immutable from here on.
    Cached(PathBuf),
    /// Cache write failed; the bytes travel with this one response.
    Inline(#[serde(serialize_with = "serialize_base64")] Arc<[u8]>),
}

fn serialize_base64<S: Serializer>(bytes: &Arc<[u8]>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64.encode(bytes))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioArtifact {
    pub fingerprint: CacheFingerprint,
    pub byte_length: u64,
    pub format: AudioFormat,
    pub created_at: DateTime<Utc>,
    pub location: ArtifactLocation,
}

impl AudioArtifact {
    pub fn inline(fingerprint: CacheFingerprint, bytes: Vec<u8>, format: AudioFormat) -> Self {
        Self {
            fingerprint,
            byte_length: bytes.len() as u64,
            format,
            created_at: Utc::now(),
            location: ArtifactLocation::Inline(bytes.into()),
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self.location, ArtifactLocation::Cached(_))
    }
}

pub struct AudioCache {
    root: PathBuf,
    eviction_lock: RwLock<()>,
}

impl AudioCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            eviction_lock: RwLock::new(()),
        }
    }

    /// Create the root directory and return the cache.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let cache = Self::new(root);
        tokio::fs::create_dir_all(&cache.root).await?;
        info!("Audio cache at {}", cache.root.display());
        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn location_for(&self, fingerprint: &CacheFingerprint, format: AudioFormat) -> PathBuf {
        let hex = fingerprint.to_hex();
        self.root
            .join(&hex[..2])
            .join(format!("{hex}.{}", format.extension()))
    }

    pub async fn get(&self, fingerprint: &CacheFingerprint) -> Result<Option<AudioArtifact>, CacheError> {
        let _guard = self.eviction_lock.read().await;
        self.find(fingerprint).await
    }

    /// Store `bytes` under `fingerprint`. An existing entry wins and is
    /// returned untouched.
    pub async fn put(
        &self,
        fingerprint: &CacheFingerprint,
        bytes: &[u8],
        format: AudioFormat,
    ) -> Result<AudioArtifact, CacheError> {
        let _guard = self.eviction_lock.read().await;

        if let Some(existing) = self.find(fingerprint).await? {
            debug!("Cache entry {fingerprint} already present, keeping it");
            return Ok(existing);
        }

        let path = self.location_for(fingerprint, format);
        let dir = path.parent().unwrap_or(&self.root);
        tokio::fs::create_dir_all(dir).await?;

        let temp = dir.join(format!(
            ".{fingerprint}.{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        if let Err(e) = write_then_rename(&temp, &path, bytes).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        debug!("Cached {} bytes as {}", bytes.len(), path.display());
        self.artifact_at(fingerprint, path, format)
            .await?
            .ok_or_else(|| CacheError::Io(std::io::Error::other("entry vanished after write")))
    }

    /// Read the bytes behind an artifact.
    pub async fn read(&self, artifact: &AudioArtifact) -> Result<Vec<u8>, CacheError> {
        match &artifact.location {
            ArtifactLocation::Inline(bytes) => Ok(bytes.to_vec()),
            ArtifactLocation::Cached(path) => {
                let _guard = self.eviction_lock.read().await;
                Ok(tokio::fs::read(path).await?)
            }
        }
    }

    /// Look up and read an entry under a single read lock.
    pub async fn load(
        &self,
        fingerprint: &CacheFingerprint,
    ) -> Result<Option<(AudioArtifact, Vec<u8>)>, CacheError> {
        let _guard = self.eviction_lock.read().await;
        let Some(artifact) = self.find(fingerprint).await? else {
            return Ok(None);
        };
        let ArtifactLocation::Cached(path) = &artifact.location else {
            return Err(CacheError::NotCached);
        };
        let bytes = tokio::fs::read(path).await?;
        Ok(Some((artifact, bytes)))
    }

    /// Remove entries older than `max_age`. Returns how many were removed.
    pub async fn evict_expired(&self, max_age: Duration) -> Result<usize, CacheError> {
        let _guard = self.eviction_lock.write().await;
        let now = SystemTime::now();
        let mut removed = 0;

        let mut shards = match tokio::fs::read_dir(&self.root).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut entries = tokio::fs::read_dir(shard.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                if !meta.is_file() {
                    continue;
                }
                let age = meta
                    .modified()
                    .ok()
                    .and_then(|m| now.duration_since(m).ok())
                    .unwrap_or_default();
                let name = entry.file_name().to_string_lossy().to_string();
                let is_temp = name.ends_with(".tmp");
                let limit = if is_temp { STALE_TEMP_AGE.min(max_age) } else { max_age };
                if age < limit {
                    continue;
                }
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) if !is_temp => removed += 1,
                    Ok(()) => {}
                    Err(e) => warn!("Failed to evict {}: {e}", entry.path().display()),
                }
            }
        }

        if removed > 0 {
            info!("Evicted {removed} cached audio files older than {max_age:?}");
        }
        Ok(removed)
    }

    async fn find(&self, fingerprint: &CacheFingerprint) -> Result<Option<AudioArtifact>, CacheError> {
        for format in AudioFormat::ALL {
            let path = self.location_for(fingerprint, format);
            if let Some(artifact) = self.artifact_at(fingerprint, path, format).await? {
                return Ok(Some(artifact));
            }
        }
        Ok(None)
    }

    async fn artifact_at(
        &self,
        fingerprint: &CacheFingerprint,
        path: PathBuf,
        format: AudioFormat,
    ) -> Result<Option<AudioArtifact>, CacheError> {
        let meta = match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let created_at = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(Some(AudioArtifact {
            fingerprint: *fingerprint,
            byte_length: meta.len(),
            format,
            created_at,
            location: ArtifactLocation::Cached(path),
        }))
    }
}

async fn write_then_rename(temp: &Path, dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::File::create(temp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(temp, dest).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fingerprint::fingerprint;

    fn count_files(dir: &Path) -> usize {
        let mut n = 0;
        for shard in std::fs::read_dir(dir).unwrap().flatten() {
            if shard.path().is_dir() {
                n += std::fs::read_dir(shard.path()).unwrap().count();
            }
        }
        n
    }

    #[tokio::test]
    async fn put_then_get_returns_identical_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::open(dir.path()).await.unwrap();
        let fp = fingerprint("Hello there.", "casual");

        assert!(cache.get(&fp).await.unwrap().is_none());

        let stored = cache.put(&fp, b"RIFF-audio", AudioFormat::Wav).await.unwrap();
        assert_eq!(stored.byte_length, 10);
        assert_eq!(
            stored.location,
            ArtifactLocation::Cached(cache.location_for(&fp, AudioFormat::Wav))
        );

        let found = cache.get(&fp).await.unwrap().unwrap();
        assert_eq!(found.fingerprint, fp);
        assert_eq!(found.format, AudioFormat::Wav);
        assert_eq!(cache.read(&found).await.unwrap(), b"RIFF-audio");
    }

    #[tokio::test]
    async fn put_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::open(dir.path()).await.unwrap();
        let fp = fingerprint("Same story.", "news_anchor_pro");

        let first = cache.put(&fp, b"abc", AudioFormat::Wav).await.unwrap();
        let second = cache.put(&fp, b"abc", AudioFormat::Wav).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(count_files(dir.path()), 1);
    }

    #[tokio::test]
    async fn first_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::open(dir.path()).await.unwrap();
        let fp = fingerprint("Story", "casual");

        cache.put(&fp, b"first", AudioFormat::Wav).await.unwrap();
        let second = cache.put(&fp, b"second", AudioFormat::Mp3).await.unwrap();
        assert_eq!(second.format, AudioFormat::Wav);
        assert_eq!(cache.read(&second).await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn concurrent_puts_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(AudioCache::open(dir.path()).await.unwrap());
        let fp = fingerprint("Shared summary.", "casual");

        let payloads: Vec<Vec<u8>> = (0..16u8).map(|i| vec![i; 64 * 1024]).collect();
        let mut handles = Vec::new();
        for payload in payloads.clone() {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.put(&fp, &payload, AudioFormat::Wav).await.unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let found = cache.get(&fp).await.unwrap().unwrap();
        let bytes = cache.read(&found).await.unwrap();
        assert!(payloads.contains(&bytes), "stored bytes mix several writers");
        assert_eq!(count_files(dir.path()), 1, "temp files left behind");
    }

    #[tokio::test]
    async fn load_reads_entry_under_one_lock() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::open(dir.path()).await.unwrap();
        let fp = fingerprint("Loaded.", "casual");
        assert!(cache.load(&fp).await.unwrap().is_none());

        cache.put(&fp, b"OggS...", AudioFormat::Ogg).await.unwrap();
        let (artifact, bytes) = cache.load(&fp).await.unwrap().unwrap();
        assert_eq!(artifact.format, AudioFormat::Ogg);
        assert_eq!(bytes, b"OggS...");
    }

    #[tokio::test]
    async fn eviction_respects_max_age() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::open(dir.path()).await.unwrap();
        let fp = fingerprint("Old news.", "casual");
        cache.put(&fp, b"abc", AudioFormat::Wav).await.unwrap();

        let week = Duration::from_secs(7 * 24 * 3600);
        assert_eq!(cache.evict_expired(week).await.unwrap(), 0);
        assert!(cache.get(&fp).await.unwrap().is_some());

        assert_eq!(cache.evict_expired(Duration::ZERO).await.unwrap(), 1);
        assert!(cache.get(&fp).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eviction_sweeps_orphaned_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::open(dir.path()).await.unwrap();
        let fp = fingerprint("Interrupted.", "casual");
        let shard = dir.path().join(&fp.to_hex()[..2]);
        std::fs::create_dir_all(&shard).unwrap();
        std::fs::write(shard.join(format!(".{fp}.1.0.tmp")), b"half").unwrap();

        // Half-written data is never visible as an entry.
        assert!(cache.get(&fp).await.unwrap().is_none());

        assert_eq!(cache.evict_expired(Duration::ZERO).await.unwrap(), 0);
        assert_eq!(count_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn unusable_root_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let cache = AudioCache::new(&file);
        let fp = fingerprint("x", "casual");

        assert!(cache.get(&fp).await.is_err());
        assert!(cache.put(&fp, b"abc", AudioFormat::Wav).await.is_err());
    }

    #[test]
    fn inline_artifact_serializes_as_base64() {
        let fp = fingerprint("x", "casual");
        let artifact = AudioArtifact::inline(fp, b"hi".to_vec(), AudioFormat::Wav);
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["location"]["inline"], "aGk=");
        assert_eq!(json["fingerprint"], fp.to_hex());
        assert!(!artifact.is_cached());
    }
}
