//! Append-only, hash-addressed archive of match history entries.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use foodshare_core::MatchHistoryEntry;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "foodshare-storage";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serializing history entry {match_id}: {source}")]
    Serialize {
        match_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("corrupt history entry {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

#[derive(Debug, Clone)]
pub struct HistoryArchive {
    root: PathBuf,
}

impl HistoryArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn entry_relative_path(
        &self,
        recorded_at: DateTime<Utc>,
        match_id: &str,
        content_hash: &str,
    ) -> PathBuf {
        let stamp = recorded_at.format("%Y%m%d_%H%M%S").to_string();
        PathBuf::from(stamp)
            .join(sanitize_segment(match_id))
            .join(format!("{content_hash}.json"))
    }

    /// Write an entry immutably using a hash-addressed path and atomic temp-file rename.
    /// Re-storing identical content is a no-op reported as `deduplicated`.
    pub async fn store_entry(&self, entry: &MatchHistoryEntry) -> Result<StoredEntry, ArchiveError> {
        let bytes = serde_json::to_vec_pretty(entry).map_err(|source| ArchiveError::Serialize {
            match_id: entry.match_id.clone(),
            source,
        })?;
        let content_hash = Self::sha256_hex(&bytes);
        let relative_path =
            self.entry_relative_path(entry.recorded_at, &entry.match_id, &content_hash);
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent).await.map_err(io_err(&parent))?;

        let stored = |deduplicated| StoredEntry {
            content_hash: content_hash.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            byte_size: bytes.len(),
            deduplicated,
        };

        if fs::try_exists(&absolute_path)
            .await
            .map_err(io_err(&absolute_path))?
        {
            debug!(match_id = %entry.match_id, "history entry already archived");
            return Ok(stored(true));
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(io_err(&temp_path))?;
        file.write_all(&bytes).await.map_err(io_err(&temp_path))?;
        file.flush().await.map_err(io_err(&temp_path))?;
        drop(file);

        match fs::rename(&temp_path, &absolute_path).await {
            Ok(()) => Ok(stored(false)),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(stored(true))
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(ArchiveError::Io {
                    path: absolute_path.clone(),
                    source: err,
                })
            }
        }
    }

    /// Every archived entry, oldest first.
    pub async fn load_entries(&self) -> Result<Vec<MatchHistoryEntry>, ArchiveError> {
        let mut entries = Vec::new();
        if !fs::try_exists(&self.root).await.map_err(io_err(&self.root))? {
            return Ok(entries);
        }

        for stamp_dir in list_dirs(&self.root).await? {
            for match_dir in list_dirs(&stamp_dir).await? {
                let mut files = fs::read_dir(&match_dir).await.map_err(io_err(&match_dir))?;
                while let Some(file) = files.next_entry().await.map_err(io_err(&match_dir))? {
                    let path = file.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    let bytes = fs::read(&path).await.map_err(io_err(&path))?;
                    let entry: MatchHistoryEntry = serde_json::from_slice(&bytes)
                        .map_err(|source| ArchiveError::Corrupt {
                            path: path.clone(),
                            source,
                        })?;
                    entries.push(entry);
                }
            }
        }

        entries.sort_by_key(|e| e.recorded_at);
        Ok(entries)
    }

    pub async fn load_match(&self, match_id: &str) -> Result<Vec<MatchHistoryEntry>, ArchiveError> {
        Ok(self
            .load_entries()
            .await?
            .into_iter()
            .filter(|e| e.match_id == match_id)
            .collect())
    }
}

async fn list_dirs(dir: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut out = Vec::new();
    let mut read = fs::read_dir(dir).await.map_err(io_err(dir))?;
    while let Some(entry) = read.next_entry().await.map_err(io_err(dir))? {
        let is_dir = entry
            .file_type()
            .await
            .map(|ft| ft.is_dir())
            .unwrap_or(false);
        if is_dir {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}

fn sanitize_segment(input: &str) -> String {
    let cleaned = input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foodshare_core::{Listing, Match, MatchInsights, MatchKind, MatchOrigin, MatchOutcome, MatchScores};
    use tempfile::tempdir;

    fn entry(match_id: &str, rating: f64, recorded_at: &str) -> MatchHistoryEntry {
        let matched = Match {
            id: match_id.to_string(),
            request_id: "req-1".into(),
            requester_id: Some("alice".into()),
            offer: Listing::new("offer-1", "produce"),
            scores: MatchScores::default(),
            kind: MatchKind::Direct,
            insights: MatchInsights::default(),
            origin: MatchOrigin::Traditional,
        };
        MatchHistoryEntry {
            match_id: match_id.to_string(),
            matched,
            outcome: MatchOutcome {
                success: true,
                rating,
                feedback: "smooth pickup".into(),
            },
            recorded_at: DateTime::parse_from_rfc3339(recorded_at)
                .expect("ts")
                .with_timezone(&Utc),
        }
    }

    #[test]
    fn entry_hashing_is_stable() {
        let hash = HistoryArchive::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn path_segments_are_sanitized() {
        let archive = HistoryArchive::new("/tmp/unused");
        let ts = Utc::now();
        let path = archive.entry_relative_path(ts, "../evil id", "abc");
        assert!(path.to_string_lossy().contains("___evil_id"));
    }

    #[tokio::test]
    async fn atomic_writes_deduplicate_by_hash_path() {
        let dir = tempdir().expect("tempdir");
        let archive = HistoryArchive::new(dir.path());
        let e = entry("m-1", 4.0, "2026-03-01T12:00:00Z");

        let first = archive.store_entry(&e).await.expect("first store");
        let second = archive.store_entry(&e).await.expect("second store");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.relative_path, second.relative_path);
        assert!(first.absolute_path.exists());
    }

    #[tokio::test]
    async fn entries_load_back_in_recording_order() {
        let dir = tempdir().expect("tempdir");
        let archive = HistoryArchive::new(dir.path());
        archive
            .store_entry(&entry("m-2", 2.0, "2026-03-02T08:00:00Z"))
            .await
            .expect("store");
        archive
            .store_entry(&entry("m-1", 5.0, "2026-03-01T08:00:00Z"))
            .await
            .expect("store");
        archive
            .store_entry(&entry("m-1", 3.0, "2026-03-03T08:00:00Z"))
            .await
            .expect("store");

        let all = archive.load_entries().await.expect("load");
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].match_id, "m-1");
        assert_eq!(all[0].outcome.rating, 5.0);

        let m1 = archive.load_match("m-1").await.expect("load m-1");
        assert_eq!(m1.len(), 2);
    }

    #[tokio::test]
    async fn missing_root_loads_nothing() {
        let dir = tempdir().expect("tempdir");
        let archive = HistoryArchive::new(dir.path().join("never-created"));
        assert!(archive.load_entries().await.expect("load").is_empty());
    }
}
