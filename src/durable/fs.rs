//! File-backed durable tier.
//!
//! Each key maps to `<dir>/<hex(key)>.json`. Writes go to a temporary file
//! first and are renamed into place, so a reader never sees a partial blob.
//!
//! Hex names longer than `SEGMENT_LEN` are split into nested directories of
//! `SEGMENT_LEN` characters each, keeping every path component under the
//! usual 255-byte file name limit.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::durable::DurableTier;
use crate::error::Result;

const EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// Longest hex run used as a single path component.
const SEGMENT_LEN: usize = 200;

/// Durable tier storing one file per key under a directory.
#[derive(Debug, Clone)]
pub struct FsDurableTier {
    dir: PathBuf,
}

impl FsDurableTier {
    /// Opens (creating if needed) the directory at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "Opened file durable tier");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory holding the file for `key`, and the file's stem.
    fn location(&self, key: &str) -> (PathBuf, String) {
        let encoded = hex::encode(key);
        let mut dir = self.dir.clone();
        let mut rest = encoded.as_str();
        while rest.len() > SEGMENT_LEN {
            let (segment, tail) = rest.split_at(SEGMENT_LEN);
            dir.push(segment);
            rest = tail;
        }
        (dir, rest.to_string())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let (dir, stem) = self.location(key);
        dir.join(format!("{}.{}", stem, EXTENSION))
    }

    /// Recovers the key from its hex-encoded relative path, segments joined.
    fn key_from_file_name(name: &str) -> Option<String> {
        let stem = name.strip_suffix(EXTENSION)?.strip_suffix('.')?;
        let bytes = hex::decode(stem).ok()?;
        String::from_utf8(bytes).ok()
    }

    fn is_segment(name: &str) -> bool {
        name.len() == SEGMENT_LEN && name.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

#[async_trait]
impl DurableTier for FsDurableTier {
    async fn persist_set(&self, key: &str, blob: Vec<u8>, _ttl: Duration) -> Result<()> {
        let (dir, stem) = self.location(key);
        if dir != self.dir {
            fs::create_dir_all(&dir).await?;
        }
        let temp = dir.join(format!(".{}.{}", stem, TEMP_EXTENSION));
        fs::write(&temp, blob).await?;
        fs::rename(&temp, dir.join(format!("{}.{}", stem, EXTENSION))).await?;
        Ok(())
    }

    async fn persist_get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist_delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist_clear_all(&self, prefix: &str) -> Result<()> {
        let mut pending = vec![(self.dir.clone(), String::new())];
        let mut removed = 0usize;

        while let Some((dir, encoded)) = pending.pop() {
            let mut listing = match fs::read_dir(&dir).await {
                Ok(listing) => listing,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(item) = listing.next_entry().await? {
                let Some(name) = item.file_name().to_str().map(str::to_owned) else {
                    continue;
                };
                if item.file_type().await?.is_dir() {
                    if Self::is_segment(&name) {
                        pending.push((item.path(), format!("{}{}", encoded, name)));
                    }
                    continue;
                }

                let Some(key) = Self::key_from_file_name(&format!("{}{}", encoded, name)) else {
                    continue;
                };
                if key.starts_with(prefix) {
                    match fs::remove_file(item.path()).await {
                        Ok(()) => removed += 1,
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        debug!(prefix, removed, "Cleared durable files");
        Ok(())
    }
}
