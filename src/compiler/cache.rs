//! On-disk artifact cache.
//!
//! Layout: `<root>/<key>/<library>` plus `<root>/<key>/meta.toml`. The key is a
//! hex content hash of everything that affects the build (sources, compiler,
//! flags, platform), so a stale entry is never reused; it is simply never
//! looked up again. Lookups are memoized per process.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{BridgeError, BridgeResult};

pub const META_FILE: &str = "meta.toml";

/// Metadata stored next to each cached library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntryMeta {
    pub key: String,
    pub source_path: PathBuf,
    pub library: PathBuf,
    pub compiler: PathBuf,
    pub compiler_version: String,
    pub flags: Vec<String>,
    pub platform: String,
    /// Seconds since the Unix epoch
    pub created_at: u64,
    pub last_access_at: u64,
}

/// Summary returned by `status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatus {
    pub entries: usize,
    pub total_bytes: u64,
}

pub struct ArtifactCache {
    root: PathBuf,
    /// key -> library path, for entries already seen by this process
    memo: DashMap<String, PathBuf>,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ArtifactCache {
            root: root.into(),
            memo: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Cached library for `key`, if present on disk
    pub fn lookup(&self, key: &str, library_name: &str) -> Option<PathBuf> {
        if let Some(path) = self.memo.get(key) {
            if path.exists() {
                trace!(target: "nativebridge::compiler::cache", key, "Memo hit");
                return Some(path.clone());
            }
        }
        let dir = self.entry_dir(key);
        let library = dir.join(library_name);
        if !library.is_file() || !dir.join(META_FILE).is_file() {
            debug!(target: "nativebridge::compiler::cache", key, "Cache miss");
            return None;
        }
        debug!(
            target: "nativebridge::compiler::cache",
            key,
            library = %library.display(),
            "Cache hit"
        );
        self.touch(&dir);
        self.memo.insert(key.to_string(), library.clone());
        Some(library)
    }

    /// Write metadata for a freshly built entry
    pub fn record(&self, meta: &CacheEntryMeta) -> BridgeResult<()> {
        let dir = self.entry_dir(&meta.key);
        let text = toml::to_string(meta).map_err(|e| BridgeError::Config(e.to_string()))?;
        let path = dir.join(META_FILE);
        std::fs::write(&path, text).map_err(|e| BridgeError::io(&path, e))?;
        self.memo.insert(meta.key.clone(), meta.library.clone());
        Ok(())
    }

    pub fn read_meta(&self, key: &str) -> Option<CacheEntryMeta> {
        let text = std::fs::read_to_string(self.entry_dir(key).join(META_FILE)).ok()?;
        toml::from_str(&text).ok()
    }

    /// Refresh `last_access_at`. Best effort.
    fn touch(&self, dir: &Path) {
        let path = dir.join(META_FILE);
        let Some(mut meta) = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| toml::from_str::<CacheEntryMeta>(&text).ok())
        else {
            return;
        };
        meta.last_access_at = now_secs();
        if let Ok(text) = toml::to_string(&meta) {
            if let Err(e) = std::fs::write(&path, text) {
                debug!(
                    target: "nativebridge::compiler::cache",
                    path = %path.display(),
                    error = %e,
                    "Could not refresh access time"
                );
            }
        }
    }

    /// Count entries and bytes under the cache root
    pub fn status(&self) -> BridgeResult<CacheStatus> {
        let mut status = CacheStatus::default();
        for dir in self.entries()? {
            status.entries += 1;
            let files = std::fs::read_dir(&dir).map_err(|e| BridgeError::io(&dir, e))?;
            for file in files.flatten() {
                if let Ok(meta) = file.metadata() {
                    if meta.is_file() {
                        status.total_bytes += meta.len();
                    }
                }
            }
        }
        Ok(status)
    }

    /// Remove every entry; returns how many were removed
    pub fn clean(&self) -> BridgeResult<usize> {
        let mut removed = 0;
        for dir in self.entries()? {
            std::fs::remove_dir_all(&dir).map_err(|e| BridgeError::io(&dir, e))?;
            removed += 1;
        }
        self.memo.clear();
        debug!(target: "nativebridge::compiler::cache", removed, "Cache cleaned");
        Ok(removed)
    }

    /// Entry directories (those holding a `meta.toml`)
    fn entries(&self) -> BridgeResult<Vec<PathBuf>> {
        let read = match std::fs::read_dir(&self.root) {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BridgeError::io(&self.root, e)),
        };
        Ok(read
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.join(META_FILE).is_file())
            .collect())
    }
}

/// Incremental cache key builder
pub struct KeyHasher(DefaultHasher);

impl KeyHasher {
    pub fn new() -> Self {
        KeyHasher(DefaultHasher::new())
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        bytes.hash(&mut self.0);
        self
    }

    pub fn text(&mut self, text: &str) -> &mut Self {
        text.hash(&mut self.0);
        self
    }

    /// 16 hex digits
    pub fn finish(&self) -> String {
        format!("{:016x}", self.0.finish())
    }
}

impl Default for KeyHasher {
    fn default() -> Self {
        Self::new()
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "nativebridge-cache-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn meta(key: &str, library: PathBuf) -> CacheEntryMeta {
        CacheEntryMeta {
            key: key.to_string(),
            source_path: PathBuf::from("kernels.c"),
            library,
            compiler: PathBuf::from("cc"),
            compiler_version: "cc 1.0".to_string(),
            flags: vec!["-O2".to_string()],
            platform: "linux-x86_64".to_string(),
            created_at: 1,
            last_access_at: 1,
        }
    }

    #[test]
    fn test_key_depends_on_every_part() {
        let base = KeyHasher::new().bytes(b"int f(void){return 1;}").text("-O2").finish();
        let same = KeyHasher::new().bytes(b"int f(void){return 1;}").text("-O2").finish();
        let flags = KeyHasher::new().bytes(b"int f(void){return 1;}").text("-O3").finish();
        let source = KeyHasher::new().bytes(b"int f(void){return 2;}").text("-O2").finish();
        assert_eq!(base, same);
        assert_ne!(base, flags);
        assert_ne!(base, source);
        assert_eq!(base.len(), 16);
    }

    #[test]
    fn test_lookup_record_status_clean() {
        let root = scratch("roundtrip");
        let cache = ArtifactCache::new(&root);
        assert!(cache.lookup("abc", "libk.so").is_none());
        assert_eq!(cache.status().unwrap(), CacheStatus::default());

        let dir = cache.entry_dir("abc");
        std::fs::create_dir_all(&dir).unwrap();
        let library = dir.join("libk.so");
        std::fs::write(&library, b"not really a library").unwrap();
        cache.record(&meta("abc", library.clone())).unwrap();

        assert_eq!(cache.lookup("abc", "libk.so"), Some(library));
        let status = cache.status().unwrap();
        assert_eq!(status.entries, 1);
        assert!(status.total_bytes >= 20);

        let meta = cache.read_meta("abc").unwrap();
        assert!(meta.last_access_at >= meta.created_at);

        assert_eq!(cache.clean().unwrap(), 1);
        assert!(cache.lookup("abc", "libk.so").is_none());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_library_without_meta_is_a_miss() {
        let root = scratch("nometa");
        let cache = ArtifactCache::new(&root);
        let dir = cache.entry_dir("k");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("libk.so"), b"x").unwrap();
        assert!(cache.lookup("k", "libk.so").is_none());
        assert_eq!(cache.status().unwrap().entries, 0);
        let _ = std::fs::remove_dir_all(&root);
    }
}
