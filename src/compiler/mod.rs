//! Build half of the compiler/loader: turns C sources into a cached shared
//! library.

pub mod cache;
pub mod toolchain;

use std::path::{Path, PathBuf};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};

pub use cache::{ArtifactCache, CacheEntryMeta, CacheStatus};
pub use toolchain::{shared_library_name, CompilerVendor, Toolchain};

/// What to build. The first source names the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    source: PathBuf,
    extra_sources: Vec<PathBuf>,
    include_dirs: Vec<PathBuf>,
    library_dirs: Vec<PathBuf>,
    libraries: Vec<String>,
    flags: Vec<String>,
}

impl CompileRequest {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        CompileRequest {
            source: source.into(),
            extra_sources: Vec::new(),
            include_dirs: Vec::new(),
            library_dirs: Vec::new(),
            libraries: Vec::new(),
            flags: Vec::new(),
        }
    }

    /// Another translation unit linked into the same library
    pub fn extra_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.extra_sources.push(path.into());
        self
    }

    /// `-I<dir>`
    pub fn include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    /// `-L<dir>`
    pub fn library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.library_dirs.push(dir.into());
        self
    }

    /// `-l<name>`
    pub fn link(mut self, name: impl Into<String>) -> Self {
        self.libraries.push(name.into());
        self
    }

    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn sources(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.source.as_path()).chain(self.extra_sources.iter().map(PathBuf::as_path))
    }

    /// Everything after the sources and output on the command line, in order:
    /// includes, base flags, request flags, library dirs, libraries
    pub fn flags(&self, base: &[String]) -> Vec<String> {
        let mut out = Vec::new();
        out.extend(self.include_dirs.iter().map(|d| format!("-I{}", d.display())));
        out.extend(base.iter().cloned());
        out.extend(self.flags.iter().cloned());
        out.extend(self.library_dirs.iter().map(|d| format!("-L{}", d.display())));
        out.extend(self.libraries.iter().map(|l| format!("-l{}", l)));
        out
    }

    fn stem(&self) -> String {
        self.source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "module".to_string())
    }
}

/// A built (or cached) shared library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub library: PathBuf,
    pub key: String,
    /// Served from the cache without invoking the compiler
    pub cached: bool,
}

pub struct Compiler {
    toolchain: Toolchain,
    cache: ArtifactCache,
    cflags: Vec<String>,
}

impl Compiler {
    /// Detect the toolchain and open the cache described by `config`
    pub fn new(config: &BridgeConfig) -> BridgeResult<Self> {
        let toolchain = Toolchain::detect(config.compiler.as_deref())?;
        Ok(Self::with_parts(
            toolchain,
            ArtifactCache::new(&config.cache_dir),
            config.cflags.clone(),
        ))
    }

    pub fn with_parts(toolchain: Toolchain, cache: ArtifactCache, cflags: Vec<String>) -> Self {
        Compiler {
            toolchain,
            cache,
            cflags,
        }
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Cache key for `request`: source contents, compiler identity, flags and
    /// target platform
    pub fn cache_key(&self, request: &CompileRequest) -> BridgeResult<String> {
        let mut hasher = cache::KeyHasher::new();
        for source in request.sources() {
            let bytes = std::fs::read(source).map_err(|e| BridgeError::io(source, e))?;
            hasher.text(&source.to_string_lossy()).bytes(&bytes);
        }
        hasher
            .text(&self.toolchain.path().to_string_lossy())
            .text(self.toolchain.version())
            .text(&platform());
        for flag in request.flags(&self.cflags) {
            hasher.text(&flag);
        }
        Ok(hasher.finish())
    }

    /// Build `request`, or return the cached library for identical inputs.
    /// A compiler failure is `BridgeError::Compile` carrying its stderr.
    pub fn compile(&self, request: &CompileRequest) -> BridgeResult<Artifact> {
        let key = self.cache_key(request)?;
        let library_name = shared_library_name(&request.stem());

        if let Some(library) = self.cache.lookup(&key, &library_name) {
            return Ok(Artifact {
                library,
                key,
                cached: true,
            });
        }

        let dir = self.cache.entry_dir(&key);
        std::fs::create_dir_all(&dir).map_err(|e| BridgeError::io(&dir, e))?;
        let library = dir.join(&library_name);
        self.toolchain.build_shared(request, &self.cflags, &library)?;

        let now = cache::now_secs();
        self.cache.record(&CacheEntryMeta {
            key: key.clone(),
            source_path: request.source().to_path_buf(),
            library: library.clone(),
            compiler: self.toolchain.path().to_path_buf(),
            compiler_version: self.toolchain.version().to_string(),
            flags: request.flags(&self.cflags),
            platform: platform(),
            created_at: now,
            last_access_at: now,
        })?;

        Ok(Artifact {
            library,
            key,
            cached: false,
        })
    }
}

/// `<os>-<arch>` of the running host
pub fn platform() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}
