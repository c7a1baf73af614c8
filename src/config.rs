//! Bridge configuration
//!
//! Layered, lowest precedence first:
//! 1. Built-in defaults
//! 2. `nativebridge.toml` in the working directory (optional)
//! 3. Environment: `NATIVEBRIDGE_CACHE_DIR`, `CC`, `NATIVEBRIDGE_CFLAGS`,
//!    `NATIVEBRIDGE_WORKERS`
//! 4. Explicit setters (the CLI uses these for its flags)
//!
//! ```toml
//! cache_dir = "/tmp/nb-cache"
//! compiler = "clang"
//! cflags = ["-O3", "-march=native"]
//! worker_threads = 8
//! isolation = "fork"
//!
//! [bench]
//! low_cost_iterations = 5000
//! high_cost_iterations = 10
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{BridgeError, BridgeResult};

/// Default config file name looked up in the working directory
pub const CONFIG_FILE: &str = "nativebridge.toml";

/// How native test functions are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Isolation {
    /// Call directly in this process; a crash takes the process down
    #[default]
    InProcess,
    /// Run each test in a forked child (Unix only)
    Fork,
}

/// Benchmark iteration defaults
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BenchDefaults {
    /// Measured iterations for `@cost low` and unannotated functions
    pub low_cost_iterations: usize,
    /// Measured iterations for `@cost high` functions
    pub high_cost_iterations: usize,
    /// Warmup as a fraction of measured iterations
    pub warmup_fraction: f64,
    pub min_warmup: usize,
    /// Upper bound on iterations, explicit requests included
    pub max_iterations: usize,
}

impl Default for BenchDefaults {
    fn default() -> Self {
        BenchDefaults {
            low_cost_iterations: 2000,
            high_cost_iterations: 20,
            warmup_fraction: 0.05,
            min_warmup: 1,
            max_iterations: 2_000_000,
        }
    }
}

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Root of the compiled artifact cache
    pub cache_dir: PathBuf,
    /// Explicit C compiler; detected when unset
    pub compiler: Option<PathBuf>,
    /// Flags appended to every compile
    pub cflags: Vec<String>,
    /// Async worker count
    pub worker_threads: usize,
    pub isolation: Isolation,
    pub bench: BenchDefaults,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            cache_dir: default_cache_dir(),
            compiler: None,
            cflags: vec!["-O2".to_string()],
            worker_threads: num_cpus::get(),
            isolation: Isolation::InProcess,
            bench: BenchDefaults::default(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("nativebridge")
}

impl BridgeConfig {
    /// Defaults, then `nativebridge.toml` from the working directory if present,
    /// then the environment
    pub fn load() -> BridgeResult<Self> {
        let mut config = match std::fs::read_to_string(CONFIG_FILE) {
            Ok(text) => Self::parse_toml(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(BridgeError::io(CONFIG_FILE, e)),
        };
        config.apply_env();
        Ok(config)
    }

    /// Load an explicit config file, then the environment
    pub fn load_from_path(path: &Path) -> BridgeResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| BridgeError::io(path, e))?;
        let mut config = Self::parse_toml(&text)?;
        config.apply_env();
        Ok(config)
    }

    pub fn parse_toml(content: &str) -> BridgeResult<Self> {
        toml::from_str(content).map_err(|e| BridgeError::Config(e.to_string()))
    }

    /// Override fields from environment variables. Unparseable values are ignored.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = var("NATIVEBRIDGE_CACHE_DIR").filter(|s| !s.is_empty()) {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(cc) = var("CC").filter(|s| !s.trim().is_empty()) {
            self.compiler = Some(PathBuf::from(cc.trim()));
        }
        if let Some(flags) = var("NATIVEBRIDGE_CFLAGS") {
            self.cflags = flags.split_whitespace().map(String::from).collect();
        }
        if let Some(workers) = var("NATIVEBRIDGE_WORKERS")
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
        {
            self.worker_threads = workers;
        }
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_compiler(mut self, compiler: impl Into<PathBuf>) -> Self {
        self.compiler = Some(compiler.into());
        self
    }

    pub fn with_cflags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cflags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n.max(1);
        self
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }
}
