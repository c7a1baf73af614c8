//! Host C toolchain detection and invocation.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use tracing::{debug, info};

use super::CompileRequest;
use crate::error::{BridgeError, BridgeResult};

/// Compilers tried, in order, when none is configured
const CANDIDATES: &[&str] = &["cc", "clang", "gcc"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerVendor {
    Gcc,
    Clang,
    Unknown,
}

impl fmt::Display for CompilerVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompilerVendor::Gcc => write!(f, "gcc"),
            CompilerVendor::Clang => write!(f, "clang"),
            CompilerVendor::Unknown => write!(f, "unknown"),
        }
    }
}

/// A C compiler that answered `--version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    path: PathBuf,
    vendor: CompilerVendor,
    version: String,
}

impl Toolchain {
    /// Use `explicit` when given, otherwise the first working candidate.
    pub fn detect(explicit: Option<&Path>) -> BridgeResult<Self> {
        if let Some(path) = explicit {
            return Self::probe(path).ok_or_else(|| {
                BridgeError::Toolchain(format!(
                    "configured C compiler '{}' did not respond to --version",
                    path.display()
                ))
            });
        }
        CANDIDATES
            .iter()
            .find_map(|name| Self::probe(Path::new(name)))
            .ok_or_else(|| {
                BridgeError::Toolchain(format!(
                    "no C compiler found (tried {}); set CC or `compiler` in the config",
                    CANDIDATES.join(", ")
                ))
            })
    }

    /// Run `<path> --version`; `None` when it cannot be executed or fails
    pub fn probe(path: &Path) -> Option<Self> {
        let output = Command::new(path).arg("--version").output().ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let version = text.lines().next().unwrap_or("").trim().to_string();
        let vendor = classify(&text);
        debug!(
            target: "nativebridge::compiler::toolchain",
            compiler = %path.display(),
            %vendor,
            version = %version,
            "Found C compiler"
        );
        Some(Toolchain {
            path: path.to_path_buf(),
            vendor,
            version,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn vendor(&self) -> CompilerVendor {
        self.vendor
    }

    /// First line of `--version` output
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Compile and link a trivial program to check the toolchain end to end
    pub fn sanity_check(&self, scratch_dir: &Path) -> BridgeResult<()> {
        std::fs::create_dir_all(scratch_dir).map_err(|e| BridgeError::io(scratch_dir, e))?;
        let source = scratch_dir.join(format!("sanity-{}.c", std::process::id()));
        let binary = scratch_dir.join(format!("sanity-{}.out", std::process::id()));
        std::fs::write(&source, "int main(void) { return 0; }\n")
            .map_err(|e| BridgeError::io(&source, e))?;

        let output = Command::new(&self.path)
            .arg(&source)
            .arg("-o")
            .arg(&binary)
            .output()
            .map_err(|e| self.spawn_error(e));
        let _ = std::fs::remove_file(&source);
        let _ = std::fs::remove_file(&binary);

        let output = output?;
        if output.status.success() {
            Ok(())
        } else {
            Err(BridgeError::Toolchain(format!(
                "{} cannot build a trivial program:\n{}",
                self.path.display(),
                String::from_utf8_lossy(&output.stderr)
            )))
        }
    }

    /// Build `request` into a shared library at `output`.
    ///
    /// The compiler writes to a sibling temporary file which is renamed into
    /// place, so concurrent builds of the same artifact never observe a
    /// partially written library.
    pub fn build_shared(
        &self,
        request: &CompileRequest,
        cflags: &[String],
        output: &Path,
    ) -> BridgeResult<()> {
        let seq = BUILD_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = output.with_extension(format!("tmp-{}-{}", std::process::id(), seq));
        let mut cmd = Command::new(&self.path);
        cmd.args(request.sources())
            .args(["-shared", "-fPIC", "-o"])
            .arg(&tmp)
            .args(request.flags(cflags));

        info!(
            target: "nativebridge::compiler",
            source = %request.source().display(),
            compiler = %self.path.display(),
            "Compiling"
        );
        let start = Instant::now();
        let result = cmd.output().map_err(|e| self.spawn_error(e))?;

        if !result.status.success() {
            let _ = std::fs::remove_file(&tmp);
            let mut diagnostic = String::from_utf8_lossy(&result.stderr).into_owned();
            if diagnostic.trim().is_empty() {
                diagnostic = String::from_utf8_lossy(&result.stdout).into_owned();
            }
            return Err(BridgeError::Compile {
                source_path: request.source().to_path_buf(),
                diagnostic,
            });
        }

        std::fs::rename(&tmp, output).map_err(|e| BridgeError::io(output, e))?;
        info!(
            target: "nativebridge::compiler",
            library = %output.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Compiled"
        );
        Ok(())
    }

    fn spawn_error(&self, err: std::io::Error) -> BridgeError {
        BridgeError::Toolchain(format!("failed to run {}: {}", self.path.display(), err))
    }
}

/// Distinguishes temporaries of concurrent builds within one process
static BUILD_SEQ: AtomicUsize = AtomicUsize::new(0);

fn classify(version_text: &str) -> CompilerVendor {
    let lower = version_text.to_lowercase();
    if lower.contains("clang") {
        CompilerVendor::Clang
    } else if lower.contains("gcc") || lower.contains("free software foundation") {
        CompilerVendor::Gcc
    } else {
        CompilerVendor::Unknown
    }
}

/// Platform file name for a shared library built from `stem`
pub fn shared_library_name(stem: &str) -> String {
    if cfg!(target_os = "macos") {
        format!("lib{}.dylib", stem)
    } else if cfg!(windows) {
        format!("{}.dll", stem)
    } else {
        format!("lib{}.so", stem)
    }
}
