//! One-call facade over the pipeline: parse, compile, load, bind.
//!
//! ```ignore
//! let bridge = Bridge::new(BridgeConfig::load()?)?;
//! let module = bridge.load(Path::new("kernels.c"))?;
//! let sum = module.binding("sum_u8")?.call(&[buf.value(), Value::I32(n)])?;
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::compiler::{CompileRequest, Compiler};
use crate::config::BridgeConfig;
use crate::dispatch::{CallBinding, WorkerPool};
use crate::error::{BridgeError, BridgeResult};
use crate::loader::{LibraryHandle, UnloadRejected};
use crate::parser::{self, FunctionDescriptor};

pub struct Bridge {
    config: BridgeConfig,
    compiler: Compiler,
    pool: Arc<WorkerPool>,
}

impl Bridge {
    /// Detect the toolchain and start the worker pool
    pub fn new(config: BridgeConfig) -> BridgeResult<Self> {
        let compiler = Compiler::new(&config)?;
        let pool = Arc::new(WorkerPool::new(config.worker_threads));
        Ok(Bridge {
            config,
            compiler,
            pool,
        })
    }

    pub fn with_compiler(config: BridgeConfig, compiler: Compiler) -> Self {
        let pool = Arc::new(WorkerPool::new(config.worker_threads));
        Bridge {
            config,
            compiler,
            pool,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Parse, build and bind a single source file
    pub fn load(&self, source: &Path) -> BridgeResult<Module> {
        self.load_request(&CompileRequest::new(source))
    }

    /// Parse the request's primary source, build the library and bind every
    /// function that survived parsing and resolved.
    ///
    /// Only a compile or load failure is an `Err`; per-function problems end
    /// up in the module's `BindReport`.
    pub fn load_request(&self, request: &CompileRequest) -> BridgeResult<Module> {
        let source = request.source();
        let parsed = parser::parse_file(source)?;
        for diagnostic in &parsed.diagnostics {
            warn!(target: "nativebridge::bridge", %diagnostic, "Skipping function");
        }

        info!(target: "nativebridge::bridge", source = %source.display(), "Compiling");
        let artifact = self.compiler.compile(request)?;
        info!(
            target: "nativebridge::bridge",
            library = %artifact.library.display(),
            cached = artifact.cached,
            "Library ready"
        );

        let names: Vec<&str> = parsed.descriptors.iter().map(|d| d.name()).collect();
        let (library, unresolved) = LibraryHandle::load(&artifact.library, names)?;

        let mut report = BindReport {
            source: source.to_path_buf(),
            library: artifact.library.clone(),
            cached: artifact.cached,
            bound: Vec::new(),
            skipped: parsed.diagnostics,
        };
        report.skipped.extend(unresolved.into_iter().map(|err| match err {
            BridgeError::SymbolNotFound {
                function, library, ..
            } => {
                let location = parsed
                    .descriptors
                    .iter()
                    .find(|d| d.name() == function)
                    .map(|d| d.location().clone());
                BridgeError::SymbolNotFound {
                    function,
                    location,
                    library,
                }
            }
            other => other,
        }));

        let mut bindings = Vec::new();
        for descriptor in parsed.descriptors {
            if !library.contains(descriptor.name()) {
                continue;
            }
            match CallBinding::bind(Arc::new(descriptor), &library, &self.pool) {
                Ok(binding) => {
                    report.bound.push(binding.name().to_string());
                    bindings.push(binding);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => report.skipped.push(e),
            }
        }

        Ok(Module {
            library,
            bindings,
            report,
        })
    }

    /// Stop the worker pool; pending async calls report `PoolClosed`
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

/// What happened to each function of a loaded source file
#[derive(Debug, Clone)]
pub struct BindReport {
    pub source: PathBuf,
    pub library: PathBuf,
    pub cached: bool,
    /// Bound function names, in source order
    pub bound: Vec<String>,
    /// Parse, unsupported-type and unresolved-symbol diagnostics
    pub skipped: Vec<BridgeError>,
}

impl BindReport {
    /// Diagnostic for `name`, if it was skipped by name
    pub fn skip_reason(&self, name: &str) -> Option<&BridgeError> {
        self.skipped.iter().find(|e| match e {
            BridgeError::UnsupportedType { function, .. }
            | BridgeError::SymbolNotFound { function, .. } => function == name,
            BridgeError::Parse {
                function: Some(function),
                ..
            } => function == name,
            _ => false,
        })
    }
}

impl fmt::Display for BindReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} bound, {} skipped{}",
            self.source.display(),
            self.bound.len(),
            self.skipped.len(),
            if self.cached { " (cached build)" } else { "" }
        )?;
        for err in &self.skipped {
            writeln!(f, "  skipped: {}", err)?;
        }
        Ok(())
    }
}

/// A loaded library together with its call bindings
pub struct Module {
    library: Arc<LibraryHandle>,
    bindings: Vec<CallBinding>,
    report: BindReport,
}

impl Module {
    pub fn library(&self) -> &Arc<LibraryHandle> {
        &self.library
    }

    pub fn report(&self) -> &BindReport {
        &self.report
    }

    /// Bindings in source order
    pub fn bindings(&self) -> &[CallBinding] {
        &self.bindings
    }

    pub fn get(&self, name: &str) -> Option<&CallBinding> {
        self.bindings.iter().find(|b| b.name() == name)
    }

    /// Like `get`, but explains a missing binding: the skip diagnostic when the
    /// function was seen, otherwise `SymbolNotFound`
    pub fn binding(&self, name: &str) -> BridgeResult<&CallBinding> {
        if let Some(binding) = self.get(name) {
            return Ok(binding);
        }
        Err(self
            .report
            .skip_reason(name)
            .cloned()
            .unwrap_or_else(|| BridgeError::SymbolNotFound {
                function: name.to_string(),
                location: None,
                library: self.report.library.clone(),
            }))
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &FunctionDescriptor> {
        self.bindings.iter().map(CallBinding::descriptor)
    }

    /// Drop this module's bindings and unload the library. Refused while
    /// bindings cloned out of the module are still alive.
    pub fn unload(self) -> Result<(), UnloadRejected> {
        let Module {
            library, bindings, ..
        } = self;
        drop(bindings);
        LibraryHandle::unload(library)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("library", &self.report.library)
            .field("bound", &self.report.bound)
            .field("skipped", &self.report.skipped.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::SourceLocation;

    fn report() -> BindReport {
        BindReport {
            source: PathBuf::from("echo.c"),
            library: PathBuf::from("/cache/abc/libecho.so"),
            cached: true,
            bound: vec!["echo_i32".to_string()],
            skipped: vec![
                BridgeError::UnsupportedType {
                    function: "pair_sum".to_string(),
                    location: SourceLocation::new("echo.c", 40),
                    type_text: "struct pair".to_string(),
                },
                BridgeError::SymbolNotFound {
                    function: "hidden_helper".to_string(),
                    location: Some(SourceLocation::new("echo.c", 16)),
                    library: PathBuf::from("/cache/abc/libecho.so"),
                },
            ],
        }
    }

    #[test]
    fn test_skip_reason_by_name() {
        let report = report();
        assert!(matches!(
            report.skip_reason("pair_sum"),
            Some(BridgeError::UnsupportedType { .. })
        ));
        assert!(matches!(
            report.skip_reason("hidden_helper"),
            Some(BridgeError::SymbolNotFound { .. })
        ));
        assert!(report.skip_reason("echo_i32").is_none());
    }

    #[test]
    fn test_report_display() {
        let text = report().to_string();
        assert!(text.starts_with("echo.c: 1 bound, 2 skipped (cached build)"));
        assert!(text.contains("hidden_helper' defined at echo.c:16"));
    }
}
