//! Error taxonomy for the bridge.
//!
//! Per-function and per-call errors (`Parse`, `UnsupportedType`, `SymbolNotFound`,
//! `Argument`, `Timeout`, `NativeFault`) are collected into reports next to the
//! successes. Only `Compile` aborts processing of the file that produced it.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::parser::SourceLocation;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors raised while parsing, building, loading or calling native code
#[derive(Debug, Clone)]
pub enum BridgeError {
    /// Malformed signature or annotation (per-function, non-fatal).
    /// `function` is known once the declarator has been recognized.
    Parse {
        function: Option<String>,
        location: SourceLocation,
        message: String,
    },

    /// Type not representable in the canonical model (per-function, non-fatal)
    UnsupportedType {
        function: String,
        location: SourceLocation,
        type_text: String,
    },

    /// Toolchain failure; `diagnostic` is the compiler's stderr, verbatim
    Compile {
        source_path: PathBuf,
        diagnostic: String,
    },

    /// Symbol missing from the loaded library (internal linkage, typo, renamed export).
    /// `location` is the parsed definition, when the name came from a source file.
    SymbolNotFound {
        function: String,
        location: Option<SourceLocation>,
        library: PathBuf,
    },

    /// Arity or type mismatch detected before the native call
    Argument { function: String, message: String },

    /// Async wait exceeded; the native call keeps running
    Timeout { function: String, waited: Duration },

    /// Native code terminated by a signal
    NativeFault { function: String, signal: i32 },

    /// No working C toolchain
    Toolchain(String),

    /// Dynamic loader refused the artifact
    Load { library: PathBuf, message: String },

    /// Marshaling thunk generation failed
    Jit(String),

    /// Configuration file could not be read or parsed
    Config(String),

    /// Unload requested while call bindings still reference the library
    LibraryInUse { library: PathBuf, live_bindings: usize },

    /// Worker pool was shut down before the call could be submitted or completed
    PoolClosed { function: String },

    /// Filesystem error
    Io { path: PathBuf, message: String },
}

/// Coarse grouping used by reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Function skipped because of an unsupported or unresolvable construct
    Skipped,
    /// Failed at call time
    CallFailed,
    /// Native crash
    Crashed,
    /// File-level or infrastructure failure
    Fatal,
}

impl BridgeError {
    /// Report category for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Parse { .. }
            | BridgeError::UnsupportedType { .. }
            | BridgeError::SymbolNotFound { .. } => ErrorKind::Skipped,
            BridgeError::Argument { .. }
            | BridgeError::Timeout { .. }
            | BridgeError::PoolClosed { .. } => ErrorKind::CallFailed,
            BridgeError::NativeFault { .. } => ErrorKind::Crashed,
            BridgeError::Compile { .. }
            | BridgeError::Toolchain(_)
            | BridgeError::Load { .. }
            | BridgeError::Jit(_)
            | BridgeError::Config(_)
            | BridgeError::LibraryInUse { .. }
            | BridgeError::Io { .. } => ErrorKind::Fatal,
        }
    }

    /// Whether this error stops processing of the whole source file
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        BridgeError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Parse {
                location, message, ..
            } => {
                write!(f, "parse error at {}: {}", location, message)
            }
            BridgeError::UnsupportedType {
                function,
                location,
                type_text,
            } => write!(
                f,
                "unsupported type '{}' in function '{}' at {}",
                type_text, function, location
            ),
            BridgeError::Compile {
                source_path,
                diagnostic,
            } => write!(
                f,
                "compilation failed for {}:\n{}",
                source_path.display(),
                diagnostic
            ),
            BridgeError::SymbolNotFound {
                function,
                location: Some(location),
                library,
            } => write!(
                f,
                "symbol '{}' defined at {} not exported by {}",
                function,
                location,
                library.display()
            ),
            BridgeError::SymbolNotFound {
                function,
                location: None,
                library,
            } => write!(
                f,
                "symbol '{}' not exported by {}",
                function,
                library.display()
            ),
            BridgeError::Argument { function, message } => {
                write!(f, "argument error calling '{}': {}", function, message)
            }
            BridgeError::Timeout { function, waited } => {
                write!(f, "timed out after {:?} waiting for '{}'", waited, function)
            }
            BridgeError::NativeFault { function, signal } => {
                write!(f, "'{}' crashed with signal {}", function, signal)
            }
            BridgeError::Toolchain(msg) => write!(f, "toolchain error: {}", msg),
            BridgeError::Load { library, message } => {
                write!(f, "failed to load {}: {}", library.display(), message)
            }
            BridgeError::Jit(msg) => write!(f, "thunk generation failed: {}", msg),
            BridgeError::Config(msg) => write!(f, "configuration error: {}", msg),
            BridgeError::LibraryInUse {
                library,
                live_bindings,
            } => write!(
                f,
                "cannot unload {}: {} call binding(s) still live",
                library.display(),
                live_bindings
            ),
            BridgeError::PoolClosed { function } => {
                write!(f, "worker pool closed before '{}' completed", function)
            }
            BridgeError::Io { path, message } => {
                write!(f, "I/O error on {}: {}", path.display(), message)
            }
        }
    }
}

impl std::error::Error for BridgeError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLocation {
        SourceLocation::new("kernels.c", 12)
    }

    #[test]
    fn test_per_function_errors_are_not_fatal() {
        let parse = BridgeError::Parse {
            function: Some("first_of".to_string()),
            location: loc(),
            message: "variadic".to_string(),
        };
        let unsupported = BridgeError::UnsupportedType {
            function: "pair_sum".to_string(),
            location: loc(),
            type_text: "struct pair".to_string(),
        };
        assert_eq!(parse.kind(), ErrorKind::Skipped);
        assert_eq!(unsupported.kind(), ErrorKind::Skipped);
        assert!(!parse.is_fatal());
        assert!(!unsupported.is_fatal());
    }

    #[test]
    fn test_compile_error_is_fatal_and_verbatim() {
        let err = BridgeError::Compile {
            source_path: PathBuf::from("broken.c"),
            diagnostic: "broken.c:3:14: error: expected expression".to_string(),
        };
        assert!(err.is_fatal());
        assert!(err
            .to_string()
            .contains("broken.c:3:14: error: expected expression"));
    }

    #[test]
    fn test_diagnostics_name_function_and_location() {
        let err = BridgeError::UnsupportedType {
            function: "pair_sum".to_string(),
            location: loc(),
            type_text: "struct pair".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("pair_sum"));
        assert!(text.contains("kernels.c:12"));
    }

    #[test]
    fn test_unresolved_symbol_points_at_definition() {
        let err = BridgeError::SymbolNotFound {
            function: "hidden_helper".to_string(),
            location: Some(SourceLocation::new("echo.c", 16)),
            library: PathBuf::from("/cache/abc/libecho.so"),
        };
        assert_eq!(err.kind(), ErrorKind::Skipped);
        assert_eq!(
            err.to_string(),
            "symbol 'hidden_helper' defined at echo.c:16 not exported by /cache/abc/libecho.so"
        );
    }

    #[test]
    fn test_crash_is_its_own_category() {
        let err = BridgeError::NativeFault {
            function: "test_segfault".to_string(),
            signal: 11,
        };
        assert_eq!(err.kind(), ErrorKind::Crashed);
        let timeout = BridgeError::Timeout {
            function: "slow".to_string(),
            waited: Duration::from_millis(5),
        };
        assert_eq!(timeout.kind(), ErrorKind::CallFailed);
    }
}
