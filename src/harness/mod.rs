//! Native test harness.
//!
//! Any exported function named `test_<name>` is a test. It must take no
//! parameters and return either an integer status (zero passes) or a text
//! pointer (null or empty passes, anything else is the failure message).
//! Tests run one at a time in source order; files named `*_test.c` run first.

pub mod isolation;

use std::ffi::{c_char, CStr};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::bridge::{Bridge, Module};
use crate::config::Isolation;
use crate::dispatch::{CallBinding, Value};
use crate::error::{BridgeError, BridgeResult};
use crate::parser::{self, SourceLocation};
use crate::types::{FfiType, Pointee};

static TEST_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^test_[A-Za-z0-9_]+$").expect("valid test name regex"));

pub fn is_test_name(name: &str) -> bool {
    TEST_NAME.is_match(name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Pass,
    /// Assertion failure; integer-status tests carry no message
    Fail(Option<String>),
    /// Named like a test but not callable as one
    SetupError(String),
    /// Killed by this signal (only observable with fork isolation)
    Crashed(i32),
}

impl TestOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, TestOutcome::Pass)
    }
}

/// How a test reports its result, from the declared return type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultEncoding {
    Status,
    Message,
}

fn encoding_of(binding: &CallBinding) -> Result<ResultEncoding, String> {
    let desc = binding.descriptor();
    if desc.arity() != 0 {
        return Err(format!(
            "test functions take no parameters, {} declares {}",
            desc.name(),
            desc.arity()
        ));
    }
    match desc.return_type() {
        FfiType::Int32 | FfiType::Int64 => Ok(ResultEncoding::Status),
        FfiType::Pointer(Pointee::Byte) => Ok(ResultEncoding::Message),
        other => Err(format!(
            "test functions return int or const char*, {} returns {}",
            desc.name(),
            other
        )),
    }
}

fn decode(value: Value) -> TestOutcome {
    match value {
        Value::I32(0) | Value::I64(0) => TestOutcome::Pass,
        Value::I32(_) | Value::I64(_) => TestOutcome::Fail(None),
        Value::Pointer(0) => TestOutcome::Pass,
        Value::Pointer(addr) => {
            // SAFETY: a non-null text return points at a NUL-terminated string
            // that outlives the call (string literal or static buffer)
            let text = unsafe { CStr::from_ptr(addr as *const c_char) }.to_string_lossy();
            if text.is_empty() {
                TestOutcome::Pass
            } else {
                TestOutcome::Fail(Some(text.into_owned()))
            }
        }
        other => TestOutcome::SetupError(format!("unexpected result {}", other)),
    }
}

fn run_one(binding: &CallBinding, encoding: Result<ResultEncoding, String>) -> TestOutcome {
    if let Err(message) = encoding {
        return TestOutcome::SetupError(message);
    }
    match binding.call_sync(&[]) {
        Ok(value) => decode(value),
        Err(e) => TestOutcome::SetupError(e.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub location: SourceLocation,
    pub outcome: TestOutcome,
    pub duration: Duration,
}

#[derive(Debug)]
pub struct FileReport {
    pub source: PathBuf,
    pub cases: Vec<TestCase>,
    /// Set when the file could not be built or loaded; no tests ran
    pub error: Option<BridgeError>,
}

#[derive(Debug, Default)]
pub struct TestReport {
    pub files: Vec<FileReport>,
}

impl TestReport {
    pub fn cases(&self) -> impl Iterator<Item = &TestCase> {
        self.files.iter().flat_map(|f| f.cases.iter())
    }

    pub fn case(&self, name: &str) -> Option<&TestCase> {
        self.cases().find(|c| c.name == name)
    }

    fn count(&self, pred: impl Fn(&TestOutcome) -> bool) -> usize {
        self.cases().filter(|c| pred(&c.outcome)).count()
    }

    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, TestOutcome::Pass))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TestOutcome::Fail(_)))
    }

    pub fn setup_errors(&self) -> usize {
        self.count(|o| matches!(o, TestOutcome::SetupError(_)))
    }

    pub fn crashed(&self) -> usize {
        self.count(|o| matches!(o, TestOutcome::Crashed(_)))
    }

    pub fn file_errors(&self) -> usize {
        self.files.iter().filter(|f| f.error.is_some()).count()
    }

    pub fn is_success(&self) -> bool {
        self.passed() == self.cases().count() && self.file_errors() == 0
    }

    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for file in &self.files {
            writeln!(f, "{}", file.source.display())?;
            if let Some(err) = &file.error {
                writeln!(f, "  ! {}", err)?;
            }
            for case in &file.cases {
                match &case.outcome {
                    TestOutcome::Pass => writeln!(f, "  ✓ {}", case.name)?,
                    TestOutcome::Fail(None) => writeln!(f, "  ✗ {}", case.name)?,
                    TestOutcome::Fail(Some(msg)) => writeln!(f, "  ✗ {} ({})", case.name, msg)?,
                    TestOutcome::SetupError(msg) => {
                        writeln!(f, "  ! {} (setup error: {})", case.name, msg)?
                    }
                    TestOutcome::Crashed(signal) => writeln!(
                        f,
                        "  ✗ {} ({})",
                        case.name,
                        BridgeError::NativeFault {
                            function: case.name.clone(),
                            signal: *signal,
                        }
                    )?,
                }
                if !case.outcome.is_pass() {
                    writeln!(f, "      at {}", case.location)?;
                }
            }
        }
        write!(f, "{} passed, {} failed", self.passed(), self.failed())?;
        if self.setup_errors() > 0 {
            write!(f, ", {} setup errors", self.setup_errors())?;
        }
        if self.crashed() > 0 {
            write!(f, ", {} crashed", self.crashed())?;
        }
        if self.file_errors() > 0 {
            write!(f, ", {} files failed to build", self.file_errors())?;
        }
        Ok(())
    }
}

/// Native test files under `path`: the file itself, or every `.c` file in the
/// directory tree with `*_test.c` first, each group in path order
pub fn collect_sources(path: &Path) -> BridgeResult<Vec<PathBuf>> {
    let meta = std::fs::metadata(path).map_err(|e| BridgeError::io(path, e))?;
    if meta.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut found = Vec::new();
    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir).map_err(|e| BridgeError::io(&dir, e))? {
            let entry = entry.map_err(|e| BridgeError::io(&dir, e))?;
            let entry_path = entry.path();
            if entry_path.is_dir() {
                pending.push(entry_path);
            } else if entry_path.extension().is_some_and(|ext| ext == "c") {
                found.push(entry_path);
            }
        }
    }
    found.sort_by_key(|p| (!is_test_file(p), p.clone()));
    Ok(found)
}

fn is_test_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with("_test.c"))
}

/// Whether `source` defines anything named like a test. Unreadable files
/// count as test files so the failure shows up in the report.
fn declares_tests(source: &Path) -> bool {
    match parser::parse_file(source) {
        Ok(parsed) => {
            parsed.descriptors.iter().any(|d| is_test_name(d.name()))
                || parsed.diagnostics.iter().any(|e| match e {
                    BridgeError::UnsupportedType { function, .. }
                    | BridgeError::Parse {
                        function: Some(function),
                        ..
                    } => is_test_name(function),
                    _ => false,
                })
        }
        Err(_) => true,
    }
}

pub struct TestRunner<'a> {
    bridge: &'a Bridge,
    isolation: Isolation,
}

impl<'a> TestRunner<'a> {
    /// Runner using the bridge's configured isolation
    pub fn new(bridge: &'a Bridge) -> Self {
        TestRunner {
            bridge,
            isolation: bridge.config().isolation,
        }
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    /// Run every test under `path` (file or directory)
    pub fn run_path(&self, path: &Path) -> BridgeResult<TestReport> {
        let mut report = TestReport::default();
        for source in collect_sources(path)? {
            if !declares_tests(&source) {
                debug!(target: "nativebridge::harness", source = %source.display(), "No tests, skipping");
                continue;
            }
            report.files.push(self.run_file(&source));
        }
        info!(
            target: "nativebridge::harness",
            passed = report.passed(),
            failed = report.failed(),
            setup_errors = report.setup_errors(),
            crashed = report.crashed(),
            "Native tests finished"
        );
        Ok(report)
    }

    /// Build `source` once and run its tests
    pub fn run_file(&self, source: &Path) -> FileReport {
        let mut file = FileReport {
            source: source.to_path_buf(),
            cases: Vec::new(),
            error: None,
        };
        match self.bridge.load(source) {
            Ok(module) => file.cases = self.run_module(&module),
            Err(e) => {
                warn!(target: "nativebridge::harness", source = %source.display(), error = %e, "Test file failed");
                file.error = Some(e);
            }
        }
        file
    }

    /// Discover and run the tests of an already loaded module
    pub fn run_module(&self, module: &Module) -> Vec<TestCase> {
        let mut cases = Vec::new();

        // Named like a test but never bound: unsupported signature, parse
        // error or a symbol the library does not export
        let mut unbindable: Vec<(String, SourceLocation, String)> = module
            .report()
            .skipped
            .iter()
            .filter_map(|e| {
                let (function, location) = match e {
                    BridgeError::UnsupportedType {
                        function, location, ..
                    }
                    | BridgeError::SymbolNotFound {
                        function,
                        location: Some(location),
                        ..
                    }
                    | BridgeError::Parse {
                        function: Some(function),
                        location,
                        ..
                    } => (function, location),
                    _ => return None,
                };
                is_test_name(function)
                    .then(|| (function.clone(), location.clone(), e.to_string()))
            })
            .collect();
        unbindable.sort_by_key(|(_, location, _)| location.line);

        for binding in module.bindings().iter().filter(|b| is_test_name(b.name())) {
            let line = binding.descriptor().location().line;
            while unbindable.first().is_some_and(|(_, loc, _)| loc.line < line) {
                let (name, location, message) = unbindable.remove(0);
                cases.push(setup_error_case(name, location, message));
            }

            let encoding = encoding_of(binding);
            let name = binding.name().to_string();
            debug!(target: "nativebridge::harness", test = %name, "Running");
            let start = Instant::now();
            let outcome = self.execute(binding, encoding);
            cases.push(TestCase {
                name,
                location: binding.descriptor().location().clone(),
                outcome,
                duration: start.elapsed(),
            });
        }
        for (name, location, message) in unbindable {
            cases.push(setup_error_case(name, location, message));
        }
        cases
    }

    fn execute(&self, binding: &CallBinding, encoding: Result<ResultEncoding, String>) -> TestOutcome {
        match self.isolation {
            Isolation::InProcess => run_one(binding, encoding),
            #[cfg(unix)]
            Isolation::Fork => {
                if encoding.is_err() {
                    return run_one(binding, encoding);
                }
                isolation::run_forked(binding.name(), || run_one(binding, encoding))
            }
            #[cfg(not(unix))]
            Isolation::Fork => {
                warn!(target: "nativebridge::harness", "Fork isolation unavailable, running in process");
                run_one(binding, encoding)
            }
        }
    }
}

fn setup_error_case(name: String, location: SourceLocation, message: String) -> TestCase {
    TestCase {
        name,
        location,
        outcome: TestOutcome::SetupError(message),
        duration: Duration::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_convention() {
        assert!(is_test_name("test_add_basic"));
        assert!(!is_test_name("test_"));
        assert!(!is_test_name("add_test"));
        assert!(!is_test_name("testing"));
    }

    #[test]
    fn test_decode_encodings() {
        assert_eq!(decode(Value::I32(0)), TestOutcome::Pass);
        assert_eq!(decode(Value::I64(3)), TestOutcome::Fail(None));
        assert_eq!(decode(Value::Pointer(0)), TestOutcome::Pass);

        let msg = c"ASSERT(add(2, 3) == 6)";
        assert_eq!(
            decode(Value::Pointer(msg.as_ptr() as usize)),
            TestOutcome::Fail(Some("ASSERT(add(2, 3) == 6)".to_string()))
        );
        assert_eq!(decode(Value::Pointer(c"".as_ptr() as usize)), TestOutcome::Pass);
    }

    #[test]
    fn test_collect_sources_orders_test_files_first() {
        let dir = std::env::temp_dir().join(format!("nb-collect-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        for name in ["b.c", "a_test.c", "nested/c_test.c", "notes.txt", "a.c"] {
            std::fs::write(dir.join(name), "").unwrap();
        }
        let names: Vec<String> = collect_sources(&dir)
            .unwrap()
            .iter()
            .map(|p| p.strip_prefix(&dir).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a_test.c", "nested/c_test.c", "a.c", "b.c"]);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_report_summary() {
        let case = |name: &str, outcome| TestCase {
            name: name.to_string(),
            location: SourceLocation::new("t_test.c", 3),
            outcome,
            duration: Duration::ZERO,
        };
        let report = TestReport {
            files: vec![FileReport {
                source: PathBuf::from("t_test.c"),
                cases: vec![
                    case("test_ok", TestOutcome::Pass),
                    case("test_bad", TestOutcome::Fail(Some("ASSERT(x)".to_string()))),
                    case("test_arg", TestOutcome::SetupError("takes 1".to_string())),
                    case("test_segv", TestOutcome::Crashed(11)),
                ],
                error: None,
            }],
        };
        let text = report.to_string();
        assert!(text.contains("  ✓ test_ok\n"));
        assert!(text.contains("  ✗ test_bad (ASSERT(x))\n      at t_test.c:3"));
        assert!(text.contains("signal 11"));
        assert!(text.ends_with("1 passed, 1 failed, 1 setup errors, 1 crashed"));
        assert_eq!(report.exit_code(), 1);
    }
}
