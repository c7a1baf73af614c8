/// nativebridge - call plain C functions from Rust without writing bindings
///
/// C source is parsed for function definitions and their directive comments,
/// compiled on demand into a cached shared library, loaded, and exposed as
/// typed call bindings. On top of the dispatcher sit a benchmark harness and a
/// native test harness.
///
/// # Architecture
///
/// 1. **Annotation Parser** (`parser` module)
///    - Finds top-level definitions in a C file
///    - Reads `@sync` / `@async` / `@cost low|high` directives from the comment
///      block directly above each one
///
/// 2. **Type Mapper** (`types` module)
///    - Maps C type spellings onto the canonical `FfiType` model
///    - Anything unrepresentable is rejected per function, not per file
///
/// 3. **Compiler / Loader** (`compiler`, `loader` modules)
///    - Detects a C toolchain and builds `-shared -fPIC` libraries
///    - Caches artifacts by source, compiler, flags and platform
///    - Resolves exported symbols; internal-linkage helpers never resolve
///
/// 4. **Call Dispatcher** (`dispatch` module)
///    - Checks arity and types before any native call
///    - JIT-compiled marshaling thunks, one per signature shape
///    - `Sync` calls run inline, `Async` calls go to a bounded worker pool
///
/// 5. **Harnesses** (`bench`, `harness` modules)
///
/// # Example
///
/// ```no_run
/// use nativebridge::{Bridge, BridgeConfig, Value};
/// use std::path::Path;
///
/// let bridge = Bridge::new(BridgeConfig::load()?)?;
/// let module = bridge.load(Path::new("fixtures/echo.c"))?;
/// let twice = module.binding("twice")?;
/// assert_eq!(twice.call(&[Value::I32(21)])?, Value::I32(42));
/// # Ok::<(), nativebridge::BridgeError>(())
/// ```
///
/// # Directives
///
/// ```c
/// // @cost high
/// // @async
/// long loop_sum(long n) { ... }
/// ```
///
/// - **@sync** (default) runs on the calling thread
/// - **@async** runs on the worker pool and returns a pending handle
/// - **@cost low|high** picks default benchmark iteration counts
pub mod bench;
pub mod bridge;
pub mod compiler;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod harness;
pub mod loader;
pub mod memory;
pub mod parser;
pub mod types;

pub use bench::{BenchOptions, BenchResult};
pub use bridge::{BindReport, Bridge, Module};
pub use compiler::{Artifact, CompileRequest, Compiler};
pub use config::{BridgeConfig, Isolation};
pub use dispatch::{CallBinding, Invocation, PendingCall, Value};
pub use error::{BridgeError, BridgeResult, ErrorKind};
pub use harness::{TestOutcome, TestReport, TestRunner};
pub use loader::LibraryHandle;
pub use memory::NativeBuffer;
pub use parser::{CostHint, FunctionDescriptor, SourceLocation, SyncPolicy};
pub use types::{FfiType, IntWidth};
