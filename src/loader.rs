//! Load half of the compiler/loader: the Library Handle.
//!
//! A handle owns a loaded shared library and the addresses of the symbols that
//! resolved at load time. The symbol table never changes afterwards. Call
//! bindings hold an `Arc` to the handle; `LibraryHandle::unload` only succeeds
//! once the caller's `Arc` is the last one.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use tracing::{debug, warn};

use crate::error::{BridgeError, BridgeResult};

pub struct LibraryHandle {
    path: PathBuf,
    library: Library,
    symbols: HashMap<String, usize>,
}

/// Returned by a refused unload; gives the handle back to the caller
pub struct UnloadRejected {
    pub handle: Arc<LibraryHandle>,
    pub error: BridgeError,
}

impl fmt::Debug for UnloadRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnloadRejected")
            .field("library", &self.handle.path)
            .field("error", &self.error)
            .finish()
    }
}

impl fmt::Debug for LibraryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryHandle")
            .field("path", &self.path)
            .field("symbols", &self.symbols.len())
            .finish()
    }
}

#[cfg(unix)]
fn open(path: &Path) -> Result<Library, libloading::Error> {
    use libloading::os::unix;
    // Resolve everything up front so missing link dependencies fail here
    // rather than on first call
    let flags = unix::RTLD_NOW | unix::RTLD_LOCAL;
    // SAFETY: loading runs the library's initializers; the artifact was
    // produced by our own compile step from user-supplied C
    unsafe { unix::Library::open(Some(path), flags) }.map(Library::from)
}

#[cfg(not(unix))]
fn open(path: &Path) -> Result<Library, libloading::Error> {
    // SAFETY: see the unix variant
    unsafe { Library::new(path) }
}

impl LibraryHandle {
    /// Load `path` and resolve each of `names`.
    ///
    /// Returns the handle and one `SymbolNotFound` per name that did not
    /// resolve. Those are expected for internal-linkage helpers and never
    /// fail the load.
    pub fn load<'a>(
        path: &Path,
        names: impl IntoIterator<Item = &'a str>,
    ) -> BridgeResult<(Arc<Self>, Vec<BridgeError>)> {
        let library = open(path).map_err(|e| BridgeError::Load {
            library: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut symbols = HashMap::new();
        let mut unresolved = Vec::new();
        for name in names {
            // SAFETY: the address is only ever called through a thunk built
            // from the parsed signature of the same name
            let found = unsafe { library.get::<unsafe extern "C" fn()>(name.as_bytes()) }
                .map(|sym| *sym as usize);
            match found {
                Ok(addr) if addr != 0 => {
                    debug!(
                        target: "nativebridge::loader",
                        symbol = name,
                        address = format_args!("{:#x}", addr),
                        "Resolved symbol"
                    );
                    symbols.insert(name.to_string(), addr);
                }
                _ => {
                    warn!(
                        target: "nativebridge::loader",
                        symbol = name,
                        library = %path.display(),
                        "Symbol not exported, function will not be bound"
                    );
                    unresolved.push(BridgeError::SymbolNotFound {
                        function: name.to_string(),
                        location: None,
                        library: path.to_path_buf(),
                    });
                }
            }
        }

        let handle = LibraryHandle {
            path: path.to_path_buf(),
            library,
            symbols,
        };
        Ok((Arc::new(handle), unresolved))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolved address of `name`
    pub fn address(&self, name: &str) -> BridgeResult<usize> {
        self.symbols
            .get(name)
            .copied()
            .ok_or_else(|| BridgeError::SymbolNotFound {
                function: name.to_string(),
                location: None,
                library: self.path.clone(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    /// Resolved symbol names, sorted
    pub fn symbol_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.symbols.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Bindings still referencing the handle, not counting the caller's own
    pub fn live_bindings(this: &Arc<Self>) -> usize {
        Arc::strong_count(this).saturating_sub(1)
    }

    /// Unload the library. Refused with `LibraryInUse` while any other `Arc`
    /// (a call binding) is alive; the handle is handed back unchanged.
    pub fn unload(this: Arc<Self>) -> Result<(), UnloadRejected> {
        match Arc::try_unwrap(this) {
            Ok(handle) => {
                let path = handle.path;
                // The handle is consumed either way; a failing dlclose only
                // means the image stays mapped
                match handle.library.close() {
                    Ok(()) => {
                        debug!(target: "nativebridge::loader", library = %path.display(), "Unloaded")
                    }
                    Err(e) => warn!(
                        target: "nativebridge::loader",
                        library = %path.display(),
                        error = %e,
                        "dlclose failed"
                    ),
                }
                Ok(())
            }
            Err(handle) => {
                let live_bindings = Self::live_bindings(&handle);
                Err(UnloadRejected {
                    error: BridgeError::LibraryInUse {
                        library: handle.path.clone(),
                        live_bindings,
                    },
                    handle,
                })
            }
        }
    }
}
