//! Call dispatcher.
//!
//! A `CallBinding` joins a parsed descriptor, the resolved symbol address and a
//! marshaling thunk. Arguments are checked against the descriptor before any
//! native code runs. `Sync` bindings execute on the calling thread; `Async`
//! bindings are queued on the worker pool and hand back a `PendingCall`.
//!
//! Each binding holds an `Arc` to its library, as does every in-flight async
//! call, so the library cannot be unloaded underneath either.

pub mod pool;
pub mod thunk;
pub mod value;

use std::sync::Arc;
use std::time::Duration;

use smallvec::SmallVec;
use tracing::trace;

use crate::error::{BridgeError, BridgeResult};
use crate::loader::LibraryHandle;
use crate::parser::{FunctionDescriptor, SyncPolicy};

pub use pool::{Completion, RecvTimeoutError, TryRecvError, WorkerPool};
pub use thunk::{AbiClass, Thunk, ThunkSignature};
pub use value::Value;

/// Marshaling slots; most native signatures fit without spilling to the heap
type Slots = SmallVec<[u64; 8]>;

#[derive(Clone)]
pub struct CallBinding {
    descriptor: Arc<FunctionDescriptor>,
    address: usize,
    thunk: Thunk,
    policy: SyncPolicy,
    library: Arc<LibraryHandle>,
    pool: Arc<WorkerPool>,
}

impl std::fmt::Debug for CallBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallBinding")
            .field("function", &self.descriptor.name())
            .field("address", &format_args!("{:#x}", self.address))
            .field("policy", &self.policy)
            .finish()
    }
}

impl CallBinding {
    /// Bind `descriptor` to its symbol in `library`.
    ///
    /// Fails with `SymbolNotFound` when the symbol did not resolve, so an
    /// unexported function never yields a binding.
    pub fn bind(
        descriptor: Arc<FunctionDescriptor>,
        library: &Arc<LibraryHandle>,
        pool: &Arc<WorkerPool>,
    ) -> BridgeResult<Self> {
        let address = library.address(descriptor.name())?;
        let thunk = thunk::thunk_for(&ThunkSignature::of(&descriptor))?;
        Ok(CallBinding {
            policy: descriptor.policy(),
            descriptor,
            address,
            thunk,
            library: Arc::clone(library),
            pool: Arc::clone(pool),
        })
    }

    /// Same binding with a different execution policy
    pub fn with_policy(mut self, policy: SyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn descriptor(&self) -> &FunctionDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn arity(&self) -> usize {
        self.descriptor.arity()
    }

    pub fn policy(&self) -> SyncPolicy {
        self.policy
    }

    pub fn library(&self) -> &Arc<LibraryHandle> {
        &self.library
    }

    /// Check `args` against the descriptor and lay them out in slots
    fn marshal(&self, args: &[Value]) -> BridgeResult<Slots> {
        let params = self.descriptor.params();
        if args.len() != params.len() {
            return Err(BridgeError::Argument {
                function: self.name().to_string(),
                message: format!("expected {} argument(s), got {}", params.len(), args.len()),
            });
        }
        let mut slots: Slots = SmallVec::from_elem(0, args.len());
        for (i, ((arg, ty), slot)) in args.iter().zip(params).zip(slots.iter_mut()).enumerate() {
            if !arg.conforms_to(ty) {
                return Err(BridgeError::Argument {
                    function: self.name().to_string(),
                    message: format!(
                        "argument {} expects {}, got {} ({})",
                        i,
                        ty,
                        arg.type_name(),
                        arg
                    ),
                });
            }
            arg.write_slot(slot);
        }
        Ok(slots)
    }

    /// Run according to the binding's policy: `Sync` returns a ready value,
    /// `Async` returns a pending handle
    pub fn invoke(&self, args: &[Value]) -> BridgeResult<Invocation> {
        match self.policy {
            SyncPolicy::Sync => self.call_sync(args).map(Invocation::Ready),
            SyncPolicy::Async => self.call_async(args).map(Invocation::Pending),
        }
    }

    /// Run according to policy and block for the result
    pub fn call(&self, args: &[Value]) -> BridgeResult<Value> {
        self.invoke(args)?.wait()
    }

    /// Run on the calling thread, whatever the policy
    pub fn call_sync(&self, args: &[Value]) -> BridgeResult<Value> {
        let slots = self.marshal(args)?;
        trace!(target: "nativebridge::dispatch", function = self.name(), "Sync call");
        // SAFETY: the thunk was built from this descriptor's signature and the
        // slots were checked against the same descriptor
        Ok(unsafe { execute(&self.thunk, self.address, &slots, &self.descriptor) })
    }

    /// Queue on the worker pool, whatever the policy
    pub fn call_async(&self, args: &[Value]) -> BridgeResult<PendingCall> {
        let slots = self.marshal(args)?;
        let thunk = self.thunk;
        let address = self.address;
        let descriptor = Arc::clone(&self.descriptor);
        let library = Arc::clone(&self.library);

        trace!(target: "nativebridge::dispatch", function = self.name(), "Async call queued");
        let receiver = self
            .pool
            .submit(move || {
                // Keeps the library mapped until the call returns
                let _library = library;
                // SAFETY: as in `call_sync`
                unsafe { execute(&thunk, address, &slots, &descriptor) }
            })
            .ok_or_else(|| BridgeError::PoolClosed {
                function: self.name().to_string(),
            })?;

        Ok(PendingCall {
            function: self.name().to_string(),
            receiver,
            done: None,
        })
    }
}

unsafe fn execute(thunk: &Thunk, address: usize, slots: &[u64], desc: &FunctionDescriptor) -> Value {
    let mut ret = 0u64;
    thunk.invoke(address, slots, &mut ret);
    Value::read_slot(&ret, desc.return_type())
}

/// Outcome of `CallBinding::invoke`
pub enum Invocation {
    Ready(Value),
    Pending(PendingCall),
}

impl Invocation {
    pub fn wait(self) -> BridgeResult<Value> {
        match self {
            Invocation::Ready(v) => Ok(v),
            Invocation::Pending(p) => p.wait(),
        }
    }
}

/// Handle to an async call running on the worker pool.
///
/// Waiting with a timeout can be repeated; a timeout abandons only the wait,
/// the native call keeps running to completion.
pub struct PendingCall {
    function: String,
    receiver: Completion<Value>,
    done: Option<BridgeResult<Value>>,
}

impl PendingCall {
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Block until the call completes
    pub fn wait(mut self) -> BridgeResult<Value> {
        if let Some(done) = self.done.take() {
            return done;
        }
        self.receiver.recv().map_err(|_| BridgeError::PoolClosed {
            function: self.function.clone(),
        })
    }

    /// Block for at most `timeout`; `Timeout` leaves the handle waitable
    pub fn wait_timeout(&mut self, timeout: Duration) -> BridgeResult<Value> {
        if let Some(done) = &self.done {
            return done.clone();
        }
        let result = match self.receiver.recv_timeout(timeout) {
            Ok(v) => Ok(v),
            Err(RecvTimeoutError::Timeout) => {
                return Err(BridgeError::Timeout {
                    function: self.function.clone(),
                    waited: timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::PoolClosed {
                function: self.function.clone(),
            }),
        };
        self.done = Some(result.clone());
        result
    }

    /// Whether the result is available without blocking
    pub fn is_ready(&mut self) -> bool {
        if self.done.is_some() {
            return true;
        }
        match self.receiver.try_recv() {
            Ok(v) => {
                self.done = Some(Ok(v));
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                self.done = Some(Err(BridgeError::PoolClosed {
                    function: self.function.clone(),
                }));
                true
            }
        }
    }
}
