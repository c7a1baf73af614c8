//! Marshaling thunks.
//!
//! A thunk is a small Cranelift-generated function with the fixed shape
//!
//! ```text
//! extern "C" fn(target: usize, args: *const u64, ret: *mut u64)
//! ```
//!
//! It loads each argument from its 8-byte slot at the declared width, calls
//! `target` with the host's native calling convention (so integers, floats and
//! pointers land in the registers or stack slots the ABI assigns them), and
//! stores the result into `ret`. 8 and 16-bit integers travel as `i32` slots:
//! arguments are reduced to their declared width and extended per their
//! signedness, and narrow results are extended back to 32 bits before the
//! store. Thunks depend only on the signature's shape,
//! so one thunk serves every function with the same shape across all loaded
//! libraries. They are built once and never freed.

use std::sync::LazyLock;

use cranelift::prelude::*;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{BridgeError, BridgeResult};
use crate::parser::FunctionDescriptor;
use crate::types::{FfiType, IntWidth};

/// Width of one marshaling slot in bytes
pub const SLOT_SIZE: usize = 8;

type ThunkFn = unsafe extern "C" fn(target: usize, args: *const u64, ret: *mut u64);

/// Machine-level class of one argument or return value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbiClass {
    I32,
    /// 8 or 16-bit integer carried in an `i32` slot
    Narrow(IntWidth),
    I64,
    F32,
    F64,
    Ptr,
}

impl AbiClass {
    fn of(ty: &FfiType, width: Option<IntWidth>) -> Option<Self> {
        match ty {
            FfiType::Void => None,
            FfiType::Int32 => Some(width.map_or(AbiClass::I32, AbiClass::Narrow)),
            FfiType::Int64 => Some(AbiClass::I64),
            FfiType::Float32 => Some(AbiClass::F32),
            FfiType::Float64 => Some(AbiClass::F64),
            FfiType::Pointer(_) => Some(AbiClass::Ptr),
        }
    }

    fn clif(self, ptr: Type) -> Type {
        match self {
            AbiClass::I32 => types::I32,
            AbiClass::Narrow(width) if width.bits() == 8 => types::I8,
            AbiClass::Narrow(_) => types::I16,
            AbiClass::I64 => types::I64,
            AbiClass::F32 => types::F32,
            AbiClass::F64 => types::F64,
            AbiClass::Ptr => ptr,
        }
    }

    /// Type of the 8-byte slot the value is read from or written to
    fn slot(self, ptr: Type) -> Type {
        match self {
            AbiClass::Narrow(_) => types::I32,
            other => other.clif(ptr),
        }
    }

    fn abi_param(self, ptr: Type) -> AbiParam {
        let param = AbiParam::new(self.clif(ptr));
        match self {
            AbiClass::Narrow(width) if width.is_signed() => param.sext(),
            AbiClass::Narrow(_) => param.uext(),
            _ => param,
        }
    }
}

/// Shape of a native signature
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThunkSignature {
    pub params: Vec<AbiClass>,
    pub ret: Option<AbiClass>,
}

impl ThunkSignature {
    pub fn of(desc: &FunctionDescriptor) -> Self {
        ThunkSignature {
            // `void` never reaches a parameter list past the parser
            params: desc
                .params()
                .iter()
                .zip(desc.param_widths())
                .filter_map(|(ty, width)| AbiClass::of(ty, *width))
                .collect(),
            ret: AbiClass::of(desc.return_type(), desc.return_width()),
        }
    }
}

/// A compiled marshaling thunk
#[derive(Debug, Clone, Copy)]
pub struct Thunk {
    entry: ThunkFn,
}

impl Thunk {
    /// Call `target` through the thunk.
    ///
    /// # Safety
    ///
    /// `target` must be the address of a native function whose signature has
    /// exactly the shape this thunk was built for, and `args` must hold one
    /// slot per parameter, each written at the parameter's width. Whatever the
    /// native function does with pointer arguments is on the caller.
    pub unsafe fn invoke(&self, target: usize, args: &[u64], ret: &mut u64) {
        (self.entry)(target, args.as_ptr(), ret as *mut u64)
    }
}

struct ThunkJit {
    module: JITModule,
    counter: u64,
}

// Safety: the JIT module is only touched while holding `JIT`'s lock, and the
// code it hands out lives in executable memory that is never freed
unsafe impl Send for ThunkJit {}

static JIT: Mutex<Option<ThunkJit>> = Mutex::new(None);

static THUNKS: LazyLock<DashMap<ThunkSignature, Thunk>> = LazyLock::new(DashMap::new);

/// Thunk for `sig`, compiling it on first request
pub fn thunk_for(sig: &ThunkSignature) -> BridgeResult<Thunk> {
    if let Some(thunk) = THUNKS.get(sig) {
        return Ok(*thunk);
    }

    let mut guard = JIT.lock();
    // Another thread may have compiled it while we waited
    if let Some(thunk) = THUNKS.get(sig) {
        return Ok(*thunk);
    }
    if guard.is_none() {
        *guard = Some(ThunkJit::new()?);
    }
    let jit = guard
        .as_mut()
        .ok_or_else(|| BridgeError::Jit("thunk compiler unavailable".to_string()))?;
    let thunk = jit.compile(sig)?;
    THUNKS.insert(sig.clone(), thunk);
    Ok(thunk)
}

/// Number of distinct thunks compiled so far
pub fn compiled_thunks() -> usize {
    THUNKS.len()
}

impl ThunkJit {
    fn new() -> BridgeResult<Self> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("opt_level", "speed")
            .map_err(|e| BridgeError::Jit(format!("Failed to set opt_level: {}", e)))?;

        let isa_builder = cranelift_native::builder()
            .map_err(|e| BridgeError::Jit(format!("Failed to create ISA builder: {}", e)))?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| BridgeError::Jit(format!("Failed to create ISA: {}", e)))?;

        let builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        Ok(ThunkJit {
            module: JITModule::new(builder),
            counter: 0,
        })
    }

    fn compile(&mut self, sig: &ThunkSignature) -> BridgeResult<Thunk> {
        let ptr = self.module.target_config().pointer_type();

        // fn(target, args, ret)
        let mut thunk_sig = self.module.make_signature();
        for _ in 0..3 {
            thunk_sig.params.push(AbiParam::new(ptr));
        }

        // The native function, in the host's default calling convention
        let mut target_sig = self.module.make_signature();
        for class in &sig.params {
            target_sig.params.push(class.abi_param(ptr));
        }
        if let Some(class) = sig.ret {
            target_sig.returns.push(class.abi_param(ptr));
        }

        let name = format!("nb_thunk_{}", self.counter);
        self.counter += 1;
        let func_id = self
            .module
            .declare_function(&name, Linkage::Local, &thunk_sig)
            .map_err(|e| BridgeError::Jit(format!("Failed to declare {}: {}", name, e)))?;

        let mut ctx = self.module.make_context();
        ctx.func.signature = thunk_sig;
        let mut func_ctx = FunctionBuilderContext::new();
        {
            let mut builder = FunctionBuilder::new(&mut ctx.func, &mut func_ctx);
            let entry = builder.create_block();
            builder.append_block_params_for_function_params(entry);
            builder.switch_to_block(entry);
            builder.seal_block(entry);

            let params = builder.block_params(entry).to_vec();
            let (target, args_ptr, ret_ptr) = (params[0], params[1], params[2]);

            let mut args = Vec::with_capacity(sig.params.len());
            for (i, class) in sig.params.iter().enumerate() {
                let offset = (i * SLOT_SIZE) as i32;
                let mut value = builder
                    .ins()
                    .load(class.slot(ptr), MemFlags::trusted(), args_ptr, offset);
                if let AbiClass::Narrow(_) = class {
                    value = builder.ins().ireduce(class.clif(ptr), value);
                }
                args.push(value);
            }

            let sig_ref = builder.import_signature(target_sig);
            let call = builder.ins().call_indirect(sig_ref, target, &args);
            if let Some(class) = sig.ret {
                let mut result = builder.inst_results(call)[0];
                if let AbiClass::Narrow(width) = class {
                    result = if width.is_signed() {
                        builder.ins().sextend(types::I32, result)
                    } else {
                        builder.ins().uextend(types::I32, result)
                    };
                }
                builder.ins().store(MemFlags::trusted(), result, ret_ptr, 0);
            }
            builder.ins().return_(&[]);
            builder.finalize();
        }

        trace!(target: "nativebridge::dispatch::thunk", ir = %ctx.func.display(), "Generated IR");

        self.module
            .define_function(func_id, &mut ctx)
            .map_err(|e| BridgeError::Jit(format!("Failed to define {}: {}", name, e)))?;
        self.module.clear_context(&mut ctx);
        self.module
            .finalize_definitions()
            .map_err(|e| BridgeError::Jit(format!("Failed to finalize definitions: {}", e)))?;

        let code = self.module.get_finalized_function(func_id);
        debug!(
            target: "nativebridge::dispatch::thunk",
            thunk = %name,
            params = ?sig.params,
            ret = ?sig.ret,
            "Compiled marshaling thunk"
        );
        // SAFETY: the function was just defined with exactly the ThunkFn shape
        // (three pointer-sized params, no return, default call conv)
        let entry = unsafe { std::mem::transmute::<*const u8, ThunkFn>(code) };
        Ok(Thunk { entry })
    }
}
