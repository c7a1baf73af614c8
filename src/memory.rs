//! Host-owned buffers for pointer arguments.
//!
//! The bridge passes pointers as raw addresses and never infers a length, so
//! callers pair a buffer's address with an explicit element count. Native code
//! writing past the end of a buffer is undefined behavior the bridge cannot
//! detect.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::dispatch::Value;

const ALIGN: usize = 16;

/// Zeroed, 16-byte aligned allocation
pub struct NativeBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

// Safety: the buffer uniquely owns its allocation, like a Vec<u8>
unsafe impl Send for NativeBuffer {}
unsafe impl Sync for NativeBuffer {}

impl NativeBuffer {
    /// Allocate `len` zeroed bytes
    pub fn zeroed(len: usize) -> Self {
        if len == 0 {
            // Dangling but aligned for every view type
            // SAFETY: ALIGN is non-zero
            let ptr = unsafe { NonNull::new_unchecked(ALIGN as *mut u8) };
            return NativeBuffer { ptr, len: 0 };
        }
        let layout = Self::layout(len);
        // SAFETY: layout has non-zero size
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        NativeBuffer { ptr, len }
    }

    /// Buffer holding a copy of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = Self::zeroed(bytes.len());
        buf.as_bytes_mut().copy_from_slice(bytes);
        buf
    }

    pub fn from_f64s(values: &[f64]) -> Self {
        let mut buf = Self::zeroed(std::mem::size_of_val(values));
        buf.as_f64s_mut().copy_from_slice(values);
        buf
    }

    pub fn from_f32s(values: &[f32]) -> Self {
        let mut buf = Self::zeroed(std::mem::size_of_val(values));
        buf.as_f32s_mut().copy_from_slice(values);
        buf
    }

    fn layout(len: usize) -> Layout {
        Layout::from_size_align(len, ALIGN).expect("buffer size overflows isize")
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Address as a pointer argument. The value does not borrow the buffer;
    /// keep the buffer alive until the call that receives it has returned.
    pub fn value(&self) -> Value {
        Value::Pointer(self.ptr.as_ptr() as usize)
    }

    fn view<T: Copy>(&self) -> &[T] {
        // SAFETY: the allocation is 16-aligned, zero-initialized and every bit
        // pattern is valid for the primitive element types used here
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const T, self.len / std::mem::size_of::<T>()) }
    }

    fn view_mut<T: Copy>(&mut self) -> &mut [T] {
        // SAFETY: as in `view`, and `&mut self` guarantees exclusivity
        unsafe {
            std::slice::from_raw_parts_mut(self.ptr.as_ptr() as *mut T, self.len / std::mem::size_of::<T>())
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.view()
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.view_mut()
    }

    pub fn as_u32s(&self) -> &[u32] {
        self.view()
    }

    pub fn as_u32s_mut(&mut self) -> &mut [u32] {
        self.view_mut()
    }

    pub fn as_i32s(&self) -> &[i32] {
        self.view()
    }

    pub fn as_i32s_mut(&mut self) -> &mut [i32] {
        self.view_mut()
    }

    pub fn as_f32s(&self) -> &[f32] {
        self.view()
    }

    pub fn as_f32s_mut(&mut self) -> &mut [f32] {
        self.view_mut()
    }

    pub fn as_f64s(&self) -> &[f64] {
        self.view()
    }

    pub fn as_f64s_mut(&mut self) -> &mut [f64] {
        self.view_mut()
    }
}

impl Drop for NativeBuffer {
    fn drop(&mut self) {
        if self.len > 0 {
            // SAFETY: allocated in `zeroed` with the same layout
            unsafe { alloc::dealloc(self.ptr.as_ptr(), Self::layout(self.len)) }
        }
    }
}

impl std::fmt::Debug for NativeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}
