//! Default inputs for the bundled kernels, and host re-implementations used
//! as `--traditional` baselines.
//!
//! Inputs own their buffers; the pointer values in `args()` stay valid for as
//! long as the `KernelInputs` is alive.

use std::hint::black_box;

use crate::dispatch::Value;
use crate::memory::NativeBuffer;

pub struct KernelInputs {
    function: String,
    args: Vec<Value>,
    buffers: Vec<NativeBuffer>,
}

const BYTES: usize = 1 << 20;
const ELEMENTS: usize = 100_000;
const MATRIX: usize = 64;

fn pattern_bytes(n: usize, mul: usize) -> NativeBuffer {
    let mut buf = NativeBuffer::zeroed(n);
    for (i, b) in buf.as_bytes_mut().iter_mut().enumerate() {
        *b = (i.wrapping_mul(mul) & 0xff) as u8;
    }
    buf
}

fn pattern_f64(n: usize, modulus: usize, scale: f64) -> NativeBuffer {
    let values: Vec<f64> = (0..n).map(|i| (i % modulus) as f64 * scale).collect();
    NativeBuffer::from_f64s(&values)
}

fn pattern_f32(n: usize, modulus: usize, scale: f32) -> NativeBuffer {
    let values: Vec<f32> = (0..n).map(|i| (i % modulus) as f32 * scale).collect();
    NativeBuffer::from_f32s(&values)
}

impl KernelInputs {
    /// Inputs for a bundled kernel, `None` for unknown functions
    pub fn for_function(name: &str) -> Option<Self> {
        let (args, buffers) = match name {
            "add" => (vec![Value::I32(1), Value::I32(2)], vec![]),
            "loop_sum" => (vec![Value::I64(1_000_000)], vec![]),
            "sum_u8" => {
                let buf = NativeBuffer::from_bytes(&vec![1u8; BYTES]);
                (vec![buf.value(), Value::I32(BYTES as i32)], vec![buf])
            }
            "crc32_u8" => {
                let buf = pattern_bytes(BYTES, 131);
                (vec![buf.value(), Value::I32(BYTES as i32)], vec![buf])
            }
            "dot_f64" => {
                let a = pattern_f64(ELEMENTS, 1024, 0.001);
                let b = pattern_f64(ELEMENTS, 2048, 0.002);
                (
                    vec![a.value(), b.value(), Value::I32(ELEMENTS as i32)],
                    vec![a, b],
                )
            }
            "saxpy_f64" => {
                let x = pattern_f64(ELEMENTS, 1024, 0.001);
                let y = pattern_f64(ELEMENTS, 2048, 0.002);
                (
                    vec![
                        Value::F64(1.0001),
                        x.value(),
                        y.value(),
                        Value::I32(ELEMENTS as i32),
                    ],
                    vec![x, y],
                )
            }
            "xor_u8" => {
                let a = pattern_bytes(BYTES, 1);
                let b = pattern_bytes(BYTES, 31);
                let out = NativeBuffer::zeroed(BYTES);
                (
                    vec![a.value(), b.value(), out.value(), Value::I32(BYTES as i32)],
                    vec![a, b, out],
                )
            }
            "histogram_u8" => {
                let data = pattern_bytes(BYTES / 2, 17);
                let out = NativeBuffer::zeroed(256 * 4);
                (
                    vec![data.value(), Value::I32((BYTES / 2) as i32), out.value()],
                    vec![data, out],
                )
            }
            "matmul_f32" => {
                let a = pattern_f32(MATRIX * MATRIX, 13, 0.01);
                let b = pattern_f32(MATRIX * MATRIX, 7, 0.02);
                let c = NativeBuffer::zeroed(MATRIX * MATRIX * 4);
                let m = Value::I32(MATRIX as i32);
                (vec![a.value(), b.value(), c.value(), m, m, m], vec![a, b, c])
            }
            _ => return None,
        };
        Some(KernelInputs {
            function: name.to_string(),
            args,
            buffers,
        })
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn buffers(&self) -> &[NativeBuffer] {
        &self.buffers
    }

    pub fn has_baseline(&self) -> bool {
        matches!(
            self.function.as_str(),
            "add" | "loop_sum" | "sum_u8" | "dot_f64" | "crc32_u8"
        )
    }

    /// Run the host implementation once on these inputs.
    /// Returns the result widened to `f64`, or `None` without a baseline.
    pub fn run_baseline(&self) -> Option<f64> {
        let int_arg = |i: usize| match self.args.get(i) {
            Some(Value::I32(v)) => *v as i64,
            Some(Value::I64(v)) => *v,
            _ => 0,
        };
        let result = match self.function.as_str() {
            "add" => add(black_box(int_arg(0) as i32), black_box(int_arg(1) as i32)) as f64,
            "loop_sum" => loop_sum(black_box(int_arg(0))) as f64,
            "sum_u8" => sum_u8(black_box(self.buffers[0].as_bytes())) as f64,
            "crc32_u8" => crc32_u8(black_box(self.buffers[0].as_bytes())) as f64,
            "dot_f64" => dot_f64(
                black_box(self.buffers[0].as_f64s()),
                black_box(self.buffers[1].as_f64s()),
            ),
            _ => return None,
        };
        Some(result)
    }
}

pub fn add(a: i32, b: i32) -> i32 {
    a.wrapping_add(b)
}

pub fn loop_sum(n: i64) -> i64 {
    let mut acc: i64 = 0;
    for i in 0..n {
        acc = acc.wrapping_add(((i as u64 ^ 0x9e37_79b9_7f4a_7c15) & 0xffff) as i64);
    }
    acc
}

pub fn sum_u8(buf: &[u8]) -> i32 {
    buf.iter().fold(0i32, |s, &b| s.wrapping_add(b as i32))
}

pub fn dot_f64(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn crc32_u8(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}
