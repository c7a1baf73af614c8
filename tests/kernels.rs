//! Bundled C kernels called through the bridge and checked against their
//! host re-implementations

#[macro_use]
mod common;

use nativebridge::bench::baseline;
use nativebridge::{NativeBuffer, Value};

#[test]
fn test_fill_then_sum() {
    let bridge = require_bridge!("kernels-buffer");
    let module = common::load(&bridge, "buffer.c");

    let mut buf = NativeBuffer::zeroed(10);
    let fill = module.binding("fill_u8").unwrap();
    assert_eq!(
        fill.call(&[buf.value(), Value::I32(10), Value::I32(2)]).unwrap(),
        Value::Void
    );
    assert!(buf.as_bytes().iter().all(|&b| b == 2));

    let sum = module.binding("sum_u8").unwrap();
    assert_eq!(
        sum.call(&[buf.value(), Value::I32(10)]).unwrap(),
        Value::I32(20)
    );

    // Bytes are summed unsigned
    buf.as_bytes_mut()[0] = 0xff;
    assert_eq!(
        sum.call(&[buf.value(), Value::I32(1)]).unwrap(),
        Value::I32(255)
    );
}

#[test]
fn test_crc32_check_values() {
    let bridge = require_bridge!("kernels-crc");
    let module = common::load(&bridge, "crc32.c");
    let crc = module.binding("crc32_u8").unwrap();

    let empty = NativeBuffer::zeroed(0);
    assert_eq!(crc.call(&[empty.value(), Value::I32(0)]).unwrap(), Value::I32(0));

    let check = NativeBuffer::from_bytes(b"123456789");
    assert_eq!(
        crc.call(&[check.value(), Value::I32(9)]).unwrap(),
        Value::I32(0xCBF4_3926u32 as i32)
    );

    // The helper is exported too and takes its byte at `uint8_t` width
    let update = module.binding("crc32_update").unwrap();
    let step = |data: i32| {
        update
            .call(&[Value::I32(-1), Value::I32(data)])
            .unwrap()
            .as_i32()
            .unwrap()
    };
    assert_eq!(step(0x131), step(0x31));
    assert_ne!(step(0x31), step(0x32));
}

#[test]
fn test_crc32_matches_baseline() {
    let bridge = require_bridge!("kernels-crc-baseline");
    let module = common::load(&bridge, "crc32.c");
    let crc = module.binding("crc32_u8").unwrap();

    let data: Vec<u8> = (0..4096u32).map(|i| (i.wrapping_mul(131) & 0xff) as u8).collect();
    let buf = NativeBuffer::from_bytes(&data);
    let native = crc
        .call(&[buf.value(), Value::I32(data.len() as i32)])
        .unwrap()
        .as_i32()
        .unwrap() as u32;
    assert_eq!(native, baseline::crc32_u8(&data));
}

#[test]
fn test_histogram_zeroes_output() {
    let bridge = require_bridge!("kernels-histogram");
    let module = common::load(&bridge, "histogram.c");
    let hist = module.binding("histogram_u8").unwrap();

    let data = NativeBuffer::from_bytes(&[1, 1, 7, 255]);
    let mut out = NativeBuffer::zeroed(256 * 4);
    out.as_u32s_mut().fill(99);

    hist.call(&[data.value(), Value::I32(0), out.value()]).unwrap();
    assert!(out.as_u32s().iter().all(|&c| c == 0));

    hist.call(&[data.value(), Value::I32(4), out.value()]).unwrap();
    let counts = out.as_u32s();
    assert_eq!(counts[1], 2);
    assert_eq!(counts[7], 1);
    assert_eq!(counts[255], 1);
    assert_eq!(counts.iter().sum::<u32>(), 4);
}

#[test]
fn test_loop_sum_matches_baseline() {
    let bridge = require_bridge!("kernels-loop");
    let module = common::load(&bridge, "loop.c");
    let loop_sum = module.binding("loop_sum").unwrap();

    for n in [0i64, 1, 1000, 65_537] {
        assert_eq!(
            loop_sum.call(&[Value::I64(n)]).unwrap(),
            Value::I64(baseline::loop_sum(n)),
            "n = {}",
            n
        );
    }
}

#[test]
fn test_float_kernels() {
    let bridge = require_bridge!("kernels-float");

    let dot_module = common::load(&bridge, "dot.c");
    let dot = dot_module.binding("dot_f64").unwrap();
    let a = NativeBuffer::from_f64s(&[1.0, 2.0, 3.0]);
    let b = NativeBuffer::from_f64s(&[4.0, 5.0, 6.0]);
    assert_eq!(
        dot.call(&[a.value(), b.value(), Value::I32(3)]).unwrap(),
        Value::F64(32.0)
    );

    let saxpy_module = common::load(&bridge, "saxpy.c");
    let saxpy = saxpy_module.binding("saxpy_f64").unwrap();
    let x = NativeBuffer::from_f64s(&[1.0, 2.0]);
    let y = NativeBuffer::from_f64s(&[10.0, 20.0]);
    saxpy
        .call(&[Value::F64(0.5), x.value(), y.value(), Value::I32(2)])
        .unwrap();
    assert_eq!(y.as_f64s(), &[10.5, 21.0]);

    let matmul_module = common::load(&bridge, "matmul.c");
    let matmul = matmul_module.binding("matmul_f32").unwrap();
    // [1 2; 3 4] * [5 6; 7 8]
    let ma = NativeBuffer::from_f32s(&[1.0, 2.0, 3.0, 4.0]);
    let mb = NativeBuffer::from_f32s(&[5.0, 6.0, 7.0, 8.0]);
    let mc = NativeBuffer::zeroed(4 * 4);
    let two = Value::I32(2);
    matmul
        .call(&[ma.value(), mb.value(), mc.value(), two, two, two])
        .unwrap();
    assert_eq!(mc.as_f32s(), &[19.0, 22.0, 43.0, 50.0]);
}

#[test]
fn test_xor_kernel() {
    let bridge = require_bridge!("kernels-xor");
    let module = common::load(&bridge, "xor.c");
    let xor = module.binding("xor_u8").unwrap();

    let a = NativeBuffer::from_bytes(&[0x0f, 0xff, 0x00]);
    let b = NativeBuffer::from_bytes(&[0xf0, 0x0f, 0x00]);
    let out = NativeBuffer::zeroed(3);
    xor.call(&[a.value(), b.value(), out.value(), Value::I32(3)])
        .unwrap();
    assert_eq!(out.as_bytes(), &[0xff, 0xf0, 0x00]);
}

#[test]
fn test_annotations_reach_bindings() {
    let bridge = require_bridge!("kernels-annotations");
    let loop_module = common::load(&bridge, "loop.c");
    let loop_sum = loop_module.binding("loop_sum").unwrap();
    assert_eq!(loop_sum.descriptor().cost(), nativebridge::CostHint::High);

    let buffer_module = common::load(&bridge, "buffer.c");
    assert_eq!(
        buffer_module.binding("fill_u8").unwrap().descriptor().cost(),
        nativebridge::CostHint::Low
    );
    assert_eq!(
        buffer_module.binding("sum_u8").unwrap().descriptor().cost(),
        nativebridge::CostHint::Unspecified
    );
}
