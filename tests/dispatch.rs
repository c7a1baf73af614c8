//! Marshaling, argument checking and sync/async dispatch against echo.c

#[macro_use]
mod common;

use std::time::Duration;

use nativebridge::{BridgeError, ErrorKind, Invocation, NativeBuffer, SyncPolicy, Value};

#[test]
fn test_echo_is_bit_exact() {
    let bridge = require_bridge!("dispatch-echo");
    let module = common::load(&bridge, "echo.c");

    let echo_i32 = module.binding("echo_i32").unwrap();
    for v in [0, 1, -1, i32::MIN, i32::MAX] {
        assert_eq!(echo_i32.call(&[Value::I32(v)]).unwrap(), Value::I32(v));
    }

    let echo_i64 = module.binding("echo_i64").unwrap();
    for v in [i64::MIN, -1, 0x1234_5678_9abc_def0, i64::MAX] {
        assert_eq!(echo_i64.call(&[Value::I64(v)]).unwrap(), Value::I64(v));
    }

    let echo_f32 = module.binding("echo_f32").unwrap();
    for v in [0.0f32, -0.0, 1.5, f32::MIN_POSITIVE, f32::INFINITY, f32::NAN] {
        let out = echo_f32.call(&[Value::F32(v)]).unwrap().as_f32().unwrap();
        assert_eq!(out.to_bits(), v.to_bits());
    }

    let echo_f64 = module.binding("echo_f64").unwrap();
    for v in [-0.0f64, std::f64::consts::PI, f64::MAX, f64::NEG_INFINITY] {
        let out = echo_f64.call(&[Value::F64(v)]).unwrap().as_f64().unwrap();
        assert_eq!(out.to_bits(), v.to_bits());
    }

    let echo_ptr = module.binding("echo_ptr").unwrap();
    let buf = NativeBuffer::zeroed(8);
    assert_eq!(echo_ptr.call(&[buf.value()]).unwrap(), buf.value());
    assert_eq!(echo_ptr.call(&[Value::null()]).unwrap(), Value::null());
}

#[test]
fn test_mixed_register_classes() {
    let bridge = require_bridge!("dispatch-mix");
    let module = common::load(&bridge, "echo.c");
    let mix = module.binding("mix_args").unwrap();
    let e = NativeBuffer::from_bytes(&[6]);
    let out = mix
        .call(&[
            Value::I32(1),
            Value::F64(2.5),
            Value::F32(0.5),
            Value::I64(10),
            e.value(),
        ])
        .unwrap();
    assert_eq!(out, Value::F64(20.0));
}

#[test]
fn test_argument_errors_precede_native_call() {
    let bridge = require_bridge!("dispatch-args");
    let module = common::load(&bridge, "echo.c");
    let bump = module.binding("counter_bump").unwrap();
    let get = module.binding("counter_get").unwrap();
    let reset = module.binding("counter_reset").unwrap();

    reset.call(&[]).unwrap();
    let err = bump.call(&[Value::I32(1)]).unwrap_err();
    assert!(matches!(err, BridgeError::Argument { .. }));
    assert_eq!(err.kind(), ErrorKind::CallFailed);
    assert_eq!(get.call(&[]).unwrap(), Value::I32(0));

    let twice = module.binding("twice").unwrap();
    assert_eq!(twice.arity(), 1);
    assert!(matches!(
        twice.call(&[]),
        Err(BridgeError::Argument { .. })
    ));
    assert!(matches!(
        twice.call(&[Value::I32(1), Value::I32(2)]),
        Err(BridgeError::Argument { .. })
    ));
    // No implicit widening
    assert!(matches!(
        twice.call(&[Value::I64(21)]),
        Err(BridgeError::Argument { .. })
    ));
    assert_eq!(twice.call(&[Value::I32(21)]).unwrap(), Value::I32(42));

    bump.call(&[]).unwrap();
    assert_eq!(get.call(&[]).unwrap(), Value::I32(1));
}

#[test]
fn test_narrow_integers_use_declared_width() {
    let bridge = require_bridge!("dispatch-narrow");
    let module = common::load(&bridge, "narrow.c");
    let call = |name: &str, args: &[i32]| {
        let args: Vec<Value> = args.iter().map(|v| Value::I32(*v)).collect();
        module.binding(name).unwrap().call(&args).unwrap()
    };

    // Results wrap at the declared width, not at 32 bits
    assert_eq!(call("add_u8", &[200, 100]), Value::I32(44));
    assert_eq!(call("add_u8", &[255, 0]), Value::I32(255));
    assert_eq!(call("neg_i8", &[-128]), Value::I32(-128));
    assert_eq!(call("neg_i8", &[7]), Value::I32(-7));
    assert_eq!(call("low_byte", &[0x1ff]), Value::I32(0xff));
    assert_eq!(call("add_u16", &[65535, 2]), Value::I32(1));

    // Arguments are converted to the parameter type like a C call would
    assert_eq!(call("widen_i16", &[40000]), Value::I32(-25536));
    assert_eq!(call("add_u8", &[256 + 3, 4]), Value::I32(7));

    let add = module.binding("add_u8").unwrap();
    assert_eq!(
        add.descriptor().to_string(),
        "u8 add_u8(u8, u8) [sync, cost unspecified]"
    );
}

#[test]
fn test_skipped_functions_are_reported() {
    let bridge = require_bridge!("dispatch-skipped");
    let module = common::load(&bridge, "echo.c");

    // Defined in echo.c but internal: the diagnostic points at the definition
    let hidden = module.binding("hidden_helper").err().unwrap();
    match &hidden {
        BridgeError::SymbolNotFound {
            location: Some(location),
            ..
        } => {
            assert!(location.file.ends_with("echo.c"));
            assert_eq!(location.line, 16);
        }
        other => panic!("expected SymbolNotFound with a location, got {:?}", other),
    }
    assert!(hidden.to_string().contains("echo.c:16"));
    match module.binding("pair_sum") {
        Err(BridgeError::UnsupportedType { type_text, .. }) => {
            assert!(type_text.contains("struct"))
        }
        other => panic!("expected UnsupportedType, got {:?}", other),
    }
    assert!(module.get("first_of").is_none());
    assert!(module
        .report()
        .skipped
        .iter()
        .any(|e| matches!(e, BridgeError::Parse { message, .. } if message.contains("variadic"))));
    assert!(module
        .report()
        .skipped
        .iter()
        .all(|e| e.kind() == ErrorKind::Skipped));
    assert!(module.report().bound.contains(&"twice".to_string()));
}

#[test]
fn test_sync_policy_returns_ready_value() {
    let bridge = require_bridge!("dispatch-sync");
    let module = common::load(&bridge, "echo.c");
    let echo = module.binding("echo_i32").unwrap();
    assert_eq!(echo.policy(), SyncPolicy::Sync);
    match echo.invoke(&[Value::I32(5)]).unwrap() {
        Invocation::Ready(v) => assert_eq!(v, Value::I32(5)),
        Invocation::Pending(_) => panic!("sync binding returned a pending call"),
    }
}

#[test]
fn test_async_timeout_then_rewait() {
    let bridge = require_bridge!("dispatch-async");
    let module = common::load(&bridge, "echo.c");
    let sleeper = module.binding("sleep_then_return").unwrap();
    assert_eq!(sleeper.policy(), SyncPolicy::Async);

    let mut pending = match sleeper.invoke(&[Value::I32(200)]).unwrap() {
        Invocation::Pending(p) => p,
        Invocation::Ready(_) => panic!("async binding ran inline"),
    };
    let err = pending.wait_timeout(Duration::from_millis(1)).unwrap_err();
    assert!(matches!(err, BridgeError::Timeout { .. }));
    assert_eq!(err.kind(), ErrorKind::CallFailed);

    assert_eq!(
        pending.wait_timeout(Duration::from_secs(10)).unwrap(),
        Value::I32(200)
    );
    assert!(pending.is_ready());
    assert_eq!(pending.wait().unwrap(), Value::I32(200));
}

#[test]
fn test_async_calls_run_concurrently() {
    let bridge = require_bridge!("dispatch-async-many");
    let module = common::load(&bridge, "echo.c");
    let echo = module
        .binding("echo_i32")
        .unwrap()
        .clone()
        .with_policy(SyncPolicy::Async);

    let pending: Vec<_> = (0..32)
        .map(|i| echo.call_async(&[Value::I32(i)]).unwrap())
        .collect();
    let results: Vec<Value> = pending.into_iter().map(|p| p.wait().unwrap()).collect();
    assert_eq!(results, (0..32).map(Value::I32).collect::<Vec<_>>());
}

#[test]
fn test_async_argument_error_is_immediate() {
    let bridge = require_bridge!("dispatch-async-args");
    let module = common::load(&bridge, "echo.c");
    let sleeper = module.binding("sleep_then_return").unwrap();
    assert!(matches!(
        sleeper.invoke(&[]),
        Err(BridgeError::Argument { .. })
    ));
}

#[test]
fn test_pool_closed_after_shutdown() {
    let bridge = require_bridge!("dispatch-shutdown");
    let module = common::load(&bridge, "echo.c");
    let sleeper = module.binding("sleep_then_return").unwrap();
    bridge.shutdown();
    assert!(matches!(
        sleeper.call(&[Value::I32(1)]),
        Err(BridgeError::PoolClosed { .. })
    ));
    // Sync dispatch does not need the pool
    let echo = module.binding("echo_i32").unwrap();
    assert_eq!(echo.call(&[Value::I32(3)]).unwrap(), Value::I32(3));
}
