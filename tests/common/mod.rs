//! Test utilities for the native integration tests
//!
//! Every test gets its own artifact cache under the system temp dir so runs
//! never share the user's cache. Tests that need a C toolchain skip themselves
//! when none is installed.
#![allow(dead_code)]

use nativebridge::{Bridge, BridgeConfig, BridgeError, Module};
use std::path::{Path, PathBuf};

/// Path of a file under `fixtures/`
pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(name)
}

/// Fresh cache directory for one test
pub fn temp_cache(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "nativebridge-test-{}-{}",
        tag,
        std::process::id()
    ))
}

pub fn test_config(tag: &str) -> BridgeConfig {
    BridgeConfig::default()
        .with_cache_dir(temp_cache(tag))
        .with_worker_threads(2)
}

/// Bridge over a private cache, or `None` when no C compiler is available
pub fn bridge(tag: &str) -> Option<Bridge> {
    match Bridge::new(test_config(tag)) {
        Ok(bridge) => Some(bridge),
        Err(BridgeError::Toolchain(msg)) => {
            eprintln!("skipping: no usable C toolchain ({})", msg);
            None
        }
        Err(e) => panic!("failed to create bridge: {}", e),
    }
}

/// Load a fixture, panicking with the diagnostic on failure
pub fn load(bridge: &Bridge, name: &str) -> Module {
    bridge
        .load(&fixture(name))
        .unwrap_or_else(|e| panic!("failed to load {}: {}", name, e))
}

/// Bind to a bridge or return early from the calling test
macro_rules! require_bridge {
    ($tag:expr) => {
        match common::bridge($tag) {
            Some(bridge) => bridge,
            None => return,
        }
    };
}
