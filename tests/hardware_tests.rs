//! Hardware-dependent tests that require real readers
//!
//! These tests are ignored by default and can be run with:
//! `cargo test -- --ignored`
//!
//! They require:
//! - At least one HXGCoLtd USB RFID reader connected
//! - Read permission on /dev/input/event* (root or the `input` group)

use rfidlab::input::evdev::EvdevBackend;
use rfidlab::input::{DeviceSelector, InputBackend};
use rfidlab::multiplexer::DeviceMultiplexer;
use std::sync::Arc;

/// Test reader detection with real hardware
#[test]
#[ignore]
fn test_real_reader_detection() {
    let backend = EvdevBackend::new();
    let devices = backend.list_available().expect("Should enumerate input devices");
    println!("Found {} keyboard-like input devices", devices.len());
    for d in &devices {
        println!("  {d}");
    }

    let mut mux = DeviceMultiplexer::new(Arc::new(backend));
    let readers = mux
        .register_devices(&DeviceSelector::Name("HXGCoLtd".into()))
        .expect("No HXGCoLtd reader found. Connect a reader to run this test.");
    assert!(readers.iter().all(|r| !r.address.is_empty()));
}

/// Test opening every reader's event stream
#[test]
#[ignore]
fn test_real_reader_open() {
    let backend = EvdevBackend::new();
    let readers: Vec<_> = backend
        .list_available()
        .expect("Should enumerate input devices")
        .into_iter()
        .filter(|d| d.name == "HXGCoLtd")
        .collect();
    assert!(!readers.is_empty(), "No HXGCoLtd reader found");

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        for reader in &readers {
            backend.open(reader).expect("Should open reader (check permissions?)");
        }
    });
}
