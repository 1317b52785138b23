//! Dump every relayed record as one JSON line.
//!
//! Run with: cargo run --example dump --features serde [-- /dev/input/event*]
//!
//! Note: reading /dev/input needs membership in the `input` group.

use inputtap::{BackendKind, EventKind, Hook, HookConfig, NativeEvent, RawEvent};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    // diagnostics go to stderr so they don't mix with the JSON on stdout
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = HookConfig::new();
    if let Some(pattern) = std::env::args().nth(1) {
        config = config.backend(BackendKind::Evdev).device_pattern(&pattern);
    }

    let hook = Arc::new(Hook::new(config));
    let stopper = hook.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stopper.stop();
    }) {
        eprintln!("Failed to install Ctrl-C handler: {}", e);
        return;
    }

    eprintln!("inputtap dump, press Ctrl+C to exit");

    let result = hook.start(|kind: EventKind, event: &NativeEvent| {
        match serde_json::to_string(&RawEvent::new(kind, *event)) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("Failed to encode record: {}", e),
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {} (status {:#04X})", e, e.status().code());
        std::process::exit(1);
    }
}
