//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use flowgraph_rs::eval::{EngineBridge, EngineEvent};
use std::sync::Once;
use std::time::Duration;

static TRACING: Once = Once::new();

/// Initialize tracing once for debugging test runs (RUST_LOG=debug)
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .try_init();
    });
}

/// Generous timeout for one evaluation pass
pub fn pass_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Wait for the next pass and collect its block statuses
pub fn collect_pass(bridge: &EngineBridge) -> Vec<EngineEvent> {
    bridge.wait_eval_done(pass_timeout())
}

/// Extract the error list of one block from a pass's events
pub fn block_errors(events: &[EngineEvent], block_id: &str) -> Option<Vec<String>> {
    events.iter().find_map(|event| match event {
        EngineEvent::BlockStatus { id, errors, .. } if id == block_id => Some(errors.clone()),
        _ => None,
    })
}

/// Extract one property's display string from a pass's events
pub fn property_display(events: &[EngineEvent], block_id: &str, key: &str) -> Option<String> {
    events.iter().find_map(|event| match event {
        EngineEvent::BlockStatus { id, properties, .. } if id == block_id => {
            properties.get(key).map(|r| r.display_string.clone())
        }
        _ => None,
    })
}
