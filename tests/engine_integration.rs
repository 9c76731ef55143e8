//! End-to-end evaluation over the in-process environment
//!
//! These tests exercise the whole editor contract: submit snapshots,
//! drain events, assert on the published block statuses and on the RPC
//! counters of the in-process environment.

mod common;

use common::builders::{gain_descriptor, SnapshotBuilder};
use common::{block_errors, collect_pass, property_display};
use flowgraph_rs::{EngineContext, EngineSettings, EvalEngine};
use flowgraph_rs::host::BlockRegistry;
use std::sync::Arc;

fn context() -> Arc<EngineContext> {
    common::init_tracing();
    let registry = BlockRegistry::new();
    registry.register(gain_descriptor());
    EngineContext::new(EngineSettings::default(), registry)
}

#[test]
fn test_full_graph_evaluates_cleanly() {
    let ctx = context();
    let (engine, bridge) = EvalEngine::start(ctx);

    let snapshot = SnapshotBuilder::new()
        .gain_block("src", "", "1.0")
        .gain_block("dst", "", "2.0")
        .connect("src", "0", "dst", "0")
        .build();
    engine.submit(snapshot);

    let events = collect_pass(&bridge);
    assert_eq!(block_errors(&events, "src").unwrap(), Vec::<String>::new());
    assert_eq!(block_errors(&events, "dst").unwrap(), Vec::<String>::new());
    assert_eq!(property_display(&events, "dst", "gain").unwrap(), "2");
}

#[test]
fn test_property_edit_is_setter_only() {
    let ctx = context();
    let (engine, bridge) = EvalEngine::start(ctx.clone());

    // No connections, so the only RPCs of the second pass are the
    // property re-evaluation and the setter application.
    engine.submit(SnapshotBuilder::new().gain_block("b0", "", "2").build());
    let first = collect_pass(&bridge);
    assert_eq!(block_errors(&first, "b0").unwrap(), Vec::<String>::new());

    let env = ctx.in_process_environment();
    let before = env.stats();

    engine.submit(SnapshotBuilder::new().gain_block("b0", "", "3").build());
    let second = collect_pass(&bridge);
    let after = env.stats();

    assert_eq!(block_errors(&second, "b0").unwrap(), Vec::<String>::new());
    assert_eq!(property_display(&second, "b0", "gain").unwrap(), "3");
    // Exactly one evalProperty plus one setter; a recreate would need
    // newBlockEval, eval and the port queries on top.
    assert_eq!(after.method_calls - before.method_calls, 2);
    assert_eq!(after.find_proxy_calls, before.find_proxy_calls);
}

#[test]
fn test_resubmit_unchanged_graph_is_free() {
    let ctx = context();
    let (engine, bridge) = EvalEngine::start(ctx.clone());

    let snapshot = SnapshotBuilder::new().gain_block("b0", "", "2").build();
    engine.submit(snapshot.clone());
    collect_pass(&bridge);

    let env = ctx.in_process_environment();
    let before = env.stats();
    engine.submit(snapshot);
    collect_pass(&bridge);

    // Hash hit on the block, unchanged zone config: zero RPCs.
    assert_eq!(env.stats().total(), before.total());
}

#[test]
fn test_property_error_aborts_block_only() {
    let ctx = context();
    let (engine, bridge) = EvalEngine::start(ctx);

    let good = SnapshotBuilder::new()
        .gain_block("src", "", "1.0")
        .gain_block("dst", "", "2.0")
        .connect("src", "0", "dst", "0")
        .build();
    engine.submit(good);
    collect_pass(&bridge);

    // Break one property of `src`; `dst` must evaluate untouched and the
    // committed topology keeps using src's prior object.
    let broken = SnapshotBuilder::new()
        .block(
            "src",
            "/blocks/gain",
            "",
            &[("dtype", "\"float32\""), ("gain", "bad(")],
        )
        .gain_block("dst", "", "2.0")
        .connect("src", "0", "dst", "0")
        .build();
    engine.submit(broken);
    let events = collect_pass(&bridge);

    let src_errors = block_errors(&events, "src").unwrap();
    assert!(!src_errors.is_empty());
    assert!(src_errors[0].contains("property 'gain'"));
    // No connection error: the prior materialization still backs the wire.
    assert!(!src_errors.iter().any(|e| e.contains("connect")));
    assert_eq!(block_errors(&events, "dst").unwrap(), Vec::<String>::new());

    // Correcting the expression recovers automatically on the next pass.
    let fixed = SnapshotBuilder::new()
        .gain_block("src", "", "4.0")
        .gain_block("dst", "", "2.0")
        .connect("src", "0", "dst", "0")
        .build();
    engine.submit(fixed);
    let events = collect_pass(&bridge);
    assert_eq!(block_errors(&events, "src").unwrap(), Vec::<String>::new());
}

#[test]
fn test_unknown_block_path_reported() {
    let ctx = context();
    let (engine, bridge) = EvalEngine::start(ctx);

    let snapshot = SnapshotBuilder::new()
        .block("mystery", "/blocks/unknown", "", &[])
        .build();
    engine.submit(snapshot);

    let events = collect_pass(&bridge);
    let errors = block_errors(&events, "mystery").unwrap();
    assert!(!errors.is_empty());
    assert!(errors[0].contains("/blocks/unknown"));
}

#[test]
fn test_port_info_published() {
    let ctx = context();
    let (engine, bridge) = EvalEngine::start(ctx);

    engine.submit(SnapshotBuilder::new().gain_block("b0", "", "1.0").build());
    let events = collect_pass(&bridge);

    let ports = events.iter().find_map(|event| match event {
        flowgraph_rs::EngineEvent::BlockStatus { id, inputs, outputs, .. } if id == "b0" => {
            Some((inputs.clone(), outputs.clone()))
        }
        _ => None,
    });
    let (inputs, outputs) = ports.unwrap();
    assert_eq!(inputs.len(), 1);
    assert_eq!(outputs.len(), 1);
    // The dtype property value flows into the port type strings.
    assert_eq!(inputs[0].dtype, "float32");
}
