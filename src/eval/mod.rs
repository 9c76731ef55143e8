//! The evaluation engine: debounced orchestration of zones and blocks
//!
//! Submissions from the editor coalesce into single evaluation passes on
//! one background worker. Each pass updates every [`ZoneEngine`] before
//! any [`EvalGraphBlock`], then commits the topology. Shared caches live
//! in the explicit [`EngineContext`] rather than globals.

pub mod block;
pub mod block_cache;
pub mod bridge;
pub mod context;
pub mod engine;
pub mod zone;

pub use block::EvalGraphBlock;
pub use block_cache::{EvalBlockCache, PropertyEvaluator};
pub use bridge::{EngineBridge, EngineEvent};
pub use context::EngineContext;
pub use engine::EvalEngine;
pub use zone::{ZoneEngine, ZoneRuntime};
