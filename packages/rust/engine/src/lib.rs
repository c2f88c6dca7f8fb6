//! Disambiguation engine contract and worker-side handle management.
//!
//! This crate provides:
//! - [`contract`] — the [`EngineFactory`] / [`EngineHandle`] traits and the
//!   [`DisambiguationOutcome`] result model
//! - [`pool`] — [`EngineHandlePool`], sharing one factory across workers with
//!   one lazily-opened handle per [`WorkerContext`]
//! - [`bridge`] — an engine living in a separate process, spoken to over
//!   JSON lines

pub mod bridge;
pub mod contract;
pub mod pool;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bridge::{BridgeEngineFactory, BridgeHandle};
pub use contract::{
    DisambiguationOptions, DisambiguationOutcome, EngineFactory, EngineHandle, NoEngine, NoHandle,
    SentenceResult, Term, Variant,
};
pub use pool::{EngineHandlePool, WorkerContext};
