//! Shared engine factory and per-worker handle slots.
//!
//! The factory is built once at startup and held behind an `Arc`; every
//! worker gets its own [`WorkerContext`], which lazily opens one handle on
//! first use and keeps it until the handle reports itself unusable.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use tracing::{debug, error, info, instrument};

use senseindex_shared::{FilterConfig, Result, SenseIndexError};

use crate::contract::{DisambiguationOptions, DisambiguationOutcome, EngineFactory, EngineHandle};

// ---------------------------------------------------------------------------
// EngineHandlePool
// ---------------------------------------------------------------------------

/// Owner of the process-wide engine factory.
pub struct EngineHandlePool<F> {
    factory: Arc<F>,
    next_worker: Arc<AtomicUsize>,
}

impl<F> Clone for EngineHandlePool<F> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            next_worker: Arc::clone(&self.next_worker),
        }
    }
}

impl<F: EngineFactory> EngineHandlePool<F> {
    /// Wrap an already-constructed factory.
    pub fn new(factory: F) -> Self {
        Self::from_shared(Arc::new(factory))
    }

    /// Wrap a factory that is already shared elsewhere.
    pub fn from_shared(factory: Arc<F>) -> Self {
        Self {
            factory,
            next_worker: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Construct the factory from the configured matrix directory.
    ///
    /// Any failure here is a configuration error: no document can be
    /// processed without a factory.
    #[instrument(skip_all)]
    pub fn open<O>(config: &FilterConfig, open_factory: O) -> Result<Self>
    where
        O: FnOnce(&Path) -> Result<F>,
    {
        let matrix_dir = config.matrix_directory.as_deref().ok_or_else(|| {
            SenseIndexError::config("no matrix directory configured for the engine")
        })?;

        let start = Instant::now();
        info!(matrix_dir = %matrix_dir.display(), "constructing engine factory");

        let factory = open_factory(matrix_dir).map_err(|e| match e {
            SenseIndexError::Config { .. } => e,
            other => SenseIndexError::config(format!(
                "engine factory for {} failed: {other}",
                matrix_dir.display()
            )),
        })?;

        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "engine factory ready"
        );
        Ok(Self::new(factory))
    }

    /// The shared factory.
    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    /// Create a context for one worker. Call once per worker, not per document.
    pub fn worker(&self) -> WorkerContext<F> {
        let id = self.next_worker.fetch_add(1, Ordering::Relaxed);
        debug!(worker = id, "worker context created");
        WorkerContext {
            id,
            factory: Arc::clone(&self.factory),
            slot: HandleSlot::Empty,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerContext
// ---------------------------------------------------------------------------

enum HandleSlot<H> {
    Empty,
    Ready(H),
    /// Handle creation failed or the handle broke; the worker stays unusable.
    Failed(String),
}

/// One worker's view of the engine: the shared factory plus its own handle.
pub struct WorkerContext<F: EngineFactory> {
    id: usize,
    factory: Arc<F>,
    slot: HandleSlot<F::Handle>,
}

impl<F: EngineFactory> WorkerContext<F> {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    /// Whether a handle has been opened for this worker yet.
    pub fn has_handle(&self) -> bool {
        matches!(self.slot, HandleSlot::Ready(_))
    }

    /// This worker's handle, opened on first call and reused afterwards.
    ///
    /// A failed open is remembered: every later call fails with
    /// [`SenseIndexError::Resource`] without asking the factory again.
    pub fn handle(&mut self) -> Result<&mut F::Handle> {
        if matches!(self.slot, HandleSlot::Empty) {
            self.slot = match self.factory.open_handle() {
                Ok(handle) => {
                    debug!(worker = self.id, "engine handle opened");
                    HandleSlot::Ready(handle)
                }
                Err(e) => {
                    error!(worker = self.id, error = %e, "engine handle creation failed");
                    HandleSlot::Failed(e.to_string())
                }
            };
        }

        match &mut self.slot {
            HandleSlot::Ready(handle) => Ok(handle),
            HandleSlot::Failed(reason) => Err(SenseIndexError::resource(format!(
                "worker {} has no engine handle: {reason}",
                self.id
            ))),
            HandleSlot::Empty => Err(SenseIndexError::resource("engine handle slot is empty")),
        }
    }

    /// Disambiguate `text` with this worker's handle.
    ///
    /// A [`SenseIndexError::Resource`] from the handle means it can no
    /// longer be used: it is dropped and the failure recorded, exactly as if
    /// it had never opened. Engine errors leave the handle in place.
    pub fn disambiguate(
        &mut self,
        text: &str,
        options: &DisambiguationOptions,
    ) -> Result<DisambiguationOutcome> {
        let result = self.handle()?.disambiguate(text, options);
        if let Err(SenseIndexError::Resource(reason)) = &result {
            error!(worker = self.id, %reason, "engine handle lost, retiring it");
            self.slot = HandleSlot::Failed(reason.clone());
        }
        result
    }
}
