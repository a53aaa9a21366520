// deferwrite-core/src/orchestrator.rs
// Entry point for units of work: binds a fresh TransactionManager per attempt

use std::sync::Arc;

use crate::config::{Mode, RunConfig};
use crate::error::{Result, TxError};
use crate::manager::TransactionManager;
use crate::mutator::{MutatorAdapter, TransactionHandle};
use crate::store::DocumentStore;

/// Owns the process-wide store handle and runs units of work against it.
///
/// A unit of work is `f(manager, payload)`. It may run more than once in
/// TRANSACTION mode, so it must not perform non-repeatable side effects.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn DocumentStore>,
    defaults: RunConfig,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Orchestrator {
            store,
            defaults: RunConfig::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: RunConfig) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn defaults(&self) -> RunConfig {
        self.defaults
    }

    /// `run` with the orchestrator's default config
    pub fn run_default<R, P, F>(&self, f: F, payload: Option<P>) -> Result<R>
    where
        F: FnMut(&mut TransactionManager<'_>, Option<&P>) -> anyhow::Result<R>,
    {
        self.run(f, payload, self.defaults)
    }

    /// Run `f` as one unit of work and commit its writes.
    ///
    /// Errors from `f` come back as `TransactionAborted` and nothing is
    /// written. Errors raised while applying or committing come back as is.
    pub fn run<R, P, F>(&self, f: F, payload: Option<P>, config: RunConfig) -> Result<R>
    where
        F: FnMut(&mut TransactionManager<'_>, Option<&P>) -> anyhow::Result<R>,
    {
        config.validate()?;
        tracing::debug!(mode = %config.mode, max_attempts = config.max_attempts, "run started");

        let result = match config.mode {
            Mode::Transaction => self.run_transaction(f, payload.as_ref(), config.max_attempts),
            Mode::Batch => self.run_batch(f, payload.as_ref()),
        };

        match &result {
            Ok(_) => tracing::debug!(mode = %config.mode, "run committed"),
            Err(err) => tracing::debug!(mode = %config.mode, error = %err, "run failed"),
        }
        result
    }

    fn run_transaction<R, P, F>(&self, mut f: F, payload: Option<&P>, max_attempts: u32) -> Result<R>
    where
        F: FnMut(&mut TransactionManager<'_>, Option<&P>) -> anyhow::Result<R>,
    {
        let store = self.store.as_ref();
        let mut output = None;
        let mut attempt = 0u32;

        store.run_transaction(max_attempts, &mut |handle: &mut dyn TransactionHandle| {
            attempt += 1;
            if attempt > 1 {
                tracing::debug!(attempt, "unit of work re-invoked after conflict");
            }

            let mut manager = TransactionManager::new(store, MutatorAdapter::Transaction(handle));
            let value = f(&mut manager, payload).map_err(|e| TxError::aborted(Mode::Transaction, e))?;
            manager.apply_writes()?;
            output = Some(value);
            Ok(())
        })?;

        output.ok_or_else(|| {
            TxError::aborted(
                Mode::Transaction,
                anyhow::anyhow!("engine committed without running the unit of work"),
            )
        })
    }

    fn run_batch<R, P, F>(&self, mut f: F, payload: Option<&P>) -> Result<R>
    where
        F: FnMut(&mut TransactionManager<'_>, Option<&P>) -> anyhow::Result<R>,
    {
        let store = self.store.as_ref();
        let mut batch = store.batch();
        let mut manager = TransactionManager::new(store, MutatorAdapter::Batch(&mut *batch));

        let value = f(&mut manager, payload).map_err(|e| TxError::aborted(Mode::Batch, e))?;
        manager.apply_writes()?;
        Ok(value)
    }
}
