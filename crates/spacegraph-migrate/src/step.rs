//! Per-item execution policy shared by every migration step.
//!
//! A single record's failure or timeout is logged and counted; a systemic
//! failure (store unreachable) aborts the step.

use std::future::Future;

use spacegraph_core::RunId;
use spacegraph_graph::GraphError;

use crate::config::StepOptions;

/// What every step needs to execute against a store.
pub struct StepContext<'a, S> {
    pub store: &'a S,
    pub run_id: &'a RunId,
    pub options: StepOptions,
}

impl<S> Clone for StepContext<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for StepContext<'_, S> {}

impl<'a, S> StepContext<'a, S> {
    pub fn new(store: &'a S, run_id: &'a RunId, options: StepOptions) -> Self {
        Self {
            store,
            run_id,
            options,
        }
    }

    /// Run a read that the step cannot continue without. Timeouts and
    /// errors of any kind abort the step.
    pub async fn read<T, F>(&self, op: F) -> Result<T, GraphError>
    where
        F: Future<Output = Result<T, GraphError>>,
    {
        match tokio::time::timeout(self.options.query_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(GraphError::Timeout(self.options.query_timeout)),
        }
    }

    /// Run one record's operation. `Ok(None)` means the record failed and
    /// was skipped; only a systemic failure is returned as an error.
    pub async fn item<T, F>(&self, step: &str, record: &str, op: F) -> Result<Option<T>, GraphError>
    where
        F: Future<Output = Result<T, GraphError>>,
    {
        Ok(self.attempt(step, record, op).await?.ok())
    }

    /// Like [`item`](Self::item), but keeps the cause of a skipped record.
    /// The inner error is a rejection or a [`GraphError::Timeout`].
    pub async fn attempt<T, F>(
        &self,
        step: &str,
        record: &str,
        op: F,
    ) -> Result<Result<T, GraphError>, GraphError>
    where
        F: Future<Output = Result<T, GraphError>>,
    {
        match tokio::time::timeout(self.options.query_timeout, op).await {
            Ok(Ok(value)) => Ok(Ok(value)),
            Ok(Err(e)) if e.is_systemic() => {
                tracing::error!(step, key = record, error = %e, "Systemic failure, aborting step");
                Err(e)
            }
            Ok(Err(e)) => {
                tracing::warn!(step, key = record, error = %e, "Record failed, skipping");
                Ok(Err(e))
            }
            Err(_) => {
                tracing::warn!(
                    step,
                    key = record,
                    timeout_secs = self.options.query_timeout.as_secs_f64(),
                    "Record timed out, skipping"
                );
                Ok(Err(GraphError::Timeout(self.options.query_timeout)))
            }
        }
    }

    /// Backpressure pause between items.
    pub async fn throttle(&self) {
        if !self.options.throttle.is_zero() {
            tokio::time::sleep(self.options.throttle).await;
        }
    }
}
