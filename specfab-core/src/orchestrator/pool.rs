//! Bounded multi-product driver
//!
//! Runs several products through clones of one orchestrator, at most
//! `max_concurrent_runs` at a time. Each run gets a child cancellation token,
//! so cancelling the pool cancels every run at its next round boundary.

use super::{RoundOrchestrator, RunRequest, RunState};
use crate::error::CoreResult;
use crate::record::ProductRecord;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

pub struct RunPool {
    orchestrator: RoundOrchestrator,
    max_concurrent_runs: usize,
    cancel_token: CancellationToken,
}

impl RunPool {
    pub fn new(orchestrator: RoundOrchestrator) -> Self {
        let max_concurrent_runs = orchestrator.settings().max_concurrent_runs.max(1);
        let cancel_token = orchestrator.cancel_token().clone();
        Self {
            orchestrator,
            max_concurrent_runs,
            cancel_token,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Drive every request to a settled state and finalize it
    ///
    /// Results come back in completion order.
    pub async fn run_all(&self, requests: Vec<RunRequest>) -> Vec<CoreResult<(RunState, ProductRecord)>> {
        tracing::info!(
            runs = requests.len(),
            max_concurrent = self.max_concurrent_runs,
            "Starting run pool"
        );

        stream::iter(requests)
            .map(|request| {
                let orchestrator = self
                    .orchestrator
                    .clone()
                    .with_cancellation(self.cancel_token.child_token());
                async move { orchestrator.run(request).await }
            })
            .buffer_unordered(self.max_concurrent_runs)
            .collect()
            .await
    }
}
