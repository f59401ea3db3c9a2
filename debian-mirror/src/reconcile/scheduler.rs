// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Pacing of reconciliation cycles. */

use {
    async_trait::async_trait,
    log::info,
    std::time::Duration,
    tokio_util::sync::CancellationToken,
};

/// Decides when the next cycle runs.
#[async_trait]
pub trait Scheduler: Send {
    /// Wait until the next cycle is due.
    ///
    /// Returns `false` when no further cycles should run.
    async fn wait_next(&mut self) -> bool;
}

/// Fixed-interval pacing, stoppable through a [CancellationToken].
#[derive(Clone, Debug)]
pub struct IntervalScheduler {
    interval: Duration,
    cancel: CancellationToken,
}

impl IntervalScheduler {
    pub fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self { interval, cancel }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[async_trait]
impl Scheduler for IntervalScheduler {
    async fn wait_next(&mut self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }

        info!("next check in {}s", self.interval.as_secs());

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.interval) => true,
        }
    }
}

/// Permits a fixed number of additional cycles without waiting.
#[derive(Clone, Debug, Default)]
pub struct CountingScheduler {
    remaining: usize,
    waited: usize,
}

impl CountingScheduler {
    pub fn new(additional_cycles: usize) -> Self {
        Self {
            remaining: additional_cycles,
            waited: 0,
        }
    }

    /// Number of times [Scheduler::wait_next] was called.
    pub fn waited(&self) -> usize {
        self.waited
    }
}

#[async_trait]
impl Scheduler for CountingScheduler {
    async fn wait_next(&mut self) -> bool {
        self.waited += 1;

        if self.remaining == 0 {
            false
        } else {
            self.remaining -= 1;
            true
        }
    }
}
