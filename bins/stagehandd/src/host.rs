// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Transfer host that pretends to stream bundles with timed sleeps.

use std::collections::HashSet;
use std::time::Duration;

use stagehand_core::{Direction, TransferError, TransferHost, TransferOp, TransferRequest};
use tracing::info;

/// Every transfer takes `transfer_time`; bundles in `failing` report an error.
pub struct SimulatedHost {
    transfer_time: Duration,
    reclaim_time: Duration,
    failing: HashSet<String>,
}

impl SimulatedHost {
    /// `reclaim_memory` takes a quarter of `transfer_time`.
    pub fn new(transfer_time: Duration, failing: impl IntoIterator<Item = String>) -> Self {
        Self {
            transfer_time,
            reclaim_time: transfer_time / 4,
            failing: failing.into_iter().collect(),
        }
    }
}

impl TransferHost for SimulatedHost {
    fn begin_transfer(&mut self, direction: Direction, request: &TransferRequest) -> TransferOp {
        info!(%direction, bundle = %request.bundle, mode = ?request.mode, "host transfer");
        let delay = self.transfer_time;
        let fail = self
            .failing
            .contains(request.bundle.as_str())
            .then(|| format!("simulated failure for {}", request.bundle));
        TransferOp::new(async move {
            tokio::time::sleep(delay).await;
            fail.map_or(Ok(()), |reason| Err(TransferError::Failed(reason)))
        })
    }

    fn reclaim_memory(&mut self) -> TransferOp {
        let delay = self.reclaim_time;
        TransferOp::new(async move {
            tokio::time::sleep(delay).await;
            Ok(())
        })
    }
}
