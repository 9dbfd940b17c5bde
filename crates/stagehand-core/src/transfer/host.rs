// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Host port: the external operations a pipeline awaits.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use thiserror::Error;

use super::phase::Direction;
use super::request::TransferRequest;

/// Failure reported by a host transfer operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The host could not complete the transfer.
    #[error("transfer failed: {0}")]
    Failed(String),
    /// The host abandoned the transfer.
    #[error("transfer aborted by host")]
    Aborted,
}

type BoxedTransfer = Pin<Box<dyn Future<Output = Result<(), TransferError>> + Send>>;

/// One awaitable host operation (a bundle transfer or a memory reclaim).
///
/// Pipelines poll the operation once per tick with a no-op waker; the tick
/// itself is the wakeup. Dropping the operation abandons it.
pub struct TransferOp {
    future: BoxedTransfer,
}

impl TransferOp {
    /// Wraps a future.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<(), TransferError>> + Send + 'static,
    {
        Self {
            future: Box::pin(future),
        }
    }

    /// An operation that is already complete.
    pub fn ready() -> Self {
        Self::new(std::future::ready(Ok(())))
    }

    /// An operation that has already failed.
    pub fn failed(err: TransferError) -> Self {
        Self::new(std::future::ready(Err(err)))
    }

    pub(crate) fn poll_once(&mut self) -> Poll<Result<(), TransferError>> {
        let mut cx = Context::from_waker(Waker::noop());
        self.future.as_mut().poll(&mut cx)
    }
}

impl fmt::Debug for TransferOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TransferOp")
    }
}

/// Host-side collaborator that performs transfers.
pub trait TransferHost: Send {
    /// Starts moving one bundle in `direction`.
    fn begin_transfer(&mut self, direction: Direction, request: &TransferRequest) -> TransferOp;

    /// Reclaims memory after a batch of transfers.
    fn reclaim_memory(&mut self) -> TransferOp {
        TransferOp::ready()
    }
}
