//! Ambient call context and call results
//!
//! An [`EngineContext`] is threaded through every `execute`/`call`,
//! including nested ones. It carries the identity of the transaction being
//! processed and a [`CancelToken`] that the caller can trip to abandon work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nsql_core::{Error, Result};

/// Shared cancellation flag.
///
/// Cloning yields a handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, untripped token
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token. Running calls fail at their next check.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether the token has been tripped
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// `Err(Error::Cancelled)` once tripped
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Per-transaction context visible to executed code.
#[derive(Debug, Clone, Default)]
pub struct EngineContext {
    /// Identifier of the transaction sender (`@caller`)
    pub caller: String,
    /// Raw signer bytes (`@signer`)
    pub signer: Vec<u8>,
    /// Block height (`@height`)
    pub height: i64,
    /// Transaction id (`@txid`)
    pub tx_id: String,
    /// Cancellation of the enclosing request
    pub cancel: CancelToken,
}

impl EngineContext {
    /// Context for `caller` with everything else defaulted.
    pub fn new(caller: impl Into<String>) -> Self {
        Self {
            caller: caller.into(),
            ..Self::default()
        }
    }

    /// Set the block height
    pub fn with_height(mut self, height: i64) -> Self {
        self.height = height;
        self
    }

    /// Set the transaction id
    pub fn with_tx_id(mut self, tx_id: impl Into<String>) -> Self {
        self.tx_id = tx_id.into();
        self
    }

    /// Set the signer bytes
    pub fn with_signer(mut self, signer: impl Into<Vec<u8>>) -> Self {
        self.signer = signer.into();
        self
    }
}

/// Result of a top-level `call`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallResult {
    /// Every log line emitted during the call, nested calls included, in
    /// emission order.
    pub logs: Vec<String>,
}

/// Node-level services handed to extensions.
#[derive(Debug, Clone, Default)]
pub struct Service {
    /// Chain the node participates in
    pub chain_id: String,
    /// Node identity (public key)
    pub identity: Vec<u8>,
}
