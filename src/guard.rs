//! Resource guard: per-phase flush/commit legality by composition.
//!
//! The kernel never owns a storage driver; it consumes a transactional
//! resource handle through the [`TxResource`] trait. During each phase
//! the executor wraps the handle in a [`GuardedResource`] carrying that
//! phase's write policy: disallowed operations fail with a typed
//! guard violation instead of reaching the handle. The wrapper replaces
//! the original's method patching - same interface, delegation or
//! refusal decided per call.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StepError;
use crate::phase::Phase;

/// Transactional resource handle the kernel consumes but does not
/// implement. Implementations decide what "transaction" means; the
/// kernel only needs these capability hooks.
#[async_trait]
pub trait TxResource: Send + Sync {
    async fn begin(&self) -> anyhow::Result<()>;
    async fn flush(&self) -> anyhow::Result<()>;
    async fn commit(&self) -> anyhow::Result<()>;
    async fn rollback(&self) -> anyhow::Result<()>;
    async fn in_transaction(&self) -> bool;
}

/// Write policy for one phase execution.
#[derive(Debug, Clone, Copy)]
pub struct GuardPolicy {
    pub allow_flush: bool,
    pub allow_commit: bool,
    pub require_owned_tx_for_commit: bool,
    pub owns_tx: bool,
}

impl GuardPolicy {
    /// The fixed phase policy table. Commit is only ever legal in
    /// END_TX, and there only for the transaction owner.
    pub fn for_phase(phase: Phase, owns_tx: bool) -> GuardPolicy {
        let (allow_flush, allow_commit) = match phase {
            Phase::PreTxBegin | Phase::StartTx => (false, false),
            Phase::PreHandler | Phase::Handler | Phase::PostHandler => (true, false),
            Phase::PreCommit => (false, false),
            Phase::EndTx => (true, true),
            Phase::PostCommit | Phase::PostResponse => (false, false),
        };
        GuardPolicy { allow_flush, allow_commit, require_owned_tx_for_commit: true, owns_tx }
    }

    /// Ephemeral operations allow no writes anywhere.
    pub fn deny_writes(mut self) -> GuardPolicy {
        self.allow_flush = false;
        self.allow_commit = false;
        self
    }
}

/// Phase-scoped wrapper around the real resource handle. Steps only
/// ever see the wrapper; it delegates legal calls and refuses the rest.
#[derive(Clone)]
pub struct GuardedResource {
    inner: Arc<dyn TxResource>,
    phase: Phase,
    policy: GuardPolicy,
}

impl GuardedResource {
    pub fn new(inner: Arc<dyn TxResource>, phase: Phase, policy: GuardPolicy) -> Self {
        GuardedResource { inner, phase, policy }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn owns_tx(&self) -> bool {
        self.policy.owns_tx
    }

    /// Begin is a system-step capability, not a guarded write.
    pub async fn begin(&self) -> Result<(), StepError> {
        self.inner
            .begin()
            .await
            .map_err(|source| StepError::System { label: format!("sys:txn:begin@{}", self.phase.as_str()), source })
    }

    pub async fn flush(&self) -> Result<(), StepError> {
        if !self.policy.allow_flush {
            return Err(StepError::Guard { phase: self.phase, op: "flush" });
        }
        self.inner.flush().await.map_err(StepError::Internal)
    }

    pub async fn commit(&self) -> Result<(), StepError> {
        let blocked = !self.policy.allow_commit
            || (self.policy.require_owned_tx_for_commit && !self.policy.owns_tx);
        if blocked {
            return Err(StepError::Guard { phase: self.phase, op: "commit" });
        }
        self.inner.commit().await.map_err(StepError::Internal)
    }

    /// Rollback is never phase-blocked; ownership is the executor's
    /// concern (rollback-if-owned), not the guard's.
    pub async fn rollback(&self) -> Result<(), StepError> {
        self.inner.rollback().await.map_err(StepError::Internal)
    }

    pub async fn in_transaction(&self) -> bool {
        self.inner.in_transaction().await
    }
}
