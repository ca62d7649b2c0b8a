//! Executor: the linear phase walk for one invocation.
//!
//! Walks the canonical phase order over a prebuilt chain table. Each
//! phase gets its own guarded view of the transactional resource;
//! failures inside the transaction window trigger rollback-if-owned
//! before error hooks run, and the rollback attempt never masks the
//! original error. `POST_RESPONSE` failures are non-fatal.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::chain::PhaseChains;
use crate::context::OpContext;
use crate::error::ErrorEnvelope;
use crate::guard::{GuardPolicy, GuardedResource, TxResource};
use crate::phase::Phase;

/// Outcome of one phase: continue the walk, or stop with an envelope.
/// `POST_RESPONSE` failures downgrade to `Continue` inside `run_phase`,
/// so a `Stop` always aborts the invocation.
enum PhaseOutcome {
    Continue,
    Stop(ErrorEnvelope),
}

/// Execute one invocation over its phase chain table. Consumes the
/// context; the shaped response (or the normalized error) is all that
/// leaves.
pub(crate) async fn run(
    chains: &PhaseChains,
    mut ctx: OpContext,
) -> Result<Value, ErrorEnvelope> {
    let resource: Option<Arc<dyn TxResource>> = ctx.raw_resource().cloned();
    let existed_tx_before = match &resource {
        Some(r) => r.in_transaction().await,
        None => false,
    };

    // Ephemeral until proven otherwise; PRE_TX_BEGIN hooks may still
    // flip skip_persist, so the decision is re-taken after that phase.
    let mut skip = !chains.persistent;

    if let PhaseOutcome::Stop(env) =
        run_phase(chains, &mut ctx, &resource, Phase::PreTxBegin, skip).await
    {
        return Err(env);
    }
    skip = skip || ctx.skip_persist;

    if !skip {
        if let PhaseOutcome::Stop(env) =
            run_phase(chains, &mut ctx, &resource, Phase::StartTx, skip).await
        {
            return Err(env);
        }
        ctx.owns_tx = match &resource {
            Some(r) => !existed_tx_before && r.in_transaction().await,
            None => false,
        };
    }

    for phase in [Phase::PreHandler, Phase::Handler, Phase::PostHandler, Phase::PreCommit] {
        if let PhaseOutcome::Stop(env) =
            run_phase(chains, &mut ctx, &resource, phase, skip).await
        {
            return Err(env);
        }
    }

    if !skip {
        // Ownership recomputed right before END_TX: a handler that
        // auto-began a transaction makes this invocation the owner.
        if let Some(r) = &resource {
            ctx.owns_tx = !existed_tx_before && r.in_transaction().await;
        }
        if let PhaseOutcome::Stop(env) =
            run_phase(chains, &mut ctx, &resource, Phase::EndTx, skip).await
        {
            return Err(env);
        }
    }

    // Shape the response before the post phases so late hooks can see
    // and mutate it.
    ctx.response = ctx.result.clone();

    for phase in [Phase::PostCommit, Phase::PostResponse] {
        if let PhaseOutcome::Stop(env) =
            run_phase(chains, &mut ctx, &resource, phase, skip).await
        {
            return Err(env);
        }
    }

    Ok(ctx.response.unwrap_or(Value::Null))
}

/// Run every step of one phase under that phase's guard. Handles
/// cancellation at the boundary, failure capture, rollback-if-owned,
/// error hooks, and guard removal on every path.
async fn run_phase(
    chains: &PhaseChains,
    ctx: &mut OpContext,
    resource: &Option<Arc<dyn TxResource>>,
    phase: Phase,
    skip_writes: bool,
) -> PhaseOutcome {
    if ctx.cancelled() {
        debug!(phase = phase.as_str(), "cancellation observed at phase boundary");
        rollback_if_owned(ctx, resource).await;
        let env = ErrorEnvelope::cancelled();
        ctx.error = Some(env.clone());
        return PhaseOutcome::Stop(env);
    }

    let steps = chains.steps(phase);
    if steps.is_empty() {
        return PhaseOutcome::Continue;
    }

    if let Some(r) = resource {
        let mut policy = GuardPolicy::for_phase(phase, ctx.owns_tx);
        if skip_writes {
            policy = policy.deny_writes();
        }
        ctx.install_guard(GuardedResource::new(r.clone(), phase, policy));
    }

    for step in steps {
        match step.run(ctx).await {
            Ok(Some(value)) => {
                ctx.result = Some(value);
                // Past the commit boundary the response slot tracks
                // the result.
                if phase >= Phase::PostCommit {
                    ctx.response = ctx.result.clone();
                }
            }
            Ok(None) => {}
            Err(err) => {
                let env = ErrorEnvelope::from_step(phase, &err);
                warn!(phase = phase.as_str(), label = %step.label(), %err, "step failed");
                ctx.error = Some(env.clone());

                if phase == Phase::PostResponse {
                    // Side effects are committed by now; the rest of
                    // the chain still runs.
                    for hook in chains.error_steps(phase) {
                        if let Err(e) = hook.run(ctx).await {
                            warn!(label = %hook.label(), %e, "error hook failed");
                        }
                    }
                    warn!(%err, "POST_RESPONSE failure swallowed");
                    continue;
                }

                if phase.in_tx_window() && !skip_writes {
                    rollback_if_owned(ctx, resource).await;
                    for hook in chains.rollback_steps() {
                        if let Err(e) = hook.run(ctx).await {
                            warn!(label = %hook.label(), %e, "rollback hook failed");
                        }
                    }
                }
                for hook in chains.error_steps(phase) {
                    if let Err(e) = hook.run(ctx).await {
                        warn!(label = %hook.label(), %e, "error hook failed");
                    }
                }
                ctx.clear_guard();
                return PhaseOutcome::Stop(env);
            }
        }
    }

    ctx.clear_guard();
    PhaseOutcome::Continue
}

/// Roll back iff this invocation opened the transaction and one is
/// still open. A rollback failure is logged and never replaces the
/// error that got us here.
async fn rollback_if_owned(ctx: &OpContext, resource: &Option<Arc<dyn TxResource>>) {
    if !ctx.owns_tx {
        return;
    }
    let Some(r) = resource else {
        return;
    };
    if !r.in_transaction().await {
        return;
    }
    if let Err(e) = r.rollback().await {
        error!(%e, "rollback failed after step error");
    }
}
