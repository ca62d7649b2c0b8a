//! Hook merge: three step sources folded into one chain table.
//!
//! Sources: application-wide, entity-type-wide, and operation-specific.
//! Pre-like phases merge api -> entity -> op; every other slot merges
//! in the opposite direction, so operation-level hooks run closest to
//! the handler on the way in and first on the way out.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::chain::PhaseChains;
use crate::context::OpContext;
use crate::label::Label;
use crate::phase::{Phase, PhaseSlot};
use crate::specs::{HookDef, HookPredicate, OpSpec, PersistPolicy};
use crate::step::{FnStep, Step, StepResult};

/// Hook wrapped with its run-time predicate. A falsy predicate skips
/// the hook without affecting ordering; an absent one always passes.
struct PredicatedStep {
    inner: Arc<dyn Step>,
    when: HookPredicate,
}

#[async_trait]
impl Step for PredicatedStep {
    fn label(&self) -> &Label {
        self.inner.label()
    }

    async fn run(&self, ctx: &mut OpContext) -> StepResult {
        if !(self.when)(ctx) {
            debug!(label = %self.inner.label(), "hook predicate falsy; skipping");
            return Ok(None);
        }
        self.inner.run(ctx).await
    }
}

fn materialize(hook: &HookDef) -> Arc<dyn Step> {
    match &hook.when {
        Some(when) => Arc::new(PredicatedStep { inner: hook.step.clone(), when: when.clone() }),
        None => hook.step.clone(),
    }
}

/// Whether hooks for this slot merge in pre-like direction.
fn slot_is_pre_like(slot: PhaseSlot) -> bool {
    match slot {
        PhaseSlot::Main(ph) => ph.is_pre_like(),
        // Error and rollback slots behave post-like: most specific first.
        PhaseSlot::OnError(_) | PhaseSlot::OnAnyError | PhaseSlot::OnRollback => false,
    }
}

/// Synthetic step that flags the invocation as ephemeral before the
/// transaction lifecycle would start.
fn mark_skip_persist() -> Arc<dyn Step> {
    FnStep::new(Label::sys("persist", "mark_skip_persist", Phase::PreTxBegin), |ctx| {
        Box::pin(async move {
            ctx.skip_persist = true;
            Ok(None)
        })
    })
}

/// Merge the three hook sources into `chains` with direction-dependent
/// precedence, and prepend the mark-skip-persist step for ephemeral
/// operations.
pub(crate) fn merge_hooks(
    chains: &mut PhaseChains,
    api_hooks: &[HookDef],
    entity_hooks: &[HookDef],
    op: &OpSpec,
) {
    let push_source = |chains: &mut PhaseChains, hooks: &[HookDef], slot: PhaseSlot| {
        for hook in hooks.iter().filter(|h| h.slot == slot) {
            chains.push(slot, materialize(hook));
        }
    };

    let mut slots: Vec<PhaseSlot> = Phase::ALL.iter().map(|p| PhaseSlot::Main(*p)).collect();
    slots.extend(Phase::ALL.iter().map(|p| PhaseSlot::OnError(*p)));
    slots.push(PhaseSlot::OnAnyError);
    slots.push(PhaseSlot::OnRollback);

    for slot in slots {
        if slot_is_pre_like(slot) {
            push_source(chains, api_hooks, slot);
            push_source(chains, entity_hooks, slot);
            push_source(chains, &op.hooks, slot);
        } else {
            push_source(chains, &op.hooks, slot);
            push_source(chains, entity_hooks, slot);
            push_source(chains, api_hooks, slot);
        }
    }

    if op.persist == PersistPolicy::Skip {
        chains.prepend(Phase::PreTxBegin, mark_skip_persist());
    }
}
