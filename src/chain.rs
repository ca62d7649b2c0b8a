//! Phase chain table: ordered step lists per phase slot.
//!
//! Built once per (entity-type, operation-alias) by the kernel, cached
//! behind an `Arc`, and reused across all invocations of that
//! operation. The table also records the computed persistence decision
//! so the executor knows whether to run the transaction lifecycle.

use std::sync::Arc;

use strum::EnumCount;

use crate::phase::{Phase, PhaseSlot};
use crate::step::Step;

/// Per-operation mapping from phase slot to ordered step list.
pub struct PhaseChains {
    main: [Vec<Arc<dyn Step>>; Phase::COUNT],
    on_error: [Vec<Arc<dyn Step>>; Phase::COUNT],
    on_any_error: Vec<Arc<dyn Step>>,
    on_rollback: Vec<Arc<dyn Step>>,
    /// True when this operation runs the transaction lifecycle.
    pub persistent: bool,
}

impl PhaseChains {
    pub fn new() -> Self {
        PhaseChains {
            main: Default::default(),
            on_error: Default::default(),
            on_any_error: Vec::new(),
            on_rollback: Vec::new(),
            persistent: false,
        }
    }

    pub fn push(&mut self, slot: PhaseSlot, step: Arc<dyn Step>) {
        match slot {
            PhaseSlot::Main(ph) => self.main[ph.index()].push(step),
            PhaseSlot::OnError(ph) => self.on_error[ph.index()].push(step),
            PhaseSlot::OnAnyError => self.on_any_error.push(step),
            PhaseSlot::OnRollback => self.on_rollback.push(step),
        }
    }

    /// Prepend a synthetic step (mark-skip-persist) to a main chain.
    pub fn prepend(&mut self, phase: Phase, step: Arc<dyn Step>) {
        self.main[phase.index()].insert(0, step);
    }

    pub fn steps(&self, phase: Phase) -> &[Arc<dyn Step>] {
        &self.main[phase.index()]
    }

    /// Error hooks for a phase: the dedicated slot when non-empty,
    /// otherwise the generic ON_ERROR fallback.
    pub fn error_steps(&self, phase: Phase) -> &[Arc<dyn Step>] {
        let dedicated = &self.on_error[phase.index()];
        if dedicated.is_empty() {
            &self.on_any_error
        } else {
            dedicated
        }
    }

    pub fn rollback_steps(&self) -> &[Arc<dyn Step>] {
        &self.on_rollback
    }

    /// Flattened label rendering of the main chains, phase-prefixed, in
    /// canonical order. Diagnostic surface only.
    pub fn plan_lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        for phase in Phase::ALL {
            for step in self.steps(phase) {
                out.push(format!("{}:{}", phase.as_str(), step.label()));
            }
        }
        out
    }
}

impl Default for PhaseChains {
    fn default() -> Self {
        PhaseChains::new()
    }
}
