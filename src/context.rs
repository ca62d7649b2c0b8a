//! Execution context: per-invocation mutable state.
//!
//! A strongly-typed struct with a generic key-value scratch map for
//! inter-step communication. Owned exclusively by one in-flight
//! invocation; never shared across invocations. Created at invocation
//! start, discarded at invocation end.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::error::{ErrorEnvelope, StepError};
use crate::guard::{GuardedResource, TxResource};
use crate::opview::OpView;

/// Per-invocation execution state. Steps communicate through `temp`;
/// the last non-null step result lands in `result`; the executor owns
/// the guard slot and the ownership flag.
pub struct OpContext {
    pub invocation_id: Uuid,
    pub entity: String,
    pub alias: String,
    /// Canonical target the alias maps to (`create`, `read`, ...).
    pub target: String,
    /// Inbound payload as received from the caller.
    pub payload: Value,
    /// Entity instance under operation, when the caller has one.
    pub instance: Option<Value>,
    /// Scratch map for inter-step communication.
    pub temp: BTreeMap<String, Value>,
    /// Last non-null step result.
    pub result: Option<Value>,
    /// Shaped output slot, visible to post-commit hooks.
    pub response: Option<Value>,
    /// Last captured error, set on failure paths before error hooks run.
    pub error: Option<ErrorEnvelope>,
    /// Set by the synthetic mark-skip-persist step for ephemeral ops.
    pub skip_persist: bool,
    /// True iff this invocation opened the transaction.
    pub owns_tx: bool,
    /// Compiled field metadata for this (entity, alias).
    pub opview: Option<Arc<OpView>>,

    resource: Option<Arc<dyn TxResource>>,
    guard: Option<GuardedResource>,
    cancel: Option<Arc<AtomicBool>>,
}

impl OpContext {
    pub fn new(entity: &str, alias: &str, payload: Value) -> Self {
        OpContext {
            invocation_id: Uuid::new_v4(),
            entity: entity.to_string(),
            alias: alias.to_string(),
            target: alias.to_string(),
            payload,
            instance: None,
            temp: BTreeMap::new(),
            result: None,
            response: None,
            error: None,
            skip_persist: false,
            owns_tx: false,
            opview: None,
            resource: None,
            guard: None,
            cancel: None,
        }
    }

    pub fn with_resource(mut self, resource: Arc<dyn TxResource>) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_opview(mut self, opview: Arc<OpView>) -> Self {
        self.opview = Some(opview);
        self
    }

    pub fn with_instance(mut self, instance: Value) -> Self {
        self.instance = Some(instance);
        self
    }

    /// Caller-driven cancellation flag, observed at phase boundaries.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.as_ref().map(|f| f.load(Ordering::SeqCst)).unwrap_or(false)
    }

    /// The transactional resource for the current phase, behind its
    /// guard. Outside a guarded phase there is nothing to write to.
    pub fn tx(&self) -> Result<&GuardedResource, StepError> {
        self.guard
            .as_ref()
            .ok_or_else(|| StepError::failed("no guarded transactional resource in this phase"))
    }

    /// Compiled OpView; atoms require one.
    pub fn view(&self) -> Result<&OpView, StepError> {
        self.opview
            .as_deref()
            .ok_or_else(|| StepError::failed("no compiled opview on context"))
    }

    pub(crate) fn raw_resource(&self) -> Option<&Arc<dyn TxResource>> {
        self.resource.as_ref()
    }

    pub(crate) fn install_guard(&mut self, guard: GuardedResource) {
        self.guard = Some(guard);
    }

    pub(crate) fn clear_guard(&mut self) {
        self.guard = None;
    }

    /// Scratch accessor: object at `key`, created on demand.
    pub fn temp_object(&mut self, key: &str) -> &mut serde_json::Map<String, Value> {
        let entry = self
            .temp
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(serde_json::Map::new());
        }
        entry.as_object_mut().expect("just ensured object")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn contexts_are_independent() {
        let a = OpContext::new("Widget", "create", json!({"name": "a"}));
        let b = OpContext::new("Widget", "create", json!({"name": "b"}));
        assert_ne!(a.invocation_id, b.invocation_id);
    }

    #[test]
    fn tx_outside_guarded_phase_fails() {
        let ctx = OpContext::new("Widget", "create", json!({}));
        assert!(ctx.tx().is_err());
    }

    #[test]
    fn temp_object_creates_and_reuses() {
        let mut ctx = OpContext::new("Widget", "create", json!({}));
        ctx.temp_object("emit").insert("k".into(), json!(1));
        ctx.temp_object("emit").insert("j".into(), json!(2));
        assert_eq!(ctx.temp["emit"], json!({"k": 1, "j": 2}));
    }

    #[test]
    fn cancellation_flag_is_observed() {
        let flag = Arc::new(AtomicBool::new(false));
        let ctx = OpContext::new("Widget", "list", json!({})).with_cancel_flag(flag.clone());
        assert!(!ctx.cancelled());
        flag.store(true, Ordering::SeqCst);
        assert!(ctx.cancelled());
    }
}
