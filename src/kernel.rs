//! Kernel: builds and caches phase chains and OpViews per
//! (entity-type, operation-alias), and fronts the executor.
//!
//! Explicitly constructed through [`KernelBuilder`]; no process
//! globals. Chain and view caches are build-if-absent behind mutexes;
//! built artifacts are shared as `Arc`s and survive until
//! [`Kernel::invalidate`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::anchor::Anchor;
use crate::chain::PhaseChains;
use crate::context::OpContext;
use crate::error::{ConfigError, ErrorEnvelope};
use crate::executor;
use crate::hooks::merge_hooks;
use crate::label::Label;
use crate::opview::{self, OpView};
use crate::ordering::order_within_anchor_outcome;
use crate::phase::{Phase, PhaseSlot};
use crate::registry::{AtomRegistry, AtomScope};
use crate::specs::{EntityDef, HookDef, OpSpec, PersistPolicy};
use crate::step::{AtomStep, FnStep, Step};

type CacheKey = (String, String);

/// Startup configuration surface. Consumed by [`KernelBuilder::build`].
#[derive(Default)]
pub struct KernelBuilder {
    registry: Option<Arc<AtomRegistry>>,
    entities: BTreeMap<String, EntityDef>,
    ops: BTreeMap<String, BTreeMap<String, OpSpec>>,
    api_hooks: Vec<HookDef>,
    entity_hooks: BTreeMap<String, Vec<HookDef>>,
}

impl KernelBuilder {
    pub fn new() -> Self {
        KernelBuilder::default()
    }

    /// Atom registry snapshot. Defaults to the built-in atom set.
    pub fn registry(mut self, registry: Arc<AtomRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn entity(mut self, entity: EntityDef) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    pub fn op(mut self, entity: &str, op: OpSpec) -> Self {
        self.ops
            .entry(entity.to_string())
            .or_default()
            .insert(op.alias.clone(), op);
        self
    }

    /// Application-wide hook, applied to every operation.
    pub fn api_hook(mut self, hook: HookDef) -> Self {
        self.api_hooks.push(hook);
        self
    }

    /// Entity-type-wide hook.
    pub fn entity_hook(mut self, entity: &str, hook: HookDef) -> Self {
        self.entity_hooks.entry(entity.to_string()).or_default().push(hook);
        self
    }

    pub fn build(self) -> Kernel {
        let registry =
            self.registry.unwrap_or_else(|| Arc::new(AtomRegistry::with_defaults()));
        info!(
            entities = self.entities.len(),
            atoms = registry.len(),
            "kernel configured"
        );
        Kernel {
            registry,
            entities: self.entities,
            ops: self.ops,
            api_hooks: self.api_hooks,
            entity_hooks: self.entity_hooks,
            chains: Mutex::new(HashMap::new()),
            views: Mutex::new(HashMap::new()),
            fallbacks: Mutex::new(BTreeSet::new()),
            primed: Mutex::new(false),
        }
    }
}

/// Per-process chain/view builder and invocation front door.
pub struct Kernel {
    registry: Arc<AtomRegistry>,
    entities: BTreeMap<String, EntityDef>,
    ops: BTreeMap<String, BTreeMap<String, OpSpec>>,
    api_hooks: Vec<HookDef>,
    entity_hooks: BTreeMap<String, Vec<HookDef>>,

    chains: Mutex<HashMap<CacheKey, Arc<PhaseChains>>>,
    views: Mutex<HashMap<CacheKey, Arc<OpView>>>,
    /// Anchors where chain assembly hit the ordering cycle fallback,
    /// keyed `entity.alias@anchor`. Diagnostic surface only.
    fallbacks: Mutex<BTreeSet<String>>,
    primed: Mutex<bool>,
}

impl Kernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new()
    }

    fn entity_def(&self, entity: &str) -> Result<&EntityDef, ConfigError> {
        self.entities
            .get(entity)
            .ok_or_else(|| ConfigError::UnknownEntity(entity.to_string()))
    }

    /// The declared spec for an alias, or the implicit one where the
    /// alias doubles as the canonical target.
    fn op_spec(&self, entity: &str, alias: &str) -> OpSpec {
        self.ops
            .get(entity)
            .and_then(|m| m.get(alias))
            .cloned()
            .unwrap_or_else(|| OpSpec::implicit(alias))
    }

    /// Compiled field metadata for one (entity, alias), cached.
    pub fn opview(&self, entity: &str, alias: &str) -> Result<Arc<OpView>, ConfigError> {
        let key = (entity.to_string(), alias.to_string());
        let mut views = self.views.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(view) = views.get(&key) {
            return Ok(view.clone());
        }
        let view = Arc::new(opview::compile(self.entity_def(entity)?, alias)?);
        views.insert(key, view.clone());
        Ok(view)
    }

    /// Build (or fetch) the phase chain table for one operation.
    pub fn build(&self, entity: &str, alias: &str) -> Result<Arc<PhaseChains>, ConfigError> {
        let key = (entity.to_string(), alias.to_string());
        let mut cache = self.chains.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(chains) = cache.get(&key) {
            return Ok(chains.clone());
        }

        let view = self.opview(entity, alias)?;
        let op = self.op_spec(entity, alias);
        let entity_hooks =
            self.entity_hooks.get(entity).map(|v| v.as_slice()).unwrap_or(&[]);

        let mut chains = PhaseChains::new();
        merge_hooks(&mut chains, &self.api_hooks, entity_hooks, &op);

        // Persistence decision: declared policy and canonical target,
        // OR-ed with hooks that explicitly claim the tx boundary slots.
        let declared = op.persist != PersistPolicy::Skip && !op.is_pure_read();
        let signalled = !chains.steps(Phase::StartTx).is_empty()
            || !chains.steps(Phase::EndTx).is_empty();
        chains.persistent = declared || signalled;

        self.inject_atoms(&mut chains, &view, &op, entity, alias);

        if chains.persistent {
            chains.push(PhaseSlot::Main(Phase::StartTx), sys_txn_begin());
            chains.push(PhaseSlot::Main(Phase::EndTx), sys_txn_commit());
        }

        debug!(entity, alias, persistent = chains.persistent, "phase chains built");
        let chains = Arc::new(chains);
        cache.insert(key, chains.clone());
        Ok(chains)
    }

    /// Append registered atoms to the main chains, per anchor in
    /// canonical order, each anchor group topo-sorted. Per-field atoms
    /// expand over the fields participating in the operation.
    fn inject_atoms(
        &self,
        chains: &mut PhaseChains,
        view: &OpView,
        op: &OpSpec,
        entity: &str,
        alias: &str,
    ) {
        let mut fields: BTreeSet<String> = view.in_names().map(|n| n.to_string()).collect();
        fields.extend(view.paired_index.keys().cloned());

        for anchor in Anchor::ALL {
            if anchor.persist_tied() && !chains.persistent {
                continue;
            }
            let mut group: Vec<(Label, Arc<dyn Step>)> = Vec::new();
            for entry in self.registry.entries() {
                if entry.anchor != anchor {
                    continue;
                }
                match entry.scope {
                    AtomScope::Model => {
                        let label = entry.label(None);
                        group.push((
                            label.clone(),
                            AtomStep::new(label, None, entry.run.clone()),
                        ));
                    }
                    AtomScope::PerField => {
                        for field in &fields {
                            let label = entry.label(Some(field));
                            group.push((
                                label.clone(),
                                AtomStep::new(label, Some(field.clone()), entry.run.clone()),
                            ));
                        }
                    }
                }
            }
            if group.is_empty() {
                continue;
            }

            let labels: Vec<Label> = group.iter().map(|(l, _)| l.clone()).collect();
            let outcome = order_within_anchor_outcome(
                anchor,
                &labels,
                op.anchor_policies.get(&anchor),
            );
            if outcome.fallback_used {
                let mut fallbacks =
                    self.fallbacks.lock().unwrap_or_else(|e| e.into_inner());
                fallbacks.insert(format!("{}.{}@{}", entity, alias, anchor.as_str()));
            }
            for label in outcome.labels {
                let idx = group
                    .iter()
                    .position(|(l, _)| *l == label)
                    .unwrap_or_default();
                let (_, step) = group.swap_remove(idx);
                chains.push(PhaseSlot::Main(anchor.phase()), step);
            }
        }
    }

    /// Human-readable flattened plan for one operation: dependency
    /// lines first, then phase-prefixed step labels in execution order.
    /// Duplicate lines are collapsed to their first occurrence.
    pub fn plan(&self, entity: &str, alias: &str) -> Result<Vec<String>, ConfigError> {
        let chains = self.build(entity, alias)?;
        let op = self.op_spec(entity, alias);

        let mut lines: Vec<String> = Vec::new();
        let mut secdeps = op.secdeps.clone();
        secdeps.sort();
        for name in secdeps {
            lines.push(format!("{}:{}", Phase::PreTxBegin.as_str(), Label::secdep(&name)));
        }
        let mut deps = op.deps.clone();
        deps.sort();
        for name in deps {
            lines.push(format!("{}:{}", Phase::PreTxBegin.as_str(), Label::dep(&name)));
        }
        lines.extend(chains.plan_lines());

        let mut seen = BTreeSet::new();
        lines.retain(|line| seen.insert(line.clone()));
        Ok(lines)
    }

    /// Full diagnostic payload over every declared operation: plans,
    /// persistence decisions, and any ordering-cycle fallbacks hit
    /// during assembly.
    pub fn diagnostics_payload(&self) -> Result<Value, ConfigError> {
        let mut operations = serde_json::Map::new();
        for (entity, ops) in &self.ops {
            let mut per_alias = serde_json::Map::new();
            for alias in ops.keys() {
                let chains = self.build(entity, alias)?;
                per_alias.insert(
                    alias.clone(),
                    json!({
                        "persistent": chains.persistent,
                        "plan": self.plan(entity, alias)?,
                    }),
                );
            }
            operations.insert(entity.clone(), Value::Object(per_alias));
        }
        let fallbacks: Vec<String> = {
            let set = self.fallbacks.lock().unwrap_or_else(|e| e.into_inner());
            set.iter().cloned().collect()
        };
        Ok(json!({
            "operations": operations,
            "ordering_fallbacks": fallbacks,
        }))
    }

    /// Eagerly build chains and OpViews for every declared operation.
    /// Runs the build exactly once per kernel instance; later calls are
    /// no-ops.
    pub fn ensure_primed(&self) -> Result<(), ConfigError> {
        let mut primed = self.primed.lock().unwrap_or_else(|e| e.into_inner());
        if *primed {
            return Ok(());
        }
        for (entity, ops) in &self.ops {
            for alias in ops.keys() {
                self.opview(entity, alias)?;
                self.build(entity, alias)?;
            }
        }
        *primed = true;
        info!("kernel primed");
        Ok(())
    }

    /// Drop every cached chain and view; the next build starts fresh.
    pub fn invalidate(&self) {
        self.chains.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.views.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.fallbacks.lock().unwrap_or_else(|e| e.into_inner()).clear();
        *self.primed.lock().unwrap_or_else(|e| e.into_inner()) = false;
        info!("kernel caches invalidated");
    }

    /// Execute one operation invocation end to end. The context carries
    /// payload, resource handle, and cancellation flag; the kernel
    /// attaches the compiled view and canonical target before handing
    /// off to the executor.
    pub async fn invoke(&self, mut ctx: OpContext) -> Result<Value, ErrorEnvelope> {
        let chains = self.build(&ctx.entity, &ctx.alias)?;
        let view = self.opview(&ctx.entity, &ctx.alias)?;
        ctx.target = self.op_spec(&ctx.entity, &ctx.alias).target;
        ctx.opview = Some(view);
        executor::run(&chains, ctx).await
    }
}

fn sys_txn_begin() -> Arc<dyn Step> {
    FnStep::new(Label::sys("txn", "begin", Phase::StartTx), |ctx| {
        Box::pin(async move {
            let tx = ctx.tx()?.clone();
            if !tx.in_transaction().await {
                tx.begin().await?;
            }
            Ok(None)
        })
    })
}

fn sys_txn_commit() -> Arc<dyn Step> {
    FnStep::new(Label::sys("txn", "commit", Phase::EndTx), |ctx| {
        Box::pin(async move {
            if !ctx.owns_tx {
                debug!("transaction adopted from caller; skipping commit");
                return Ok(None);
            }
            let tx = ctx.tx()?.clone();
            tx.commit().await?;
            Ok(None)
        })
    })
}
