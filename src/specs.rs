//! Entity and operation declaration surface.
//!
//! These are the inputs the kernel compiles: per-field storage and I/O
//! policy on an [`EntityDef`], and per-operation aliasing, persistence
//! policy, hooks, and anchor policies on an [`OpSpec`]. Everything here
//! is declared once at startup and read-only afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::anchor::Anchor;
use crate::context::OpContext;
use crate::ordering::AnchorPolicy;
use crate::phase::PhaseSlot;
use crate::step::Step;

pub type ValueFactory = Arc<dyn Fn() -> Value + Send + Sync>;
pub type ValueTransform = Arc<dyn Fn(&Value) -> Value + Send + Sync>;
pub type SecretGen = Arc<dyn Fn() -> String + Send + Sync>;
/// Lenient hook predicate: evaluated against the context at run time;
/// an absent predicate always passes.
pub type HookPredicate = Arc<dyn Fn(&OpContext) -> bool + Send + Sync>;

// ── Field declarations ────────────────────────────────────────

/// Backing storage column. `None` on a field makes it virtual.
#[derive(Clone)]
pub struct StorageSpec {
    pub nullable: bool,
    pub primary_key: bool,
    /// Declared storage type name (`uuid`, `string`, `int`, ...).
    pub type_name: String,
    /// Server supplies a value when the caller omits one.
    pub has_server_default: bool,
}

impl StorageSpec {
    pub fn new(type_name: &str) -> Self {
        StorageSpec {
            nullable: true,
            primary_key: false,
            type_name: type_name.to_string(),
            has_server_default: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn server_default(mut self) -> Self {
        self.has_server_default = true;
        self
    }
}

/// Generate-once secret pairing: the field stores a transformed digest
/// while the raw secret is exposed exactly once, then masked.
#[derive(Clone)]
pub struct PairedSpec {
    /// Operation aliases this pairing applies to.
    pub verbs: Vec<String>,
    /// Outbound name for the one-time raw secret.
    pub alias: Option<String>,
    pub gen: SecretGen,
    pub store: ValueTransform,
    /// Trailing characters left visible when masking the stored value.
    pub mask_last: usize,
}

/// Per-field I/O policy: which operation aliases accept the field
/// inbound and emit it outbound, plus wire aliases.
#[derive(Clone, Default)]
pub struct IoSpec {
    pub in_verbs: Vec<String>,
    pub out_verbs: Vec<String>,
    pub alias_in: Option<String>,
    pub alias_out: Option<String>,
    pub paired: Option<PairedSpec>,
}

impl IoSpec {
    pub fn new() -> Self {
        IoSpec::default()
    }

    pub fn in_verbs(mut self, verbs: &[&str]) -> Self {
        self.in_verbs = verbs.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn out_verbs(mut self, verbs: &[&str]) -> Self {
        self.out_verbs = verbs.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn alias_in(mut self, alias: &str) -> Self {
        self.alias_in = Some(alias.to_string());
        self
    }

    pub fn alias_out(mut self, alias: &str) -> Self {
        self.alias_out = Some(alias.to_string());
        self
    }

    pub fn paired(mut self, paired: PairedSpec) -> Self {
        self.paired = Some(paired);
        self
    }
}

/// One field of an entity type.
#[derive(Clone, Default)]
pub struct FieldDef {
    pub storage: Option<StorageSpec>,
    pub io: IoSpec,
    /// Aliases for which the field is required inbound.
    pub required_in: Vec<String>,
    pub default_factory: Option<ValueFactory>,
    /// Declared value type name, for outbound schema docs.
    pub type_name: Option<String>,
    pub max_length: Option<usize>,
    /// Re-read from storage after a write (server-computed values).
    pub refresh_after_write: bool,
    /// Producer for virtual outbound fields.
    pub virtual_producer: Option<ValueTransform>,
    /// Transform applied before the value reaches storage.
    pub to_stored: Option<ValueTransform>,
}

impl FieldDef {
    pub fn new(io: IoSpec) -> Self {
        FieldDef { io, ..FieldDef::default() }
    }

    pub fn storage(mut self, storage: StorageSpec) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn required_in(mut self, verbs: &[&str]) -> Self {
        self.required_in = verbs.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn default_factory(mut self, f: ValueFactory) -> Self {
        self.default_factory = Some(f);
        self
    }

    pub fn type_name(mut self, name: &str) -> Self {
        self.type_name = Some(name.to_string());
        self
    }

    pub fn max_length(mut self, n: usize) -> Self {
        self.max_length = Some(n);
        self
    }

    pub fn refresh_after_write(mut self) -> Self {
        self.refresh_after_write = true;
        self
    }

    pub fn to_stored(mut self, f: ValueTransform) -> Self {
        self.to_stored = Some(f);
        self
    }

    pub fn virtual_producer(mut self, f: ValueTransform) -> Self {
        self.virtual_producer = Some(f);
        self
    }
}

/// One entity type: a name and its ordered field map.
#[derive(Clone, Default)]
pub struct EntityDef {
    pub name: String,
    pub fields: BTreeMap<String, FieldDef>,
}

impl EntityDef {
    pub fn new(name: &str) -> Self {
        EntityDef { name: name.to_string(), fields: BTreeMap::new() }
    }

    pub fn field(mut self, name: &str, def: FieldDef) -> Self {
        self.fields.insert(name.to_string(), def);
        self
    }
}

// ── Operation declarations ────────────────────────────────────

/// Persistence policy for an operation alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistPolicy {
    #[default]
    Default,
    /// Ephemeral: no transaction lifecycle, no writes anywhere.
    Skip,
}

/// A user-supplied step attached at the api, entity, or operation
/// level, with an optional run-time predicate.
#[derive(Clone)]
pub struct HookDef {
    pub slot: PhaseSlot,
    pub step: Arc<dyn Step>,
    pub when: Option<HookPredicate>,
}

impl HookDef {
    pub fn new(slot: PhaseSlot, step: Arc<dyn Step>) -> Self {
        HookDef { slot, step, when: None }
    }

    pub fn when(mut self, predicate: HookPredicate) -> Self {
        self.when = Some(predicate);
        self
    }
}

/// One operation alias on an entity type.
#[derive(Clone)]
pub struct OpSpec {
    pub alias: String,
    /// Canonical target: `create`, `read`, `update`, `replace`,
    /// `delete`, `list`, or `custom`.
    pub target: String,
    pub persist: PersistPolicy,
    pub hooks: Vec<HookDef>,
    /// Diagnostic-only dependency names shown in the plan.
    pub deps: Vec<String>,
    pub secdeps: Vec<String>,
    pub anchor_policies: BTreeMap<Anchor, AnchorPolicy>,
}

impl OpSpec {
    pub fn new(alias: &str, target: &str) -> Self {
        OpSpec {
            alias: alias.to_string(),
            target: target.to_string(),
            persist: PersistPolicy::Default,
            hooks: Vec::new(),
            deps: Vec::new(),
            secdeps: Vec::new(),
            anchor_policies: BTreeMap::new(),
        }
    }

    /// Default spec for an alias the entity never declared: the alias
    /// doubles as the canonical target.
    pub fn implicit(alias: &str) -> Self {
        OpSpec::new(alias, alias)
    }

    pub fn persist(mut self, policy: PersistPolicy) -> Self {
        self.persist = policy;
        self
    }

    pub fn hook(mut self, hook: HookDef) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn dep(mut self, name: &str) -> Self {
        self.deps.push(name.to_string());
        self
    }

    pub fn secdep(mut self, name: &str) -> Self {
        self.secdeps.push(name.to_string());
        self
    }

    pub fn anchor_policy(mut self, anchor: Anchor, policy: AnchorPolicy) -> Self {
        self.anchor_policies.insert(anchor, policy);
        self
    }

    /// Pure reads never persist unless a hook chain signals otherwise.
    pub fn is_pure_read(&self) -> bool {
        matches!(self.target.as_str(), "read" | "list")
    }
}
