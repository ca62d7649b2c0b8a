//! Operation-execution kernel.
//!
//! Builds deterministic, cached phase chains per (entity-type,
//! operation-alias) and walks them through a fixed nine-phase timeline
//! with guarded transaction semantics. The kernel owns no transport
//! and no storage driver: callers hand it a [`guard::TxResource`]
//! handle and a payload, and get back a shaped result or a normalized
//! [`error::ErrorEnvelope`].
//!
//! Typical wiring:
//!
//! ```no_run
//! use std::sync::Arc;
//! use op_kernel::{EntityDef, FieldDef, IoSpec, Kernel, OpContext, OpSpec, StorageSpec};
//!
//! # async fn demo(resource: Arc<dyn op_kernel::TxResource>) {
//! let kernel = Kernel::builder()
//!     .entity(
//!         EntityDef::new("Widget").field(
//!             "name",
//!             FieldDef::new(IoSpec::new().in_verbs(&["create"]).out_verbs(&["create"]))
//!                 .storage(StorageSpec::new("string").not_null())
//!                 .required_in(&["create"]),
//!         ),
//!     )
//!     .op("Widget", OpSpec::new("create", "create"))
//!     .build();
//! kernel.ensure_primed().unwrap();
//!
//! let ctx = OpContext::new("Widget", "create", serde_json::json!({"name": "w1"}))
//!     .with_resource(resource);
//! let result = kernel.invoke(ctx).await;
//! # let _ = result;
//! # }
//! ```

pub mod anchor;
pub mod atoms;
pub mod chain;
pub mod context;
pub mod error;
mod executor;
pub mod guard;
mod hooks;
pub mod kernel;
pub mod label;
pub mod opview;
pub mod ordering;
pub mod phase;
pub mod registry;
pub mod specs;
pub mod step;

pub use anchor::Anchor;
pub use chain::PhaseChains;
pub use context::OpContext;
pub use error::{ConfigError, ErrorEnvelope, FieldIssue, StepError};
pub use guard::{GuardPolicy, GuardedResource, TxResource};
pub use kernel::{Kernel, KernelBuilder};
pub use label::{Label, LabelKind};
pub use opview::OpView;
pub use ordering::AnchorPolicy;
pub use phase::{Phase, PhaseSlot};
pub use registry::{AtomRegistry, AtomRegistryBuilder, AtomScope};
pub use specs::{
    EntityDef, FieldDef, HookDef, IoSpec, OpSpec, PairedSpec, PersistPolicy, StorageSpec,
};
pub use step::{AtomStep, FnStep, Step, StepResult};
