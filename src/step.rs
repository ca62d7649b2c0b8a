//! Step trait and adapters.
//!
//! Every executable unit in a chain - atom instance, user hook, system
//! step - implements [`Step`] with one fixed signature. Adapters for
//! other shapes (plain functions, sync atom runners) are explicit
//! wrappers created at registration time, never runtime reflection.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::OpContext;
use crate::error::StepError;
use crate::label::Label;

/// A step either produces a result value (which becomes the context's
/// last non-null result), produces nothing, or fails.
pub type StepResult = Result<Option<Value>, StepError>;

/// Boxed future returned by step closures; borrows the context for the
/// duration of the step.
pub type BoxStepFuture<'a> = Pin<Box<dyn Future<Output = StepResult> + Send + 'a>>;

/// One executable step in a phase chain. Steps run strictly
/// sequentially within an invocation and may suspend.
#[async_trait]
pub trait Step: Send + Sync {
    fn label(&self) -> &Label;
    async fn run(&self, ctx: &mut OpContext) -> StepResult;
}

// ── Function-backed steps ─────────────────────────────────────

/// Closure signature for hook/system steps: context in, result out.
pub type StepFn = Arc<dyn for<'a> Fn(&'a mut OpContext) -> BoxStepFuture<'a> + Send + Sync>;

/// A labeled step backed by a closure.
pub struct FnStep {
    label: Label,
    run: StepFn,
}

impl FnStep {
    pub fn new(
        label: Label,
        f: impl for<'a> Fn(&'a mut OpContext) -> BoxStepFuture<'a> + Send + Sync + 'static,
    ) -> Arc<dyn Step> {
        Arc::new(FnStep { label, run: Arc::new(f) })
    }
}

#[async_trait]
impl Step for FnStep {
    fn label(&self) -> &Label {
        &self.label
    }

    async fn run(&self, ctx: &mut OpContext) -> StepResult {
        (self.run)(ctx).await
    }
}

// ── Atom runners ──────────────────────────────────────────────

/// Registry-resident atom runner: `(entity?, context, field?) -> result`.
/// The entity slot mirrors the runner interface; chains invoke atoms
/// with `None` and atoms read the instance from the context instead.
/// `field` is set for per-field atom instances.
pub type AtomRun = Arc<
    dyn for<'a> Fn(Option<&'a Value>, &'a mut OpContext, Option<&'a str>) -> BoxStepFuture<'a>
        + Send
        + Sync,
>;

/// Wrap a synchronous atom function into an [`AtomRun`].
pub fn sync_atom(
    f: fn(Option<&Value>, &mut OpContext, Option<&str>) -> StepResult,
) -> AtomRun {
    Arc::new(move |obj, ctx, field| {
        let result = f(obj, ctx, field);
        Box::pin(std::future::ready(result))
    })
}

/// One instantiated atom: a registry runner bound to its label (and to
/// one field, for per-field atoms).
pub struct AtomStep {
    label: Label,
    field: Option<String>,
    run: AtomRun,
}

impl AtomStep {
    pub fn new(label: Label, field: Option<String>, run: AtomRun) -> Arc<dyn Step> {
        Arc::new(AtomStep { label, field, run })
    }
}

#[async_trait]
impl Step for AtomStep {
    fn label(&self) -> &Label {
        &self.label
    }

    async fn run(&self, ctx: &mut OpContext) -> StepResult {
        (self.run)(None, ctx, self.field.as_deref()).await
    }
}
