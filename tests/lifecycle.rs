//! End-to-end invocation lifecycle tests: a kernel wired with real
//! entities and a recording transactional fake, driven through the
//! public invoke surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use op_kernel::{
    EntityDef, FieldDef, FnStep, HookDef, IoSpec, Kernel, Label, OpContext, OpSpec, PairedSpec,
    PersistPolicy, Phase, PhaseSlot, StepError, StorageSpec, TxResource,
};

fn trace_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Recording transactional fake. Tracks call order and an open-tx flag.
#[derive(Default)]
struct RecordingTx {
    calls: Mutex<Vec<&'static str>>,
    in_tx: AtomicBool,
}

impl RecordingTx {
    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| **c == name).count()
    }
}

#[async_trait]
impl TxResource for RecordingTx {
    async fn begin(&self) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push("begin");
        self.in_tx.store(true, Ordering::SeqCst);
        Ok(())
    }
    async fn flush(&self) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push("flush");
        Ok(())
    }
    async fn commit(&self) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push("commit");
        self.in_tx.store(false, Ordering::SeqCst);
        Ok(())
    }
    async fn rollback(&self) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push("rollback");
        self.in_tx.store(false, Ordering::SeqCst);
        Ok(())
    }
    async fn in_transaction(&self) -> bool {
        self.in_tx.load(Ordering::SeqCst)
    }
}

fn api_key_entity() -> EntityDef {
    EntityDef::new("ApiKey")
        .field(
            "id",
            FieldDef::new(IoSpec::new().out_verbs(&["create", "read", "list"]))
                .storage(StorageSpec::new("uuid").primary_key().server_default())
                .type_name("uuid")
                .refresh_after_write(),
        )
        .field(
            "name",
            FieldDef::new(
                IoSpec::new()
                    .in_verbs(&["create", "update"])
                    .out_verbs(&["create", "read", "list"])
                    .alias_in("label"),
            )
            .storage(StorageSpec::new("string").not_null())
            .required_in(&["create"])
            .max_length(64),
        )
        .field(
            "digest",
            FieldDef::new(IoSpec::new().out_verbs(&["create"]).paired(PairedSpec {
                verbs: vec!["create".into()],
                alias: Some("api_key".into()),
                gen: Arc::new(|| "raw-secret".to_string()),
                store: Arc::new(|v| json!(format!("digest({})", v.as_str().unwrap_or("")))),
                mask_last: 4,
            }))
            .storage(StorageSpec::new("string")),
        )
}

fn kernel() -> Kernel {
    Kernel::builder()
        .entity(api_key_entity())
        .op("ApiKey", OpSpec::new("create", "create"))
        .op("ApiKey", OpSpec::new("list", "list").persist(PersistPolicy::Skip))
        .build()
}

fn failing_hook(slot: PhaseSlot, phase: Phase) -> HookDef {
    HookDef::new(
        slot,
        FnStep::new(Label::hook("op", "boom", phase), |_ctx| {
            Box::pin(std::future::ready(Err(StepError::failed("boom"))))
        }),
    )
}

#[tokio::test]
async fn create_runs_full_lifecycle_and_commits_once() {
    trace_init();
    let k = kernel();
    let tx = Arc::new(RecordingTx::default());
    let ctx = OpContext::new("ApiKey", "create", json!({"label": "deploy-key"}))
        .with_resource(tx.clone());

    let result = k.invoke(ctx).await.unwrap();

    assert_eq!(result["name"], json!("deploy-key"));
    // One-time raw secret appears once, under its outbound alias.
    assert_eq!(result["api_key"], json!("raw-secret"));
    // The stored digest only ever leaves masked.
    let digest = result["digest"].as_str().unwrap();
    assert!(digest.starts_with('*'));
    assert!(digest.ends_with("ret)"));
    assert!(!digest.contains("raw-secret"));

    assert_eq!(tx.calls(), vec!["begin", "commit"]);
}

#[tokio::test]
async fn invoke_returns_the_dumped_outbound_object() {
    let entity = EntityDef::new("Widget").field(
        "name",
        FieldDef::new(IoSpec::new().in_verbs(&["create"]).out_verbs(&["create"]))
            .storage(StorageSpec::new("string")),
    );
    let k = Kernel::builder()
        .entity(entity)
        .op("Widget", OpSpec::new("create", "create"))
        .build();

    let tx = Arc::new(RecordingTx::default());
    let ctx = OpContext::new("Widget", "create", json!({"name": "w1"})).with_resource(tx);

    let result = k.invoke(ctx).await.unwrap();
    assert_eq!(result, json!({"name": "w1"}));
}

#[tokio::test]
async fn validation_failure_rolls_back_exactly_once() {
    trace_init();
    let k = kernel();
    let tx = Arc::new(RecordingTx::default());
    let ctx = OpContext::new("ApiKey", "create", json!({})).with_resource(tx.clone());

    let env = k.invoke(ctx).await.unwrap_err();

    assert_eq!(env.code, "validation_error");
    let detail = env.detail.unwrap();
    assert_eq!(detail["issues"][0]["field"], "name");
    assert_eq!(detail["phase"], "PRE_HANDLER");

    assert_eq!(tx.count("rollback"), 1);
    assert_eq!(tx.count("commit"), 0);
}

#[tokio::test]
async fn ephemeral_list_never_touches_the_transaction() {
    let k = kernel();
    let tx = Arc::new(RecordingTx::default());
    let ctx = OpContext::new("ApiKey", "list", json!({})).with_resource(tx.clone());

    let result = k.invoke(ctx).await.unwrap();

    // No inbound fields, no instance: the outbound object is empty but
    // the walk still completes.
    assert_eq!(result, json!({}));
    assert!(tx.calls().is_empty());
}

#[tokio::test]
async fn handler_failure_runs_dedicated_error_hook_after_rollback() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_hook = seen.clone();
    let on_error = HookDef::new(
        PhaseSlot::OnError(Phase::Handler),
        FnStep::new(Label::hook("op", "record_error", Phase::Handler), move |ctx| {
            let seen = seen_hook.clone();
            let code = ctx.error.as_ref().map(|e| e.code.clone()).unwrap_or_default();
            Box::pin(async move {
                seen.lock().unwrap().push(code);
                Ok(None)
            })
        }),
    );

    let k = Kernel::builder()
        .entity(api_key_entity())
        .op(
            "ApiKey",
            OpSpec::new("create", "create")
                .hook(failing_hook(PhaseSlot::Main(Phase::Handler), Phase::Handler))
                .hook(on_error),
        )
        .build();

    let tx = Arc::new(RecordingTx::default());
    let ctx = OpContext::new("ApiKey", "create", json!({"label": "k"}))
        .with_resource(tx.clone());

    let env = k.invoke(ctx).await.unwrap_err();

    assert_eq!(env.code, "step_error");
    assert_eq!(env.message, "boom");
    assert_eq!(tx.count("rollback"), 1);
    assert_eq!(tx.count("commit"), 0);
    // The error hook observed the captured envelope.
    assert_eq!(*seen.lock().unwrap(), vec!["step_error".to_string()]);
}

#[tokio::test]
async fn post_response_failure_still_returns_the_result() {
    let k = Kernel::builder()
        .entity(api_key_entity())
        .op(
            "ApiKey",
            OpSpec::new("create", "create").hook(failing_hook(
                PhaseSlot::Main(Phase::PostResponse),
                Phase::PostResponse,
            )),
        )
        .build();

    let tx = Arc::new(RecordingTx::default());
    let ctx = OpContext::new("ApiKey", "create", json!({"label": "k"}))
        .with_resource(tx.clone());

    let result = k.invoke(ctx).await.unwrap();
    assert_eq!(result["name"], json!("k"));
    assert_eq!(tx.count("commit"), 1);
    assert_eq!(tx.count("rollback"), 0);
}

#[tokio::test]
async fn flush_from_a_pre_commit_hook_is_a_guard_violation() {
    let flushing = HookDef::new(
        PhaseSlot::Main(Phase::PreCommit),
        FnStep::new(Label::hook("op", "late_flush", Phase::PreCommit), |ctx| {
            Box::pin(async move {
                ctx.tx()?.flush().await?;
                Ok(None)
            })
        }),
    );
    let k = Kernel::builder()
        .entity(api_key_entity())
        .op("ApiKey", OpSpec::new("create", "create").hook(flushing))
        .build();

    let tx = Arc::new(RecordingTx::default());
    let ctx = OpContext::new("ApiKey", "create", json!({"label": "k"}))
        .with_resource(tx.clone());

    let env = k.invoke(ctx).await.unwrap_err();
    assert_eq!(env.code, "guard_violation");
    assert!(env.message.contains("db.flush()"));
    assert!(env.message.contains("PRE_COMMIT"));
    // The illegal flush never reached the resource; rollback did.
    assert_eq!(tx.count("flush"), 0);
    assert_eq!(tx.count("rollback"), 1);
}

#[tokio::test]
async fn adopted_transaction_is_never_committed_or_rolled_back() {
    let k = kernel();
    let tx = Arc::new(RecordingTx::default());
    tx.begin().await.unwrap();

    let ctx = OpContext::new("ApiKey", "create", json!({"label": "k"}))
        .with_resource(tx.clone());
    k.invoke(ctx).await.unwrap();
    // Adopted, not owned: the surrounding owner commits.
    assert_eq!(tx.count("commit"), 0);

    let ctx = OpContext::new("ApiKey", "create", json!({})).with_resource(tx.clone());
    let env = k.invoke(ctx).await.unwrap_err();
    assert_eq!(env.code, "validation_error");
    assert_eq!(tx.count("rollback"), 0);
}

#[tokio::test]
async fn cancellation_is_observed_at_phase_boundaries() {
    let k = kernel();
    let tx = Arc::new(RecordingTx::default());
    let flag = Arc::new(AtomicBool::new(true));
    let ctx = OpContext::new("ApiKey", "create", json!({"label": "k"}))
        .with_resource(tx.clone())
        .with_cancel_flag(flag);

    let env = k.invoke(ctx).await.unwrap_err();
    assert_eq!(env.code, "cancelled");
    assert_eq!(tx.count("commit"), 0);
}

#[tokio::test]
async fn handler_supplied_instance_feeds_the_outbound_object() {
    let handler = HookDef::new(
        PhaseSlot::Main(Phase::Handler),
        FnStep::new(Label::hook("op", "persist_row", Phase::Handler), |ctx| {
            Box::pin(async move {
                ctx.tx()?.flush().await?;
                let name = ctx
                    .temp
                    .get("resolved")
                    .and_then(|r| r.get("name"))
                    .cloned()
                    .unwrap_or(Value::Null);
                ctx.instance = Some(json!({
                    "id": "7b6a4a1e-0000-0000-0000-000000000001",
                    "name": name,
                }));
                Ok(None)
            })
        }),
    );
    let k = Kernel::builder()
        .entity(api_key_entity())
        .op("ApiKey", OpSpec::new("create", "create").hook(handler))
        .build();

    let tx = Arc::new(RecordingTx::default());
    let ctx = OpContext::new("ApiKey", "create", json!({"label": "k"}))
        .with_resource(tx.clone());

    let result = k.invoke(ctx).await.unwrap();
    assert_eq!(result["id"], json!("7b6a4a1e-0000-0000-0000-000000000001"));
    assert_eq!(result["name"], json!("k"));
    assert_eq!(tx.calls(), vec!["begin", "flush", "commit"]);
}

#[tokio::test]
async fn post_commit_hook_can_reshape_the_response() {
    // The outbound object is still scratch state at POST_COMMIT; the
    // dump step publishes whatever shape it has by then.
    let reshape = HookDef::new(
        PhaseSlot::Main(Phase::PostCommit),
        FnStep::new(Label::hook("op", "wrap", Phase::PostCommit), |ctx| {
            Box::pin(async move {
                let inner = ctx.temp.remove("out").unwrap_or(Value::Null);
                ctx.temp.insert("out".into(), json!({"data": inner}));
                Ok(None)
            })
        }),
    );
    let k = Kernel::builder()
        .entity(api_key_entity())
        .op("ApiKey", OpSpec::new("create", "create").hook(reshape))
        .build();

    let tx = Arc::new(RecordingTx::default());
    let ctx = OpContext::new("ApiKey", "create", json!({"label": "k"}))
        .with_resource(tx.clone());

    let result = k.invoke(ctx).await.unwrap();
    assert_eq!(result["data"]["name"], json!("k"));
}
